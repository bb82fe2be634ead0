//! Serialization queue tests
//!
//! These exercise `WorkQueue` directly: admission order, single flight,
//! release on failure and panic, and close semantics.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::Error;
use crate::queue::{QueueStatus, WorkQueue};

#[tokio::test]
async fn test_units_run_in_admission_order() {
    let queue = WorkQueue::new("order");
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut pending = Vec::new();
    for i in 0..5 {
        let order = Arc::clone(&order);
        pending.push(queue.enqueue(async move {
            // Later units yield less, so they would overtake without the queue
            for _ in 0..(5 - i) {
                tokio::task::yield_now().await;
            }
            order.lock().unwrap().push(i);
            Ok(i)
        }));
    }

    for (i, fut) in pending.into_iter().enumerate() {
        assert_eq!(fut.await.unwrap(), i);
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    assert_eq!(queue.status(), QueueStatus::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_at_most_one_unit_in_flight() {
    let queue = WorkQueue::new("single-flight");
    let running = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let running = Arc::clone(&running);
            let max_seen = Arc::clone(&max_seen);
            tokio::spawn(queue.enqueue(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }))
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_admission_is_eager() {
    let queue = WorkQueue::new("eager");
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let first = queue.enqueue(async move {
        let _ = release_rx.await;
        Ok(1)
    });
    // Never polled before the second unit is admitted
    let second = queue.enqueue(async { Ok(2) });

    tokio::task::yield_now().await;
    assert_eq!(queue.status(), QueueStatus::Pending);
    assert_eq!(queue.pending_len(), 1);

    release_tx.send(()).unwrap();
    assert_eq!(second.await.unwrap(), 2);
    assert_eq!(first.await.unwrap(), 1);
}

#[tokio::test]
async fn test_failing_unit_releases_queue() {
    let queue = WorkQueue::new("failing");

    let failed = queue.enqueue(async { Err::<(), _>(Error::Engine("boom".to_string())) });
    let next = queue.enqueue(async { Ok("next") });

    assert!(matches!(failed.await, Err(Error::Engine(msg)) if msg == "boom"));
    assert_eq!(next.await.unwrap(), "next");
    assert_eq!(queue.status(), QueueStatus::Idle);
}

#[tokio::test]
async fn test_panicking_unit_releases_queue() {
    let queue = WorkQueue::new("panicking");

    let panicked = queue.enqueue(async {
        tokio::task::yield_now().await;
        if true {
            panic!("unit panicked");
        }
        Ok(())
    });
    let next = queue.enqueue(async { Ok(7) });

    assert!(matches!(panicked.await, Err(Error::WorkAborted)));
    assert_eq!(next.await.unwrap(), 7);
}

#[tokio::test]
async fn test_close_fails_pending_units() {
    let queue = WorkQueue::new("closing");
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let running = queue.enqueue(async move {
        let _ = release_rx.await;
        Ok("finished")
    });
    let waiting = queue.enqueue(async { Ok("never") });
    tokio::task::yield_now().await;

    assert_eq!(queue.close(), 1);
    assert!(matches!(waiting.await, Err(Error::ConnectionClosed(_))));

    // The running unit is left to finish
    release_tx.send(()).unwrap();
    assert_eq!(running.await.unwrap(), "finished");

    let late = queue.enqueue(async { Ok(()) });
    assert!(matches!(late.await, Err(Error::ConnectionClosed(_))));
}

#[test]
fn test_enqueue_outside_runtime_fails() {
    let queue = WorkQueue::new("no-runtime");
    let fut = queue.enqueue(async { Ok(()) });

    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    assert!(matches!(rt.block_on(fut), Err(Error::NoRuntime)));
    assert_eq!(queue.status(), QueueStatus::Idle);
}

#[tokio::test]
async fn test_dropping_caller_future_does_not_cancel_unit() {
    let queue = WorkQueue::new("detached");
    let ran = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&ran);
    drop(queue.enqueue(async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));

    queue.enqueue(async { Ok(()) }).await.unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

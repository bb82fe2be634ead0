/// Per-connection serialization queue
///
/// Transactions and batches are units of work that must not interleave on a
/// single engine connection. The queue admits units in call order and runs
/// at most one at a time, each on its own tokio task.
///
/// A unit releases the queue through `CompletionGuard`, whose `Drop` clears
/// the in-progress flag and dispatches the next unit. The guard lives inside
/// the unit's task, so release happens on success, on error and on panic.
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::utils::safe_lock_arc;

type Unit = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Observable state of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    /// Nothing running, nothing waiting.
    Idle,
    /// One unit running, nothing waiting.
    Running,
    /// One unit running and at least one waiting.
    Pending,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Unit>,
    in_progress: bool,
    closed: bool,
}

/// FIFO, single-flight work queue. Cloning yields a handle to the same queue.
#[derive(Clone)]
pub struct WorkQueue {
    label: Arc<str>,
    state: Arc<Mutex<QueueState>>,
}

impl WorkQueue {
    pub fn new(label: impl Into<Arc<str>>) -> Self {
        Self {
            label: label.into(),
            state: Arc::new(Mutex::new(QueueState::default())),
        }
    }

    pub fn status(&self) -> QueueStatus {
        match safe_lock_arc(&self.state, "WorkQueue::status") {
            Ok(state) if !state.in_progress => QueueStatus::Idle,
            Ok(state) if state.pending.is_empty() => QueueStatus::Running,
            Ok(_) => QueueStatus::Pending,
            Err(_) => QueueStatus::Idle,
        }
    }

    /// Number of admitted units that have not started yet.
    pub fn pending_len(&self) -> usize {
        safe_lock_arc(&self.state, "WorkQueue::pending_len").map_or(0, |s| s.pending.len())
    }

    pub fn is_closed(&self) -> bool {
        safe_lock_arc(&self.state, "WorkQueue::is_closed").map_or(true, |s| s.closed)
    }

    /// Admit `work` now and return a future for its result.
    ///
    /// Admission happens before this function returns, so the order of
    /// `enqueue` calls is the order in which units run. Admission fails with
    /// `NoRuntime` outside a tokio runtime and with `ConnectionClosed` after
    /// `close`.
    pub fn enqueue<T, Fut>(&self, work: Fut) -> impl Future<Output = Result<T>> + Send + 'static
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let admitted = self.admit(work);
        let queue = self.clone();

        async move {
            let receiver = admitted?;
            match receiver.await {
                Ok(result) => result,
                Err(_) if queue.is_closed() => Err(Error::ConnectionClosed(queue.label.to_string())),
                Err(_) => Err(Error::WorkAborted),
            }
        }
    }

    /// Stop admitting work and drop every unit that has not started.
    ///
    /// A unit that is already running is left to finish. Returns the number
    /// of dropped units.
    pub fn close(&self) -> usize {
        let drained = match safe_lock_arc(&self.state, "WorkQueue::close") {
            Ok(mut state) => {
                state.closed = true;
                std::mem::take(&mut state.pending)
            }
            Err(err) => {
                tracing::error!(queue = %self.label, error = %err, "failed to close queue");
                return 0;
            }
        };
        let dropped = drained.len();
        drop(drained);
        if dropped > 0 {
            tracing::debug!(queue = %self.label, dropped, "dropped pending units on close");
        }
        dropped
    }

    fn admit<T, Fut>(&self, work: Fut) -> Result<oneshot::Receiver<Result<T>>>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let (tx, rx) = oneshot::channel();
        let queue = self.clone();
        let unit: Unit = Box::pin(async move {
            let guard = CompletionGuard { queue };
            let result = work.await;
            // Release before delivering so the caller never observes a busy queue
            drop(guard);
            let _ = tx.send(result);
        });

        {
            let mut state = safe_lock_arc(&self.state, "WorkQueue::admit")?;
            if state.closed {
                return Err(Error::ConnectionClosed(self.label.to_string()));
            }
            state.pending.push_back(unit);
            tracing::debug!(queue = %self.label, pending = state.pending.len(), "unit admitted");
        }

        self.start_next();
        Ok(rx)
    }

    /// Dispatch the head unit if nothing is running.
    fn start_next(&self) {
        let next = match safe_lock_arc(&self.state, "WorkQueue::start_next") {
            Ok(mut state) => {
                if state.in_progress || state.closed {
                    None
                } else {
                    let next = state.pending.pop_front();
                    state.in_progress = next.is_some();
                    next
                }
            }
            Err(err) => {
                tracing::error!(queue = %self.label, error = %err, "queue state unavailable");
                None
            }
        };

        let Some(unit) = next else {
            return;
        };

        match Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(queue = %self.label, "dispatching unit");
                handle.spawn(unit);
            }
            Err(_) => {
                // The dropped unit's caller observes WorkAborted.
                tracing::error!(queue = %self.label, "no runtime to dispatch queued unit");
                drop(unit);
                self.release();
            }
        }
    }

    fn release(&self) {
        match safe_lock_arc(&self.state, "WorkQueue::release") {
            Ok(mut state) => state.in_progress = false,
            Err(err) => {
                tracing::error!(queue = %self.label, error = %err, "failed to release queue");
                return;
            }
        }
        self.start_next();
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("label", &self.label)
            .field("status", &self.status())
            .finish()
    }
}

/// RAII release of the in-progress flag for one dispatched unit.
struct CompletionGuard {
    queue: WorkQueue,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.queue.release();
    }
}

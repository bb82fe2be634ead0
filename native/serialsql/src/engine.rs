/// Engine capability and the worker thread that owns it
///
/// An `Engine` is a synchronous, single-connection SQL engine. It is never
/// shared: `EngineHandle` builds it on a dedicated thread and every call is
/// shipped to that thread as a job, so exactly one engine call is in flight
/// per connection. Callers choose between a blocking reply
/// (`call_blocking`) and an async one (`call`).
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};

use tokio::sync::oneshot;

use crate::constants::WORKER_THREAD_PREFIX;
use crate::error::{Error, Result};
use crate::models::{BatchArguments, BatchResult, EngineResult, Scalar, StatementId, UpdateEvent};
use crate::utils::safe_lock;

/// Row-change observer installed in the engine.
pub type UpdateCallback = Arc<dyn Fn(&UpdateEvent) + Send + Sync>;
/// Observer for commit and rollback notifications.
pub type TransactionCallback = Arc<dyn Fn() + Send + Sync>;

/// A synchronous single-connection SQL engine.
///
/// Hook setters default to `Error::Unsupported`. Callbacks installed through
/// them run on the engine's worker thread and must not call back into the
/// same connection's blocking API.
pub trait Engine: Send + 'static {
    /// Run one statement. `None` means the statement takes no parameters.
    fn execute(&mut self, sql: &str, params: Option<Vec<Scalar>>) -> Result<EngineResult>;

    /// Run each command in order, stopping at the first failure.
    ///
    /// The batch never opens a transaction of its own; callers wrap it.
    fn execute_batch(&mut self, commands: Vec<BatchArguments>) -> Result<BatchResult> {
        let mut summary = BatchResult::default();
        for command in commands {
            let result = self.execute(&command.sql, command.params)?;
            summary.rows_affected += result.rows_affected;
            summary.commands += 1;
        }
        Ok(summary)
    }

    fn prepare(&mut self, sql: &str) -> Result<StatementId>;

    /// Replace the parameters bound to a prepared statement.
    fn bind(&mut self, id: StatementId, params: Vec<Scalar>) -> Result<()>;

    fn execute_prepared(&mut self, id: StatementId) -> Result<EngineResult>;

    /// Release a prepared statement. Unknown ids are ignored.
    fn finalize(&mut self, id: StatementId);

    fn set_update_hook(&mut self, _hook: Option<UpdateCallback>) -> Result<()> {
        Err(Error::Unsupported("update hook"))
    }

    fn set_commit_hook(&mut self, _hook: Option<TransactionCallback>) -> Result<()> {
        Err(Error::Unsupported("commit hook"))
    }

    fn set_rollback_hook(&mut self, _hook: Option<TransactionCallback>) -> Result<()> {
        Err(Error::Unsupported("rollback hook"))
    }

    fn close(&mut self) -> Result<()>;
}

type Job = Box<dyn FnOnce(&mut dyn Engine) + Send>;

/// Owner of an engine and its worker thread.
pub struct EngineHandle {
    label: String,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl EngineHandle {
    /// Spawn the worker thread and build the engine on it.
    ///
    /// Blocks until `factory` has run; its error is returned here.
    pub fn spawn<E, F>(label: impl Into<String>, factory: F) -> Result<Self>
    where
        E: Engine,
        F: FnOnce() -> Result<E> + Send + 'static,
    {
        let label = label.into();
        let (sender, receiver) = mpsc::channel::<Job>();
        let (init_tx, init_rx) = mpsc::sync_channel::<Result<()>>(1);

        let worker = thread::Builder::new()
            .name(format!("{WORKER_THREAD_PREFIX}-{label}"))
            .spawn(move || {
                let mut engine = match factory() {
                    Ok(engine) => {
                        let _ = init_tx.send(Ok(()));
                        engine
                    }
                    Err(err) => {
                        let _ = init_tx.send(Err(err));
                        return;
                    }
                };
                run_jobs(&mut engine, receiver);
            })?;

        match init_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let _ = worker.join();
                return Err(err);
            }
            Err(_) => {
                let _ = worker.join();
                return Err(Error::WorkAborted);
            }
        }

        tracing::debug!(label = %label, "engine worker started");

        Ok(Self {
            worker_id: worker.thread().id(),
            label,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_closed(&self) -> bool {
        safe_lock(&self.sender, "EngineHandle::is_closed").map_or(true, |s| s.is_none())
    }

    /// Run `f` on the engine and wait for its result on this thread.
    pub fn call_blocking<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut dyn Engine) -> Result<R> + Send + 'static,
    {
        if thread::current().id() == self.worker_id {
            return Err(Error::InvalidArgument(format!(
                "blocking call into {} from its own engine thread",
                self.label
            )));
        }
        let (tx, rx) = mpsc::sync_channel(1);
        self.submit(Box::new(move |engine| {
            let _ = tx.send(f(engine));
        }))?;
        rx.recv().map_err(|_| Error::WorkAborted)?
    }

    /// Run `f` on the engine and await its result.
    pub async fn call<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut dyn Engine) -> Result<R> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(Box::new(move |engine| {
            let _ = tx.send(f(engine));
        }))?;
        rx.await.map_err(|_| Error::WorkAborted)?
    }

    /// Queue `f` without waiting for it. Does nothing once the handle is closed.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce(&mut dyn Engine) + Send + 'static,
    {
        if let Err(err) = self.submit(Box::new(f)) {
            tracing::debug!(label = %self.label, error = %err, "dropped engine job");
        }
    }

    /// Close the engine and stop the worker.
    ///
    /// Jobs already queued run first. A second shutdown reports
    /// `ConnectionClosed`.
    pub fn shutdown(&self) -> Result<()> {
        if thread::current().id() == self.worker_id {
            return Err(Error::InvalidArgument(format!(
                "cannot close {} from its own engine thread",
                self.label
            )));
        }
        let sender = safe_lock(&self.sender, "EngineHandle::shutdown sender")?
            .take()
            .ok_or_else(|| Error::ConnectionClosed(self.label.clone()))?;

        let (tx, rx) = mpsc::sync_channel(1);
        let sent = sender.send(Box::new(move |engine: &mut dyn Engine| {
            let _ = tx.send(engine.close());
        }));
        drop(sender);

        let result = match sent {
            Ok(()) => rx.recv().unwrap_or(Err(Error::WorkAborted)),
            Err(_) => Err(Error::WorkAborted),
        };

        let worker = safe_lock(&self.worker, "EngineHandle::shutdown worker")?.take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::warn!(label = %self.label, "engine worker panicked during shutdown");
            }
        }

        tracing::debug!(label = %self.label, "engine worker stopped");
        result
    }

    fn submit(&self, job: Job) -> Result<()> {
        let guard = safe_lock(&self.sender, "EngineHandle::submit")?;
        let sender = guard
            .as_ref()
            .ok_or_else(|| Error::ConnectionClosed(self.label.clone()))?;
        sender
            .send(job)
            .map_err(|_| Error::ConnectionClosed(self.label.clone()))
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("label", &self.label)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn run_jobs<E: Engine>(engine: &mut E, receiver: mpsc::Receiver<Job>) {
    while let Ok(job) = receiver.recv() {
        // A panicking job drops its reply channel; the caller sees WorkAborted.
        if panic::catch_unwind(AssertUnwindSafe(|| job(engine))).is_err() {
            tracing::error!("engine job panicked");
        }
    }
}

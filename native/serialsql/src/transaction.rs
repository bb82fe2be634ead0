/// Transaction management for serialsql.
///
/// `Connection::transaction` turns a callback into one unit of work on the
/// connection's queue:
/// - `BEGIN TRANSACTION`
/// - run the callback with a `Transaction` handle
/// - commit if the callback succeeded without finalizing
/// - roll back if it failed (or the automatic commit failed); a failing
///   rollback's error replaces the original one
///
/// A `Transaction` is finalized by its first successful `commit` or
/// `rollback`. After that, and after the unit ends for any reason, every
/// method fails with `Error::FinalizedTransaction`.
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::connection::Connection;
use crate::constants::{BEGIN_SQL, COMMIT_SQL, ROLLBACK_SQL};
use crate::error::{Error, Result};
use crate::materialize::materialize;
use crate::models::{IntoParams, QueryResult};
use crate::sanitize::sanitize_params;

const OPEN: u8 = 0;
const FINALIZING: u8 = 1;
const DONE: u8 = 2;

/// Scoped handle passed to a transaction callback.
#[derive(Clone)]
pub struct Transaction {
    conn: Connection,
    state: Arc<AtomicU8>,
}

impl Transaction {
    fn new(conn: Connection) -> Self {
        Self {
            conn,
            state: Arc::new(AtomicU8::new(OPEN)),
        }
    }

    /// True until the transaction commits, rolls back or its unit ends.
    pub fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == OPEN
    }

    /// Run one statement inside the transaction.
    pub async fn execute(&self, sql: &str, params: impl IntoParams) -> Result<QueryResult> {
        self.ensure_open()?;
        let params = sanitize_params(params.into_params());
        self.conn
            .run(sql.to_string(), params)
            .await
            .map(materialize)
    }

    /// Commit now. Pending reactive queries run after a successful commit.
    pub async fn commit(&self) -> Result<QueryResult> {
        self.begin_finalize()?;
        match self.conn.run(COMMIT_SQL.to_string(), None).await {
            Ok(result) => {
                self.state.store(DONE, Ordering::Release);
                tracing::debug!(database = %self.conn.name(), "transaction committed");
                self.conn.flush_reactive().await;
                Ok(materialize(result))
            }
            Err(err) => {
                self.state.store(OPEN, Ordering::Release);
                Err(err)
            }
        }
    }

    /// Roll back now. Pending reactive notifications are discarded.
    pub async fn rollback(&self) -> Result<QueryResult> {
        self.begin_finalize()?;
        match self.conn.run(ROLLBACK_SQL.to_string(), None).await {
            Ok(result) => {
                self.state.store(DONE, Ordering::Release);
                self.conn.shared.reactive.discard_pending();
                tracing::debug!(database = %self.conn.name(), "transaction rolled back");
                Ok(materialize(result))
            }
            Err(err) => {
                self.state.store(OPEN, Ordering::Release);
                Err(err)
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(self.finalized())
        }
    }

    fn begin_finalize(&self) -> Result<()> {
        self.state
            .compare_exchange(OPEN, FINALIZING, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| self.finalized())
    }

    fn finalized(&self) -> Error {
        Error::FinalizedTransaction {
            database: self.conn.name().to_string(),
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("database", &self.conn.name())
            .field("open", &self.is_open())
            .finish()
    }
}

/// Seals the transaction when its unit ends.
///
/// If the unit ends while the transaction is still open (the callback
/// panicked, or commit and rollback both failed) a best-effort `ROLLBACK`
/// is queued on the engine so the next unit starts clean.
struct SealGuard {
    tx: Transaction,
}

impl Drop for SealGuard {
    fn drop(&mut self) {
        if self.tx.state.swap(DONE, Ordering::AcqRel) == OPEN {
            tracing::warn!(database = %self.tx.conn.name(), "transaction left open, rolling back");
            self.tx.conn.shared.reactive.discard_pending();
            self.tx.conn.shared.engine.post(|engine| {
                if let Err(err) = engine.execute(ROLLBACK_SQL, None) {
                    tracing::debug!(error = %err, "rollback of abandoned transaction failed");
                }
            });
        }
    }
}

impl Connection {
    /// Run `f` as one atomic unit on this connection.
    ///
    /// The unit is admitted to the queue when this method is called; the
    /// returned future only waits for its outcome. Units run in admission
    /// order, one at a time.
    pub fn transaction<F, Fut>(&self, f: F) -> impl Future<Output = Result<()>> + Send + 'static
    where
        F: FnOnce(Transaction) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let conn = self.clone();
        self.shared.queue.enqueue(run_transaction(conn, f))
    }
}

async fn run_transaction<F, Fut>(conn: Connection, f: F) -> Result<()>
where
    F: FnOnce(Transaction) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    conn.run(BEGIN_SQL.to_string(), None).await?;
    tracing::debug!(database = %conn.name(), "transaction started");

    let tx = Transaction::new(conn);
    let _seal = SealGuard { tx: tx.clone() };

    let outcome = match f(tx.clone()).await {
        Ok(()) if tx.is_open() => tx.commit().await.map(|_| ()),
        other => other,
    };

    match outcome {
        Ok(()) => Ok(()),
        Err(err) => {
            if tx.is_open() {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::debug!(error = %err, "transaction failed before rollback");
                    return Err(rollback_err);
                }
            }
            Err(err)
        }
    }
}

/// Error type shared by every layer of serialsql
///
/// Engine failures, lifecycle failures and user callback failures all surface
/// through this one enum so a transaction callback can propagate any of them
/// with `?`.
use std::path::PathBuf;
use thiserror::Error;

/// Boxed error produced by user code running inside a transaction callback.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum Error {
    /// `execute`/`commit`/`rollback` called on a transaction that already
    /// committed or rolled back.
    #[error("Database: {database}. Cannot execute query on finalized transaction")]
    FinalizedTransaction { database: String },

    /// SQL-level failure reported by the engine.
    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Connection to {0} is closed")]
    ConnectionClosed(String),

    /// A dispatched unit of work ended without producing a result, usually
    /// because its future panicked.
    #[error("Unit of work aborted before completion")]
    WorkAborted,

    #[error("No tokio runtime available to dispatch queued work")]
    NoRuntime,

    #[error("{0} is not supported by this engine")]
    Unsupported(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Database file not found: {}", .0.display())]
    DatabaseNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mutex poisoned in {0}")]
    LockPoisoned(String),

    /// Error raised by the caller's own transaction callback.
    #[error("{0}")]
    Callback(BoxError),
}

impl Error {
    /// Wrap an arbitrary error (or message) raised inside a transaction callback.
    pub fn callback(err: impl Into<BoxError>) -> Self {
        Error::Callback(err.into())
    }

    pub fn is_finalized_transaction(&self) -> bool {
        matches!(self, Error::FinalizedTransaction { .. })
    }
}

impl From<libsql::Error> for Error {
    fn from(err: libsql::Error) -> Self {
        Error::Engine(err.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

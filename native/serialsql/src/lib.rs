//! `serialsql`: serialized transactions over an embedded SQL engine
//!
//! This is the root module of the crate. A `Connection` fronts one
//! single-connection engine (libsql in local mode by default) running on its
//! own worker thread. Transactions and batches are queued per connection and
//! run one at a time in call order; results come back as name-keyed rows.
pub mod batch;
pub mod config;
pub mod connection;
pub mod constants;
pub mod decode;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod libsql_engine;
pub mod materialize;
pub mod models;
pub mod queue;
pub mod reactive;
pub mod sanitize;
pub mod statement;
pub mod transaction;
pub mod utils;

// Re-export the public surface
pub use config::OpenOptions;
pub use connection::{open, Connection};
pub use engine::{Engine, EngineHandle, TransactionCallback, UpdateCallback};
pub use error::{BoxError, Error, Result};
pub use libsql_engine::LibsqlEngine;
pub use models::*;
pub use queue::{QueueStatus, WorkQueue};
pub use reactive::{ReactiveCallback, ReactiveQuery, ReactiveSubscription, TableTrigger};
pub use statement::PreparedStatement;
pub use transaction::Transaction;
pub use utils::{detect_query_type, QueryType};

#[cfg(test)]
mod tests;

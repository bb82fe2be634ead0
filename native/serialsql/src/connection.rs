/// Connection lifecycle and the one-shot query surface
///
/// A `Connection` is a cheap, cloneable handle to one engine connection. It
/// owns the engine worker, the serialization queue for transactions and
/// batches, the hook slots and the reactive registry.
///
/// One-shot `execute` calls do not go through the queue; only
/// `transaction`, `execute_batch` and `load_file` are serialized.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{resolve_db_path, strip_file_scheme, OpenOptions};
use crate::decode::{quote_literal, validate_identifier};
use crate::engine::{Engine, EngineHandle};
use crate::error::{Error, Result};
use crate::hooks::HookSlots;
use crate::libsql_engine::LibsqlEngine;
use crate::materialize::{materialize, raw};
use crate::models::{AttachOptions, EngineResult, IntoParams, QueryResult, RawRows, Scalar};
use crate::queue::{QueueStatus, WorkQueue};
use crate::reactive::ReactiveRegistry;
use crate::sanitize::sanitize_params;

/// SQLite side files removed together with the database.
const SIDE_FILE_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

pub(crate) struct ConnectionShared {
    pub(crate) name: String,
    pub(crate) location: String,
    pub(crate) path: PathBuf,
    pub(crate) engine: EngineHandle,
    pub(crate) queue: WorkQueue,
    pub(crate) hooks: HookSlots,
    pub(crate) reactive: Arc<ReactiveRegistry>,
}

/// Handle to an open database connection.
#[derive(Clone)]
pub struct Connection {
    pub(crate) shared: Arc<ConnectionShared>,
}

/// Open a libsql database.
///
/// A `location` starting with `file://` has the scheme removed, with a
/// warning. Missing directories are created.
pub fn open(options: OpenOptions) -> Result<Connection> {
    Connection::with_engine(options, |options| LibsqlEngine::open(&options))
}

impl Connection {
    /// Open a connection over an engine built by `factory`.
    ///
    /// `factory` runs on the connection's engine thread and receives the
    /// normalized options.
    pub fn with_engine<E, F>(options: OpenOptions, factory: F) -> Result<Self>
    where
        E: Engine,
        F: FnOnce(OpenOptions) -> Result<E> + Send + 'static,
    {
        if options.name.is_empty() {
            return Err(Error::InvalidArgument(
                "database name must not be empty".to_string(),
            ));
        }

        let options = options.normalized();
        let name = options.name.clone();
        let location = options.effective_location().to_string();
        let path = options.db_path();

        let engine = EngineHandle::spawn(name.clone(), move || factory(options))?;

        tracing::debug!(database = %name, path = %path.display(), "connection opened");

        Ok(Self {
            shared: Arc::new(ConnectionShared {
                queue: WorkQueue::new(name.as_str()),
                name,
                location,
                path,
                engine,
                hooks: HookSlots::default(),
                reactive: Arc::new(ReactiveRegistry::default()),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Path of the open database, or `:memory:`.
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn is_closed(&self) -> bool {
        self.shared.engine.is_closed()
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.shared.queue.status()
    }

    /// Run one statement outside the serialization queue.
    pub async fn execute(&self, sql: &str, params: impl IntoParams) -> Result<QueryResult> {
        let params = sanitize_params(params.into_params());
        self.run(sql.to_string(), params).await.map(materialize)
    }

    /// Blocking `execute`. Must not be called from an engine hook.
    pub fn execute_sync(&self, sql: &str, params: impl IntoParams) -> Result<QueryResult> {
        let params = sanitize_params(params.into_params());
        self.run_blocking(sql.to_string(), params).map(materialize)
    }

    /// Run one statement and return positional rows.
    pub async fn execute_raw(&self, sql: &str, params: impl IntoParams) -> Result<RawRows> {
        let params = sanitize_params(params.into_params());
        self.run(sql.to_string(), params).await.map(raw)
    }

    pub fn execute_raw_sync(&self, sql: &str, params: impl IntoParams) -> Result<RawRows> {
        let params = sanitize_params(params.into_params());
        self.run_blocking(sql.to_string(), params).map(raw)
    }

    /// Close the connection.
    ///
    /// Units waiting in the queue fail with `ConnectionClosed`. Closing twice
    /// is an error.
    pub fn close(&self) -> Result<()> {
        let dropped = self.shared.queue.close();
        self.shared.reactive.clear();
        self.shared.engine.shutdown()?;
        tracing::debug!(database = %self.shared.name, dropped, "connection closed");
        Ok(())
    }

    /// Close the connection and remove its database file.
    ///
    /// `location` overrides the directory the file is looked up in.
    pub fn delete(&self, location: Option<&str>) -> Result<()> {
        match self.close() {
            Ok(()) | Err(Error::ConnectionClosed(_)) => {}
            Err(err) => return Err(err),
        }

        let path = self.get_db_path(location);
        if !path.exists() {
            return Err(Error::DatabaseNotFound(path));
        }
        fs::remove_file(&path)?;

        for suffix in SIDE_FILE_SUFFIXES {
            let mut side = path.clone().into_os_string();
            side.push(suffix);
            match fs::remove_file(&side) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }

        tracing::debug!(path = %path.display(), "database deleted");
        Ok(())
    }

    /// Attach another database file under `alias`.
    pub fn attach(&self, options: AttachOptions) -> Result<()> {
        validate_identifier(&options.alias)?;
        let path = self.get_db_path_for(&options.secondary_db_file_name, options.location.as_deref());
        let sql = format!(
            "ATTACH DATABASE {} AS {}",
            quote_literal(&path.to_string_lossy()),
            options.alias
        );
        self.run_blocking(sql, None).map(|_| ())
    }

    pub fn detach(&self, alias: &str) -> Result<()> {
        validate_identifier(alias)?;
        self.run_blocking(format!("DETACH DATABASE {alias}"), None)
            .map(|_| ())
    }

    /// Path of this database under `location`, or under the connection's own
    /// location when `None`.
    pub fn get_db_path(&self, location: Option<&str>) -> PathBuf {
        self.get_db_path_for(&self.shared.name, location)
    }

    fn get_db_path_for(&self, name: &str, location: Option<&str>) -> PathBuf {
        match location {
            Some(location) => resolve_db_path(name, &strip_file_scheme(location)),
            None => resolve_db_path(name, &self.shared.location),
        }
    }

    pub(crate) async fn run(&self, sql: String, params: Option<Vec<Scalar>>) -> Result<EngineResult> {
        self.shared
            .engine
            .call(move |engine| engine.execute(&sql, params))
            .await
    }

    pub(crate) fn run_blocking(
        &self,
        sql: String,
        params: Option<Vec<Scalar>>,
    ) -> Result<EngineResult> {
        self.shared
            .engine
            .call_blocking(move |engine| engine.execute(&sql, params))
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.shared.name)
            .field("path", &self.shared.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

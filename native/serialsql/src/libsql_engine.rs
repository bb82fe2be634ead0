/// libsql-backed engine
///
/// Opens a local (optionally encrypted) libsql database and drives libsql's
/// async API from the engine worker thread with a current-thread runtime
/// owned by the engine. The runtime is created and dropped on that thread.
///
/// libsql local connections expose no hook registration, so hooks are
/// emulated from statement classification after each successful statement.
/// A SQL string holding several statements runs them one after another.
use std::collections::HashMap;
use std::path::Path;

use bytes::Bytes;
use libsql::{Builder, Cipher, Connection, Database, EncryptionConfig, Statement, Value};
use tokio::runtime::{self, Runtime};

use crate::config::OpenOptions;
use crate::constants::{MEMORY_LOCATION, UNKNOWN_COLUMN_TYPE};
use crate::decode::{scalars_to_values, value_to_scalar};
use crate::engine::{Engine, TransactionCallback, UpdateCallback};
use crate::error::{Error, Result};
use crate::models::{ColumnMetadata, EngineResult, Scalar, StatementId, UpdateEvent, UpdateOperation};
use crate::utils::{detect_query_type, is_full_rollback, split_statements, write_target, QueryType};

struct PreparedEntry {
    sql: String,
    statement: Statement,
    params: Vec<Value>,
}

#[derive(Default)]
struct EmulatedHooks {
    update: Option<UpdateCallback>,
    commit: Option<TransactionCallback>,
    rollback: Option<TransactionCallback>,
}

impl EmulatedHooks {
    /// Report what a successfully executed statement did.
    ///
    /// `rowid_before` is `last_insert_rowid()` read before the statement ran.
    /// An insert names its row only when it inserted exactly one row and the
    /// rowid moved; multi-row inserts and upserts report `row_id: None`.
    fn after_statement(&self, conn: &Connection, sql: &str, changes: u64, rowid_before: i64) {
        let query_type = detect_query_type(sql);

        if let Some((operation, table)) = write_target(sql) {
            if changes > 0 {
                if let Some(hook) = &self.update {
                    let rowid_after = conn.last_insert_rowid();
                    let row_id = match operation {
                        UpdateOperation::Insert if changes == 1 && rowid_after != rowid_before => {
                            Some(rowid_after)
                        }
                        _ => None,
                    };
                    hook(&UpdateEvent {
                        table,
                        operation,
                        row_id,
                    });
                }
            }
            if conn.is_autocommit() {
                if let Some(hook) = &self.commit {
                    hook();
                }
            }
            return;
        }

        match query_type {
            QueryType::Commit => {
                if let Some(hook) = &self.commit {
                    hook();
                }
            }
            QueryType::Rollback if is_full_rollback(sql) => {
                if let Some(hook) = &self.rollback {
                    hook();
                }
            }
            _ => {}
        }
    }
}

/// Default `Engine` over a local libsql database.
pub struct LibsqlEngine {
    name: String,
    runtime: Runtime,
    db: Option<Database>,
    conn: Option<Connection>,
    statements: HashMap<StatementId, PreparedEntry>,
    hooks: EmulatedHooks,
}

impl LibsqlEngine {
    /// Open the database described by `options`.
    ///
    /// Missing parent directories of a file database are created.
    pub fn open(options: &OpenOptions) -> Result<Self> {
        let runtime = runtime::Builder::new_current_thread().enable_all().build()?;

        let path = options.db_path();
        if path != Path::new(MEMORY_LOCATION) {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }
        let path = path.to_string_lossy().into_owned();
        let encryption_key = options.encryption_key.clone();

        let (db, conn) = runtime.block_on(async {
            let mut builder = Builder::new_local(&path);

            if let Some(key) = encryption_key {
                let config = EncryptionConfig {
                    cipher: Cipher::Aes256Cbc,
                    encryption_key: Bytes::from(key),
                };
                builder = builder.encryption_config(config);
            }

            let db = builder.build().await?;
            let conn = db.connect()?;
            Ok::<_, Error>((db, conn))
        })?;

        if let Some(timeout) = options.busy_timeout {
            conn.busy_timeout(timeout)?;
        }

        tracing::debug!(path = %path, encrypted = options.encryption_key.is_some(), "opened libsql database");

        Ok(Self {
            name: options.name.clone(),
            runtime,
            db: Some(db),
            conn: Some(conn),
            statements: HashMap::new(),
            hooks: EmulatedHooks::default(),
        })
    }

    fn connection(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| Error::ConnectionClosed(self.name.clone()))
    }
}

/// Prepare and run one statement, then report it to the hooks.
///
/// With `fit_params` the parameter list is cut to what the statement
/// declares, so one list can be shared by every statement of a script.
fn run_sql(
    runtime: &Runtime,
    conn: &Connection,
    hooks: &EmulatedHooks,
    sql: &str,
    params: &[Value],
    fit_params: bool,
) -> Result<EngineResult> {
    let rowid_before = conn.last_insert_rowid();
    let result = runtime.block_on(async {
        let mut statement = conn.prepare(sql).await?;
        let params = if fit_params {
            params.iter().take(statement.parameter_count()).cloned().collect()
        } else {
            params.to_vec()
        };
        run_statement(conn, sql, &mut statement, params).await
    })?;

    hooks.after_statement(conn, sql, result.rows_affected, rowid_before);
    Ok(result)
}

/// Run a prepared statement to completion and collect its output.
async fn run_statement(
    conn: &Connection,
    sql: &str,
    statement: &mut Statement,
    params: Vec<Value>,
) -> Result<EngineResult> {
    let columns = statement.columns();
    let is_write = matches!(
        detect_query_type(sql),
        QueryType::Insert | QueryType::Update | QueryType::Delete | QueryType::Replace
    );

    let (column_names, raw_rows, metadata) = if columns.is_empty() {
        statement.execute(params).await?;
        (Vec::new(), None, None)
    } else {
        let metadata: Vec<ColumnMetadata> = columns
            .iter()
            .enumerate()
            .map(|(index, column)| ColumnMetadata {
                name: column.name().to_string(),
                column_type: column
                    .decl_type()
                    .unwrap_or(UNKNOWN_COLUMN_TYPE)
                    .to_string(),
                index,
            })
            .collect();
        let column_names: Vec<String> = metadata.iter().map(|m| m.name.clone()).collect();
        let width = column_names.len();

        let mut rows = statement.query(params).await?;
        let mut raw_rows = Vec::new();
        while let Some(row) = rows.next().await? {
            let mut values: Vec<Scalar> = Vec::with_capacity(width);
            for i in 0..width {
                #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                let value = row.get_value(i as i32)?;
                values.push(value_to_scalar(value));
            }
            raw_rows.push(values);
        }
        (column_names, Some(raw_rows), Some(metadata))
    };

    // changes() keeps the count of the last write, so only writes report it.
    let rows_affected = if is_write { conn.changes() } else { 0 };
    let insert_id = match detect_query_type(sql) {
        QueryType::Insert | QueryType::Replace if rows_affected > 0 => {
            Some(conn.last_insert_rowid())
        }
        _ => None,
    };

    Ok(EngineResult {
        rows_affected,
        insert_id,
        column_names,
        raw_rows,
        metadata,
    })
}

impl Engine for LibsqlEngine {
    fn execute(&mut self, sql: &str, params: Option<Vec<Scalar>>) -> Result<EngineResult> {
        let params = scalars_to_values(params.unwrap_or_default());
        let conn = self.connection()?;

        let statements = split_statements(sql);
        if statements.len() <= 1 {
            return run_sql(&self.runtime, conn, &self.hooks, sql, &params, false);
        }

        // Every statement runs; the last one's output is returned with the
        // total change count.
        let mut rows_affected = 0;
        let mut insert_id = None;
        let mut last = EngineResult::default();
        for statement in statements {
            last = run_sql(&self.runtime, conn, &self.hooks, statement, &params, true)?;
            rows_affected += last.rows_affected;
            insert_id = last.insert_id.or(insert_id);
        }
        Ok(EngineResult {
            rows_affected,
            insert_id,
            ..last
        })
    }

    fn prepare(&mut self, sql: &str) -> Result<StatementId> {
        if split_statements(sql).len() > 1 {
            return Err(Error::InvalidArgument(
                "A prepared statement must hold a single SQL statement".to_string(),
            ));
        }
        let conn = self.connection()?;
        let statement = self.runtime.block_on(conn.prepare(sql))?;
        let id = StatementId::new();
        self.statements.insert(
            id,
            PreparedEntry {
                sql: sql.to_string(),
                statement,
                params: Vec::new(),
            },
        );
        Ok(id)
    }

    fn bind(&mut self, id: StatementId, params: Vec<Scalar>) -> Result<()> {
        let entry = self
            .statements
            .get_mut(&id)
            .ok_or_else(|| Error::InvalidArgument("Statement not found".to_string()))?;
        entry.params = scalars_to_values(params);
        Ok(())
    }

    fn execute_prepared(&mut self, id: StatementId) -> Result<EngineResult> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| Error::ConnectionClosed(self.name.clone()))?;
        let entry = self
            .statements
            .get_mut(&id)
            .ok_or_else(|| Error::InvalidArgument("Statement not found".to_string()))?;

        // Reset clears the previous run before re-binding
        entry.statement.reset();
        let params = entry.params.clone();
        let rowid_before = conn.last_insert_rowid();
        let result = self
            .runtime
            .block_on(run_statement(conn, &entry.sql, &mut entry.statement, params))?;

        self.hooks
            .after_statement(conn, &entry.sql, result.rows_affected, rowid_before);
        Ok(result)
    }

    fn finalize(&mut self, id: StatementId) {
        self.statements.remove(&id);
    }

    fn set_update_hook(&mut self, hook: Option<UpdateCallback>) -> Result<()> {
        self.hooks.update = hook;
        Ok(())
    }

    fn set_commit_hook(&mut self, hook: Option<TransactionCallback>) -> Result<()> {
        self.hooks.commit = hook;
        Ok(())
    }

    fn set_rollback_hook(&mut self, hook: Option<TransactionCallback>) -> Result<()> {
        self.hooks.rollback = hook;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.statements.clear();
        self.hooks = EmulatedHooks::default();
        let conn = self.conn.take();
        let db = self.db.take();
        if conn.is_none() && db.is_none() {
            return Err(Error::ConnectionClosed(self.name.clone()));
        }
        drop(conn);
        drop(db);
        tracing::debug!(name = %self.name, "closed libsql database");
        Ok(())
    }
}

/// Batch operations for serialsql
///
/// A batch is a unit of work on the connection's queue: BEGIN, every command
/// in order, COMMIT. Any failure rolls the whole batch back. Commands with
/// `BatchParams::Many` run once per parameter row.
use std::fs;
use std::future::Future;
use std::path::Path;

use crate::connection::Connection;
use crate::constants::{BEGIN_EXCLUSIVE_SQL, BEGIN_SQL, COMMIT_SQL, ROLLBACK_SQL};
use crate::error::{Error, Result};
use crate::models::{BatchArguments, BatchCommand, BatchResult};
use crate::sanitize::Sanitize;

impl Connection {
    /// Execute `commands` atomically.
    ///
    /// An empty command list is rejected before anything is queued.
    pub fn execute_batch(
        &self,
        commands: Vec<BatchCommand>,
    ) -> impl Future<Output = Result<BatchResult>> + Send + 'static {
        let admitted = if commands.is_empty() {
            Err(Error::InvalidArgument("No SQL commands provided".to_string()))
        } else {
            let arguments = flatten(commands);
            let conn = self.clone();
            Ok(self
                .shared
                .queue
                .enqueue(run_batch(conn, BEGIN_SQL, arguments)))
        };

        async move { admitted?.await }
    }

    /// Execute a SQL file atomically, one statement per non-empty line.
    ///
    /// Lines starting with `--` are skipped. The file is read before the
    /// work is queued.
    pub fn load_file(&self, path: &Path) -> impl Future<Output = Result<BatchResult>> + Send + 'static {
        let admitted = fs::read_to_string(path).map(|script| {
            let arguments = script_commands(&script);
            tracing::debug!(
                database = %self.name(),
                path = %path.display(),
                commands = arguments.len(),
                "loading SQL file"
            );
            let conn = self.clone();
            self.shared
                .queue
                .enqueue(run_batch(conn, BEGIN_EXCLUSIVE_SQL, arguments))
        });

        async move { admitted?.await }
    }
}

/// Sanitize parameters and expand multi-row commands.
fn flatten(commands: Vec<BatchCommand>) -> Vec<BatchArguments> {
    commands
        .into_iter()
        .flat_map(|command| command.sanitize().into_arguments())
        .collect()
}

pub(crate) fn script_commands(script: &str) -> Vec<BatchArguments> {
    script
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("--"))
        .map(|line| BatchArguments {
            sql: line.to_string(),
            params: None,
        })
        .collect()
}

async fn run_batch(
    conn: Connection,
    begin: &'static str,
    arguments: Vec<BatchArguments>,
) -> Result<BatchResult> {
    conn.run(begin.to_string(), None).await?;

    let executed = conn
        .shared
        .engine
        .call(move |engine| engine.execute_batch(arguments))
        .await;

    let summary = match executed {
        Ok(summary) => summary,
        Err(err) => return rollback_with(&conn, err).await,
    };

    if let Err(err) = conn.run(COMMIT_SQL.to_string(), None).await {
        return rollback_with(&conn, err).await;
    }

    tracing::debug!(
        database = %conn.name(),
        commands = summary.commands,
        rows_affected = summary.rows_affected,
        "batch committed"
    );
    conn.flush_reactive().await;
    Ok(summary)
}

/// Roll back after `err`. A failing rollback's error is returned instead.
async fn rollback_with<T>(conn: &Connection, err: Error) -> Result<T> {
    conn.shared.reactive.discard_pending();
    conn.run(ROLLBACK_SQL.to_string(), None).await?;
    Err(err)
}

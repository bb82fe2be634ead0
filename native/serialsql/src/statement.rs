/// Prepared statement operations for serialsql
///
/// A prepared statement lives in the engine and is addressed by a
/// `StatementId`. The handle binds parameters and runs it; dropping the
/// handle finalizes it. Prepared statements run outside the serialization
/// queue, like `Connection::execute`.
use crate::connection::Connection;
use crate::error::Result;
use crate::materialize::materialize;
use crate::models::{IntoParams, QueryResult, StatementId};
use crate::sanitize::sanitize_params;

/// Handle to a statement prepared on a connection.
pub struct PreparedStatement {
    conn: Connection,
    id: StatementId,
    sql: String,
}

impl Connection {
    /// Compile `sql` once for repeated execution.
    pub fn prepare_statement(&self, sql: &str) -> Result<PreparedStatement> {
        let owned = sql.to_string();
        let id = self
            .shared
            .engine
            .call_blocking(move |engine| engine.prepare(&owned))?;
        Ok(PreparedStatement {
            conn: self.clone(),
            id,
            sql: sql.to_string(),
        })
    }
}

impl PreparedStatement {
    pub fn id(&self) -> StatementId {
        self.id
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Replace the bound parameters. `()` binds nothing.
    pub async fn bind(&self, params: impl IntoParams) -> Result<()> {
        let params = sanitize_params(params.into_params()).unwrap_or_default();
        let id = self.id;
        self.conn
            .shared
            .engine
            .call(move |engine| engine.bind(id, params))
            .await
    }

    pub fn bind_sync(&self, params: impl IntoParams) -> Result<()> {
        let params = sanitize_params(params.into_params()).unwrap_or_default();
        let id = self.id;
        self.conn
            .shared
            .engine
            .call_blocking(move |engine| engine.bind(id, params))
    }

    /// Run the statement with the currently bound parameters.
    pub async fn execute(&self) -> Result<QueryResult> {
        let id = self.id;
        self.conn
            .shared
            .engine
            .call(move |engine| engine.execute_prepared(id))
            .await
            .map(materialize)
    }
}

impl Drop for PreparedStatement {
    fn drop(&mut self) {
        let id = self.id;
        self.conn.shared.engine.post(move |engine| engine.finalize(id));
    }
}

impl std::fmt::Debug for PreparedStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("id", &self.id)
            .field("sql", &self.sql)
            .finish()
    }
}

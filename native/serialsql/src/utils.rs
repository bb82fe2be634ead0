/// Utility functions and helpers for serialsql
///
/// Lock helpers that turn poisoning into an error, and light-weight SQL
/// classification used by the engine to emulate hooks.
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::models::UpdateOperation;

/// Safely lock a mutex with proper error handling
///
/// Returns `Error::LockPoisoned` naming `context` if the mutex is poisoned.
pub fn safe_lock<'a, T>(mutex: &'a Mutex<T>, context: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|e| Error::LockPoisoned(format!("{context}: {e}")))
}

/// Safely lock an Arc<Mutex<T>> with proper error handling
pub fn safe_lock_arc<'a, T>(
    arc_mutex: &'a Arc<Mutex<T>>,
    context: &str,
) -> Result<MutexGuard<'a, T>> {
    arc_mutex
        .lock()
        .map_err(|e| Error::LockPoisoned(format!("{context} (arc): {e}")))
}

/// Query type enumeration for dispatching queries vs. executions
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
    Replace,
    Create,
    Drop,
    Alter,
    Attach,
    Detach,
    Begin,
    Commit,
    Rollback,
    Other,
}

/// Detect the query type from a SQL statement
///
/// Examines the first keyword to categorize the statement. `END` is the
/// SQLite synonym of `COMMIT`.
pub fn detect_query_type(query: &str) -> QueryType {
    let keyword = first_keyword(query).to_ascii_uppercase();

    match keyword.as_str() {
        "SELECT" => QueryType::Select,
        "INSERT" => QueryType::Insert,
        "UPDATE" => QueryType::Update,
        "DELETE" => QueryType::Delete,
        "REPLACE" => QueryType::Replace,
        "CREATE" => QueryType::Create,
        "DROP" => QueryType::Drop,
        "ALTER" => QueryType::Alter,
        "ATTACH" => QueryType::Attach,
        "DETACH" => QueryType::Detach,
        "BEGIN" => QueryType::Begin,
        "COMMIT" | "END" => QueryType::Commit,
        "ROLLBACK" => QueryType::Rollback,
        _ => QueryType::Other,
    }
}

/// True for a plain `ROLLBACK`, false for `ROLLBACK TO <savepoint>`.
pub fn is_full_rollback(query: &str) -> bool {
    if detect_query_type(query) != QueryType::Rollback {
        return false;
    }
    let mut words = query.split_whitespace().skip(1);
    // ROLLBACK [TRANSACTION] [TO [SAVEPOINT] name]
    let mut next = words.next();
    if next.is_some_and(|w| w.eq_ignore_ascii_case("TRANSACTION")) {
        next = words.next();
    }
    !next.is_some_and(|w| w.eq_ignore_ascii_case("TO"))
}

/// Identify the table a data-modifying statement writes to.
///
/// Recognises `INSERT [OR ...] INTO t`, `REPLACE INTO t`,
/// `UPDATE [OR ...] t` and `DELETE FROM t`. Schema prefixes and identifier
/// quotes are stripped. Statements starting with `WITH` are not parsed.
pub fn write_target(query: &str) -> Option<(UpdateOperation, String)> {
    let mut words = query.split_whitespace();
    let first = words.next()?.to_ascii_uppercase();

    let operation = match first.as_str() {
        "INSERT" | "REPLACE" => UpdateOperation::Insert,
        "UPDATE" => UpdateOperation::Update,
        "DELETE" => UpdateOperation::Delete,
        _ => return None,
    };

    let table = match operation {
        UpdateOperation::Insert => {
            let mut word = words.next()?;
            while !word.eq_ignore_ascii_case("INTO") {
                word = words.next()?;
            }
            words.next()?
        }
        UpdateOperation::Update => {
            let mut word = words.next()?;
            if word.eq_ignore_ascii_case("OR") {
                words.next()?;
                word = words.next()?;
            }
            word
        }
        UpdateOperation::Delete => {
            let word = words.next()?;
            if !word.eq_ignore_ascii_case("FROM") {
                return None;
            }
            words.next()?
        }
    };

    let name = clean_table_name(table);
    if name.is_empty() {
        None
    } else {
        Some((operation, name))
    }
}

fn first_keyword(query: &str) -> &str {
    query
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == ';' || c == '(')
        .next()
        .unwrap_or("")
}

/// `main."users"(id, name)` -> `users`
fn clean_table_name(raw: &str) -> String {
    let raw = raw.split('(').next().unwrap_or(raw);
    let raw = raw.rsplit('.').next().unwrap_or(raw);
    raw.trim_matches(|c| matches!(c, '"' | '`' | '[' | ']' | ';'))
        .to_string()
}

/// Split a SQL string into its statements.
///
/// Semicolons inside string literals, quoted identifiers, comments and
/// `CREATE TRIGGER ... BEGIN ... END` bodies do not split. Pieces holding
/// nothing but whitespace and comments are dropped. Returned statements are
/// trimmed and carry no trailing semicolon.
pub fn split_statements(sql: &str) -> Vec<&str> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut start = 0;
    let mut has_content = false;
    let mut in_trigger = false;
    let mut depth = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`' | b'[') => {
                let close = if quote == b'[' { b']' } else { quote };
                has_content = true;
                i += 1;
                while i < bytes.len() && bytes[i] != close {
                    i += 1;
                }
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 1;
            }
            b';' if depth == 0 => {
                if has_content {
                    statements.push(sql[start..i].trim());
                }
                start = i + 1;
                has_content = false;
                in_trigger = false;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let word_start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                if !has_content {
                    in_trigger = starts_trigger(&sql[word_start..]);
                    has_content = true;
                }
                if in_trigger {
                    let word = &sql[word_start..i];
                    if word.eq_ignore_ascii_case("BEGIN") || word.eq_ignore_ascii_case("CASE") {
                        depth += 1;
                    } else if word.eq_ignore_ascii_case("END") {
                        depth = depth.saturating_sub(1);
                    }
                }
                continue;
            }
            c if c.is_ascii_whitespace() => {}
            _ => has_content = true,
        }
        i += 1;
    }

    if has_content {
        statements.push(sql[start..].trim());
    }
    statements
}

/// `CREATE [TEMP | TEMPORARY] TRIGGER`
fn starts_trigger(statement: &str) -> bool {
    let mut words = statement.split_whitespace();
    if !words.next().is_some_and(|w| w.eq_ignore_ascii_case("CREATE")) {
        return false;
    }
    match words.next() {
        Some(w) if w.eq_ignore_ascii_case("TEMP") || w.eq_ignore_ascii_case("TEMPORARY") => {
            words.next().is_some_and(|w| w.eq_ignore_ascii_case("TRIGGER"))
        }
        Some(w) => w.eq_ignore_ascii_case("TRIGGER"),
        None => false,
    }
}

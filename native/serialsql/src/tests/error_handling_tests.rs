//! Error handling tests
//!
//! These verify that failures surface as `Error` values instead of panics
//! or hangs.
//!
//! Focus areas:
//! 1. Constraint violations and invalid SQL
//! 2. Lifecycle errors (closed connections, failed engine construction)
//! 3. Engines without hook support
//! 4. Panics and re-entrant calls on the engine thread

// Allow unwrap() in tests for cleaner test code
#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use bytes::Bytes;

use super::test_utils::{entries, open_memory_db, open_scripted};
use crate::config::OpenOptions;
use crate::connection::Connection;
use crate::error::Error;
use crate::libsql_engine::LibsqlEngine;
use crate::models::{ElementKind, Scalar, TypedView, UpdateEvent};

// ============================================================================
// SQL ERRORS
// ============================================================================

#[tokio::test]
async fn test_not_null_constraint_violation() {
    let conn = open_memory_db();
    conn.execute(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
        (),
    )
    .await
    .unwrap();

    let result = conn
        .execute(
            "INSERT INTO users (id, name) VALUES (?1, ?2)",
            vec![Scalar::Integer(1), Scalar::Null],
        )
        .await;

    assert!(matches!(result, Err(Error::Engine(msg)) if msg.contains("NOT NULL")));
}

#[tokio::test]
async fn test_unique_constraint_violation() {
    let conn = open_memory_db();
    conn.execute("CREATE TABLE users (email TEXT UNIQUE)", ())
        .await
        .unwrap();
    conn.execute("INSERT INTO users VALUES ('a@example.com')", ())
        .await
        .unwrap();

    let result = conn
        .execute("INSERT INTO users VALUES ('a@example.com')", ())
        .await;
    assert!(matches!(result, Err(Error::Engine(msg)) if msg.contains("UNIQUE")));
}

#[tokio::test]
async fn test_syntax_error_is_reported() {
    let conn = open_memory_db();
    let result = conn.execute("SELEKT 1", ()).await;
    assert!(matches!(result, Err(Error::Engine(_))));
}

#[tokio::test]
async fn test_missing_table_in_prepare() {
    let conn = open_memory_db();
    let result = conn.prepare_statement("SELECT * FROM nowhere");
    assert!(matches!(result, Err(Error::Engine(_))));
}

#[tokio::test]
async fn test_prepare_rejects_several_statements() {
    let conn = open_memory_db();
    let result = conn.prepare_statement("SELECT 1; SELECT 2");
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

// ============================================================================
// LIFECYCLE ERRORS
// ============================================================================

#[test]
fn test_empty_name_is_rejected() {
    let result = crate::connection::open(OpenOptions::new(""));
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

#[test]
fn test_engine_factory_error_is_returned() {
    let result = Connection::with_engine(OpenOptions::new("broken"), |_| {
        Err::<LibsqlEngine, _>(Error::Engine("cannot open".to_string()))
    });
    assert!(matches!(result, Err(Error::Engine(msg)) if msg == "cannot open"));
}

#[tokio::test]
async fn test_calls_after_close_fail() {
    let (conn, journal) = open_scripted(|engine| engine);
    let statement = conn.prepare_statement("SELECT 1").unwrap();

    conn.close().unwrap();

    assert!(matches!(
        conn.execute("SELECT 1", ()).await,
        Err(Error::ConnectionClosed(_))
    ));
    assert!(matches!(
        conn.execute_sync("SELECT 1", ()),
        Err(Error::ConnectionClosed(_))
    ));
    assert!(matches!(
        statement.execute().await,
        Err(Error::ConnectionClosed(_))
    ));
    assert!(matches!(
        conn.commit_hook(None),
        Err(Error::ConnectionClosed(_))
    ));
    drop(statement);

    assert_eq!(entries(&journal).last().map(String::as_str), Some("CLOSE"));
}

#[tokio::test]
async fn test_dropping_statement_finalizes() {
    let (conn, journal) = open_scripted(|engine| engine);

    let statement = conn.prepare_statement("SELECT ?").unwrap();
    statement.bind(vec![1]).await.unwrap();
    statement.execute().await.unwrap();
    drop(statement);

    // Engine jobs run in order, so this observes the finalize
    conn.execute("SELECT 2", ()).await.unwrap();
    assert_eq!(entries(&journal), vec!["SELECT ?", "FINALIZE", "SELECT 2"]);
}

// ============================================================================
// HOOK SUPPORT
// ============================================================================

#[tokio::test]
async fn test_unsupported_hooks_are_ignored() {
    let (conn, _journal) = open_scripted(|engine| engine);

    conn.update_hook(Some(Arc::new(|_: &UpdateEvent| {}))).unwrap();
    conn.commit_hook(Some(Arc::new(|| {}))).unwrap();
    conn.rollback_hook(Some(Arc::new(|| {}))).unwrap();
    conn.update_hook(None).unwrap();
}

#[tokio::test]
async fn test_blocking_call_from_hook_is_rejected() {
    let conn = open_memory_db();
    conn.execute("CREATE TABLE re (v INTEGER)", ()).await.unwrap();

    let outcome: Arc<Mutex<Option<bool>>> = Arc::default();
    let slot = Arc::clone(&outcome);
    let inner = conn.clone();
    conn.update_hook(Some(Arc::new(move |_: &UpdateEvent| {
        let rejected = matches!(
            inner.execute_sync("SELECT 1", ()),
            Err(Error::InvalidArgument(_))
        );
        *slot.lock().unwrap() = Some(rejected);
    })))
    .unwrap();

    conn.execute("INSERT INTO re VALUES (1)", ()).await.unwrap();
    assert_eq!(*outcome.lock().unwrap(), Some(true));

    // Break the cycle between the hook and the connection
    conn.update_hook(None).unwrap();
}

// ============================================================================
// PANICS
// ============================================================================

#[tokio::test]
async fn test_engine_panic_is_contained() {
    let (conn, journal) = open_scripted(|engine| engine.panic_on("EXPLODE"));

    assert!(matches!(
        conn.execute("EXPLODE now", ()).await,
        Err(Error::WorkAborted)
    ));
    // The worker survives and keeps serving calls
    conn.execute("SELECT 1", ()).await.unwrap();
    assert_eq!(entries(&journal), vec!["EXPLODE now", "SELECT 1"]);
}

// ============================================================================
// PARAMETER VALIDATION
// ============================================================================

#[test]
fn test_view_outside_buffer_is_rejected() {
    let buffer = Bytes::from_static(&[0; 8]);
    assert!(TypedView::new(buffer.clone(), 0, 2, ElementKind::F64).is_err());
    assert!(TypedView::new(buffer.clone(), 4, 1, ElementKind::I32).is_ok());
    assert!(TypedView::new(buffer, usize::MAX, 1, ElementKind::U8).is_err());
}

#[tokio::test]
async fn test_bind_count_mismatch() {
    let conn = open_memory_db();
    let result = conn.execute("SELECT ? AS a, ? AS b", vec![1]).await;
    // libsql binds missing parameters as NULL or reports an error; never panics
    if let Ok(result) = result {
        assert_eq!(result.rows[0]["a"], Scalar::Integer(1));
        assert_eq!(result.rows[0]["b"], Scalar::Null);
    }
}

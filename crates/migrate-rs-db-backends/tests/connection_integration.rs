//! Integration tests for scoped connections against file-backed SQLite.
//!
//! These exercise the connector, the lock-row protocol across two separate
//! connections to the same database, stale-lock takeover, and
//! release-on-drop.

#![cfg(feature = "sqlite")]

use std::time::Duration;

use migrate_rs_core::MigrateError;
use migrate_rs_db_backends::{ConnectionConfig, Connector, DefaultConnector, DriverKind, Value};

fn file_config(dir: &tempfile::TempDir) -> ConnectionConfig {
    ConnectionConfig::new(
        DriverKind::Sqlite,
        format!("jdbc:sqlite:{}", dir.path().join("app.db").display()),
        "",
        "",
    )
}

// ── Connector ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_connector_opens_jdbc_style_url() {
    let dir = tempfile::tempdir().unwrap();
    let conn = DefaultConnector.open(&file_config(&dir)).await.unwrap();
    conn.execute_ddl("CREATE TABLE widgets (id INTEGER PRIMARY KEY)")
        .await
        .unwrap();
    conn.close().await.unwrap();
    assert!(dir.path().join("app.db").exists());
}

#[tokio::test]
async fn test_connector_rejects_non_sqlite_url_for_sqlite_kind() {
    let cfg = ConnectionConfig::new(DriverKind::Sqlite, "postgres://db/app", "", "");
    let err = DefaultConnector.open(&cfg).await.unwrap_err();
    assert!(matches!(err, MigrateError::ConnectionError(_)));
}

// ── Data persists across scopes ───────────────────────────────────────

#[tokio::test]
async fn test_changes_survive_close_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = file_config(&dir);

    let first = DefaultConnector.open(&cfg).await.unwrap();
    first
        .execute_ddl("CREATE TABLE notes (id INTEGER PRIMARY KEY, body VARCHAR(20))")
        .await
        .unwrap();
    first
        .execute("INSERT INTO notes (body) VALUES (?)", &[Value::from("hi")])
        .await
        .unwrap();
    first.close().await.unwrap();

    let second = DefaultConnector.open(&cfg).await.unwrap();
    let rows = second.query("SELECT body FROM notes", &[]).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get::<String>("body").unwrap(), "hi");
    assert_eq!(
        second.current_column_width("notes", "body").await.unwrap(),
        Some(20)
    );
    second.close().await.unwrap();
}

// ── Locking ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_lock_is_exclusive_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = file_config(&dir);

    let a = DefaultConnector.open(&cfg).await.unwrap();
    let b = DefaultConnector.open(&cfg).await.unwrap();

    assert!(a.try_lock("history", "a", LEASE).await.unwrap());
    assert!(!b.try_lock("history", "b", LEASE).await.unwrap());

    a.unlock().await.unwrap();
    assert!(b.try_lock("history", "b", LEASE).await.unwrap());
    b.unlock().await.unwrap();

    a.close().await.unwrap();
    b.close().await.unwrap();
}

const LEASE: Duration = Duration::from_secs(60);

#[tokio::test]
async fn test_close_releases_held_lock() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = file_config(&dir);

    let a = DefaultConnector.open(&cfg).await.unwrap();
    assert!(a.try_lock("history", "a", LEASE).await.unwrap());
    a.close().await.unwrap();

    let b = DefaultConnector.open(&cfg).await.unwrap();
    assert!(b.try_lock("history", "b", LEASE).await.unwrap());
    b.close().await.unwrap();
}

#[tokio::test]
async fn test_abandoned_lock_is_taken_over_after_lease() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = file_config(&dir);

    // A run that died mid-migration left its row behind.
    let crashed = DefaultConnector.open(&cfg).await.unwrap();
    assert!(crashed.try_lock("history", "crashed", LEASE).await.unwrap());
    crashed
        .execute(
            "UPDATE history_lock SET locked_at = ?",
            &[Value::from("2001-01-01T00:00:00+00:00")],
        )
        .await
        .unwrap();
    std::mem::forget(crashed);

    let next = DefaultConnector.open(&cfg).await.unwrap();
    assert!(next.try_lock("history", "next", LEASE).await.unwrap());
    let rows = next.query("SELECT owner FROM history_lock", &[]).await.unwrap();
    assert_eq!(rows[0].get::<String>("owner").unwrap(), "next");
    next.close().await.unwrap();
}

#[tokio::test]
async fn test_fresh_lock_is_not_taken_over() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = file_config(&dir);

    let a = DefaultConnector.open(&cfg).await.unwrap();
    assert!(a.try_lock("history", "a", LEASE).await.unwrap());
    let b = DefaultConnector.open(&cfg).await.unwrap();
    assert!(!b.try_lock("history", "b", LEASE).await.unwrap());
    assert!(!b.try_lock("history", "b", Duration::from_secs(3600)).await.unwrap());

    a.close().await.unwrap();
    b.close().await.unwrap();
}

// ── Release on drop ───────────────────────────────────────────────────

#[tokio::test]
async fn test_dropped_connection_is_released() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = file_config(&dir);

    {
        let conn = DefaultConnector.open(&cfg).await.unwrap();
        conn.execute_ddl("CREATE TABLE t (id INTEGER)").await.unwrap();
        // dropped without close()
    }

    let conn = DefaultConnector.open(&cfg).await.unwrap();
    assert!(conn.table_exists("t").await.unwrap());
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_dropped_connection_releases_its_lock() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = file_config(&dir);

    {
        let conn = DefaultConnector.open(&cfg).await.unwrap();
        assert!(conn.try_lock("history", "gone", LEASE).await.unwrap());
        conn.begin().await.unwrap();
        conn.execute_ddl("CREATE TABLE half_done (id INTEGER)")
            .await
            .unwrap();
        // dropped mid-transaction, lock still held
    }

    let next = DefaultConnector.open(&cfg).await.unwrap();
    let mut acquired = false;
    for _ in 0..40 {
        if next.try_lock("history", "next", LEASE).await.unwrap() {
            acquired = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(acquired, "lock was not released after drop");
    assert!(!next.table_exists("half_done").await.unwrap());
    next.close().await.unwrap();
}

//! SQLite database backend using `rusqlite`.
//!
//! This module provides the [`SqliteBackend`] which implements the
//! [`DatabaseBackend`](crate::base::DatabaseBackend) trait using `rusqlite`
//! wrapped in `tokio::task::spawn_blocking` for async compatibility.
//!
//! Features:
//! - WAL mode enabled for file databases
//! - In-memory database support via `:memory:` path (useful for testing)
//! - Column widths read back from the declared type in `PRAGMA table_info`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use migrate_rs_core::{MigrateError, MigrateResult};
use tokio::sync::Mutex;

use crate::base::{parse_type_width, ConnectionConfig, DatabaseBackend};
use crate::driver::{strip_jdbc_prefix, DriverKind};
use crate::row::Row;
use crate::value::Value;

/// A SQLite database backend.
///
/// Holds a single `rusqlite` connection behind an async mutex. All operations
/// are run via `tokio::task::spawn_blocking` to avoid blocking the async
/// runtime.
pub struct SqliteBackend {
    /// The path to the database file (or ":memory:").
    path: PathBuf,
    /// The connection, guarded by an async mutex.
    conn: Arc<Mutex<rusqlite::Connection>>,
    /// Aborts whatever statement is running without taking the mutex.
    interrupt: rusqlite::InterruptHandle,
}

impl SqliteBackend {
    /// Opens a SQLite database at the given path.
    ///
    /// If the path is `:memory:`, an in-memory database is created.
    pub fn open(path: impl Into<PathBuf>) -> MigrateResult<Self> {
        let path = path.into();
        let in_memory = path.to_str() == Some(":memory:");
        let conn = if in_memory {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(&path)
        }
        .map_err(|e| MigrateError::ConnectionError(format!("SQLite open failed: {e}")))?;

        let pragmas = if in_memory {
            "PRAGMA foreign_keys=ON;"
        } else {
            "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;"
        };
        conn.execute_batch(pragmas).map_err(|e| {
            MigrateError::ConnectionError(format!("Failed to set pragmas: {e}"))
        })?;

        tracing::debug!(path = %path.display(), "opened SQLite connection");
        Ok(Self {
            path,
            interrupt: conn.get_interrupt_handle(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database (convenience constructor).
    pub fn memory() -> MigrateResult<Self> {
        Self::open(":memory:")
    }

    /// Opens the database described by a [`ConnectionConfig`].
    pub fn connect(config: &ConnectionConfig) -> MigrateResult<Self> {
        Self::open(Self::path_from_url(&config.url)?)
    }

    /// Extracts the database path from a SQLite URL.
    ///
    /// Accepts `sqlite:<path>`, `sqlite://<path>` and `sqlite::memory:`, each
    /// with an optional `jdbc:` prefix. Query parameters are ignored.
    pub fn path_from_url(url: &str) -> MigrateResult<PathBuf> {
        let rest = strip_jdbc_prefix(url.trim());
        let rest = rest
            .strip_prefix("sqlite:")
            .ok_or_else(|| MigrateError::ConnectionError(format!("Not a SQLite URL: {url}")))?;
        let rest = rest.strip_prefix("//").unwrap_or(rest);
        let path = rest.split('?').next().unwrap_or_default();
        if path.is_empty() {
            return Err(MigrateError::ConnectionError(format!(
                "SQLite URL has no database path: {url}"
            )));
        }
        Ok(PathBuf::from(path))
    }

    /// Returns the database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Binds `Value` parameters to a `rusqlite` statement.
    fn bind_params(stmt: &mut rusqlite::Statement<'_>, params: &[Value]) -> MigrateResult<()> {
        for (i, param) in params.iter().enumerate() {
            let idx = i + 1;
            match param {
                Value::Null => stmt.raw_bind_parameter(idx, rusqlite::types::Null),
                Value::Bool(b) => stmt.raw_bind_parameter(idx, b),
                Value::Int(v) => stmt.raw_bind_parameter(idx, v),
                Value::Float(v) => stmt.raw_bind_parameter(idx, v),
                Value::String(s) => stmt.raw_bind_parameter(idx, s.as_str()),
                Value::Bytes(b) => stmt.raw_bind_parameter(idx, b.as_slice()),
                Value::DateTimeTz(dt) => stmt.raw_bind_parameter(idx, dt.to_rfc3339().as_str()),
            }
            .map_err(|e| MigrateError::DatabaseError(format!("Bind error: {e}")))?;
        }
        Ok(())
    }

    /// Converts a `rusqlite::Row` to our generic `Row`.
    fn convert_row(sqlite_row: &rusqlite::Row<'_>, column_names: &[String]) -> Row {
        let values: Vec<Value> = (0..column_names.len())
            .map(|i| {
                match sqlite_row
                    .get_ref(i)
                    .unwrap_or(rusqlite::types::ValueRef::Null)
                {
                    rusqlite::types::ValueRef::Null => Value::Null,
                    rusqlite::types::ValueRef::Integer(v) => Value::Int(v),
                    rusqlite::types::ValueRef::Real(v) => Value::Float(v),
                    rusqlite::types::ValueRef::Text(b) => {
                        Value::String(String::from_utf8_lossy(b).to_string())
                    }
                    rusqlite::types::ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
                }
            })
            .collect();

        Row::new(column_names.to_vec(), values)
    }
}

fn db_err(e: &rusqlite::Error) -> MigrateError {
    MigrateError::DatabaseError(e.to_string())
}

fn join_err(e: &tokio::task::JoinError) -> MigrateError {
    MigrateError::DatabaseError(format!("Task join error: {e}"))
}

#[async_trait::async_trait]
impl DatabaseBackend for SqliteBackend {
    fn vendor(&self) -> &str {
        "sqlite"
    }

    fn driver_kind(&self) -> DriverKind {
        DriverKind::Sqlite
    }

    fn interrupt(&self) {
        self.interrupt.interrupt();
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> MigrateResult<u64> {
        let conn = self.conn.clone();
        let sql = sql.to_string();
        let params = params.to_vec();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&sql).map_err(|e| db_err(&e))?;
            Self::bind_params(&mut stmt, &params)?;
            let count = stmt.raw_execute().map_err(|e| db_err(&e))?;
            Ok(count as u64)
        })
        .await
        .map_err(|e| join_err(&e))?
    }

    async fn execute_batch(&self, sql: &str) -> MigrateResult<()> {
        let conn = self.conn.clone();
        let sql = sql.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute_batch(&sql).map_err(|e| db_err(&e))
        })
        .await
        .map_err(|e| join_err(&e))?
    }

    async fn query(&self, sql: &str, params: &[Value]) -> MigrateResult<Vec<Row>> {
        let conn = self.conn.clone();
        let sql = sql.to_string();
        let params = params.to_vec();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&sql).map_err(|e| db_err(&e))?;

            let column_names: Vec<String> =
                stmt.column_names().into_iter().map(String::from).collect();

            Self::bind_params(&mut stmt, &params)?;

            let mut raw_rows = stmt.raw_query();
            let mut rows = Vec::new();
            while let Some(row) = raw_rows.next().map_err(|e| db_err(&e))? {
                rows.push(Self::convert_row(row, &column_names));
            }

            Ok(rows)
        })
        .await
        .map_err(|e| join_err(&e))?
    }

    async fn table_exists(&self, table: &str) -> MigrateResult<bool> {
        let rows = self
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
                &[Value::from(table)],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn list_tables(&self) -> MigrateResult<Vec<String>> {
        self.query(
            "SELECT name FROM sqlite_master WHERE type = 'table' \
             AND name NOT LIKE 'sqlite_%' ORDER BY name",
            &[],
        )
        .await?
        .iter()
        .map(|row| row.get("name"))
        .collect()
    }

    async fn column_width(&self, table: &str, column: &str) -> MigrateResult<Option<u32>> {
        let sql = format!(
            "PRAGMA table_info({})",
            DriverKind::Sqlite.quote_identifier(table)
        );
        let rows = self.query(&sql, &[]).await?;
        for row in rows {
            if row.get::<String>("name")? == column {
                let declared: String = row.get("type")?;
                return Ok(parse_type_width(&declared));
            }
        }
        Ok(None)
    }
}

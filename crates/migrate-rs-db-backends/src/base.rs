//! Base database backend trait and common types.
//!
//! This module defines the [`DatabaseBackend`] trait that all backend
//! implementations must satisfy, along with the [`ConnectionConfig`] that
//! describes how to reach a target database.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use migrate_rs_core::{MigrateError, MigrateResult};

use crate::driver::{strip_jdbc_prefix, DriverKind};
use crate::row::Row;
use crate::value::Value;

/// The core trait for database backends.
///
/// Each backend owns exactly one live connection for its whole lifetime, so
/// `BEGIN`, the statements that follow, and `COMMIT` always hit the same
/// session.
///
/// All methods are async because database operations are inherently I/O-bound.
/// Backends that use synchronous drivers (like `rusqlite`) wrap operations
/// in `spawn_blocking` to maintain the async interface.
#[async_trait::async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Returns the vendor name (e.g., "postgresql", "sqlite", "mysql").
    fn vendor(&self) -> &str;

    /// Returns the dialect this backend speaks.
    fn driver_kind(&self) -> DriverKind;

    /// Executes a parameterized statement that does not return rows.
    ///
    /// Returns the number of rows affected.
    async fn execute(&self, sql: &str, params: &[Value]) -> MigrateResult<u64>;

    /// Executes one or more unparameterized statements (DDL, transaction control).
    async fn execute_batch(&self, sql: &str) -> MigrateResult<()>;

    /// Executes a SQL query and returns all result rows.
    async fn query(&self, sql: &str, params: &[Value]) -> MigrateResult<Vec<Row>>;

    /// Executes a SQL query and returns exactly one row.
    ///
    /// Returns [`MigrateError::DoesNotExist`] if no rows are returned, or
    /// [`MigrateError::MultipleObjectsReturned`] if more than one row is returned.
    async fn query_one(&self, sql: &str, params: &[Value]) -> MigrateResult<Row> {
        let rows = self.query(sql, params).await?;
        exactly_one(rows)
    }

    /// Begins a new database transaction.
    async fn begin_transaction(&self) -> MigrateResult<()> {
        self.execute_batch("BEGIN").await
    }

    /// Commits the current transaction.
    async fn commit(&self) -> MigrateResult<()> {
        self.execute_batch("COMMIT").await
    }

    /// Rolls back the current transaction.
    async fn rollback(&self) -> MigrateResult<()> {
        self.execute_batch("ROLLBACK").await
    }

    /// Returns `true` if a table with this exact name exists.
    async fn table_exists(&self, table: &str) -> MigrateResult<bool>;

    /// Returns the declared character width of a column.
    ///
    /// `None` when the table or column does not exist, or when the column
    /// type has no width (e.g. `TEXT`, `INTEGER`).
    async fn column_width(&self, table: &str, column: &str) -> MigrateResult<Option<u32>>;

    /// Returns the names of every user table in the current schema.
    async fn list_tables(&self) -> MigrateResult<Vec<String>>;

    /// Tries once to take the migration lock named `resource` for `owner`.
    ///
    /// The default implementation keeps a single row in a `<resource>_lock`
    /// table; a primary-key violation means another run holds it. A row whose
    /// `locked_at` is older than `lease` belongs to a run that died without
    /// releasing it and is taken over.
    async fn try_lock(&self, resource: &str, owner: &str, lease: Duration) -> MigrateResult<bool> {
        let kind = self.driver_kind();
        let table = kind.quote_identifier(&lock_table_name(resource));
        self.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (id INTEGER PRIMARY KEY, \
             owner VARCHAR(128) NOT NULL, locked_at VARCHAR(64) NOT NULL)"
        ))
        .await?;

        let insert = format!(
            "INSERT INTO {table} (id, owner, locked_at) VALUES (1, {}, {})",
            kind.placeholder(1),
            kind.placeholder(2)
        );
        let now = Value::from(Utc::now().to_rfc3339());
        match self.execute(&insert, &[Value::from(owner), now.clone()]).await {
            Ok(_) => return Ok(true),
            Err(MigrateError::DatabaseError(msg)) => {
                tracing::debug!(resource, error = %msg, "migration lock is held elsewhere");
            }
            Err(e) => return Err(e),
        }

        let rows = match self
            .query(&format!("SELECT owner, locked_at FROM {table} WHERE id = 1"), &[])
            .await
        {
            Ok(rows) => rows,
            Err(MigrateError::DatabaseError(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let Some(row) = rows.first() else {
            return Ok(false);
        };
        let holder: String = row.get("owner")?;
        let locked_at: String = row.get("locked_at")?;
        if !lease_expired(&locked_at, lease) {
            return Ok(false);
        }

        tracing::warn!(resource, holder = %holder, locked_at = %locked_at, "taking over stale migration lock");
        let take_over = format!(
            "UPDATE {table} SET owner = {}, locked_at = {} WHERE id = 1 AND locked_at = {}",
            kind.placeholder(1),
            kind.placeholder(2),
            kind.placeholder(3)
        );
        match self
            .execute(&take_over, &[Value::from(owner), now, Value::from(locked_at)])
            .await
        {
            Ok(updated) => Ok(updated == 1),
            Err(MigrateError::DatabaseError(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Renews the lease on a lock taken with [`try_lock`](Self::try_lock).
    ///
    /// Fails if `owner` no longer holds it.
    async fn refresh_lock(&self, resource: &str, owner: &str) -> MigrateResult<()> {
        let kind = self.driver_kind();
        let sql = format!(
            "UPDATE {} SET locked_at = {} WHERE id = 1 AND owner = {}",
            kind.quote_identifier(&lock_table_name(resource)),
            kind.placeholder(1),
            kind.placeholder(2)
        );
        let updated = self
            .execute(&sql, &[Value::from(Utc::now().to_rfc3339()), Value::from(owner)])
            .await?;
        if updated == 0 {
            return Err(MigrateError::DatabaseError(format!(
                "Migration lock on {resource} is no longer held by {owner}"
            )));
        }
        Ok(())
    }

    /// Releases a lock taken with [`try_lock`](Self::try_lock) by `owner`.
    async fn unlock(&self, resource: &str, owner: &str) -> MigrateResult<()> {
        let kind = self.driver_kind();
        let sql = format!(
            "DELETE FROM {} WHERE id = 1 AND owner = {}",
            kind.quote_identifier(&lock_table_name(resource)),
            kind.placeholder(1)
        );
        self.execute(&sql, &[Value::from(owner)]).await?;
        Ok(())
    }

    /// Asks the server to abort the statement currently running, if the
    /// driver can do so without the connection. Used when a run is abandoned.
    fn interrupt(&self) {}

    /// Releases the underlying connection.
    async fn close(&self) -> MigrateResult<()> {
        Ok(())
    }
}

/// Whether a lock stamped at `locked_at` has outlived `lease`.
///
/// An unreadable stamp counts as expired.
fn lease_expired(locked_at: &str, lease: Duration) -> bool {
    match DateTime::parse_from_rfc3339(locked_at) {
        Ok(stamp) => (Utc::now() - stamp.with_timezone(&Utc))
            .to_std()
            .is_ok_and(|age| age > lease),
        Err(_) => true,
    }
}

/// Name of the fallback lock table guarding `resource`.
pub fn lock_table_name(resource: &str) -> String {
    format!("{resource}_lock")
}

/// Reduces a result set to its single row.
pub fn exactly_one(rows: Vec<Row>) -> MigrateResult<Row> {
    let count = rows.len();
    let mut iter = rows.into_iter();
    match (iter.next(), count) {
        (Some(row), 1) => Ok(row),
        (None, _) => Err(MigrateError::DoesNotExist("No rows returned".to_string())),
        _ => Err(MigrateError::MultipleObjectsReturned(format!(
            "Expected 1 row, got {count}"
        ))),
    }
}

/// Extracts the width from a declared character type such as `VARCHAR(50)`.
///
/// Only character and binary types carry a width in this sense; numeric
/// precision like `DECIMAL(10,2)` yields `None`.
pub fn parse_type_width(declared: &str) -> Option<u32> {
    let upper = declared.to_ascii_uppercase();
    if !(upper.contains("CHAR") || upper.contains("BINARY")) {
        return None;
    }
    let open = upper.find('(')?;
    let close = upper[open..].find(')')? + open;
    upper[open + 1..close].split(',').next()?.trim().parse().ok()
}

/// Connection parameters for one target database.
///
/// Immutable once a run begins. `Debug` output redacts the password.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// The resolved dialect.
    pub driver_kind: DriverKind,
    /// The connection URL, with or without a `jdbc:` prefix.
    pub url: String,
    /// The database user (empty for none).
    pub username: String,
    /// The database password (empty for none).
    pub password: String,
    /// Dialect-specific tuning parameters.
    pub options: HashMap<String, String>,
}

impl ConnectionConfig {
    /// Creates a configuration with no extra options.
    pub fn new(
        driver_kind: DriverKind,
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            driver_kind,
            url: url.into(),
            username: username.into(),
            password: password.into(),
            options: HashMap::new(),
        }
    }

    /// Creates a configuration for a SQLite file database.
    pub fn sqlite_file(path: impl AsRef<std::path::Path>) -> Self {
        Self::new(
            DriverKind::Sqlite,
            format!("sqlite:{}", path.as_ref().display()),
            "",
            "",
        )
    }

    /// Creates a configuration for an in-memory SQLite database.
    pub fn sqlite_memory() -> Self {
        Self::new(DriverKind::Sqlite, "sqlite::memory:", "", "")
    }

    /// Adds a dialect option.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// The URL with any `jdbc:` prefix removed.
    pub fn normalized_url(&self) -> &str {
        strip_jdbc_prefix(self.url.trim())
    }

    /// The username, or `None` when empty.
    pub fn user(&self) -> Option<&str> {
        Some(self.username.as_str()).filter(|u| !u.is_empty())
    }

    /// The password, or `None` when empty.
    pub fn pass(&self) -> Option<&str> {
        Some(self.password.as_str()).filter(|p| !p.is_empty())
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("driver_kind", &self.driver_kind)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_expired() {
        let lease = Duration::from_secs(60);
        assert!(!lease_expired(&Utc::now().to_rfc3339(), lease));
        let old = (Utc::now() - chrono::Duration::seconds(120)).to_rfc3339();
        assert!(lease_expired(&old, lease));
        assert!(!lease_expired(&old, Duration::from_secs(600)));
        assert!(lease_expired("not a timestamp", lease));
    }

    #[test]
    fn test_parse_type_width() {
        assert_eq!(parse_type_width("VARCHAR(50)"), Some(50));
        assert_eq!(parse_type_width("varchar( 10 )"), Some(10));
        assert_eq!(parse_type_width("character varying(255)"), Some(255));
        assert_eq!(parse_type_width("NVARCHAR2(20 CHAR)"), None);
        assert_eq!(parse_type_width("CHAR(3)"), Some(3));
        assert_eq!(parse_type_width("TEXT"), None);
        assert_eq!(parse_type_width("DECIMAL(10,2)"), None);
        assert_eq!(parse_type_width("VARCHAR"), None);
    }

    #[test]
    fn test_exactly_one() {
        let row = || Row::new(vec!["a".into()], vec![Value::Int(1)]);
        assert!(exactly_one(vec![row()]).is_ok());
        assert!(matches!(exactly_one(vec![]), Err(MigrateError::DoesNotExist(_))));
        assert!(matches!(
            exactly_one(vec![row(), row()]),
            Err(MigrateError::MultipleObjectsReturned(_))
        ));
    }

    #[test]
    fn test_connection_config_sqlite_file() {
        let cfg = ConnectionConfig::sqlite_file("/tmp/test.db");
        assert_eq!(cfg.driver_kind, DriverKind::Sqlite);
        assert_eq!(cfg.url, "sqlite:/tmp/test.db");
        assert!(cfg.user().is_none());
    }

    #[test]
    fn test_connection_config_normalized_url() {
        let cfg = ConnectionConfig::new(
            DriverKind::Postgres,
            "jdbc:postgresql://localhost:5432/fhir",
            "admin",
            "secret",
        );
        assert_eq!(cfg.normalized_url(), "postgresql://localhost:5432/fhir");
        assert_eq!(cfg.user(), Some("admin"));
        assert_eq!(cfg.pass(), Some("secret"));
    }

    #[test]
    fn test_connection_config_debug_redacts_password() {
        let cfg = ConnectionConfig::new(DriverKind::MySql, "mysql://db/app", "root", "hunter2")
            .with_option("ssl-mode", "required");
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("ssl-mode"));
    }

    #[test]
    fn test_lock_table_name() {
        assert_eq!(lock_table_name("migrate_schema_history"), "migrate_schema_history_lock");
    }
}

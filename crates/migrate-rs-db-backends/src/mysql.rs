//! MySQL and MariaDB backend using `mysql_async`.
//!
//! This module provides the [`MySqlBackend`] which implements the
//! [`DatabaseBackend`](crate::base::DatabaseBackend) trait over one
//! `mysql_async` connection held for the backend's lifetime.
//!
//! MySQL commits implicitly around DDL, so callers must not rely on
//! `begin_transaction` to make schema changes atomic here.

use std::time::Duration;

use migrate_rs_core::{MigrateError, MigrateResult};
use mysql_async::prelude::Queryable;
use tokio::sync::Mutex;

use crate::base::{ConnectionConfig, DatabaseBackend};
use crate::driver::DriverKind;
use crate::row::Row;
use crate::value::Value;

/// A MySQL (or MariaDB) database backend.
pub struct MySqlBackend {
    kind: DriverKind,
    conn: Mutex<Option<mysql_async::Conn>>,
}

impl MySqlBackend {
    /// Connects using a [`ConnectionConfig`].
    ///
    /// `mariadb://` URLs are accepted as an alias for `mysql://`. JDBC-style
    /// query parameters are dropped, since `mysql_async` rejects the ones it
    /// does not know; non-empty username and password override the URL's.
    pub async fn connect(config: &ConnectionConfig) -> MigrateResult<Self> {
        let opts = mysql_async::Opts::from_url(&Self::native_url(config.normalized_url()))
            .map_err(|e| MigrateError::ConnectionError(format!("Invalid MySQL URL: {e}")))?;

        let mut builder = mysql_async::OptsBuilder::from_opts(opts);
        if let Some(user) = config.user() {
            builder = builder.user(Some(user));
        }
        if let Some(pass) = config.pass() {
            builder = builder.pass(Some(pass));
        }

        let conn = mysql_async::Conn::new(builder)
            .await
            .map_err(|e| MigrateError::ConnectionError(format!("MySQL handshake failed: {e}")))?;

        let kind = if config.driver_kind == DriverKind::MariaDb {
            DriverKind::MariaDb
        } else {
            DriverKind::MySql
        };
        tracing::debug!(vendor = kind.vendor(), "opened MySQL connection");
        Ok(Self {
            kind,
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Rewrites a (JDBC-normalized) URL into the form `mysql_async` parses.
    fn native_url(url: &str) -> String {
        let url = url.split('?').next().unwrap_or(url);
        url.strip_prefix("mariadb:")
            .map_or_else(|| url.to_string(), |rest| format!("mysql:{rest}"))
    }

    /// Converts `Value` parameters to `mysql_async` parameter values.
    fn values_to_params(params: &[Value]) -> Vec<mysql_async::Value> {
        params
            .iter()
            .map(|v| match v {
                Value::Null => mysql_async::Value::NULL,
                Value::Bool(b) => mysql_async::Value::from(*b),
                Value::Int(i) => mysql_async::Value::from(*i),
                Value::Float(f) => mysql_async::Value::from(*f),
                Value::String(s) => mysql_async::Value::from(s.as_str()),
                Value::Bytes(b) => mysql_async::Value::from(b.as_slice()),
                Value::DateTimeTz(dt) => {
                    mysql_async::Value::from(dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string())
                }
            })
            .collect()
    }

    /// Converts a `mysql_async::Row` to our generic `Row`.
    fn convert_row(mysql_row: &mysql_async::Row) -> Row {
        let columns: Vec<String> = mysql_row
            .columns_ref()
            .iter()
            .map(|c| c.name_str().to_string())
            .collect();

        let values: Vec<Value> = (0..columns.len())
            .map(|i| match mysql_row.get::<mysql_async::Value, usize>(i) {
                None | Some(mysql_async::Value::NULL) => Value::Null,
                Some(mysql_async::Value::Bytes(b)) => match String::from_utf8(b) {
                    Ok(s) => Value::String(s),
                    Err(e) => Value::Bytes(e.into_bytes()),
                },
                Some(mysql_async::Value::Int(i)) => Value::Int(i),
                Some(mysql_async::Value::UInt(u)) => {
                    i64::try_from(u).map_or(Value::Null, Value::Int)
                }
                Some(mysql_async::Value::Float(f)) => Value::Float(f64::from(f)),
                Some(mysql_async::Value::Double(d)) => Value::Float(d),
                Some(mysql_async::Value::Date(y, mo, d, h, mi, s, us)) => {
                    chrono::NaiveDate::from_ymd_opt(i32::from(y), u32::from(mo), u32::from(d))
                        .and_then(|date| {
                            date.and_hms_micro_opt(u32::from(h), u32::from(mi), u32::from(s), us)
                        })
                        .map_or(Value::Null, |naive| Value::DateTimeTz(naive.and_utc()))
                }
                Some(other) => Value::String(format!("{other:?}")),
            })
            .collect();

        Row::new(columns, values)
    }
}

fn closed() -> MigrateError {
    MigrateError::ConnectionError("MySQL connection already closed".to_string())
}

fn db_err(e: &mysql_async::Error) -> MigrateError {
    MigrateError::DatabaseError(e.to_string())
}

#[async_trait::async_trait]
impl DatabaseBackend for MySqlBackend {
    fn vendor(&self) -> &str {
        self.kind.vendor()
    }

    fn driver_kind(&self) -> DriverKind {
        self.kind
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> MigrateResult<u64> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(closed)?;

        conn.exec_drop(sql, Self::values_to_params(params))
            .await
            .map_err(|e| db_err(&e))?;
        Ok(conn.affected_rows())
    }

    async fn execute_batch(&self, sql: &str) -> MigrateResult<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(closed)?;
        conn.query_drop(sql).await.map_err(|e| db_err(&e))
    }

    async fn query(&self, sql: &str, params: &[Value]) -> MigrateResult<Vec<Row>> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(closed)?;

        let rows: Vec<mysql_async::Row> = conn
            .exec(sql, Self::values_to_params(params))
            .await
            .map_err(|e| db_err(&e))?;

        Ok(rows.iter().map(Self::convert_row).collect())
    }

    async fn table_exists(&self, table: &str) -> MigrateResult<bool> {
        let rows = self
            .query(
                "SELECT 1 AS present FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_name = ?",
                &[Value::from(table)],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn column_width(&self, table: &str, column: &str) -> MigrateResult<Option<u32>> {
        let rows = self
            .query(
                "SELECT CAST(character_maximum_length AS SIGNED) AS width \
                 FROM information_schema.columns \
                 WHERE table_schema = DATABASE() AND table_name = ? AND column_name = ?",
                &[Value::from(table), Value::from(column)],
            )
            .await?;
        match rows.first() {
            Some(row) => row.get::<Option<u32>>("width"),
            None => Ok(None),
        }
    }

    async fn list_tables(&self) -> MigrateResult<Vec<String>> {
        self.query(
            "SELECT CAST(table_name AS CHAR) AS name FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
            &[],
        )
        .await?
        .iter()
        .map(|row| row.get("name"))
        .collect()
    }

    // Named locks die with the session.
    async fn try_lock(&self, resource: &str, _owner: &str, _lease: Duration) -> MigrateResult<bool> {
        let row = self
            .query_one("SELECT GET_LOCK(?, 0) AS locked", &[Value::from(resource)])
            .await?;
        Ok(row.get::<Option<bool>>("locked")?.unwrap_or(false))
    }

    async fn refresh_lock(&self, _resource: &str, _owner: &str) -> MigrateResult<()> {
        Ok(())
    }

    async fn unlock(&self, resource: &str, _owner: &str) -> MigrateResult<()> {
        self.query("SELECT RELEASE_LOCK(?) AS released", &[Value::from(resource)])
            .await?;
        Ok(())
    }

    async fn close(&self) -> MigrateResult<()> {
        if let Some(conn) = self.conn.lock().await.take() {
            conn.disconnect().await.map_err(|e| db_err(&e))?;
            tracing::debug!(vendor = self.kind.vendor(), "closed MySQL connection");
        }
        Ok(())
    }
}

//! PostgreSQL database backend using `tokio-postgres` and `deadpool-postgres`.
//!
//! This module provides the [`PostgresBackend`] which implements the
//! [`DatabaseBackend`](crate::base::DatabaseBackend) trait. A single-slot
//! `deadpool-postgres` pool performs the handshake, and the one pooled client
//! is held for the backend's whole lifetime so transactions stay on one session.

use std::time::Duration;

use migrate_rs_core::{MigrateError, MigrateResult};
use tokio::sync::Mutex;

use crate::base::{ConnectionConfig, DatabaseBackend};
use crate::driver::DriverKind;
use crate::row::Row;
use crate::value::Value;

type SqlParam = Box<dyn tokio_postgres::types::ToSql + Sync + Send>;

/// A PostgreSQL database backend.
pub struct PostgresBackend {
    pool: deadpool_postgres::Pool,
    client: Mutex<Option<deadpool_postgres::Object>>,
}

impl PostgresBackend {
    /// Connects using a [`ConnectionConfig`].
    ///
    /// The URL is passed to `tokio-postgres` as-is (minus any `jdbc:` prefix);
    /// non-empty username and password override the URL's own credentials.
    /// The `application_name` and `connect_timeout_secs` options are honoured.
    pub async fn connect(config: &ConnectionConfig) -> MigrateResult<Self> {
        let pool = Self::build_pool(config)?;
        let client = pool
            .get()
            .await
            .map_err(|e| MigrateError::ConnectionError(format!("PostgreSQL handshake failed: {e}")))?;

        tracing::debug!("opened PostgreSQL connection");
        Ok(Self {
            pool,
            client: Mutex::new(Some(client)),
        })
    }

    fn build_pool(config: &ConnectionConfig) -> MigrateResult<deadpool_postgres::Pool> {
        let mut pg_config = deadpool_postgres::Config::new();
        pg_config.url = Some(config.normalized_url().to_string());
        pg_config.user = config.user().map(String::from);
        pg_config.password = config.pass().map(String::from);
        pg_config.application_name = config.options.get("application_name").cloned();
        if let Some(secs) = config.options.get("connect_timeout_secs") {
            let secs = secs.parse::<u64>().map_err(|e| {
                MigrateError::ConfigurationError(format!("Invalid connect_timeout_secs: {e}"))
            })?;
            pg_config.connect_timeout = Some(std::time::Duration::from_secs(secs));
        }
        pg_config.pool = Some(deadpool_postgres::PoolConfig::new(1));

        pg_config
            .create_pool(
                Some(deadpool_postgres::Runtime::Tokio1),
                tokio_postgres::NoTls,
            )
            .map_err(|e| MigrateError::ConnectionError(format!("Failed to create pool: {e}")))
    }

    /// Converts `Value` parameters to `tokio-postgres` parameter boxes.
    fn value_to_sql_params(params: &[Value]) -> Vec<SqlParam> {
        params
            .iter()
            .map(|v| -> SqlParam {
                match v {
                    Value::Null => Box::new(Option::<String>::None),
                    Value::Bool(b) => Box::new(*b),
                    Value::Int(i) => Box::new(*i),
                    Value::Float(f) => Box::new(*f),
                    Value::String(s) => Box::new(s.clone()),
                    Value::Bytes(b) => Box::new(b.clone()),
                    Value::DateTimeTz(dt) => Box::new(*dt),
                }
            })
            .collect()
    }

    /// Converts a `tokio_postgres::Row` to our generic `Row`.
    fn convert_row(pg_row: &tokio_postgres::Row) -> Row {
        use tokio_postgres::types::Type;

        let columns: Vec<String> = pg_row
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let values: Vec<Value> = pg_row
            .columns()
            .iter()
            .enumerate()
            .map(|(i, col)| match *col.type_() {
                Type::BOOL => pg_row
                    .try_get::<_, Option<bool>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Bool),
                Type::INT2 => pg_row
                    .try_get::<_, Option<i16>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, |v| Value::Int(i64::from(v))),
                Type::INT4 => pg_row
                    .try_get::<_, Option<i32>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, |v| Value::Int(i64::from(v))),
                Type::INT8 => pg_row
                    .try_get::<_, Option<i64>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Int),
                Type::FLOAT8 => pg_row
                    .try_get::<_, Option<f64>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Float),
                Type::BYTEA => pg_row
                    .try_get::<_, Option<Vec<u8>>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Bytes),
                Type::TIMESTAMPTZ => pg_row
                    .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::DateTimeTz),
                _ => pg_row
                    .try_get::<_, Option<String>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::String),
            })
            .collect();

        Row::new(columns, values)
    }
}

fn closed() -> MigrateError {
    MigrateError::ConnectionError("PostgreSQL connection already closed".to_string())
}

fn db_err(e: &tokio_postgres::Error) -> MigrateError {
    MigrateError::DatabaseError(e.to_string())
}

#[async_trait::async_trait]
impl DatabaseBackend for PostgresBackend {
    fn vendor(&self) -> &str {
        "postgresql"
    }

    fn driver_kind(&self) -> DriverKind {
        DriverKind::Postgres
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> MigrateResult<u64> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or_else(closed)?;

        let sql_params = Self::value_to_sql_params(params);
        let param_refs: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = sql_params
            .iter()
            .map(|p| p.as_ref() as &(dyn tokio_postgres::types::ToSql + Sync))
            .collect();

        client.execute(sql, &param_refs).await.map_err(|e| db_err(&e))
    }

    async fn execute_batch(&self, sql: &str) -> MigrateResult<()> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or_else(closed)?;
        client.batch_execute(sql).await.map_err(|e| db_err(&e))
    }

    async fn query(&self, sql: &str, params: &[Value]) -> MigrateResult<Vec<Row>> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or_else(closed)?;

        let sql_params = Self::value_to_sql_params(params);
        let param_refs: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = sql_params
            .iter()
            .map(|p| p.as_ref() as &(dyn tokio_postgres::types::ToSql + Sync))
            .collect();

        let rows = client
            .query(sql, &param_refs)
            .await
            .map_err(|e| db_err(&e))?;

        Ok(rows.iter().map(Self::convert_row).collect())
    }

    async fn table_exists(&self, table: &str) -> MigrateResult<bool> {
        let rows = self
            .query(
                "SELECT 1 AS present FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name::text = $1",
                &[Value::from(table)],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn column_width(&self, table: &str, column: &str) -> MigrateResult<Option<u32>> {
        let rows = self
            .query(
                "SELECT character_maximum_length::int4 AS width FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name::text = $1 \
                 AND column_name::text = $2",
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
            "SELECT table_name::text AS name FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
            &[],
        )
        .await?
        .iter()
        .map(|row| row.get("name"))
        .collect()
    }

    // Advisory locks are session-scoped: the server frees them when the
    // session ends, so there is no lease to track.
    async fn try_lock(&self, resource: &str, _owner: &str, _lease: Duration) -> MigrateResult<bool> {
        let row = self
            .query_one(
                "SELECT pg_try_advisory_lock(hashtext($1)) AS locked",
                &[Value::from(resource)],
            )
            .await?;
        row.get("locked")
    }

    async fn refresh_lock(&self, _resource: &str, _owner: &str) -> MigrateResult<()> {
        Ok(())
    }

    async fn unlock(&self, resource: &str, _owner: &str) -> MigrateResult<()> {
        self.query(
            "SELECT pg_advisory_unlock(hashtext($1)) AS released",
            &[Value::from(resource)],
        )
        .await?;
        Ok(())
    }

    async fn close(&self) -> MigrateResult<()> {
        self.client.lock().await.take();
        self.pool.close();
        tracing::debug!("closed PostgreSQL connection");
        Ok(())
    }
}

//! Scoped database connections.
//!
//! A [`ConnectionResource`] wraps exactly one live backend for the duration of
//! one migration run or one info query. It is released with
//! [`close`](ConnectionResource::close) on every exit path. A handle that is
//! dropped without being closed, for instance because the future driving a
//! run was cancelled, rolls back and releases any migration lock it holds on
//! a background task.
//!
//! Connections are produced by a [`Connector`]. [`DefaultConnector`] performs
//! the real handshake for every dialect compiled into this crate.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use migrate_rs_core::{MigrateError, MigrateResult};

use crate::base::{ConnectionConfig, DatabaseBackend};
use crate::driver::DriverKind;
use crate::row::Row;
use crate::value::Value;

/// Opens connections from configuration.
///
/// Implementations other than [`DefaultConnector`] are mostly useful in tests,
/// for instance to count how often a handshake is attempted.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Performs the handshake and returns a live, scoped connection.
    async fn open(&self, config: &ConnectionConfig) -> MigrateResult<ConnectionResource>;
}

/// The connector used when none is supplied.
///
/// Dispatches on the configured [`DriverKind`]: SQLite through `rusqlite`,
/// PostgreSQL through `tokio-postgres`/`deadpool-postgres`, MySQL and MariaDB
/// through `mysql_async`. Each requires its cargo feature. Kinds without a
/// native connector fail with [`MigrateError::ConnectionError`] before any I/O.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConnector;

#[async_trait::async_trait]
impl Connector for DefaultConnector {
    async fn open(&self, config: &ConnectionConfig) -> MigrateResult<ConnectionResource> {
        let kind = config.driver_kind;
        tracing::debug!(vendor = kind.vendor(), "opening connection");

        let backend: Box<dyn DatabaseBackend> = match kind {
            #[cfg(feature = "sqlite")]
            DriverKind::Sqlite => Box::new(crate::sqlite::SqliteBackend::connect(config)?),
            #[cfg(feature = "postgres")]
            DriverKind::Postgres => {
                Box::new(crate::postgresql::PostgresBackend::connect(config).await?)
            }
            #[cfg(feature = "mysql")]
            DriverKind::MySql | DriverKind::MariaDb => {
                Box::new(crate::mysql::MySqlBackend::connect(config).await?)
            }
            other if other.has_native_connector() => {
                return Err(MigrateError::ConnectionError(format!(
                    "{other} support is not compiled in; enable the matching cargo feature"
                )));
            }
            other => {
                return Err(MigrateError::ConnectionError(format!(
                    "No native connector for {other}"
                )));
            }
        };

        Ok(ConnectionResource::new(kind, backend))
    }
}

/// Shared handle to a connector.
pub type SharedConnector = Arc<dyn Connector>;

/// A scoped, single-use connection bound to one configuration.
pub struct ConnectionResource {
    kind: DriverKind,
    backend: Arc<dyn DatabaseBackend>,
    /// `(resource, owner)` of the migration lock taken through this handle.
    held_lock: Mutex<Option<(String, String)>>,
    closed: bool,
}

impl ConnectionResource {
    /// Wraps an already-connected backend.
    pub fn new(kind: DriverKind, backend: Box<dyn DatabaseBackend>) -> Self {
        Self {
            kind,
            backend: Arc::from(backend),
            held_lock: Mutex::new(None),
            closed: false,
        }
    }

    /// The dialect of the connected database.
    pub const fn driver_kind(&self) -> DriverKind {
        self.kind
    }

    /// Direct access to the backend.
    pub fn backend(&self) -> &dyn DatabaseBackend {
        self.backend.as_ref()
    }

    /// Quotes an identifier for this connection's dialect.
    pub fn quote(&self, name: &str) -> String {
        self.kind.quote_identifier(name)
    }

    /// Executes one unparameterized DDL statement.
    pub async fn execute_ddl(&self, statement: &str) -> MigrateResult<()> {
        tracing::debug!(sql = statement, "execute");
        self.backend.execute_batch(statement).await
    }

    /// Executes a parameterized statement, returning rows affected.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> MigrateResult<u64> {
        tracing::debug!(sql, "execute");
        self.backend.execute(sql, params).await
    }

    /// Runs a query.
    pub async fn query(&self, sql: &str, params: &[Value]) -> MigrateResult<Vec<Row>> {
        self.backend.query(sql, params).await
    }

    /// Runs statements as one unit.
    ///
    /// On dialects with transactional DDL the statements are wrapped in
    /// `BEGIN`/`COMMIT` and rolled back on the first failure. Elsewhere they
    /// run one after another. Returns whether the unit was atomic.
    pub async fn execute_in_transaction(&self, statements: &[String]) -> MigrateResult<bool> {
        if !self.kind.supports_transactional_ddl() {
            for statement in statements {
                self.execute_ddl(statement).await?;
            }
            return Ok(false);
        }

        self.begin().await?;
        for statement in statements {
            if let Err(e) = self.execute_ddl(statement).await {
                self.rollback_quietly().await;
                return Err(e);
            }
        }
        self.commit().await?;
        Ok(true)
    }

    /// Begins a transaction.
    pub async fn begin(&self) -> MigrateResult<()> {
        self.backend.begin_transaction().await
    }

    /// Commits the current transaction.
    pub async fn commit(&self) -> MigrateResult<()> {
        self.backend.commit().await
    }

    /// Rolls back, logging rather than returning a rollback failure.
    pub async fn rollback_quietly(&self) {
        if let Err(e) = self.backend.rollback().await {
            tracing::warn!(error = %e, "rollback failed");
        }
    }

    /// Returns `true` if the table exists.
    pub async fn table_exists(&self, table: &str) -> MigrateResult<bool> {
        self.backend.table_exists(table).await
    }

    /// The live declared width of a column, if it has one.
    pub async fn current_column_width(
        &self,
        table: &str,
        column: &str,
    ) -> MigrateResult<Option<u32>> {
        self.backend.column_width(table, column).await
    }

    /// Names of the user tables in the current schema.
    pub async fn list_tables(&self) -> MigrateResult<Vec<String>> {
        self.backend.list_tables().await
    }

    /// Tries once to take the named migration lock on behalf of `owner`.
    ///
    /// A lock row older than `lease` is treated as abandoned and taken over.
    /// On success the lock is remembered so that [`close`](Self::close) or a
    /// drop releases it.
    pub async fn try_lock(&self, resource: &str, owner: &str, lease: Duration) -> MigrateResult<bool> {
        let acquired = self.backend.try_lock(resource, owner, lease).await?;
        if acquired {
            *self.lock_slot() = Some((resource.to_string(), owner.to_string()));
        }
        Ok(acquired)
    }

    /// Renews the lease on the lock held through this handle.
    pub async fn refresh_lock(&self) -> MigrateResult<()> {
        let Some((resource, owner)) = self.held_lock() else {
            return Ok(());
        };
        self.backend.refresh_lock(&resource, &owner).await
    }

    /// Releases the lock held through this handle, if any.
    pub async fn unlock(&self) -> MigrateResult<()> {
        let held = self.lock_slot().take();
        let Some((resource, owner)) = held else {
            return Ok(());
        };
        self.backend.unlock(&resource, &owner).await
    }

    /// The `(resource, owner)` of the lock currently held, if any.
    pub fn held_lock(&self) -> Option<(String, String)> {
        self.lock_slot().clone()
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Option<(String, String)>> {
        self.held_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Releases any held lock, then the connection.
    pub async fn close(mut self) -> MigrateResult<()> {
        if let Err(e) = self.unlock().await {
            tracing::warn!(error = %e, "failed to release migration lock on close");
        }
        self.closed = true;
        let result = self.backend.close().await;
        tracing::debug!(vendor = self.kind.vendor(), "connection closed");
        result
    }
}

impl Drop for ConnectionResource {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let vendor = self.kind.vendor();
        let held = self.lock_slot().take();
        let Some((resource, owner)) = held else {
            tracing::warn!(vendor, "connection dropped without close(); releasing it now");
            return;
        };

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                vendor,
                resource = %resource,
                "connection dropped outside a runtime; migration lock stays until its lease expires"
            );
            return;
        };

        tracing::warn!(
            vendor,
            resource = %resource,
            "connection dropped while holding the migration lock; releasing it"
        );
        self.backend.interrupt();
        let backend = Arc::clone(&self.backend);
        handle.spawn(async move {
            if let Err(e) = backend.rollback().await {
                tracing::debug!(error = %e, "rollback after drop failed");
            }
            if let Err(e) = backend.unlock(&resource, &owner).await {
                tracing::warn!(error = %e, resource = %resource, "failed to release migration lock after drop");
            }
            if let Err(e) = backend.close().await {
                tracing::debug!(error = %e, "close after drop failed");
            }
        });
    }
}

impl std::fmt::Debug for ConnectionResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionResource")
            .field("kind", &self.kind)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

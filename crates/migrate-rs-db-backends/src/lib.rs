//! # migrate-rs-db-backends
//!
//! Dialect abstraction and scoped connections for the migrate-rs engine.
//!
//! - [`driver`] - the closed set of supported products and their capabilities
//! - [`base`] - the [`DatabaseBackend`](base::DatabaseBackend) trait and connection config
//! - [`connection`] - scoped [`ConnectionResource`](connection::ConnectionResource) and connectors
//!
//! Live backends, each behind a cargo feature:
//! - `SQLite` (`sqlite`, default)
//! - `PostgreSQL` (`postgres`)
//! - `MySQL` / `MariaDB` (`mysql`)

pub mod base;
pub mod connection;
pub mod driver;
pub mod row;
pub mod value;

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgresql;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use base::{ConnectionConfig, DatabaseBackend};
pub use connection::{ConnectionResource, Connector, DefaultConnector, SharedConnector};
pub use driver::DriverKind;
pub use row::{FromValue, Row};
pub use value::Value;

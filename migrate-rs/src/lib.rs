//! # migrate-rs
//!
//! Versioned, dialect-aware schema migrations.
//!
//! This is the meta-crate that re-exports the sub-crates for convenient
//! access. Depend on `migrate-rs` for everything, or on the individual crates
//! for finer-grained control.
//!
//! ```rust,no_run
//! use migrate_rs::prelude::*;
//!
//! # async fn run() -> Result<(), MigrationFailure> {
//! let mut migrator = Migrator::from_data_source("org.sqlite.JDBC", "jdbc:sqlite:app.db", "", "");
//! migrator
//!     .add_task(
//!         MigrationTask::new(
//!             "V1",
//!             "create widgets",
//!             TaskKind::CreateTable {
//!                 table: "widgets".into(),
//!                 columns: vec![ColumnDef::new("id", ColumnType::BigInt).primary_key()],
//!             },
//!         )
//!         .expect("valid version"),
//!     )
//!     .expect("ascending versions");
//! let report = migrator.migrate().await?;
//! println!("applied {} task(s)", report.executed.len());
//! # Ok(())
//! # }
//! ```

/// Error types, settings, and logging setup.
pub use migrate_rs_core as core;

/// Dialect table, connections, and drivers: `PostgreSQL`, `MySQL`, `SQLite`.
pub use migrate_rs_db_backends as db_backends;

/// Tasks, schema editors, history tracking, and the migrator.
pub use migrate_rs_db_migrations as db_migrations;

/// Needed to implement [`Connector`](migrate_rs_db_backends::Connector).
pub use async_trait::async_trait;

/// The types most hosts need.
pub mod prelude {
    pub use migrate_rs_core::logging::setup_logging;
    pub use migrate_rs_core::{
        settings_loader, DestructiveChangePolicy, MigrateError, MigrateResult, MigratorSettings,
    };
    pub use migrate_rs_db_backends::{ConnectionConfig, Connector, DriverKind};
    pub use migrate_rs_db_migrations::{
        ColumnDef, ColumnType, DriverSelection, MigrationFailure, MigrationInfo, MigrationState,
        MigrationTask, MigrationVersion, Migrator, RunReport, TaskKind, TaskLoader,
    };
}

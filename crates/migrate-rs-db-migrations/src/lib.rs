//! # migrate-rs-db-migrations
//!
//! The migration engine for migrate-rs: versioned tasks, per-dialect DDL
//! generation, the history-table protocol, and the [`Migrator`] entry point.
//!
//! ## Architecture
//!
//! - [`MigrationTask`] is one immutable, versioned change; [`TaskKind`] is the
//!   closed set of things a task can do.
//! - [`SchemaEditor`] renders a task kind as statements for one dialect.
//! - [`MigrationRecorder`] owns the history table.
//! - [`MigrationExecutor`] plans against the history and applies each step
//!   with the tracking protocol.
//! - [`Migrator`] ties it together: resolves the dialect, opens one scoped
//!   connection per run, takes the history lock, and reports.
//!
//! ## Module Overview
//!
//! - [`version`] - `MigrationVersion` ordering keys
//! - [`task`] - `MigrationTask`, `TaskKind`, `ColumnDef`, `ColumnType`
//! - [`schema_editor`] - `SchemaEditor` trait and one implementation per dialect family
//! - [`recorder`] - `MigrationRecorder`, `MigrationRecord`
//! - [`executor`] - `MigrationExecutor`, `MigrationPlan`, `MigrationStep`
//! - [`report`] - `RunReport`, `MigrationFailure`, `MigrationInfo`
//! - [`migrator`] - `Migrator`, `DriverSelection`
//! - [`loader`] - `TaskLoader` for JSON/TOML task definitions

// Clippy overrides appropriate for a DDL generation / migration crate.
#![allow(clippy::too_many_lines)]
#![allow(clippy::result_large_err)]
#![allow(clippy::format_push_string)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::use_self)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::unnecessary_literal_bound)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cognitive_complexity)]
#![allow(clippy::unused_self)]
#![allow(clippy::too_many_arguments)]

pub mod executor;
pub mod loader;
pub mod migrator;
pub mod recorder;
pub mod report;
pub mod schema_editor;
pub mod task;
pub mod version;

// Re-export key types at the crate root.
pub use executor::{MigrationExecutor, MigrationPlan, MigrationStep};
pub use loader::TaskLoader;
pub use migrator::{DriverSelection, Migrator};
pub use recorder::{MigrationRecord, MigrationRecorder};
pub use report::{
    ExecutedTask, MigrationFailure, MigrationInfo, MigrationState, RunFailure, RunReport, TaskInfo,
};
pub use schema_editor::{
    schema_editor_for, AnsiSchemaEditor, MsSqlSchemaEditor, MySqlSchemaEditor, OracleSchemaEditor,
    PostgresSchemaEditor, SchemaEditor, SqliteSchemaEditor,
};
pub use task::{Assignment, ColumnDef, ColumnType, ForeignKeyAction, MigrationTask, TaskKind};
pub use version::MigrationVersion;

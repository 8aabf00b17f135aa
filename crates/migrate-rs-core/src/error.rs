//! Core error types for migrate-rs.
//!
//! This module provides the [`MigrateError`] enum shared by every crate in the
//! workspace. The first group of variants are the fatal conditions a migration
//! run can end with; the second group is database plumbing that backends and
//! the recorder surface while talking to the target database.

use std::time::Duration;

use thiserror::Error;

/// The primary error type for migrate-rs.
///
/// Every variant is fatal for the run that produced it. Use
/// [`MigrateError::code`] for a stable, machine-readable identifier.
#[derive(Error, Debug)]
pub enum MigrateError {
    // ── Run-level failures ───────────────────────────────────────────

    /// The driver identifier or URL does not resolve to a supported dialect.
    /// No connection is attempted.
    #[error("Unknown driver: {0}")]
    UnknownDriver(String),

    /// The handshake or authentication with the target database failed.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The migrator or its task list is misconfigured (duplicate or
    /// out-of-order versions, missing URL, malformed settings).
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A previously applied task no longer hashes to its recorded checksum.
    #[error(
        "History drift for version {version}: recorded checksum {recorded}, computed {computed}"
    )]
    HistoryDrift {
        /// The version whose history row disagrees.
        version: String,
        /// Checksum stored in the history table.
        recorded: String,
        /// Checksum computed from the current task definition.
        computed: String,
    },

    /// A pending task would reduce a column's width and the policy forbids it.
    #[error(
        "Destructive change rejected for version {version}: {table}.{column} would shrink from {current_width} to {target_width}"
    )]
    DestructiveChangeRejected {
        /// The version of the rejected task.
        version: String,
        /// The table holding the column.
        table: String,
        /// The column being shrunk.
        column: String,
        /// The width the column has before the task runs.
        current_width: u32,
        /// The width the task would set.
        target_width: u32,
    },

    /// A task's DDL or DML failed against the database.
    #[error("Task {version} failed: {message}")]
    TaskExecution {
        /// The version of the failing task.
        version: String,
        /// The underlying database error message.
        message: String,
    },

    /// Another process held the history lock for longer than the bounded wait.
    #[error("Timed out after {0:?} waiting for the migration history lock")]
    LockTimeout(Duration),

    // ── Database plumbing ────────────────────────────────────────────

    /// A generic database error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A query expected exactly one row but found none.
    #[error("Object does not exist: {0}")]
    DoesNotExist(String),

    /// A query expected exactly one row but found several.
    #[error("Multiple objects returned when one expected: {0}")]
    MultipleObjectsReturned(String),

    // ── Serialization / IO ───────────────────────────────────────────

    /// Task definitions or settings could not be (de)serialized.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl MigrateError {
    /// Returns a stable snake_case identifier for this error kind.
    ///
    /// Hosts use this to map failures onto exit codes or log fields without
    /// matching on the display text.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnknownDriver(_) => "unknown_driver",
            Self::ConnectionError(_) => "connection_error",
            Self::ConfigurationError(_) => "configuration_error",
            Self::HistoryDrift { .. } => "history_drift",
            Self::DestructiveChangeRejected { .. } => "destructive_change_rejected",
            Self::TaskExecution { .. } => "task_execution",
            Self::LockTimeout(_) => "lock_timeout",
            Self::DatabaseError(_) => "database_error",
            Self::DoesNotExist(_) => "does_not_exist",
            Self::MultipleObjectsReturned(_) => "multiple_objects_returned",
            Self::SerializationError(_) => "serialization_error",
            Self::IoError(_) => "io_error",
        }
    }

    /// Returns `true` if this error was raised before any connection was opened.
    pub const fn is_preflight(&self) -> bool {
        matches!(
            self,
            Self::UnknownDriver(_) | Self::ConfigurationError(_) | Self::SerializationError(_)
        )
    }
}

/// A convenience type alias for `Result<T, MigrateError>`.
pub type MigrateResult<T> = Result<T, MigrateError>;

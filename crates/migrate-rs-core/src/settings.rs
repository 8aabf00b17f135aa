//! Settings for a migration run.
//!
//! [`MigratorSettings`] is the explicit configuration struct a host hands to
//! the migrator: connection parameters, run flags, and tuning knobs. There is
//! no global instance; construct one (or load it with
//! [`settings_loader`](crate::settings_loader)) and pass it along.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MigrateError;

/// Default name of the table that records applied tasks.
pub const DEFAULT_HISTORY_TABLE: &str = "migrate_schema_history";

/// What to do when a pending task would shrink a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DestructiveChangePolicy {
    /// Abort the run before the destructive task executes.
    Reject,
    /// Execute silently.
    Allow,
    /// Execute, but flag the task in the run report and log a warning.
    #[default]
    AllowWithWarning,
}

impl fmt::Display for DestructiveChangePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Reject => "reject",
            Self::Allow => "allow",
            Self::AllowWithWarning => "allow-with-warning",
        };
        f.write_str(s)
    }
}

impl FromStr for DestructiveChangePolicy {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "reject" => Ok(Self::Reject),
            "allow" => Ok(Self::Allow),
            "allow-with-warning" | "warn" => Ok(Self::AllowWithWarning),
            other => Err(MigrateError::ConfigurationError(format!(
                "Unknown destructive change policy '{other}'"
            ))),
        }
    }
}

/// The complete set of migrator settings.
///
/// # Examples
///
/// ```
/// use migrate_rs_core::settings::{DestructiveChangePolicy, MigratorSettings};
///
/// let settings = MigratorSettings::default();
/// assert!(!settings.dry_run);
/// assert_eq!(settings.destructive_policy, DestructiveChangePolicy::AllowWithWarning);
/// assert_eq!(settings.history_table, "migrate_schema_history");
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct MigratorSettings {
    // ── Connection ───────────────────────────────────────────────────

    /// Driver identifier (e.g. `org.postgresql.Driver`). `None` means
    /// autodetect from the URL.
    pub driver: Option<String>,
    /// The connection URL, with or without a `jdbc:` prefix.
    pub url: String,
    /// The database user.
    pub username: String,
    /// The database password.
    pub password: String,
    /// Dialect-specific tuning parameters passed through to the backend.
    pub options: HashMap<String, String>,

    // ── Run behaviour ────────────────────────────────────────────────

    /// Compute and report the plan without touching the database.
    pub dry_run: bool,
    /// Policy applied to tasks that would shrink a column.
    pub destructive_policy: DestructiveChangePolicy,
    /// Reject the whole run up front if any pending task shrinks a column.
    pub no_column_shrink: bool,
    /// Name of the history table.
    pub history_table: String,
    /// Bounded wait for the history lock, in seconds.
    pub lock_timeout_secs: u64,
    /// Age, in seconds, after which an unrefreshed lock row is treated as
    /// abandoned by a dead run and taken over.
    pub lock_lease_secs: u64,
    /// When the history table is missing but the schema already holds
    /// tables, record a baseline instead of replaying every task.
    pub baseline_on_migrate: bool,
    /// Version written by the baseline. Tasks at or below it are skipped.
    pub baseline_version: String,

    // ── Logging ──────────────────────────────────────────────────────

    /// Whether to emit human-readable (pretty) logs instead of JSON.
    pub debug: bool,
    /// The log level filter (e.g. "info", "migrate_rs=debug").
    pub log_level: String,
}

impl Default for MigratorSettings {
    fn default() -> Self {
        Self {
            driver: None,
            url: String::new(),
            username: String::new(),
            password: String::new(),
            options: HashMap::new(),
            dry_run: false,
            destructive_policy: DestructiveChangePolicy::default(),
            no_column_shrink: false,
            history_table: DEFAULT_HISTORY_TABLE.to_string(),
            lock_timeout_secs: 60,
            lock_lease_secs: 300,
            baseline_on_migrate: false,
            baseline_version: "1".to_string(),
            debug: false,
            log_level: "info".to_string(),
        }
    }
}

impl fmt::Debug for MigratorSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigratorSettings")
            .field("driver", &self.driver)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("options", &self.options)
            .field("dry_run", &self.dry_run)
            .field("destructive_policy", &self.destructive_policy)
            .field("no_column_shrink", &self.no_column_shrink)
            .field("history_table", &self.history_table)
            .field("lock_timeout_secs", &self.lock_timeout_secs)
            .field("lock_lease_secs", &self.lock_lease_secs)
            .field("baseline_on_migrate", &self.baseline_on_migrate)
            .field("baseline_version", &self.baseline_version)
            .field("debug", &self.debug)
            .field("log_level", &self.log_level)
            .finish()
    }
}

//! Structured results of a migration run and of an info query.
//!
//! Everything here is plain data and serde-serializable; rendering is left to
//! the host.

use chrono::{DateTime, Utc};
use migrate_rs_core::MigrateError;
use migrate_rs_db_backends::DriverKind;
use serde::Serialize;

use crate::recorder::MigrationRecord;
use crate::task::MigrationTask;
use crate::version::MigrationVersion;

/// One task that ran (or, in a dry run, would run).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutedTask {
    pub version: MigrationVersion,
    pub description: String,
    pub statements: Vec<String>,
    /// The task narrowed a column that already had a wider declared width.
    pub destructive: bool,
    /// The statements and the history record were committed together.
    pub atomic: bool,
    pub duration_ms: u64,
}

/// The task a run stopped on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunFailure {
    /// `None` when the run failed before reaching any task.
    pub version: Option<MigrationVersion>,
    pub code: &'static str,
    pub error: String,
}

/// The outcome of one `migrate()` call. Produced fresh per call.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub driver: Option<DriverKind>,
    pub dry_run: bool,
    /// Registered tasks looked at, in order.
    pub considered: Vec<MigrationVersion>,
    pub executed: Vec<ExecutedTask>,
    /// Already applied.
    pub skipped: Vec<MigrationVersion>,
    /// Inert for this dialect.
    pub not_applicable: Vec<MigrationVersion>,
    /// At or below the baseline; never run.
    pub below_baseline: Vec<MigrationVersion>,
    /// The baseline this run wrote into a fresh history table.
    pub baseline: Option<MigrationVersion>,
    pub warnings: Vec<String>,
    pub success: bool,
    pub failure: Option<RunFailure>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunReport {
    pub(crate) fn start(
        driver: Option<DriverKind>,
        dry_run: bool,
        considered: Vec<MigrationVersion>,
    ) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            driver,
            dry_run,
            considered,
            executed: Vec::new(),
            skipped: Vec::new(),
            not_applicable: Vec::new(),
            below_baseline: Vec::new(),
            baseline: None,
            warnings: Vec::new(),
            success: false,
            failure: None,
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    pub(crate) fn warn(&mut self, message: String) {
        tracing::warn!("{message}");
        self.warnings.push(message);
    }

    pub(crate) fn finish(&mut self) {
        self.duration_ms = elapsed_ms(self.started_at);
    }

    /// Versions that ran, in order.
    pub fn executed_versions(&self) -> Vec<&MigrationVersion> {
        self.executed.iter().map(|t| &t.version).collect()
    }

    /// Versions flagged destructive.
    pub fn destructive_versions(&self) -> Vec<&MigrationVersion> {
        self.executed
            .iter()
            .filter(|t| t.destructive)
            .map(|t| &t.version)
            .collect()
    }
}

pub(crate) fn elapsed_ms(since: DateTime<Utc>) -> u64 {
    u64::try_from((Utc::now() - since).num_milliseconds()).unwrap_or(0)
}

/// A failed run: the typed error plus everything done before it.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct MigrationFailure {
    #[source]
    pub error: MigrateError,
    pub report: Box<RunReport>,
}

impl MigrationFailure {
    pub(crate) fn new(error: MigrateError, version: Option<MigrationVersion>, mut report: RunReport) -> Self {
        report.success = false;
        report.failure = Some(RunFailure {
            version,
            code: error.code(),
            error: error.to_string(),
        });
        report.finish();
        Self {
            error,
            report: Box::new(report),
        }
    }

    /// The version that failed, if the run got that far.
    pub fn failed_version(&self) -> Option<&MigrationVersion> {
        self.report.failure.as_ref().and_then(|f| f.version.as_ref())
    }
}

// ── Info ─────────────────────────────────────────────────────────────────

/// Where a task or history row stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    Pending,
    Applied,
    /// Last attempt failed on a dialect without transactional DDL.
    Failed,
    NotApplicable,
    /// Applied, but the task's statements have changed since.
    ChecksumMismatch,
    /// In the history table, but no longer registered.
    Missing,
    /// Covered by the baseline; will never run.
    BelowBaseline,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub version: MigrationVersion,
    pub description: String,
    pub state: MigrationState,
    pub checksum: String,
    pub applied_at: Option<DateTime<Utc>>,
    pub execution_time_ms: Option<i64>,
}

/// Read-only summary of registered tasks against the history table.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationInfo {
    pub driver: DriverKind,
    pub history_table: String,
    pub tasks: Vec<TaskInfo>,
    /// History rows with no registered task. Baseline rows are not listed.
    pub missing: Vec<MigrationRecord>,
    /// Version of the baseline row, if the history starts from one.
    pub baseline: Option<MigrationVersion>,
    /// Highest successfully applied version.
    pub current_version: Option<MigrationVersion>,
}

impl MigrationInfo {
    pub(crate) fn compute(
        driver: DriverKind,
        history_table: &str,
        tasks: &[MigrationTask],
        records: &[MigrationRecord],
    ) -> Self {
        let baseline = baseline_of(records);
        let latest_for = |version: &MigrationVersion| {
            records
                .iter()
                .filter(|r| !r.is_baseline())
                .filter(|r| r.parsed_version().as_ref() == Some(version))
                .max_by_key(|r| (r.success, r.installed_rank))
        };

        let tasks_info = tasks
            .iter()
            .map(|task| {
                let checksum = task.checksum(driver);
                let record = latest_for(task.version());
                let state = if !task.applicable_on(driver) {
                    MigrationState::NotApplicable
                } else {
                    match record {
                        None if baseline.as_ref().is_some_and(|b| task.version() <= b) => {
                            MigrationState::BelowBaseline
                        }
                        None => MigrationState::Pending,
                        Some(r) if !r.success => MigrationState::Failed,
                        Some(r) if r.checksum != checksum => MigrationState::ChecksumMismatch,
                        Some(_) => MigrationState::Applied,
                    }
                };
                TaskInfo {
                    version: task.version().clone(),
                    description: task.description().to_string(),
                    state,
                    checksum,
                    applied_at: record.map(|r| r.applied_at),
                    execution_time_ms: record.map(|r| r.execution_time_ms),
                }
            })
            .collect();

        let missing = records
            .iter()
            .filter(|r| !r.is_baseline())
            .filter(|r| {
                r.parsed_version()
                    .map_or(true, |v| !tasks.iter().any(|t| *t.version() == v))
            })
            .cloned()
            .collect();

        let current_version = records
            .iter()
            .filter(|r| r.success)
            .filter_map(MigrationRecord::parsed_version)
            .max();

        Self {
            driver,
            history_table: history_table.to_string(),
            tasks: tasks_info,
            missing,
            baseline,
            current_version,
        }
    }

    /// Tasks in the given state.
    pub fn in_state(&self, state: MigrationState) -> impl Iterator<Item = &TaskInfo> {
        self.tasks.iter().filter(move |t| t.state == state)
    }
}

/// The highest successful baseline version among the records.
pub(crate) fn baseline_of(records: &[MigrationRecord]) -> Option<MigrationVersion> {
    records
        .iter()
        .filter(|r| r.success && r.is_baseline())
        .filter_map(MigrationRecord::parsed_version)
        .max()
}

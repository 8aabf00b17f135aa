//! Migration execution engine.
//!
//! The [`MigrationExecutor`] compares the registered tasks with the history
//! table, builds a [`MigrationPlan`], and applies the pending steps in order.
//! The [`MigrationRecorder`] persists one record per applied task.
//!
//! ## Per-task protocol
//!
//! On dialects with transactional DDL each task runs as
//! `BEGIN; <statements>; <clear failed record>; <insert record>; COMMIT`, so a
//! task is either fully applied and recorded or not at all. Elsewhere the
//! statements commit implicitly, the record is written afterwards, and the
//! report carries a warning saying so; a failure there leaves a
//! `success = false` record behind.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use migrate_rs_core::{DestructiveChangePolicy, MigrateError, MigrateResult};
use migrate_rs_db_backends::{ConnectionResource, DriverKind};
use tracing::Instrument;

use crate::recorder::{MigrationRecord, MigrationRecorder, NewRecord};
use crate::report::{baseline_of, ExecutedTask, RunReport};
use crate::task::{MigrationTask, TaskKind};
use crate::version::MigrationVersion;

/// A pending task with its rendered statements.
#[derive(Debug, Clone)]
pub struct MigrationStep<'a> {
    pub task: &'a MigrationTask,
    pub statements: Vec<String>,
    pub checksum: String,
    /// The stored version of a failed record to replace, if one exists.
    pub failed_record: Option<String>,
}

/// What a run will do, in ascending version order.
#[derive(Debug, Clone, Default)]
pub struct MigrationPlan<'a> {
    pub pending: Vec<MigrationStep<'a>>,
    /// Already applied with a matching checksum.
    pub skipped: Vec<MigrationVersion>,
    /// Inert for the target dialect.
    pub not_applicable: Vec<MigrationVersion>,
    /// Unapplied, but covered by the baseline.
    pub below_baseline: Vec<MigrationVersion>,
}

impl MigrationPlan<'_> {
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

/// Applies migration plans for one dialect.
#[derive(Debug, Clone)]
pub struct MigrationExecutor {
    kind: DriverKind,
    recorder: MigrationRecorder,
    policy: DestructiveChangePolicy,
}

impl MigrationExecutor {
    pub fn new(kind: DriverKind, recorder: MigrationRecorder) -> Self {
        Self {
            kind,
            recorder,
            policy: DestructiveChangePolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: DestructiveChangePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn recorder(&self) -> &MigrationRecorder {
        &self.recorder
    }

    /// Builds the plan.
    ///
    /// Every successful record is verified against the current task first; a
    /// mismatch is [`MigrateError::HistoryDrift`] and nothing is planned.
    /// Pending steps are the applicable tasks with no successful record and a
    /// version above the baseline, if the history has one.
    pub fn make_plan<'a>(
        &self,
        tasks: &'a [MigrationTask],
        records: &[MigrationRecord],
    ) -> MigrateResult<MigrationPlan<'a>> {
        let baseline = baseline_of(records);
        let mut applied: HashMap<MigrationVersion, &MigrationRecord> = HashMap::new();
        let mut failed: HashMap<MigrationVersion, &MigrationRecord> = HashMap::new();
        for record in records.iter().filter(|r| !r.is_baseline()) {
            let Some(version) = record.parsed_version() else {
                tracing::warn!(
                    rank = record.installed_rank,
                    version = %record.version,
                    "ignoring history row with unparsable version"
                );
                continue;
            };
            if record.success {
                applied.insert(version, record);
            } else {
                failed.insert(version, record);
            }
        }

        for task in tasks {
            if let Some(record) = applied.get(task.version()) {
                let computed = task.checksum(self.kind);
                if record.checksum != computed {
                    return Err(MigrateError::HistoryDrift {
                        version: task.version().to_string(),
                        recorded: record.checksum.clone(),
                        computed,
                    });
                }
            }
        }

        let mut plan = MigrationPlan::default();
        for task in tasks {
            let version = task.version();
            if !task.applicable_on(self.kind) {
                plan.not_applicable.push(version.clone());
            } else if applied.contains_key(version) {
                plan.skipped.push(version.clone());
            } else if baseline.as_ref().is_some_and(|b| version <= b) {
                plan.below_baseline.push(version.clone());
            } else {
                let statements = task.effective_statements(self.kind);
                plan.pending.push(MigrationStep {
                    task,
                    checksum: crate::task::checksum_of(&statements),
                    statements,
                    failed_record: failed.get(version).map(|r| r.version.clone()),
                });
            }
        }

        tracing::debug!(
            pending = plan.pending.len(),
            skipped = plan.skipped.len(),
            not_applicable = plan.not_applicable.len(),
            below_baseline = plan.below_baseline.len(),
            "plan resolved"
        );
        Ok(plan)
    }

    /// Rejects the plan if any pending step would shrink a column.
    ///
    /// Widths are projected through earlier pending steps, so a column created
    /// wide and narrowed later in the same run is caught before anything runs.
    pub async fn check_no_column_shrink(
        &self,
        plan: &MigrationPlan<'_>,
        conn: &ConnectionResource,
    ) -> MigrateResult<()> {
        let mut projection = WidthProjection::default();
        for step in &plan.pending {
            if let Some(change) = step.task.width_change() {
                let current = projection.width(conn, change.table, change.column).await?;
                if let Some(current_width) = change.shrinks(current) {
                    return Err(MigrateError::DestructiveChangeRejected {
                        version: step.task.version().to_string(),
                        table: change.table.to_string(),
                        column: change.column.to_string(),
                        current_width,
                        target_width: change.target_width,
                    });
                }
            }
            projection.apply(conn, step.task.kind()).await?;
        }
        Ok(())
    }

    /// Applies the destructive-change policy to a step that shrinks a column
    /// from `shrinks_from`. Returns whether the step is destructive.
    fn check_destructive(
        &self,
        step: &MigrationStep<'_>,
        shrinks_from: Option<u32>,
        report: &mut RunReport,
    ) -> MigrateResult<bool> {
        let (Some(change), Some(current_width)) = (step.task.width_change(), shrinks_from) else {
            return Ok(false);
        };

        let version = step.task.version();
        match self.policy {
            DestructiveChangePolicy::Reject => {
                return Err(MigrateError::DestructiveChangeRejected {
                    version: version.to_string(),
                    table: change.table.to_string(),
                    column: change.column.to_string(),
                    current_width,
                    target_width: change.target_width,
                });
            }
            DestructiveChangePolicy::AllowWithWarning => report.warn(format!(
                "{version}: {}.{} shrinks from {current_width} to {}; longer values are truncated",
                change.table, change.column, change.target_width
            )),
            DestructiveChangePolicy::Allow if report.dry_run => report.warn(format!(
                "{version}: {}.{} would shrink from {current_width} to {}",
                change.table, change.column, change.target_width
            )),
            DestructiveChangePolicy::Allow => {
                tracing::debug!(%version, "destructive change allowed by policy");
            }
        }
        Ok(true)
    }

    fn warn_non_atomic(&self, step: &MigrationStep<'_>, report: &mut RunReport) {
        if !self.kind.supports_transactional_ddl() {
            report.warn(format!(
                "{}: {} commits DDL implicitly; statements and history record are not written atomically",
                step.task.version(),
                self.kind
            ));
        }
    }

    fn warn_caveats(&self, step: &MigrationStep<'_>, report: &mut RunReport) {
        for caveat in step.task.caveats(self.kind) {
            report.warn(format!("{}: {caveat}", step.task.version()));
        }
    }

    /// Runs one pending step against the database and records it.
    pub async fn execute_step(
        &self,
        step: &MigrationStep<'_>,
        conn: &ConnectionResource,
        report: &mut RunReport,
    ) -> MigrateResult<()> {
        let version = step.task.version().to_string();
        let span = migrate_rs_core::logging::task_span(&version);
        self.execute_step_inner(step, conn, report)
            .instrument(span)
            .await
    }

    async fn execute_step_inner(
        &self,
        step: &MigrationStep<'_>,
        conn: &ConnectionResource,
        report: &mut RunReport,
    ) -> MigrateResult<()> {
        let shrinks_from = step.task.shrinks_from(conn).await?;
        let destructive = self.check_destructive(step, shrinks_from, report)?;
        let atomic = self.kind.supports_transactional_ddl();
        self.warn_non_atomic(step, report);
        self.warn_caveats(step, report);

        let started = Instant::now();
        let outcome = if atomic {
            self.run_atomic(step, conn, &started).await
        } else {
            self.run_non_atomic(step, conn, &started).await
        };

        if let Err(e) = outcome {
            if !step.task.is_failure_allowed() {
                return Err(e);
            }
            report.warn(format!(
                "{}: failed but failure is allowed, recording as applied: {e}",
                step.task.version()
            ));
            self.record_allowed_failure(step, conn, &started).await?;
        }

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(
            version = %step.task.version(),
            description = step.task.description(),
            destructive,
            atomic,
            duration_ms,
            "task applied"
        );
        report.executed.push(ExecutedTask {
            version: step.task.version().clone(),
            description: step.task.description().to_string(),
            statements: step.statements.clone(),
            destructive,
            atomic,
            duration_ms,
        });
        Ok(())
    }

    async fn run_statements(
        &self,
        step: &MigrationStep<'_>,
        conn: &ConnectionResource,
    ) -> MigrateResult<()> {
        step.task
            .execute(conn)
            .await
            .map_err(|e| MigrateError::TaskExecution {
                version: step.task.version().to_string(),
                message: e.to_string(),
            })
    }

    async fn write_record(
        &self,
        step: &MigrationStep<'_>,
        conn: &ConnectionResource,
        started: &Instant,
        success: bool,
    ) -> MigrateResult<()> {
        if let Some(stored) = &step.failed_record {
            self.recorder.delete_failed(conn, stored).await?;
        }
        let record = NewRecord {
            version: step.task.version(),
            description: step.task.description(),
            checksum: &step.checksum,
            execution_time_ms: i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX),
            success,
        };
        self.recorder.insert(conn, &record).await?;
        Ok(())
    }

    async fn run_atomic(
        &self,
        step: &MigrationStep<'_>,
        conn: &ConnectionResource,
        started: &Instant,
    ) -> MigrateResult<()> {
        conn.begin().await?;
        let result = async {
            self.run_statements(step, conn).await?;
            self.write_record(step, conn, started, true).await
        }
        .await;

        match result {
            Ok(()) => conn.commit().await,
            Err(e) => {
                conn.rollback_quietly().await;
                tracing::debug!(version = %step.task.version(), "rolled back");
                Err(e)
            }
        }
    }

    async fn run_non_atomic(
        &self,
        step: &MigrationStep<'_>,
        conn: &ConnectionResource,
        started: &Instant,
    ) -> MigrateResult<()> {
        match self.run_statements(step, conn).await {
            Ok(()) => self.write_record(step, conn, started, true).await,
            Err(e) => {
                if !step.task.is_failure_allowed() {
                    if let Err(record_err) = self.write_record(step, conn, started, false).await {
                        tracing::warn!(error = %record_err, "could not record failed task");
                    }
                }
                Err(e)
            }
        }
    }

    async fn record_allowed_failure(
        &self,
        step: &MigrationStep<'_>,
        conn: &ConnectionResource,
        started: &Instant,
    ) -> MigrateResult<()> {
        if self.kind.supports_transactional_ddl() {
            conn.begin().await?;
            if let Err(e) = self.write_record(step, conn, started, true).await {
                conn.rollback_quietly().await;
                return Err(e);
            }
            conn.commit().await
        } else {
            self.write_record(step, conn, started, true).await
        }
    }

    /// Walks the plan without writing anything.
    ///
    /// Destructive checks run against projected widths, so the report lists
    /// exactly the steps a live run would execute. Runtime failures cannot be
    /// detected this way.
    pub async fn simulate(
        &self,
        plan: &MigrationPlan<'_>,
        conn: &ConnectionResource,
        report: &mut RunReport,
    ) -> Result<(), (MigrateError, MigrationVersion)> {
        let mut projection = WidthProjection::default();
        for step in &plan.pending {
            let version = step.task.version();
            let shrinks_from = match step.task.width_change() {
                Some(change) => change.shrinks(
                    projection
                        .width(conn, change.table, change.column)
                        .await
                        .map_err(|e| (e, version.clone()))?,
                ),
                None => None,
            };
            let destructive = self
                .check_destructive(step, shrinks_from, report)
                .map_err(|e| (e, version.clone()))?;
            self.warn_non_atomic(step, report);
            self.warn_caveats(step, report);
            projection
                .apply(conn, step.task.kind())
                .await
                .map_err(|e| (e, version.clone()))?;

            tracing::info!(%version, destructive, "task would be applied");
            report.executed.push(ExecutedTask {
                version: version.clone(),
                description: step.task.description().to_string(),
                statements: step.statements.clone(),
                destructive,
                atomic: self.kind.supports_transactional_ddl(),
                duration_ms: 0,
            });
        }
        Ok(())
    }
}

// ── Width projection ─────────────────────────────────────────────────────

/// Column widths as they will be after the steps applied so far, layered
/// over the live database.
#[derive(Debug, Default)]
struct WidthProjection {
    widths: HashMap<(String, String), Option<u32>>,
    /// Tables created or dropped by an earlier step; the live schema no
    /// longer describes them.
    replaced_tables: HashSet<String>,
}

fn key(table: &str, column: &str) -> (String, String) {
    (table.to_ascii_lowercase(), column.to_ascii_lowercase())
}

impl WidthProjection {
    async fn width(
        &self,
        conn: &ConnectionResource,
        table: &str,
        column: &str,
    ) -> MigrateResult<Option<u32>> {
        if let Some(width) = self.widths.get(&key(table, column)) {
            return Ok(*width);
        }
        if self.replaced_tables.contains(&table.to_ascii_lowercase()) {
            return Ok(None);
        }
        conn.current_column_width(table, column).await
    }

    async fn apply(&mut self, conn: &ConnectionResource, kind: &TaskKind) -> MigrateResult<()> {
        match kind {
            TaskKind::CreateTable { table, columns } => {
                self.forget_table(table);
                self.replaced_tables.insert(table.to_ascii_lowercase());
                for column in columns {
                    self.widths
                        .insert(key(table, &column.name), column.column_type.width());
                }
            }
            TaskKind::DropTable { table } => {
                self.forget_table(table);
                self.replaced_tables.insert(table.to_ascii_lowercase());
            }
            TaskKind::AddColumn { table, column } => {
                self.widths
                    .insert(key(table, &column.name), column.column_type.width());
            }
            TaskKind::DropColumn { table, column } => {
                self.widths.insert(key(table, column), None);
            }
            TaskKind::RenameColumn { table, from, to } => {
                let width = self.width(conn, table, from).await?;
                self.widths.insert(key(table, from), None);
                self.widths.insert(key(table, to), width);
            }
            TaskKind::ModifyColumn {
                table,
                column,
                column_type,
                ..
            } => {
                self.widths.insert(key(table, column), column_type.width());
            }
            TaskKind::AddIndex { .. }
            | TaskKind::DropIndex { .. }
            | TaskKind::AddForeignKey { .. }
            | TaskKind::DropForeignKey { .. }
            | TaskKind::RawSql { .. }
            | TaskKind::DataBackfill { .. } => {}
        }
        Ok(())
    }

    fn forget_table(&mut self, table: &str) {
        let table = table.to_ascii_lowercase();
        self.widths.retain(|(t, _), _| *t != table);
    }
}

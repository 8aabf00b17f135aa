//! The migration entry point.
//!
//! A [`Migrator`] holds the connection settings, the ordered task list and
//! the run options. It is assembled once at startup and is otherwise
//! stateless: every [`migrate`](Migrator::migrate) call opens its own
//! connection, reads the history table, applies what is pending and closes the
//! connection again on every exit path.
//!
//! Runs against the same database are serialized by a lock owned by the run's
//! id. Where the lock is a table row, it carries a lease that is renewed
//! before every task; a row left behind by a run that died is taken over once
//! the lease has run out, and a run whose future is dropped releases it on
//! the way out.
//!
//! ```no_run
//! use migrate_rs_db_migrations::migrator::{DriverSelection, Migrator};
//! use migrate_rs_db_migrations::task::{ColumnDef, ColumnType, MigrationTask, TaskKind};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut migrator = Migrator::new();
//! migrator.configure(DriverSelection::AutoDetect, "sqlite:app.db", "", "");
//! migrator.add_task(MigrationTask::new(
//!     "V1",
//!     "create widgets",
//!     TaskKind::CreateTable {
//!         table: "widgets".into(),
//!         columns: vec![ColumnDef::new("id", ColumnType::BigInt).primary_key()],
//!     },
//! )?)?;
//! let report = migrator.migrate().await?;
//! println!("{} task(s) applied", report.executed.len());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use migrate_rs_core::logging::run_span;
use migrate_rs_core::{
    DestructiveChangePolicy, MigrateError, MigrateResult, MigratorSettings, DEFAULT_HISTORY_TABLE,
};
use migrate_rs_db_backends::base::lock_table_name;
use migrate_rs_db_backends::{
    ConnectionConfig, ConnectionResource, DefaultConnector, DriverKind, SharedConnector,
};
use tokio::sync::Mutex;
use tracing::Instrument;

use crate::executor::MigrationExecutor;
use crate::recorder::{MigrationRecord, MigrationRecorder};
use crate::report::{MigrationFailure, MigrationInfo, RunReport};
use crate::task::MigrationTask;
use crate::version::MigrationVersion;

/// How often a blocked run retries the history lock.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How the target dialect is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverSelection {
    Kind(DriverKind),
    /// A driver-class identifier such as `org.postgresql.Driver`, or a short
    /// vendor name.
    Identifier(String),
    /// Detect from the connection URL scheme.
    AutoDetect,
}

type StepError = (MigrateError, Option<MigrationVersion>);

fn before_tasks(error: MigrateError) -> StepError {
    (error, None)
}

/// Applies an ordered list of migration tasks to one database.
pub struct Migrator {
    driver_kind: Option<DriverKind>,
    /// An identifier that did not resolve; `migrate()` reports it.
    unresolved_driver: Option<String>,
    url: String,
    username: String,
    password: String,
    options: HashMap<String, String>,
    tasks: Vec<MigrationTask>,
    dry_run: bool,
    policy: DestructiveChangePolicy,
    no_column_shrink: bool,
    history_table: String,
    lock_timeout: Duration,
    lock_lease: Duration,
    baseline_on_migrate: bool,
    baseline_version: String,
    connector: SharedConnector,
    run_lock: Mutex<()>,
}

impl Default for Migrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Migrator {
    /// An unconfigured migrator with no tasks.
    pub fn new() -> Self {
        Self {
            driver_kind: None,
            unresolved_driver: None,
            url: String::new(),
            username: String::new(),
            password: String::new(),
            options: HashMap::new(),
            tasks: Vec::new(),
            dry_run: false,
            policy: DestructiveChangePolicy::default(),
            no_column_shrink: false,
            history_table: DEFAULT_HISTORY_TABLE.to_string(),
            lock_timeout: Duration::from_secs(60),
            lock_lease: Duration::from_secs(300),
            baseline_on_migrate: false,
            baseline_version: "1".to_string(),
            connector: Arc::new(DefaultConnector),
            run_lock: Mutex::new(()),
        }
    }

    /// Builds a migrator from loaded settings. Tasks are added separately.
    pub fn from_settings(settings: &MigratorSettings) -> Self {
        let mut migrator = Self::new();
        let selection = settings
            .driver
            .clone()
            .map_or(DriverSelection::AutoDetect, DriverSelection::Identifier);
        migrator.configure(
            selection,
            &settings.url,
            &settings.username,
            &settings.password,
        );
        migrator.options.clone_from(&settings.options);
        migrator.dry_run = settings.dry_run;
        migrator.policy = settings.destructive_policy;
        migrator.no_column_shrink = settings.no_column_shrink;
        migrator.history_table.clone_from(&settings.history_table);
        migrator.lock_timeout = Duration::from_secs(settings.lock_timeout_secs);
        migrator.lock_lease = Duration::from_secs(settings.lock_lease_secs);
        migrator.baseline_on_migrate = settings.baseline_on_migrate;
        migrator.baseline_version.clone_from(&settings.baseline_version);
        migrator
    }

    /// Builds a migrator from a host data source.
    ///
    /// An unknown driver identifier is logged and left unset; `migrate()` then
    /// fails with [`MigrateError::UnknownDriver`] without connecting.
    pub fn from_data_source(
        driver_class_name: &str,
        url: &str,
        username: &str,
        password: &str,
    ) -> Self {
        let mut migrator = Self::new();
        migrator.configure(
            DriverSelection::Identifier(driver_class_name.to_string()),
            url,
            username,
            password,
        );
        migrator
    }

    /// Sets the dialect and credentials in one go.
    pub fn configure(
        &mut self,
        selection: DriverSelection,
        url: &str,
        username: &str,
        password: &str,
    ) {
        match selection {
            DriverSelection::Kind(kind) => self.set_driver_kind(kind),
            DriverSelection::Identifier(identifier) => self.set_driver_identifier(&identifier),
            DriverSelection::AutoDetect => {
                self.driver_kind = None;
                self.unresolved_driver = None;
            }
        }
        self.set_connection_url(url);
        self.set_username(username);
        self.set_password(password);
    }

    // ── Setters ──────────────────────────────────────────────────────

    pub fn set_driver_kind(&mut self, kind: DriverKind) {
        self.driver_kind = Some(kind);
        self.unresolved_driver = None;
    }

    /// Resolves and sets the dialect from an identifier.
    ///
    /// Never falls back to a default dialect.
    pub fn set_driver_identifier(&mut self, identifier: &str) {
        match identifier.parse::<DriverKind>() {
            Ok(kind) => self.set_driver_kind(kind),
            Err(e) => {
                tracing::error!(identifier, error = %e, "unsupported database driver");
                self.driver_kind = None;
                self.unresolved_driver = Some(identifier.to_string());
            }
        }
    }

    pub fn set_connection_url(&mut self, url: &str) {
        self.url = url.to_string();
    }

    pub fn set_username(&mut self, username: &str) {
        self.username = username.to_string();
    }

    pub fn set_password(&mut self, password: &str) {
        self.password = password.to_string();
    }

    pub fn set_option(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.options.insert(key.into(), value.into());
    }

    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    pub fn set_destructive_change_policy(&mut self, policy: DestructiveChangePolicy) {
        self.policy = policy;
    }

    /// Rejects the whole run before any task executes if one would shrink a
    /// column.
    pub fn set_no_column_shrink(&mut self, no_column_shrink: bool) {
        self.no_column_shrink = no_column_shrink;
    }

    pub fn set_history_table(&mut self, table: &str) {
        self.history_table = table.to_string();
    }

    pub fn set_lock_timeout(&mut self, timeout: Duration) {
        self.lock_timeout = timeout;
    }

    /// How long a lock row may go unrefreshed before another run may take it
    /// over. Keep it above the slowest single task.
    pub fn set_lock_lease(&mut self, lease: Duration) {
        self.lock_lease = lease;
    }

    /// Baselines a non-empty schema that has no history table yet instead of
    /// replaying every task on it.
    pub fn set_baseline_on_migrate(&mut self, baseline_on_migrate: bool) {
        self.baseline_on_migrate = baseline_on_migrate;
    }

    /// The version a baseline records. Checked when a run starts.
    pub fn set_baseline_version(&mut self, version: &str) {
        self.baseline_version = version.to_string();
    }

    /// Replaces the connector used to open connections.
    #[must_use]
    pub fn with_connector(mut self, connector: SharedConnector) -> Self {
        self.connector = connector;
        self
    }

    // ── Getters ──────────────────────────────────────────────────────

    pub fn driver_kind(&self) -> Option<DriverKind> {
        self.driver_kind
    }

    pub fn connection_url(&self) -> &str {
        &self.url
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn options(&self) -> &HashMap<String, String> {
        &self.options
    }

    pub fn tasks(&self) -> &[MigrationTask] {
        &self.tasks
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn destructive_change_policy(&self) -> DestructiveChangePolicy {
        self.policy
    }

    pub fn no_column_shrink(&self) -> bool {
        self.no_column_shrink
    }

    pub fn history_table(&self) -> &str {
        &self.history_table
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn lock_lease(&self) -> Duration {
        self.lock_lease
    }

    pub fn baseline_on_migrate(&self) -> bool {
        self.baseline_on_migrate
    }

    pub fn baseline_version(&self) -> &str {
        &self.baseline_version
    }

    // ── Tasks ────────────────────────────────────────────────────────

    /// Appends a task. Its version must be greater than every registered one.
    pub fn add_task(&mut self, task: MigrationTask) -> MigrateResult<()> {
        if let Some(last) = self.tasks.last() {
            if task.version() == last.version() {
                return Err(MigrateError::ConfigurationError(format!(
                    "Duplicate migration version {}",
                    task.version()
                )));
            }
            if task.version() < last.version() {
                return Err(MigrateError::ConfigurationError(format!(
                    "Migration version {} registered after {}; versions must be strictly increasing",
                    task.version(),
                    last.version()
                )));
            }
        }
        self.tasks.push(task);
        Ok(())
    }

    /// Appends tasks in order, stopping at the first invalid one.
    pub fn add_tasks(&mut self, tasks: impl IntoIterator<Item = MigrationTask>) -> MigrateResult<()> {
        tasks.into_iter().try_for_each(|task| self.add_task(task))
    }

    #[doc(hidden)]
    pub fn remove_all_tasks_for_unit_test(&mut self) {
        self.tasks.clear();
    }

    // ── Running ──────────────────────────────────────────────────────

    /// The dialect a run would use, without failing.
    fn configured_kind(&self) -> Option<DriverKind> {
        if self.unresolved_driver.is_some() {
            return None;
        }
        self.driver_kind.or_else(|| DriverKind::from_url(&self.url))
    }

    fn resolve_kind(&self) -> MigrateResult<DriverKind> {
        if let Some(identifier) = &self.unresolved_driver {
            return Err(MigrateError::UnknownDriver(identifier.clone()));
        }
        self.configured_kind().ok_or_else(|| {
            MigrateError::UnknownDriver(format!(
                "no driver configured and none detectable from URL '{}'",
                self.url
            ))
        })
    }

    fn connection_config(&self, kind: DriverKind) -> MigrateResult<ConnectionConfig> {
        if self.url.trim().is_empty() {
            return Err(MigrateError::ConfigurationError(
                "No connection URL configured".to_string(),
            ));
        }
        if self.history_table.trim().is_empty() {
            return Err(MigrateError::ConfigurationError(
                "History table name is empty".to_string(),
            ));
        }
        let mut config = ConnectionConfig::new(kind, &self.url, &self.username, &self.password);
        config.options.clone_from(&self.options);
        Ok(config)
    }

    /// The baseline version to write on a fresh history, if baselining is on.
    fn baseline_target(&self) -> MigrateResult<Option<MigrationVersion>> {
        if !self.baseline_on_migrate {
            return Ok(None);
        }
        MigrationVersion::parse(&self.baseline_version)
            .map(Some)
            .map_err(|e| {
                MigrateError::ConfigurationError(format!(
                    "Invalid baseline version '{}': {e}",
                    self.baseline_version
                ))
            })
    }

    /// Whether the schema already holds tables but has never been migrated.
    async fn needs_baseline(&self, conn: &ConnectionResource) -> MigrateResult<bool> {
        if conn.table_exists(&self.history_table).await? {
            return Ok(false);
        }
        let lock_table = lock_table_name(&self.history_table);
        let existing = conn
            .list_tables()
            .await?
            .into_iter()
            .filter(|t| {
                !t.eq_ignore_ascii_case(&self.history_table) && !t.eq_ignore_ascii_case(&lock_table)
            })
            .count();
        Ok(existing > 0)
    }

    /// Applies every pending task, or in dry-run mode reports what would run.
    ///
    /// Concurrent calls on the same migrator are serialized. The error carries
    /// the typed cause and the partial report (tasks executed so far and the
    /// failing one).
    pub async fn migrate(&self) -> Result<RunReport, MigrationFailure> {
        let _serialized = self.run_lock.lock().await;

        let kind = match self.resolve_kind() {
            Ok(kind) => kind,
            Err(e) => {
                tracing::error!(error = %e, "cannot resolve database driver");
                let report = RunReport::start(None, self.dry_run, self.considered());
                return Err(MigrationFailure::new(e, None, report));
            }
        };

        let report = RunReport::start(Some(kind), self.dry_run, self.considered());
        let span = run_span(&report.run_id, kind.vendor(), self.dry_run);
        self.run(kind, report).instrument(span).await
    }

    fn considered(&self) -> Vec<MigrationVersion> {
        self.tasks.iter().map(|t| t.version().clone()).collect()
    }

    async fn run(&self, kind: DriverKind, mut report: RunReport) -> Result<RunReport, MigrationFailure> {
        let config = match self.connection_config(kind) {
            Ok(config) => config,
            Err(e) => return Err(MigrationFailure::new(e, None, report)),
        };
        let baseline = match self.baseline_target() {
            Ok(baseline) => baseline,
            Err(e) => return Err(MigrationFailure::new(e, None, report)),
        };

        let conn = match self.connector.open(&config).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(error = %e, "could not connect");
                return Err(MigrationFailure::new(e, None, report));
            }
        };
        tracing::debug!(state = "connection_open", "run state");

        let outcome = if self.dry_run {
            self.run_dry(kind, &conn, baseline.as_ref(), &mut report).await
        } else {
            self.run_live(kind, &conn, baseline.as_ref(), &mut report).await
        };

        tracing::debug!(state = "reporting", "run state");
        let closed = conn.close().await;
        tracing::debug!(state = "closed", "run state");

        match outcome {
            Err((error, version)) => {
                tracing::error!(
                    error = %error,
                    version = version.as_ref().map(ToString::to_string),
                    executed = report.executed.len(),
                    "migration failed"
                );
                Err(MigrationFailure::new(error, version, report))
            }
            Ok(()) => {
                if let Err(e) = closed {
                    tracing::warn!(error = %e, "closing the connection failed");
                }
                report.success = true;
                report.finish();
                tracing::info!(
                    executed = report.executed.len(),
                    skipped = report.skipped.len(),
                    not_applicable = report.not_applicable.len(),
                    below_baseline = report.below_baseline.len(),
                    duration_ms = report.duration_ms,
                    "migration finished"
                );
                Ok(report)
            }
        }
    }

    fn executor(&self, kind: DriverKind) -> MigrationExecutor {
        MigrationExecutor::new(kind, MigrationRecorder::new(&self.history_table))
            .with_policy(self.policy)
    }

    async fn run_live(
        &self,
        kind: DriverKind,
        conn: &ConnectionResource,
        baseline: Option<&MigrationVersion>,
        report: &mut RunReport,
    ) -> Result<(), StepError> {
        let executor = self.executor(kind);
        let mut baseline = baseline;
        if baseline.is_some() && !self.needs_baseline(conn).await.map_err(before_tasks)? {
            baseline = None;
        }
        executor
            .recorder()
            .ensure_table(conn)
            .await
            .map_err(before_tasks)?;

        self.acquire_lock(conn, &report.run_id)
            .await
            .map_err(before_tasks)?;
        let result = self.apply_pending(&executor, conn, baseline, report).await;
        if let Err(e) = conn.unlock().await {
            tracing::warn!(error = %e, "releasing the history lock failed");
        }
        result
    }

    async fn apply_pending(
        &self,
        executor: &MigrationExecutor,
        conn: &ConnectionResource,
        baseline: Option<&MigrationVersion>,
        report: &mut RunReport,
    ) -> Result<(), StepError> {
        tracing::debug!(state = "resolving", "run state");
        // Re-read under the lock: a run that waited may find nothing left to do.
        let mut records = executor.recorder().load(conn).await.map_err(before_tasks)?;
        if let Some(version) = baseline.filter(|_| records.is_empty()) {
            executor
                .recorder()
                .insert_baseline(conn, version)
                .await
                .map_err(before_tasks)?;
            report.baseline = Some(version.clone());
            records = executor.recorder().load(conn).await.map_err(before_tasks)?;
        }
        let plan = executor
            .make_plan(&self.tasks, &records)
            .map_err(before_tasks)?;
        report.skipped.clone_from(&plan.skipped);
        report.not_applicable.clone_from(&plan.not_applicable);
        report.below_baseline.clone_from(&plan.below_baseline);

        if self.no_column_shrink {
            executor
                .check_no_column_shrink(&plan, conn)
                .await
                .map_err(before_tasks)?;
        }

        for (i, step) in plan.pending.iter().enumerate() {
            tracing::debug!(state = "executing", index = i, version = %step.task.version(), "run state");
            conn.refresh_lock()
                .await
                .map_err(|e| (e, Some(step.task.version().clone())))?;
            executor
                .execute_step(step, conn, report)
                .await
                .map_err(|e| (e, Some(step.task.version().clone())))?;
        }
        Ok(())
    }

    async fn run_dry(
        &self,
        kind: DriverKind,
        conn: &ConnectionResource,
        baseline: Option<&MigrationVersion>,
        report: &mut RunReport,
    ) -> Result<(), StepError> {
        let executor = self.executor(kind);
        tracing::debug!(state = "resolving", "run state");
        let mut records = executor
            .recorder()
            .load_if_exists(conn)
            .await
            .map_err(before_tasks)?;
        if let Some(version) = baseline {
            if records.is_empty() && self.needs_baseline(conn).await.map_err(before_tasks)? {
                records.push(MigrationRecord::baseline(1, &version.to_string()));
                report.baseline = Some(version.clone());
            }
        }
        let plan = executor
            .make_plan(&self.tasks, &records)
            .map_err(before_tasks)?;
        report.skipped.clone_from(&plan.skipped);
        report.not_applicable.clone_from(&plan.not_applicable);
        report.below_baseline.clone_from(&plan.below_baseline);

        if self.no_column_shrink {
            executor
                .check_no_column_shrink(&plan, conn)
                .await
                .map_err(before_tasks)?;
        }

        executor
            .simulate(&plan, conn, report)
            .await
            .map_err(|(e, version)| (e, Some(version)))
    }

    /// Takes the history lock for `owner`, polling until `lock_timeout` has
    /// passed.
    async fn acquire_lock(&self, conn: &ConnectionResource, owner: &str) -> MigrateResult<()> {
        let deadline = Instant::now() + self.lock_timeout;
        loop {
            if conn
                .try_lock(&self.history_table, owner, self.lock_lease)
                .await?
            {
                tracing::debug!(table = %self.history_table, owner, "history lock acquired");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(MigrateError::LockTimeout(self.lock_timeout));
            }
            tracing::debug!(table = %self.history_table, "history lock busy; waiting");
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    /// Summarizes registered tasks against the history table.
    ///
    /// Returns `None` when no dialect is configured. Opens its own connection
    /// and never writes; a missing history table means everything is pending.
    pub async fn migration_info(&self) -> MigrateResult<Option<MigrationInfo>> {
        let Some(kind) = self.configured_kind() else {
            return Ok(None);
        };
        let conn = self.connector.open(&self.connection_config(kind)?).await?;
        let records = MigrationRecorder::new(&self.history_table)
            .load_if_exists(&conn)
            .await;
        let closed = conn.close().await;
        let records = records?;
        closed?;

        Ok(Some(MigrationInfo::compute(
            kind,
            &self.history_table,
            &self.tasks,
            &records,
        )))
    }
}

impl fmt::Debug for Migrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migrator")
            .field("driver_kind", &self.driver_kind)
            .field("unresolved_driver", &self.unresolved_driver)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("tasks", &self.tasks.len())
            .field("dry_run", &self.dry_run)
            .field("policy", &self.policy)
            .field("no_column_shrink", &self.no_column_shrink)
            .field("history_table", &self.history_table)
            .field("lock_timeout", &self.lock_timeout)
            .field("lock_lease", &self.lock_lease)
            .field("baseline_on_migrate", &self.baseline_on_migrate)
            .field("baseline_version", &self.baseline_version)
            .finish_non_exhaustive()
    }
}

//! Integration tests for the migration pipeline.
//!
//! These tests run a `Migrator` against file-backed SQLite databases in
//! temporary directories and verify that:
//! - Tasks apply in order and are recorded in the history table
//! - A second run is a no-op
//! - Dialect-conditional tasks are inert, not recorded
//! - Destructive shrinks follow the configured policy
//! - Dry runs match live runs without writing
//! - Edited history is detected before anything runs
//! - Unknown drivers fail without connecting
//! - A cancelled run does not leave the history lock behind
//! - Existing schemas can be baselined instead of replayed

#![cfg(feature = "sqlite")]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use migrate_rs_core::{settings_loader, DestructiveChangePolicy, MigrateError, MigrateResult};
use migrate_rs_db_backends::{
    ConnectionConfig, ConnectionResource, Connector, DefaultConnector, DriverKind,
};
use migrate_rs_db_migrations::{
    ColumnDef, ColumnType, DriverSelection, MigrationRecord, MigrationRecorder, MigrationState,
    MigrationTask, MigrationVersion, Migrator, TaskKind, TaskLoader,
};

fn db_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("app.db")
}

fn sqlite_migrator(path: &Path) -> Migrator {
    let mut migrator = Migrator::new();
    migrator.configure(
        DriverSelection::Identifier("org.sqlite.JDBC".into()),
        &format!("jdbc:sqlite:{}", path.display()),
        "",
        "",
    );
    migrator
}

fn create_widgets() -> MigrationTask {
    MigrationTask::new(
        "V1",
        "create widgets",
        TaskKind::CreateTable {
            table: "widgets".into(),
            columns: vec![ColumnDef::new("id", ColumnType::Integer).primary_key()],
        },
    )
    .unwrap()
}

fn add_name() -> MigrationTask {
    MigrationTask::new(
        "V2",
        "add widgets.name",
        TaskKind::AddColumn {
            table: "widgets".into(),
            column: ColumnDef::new("name", ColumnType::Varchar(50)),
        },
    )
    .unwrap()
}

fn shrink_name() -> MigrationTask {
    MigrationTask::new(
        "V3",
        "shrink widgets.name",
        TaskKind::ModifyColumn {
            table: "widgets".into(),
            column: "name".into(),
            column_type: ColumnType::Varchar(10),
            nullable: true,
        },
    )
    .unwrap()
}

fn add_index() -> MigrationTask {
    MigrationTask::new(
        "V4",
        "index widgets.name",
        TaskKind::AddIndex {
            table: "widgets".into(),
            name: "idx_widgets_name".into(),
            columns: vec!["name".into()],
            unique: false,
        },
    )
    .unwrap()
}

fn raw(version: &str, sql: &str) -> MigrationTask {
    MigrationTask::new(
        version,
        format!("raw {version}"),
        TaskKind::RawSql {
            statements: vec![sql.to_string()],
            per_dialect: BTreeMap::new(),
        },
    )
    .unwrap()
}

fn widgets_migrator(path: &Path) -> Migrator {
    let mut migrator = sqlite_migrator(path);
    migrator
        .add_tasks([create_widgets(), add_name(), shrink_name()])
        .unwrap();
    migrator
}

async fn open(path: &Path) -> ConnectionResource {
    DefaultConnector
        .open(&ConnectionConfig::sqlite_file(path))
        .await
        .unwrap()
}

async fn history(path: &Path) -> Vec<MigrationRecord> {
    let conn = open(path).await;
    let records = MigrationRecorder::default()
        .load_if_exists(&conn)
        .await
        .unwrap();
    conn.close().await.unwrap();
    records
}

fn versions(records: &[MigrationRecord]) -> Vec<&str> {
    records.iter().map(|r| r.version.as_str()).collect()
}

// ── 1. The widgets scenario ─────────────────────────────────────────────

#[tokio::test]
async fn test_widgets_scenario_with_warning_policy() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let migrator = widgets_migrator(&path);
    assert_eq!(
        migrator.destructive_change_policy(),
        DestructiveChangePolicy::AllowWithWarning
    );

    let report = migrator.migrate().await.unwrap();
    assert!(report.success);
    assert_eq!(
        report.considered,
        ["1", "2", "3"].map(|v| MigrationVersion::parse(v).unwrap())
    );
    assert_eq!(report.executed.len(), 3);
    assert!(report.skipped.is_empty());
    assert!(!report.executed[0].destructive);
    assert!(!report.executed[1].destructive);
    assert!(report.executed[2].destructive);
    assert!(report.executed.iter().all(|t| t.atomic));
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("widgets.name"));

    let conn = open(&path).await;
    assert!(conn.table_exists("widgets").await.unwrap());
    assert_eq!(
        conn.current_column_width("widgets", "name").await.unwrap(),
        Some(10)
    );
    conn.close().await.unwrap();
}

// ── 2. Idempotence ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_second_run_executes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let migrator = widgets_migrator(&path);

    migrator.migrate().await.unwrap();
    let second = migrator.migrate().await.unwrap();
    assert!(second.executed.is_empty());
    assert_eq!(second.skipped.len(), 3);
    assert!(second.warnings.is_empty());
    assert_eq!(history(&path).await.len(), 3);
}

// ── 3. History is ascending with no gaps ────────────────────────────────

#[tokio::test]
async fn test_records_ascend_without_gaps() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let mut migrator = widgets_migrator(&path);
    migrator.migrate().await.unwrap();

    migrator.add_task(add_index()).unwrap();
    migrator.migrate().await.unwrap();

    let records = history(&path).await;
    assert_eq!(versions(&records), vec!["1", "2", "3", "4"]);
    let ranks: Vec<i64> = records.iter().map(|r| r.installed_rank).collect();
    assert_eq!(ranks, vec![1, 2, 3, 4]);
    assert!(records.iter().all(|r| r.success));
    for (record, task) in records.iter().zip(migrator.tasks()) {
        assert_eq!(record.checksum, task.checksum(DriverKind::Sqlite));
    }
}

// ── 4. Dialect-conditional tasks ────────────────────────────────────────

#[tokio::test]
async fn test_inert_task_is_neither_run_nor_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let mut migrator = sqlite_migrator(&path);
    migrator
        .add_tasks([
            create_widgets(),
            raw("V1.5", "CREATE EXTENSION pgcrypto").only_on([DriverKind::Postgres]),
            add_name(),
        ])
        .unwrap();

    let report = migrator.migrate().await.unwrap();
    assert_eq!(report.executed.len(), 2);
    assert_eq!(report.not_applicable.len(), 1);
    assert_eq!(report.not_applicable[0].to_string(), "1.5");
    assert_eq!(versions(&history(&path).await), vec!["1", "2"]);

    let again = migrator.migrate().await.unwrap();
    assert!(again.executed.is_empty());
    assert_eq!(again.not_applicable.len(), 1);
}

// ── 5. Reject policy ────────────────────────────────────────────────────

#[tokio::test]
async fn test_reject_policy_stops_at_destructive_task() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let mut migrator = widgets_migrator(&path);
    migrator.add_task(add_index()).unwrap();
    migrator.set_destructive_change_policy(DestructiveChangePolicy::Reject);

    let failure = migrator.migrate().await.unwrap_err();
    match &failure.error {
        MigrateError::DestructiveChangeRejected {
            version,
            table,
            column,
            current_width,
            target_width,
        } => {
            assert_eq!(version, "3");
            assert_eq!(table, "widgets");
            assert_eq!(column, "name");
            assert_eq!(*current_width, 50);
            assert_eq!(*target_width, 10);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(failure.failed_version().unwrap().to_string(), "3");
    assert_eq!(failure.report.executed.len(), 2);
    assert!(!failure.report.success);

    assert_eq!(versions(&history(&path).await), vec!["1", "2"]);
}

// ── 6. no_column_shrink pre-flight ──────────────────────────────────────

#[tokio::test]
async fn test_no_column_shrink_rejects_before_any_task() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let mut migrator = widgets_migrator(&path);
    migrator.set_destructive_change_policy(DestructiveChangePolicy::Allow);
    migrator.set_no_column_shrink(true);

    let failure = migrator.migrate().await.unwrap_err();
    assert!(matches!(
        failure.error,
        MigrateError::DestructiveChangeRejected { .. }
    ));
    assert!(failure.report.executed.is_empty());
    assert!(failure.failed_version().is_none());

    let conn = open(&path).await;
    assert!(!conn.table_exists("widgets").await.unwrap());
    conn.close().await.unwrap();
    assert!(history(&path).await.is_empty());
}

// ── 7. Dry run ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_dry_run_matches_live_run_and_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);

    // Apply V1 for real so the dry run starts from a non-empty history.
    let mut partial = sqlite_migrator(&path);
    partial.add_task(create_widgets()).unwrap();
    partial.migrate().await.unwrap();
    let before = history(&path).await.len();

    let mut dry = widgets_migrator(&path);
    dry.add_task(add_index()).unwrap();
    dry.set_dry_run(true);
    let planned = dry.migrate().await.unwrap();
    assert!(planned.dry_run);
    assert_eq!(history(&path).await.len(), before);

    let conn = open(&path).await;
    assert_eq!(conn.current_column_width("widgets", "name").await.unwrap(), None);
    conn.close().await.unwrap();

    let mut live = widgets_migrator(&path);
    live.add_task(add_index()).unwrap();
    let applied = live.migrate().await.unwrap();

    assert_eq!(planned.executed_versions(), applied.executed_versions());
    assert_eq!(planned.destructive_versions(), applied.destructive_versions());
    assert_eq!(planned.skipped, applied.skipped);
    for (p, a) in planned.executed.iter().zip(&applied.executed) {
        assert_eq!(p.statements, a.statements);
    }
}

#[tokio::test]
async fn test_dry_run_on_empty_database_creates_no_history_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let mut migrator = widgets_migrator(&path);
    migrator.set_dry_run(true);

    let report = migrator.migrate().await.unwrap();
    assert_eq!(report.executed.len(), 3);

    let conn = open(&path).await;
    assert!(!conn.table_exists("migrate_schema_history").await.unwrap());
    assert!(!conn.table_exists("widgets").await.unwrap());
    conn.close().await.unwrap();
}

// ── 8. Tampered history ─────────────────────────────────────────────────

#[tokio::test]
async fn test_edited_task_is_history_drift() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let mut original = sqlite_migrator(&path);
    original.add_task(create_widgets()).unwrap();
    original.migrate().await.unwrap();

    let mut edited = sqlite_migrator(&path);
    edited
        .add_tasks([
            MigrationTask::new(
                "V1",
                "create widgets",
                TaskKind::CreateTable {
                    table: "widgets".into(),
                    columns: vec![ColumnDef::new("id", ColumnType::BigInt).primary_key()],
                },
            )
            .unwrap(),
            add_name(),
        ])
        .unwrap();

    let failure = edited.migrate().await.unwrap_err();
    assert!(matches!(
        failure.error,
        MigrateError::HistoryDrift { ref version, .. } if version == "1"
    ));
    assert_eq!(failure.report.failure.as_ref().unwrap().code, "history_drift");
    assert!(failure.report.executed.is_empty());

    let conn = open(&path).await;
    assert_eq!(conn.current_column_width("widgets", "name").await.unwrap(), None);
    conn.close().await.unwrap();
    assert_eq!(history(&path).await.len(), 1);
}

// ── 9. Unknown driver ───────────────────────────────────────────────────

#[derive(Default)]
struct CountingConnector {
    opened: AtomicUsize,
}

#[async_trait::async_trait]
impl Connector for CountingConnector {
    async fn open(&self, config: &ConnectionConfig) -> MigrateResult<ConnectionResource> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        DefaultConnector.open(config).await
    }
}

#[tokio::test]
async fn test_unknown_driver_fails_without_connecting() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let connector = Arc::new(CountingConnector::default());
    let mut migrator = Migrator::from_data_source(
        "com.example.NoSuchDriver",
        &format!("jdbc:sqlite:{}", path.display()),
        "",
        "",
    )
    .with_connector(connector.clone());
    migrator.add_tasks([create_widgets(), add_name()]).unwrap();

    let failure = migrator.migrate().await.unwrap_err();
    assert!(matches!(
        failure.error,
        MigrateError::UnknownDriver(ref id) if id == "com.example.NoSuchDriver"
    ));
    assert!(failure.report.driver.is_none());
    assert_eq!(connector.opened.load(Ordering::SeqCst), 0);
    assert!(!path.exists());
    assert!(migrator.migration_info().await.unwrap().is_none());
}

// ── 10. Failing task ────────────────────────────────────────────────────

#[tokio::test]
async fn test_failing_task_halts_run_and_keeps_earlier_work() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let mut migrator = sqlite_migrator(&path);
    migrator
        .add_tasks([
            create_widgets(),
            raw("V2", "ALTER TABLE no_such_table ADD COLUMN x INTEGER"),
            add_index(),
        ])
        .unwrap();

    let failure = migrator.migrate().await.unwrap_err();
    assert!(matches!(failure.error, MigrateError::TaskExecution { .. }));
    assert_eq!(failure.failed_version().unwrap().to_string(), "2");
    assert_eq!(failure.report.executed.len(), 1);
    assert_eq!(versions(&history(&path).await), vec!["1"]);

    // Fix the task and run again: only the rest is applied.
    migrator.remove_all_tasks_for_unit_test();
    migrator
        .add_tasks([
            create_widgets(),
            raw("V2", "ALTER TABLE widgets ADD COLUMN name VARCHAR(50)"),
            add_index(),
        ])
        .unwrap();
    let report = migrator.migrate().await.unwrap();
    assert_eq!(report.executed.len(), 2);
    assert_eq!(versions(&history(&path).await), vec!["1", "2", "4"]);
}

// ── 11. Migration info ──────────────────────────────────────────────────

#[tokio::test]
async fn test_migration_info_reports_states_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let mut migrator = widgets_migrator(&path);

    let fresh = migrator.migration_info().await.unwrap().unwrap();
    assert!(fresh.tasks.iter().all(|t| t.state == MigrationState::Pending));
    assert!(fresh.current_version.is_none());
    let conn = open(&path).await;
    assert!(!conn.table_exists("migrate_schema_history").await.unwrap());
    conn.close().await.unwrap();

    migrator.migrate().await.unwrap();
    migrator.add_task(add_index()).unwrap();

    let info = migrator.migration_info().await.unwrap().unwrap();
    let states: Vec<MigrationState> = info.tasks.iter().map(|t| t.state).collect();
    assert_eq!(
        states,
        vec![
            MigrationState::Applied,
            MigrationState::Applied,
            MigrationState::Applied,
            MigrationState::Pending,
        ]
    );
    assert_eq!(info.current_version.as_ref().unwrap().to_string(), "3");
    assert!(info.missing.is_empty());

    migrator.remove_all_tasks_for_unit_test();
    migrator.add_task(create_widgets()).unwrap();
    let info = migrator.migration_info().await.unwrap().unwrap();
    assert_eq!(info.missing.len(), 2);
}

// ── 12. Concurrent migrators share the history lock ─────────────────────

#[tokio::test]
async fn test_concurrent_runs_apply_each_task_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    // Create the file up front so both runs find it already in WAL mode.
    open(&path).await.close().await.unwrap();
    let a = widgets_migrator(&path);
    let b = widgets_migrator(&path);

    let (ra, rb) = tokio::join!(a.migrate(), b.migrate());
    let (ra, rb) = (ra.unwrap(), rb.unwrap());
    assert_eq!(ra.executed.len() + rb.executed.len(), 3);
    assert_eq!(versions(&history(&path).await), vec!["1", "2", "3"]);

    let conn = open(&path).await;
    assert!(conn
        .try_lock("migrate_schema_history", "after", Duration::from_secs(60))
        .await
        .unwrap());
    conn.unlock().await.unwrap();
    conn.close().await.unwrap();
}

// ── 13. Settings and task files ─────────────────────────────────────────

#[tokio::test]
async fn test_migrator_from_settings_and_task_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);

    let settings = settings_loader::from_toml_str(&format!(
        r#"
url = "sqlite:{}"
history_table = "schema_log"
destructive_policy = "reject"
"#,
        path.display()
    ))
    .unwrap();

    let tasks_file = dir.path().join("tasks.json");
    std::fs::write(
        &tasks_file,
        r#"{"tasks": [
            {"version": "1", "description": "create", "op": "create_table", "table": "notes",
             "columns": [{"name": "id", "type": "INTEGER", "primary_key": true},
                         {"name": "body", "type": "VARCHAR(200)", "nullable": false, "default": "''"}]},
            {"version": "2", "description": "backfill", "op": "data_backfill", "table": "notes",
             "assignments": [{"column": "body", "expression": "'n/a'"}], "where": "body = ''"}
        ]}"#,
    )
    .unwrap();

    let mut migrator = Migrator::from_settings(&settings);
    assert_eq!(migrator.driver_kind(), None);
    migrator
        .add_tasks(TaskLoader::from_path(&tasks_file).unwrap())
        .unwrap();

    let report = migrator.migrate().await.unwrap();
    assert_eq!(report.driver, Some(DriverKind::Sqlite));
    assert_eq!(report.executed.len(), 2);

    let conn = open(&path).await;
    assert!(conn.table_exists("schema_log").await.unwrap());
    assert!(!conn.table_exists("migrate_schema_history").await.unwrap());
    conn.close().await.unwrap();
}

// ── 14. Cancelled runs ──────────────────────────────────────────────────

const SLOW_SQL: &str = "CREATE TABLE big AS WITH RECURSIVE c(x) AS \
     (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 50000000) SELECT x FROM c";

#[tokio::test]
async fn test_timed_out_run_releases_history_lock() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    open(&path).await.close().await.unwrap();

    let mut slow = sqlite_migrator(&path);
    slow.add_task(raw("1", SLOW_SQL)).unwrap();
    let timed_out = tokio::time::timeout(Duration::from_millis(300), slow.migrate()).await;
    assert!(timed_out.is_err());

    let mut next = sqlite_migrator(&path);
    next.set_lock_timeout(Duration::from_secs(10));
    next.add_task(raw("1", "CREATE TABLE small (id INTEGER)"))
        .unwrap();
    let report = next.migrate().await.unwrap();
    assert_eq!(report.executed.len(), 1);

    let conn = open(&path).await;
    assert!(conn.table_exists("small").await.unwrap());
    assert!(!conn.table_exists("big").await.unwrap());
    conn.close().await.unwrap();
    assert_eq!(versions(&history(&path).await), vec!["1"]);
}

#[tokio::test]
async fn test_abandoned_lock_row_is_taken_over_after_lease() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);

    // A process that died mid-run left its lock row behind.
    let conn = open(&path).await;
    conn.execute_ddl(
        "CREATE TABLE migrate_schema_history_lock (id INTEGER PRIMARY KEY, \
         owner VARCHAR(128) NOT NULL, locked_at VARCHAR(64) NOT NULL)",
    )
    .await
    .unwrap();
    conn.execute_ddl(
        "INSERT INTO migrate_schema_history_lock VALUES (1, 'dead-run', '2001-01-01T00:00:00+00:00')",
    )
    .await
    .unwrap();
    conn.close().await.unwrap();

    let mut migrator = widgets_migrator(&path);
    migrator.set_lock_timeout(Duration::from_secs(2));
    migrator.set_lock_lease(Duration::from_secs(60));
    let report = migrator.migrate().await.unwrap();
    assert_eq!(report.executed.len(), 3);

    let conn = open(&path).await;
    let rows = conn
        .query("SELECT owner FROM migrate_schema_history_lock", &[])
        .await
        .unwrap();
    assert!(rows.is_empty());
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_fresh_lock_row_still_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);

    let holder = open(&path).await;
    assert!(holder
        .try_lock("migrate_schema_history", "holder", Duration::from_secs(60))
        .await
        .unwrap());

    let mut migrator = widgets_migrator(&path);
    migrator.set_lock_timeout(Duration::from_millis(500));
    let failure = migrator.migrate().await.unwrap_err();
    assert!(matches!(failure.error, MigrateError::LockTimeout(_)));
    assert!(failure.report.executed.is_empty());

    holder.close().await.unwrap();
    migrator.set_lock_timeout(Duration::from_secs(2));
    assert_eq!(migrator.migrate().await.unwrap().executed.len(), 3);
}

// ── 15. Tasks SQLite cannot express ─────────────────────────────────────

#[tokio::test]
async fn test_foreign_key_tasks_are_inert_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let mut migrator = sqlite_migrator(&path);
    migrator
        .add_tasks([
            create_widgets(),
            raw("V2", "CREATE TABLE parts (id INTEGER PRIMARY KEY, widget_id INTEGER)"),
            MigrationTask::new(
                "V3",
                "parts reference widgets",
                TaskKind::AddForeignKey {
                    table: "parts".into(),
                    name: "fk_parts_widget".into(),
                    columns: vec!["widget_id".into()],
                    references_table: "widgets".into(),
                    references_columns: vec!["id".into()],
                    on_delete: None,
                },
            )
            .unwrap(),
            MigrationTask::new(
                "V4",
                "drop the reference",
                TaskKind::DropForeignKey {
                    table: "parts".into(),
                    name: "fk_parts_widget".into(),
                },
            )
            .unwrap(),
        ])
        .unwrap();

    let report = migrator.migrate().await.unwrap();
    assert_eq!(report.executed.len(), 2);
    assert_eq!(
        report.not_applicable,
        ["3", "4"].map(|v| MigrationVersion::parse(v).unwrap())
    );
    assert_eq!(versions(&history(&path).await), vec!["1", "2"]);

    let info = migrator.migration_info().await.unwrap().unwrap();
    assert_eq!(info.in_state(MigrationState::NotApplicable).count(), 2);
}

#[tokio::test]
async fn test_not_null_on_sqlite_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let mut migrator = sqlite_migrator(&path);
    migrator
        .add_tasks([
            create_widgets(),
            add_name(),
            MigrationTask::new(
                "V3",
                "require widgets.name",
                TaskKind::ModifyColumn {
                    table: "widgets".into(),
                    column: "name".into(),
                    column_type: ColumnType::Varchar(50),
                    nullable: false,
                },
            )
            .unwrap(),
        ])
        .unwrap();

    let report = migrator.migrate().await.unwrap();
    assert_eq!(report.executed.len(), 3);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("widgets.name"));
    assert!(report.warnings[0].contains("NOT NULL"));
}

// ── 16. Baseline on migrate ─────────────────────────────────────────────

async fn legacy_schema(path: &Path) {
    let conn = open(path).await;
    conn.execute_ddl("CREATE TABLE widgets (id INTEGER PRIMARY KEY, name VARCHAR(50))")
        .await
        .unwrap();
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_baseline_skips_tasks_already_in_schema() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    legacy_schema(&path).await;

    let mut migrator = widgets_migrator(&path);
    migrator.set_baseline_on_migrate(true);
    migrator.set_baseline_version("2");

    let report = migrator.migrate().await.unwrap();
    assert_eq!(report.baseline, Some(MigrationVersion::parse("2").unwrap()));
    assert_eq!(
        report.below_baseline,
        ["1", "2"].map(|v| MigrationVersion::parse(v).unwrap())
    );
    assert_eq!(report.executed_versions(), vec![&MigrationVersion::parse("3").unwrap()]);

    let records = history(&path).await;
    assert_eq!(versions(&records), vec!["2", "3"]);
    assert!(records[0].is_baseline());
    assert!(!records[1].is_baseline());

    // The baseline is written once; a second run is a no-op.
    let again = migrator.migrate().await.unwrap();
    assert!(again.baseline.is_none());
    assert!(again.executed.is_empty());
    assert_eq!(again.skipped, vec![MigrationVersion::parse("3").unwrap()]);

    let info = migrator.migration_info().await.unwrap().unwrap();
    assert_eq!(info.in_state(MigrationState::BelowBaseline).count(), 2);
    assert_eq!(info.in_state(MigrationState::Applied).count(), 1);
    assert!(info.missing.is_empty());
}

#[tokio::test]
async fn test_baseline_is_not_written_on_empty_schema() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let mut migrator = widgets_migrator(&path);
    migrator.set_baseline_on_migrate(true);
    migrator.set_baseline_version("2");

    let report = migrator.migrate().await.unwrap();
    assert!(report.baseline.is_none());
    assert_eq!(report.executed.len(), 3);
    assert_eq!(versions(&history(&path).await), vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_baseline_dry_run_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    legacy_schema(&path).await;

    let mut migrator = widgets_migrator(&path);
    migrator.set_baseline_on_migrate(true);
    migrator.set_baseline_version("2");
    migrator.set_dry_run(true);

    let report = migrator.migrate().await.unwrap();
    assert_eq!(report.baseline, Some(MigrationVersion::parse("2").unwrap()));
    assert_eq!(report.executed.len(), 1);
    assert!(history(&path).await.is_empty());
}

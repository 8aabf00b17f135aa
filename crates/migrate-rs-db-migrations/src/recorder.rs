//! The migration history table.
//!
//! [`MigrationRecorder`] owns one table per target database (by default
//! `migrate_schema_history`) holding a [`MigrationRecord`] per task that has
//! been attempted. A successful record means the task is never run again; a
//! failed record (`success = false`, only written on dialects without
//! transactional DDL) keeps the version pending and is replaced on the next
//! successful attempt.
//!
//! A history can also start from a baseline row, written once when an
//! existing schema is first brought under migration. Every task at or below
//! its version counts as already present.

use chrono::{DateTime, Utc};
use migrate_rs_core::{MigrateResult, DEFAULT_HISTORY_TABLE};
use migrate_rs_db_backends::{ConnectionResource, DriverKind, Row, Value};
use serde::{Deserialize, Serialize};

use crate::schema_editor::schema_editor_for;
use crate::task::{ColumnDef, ColumnType};
use crate::version::MigrationVersion;

/// Longest description stored; longer ones are truncated.
pub const MAX_DESCRIPTION_LEN: usize = 200;

/// Description of the baseline row.
pub const BASELINE_DESCRIPTION: &str = "<< Baseline >>";

/// Checksum stored on the baseline row; no task renders to it.
const BASELINE_CHECKSUM: &str = "baseline";

/// One row of the history table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub installed_rank: i64,
    /// The version as written when the record was created.
    pub version: String,
    pub description: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
    pub execution_time_ms: i64,
    pub success: bool,
}

impl MigrationRecord {
    /// The stored version, if it still parses.
    pub fn parsed_version(&self) -> Option<MigrationVersion> {
        MigrationVersion::parse(&self.version).ok()
    }

    /// Whether this is a baseline row rather than an applied task.
    pub fn is_baseline(&self) -> bool {
        self.description == BASELINE_DESCRIPTION && self.checksum == BASELINE_CHECKSUM
    }

    /// An in-memory baseline row, as [`MigrationRecorder::insert_baseline`]
    /// would write it.
    pub fn baseline(installed_rank: i64, version: &str) -> Self {
        Self {
            installed_rank,
            version: version.to_string(),
            description: BASELINE_DESCRIPTION.to_string(),
            checksum: BASELINE_CHECKSUM.to_string(),
            applied_at: Utc::now(),
            execution_time_ms: 0,
            success: true,
        }
    }

    fn from_row(row: &Row) -> MigrateResult<Self> {
        Ok(Self {
            installed_rank: row.get("installed_rank")?,
            version: row.get("version")?,
            description: row.get("description")?,
            checksum: row.get("checksum")?,
            applied_at: row.get("applied_at")?,
            execution_time_ms: row.get("execution_time_ms")?,
            success: row.get("success")?,
        })
    }
}

/// A record about to be written.
#[derive(Debug, Clone)]
pub struct NewRecord<'a> {
    pub version: &'a MigrationVersion,
    pub description: &'a str,
    pub checksum: &'a str,
    pub execution_time_ms: i64,
    pub success: bool,
}

/// Reads and writes the history table.
#[derive(Debug, Clone)]
pub struct MigrationRecorder {
    table: String,
}

impl Default for MigrationRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_TABLE)
    }
}

impl MigrationRecorder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    /// The history table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The `CREATE` statements for the history table on a dialect.
    ///
    /// Column types come from the dialect's schema editor, and `version` gets
    /// a unique index.
    pub fn ensure_schema_sql(&self, kind: DriverKind) -> Vec<String> {
        let editor = schema_editor_for(kind);
        let columns = [
            ColumnDef::new("installed_rank", ColumnType::BigInt).primary_key(),
            ColumnDef::new("version", ColumnType::Varchar(50)).not_null(),
            ColumnDef::new("description", ColumnType::Varchar(200)).not_null(),
            ColumnDef::new("checksum", ColumnType::Varchar(64)).not_null(),
            ColumnDef::new("applied_at", ColumnType::Timestamp).not_null(),
            ColumnDef::new("execution_time_ms", ColumnType::BigInt).not_null(),
            ColumnDef::new("success", ColumnType::Boolean).not_null(),
        ];
        let mut sql = editor.create_table(&self.table, &columns);
        sql.extend(editor.create_index(
            &self.table,
            &format!("{}_version_uk", self.table),
            &["version".to_string()],
            true,
        ));
        sql
    }

    // ── Async database operations ────────────────────────────────────

    /// Creates the history table if it does not exist.
    pub async fn ensure_table(&self, conn: &ConnectionResource) -> MigrateResult<()> {
        if conn.table_exists(&self.table).await? {
            return Ok(());
        }

        tracing::info!(table = %self.table, "creating history table");
        let statements = self.ensure_schema_sql(conn.driver_kind());
        if let Err(e) = conn.execute_in_transaction(&statements).await {
            // Another migrator may have created it in the meantime.
            if conn.table_exists(&self.table).await? {
                return Ok(());
            }
            return Err(e);
        }
        Ok(())
    }

    /// Loads every record, ordered by `installed_rank`.
    pub async fn load(&self, conn: &ConnectionResource) -> MigrateResult<Vec<MigrationRecord>> {
        let q = |name: &str| conn.quote(name);
        let sql = format!(
            "SELECT {}, {}, {}, {}, {}, {}, {} FROM {} ORDER BY {}",
            q("installed_rank"),
            q("version"),
            q("description"),
            q("checksum"),
            q("applied_at"),
            q("execution_time_ms"),
            q("success"),
            q(&self.table),
            q("installed_rank"),
        );
        conn.query(&sql, &[])
            .await?
            .iter()
            .map(MigrationRecord::from_row)
            .collect()
    }

    /// Loads every record, or nothing if the table does not exist yet.
    ///
    /// Never writes.
    pub async fn load_if_exists(
        &self,
        conn: &ConnectionResource,
    ) -> MigrateResult<Vec<MigrationRecord>> {
        if conn.table_exists(&self.table).await? {
            self.load(conn).await
        } else {
            Ok(Vec::new())
        }
    }

    /// Appends a record with the next `installed_rank`.
    pub async fn insert(&self, conn: &ConnectionResource, record: &NewRecord<'_>) -> MigrateResult<i64> {
        let kind = conn.driver_kind();
        let table = conn.quote(&self.table);
        let rank_col = conn.quote("installed_rank");

        let rows = conn
            .query(
                &format!("SELECT MAX({rank_col}) AS max_rank FROM {table}"),
                &[],
            )
            .await?;
        let current: Option<i64> = match rows.first() {
            Some(row) => row.get("max_rank")?,
            None => None,
        };
        let rank = current.unwrap_or(0) + 1;

        let columns = [
            "installed_rank",
            "version",
            "description",
            "checksum",
            "applied_at",
            "execution_time_ms",
            "success",
        ];
        let placeholders = (1..=columns.len())
            .map(|i| kind.placeholder(i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders})",
            columns.map(|c| conn.quote(c)).join(", ")
        );

        let params = [
            Value::Int(rank),
            Value::String(record.version.to_string()),
            Value::String(truncate(record.description, MAX_DESCRIPTION_LEN)),
            Value::String(record.checksum.to_string()),
            Value::DateTimeTz(Utc::now()),
            Value::Int(record.execution_time_ms),
            Value::Bool(record.success),
        ];
        conn.execute(&sql, &params).await?;
        Ok(rank)
    }

    /// Writes the baseline row for `version`.
    pub async fn insert_baseline(
        &self,
        conn: &ConnectionResource,
        version: &MigrationVersion,
    ) -> MigrateResult<i64> {
        tracing::info!(table = %self.table, %version, "baselining existing schema");
        self.insert(
            conn,
            &NewRecord {
                version,
                description: BASELINE_DESCRIPTION,
                checksum: BASELINE_CHECKSUM,
                execution_time_ms: 0,
                success: true,
            },
        )
        .await
    }

    /// Removes failed records for a version, as stored.
    pub async fn delete_failed(&self, conn: &ConnectionResource, version: &str) -> MigrateResult<u64> {
        let kind = conn.driver_kind();
        let sql = format!(
            "DELETE FROM {} WHERE {} = {} AND {} = {}",
            conn.quote(&self.table),
            conn.quote("version"),
            kind.placeholder(1),
            conn.quote("success"),
            kind.placeholder(2),
        );
        conn.execute(&sql, &[Value::from(version), Value::Bool(false)])
            .await
    }
}

/// Truncates to at most `max` characters on a char boundary.
fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

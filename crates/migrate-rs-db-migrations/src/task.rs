//! Migration tasks.
//!
//! A [`MigrationTask`] is one versioned, immutable schema change. What it does
//! is described by the closed [`TaskKind`] enum; the per-dialect SQL comes from
//! the [`SchemaEditor`](crate::schema_editor::SchemaEditor) for the target
//! database, so the same task renders correctly on every supported product.
//!
//! Tasks are usually built in code:
//!
//! ```
//! use migrate_rs_db_migrations::task::{ColumnDef, ColumnType, MigrationTask, TaskKind};
//!
//! let task = MigrationTask::new(
//!     "V1",
//!     "create widgets",
//!     TaskKind::CreateTable {
//!         table: "widgets".into(),
//!         columns: vec![ColumnDef::new("id", ColumnType::BigInt).primary_key()],
//!     },
//! )
//! .unwrap();
//! assert_eq!(task.version().to_string(), "1");
//! ```
//!
//! or loaded from JSON/TOML with [`TaskLoader`](crate::loader::TaskLoader).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use migrate_rs_core::{MigrateError, MigrateResult};
use migrate_rs_db_backends::{ConnectionResource, DriverKind};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::schema_editor::schema_editor_for;
use crate::version::MigrationVersion;

// ── Column types ────────────────────────────────────────────────────────

/// A portable column type.
///
/// Serialized as its SQL-ish spelling (`"VARCHAR(50)"`, `"BIGINT"`,
/// `"DECIMAL(10,2)"`), which each schema editor maps to its dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    SmallInt,
    Integer,
    BigInt,
    /// Variable-length text with a maximum width.
    Varchar(u32),
    /// Fixed-length text.
    Char(u32),
    /// Unbounded text.
    Text,
    Boolean,
    Date,
    Timestamp,
    /// Exact numeric with precision and scale.
    Decimal(u8, u8),
    Double,
    Blob,
    Json,
    Uuid,
}

impl ColumnType {
    /// The declared width of character types.
    pub const fn width(self) -> Option<u32> {
        match self {
            Self::Varchar(n) | Self::Char(n) => Some(n),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SmallInt => f.write_str("SMALLINT"),
            Self::Integer => f.write_str("INTEGER"),
            Self::BigInt => f.write_str("BIGINT"),
            Self::Varchar(n) => write!(f, "VARCHAR({n})"),
            Self::Char(n) => write!(f, "CHAR({n})"),
            Self::Text => f.write_str("TEXT"),
            Self::Boolean => f.write_str("BOOLEAN"),
            Self::Date => f.write_str("DATE"),
            Self::Timestamp => f.write_str("TIMESTAMP"),
            Self::Decimal(p, s) => write!(f, "DECIMAL({p},{s})"),
            Self::Double => f.write_str("DOUBLE"),
            Self::Blob => f.write_str("BLOB"),
            Self::Json => f.write_str("JSON"),
            Self::Uuid => f.write_str("UUID"),
        }
    }
}

impl FromStr for ColumnType {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let (name, args) = match upper.find('(') {
            Some(open) => {
                let close = upper.rfind(')').filter(|&c| c > open).ok_or_else(|| {
                    MigrateError::ConfigurationError(format!("Unbalanced column type '{s}'"))
                })?;
                (upper[..open].trim(), Some(&upper[open + 1..close]))
            }
            None => (upper.as_str(), None),
        };

        let bad = || MigrateError::ConfigurationError(format!("Unsupported column type '{s}'"));
        let width = |args: Option<&str>| -> MigrateResult<u32> {
            args.and_then(|a| a.trim().parse().ok()).ok_or_else(bad)
        };

        match name {
            "SMALLINT" => Ok(Self::SmallInt),
            "INT" | "INTEGER" => Ok(Self::Integer),
            "BIGINT" => Ok(Self::BigInt),
            "VARCHAR" | "CHARACTER VARYING" => Ok(Self::Varchar(width(args)?)),
            "CHAR" | "CHARACTER" => Ok(Self::Char(width(args)?)),
            "TEXT" | "CLOB" => Ok(Self::Text),
            "BOOLEAN" | "BOOL" => Ok(Self::Boolean),
            "DATE" => Ok(Self::Date),
            "TIMESTAMP" | "DATETIME" => Ok(Self::Timestamp),
            "DECIMAL" | "NUMERIC" => {
                let args = args.ok_or_else(bad)?;
                let mut parts = args.split(',').map(|p| p.trim().parse::<u8>());
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(Ok(p)), Some(Ok(sc)), None) => Ok(Self::Decimal(p, sc)),
                    (Some(Ok(p)), None, None) => Ok(Self::Decimal(p, 0)),
                    _ => Err(bad()),
                }
            }
            "DOUBLE" | "DOUBLE PRECISION" | "FLOAT" => Ok(Self::Double),
            "BLOB" | "BINARY" => Ok(Self::Blob),
            "JSON" => Ok(Self::Json),
            "UUID" => Ok(Self::Uuid),
            _ => Err(bad()),
        }
    }
}

impl Serialize for ColumnType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ── Column and constraint definitions ───────────────────────────────────

fn default_true() -> bool {
    true
}

/// A column in a `CreateTable` or `AddColumn` task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    /// A raw SQL literal or expression, e.g. `'n/a'`, `0`, `CURRENT_TIMESTAMP`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ColumnDef {
    /// A nullable column with no default.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            primary_key: false,
            default: None,
        }
    }

    /// Marks the column as (part of) the primary key. Implies `NOT NULL`.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn default_value(mut self, sql: impl Into<String>) -> Self {
        self.default = Some(sql.into());
        self
    }
}

/// Referential action for a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForeignKeyAction {
    Cascade,
    SetNull,
    Restrict,
    NoAction,
}

impl ForeignKeyAction {
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::Restrict => "RESTRICT",
            Self::NoAction => "NO ACTION",
        }
    }
}

/// One `column = expression` pair of a data backfill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub column: String,
    /// A raw SQL expression.
    pub expression: String,
}

// ── Task kinds ──────────────────────────────────────────────────────────

/// What a task does.
///
/// Schema editors match on this exhaustively; adding a variant is a compile
/// error everywhere SQL is generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TaskKind {
    CreateTable {
        table: String,
        columns: Vec<ColumnDef>,
    },
    DropTable {
        table: String,
    },
    AddColumn {
        table: String,
        column: ColumnDef,
    },
    DropColumn {
        table: String,
        column: String,
    },
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },
    /// Changes a column's type and nullability. The only kind that can shrink
    /// a column.
    ModifyColumn {
        table: String,
        column: String,
        #[serde(rename = "type")]
        column_type: ColumnType,
        #[serde(default = "default_true")]
        nullable: bool,
    },
    AddIndex {
        table: String,
        name: String,
        columns: Vec<String>,
        #[serde(default)]
        unique: bool,
    },
    DropIndex {
        table: String,
        name: String,
    },
    AddForeignKey {
        table: String,
        name: String,
        columns: Vec<String>,
        references_table: String,
        references_columns: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        on_delete: Option<ForeignKeyAction>,
    },
    DropForeignKey {
        table: String,
        name: String,
    },
    /// Literal statements. A `per_dialect` entry for the target dialect wins
    /// over the generic `statements`.
    RawSql {
        #[serde(default)]
        statements: Vec<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        per_dialect: BTreeMap<DriverKind, Vec<String>>,
    },
    /// `UPDATE table SET ... [WHERE ...]`.
    DataBackfill {
        table: String,
        assignments: Vec<Assignment>,
        #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
        where_clause: Option<String>,
    },
}

/// The column a `ModifyColumn` task narrows to a fixed width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidthChange<'a> {
    pub table: &'a str,
    pub column: &'a str,
    pub target_width: u32,
}

impl WidthChange<'_> {
    /// The width being shrunk from, given the column's current width.
    ///
    /// `None` when the target is at least as wide, or the current width is
    /// unknown.
    pub fn shrinks(&self, current: Option<u32>) -> Option<u32> {
        current.filter(|&w| self.target_width < w)
    }
}

// ── Migration task ──────────────────────────────────────────────────────

/// A single versioned schema change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationTask {
    version: MigrationVersion,
    description: String,
    /// Dialects the task runs on; empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    only_on: Vec<DriverKind>,
    /// A failure is logged and the task is recorded as applied anyway.
    #[serde(default)]
    failure_allowed: bool,
    #[serde(flatten)]
    kind: TaskKind,
}

impl MigrationTask {
    /// Creates a task that applies to every dialect.
    pub fn new(version: &str, description: impl Into<String>, kind: TaskKind) -> MigrateResult<Self> {
        Ok(Self {
            version: MigrationVersion::parse(version)?,
            description: description.into(),
            only_on: Vec::new(),
            failure_allowed: false,
            kind,
        })
    }

    /// Restricts the task to the given dialects.
    #[must_use]
    pub fn only_on(mut self, kinds: impl IntoIterator<Item = DriverKind>) -> Self {
        self.only_on = kinds.into_iter().collect();
        self
    }

    /// Lets the run continue if this task fails.
    #[must_use]
    pub fn allow_failure(mut self) -> Self {
        self.failure_allowed = true;
        self
    }

    pub fn version(&self) -> &MigrationVersion {
        &self.version
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    pub fn dialects(&self) -> &[DriverKind] {
        &self.only_on
    }

    pub fn is_failure_allowed(&self) -> bool {
        self.failure_allowed
    }

    /// Whether the task does anything on this dialect.
    ///
    /// False when the task is restricted to other dialects, or when it renders
    /// no statements here (a foreign key on SQLite, say).
    pub fn applicable_on(&self, kind: DriverKind) -> bool {
        (self.only_on.is_empty() || self.only_on.contains(&kind))
            && !self.effective_statements(kind).is_empty()
    }

    /// What this dialect will silently not do for the task.
    pub fn caveats(&self, kind: DriverKind) -> Vec<String> {
        schema_editor_for(kind).caveats(&self.kind)
    }

    /// The exact SQL the task runs on this dialect, in order.
    pub fn effective_statements(&self, kind: DriverKind) -> Vec<String> {
        schema_editor_for(kind).statements(&self.kind)
    }

    /// Hex SHA-256 over the effective statements joined by `\n`.
    pub fn checksum(&self, kind: DriverKind) -> String {
        checksum_of(&self.effective_statements(kind))
    }

    /// The width this task narrows a column to, if it is a `ModifyColumn`
    /// to a character type.
    pub fn width_change(&self) -> Option<WidthChange<'_>> {
        match &self.kind {
            TaskKind::ModifyColumn {
                table,
                column,
                column_type,
                ..
            } => column_type.width().map(|target_width| WidthChange {
                table,
                column,
                target_width,
            }),
            _ => None,
        }
    }

    /// Runs the task's statements on the connection, one by one.
    ///
    /// Transaction handling is the caller's concern.
    pub async fn execute(&self, conn: &ConnectionResource) -> MigrateResult<()> {
        for statement in self.effective_statements(conn.driver_kind()) {
            conn.execute_ddl(&statement).await?;
        }
        Ok(())
    }

    /// Returns the live width that this task would shrink, if any.
    ///
    /// `Some(current)` iff the task is a `ModifyColumn` whose target width is
    /// below the column's current declared width. An unknown live width is
    /// never destructive.
    pub async fn shrinks_from(&self, conn: &ConnectionResource) -> MigrateResult<Option<u32>> {
        let Some(change) = self.width_change() else {
            return Ok(None);
        };
        let current = conn.current_column_width(change.table, change.column).await?;
        Ok(change.shrinks(current))
    }

    /// Whether executing the task now would reduce a column's width.
    pub async fn is_destructive(&self, conn: &ConnectionResource) -> MigrateResult<bool> {
        Ok(self.shrinks_from(conn).await?.is_some())
    }
}

/// Hex SHA-256 over statements joined by `\n`.
pub fn checksum_of(statements: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(statements.join("\n").as_bytes());
    hex::encode(hasher.finalize())
}

//! Schema editor implementations for DDL generation.
//!
//! The [`SchemaEditor`] trait turns a [`TaskKind`] into the ordered statements
//! for one dialect. Each dialect family has its own implementation; the
//! provided methods render the ANSI form and editors override only what their
//! database spells differently. Every method returns `Vec<String>` because
//! some changes (especially on SQLite) need several statements, and some need
//! none.

use migrate_rs_db_backends::DriverKind;

use crate::task::{Assignment, ColumnDef, ColumnType, ForeignKeyAction, TaskKind};

/// Generates DDL/DML for schema changes.
pub trait SchemaEditor: Send + Sync {
    /// Returns the dialect this editor targets.
    fn driver_kind(&self) -> DriverKind;

    /// Maps a portable column type to this dialect's spelling.
    fn column_type_sql(&self, column_type: ColumnType) -> String;

    /// Generates DDL to change a column's type and nullability.
    fn modify_column(
        &self,
        table: &str,
        column: &str,
        column_type: ColumnType,
        nullable: bool,
    ) -> Vec<String>;

    fn quote(&self, name: &str) -> String {
        self.driver_kind().quote_identifier(name)
    }

    fn quote_list(&self, names: &[String]) -> String {
        names
            .iter()
            .map(|n| self.quote(n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// The SQL fragment for a column definition: name, type, default, nullability.
    fn column_sql(&self, column: &ColumnDef) -> String {
        let mut sql = format!(
            "{} {}",
            self.quote(&column.name),
            self.column_type_sql(column.column_type)
        );
        if let Some(default) = &column.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        if !column.nullable {
            sql.push_str(" NOT NULL");
        }
        sql
    }

    /// Generates `CREATE TABLE` with a table-level primary key constraint.
    fn create_table(&self, table: &str, columns: &[ColumnDef]) -> Vec<String> {
        let mut parts: Vec<String> = columns.iter().map(|c| self.column_sql(c)).collect();
        let pk: Vec<String> = columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.clone())
            .collect();
        if !pk.is_empty() {
            parts.push(format!("PRIMARY KEY ({})", self.quote_list(&pk)));
        }
        vec![format!(
            "CREATE TABLE {} ({})",
            self.quote(table),
            parts.join(", ")
        )]
    }

    fn drop_table(&self, table: &str) -> Vec<String> {
        vec![format!("DROP TABLE {}", self.quote(table))]
    }

    fn add_column(&self, table: &str, column: &ColumnDef) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote(table),
            self.column_sql(column)
        )]
    }

    fn drop_column(&self, table: &str, column: &str) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote(table),
            self.quote(column)
        )]
    }

    fn rename_column(&self, table: &str, from: &str, to: &str) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            self.quote(table),
            self.quote(from),
            self.quote(to)
        )]
    }

    fn create_index(&self, table: &str, name: &str, columns: &[String], unique: bool) -> Vec<String> {
        vec![format!(
            "CREATE {}INDEX {} ON {} ({})",
            if unique { "UNIQUE " } else { "" },
            self.quote(name),
            self.quote(table),
            self.quote_list(columns)
        )]
    }

    fn drop_index(&self, _table: &str, name: &str) -> Vec<String> {
        vec![format!("DROP INDEX {}", self.quote(name))]
    }

    fn on_delete_sql(&self, action: ForeignKeyAction) -> Option<&'static str> {
        Some(action.as_sql())
    }

    fn add_foreign_key(
        &self,
        table: &str,
        name: &str,
        columns: &[String],
        references_table: &str,
        references_columns: &[String],
        on_delete: Option<ForeignKeyAction>,
    ) -> Vec<String> {
        let mut sql = format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.quote(table),
            self.quote(name),
            self.quote_list(columns),
            self.quote(references_table),
            self.quote_list(references_columns)
        );
        if let Some(action) = on_delete.and_then(|a| self.on_delete_sql(a)) {
            sql.push_str(" ON DELETE ");
            sql.push_str(action);
        }
        vec![sql]
    }

    fn drop_foreign_key(&self, table: &str, name: &str) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.quote(table),
            self.quote(name)
        )]
    }

    /// Generates `UPDATE ... SET ... [WHERE ...]`.
    fn backfill(
        &self,
        table: &str,
        assignments: &[Assignment],
        where_clause: Option<&str>,
    ) -> Vec<String> {
        if assignments.is_empty() {
            return Vec::new();
        }
        let sets = assignments
            .iter()
            .map(|a| format!("{} = {}", self.quote(&a.column), a.expression))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("UPDATE {} SET {sets}", self.quote(table));
        if let Some(predicate) = where_clause.filter(|w| !w.trim().is_empty()) {
            sql.push_str(" WHERE ");
            sql.push_str(predicate);
        }
        vec![sql]
    }

    /// Parts of a task this dialect cannot honour even though the statements
    /// run. Each entry ends up as a warning in the run report.
    fn caveats(&self, _kind: &TaskKind) -> Vec<String> {
        Vec::new()
    }

    /// Renders a task for this dialect.
    fn statements(&self, kind: &TaskKind) -> Vec<String> {
        match kind {
            TaskKind::CreateTable { table, columns } => self.create_table(table, columns),
            TaskKind::DropTable { table } => self.drop_table(table),
            TaskKind::AddColumn { table, column } => self.add_column(table, column),
            TaskKind::DropColumn { table, column } => self.drop_column(table, column),
            TaskKind::RenameColumn { table, from, to } => self.rename_column(table, from, to),
            TaskKind::ModifyColumn {
                table,
                column,
                column_type,
                nullable,
            } => self.modify_column(table, column, *column_type, *nullable),
            TaskKind::AddIndex {
                table,
                name,
                columns,
                unique,
            } => self.create_index(table, name, columns, *unique),
            TaskKind::DropIndex { table, name } => self.drop_index(table, name),
            TaskKind::AddForeignKey {
                table,
                name,
                columns,
                references_table,
                references_columns,
                on_delete,
            } => self.add_foreign_key(
                table,
                name,
                columns,
                references_table,
                references_columns,
                *on_delete,
            ),
            TaskKind::DropForeignKey { table, name } => self.drop_foreign_key(table, name),
            TaskKind::RawSql {
                statements,
                per_dialect,
            } => per_dialect
                .get(&self.driver_kind())
                .unwrap_or(statements)
                .iter()
                .filter(|s| !s.trim().is_empty())
                .cloned()
                .collect(),
            TaskKind::DataBackfill {
                table,
                assignments,
                where_clause,
            } => self.backfill(table, assignments, where_clause.as_deref()),
        }
    }
}

/// Returns the schema editor for a dialect.
pub fn schema_editor_for(kind: DriverKind) -> Box<dyn SchemaEditor> {
    match kind {
        DriverKind::Postgres => Box::new(PostgresSchemaEditor),
        DriverKind::Sqlite => Box::new(SqliteSchemaEditor),
        DriverKind::MySql | DriverKind::MariaDb => Box::new(MySqlSchemaEditor { kind }),
        DriverKind::Oracle => Box::new(OracleSchemaEditor),
        DriverKind::MsSql => Box::new(MsSqlSchemaEditor),
        DriverKind::H2 | DriverKind::Derby => Box::new(AnsiSchemaEditor { kind }),
    }
}

// ── PostgreSQL ───────────────────────────────────────────────────────────

/// Schema editor for PostgreSQL.
///
/// Native `UUID`, `JSONB` and `BYTEA`; `ALTER COLUMN ... TYPE` changes the type
/// in place.
#[derive(Debug, Clone, Copy)]
pub struct PostgresSchemaEditor;

impl SchemaEditor for PostgresSchemaEditor {
    fn driver_kind(&self) -> DriverKind {
        DriverKind::Postgres
    }

    fn column_type_sql(&self, column_type: ColumnType) -> String {
        match column_type {
            ColumnType::Double => "DOUBLE PRECISION".into(),
            ColumnType::Decimal(p, s) => format!("NUMERIC({p},{s})"),
            ColumnType::Blob => "BYTEA".into(),
            ColumnType::Json => "JSONB".into(),
            ColumnType::Timestamp => "TIMESTAMP WITH TIME ZONE".into(),
            other => other.to_string(),
        }
    }

    fn modify_column(
        &self,
        table: &str,
        column: &str,
        column_type: ColumnType,
        nullable: bool,
    ) -> Vec<String> {
        let table = self.quote(table);
        let column = self.quote(column);
        vec![
            format!(
                "ALTER TABLE {table} ALTER COLUMN {column} TYPE {}",
                self.column_type_sql(column_type)
            ),
            format!(
                "ALTER TABLE {table} ALTER COLUMN {column} {} NOT NULL",
                if nullable { "DROP" } else { "SET" }
            ),
        ]
    }
}

// ── SQLite ───────────────────────────────────────────────────────────────

/// Schema editor for SQLite.
///
/// SQLite cannot alter a column's type, so [`modify_column`] copies the data
/// into a replacement column and swaps it in. Foreign keys can only be
/// declared at `CREATE TABLE` time, so adding or dropping one renders nothing
/// and the task counts as not applicable.
///
/// [`modify_column`]: SchemaEditor::modify_column
#[derive(Debug, Clone, Copy)]
pub struct SqliteSchemaEditor;

impl SchemaEditor for SqliteSchemaEditor {
    fn driver_kind(&self) -> DriverKind {
        DriverKind::Sqlite
    }

    fn column_type_sql(&self, column_type: ColumnType) -> String {
        match column_type {
            ColumnType::Double => "REAL".into(),
            ColumnType::Json => "TEXT".into(),
            ColumnType::Uuid => "CHAR(36)".into(),
            other => other.to_string(),
        }
    }

    /// Add `<column>__new`, copy (truncating to the new width), drop the old
    /// column, rename. `NOT NULL` cannot be added this way and is not enforced.
    fn modify_column(
        &self,
        table: &str,
        column: &str,
        column_type: ColumnType,
        _nullable: bool,
    ) -> Vec<String> {
        let t = self.quote(table);
        let old = self.quote(column);
        let new = self.quote(&format!("{column}__new"));
        let copy = match column_type.width() {
            Some(width) => format!("SUBSTR({old}, 1, {width})"),
            None => old.clone(),
        };
        vec![
            format!(
                "ALTER TABLE {t} ADD COLUMN {new} {}",
                self.column_type_sql(column_type)
            ),
            format!("UPDATE {t} SET {new} = {copy}"),
            format!("ALTER TABLE {t} DROP COLUMN {old}"),
            format!("ALTER TABLE {t} RENAME COLUMN {new} TO {old}"),
        ]
    }

    fn add_foreign_key(
        &self,
        _table: &str,
        _name: &str,
        _columns: &[String],
        _references_table: &str,
        _references_columns: &[String],
        _on_delete: Option<ForeignKeyAction>,
    ) -> Vec<String> {
        Vec::new()
    }

    fn drop_foreign_key(&self, _table: &str, _name: &str) -> Vec<String> {
        Vec::new()
    }

    fn caveats(&self, kind: &TaskKind) -> Vec<String> {
        match kind {
            TaskKind::ModifyColumn {
                table,
                column,
                nullable: false,
                ..
            } => vec![format!(
                "{table}.{column} is rebuilt without NOT NULL; SQLite cannot add the constraint to an existing column"
            )],
            _ => Vec::new(),
        }
    }
}

// ── MySQL / MariaDB ──────────────────────────────────────────────────────

/// Schema editor for MySQL and MariaDB.
#[derive(Debug, Clone, Copy)]
pub struct MySqlSchemaEditor {
    pub kind: DriverKind,
}

impl SchemaEditor for MySqlSchemaEditor {
    fn driver_kind(&self) -> DriverKind {
        self.kind
    }

    fn column_type_sql(&self, column_type: ColumnType) -> String {
        match column_type {
            ColumnType::Integer => "INT".into(),
            ColumnType::Text => "LONGTEXT".into(),
            ColumnType::Timestamp => "DATETIME(6)".into(),
            ColumnType::Blob => "LONGBLOB".into(),
            ColumnType::Uuid => "CHAR(36)".into(),
            other => other.to_string(),
        }
    }

    fn modify_column(
        &self,
        table: &str,
        column: &str,
        column_type: ColumnType,
        nullable: bool,
    ) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} MODIFY COLUMN {} {}{}",
            self.quote(table),
            self.quote(column),
            self.column_type_sql(column_type),
            if nullable { " NULL" } else { " NOT NULL" }
        )]
    }

    fn drop_index(&self, table: &str, name: &str) -> Vec<String> {
        vec![format!(
            "DROP INDEX {} ON {}",
            self.quote(name),
            self.quote(table)
        )]
    }

    fn drop_foreign_key(&self, table: &str, name: &str) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} DROP FOREIGN KEY {}",
            self.quote(table),
            self.quote(name)
        )]
    }
}

// ── Oracle ───────────────────────────────────────────────────────────────

/// Schema editor for Oracle.
#[derive(Debug, Clone, Copy)]
pub struct OracleSchemaEditor;

impl SchemaEditor for OracleSchemaEditor {
    fn driver_kind(&self) -> DriverKind {
        DriverKind::Oracle
    }

    fn column_type_sql(&self, column_type: ColumnType) -> String {
        match column_type {
            ColumnType::SmallInt => "NUMBER(5)".into(),
            ColumnType::Integer => "NUMBER(10)".into(),
            ColumnType::BigInt => "NUMBER(19)".into(),
            ColumnType::Varchar(n) => format!("VARCHAR2({n})"),
            ColumnType::Text | ColumnType::Json => "CLOB".into(),
            ColumnType::Boolean => "NUMBER(1)".into(),
            ColumnType::Decimal(p, s) => format!("NUMBER({p},{s})"),
            ColumnType::Double => "BINARY_DOUBLE".into(),
            ColumnType::Uuid => "VARCHAR2(36)".into(),
            other => other.to_string(),
        }
    }

    fn modify_column(
        &self,
        table: &str,
        column: &str,
        column_type: ColumnType,
        nullable: bool,
    ) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} MODIFY ({} {}{})",
            self.quote(table),
            self.quote(column),
            self.column_type_sql(column_type),
            if nullable { " NULL" } else { " NOT NULL" }
        )]
    }

    fn add_column(&self, table: &str, column: &ColumnDef) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} ADD ({})",
            self.quote(table),
            self.column_sql(column)
        )]
    }

    // Oracle only spells out CASCADE and SET NULL; restricting is the default.
    fn on_delete_sql(&self, action: ForeignKeyAction) -> Option<&'static str> {
        match action {
            ForeignKeyAction::Cascade | ForeignKeyAction::SetNull => Some(action.as_sql()),
            ForeignKeyAction::Restrict | ForeignKeyAction::NoAction => None,
        }
    }
}

// ── SQL Server ───────────────────────────────────────────────────────────

/// Schema editor for Microsoft SQL Server.
#[derive(Debug, Clone, Copy)]
pub struct MsSqlSchemaEditor;

impl SchemaEditor for MsSqlSchemaEditor {
    fn driver_kind(&self) -> DriverKind {
        DriverKind::MsSql
    }

    fn column_type_sql(&self, column_type: ColumnType) -> String {
        match column_type {
            ColumnType::Integer => "INT".into(),
            ColumnType::Varchar(n) => format!("NVARCHAR({n})"),
            ColumnType::Char(n) => format!("NCHAR({n})"),
            ColumnType::Text | ColumnType::Json => "NVARCHAR(MAX)".into(),
            ColumnType::Boolean => "BIT".into(),
            ColumnType::Timestamp => "DATETIME2".into(),
            ColumnType::Double => "FLOAT".into(),
            ColumnType::Blob => "VARBINARY(MAX)".into(),
            ColumnType::Uuid => "UNIQUEIDENTIFIER".into(),
            other => other.to_string(),
        }
    }

    fn modify_column(
        &self,
        table: &str,
        column: &str,
        column_type: ColumnType,
        nullable: bool,
    ) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} ALTER COLUMN {} {}{}",
            self.quote(table),
            self.quote(column),
            self.column_type_sql(column_type),
            if nullable { " NULL" } else { " NOT NULL" }
        )]
    }

    fn add_column(&self, table: &str, column: &ColumnDef) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} ADD {}",
            self.quote(table),
            self.column_sql(column)
        )]
    }

    fn rename_column(&self, table: &str, from: &str, to: &str) -> Vec<String> {
        vec![format!(
            "EXEC sp_rename '{}.{}', '{}', 'COLUMN'",
            table.replace('\'', "''"),
            from.replace('\'', "''"),
            to.replace('\'', "''")
        )]
    }

    fn drop_index(&self, table: &str, name: &str) -> Vec<String> {
        vec![format!(
            "DROP INDEX {} ON {}",
            self.quote(name),
            self.quote(table)
        )]
    }
}

// ── H2 / Derby ───────────────────────────────────────────────────────────

/// Schema editor for the embedded JVM databases, H2 and Derby.
#[derive(Debug, Clone, Copy)]
pub struct AnsiSchemaEditor {
    pub kind: DriverKind,
}

impl SchemaEditor for AnsiSchemaEditor {
    fn driver_kind(&self) -> DriverKind {
        self.kind
    }

    fn column_type_sql(&self, column_type: ColumnType) -> String {
        match (self.kind, column_type) {
            (_, ColumnType::Text) => "CLOB".into(),
            (DriverKind::Derby, ColumnType::Json) => "CLOB".into(),
            (DriverKind::Derby, ColumnType::Uuid) => "CHAR(36)".into(),
            (DriverKind::H2, ColumnType::Double) => "DOUBLE PRECISION".into(),
            (_, other) => other.to_string(),
        }
    }

    fn modify_column(
        &self,
        table: &str,
        column: &str,
        column_type: ColumnType,
        nullable: bool,
    ) -> Vec<String> {
        let table = self.quote(table);
        let column = self.quote(column);
        vec![
            format!(
                "ALTER TABLE {table} ALTER COLUMN {column} SET DATA TYPE {}",
                self.column_type_sql(column_type)
            ),
            format!(
                "ALTER TABLE {table} ALTER COLUMN {column} {}",
                if nullable { "NULL" } else { "NOT NULL" }
            ),
        ]
    }

    fn rename_column(&self, table: &str, from: &str, to: &str) -> Vec<String> {
        let table = self.quote(table);
        let (from, to) = (self.quote(from), self.quote(to));
        match self.kind {
            DriverKind::Derby => vec![format!("RENAME COLUMN {table}.{from} TO {to}")],
            _ => vec![format!(
                "ALTER TABLE {table} ALTER COLUMN {from} RENAME TO {to}"
            )],
        }
    }
}

//! Task definitions from JSON and TOML.
//!
//! The [`TaskLoader`] reads task lists written by hand or generated by
//! tooling. JSON files hold either a bare array or `{"tasks": [...]}`; TOML
//! files use `[[tasks]]` tables. Order is preserved exactly as written; version
//! ordering is checked when the tasks are handed to the
//! [`Migrator`](crate::migrator::Migrator).
//!
//! ```toml
//! [[tasks]]
//! version = "V1"
//! description = "create widgets"
//! op = "create_table"
//! table = "widgets"
//! columns = [{ name = "id", type = "BIGINT", primary_key = true }]
//!
//! [[tasks]]
//! version = "V2"
//! description = "add name"
//! op = "add_column"
//! table = "widgets"
//! column = { name = "name", type = "VARCHAR(50)" }
//! ```
//!
//! A directory can hold several such files:
//!
//! ```text
//! migrations/
//!   001_initial.toml
//!   002_widgets.json
//! ```

use std::path::{Path, PathBuf};

use migrate_rs_core::{MigrateError, MigrateResult};
use serde::Deserialize;

use crate::task::MigrationTask;

#[derive(Deserialize)]
struct TaskFile {
    #[serde(default)]
    tasks: Vec<MigrationTask>,
}

/// Loads migration tasks from strings, files or a directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskLoader;

impl TaskLoader {
    /// Parses a JSON array of tasks, or an object with a `tasks` array.
    pub fn from_json_str(content: &str) -> MigrateResult<Vec<MigrationTask>> {
        let value: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| MigrateError::SerializationError(format!("Invalid task JSON: {e}")))?;
        let tasks = if value.is_array() {
            serde_json::from_value::<Vec<MigrationTask>>(value)
        } else {
            serde_json::from_value::<TaskFile>(value).map(|file| file.tasks)
        };
        tasks.map_err(|e| MigrateError::SerializationError(format!("Invalid task: {e}")))
    }

    /// Parses a TOML document of `[[tasks]]` tables.
    pub fn from_toml_str(content: &str) -> MigrateResult<Vec<MigrationTask>> {
        let file: TaskFile = toml::from_str(content)
            .map_err(|e| MigrateError::SerializationError(format!("Invalid task TOML: {e}")))?;
        Ok(file.tasks)
    }

    /// Loads a `.json` or `.toml` file.
    pub fn from_path(path: impl AsRef<Path>) -> MigrateResult<Vec<MigrationTask>> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match extension(path).as_deref() {
            Some("json") => Self::from_json_str(&content),
            Some("toml") => Self::from_toml_str(&content),
            _ => Err(MigrateError::ConfigurationError(format!(
                "Unsupported task file '{}': expected .json or .toml",
                path.display()
            ))),
        }
    }

    /// Loads every `.json` and `.toml` file in a directory, in file-name order.
    ///
    /// Other files are ignored. A missing directory yields no tasks.
    pub fn from_dir(dir: impl AsRef<Path>) -> MigrateResult<Vec<MigrationTask>> {
        let dir = dir.as_ref();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file() && matches!(extension(path).as_deref(), Some("json" | "toml"))
            })
            .collect();
        files.sort();

        let mut tasks = Vec::new();
        for file in files {
            tracing::debug!(path = %file.display(), "loading task file");
            tasks.extend(Self::from_path(&file)?);
        }
        Ok(tasks)
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

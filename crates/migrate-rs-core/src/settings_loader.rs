//! Settings loading from configuration files.
//!
//! This module provides functions to load [`MigratorSettings`] from TOML and
//! JSON files and to apply environment variable overrides.
//!
//! ## Loading Order
//!
//! 1. Start with default settings.
//! 2. Load from a TOML or JSON file (overriding defaults).
//! 3. Apply environment variable overrides (highest priority).
//!
//! ## Environment Variable Mapping
//!
//! | Env Var | Setting |
//! |---|---|
//! | `MIGRATE_DRIVER` | `driver` |
//! | `MIGRATE_URL` | `url` |
//! | `MIGRATE_USERNAME` | `username` |
//! | `MIGRATE_PASSWORD` | `password` |
//! | `MIGRATE_DRY_RUN` | `dry_run` |
//! | `MIGRATE_DESTRUCTIVE_POLICY` | `destructive_policy` |
//! | `MIGRATE_NO_COLUMN_SHRINK` | `no_column_shrink` |
//! | `MIGRATE_HISTORY_TABLE` | `history_table` |
//! | `MIGRATE_LOCK_TIMEOUT_SECS` | `lock_timeout_secs` |
//! | `MIGRATE_LOCK_LEASE_SECS` | `lock_lease_secs` |
//! | `MIGRATE_BASELINE_ON_MIGRATE` | `baseline_on_migrate` |
//! | `MIGRATE_BASELINE_VERSION` | `baseline_version` |
//! | `MIGRATE_LOG_LEVEL` | `log_level` |
//!
//! ## Examples
//!
//! ```rust,no_run
//! use migrate_rs_core::settings_loader;
//!
//! let settings = settings_loader::from_toml_file_with_env("config/migrate.toml").unwrap();
//! ```

use std::path::Path;

use crate::error::MigrateError;
use crate::settings::MigratorSettings;

/// Loads settings from a TOML string.
///
/// Any fields not present in the TOML keep their default values.
///
/// # Errors
///
/// Returns an error if the TOML is malformed or cannot be deserialized.
pub fn from_toml_str(toml_str: &str) -> Result<MigratorSettings, MigrateError> {
    let toml_value: toml::Value = toml::from_str(toml_str)
        .map_err(|e| MigrateError::ConfigurationError(format!("Failed to parse TOML: {e}")))?;

    merge_with_defaults(toml_to_json(toml_value), "TOML")
}

/// Loads settings from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the TOML is malformed.
pub fn from_toml_file(path: impl AsRef<Path>) -> Result<MigratorSettings, MigrateError> {
    let content = read_config_file(path.as_ref(), "TOML")?;
    from_toml_str(&content)
}

/// Loads settings from a TOML file and then applies environment variable overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the TOML is malformed.
pub fn from_toml_file_with_env(path: impl AsRef<Path>) -> Result<MigratorSettings, MigrateError> {
    let mut settings = from_toml_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads settings from a JSON string.
///
/// # Errors
///
/// Returns an error if the JSON is malformed or cannot be deserialized.
pub fn from_json_str(json_str: &str) -> Result<MigratorSettings, MigrateError> {
    let json_value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| MigrateError::ConfigurationError(format!("Failed to parse JSON: {e}")))?;

    merge_with_defaults(json_value, "JSON")
}

/// Loads settings from a JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the JSON is malformed.
pub fn from_json_file(path: impl AsRef<Path>) -> Result<MigratorSettings, MigrateError> {
    let content = read_config_file(path.as_ref(), "JSON")?;
    from_json_str(&content)
}

/// Loads settings from a JSON file and then applies environment variable overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the JSON is malformed.
pub fn from_json_file_with_env(path: impl AsRef<Path>) -> Result<MigratorSettings, MigrateError> {
    let mut settings = from_json_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads settings from just environment variables (starting from defaults).
pub fn from_env() -> MigratorSettings {
    let mut settings = MigratorSettings::default();
    apply_env_overrides(&mut settings);
    settings
}

/// Applies `MIGRATE_*` environment variable overrides to a settings struct.
///
/// Boolean variables accept "true"/"1"/"yes" as true, anything else as false.
/// Unparseable numeric or policy values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut MigratorSettings) {
    if let Ok(val) = std::env::var("MIGRATE_DRIVER") {
        settings.driver = Some(val).filter(|v| !v.trim().is_empty());
    }

    if let Ok(val) = std::env::var("MIGRATE_URL") {
        settings.url = val;
    }

    if let Ok(val) = std::env::var("MIGRATE_USERNAME") {
        settings.username = val;
    }

    if let Ok(val) = std::env::var("MIGRATE_PASSWORD") {
        settings.password = val;
    }

    if let Ok(val) = std::env::var("MIGRATE_DRY_RUN") {
        settings.dry_run = parse_bool(&val);
    }

    if let Ok(val) = std::env::var("MIGRATE_DESTRUCTIVE_POLICY") {
        match val.parse() {
            Ok(policy) => settings.destructive_policy = policy,
            Err(e) => tracing::warn!(error = %e, "ignoring MIGRATE_DESTRUCTIVE_POLICY"),
        }
    }

    if let Ok(val) = std::env::var("MIGRATE_NO_COLUMN_SHRINK") {
        settings.no_column_shrink = parse_bool(&val);
    }

    if let Ok(val) = std::env::var("MIGRATE_HISTORY_TABLE") {
        settings.history_table = val;
    }

    if let Ok(val) = std::env::var("MIGRATE_LOCK_TIMEOUT_SECS") {
        match val.parse::<u64>() {
            Ok(secs) => settings.lock_timeout_secs = secs,
            Err(e) => tracing::warn!(error = %e, "ignoring MIGRATE_LOCK_TIMEOUT_SECS"),
        }
    }

    if let Ok(val) = std::env::var("MIGRATE_LOCK_LEASE_SECS") {
        match val.parse::<u64>() {
            Ok(secs) => settings.lock_lease_secs = secs,
            Err(e) => tracing::warn!(error = %e, "ignoring MIGRATE_LOCK_LEASE_SECS"),
        }
    }

    if let Ok(val) = std::env::var("MIGRATE_BASELINE_ON_MIGRATE") {
        settings.baseline_on_migrate = parse_bool(&val);
    }

    if let Ok(val) = std::env::var("MIGRATE_BASELINE_VERSION") {
        settings.baseline_version = val;
    }

    if let Ok(val) = std::env::var("MIGRATE_LOG_LEVEL") {
        settings.log_level = val;
    }
}

// ============================================================
// Helpers
// ============================================================

fn parse_bool(val: &str) -> bool {
    matches!(val.to_lowercase().as_str(), "true" | "1" | "yes")
}

fn read_config_file(path: &Path, format: &str) -> Result<String, MigrateError> {
    std::fs::read_to_string(path).map_err(|e| {
        MigrateError::ConfigurationError(format!(
            "Failed to read {format} file '{}': {e}",
            path.display()
        ))
    })
}

/// Overlays a parsed document onto the serialized defaults and deserializes
/// the result, so unspecified keys keep their default values.
fn merge_with_defaults(
    value: serde_json::Value,
    format: &str,
) -> Result<MigratorSettings, MigrateError> {
    let default_json = serde_json::to_value(MigratorSettings::default()).map_err(|e| {
        MigrateError::ConfigurationError(format!("Failed to serialize default settings: {e}"))
    })?;

    let merged = merge_json(default_json, value);
    serde_json::from_value(merged).map_err(|e| {
        MigrateError::ConfigurationError(format!(
            "Failed to deserialize settings from {format}: {e}"
        ))
    })
}

/// Converts a TOML value to a `serde_json::Value`.
fn toml_to_json(value: toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(b),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
        toml::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => {
            let map: serde_json::Map<String, serde_json::Value> = table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect();
            serde_json::Value::Object(map)
        }
    }
}

/// Deep-merges two JSON values. The `override_val` takes precedence.
fn merge_json(base: serde_json::Value, override_val: serde_json::Value) -> serde_json::Value {
    match (base, override_val) {
        (serde_json::Value::Object(mut base_map), serde_json::Value::Object(override_map)) => {
            for (key, override_v) in override_map {
                let merged = if let Some(base_v) = base_map.remove(&key) {
                    merge_json(base_v, override_v)
                } else {
                    override_v
                };
                base_map.insert(key, merged);
            }
            serde_json::Value::Object(base_map)
        }
        (_, override_val) => override_val,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::DestructiveChangePolicy;

    // ── TOML loading ────────────────────────────────────────────────

    #[test]
    fn test_from_toml_str_basic() {
        let toml = r#"
            driver = "org.postgresql.Driver"
            url = "jdbc:postgresql://localhost:5432/fhir"
            username = "admin"
            dry_run = true
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert_eq!(settings.driver.as_deref(), Some("org.postgresql.Driver"));
        assert_eq!(settings.url, "jdbc:postgresql://localhost:5432/fhir");
        assert_eq!(settings.username, "admin");
        assert!(settings.dry_run);
        // Defaults preserved
        assert_eq!(settings.history_table, "migrate_schema_history");
        assert_eq!(settings.lock_timeout_secs, 60);
    }

    #[test]
    fn test_from_toml_str_policy_and_options() {
        let toml = r#"
            destructive_policy = "reject"
            no_column_shrink = true

            [options]
            statement_timeout = "30s"
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert_eq!(settings.destructive_policy, DestructiveChangePolicy::Reject);
        assert!(settings.no_column_shrink);
        assert_eq!(settings.options.get("statement_timeout").unwrap(), "30s");
    }

    #[test]
    fn test_from_toml_str_baseline() {
        let toml = r#"
            baseline_on_migrate = true
            baseline_version = "3.1"
            lock_lease_secs = 30
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert!(settings.baseline_on_migrate);
        assert_eq!(settings.baseline_version, "3.1");
        assert_eq!(settings.lock_lease_secs, 30);
    }

    #[test]
    fn test_from_toml_str_empty() {
        let settings = from_toml_str("").unwrap();
        assert!(settings.driver.is_none());
        assert!(!settings.dry_run);
    }

    #[test]
    fn test_from_toml_str_invalid() {
        let result = from_toml_str("[[invalid toml content");
        assert!(matches!(result, Err(MigrateError::ConfigurationError(_))));
    }

    #[test]
    fn test_from_toml_str_bad_policy() {
        let result = from_toml_str(r#"destructive_policy = "yolo""#);
        assert!(result.is_err());
    }

    // ── JSON loading ────────────────────────────────────────────────

    #[test]
    fn test_from_json_str_basic() {
        let json = r#"{
            "url": "sqlite:/tmp/app.db",
            "destructive_policy": "allow",
            "log_level": "debug"
        }"#;

        let settings = from_json_str(json).unwrap();
        assert_eq!(settings.url, "sqlite:/tmp/app.db");
        assert_eq!(settings.destructive_policy, DestructiveChangePolicy::Allow);
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.history_table, "migrate_schema_history");
    }

    #[test]
    fn test_from_json_str_empty_object() {
        let settings = from_json_str("{}").unwrap();
        assert!(settings.url.is_empty());
    }

    #[test]
    fn test_from_json_str_invalid() {
        let result = from_json_str("{invalid json");
        assert!(result.is_err());
    }

    // ── File loading ────────────────────────────────────────────────

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migrate.toml");
        std::fs::write(&path, "url = \"sqlite::memory:\"\nhistory_table = \"hist\"\n").unwrap();

        let settings = from_toml_file(&path).unwrap();
        assert_eq!(settings.url, "sqlite::memory:");
        assert_eq!(settings.history_table, "hist");
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migrate.json");
        std::fs::write(&path, r#"{"lock_timeout_secs": 5}"#).unwrap();

        let settings = from_json_file(&path).unwrap();
        assert_eq!(settings.lock_timeout_secs, 5);
    }

    #[test]
    fn test_from_toml_file_missing() {
        let result = from_toml_file("/nonexistent/path/migrate.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_from_json_file_missing() {
        let result = from_json_file("/nonexistent/path/migrate.json");
        assert!(result.is_err());
    }

    // ── Environment variable overrides ──────────────────────────────
    //
    // Each test touches a distinct variable so they stay independent when
    // the harness runs them in parallel.

    #[test]
    fn test_apply_env_overrides_url() {
        let mut settings = MigratorSettings::default();
        std::env::set_var("MIGRATE_URL", "postgres://db/fhir");
        apply_env_overrides(&mut settings);
        assert_eq!(settings.url, "postgres://db/fhir");
        std::env::remove_var("MIGRATE_URL");
    }

    #[test]
    fn test_apply_env_overrides_dry_run() {
        let mut settings = MigratorSettings::default();
        std::env::set_var("MIGRATE_DRY_RUN", "yes");
        apply_env_overrides(&mut settings);
        assert!(settings.dry_run);
        std::env::remove_var("MIGRATE_DRY_RUN");
    }

    #[test]
    fn test_apply_env_overrides_policy() {
        let mut settings = MigratorSettings::default();
        std::env::set_var("MIGRATE_DESTRUCTIVE_POLICY", "reject");
        apply_env_overrides(&mut settings);
        assert_eq!(settings.destructive_policy, DestructiveChangePolicy::Reject);
        std::env::remove_var("MIGRATE_DESTRUCTIVE_POLICY");
    }

    #[test]
    fn test_apply_env_overrides_invalid_lock_timeout() {
        let mut settings = MigratorSettings::default();
        std::env::set_var("MIGRATE_LOCK_TIMEOUT_SECS", "soon");
        apply_env_overrides(&mut settings);
        assert_eq!(settings.lock_timeout_secs, 60);
        std::env::remove_var("MIGRATE_LOCK_TIMEOUT_SECS");
    }

    #[test]
    fn test_apply_env_overrides_baseline() {
        let mut settings = MigratorSettings::default();
        std::env::set_var("MIGRATE_BASELINE_ON_MIGRATE", "1");
        std::env::set_var("MIGRATE_BASELINE_VERSION", "7");
        apply_env_overrides(&mut settings);
        assert!(settings.baseline_on_migrate);
        assert_eq!(settings.baseline_version, "7");
        std::env::remove_var("MIGRATE_BASELINE_ON_MIGRATE");
        std::env::remove_var("MIGRATE_BASELINE_VERSION");
    }

    #[test]
    fn test_apply_env_overrides_empty_driver_means_autodetect() {
        let mut settings = MigratorSettings {
            driver: Some("org.h2.Driver".to_string()),
            ..MigratorSettings::default()
        };
        std::env::set_var("MIGRATE_DRIVER", "  ");
        apply_env_overrides(&mut settings);
        assert!(settings.driver.is_none());
        std::env::remove_var("MIGRATE_DRIVER");
    }

    #[test]
    fn test_toml_with_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migrate.toml");
        std::fs::write(&path, "history_table = \"from_toml\"\n").unwrap();

        std::env::set_var("MIGRATE_HISTORY_TABLE", "from_env");
        let settings = from_toml_file_with_env(&path).unwrap();
        assert_eq!(settings.history_table, "from_env");
        std::env::remove_var("MIGRATE_HISTORY_TABLE");
    }

    // ── merge_json helper ───────────────────────────────────────────

    #[test]
    fn test_merge_json_nested() {
        let base = serde_json::json!({"outer": {"a": 1, "b": 2}});
        let over = serde_json::json!({"outer": {"b": 3}});
        let merged = merge_json(base, over);
        assert_eq!(merged["outer"]["a"], 1);
        assert_eq!(merged["outer"]["b"], 3);
    }

    #[test]
    fn test_toml_to_json() {
        let toml_val: toml::Value = toml::from_str(
            r#"
            name = "test"
            count = 42
            flag = true
            [nested]
            key = "value"
        "#,
        )
        .unwrap();

        let json = toml_to_json(toml_val);
        assert_eq!(json["name"], "test");
        assert_eq!(json["count"], 42);
        assert_eq!(json["flag"], true);
        assert_eq!(json["nested"]["key"], "value");
    }
}

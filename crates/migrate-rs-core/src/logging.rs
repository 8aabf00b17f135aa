//! Logging integration for migrate-rs.
//!
//! Provides helpers for configuring [`tracing`]-based logging from
//! [`MigratorSettings`](crate::settings::MigratorSettings) and for creating
//! per-run and per-task spans.

use crate::settings::MigratorSettings;

/// Sets up the global tracing subscriber based on the given settings.
///
/// The filter is read from `settings.log_level` (e.g. "debug", "info",
/// "migrate_rs_db_migrations=trace"). With `settings.debug` a pretty,
/// human-readable format is used; otherwise a structured JSON format is used.
///
/// Installing a second subscriber is a no-op.
pub fn setup_logging(settings: &MigratorSettings) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.debug {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .pretty()
            .try_init()
            .ok();
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .ok();
    }
}

/// Creates a tracing span for one migration run.
///
/// # Examples
///
/// ```
/// use migrate_rs_core::logging::run_span;
///
/// let span = run_span("5f0c8d1e", "sqlite", false);
/// let _guard = span.enter();
/// tracing::info!("resolving pending tasks");
/// ```
pub fn run_span(run_id: &str, vendor: &str, dry_run: bool) -> tracing::Span {
    tracing::info_span!("migrate", run = run_id, vendor = vendor, dry_run = dry_run)
}

/// Creates a tracing span for a single task inside a run.
pub fn task_span(version: &str) -> tracing::Span {
    tracing::debug_span!("task", version = version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_logging_twice_is_harmless() {
        let settings = MigratorSettings {
            log_level: "not a [valid filter".to_string(),
            ..MigratorSettings::default()
        };
        setup_logging(&settings);
        setup_logging(&MigratorSettings::default());
    }

    #[test]
    fn test_spans_can_be_entered() {
        let run = run_span("r1", "postgresql", true);
        let _run_guard = run.enter();
        let task = task_span("1.2");
        let _task_guard = task.enter();
        tracing::info!("inside task");
    }
}

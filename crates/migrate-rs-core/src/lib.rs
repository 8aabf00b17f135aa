//! # migrate-rs-core
//!
//! Core types, settings, and error types for the migrate-rs engine.
//! This crate has no database dependencies and provides the foundation for all other crates.
//!
//! ## Modules
//!
//! - [`error`] - Error types and result aliases
//! - [`settings`] - Migrator settings and the destructive-change policy
//! - [`settings_loader`] - TOML/JSON/environment settings loading
//! - [`logging`] - Tracing-based logging integration

pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use error::{MigrateError, MigrateResult};
pub use settings::{DestructiveChangePolicy, MigratorSettings, DEFAULT_HISTORY_TABLE};

//! Configuration module for Quarry.
//!
//! Handles `quarry.toml`: default dialect, per-connection dialects and
//! translator limits.

mod settings;

pub use settings::{
    expand_env_vars, CompileSettings, ConnectionSettings, Settings, SettingsError,
    TranslatorSettings, CONFIG_ENV, CONFIG_FILE, DEFAULT_MAX_IMPORT_DEPTH,
};

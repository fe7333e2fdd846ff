//! Configuration module.
//!
//! Handles runtime settings and environment variable expansion.

mod settings;

pub use settings::{
    expand_env_vars, DatabaseSettings, LoggingSettings, RuntimeSettings, SchemaSettings,
    SettingsError,
};

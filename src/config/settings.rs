//! TOML-based configuration for the runtime host.
//!
//! Supports a config file (relata.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [database]
//! path = "${DATA_DIR}/app.sqlite"
//!
//! [schema]
//! create_tables = true
//! if_not_exists = true
//!
//! [logging]
//! log_statements = false
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Backing database.
    pub database: DatabaseSettings,

    /// Table creation at setup.
    pub schema: SchemaSettings,

    /// Statement logging.
    pub logging: LoggingSettings,
}

/// Database location.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// File path (supports ${ENV_VAR} expansion). `None` or `:memory:` is in-memory.
    pub path: Option<String>,
}

impl DatabaseSettings {
    /// The database path with environment variables expanded, `None` for in-memory.
    pub fn resolved_path(&self) -> Result<Option<String>, SettingsError> {
        match self.path.as_deref() {
            None | Some(":memory:") => Ok(None),
            Some(path) => expand_env_vars(path).map(Some),
        }
    }
}

/// Schema setup options.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchemaSettings {
    /// Create tables for the compiled schema during setup.
    pub create_tables: bool,

    /// Emit `IF NOT EXISTS` on CREATE TABLE.
    pub if_not_exists: bool,
}

impl Default for SchemaSettings {
    fn default() -> Self {
        Self {
            create_tables: true,
            if_not_exists: true,
        }
    }
}

/// Logging options.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Forward every executed statement to the `log` facade.
    pub log_statements: bool,
}

impl RuntimeSettings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse settings from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(content)?)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `RELATA_CONFIG`
    /// 2. `./relata.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("RELATA_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("relata.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        // Return defaults if no config file found
        Ok(RuntimeSettings::default())
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        if chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
            let value =
                env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
            result.push_str(&value);
        } else {
            // $VAR (ends at non-alphanumeric/underscore)
            let mut var_name = String::new();
            while let Some(&ch) = chars.peek() {
                if ch.is_alphanumeric() || ch == '_' {
                    var_name.push(ch);
                    chars.next();
                } else {
                    break;
                }
            }
            if var_name.is_empty() {
                // Just a lone $, keep it
                result.push('$');
            } else {
                let value = env::var(&var_name)
                    .map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
                result.push_str(&value);
            }
        }
    }

    Ok(result)
}

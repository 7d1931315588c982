//! TOML-based configuration.
//!
//! Example configuration:
//! ```toml
//! [sql]
//! dialect = "snowflake"
//! limit = 1000
//! offset = 0
//!
//! [document]
//! domain_field = "domain"
//! collection = "domains"
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::sql::Dialect;

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "STEPFORGE_CONFIG";

/// File looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "stepforge.toml";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub sql: SqlSettings,
    pub document: DocumentSettings,
}

/// Relational backend settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SqlSettings {
    /// Target dialect.
    pub dialect: Dialect,

    /// Row limit of the final projection.
    pub limit: Option<u64>,

    /// Rows skipped by the final projection.
    pub offset: Option<u64>,
}

/// Document backend settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DocumentSettings {
    /// Field holding the domain name of each document; the `domain` step
    /// becomes a `$match` on it.
    pub domain_field: String,

    /// Collection read by nested pipelines (`$unionWith`, `$lookup`).
    pub collection: String,
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            domain_field: "domain".to_string(),
            collection: "domains".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `STEPFORGE_CONFIG`
    /// 2. `./stepforge.toml`
    ///
    /// Falls back to defaults when neither exists.
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var(CONFIG_ENV_VAR) {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        Ok(Settings::default())
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.document.domain_field.trim().is_empty() {
            return Err(SettingsError::InvalidConfig(
                "document.domain_field must not be empty".into(),
            ));
        }
        if self.document.collection.trim().is_empty() {
            return Err(SettingsError::InvalidConfig(
                "document.collection must not be empty".into(),
            ));
        }
        if self.sql.limit == Some(0) {
            return Err(SettingsError::InvalidConfig(
                "sql.limit must be positive".into(),
            ));
        }
        Ok(())
    }
}

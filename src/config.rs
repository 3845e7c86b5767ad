//! Configuration for demonlist-engine

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::db::points::PointFormula;
use crate::db::tables::TableNames;
use crate::error::{ListError, Result};

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("demonlist-engine")
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the database and config file
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Database file name inside `storage_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// How long a writer waits on a locked database before failing
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// The list this engine maintains
    #[serde(default)]
    pub list: ListConfig,
}

/// Immutable per-list settings handed to the engine at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListConfig {
    /// List name, used in logs and as the key of the stored formula
    #[serde(default = "default_list_name")]
    pub name: String,

    /// Share of the member levels' points a completed pack is worth
    #[serde(default = "default_pack_multiplier")]
    pub pack_multiplier: f64,

    /// Formula used when none has been stored yet
    #[serde(default)]
    pub default_formula: PointFormula,

    #[serde(default)]
    pub tables: TableNames,
}

fn default_database_file() -> String {
    "demonlist.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_list_name() -> String {
    "aredl".to_string()
}

fn default_pack_multiplier() -> f64 {
    0.5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            database_file: default_database_file(),
            busy_timeout_ms: default_busy_timeout_ms(),
            list: ListConfig::default(),
        }
    }
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            name: default_list_name(),
            pack_multiplier: default_pack_multiplier(),
            default_formula: PointFormula::default(),
            tables: TableNames::default(),
        }
    }
}

impl ListConfig {
    /// Check the settings before they reach any SQL
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ListError::Config("list name must not be empty".to_string()));
        }
        if !self.pack_multiplier.is_finite() || self.pack_multiplier < 0.0 {
            return Err(ListError::Config(format!(
                "pack multiplier must be a non-negative number, got {}",
                self.pack_multiplier
            )));
        }
        self.default_formula.validate()?;
        self.tables.validate()
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ListError::Config(format!("failed to read {:?}: {}", path.as_ref(), e)))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| ListError::Config(format!("failed to parse config: {}", e)))?;
        config.list.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ListError::Config(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path.as_ref(), content)
            .map_err(|e| ListError::Config(format!("failed to write {:?}: {}", path.as_ref(), e)))
    }

    /// Get database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join(&self.database_file)
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(config.list.validate().is_ok());
        assert_eq!(config.list.pack_multiplier, 0.5);
        assert!(config.database_path().ends_with("demonlist.db"));
    }

    #[test]
    fn test_roundtrip_through_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage_dir = dir.path().to_path_buf();
        config.list.tables = TableNames::prefixed("aredl");
        config.save(config.config_path()).unwrap();

        let loaded = Config::load(config.config_path()).unwrap();
        assert_eq!(loaded.list, config.list);
        assert_eq!(loaded.storage_dir, config.storage_dir);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("busy_timeout_ms = 100\n[list]\nname = \"pemonlist\"\n").unwrap();
        assert_eq!(config.busy_timeout_ms, 100);
        assert_eq!(config.list.name, "pemonlist");
        assert_eq!(config.list.pack_multiplier, 0.5);
        assert_eq!(config.list.tables, TableNames::default());
    }

    #[test]
    fn test_negative_multiplier_rejected() {
        let list = ListConfig {
            pack_multiplier: -1.0,
            ..Default::default()
        };
        assert!(matches!(list.validate(), Err(ListError::Config(_))));
    }
}

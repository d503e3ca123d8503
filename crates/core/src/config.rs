//! Runtime configuration for Stowage
//!
//! `StowageConfig` is read from a TOML file. Every section is optional and
//! falls back to its defaults, so an empty file is a valid configuration.
//!
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [relationships]
//! keep_reference_default = true
//!
//! [transaction_log]
//! enabled = true
//! table = "transaction_log"
//! ```

use crate::error::{StowageError, StowageResult};
use crate::traits::Validatable;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// StowageConfig
// ============================================================================

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StowageConfig {
    /// Log output settings
    pub logging: LoggingConfig,

    /// Relationship resolution defaults
    pub relationships: RelationshipConfig,

    /// Collection reconciliation settings
    pub collections: CollectionConfig,

    /// Transaction log side effects
    pub transaction_log: TransactionLogConfig,
}

impl StowageConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> StowageResult<Self> {
        let config: StowageConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load_from_file(path: impl AsRef<Path>) -> StowageResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| StowageError::FileRead {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Serialize back to TOML
    pub fn to_toml_string(&self) -> StowageResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| StowageError::with_context("Serializing configuration", e.to_string()))
    }
}

impl Validatable for StowageConfig {
    fn validate(&self) -> StowageResult<()> {
        self.logging.validate()?;
        self.transaction_log.validate()
    }
}

// ============================================================================
// LoggingConfig
// ============================================================================

/// Log output settings consumed by the binary's subscriber setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter level (`trace`, `debug`, `info`, `warn`, `error`)
    pub level: String,

    /// Include the event target in log lines
    pub with_target: bool,
}

impl LoggingConfig {
    const LEVELS: [&'static str; 5] = ["trace", "debug", "info", "warn", "error"];
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: false,
        }
    }
}

impl Validatable for LoggingConfig {
    fn validate(&self) -> StowageResult<()> {
        if !Self::LEVELS.contains(&self.level.to_lowercase().as_str()) {
            return Err(StowageError::configuration(format!(
                "unknown log level '{}', expected one of {}",
                self.level,
                Self::LEVELS.join(", ")
            )));
        }
        Ok(())
    }
}

// ============================================================================
// RelationshipConfig
// ============================================================================

/// Defaults applied to relationship definitions that do not say otherwise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationshipConfig {
    /// Cache related objects unless a definition opts out
    pub keep_reference_default: bool,
}

impl Default for RelationshipConfig {
    fn default() -> Self {
        Self {
            keep_reference_default: true,
        }
    }
}

// ============================================================================
// CollectionConfig
// ============================================================================

/// Collection reconciliation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Keep in-memory values of dirty objects when a refresh reloads their row
    pub refresh_skips_dirty: bool,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            refresh_skips_dirty: true,
        }
    }
}

// ============================================================================
// TransactionLogConfig
// ============================================================================

/// Transaction log rows written alongside every commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionLogConfig {
    /// Write a log row per committed business object
    pub enabled: bool,

    /// Target table (class name) for log rows
    pub table: String,
}

impl Default for TransactionLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            table: "transaction_log".to_string(),
        }
    }
}

impl Validatable for TransactionLogConfig {
    fn validate(&self) -> StowageResult<()> {
        if self.enabled && self.table.trim().is_empty() {
            return Err(StowageError::configuration(
                "transaction_log.table cannot be empty when the log is enabled",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = StowageConfig::from_toml_str("").unwrap();
        assert_eq!(config, StowageConfig::default());
        assert_eq!(config.logging.level, "info");
        assert!(config.relationships.keep_reference_default);
        assert!(config.collections.refresh_skips_dirty);
        assert!(!config.transaction_log.enabled);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config = StowageConfig::from_toml_str(
            r#"
            [logging]
            level = "debug"

            [transaction_log]
            enabled = true
            "#,
        )
        .unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.with_target);
        assert!(config.transaction_log.enabled);
        assert_eq!(config.transaction_log.table, "transaction_log");
    }

    #[test]
    fn test_invalid_level_rejected() {
        let err = StowageConfig::from_toml_str("[logging]\nlevel = \"loud\"").unwrap_err();
        assert!(err.is_developer_error());
    }

    #[test]
    fn test_enabled_log_requires_table() {
        let err = StowageConfig::from_toml_str("[transaction_log]\nenabled = true\ntable = \"\"")
            .unwrap_err();
        assert!(matches!(err, StowageError::Configuration(_)));
    }

    #[test]
    fn test_malformed_toml() {
        let err = StowageConfig::from_toml_str("[logging\nlevel=").unwrap_err();
        assert!(matches!(err, StowageError::TomlParse(_)));
    }

    #[test]
    fn test_load_from_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stowage.toml");
        let mut config = StowageConfig::default();
        config.relationships.keep_reference_default = false;
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = StowageConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file() {
        let err = StowageConfig::load_from_file("/nonexistent/stowage.toml").unwrap_err();
        assert!(err.is_io());
    }
}

//! Service configuration.
//!
//! Loaded from a JSON file; every field has a default so a missing or
//! partial file still yields a usable configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConfig {
    /// SQLite database location; `None` means the default path under
    /// the home directory.
    pub database_path: Option<PathBuf>,
    /// Hours a terminal task is kept before purging.
    pub retention_hours: i64,
    /// Seconds between background sync passes.
    pub sync_interval_secs: u64,
    /// Broadcast channel capacity for task snapshots.
    pub broadcast_capacity: usize,
    pub parser: ParserConfig,
    pub ai: AiConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            retention_hours: 24,
            sync_interval_secs: 300,
            broadcast_capacity: 100,
            parser: ParserConfig::default(),
            ai: AiConfig::default(),
        }
    }
}

/// Parser behavior switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParserConfig {
    pub tolerate_typos: bool,
    pub detect_partial_names: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            tolerate_typos: true,
            detect_partial_names: true,
        }
    }
}

/// Text-generation service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AiConfig {
    /// `generateContent`-style endpoint; empty disables refinement.
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub temperature: f64,
    pub top_p: f64,
    pub max_output_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: None,
            temperature: 0.2,
            top_p: 0.9,
            max_output_tokens: 1024,
            request_timeout_secs: 30,
        }
    }
}

/// Loads configuration from a JSON file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ServiceConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<ServiceConfig, ConfigError> {
    let config: ServiceConfig = serde_json::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &ServiceConfig) -> Result<(), ConfigError> {
    if config.retention_hours <= 0 {
        return Err(ConfigError::Validation {
            message: format!("retentionHours must be positive, got {}", config.retention_hours),
        });
    }
    if config.broadcast_capacity == 0 {
        return Err(ConfigError::Validation {
            message: "broadcastCapacity must be at least 1".to_string(),
        });
    }
    if config.ai.request_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "ai.requestTimeoutSecs must be at least 1".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.retention_hours, 24);
        assert_eq!(config.ai.request_timeout_secs, 30);
        assert!(config.parser.tolerate_typos);
        assert!(config.ai.endpoint.is_empty());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = load_config_from_str(r#"{"retentionHours": 48}"#).unwrap();
        assert_eq!(config.retention_hours, 48);
        assert_eq!(config.sync_interval_secs, 300);
        assert!(config.parser.detect_partial_names);
    }

    #[test]
    fn test_nested_overrides() {
        let config = load_config_from_str(
            r#"{"ai": {"endpoint": "http://localhost:8080/generate", "requestTimeoutSecs": 5},
                "parser": {"tolerateTypos": false}}"#,
        )
        .unwrap();
        assert_eq!(config.ai.endpoint, "http://localhost:8080/generate");
        assert_eq!(config.ai.request_timeout_secs, 5);
        assert!(!config.parser.tolerate_typos);
        assert!(config.parser.detect_partial_names);
    }

    #[test]
    fn test_invalid_retention_rejected() {
        assert!(load_config_from_str(r#"{"retentionHours": 0}"#).is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"broadcastCapacity": 32}"#).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.broadcast_capacity, 32);

        assert!(load_config(dir.path().join("missing.json")).is_err());
    }
}

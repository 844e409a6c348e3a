//! Daemon configuration
//!
//! Read once at startup from `WebRPAConfig.json` in the working directory.
//! A missing file yields the defaults; a present-but-malformed file is a
//! startup error (launcher exit code 1).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "WebRPAConfig.json";

/// Browser profile directory handed to persistent-browser sessions.
pub const BROWSER_DATA_DIR: &str = "browser_data";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed config {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    pub reload: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            reload: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5173,
        }
    }
}

fn default_framework_hub() -> EndpointConfig {
    EndpointConfig {
        host: "0.0.0.0".into(),
        port: 3000,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub frontend: EndpointConfig,
    #[serde(rename = "frameworkHub")]
    pub framework_hub: EndpointConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            frontend: EndpointConfig::default(),
            framework_hub: default_framework_hub(),
        }
    }
}

impl AppConfig {
    /// Load from an explicit path, or `WebRPAConfig.json` in the working
    /// directory. Absent file = defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
        if !path.exists() {
            debug!(path = %path.display(), "AppConfig::load: no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config = serde_json::from_str(&content).map_err(|source| ConfigError::Malformed { path, source })?;
        Ok(config)
    }

    /// Defaults as served by `get_config` when nothing is on disk.
    pub fn defaults() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_absent() {
        let temp = TempDir::new().unwrap();
        let config = AppConfig::load(Some(&temp.path().join("nope.json"))).unwrap();
        assert_eq!(config.backend.port, 8000);
        assert_eq!(config.frontend.port, 5173);
        assert_eq!(config.framework_hub.port, 3000);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{"backend": {"port": 9000}}"#).unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.backend.port, 9000);
        assert_eq!(config.backend.host, "0.0.0.0");
        assert_eq!(config.frontend.port, 5173);
    }

    #[test]
    fn test_framework_hub_key_spelling() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{"frameworkHub": {"host": "127.0.0.1", "port": 3100}}"#).unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.framework_hub.port, 3100);
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE);
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            AppConfig::load(Some(&path)),
            Err(ConfigError::Malformed { .. })
        ));
    }
}

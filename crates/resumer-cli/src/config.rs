//! CLI configuration file support
//!
//! Loads configuration from ~/.config/resumer/config.toml

use resumer_traits::Credentials;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_SERVER: &str = "127.0.0.1:9090";

/// CLI configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub default: DefaultConfig,
}

/// Default connection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultConfig {
    /// Replica address
    pub server: Option<String>,
    pub api_key: Option<String>,
    pub bearer_token: Option<String>,
}

impl CliConfig {
    /// Load configuration from default path
    pub fn load() -> Self {
        Self::load_from_path(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content).unwrap_or_else(|err| {
                tracing::warn!(path = %path.display(), error = %err, "Ignoring invalid CLI config");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Get the default configuration file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("resumer").join("config.toml"))
    }

    /// Flag values win over the config file.
    pub fn server(&self, flag: Option<String>) -> String {
        flag.or_else(|| self.default.server.clone())
            .unwrap_or_else(|| DEFAULT_SERVER.to_string())
    }

    pub fn credentials(&self, api_key: Option<String>, token: Option<String>) -> Credentials {
        Credentials {
            bearer_token: token.or_else(|| self.default.bearer_token.clone()),
            api_key: api_key.or_else(|| self.default.api_key.clone()),
        }
    }
}

/// Directory for the CLI's log files.
pub fn log_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("resumer").join("logs"))
}

//! Replica configuration.
//!
//! Loaded from a TOML file when one is given or found, otherwise from
//! `RESUMER_*` environment variables. Every field has a default.

use anyhow::{Context, bail};
use resumer_traits::{AccessLevel, RedirectTarget};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "resumer.toml";

/// Upper bound for every configured duration.
pub const MAX_TIMING_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumerConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub access: AccessConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Address other replicas and clients use to reach this one.
    #[serde(default)]
    pub advertised_address: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            host: default_host(),
            port: default_port(),
            advertised_address: None,
        }
    }
}

impl ServerConfig {
    pub fn listen_address(&self) -> String {
        match RedirectTarget::new(self.host.as_str(), self.port) {
            Some(target) => target.authority(),
            None => format!("{}:{}", self.host, self.port),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryKind {
    /// Single replica; nothing is shared.
    #[default]
    None,
    /// Claims kept in this process only. Never shared between replicas.
    Memory,
    /// Shared directory server at `directory.address`.
    Remote,
}

impl std::str::FromStr for DirectoryKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "noop" => Ok(Self::None),
            "memory" => Ok(Self::Memory),
            "remote" => Ok(Self::Remote),
            other => bail!("unknown directory kind '{other}' (expected none, memory or remote)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub kind: DirectoryKind,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_claim_ttl_secs")]
    pub claim_ttl_secs: u64,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            kind: DirectoryKind::default(),
            address: None,
            claim_ttl_secs: default_claim_ttl_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl DirectoryConfig {
    pub fn claim_ttl(&self) -> Duration {
        Duration::from_secs(self.claim_ttl_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// How long a completed recording stays replayable locally.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Silence on an ingestion stream after which it counts as disconnected.
    #[serde(default = "default_record_idle_timeout_secs")]
    pub record_idle_timeout_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            record_idle_timeout_secs: default_record_idle_timeout_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl RecordingConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn record_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.record_idle_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Keys that grant full access to every conversation.
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// Bearer token to user id.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
    #[serde(default)]
    pub grants: Vec<AccessGrant>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub user: String,
    pub conversation: String,
    pub level: AccessLevel,
}

fn default_enabled() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9090
}

fn default_claim_ttl_secs() -> u64 {
    10
}

fn default_refresh_interval_secs() -> u64 {
    5
}

fn default_retention_secs() -> u64 {
    30
}

fn default_record_idle_timeout_secs() -> u64 {
    300
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

impl ResumerConfig {
    /// Load from `path`, else `RESUMER_CONFIG`, else `./resumer.toml`, else
    /// the environment. The result is validated.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match config_path(path) {
            Some(path) => Self::from_file(&path)?,
            None => Self::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(enabled) = env_var("RESUMER_ENABLED") {
            config.server.enabled = parse_bool(&enabled)
                .with_context(|| format!("RESUMER_ENABLED has invalid value '{enabled}'"))?;
        }
        if let Some(host) = env_var("RESUMER_HOST") {
            config.server.host = host;
        }
        if let Some(port) = env_parse::<u16>("RESUMER_PORT")? {
            config.server.port = port;
        }
        config.server.advertised_address = env_var("RESUMER_ADVERTISED_ADDRESS");

        if let Some(kind) = env_var("RESUMER_DIRECTORY") {
            config.directory.kind = kind.parse()?;
        }
        config.directory.address = env_var("RESUMER_DIRECTORY_ADDRESS");
        if let Some(ttl) = env_parse::<u64>("RESUMER_CLAIM_TTL_SECS")? {
            config.directory.claim_ttl_secs = ttl;
        }
        if let Some(interval) = env_parse::<u64>("RESUMER_REFRESH_INTERVAL_SECS")? {
            config.directory.refresh_interval_secs = interval;
        }

        if let Some(retention) = env_parse::<u64>("RESUMER_RETENTION_SECS")? {
            config.recording.retention_secs = retention;
        }
        if let Some(timeout) = env_parse::<u64>("RESUMER_RECORD_IDLE_TIMEOUT_SECS")? {
            config.recording.record_idle_timeout_secs = timeout;
        }

        if let Some(keys) = env_var("RESUMER_API_KEYS") {
            config.access.api_keys = keys
                .split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string)
                .collect();
        }

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let directory = &self.directory;
        if directory.refresh_interval_secs == 0 {
            bail!("directory.refresh_interval_secs must be greater than zero");
        }
        if directory.claim_ttl_secs <= directory.refresh_interval_secs {
            bail!(
                "directory.claim_ttl_secs ({}) must be greater than directory.refresh_interval_secs ({})",
                directory.claim_ttl_secs,
                directory.refresh_interval_secs
            );
        }
        if directory.kind == DirectoryKind::Remote
            && directory.address.as_deref().is_none_or(|a| a.trim().is_empty())
        {
            bail!("directory.kind = \"remote\" requires directory.address");
        }
        if let Some(address) = self.server.advertised_address.as_deref()
            && RedirectTarget::parse(address).is_none()
        {
            bail!("server.advertised_address '{address}' is not a valid host:port");
        }
        if self.recording.record_idle_timeout_secs == 0 {
            bail!("recording.record_idle_timeout_secs must be greater than zero");
        }
        if self.recording.cleanup_interval_secs == 0 {
            bail!("recording.cleanup_interval_secs must be greater than zero");
        }
        for (name, secs) in [
            ("directory.claim_ttl_secs", directory.claim_ttl_secs),
            ("directory.refresh_interval_secs", directory.refresh_interval_secs),
            ("recording.retention_secs", self.recording.retention_secs),
            (
                "recording.record_idle_timeout_secs",
                self.recording.record_idle_timeout_secs,
            ),
            ("recording.cleanup_interval_secs", self.recording.cleanup_interval_secs),
        ] {
            if secs > MAX_TIMING_SECS {
                bail!("{name} ({secs}) must not exceed {MAX_TIMING_SECS} seconds");
            }
        }
        Ok(())
    }
}

fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env_var("RESUMER_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let local = Path::new(DEFAULT_CONFIG_FILE);
    local.exists().then(|| local.to_path_buf())
}

fn env_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env_var(name)
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|err| anyhow::anyhow!("{name} has invalid value '{value}': {err}"))
        })
        .transpose()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ResumerConfig::default();
        assert!(config.server.enabled);
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.listen_address(), "0.0.0.0:9090");
        assert_eq!(config.directory.kind, DirectoryKind::None);
        assert_eq!(config.directory.claim_ttl(), Duration::from_secs(10));
        assert_eq!(config.recording.retention_secs, 30);
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 7000
advertised_address = "replica-a.internal:7000"

[directory]
kind = "remote"
address = "directory.internal:7100"

[access]
api_keys = ["agent-key"]
tokens = {{ "tok-alice" = "alice" }}
grants = [{{ user = "alice", conversation = "c1", level = "writer" }}]
"#
        )
        .unwrap();

        let config = ResumerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.directory.kind, DirectoryKind::Remote);
        assert_eq!(config.directory.refresh_interval_secs, 5);
        assert_eq!(config.access.tokens["tok-alice"], "alice");
        assert_eq!(config.access.grants[0].level, AccessLevel::Writer);
    }

    #[test]
    fn test_validation_rejects_bad_timings() {
        let mut config = ResumerConfig::default();
        config.directory.refresh_interval_secs = 10;
        assert!(config.validate().is_err());

        config.directory.refresh_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_unbounded_timings() {
        let mut config = ResumerConfig::default();
        config.directory.claim_ttl_secs = u64::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("directory.claim_ttl_secs"));

        let mut config = ResumerConfig::default();
        config.recording.retention_secs = MAX_TIMING_SECS + 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("recording.retention_secs"));

        let mut config = ResumerConfig::default();
        config.recording.retention_secs = MAX_TIMING_SECS;
        config.validate().unwrap();
    }

    #[test]
    fn test_validation_requires_remote_address() {
        let mut config = ResumerConfig::default();
        config.directory.kind = DirectoryKind::Remote;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("directory.address"));

        config.directory.address = Some("dir:7100".to_string());
        config.validate().unwrap();
    }

    #[test]
    fn test_validation_rejects_bad_advertised_address() {
        let mut config = ResumerConfig::default();
        config.server.advertised_address = Some("no-port".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_directory_kind_parse() {
        assert_eq!("None".parse::<DirectoryKind>().unwrap(), DirectoryKind::None);
        assert_eq!("remote".parse::<DirectoryKind>().unwrap(), DirectoryKind::Remote);
        assert!("redis".parse::<DirectoryKind>().is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}

use savebridge_rpc::Location;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("{field} is not a valid url: {reason}")]
    InvalidUrl { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    pub page_url: String,
    pub helper_url: String,
    pub worker_url: String,
    pub handshake_timeout_ms: u64,
    pub call_timeout_ms: u64,
    pub stream_ttl_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub downloads_dir: String,
    pub chunk_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            page_url: "https://app.localhost/index.html".into(),
            helper_url: "https://savebridge.localhost/helper.html".into(),
            worker_url: "https://savebridge.localhost/sw.js".into(),
            handshake_timeout_ms: 10_000,
            call_timeout_ms: 5_000,
            stream_ttl_ms: 10_000,
            heartbeat_interval_ms: 1_000,
            downloads_dir: "downloads".into(),
            chunk_size: 64 * 1024,
        }
    }
}

impl BridgeConfig {
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        toml::from_str(&raw).map_err(|e| ConfigError::Decode(e.to_string()))
    }

    pub fn example_toml() -> Result<String, ConfigError> {
        toml::to_string_pretty(&Self::default()).map_err(|e| ConfigError::Encode(e.to_string()))
    }

    pub fn page_location(&self) -> Result<Location, ConfigError> {
        parse_url("page_url", &self.page_url)
    }

    pub fn helper_location(&self) -> Result<Location, ConfigError> {
        parse_url("helper_url", &self.helper_url)
    }

    pub fn worker_location(&self) -> Result<Location, ConfigError> {
        parse_url("worker_url", &self.worker_url)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn stream_ttl(&self) -> Duration {
        Duration::from_millis(self.stream_ttl_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn downloads_path(&self) -> PathBuf {
        PathBuf::from(&self.downloads_dir)
    }
}

fn parse_url(field: &'static str, raw: &str) -> Result<Location, ConfigError> {
    Location::parse(raw).map_err(|err| ConfigError::InvalidUrl { field, reason: err.to_string() })
}

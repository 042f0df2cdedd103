//! Engine configuration
//!
//! A single TOML document describes the management server, cache defaults,
//! outbound endpoints, message stores, processors and the mediator trees of
//! sequences and proxies. Mediators are written as tables with a `type` tag;
//! every other key is handed to the mediator factory registered for that tag.
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0:8280"
//!
//! [[endpoints]]
//! name = "orders"
//! address = "http://backend:9000/orders"
//!
//! [[sequences]]
//! name = "main"
//! mediators = [
//!     { type = "log", message = "received" },
//!     { type = "store", processor = "orders-forwarder" },
//! ]
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use esb_common::{ConfigError, MediatorSpec};

mod validate;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "ESB_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheDefaults,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub stores: Vec<StoreConfig>,
    #[serde(default)]
    pub processors: Vec<ProcessorSettings>,
    #[serde(default)]
    pub sequences: Vec<SequenceConfig>,
    #[serde(default)]
    pub proxies: Vec<ProxyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

/// Engine-wide defaults for cache mediators that leave a parameter unset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheDefaults {
    #[serde(default = "default_in_memory_size")]
    pub in_memory_size: usize,
    #[serde(default = "default_cache_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub max_message_size: Option<usize>,
}

impl Default for CacheDefaults {
    fn default() -> Self {
        Self {
            in_memory_size: default_in_memory_size(),
            timeout_secs: default_cache_timeout_secs(),
            max_message_size: None,
        }
    }
}

impl CacheDefaults {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Memory,
    Priority,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub name: String,
    pub kind: StoreKind,
    /// Directory for `file` stores
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Priority levels for `priority` stores
    #[serde(default)]
    pub priorities: Vec<i32>,
    #[serde(default)]
    pub default_priority: Option<i32>,
    /// Upper bound for `memory` stores
    #[serde(default)]
    pub capacity: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorSettings {
    pub name: String,
    pub store: String,
    pub dead_letter_store: String,
    pub on_process: String,
    #[serde(default)]
    pub on_submit: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_true")]
    pub auto_start: bool,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl ProcessorSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceConfig {
    pub name: String,
    #[serde(default)]
    pub mediators: Vec<MediatorSpec>,
    /// Named sequence run when a mediator of this sequence fails
    #[serde(default)]
    pub on_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub name: String,
    /// Named in-sequence; mutually exclusive with `in_mediators`
    #[serde(default)]
    pub in_sequence: Option<String>,
    #[serde(default)]
    pub in_mediators: Vec<MediatorSpec>,
    #[serde(default)]
    pub fault_sequence: Option<String>,
    #[serde(default)]
    pub target_endpoint: Option<String>,
}

fn default_bind_address() -> String {
    "0.0.0.0:8280".to_string()
}

fn default_in_memory_size() -> usize {
    1000
}

fn default_cache_timeout_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_concurrency() -> usize {
    1
}

fn default_true() -> bool {
    true
}

impl EngineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate the file at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&contents)?;
        info!(
            path = %path.display(),
            sequences = config.sequences.len(),
            proxies = config.proxies.len(),
            processors = config.processors.len(),
            "Loaded engine configuration"
        );
        Ok(config)
    }

    /// Load the file named by `ESB_CONFIG`, or fall back to an empty engine
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::load(path),
            Err(_) => {
                info!("{} not set, starting with an empty configuration", CONFIG_ENV);
                Ok(Self::default())
            }
        }
    }

    pub fn store(&self, name: &str) -> Option<&StoreConfig> {
        self.stores.iter().find(|s| s.name == name)
    }

    pub fn sequence(&self, name: &str) -> Option<&SequenceConfig> {
        self.sequences.iter().find(|s| s.name == name)
    }
}

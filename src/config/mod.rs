//! Configuration management for the model server

use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub mod loader;
pub mod validation;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host
    #[serde(default = "default_server_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// How long in-flight calls may run after a stop request
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,

    /// Extra time allowed for cancelled calls to unwind
    #[serde(default = "default_grace_margin")]
    pub grace_margin_ms: u64,

    /// Maximum request body size in MB (0 = unlimited)
    #[serde(default = "default_max_body_size")]
    pub max_body_size_mb: usize,

    /// Health keys reported SERVING while running
    #[serde(default = "default_health_keys")]
    pub health_keys: Vec<String>,
}

/// Which compute backend to dispatch to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Stub,
    #[default]
    Random,
    Remote,
}

/// Compute backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    /// Remote executor endpoint URL
    #[serde(default = "default_backend_url")]
    pub url: String,

    /// API authentication token (secured)
    #[serde(
        default,
        serialize_with = "serialize_optional_secret",
        deserialize_with = "deserialize_optional_secret"
    )]
    pub api_token: Option<Secret<String>>,

    /// Model name sent to the remote executor
    #[serde(default)]
    pub model: Option<String>,

    /// Output dimension of the random backend
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Per-call timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum retry attempts for the remote executor
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub cache_enabled: bool,

    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Vector returned by the stub backend
    #[serde(default = "default_stub_vector")]
    pub stub_vector: Vec<f64>,

    /// Artificial latency of the stub backend
    #[serde(default)]
    pub stub_delay_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_server_host() -> String { "localhost".to_string() }
fn default_server_port() -> u16 { 50051 }
fn default_drain_timeout() -> u64 { 5 }
fn default_grace_margin() -> u64 { 500 }
fn default_max_body_size() -> usize { 10 }
fn default_health_keys() -> Vec<String> { vec![String::new(), "softgrep.Model".to_string()] }
fn default_backend_url() -> String { "http://localhost:8000/v1/embeddings".to_string() }
fn default_dimension() -> usize { 100 }
fn default_timeout() -> u64 { 30 }
fn default_max_retries() -> u32 { 3 }
fn default_cache_size() -> usize { 1000 }
fn default_cache_ttl() -> u64 { 3600 }
fn default_stub_vector() -> Vec<f64> { vec![0.1, 0.2, 0.3] }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            drain_timeout_secs: default_drain_timeout(),
            grace_margin_ms: default_grace_margin(),
            max_body_size_mb: default_max_body_size(),
            health_keys: default_health_keys(),
        }
    }
}

impl ServerConfig {
    /// `host:port` as handed to the listener
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn grace_margin(&self) -> Duration {
        Duration::from_millis(self.grace_margin_ms)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            url: default_backend_url(),
            api_token: None,
            model: None,
            dimension: default_dimension(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            cache_enabled: false,
            cache_size: default_cache_size(),
            cache_ttl_secs: default_cache_ttl(),
            stub_vector: default_stub_vector(),
            stub_delay_ms: 0,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let config = loader::load_config(path)?;
        validation::validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides. The file is optional.
    pub fn from_env(path: Option<&Path>) -> crate::error::Result<Self> {
        let config = loader::load_config_with_env(path)?;
        validation::validate_config(&config)?;
        Ok(config)
    }

    /// Validate this configuration
    pub fn validate(&self) -> crate::error::Result<()> {
        validation::validate_config(self)
    }

    /// Create default configuration
    pub fn default_config() -> Self {
        Self {
            server: ServerConfig::default(),
            backend: BackendConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Custom serializer for Option<Secret<String>>
fn serialize_optional_secret<S>(secret: &Option<Secret<String>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

/// Custom deserializer for Option<Secret<String>>
fn deserialize_optional_secret<'de, D>(deserializer: D) -> Result<Option<Secret<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.map(Secret::new))
}

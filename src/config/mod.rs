//! Configuration management for the regwatch sidecar
//!
//! Settings are merged from three layers, most specific wins:
//! CLI flags > TOML config file > environment variables (`REGWATCH_*`) >
//! built-in defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// KV watch configuration
    pub watch: WatchConfig,

    /// Coordination-service agent configuration
    pub agent: AgentConfig,

    /// Self-registration configuration
    pub service: ServiceConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// KV watch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// KV prefix where service-registration documents live
    pub prefix: String,

    /// Adopt registrations stranded on nodes that no longer own their
    /// address. Off means locals only.
    pub orphanage: bool,
}

/// Coordination-service agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Base URL of the local agent
    pub address: String,

    /// TCP port for remote agent connections (takeover path)
    pub remote_port: u16,

    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,
}

/// Self-registration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Name (and ID) the sidecar registers itself under
    pub name: String,

    /// TTL for the sidecar's own health check, in seconds
    pub ttl_secs: u64,

    /// Deregister the sidecar's service from the local agent on exit
    pub dereg_on_exit: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            prefix: String::from("/services"),
            orphanage: false,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: String::from("http://127.0.0.1:8500"),
            remote_port: 8500,
            request_timeout_secs: 10,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: String::from("regwatch"),
            ttl_secs: 30,
            dereg_on_exit: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watch: WatchConfig::default(),
            agent: AgentConfig::default(),
            service: ServiceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(prefix) = std::env::var("REGWATCH_PREFIX") {
            config.watch.prefix = prefix;
        }
        if let Some(orphanage) = env_parse("REGWATCH_ORPHANAGE") {
            config.watch.orphanage = orphanage;
        }
        if let Ok(address) = std::env::var("REGWATCH_CONSUL_ADDR") {
            config.agent.address = address;
        }
        if let Some(port) = env_parse("REGWATCH_CONSUL_PORT") {
            config.agent.remote_port = port;
        }
        if let Some(timeout) = env_parse("REGWATCH_REQUEST_TIMEOUT") {
            config.agent.request_timeout_secs = timeout;
        }
        if let Ok(name) = std::env::var("REGWATCH_SERVICE_NAME") {
            config.service.name = name;
        }
        if let Some(ttl) = env_parse("REGWATCH_TTL_SECS") {
            config.service.ttl_secs = ttl;
        }
        if let Ok(level) = std::env::var("REGWATCH_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("REGWATCH_LOG_FORMAT") {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Load the layered configuration: built-in defaults, then `REGWATCH_*`
    /// environment variables, then an optional TOML file. CLI flags are
    /// applied on top by the caller, so the full precedence order is
    /// flags > file > environment > defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = Self::from_env()?;
        match path {
            Some(path) => Self::from_file_over(path, config),
            None => Ok(config),
        }
    }

    /// Load configuration from a TOML file, with defaults for anything
    /// the file does not set
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_file_over(path, Self::default())
    }

    /// Parse a TOML file and lay its keys over `base`. Keys the file does
    /// not mention keep their value from `base`.
    pub fn from_file_over(path: &Path, base: Self) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let overlay: toml::Value = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        let mut merged =
            toml::Value::try_from(&base).context("Failed to serialize base configuration")?;
        merge_value(&mut merged, overlay);

        merged
            .try_into()
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.watch.prefix.is_empty() {
            anyhow::bail!("watch.prefix must not be empty");
        }

        if self.agent.remote_port == 0 {
            anyhow::bail!("agent.remote_port must be greater than 0");
        }

        if self.agent.request_timeout_secs == 0 {
            anyhow::bail!("agent.request_timeout_secs must be greater than 0");
        }

        if self.service.ttl_secs == 0 {
            anyhow::bail!("service.ttl_secs must be greater than 0");
        }

        if self.service.name.is_empty() {
            anyhow::bail!("service.name must not be empty");
        }

        Ok(())
    }

    /// Get the heartbeat TTL as a Duration
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.service.ttl_secs)
    }

    /// Get the HTTP request timeout as a Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.request_timeout_secs)
    }

    /// ID of the sidecar's own TTL check
    #[must_use]
    pub fn check_id(&self) -> String {
        format!("{}_ttl", self.service.name)
    }

    /// Name of the cluster takeover event for the watched prefix
    #[must_use]
    pub fn takeover_event(&self) -> String {
        format!("{}_takeover", self.watch.prefix.trim_start_matches('/'))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Recursively merge `overlay` into `base`: tables merge key by key,
/// everything else is replaced.
fn merge_value(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_value(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

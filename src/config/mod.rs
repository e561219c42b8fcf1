//! Configuration Module
//!
//! Provides TOML-based configuration for Kawka with support for:
//! - Server settings (bind address, path, connection limit)
//! - Session limits and timers
//! - Publisher mode and queueing
//! - Kafka producer settings
//! - Environment variable overrides (KAWKA__* prefix)

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

pub use kafka::{parse_brokers, KafkaConfig};
pub use metrics::MetricsConfig;
pub use publisher::PublisherConfig;

use crate::bridge::BridgeConfig;
use crate::session::SessionConfig;
use crate::transform::PayloadMode;

mod kafka;
mod metrics;
mod publisher;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}


/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Listener configuration
    pub server: ServerConfig,
    /// Per-connection limits and timers
    pub session: SessionConfig,
    /// Publisher configuration
    pub publisher: PublisherConfig,
    /// Envelope transform configuration
    pub transform: TransformConfig,
    /// Kafka producer configuration
    pub kafka: KafkaConfig,
    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// WebSocket bind address
    pub bind: SocketAddr,
    /// Request path clients connect to
    pub path: String,
    /// Maximum concurrent sessions (0 = unlimited)
    pub max_connections: usize,
    /// Time allowed for the WebSocket handshake
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 5987)),
            path: "/ws".to_string(),
            max_connections: 0,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Envelope transform configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TransformConfig {
    /// Record payload: the `data` field or the whole envelope
    pub payload: PayloadMode,
}

const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `KAWKA__` prefix with double underscores for nesting:
    ///    - `KAWKA__SERVER__BIND=0.0.0.0:8080` overrides `server.bind`
    ///    - `KAWKA__KAFKA__BROKERS=k1:9092,k2:9092` overrides `kafka.brokers`
    ///    - `KAWKA__PUBLISHER__MODE=async` overrides `publisher.mode`
    ///
    /// A missing file is not an error; defaults and the environment still apply.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("server.bind", "0.0.0.0:5987")?
            .set_default("server.path", "/ws")?
            .set_default("server.max_connections", 0)?
            .set_default("session.max_message_size", 512)?
            .set_default("session.normalize_text", true)?
            .set_default("publisher.mode", "sync")?
            .set_default("publisher.queue_capacity", 1024)?
            .set_default("publisher.max_in_flight", 64)?
            .set_default("transform.payload", "data")?
            .set_default("metrics.enabled", false)?;

        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("KAWKA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.log.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "log.level must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.log.level
            )));
        }

        if !self.server.path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "server.path must start with '/', got '{}'",
                self.server.path
            )));
        }

        if self.session.max_message_size == 0 {
            return Err(ConfigError::Validation(
                "session.max_message_size must be greater than zero".to_string(),
            ));
        }
        if self.session.idle_timeout.is_zero() || self.session.ping_interval().is_zero() {
            return Err(ConfigError::Validation(
                "session.idle_timeout and session.ping_interval must be greater than zero"
                    .to_string(),
            ));
        }
        // A ping must be answered before the idle deadline passes
        if self.session.ping_interval() >= self.session.idle_timeout {
            return Err(ConfigError::Validation(format!(
                "session.ping_interval ({:?}) must be shorter than session.idle_timeout ({:?})",
                self.session.ping_interval(),
                self.session.idle_timeout
            )));
        }

        if self.publisher.queue_capacity == 0 || self.publisher.max_in_flight == 0 {
            return Err(ConfigError::Validation(
                "publisher.queue_capacity and publisher.max_in_flight must be greater than zero"
                    .to_string(),
            ));
        }

        self.kafka.validate().map_err(ConfigError::Validation)?;
        self.metrics
            .validate(self.server.bind)
            .map_err(ConfigError::Validation)?;

        Ok(())
    }

    /// Fail unless at least one Kafka broker is configured
    pub fn require_brokers(&self) -> Result<&[String], ConfigError> {
        if self.kafka.brokers.is_empty() {
            return Err(ConfigError::Validation(
                "kafka.brokers is required (set --brokers, kafka.brokers or KAWKA__KAFKA__BROKERS)"
                    .to_string(),
            ));
        }
        Ok(&self.kafka.brokers)
    }

    /// Bridge settings derived from this configuration
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            path: self.server.path.clone(),
            session: self.session.clone(),
            max_connections: self.server.max_connections,
            handshake_timeout: self.server.handshake_timeout,
            shutdown_grace: self.publisher.shutdown_grace,
        }
    }
}

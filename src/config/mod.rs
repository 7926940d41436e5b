//! Configuration Module
//!
//! Caller-supplied environment for connectors and listeners: the connect
//! timeout applied to the first client receive, the steady-state receive
//! timeout, and optional broker credentials. Loadable from TOML with
//! environment variable overrides (TUNNELMQ__* prefix).

use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;


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

/// Username/password pair handed to the broker binding when it requires
/// authentication.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Transport configuration shared by connectors and listeners.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Window for the first client receive after a connect request, in
    /// milliseconds. Bounds "is anybody listening".
    pub connect_timeout_ms: u64,

    /// Steady-state receive window in milliseconds. Effectively unbounded by
    /// default.
    pub receive_timeout_ms: u64,

    /// Broker credentials, when the binding requires authentication
    pub credentials: Option<Credentials>,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

/// One hour; the "effectively unbounded" steady-state ceiling.
fn default_receive_timeout_ms() -> u64 {
    3_600_000
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            receive_timeout_ms: default_receive_timeout_ms(),
            credentials: None,
        }
    }
}

impl TransportConfig {
    /// Get the connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get the steady-state receive timeout as Duration
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `TUNNELMQ__` prefix with double underscores for nesting:
    ///    - `TUNNELMQ__CONNECT_TIMEOUT_MS=2500` overrides `connect_timeout_ms`
    ///    - `TUNNELMQ__CREDENTIALS__USERNAME=admin` overrides `credentials.username`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("connect_timeout_ms", default_connect_timeout_ms())?
            .set_default("receive_timeout_ms", default_receive_timeout_ms())?;

        // Load from file with env var substitution
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

        let cfg = builder
            .add_source(
                Environment::with_prefix("TUNNELMQ")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: TransportConfig = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: TransportConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.receive_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "receive_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if let Some(ref credentials) = self.credentials {
            if credentials.username.is_empty() {
                return Err(ConfigError::Validation(
                    "credentials.username must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

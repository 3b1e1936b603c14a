//! Configuration data structures

use crate::delivery::DEFAULT_RETRY_INTERVAL;
use crate::models::DestinationId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Operator guidance printed when no API token is configured.
pub const MISSING_TOKEN_GUIDANCE: &str = "You have no API_TOKEN.\n\n\
Message https://t.me/BotFather, create a new bot, get its API token and pass it \
via the API_TOKEN environment variable.";

/// Operator guidance logged when no destination chat is configured.
pub const MISSING_CHAT_GUIDANCE: &str = "You have no CHAT_ID, forwarding is disabled. \
Message your bot with /start (or add it to a group) and it will tell you the chat id.";

/// Environment variables read on top of the config file
pub mod env {
    pub const API_TOKEN: &str = "API_TOKEN";
    pub const CHAT_ID: &str = "CHAT_ID";
    pub const PORT: &str = "PORT";
    pub const HOST: &str = "PINGME_HOST";
    pub const INGEST_PATH: &str = "PINGME_INGEST_PATH";
    pub const RETRY_INTERVAL_MS: &str = "PINGME_RETRY_INTERVAL_MS";
    pub const MAX_BODY_BYTES: &str = "PINGME_MAX_BODY_BYTES";
    pub const DISCOVERY_COMMAND: &str = "PINGME_DISCOVERY_COMMAND";
    pub const LOG_LEVEL: &str = "PINGME_LOG_LEVEL";
}

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{}", MISSING_TOKEN_GUIDANCE)]
    MissingApiToken,

    #[error("Invalid value {value:?} for {var}: {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// Logging level configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LogLevel {
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "info")]
    #[default]
    Info,
    #[serde(rename = "debug")]
    Debug,
    #[serde(rename = "trace")]
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// Main configuration structure, as read from file and environment
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Telegram bot token (required to start)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    /// Chat that receives forwarded notifications; ingestion is disabled without it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<DestinationId>,
    /// HTTP bind address
    pub host: String,
    /// HTTP port number
    pub port: u16,
    /// Path segment of the ingestion endpoint
    pub ingest_path: String,
    /// Fixed wait between delivery attempts
    pub retry_interval_ms: u64,
    /// Largest accepted ingestion body
    pub max_body_bytes: u64,
    /// Command that makes the bot reveal the chat id
    pub discovery_command: String,
    /// getUpdates long-poll timeout
    pub poll_timeout_secs: u64,
    /// Logging verbosity level
    pub log_level: LogLevel,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            api_token: None,
            chat_id: None,
            host: "0.0.0.0".to_string(),
            port: 8080,
            ingest_path: "pingme".to_string(),
            retry_interval_ms: DEFAULT_RETRY_INTERVAL.as_millis() as u64,
            max_body_bytes: 1024 * 1024, // 1MB
            discovery_command: "/start".to_string(),
            poll_timeout_secs: 30,
            log_level: LogLevel::Info,
        }
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("chat_id", &self.chat_id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("ingest_path", &self.ingest_path)
            .field("retry_interval_ms", &self.retry_interval_ms)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("discovery_command", &self.discovery_command)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Configuration {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let config: Configuration = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Return default configuration if file doesn't exist
            Ok(Configuration::default())
        }
    }

    /// Get the XDG config directory path
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("pingme").join("config.toml"))
    }

    /// Load the config file (explicit path or XDG default) and overlay the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::default_config_path() {
                Ok(default_path) => Self::load_from_file(&default_path)?,
                Err(_) => Self::default(),
            },
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Overlay values from an environment lookup. Empty values count as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(token) = get(env::API_TOKEN) {
            self.api_token = Some(token.trim().to_string());
        }

        if let Some(raw) = get(env::CHAT_ID) {
            let chat_id =
                raw.parse::<DestinationId>()
                    .map_err(|e| ConfigError::InvalidEnv {
                        var: env::CHAT_ID,
                        value: raw.clone(),
                        reason: e.to_string(),
                    })?;
            self.chat_id = Some(chat_id);
        }

        if let Some(host) = get(env::HOST) {
            self.host = host.trim().to_string();
        }

        if let Some(raw) = get(env::PORT) {
            self.port = parse_env(env::PORT, &raw)?;
        }

        if let Some(path) = get(env::INGEST_PATH) {
            self.ingest_path = path;
        }

        if let Some(raw) = get(env::RETRY_INTERVAL_MS) {
            self.retry_interval_ms = parse_env(env::RETRY_INTERVAL_MS, &raw)?;
        }

        if let Some(raw) = get(env::MAX_BODY_BYTES) {
            self.max_body_bytes = parse_env(env::MAX_BODY_BYTES, &raw)?;
        }

        if let Some(command) = get(env::DISCOVERY_COMMAND) {
            self.discovery_command = command.trim().to_string();
        }

        if let Some(raw) = get(env::LOG_LEVEL) {
            self.log_level = raw.parse().map_err(|reason| ConfigError::InvalidEnv {
                var: env::LOG_LEVEL,
                value: raw.clone(),
                reason,
            })?;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.port == 0 {
            errors.push("port must be between 1 and 65535".to_string());
        }

        if format!("{}:{}", self.host, self.port)
            .parse::<SocketAddr>()
            .is_err()
        {
            errors.push(format!("host '{}' is not a valid IP address", self.host));
        }

        if !is_valid_path_segment(normalized_path(&self.ingest_path)) {
            errors.push(
                "ingest_path must be a single path segment of letters, numbers, '-', '_' or '.'"
                    .to_string(),
            );
        }

        if self.retry_interval_ms == 0 {
            errors.push("retry_interval_ms must be greater than zero".to_string());
        }

        if self.max_body_bytes == 0 {
            errors.push("max_body_bytes must be greater than zero".to_string());
        }

        if !self.discovery_command.starts_with('/') || self.discovery_command.len() < 2 {
            errors.push("discovery_command must look like '/start'".to_string());
        }

        if self.poll_timeout_secs > 50 {
            // Telegram closes long polls itself after about a minute
            errors.push("poll_timeout_secs cannot exceed 50".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Check required values and freeze the configuration for the relay.
    pub fn into_relay_config(self) -> Result<RelayConfig, ConfigError> {
        let api_token = self
            .api_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingApiToken)?;

        self.validate().map_err(ConfigError::Invalid)?;

        let listen_addr = format!("{}:{}", self.host, self.port)
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid(vec![e.to_string()]))?;

        Ok(RelayConfig {
            api_token,
            destination: self.chat_id.filter(|id| !id.is_unset()),
            listen_addr,
            ingest_path: normalized_path(&self.ingest_path).to_string(),
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            max_body_bytes: self.max_body_bytes,
            discovery_command: self.discovery_command,
            poll_timeout: Duration::from_secs(self.poll_timeout_secs),
        })
    }

    /// Render the effective configuration as TOML with the token redacted.
    pub fn to_redacted_toml(&self) -> Result<String, toml::ser::Error> {
        let mut shown = self.clone();
        if shown.api_token.is_some() {
            shown.api_token = Some("<redacted>".to_string());
        }
        toml::to_string_pretty(&shown)
    }
}

/// Immutable settings shared by the delivery path and the discovery responder
#[derive(Clone)]
pub struct RelayConfig {
    pub api_token: String,
    pub destination: Option<DestinationId>,
    pub listen_addr: SocketAddr,
    pub ingest_path: String,
    pub retry_interval: Duration,
    pub max_body_bytes: u64,
    pub discovery_command: String,
    pub poll_timeout: Duration,
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("api_token", &"<redacted>")
            .field("destination", &self.destination)
            .field("listen_addr", &self.listen_addr)
            .field("ingest_path", &self.ingest_path)
            .field("retry_interval", &self.retry_interval)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("discovery_command", &self.discovery_command)
            .field("poll_timeout", &self.poll_timeout)
            .finish()
    }
}

fn parse_env<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidEnv {
        var,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn normalized_path(path: &str) -> &str {
    path.trim().trim_matches('/')
}

fn is_valid_path_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

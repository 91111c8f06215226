use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Client configuration
///
/// Every field has a default, so a partial JSON document or an empty
/// environment yields a working configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Gaze server host
    pub host: String,
    /// Gaze server port
    pub port: u16,
    /// Wait between failed connection attempts, and before reconnecting after a drop
    pub retry_delay_ms: u64,
    /// Maximum bytes per socket read
    pub read_buffer_size: usize,
    /// Connect timeout per resolved address (None or 0 waits for the OS)
    pub connect_timeout_ms: Option<u64>,
    /// Pending samples kept for FIFO consumers before the oldest is dropped
    pub queue_capacity: usize,
    /// Pending records kept for an attached sink before new ones are dropped
    pub sink_capacity: usize,
    /// How long `stop()` waits for the management thread to exit. Keep it above
    /// `connect_timeout_ms`, since a connect in progress cannot be interrupted.
    pub shutdown_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5555,
            retry_delay_ms: 5000,
            read_buffer_size: 16 * 1024,
            connect_timeout_ms: Some(5000),
            queue_capacity: 64,
            sink_capacity: 64,
            shutdown_timeout_ms: 10_000,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults
    ///
    /// A `.env` file in the working directory is read first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key: &str| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let connect_timeout_ms = match lookup("GAZE_CONNECT_TIMEOUT_MS") {
            Some(raw) => match parse_value::<u64>("GAZE_CONNECT_TIMEOUT_MS", &raw)? {
                0 => None,
                ms => Some(ms),
            },
            None => defaults.connect_timeout_ms,
        };

        let config = Self {
            host: lookup("GAZE_HOST")
                .map(|h| h.trim().to_string())
                .unwrap_or(defaults.host),
            port: parse_or(&lookup, "GAZE_PORT", defaults.port)?,
            retry_delay_ms: parse_or(&lookup, "GAZE_RETRY_DELAY_MS", defaults.retry_delay_ms)?,
            read_buffer_size: parse_or(
                &lookup,
                "GAZE_READ_BUFFER_SIZE",
                defaults.read_buffer_size,
            )?,
            connect_timeout_ms,
            queue_capacity: parse_or(&lookup, "GAZE_QUEUE_CAPACITY", defaults.queue_capacity)?,
            sink_capacity: parse_or(&lookup, "GAZE_SINK_CAPACITY", defaults.sink_capacity)?,
            shutdown_timeout_ms: parse_or(
                &lookup,
                "GAZE_SHUTDOWN_TIMEOUT_MS",
                defaults.shutdown_timeout_ms,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check values the client cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidValue("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.read_buffer_size == 0 {
            return Err(ConfigError::InvalidValue(
                "read_buffer_size must be at least 1 byte".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.sink_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "sink_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Server address as `host:port`, bracketing IPv6 literals
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(format!("{}={:?} is not a valid number", key, raw)))
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid port number")]
    InvalidPort,
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

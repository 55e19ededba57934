use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Automatic reconnect attempts before giving up
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// Heartbeat tick interval
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,
    /// Silence longer than this counts as a missed heartbeat; also bounds TCP connect
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_ms: u64,
    /// Cap on inbound bytes buffered without a complete frame
    #[serde(default = "default_max_buffer")]
    pub max_buffer_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Output logs as JSON
    #[serde(default)]
    pub json_logs: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    1234
}

fn default_max_reconnect_attempts() -> u32 {
    3
}

fn default_reconnect_delay() -> u64 {
    5000
}

fn default_ping_interval() -> u64 {
    1000
}

fn default_connection_timeout() -> u64 {
    5000
}

fn default_max_buffer() -> usize {
    jupiter_proto::DEFAULT_MAX_BUFFER_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay(),
            ping_interval_ms: default_ping_interval(),
            connection_timeout_ms: default_connection_timeout(),
            max_buffer_bytes: default_max_buffer(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

impl ConnectionSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("connection.{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

impl ConnectionSettings {
    /// Rejects values that would stall or panic the runtime timers
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ping_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("ping_interval_ms"));
        }
        if self.connection_timeout_ms == 0 {
            return Err(ConfigError::ZeroInterval("connection_timeout_ms"));
        }
        Ok(())
    }
}

impl ClientConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let config: ClientConfig = toml::from_str(contents)?;
        config.connection.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            connection: ConnectionSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use media_server::ServerConnection;
use serde::{Deserialize, Serialize};
use simplelog::LevelFilter;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: String,
    #[serde(default)]
    pub history_webhook: String,
    #[serde(default = "default_history_retry_attempts")]
    pub history_retry_attempts: u32,
    #[serde(default)]
    pub servers: Vec<ServerConnection>,
}

fn default_poll_interval() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    10
}

fn default_keepalive_interval() -> u64 {
    30
}

fn default_listen() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_history_retry_attempts() -> u32 {
    3
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be positive".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 || self.keepalive_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "timeouts and intervals must be positive".to_string(),
            ));
        }
        self.listen
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid(format!("listen {}: {}", self.listen, e)))?;
        if !self.history_webhook.is_empty() {
            Url::parse(&self.history_webhook).map_err(|e| {
                ConfigError::Invalid(format!("history_webhook {}: {}", self.history_webhook, e))
            })?;
        }

        let mut ids = HashSet::new();
        for server in &self.servers {
            if server.id.trim().is_empty() {
                return Err(ConfigError::Invalid("server id must not be empty".to_string()));
            }
            if !ids.insert(server.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate server id {}",
                    server.id
                )));
            }
            let url = Url::parse(&server.base_url).map_err(|e| {
                ConfigError::Invalid(format!("[{}]base_url {}: {}", server.id, server.base_url, e))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::Invalid(format!(
                    "[{}]base_url must be http or https",
                    server.id
                )));
            }
        }
        Ok(())
    }

    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerConnection> {
        self.servers.iter().filter(|s| s.enabled)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    /// Unknown names fall back to info.
    pub fn log_level(&self) -> LevelFilter {
        self.log_level.parse().unwrap_or(LevelFilter::Info)
    }
}

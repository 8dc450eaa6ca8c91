//! Configuration for Disparo

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Dispatch engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// WhatsApp gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            bind_address: default_bind_address(),
        }
    }
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API port
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// CORS allowed origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_api_port() -> u16 {
    8080
}

/// Dispatch engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Concurrent send jobs processed by the worker pool
    #[serde(default = "default_send_concurrency")]
    pub send_concurrency: usize,

    /// Jobs claimed per queue poll
    #[serde(default = "default_send_batch_size")]
    pub send_batch_size: usize,

    /// Send queue poll interval in seconds
    #[serde(default = "default_queue_poll_interval")]
    pub queue_poll_interval_secs: u64,

    /// Maintenance tick interval in seconds (stuck-send recovery,
    /// daily counter resets, expired lock cleanup)
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,

    /// Contacts stuck in `sending` longer than this revert to `pending`
    #[serde(default = "default_stuck_sending_threshold")]
    pub stuck_sending_threshold_secs: u64,

    /// Campaign lease / phone lock time-to-live in seconds
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,

    /// Delay before retrying a send that hit a held phone lock
    #[serde(default = "default_phone_lock_retry_delay")]
    pub phone_lock_retry_delay_secs: u64,

    /// Shutdown drain budget in seconds
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            send_concurrency: default_send_concurrency(),
            send_batch_size: default_send_batch_size(),
            queue_poll_interval_secs: default_queue_poll_interval(),
            maintenance_interval_secs: default_maintenance_interval(),
            stuck_sending_threshold_secs: default_stuck_sending_threshold(),
            lock_ttl_secs: default_lock_ttl(),
            phone_lock_retry_delay_secs: default_phone_lock_retry_delay(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

fn default_send_concurrency() -> usize {
    10
}

fn default_send_batch_size() -> usize {
    10
}

fn default_queue_poll_interval() -> u64 {
    2
}

fn default_maintenance_interval() -> u64 {
    60
}

fn default_stuck_sending_threshold() -> u64 {
    300
}

fn default_lock_ttl() -> u64 {
    60
}

fn default_phone_lock_retry_delay() -> u64 {
    20
}

fn default_shutdown_grace() -> u64 {
    30
}

/// WhatsApp gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Request timeout for send calls, in seconds
    #[serde(default = "default_gateway_timeout")]
    pub request_timeout_secs: u64,

    /// Connection state poll interval in seconds
    #[serde(default = "default_state_poll_interval")]
    pub state_poll_interval_secs: u64,

    /// Shared secret expected on webhook requests, if set
    pub webhook_secret: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_gateway_timeout(),
            state_poll_interval_secs: default_state_poll_interval(),
            webhook_secret: None,
        }
    }
}

fn default_gateway_timeout() -> u64 {
    30
}

fn default_state_poll_interval() -> u64 {
    60
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config.with_env_overrides())
    }

    /// Load configuration from environment and file
    pub fn load() -> crate::Result<Self> {
        // Try to load from default locations
        let paths = [
            std::path::PathBuf::from("./config.toml"),
            std::path::PathBuf::from("./config/disparo.toml"),
            std::path::PathBuf::from("/etc/disparo/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        // No file: defaults plus environment overrides
        Ok(Config::default().with_env_overrides())
    }

    /// Apply environment variable overrides
    fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = Some(url);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let server = ServerConfig::default();
        assert_eq!(server.hostname, "localhost");
        assert_eq!(server.bind_address, "0.0.0.0");

        let engine = EngineConfig::default();
        assert_eq!(engine.lock_ttl_secs, 60);
        assert_eq!(engine.stuck_sending_threshold_secs, 300);
        assert_eq!(engine.phone_lock_retry_delay_secs, 20);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
hostname = "disparo.example.com"

[database]
url = "postgres://localhost/disparo"
max_connections = 10

[engine]
send_concurrency = 4

[gateway]
request_timeout_secs = 15
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.hostname, "disparo.example.com");
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.database.min_connections, 5);
        assert_eq!(config.engine.send_concurrency, 4);
        assert_eq!(config.engine.send_batch_size, 10);
        assert_eq!(config.gateway.request_timeout_secs, 15);
        assert_eq!(config.api.port, 8080);
    }
}

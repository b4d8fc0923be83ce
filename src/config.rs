use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::presence::PresenceConfig;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins, comma separated
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // Cloud service identifiers
    #[serde(default = "default_service_name")]
    pub cloud_service_name: String,

    /// JWT secret key
    pub cloud_auth_jwt_secret: Option<String>,

    // Presence timings
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_rebroadcast_debounce_ms")]
    pub rebroadcast_debounce_ms: u64,
    #[serde(default = "default_awareness_timeout_ms")]
    pub awareness_timeout_ms: u64,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Idle rooms are dropped after this many seconds
    #[serde(default = "default_room_idle_secs")]
    pub room_idle_secs: u64,
}

impl Config {
    /// Load configuration from environment variables or app.env file.
    ///
    /// Runs before tracing is initialized, so the caller logs the outcome.
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        Ok(envy::from_env::<Config>()?)
    }

    /// Default tracing filter when `RUST_LOG` is unset: debug for the relay
    /// itself, `log_level` for everything else.
    pub fn log_filter(&self) -> String {
        format!(
            "colabri_presence=debug,tower_http=debug,axum::rejection=trace,{}",
            self.log_level
        )
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "prod" || self.environment.to_lowercase() == "production"
    }

    pub fn room_idle(&self) -> Duration {
        Duration::from_secs(self.room_idle_secs)
    }

    pub fn presence(&self) -> PresenceConfig {
        PresenceConfig {
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            rebroadcast_debounce: Duration::from_millis(self.rebroadcast_debounce_ms),
            awareness_timeout: Duration::from_millis(self.awareness_timeout_ms),
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            cors_origins: None,
            cloud_service_name: default_service_name(),
            cloud_auth_jwt_secret: None,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            rebroadcast_debounce_ms: default_rebroadcast_debounce_ms(),
            awareness_timeout_ms: default_awareness_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            room_idle_secs: default_room_idle_secs(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvError(#[from] envy::Error),
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "colabri-presence".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

fn default_rebroadcast_debounce_ms() -> u64 {
    500
}

fn default_awareness_timeout_ms() -> u64 {
    30_000
}

fn default_sweep_interval_ms() -> u64 {
    5_000
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_room_idle_secs() -> u64 {
    300
}

use serde::{Deserialize, Serialize};

use crate::core::{DEFAULT_HARD_LIMIT, DEFAULT_MIN_LIMIT};

/// Gated HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Number of request worker threads
    pub workers: usize,
}

/// Admin API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Whether to start the admin listener
    pub enabled: bool,
    /// Admin host
    pub host: String,
    /// Admin port
    pub port: u16,
}

/// Detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Initial absolute per-tick ceiling
    pub hard_limit: i64,
    /// Initial floor below which no block decision is made
    pub min_limit: i64,
    /// Interval between detection ticks in milliseconds
    pub tick_interval_ms: u64,
    /// Samples a source's window needs before the adaptive ceiling applies
    pub warmup_samples: usize,
}

/// Observation capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Capture command line, whitespace separated (disabled when absent)
    #[serde(default)]
    pub command: Option<String>,
    /// Maximum number of captured lines waiting to be parsed
    pub queue_capacity: usize,
}

/// Firewall event output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Whether to print events to stdout
    pub console: bool,
    /// File events are appended to
    #[serde(default)]
    pub file: Option<String>,
    /// Number of recent events kept for the admin API
    pub recent_capacity: usize,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Gated server configuration
    pub server: ServerConfig,
    /// Admin API configuration
    pub admin: AdminConfig,
    /// Detection configuration
    pub detection: DetectionConfig,
    /// Capture configuration
    pub capture: CaptureConfig,
    /// Event output configuration
    pub events: EventsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                workers: 8,
            },
            admin: AdminConfig {
                enabled: true,
                host: "127.0.0.1".to_string(),
                port: 9090,
            },
            detection: DetectionConfig {
                hard_limit: DEFAULT_HARD_LIMIT,
                min_limit: DEFAULT_MIN_LIMIT,
                tick_interval_ms: 1000,
                warmup_samples: 0,
            },
            capture: CaptureConfig {
                command: None,
                queue_capacity: 10_000,
            },
            events: EventsConfig {
                console: true,
                file: None,
                recent_capacity: 200,
            },
        }
    }
}

//! Configuration management for the flow shield.
//!
//! This module loads the static configuration from an optional TOML file and
//! `FLOW_SHIELD__*` environment variables. Detection limits loaded here only
//! seed the runtime [`Limits`](crate::core::Limits); they can be changed later
//! through the admin API.

use std::env;

use ::config::{Config as ConfigBuilder, ConfigError, Environment, File};

use crate::models::Config;

pub const ENV_PREFIX: &str = "FLOW_SHIELD";

/// Load configuration from the file named by `CONFIG_FILE` and the environment
pub fn load_config() -> Result<Config, ConfigError> {
    let config_file = env::var("CONFIG_FILE").unwrap_or_else(|_| "config/default.toml".to_string());
    load_from(&config_file, Environment::with_prefix(ENV_PREFIX).separator("__"))
}

fn load_from(config_file: &str, environment: Environment) -> Result<Config, ConfigError> {
    let defaults = Config::default();

    let config = ConfigBuilder::builder()
        .set_default("server.host", defaults.server.host)?
        .set_default("server.port", i64::from(defaults.server.port))?
        .set_default("server.workers", defaults.server.workers as i64)?
        .set_default("admin.enabled", defaults.admin.enabled)?
        .set_default("admin.host", defaults.admin.host)?
        .set_default("admin.port", i64::from(defaults.admin.port))?
        .set_default("detection.hard_limit", defaults.detection.hard_limit)?
        .set_default("detection.min_limit", defaults.detection.min_limit)?
        .set_default("detection.tick_interval_ms", defaults.detection.tick_interval_ms as i64)?
        .set_default("detection.warmup_samples", defaults.detection.warmup_samples as i64)?
        .set_default("capture.queue_capacity", defaults.capture.queue_capacity as i64)?
        .set_default("events.console", defaults.events.console)?
        .set_default("events.recent_capacity", defaults.events.recent_capacity as i64)?
        .add_source(File::with_name(config_file).required(false))
        .add_source(environment.try_parsing(true))
        .build()?;

    config.try_deserialize()
}

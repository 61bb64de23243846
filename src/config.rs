//! Configuration
//!
//! Layered, lowest priority first:
//! 1. built-in defaults
//! 2. a TOML file (`goalvm.toml` in the working directory, or an explicit path)
//! 3. environment variables prefixed `GOALVM_` (e.g. `GOALVM_QUEUE_CAPACITY`)

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "goalvm.toml";
pub const ENV_PREFIX: &str = "GOALVM";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log filter used when `RUST_LOG` is unset
    pub log_filter: String,
    /// Bound of each co-expression's result queue
    pub queue_capacity: usize,
    /// Upper bound on concurrently running co-expression tasks
    pub max_tasks: usize,
    /// Traceback frames printed for an uncaught error
    pub traceback_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_filter: "warn".to_string(),
            queue_capacity: 1,
            max_tasks: 512,
            traceback_limit: 32,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load from the default file and the environment
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    queue_capacity: Option<usize>,
}

impl ConfigBuilder {
    /// Explicit config file; it must exist
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn queue_capacity(mut self, capacity: Option<usize>) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<Config> {
        let defaults = Config::default();
        let mut builder = config::Config::builder()
            .set_default("log_filter", defaults.log_filter)?
            .set_default("queue_capacity", defaults.queue_capacity as u64)?
            .set_default("max_tasks", defaults.max_tasks as u64)?
            .set_default("traceback_limit", defaults.traceback_limit as u64)?;

        builder = match &self.config_path {
            Some(path) => builder.add_source(config::File::from(path.as_path()).required(true)),
            None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .try_parsing(true),
        );

        if let Some(capacity) = self.queue_capacity {
            builder = builder.set_override("queue_capacity", capacity as u64)?;
        }

        let mut config: Config = builder
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        // Queues need room for at least one value
        config.queue_capacity = config.queue_capacity.max(1);
        config.max_tasks = config.max_tasks.max(1);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.queue_capacity, 1);
        assert_eq!(config.log_filter, "warn");
    }

    #[test]
    fn test_file_and_override() {
        let path = std::env::temp_dir().join(format!("goalvm-config-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "traceback_limit = 5\nqueue_capacity = 0").unwrap();

        let config = Config::builder()
            .config_path(Some(path.clone()))
            .build()
            .unwrap();
        assert_eq!(config.traceback_limit, 5);
        assert_eq!(config.queue_capacity, 1);

        let config = Config::builder()
            .config_path(Some(path.clone()))
            .queue_capacity(Some(4))
            .build()
            .unwrap();
        assert_eq!(config.queue_capacity, 4);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = Config::builder()
            .config_path(Some(PathBuf::from("/nonexistent/goalvm.toml")))
            .build();
        assert!(result.is_err());
    }
}

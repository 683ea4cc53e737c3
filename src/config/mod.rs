//! Configuration management.
//!
//! nodeflow configuration can come from:
//! - Config file (~/.config/nodeflow/config.toml)
//! - Environment variables (NODEFLOW_*), which win over the file

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// nodeflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Engine limits
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Engine limits. Workflow settings may override some of them per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Step budget: total node visits allowed per execution
    #[serde(default = "default_max_node_visits")]
    pub max_node_visits: usize,

    /// Cap on function rescans per expression
    #[serde(default = "default_max_expression_passes")]
    pub max_expression_passes: usize,

    /// Execution timeout when the workflow sets none
    #[serde(default = "default_timeout_seconds")]
    pub default_timeout_seconds: u64,

    /// Concurrent iterations for loop nodes that set none
    #[serde(default = "default_loop_parallelism")]
    pub loop_parallelism: usize,

    /// Largest item list a loop node accepts
    #[serde(default = "default_max_loop_items")]
    pub max_loop_items: usize,

    /// Longest single wait
    #[serde(default = "default_max_wait_seconds")]
    pub max_wait_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_node_visits: default_max_node_visits(),
            max_expression_passes: default_max_expression_passes(),
            default_timeout_seconds: default_timeout_seconds(),
            loop_parallelism: default_loop_parallelism(),
            max_loop_items: default_max_loop_items(),
            max_wait_seconds: default_max_wait_seconds(),
        }
    }
}

fn default_max_node_visits() -> usize {
    1000
}

fn default_max_expression_passes() -> usize {
    crate::expression::MAX_FUNCTION_PASSES
}

fn default_timeout_seconds() -> u64 {
    3600
}

fn default_loop_parallelism() -> usize {
    1
}

fn default_max_loop_items() -> usize {
    10_000
}

fn default_max_wait_seconds() -> u64 {
    3600
}

/// Logging configuration for the binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "nodeflow=info".to_string()
}

impl Config {
    /// Load configuration from default locations.
    pub fn load() -> Self {
        let mut config = Self::default();

        let primary_path = Self::config_dir().join("config.toml");
        if let Ok(partial) = Self::load_partial_from_path(&primary_path) {
            config.apply_partial(partial);
        }

        config.apply_env_overrides();
        config
    }

    /// Load an explicit config file, then apply environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let partial: PartialConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        let mut config = Self::default();
        config.apply_partial(partial);
        config.apply_env_overrides();
        Ok(config)
    }

    /// Get the config directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("nodeflow"))
            .unwrap_or_else(|| PathBuf::from(".nodeflow"))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        let engine = &mut self.engine;
        override_parsed(&var, "NODEFLOW_MAX_NODE_VISITS", &mut engine.max_node_visits);
        override_parsed(
            &var,
            "NODEFLOW_MAX_EXPRESSION_PASSES",
            &mut engine.max_expression_passes,
        );
        override_parsed(
            &var,
            "NODEFLOW_TIMEOUT_SECONDS",
            &mut engine.default_timeout_seconds,
        );
        override_parsed(&var, "NODEFLOW_LOOP_PARALLELISM", &mut engine.loop_parallelism);
        override_parsed(&var, "NODEFLOW_MAX_LOOP_ITEMS", &mut engine.max_loop_items);
        override_parsed(&var, "NODEFLOW_MAX_WAIT_SECONDS", &mut engine.max_wait_seconds);
        if let Some(level) = var("NODEFLOW_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    fn load_partial_from_path(path: &Path) -> std::result::Result<PartialConfig, ()> {
        let content = std::fs::read_to_string(path).map_err(|_| ())?;
        toml::from_str(&content).map_err(|_| ())
    }

    fn apply_partial(&mut self, partial: PartialConfig) {
        if let Some(engine) = partial.engine {
            self.engine = engine;
        }
        if let Some(logging) = partial.logging {
            self.logging = logging;
        }
    }
}

fn override_parsed<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    target: &mut T,
) {
    if let Some(parsed) = var(name).and_then(|v| v.trim().parse::<T>().ok()) {
        *target = parsed;
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    engine: Option<EngineConfig>,
    logging: Option<LoggingConfig>,
}

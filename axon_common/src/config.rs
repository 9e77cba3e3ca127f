//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load TOML configuration files
//! for AXON nodes. Compile-time capacities live in [`crate::consts`]; the
//! knobs below are the ones a deployment can reasonably tune per node
//! without rebuilding.
//!
//! # Usage
//!
//! ```rust,no_run
//! use axon_common::config::{ConfigLoader, NodeConfig};
//! use std::path::Path;
//!
//! let config = NodeConfig::load(Path::new("node.toml")).expect("load config");
//! println!("Node: {}", config.node_name);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::consts::{
    DEFAULT_WORKER_THREADS, EVENT_BUS_NAME, HEARTBEAT_INTERVAL_SECS, MAX_NODE_NAME_LEN,
    REGISTRY_NAME, SPIN_IDLE_CAP_MS,
};

/// Default log verbosity for a node process.
///
/// Becomes the `tracing` filter when `RUST_LOG` is not set; accepted in
/// TOML as the lowercase level names, `trace` through `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything, including per-dispatch detail.
    Trace,
    /// Lifecycle and rendezvous detail.
    Debug,
    /// Normal operation (default).
    Info,
    /// Skipped dispatches and other recoverable trouble.
    Warn,
    /// Failures only.
    Error,
}

impl LogLevel {
    /// The `tracing` filter directive this level stands for.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Failures while loading or validating a node configuration file.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// No file at the given path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// The file exists but does not parse as this TOML schema.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Parsed values break a constraint a node cannot start with (empty
    /// or oversized name, zero workers, zero intervals).
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Per-node configuration.
///
/// Every field has a default, so an empty TOML file yields a usable node
/// once `node_name` is set.
///
/// # TOML Example
///
/// ```toml
/// node_name = "imu_driver"
/// namespace = "sensors"
/// domain_id = 7
/// workers = 2
/// log_level = "debug"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Human-readable node name, recorded in the registry.
    pub node_name: String,

    /// Namespace folded into every topic channel name.
    #[serde(default)]
    pub namespace: String,

    /// Domain id folded into every topic channel name. Nodes in different
    /// domains never share topic channels.
    #[serde(default)]
    pub domain_id: u32,

    /// Worker thread count for the executor pool.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Upper bound on a single spin-loop wait, milliseconds.
    #[serde(default = "default_idle_cap_ms")]
    pub idle_cap_ms: u64,

    /// Heartbeat update interval, seconds.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Registry segment name. Override only to isolate a test fixture.
    #[serde(default = "default_registry_name")]
    pub registry_name: String,

    /// Event bus segment name. Override only to isolate a test fixture.
    #[serde(default = "default_event_bus_name")]
    pub event_bus_name: String,

    /// Log verbosity for this node's process.
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
}

fn default_workers() -> usize {
    DEFAULT_WORKER_THREADS
}
fn default_idle_cap_ms() -> u64 {
    SPIN_IDLE_CAP_MS
}
fn default_heartbeat_interval_secs() -> u64 {
    HEARTBEAT_INTERVAL_SECS
}
fn default_registry_name() -> String {
    REGISTRY_NAME.to_string()
}
fn default_event_bus_name() -> String {
    EVENT_BUS_NAME.to_string()
}
fn default_log_level() -> LogLevel {
    LogLevel::Info
}

impl NodeConfig {
    /// Build a config with defaults for everything but the name.
    pub fn named(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            namespace: String::new(),
            domain_id: 0,
            workers: default_workers(),
            idle_cap_ms: default_idle_cap_ms(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            registry_name: default_registry_name(),
            event_bus_name: default_event_bus_name(),
            log_level: default_log_level(),
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `node_name` is empty or exceeds `MAX_NODE_NAME_LEN`
    /// - `workers` is zero
    /// - `idle_cap_ms` or `heartbeat_interval_secs` is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "node_name cannot be empty".to_string(),
            ));
        }
        if self.node_name.len() > MAX_NODE_NAME_LEN {
            return Err(ConfigError::ValidationError(format!(
                "node_name exceeds {} bytes",
                MAX_NODE_NAME_LEN
            )));
        }
        if self.workers == 0 {
            return Err(ConfigError::ValidationError(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.idle_cap_ms == 0 {
            return Err(ConfigError::ValidationError(
                "idle_cap_ms must be non-zero".to_string(),
            ));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "heartbeat_interval_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: NodeConfig = toml::from_str(r#"node_name = "probe""#).unwrap();
        assert_eq!(config.node_name, "probe");
        assert_eq!(config.workers, DEFAULT_WORKER_THREADS);
        assert_eq!(config.registry_name, REGISTRY_NAME);
        assert_eq!(config.log_level, LogLevel::Info);
        config.validate().unwrap();
    }

    #[test]
    fn log_level_filter_directives() {
        assert_eq!(LogLevel::Trace.as_filter(), "trace");
        assert_eq!(LogLevel::Info.as_filter(), "info");
        assert_eq!(LogLevel::Error.as_filter(), "error");
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "node_name = \"imu\"\nnamespace = \"sensors\"\ndomain_id = 3\nworkers = 2"
        )
        .unwrap();

        let config = NodeConfig::load(file.path()).unwrap();
        assert_eq!(config.namespace, "sensors");
        assert_eq!(config.domain_id, 3);
        assert_eq!(config.workers, 2);
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = NodeConfig::load(Path::new("/nonexistent/axon.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = NodeConfig::named("x");
        config.workers = 0;
        assert!(config.validate().is_err());

        let config = NodeConfig::named("y".repeat(MAX_NODE_NAME_LEN + 1));
        assert!(config.validate().is_err());

        let config = NodeConfig::named("");
        assert!(config.validate().is_err());
    }
}

//! AXON Common Library
//!
//! This crate provides shared constants and configuration loading utilities
//! for all AXON workspace crates.
//!
//! # Module Structure
//!
//! - [`consts`] - Capacities, segment names, sizes, and intervals
//! - [`config`] - Configuration loading traits and types
//!
//! # Usage
//!
//! Add to your `Cargo.toml` with alias for shorter imports:
//! ```toml
//! [dependencies]
//! axon = { package = "axon_common", path = "../axon_common" }
//! ```
//!
//! Then import:
//! ```rust
//! use axon_common::consts::*;
//! use axon_common::config::{ConfigLoader, NodeConfig};
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod consts;

/// Initialize tracing for AXON processes.
///
/// `level` is the configured default filter, normally
/// [`config::NodeConfig::log_level`]; a `RUST_LOG` environment filter takes
/// precedence when set. Repeated calls after the first are no-ops, so every
/// node in a process may call this safely.
pub fn init_tracing(level: config::LogLevel) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

//! Error types for the node layer

use axon_shared_memory::ShmError;
use thiserror::Error;

/// Errors surfaced by nodes, publishers, subscribers and the executor
#[derive(Error, Debug)]
pub enum NodeError {
    /// Substrate failure (segments, channels, bus, registry)
    #[error(transparent)]
    Shm(#[from] ShmError),

    /// Message codec failure
    #[error(transparent)]
    Codec(#[from] crate::message::CodecError),

    /// Node configuration rejected
    #[error(transparent)]
    Config(#[from] axon::config::ConfigError),

    /// The bounded executor queue is saturated
    #[error("executor task queue full (capacity {capacity})")]
    QueueFull {
        /// Configured queue depth
        capacity: usize,
    },

    /// Task submitted after the pool began shutting down
    #[error("executor pool is stopped")]
    PoolStopped,

    /// Thread spawn or join failure
    #[error("thread error: {source}")]
    Thread {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },
}

/// Result type for node layer operations
pub type NodeResult<T> = Result<T, NodeError>;

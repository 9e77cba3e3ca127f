//! Error types for shared memory operations

use thiserror::Error;

/// Errors that can occur across the shared memory substrate
#[derive(Error, Debug)]
pub enum ShmError {
    /// Segment or channel name violates POSIX naming rules
    #[error("Invalid segment name: {name}")]
    NameInvalid {
        /// Offending name
        name: String,
    },

    /// Segment already exists
    #[error("Segment already exists: {name}")]
    AlreadyExists {
        /// Segment name
        name: String,
    },

    /// Segment not found
    #[error("Segment not found: {name}")]
    NotFound {
        /// Segment name
        name: String,
    },

    /// Invalid segment size
    #[error("Invalid segment size: {size} bytes")]
    InvalidSize {
        /// Attempted size in bytes
        size: usize,
    },

    /// A bounded table or bit-set is full
    #[error("Capacity exhausted: {what} (limit {limit})")]
    Capacity {
        /// Which resource ran out
        what: &'static str,
        /// The configured limit
        limit: usize,
    },

    /// Operation on a resource that has not been attached yet
    #[error("Resource not initialized")]
    Uninitialized,

    /// I/O beyond the payload bounds
    #[error("Out of range: offset {offset} + len {len} exceeds payload {payload}")]
    OutOfRange {
        /// Requested offset
        offset: usize,
        /// Requested length
        len: usize,
        /// Payload size
        payload: usize,
    },

    /// A process-shared mutex or condition variable operation failed
    #[error("Lock operation failed: {op} (errno {errno})")]
    Lock {
        /// The pthread operation that failed
        op: &'static str,
        /// Raw errno value
        errno: i32,
    },

    /// Registry image codec failure
    #[error("Serialization error: {source}")]
    Serialization {
        /// Source JSON error
        #[from]
        source: serde_json::Error,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// Nix system call error
    #[error("System call error: {source}")]
    Sys {
        /// Source nix error
        #[from]
        source: nix::Error,
    },
}

/// Result type for shared memory operations
pub type ShmResult<T> = Result<T, ShmError>;

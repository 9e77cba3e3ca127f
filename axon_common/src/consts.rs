//! AXON system constants.
//!
//! These constants define the fundamental parameters of the AXON shared
//! memory transport. They are the single source of truth - all other crates
//! should import from here.
//!
//! The magic words live in `axon_shared_memory` next to the headers they
//! stamp; everything that is a capacity, a size, a name, or an interval is
//! defined below.

/// Maximum number of node slots in the registry.
///
/// A node slot is reusable once its owner is marked dead, so this bounds
/// concurrently alive nodes, not nodes over the lifetime of the system.
pub const MAX_NODES: usize = 100;

/// Maximum number of topic declarations (publish or subscribe) per node.
pub const MAX_TOPICS_PER_NODE: usize = 100;

/// Width of the event-flag bit-set, and therefore the maximum number of
/// distinct `(topic, event)` keys a registry instance can ever assign.
///
/// Event ids are monotonic and never reused, so this is a lifetime bound.
pub const EVENT_MAX_COUNT: usize = 1024;

/// Number of `u64` words backing the event bit-set.
pub const EVENT_WORDS: usize = EVENT_MAX_COUNT / 64;

/// Maximum node name length in bytes.
pub const MAX_NODE_NAME_LEN: usize = 100;

/// Maximum topic key length in bytes (the concatenated `topic_event` form).
pub const MAX_TOPIC_NAME_LEN: usize = 100;

/// Maximum length of a POSIX shared memory object name, including the
/// leading separator. Conservative bound well under NAME_MAX.
pub const MAX_SEGMENT_NAME_LEN: usize = 200;

/// Maximum size of a single shared memory segment in bytes.
///
/// POSIX places no hard limit here; 10 MiB keeps a misbehaving payload
/// type from exhausting /dev/shm.
pub const SEGMENT_MAX_SIZE: usize = 10 * 1024 * 1024;

/// Name of the process-global event bus segment.
pub const EVENT_BUS_NAME: &str = "/axon_event_bus";

/// Size of the event bus segment. Header plus the bit-set fit comfortably
/// in a single page.
pub const EVENT_BUS_SIZE: usize = 4096;

/// Name of the process-global registry channel.
pub const REGISTRY_NAME: &str = "/axon_registry";

/// Payload size of the registry channel.
pub const REGISTRY_SIZE: usize = 1024 * 1024;

/// Offset of the nodes-table image inside the registry payload. The topics
/// image occupies `[0, NODES_IMAGE_OFFSET)`.
pub const NODES_IMAGE_OFFSET: usize = 256 * 1024;

/// Upper bound on a single blocking wait in the node spin loop, in
/// milliseconds. Bounds how late the loop observes a stop request.
pub const SPIN_IDLE_CAP_MS: u64 = 100;

/// Interval between node heartbeat updates, in seconds.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 1;

/// A node whose heartbeat is older than this is eligible for the stale
/// sweep, in seconds.
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 3;

/// Default worker thread count for a node's executor pool.
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Capacity of the bounded executor task queue.
pub const TASK_QUEUE_DEPTH: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_words_cover_event_count() {
        assert_eq!(EVENT_WORDS * 64, EVENT_MAX_COUNT);
    }

    #[test]
    fn registry_images_fit_payload() {
        assert!(NODES_IMAGE_OFFSET < REGISTRY_SIZE);
        assert!(REGISTRY_SIZE <= SEGMENT_MAX_SIZE);
    }

    #[test]
    fn global_names_are_well_formed() {
        for name in [EVENT_BUS_NAME, REGISTRY_NAME] {
            assert!(name.starts_with('/'));
            assert_eq!(name.matches('/').count(), 1);
            assert!(name.len() <= MAX_SEGMENT_NAME_LEN);
        }
    }

    #[test]
    fn heartbeat_timeout_exceeds_interval() {
        assert!(HEARTBEAT_TIMEOUT_SECS > HEARTBEAT_INTERVAL_SECS);
    }
}

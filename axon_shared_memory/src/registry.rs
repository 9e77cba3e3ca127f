//! Decentralized registry: node and topic tables persisted as JSON images
//! inside a dedicated backing channel.
//!
//! Every participant process holds its own `Registry` handle over the same
//! named channel. A mutator acquires the channel lock, reloads the affected
//! table from shared memory, applies its change, and rewrites the whole
//! image - so concurrent registrars in other processes are never blindly
//! overwritten, and a writer that crashes mid-update leaves the previous
//! fully-written image intact.

use crate::channel::ShmChannel;
use crate::error::{ShmError, ShmResult};
use axon::consts::{
    EVENT_MAX_COUNT, MAX_NODE_NAME_LEN, MAX_NODES, MAX_TOPIC_NAME_LEN, MAX_TOPICS_PER_NODE,
    NODES_IMAGE_OFFSET, REGISTRY_SIZE,
};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// One `(topic, event)` assignment. The `event_id` is the record's position
/// in the topics table and the bit index on the event bus; once assigned to
/// a key it never migrates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRecord {
    /// Bit index on the event bus.
    pub event_id: u32,
    /// Concatenated `topic_event` key.
    pub name: String,
}

/// One node slot. The slot index is the node id; a dead slot is reusable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Slot index, unique while `is_alive`.
    pub node_id: u32,
    /// Owning OS process id.
    pub pid: u32,
    /// Number of publish declarations.
    pub pub_topic_count: usize,
    /// Number of subscribe declarations.
    pub sub_topic_count: usize,
    /// Human-readable name.
    pub node_name: String,
    /// Liveness flag; cleared on unregister or stale sweep.
    pub is_alive: bool,
    /// Keys this node publishes.
    pub pub_topics: Vec<String>,
    /// Keys this node subscribes to.
    pub sub_topics: Vec<String>,
    /// Epoch seconds of the last heartbeat.
    pub last_heartbeat: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TopicsImage {
    topic_count: usize,
    topics: Vec<TopicRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct NodesImage {
    node_count: usize,
    alive_node_count: usize,
    nodes: Vec<NodeRecord>,
}

/// Handle over the shared registry channel plus a local cache of both
/// tables as of the last operation.
pub struct Registry {
    channel: ShmChannel,
    topics: TopicsImage,
    nodes: NodesImage,
}

const TOPICS_SLOT: (usize, usize) = (0, NODES_IMAGE_OFFSET);
const NODES_SLOT: (usize, usize) = (NODES_IMAGE_OFFSET, REGISTRY_SIZE - NODES_IMAGE_OFFSET);

impl Registry {
    /// Decentralized rendezvous on the registry channel: create it, or
    /// attach and load the tables someone else already persisted.
    pub fn open_or_create(name: &str) -> ShmResult<Self> {
        match ShmChannel::create(name, REGISTRY_SIZE) {
            Ok(channel) => {
                debug!(name, "created registry channel");
                let mut registry = Self {
                    channel,
                    topics: TopicsImage::default(),
                    nodes: NodesImage::default(),
                };
                let mut guard = registry.channel.lock()?;
                store_image(&mut guard, TOPICS_SLOT, &registry.topics)?;
                store_image(&mut guard, NODES_SLOT, &registry.nodes)?;
                drop(guard);
                Ok(registry)
            }
            Err(ShmError::AlreadyExists { .. }) => {
                debug!(name, "attached to existing registry channel");
                let channel = ShmChannel::open(name)?;
                let mut registry = Self {
                    channel,
                    topics: TopicsImage::default(),
                    nodes: NodesImage::default(),
                };
                registry.refresh()?;
                Ok(registry)
            }
            Err(e) => Err(e),
        }
    }

    /// Reload both tables from shared memory.
    pub fn refresh(&mut self) -> ShmResult<()> {
        let guard = self.channel.lock()?;
        self.topics = load_image(&guard, TOPICS_SLOT, "topics");
        self.nodes = load_image(&guard, NODES_SLOT, "nodes");
        Ok(())
    }

    /// Find or assign the event id for `(topic, event)`.
    ///
    /// The id equals the topics-table position at creation time and stays
    /// stable for the registry's lifetime, whichever of publish-declare or
    /// subscribe-declare got here first.
    pub fn register_topic_event(&mut self, topic: &str, event: &str) -> ShmResult<u32> {
        let key = topic_key(topic, event)?;
        let mut guard = self.channel.lock()?;
        let mut topics: TopicsImage = load_image(&guard, TOPICS_SLOT, "topics");

        if let Some(record) = topics.topics.iter().find(|r| r.name == key) {
            let id = record.event_id;
            self.topics = topics;
            return Ok(id);
        }

        if topics.topics.len() >= EVENT_MAX_COUNT {
            return Err(ShmError::Capacity {
                what: "topic events",
                limit: EVENT_MAX_COUNT,
            });
        }

        let event_id = topics.topics.len() as u32;
        topics.topics.push(TopicRecord {
            event_id,
            name: key.clone(),
        });
        topics.topic_count = topics.topics.len();
        store_image(&mut guard, TOPICS_SLOT, &topics)?;
        drop(guard);

        debug!(key = %key, event_id, "registered topic event");
        self.topics = topics;
        Ok(event_id)
    }

    /// Look up the event id for `(topic, event)` without assigning one.
    pub fn lookup_event_id(&mut self, topic: &str, event: &str) -> ShmResult<Option<u32>> {
        let key = topic_key(topic, event)?;
        let guard = self.channel.lock()?;
        self.topics = load_image(&guard, TOPICS_SLOT, "topics");
        Ok(self
            .topics
            .topics
            .iter()
            .find(|r| r.name == key)
            .map(|r| r.event_id))
    }

    /// Claim the lowest dead slot (or append a fresh one) for a node named
    /// `name`, marking it alive with a current heartbeat.
    pub fn register_node(&mut self, name: &str) -> ShmResult<u32> {
        if name.is_empty() || name.len() > MAX_NODE_NAME_LEN {
            return Err(ShmError::NameInvalid {
                name: name.to_string(),
            });
        }

        let mut guard = self.channel.lock()?;
        let mut nodes: NodesImage = load_image(&guard, NODES_SLOT, "nodes");

        let slot = match nodes.nodes.iter().position(|n| !n.is_alive) {
            Some(free) => free,
            None => {
                if nodes.nodes.len() >= MAX_NODES {
                    return Err(ShmError::Capacity {
                        what: "node slots",
                        limit: MAX_NODES,
                    });
                }
                nodes.nodes.push(blank_record(nodes.nodes.len() as u32));
                nodes.nodes.len() - 1
            }
        };

        nodes.nodes[slot] = NodeRecord {
            node_id: slot as u32,
            pid: nix::unistd::getpid().as_raw() as u32,
            pub_topic_count: 0,
            sub_topic_count: 0,
            node_name: name.to_string(),
            is_alive: true,
            pub_topics: Vec::new(),
            sub_topics: Vec::new(),
            last_heartbeat: now_secs(),
        };
        recount(&mut nodes);
        store_image(&mut guard, NODES_SLOT, &nodes)?;
        drop(guard);

        debug!(name, slot, "registered node");
        self.nodes = nodes;
        Ok(slot as u32)
    }

    /// Mark a node slot dead, releasing it for reuse.
    pub fn unregister_node(&mut self, node_id: u32) -> ShmResult<()> {
        let mut guard = self.channel.lock()?;
        let mut nodes: NodesImage = load_image(&guard, NODES_SLOT, "nodes");

        match nodes.nodes.get_mut(node_id as usize) {
            Some(record) => record.is_alive = false,
            None => {
                warn!(node_id, "unregister for unknown node slot");
                return Ok(());
            }
        }
        recount(&mut nodes);
        store_image(&mut guard, NODES_SLOT, &nodes)?;
        drop(guard);

        self.nodes = nodes;
        Ok(())
    }

    /// Refresh a node's heartbeat to the current time.
    pub fn heartbeat(&mut self, node_id: u32) -> ShmResult<()> {
        let mut guard = self.channel.lock()?;
        let mut nodes: NodesImage = load_image(&guard, NODES_SLOT, "nodes");

        if let Some(record) = nodes.nodes.get_mut(node_id as usize) {
            record.last_heartbeat = now_secs();
            store_image(&mut guard, NODES_SLOT, &nodes)?;
        }
        drop(guard);

        self.nodes = nodes;
        Ok(())
    }

    /// Record a publish declaration on a node. Idempotent per key.
    pub fn add_pub_topic(&mut self, node_id: u32, topic: &str, event: &str) -> ShmResult<()> {
        self.add_declaration(node_id, topic, event, DeclKind::Publish)
    }

    /// Record a subscribe declaration on a node. Idempotent per key.
    pub fn add_sub_topic(&mut self, node_id: u32, topic: &str, event: &str) -> ShmResult<()> {
        self.add_declaration(node_id, topic, event, DeclKind::Subscribe)
    }

    /// Drop a publish declaration from a node.
    pub fn remove_pub_topic(&mut self, node_id: u32, topic: &str, event: &str) -> ShmResult<()> {
        self.remove_declaration(node_id, topic, event, DeclKind::Publish)
    }

    /// Drop a subscribe declaration from a node.
    pub fn remove_sub_topic(&mut self, node_id: u32, topic: &str, event: &str) -> ShmResult<()> {
        self.remove_declaration(node_id, topic, event, DeclKind::Subscribe)
    }

    fn add_declaration(
        &mut self,
        node_id: u32,
        topic: &str,
        event: &str,
        kind: DeclKind,
    ) -> ShmResult<()> {
        let key = topic_key(topic, event)?;
        let mut guard = self.channel.lock()?;
        let mut nodes: NodesImage = load_image(&guard, NODES_SLOT, "nodes");

        let Some(record) = nodes.nodes.get_mut(node_id as usize) else {
            return Err(ShmError::Uninitialized);
        };
        let list = match kind {
            DeclKind::Publish => &mut record.pub_topics,
            DeclKind::Subscribe => &mut record.sub_topics,
        };
        if !list.iter().any(|k| k == &key) {
            if list.len() >= MAX_TOPICS_PER_NODE {
                return Err(ShmError::Capacity {
                    what: "topics per node",
                    limit: MAX_TOPICS_PER_NODE,
                });
            }
            list.push(key);
        }
        record.pub_topic_count = record.pub_topics.len();
        record.sub_topic_count = record.sub_topics.len();
        store_image(&mut guard, NODES_SLOT, &nodes)?;
        drop(guard);

        self.nodes = nodes;
        Ok(())
    }

    fn remove_declaration(
        &mut self,
        node_id: u32,
        topic: &str,
        event: &str,
        kind: DeclKind,
    ) -> ShmResult<()> {
        let key = topic_key(topic, event)?;
        let mut guard = self.channel.lock()?;
        let mut nodes: NodesImage = load_image(&guard, NODES_SLOT, "nodes");

        let Some(record) = nodes.nodes.get_mut(node_id as usize) else {
            return Err(ShmError::Uninitialized);
        };
        let list = match kind {
            DeclKind::Publish => &mut record.pub_topics,
            DeclKind::Subscribe => &mut record.sub_topics,
        };
        list.retain(|k| k != &key);
        record.pub_topic_count = record.pub_topics.len();
        record.sub_topic_count = record.sub_topics.len();
        store_image(&mut guard, NODES_SLOT, &nodes)?;
        drop(guard);

        self.nodes = nodes;
        Ok(())
    }

    /// Mark every alive node whose heartbeat is older than `timeout_secs`
    /// dead. Returns how many slots were reaped.
    pub fn reap_stale(&mut self, timeout_secs: u64) -> ShmResult<usize> {
        let now = now_secs();
        let mut guard = self.channel.lock()?;
        let mut nodes: NodesImage = load_image(&guard, NODES_SLOT, "nodes");

        let mut reaped = 0;
        for record in nodes.nodes.iter_mut() {
            if record.is_alive && now.saturating_sub(record.last_heartbeat) > timeout_secs {
                warn!(
                    node_id = record.node_id,
                    name = %record.node_name,
                    "reaping stale node"
                );
                record.is_alive = false;
                reaped += 1;
            }
        }
        if reaped > 0 {
            recount(&mut nodes);
            store_image(&mut guard, NODES_SLOT, &nodes)?;
        }
        drop(guard);

        self.nodes = nodes;
        Ok(reaped)
    }

    /// Liveness of one slot as currently persisted.
    pub fn is_node_alive(&mut self, node_id: u32) -> ShmResult<bool> {
        let guard = self.channel.lock()?;
        self.nodes = load_image(&guard, NODES_SLOT, "nodes");
        Ok(self
            .nodes
            .nodes
            .get(node_id as usize)
            .is_some_and(|n| n.is_alive))
    }

    /// Rename a node in place.
    pub fn update_node_name(&mut self, node_id: u32, name: &str) -> ShmResult<()> {
        if name.is_empty() || name.len() > MAX_NODE_NAME_LEN {
            return Err(ShmError::NameInvalid {
                name: name.to_string(),
            });
        }
        let mut guard = self.channel.lock()?;
        let mut nodes: NodesImage = load_image(&guard, NODES_SLOT, "nodes");

        let Some(record) = nodes.nodes.get_mut(node_id as usize) else {
            return Err(ShmError::Uninitialized);
        };
        record.node_name = name.to_string();
        store_image(&mut guard, NODES_SLOT, &nodes)?;
        drop(guard);

        self.nodes = nodes;
        Ok(())
    }

    /// Human-readable summary of both tables, for diagnostics.
    pub fn dump(&mut self) -> ShmResult<String> {
        use std::fmt::Write;

        self.refresh()?;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "topics: {} / nodes: {} ({} alive)",
            self.topics.topic_count, self.nodes.node_count, self.nodes.alive_node_count
        );
        for record in &self.topics.topics {
            let _ = writeln!(out, "  event {:>4}  {}", record.event_id, record.name);
        }
        for record in &self.nodes.nodes {
            let _ = writeln!(
                out,
                "  node {:>3}  {:<24} pid {:>7}  {}  pubs {} subs {}",
                record.node_id,
                record.node_name,
                record.pid,
                if record.is_alive { "alive" } else { "dead " },
                record.pub_topic_count,
                record.sub_topic_count,
            );
        }
        Ok(out)
    }

    /// Total node slots in the table, alive or dead.
    pub fn node_count(&self) -> usize {
        self.nodes.node_count
    }

    /// Number of alive slots.
    pub fn alive_node_count(&self) -> usize {
        self.nodes.alive_node_count
    }

    /// The node record in `node_id`'s slot, as of the last refresh.
    pub fn node(&self, node_id: u32) -> Option<&NodeRecord> {
        self.nodes.nodes.get(node_id as usize)
    }

    /// Topics table as of the last refresh.
    pub fn topics(&self) -> &[TopicRecord] {
        &self.topics.topics
    }
}

enum DeclKind {
    Publish,
    Subscribe,
}

fn topic_key(topic: &str, event: &str) -> ShmResult<String> {
    let key = format!("{}_{}", topic, event);
    if topic.is_empty() || event.is_empty() || key.len() > MAX_TOPIC_NAME_LEN {
        return Err(ShmError::NameInvalid { name: key });
    }
    Ok(key)
}

fn blank_record(node_id: u32) -> NodeRecord {
    NodeRecord {
        node_id,
        pid: 0,
        pub_topic_count: 0,
        sub_topic_count: 0,
        node_name: String::new(),
        is_alive: false,
        pub_topics: Vec::new(),
        sub_topics: Vec::new(),
        last_heartbeat: 0,
    }
}

fn recount(nodes: &mut NodesImage) {
    nodes.node_count = nodes.nodes.len();
    nodes.alive_node_count = nodes.nodes.iter().filter(|n| n.is_alive).count();
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Parse one table image out of its slot. The image is NUL-padded; bytes
/// past the first NUL are ignored. Anything unparseable defaults to an
/// empty table so a corrupted registry degrades instead of wedging.
fn load_image<T: Default + serde::de::DeserializeOwned>(
    guard: &crate::channel::ChannelGuard<'_>,
    slot: (usize, usize),
    table: &'static str,
) -> T {
    let (offset, len) = slot;
    let bytes = match guard.read_vec(len, offset) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(table, error = %e, "registry image read failed, using empty table");
            return T::default();
        }
    };
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    let text = &bytes[..end];
    if text.iter().all(|b| b.is_ascii_whitespace()) {
        return T::default();
    }
    match serde_json::from_slice(text) {
        Ok(image) => image,
        Err(e) => {
            warn!(table, error = %e, "registry image parse failed, using empty table");
            T::default()
        }
    }
}

/// Rewrite one table image end-to-end into its slot, NUL-padded so a
/// shorter image never leaves a stale tail behind.
fn store_image<T: Serialize>(
    guard: &mut crate::channel::ChannelGuard<'_>,
    slot: (usize, usize),
    image: &T,
) -> ShmResult<()> {
    let (offset, len) = slot;
    let json = serde_json::to_vec(image)?;
    if json.len() >= len {
        return Err(ShmError::Capacity {
            what: "registry image slot",
            limit: len,
        });
    }
    let mut padded = vec![0u8; len];
    padded[..json.len()].copy_from_slice(&json);
    guard.write(&padded, offset)
}

//! Subscribers and the non-generic dispatch surface the executor drives.

use crate::error::NodeResult;
use crate::message::Serializer;
use crate::thread_pool::Task;
use axon_shared_memory::{Registry, ShmChannel, ShmError};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Non-generic view of a subscriber, letting the node hold a heterogeneous
/// collection and the spin loop dispatch without knowing message types.
pub trait Dispatch: Send + Sync {
    /// The concatenated `topic_event` key, for diagnostics.
    fn key(&self) -> String;

    /// Event bit this subscriber listens on, once assigned.
    fn event_id(&self) -> Option<u32>;

    /// Retry event-id assignment for a subscriber that registered while
    /// the registry was full or unreachable.
    fn try_bind(&self, registry: &mut Registry);

    /// Copy the current payload out of shared memory (locked, in the
    /// calling spin thread) and return a value-captured thunk that
    /// deserializes and runs the user callback on a worker. The worker
    /// never touches shared memory.
    fn make_task(&self) -> NodeResult<Task>;
}

/// Receives messages of type `M` from one `(topic, event)` key.
///
/// If the topic channel does not exist at subscribe time the subscription
/// records intent; the first publish creates the channel and the executor
/// attaches on the first trigger.
pub struct Subscriber<M, S: Serializer<M>> {
    topic: String,
    event: String,
    codec: Arc<S>,
    channel: Mutex<Option<ShmChannel>>,
    event_id: Mutex<Option<u32>>,
    callback: Arc<dyn Fn(&M) + Send + Sync>,
}

impl<M: 'static, S: Serializer<M>> Subscriber<M, S> {
    pub(crate) fn new(
        topic: String,
        event: String,
        codec: S,
        callback: impl Fn(&M) + Send + Sync + 'static,
        registry: &Arc<Mutex<Registry>>,
    ) -> NodeResult<Self> {
        // A full or unreachable registry defers the assignment; the spin
        // loop retries through `try_bind` until a bit is available.
        let event_id = match registry.lock().register_topic_event(&topic, &event) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(topic = %topic, event = %event, error = %e, "event id assignment deferred");
                None
            }
        };

        let channel_name = format!("{}_{}", topic, event);
        let channel = match ShmChannel::open(&channel_name) {
            Ok(chan) => Some(chan),
            Err(ShmError::NotFound { .. }) => {
                debug!(
                    channel = %channel_name,
                    "topic channel not published yet, subscription records intent"
                );
                None
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            topic,
            event,
            codec: Arc::new(codec),
            channel: Mutex::new(channel),
            event_id: Mutex::new(event_id),
            callback: Arc::new(callback),
        })
    }

    /// Topic name as declared (including the node's prefix).
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Event name within the topic.
    pub fn event(&self) -> &str {
        &self.event
    }

    fn channel_name(&self) -> String {
        format!("{}_{}", self.topic, self.event)
    }
}

impl<M: 'static, S: Serializer<M>> Dispatch for Subscriber<M, S> {
    fn key(&self) -> String {
        self.channel_name()
    }

    fn event_id(&self) -> Option<u32> {
        *self.event_id.lock()
    }

    fn try_bind(&self, registry: &mut Registry) {
        let mut slot = self.event_id.lock();
        if slot.is_some() {
            return;
        }
        match registry.register_topic_event(&self.topic, &self.event) {
            Ok(id) => *slot = Some(id),
            Err(e) => warn!(key = %self.channel_name(), error = %e, "event id assignment failed"),
        }
    }

    fn make_task(&self) -> NodeResult<Task> {
        let mut slot = self.channel.lock();
        if slot.is_none() {
            // The trigger proves a publisher exists, so the deferred
            // attach resolves here.
            *slot = Some(ShmChannel::open(&self.channel_name())?);
        }
        let Some(chan) = slot.as_ref() else {
            return Err(ShmError::Uninitialized.into());
        };
        let bytes = chan.read_vec(chan.payload_len(), 0)?;
        drop(slot);

        let codec = Arc::clone(&self.codec);
        let callback = Arc::clone(&self.callback);
        let key = self.channel_name();
        Ok(Box::new(move || match codec.deserialize(&bytes) {
            Ok(msg) => callback(&msg),
            Err(e) => warn!(key = %key, error = %e, "dropping undecodable message"),
        }))
    }
}

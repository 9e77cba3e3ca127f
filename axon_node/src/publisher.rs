//! Latest-value publisher over a `(topic, event)` channel.

use crate::error::{NodeError, NodeResult};
use crate::message::{CodecError, Serializer};
use axon_shared_memory::{EventBus, Registry, ShmChannel, ShmError};
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Publishes messages of type `M` on one `(topic, event)` key.
///
/// The topic channel is created on first publish, sized to the codec's
/// fixed width; later publishes reuse it. A publish overwrites the payload
/// slot - there is no queue, the latest value wins.
///
/// The registry and event bus handles are borrowed from the owning node;
/// the publisher never unlinks either.
pub struct Publisher<M, S: Serializer<M>> {
    topic: String,
    event: String,
    codec: S,
    channel: Mutex<Option<ShmChannel>>,
    event_id: Mutex<Option<u32>>,
    registry: Arc<Mutex<Registry>>,
    bus: Arc<EventBus>,
    _marker: PhantomData<fn(&M)>,
}

impl<M, S: Serializer<M>> Publisher<M, S> {
    pub(crate) fn new(
        topic: String,
        event: String,
        codec: S,
        registry: Arc<Mutex<Registry>>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            topic,
            event,
            codec,
            channel: Mutex::new(None),
            event_id: Mutex::new(None),
            registry,
            bus,
            _marker: PhantomData,
        }
    }

    /// Publish `msg`: serialize, write the channel payload, then trigger
    /// the event bit - strictly in that order. Any failure before the
    /// trigger leaves the bus untouched.
    pub fn publish(&self, msg: &M) -> NodeResult<()> {
        let width = self.codec.serialized_size(msg);
        let mut buf = vec![0u8; width];
        self.codec.serialize(msg, &mut buf)?;

        {
            let mut slot = self.channel.lock();
            if slot.is_none() {
                let chan = ShmChannel::open_or_create(&self.channel_name(), width)?;
                if chan.payload_len() != width {
                    return Err(NodeError::Codec(CodecError::SizeMismatch {
                        channel: chan.payload_len(),
                        codec: width,
                    }));
                }
                debug!(channel = chan.name(), width, "publisher bound topic channel");
                *slot = Some(chan);
            }
            let Some(chan) = slot.as_ref() else {
                return Err(NodeError::Shm(ShmError::Uninitialized));
            };
            chan.write(&buf, 0)?;
        }

        let event_id = self.ensure_event_id()?;
        self.bus.trigger(event_id as usize)?;
        Ok(())
    }

    /// The event id this publisher triggers, once assigned.
    pub fn event_id(&self) -> Option<u32> {
        *self.event_id.lock()
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

    fn ensure_event_id(&self) -> NodeResult<u32> {
        let mut slot = self.event_id.lock();
        if let Some(id) = *slot {
            return Ok(id);
        }
        let id = self
            .registry
            .lock()
            .register_topic_event(&self.topic, &self.event)?;
        *slot = Some(id);
        Ok(id)
    }

    pub(crate) fn prime_event_id(&self, id: u32) {
        *self.event_id.lock() = Some(id);
    }
}

//! # AXON Shared Memory Substrate
//!
//! The discovery and event-dispatch substrate underneath the AXON pub/sub
//! middleware. Everything here lives in named POSIX shared memory on a
//! single host; there is no broker process and no socket anywhere.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐   write payload    ┌─────────────────────┐
//! │  Publisher   ├───────────────────►│ ShmChannel (topic)  │
//! │  (proc A)    │                    │ [Header|Payload]    │
//! └──────┬───────┘                    └─────────────────────┘
//!        │ trigger(event_id)                    ▲ read payload
//!        ▼                                      │
//! ┌──────────────┐    wait/wake       ┌─────────┴───────────┐
//! │  EventBus    │◄──────────────────►│ Subscriber (proc B) │
//! │ [bit-set]    │                    └─────────────────────┘
//! └──────────────┘
//!        ▲
//!        │ event_id assignment, node slots
//! ┌──────┴───────┐
//! │  Registry    │  (JSON tables in their own channel)
//! └──────────────┘
//! ```
//!
//! Three shared structures cooperate:
//!
//! - [`ShmChannel`] - one latest-value payload slot per `(topic, event)`
//!   key, guarded by a process-shared mutex in its header.
//! - [`EventBus`] - a single bit-set segment; publishers set a bit and
//!   broadcast, executors wait and clear exactly the bits they dispatched.
//! - [`Registry`] - node and topic tables persisted as whole JSON images
//!   in a backing channel, mutable by any participant.
//!
//! Every region embeds its mutex/condition-variable pair in a fixed header
//! prefix, initialized with `PTHREAD_PROCESS_SHARED`, with a magic word
//! written last as the cross-process "init complete" witness.
//!
//! ## Ordering
//!
//! Within one publish: payload write happens-before the bus trigger.
//! Across topics there is no ordering. A slow reader observes the most
//! recent value at the instant it acquires the channel lock; intermediate
//! values are lost by design.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod discovery;
pub mod error;
pub mod event_bus;
pub mod registry;
pub mod segment;
mod sync;

pub use channel::{CHANNEL_MAGIC, ChannelGuard, ChannelHeader, ShmChannel};
pub use discovery::{SegmentInfo, SegmentScan};
pub use error::{ShmError, ShmResult};
pub use event_bus::{EVENT_BUS_MAGIC, EventBus, EventSet};
pub use registry::{NodeRecord, Registry, TopicRecord};
pub use segment::SharedSegment;

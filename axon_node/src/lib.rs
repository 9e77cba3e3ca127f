//! # AXON Node Layer
//!
//! Participant-facing layer of the AXON pub/sub middleware: nodes,
//! publishers, subscribers, timers and the per-process executor, all over
//! the shared memory substrate in `axon_shared_memory`.
//!
//! A node registers itself in the shared registry, rendezvouses with the
//! process-global event bus, and runs a spin thread that waits on the bus,
//! maps set bits to local subscribers, and hands value-captured tasks to a
//! bounded worker pool. There is no broker and no async runtime; every
//! loop is a plain blocking thread.
//!
//! ```rust,no_run
//! use axon_node::{JsonCodec, Node};
//!
//! # fn main() -> Result<(), axon_node::NodeError> {
//! let node = Node::new("demo")?;
//! let publisher = node.create_publisher::<i32, _>("temp", "update", JsonCodec::new())?;
//! let _subscriber = node.create_subscriber::<i32, _>(
//!     "temp",
//!     "update",
//!     JsonCodec::new(),
//!     |value| println!("temp: {value}"),
//! )?;
//!
//! node.spin()?;
//! publisher.publish(&23)?;
//! # node.stop();
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod error;
pub mod message;
pub mod node;
pub mod publisher;
pub mod signals;
pub mod subscriber;
pub mod thread_pool;
pub mod timer;

pub use error::{NodeError, NodeResult};
pub use message::{CodecError, JsonCodec, PodCodec, Serializer};
pub use node::Node;
pub use publisher::Publisher;
pub use subscriber::{Dispatch, Subscriber};
pub use thread_pool::{Task, ThreadPool};
pub use timer::Timer;

//! Ordered pub/sub message plane for OpenDT services.
//!
//! [`MessagePlane`] abstracts the broker the services talk through: an
//! ordered log with two channel semantics, append-only **stream** channels
//! and key/value **compacted** channels where subscribers read the latest
//! value per key before receiving updates. The shipped implementation,
//! [`MemoryPlane`], keeps the log in process; a Kafka-backed plane would
//! implement the same trait.

pub mod channel;
pub mod error;
pub mod memory;
pub mod plane;

pub use channel::{Channel, ChannelKind};
pub use error::{BrokerError, Result};
pub use memory::MemoryPlane;
pub use plane::{publish_json, MessagePlane, Record, Subscription};

//! Message plane trait definition.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::channel::Channel;
use crate::error::Result;

/// One delivered message. Offsets are contiguous per channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub offset: u64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// A consumer's handle on a channel. Records arrive in partition order and
/// are intended to be processed serially by a single task.
pub struct Subscription {
    pub(crate) receiver: mpsc::UnboundedReceiver<Record>,
}

impl Subscription {
    /// Receive the next record, or `None` once the plane shuts down.
    pub async fn recv(&mut self) -> Option<Record> {
        self.receiver.recv().await
    }

    /// Non-blocking drain used by tests and replay loops.
    pub fn try_recv(&mut self) -> Option<Record> {
        self.receiver.try_recv().ok()
    }
}

/// Broker contract used by every OpenDT service.
///
/// `publish` is at-least-once. `subscribe` delivers in partition order; for
/// compacted channels the latest record per key is replayed before live
/// updates. Committed offsets let consumers make forward progress after a
/// restart. Implementations must be `Send + Sync` for use behind
/// `Arc<dyn MessagePlane>`.
pub trait MessagePlane: Send + Sync {
    /// Append a payload, returning its offset.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`](crate::BrokerError) if the plane is closed.
    fn publish(&self, channel: &Channel, key: Option<&str>, payload: &[u8]) -> Result<u64>;

    /// Attach a consumer group to a channel. Streams replay from the group's
    /// committed offset; compacted channels replay the latest value per key.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`](crate::BrokerError) if the plane is closed.
    fn subscribe(&self, channel: &Channel, group: &str) -> Result<Subscription>;

    /// The highest offset the group has committed on this channel, if any.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`](crate::BrokerError) on plane failure.
    fn committed(&self, channel: &Channel, group: &str) -> Result<Option<u64>>;

    /// Record that the group has fully processed `offset` on this channel.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`](crate::BrokerError) on plane failure.
    fn commit(&self, channel: &Channel, group: &str, offset: u64) -> Result<()>;
}

/// Serialize `value` as JSON and publish it.
///
/// # Errors
///
/// Returns [`BrokerError`](crate::BrokerError) on serialization or publish
/// failure.
pub fn publish_json<T: Serialize>(
    plane: &dyn MessagePlane,
    channel: &Channel,
    key: Option<&str>,
    value: &T,
) -> Result<u64> {
    let payload = serde_json::to_vec(value)?;
    plane.publish(channel, key, &payload)
}

//! In-process message plane implementation.
//!
//! Keeps every channel as an in-memory ordered log with a per-key compaction
//! index. Publish and subscribe share one lock, so a new subscriber's replay
//! and subsequent live deliveries never race or duplicate.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::channel::{Channel, ChannelKind};
use crate::error::{BrokerError, Result};
use crate::plane::{MessagePlane, Record, Subscription};

#[derive(Default)]
struct ChannelLog {
    records: Vec<Record>,
    /// Latest record index per key; only maintained for compacted channels.
    compaction: BTreeMap<String, usize>,
    subscribers: Vec<mpsc::UnboundedSender<Record>>,
    /// Committed offset per consumer group.
    committed: HashMap<String, u64>,
}

/// An ordered in-process broker suitable for single-binary deployments and
/// tests. Implements the full [`MessagePlane`] contract including
/// read-latest-on-subscribe for compacted channels.
#[derive(Default)]
pub struct MemoryPlane {
    channels: Mutex<HashMap<&'static str, ChannelLog>>,
}

impl MemoryPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records ever published to a channel.
    pub fn len(&self, channel: &Channel) -> usize {
        self.channels
            .lock()
            .map(|c| c.get(channel.name).map_or(0, |log| log.records.len()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, channel: &Channel) -> bool {
        self.len(channel) == 0
    }
}

impl MessagePlane for MemoryPlane {
    fn publish(&self, channel: &Channel, key: Option<&str>, payload: &[u8]) -> Result<u64> {
        let mut channels = self.channels.lock().map_err(|_| BrokerError::LockPoisoned)?;
        let log = channels.entry(channel.name).or_default();

        let offset = log.records.len() as u64;
        let record = Record {
            offset,
            key: key.map(str::to_owned),
            payload: payload.to_vec(),
        };

        if channel.kind == ChannelKind::Compacted {
            let key = record.key.clone().unwrap_or_default();
            log.compaction.insert(key, log.records.len());
        }
        log.records.push(record.clone());

        // Fan out to live subscribers, dropping the ones that went away.
        log.subscribers
            .retain(|sender| sender.send(record.clone()).is_ok());

        Ok(offset)
    }

    fn subscribe(&self, channel: &Channel, group: &str) -> Result<Subscription> {
        let mut channels = self.channels.lock().map_err(|_| BrokerError::LockPoisoned)?;
        let log = channels.entry(channel.name).or_default();
        let (sender, receiver) = mpsc::unbounded_channel();

        match channel.kind {
            ChannelKind::Compacted => {
                for &idx in log.compaction.values() {
                    let _ = sender.send(log.records[idx].clone());
                }
            }
            ChannelKind::Stream => {
                let resume_from = log
                    .committed
                    .get(group)
                    .map_or(0, |&committed| committed + 1);
                for record in log.records.iter().skip(resume_from as usize) {
                    let _ = sender.send(record.clone());
                }
            }
        }

        log.subscribers.push(sender);
        tracing::debug!(
            channel = channel.name,
            group,
            backlog = log.records.len(),
            "Subscriber attached"
        );
        Ok(Subscription { receiver })
    }

    fn committed(&self, channel: &Channel, group: &str) -> Result<Option<u64>> {
        let channels = self.channels.lock().map_err(|_| BrokerError::LockPoisoned)?;
        Ok(channels
            .get(channel.name)
            .and_then(|log| log.committed.get(group).copied()))
    }

    fn commit(&self, channel: &Channel, group: &str, offset: u64) -> Result<()> {
        let mut channels = self.channels.lock().map_err(|_| BrokerError::LockPoisoned)?;
        let log = channels.entry(channel.name).or_default();
        let entry = log.committed.entry(group.to_owned()).or_insert(offset);
        *entry = (*entry).max(offset);
        Ok(())
    }
}

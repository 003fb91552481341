//! JSONL event trace replay.
//!
//! Stands in for the live replay producer: each line names a channel and a
//! payload, and is published onto the message plane in file order. Workload
//! and power payloads are validated downstream; topology lines land on the
//! compacted observed-topology channel under the datacenter key.

use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use serde::Deserialize;

use opendt_broker::{channel, MessagePlane};
use opendt_types::DATACENTER_KEY;

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("failed to read trace file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse JSON at line {line}: {source}")]
    JsonParse {
        line: usize,
        source: serde_json::Error,
    },

    #[error("unknown channel '{channel}' at line {line}")]
    UnknownChannel { line: usize, channel: String },

    #[error("broker error: {0}")]
    Broker(#[from] opendt_broker::BrokerError),
}

/// One trace line: `{"channel":"workload","value":{...}}`.
#[derive(Debug, Deserialize)]
struct TraceRecord {
    channel: String,
    value: serde_json::Value,
}

/// Counts of records published per channel.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub workload: u64,
    pub power: u64,
    pub topology: u64,
}

/// Replay a JSONL trace file onto the plane in file order.
pub fn replay_file(plane: &dyn MessagePlane, path: &Path) -> Result<ReplayStats, ReplayError> {
    let file = std::fs::File::open(path)?;
    replay_reader(plane, BufReader::new(file))
}

pub fn replay_reader<R: Read>(
    plane: &dyn MessagePlane,
    reader: BufReader<R>,
) -> Result<ReplayStats, ReplayError> {
    let mut stats = ReplayStats::default();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let record: TraceRecord =
            serde_json::from_str(trimmed).map_err(|e| ReplayError::JsonParse {
                line: line_num + 1,
                source: e,
            })?;

        let payload = serde_json::to_vec(&record.value).map_err(|e| ReplayError::JsonParse {
            line: line_num + 1,
            source: e,
        })?;
        match record.channel.as_str() {
            "workload" => {
                plane.publish(&channel::WORKLOAD, None, &payload)?;
                stats.workload += 1;
            }
            "power" => {
                plane.publish(&channel::POWER, None, &payload)?;
                stats.power += 1;
            }
            "topology" | "topology.observed" => {
                plane.publish(&channel::TOPOLOGY_OBSERVED, Some(DATACENTER_KEY), &payload)?;
                stats.topology += 1;
            }
            other => {
                return Err(ReplayError::UnknownChannel {
                    line: line_num + 1,
                    channel: other.to_string(),
                });
            }
        }
    }

    tracing::info!(
        workload = stats.workload,
        power = stats.power,
        topology = stats.topology,
        "Trace replay complete"
    );
    Ok(stats)
}

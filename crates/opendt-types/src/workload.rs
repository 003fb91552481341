//! Workload channel message wrapper.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::Task;
use crate::timestamp;

/// A message on the `workload` channel: either a task submission or a
/// heartbeat that only advances the watermark. Emitted timestamps along a
/// partition are non-decreasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum WorkloadMessage {
    Task {
        #[serde(with = "timestamp")]
        timestamp: DateTime<Utc>,
        task: Task,
    },
    Heartbeat {
        #[serde(with = "timestamp")]
        timestamp: DateTime<Utc>,
        /// Always absent for heartbeats; kept so the wire shape matches
        /// `{"message_type":"heartbeat","timestamp":...,"task":null}`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task: Option<Task>,
    },
}

impl WorkloadMessage {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Task { timestamp, .. } | Self::Heartbeat { timestamp, .. } => *timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_task_message() {
        let msg: WorkloadMessage = serde_json::from_str(
            r#"{"message_type":"task","timestamp":"2024-01-01T00:05:30",
                "task":{"id":123,"submission_time":"2024-01-01T00:05:30","duration":120500,
                        "cpu_count":4,"cpu_capacity":2400.0,"mem_capacity":4096,"fragments":[]}}"#,
        )
        .unwrap();
        match msg {
            WorkloadMessage::Task { task, .. } => assert_eq!(task.id, 123),
            WorkloadMessage::Heartbeat { .. } => panic!("expected task"),
        }
    }

    #[test]
    fn parses_heartbeat_with_null_task() {
        let msg: WorkloadMessage = serde_json::from_str(
            r#"{"message_type":"heartbeat","timestamp":"2024-01-01T00:06:00","task":null}"#,
        )
        .unwrap();
        assert!(matches!(msg, WorkloadMessage::Heartbeat { .. }));
        assert_eq!(msg.timestamp().timestamp(), 1_704_067_560);
    }

    #[test]
    fn rejects_unknown_message_type() {
        let result: Result<WorkloadMessage, _> = serde_json::from_str(
            r#"{"message_type":"gossip","timestamp":"2024-01-01T00:06:00"}"#,
        );
        assert!(result.is_err());
    }
}

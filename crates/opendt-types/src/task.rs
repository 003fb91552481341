//! Workload task and fragment records.

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use crate::timestamp;

/// A computational task from the workload trace. Immutable once accepted;
/// unique by `id` within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(deserialize_with = "deserialize_task_id")]
    pub id: i64,
    /// Event-time submission timestamp.
    #[serde(with = "timestamp")]
    pub submission_time: DateTime<Utc>,
    /// Task duration in milliseconds.
    pub duration: i64,
    pub cpu_count: i32,
    /// MHz per CPU core.
    pub cpu_capacity: f64,
    /// Memory capacity in MB.
    pub mem_capacity: i64,
    /// Ordered execution profile. Summed fragment durations need not equal
    /// the task duration (simulator semantics).
    #[serde(default)]
    pub fragments: Vec<Fragment>,
}

impl Task {
    pub fn submission_millis(&self) -> i64 {
        self.submission_time.timestamp_millis()
    }
}

/// One step of a task's execution profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: i64,
    #[serde(default)]
    pub task_id: i64,
    /// Fragment duration in milliseconds.
    pub duration: i64,
    pub cpu_count: i32,
    pub cpu_usage: f64,
}

/// Task ids arrive either as plain integers or as `"task-123"` strings,
/// depending on the producer.
fn deserialize_task_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Int(i64),
        Str(String),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Int(id) => Ok(id),
        RawId::Str(s) => {
            let digits = s.strip_prefix("task-").unwrap_or(&s);
            digits
                .parse::<i64>()
                .map_err(|_| de::Error::custom(format!("invalid task id '{s}'")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_id() {
        let task: Task = serde_json::from_str(
            r#"{"id":123,"submission_time":"2024-01-01T00:00:00Z","duration":120500,
                "cpu_count":4,"cpu_capacity":2400.0,"mem_capacity":4096}"#,
        )
        .unwrap();
        assert_eq!(task.id, 123);
        assert!(task.fragments.is_empty());
    }

    #[test]
    fn parses_prefixed_string_id() {
        let task: Task = serde_json::from_str(
            r#"{"id":"task-77","submission_time":1704067200000,"duration":1000,
                "cpu_count":1,"cpu_capacity":2000.0,"mem_capacity":1024}"#,
        )
        .unwrap();
        assert_eq!(task.id, 77);
        assert_eq!(task.submission_time.timestamp(), 1_704_067_200);
    }

    #[test]
    fn rejects_non_numeric_string_id() {
        let result: Result<Task, _> = serde_json::from_str(
            r#"{"id":"banana","submission_time":"2024-01-01T00:00:00Z","duration":0,
                "cpu_count":1,"cpu_capacity":0.0,"mem_capacity":0}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn task_roundtrip_preserves_fragments() {
        let task = Task {
            id: 5,
            submission_time: DateTime::from_timestamp(1_704_067_200, 0).unwrap(),
            duration: 60_000,
            cpu_count: 2,
            cpu_capacity: 3000.0,
            mem_capacity: 8192,
            fragments: vec![Fragment {
                id: 1,
                task_id: 5,
                duration: 30_000,
                cpu_count: 2,
                cpu_usage: 0.8,
            }],
        };
        let json = serde_json::to_string(&task).unwrap();
        let parsed: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, task);
    }
}

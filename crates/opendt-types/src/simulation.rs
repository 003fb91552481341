//! Structured results of simulator invocations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timestamp;

/// Terminal status of a simulator invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Ok,
    Error,
}

/// One point of a simulated timeseries: `(epoch millis, value)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint(pub i64, pub f64);

impl SeriesPoint {
    pub fn time_ms(&self) -> i64 {
        self.0
    }

    pub fn value(&self) -> f64 {
        self.1
    }
}

/// Parsed outcome of one external simulator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub status: ResultStatus,
    #[serde(rename = "energyKWh")]
    pub energy_kwh: f64,
    pub mean_cpu_util: f64,
    #[serde(rename = "maxPowerW")]
    pub max_power_w: f64,
    pub runtime_hours: f64,
    #[serde(default)]
    pub power_series: Vec<SeriesPoint>,
    #[serde(default)]
    pub cpu_series: Vec<SeriesPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

impl SimulationResult {
    /// The result of simulating an empty workload: nothing ran, all zero.
    pub fn empty_ok() -> Self {
        Self {
            status: ResultStatus::Ok,
            energy_kwh: 0.0,
            mean_cpu_util: 0.0,
            max_power_w: 0.0,
            runtime_hours: 0.0,
            power_series: Vec::new(),
            cpu_series: Vec::new(),
            error_msg: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Error,
            energy_kwh: 0.0,
            mean_cpu_util: 0.0,
            max_power_w: 0.0,
            runtime_hours: 0.0,
            power_series: Vec::new(),
            cpu_series: Vec::new(),
            error_msg: Some(msg.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResultStatus::Ok
    }
}

/// One message on the `results` stream, emitted per closed window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub run_id: String,
    pub window_id: u64,
    #[serde(with = "timestamp")]
    pub window_start: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub window_end: DateTime<Utc>,
    pub task_count: u64,
    pub topology_fingerprint: String,
    pub result: SimulationResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_points_serialize_as_pairs() {
        let result = SimulationResult {
            power_series: vec![SeriesPoint(0, 120.0), SeriesPoint(150_000, 130.5)],
            ..SimulationResult::empty_ok()
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["powerSeries"][0], serde_json::json!([0, 120.0]));
        assert_eq!(json["status"], "ok");
    }

    #[test]
    fn error_result_carries_message() {
        let result = SimulationResult::error("exit code 1");
        assert_eq!(result.status, ResultStatus::Error);
        assert_eq!(result.error_msg.as_deref(), Some("exit code 1"));
        let json = serde_json::to_string(&result).unwrap();
        let parsed: SimulationResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, result);
    }

    #[test]
    fn report_wire_shape() {
        let report = SimulationReport {
            run_id: "window-3".into(),
            window_id: 3,
            window_start: DateTime::from_timestamp(900, 0).unwrap(),
            window_end: DateTime::from_timestamp(1200, 0).unwrap(),
            task_count: 7,
            topology_fingerprint: "abc123".into(),
            result: SimulationResult::empty_ok(),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["runId"], "window-3");
        assert_eq!(json["windowId"], 3);
        assert_eq!(json["taskCount"], 7);
        assert_eq!(json["topologyFingerprint"], "abc123");
    }
}

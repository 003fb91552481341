//! Ground-truth power measurement records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timestamp;

/// A measured power sample from the physical datacenter.
///
/// Wire shape: `{"timestamp":"...","power_draw":W,"energy_usage":J}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerSample {
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Instantaneous power draw in watts.
    pub power_draw: f64,
    /// Energy for the sample interval in joules.
    pub energy_usage: f64,
}

impl PowerSample {
    pub fn energy_kwh(&self) -> f64 {
        self.energy_usage / 3_600_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_shape() {
        let sample: PowerSample = serde_json::from_str(
            r#"{"timestamp":"2024-01-01T00:00:00Z","power_draw":250.5,"energy_usage":125250.0}"#,
        )
        .unwrap();
        assert_eq!(sample.power_draw, 250.5);
        assert!((sample.energy_kwh() - 0.0347917).abs() < 1e-6);
    }
}

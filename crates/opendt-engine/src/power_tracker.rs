//! Ground-truth power sample buffer.
//!
//! A ring of [`PowerSample`]s bounded by event-time. Samples older than the
//! retention floor (the oldest live calibration batch or `max_retention`,
//! whichever keeps more) are pruned as new samples arrive.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

use opendt_types::PowerSample;

pub const DEFAULT_MAX_RETENTION_HOURS: i64 = 24;

pub struct PowerTracker {
    samples: VecDeque<PowerSample>,
    max_retention: Duration,
    /// Event-time floor below which no live batch needs samples.
    batch_floor: Option<DateTime<Utc>>,
}

impl PowerTracker {
    pub fn new(max_retention: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            max_retention,
            batch_floor: None,
        }
    }

    pub fn push(&mut self, sample: PowerSample) {
        self.samples.push_back(sample);
        self.prune();
    }

    /// Samples with `timestamp ∈ [start, end)` in timestamp order.
    pub fn samples_in(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<PowerSample> {
        let mut slice: Vec<PowerSample> = self
            .samples
            .iter()
            .filter(|s| s.timestamp >= start && s.timestamp < end)
            .cloned()
            .collect();
        slice.sort_by_key(|s| s.timestamp);
        slice
    }

    /// Tell the tracker the oldest event-time any live calibration batch
    /// still needs; older samples become prunable.
    pub fn set_batch_floor(&mut self, floor: DateTime<Utc>) {
        self.batch_floor = Some(floor);
        self.prune();
    }

    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.samples.iter().map(|s| s.timestamp).max()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn prune(&mut self) {
        let Some(latest) = self.latest_timestamp() else {
            return;
        };
        let retention_floor = latest - self.max_retention;
        // Drop only what neither bound still needs.
        let floor = match self.batch_floor {
            Some(batch) => retention_floor.min(batch),
            None => retention_floor,
        };
        let before = self.samples.len();
        self.samples.retain(|s| s.timestamp >= floor);
        let pruned = before - self.samples.len();
        if pruned > 0 {
            tracing::debug!(pruned, kept = self.samples.len(), "Pruned old power samples");
        }
    }
}

impl Default for PowerTracker {
    fn default() -> Self {
        Self::new(Duration::hours(DEFAULT_MAX_RETENTION_HOURS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(minute: i64, watts: f64) -> PowerSample {
        PowerSample {
            timestamp: DateTime::from_timestamp(minute * 60, 0).unwrap(),
            power_draw: watts,
            energy_usage: watts * 60.0,
        }
    }

    #[test]
    fn window_query_is_half_open_and_ordered() {
        let mut tracker = PowerTracker::default();
        tracker.push(sample(2, 120.0));
        tracker.push(sample(0, 100.0));
        tracker.push(sample(1, 110.0));
        tracker.push(sample(3, 130.0));

        let slice = tracker.samples_in(
            DateTime::from_timestamp(60, 0).unwrap(),
            DateTime::from_timestamp(180, 0).unwrap(),
        );
        let watts: Vec<f64> = slice.iter().map(|s| s.power_draw).collect();
        assert_eq!(watts, vec![110.0, 120.0]);
    }

    #[test]
    fn retention_prunes_old_samples() {
        let mut tracker = PowerTracker::new(Duration::minutes(16));
        tracker.push(sample(0, 100.0));
        tracker.push(sample(5, 105.0));
        tracker.push(sample(20, 120.0));

        assert_eq!(tracker.len(), 2, "sample at minute 0 fell out of retention");
        assert!(tracker
            .samples_in(
                DateTime::from_timestamp(0, 0).unwrap(),
                DateTime::from_timestamp(3_600, 0).unwrap()
            )
            .iter()
            .all(|s| s.power_draw >= 105.0));
    }

    #[test]
    fn live_batch_floor_extends_retention() {
        let mut tracker = PowerTracker::new(Duration::minutes(10));
        tracker.set_batch_floor(DateTime::from_timestamp(0, 0).unwrap());
        tracker.push(sample(0, 100.0));
        tracker.push(sample(20, 120.0));

        // Retention alone would drop minute 0, but the live batch needs it.
        assert_eq!(tracker.len(), 2);

        tracker.set_batch_floor(DateTime::from_timestamp(15 * 60, 0).unwrap());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn empty_tracker_queries_are_empty() {
        let tracker = PowerTracker::default();
        assert!(tracker.is_empty());
        assert!(tracker
            .samples_in(
                DateTime::from_timestamp(0, 0).unwrap(),
                DateTime::from_timestamp(60, 0).unwrap()
            )
            .is_empty());
    }
}

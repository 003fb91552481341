//! In-process counters for pipeline health.

/// Counters accumulated by the window engine loop. Logged on shutdown and
/// whenever something notable happens; there is no external metrics surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineMetrics {
    pub tasks_ingested: u64,
    /// Malformed or late events dropped at ingress.
    pub invalid_events: u64,
    pub windows_closed: u64,
    pub simulations_run: u64,
    pub sim_errors: u64,
    pub cache_hits: u64,
    /// Windows that closed before any calibrated topology arrived.
    pub skipped_without_topology: u64,
    /// Output parse failures after clean exits, stale cache writes.
    pub integrity_warnings: u64,
}

impl EngineMetrics {
    pub fn log_summary(&self) {
        tracing::info!(
            tasks = self.tasks_ingested,
            invalid = self.invalid_events,
            windows = self.windows_closed,
            simulations = self.simulations_run,
            sim_errors = self.sim_errors,
            cache_hits = self.cache_hits,
            skipped_no_topology = self.skipped_without_topology,
            "Engine counters"
        );
    }
}

/// Counters for the calibration loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CalibrationMetrics {
    pub epochs_run: u64,
    pub candidates_simulated: u64,
    pub candidates_failed: u64,
    pub topologies_published: u64,
    pub invalid_events: u64,
}

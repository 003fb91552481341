//! Grid-search calibration loop.
//!
//! Consumes the workload and power streams independently of the window
//! engine, accumulates a calibration batch per epoch, fans out one simulator
//! invocation per candidate parameter value under a bounded worker pool,
//! scores the survivors by MAPE against measured power, and promotes the
//! winner to the `topology.calibrated` compacted channel when it improves on
//! the previously published fit. Epochs are serial; candidate failures never
//! abort an epoch.

pub mod mape;
pub mod param_path;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;

use opendt_broker::{channel, publish_json, MessagePlane};
use opendt_sim::{SimulationBackend, SimulationSpec};
use opendt_types::{
    validate, PowerSample, Task, Topology, TopologySnapshot, WorkloadMessage, DATACENTER_KEY,
};

use crate::error::{EngineError, Result};
use crate::metrics::CalibrationMetrics;
use crate::power_tracker::PowerTracker;
use crate::sink::{AggRow, OutputSink};
use crate::topology_state::TopologyCell;

use self::mape::{MapeScore, DEFAULT_EPSILON};
use self::param_path::ParamPath;

/// Calibration settings; all validated at construction.
#[derive(Debug, Clone)]
pub struct CalibrationConfig {
    /// Dotted path to the tuned numeric leaf set.
    pub param_path: String,
    pub min_value: f64,
    pub max_value: f64,
    /// Evenly spaced candidates in `[min_value, max_value]`, inclusive.
    pub linspace_points: usize,
    /// Max concurrent simulator processes.
    pub max_parallel_workers: usize,
    /// Event-time span of each calibration batch.
    pub mape_window: Duration,
    /// Required improvement over the published score before promoting.
    pub improvement_epsilon: f64,
}

/// Inbound events for the calibration loop.
#[derive(Debug)]
pub enum CalibrationEvent {
    Workload(WorkloadMessage),
    Power(PowerSample),
}

struct ScoredCandidate {
    value: f64,
    score: MapeScore,
    topology: Topology,
}

pub struct CalibrationEngine {
    config: CalibrationConfig,
    path: ParamPath,
    backend: Arc<dyn SimulationBackend>,
    plane: Arc<dyn MessagePlane>,
    sink: Arc<OutputSink>,
    observed: watch::Receiver<Option<TopologyCell>>,
    tracker: PowerTracker,
    batch_tasks: Vec<Task>,
    batch_start: Option<DateTime<Utc>>,
    watermark: Option<DateTime<Utc>>,
    epoch: u64,
    published_mape: Option<f64>,
    path_validated: bool,
    metrics: CalibrationMetrics,
}

impl CalibrationEngine {
    pub fn new(
        config: CalibrationConfig,
        backend: Arc<dyn SimulationBackend>,
        plane: Arc<dyn MessagePlane>,
        sink: Arc<OutputSink>,
        observed: watch::Receiver<Option<TopologyCell>>,
    ) -> Result<Self> {
        if !config.min_value.is_finite() || !config.max_value.is_finite() {
            return Err(EngineError::Config("calibration bounds must be finite".into()));
        }
        if config.min_value >= config.max_value {
            return Err(EngineError::Config(format!(
                "calibration bounds inverted: min {} >= max {}",
                config.min_value, config.max_value
            )));
        }
        if config.linspace_points < 2 {
            return Err(EngineError::Config(
                "calibration needs at least 2 linspace points".into(),
            ));
        }
        if config.max_parallel_workers == 0 {
            return Err(EngineError::Config(
                "calibration needs at least 1 worker".into(),
            ));
        }
        let path = ParamPath::parse(&config.param_path)
            .map_err(|e| EngineError::Config(format!("param_path: {e}")))?;

        Ok(Self {
            config,
            path,
            backend,
            plane,
            sink,
            observed,
            tracker: PowerTracker::default(),
            batch_tasks: Vec::new(),
            batch_start: None,
            watermark: None,
            epoch: 0,
            published_mape: None,
            path_validated: false,
            metrics: CalibrationMetrics::default(),
        })
    }

    /// Serial event loop; returns the accumulated counters once the event
    /// channel closes.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<CalibrationEvent>,
    ) -> Result<CalibrationMetrics> {
        tracing::info!(
            param_path = %self.config.param_path,
            min = self.config.min_value,
            max = self.config.max_value,
            points = self.config.linspace_points,
            workers = self.config.max_parallel_workers,
            "Calibration engine started"
        );
        while let Some(event) = events.recv().await {
            match event {
                CalibrationEvent::Workload(message) => self.on_workload(message).await?,
                CalibrationEvent::Power(sample) => self.on_power(sample),
            }
        }
        tracing::info!(
            epochs = self.metrics.epochs_run,
            published = self.metrics.topologies_published,
            "Calibration engine stopped"
        );
        Ok(self.metrics)
    }

    async fn on_workload(&mut self, message: WorkloadMessage) -> Result<()> {
        let timestamp = message.timestamp();
        self.batch_start.get_or_insert_with(|| floor_minute(timestamp));
        self.watermark = Some(self.watermark.map_or(timestamp, |w| w.max(timestamp)));

        if let WorkloadMessage::Task { task, .. } = message {
            if let Err(err) = validate::validate_task(&task) {
                self.metrics.invalid_events += 1;
                tracing::warn!("Dropping invalid task: {err}");
                return Ok(());
            }
            self.batch_tasks.push(task);
        }

        // Heartbeats (and tasks) advance the watermark; an epoch fires once
        // the batch span is fully covered.
        while self.batch_ready() {
            self.run_epoch().await?;
        }
        Ok(())
    }

    fn on_power(&mut self, sample: PowerSample) {
        if let Err(err) = validate::validate_power_sample(&sample) {
            self.metrics.invalid_events += 1;
            tracing::warn!("Dropping invalid power sample: {err}");
            return;
        }
        self.tracker.push(sample);
    }

    fn batch_ready(&self) -> bool {
        match (self.batch_start, self.watermark) {
            (Some(start), Some(watermark)) => {
                watermark >= start + self.config.mape_window
                    && self.observed.borrow().is_some()
            }
            _ => false,
        }
    }

    async fn run_epoch(&mut self) -> Result<()> {
        let Some(batch_start) = self.batch_start else {
            return Ok(());
        };
        let batch_end = batch_start + self.config.mape_window;
        let Some(cell) = self.observed.borrow().clone() else {
            return Ok(());
        };

        if !self.path_validated {
            let leaves = self
                .path
                .resolve_count(&cell.topology)
                .map_err(|e| EngineError::Config(format!("param_path: {e}")))?;
            tracing::info!(leaves, path = self.path.as_str(), "Parameter path resolved");
            self.path_validated = true;
        }

        let epoch = self.epoch;
        self.epoch += 1;
        self.batch_start = Some(batch_end);

        // Snapshot the batch: tasks inside the span feed this epoch; later
        // arrivals stay for the next one.
        let (batch, rest): (Vec<Task>, Vec<Task>) = std::mem::take(&mut self.batch_tasks)
            .into_iter()
            .partition(|t| t.submission_time < batch_end);
        self.batch_tasks = rest;

        let observed_series: Vec<(i64, f64)> = self
            .tracker
            .samples_in(batch_start, batch_end)
            .iter()
            .map(|s| (s.timestamp.timestamp_millis(), s.power_draw))
            .collect();
        self.tracker.set_batch_floor(batch_end);

        if batch.is_empty() {
            tracing::info!(epoch, "No tasks in calibration batch, skipping epoch");
            return Ok(());
        }
        tracing::info!(
            epoch,
            tasks = batch.len(),
            power_samples = observed_series.len(),
            start = %batch_start,
            end = %batch_end,
            "Starting calibration epoch"
        );

        let candidates = linspace(
            self.config.min_value,
            self.config.max_value,
            self.config.linspace_points,
        );
        let scored = self
            .sweep(epoch, &cell.topology, Arc::new(batch.clone()), &candidates, &observed_series)
            .await?;
        self.metrics.epochs_run += 1;

        let midpoint = (self.config.min_value + self.config.max_value) / 2.0;
        let Some(winner) = elect(scored, midpoint) else {
            tracing::warn!(epoch, "No candidate produced a score, skipping publication");
            return Ok(());
        };

        tracing::info!(
            epoch,
            value = winner.value,
            mape_pct = winner.score.mape * 100.0,
            aligned_points = winner.score.aligned_points,
            mean_observed_w = winner.score.mean_observed,
            mean_simulated_w = winner.score.mean_simulated,
            "Epoch winner elected"
        );

        let improved = match self.published_mape {
            None => true,
            Some(current) => {
                winner.score.mape < current
                    && current - winner.score.mape >= self.config.improvement_epsilon
            }
        };
        if improved {
            let snapshot = TopologySnapshot {
                timestamp: batch_end,
                topology: winner.topology.clone(),
            };
            publish_json(
                self.plane.as_ref(),
                &channel::TOPOLOGY_CALIBRATED,
                Some(DATACENTER_KEY),
                &snapshot,
            )?;
            self.published_mape = Some(winner.score.mape);
            self.metrics.topologies_published += 1;
            tracing::info!(epoch, value = winner.value, "Published calibrated topology");
        } else {
            tracing::info!(
                epoch,
                value = winner.value,
                published_mape = self.published_mape,
                "Winner does not beat published fit, holding"
            );
        }

        let fingerprint = winner.topology.fingerprint()?;
        self.sink.append(AggRow::epoch(
            epoch,
            batch_end,
            batch.len() as u64,
            fingerprint,
            self.path.as_str(),
            winner.value,
            winner.score.mape,
            improved,
        ))?;
        Ok(())
    }

    /// Fan the candidate set out over at most `max_parallel_workers`
    /// concurrent invocations, each in its own scratch directory, and score
    /// the successful ones.
    async fn sweep(
        &mut self,
        epoch: u64,
        base: &Topology,
        batch: Arc<Vec<Task>>,
        candidates: &[f64],
        observed_series: &[(i64, f64)],
    ) -> Result<Vec<ScoredCandidate>> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_workers));
        let mut join_set: JoinSet<(usize, f64, opendt_sim::Result<opendt_types::SimulationResult>)> =
            JoinSet::new();

        let mut patched_by_index = Vec::with_capacity(candidates.len());
        for (i, &value) in candidates.iter().enumerate() {
            let topology = match self.path.patch(base, value) {
                Ok(t) => t,
                Err(err) => {
                    tracing::error!(candidate = value, "Failed to patch topology: {err}");
                    self.metrics.candidates_failed += 1;
                    patched_by_index.push(None);
                    continue;
                }
            };
            patched_by_index.push(Some(topology.clone()));

            let spec = SimulationSpec {
                run_id: format!("window-{epoch}-candidate-{i}"),
                topology: Arc::new(topology),
                tasks: batch.clone(),
            };
            let backend = self.backend.clone();
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = backend.simulate(spec).await;
                (i, value, result)
            });
        }

        let mut scored = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let Ok((i, value, result)) = joined else {
                tracing::error!("Candidate simulation task panicked");
                self.metrics.candidates_failed += 1;
                continue;
            };
            self.metrics.candidates_simulated += 1;
            let result = match result {
                Ok(result) if result.is_ok() => result,
                Ok(result) => {
                    tracing::warn!(
                        candidate = value,
                        error = result.error_msg.as_deref().unwrap_or("unknown"),
                        "Candidate simulation failed, excluding from scoring"
                    );
                    self.metrics.candidates_failed += 1;
                    continue;
                }
                Err(err) => {
                    tracing::warn!(candidate = value, "Candidate invocation error: {err}");
                    self.metrics.candidates_failed += 1;
                    continue;
                }
            };

            let simulated: Vec<(i64, f64)> = result
                .power_series
                .iter()
                .map(|p| (p.time_ms(), p.value()))
                .collect();
            match mape::score(&simulated, observed_series, DEFAULT_EPSILON) {
                Some(score) => {
                    tracing::debug!(
                        candidate = value,
                        mape_pct = score.mape * 100.0,
                        "Candidate scored"
                    );
                    if let Some(Some(topology)) = patched_by_index.get(i).cloned() {
                        scored.push(ScoredCandidate {
                            value,
                            score,
                            topology,
                        });
                    }
                }
                None => {
                    tracing::warn!(
                        candidate = value,
                        "No aligned points between simulated and observed power"
                    );
                    self.metrics.candidates_failed += 1;
                }
            }
        }
        Ok(scored)
    }
}

/// Evenly spaced candidate values, rounded to 2 decimals the way operators
/// expect to read them back in reports.
pub fn linspace(min: f64, max: f64, points: usize) -> Vec<f64> {
    if points < 2 {
        return vec![round2(min)];
    }
    let step = (max - min) / (points - 1) as f64;
    let mut values: Vec<f64> = (0..points)
        .map(|i| round2(min + step * i as f64))
        .collect();
    values.dedup();
    values
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn floor_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    let millis = ts.timestamp_millis();
    DateTime::from_timestamp_millis(millis.div_euclid(60_000) * 60_000).unwrap_or(ts)
}

/// Minimum-MAPE candidate; ties break toward the value closest to the
/// search-space midpoint.
fn elect(candidates: Vec<ScoredCandidate>, midpoint: f64) -> Option<ScoredCandidate> {
    candidates.into_iter().min_by(|a, b| {
        a.score
            .mape
            .total_cmp(&b.score.mape)
            .then_with(|| (a.value - midpoint).abs().total_cmp(&(b.value - midpoint).abs()))
    })
}

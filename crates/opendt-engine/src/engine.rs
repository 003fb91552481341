//! Window engine event loop.
//!
//! A single serial loop owns the window ring, the cumulative task list, and
//! the result cache, so no state transition ever needs a lock. Simulator
//! invocations are submitted to a bounded worker pool; completions are
//! delivered back onto the loop as events, and a reorder buffer keeps the
//! results stream in window-id order even when workers finish out of order.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, watch, Semaphore};

use opendt_broker::{channel, publish_json, MessagePlane};
use opendt_sim::{SimulationBackend, SimulationSpec};
use opendt_types::{validate, SimulationReport, SimulationResult, Task, WorkloadMessage};

use crate::cache::{CacheKey, ResultCache};
use crate::error::{retry_backoff, EngineError, Result};
use crate::metrics::EngineMetrics;
use crate::sink::{AggRow, OutputSink};
use crate::topology_state::TopologyCell;
use crate::window::{ClosedWindow, WindowSet};

/// Capacity of the internal completion channel; invocations are bounded by
/// the worker pool long before this.
const COMPLETION_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct WindowEngineConfig {
    /// Width `W` of each time window.
    pub window_width: Duration,
    /// Optional explicit anchor; else the floor of the first observed
    /// timestamp.
    pub first_window_anchor: Option<DateTime<Utc>>,
    /// Backpressure threshold: closure pauses while this many windows are
    /// closed but not yet simulated.
    pub max_pending_windows: usize,
    /// Simulator worker pool size for the main pipeline.
    pub sim_workers: usize,
    /// Attempts per invocation for infrastructure failures (not simulator
    /// errors, which are terminal per window).
    pub retry_attempts: u32,
}

impl Default for WindowEngineConfig {
    fn default() -> Self {
        Self {
            window_width: Duration::minutes(5),
            first_window_anchor: None,
            max_pending_windows: 32,
            sim_workers: 1,
            retry_attempts: 3,
        }
    }
}

/// A closed window whose inputs are snapshotted and ready to run (or to
/// reuse another invocation's result).
#[derive(Debug)]
struct PendingWindow {
    window_id: u64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    window_tasks: u64,
    cumulative_tasks: u64,
    /// The exact cumulative list at closure; kept so a deferred window can
    /// still launch its own invocation after the list has grown.
    tasks: Arc<Vec<Task>>,
}

/// A completed worker-pool invocation, tagged with the topology generation
/// it was launched under.
#[derive(Debug)]
struct SimulationDone {
    window_id: u64,
    generation: u64,
    fingerprint: String,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    /// Tasks that arrived inside this window (what the report carries).
    window_tasks: u64,
    /// Size of the cumulative list fed to the simulator (the cache key).
    cumulative_tasks: u64,
    result: SimulationResult,
}

pub struct WindowEngine {
    config: WindowEngineConfig,
    windows: WindowSet,
    /// Tasks of all closed windows, in insertion order. Appended at closure,
    /// never rewritten.
    cumulative: Vec<Task>,
    backend: Arc<dyn SimulationBackend>,
    cache: Arc<ResultCache>,
    plane: Arc<dyn MessagePlane>,
    sink: Arc<OutputSink>,
    calibrated: watch::Receiver<Option<TopologyCell>>,
    /// Loop-back channel for worker-task completions.
    completions_tx: mpsc::Sender<SimulationDone>,
    completions_rx: Option<mpsc::Receiver<SimulationDone>>,
    semaphore: Arc<Semaphore>,
    inflight: usize,
    /// Out-of-order completions waiting for their turn on the results
    /// stream; the flag records a cache hit.
    reorder: BTreeMap<u64, (SimulationReport, bool)>,
    next_emit: u64,
    /// Keys with an invocation in flight: at most one simulator run per
    /// `(fingerprint, cumulative count)`.
    inflight_keys: HashSet<CacheKey>,
    /// Windows whose key is already in flight; resolved when it completes.
    deferred: HashMap<CacheKey, Vec<PendingWindow>>,
    deferred_count: usize,
    metrics: EngineMetrics,
}

impl WindowEngine {
    pub fn new(
        config: WindowEngineConfig,
        backend: Arc<dyn SimulationBackend>,
        cache: Arc<ResultCache>,
        plane: Arc<dyn MessagePlane>,
        sink: Arc<OutputSink>,
        calibrated: watch::Receiver<Option<TopologyCell>>,
    ) -> Self {
        let windows = WindowSet::new(config.window_width, config.first_window_anchor);
        let semaphore = Arc::new(Semaphore::new(config.sim_workers.max(1)));
        let (completions_tx, completions_rx) = mpsc::channel(COMPLETION_CHANNEL_CAPACITY);
        Self {
            config,
            windows,
            cumulative: Vec::new(),
            backend,
            cache,
            plane,
            sink,
            calibrated,
            completions_tx,
            completions_rx: Some(completions_rx),
            semaphore,
            inflight: 0,
            reorder: BTreeMap::new(),
            next_emit: 0,
            inflight_keys: HashSet::new(),
            deferred: HashMap::new(),
            deferred_count: 0,
            metrics: EngineMetrics::default(),
        }
    }

    /// Serial event loop. Drains the workload channel until it closes, waits
    /// out in-flight invocations, then returns the accumulated counters.
    pub async fn run(
        mut self,
        mut workload: mpsc::Receiver<WorkloadMessage>,
    ) -> Result<EngineMetrics> {
        let mut completions = self
            .completions_rx
            .take()
            .ok_or_else(|| EngineError::Config("engine loop started twice".into()))?;

        // The cache generation must match the calibrated cell before the
        // first dispatch, even if the cell was initialized before this loop
        // started.
        let mut calibrated_rx = self.calibrated.clone();
        if let Some(cell) = calibrated_rx.borrow_and_update().clone() {
            self.cache.clear(cell.generation);
        }
        let mut watch_open = true;
        let mut ingress_open = true;

        tracing::info!(
            width_minutes = self.config.window_width.num_minutes(),
            workers = self.config.sim_workers,
            max_pending = self.config.max_pending_windows,
            "Window engine started"
        );

        loop {
            if !ingress_open && self.inflight == 0 {
                break;
            }
            tokio::select! {
                changed = calibrated_rx.changed(), if watch_open => {
                    if changed.is_ok() {
                        self.on_topology_change()?;
                    } else {
                        watch_open = false;
                    }
                }
                Some(done) = completions.recv() => {
                    self.on_simulation_done(done)?;
                }
                message = workload.recv(), if ingress_open => match message {
                    Some(message) => self.on_workload(message)?,
                    None => ingress_open = false,
                },
            }
        }

        self.metrics.log_summary();
        Ok(self.metrics)
    }

    fn on_workload(&mut self, message: WorkloadMessage) -> Result<()> {
        match message {
            WorkloadMessage::Task { task, .. } => {
                if let Err(err) = validate::validate_task(&task) {
                    self.metrics.invalid_events += 1;
                    tracing::warn!("Dropping invalid task: {err}");
                    return Ok(());
                }
                match self.windows.ingest_task(task) {
                    Ok(window_id) => {
                        self.metrics.tasks_ingested += 1;
                        tracing::debug!(window = window_id, "Task accepted");
                    }
                    Err(late) => {
                        self.metrics.invalid_events += 1;
                        tracing::warn!(
                            task = late.task_id,
                            at = %late.timestamp,
                            head_start = %late.head_start,
                            "Dropping late task behind closed window"
                        );
                    }
                }
                Ok(())
            }
            WorkloadMessage::Heartbeat { timestamp, .. } => {
                self.windows.observe_heartbeat(timestamp);
                self.drain_closures()
            }
        }
    }

    /// Close every eligible window in id order, up to the pending-window
    /// backpressure cap, and dispatch each one. Closure is driven by the
    /// watermark alone; a window closed before any calibrated topology has
    /// arrived is skipped, not held back.
    fn drain_closures(&mut self) -> Result<()> {
        loop {
            if self.inflight + self.deferred_count >= self.config.max_pending_windows {
                tracing::debug!(
                    inflight = self.inflight,
                    deferred = self.deferred_count,
                    "Pending-window cap reached, pausing closure"
                );
                return Ok(());
            }
            let Some(closed) = self.windows.close_next() else {
                return Ok(());
            };
            self.metrics.windows_closed += 1;
            let calibrated = self.calibrated.borrow().clone();
            match calibrated {
                Some(cell) => self.dispatch(closed, cell)?,
                None => self.skip_without_topology(closed)?,
            }
        }
    }

    /// No topology to simulate against: the window's tasks still join the
    /// cumulative list, but the window goes straight to `SKIPPED` and its
    /// report carries an error so downstream consumers see the gap.
    fn skip_without_topology(&mut self, closed: ClosedWindow) -> Result<()> {
        let window_tasks = closed.tasks.len() as u64;
        self.cumulative.extend(closed.tasks);
        tracing::warn!(
            window = closed.window_id,
            "No calibrated topology yet, skipping simulation"
        );
        self.metrics.skipped_without_topology += 1;
        self.emit_skipped(
            closed.window_id,
            closed.start,
            closed.end,
            window_tasks,
            "no calibrated topology available",
        )
    }

    fn emit_skipped(
        &mut self,
        window_id: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        window_tasks: u64,
        reason: &str,
    ) -> Result<()> {
        self.windows.mark_skipped(window_id);
        let report = SimulationReport {
            run_id: format!("window-{window_id}"),
            window_id,
            window_start: start,
            window_end: end,
            task_count: window_tasks,
            topology_fingerprint: String::new(),
            result: SimulationResult::error(reason),
        };
        self.reorder.insert(window_id, (report, false));
        self.emit_ready()
    }

    fn dispatch(&mut self, closed: ClosedWindow, cell: TopologyCell) -> Result<()> {
        let window_tasks = closed.tasks.len() as u64;
        self.cumulative.extend(closed.tasks);
        let pending = PendingWindow {
            window_id: closed.window_id,
            start: closed.start,
            end: closed.end,
            window_tasks,
            cumulative_tasks: self.cumulative.len() as u64,
            tasks: Arc::new(self.cumulative.clone()),
        };
        tracing::info!(
            window = pending.window_id,
            window_tasks,
            cumulative = pending.cumulative_tasks,
            "Window closed"
        );
        self.try_start(pending, cell)
    }

    /// Resolve a closed window against the cache and the in-flight key set:
    /// reuse a cached result, wait for an identical invocation already
    /// running, or launch its own.
    fn try_start(&mut self, pending: PendingWindow, cell: TopologyCell) -> Result<()> {
        let key = CacheKey {
            fingerprint: cell.fingerprint.clone(),
            cumulative_tasks: pending.cumulative_tasks,
        };

        if let Some(hit) = self.cache.lookup(&key) {
            self.metrics.cache_hits += 1;
            self.windows.mark_skipped(pending.window_id);
            tracing::info!(window = pending.window_id, "Cache hit, skipping simulation");
            let report = SimulationReport {
                run_id: format!("window-{}", pending.window_id),
                window_id: pending.window_id,
                window_start: pending.start,
                window_end: pending.end,
                task_count: pending.window_tasks,
                topology_fingerprint: cell.fingerprint,
                result: hit,
            };
            self.reorder.insert(pending.window_id, (report, true));
            return self.emit_ready();
        }

        if self.inflight_keys.contains(&key) {
            tracing::debug!(
                window = pending.window_id,
                "Identical invocation in flight, deferring window"
            );
            self.deferred_count += 1;
            self.deferred.entry(key).or_default().push(pending);
            return Ok(());
        }

        self.inflight_keys.insert(key);
        self.inflight += 1;
        let spec = SimulationSpec {
            run_id: format!("window-{}", pending.window_id),
            topology: cell.topology.clone(),
            tasks: pending.tasks.clone(),
        };
        let backend = self.backend.clone();
        let semaphore = self.semaphore.clone();
        let completions = self.completions_tx.clone();
        let retry_attempts = self.config.retry_attempts.max(1);
        let done = SimulationDone {
            window_id: pending.window_id,
            generation: cell.generation,
            fingerprint: cell.fingerprint,
            window_start: pending.start,
            window_end: pending.end,
            window_tasks: pending.window_tasks,
            cumulative_tasks: pending.cumulative_tasks,
            result: SimulationResult::empty_ok(),
        };

        tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let result = simulate_with_retry(backend.as_ref(), spec, retry_attempts).await;
            let _ = completions.send(SimulationDone { result, ..done }).await;
        });
        Ok(())
    }

    fn on_simulation_done(&mut self, done: SimulationDone) -> Result<()> {
        self.inflight = self.inflight.saturating_sub(1);
        self.metrics.simulations_run += 1;
        self.windows.mark_simulated(done.window_id);
        let done_key = CacheKey {
            fingerprint: done.fingerprint.clone(),
            cumulative_tasks: done.cumulative_tasks,
        };
        self.inflight_keys.remove(&done_key);

        if done.result.is_ok() {
            let stored = self.cache.put(
                CacheKey {
                    fingerprint: done.fingerprint.clone(),
                    cumulative_tasks: done.cumulative_tasks,
                },
                done.result.clone(),
                done.generation,
            );
            if !stored {
                // The topology generation advanced while this invocation was
                // in flight; the result is still emitted, never cached.
                self.metrics.integrity_warnings += 1;
                tracing::warn!(
                    window = done.window_id,
                    generation = done.generation,
                    "Result arrived under a superseded topology generation"
                );
            }
        } else {
            self.metrics.sim_errors += 1;
            tracing::error!(
                window = done.window_id,
                error = done.result.error_msg.as_deref().unwrap_or("unknown"),
                "Simulation failed, pipeline continues"
            );
        }

        let report = SimulationReport {
            run_id: format!("window-{}", done.window_id),
            window_id: done.window_id,
            window_start: done.window_start,
            window_end: done.window_end,
            task_count: done.window_tasks,
            topology_fingerprint: done.fingerprint,
            result: done.result,
        };
        self.reorder.insert(done.window_id, (report, false));
        self.emit_ready()?;

        // Windows that were waiting on this key resolve under the current
        // topology: a cache hit if the result was stored, a fresh invocation
        // otherwise.
        if let Some(waiters) = self.deferred.remove(&done_key) {
            let cell = self.calibrated.borrow().clone();
            for pending in waiters {
                self.deferred_count = self.deferred_count.saturating_sub(1);
                match &cell {
                    Some(cell) => self.try_start(pending, cell.clone())?,
                    // Cells never revert to empty; kept for completeness.
                    None => self.emit_skipped(
                        pending.window_id,
                        pending.start,
                        pending.end,
                        pending.window_tasks,
                        "no calibrated topology available",
                    )?,
                }
            }
        }

        // A completion frees backlog capacity; closure may resume.
        self.drain_closures()
    }

    fn on_topology_change(&mut self) -> Result<()> {
        let Some(cell) = self.calibrated.borrow().clone() else {
            return Ok(());
        };
        tracing::info!(
            generation = cell.generation,
            fingerprint = &cell.fingerprint[..cell.fingerprint.len().min(12)],
            "Calibrated topology changed, clearing result cache"
        );
        self.cache.clear(cell.generation);
        self.drain_closures()
    }

    /// Flush the reorder buffer in window-id order: publish each report on
    /// the results stream and append its aggregate row.
    fn emit_ready(&mut self) -> Result<()> {
        while let Some((report, cached)) = self.reorder.remove(&self.next_emit) {
            publish_json(self.plane.as_ref(), &channel::RESULTS, None, &report)?;
            self.sink.append(AggRow::from_report(&report, cached))?;
            tracing::info!(
                window = report.window_id,
                tasks = report.task_count,
                status = if report.result.is_ok() { "ok" } else { "error" },
                cached,
                energy_kwh = report.result.energy_kwh,
                "Result emitted"
            );
            self.next_emit += 1;
        }
        Ok(())
    }
}

/// Retry infrastructure failures with exponential backoff; a simulator run
/// that completes with `status=error` is terminal for the window.
async fn simulate_with_retry(
    backend: &dyn SimulationBackend,
    spec: SimulationSpec,
    attempts: u32,
) -> SimulationResult {
    for attempt in 1..=attempts {
        match backend.simulate(spec.clone()).await {
            Ok(result) => return result,
            Err(err) if attempt < attempts => {
                let delay = retry_backoff(attempt);
                tracing::warn!(
                    run_id = %spec.run_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Invocation infrastructure error, will retry: {err}"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                tracing::error!(
                    run_id = %spec.run_id,
                    attempts,
                    "Invocation failed after retries: {err}"
                );
                return SimulationResult::error(err.to_string());
            }
        }
    }
    SimulationResult::error("invocation retry loop exhausted")
}

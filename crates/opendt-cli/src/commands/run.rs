//! Service wiring: message plane, topology state, window engine, and the
//! optional calibration loop, all driven from one binary.
//!
//! Consumers run as independent tasks, each draining one channel serially
//! and committing offsets as records are handed to the engines. With
//! `--trace`, the run ends once every consumer group has caught up with the
//! replayed log and the engines have drained; without it, the service runs
//! until interrupted.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use opendt_broker::{channel, Channel, MemoryPlane, MessagePlane};
use opendt_engine::config::{parse_config, validate_config, Config};
use opendt_engine::{
    CalibrationConfig, CalibrationEngine, CalibrationEvent, CalibrationMetrics, EngineMetrics,
    OutputSink, ResultCache, TopologyState, WindowEngine, WindowEngineConfig,
};
use opendt_sim::{OpenDcDriver, OpenDcDriverConfig};
use opendt_types::{PowerSample, SimulationReport, TopologySnapshot, WorkloadMessage};

use crate::replay;

const SIMULATOR_GROUP: &str = "simulators";
const CALIBRATOR_GROUP: &str = "calibrators";
const CALIBRATOR_POWER_GROUP: &str = "calibrator-power";

pub async fn execute(config_path: &Path, trace: Option<&Path>) -> Result<()> {
    let config = parse_config(config_path)?;
    validate_config(&config)?;
    let run_id = config
        .effective_run_id()
        .context("run id required: set the RUN_ID environment variable or run.run_id")?;
    if let Ok(worker_id) = std::env::var("WORKER_ID") {
        tracing::info!(worker_id = %worker_id, "Worker identity");
    }

    let out_root = config.run.output_dir.join(&run_id);
    tracing::info!(run_id = %run_id, output = %out_root.display(), "Starting OpenDT services");

    let plane: Arc<MemoryPlane> = Arc::new(MemoryPlane::new());
    let state = Arc::new(TopologyState::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut feeders: Vec<JoinHandle<()>> = Vec::new();

    // Topology consumers keep both cells current from the compacted channels.
    feeders.push(spawn_topology_feed(
        plane.clone(),
        channel::TOPOLOGY_OBSERVED,
        state.clone(),
        shutdown_rx.clone(),
    ));
    feeders.push(spawn_topology_feed(
        plane.clone(),
        channel::TOPOLOGY_CALIBRATED,
        state.clone(),
        shutdown_rx.clone(),
    ));

    // Simulator side: window engine over the calibrated topology.
    let sim_dir = out_root.join("simulator");
    let sim_sink = Arc::new(OutputSink::open(&sim_dir)?);
    let sim_driver = Arc::new(OpenDcDriver::new(driver_config(
        &config,
        sim_dir.join("opendc"),
    ))?);
    let cache = Arc::new(ResultCache::new(config.cache.max_entries));
    let engine = WindowEngine::new(
        WindowEngineConfig {
            window_width: Duration::minutes(config.window.width_minutes),
            first_window_anchor: config.window.first_window_anchor,
            max_pending_windows: config.sim.max_pending_windows,
            sim_workers: config.sim.workers,
            ..WindowEngineConfig::default()
        },
        sim_driver,
        cache,
        plane.clone(),
        sim_sink,
        state.calibrated(),
    );
    let (workload_tx, workload_rx) = mpsc::channel::<WorkloadMessage>(1024);
    feeders.push(spawn_workload_feed(
        plane.clone(),
        SIMULATOR_GROUP,
        workload_tx,
        shutdown_rx.clone(),
    ));
    let engine_handle: JoinHandle<opendt_engine::Result<EngineMetrics>> =
        tokio::spawn(engine.run(workload_rx));

    // Calibration side: its own consumers, driver, and output directory.
    let calibration_handle: Option<JoinHandle<opendt_engine::Result<CalibrationMetrics>>> =
        if config.calibration.enabled {
            let cal_dir = out_root.join("calibrator");
            let cal_sink = Arc::new(OutputSink::open(&cal_dir)?);
            let cal_driver = Arc::new(OpenDcDriver::new(driver_config(
                &config,
                cal_dir.join("opendc"),
            ))?);
            let calibration = CalibrationEngine::new(
                calibration_config(&config)?,
                cal_driver,
                plane.clone(),
                cal_sink,
                state.observed(),
            )?;
            let (event_tx, event_rx) = mpsc::channel::<CalibrationEvent>(1024);
            feeders.push(spawn_calibration_workload_feed(
                plane.clone(),
                event_tx.clone(),
                shutdown_rx.clone(),
            ));
            feeders.push(spawn_power_feed(plane.clone(), event_tx, shutdown_rx.clone()));
            Some(tokio::spawn(calibration.run(event_rx)))
        } else {
            tracing::info!("Calibration disabled");
            None
        };

    feeders.push(spawn_results_logger(plane.clone(), shutdown_rx.clone()));

    match trace {
        Some(trace_path) => {
            let stats = replay::replay_file(plane.as_ref(), trace_path)?;
            wait_for_catch_up(&plane, &config, &stats).await;
            let _ = shutdown_tx.send(true);
        }
        None => {
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;
            tracing::info!("Interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    }

    for feeder in feeders {
        let _ = feeder.await;
    }
    let metrics = engine_handle
        .await
        .context("window engine task panicked")??;
    tracing::info!(
        windows = metrics.windows_closed,
        simulations = metrics.simulations_run,
        cache_hits = metrics.cache_hits,
        "Window engine finished"
    );
    if let Some(handle) = calibration_handle {
        let cal_metrics = handle.await.context("calibration task panicked")??;
        tracing::info!(
            epochs = cal_metrics.epochs_run,
            published = cal_metrics.topologies_published,
            "Calibration finished"
        );
    }
    Ok(())
}

fn driver_config(config: &Config, output_root: std::path::PathBuf) -> OpenDcDriverConfig {
    OpenDcDriverConfig {
        binary: config.sim.binary.clone(),
        output_root,
        timeout: StdDuration::from_secs(config.sim.subprocess_timeout_seconds),
        export_interval_secs: config.sim.export_interval_seconds,
        archive: config.run.archive,
        strict_archive: config.run.strict_archive,
        ..OpenDcDriverConfig::default()
    }
}

fn calibration_config(config: &Config) -> Result<CalibrationConfig> {
    let cal = &config.calibration;
    Ok(CalibrationConfig {
        param_path: cal
            .param_path
            .clone()
            .context("calibration.param_path required")?,
        min_value: cal.min_value.context("calibration.min_value required")?,
        max_value: cal.max_value.context("calibration.max_value required")?,
        linspace_points: cal.linspace_points,
        max_parallel_workers: cal.max_parallel_workers,
        mape_window: Duration::minutes(cal.mape_window_minutes),
        improvement_epsilon: cal.improvement_epsilon,
    })
}

fn spawn_topology_feed(
    plane: Arc<MemoryPlane>,
    chan: Channel,
    state: Arc<TopologyState>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let group = format!("topology-{}", chan.name);
        let mut sub = match plane.subscribe(&chan, &group) {
            Ok(sub) => sub,
            Err(err) => {
                tracing::error!(channel = chan.name, "Topology subscribe failed: {err}");
                return;
            }
        };
        loop {
            tokio::select! {
                record = sub.recv() => {
                    let Some(record) = record else { break };
                    match serde_json::from_slice::<TopologySnapshot>(&record.payload) {
                        Ok(snapshot) => {
                            if let Err(err) =
                                opendt_types::validate::validate_topology(&snapshot.topology)
                            {
                                tracing::warn!(channel = chan.name, "Dropping topology: {err}");
                                continue;
                            }
                            let applied = if chan == channel::TOPOLOGY_CALIBRATED {
                                state.set_calibrated(snapshot.topology)
                            } else {
                                state.set_observed(snapshot.topology)
                            };
                            match applied {
                                Ok(true) => {
                                    tracing::info!(channel = chan.name, "Topology updated");
                                }
                                Ok(false) => {}
                                Err(err) => tracing::error!(
                                    channel = chan.name,
                                    "Topology update failed: {err}"
                                ),
                            }
                        }
                        Err(err) => {
                            tracing::warn!(channel = chan.name, "Dropping malformed topology: {err}");
                        }
                    }
                    let _ = plane.commit(&chan, &group, record.offset);
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

fn spawn_workload_feed(
    plane: Arc<MemoryPlane>,
    group: &'static str,
    engine_tx: mpsc::Sender<WorkloadMessage>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sub = match plane.subscribe(&channel::WORKLOAD, group) {
            Ok(sub) => sub,
            Err(err) => {
                tracing::error!("Workload subscribe failed: {err}");
                return;
            }
        };
        loop {
            tokio::select! {
                record = sub.recv() => {
                    let Some(record) = record else { break };
                    match serde_json::from_slice::<WorkloadMessage>(&record.payload) {
                        Ok(message) => {
                            if engine_tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(offset = record.offset, "Dropping malformed workload message: {err}");
                        }
                    }
                    let _ = plane.commit(&channel::WORKLOAD, group, record.offset);
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

fn spawn_calibration_workload_feed(
    plane: Arc<MemoryPlane>,
    event_tx: mpsc::Sender<CalibrationEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sub = match plane.subscribe(&channel::WORKLOAD, CALIBRATOR_GROUP) {
            Ok(sub) => sub,
            Err(err) => {
                tracing::error!("Calibrator workload subscribe failed: {err}");
                return;
            }
        };
        loop {
            tokio::select! {
                record = sub.recv() => {
                    let Some(record) = record else { break };
                    match serde_json::from_slice::<WorkloadMessage>(&record.payload) {
                        Ok(message) => {
                            if event_tx.send(CalibrationEvent::Workload(message)).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(offset = record.offset, "Dropping malformed workload message: {err}");
                        }
                    }
                    let _ = plane.commit(&channel::WORKLOAD, CALIBRATOR_GROUP, record.offset);
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

fn spawn_power_feed(
    plane: Arc<MemoryPlane>,
    event_tx: mpsc::Sender<CalibrationEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sub = match plane.subscribe(&channel::POWER, CALIBRATOR_POWER_GROUP) {
            Ok(sub) => sub,
            Err(err) => {
                tracing::error!("Power subscribe failed: {err}");
                return;
            }
        };
        loop {
            tokio::select! {
                record = sub.recv() => {
                    let Some(record) = record else { break };
                    match serde_json::from_slice::<PowerSample>(&record.payload) {
                        Ok(sample) => {
                            if event_tx.send(CalibrationEvent::Power(sample)).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(offset = record.offset, "Dropping malformed power sample: {err}");
                        }
                    }
                    let _ = plane.commit(&channel::POWER, CALIBRATOR_POWER_GROUP, record.offset);
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

fn spawn_results_logger(
    plane: Arc<MemoryPlane>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sub = match plane.subscribe(&channel::RESULTS, "results-logger") {
            Ok(sub) => sub,
            Err(err) => {
                tracing::error!("Results subscribe failed: {err}");
                return;
            }
        };
        loop {
            tokio::select! {
                record = sub.recv() => {
                    let Some(record) = record else { break };
                    if let Ok(report) = serde_json::from_slice::<SimulationReport>(&record.payload) {
                        tracing::info!(
                            run_id = %report.run_id,
                            window = report.window_id,
                            tasks = report.task_count,
                            energy_kwh = report.result.energy_kwh,
                            max_power_w = report.result.max_power_w,
                            "Window report"
                        );
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

/// Block until every consumer group has committed through the replayed log.
async fn wait_for_catch_up(plane: &MemoryPlane, config: &Config, stats: &replay::ReplayStats) {
    let mut targets: Vec<(Channel, &str, u64)> = Vec::new();
    if stats.workload > 0 {
        targets.push((channel::WORKLOAD, SIMULATOR_GROUP, stats.workload - 1));
        if config.calibration.enabled {
            targets.push((channel::WORKLOAD, CALIBRATOR_GROUP, stats.workload - 1));
        }
    }
    if stats.power > 0 && config.calibration.enabled {
        targets.push((channel::POWER, CALIBRATOR_POWER_GROUP, stats.power - 1));
    }

    loop {
        let caught_up = targets.iter().all(|(chan, group, last)| {
            matches!(plane.committed(chan, group), Ok(Some(offset)) if offset >= *last)
        });
        if caught_up {
            return;
        }
        tokio::time::sleep(StdDuration::from_millis(50)).await;
    }
}

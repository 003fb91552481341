//! Validate configuration and report the effective settings.

use std::path::Path;

use anyhow::Result;

use opendt_engine::config::{parse_config, validate_config};

pub fn execute(config_path: &Path) -> Result<()> {
    let config = parse_config(config_path)?;
    validate_config(&config)?;

    tracing::info!(
        output_dir = %config.run.output_dir.display(),
        run_id = config.effective_run_id().as_deref().unwrap_or("(unset)"),
        archive = config.run.archive,
        "run"
    );
    tracing::info!(
        width_minutes = config.window.width_minutes,
        cadence_minutes = config.heartbeat.cadence_minutes,
        cache_entries = config.cache.max_entries,
        "windowing"
    );
    tracing::info!(
        binary = %config.sim.binary.display(),
        timeout_s = config.sim.subprocess_timeout_seconds,
        max_pending = config.sim.max_pending_windows,
        workers = config.sim.workers,
        "simulator"
    );
    if config.calibration.enabled {
        tracing::info!(
            param_path = config.calibration.param_path.as_deref().unwrap_or(""),
            min = config.calibration.min_value.unwrap_or(f64::NAN),
            max = config.calibration.max_value.unwrap_or(f64::NAN),
            points = config.calibration.linspace_points,
            workers = config.calibration.max_parallel_workers,
            mape_window_minutes = config.calibration.mape_window_minutes,
            "calibration"
        );
    } else {
        tracing::info!("calibration disabled");
    }

    println!("Configuration OK");
    Ok(())
}

//! Service configuration schema.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Top-level YAML configuration for the `opendt` binary.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub window: WindowSection,
    #[serde(default)]
    pub heartbeat: HeartbeatSection,
    #[serde(default)]
    pub cache: CacheSection,
    pub sim: SimSection,
    #[serde(default)]
    pub calibration: CalibrationSection,
}

impl Config {
    /// Run id: the `RUN_ID` environment variable wins over the config file.
    pub fn effective_run_id(&self) -> Option<String> {
        std::env::var("RUN_ID").ok().or_else(|| self.run.run_id.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// Base directory for run outputs.
    pub output_dir: PathBuf,
    /// Unique id of this session; usually supplied via `RUN_ID`.
    pub run_id: Option<String>,
    /// Keep per-run input/output archives.
    pub archive: bool,
    /// Reject reuse of a run id instead of overwriting its archive.
    pub strict_archive: bool,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            run_id: None,
            archive: true,
            strict_archive: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowSection {
    /// Width `W` of each time window, in minutes.
    pub width_minutes: i64,
    /// Explicit anchor for window 0; else the floor of the first observed
    /// timestamp.
    pub first_window_anchor: Option<DateTime<Utc>>,
}

impl Default for WindowSection {
    fn default() -> Self {
        Self {
            width_minutes: 5,
            first_window_anchor: None,
        }
    }
}

/// Expected inter-heartbeat spacing. Advisory: it sizes backlog expectations
/// but gates nothing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeartbeatSection {
    pub cadence_minutes: i64,
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self { cadence_minutes: 1 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub max_entries: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self { max_entries: 1024 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimSection {
    /// Path to the simulator binary.
    pub binary: PathBuf,
    #[serde(default = "default_subprocess_timeout")]
    pub subprocess_timeout_seconds: u64,
    #[serde(default = "default_max_pending_windows")]
    pub max_pending_windows: usize,
    /// Worker pool size for the main pipeline.
    #[serde(default = "default_sim_workers")]
    pub workers: usize,
    #[serde(default = "default_export_interval")]
    pub export_interval_seconds: u64,
}

fn default_subprocess_timeout() -> u64 {
    120
}

fn default_max_pending_windows() -> usize {
    32
}

fn default_sim_workers() -> usize {
    1
}

fn default_export_interval() -> u64 {
    150
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CalibrationSection {
    pub enabled: bool,
    pub param_path: Option<String>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub linspace_points: usize,
    pub max_parallel_workers: usize,
    pub mape_window_minutes: i64,
    pub improvement_epsilon: f64,
}

impl Default for CalibrationSection {
    fn default() -> Self {
        Self {
            enabled: false,
            param_path: None,
            min_value: None,
            max_value: None,
            linspace_points: 10,
            max_parallel_workers: 4,
            mape_window_minutes: 60,
            improvement_epsilon: 0.0,
        }
    }
}

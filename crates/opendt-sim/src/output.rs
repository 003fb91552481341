//! Parsing of simulator output artifacts.
//!
//! The binary writes parquet exports under the run's output folder, either
//! directly or nested in its `raw-output/<n>/seed=<s>/` layout; artifacts
//! are located by name wherever they land.

use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, TimestampMillisecondArray};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use opendt_types::{ResultStatus, SeriesPoint, SimulationResult};

use crate::error::{Result, SimError};

const POWER_SOURCE_FILE: &str = "powerSource.parquet";
const HOST_FILE: &str = "host.parquet";

/// Parse the required and optional artifacts under `output_dir` into a
/// structured result.
///
/// # Errors
///
/// Returns [`SimError::Input`] when `powerSource.parquet` is absent and
/// parquet/arrow errors when an artifact exists but cannot be decoded; the
/// caller reports both as a failed simulation.
pub fn parse_outputs(output_dir: &Path) -> Result<SimulationResult> {
    let power_path = find_artifact(output_dir, POWER_SOURCE_FILE).ok_or_else(|| {
        SimError::Input(format!(
            "missing expected artifact: {}",
            output_dir.join(POWER_SOURCE_FILE).display()
        ))
    })?;

    let power_batches = read_batches(&power_path)?;
    let timestamps = millis_column(&power_batches, &["timestamp_absolute", "timestamp"])
        .ok_or_else(|| {
            SimError::Input(format!(
                "no timestamp column in {}",
                power_path.display()
            ))
        })?;
    let power_draw = f64_column(&power_batches, "power_draw").ok_or_else(|| {
        SimError::Input(format!("no power_draw column in {}", power_path.display()))
    })?;
    let energy = f64_column(&power_batches, "energy_usage").unwrap_or_default();

    let energy_kwh = energy.iter().sum::<f64>() / 3_600_000.0;
    let max_power_w = power_draw.iter().copied().fold(0.0_f64, f64::max);
    let power_series: Vec<SeriesPoint> = timestamps
        .iter()
        .zip(power_draw.iter())
        .map(|(&t, &w)| SeriesPoint(t, w))
        .collect();

    // The host export carries both the utilization metrics and the run's
    // simulated-time span.
    let host = match find_artifact(output_dir, HOST_FILE) {
        Some(host_path) => parse_host(&host_path)?,
        None => {
            tracing::warn!(dir = %output_dir.display(), "host.parquet not found");
            HostMetrics::default()
        }
    };

    Ok(SimulationResult {
        status: ResultStatus::Ok,
        energy_kwh,
        mean_cpu_util: host.mean_cpu_util,
        max_power_w,
        runtime_hours: host.runtime_hours,
        power_series,
        cpu_series: host.cpu_series,
        error_msg: None,
    })
}

#[derive(Debug, Default)]
struct HostMetrics {
    mean_cpu_util: f64,
    runtime_hours: f64,
    cpu_series: Vec<SeriesPoint>,
}

fn parse_host(path: &Path) -> Result<HostMetrics> {
    let batches = read_batches(path)?;
    let timestamps = millis_column(&batches, &["timestamp_absolute", "timestamp"]);
    let runtime_hours = timestamps.as_deref().map(span_hours).unwrap_or(0.0);

    let Some(utilization) = f64_column(&batches, "cpu_utilization") else {
        tracing::warn!(path = %path.display(), "no cpu_utilization column in host export");
        return Ok(HostMetrics {
            runtime_hours,
            ..HostMetrics::default()
        });
    };
    let mean_cpu_util = if utilization.is_empty() {
        0.0
    } else {
        utilization.iter().sum::<f64>() / utilization.len() as f64
    };
    let cpu_series = timestamps
        .map(|ts| {
            ts.iter()
                .zip(utilization.iter())
                .map(|(&t, &u)| SeriesPoint(t, u))
                .collect()
        })
        .unwrap_or_default();
    Ok(HostMetrics {
        mean_cpu_util,
        runtime_hours,
        cpu_series,
    })
}

fn span_hours(timestamps: &[i64]) -> f64 {
    match (timestamps.iter().min(), timestamps.iter().max()) {
        (Some(&min), Some(&max)) => (max - min) as f64 / 3_600_000.0,
        _ => 0.0,
    }
}

/// Breadth-first search for `file_name` under `root`, tolerating the
/// simulator's nested output layout.
pub fn find_artifact(root: &Path, file_name: &str) -> Option<PathBuf> {
    let mut queue = VecDeque::from([root.to_path_buf()]);
    while let Some(dir) = queue.pop_front() {
        let direct = dir.join(file_name);
        if direct.is_file() {
            return Some(direct);
        }
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        let mut subdirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_dir())
            .collect();
        subdirs.sort();
        queue.extend(subdirs);
    }
    None
}

fn read_batches(path: &Path) -> Result<Vec<RecordBatch>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    Ok(batches)
}

fn f64_column(batches: &[RecordBatch], name: &str) -> Option<Vec<f64>> {
    let mut values = Vec::new();
    for batch in batches {
        let column = batch.column_by_name(name)?;
        let array = column.as_any().downcast_ref::<Float64Array>()?;
        values.extend(array.iter().map(|v| v.unwrap_or(0.0)));
    }
    Some(values)
}

/// Epoch-millisecond values from the first present column in `names`,
/// accepting either int64 or timestamp[ms] physical types.
fn millis_column(batches: &[RecordBatch], names: &[&str]) -> Option<Vec<i64>> {
    let name = names
        .iter()
        .find(|n| batches.iter().any(|b| b.column_by_name(n).is_some()))?;
    let mut values = Vec::new();
    for batch in batches {
        let column = batch.column_by_name(name)?;
        values.extend(extract_millis(column)?);
    }
    Some(values)
}

fn extract_millis(column: &ArrayRef) -> Option<Vec<i64>> {
    if let Some(array) = column.as_any().downcast_ref::<Int64Array>() {
        return Some(array.iter().map(|v| v.unwrap_or(0)).collect());
    }
    if let Some(array) = column.as_any().downcast_ref::<TimestampMillisecondArray>() {
        return Some(array.iter().map(|v| v.unwrap_or(0)).collect());
    }
    None
}

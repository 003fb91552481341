//! Aggregated results sink.
//!
//! One parquet table, `agg_results.parquet`, with a row per completed window
//! and per calibration epoch. The table is rewritten through a temp file and
//! an atomic rename on every append; on restart, existing rows are reloaded
//! and replayed rows are discarded by `run_id`.

use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arrow::array::{
    Array, BooleanArray, Float64Array, StringArray, TimestampMillisecondArray, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;

use opendt_types::{ResultStatus, SimulationReport};

use crate::error::Result;

pub const AGG_FILE_NAME: &str = "agg_results.parquet";

/// One row of the aggregate table. Error rows carry NaN metrics and the
/// error message; calibration rows carry the winning parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct AggRow {
    pub run_id: String,
    pub window_id: Option<u64>,
    pub timestamp: DateTime<Utc>,
    pub task_count: u64,
    pub topology_fingerprint: String,
    pub status: String,
    pub energy_kwh: f64,
    pub mean_cpu_util: f64,
    pub max_power_w: f64,
    pub runtime_hours: f64,
    pub error_msg: Option<String>,
    pub cached: bool,
    pub calibrated_param: Option<String>,
    pub best_value: Option<f64>,
    pub best_mape: Option<f64>,
}

impl AggRow {
    /// Row for a completed window simulation.
    pub fn from_report(report: &SimulationReport, cached: bool) -> Self {
        let failed = report.result.status == ResultStatus::Error;
        let metric = |v: f64| if failed { f64::NAN } else { v };
        Self {
            run_id: report.run_id.clone(),
            window_id: Some(report.window_id),
            timestamp: report.window_end,
            task_count: report.task_count,
            topology_fingerprint: report.topology_fingerprint.clone(),
            status: if failed { "error" } else { "ok" }.to_string(),
            energy_kwh: metric(report.result.energy_kwh),
            mean_cpu_util: metric(report.result.mean_cpu_util),
            max_power_w: metric(report.result.max_power_w),
            runtime_hours: metric(report.result.runtime_hours),
            error_msg: report.result.error_msg.clone(),
            cached,
            calibrated_param: None,
            best_value: None,
            best_mape: None,
        }
    }

    /// Summary row for a calibration epoch. `published` records whether the
    /// winner was promoted to the calibrated channel.
    #[allow(clippy::too_many_arguments)]
    pub fn epoch(
        epoch: u64,
        batch_end: DateTime<Utc>,
        task_count: u64,
        fingerprint: String,
        param: &str,
        best_value: f64,
        best_mape: f64,
        published: bool,
    ) -> Self {
        Self {
            run_id: format!("window-{epoch}-calibrated"),
            window_id: Some(epoch),
            timestamp: batch_end,
            task_count,
            topology_fingerprint: fingerprint,
            status: if published { "ok" } else { "held" }.into(),
            energy_kwh: f64::NAN,
            mean_cpu_util: f64::NAN,
            max_power_w: f64::NAN,
            runtime_hours: f64::NAN,
            error_msg: None,
            cached: false,
            calibrated_param: Some(param.to_string()),
            best_value: Some(best_value),
            best_mape: Some(best_mape),
        }
    }
}

struct SinkInner {
    rows: Vec<AggRow>,
    seen: HashSet<String>,
}

/// Append-only writer of the aggregate table, idempotent on run ids.
pub struct OutputSink {
    agg_path: PathBuf,
    inner: Mutex<SinkInner>,
}

impl OutputSink {
    /// Open (or create) the sink under `out_dir`, reloading any rows a
    /// previous process wrote.
    pub fn open(out_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(out_dir)?;
        let agg_path = out_dir.join(AGG_FILE_NAME);
        let rows = if agg_path.exists() {
            read_rows(&agg_path)?
        } else {
            Vec::new()
        };
        let seen = rows.iter().map(|r| r.run_id.clone()).collect();
        if !rows.is_empty() {
            tracing::info!(
                rows = rows.len(),
                path = %agg_path.display(),
                "Resuming aggregate results table"
            );
        }
        Ok(Self {
            agg_path,
            inner: Mutex::new(SinkInner { rows, seen }),
        })
    }

    /// Append a row unless its `run_id` was already written (replay after
    /// restart). Returns whether the row was appended.
    pub fn append(&self, row: AggRow) -> Result<bool> {
        let mut inner = self.lock();
        if !inner.seen.insert(row.run_id.clone()) {
            tracing::debug!(run_id = %row.run_id, "Discarding replayed aggregate row");
            return Ok(false);
        }
        inner.rows.push(row);
        self.write_all(&inner.rows)?;
        Ok(true)
    }

    pub fn agg_path(&self) -> &Path {
        &self.agg_path
    }

    pub fn row_count(&self) -> usize {
        self.lock().rows.len()
    }

    /// Snapshot of the rows written so far, in append order.
    pub fn rows(&self) -> Vec<AggRow> {
        self.lock().rows.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SinkInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_all(&self, rows: &[AggRow]) -> Result<()> {
        let batch = rows_to_batch(rows)?;
        let tmp_path = self.agg_path.with_extension("parquet.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
        writer.write(&batch)?;
        writer.close()?;
        std::fs::rename(&tmp_path, &self.agg_path)?;
        Ok(())
    }
}

fn agg_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("run_id", DataType::Utf8, false),
        Field::new("window_id", DataType::UInt64, true),
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Millisecond, None),
            false,
        ),
        Field::new("task_count", DataType::UInt64, false),
        Field::new("topology_fingerprint", DataType::Utf8, false),
        Field::new("status", DataType::Utf8, false),
        Field::new("energy_kwh", DataType::Float64, false),
        Field::new("mean_cpu_util", DataType::Float64, false),
        Field::new("max_power_w", DataType::Float64, false),
        Field::new("runtime_hours", DataType::Float64, false),
        Field::new("error_msg", DataType::Utf8, true),
        Field::new("cached", DataType::Boolean, false),
        Field::new("calibrated_param", DataType::Utf8, true),
        Field::new("best_value", DataType::Float64, true),
        Field::new("best_mape", DataType::Float64, true),
    ]))
}

fn rows_to_batch(rows: &[AggRow]) -> Result<RecordBatch> {
    let batch = RecordBatch::try_new(
        agg_schema(),
        vec![
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.run_id.as_str()),
            )),
            Arc::new(UInt64Array::from_iter(rows.iter().map(|r| r.window_id))),
            Arc::new(TimestampMillisecondArray::from_iter_values(
                rows.iter().map(|r| r.timestamp.timestamp_millis()),
            )),
            Arc::new(UInt64Array::from_iter_values(
                rows.iter().map(|r| r.task_count),
            )),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.topology_fingerprint.as_str()),
            )),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.status.as_str()),
            )),
            Arc::new(Float64Array::from_iter_values(
                rows.iter().map(|r| r.energy_kwh),
            )),
            Arc::new(Float64Array::from_iter_values(
                rows.iter().map(|r| r.mean_cpu_util),
            )),
            Arc::new(Float64Array::from_iter_values(
                rows.iter().map(|r| r.max_power_w),
            )),
            Arc::new(Float64Array::from_iter_values(
                rows.iter().map(|r| r.runtime_hours),
            )),
            Arc::new(StringArray::from_iter(
                rows.iter().map(|r| r.error_msg.as_deref()),
            )),
            Arc::new(BooleanArray::from_iter(
                rows.iter().map(|r| Some(r.cached)),
            )),
            Arc::new(StringArray::from_iter(
                rows.iter().map(|r| r.calibrated_param.as_deref()),
            )),
            Arc::new(Float64Array::from_iter(rows.iter().map(|r| r.best_value))),
            Arc::new(Float64Array::from_iter(rows.iter().map(|r| r.best_mape))),
        ],
    )?;
    Ok(batch)
}

fn read_rows(path: &Path) -> Result<Vec<AggRow>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch?;
        rows.extend(batch_to_rows(&batch));
    }
    Ok(rows)
}

fn batch_to_rows(batch: &RecordBatch) -> Vec<AggRow> {
    macro_rules! col {
        ($name:expr, $ty:ty) => {
            batch
                .column_by_name($name)
                .and_then(|c| c.as_any().downcast_ref::<$ty>())
        };
    }
    let (Some(run_id), Some(timestamp), Some(task_count), Some(fingerprint), Some(status)) = (
        col!("run_id", StringArray),
        col!("timestamp", TimestampMillisecondArray),
        col!("task_count", UInt64Array),
        col!("topology_fingerprint", StringArray),
        col!("status", StringArray),
    ) else {
        tracing::warn!("Aggregate table has unexpected schema, starting fresh");
        return Vec::new();
    };
    let window_id = col!("window_id", UInt64Array);
    let energy = col!("energy_kwh", Float64Array);
    let cpu = col!("mean_cpu_util", Float64Array);
    let power = col!("max_power_w", Float64Array);
    let runtime = col!("runtime_hours", Float64Array);
    let error_msg = col!("error_msg", StringArray);
    let cached = col!("cached", BooleanArray);
    let param = col!("calibrated_param", StringArray);
    let best_value = col!("best_value", Float64Array);
    let best_mape = col!("best_mape", Float64Array);

    let opt_str = |arr: Option<&StringArray>, i: usize| {
        arr.and_then(|a| (!a.is_null(i)).then(|| a.value(i).to_string()))
    };
    let opt_f64 =
        |arr: Option<&Float64Array>, i: usize| arr.and_then(|a| (!a.is_null(i)).then(|| a.value(i)));
    let req_f64 = |arr: Option<&Float64Array>, i: usize| opt_f64(arr, i).unwrap_or(f64::NAN);

    (0..batch.num_rows())
        .filter_map(|i| {
            Some(AggRow {
                run_id: run_id.value(i).to_string(),
                window_id: window_id.and_then(|a| (!a.is_null(i)).then(|| a.value(i))),
                timestamp: DateTime::from_timestamp_millis(timestamp.value(i))?,
                task_count: task_count.value(i),
                topology_fingerprint: fingerprint.value(i).to_string(),
                status: status.value(i).to_string(),
                energy_kwh: req_f64(energy, i),
                mean_cpu_util: req_f64(cpu, i),
                max_power_w: req_f64(power, i),
                runtime_hours: req_f64(runtime, i),
                error_msg: opt_str(error_msg, i),
                cached: cached.map(|a| a.value(i)).unwrap_or(false),
                calibrated_param: opt_str(param, i),
                best_value: opt_f64(best_value, i),
                best_mape: opt_f64(best_mape, i),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use opendt_types::SimulationResult;

    fn report(window_id: u64, status_ok: bool) -> SimulationReport {
        SimulationReport {
            run_id: format!("window-{window_id}"),
            window_id,
            window_start: DateTime::from_timestamp(window_id as i64 * 300, 0).unwrap(),
            window_end: DateTime::from_timestamp((window_id as i64 + 1) * 300, 0).unwrap(),
            task_count: 3,
            topology_fingerprint: "fp".into(),
            result: if status_ok {
                SimulationResult {
                    energy_kwh: 1.5,
                    max_power_w: 400.0,
                    ..SimulationResult::empty_ok()
                }
            } else {
                SimulationResult::error("exit code 1")
            },
        }
    }

    #[test]
    fn append_writes_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let sink = OutputSink::open(dir.path()).unwrap();
            assert!(sink.append(AggRow::from_report(&report(0, true), false)).unwrap());
            assert!(sink.append(AggRow::from_report(&report(1, true), true)).unwrap());
        }

        let sink = OutputSink::open(dir.path()).unwrap();
        assert_eq!(sink.row_count(), 2);
        // Replay of an already-written run id is discarded.
        assert!(!sink.append(AggRow::from_report(&report(0, true), false)).unwrap());
        assert_eq!(sink.row_count(), 2);
    }

    #[test]
    fn error_rows_carry_nan_metrics_and_message() {
        let dir = tempfile::tempdir().unwrap();
        let sink = OutputSink::open(dir.path()).unwrap();
        sink.append(AggRow::from_report(&report(2, false), false))
            .unwrap();

        let rows = read_rows(sink.agg_path()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "error");
        assert!(rows[0].energy_kwh.is_nan());
        assert_eq!(rows[0].error_msg.as_deref(), Some("exit code 1"));
    }

    #[test]
    fn epoch_rows_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let sink = OutputSink::open(dir.path()).unwrap();
        let row = AggRow::epoch(
            4,
            DateTime::from_timestamp(3_600, 0).unwrap(),
            120,
            "fp".into(),
            "clusters[*].hosts[*].cpuPowerModel.asymUtil",
            0.5,
            3.7,
            true,
        );
        sink.append(row.clone()).unwrap();

        let rows = read_rows(sink.agg_path()).unwrap();
        assert_eq!(rows[0].run_id, "window-4-calibrated");
        assert_eq!(rows[0].best_value, Some(0.5));
        assert_eq!(rows[0].best_mape, Some(3.7));
        assert_eq!(
            rows[0].calibrated_param.as_deref(),
            Some("clusters[*].hosts[*].cpuPowerModel.asymUtil")
        );
    }

    #[test]
    fn cached_flag_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let sink = OutputSink::open(dir.path()).unwrap();
        sink.append(AggRow::from_report(&report(5, true), true))
            .unwrap();
        let rows = read_rows(sink.agg_path()).unwrap();
        assert!(rows[0].cached);
    }
}

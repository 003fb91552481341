//! Workload parquet materialization.
//!
//! The simulator requires non-nullable columns and int32 task ids; ids that
//! do not fit are an input error rather than a silent truncation.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Float64Array, Int32Array, Int64Array, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use opendt_types::Task;

use crate::error::{Result, SimError};

fn tasks_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int32, false),
        Field::new(
            "submission_time",
            DataType::Timestamp(TimeUnit::Millisecond, None),
            false,
        ),
        Field::new("duration", DataType::Int64, false),
        Field::new("cpu_count", DataType::Int32, false),
        Field::new("cpu_capacity", DataType::Float64, false),
        Field::new("mem_capacity", DataType::Int64, false),
    ]))
}

fn fragments_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int32, false),
        Field::new("task_id", DataType::Int32, false),
        Field::new("duration", DataType::Int64, false),
        Field::new("cpu_count", DataType::Int32, false),
        Field::new("cpu_usage", DataType::Float64, false),
    ]))
}

fn narrow_id(id: i64, what: &str) -> Result<i32> {
    i32::try_from(id).map_err(|_| SimError::Input(format!("{what} {id} exceeds int32")))
}

fn write_batch(path: &Path, batch: &RecordBatch) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

/// Write `tasks.parquet` for a cumulative task list.
pub fn write_tasks_parquet(tasks: &[Task], path: &Path) -> Result<()> {
    let ids = tasks
        .iter()
        .map(|t| narrow_id(t.id, "task id"))
        .collect::<Result<Vec<i32>>>()?;
    let submission: Vec<i64> = tasks.iter().map(Task::submission_millis).collect();
    let durations: Vec<i64> = tasks.iter().map(|t| t.duration).collect();
    let cpu_counts: Vec<i32> = tasks.iter().map(|t| t.cpu_count).collect();
    let cpu_capacities: Vec<f64> = tasks.iter().map(|t| t.cpu_capacity).collect();
    let mem_capacities: Vec<i64> = tasks.iter().map(|t| t.mem_capacity).collect();

    let batch = RecordBatch::try_new(
        tasks_schema(),
        vec![
            Arc::new(Int32Array::from(ids)),
            Arc::new(TimestampMillisecondArray::from(submission)),
            Arc::new(Int64Array::from(durations)),
            Arc::new(Int32Array::from(cpu_counts)),
            Arc::new(Float64Array::from(cpu_capacities)),
            Arc::new(Int64Array::from(mem_capacities)),
        ],
    )?;
    write_batch(path, &batch)
}

/// Write `fragments.parquet`, flattening every task's execution profile in
/// task order.
pub fn write_fragments_parquet(tasks: &[Task], path: &Path) -> Result<()> {
    let mut ids = Vec::new();
    let mut task_ids = Vec::new();
    let mut durations = Vec::new();
    let mut cpu_counts = Vec::new();
    let mut cpu_usages = Vec::new();

    for task in tasks {
        for fragment in &task.fragments {
            ids.push(narrow_id(fragment.id, "fragment id")?);
            task_ids.push(narrow_id(task.id, "task id")?);
            durations.push(fragment.duration);
            cpu_counts.push(fragment.cpu_count);
            cpu_usages.push(fragment.cpu_usage);
        }
    }

    let batch = RecordBatch::try_new(
        fragments_schema(),
        vec![
            Arc::new(Int32Array::from(ids)),
            Arc::new(Int32Array::from(task_ids)),
            Arc::new(Int64Array::from(durations)),
            Arc::new(Int32Array::from(cpu_counts)),
            Arc::new(Float64Array::from(cpu_usages)),
        ],
    )?;
    write_batch(path, &batch)
}

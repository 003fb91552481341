//! Simulator driver error types.

/// Errors produced while preparing, running, or parsing a simulation.
///
/// These are the driver's *infrastructure* failures (scratch allocation,
/// file I/O, schema conversion). A simulator process that runs and fails is
/// not an error at this level; it becomes a `status=error`
/// [`SimulationResult`](opendt_types::SimulationResult) so the pipeline can
/// keep moving.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// File-system failure (scratch dir allocation, input materialization).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Input record that cannot be represented in the file contract.
    #[error("invalid simulator input: {0}")]
    Input(String),

    /// Parquet read/write failure.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Arrow array construction failure.
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Experiment/topology JSON serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// No usable Java installation was found.
    #[error("java home: {0}")]
    JavaHome(String),

    /// The simulator binary could not be spawned at all.
    #[error("failed to spawn simulator: {0}")]
    Spawn(String),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, SimError>;

//! Engine error model and retry backoff policy.

use std::time::Duration;

const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_MAX_MS: u64 = 60_000;

/// Categorized engine error.
///
/// Per-window and per-candidate failures never surface here; they travel as
/// `status=error` simulation results so the pipeline keeps moving. This enum
/// covers the faults that stop a whole service component: broker loss,
/// output-sink I/O, and startup configuration problems.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Message plane failure.
    #[error("broker error: {0}")]
    Broker(#[from] opendt_broker::BrokerError),

    /// Output sink or archive I/O failure.
    #[error("sink error: {0}")]
    Sink(#[from] std::io::Error),

    /// Aggregate table read/write failure.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Arrow array construction failure.
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Payload or fingerprint serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration, fatal at startup for the affected component.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Exponential backoff for retrying transient infrastructure failures
/// (scratch allocation, subprocess spawn): 1s, 2s, 4s, ... capped at 60s.
pub(crate) fn retry_backoff(attempt: u32) -> Duration {
    let delay_ms = BACKOFF_BASE_MS.saturating_mul(2u64.pow(attempt.saturating_sub(1).min(31)));
    Duration::from_millis(delay_ms.min(BACKOFF_MAX_MS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(retry_backoff(1), Duration::from_millis(1_000));
        assert_eq!(retry_backoff(2), Duration::from_millis(2_000));
        assert_eq!(retry_backoff(3), Duration::from_millis(4_000));
    }

    #[test]
    fn backoff_capped_at_60s() {
        assert_eq!(retry_backoff(20), Duration::from_millis(60_000));
    }

    #[test]
    fn config_error_displays_detail() {
        let err = EngineError::Config("param_path resolves no leaves".into());
        assert!(err.to_string().contains("param_path"));
    }
}

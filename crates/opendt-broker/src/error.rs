//! Message plane error types.

/// Errors produced by [`MessagePlane`](crate::MessagePlane) operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The plane has shut down and can no longer accept traffic.
    #[error("message plane closed")]
    Closed,

    /// Payload (de)serialization failure.
    #[error("payload serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Internal lock was poisoned by a panicked thread.
    #[error("message plane lock poisoned")]
    LockPoisoned,
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, BrokerError>;

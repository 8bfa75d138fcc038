//! Error types for kdecl
//!
//! A single crate-level error enum covers the distinct kinds of failure an
//! apply or export can hit. Validation and precondition failures are surfaced
//! to the operator and never retried, protocol failures carry whatever the
//! broker reported, and invariant failures indicate a bug in the plan/diff
//! machinery itself.

use thiserror::Error;

/// Result type alias for kdecl operations
pub type Result<T> = std::result::Result<T, KdeclError>;

#[derive(Debug, Error)]
pub enum KdeclError {
    /// A definition violated a static rule or disagrees with cluster metadata.
    #[error("{0}")]
    Validation(String),

    /// Client or tool configuration is unusable.
    #[error("config error: {0}")]
    Config(String),

    /// Kafka I/O or protocol-level failure, surfaced verbatim.
    #[error("{0}")]
    Protocol(String),

    /// The requested operation cannot be performed against the current
    /// cluster state (e.g. decreasing partitions).
    #[error("{0}")]
    Precondition(String),

    /// The diff and the operation plan disagree. This is a bug.
    #[error("internal invariant violated: {0}")]
    Invariant(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl KdeclError {
    pub fn validation(msg: impl Into<String>) -> Self {
        KdeclError::Validation(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        KdeclError::Protocol(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        KdeclError::Precondition(msg.into())
    }
}

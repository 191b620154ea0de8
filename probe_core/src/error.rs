//! Error types for ProbeKit.
//!
//! Probe failures, timeouts and retrieval problems are reported as
//! [`Outcome`](crate::types::Outcome) values, never through this type. `ProbeError`
//! covers the surrounding plumbing: configuration, registration and pool lifecycle.

use crate::types::CheckId;

/// Main error type for ProbeKit.
///
/// All fallible ProbeKit operations return `Result<T> = std::result::Result<T, ProbeError>`.
#[derive(thiserror::Error, Debug)]
pub enum ProbeError {
    /// Configuration is invalid or could not be loaded.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A check with the same id is already registered.
    #[error("Check already registered: {0}")]
    DuplicateCheck(CheckId),

    /// No check is registered under the requested id.
    #[error("Check not found: {0}")]
    UnknownCheck(CheckId),

    /// The worker pool no longer accepts work.
    #[error("Worker pool is closed")]
    PoolClosed,

    /// A finished execution unit could not hand out its outcome.
    #[error("Result retrieval failed for {check}: {reason}")]
    Retrieval {
        /// Check whose outcome could not be read
        check: CheckId,
        /// What went wrong
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Type alias for Result with ProbeError.
pub type Result<T> = std::result::Result<T, ProbeError>;

//! Error taxonomy for the inventory core.
//!
//! Every fallible operation in the library returns [`FleetError`]. The variants
//! mirror the categories callers are expected to branch on: bad input, missing
//! records, ownership conflicts, blocked deletions, exhausted pools and
//! commit-time races reported by the store.

/// Errors surfaced by the allocation engine, the topology manager and the store
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Another transaction committed a change to a record this one read.
    /// The whole operation has to be retried by the caller.
    #[error("transaction conflict on {kind} {key}, retry the operation")]
    TransientConflict { kind: String, key: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FleetError {
    pub fn validation(msg: impl Into<String>) -> Self {
        FleetError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        FleetError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        FleetError::Conflict(msg.into())
    }

    /// True for commit-time races the caller may retry
    pub fn is_transient(&self) -> bool {
        matches!(self, FleetError::TransientConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;

//! Engine error types.
//!
//! Data gaps (missing performance, sparse signal history) are handled with
//! explicit low-confidence defaults inside the components and never surface
//! here; these variants cover rejected input, layer lookups, commit
//! conflicts, and collaborator I/O passed through unchanged.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input, rejected before any computation with a reason.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Correlation needs at least two enabled members to be meaningful.
    #[error("insufficient enabled members: need {required}, have {actual}")]
    InsufficientMembers { required: usize, actual: usize },

    #[error("layer not found: {0}")]
    LayerNotFound(String),

    #[error("layer is inactive: {0}")]
    LayerInactive(String),

    /// Optimistic commit conflict: the layer changed since the plan was made.
    #[error("stale plan version: plan was built at v{expected}, store is at v{actual}")]
    StaleVersion { expected: u64, actual: u64 },

    /// Collaborator I/O failure, propagated unchanged (no retry, no masking).
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

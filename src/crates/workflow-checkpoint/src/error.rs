//! Error types for checkpoint persistence.

use thiserror::Error;

/// Result type used throughout `workflow-checkpoint`.
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors raised while saving, loading, or listing checkpoints.
///
/// Checkpoint errors are non-terminal for save (the caller logs a warning and
/// the run continues) and terminal for load/restore.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// No checkpoint exists with the given id.
    #[error("checkpoint not found: {0}")]
    NotFound(String),

    /// The checkpoint's recorded graph signature does not match the
    /// workflow currently trying to resume from it.
    #[error(
        "checkpoint {checkpoint_id} was captured for graph signature {expected}, \
         but the current workflow's signature is {actual}"
    )]
    TopologyChanged {
        checkpoint_id: String,
        expected: String,
        actual: String,
    },

    /// Underlying storage I/O failed (file backend).
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The checkpoint payload could not be (de)serialized.
    #[error("checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A checkpoint id or path failed validation (e.g. path traversal).
    #[error("invalid checkpoint reference: {0}")]
    InvalidReference(String),
}

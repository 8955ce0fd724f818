//! Error taxonomy for the workflow runtime.

use thiserror::Error;

/// Result type used throughout `workflow-core`.
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Structured details attached to an `executor_failed` event and to
/// [`WorkflowError::AgentExecution`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExecutorFailureDetails {
    pub error_type: String,
    pub message: String,
    pub traceback: Option<String>,
    pub executor_id: String,
}

/// Top-level error type surfaced at the workflow boundary.
///
/// Validation errors are detected at build time and prevent a run from ever
/// starting; the rest are raised during or around a run.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Umbrella for the `WorkflowValidationError` family.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Iteration cap reached with messages still pending.
    #[error(
        "workflow '{workflow_name}' did not converge after {iterations} supersteps \
         with messages still pending"
    )]
    Convergence {
        workflow_name: String,
        iterations: u64,
    },

    /// Save/load/validation failure in the checkpoint layer.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] workflow_checkpoint::CheckpointError),

    /// Catch-all for scheduler faults: a message arrived with no matching
    /// edge runner or no matching handler type.
    #[error("runner error: {0}")]
    Runner(String),

    /// An executor handler raised. Carries the same details that were
    /// already emitted on the event stream as `executor_failed`, so a
    /// caller that only inspects the returned error still has full context.
    #[error("executor '{}' failed: {}", .0.executor_id, .0.message)]
    AgentExecution(ExecutorFailureDetails),

    /// A second `run*` call was attempted while one was already active.
    #[error("workflow '{0}' is already running")]
    AlreadyRunning(String),

    /// `get_final_state()` was called on a result with no status events.
    #[error("no status was recorded for this run")]
    NoFinalState,
}

/// The `WorkflowValidationError` family.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("duplicate executor id: {0}")]
    ExecutorDuplication(String),

    #[error("duplicate edge: {0} -> {1}")]
    EdgeDuplication(String, String),

    #[error("type incompatibility on edge {source} -> {target}: {detail}")]
    TypeCompatibility {
        source: String,
        target: String,
        detail: String,
    },

    #[error("graph connectivity error: {0}")]
    GraphConnectivity(String),

    #[error("interceptor conflict: {0}")]
    InterceptorConflict(String),
}

/// A request/response mechanism encountered a missing resource.
#[derive(Debug, Error)]
pub enum RequestInfoError {
    #[error("no pending request with id {0}")]
    UnknownRequestId(String),
}

/// A predicate-driven router found no matching case and no default.
#[derive(Debug, Error)]
#[error("no route matched for message at source '{0}' and no default target was declared")]
pub struct NoRouteError(pub String);

/// An executor received a payload no registered handler can accept.
#[derive(Debug, Error)]
#[error("executor '{executor_id}' has no handler for payload of type {type_name}")]
pub struct NoHandlerError {
    pub executor_id: String,
    pub type_name: String,
}

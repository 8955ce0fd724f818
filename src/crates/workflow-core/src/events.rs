//! Workflow event stream.

use crate::error::ExecutorFailureDetails;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced an event. Only the scheduler/façade may emit lifecycle
/// events with [`EventOrigin::Framework`]; an executor handler emitting one
/// through [`crate::executor::HandlerContext::add_event`] is always tagged
/// [`EventOrigin::Executor`], and [`sanitize`] downgrades it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventOrigin {
    Framework,
    Executor,
}

/// Surfaced via `status` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Started,
    InProgress,
    InProgressPendingRequests,
    Idle,
    IdleWithPendingRequests,
    Failed,
    Cancelled,
}

impl RunState {
    /// Whether this is one of the three states a run may end in.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Idle | RunState::IdleWithPendingRequests | RunState::Failed | RunState::Cancelled
        )
    }
}

/// One entry on the workflow's event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowEvent {
    Started,
    Status {
        state: RunState,
    },
    Failed {
        details: ExecutorFailureDetails,
    },
    Output {
        executor_id: String,
        data: Value,
    },
    Data {
        executor_id: String,
        data: Value,
    },
    RequestInfo {
        request_id: String,
        source_executor_id: String,
        request_type: String,
        response_type: String,
        data: Value,
    },
    Warning {
        text: String,
    },
    Error {
        message: String,
    },
    SuperstepStarted {
        iteration: u64,
    },
    SuperstepCompleted {
        iteration: u64,
    },
    ExecutorInvoked {
        executor_id: String,
    },
    ExecutorCompleted {
        executor_id: String,
    },
    ExecutorFailed {
        executor_id: String,
        details: ExecutorFailureDetails,
    },
    /// Extension point for orchestration-specific events: opaque to the
    /// scheduler, carried through verbatim.
    Custom {
        name: String,
        data: Value,
    },
}

impl WorkflowEvent {
    /// The framework lifecycle set: `started`, `status`, `failed`.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            WorkflowEvent::Started | WorkflowEvent::Status { .. } | WorkflowEvent::Failed { .. }
        )
    }
}

/// An event together with who produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub origin: EventOrigin,
    pub payload: WorkflowEvent,
}

impl Event {
    pub fn framework(payload: WorkflowEvent) -> Self {
        Self {
            origin: EventOrigin::Framework,
            payload,
        }
    }

    pub fn executor(payload: WorkflowEvent) -> Self {
        sanitize(Self {
            origin: EventOrigin::Executor,
            payload,
        })
    }
}

/// Rejects a lifecycle event carrying [`EventOrigin::Executor`] and
/// replaces it with a `warning`: an executor has no business emitting
/// framework lifecycle events, so one that tries gets downgraded instead of
/// let through.
pub fn sanitize(event: Event) -> Event {
    if event.origin == EventOrigin::Executor && event.payload.is_lifecycle() {
        return Event {
            origin: EventOrigin::Executor,
            payload: WorkflowEvent::Warning {
                text: "an executor attempted to emit a framework lifecycle event; rejected".to_string(),
            },
        };
    }
    event
}

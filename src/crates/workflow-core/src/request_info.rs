//! Request-Info Executor.
//!
//! A built-in executor every workflow may include. It owns an in-memory
//! correlation table (`request_id -> request snapshot`) mirrored into
//! shared state so a resumed run can answer `has_pending_request` without
//! replaying history: shared state is the source of truth after any load,
//! the in-memory table is just a cache.

use crate::error::{RequestInfoError, Result, WorkflowError};
use crate::events::{Event, WorkflowEvent};
use crate::executor::Executor;
use crate::message::{Message, TypedValue};
use crate::runner_context::RunnerContext;
use crate::shared_state::{SharedState, REQUEST_INFO_STATE_KEY};
use crate::types::{TypeRegistry, TypeSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The fixed id every workflow's built-in request-info executor is
/// registered under.
pub const REQUEST_INFO_EXECUTOR_ID: &str = "__request_info__";

/// Sent by a handler via [`HandlerContext::request_info`] to the built-in
/// request-info executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestInfoMessage {
    pub source_executor_id: String,
    pub request_type: String,
    pub response_type: String,
    pub data: Value,
}

/// Delivered back to the originating executor's response handler once a
/// correlated response arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestResponse {
    pub data: Value,
    pub original_request: Value,
    pub request_id: String,
    pub request_type: String,
    pub response_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingRequest {
    source_executor_id: String,
    request_type: String,
    response_type: String,
    data: Value,
}

/// Built-in executor owning the request/response correlation table.
pub struct RequestInfoExecutor {
    pending: Mutex<HashMap<String, PendingRequest>>,
}

impl Default for RequestInfoExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestInfoExecutor {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Consults the in-memory table first and falls back to the persisted
    /// mirror in shared state, so restored workflows answer correctly.
    pub async fn has_pending_request(&self, request_id: &str, shared_state: &SharedState) -> bool {
        if self.pending.lock().await.contains_key(request_id) {
            return true;
        }
        mirror_contains(shared_state, request_id).await
    }

    /// Records a response for `request_id`, constructs the correlated
    /// [`RequestResponse`], and returns the message to send back to the
    /// originating executor. Erases the persisted snapshot on success.
    pub async fn handle_response(
        &self,
        request_id: &str,
        response_data: Value,
        shared_state: &SharedState,
    ) -> Result<Message> {
        let pending = self.take_pending(request_id, shared_state).await?;
        let response = RequestResponse {
            data: response_data,
            original_request: pending.data.clone(),
            request_id: request_id.to_string(),
            request_type: pending.request_type.clone(),
            response_type: pending.response_type.clone(),
        };
        let payload = TypedValue::concrete(
            "RequestResponse",
            serde_json::to_value(&response).expect("RequestResponse serializes"),
        );
        Ok(Message::new(payload, REQUEST_INFO_EXECUTOR_ID).with_target(pending.source_executor_id))
    }

    async fn take_pending(&self, request_id: &str, shared_state: &SharedState) -> Result<PendingRequest> {
        if let Some(pending) = self.pending.lock().await.remove(request_id) {
            remove_from_mirror(shared_state, request_id).await;
            return Ok(pending);
        }
        if let Some(pending) = read_from_mirror(shared_state, request_id).await {
            remove_from_mirror(shared_state, request_id).await;
            return Ok(pending);
        }
        Err(WorkflowError::Runner(RequestInfoError::UnknownRequestId(request_id.to_string()).to_string()))
    }

    /// Like [`Executor::execute`] but returns the assigned request id
    /// directly, for callers that already hold a concrete handle (the
    /// sub-workflow executor lifting a child request) and need to
    /// correlate it without round-tripping through the message/event
    /// system.
    pub async fn record_and_notify(&self, request: RequestInfoMessage, runner_context: &RunnerContext, shared_state: &SharedState) -> String {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.record(
            request_id.clone(),
            PendingRequest {
                source_executor_id: request.source_executor_id.clone(),
                request_type: request.request_type.clone(),
                response_type: request.response_type.clone(),
                data: request.data.clone(),
            },
            shared_state,
        )
        .await;
        runner_context.push_event(Event::framework(WorkflowEvent::RequestInfo {
            request_id: request_id.clone(),
            source_executor_id: request.source_executor_id,
            request_type: request.request_type,
            response_type: request.response_type,
            data: request.data,
        }));
        request_id
    }

    async fn record(&self, request_id: String, pending: PendingRequest, shared_state: &SharedState) {
        let mut hold = shared_state.hold().await;
        let mut mirror = hold
            .get_within_hold(REQUEST_INFO_STATE_KEY)
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        mirror.insert(
            request_id.clone(),
            serde_json::to_value(&pending).expect("PendingRequest serializes"),
        );
        hold.set_within_hold(REQUEST_INFO_STATE_KEY, Value::Object(mirror));
        drop(hold);
        self.pending.lock().await.insert(request_id, pending);
    }
}

async fn mirror_contains(shared_state: &SharedState, request_id: &str) -> bool {
    shared_state
        .get(REQUEST_INFO_STATE_KEY)
        .await
        .and_then(|v| v.as_object().map(|m| m.contains_key(request_id)))
        .unwrap_or(false)
}

async fn read_from_mirror(shared_state: &SharedState, request_id: &str) -> Option<PendingRequest> {
    let mirror = shared_state.get(REQUEST_INFO_STATE_KEY).await?;
    let entry = mirror.as_object()?.get(request_id)?.clone();
    serde_json::from_value(entry).ok()
}

async fn remove_from_mirror(shared_state: &SharedState, request_id: &str) {
    let mut hold = shared_state.hold().await;
    if let Some(mut mirror) = hold.get_within_hold(REQUEST_INFO_STATE_KEY).and_then(|v| v.as_object().cloned()) {
        mirror.remove(request_id);
        hold.set_within_hold(REQUEST_INFO_STATE_KEY, Value::Object(mirror));
    }
}

#[async_trait]
impl Executor for RequestInfoExecutor {
    fn id(&self) -> &str {
        REQUEST_INFO_EXECUTOR_ID
    }

    fn kind(&self) -> &'static str {
        "workflow_core::request_info::RequestInfoExecutor"
    }

    fn input_types(&self) -> Vec<TypeSpec> {
        vec![TypeSpec::concrete("RequestInfoMessage")]
    }

    fn output_types(&self) -> Vec<TypeSpec> {
        vec![TypeSpec::concrete("RequestResponse")]
    }

    fn workflow_output_types(&self) -> Vec<TypeSpec> {
        Vec::new()
    }

    fn can_handle(&self, payload: &TypedValue, _registry: &TypeRegistry) -> bool {
        payload.type_spec == TypeSpec::concrete("RequestInfoMessage")
    }

    async fn execute(
        &self,
        message: Message,
        runner_context: Arc<RunnerContext>,
        shared_state: Arc<SharedState>,
        _registry: &TypeRegistry,
    ) -> Result<()> {
        runner_context.push_event(Event::framework(WorkflowEvent::ExecutorInvoked {
            executor_id: self.id().to_string(),
        }));

        let request: RequestInfoMessage = serde_json::from_value(message.payload.value.clone())
            .map_err(|e| WorkflowError::Runner(format!("malformed RequestInfoMessage: {e}")))?;
        self.record_and_notify(request, &runner_context, &shared_state).await;

        runner_context.push_event(Event::framework(WorkflowEvent::ExecutorCompleted {
            executor_id: self.id().to_string(),
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_a_request_marks_it_pending() {
        let executor = RequestInfoExecutor::new();
        let shared_state = Arc::new(SharedState::new());
        let runner_context = Arc::new(RunnerContext::new("wf", None));
        let request = RequestInfoMessage {
            source_executor_id: "r".to_string(),
            request_type: "DraftReview".to_string(),
            response_type: "Approval".to_string(),
            data: serde_json::json!({"text": "go"}),
        };
        let payload = TypedValue::concrete("RequestInfoMessage", serde_json::to_value(&request).unwrap());
        let message = Message::new(payload, "r");
        executor
            .execute(message, runner_context.clone(), shared_state.clone(), &TypeRegistry::new())
            .await
            .unwrap();

        let events = runner_context.drain_events().await;
        let request_id = events
            .iter()
            .find_map(|e| match &e.payload {
                WorkflowEvent::RequestInfo { request_id, .. } => Some(request_id.clone()),
                _ => None,
            })
            .unwrap();
        assert!(executor.has_pending_request(&request_id, &shared_state).await);
    }

    #[tokio::test]
    async fn handle_response_clears_pending_and_routes_to_source() {
        let executor = RequestInfoExecutor::new();
        let shared_state = Arc::new(SharedState::new());
        let runner_context = Arc::new(RunnerContext::new("wf", None));
        let request = RequestInfoMessage {
            source_executor_id: "r".to_string(),
            request_type: "DraftReview".to_string(),
            response_type: "Approval".to_string(),
            data: serde_json::json!({"text": "go"}),
        };
        let payload = TypedValue::concrete("RequestInfoMessage", serde_json::to_value(&request).unwrap());
        executor
            .execute(Message::new(payload, "r"), runner_context.clone(), shared_state.clone(), &TypeRegistry::new())
            .await
            .unwrap();
        let events = runner_context.drain_events().await;
        let request_id = events
            .iter()
            .find_map(|e| match &e.payload {
                WorkflowEvent::RequestInfo { request_id, .. } => Some(request_id.clone()),
                _ => None,
            })
            .unwrap();

        let response_message = executor
            .handle_response(&request_id, serde_json::json!({"ok": true}), &shared_state)
            .await
            .unwrap();
        assert_eq!(response_message.target_id.as_deref(), Some("r"));
        assert!(!executor.has_pending_request(&request_id, &shared_state).await);
    }

    #[tokio::test]
    async fn handle_response_for_unknown_id_errors() {
        let executor = RequestInfoExecutor::new();
        let shared_state = Arc::new(SharedState::new());
        let result = executor.handle_response("nope", serde_json::json!(null), &shared_state).await;
        assert!(result.is_err());
    }
}

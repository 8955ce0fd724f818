//! Executor abstraction.
//!
//! Handlers are registered as data at construction time rather than
//! discovered via decorators/reflection: each
//! [`HandlerRegistration`] names the [`TypeSpec`] it accepts and the output
//! types it may produce, and [`HandlerExecutor::execute`] picks the unique
//! registration whose declared type is compatible with the arriving
//! payload's tag.

use crate::error::{ExecutorFailureDetails, NoHandlerError, Result, WorkflowError};
use crate::events::{Event, WorkflowEvent};
use crate::message::{Message, TypedValue};
use crate::request_info::{RequestInfoMessage, RequestResponse, REQUEST_INFO_EXECUTOR_ID};
use crate::runner_context::RunnerContext;
use crate::shared_state::SharedState;
use crate::types::{is_compatible, TypeRegistry, TypeSpec};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Handle through which a running handler talks to the runtime: send
/// messages, yield workflow outputs, emit events, issue a request-info
/// exchange, and touch shared state.
pub struct HandlerContext {
    executor_id: String,
    source_executor_ids: Vec<String>,
    runner_context: Arc<RunnerContext>,
    shared_state: Arc<SharedState>,
    trace_metadata: HashMap<String, Value>,
}

impl HandlerContext {
    pub fn new(
        executor_id: impl Into<String>,
        source_executor_ids: Vec<String>,
        runner_context: Arc<RunnerContext>,
        shared_state: Arc<SharedState>,
        trace_metadata: HashMap<String, Value>,
    ) -> Self {
        Self {
            executor_id: executor_id.into(),
            source_executor_ids,
            runner_context,
            shared_state,
            trace_metadata,
        }
    }

    pub fn executor_id(&self) -> &str {
        &self.executor_id
    }

    pub fn source_executor_ids(&self) -> &[String] {
        &self.source_executor_ids
    }

    pub fn is_streaming(&self) -> bool {
        self.runner_context.is_streaming()
    }

    pub fn shared_state(&self) -> &SharedState {
        &self.shared_state
    }

    /// Wraps `payload` in a [`Message`] from this executor and appends it
    /// to the outbound buffer under the executor's id.
    pub async fn send_message(&self, payload: TypedValue, target_id: Option<String>) {
        let mut message = Message::new(payload, self.executor_id.clone());
        message.target_id = target_id;
        message.trace_metadata = self.trace_metadata.clone();
        self.runner_context.send_message(message).await;
    }

    /// Emits a user-observable workflow output.
    pub async fn yield_output(&self, data: Value) {
        self.runner_context.push_event(Event::framework(WorkflowEvent::Output {
            executor_id: self.executor_id.clone(),
            data,
        }));
    }

    /// Emits an intermediate `data` event, or any other event a handler
    /// wants to surface. Lifecycle events are rejected and downgraded to a
    /// warning.
    pub fn add_event(&self, payload: WorkflowEvent) {
        self.runner_context.push_event(Event::executor(payload));
    }

    /// Issues a request-info exchange: routes a [`RequestInfoMessage`] to
    /// the built-in request-info executor, which assigns a request id and
    /// suspends progress until a correlated response arrives.
    pub async fn request_info(&self, data: Value, request_type: impl Into<String>, response_type: impl Into<String>) {
        let request = RequestInfoMessage {
            source_executor_id: self.executor_id.clone(),
            request_type: request_type.into(),
            response_type: response_type.into(),
            data,
        };
        let payload = TypedValue::concrete(
            "RequestInfoMessage",
            serde_json::to_value(&request).expect("RequestInfoMessage serializes"),
        );
        self.send_message(payload, Some(REQUEST_INFO_EXECUTOR_ID.to_string())).await;
    }
}

/// An async handler body: `(payload, context) -> Result<()>`.
pub type HandlerFn =
    Arc<dyn Fn(Value, Arc<HandlerContext>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// A single registered handler: the type it accepts plus the types of
/// messages/outputs it may produce, consumed by the validator.
#[derive(Clone)]
pub struct HandlerRegistration {
    pub message_type: TypeSpec,
    pub output_types: Vec<TypeSpec>,
    pub workflow_output_types: Vec<TypeSpec>,
    pub handler: HandlerFn,
}

/// A response handler, keyed by `(request_type, response_type)`, invoked
/// with the decoded [`RequestResponse`] payload.
#[derive(Clone)]
pub struct ResponseHandlerRegistration {
    pub request_type: String,
    pub response_type: String,
    pub handler: HandlerFn,
}

/// The runtime-facing executor contract.
#[async_trait]
pub trait Executor: Send + Sync {
    fn id(&self) -> &str;

    /// Stable class-qualified name, used only to build the graph signature.
    /// Not a Rust reflection mechanism — each concrete executor type names
    /// itself.
    fn kind(&self) -> &'static str;

    fn input_types(&self) -> Vec<TypeSpec>;
    fn output_types(&self) -> Vec<TypeSpec>;
    fn workflow_output_types(&self) -> Vec<TypeSpec>;
    fn response_handler_keys(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn can_handle(&self, payload: &TypedValue, registry: &TypeRegistry) -> bool;

    /// The scheduler's entry point: finds the unique matching handler,
    /// emits `executor_invoked`, runs it, then `executor_completed` or
    /// `executor_failed`.
    async fn execute(
        &self,
        message: Message,
        runner_context: Arc<RunnerContext>,
        shared_state: Arc<SharedState>,
        registry: &TypeRegistry,
    ) -> Result<()>;

    /// Snapshot hook for per-run state, persisted into the reserved
    /// executor-state slot at each superstep boundary. Default: no state to
    /// snapshot.
    async fn snapshot_state(&self) -> Option<Value> {
        None
    }

    /// Inverse of [`Executor::snapshot_state`], invoked on resume.
    async fn restore_state(&self, _value: Value) {}
}

/// The general-purpose executor implementation: a bag of
/// [`HandlerRegistration`]s and [`ResponseHandlerRegistration`]s dispatched
/// by declared type, constructed by the caller and registered with the
/// builder; never mutated after build.
pub struct HandlerExecutor {
    id: String,
    handlers: Vec<HandlerRegistration>,
    response_handlers: Vec<ResponseHandlerRegistration>,
}

impl HandlerExecutor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            handlers: Vec::new(),
            response_handlers: Vec::new(),
        }
    }

    pub fn with_handler(mut self, registration: HandlerRegistration) -> Self {
        self.handlers.push(registration);
        self
    }

    pub fn with_response_handler(mut self, registration: ResponseHandlerRegistration) -> Self {
        self.response_handlers.push(registration);
        self
    }

    fn find_response_handler(&self, response: &RequestResponse) -> Option<&ResponseHandlerRegistration> {
        self.response_handlers
            .iter()
            .find(|r| r.request_type == response.request_type && r.response_type == response.response_type)
    }

    fn find_handler(&self, payload: &TypedValue, registry: &TypeRegistry) -> Option<&HandlerRegistration> {
        self.handlers
            .iter()
            .find(|h| is_compatible(&payload.type_spec, &h.message_type, registry))
    }
}

#[async_trait]
impl Executor for HandlerExecutor {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "workflow_core::executor::HandlerExecutor"
    }

    fn input_types(&self) -> Vec<TypeSpec> {
        self.handlers.iter().map(|h| h.message_type.clone()).collect()
    }

    fn output_types(&self) -> Vec<TypeSpec> {
        self.handlers.iter().flat_map(|h| h.output_types.clone()).collect()
    }

    fn workflow_output_types(&self) -> Vec<TypeSpec> {
        self.handlers
            .iter()
            .flat_map(|h| h.workflow_output_types.clone())
            .collect()
    }

    fn response_handler_keys(&self) -> Vec<(String, String)> {
        self.response_handlers
            .iter()
            .map(|r| (r.request_type.clone(), r.response_type.clone()))
            .collect()
    }

    fn can_handle(&self, payload: &TypedValue, registry: &TypeRegistry) -> bool {
        if payload.type_spec == TypeSpec::concrete("RequestResponse") {
            return match serde_json::from_value::<RequestResponse>(payload.value.clone()) {
                Ok(response) => self.find_response_handler(&response).is_some(),
                Err(_) => false,
            };
        }
        self.find_handler(payload, registry).is_some()
    }

    async fn execute(
        &self,
        message: Message,
        runner_context: Arc<RunnerContext>,
        shared_state: Arc<SharedState>,
        registry: &TypeRegistry,
    ) -> Result<()> {
        runner_context.push_event(Event::framework(WorkflowEvent::ExecutorInvoked {
            executor_id: self.id.clone(),
        }));

        let context = Arc::new(HandlerContext::new(
            self.id.clone(),
            vec![message.source_id.clone()],
            runner_context.clone(),
            shared_state,
            message.trace_metadata.clone(),
        ));

        let is_response = message.payload.type_spec == TypeSpec::concrete("RequestResponse");
        let outcome = if is_response {
            match serde_json::from_value::<RequestResponse>(message.payload.value.clone()) {
                Ok(response) => match self.find_response_handler(&response) {
                    Some(reg) => (reg.handler)(message.payload.value.clone(), context.clone()).await,
                    None => Err(WorkflowError::Runner(format!(
                        "executor '{}' has no response handler for ({}, {})",
                        self.id, response.request_type, response.response_type
                    ))),
                },
                Err(e) => Err(WorkflowError::Runner(format!("malformed RequestResponse payload: {e}"))),
            }
        } else {
            match self.find_handler(&message.payload, registry) {
                Some(reg) => (reg.handler)(message.payload.value.clone(), context.clone()).await,
                None => Err(NoHandlerError {
                    executor_id: self.id.clone(),
                    type_name: format!("{:?}", message.payload.type_spec),
                }
                .into()),
            }
        };

        match outcome {
            Ok(()) => {
                runner_context.push_event(Event::framework(WorkflowEvent::ExecutorCompleted {
                    executor_id: self.id.clone(),
                }));
                Ok(())
            }
            Err(e) => {
                let details = ExecutorFailureDetails {
                    error_type: "handler_error".to_string(),
                    message: e.to_string(),
                    traceback: None,
                    executor_id: self.id.clone(),
                };
                runner_context.push_event(Event::framework(WorkflowEvent::ExecutorFailed {
                    executor_id: self.id.clone(),
                    details: details.clone(),
                }));
                Err(WorkflowError::AgentExecution(details))
            }
        }
    }
}

impl From<NoHandlerError> for WorkflowError {
    fn from(e: NoHandlerError) -> Self {
        WorkflowError::Runner(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::TypedValue;

    fn noop_registry() -> TypeRegistry {
        TypeRegistry::new()
    }

    fn uppercase_handler() -> HandlerRegistration {
        HandlerRegistration {
            message_type: TypeSpec::concrete("String"),
            output_types: vec![TypeSpec::concrete("String")],
            workflow_output_types: vec![],
            handler: Arc::new(|value, ctx| {
                Box::pin(async move {
                    let s = value.as_str().unwrap_or_default().to_uppercase();
                    ctx.send_message(TypedValue::concrete("String", serde_json::json!(s)), None)
                        .await;
                    Ok(())
                })
            }),
        }
    }

    #[tokio::test]
    async fn dispatches_to_matching_handler() {
        let executor = HandlerExecutor::new("upper").with_handler(uppercase_handler());
        let runner_context = Arc::new(RunnerContext::new("wf", None));
        let shared_state = Arc::new(SharedState::new());
        let message = Message::new(TypedValue::concrete("String", serde_json::json!("hi")), "start");
        executor
            .execute(message, runner_context.clone(), shared_state, &noop_registry())
            .await
            .unwrap();
        let drained = runner_context.drain_outbound().await;
        assert_eq!(drained["upper"][0].payload.value, serde_json::json!("HI"));
    }

    #[tokio::test]
    async fn unmatched_payload_type_fails_with_no_handler() {
        let executor = HandlerExecutor::new("upper").with_handler(uppercase_handler());
        let runner_context = Arc::new(RunnerContext::new("wf", None));
        let shared_state = Arc::new(SharedState::new());
        let message = Message::new(TypedValue::concrete("Int", serde_json::json!(1)), "start");
        let result = executor.execute(message, runner_context, shared_state, &noop_registry()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn failed_handler_emits_executor_failed_and_propagates() {
        let failing = HandlerRegistration {
            message_type: TypeSpec::concrete("String"),
            output_types: vec![],
            workflow_output_types: vec![],
            handler: Arc::new(|_value, _ctx| Box::pin(async move { Err(WorkflowError::Runner("boom".into())) })),
        };
        let executor = HandlerExecutor::new("x").with_handler(failing);
        let runner_context = Arc::new(RunnerContext::new("wf", None));
        let shared_state = Arc::new(SharedState::new());
        let message = Message::new(TypedValue::concrete("String", serde_json::json!("hi")), "start");
        let result = executor.execute(message, runner_context.clone(), shared_state, &noop_registry()).await;
        assert!(result.is_err());
        let events = runner_context.drain_events().await;
        assert!(events
            .iter()
            .any(|e| matches!(e.payload, WorkflowEvent::ExecutorFailed { .. })));
    }
}

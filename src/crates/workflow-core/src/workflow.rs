//! Workflow façade.
//!
//! The entry points a caller actually touches: `run`/`run_stream` (fresh
//! input), `run_from_checkpoint`/`run_stream_from_checkpoint` (resume),
//! `send_responses`/`send_responses_streaming` (answer pending
//! request-info), and `as_agent` (chat-shaped wrapper).
//! Every entry point opens the same run envelope: `started`,
//! `status(in_progress)`, the scheduler loop, a single latched
//! `status(in_progress_pending_requests)` on the first `request_info`
//! event, then a terminal status or `failed`.

use crate::edge::EdgeGroup;
use crate::edge_runner::{invoke, ExecutorMap};
use crate::error::{ExecutorFailureDetails, Result, WorkflowError};
use crate::events::{Event, RunState, WorkflowEvent};
use crate::message::{ChatMessage, Message, TypedValue};
use crate::request_info::RequestInfoExecutor;
use crate::runner_context::RunnerContext;
use crate::scheduler::Runner;
use crate::shared_state::SharedState;
use crate::types::{TypeRegistry, TypeSpec};
use futures::future::join_all;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use workflow_checkpoint::{CheckpointStore, WorkflowCheckpoint};

pub(crate) const WORKFLOW_INPUT_SOURCE_ID: &str = "__workflow_input__";

struct Session {
    runner_context: Arc<RunnerContext>,
    shared_state: Arc<SharedState>,
}

#[derive(Default)]
struct RunOutcome {
    result: Option<Result<()>>,
    pending_seen: bool,
}

/// Resets the running flag when the run's stream is dropped, whether that
/// happens because the caller consumed it to completion or cancelled it
/// early. Any attempt to start a second run while one is active fails.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn generic_failure_details(e: &WorkflowError) -> ExecutorFailureDetails {
    if let WorkflowError::AgentExecution(details) = e {
        return details.clone();
    }
    ExecutorFailureDetails {
        error_type: "runner_error".to_string(),
        message: e.to_string(),
        traceback: None,
        executor_id: "<scheduler>".to_string(),
    }
}

/// Builds the one or two trailing events that close out a run, based on
/// what `drive` recorded: either a terminal idle status, or `failed` plus
/// `status(failed)`.
fn finalize_events(outcome: &Mutex<RunOutcome>) -> Vec<Event> {
    let (result, pending_seen) = {
        let mut guard = outcome.lock().unwrap();
        (guard.result.take(), guard.pending_seen)
    };
    match result {
        None | Some(Ok(())) => vec![Event::framework(WorkflowEvent::Status {
            state: if pending_seen {
                RunState::IdleWithPendingRequests
            } else {
                RunState::Idle
            },
        })],
        Some(Err(e)) => {
            let details = generic_failure_details(&e);
            vec![
                Event::framework(WorkflowEvent::Failed { details }),
                Event::framework(WorkflowEvent::Status { state: RunState::Failed }),
            ]
        }
    }
}

/// Drives one scheduler run to completion, yielding every event as it
/// arrives and latching `in_progress_pending_requests` the first time a
/// `request_info` event is seen — events emitted during a handler appear in
/// the stream in real time.
fn drive(runner: Runner, checkpoint_enabled: bool, outcome: Arc<Mutex<RunOutcome>>) -> impl Stream<Item = Event> {
    async_stream::stream! {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut run_future = Box::pin(runner.run_until_convergence(checkpoint_enabled, &tx));
        loop {
            tokio::select! {
                biased;
                result = &mut run_future => {
                    outcome.lock().unwrap().result = Some(result);
                    while let Ok(event) = rx.try_recv() {
                        let is_request_info = matches!(event.payload, WorkflowEvent::RequestInfo { .. });
                        yield event;
                        if is_request_info {
                            let mut guard = outcome.lock().unwrap();
                            if !guard.pending_seen {
                                guard.pending_seen = true;
                                drop(guard);
                                yield Event::framework(WorkflowEvent::Status { state: RunState::InProgressPendingRequests });
                            }
                        }
                    }
                    break;
                }
                maybe = rx.recv() => {
                    if let Some(event) = maybe {
                        let is_request_info = matches!(event.payload, WorkflowEvent::RequestInfo { .. });
                        yield event;
                        if is_request_info {
                            let mut guard = outcome.lock().unwrap();
                            if !guard.pending_seen {
                                guard.pending_seen = true;
                                drop(guard);
                                yield Event::framework(WorkflowEvent::Status { state: RunState::InProgressPendingRequests });
                            }
                        }
                    }
                }
            }
        }
    }
}

/// The non-streaming result of a run: everything but the internal
/// `started` event and (by default) status events, plus the status
/// timeline as a side channel.
pub struct RunResult {
    events: Vec<WorkflowEvent>,
    status_timeline: Vec<RunState>,
}

impl RunResult {
    pub fn get_outputs(&self) -> Vec<serde_json::Value> {
        self.events
            .iter()
            .filter_map(|e| match e {
                WorkflowEvent::Output { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn get_request_info_events(&self) -> Vec<&WorkflowEvent> {
        self.events
            .iter()
            .filter(|e| matches!(e, WorkflowEvent::RequestInfo { .. }))
            .collect()
    }

    pub fn get_final_state(&self) -> Result<RunState> {
        self.status_timeline.last().copied().ok_or(WorkflowError::NoFinalState)
    }

    pub fn status_timeline(&self) -> &[RunState] {
        &self.status_timeline
    }

    pub fn events(&self) -> &[WorkflowEvent] {
        &self.events
    }
}

async fn accumulate(stream: impl Stream<Item = Event>) -> Result<RunResult> {
    tokio::pin!(stream);
    let mut events = Vec::new();
    let mut status_timeline = Vec::new();
    let mut failure = None;
    while let Some(event) = stream.next().await {
        match event.payload {
            WorkflowEvent::Started => {}
            WorkflowEvent::Status { state } => status_timeline.push(state),
            WorkflowEvent::Failed { details } => failure = Some(details),
            other => events.push(other),
        }
    }
    if let Some(details) = failure {
        return Err(WorkflowError::AgentExecution(details));
    }
    Ok(RunResult { events, status_timeline })
}

/// A built, runnable workflow. Construct one via
/// [`crate::builder::WorkflowBuilder::build`].
pub struct Workflow {
    name: String,
    executors: ExecutorMap,
    groups: Vec<EdgeGroup>,
    start_id: String,
    iteration_cap: u64,
    graph_signature_hash: String,
    type_registry: Arc<TypeRegistry>,
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
    request_info: Arc<RequestInfoExecutor>,
    session: Mutex<Session>,
    running: AtomicBool,
}

impl Workflow {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: impl Into<String>,
        executors: ExecutorMap,
        groups: Vec<EdgeGroup>,
        start_id: impl Into<String>,
        iteration_cap: u64,
        graph_signature_hash: String,
        runner_context: Arc<RunnerContext>,
        shared_state: Arc<SharedState>,
        type_registry: Arc<TypeRegistry>,
        checkpoint_store: Option<Arc<dyn CheckpointStore>>,
        request_info: Arc<RequestInfoExecutor>,
    ) -> Self {
        Self {
            name: name.into(),
            executors,
            groups,
            start_id: start_id.into(),
            iteration_cap,
            graph_signature_hash,
            type_registry,
            checkpoint_store,
            request_info,
            session: Mutex::new(Session { runner_context, shared_state }),
            running: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_id(&self) -> &str {
        &self.start_id
    }

    pub fn graph_signature_hash(&self) -> &str {
        &self.graph_signature_hash
    }

    pub fn has_executor(&self, id: &str) -> bool {
        self.executors.contains_key(id)
    }

    pub(crate) fn executors(&self) -> &ExecutorMap {
        &self.executors
    }

    pub(crate) fn groups(&self) -> &[EdgeGroup] {
        &self.groups
    }

    pub(crate) fn iteration_cap(&self) -> u64 {
        self.iteration_cap
    }

    pub(crate) fn type_registry(&self) -> Arc<TypeRegistry> {
        self.type_registry.clone()
    }

    pub(crate) fn request_info(&self) -> Arc<RequestInfoExecutor> {
        self.request_info.clone()
    }

    fn reset_session(&self) -> (Arc<RunnerContext>, Arc<SharedState>) {
        let runner_context = Arc::new(RunnerContext::new(self.name.clone(), self.checkpoint_store.clone()));
        let shared_state = Arc::new(SharedState::new());
        *self.session.lock().unwrap() = Session {
            runner_context: runner_context.clone(),
            shared_state: shared_state.clone(),
        };
        (runner_context, shared_state)
    }

    fn current_session(&self) -> (Arc<RunnerContext>, Arc<SharedState>) {
        let session = self.session.lock().unwrap();
        (session.runner_context.clone(), session.shared_state.clone())
    }

    fn begin_run(&self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(WorkflowError::AlreadyRunning(self.name.clone()));
        }
        Ok(())
    }

    /// Streaming one-shot run over fresh `payload`.
    pub fn run_stream(&self, payload: TypedValue) -> Result<impl Stream<Item = Event> + '_> {
        self.begin_run()?;
        // Constructed here, not inside the generator body below, so it is
        // captured into the stream's state at this point and its `Drop`
        // resets `running` even if the returned stream is never polled.
        let guard = RunningGuard(&self.running);
        let (runner_context, shared_state) = self.reset_session();
        let executors = self.executors.clone();
        let groups = self.groups.clone();
        let start_id = self.start_id.clone();
        let type_registry = self.type_registry.clone();
        let iteration_cap = self.iteration_cap;
        let graph_signature_hash = self.graph_signature_hash.clone();
        let name = self.name.clone();
        let checkpoint_enabled = self.checkpoint_store.is_some();

        Ok(async_stream::stream! {
            let _guard = guard;
            yield Event::framework(WorkflowEvent::Started);
            yield Event::framework(WorkflowEvent::Status { state: RunState::InProgress });

            let outcome = Arc::new(Mutex::new(RunOutcome::default()));
            let seed = Message::new(payload, WORKFLOW_INPUT_SOURCE_ID).with_target(start_id.clone());
            match invoke(&start_id, seed, &executors, shared_state.clone(), runner_context.clone(), &type_registry).await {
                Ok(()) => {
                    let runner = Runner::new(name, executors, &groups, iteration_cap, graph_signature_hash, runner_context.clone(), shared_state.clone(), type_registry);
                    let mut inner = Box::pin(drive(runner, checkpoint_enabled, outcome.clone()));
                    while let Some(event) = inner.next().await {
                        yield event;
                    }
                }
                Err(e) => outcome.lock().unwrap().result = Some(Err(e)),
            }

            for event in finalize_events(&outcome) {
                yield event;
            }
        })
    }

    /// Non-streaming one-shot run.
    pub async fn run(&self, payload: TypedValue) -> Result<RunResult> {
        accumulate(self.run_stream(payload)?).await
    }

    /// Streaming resume from `checkpoint`.
    pub fn run_stream_from_checkpoint(&self, checkpoint: WorkflowCheckpoint) -> Result<impl Stream<Item = Event> + '_> {
        self.begin_run()?;
        let guard = RunningGuard(&self.running);
        let runner_context = Arc::new(RunnerContext::new(self.name.clone(), self.checkpoint_store.clone()));
        let shared_state = Arc::new(SharedState::new());
        *self.session.lock().unwrap() = Session {
            runner_context: runner_context.clone(),
            shared_state: shared_state.clone(),
        };
        let executors = self.executors.clone();
        let groups = self.groups.clone();
        let type_registry = self.type_registry.clone();
        let iteration_cap = self.iteration_cap;
        let graph_signature_hash = self.graph_signature_hash.clone();
        let name = self.name.clone();
        let checkpoint_enabled = self.checkpoint_store.is_some();

        Ok(async_stream::stream! {
            let _guard = guard;
            yield Event::framework(WorkflowEvent::Started);
            yield Event::framework(WorkflowEvent::Status { state: RunState::InProgress });

            let outcome = Arc::new(Mutex::new(RunOutcome::default()));
            match Runner::restore_from_checkpoint(name, executors, &groups, iteration_cap, graph_signature_hash, runner_context.clone(), shared_state.clone(), type_registry, checkpoint).await {
                Ok(runner) => {
                    let mut inner = Box::pin(drive(runner, checkpoint_enabled, outcome.clone()));
                    while let Some(event) = inner.next().await {
                        yield event;
                    }
                }
                Err(e) => outcome.lock().unwrap().result = Some(Err(e)),
            }

            for event in finalize_events(&outcome) {
                yield event;
            }
        })
    }

    /// Non-streaming resume.
    pub async fn run_from_checkpoint(&self, checkpoint: WorkflowCheckpoint) -> Result<RunResult> {
        accumulate(self.run_stream_from_checkpoint(checkpoint)?).await
    }

    /// Streaming response delivery, resuming a run left idle with pending
    /// requests.
    pub fn send_responses_streaming(&self, responses: HashMap<String, serde_json::Value>) -> Result<impl Stream<Item = Event> + '_> {
        self.begin_run()?;
        let guard = RunningGuard(&self.running);
        let (runner_context, shared_state) = self.current_session();
        let executors = self.executors.clone();
        let groups = self.groups.clone();
        let type_registry = self.type_registry.clone();
        let iteration_cap = self.iteration_cap;
        let graph_signature_hash = self.graph_signature_hash.clone();
        let name = self.name.clone();
        let checkpoint_enabled = self.checkpoint_store.is_some();
        let request_info = self.request_info.clone();

        Ok(async_stream::stream! {
            let _guard = guard;
            yield Event::framework(WorkflowEvent::Started);
            yield Event::framework(WorkflowEvent::Status { state: RunState::InProgress });

            let handled = join_all(responses.into_iter().map(|(request_id, data)| {
                let request_info = request_info.clone();
                let shared_state = shared_state.clone();
                async move {
                    let result = request_info.handle_response(&request_id, data, &shared_state).await;
                    (request_id, result)
                }
            }))
            .await;

            for (request_id, result) in handled {
                match result {
                    Ok(message) => runner_context.send_message(message).await,
                    // a correlated response delivered but no matching pending request: log and drop
                    Err(e) => tracing::debug!(request_id = %request_id, error = %e, "send_responses: unknown request id; skipping"),
                }
            }

            let outcome = Arc::new(Mutex::new(RunOutcome::default()));
            let runner = Runner::new(name, executors, &groups, iteration_cap, graph_signature_hash, runner_context.clone(), shared_state.clone(), type_registry);
            let mut inner = Box::pin(drive(runner, checkpoint_enabled, outcome.clone()));
            while let Some(event) = inner.next().await {
                yield event;
            }

            for event in finalize_events(&outcome) {
                yield event;
            }
        })
    }

    /// Non-streaming response delivery.
    pub async fn send_responses(&self, responses: HashMap<String, serde_json::Value>) -> Result<RunResult> {
        accumulate(self.send_responses_streaming(responses)?).await
    }

    /// Wraps the workflow so `ChatMessage` input is accepted by the start
    /// executor (which must declare a handler over `list<ChatMessage>`),
    /// mapping workflow outputs back to chat turns and surfacing
    /// `request_info` events for the caller to answer.
    pub async fn as_agent(&self, input: Vec<ChatMessage>) -> Result<AgentTurn> {
        let payload = TypedValue::new(
            TypeSpec::list(TypeSpec::concrete("ChatMessage")),
            serde_json::to_value(&input).expect("ChatMessage list serializes"),
        );
        let result = self.run(payload).await?;
        Ok(AgentTurn::from_result(result))
    }

    /// Resumes an `as_agent` turn once the caller has answered its pending
    /// requests (a correlated approval response becomes the response
    /// payload delivered via `send_responses`).
    pub async fn as_agent_respond(&self, responses: HashMap<String, serde_json::Value>) -> Result<AgentTurn> {
        let result = self.send_responses(responses).await?;
        Ok(AgentTurn::from_result(result))
    }
}

/// One turn of an `as_agent`-wrapped workflow: assistant messages produced
/// this turn, plus any outstanding `request_info` events the caller must
/// answer (via [`Workflow::as_agent_respond`]) before the conversation can
/// continue.
pub struct AgentTurn {
    pub messages: Vec<ChatMessage>,
    pub pending_requests: Vec<WorkflowEvent>,
}

impl AgentTurn {
    fn from_result(result: RunResult) -> Self {
        let pending_requests = result.get_request_info_events().into_iter().cloned().collect();
        let messages = result
            .get_outputs()
            .into_iter()
            .map(|v| serde_json::from_value::<ChatMessage>(v.clone()).unwrap_or_else(|_| ChatMessage::assistant(v.to_string())))
            .collect();
        Self { messages, pending_requests }
    }
}

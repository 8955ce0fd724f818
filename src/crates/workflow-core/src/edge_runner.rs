//! Edge Runner.
//!
//! One runner per edge group, built once at workflow-build time and reused
//! across supersteps. Runners never mutate the topology; they are pure
//! dispatchers, except for fan-in's accumulator, which by definition must
//! persist across supersteps until every declared source has contributed:
//! incomplete arrivals do not invoke the target.

use crate::edge::{EdgeGroup, NamedPredicate, NamedSelection};
use crate::error::{NoRouteError, Result, WorkflowError};
use crate::executor::Executor;
use crate::message::{Message, TypedValue};
use crate::runner_context::RunnerContext;
use crate::shared_state::SharedState;
use crate::types::TypeRegistry;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type ExecutorMap = HashMap<String, Arc<dyn Executor>>;

/// Runtime counterpart of an [`EdgeGroup`]: same topology, plus (for
/// fan-in) the in-progress accumulator.
pub enum EdgeRunner {
    Single {
        group_id: String,
        target_id: String,
        predicate: Option<NamedPredicate>,
    },
    FanOut {
        group_id: String,
        target_ids: Vec<String>,
        selection: Option<NamedSelection>,
    },
    FanIn {
        group_id: String,
        source_ids: Vec<String>,
        target_id: String,
        accumulator: Mutex<HashMap<String, Vec<TypedValue>>>,
    },
    SwitchCase {
        group_id: String,
        cases: Vec<(NamedPredicate, String)>,
        default_target_id: String,
    },
    MultiSelect {
        group_id: String,
        target_ids: Vec<String>,
        selection: NamedSelection,
    },
}

impl EdgeRunner {
    pub fn from_group(group: &EdgeGroup) -> Self {
        match group.clone() {
            EdgeGroup::Single {
                id,
                target_id,
                predicate,
                ..
            } => EdgeRunner::Single {
                group_id: id,
                target_id,
                predicate,
            },
            EdgeGroup::FanOut {
                id,
                target_ids,
                selection,
                ..
            } => EdgeRunner::FanOut {
                group_id: id,
                target_ids,
                selection,
            },
            EdgeGroup::FanIn {
                id,
                source_ids,
                target_id,
                ..
            } => EdgeRunner::FanIn {
                group_id: id,
                source_ids,
                target_id,
                accumulator: Mutex::new(HashMap::new()),
            },
            EdgeGroup::SwitchCase {
                id,
                cases,
                default_target_id,
                ..
            } => EdgeRunner::SwitchCase {
                group_id: id,
                cases,
                default_target_id,
            },
            EdgeGroup::MultiSelect {
                id,
                target_ids,
                selection,
                ..
            } => EdgeRunner::MultiSelect {
                group_id: id,
                target_ids,
                selection,
            },
        }
    }

    pub fn group_id(&self) -> &str {
        match self {
            EdgeRunner::Single { group_id, .. }
            | EdgeRunner::FanOut { group_id, .. }
            | EdgeRunner::FanIn { group_id, .. }
            | EdgeRunner::SwitchCase { group_id, .. }
            | EdgeRunner::MultiSelect { group_id, .. } => group_id,
        }
    }

    /// Routes one incoming message. Fan-in may not invoke a target at all
    /// (it is waiting for more sources); every other variant invokes
    /// exactly zero or more targets synchronously.
    pub async fn dispatch(
        &self,
        message: Message,
        executors: &ExecutorMap,
        shared_state: Arc<SharedState>,
        runner_context: Arc<RunnerContext>,
        registry: &TypeRegistry,
    ) -> Result<()> {
        match self {
            EdgeRunner::Single { target_id, predicate, .. } => {
                let should_fire = match predicate {
                    Some(p) => p.evaluate(&message.payload.value)?,
                    None => true,
                };
                if should_fire {
                    invoke(target_id, message, executors, shared_state, runner_context, registry).await?;
                }
                Ok(())
            }
            EdgeRunner::FanOut {
                target_ids, selection, ..
            } => {
                let active = match selection {
                    Some(s) => s.evaluate(&message.payload.value, target_ids)?,
                    None => target_ids.clone(),
                };
                let futures = active.iter().map(|target_id| {
                    invoke(
                        target_id,
                        message.clone(),
                        executors,
                        shared_state.clone(),
                        runner_context.clone(),
                        registry,
                    )
                });
                for result in join_all(futures).await {
                    result?;
                }
                Ok(())
            }
            EdgeRunner::MultiSelect {
                target_ids, selection, ..
            } => {
                let active = selection.evaluate(&message.payload.value, target_ids)?;
                let futures = active.iter().map(|target_id| {
                    invoke(
                        target_id,
                        message.clone(),
                        executors,
                        shared_state.clone(),
                        runner_context.clone(),
                        registry,
                    )
                });
                for result in join_all(futures).await {
                    result?;
                }
                Ok(())
            }
            EdgeRunner::SwitchCase {
                cases,
                default_target_id,
                ..
            } => {
                for (predicate, target_id) in cases {
                    match predicate.evaluate(&message.payload.value) {
                        Ok(true) => {
                            return invoke(target_id, message, executors, shared_state, runner_context, registry).await;
                        }
                        Ok(false) => continue,
                        Err(e) => {
                            tracing::warn!(predicate = %predicate.name, error = %e, "switch/case predicate raised; trying next case");
                            continue;
                        }
                    }
                }
                if default_target_id.is_empty() {
                    return Err(NoRouteError(message.source_id.clone()).into());
                }
                invoke(default_target_id, message, executors, shared_state, runner_context, registry).await
            }
            EdgeRunner::FanIn { .. } => self.dispatch_batch(vec![message], executors, shared_state, runner_context, registry).await,
        }
    }

    /// Routes every message a single source produced in one superstep.
    ///
    /// Fan-in is the only variant where this matters: `scheduler.rs` runs
    /// different sources concurrently but delivers one source's messages in
    /// order, so a source that emits more than one message into the same
    /// fan-in group must have its whole batch recorded under one lock
    /// acquisition before readiness is checked. Checking readiness after
    /// each individual message (as a message-at-a-time `dispatch` loop
    /// would) lets a second source's single message race ahead and fire the
    /// group after only the first of this source's messages has landed,
    /// silently stranding the rest in a round that has already fired. Every
    /// other variant is stateless across messages, so it just dispatches
    /// each one in order.
    pub async fn dispatch_batch(
        &self,
        messages: Vec<Message>,
        executors: &ExecutorMap,
        shared_state: Arc<SharedState>,
        runner_context: Arc<RunnerContext>,
        registry: &TypeRegistry,
    ) -> Result<()> {
        match self {
            EdgeRunner::FanIn {
                source_ids,
                target_id,
                accumulator,
                ..
            } => {
                let Some(source_id) = messages.first().map(|m| m.source_id.clone()) else {
                    return Ok(());
                };
                let aggregated = {
                    let mut acc = accumulator.lock().await;
                    acc.entry(source_id).or_default().extend(messages.into_iter().map(|m| m.payload));
                    if !source_ids.iter().all(|s| acc.contains_key(s)) {
                        return Ok(());
                    }
                    let mut values = Vec::new();
                    for source_id in source_ids {
                        if let Some(items) = acc.remove(source_id) {
                            values.extend(items);
                        }
                    }
                    values
                };
                let payload = TypedValue::new(
                    crate::types::TypeSpec::list(crate::types::TypeSpec::Any),
                    serde_json::Value::Array(aggregated.into_iter().map(|v| v.value).collect()),
                );
                let aggregated_message = Message::new(payload, target_id.clone());
                invoke(target_id, aggregated_message, executors, shared_state, runner_context, registry).await
            }
            _ => {
                for message in messages {
                    self.dispatch(message, executors, shared_state.clone(), runner_context.clone(), registry).await?;
                }
                Ok(())
            }
        }
    }
}

impl From<NoRouteError> for WorkflowError {
    fn from(e: NoRouteError) -> Self {
        WorkflowError::Runner(e.to_string())
    }
}

pub(crate) async fn invoke(
    target_id: &str,
    message: Message,
    executors: &ExecutorMap,
    shared_state: Arc<SharedState>,
    runner_context: Arc<RunnerContext>,
    registry: &TypeRegistry,
) -> Result<()> {
    let mut message = message;
    message.target_id = Some(target_id.to_string());
    match executors.get(target_id) {
        Some(executor) => executor.execute(message, runner_context, shared_state, registry).await,
        None => Err(WorkflowError::Runner(format!("no executor registered for target id '{target_id}'"))),
    }
}

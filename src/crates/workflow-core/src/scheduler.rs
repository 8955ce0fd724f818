//! Runner / Superstep Scheduler.
//!
//! A Pregel-like loop: each superstep drains the per-source outbound
//! buffer, dispatches every message to its edge group's runner (or
//! straight to a named target, for messages that set `target_id`
//! explicitly — e.g. a request/response reply, which has no edge of its
//! own), and interleaves live event delivery with that work instead of
//! waiting for the superstep boundary.

use crate::edge::EdgeGroup;
use crate::edge_runner::{invoke, EdgeRunner, ExecutorMap};
use crate::error::{Result, WorkflowError};
use crate::events::{Event, WorkflowEvent};
use crate::message::Message;
use crate::runner_context::RunnerContext;
use crate::shared_state::SharedState;
use crate::types::TypeRegistry;
use futures::future::join_all;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use workflow_checkpoint::{CheckpointError, WorkflowCheckpoint};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Drives a built workflow's executors and edge runners through
/// synchronized supersteps until no messages remain.
pub struct Runner {
    pub workflow_name: String,
    pub iteration_cap: u64,
    pub graph_signature_hash: String,
    executors: ExecutorMap,
    runners_by_source: HashMap<String, Vec<Arc<EdgeRunner>>>,
    runner_context: Arc<RunnerContext>,
    shared_state: Arc<SharedState>,
    type_registry: Arc<TypeRegistry>,
    iteration: AtomicU64,
    resumed: AtomicBool,
    previous_checkpoint_id: Mutex<Option<String>>,
}

impl Runner {
    pub fn new(
        workflow_name: impl Into<String>,
        executors: ExecutorMap,
        groups: &[EdgeGroup],
        iteration_cap: u64,
        graph_signature_hash: String,
        runner_context: Arc<RunnerContext>,
        shared_state: Arc<SharedState>,
        type_registry: Arc<TypeRegistry>,
    ) -> Self {
        let mut runners_by_source: HashMap<String, Vec<Arc<EdgeRunner>>> = HashMap::new();
        for group in groups {
            let runner = Arc::new(EdgeRunner::from_group(group));
            for source_id in group.source_ids() {
                runners_by_source.entry(source_id).or_default().push(runner.clone());
            }
        }
        Self {
            workflow_name: workflow_name.into(),
            iteration_cap,
            graph_signature_hash,
            executors,
            runners_by_source,
            runner_context,
            shared_state,
            type_registry,
            iteration: AtomicU64::new(0),
            resumed: AtomicBool::new(false),
            previous_checkpoint_id: Mutex::new(None),
        }
    }

    pub fn iteration(&self) -> u64 {
        self.iteration.load(Ordering::Acquire)
    }

    fn mark_resumed(&self, iteration_count: u64) {
        self.resumed.store(true, Ordering::Release);
        self.iteration.store(iteration_count, Ordering::Release);
    }

    /// Restores a runner's working state from `checkpoint`, refusing the
    /// resume if the topology has changed since it was captured.
    /// `executors`/`groups` must already reflect the same topology that
    /// produced `graph_signature_hash` — the builder constructs them
    /// identically to a fresh run.
    #[allow(clippy::too_many_arguments)]
    pub async fn restore_from_checkpoint(
        workflow_name: impl Into<String>,
        executors: ExecutorMap,
        groups: &[EdgeGroup],
        iteration_cap: u64,
        graph_signature_hash: String,
        runner_context: Arc<RunnerContext>,
        shared_state: Arc<SharedState>,
        type_registry: Arc<TypeRegistry>,
        checkpoint: WorkflowCheckpoint,
    ) -> Result<Self> {
        if checkpoint.graph_signature_hash.is_empty() {
            tracing::warn!(
                checkpoint_id = %checkpoint.checkpoint_id,
                "checkpoint has no recorded graph signature; proceeding without topology verification"
            );
        } else if checkpoint.graph_signature_hash != graph_signature_hash {
            return Err(WorkflowError::Checkpoint(CheckpointError::TopologyChanged {
                checkpoint_id: checkpoint.checkpoint_id.clone(),
                expected: checkpoint.graph_signature_hash.clone(),
                actual: graph_signature_hash,
            }));
        }

        shared_state.restore(checkpoint.state.clone()).await;
        for (id, executor) in &executors {
            if let Some(state) = shared_state.get_executor_state(id).await {
                executor.restore_state(state).await;
            }
        }
        for (source_id, messages) in checkpoint.messages {
            for value in messages {
                match serde_json::from_value::<Message>(value) {
                    Ok(message) => runner_context.send_message(message).await,
                    Err(e) => tracing::warn!(source_id = %source_id, error = %e, "failed to decode checkpointed message; dropping it"),
                }
            }
        }

        let runner = Self::new(
            workflow_name,
            executors,
            groups,
            iteration_cap,
            graph_signature_hash,
            runner_context,
            shared_state,
            type_registry,
        );
        runner.mark_resumed(checkpoint.iteration_count);
        *runner.previous_checkpoint_id.lock().await = Some(checkpoint.checkpoint_id);
        Ok(runner)
    }

    /// Runs supersteps until no messages remain or the iteration cap is
    /// reached, forwarding every event onto `sink` as it is produced.
    pub async fn run_until_convergence(&self, checkpoint_enabled: bool, sink: &mpsc::UnboundedSender<Event>) -> Result<()> {
        for event in self.runner_context.drain_events().await {
            let _ = sink.send(event);
        }

        if checkpoint_enabled && !self.resumed.load(Ordering::Acquire) {
            self.snapshot_checkpoint("after_initial_execution", None).await;
        }

        while self.iteration.load(Ordering::Acquire) < self.iteration_cap {
            let iteration = self.iteration.fetch_add(1, Ordering::AcqRel) + 1;
            self.runner_context
                .push_event(Event::framework(WorkflowEvent::SuperstepStarted { iteration }));

            let buffer = self.runner_context.drain_outbound().await;
            let iteration_future = self.run_iteration(buffer).fuse();
            tokio::pin!(iteration_future);

            let outcome = loop {
                tokio::select! {
                    biased;
                    result = &mut iteration_future => break result,
                    events = self.runner_context.poll_events(POLL_INTERVAL) => {
                        for event in events {
                            let _ = sink.send(event);
                        }
                    }
                }
            };

            for event in self.runner_context.drain_events().await {
                let _ = sink.send(event);
            }
            outcome?;

            self.runner_context
                .push_event(Event::framework(WorkflowEvent::SuperstepCompleted { iteration }));
            for event in self.runner_context.drain_events().await {
                let _ = sink.send(event);
            }

            self.snapshot_executor_states().await;
            if checkpoint_enabled {
                self.snapshot_checkpoint("superstep", Some(iteration)).await;
            }

            if !self.runner_context.has_pending_outbound().await {
                return Ok(());
            }
        }

        if self.runner_context.has_pending_outbound().await {
            return Err(WorkflowError::Convergence {
                workflow_name: self.workflow_name.clone(),
                iterations: self.iteration.load(Ordering::Acquire),
            });
        }
        Ok(())
    }

    /// Drains one superstep's worth of work: per source, messages are
    /// delivered in emission order; different sources run concurrently.
    ///
    /// Messages with an explicit `target_id` (request/response replies)
    /// bypass edge routing entirely and are invoked individually as they're
    /// found. The rest are collected into one ordered batch per source and
    /// handed to each of that source's edge runners via `dispatch_batch` in
    /// a single call, so a fan-in runner sees every message this source
    /// produced this superstep before it decides whether the group is
    /// ready — splitting them across separate calls is what let a second
    /// source's single message race ahead and fire the group early.
    async fn run_iteration(&self, buffer: HashMap<String, Vec<Message>>) -> Result<()> {
        let futures = buffer.into_iter().map(|(source_id, messages)| {
            let runners = self.runners_by_source.get(&source_id).cloned().unwrap_or_default();
            async move {
                let mut routed = Vec::new();
                for message in messages {
                    if let Some(target_id) = message.target_id.clone() {
                        invoke(
                            &target_id,
                            message,
                            &self.executors,
                            self.shared_state.clone(),
                            self.runner_context.clone(),
                            &self.type_registry,
                        )
                        .await?;
                    } else {
                        routed.push(message);
                    }
                }
                for runner in &runners {
                    runner
                        .dispatch_batch(
                            routed.clone(),
                            &self.executors,
                            self.shared_state.clone(),
                            self.runner_context.clone(),
                            &self.type_registry,
                        )
                        .await?;
                }
                Ok::<(), WorkflowError>(())
            }
        });
        for result in join_all(futures).await {
            result?;
        }
        Ok(())
    }

    async fn snapshot_executor_states(&self) {
        for (id, executor) in &self.executors {
            if let Some(state) = executor.snapshot_state().await {
                self.shared_state.set_executor_state(id, state).await;
            }
        }
    }

    async fn snapshot_checkpoint(&self, reason: &str, iteration: Option<u64>) {
        let Some(store) = self.runner_context.checkpoint_store() else {
            return;
        };

        let mut checkpoint = WorkflowCheckpoint::new(self.workflow_name.clone(), self.graph_signature_hash.clone());
        checkpoint.iteration_count = iteration.unwrap_or_else(|| self.iteration.load(Ordering::Acquire));
        checkpoint.metadata.insert("reason".to_string(), serde_json::json!(reason));
        checkpoint.state = self.shared_state.snapshot().await;
        checkpoint.pending_request_info_events = checkpoint
            .state
            .get(crate::shared_state::REQUEST_INFO_STATE_KEY)
            .and_then(|v| v.as_object().cloned())
            .map(|m| m.into_iter().collect())
            .unwrap_or_default();
        checkpoint.messages = self
            .runner_context
            .snapshot_outbound()
            .await
            .into_iter()
            .map(|(source_id, messages)| {
                let encoded = messages
                    .iter()
                    .map(|m| serde_json::to_value(m).unwrap_or(serde_json::Value::Null))
                    .collect();
                (source_id, encoded)
            })
            .collect();
        checkpoint.previous_checkpoint_id = self.previous_checkpoint_id.lock().await.clone();

        // Save failures are non-terminal: log and keep running.
        match store.save(checkpoint).await {
            Ok(id) => *self.previous_checkpoint_id.lock().await = Some(id),
            Err(e) => tracing::warn!(error = %e, reason, "checkpoint save failed; run continues"),
        }
    }
}

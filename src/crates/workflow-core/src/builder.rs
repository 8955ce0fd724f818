//! Workflow Builder.
//!
//! Fluent construction: accumulate edge groups and executors, set a start,
//! then [`WorkflowBuilder::build`] runs the validator and hands back a
//! [`crate::workflow::Workflow`]. Chat-client implementations are out of
//! scope here, but the identity-keyed auto-wrap pattern is still exercised
//! for plain function handlers via [`WorkflowBuilder::add_fn`].

use crate::edge::{Edge, EdgeGroup, NamedPredicate, NamedSelection, PredicateFn, SelectionFn};
use crate::edge_runner::ExecutorMap;
use crate::error::Result;
use crate::executor::{Executor, HandlerExecutor, HandlerRegistration};
use crate::request_info::{RequestInfoExecutor, REQUEST_INFO_EXECUTOR_ID};
use crate::runner_context::RunnerContext;
use crate::shared_state::SharedState;
use crate::signature;
use crate::subworkflow::SubWorkflowExecutor;
use crate::types::{TypeRegistry, TypeSpec};
use crate::validator;
use crate::workflow::Workflow;
use std::sync::Arc;
use workflow_checkpoint::CheckpointStore;

/// Default superstep cap; callers with known-cyclic graphs should set an
/// explicit one via [`WorkflowBuilder::with_iteration_cap`].
pub const DEFAULT_ITERATION_CAP: u64 = 100;

pub struct WorkflowBuilder {
    name: String,
    declared_ids: Vec<String>,
    executors: ExecutorMap,
    groups: Vec<EdgeGroup>,
    start_id: Option<String>,
    iteration_cap: u64,
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
    type_registry: TypeRegistry,
    group_counter: u64,
    request_info: Arc<RequestInfoExecutor>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let mut builder = Self {
            name: name.into(),
            declared_ids: Vec::new(),
            executors: ExecutorMap::new(),
            groups: Vec::new(),
            start_id: None,
            iteration_cap: DEFAULT_ITERATION_CAP,
            checkpoint_store: None,
            type_registry: TypeRegistry::new(),
            group_counter: 0,
            request_info: Arc::new(RequestInfoExecutor::new()),
        };
        builder.request_info_executor();
        builder
    }

    fn next_group_id(&mut self) -> String {
        self.group_counter += 1;
        format!("g{}", self.group_counter)
    }

    /// Registers the request-info executor under its fixed id, keeping a
    /// concrete handle alongside the type-erased one so `Workflow` can call
    /// [`RequestInfoExecutor::handle_response`] directly without downcasting
    /// a trait object.
    fn request_info_executor(&mut self) {
        self.executors
            .insert(REQUEST_INFO_EXECUTOR_ID.to_string(), self.request_info.clone() as Arc<dyn Executor>);
    }

    pub fn with_iteration_cap(mut self, cap: u64) -> Self {
        self.iteration_cap = cap;
        self
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    pub fn with_type_registry(mut self, registry: TypeRegistry) -> Self {
        self.type_registry = registry;
        self
    }

    pub fn declare_subtype(mut self, subtype: impl Into<String>, supertype: impl Into<String>) -> Self {
        self.type_registry.declare_subtype(subtype, supertype);
        self
    }

    /// Registers `executor` and, if this is the first executor registered,
    /// also marks it as the start. The id is recorded even if it
    /// duplicates one already present, so the validator reports the
    /// collision instead of this call silently overwriting it — duplicate
    /// ids are collected and reported together at `build()`.
    pub fn add_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        let id = executor.id().to_string();
        self.declared_ids.push(id.clone());
        if self.start_id.is_none() {
            self.start_id = Some(id.clone());
        }
        self.executors.insert(id, executor);
        self
    }

    pub fn with_start(mut self, executor_id: impl Into<String>) -> Self {
        self.start_id = Some(executor_id.into());
        self
    }

    /// Wraps a plain async handler function as a [`HandlerExecutor`] with a
    /// single registration, declaring its accepted and produced types
    /// explicitly since Rust closures carry no runtime type introspection.
    pub fn add_fn(self, id: impl Into<String>, registration: HandlerRegistration) -> Self {
        let executor = Arc::new(HandlerExecutor::new(id).with_handler(registration));
        self.add_executor(executor)
    }

    pub fn add_edge(mut self, source_id: impl Into<String>, target_id: impl Into<String>) -> Self {
        let id = self.next_group_id();
        self.groups.push(EdgeGroup::Single {
            id,
            source_id: source_id.into(),
            target_id: target_id.into(),
            predicate: None,
        });
        self
    }

    pub fn add_conditional_edge(
        mut self,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        predicate_name: impl Into<String>,
        predicate: PredicateFn,
    ) -> Self {
        let id = self.next_group_id();
        self.groups.push(EdgeGroup::Single {
            id,
            source_id: source_id.into(),
            target_id: target_id.into(),
            predicate: Some(NamedPredicate::new(predicate_name, predicate)),
        });
        self
    }

    pub fn add_fan_out_edge(
        mut self,
        source_id: impl Into<String>,
        target_ids: Vec<String>,
        selection: Option<(String, SelectionFn)>,
    ) -> Self {
        let id = self.next_group_id();
        self.groups.push(EdgeGroup::FanOut {
            id,
            source_id: source_id.into(),
            target_ids,
            selection: selection.map(|(name, f)| NamedSelection::new(name, f)),
        });
        self
    }

    pub fn add_fan_in_edge(mut self, source_ids: Vec<String>, target_id: impl Into<String>) -> Self {
        let id = self.next_group_id();
        self.groups.push(EdgeGroup::FanIn {
            id,
            source_ids,
            target_id: target_id.into(),
        });
        self
    }

    pub fn add_switch_case_edge(
        mut self,
        source_id: impl Into<String>,
        cases: Vec<(String, PredicateFn, String)>,
        default_target_id: impl Into<String>,
    ) -> Self {
        let id = self.next_group_id();
        self.groups.push(EdgeGroup::SwitchCase {
            id,
            source_id: source_id.into(),
            cases: cases
                .into_iter()
                .map(|(name, predicate, target)| (NamedPredicate::new(name, predicate), target))
                .collect(),
            default_target_id: default_target_id.into(),
        });
        self
    }

    pub fn add_multi_select_edge(
        mut self,
        source_id: impl Into<String>,
        target_ids: Vec<String>,
        selection_name: impl Into<String>,
        selection: SelectionFn,
    ) -> Self {
        let id = self.next_group_id();
        self.groups.push(EdgeGroup::MultiSelect {
            id,
            source_id: source_id.into(),
            target_ids,
            selection: NamedSelection::new(selection_name, selection),
        });
        self
    }

    /// Raw edge accessor for callers that already hold an [`Edge`] and just
    /// want an unconditional single-edge group from it.
    pub fn add_raw_edge(self, edge: Edge) -> Self {
        self.add_edge(edge.source_id, edge.target_id)
    }

    /// Wraps `child` as a node under `id`. The child's own `request_info`
    /// events surface through this workflow's pending-request table, so a
    /// caller answers them via the same `send_responses` path as any other
    /// request.
    pub fn add_subworkflow(self, id: impl Into<String>, child: Arc<Workflow>) -> Self {
        let executor = Arc::new(SubWorkflowExecutor::new(id, child, self.request_info.clone()));
        self.add_executor(executor)
    }

    /// Validates the accumulated topology and returns a [`Workflow`] ready
    /// to run: runs the validator, constructs a runner context and shared
    /// state, and hands back the assembled workflow.
    pub fn build(self) -> Result<Workflow> {
        let start_id = self.start_id.unwrap_or_default();
        let report = validator::validate(&self.declared_ids, &self.executors, &self.groups, &start_id, &self.type_registry)?;
        for dead_end in &report.dead_ends {
            tracing::info!(executor_id = %dead_end, "dead-end executor: no outgoing edges");
        }

        let graph_signature_hash = signature::compute_signature(&start_id, &self.executors, &self.groups, self.iteration_cap);
        let runner_context = Arc::new(RunnerContext::new(self.name.clone(), self.checkpoint_store.clone()));
        let shared_state = Arc::new(SharedState::new());

        Ok(Workflow::new(
            self.name,
            self.executors,
            self.groups,
            start_id,
            self.iteration_cap,
            graph_signature_hash,
            runner_context,
            shared_state,
            Arc::new(self.type_registry),
            self.checkpoint_store,
            self.request_info,
        ))
    }
}

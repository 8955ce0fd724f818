//! Superstep scheduler, typed edge routing, and checkpoint/resume for agent
//! workflow graphs.
//!
//! Build a graph with [`builder::WorkflowBuilder`], get back a
//! [`workflow::Workflow`], and drive it with `run`/`run_stream`,
//! `run_from_checkpoint`/`run_stream_from_checkpoint`,
//! `send_responses`/`send_responses_streaming`, or the chat-shaped
//! `as_agent`/`as_agent_respond`.

pub mod builder;
pub mod edge;
pub mod edge_runner;
pub mod error;
pub mod events;
pub mod executor;
pub mod message;
pub mod request_info;
pub mod runner_context;
pub mod scheduler;
pub mod shared_state;
pub mod signature;
pub mod subworkflow;
pub mod types;
pub mod validator;
pub mod workflow;

pub use builder::{WorkflowBuilder, DEFAULT_ITERATION_CAP};
pub use edge::{Edge, EdgeGroup, NamedPredicate, NamedSelection, PredicateFn, SelectionFn};
pub use error::{ExecutorFailureDetails, Result, ValidationError, WorkflowError};
pub use events::{Event, EventOrigin, RunState, WorkflowEvent};
pub use executor::{Executor, HandlerContext, HandlerExecutor, HandlerRegistration, ResponseHandlerRegistration};
pub use message::{ChatMessage, Message, TypedValue};
pub use request_info::{RequestInfoExecutor, RequestInfoMessage, RequestResponse, REQUEST_INFO_EXECUTOR_ID};
pub use shared_state::SharedState;
pub use subworkflow::SubWorkflowExecutor;
pub use types::{is_compatible, ContainerKind, TypeRegistry, TypeSpec};
pub use validator::ValidationReport;
pub use workflow::{AgentTurn, RunResult, Workflow};

pub use workflow_checkpoint::{CheckpointError, CheckpointStore, InMemoryCheckpointStore, WorkflowCheckpoint};

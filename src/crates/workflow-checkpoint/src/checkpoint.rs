//! The `WorkflowCheckpoint` wire shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Current checkpoint schema version. Bumped when the shape of
/// [`WorkflowCheckpoint`] changes in a way that affects decoding.
pub const CHECKPOINT_VERSION: u32 = 1;

/// A durable snapshot of in-flight workflow state, sufficient to resume
/// execution.
///
/// `state` holds the entire shared-state dump, including the
/// framework-reserved per-executor state slot — the runtime does not split
/// "shared" vs "per-executor" state at the checkpoint boundary, mirroring
/// how `workflow-core`'s shared state store keeps executor snapshots under
/// one reserved key rather than a parallel structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowCheckpoint {
    /// Random, stable id for this checkpoint.
    pub checkpoint_id: String,
    /// Id of the checkpoint this one was captured after, if any. Forms a
    /// chain that can be walked back through a workflow's history.
    pub previous_checkpoint_id: Option<String>,
    /// Name of the workflow this checkpoint belongs to.
    pub workflow_name: String,
    /// SHA-256 hex digest of the workflow's graph signature at capture time.
    /// Empty string if the workflow did not record one (older checkpoints);
    /// restore logs a warning rather than refusing in that case.
    pub graph_signature_hash: String,
    /// Wall-clock capture time.
    pub timestamp: DateTime<Utc>,
    /// Per-source outbound message buffer at capture time, keyed by
    /// source executor id, each entry an ordered list of encoded messages.
    pub messages: HashMap<String, Vec<Value>>,
    /// Full shared-state dump (including the reserved per-executor slot).
    pub state: HashMap<String, Value>,
    /// Request-info events that were pending a response at capture time,
    /// keyed by request id.
    pub pending_request_info_events: HashMap<String, Value>,
    /// Superstep counter at capture time.
    pub iteration_count: u64,
    /// Free-form metadata (capture reason, e.g. `"after_initial_execution"`
    /// or `"superstep"`, plus anything a caller wants to attach).
    pub metadata: HashMap<String, Value>,
    /// Schema version, for forward compatibility.
    pub version: u32,
}

impl WorkflowCheckpoint {
    /// Builds a new checkpoint with a fresh random id and the current
    /// timestamp. `previous_checkpoint_id` is left unset; callers chain it
    /// in.
    pub fn new(workflow_name: impl Into<String>, graph_signature_hash: impl Into<String>) -> Self {
        Self {
            checkpoint_id: uuid::Uuid::new_v4().to_string(),
            previous_checkpoint_id: None,
            workflow_name: workflow_name.into(),
            graph_signature_hash: graph_signature_hash.into(),
            timestamp: Utc::now(),
            messages: HashMap::new(),
            state: HashMap::new(),
            pending_request_info_events: HashMap::new(),
            iteration_count: 0,
            metadata: HashMap::new(),
            version: CHECKPOINT_VERSION,
        }
    }
}

/// Lightweight checkpoint listing entry, returned by
/// [`crate::traits::CheckpointStore::summarize`] without deserializing full
/// state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub checkpoint_id: String,
    pub previous_checkpoint_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub iteration_count: u64,
}

impl From<&WorkflowCheckpoint> for CheckpointSummary {
    fn from(c: &WorkflowCheckpoint) -> Self {
        Self {
            checkpoint_id: c.checkpoint_id.clone(),
            previous_checkpoint_id: c.previous_checkpoint_id.clone(),
            timestamp: c.timestamp,
            iteration_count: c.iteration_count,
        }
    }
}

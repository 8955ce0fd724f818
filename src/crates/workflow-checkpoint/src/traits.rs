//! The checkpoint store interface.

use crate::checkpoint::{CheckpointSummary, WorkflowCheckpoint};
use crate::error::Result;
use async_trait::async_trait;

/// Storage backend for [`WorkflowCheckpoint`]s.
///
/// All methods are async so that a backend can do real I/O (file, database,
/// object storage) without blocking the scheduler. `workflow-checkpoint`
/// ships two implementations: [`crate::memory::InMemoryCheckpointStore`] and
/// [`crate::file::FileCheckpointStore`].
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persists `checkpoint`, returning its id (equal to
    /// `checkpoint.checkpoint_id`, returned for convenience at call sites
    /// that don't already hold the checkpoint).
    async fn save(&self, checkpoint: WorkflowCheckpoint) -> Result<String>;

    /// Loads a checkpoint by id.
    async fn load(&self, checkpoint_id: &str) -> Result<WorkflowCheckpoint>;

    /// Lists all checkpoints for a workflow, most recent first.
    async fn list_checkpoints(&self, workflow_name: &str) -> Result<Vec<WorkflowCheckpoint>>;

    /// Lists checkpoint ids for a workflow, most recent first, without
    /// loading full state.
    async fn list_checkpoint_ids(&self, workflow_name: &str) -> Result<Vec<String>>;

    /// Returns the most recently saved checkpoint for a workflow, if any.
    async fn get_latest(&self, workflow_name: &str) -> Result<Option<WorkflowCheckpoint>>;

    /// Deletes a checkpoint. Returns `true` if it existed.
    async fn delete(&self, checkpoint_id: &str) -> Result<bool>;

    /// Lightweight listing of a workflow's checkpoints, without
    /// deserializing full state. The default implementation is correct for
    /// any backend but loads full checkpoints to build it; backends for
    /// which that is wasteful should override it.
    async fn summarize(&self, workflow_name: &str) -> Result<Vec<CheckpointSummary>> {
        Ok(self
            .list_checkpoints(workflow_name)
            .await?
            .iter()
            .map(CheckpointSummary::from)
            .collect())
    }
}

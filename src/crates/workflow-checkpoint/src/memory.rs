//! In-memory checkpoint store, for development and testing.

use crate::checkpoint::WorkflowCheckpoint;
use crate::error::{CheckpointError, Result};
use crate::traits::CheckpointStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Keeps every checkpoint in process memory behind a single `RwLock`.
/// Nothing survives a restart; intended for tests and quick prototyping,
/// mirroring the grounding repo's `InMemoryCheckpointSaver`.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    // checkpoint_id -> checkpoint
    by_id: RwLock<HashMap<String, WorkflowCheckpoint>>,
    // workflow_name -> ordered checkpoint ids (insertion order)
    by_workflow: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every stored checkpoint. Useful for test isolation between
    /// cases that share a store instance.
    pub fn clear(&self) {
        self.by_id.write().unwrap().clear();
        self.by_workflow.write().unwrap().clear();
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: WorkflowCheckpoint) -> Result<String> {
        let id = checkpoint.checkpoint_id.clone();
        let workflow_name = checkpoint.workflow_name.clone();
        self.by_id.write().unwrap().insert(id.clone(), checkpoint);
        self.by_workflow
            .write()
            .unwrap()
            .entry(workflow_name)
            .or_default()
            .push(id.clone());
        Ok(id)
    }

    async fn load(&self, checkpoint_id: &str) -> Result<WorkflowCheckpoint> {
        self.by_id
            .read()
            .unwrap()
            .get(checkpoint_id)
            .cloned()
            .ok_or_else(|| CheckpointError::NotFound(checkpoint_id.to_string()))
    }

    async fn list_checkpoints(&self, workflow_name: &str) -> Result<Vec<WorkflowCheckpoint>> {
        let ids = self
            .by_workflow
            .read()
            .unwrap()
            .get(workflow_name)
            .cloned()
            .unwrap_or_default();
        let by_id = self.by_id.read().unwrap();
        Ok(ids
            .iter()
            .rev()
            .filter_map(|id| by_id.get(id).cloned())
            .collect())
    }

    async fn list_checkpoint_ids(&self, workflow_name: &str) -> Result<Vec<String>> {
        Ok(self
            .by_workflow
            .read()
            .unwrap()
            .get(workflow_name)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .rev()
            .collect())
    }

    async fn get_latest(&self, workflow_name: &str) -> Result<Option<WorkflowCheckpoint>> {
        let ids = self.by_workflow.read().unwrap();
        let Some(last_id) = ids.get(workflow_name).and_then(|v| v.last()) else {
            return Ok(None);
        };
        Ok(self.by_id.read().unwrap().get(last_id).cloned())
    }

    async fn delete(&self, checkpoint_id: &str) -> Result<bool> {
        let removed = self.by_id.write().unwrap().remove(checkpoint_id).is_some();
        if removed {
            for ids in self.by_workflow.write().unwrap().values_mut() {
                ids.retain(|id| id != checkpoint_id);
            }
        }
        Ok(removed)
    }
}

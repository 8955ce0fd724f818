//! File-backed checkpoint store.

use crate::checkpoint::WorkflowCheckpoint;
use crate::encoding::encode_bounded;
use crate::error::{CheckpointError, Result};
use crate::traits::CheckpointStore;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Stores each checkpoint as `<storage_dir>/<checkpoint_id>.json`.
///
/// Writes go through a temp file in the same directory followed by a
/// rename, so a crash mid-write can never leave a half-written checkpoint
/// at the canonical path. Reads validate that the resolved path is still
/// inside `storage_dir` to rule out a `checkpoint_id` smuggling a path
/// traversal (`../../etc/passwd`).
pub struct FileCheckpointStore {
    storage_dir: PathBuf,
}

impl FileCheckpointStore {
    /// Creates a store rooted at `storage_dir`, creating the directory if
    /// it does not exist.
    pub async fn new(storage_dir: impl Into<PathBuf>) -> Result<Self> {
        let storage_dir = storage_dir.into();
        tokio::fs::create_dir_all(&storage_dir).await?;
        Ok(Self { storage_dir })
    }

    fn path_for(&self, checkpoint_id: &str) -> Result<PathBuf> {
        if checkpoint_id.is_empty()
            || checkpoint_id.contains('/')
            || checkpoint_id.contains('\\')
            || checkpoint_id == ".."
        {
            return Err(CheckpointError::InvalidReference(checkpoint_id.to_string()));
        }
        let path = self.storage_dir.join(format!("{checkpoint_id}.json"));
        let resolved_parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.storage_dir.clone());
        if resolved_parent != self.storage_dir {
            return Err(CheckpointError::InvalidReference(checkpoint_id.to_string()));
        }
        Ok(path)
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, bytes).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<WorkflowCheckpoint>> {
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.storage_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<WorkflowCheckpoint>(&bytes) {
                Ok(cp) => out.push(cp),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable checkpoint file");
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: WorkflowCheckpoint) -> Result<String> {
        let id = checkpoint.checkpoint_id.clone();
        let path = self.path_for(&id)?;
        let bounded_state: std::collections::HashMap<_, _> = checkpoint
            .state
            .iter()
            .map(|(k, v)| (k.clone(), encode_bounded(v)))
            .collect();
        let mut checkpoint = checkpoint;
        checkpoint.state = bounded_state;
        let bytes = serde_json::to_vec_pretty(&checkpoint)?;
        self.write_atomic(&path, &bytes).await?;
        Ok(id)
    }

    async fn load(&self, checkpoint_id: &str) -> Result<WorkflowCheckpoint> {
        let path = self.path_for(checkpoint_id)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|_| CheckpointError::NotFound(checkpoint_id.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn list_checkpoints(&self, workflow_name: &str) -> Result<Vec<WorkflowCheckpoint>> {
        let mut all: Vec<_> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|c| c.workflow_name == workflow_name)
            .collect();
        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(all)
    }

    async fn list_checkpoint_ids(&self, workflow_name: &str) -> Result<Vec<String>> {
        Ok(self
            .list_checkpoints(workflow_name)
            .await?
            .into_iter()
            .map(|c| c.checkpoint_id)
            .collect())
    }

    async fn get_latest(&self, workflow_name: &str) -> Result<Option<WorkflowCheckpoint>> {
        Ok(self.list_checkpoints(workflow_name).await?.into_iter().next())
    }

    async fn delete(&self, checkpoint_id: &str) -> Result<bool> {
        let path = self.path_for(checkpoint_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

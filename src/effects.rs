//! Write effects: user-initiated mutations executed as filesystem writes.
//!
//! The executor never touches the in-memory graph. The filesystem is the
//! single writer of truth: a user action becomes a disk write, the watcher
//! observes it, the reducer applies it, subscribers hear about it. A failed
//! write is reported synchronously and produces no partial graph mutation
//! because none was attempted.

use std::path::PathBuf;

use tokio::fs;

use crate::{
    error::VaultError,
    graph::Environment,
    paths::{relative_path_for_id, NodeId},
};

pub struct WriteEffectExecutor {
    env: Environment,
}

impl WriteEffectExecutor {
    pub fn new(env: Environment) -> Self {
        WriteEffectExecutor { env }
    }

    fn document_path(&self, id: &NodeId) -> PathBuf {
        self.env.root_path.join(relative_path_for_id(id))
    }

    /// Create a new document for `id`. Refuses to clobber an existing
    /// document; updates go through [`update_node`](Self::update_node).
    pub async fn create_node(&self, id: &NodeId, content: &str) -> Result<PathBuf, VaultError> {
        let path = self.document_path(id);
        if fs::try_exists(&path).await? {
            return Err(VaultError::Custom(format!(
                "Document already exists for node '{id}' at {path:?}"
            )));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        tracing::debug!("[WriteEffectExecutor] creating {:?}", path);
        fs::write(&path, content).await?;
        Ok(path)
    }

    /// Replace the document content for `id`. Last write wins; conflict
    /// resolution between simultaneous writers is out of scope.
    pub async fn update_node(&self, id: &NodeId, content: &str) -> Result<PathBuf, VaultError> {
        let path = self.document_path(id);
        tracing::debug!("[WriteEffectExecutor] updating {:?}", path);
        fs::write(&path, content).await?;
        Ok(path)
    }

    /// Delete the document for `id`. The graph node disappears when the
    /// watcher observes the removal, not here.
    pub async fn delete_node(&self, id: &NodeId) -> Result<PathBuf, VaultError> {
        let path = self.document_path(id);
        tracing::debug!("[WriteEffectExecutor] deleting {:?}", path);
        fs::remove_file(&path).await?;
        Ok(path)
    }
}

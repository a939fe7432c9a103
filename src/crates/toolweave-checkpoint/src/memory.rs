//! In-memory snapshot storage for development and testing
//!
//! [`InMemorySnapshotStore`] keeps snapshots in an `Arc<RwLock<HashMap>>`.
//! Clones share the same storage, which makes it convenient to hand one
//! store to several executions in a test and inspect it afterwards.
//! Nothing survives the process.

use crate::error::{CheckpointError, Result};
use crate::record::ContextId;
use crate::snapshot::ExecutionSnapshot;
use crate::traits::SnapshotStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Thread-safe, process-local snapshot store
#[derive(Debug, Clone, Default)]
pub struct InMemorySnapshotStore {
    storage: Arc<RwLock<HashMap<ContextId, ExecutionSnapshot>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots
    pub fn len(&self) -> usize {
        self.storage.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.read().is_empty()
    }

    /// Clear all snapshots (useful for testing)
    pub fn clear(&self) {
        self.storage.write().clear();
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn put(&self, snapshot: &ExecutionSnapshot) -> Result<()> {
        self.storage.write().insert(snapshot.id(), snapshot.clone());
        Ok(())
    }

    fn get(&self, id: &ContextId) -> Result<ExecutionSnapshot> {
        self.storage
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| CheckpointError::NotFound(id.to_string()))
    }

    fn list(&self) -> Result<Vec<ContextId>> {
        let mut ids: Vec<ContextId> = self.storage.read().keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    fn delete(&self, id: &ContextId) -> Result<bool> {
        Ok(self.storage.write().remove(id).is_some())
    }
}

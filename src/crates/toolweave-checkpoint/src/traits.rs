//! Storage backend abstraction for execution snapshots

use crate::error::Result;
use crate::record::ContextId;
use crate::snapshot::ExecutionSnapshot;

/// Persistence backend for [`ExecutionSnapshot`]s
///
/// Snapshots are keyed by [`ExecutionSnapshot::id`]. Putting a snapshot
/// with an existing id replaces the previous one, so autosaving the same
/// execution repeatedly keeps only its latest state.
pub trait SnapshotStore: Send + Sync {
    /// Store a snapshot, replacing any previous one with the same id
    fn put(&self, snapshot: &ExecutionSnapshot) -> Result<()>;

    /// Fetch a snapshot, failing with `NotFound` when absent
    fn get(&self, id: &ContextId) -> Result<ExecutionSnapshot>;

    /// Ids of every stored snapshot, sorted
    fn list(&self) -> Result<Vec<ContextId>>;

    /// Remove a snapshot, returning whether it existed
    fn delete(&self, id: &ContextId) -> Result<bool>;
}

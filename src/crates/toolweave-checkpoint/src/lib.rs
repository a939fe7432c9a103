//! # toolweave-checkpoint - Execution records and snapshot storage
//!
//! The serializable half of toolweave. A live execution tree (see the
//! `toolweave-core` crate) is made of contexts that carry an identity, a
//! lifecycle [`Status`], an append-only history of [`Event`]s and, when a
//! unit fails, a captured [`Failure`]. This crate owns those types so that
//! a snapshot on disk and a context in memory speak the same vocabulary.
//!
//! ## Core Types
//!
//! - [`ContextId`], [`Status`], [`EventKind`], [`Event`], [`Failure`] - record vocabulary
//! - [`ContextSnapshot`] - one context node and its descendants
//! - [`ExecutionSnapshot`] - versioned document: a subtree plus shared state
//! - [`SnapshotStore`] - storage backend trait
//! - [`InMemorySnapshotStore`], [`FileSnapshotStore`] - bundled backends
//!
//! ## Example
//!
//! ```rust,ignore
//! use toolweave_checkpoint::{FileSnapshotStore, SnapshotStore};
//!
//! let store = FileSnapshotStore::new("./runs")?;
//! for id in store.list()? {
//!     let snapshot = store.get(&id)?;
//!     println!("{} -> {}", id, snapshot.root.status);
//! }
//! ```

pub mod error;
pub mod file;
pub mod memory;
pub mod record;
pub mod snapshot;
pub mod traits;

pub use error::{CheckpointError, Result};
pub use file::FileSnapshotStore;
pub use memory::InMemorySnapshotStore;
pub use record::{ContextId, Event, EventKind, Failure, Status};
pub use snapshot::{ContextSnapshot, ExecutionSnapshot, SnapshotIter, SNAPSHOT_VERSION};
pub use traits::SnapshotStore;

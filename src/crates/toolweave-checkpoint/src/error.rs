//! Error types for snapshot operations

use thiserror::Error;

/// Result type for snapshot operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur while saving, loading or storing snapshots
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Snapshot not found
    #[error("Snapshot not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Snapshot is structurally invalid or has an unsupported format version
    #[error("Invalid snapshot: {0}")]
    Invalid(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

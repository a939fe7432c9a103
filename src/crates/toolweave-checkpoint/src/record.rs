//! Record vocabulary shared by live contexts and their snapshots
//!
//! Everything in this module is plain data: identifiers, lifecycle status,
//! history events and captured failures. The live execution tree in
//! `toolweave-core` produces these values, and snapshots persist them
//! verbatim, so a value read back from disk compares equal to the value
//! that was written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a single context node
///
/// Minted from a random v4 UUID, so identifiers are unique across processes
/// and stay stable through save/load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(Uuid);

impl ContextId {
    /// Mint a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Parse an identifier from its hyphenated string form
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle status of a context
///
/// Transitions only move forward: `created -> running -> {complete, error,
/// cancelled}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Created,
    Running,
    Complete,
    Error,
    Cancelled,
}

impl Status {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Complete | Status::Error | Status::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Created => "created",
            Status::Running => "running",
            Status::Complete => "complete",
            Status::Error => "error",
            Status::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind tag of a history event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Context was created
    Created,
    /// A unit began running against the context
    Started,
    /// A child unit was invoked from this context
    ToolCall,
    /// The bound unit returned normally
    ToolReturn,
    /// The bound unit failed
    ToolException,
    /// A state store entry changed
    StateUpdate,
    /// The context was cancelled
    Cancelled,
    /// A child context was attached
    ChildCreated,
    /// The retry engine reset this context to resume it
    Retried,
    /// Application-defined event
    Custom(String),
}

impl EventKind {
    pub fn custom(name: impl Into<String>) -> Self {
        EventKind::Custom(name.into())
    }

    pub fn name(&self) -> &str {
        match self {
            EventKind::Created => "created",
            EventKind::Started => "started",
            EventKind::ToolCall => "tool_call",
            EventKind::ToolReturn => "tool_return",
            EventKind::ToolException => "tool_exception",
            EventKind::StateUpdate => "state_update",
            EventKind::Cancelled => "cancelled",
            EventKind::ChildCreated => "child_created",
            EventKind::Retried => "retried",
            EventKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of a context's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Position within the owning log, starting at zero
    pub seq: u64,
    pub kind: EventKind,
    /// Never earlier than the previous event's timestamp in the same log
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Captured description of a failed invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Stable classification such as `"value"`, `"type"` or `"panic"`
    pub kind: String,
    pub message: String,
    /// Units the failure passed through, innermost first
    #[serde(default)]
    pub trace: Vec<String>,
}

impl Failure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            trace: Vec::new(),
        }
    }

    /// Append a frame to the trace
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.trace.push(frame.into());
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if !self.trace.is_empty() {
            write!(f, " (in {})", self.trace.join(" <- "))?;
        }
        Ok(())
    }
}

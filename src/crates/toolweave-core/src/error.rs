//! Error types for context tracking and tool execution
//!
//! [`AgentError`] is the single error type of the core runtime. It covers
//! argument validation, captured execution failures, retry outcomes, state
//! store misuse and the lifecycle/wait conditions of a [`Context`].
//!
//! # Error Taxonomy
//!
//! | Variant            | Raised when                                                   |
//! |--------------------|---------------------------------------------------------------|
//! | `Argument`         | arguments fail validation, before any side effect             |
//! | `Execution`        | a unit's work function failed (captured as a [`Failure`])     |
//! | `RetryExhausted`   | a retry wrapper ran out of attempts                           |
//! | `Retry`            | the retry engine found nothing to resume                      |
//! | `StateType`        | a compound state operation hit an incompatible value          |
//! | `StateNotFound`    | a state key is absent (or debug state is disabled)            |
//! | `Cancelled`        | a waited-on context was cancelled                             |
//! | `Timeout`          | a bounded wait expired (the context itself is not changed)    |
//!
//! # Failure Kinds
//!
//! Every error has a stable [`kind`](AgentError::kind) string. For
//! `Execution` it is the kind chosen by the unit that failed, which lets
//! retry allow-lists discriminate between, say, `"value"` and `"type"`
//! failures:
//!
//! ```rust,ignore
//! fn run(&self, _ctx: &Context, args: Args) -> Result<Value> {
//!     let n = args["n"].as_i64().ok_or_else(|| AgentError::execution("type", "n must be an integer"))?;
//!     if n < 0 {
//!         return Err(AgentError::execution("value", "n must be non-negative"));
//!     }
//!     Ok(json!(n * 2))
//! }
//! ```
//!
//! [`Context`]: crate::Context

use thiserror::Error;
use toolweave_checkpoint::{CheckpointError, ContextId, Failure};

/// Result type for core operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors raised by the context runtime and by units running on it
#[derive(Error, Debug)]
pub enum AgentError {
    /// Invocation arguments did not match the unit's argument spec
    #[error("Invalid arguments for '{tool}': {}", describe_arguments(.missing, .extraneous, .invalid))]
    Argument {
        tool: String,
        missing: Vec<String>,
        extraneous: Vec<String>,
        invalid: Vec<String>,
    },

    /// A unit's work function failed
    #[error("Execution failed: {0}")]
    Execution(Failure),

    /// A retry wrapper exhausted its attempts
    #[error("'{tool}' failed after {attempts} attempts: {last}")]
    RetryExhausted {
        tool: String,
        attempts: u32,
        last: Box<AgentError>,
    },

    /// The retry engine was asked to resume a tree with nothing to resume
    #[error("Retry error: {0}")]
    Retry(String),

    /// A compound state operation found a value of an incompatible type
    #[error("State key '{key}' holds a {found}, expected a {expected}")]
    StateType {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    /// State key absent
    #[error("State key not found: {0}")]
    StateNotFound(String),

    /// The context was cancelled
    #[error("Context {0} was cancelled")]
    Cancelled(ContextId),

    /// A bounded wait expired
    #[error("Timed out after {duration_ms}ms waiting for {operation}")]
    Timeout { operation: String, duration_ms: u64 },

    /// Illegal lifecycle transition
    #[error("Invalid lifecycle transition: {0}")]
    Lifecycle(String),

    /// No unit registered under the name
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Snapshot storage failure
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

fn describe_arguments(missing: &[String], extraneous: &[String], invalid: &[String]) -> String {
    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("missing [{}]", missing.join(", ")));
    }
    if !extraneous.is_empty() {
        parts.push(format!("unexpected [{}]", extraneous.join(", ")));
    }
    if !invalid.is_empty() {
        parts.push(format!("invalid [{}]", invalid.join(", ")));
    }
    parts.join("; ")
}

impl AgentError {
    /// Create an execution failure of the given kind
    pub fn execution(kind: impl Into<String>, message: impl Into<String>) -> Self {
        AgentError::Execution(Failure::new(kind, message))
    }

    /// Stable classification string
    pub fn kind(&self) -> &str {
        match self {
            AgentError::Argument { .. } => "argument",
            AgentError::Execution(failure) => &failure.kind,
            AgentError::RetryExhausted { .. } => "retry_exhausted",
            AgentError::Retry(_) => "retry",
            AgentError::StateType { .. } => "state_type",
            AgentError::StateNotFound(_) => "state_not_found",
            AgentError::Cancelled(_) => "cancelled",
            AgentError::Timeout { .. } => "timeout",
            AgentError::Lifecycle(_) => "lifecycle",
            AgentError::ToolNotFound(_) => "tool_not_found",
            AgentError::Checkpoint(_) => "checkpoint",
            AgentError::Serialization(_) => "serialization",
            AgentError::Io(_) => "io",
            AgentError::Configuration(_) => "configuration",
        }
    }

    /// Description stored on a context when this error ends an invocation
    pub fn to_failure(&self) -> Failure {
        match self {
            AgentError::Execution(failure) => failure.clone(),
            other => Failure::new(other.kind(), other.to_string()),
        }
    }
}

impl From<Failure> for AgentError {
    fn from(failure: Failure) -> Self {
        AgentError::Execution(failure)
    }
}

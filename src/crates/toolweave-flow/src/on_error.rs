//! Fallback on failure

use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use toolweave_core::{AgentError, Args, Context, EventKind, Result, Tool, ToolSpec};
use tracing::debug;

/// Runs a fallback unit when the wrapped unit fails
///
/// The fallback receives the original arguments plus `error`, the failure
/// message, so its spec must declare an `error` argument. Argument errors
/// and cancellations are not handled; they propagate unchanged.
pub struct OnError {
    spec: ToolSpec,
    tool: Arc<dyn Tool>,
    fallback: Arc<dyn Tool>,
}

impl OnError {
    /// `<tool>::on_error` with the wrapped unit's arguments
    pub fn new(tool: Arc<dyn Tool>, fallback: Arc<dyn Tool>) -> Self {
        let mut spec = tool.spec().clone();
        spec.name = format!("{}::on_error", tool.name());
        Self {
            spec,
            tool,
            fallback,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.spec.name = name.into();
        self
    }
}

impl fmt::Debug for OnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnError")
            .field("name", &self.spec.name)
            .field("tool", &self.tool.name())
            .field("fallback", &self.fallback.name())
            .finish()
    }
}

impl Tool for OnError {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn run(&self, ctx: &Context, args: Args) -> Result<Value> {
        let err = match self.tool.invoke(ctx, args.clone()) {
            Ok(value) => return Ok(value),
            Err(err @ (AgentError::Argument { .. } | AgentError::Cancelled(_))) => return Err(err),
            Err(err) => err,
        };

        let failure = err.to_failure();
        debug!(kind = %failure.kind, "running fallback");
        ctx.record(
            EventKind::custom("fallback"),
            json!({ "tool": self.fallback.name(), "error": failure }),
        );
        let mut fallback_args = args;
        fallback_args.insert("error".to_string(), Value::String(failure.message));
        self.fallback.invoke(ctx, fallback_args)
    }
}

//! Resumable retry of partially completed executions
//!
//! [`retry`] walks an execution tree depth-first from its root, visiting a
//! node before its children and children in ascending creation time. The
//! first node that is not `complete` is the resume point. Its unit is looked
//! up by name, the context is reset in place and the unit runs again with
//! the original input. New children attach under the same context; sibling
//! subtrees that already completed are left alone.
//!
//! A resume point re-executes as a whole. If it fanned out and some of its
//! children had finished, those children are discarded with the rest.
//!
//! ```rust,ignore
//! let ctx = Context::load("runs/3f1c....json")?;
//! let mut registry = ToolRegistry::new();
//! registry.register(Arc::new(pipeline));
//! let value = retry(&ctx, &registry)?;
//! ```

use crate::context::Context;
use crate::error::{AgentError, Result};
use crate::tool::{execute, ToolRegistry};
use serde_json::Value;
use toolweave_checkpoint::Status;
use tracing::info;

/// First non-complete context in traversal order, starting at the root
pub fn find_resume_point(ctx: &Context) -> Option<Context> {
    let mut stack = vec![ctx.root()];
    while let Some(node) = stack.pop() {
        if node.status() != Status::Complete {
            return Some(node);
        }
        let mut children = node.children();
        children.sort_by_key(|c| c.created_at());
        stack.extend(children.into_iter().rev());
    }
    None
}

/// Resume the execution containing `ctx`
///
/// Returns the resume point's new outcome. Fails with
/// [`AgentError::Retry`] and changes nothing when every context is
/// already complete.
pub fn retry(ctx: &Context, registry: &ToolRegistry) -> Result<Value> {
    let point = find_resume_point(ctx).ok_or_else(|| {
        AgentError::Retry(format!("execution {} is already complete", ctx.root_id()))
    })?;

    let name = point.tool_name().ok_or_else(|| {
        AgentError::Retry(format!("context {} was never bound to a unit", point.id()))
    })?;
    let tool = registry
        .get(&name)
        .ok_or_else(|| AgentError::ToolNotFound(name.clone()))?;
    let args = tool.spec().validate(point.input().unwrap_or_default())?;

    info!(
        context = %point.id(),
        tool = %name,
        previous = %point.status(),
        "resuming execution"
    );
    point.reset_for_retry()?;
    execute(tool.as_ref(), &point, args)
}

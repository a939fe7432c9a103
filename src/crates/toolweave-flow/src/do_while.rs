//! Repeat a unit while its output satisfies a condition

use crate::sequence::next_args;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use toolweave_core::{AgentError, Args, Context, Result, Tool, ToolSpec};

type Condition = dyn Fn(&Context, &Value) -> Result<bool> + Send + Sync;
type PrepareArgs = dyn Fn(&Context, &Args, &Value) -> Result<Args> + Send + Sync;

/// Invokes a unit at least once, then again for as long as the condition
/// holds on the latest output
///
/// Arguments for the next iteration come from the prepare function, which
/// sees the previous arguments and output. Without one, the output is fed
/// back the way a [`Sequence`](crate::Sequence) would. The iteration count
/// is kept in local state under `"iteration"`.
pub struct DoWhile {
    spec: ToolSpec,
    tool: Arc<dyn Tool>,
    condition: Box<Condition>,
    prepare: Option<Box<PrepareArgs>>,
    max_iterations: Option<usize>,
}

impl DoWhile {
    /// `<tool>::do_while` with the wrapped unit's arguments
    pub fn new<C>(tool: Arc<dyn Tool>, condition: C) -> Self
    where
        C: Fn(&Context, &Value) -> Result<bool> + Send + Sync + 'static,
    {
        let mut spec = tool.spec().clone();
        spec.name = format!("{}::do_while", tool.name());
        Self {
            spec,
            tool,
            condition: Box::new(condition),
            prepare: None,
            max_iterations: None,
        }
    }

    pub fn with_prepare_args<P>(mut self, prepare: P) -> Self
    where
        P: Fn(&Context, &Args, &Value) -> Result<Args> + Send + Sync + 'static,
    {
        self.prepare = Some(Box::new(prepare));
        self
    }

    /// Fail with kind `max_iterations` if the condition still holds after
    /// this many invocations
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations.max(1));
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.spec.name = name.into();
        self
    }
}

impl fmt::Debug for DoWhile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DoWhile")
            .field("name", &self.spec.name)
            .field("tool", &self.tool.name())
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}

impl Tool for DoWhile {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn run(&self, ctx: &Context, args: Args) -> Result<Value> {
        let mut args = args;
        let mut iteration = 0usize;
        loop {
            iteration += 1;
            ctx.local().set("iteration", iteration);
            let output = self.tool.invoke(ctx, args.clone())?;
            if !(self.condition)(ctx, &output)? {
                return Ok(output);
            }
            if self.max_iterations.is_some_and(|max| iteration >= max) {
                return Err(AgentError::execution(
                    "max_iterations",
                    format!("'{}' still looping after {} iterations", self.spec.name, iteration),
                ));
            }
            if ctx.is_cancelled() {
                return Err(AgentError::Cancelled(ctx.id()));
            }
            args = match &self.prepare {
                Some(prepare) => prepare(ctx, &args, &output)?,
                None => next_args(self.tool.spec(), output),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolweave_core::{args, ArgType, Argument, FnTool};

    fn counter() -> Arc<dyn Tool> {
        Arc::new(FnTool::new(
            ToolSpec::new("counter", "Adds step to the shared count")
                .argument(Argument::new("step", "amount", ArgType::Integer)),
            |ctx, args| {
                ctx.shared().increment("count", args["step"].as_i64().unwrap_or(0))?;
                ctx.shared().get("count")
            },
        ))
    }

    fn below(limit: i64) -> impl Fn(&Context, &Value) -> Result<bool> + Send + Sync {
        move |_, out| Ok(out.as_i64().unwrap_or(0) < limit)
    }

    #[test]
    fn test_loops_until_condition_fails() {
        let looped = DoWhile::new(counter(), below(5))
            .with_prepare_args(|_, prev, _| Ok(prev.clone()));
        let ctx = Context::new();
        let out = looped.invoke(&ctx, args(json!({"step": 1}))).unwrap();
        assert_eq!(out, json!(5));
        assert_eq!(ctx.local().get("iteration").unwrap(), json!(5));
        assert_eq!(ctx.children().len(), 5);
    }

    #[test]
    fn test_prepare_args_sees_iteration_state() {
        let looped = DoWhile::new(counter(), below(5)).with_prepare_args(|ctx, _, _| {
            let i = ctx.local().get("iteration")?.as_i64().unwrap_or(0);
            Ok(args(json!({ "step": i + 1 })))
        });
        let ctx = Context::new();
        // 1, then 1+2, then 3+3
        assert_eq!(looped.invoke(&ctx, args(json!({"step": 1}))).unwrap(), json!(6));
        let steps: Vec<Value> = ctx
            .children()
            .iter()
            .filter_map(|c| c.input().map(|i| i["step"].clone()))
            .collect();
        assert_eq!(steps, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_output_fed_back_without_prepare() {
        let halve: Arc<dyn Tool> = Arc::new(FnTool::new(
            ToolSpec::new("halve", "n / 2").argument(Argument::new("n", "number", ArgType::Integer)),
            |_, args| Ok(json!(args["n"].as_i64().unwrap_or(0) / 2)),
        ));
        let looped = DoWhile::new(halve, |_, out| Ok(out.as_i64().unwrap_or(0) > 1));
        assert_eq!(looped.call(args(json!({"n": 40}))).unwrap(), json!(1));
    }

    #[test]
    fn test_max_iterations_is_an_error() {
        let looped = DoWhile::new(counter(), below(100))
            .with_prepare_args(|_, prev, _| Ok(prev.clone()))
            .with_max_iterations(3);
        let ctx = Context::new();
        let err = looped.invoke(&ctx, args(json!({"step": 1}))).unwrap_err();
        assert_eq!(err.kind(), "max_iterations");
        assert_eq!(ctx.children().len(), 3);
        assert_eq!(ctx.shared().get("count").unwrap(), json!(3));
    }
}

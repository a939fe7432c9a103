//! Predicate-driven dispatch
//!
//! [`Conditional`] picks one of two units; [`MultiConditional`] walks an
//! ordered list of arms and runs the first whose predicate holds. Both pass
//! their own arguments through unchanged and record the decision in local
//! state.

use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use toolweave_core::{AgentError, Args, Context, EventKind, Result, Tool, ToolSpec};

type Predicate = dyn Fn(&Context, &Args) -> Result<bool> + Send + Sync;

/// If/else over two units
pub struct Conditional {
    spec: ToolSpec,
    condition: Box<Predicate>,
    then: Arc<dyn Tool>,
    otherwise: Option<Arc<dyn Tool>>,
}

impl Conditional {
    pub fn new<P>(spec: ToolSpec, condition: P, then: Arc<dyn Tool>) -> Self
    where
        P: Fn(&Context, &Args) -> Result<bool> + Send + Sync + 'static,
    {
        Self {
            spec,
            condition: Box::new(condition),
            then,
            otherwise: None,
        }
    }

    /// Unit run when the predicate is false. Without one the result is `null`.
    pub fn otherwise(mut self, tool: Arc<dyn Tool>) -> Self {
        self.otherwise = Some(tool);
        self
    }
}

impl fmt::Debug for Conditional {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conditional")
            .field("name", &self.spec.name)
            .field("then", &self.then.name())
            .field("otherwise", &self.otherwise.as_ref().map(|t| t.name().to_string()))
            .finish()
    }
}

impl Tool for Conditional {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn run(&self, ctx: &Context, args: Args) -> Result<Value> {
        let holds = (self.condition)(ctx, &args)?;
        ctx.local().set("condition", holds);
        match (holds, &self.otherwise) {
            (true, _) => self.then.invoke(ctx, args),
            (false, Some(otherwise)) => otherwise.invoke(ctx, args),
            (false, None) => Ok(Value::Null),
        }
    }
}

/// First-match dispatch over ordered arms
pub struct MultiConditional {
    spec: ToolSpec,
    arms: Vec<(Box<Predicate>, Arc<dyn Tool>)>,
    default: Option<Arc<dyn Tool>>,
}

impl MultiConditional {
    pub fn new(spec: ToolSpec) -> Self {
        Self {
            spec,
            arms: Vec::new(),
            default: None,
        }
    }

    pub fn when<P>(mut self, condition: P, tool: Arc<dyn Tool>) -> Self
    where
        P: Fn(&Context, &Args) -> Result<bool> + Send + Sync + 'static,
    {
        self.arms.push((Box::new(condition), tool));
        self
    }

    /// Unit run when no arm matches
    pub fn otherwise(mut self, tool: Arc<dyn Tool>) -> Self {
        self.default = Some(tool);
        self
    }
}

impl fmt::Debug for MultiConditional {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arms: Vec<&str> = self.arms.iter().map(|(_, t)| t.name()).collect();
        f.debug_struct("MultiConditional")
            .field("name", &self.spec.name)
            .field("arms", &arms)
            .field("default", &self.default.as_ref().map(|t| t.name().to_string()))
            .finish()
    }
}

impl Tool for MultiConditional {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn run(&self, ctx: &Context, args: Args) -> Result<Value> {
        for (index, (condition, tool)) in self.arms.iter().enumerate() {
            if condition(ctx, &args)? {
                ctx.local().set("matched", index);
                return tool.invoke(ctx, args);
            }
        }
        match &self.default {
            Some(tool) => {
                ctx.record(EventKind::custom("default_arm"), json!({ "tool": tool.name() }));
                tool.invoke(ctx, args)
            }
            None => Err(AgentError::execution(
                "no_match",
                format!("no arm of '{}' matched and there is no default", self.spec.name),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolweave_core::{args, ArgType, Argument, FnTool};

    fn constant(name: &str, value: Value) -> Arc<dyn Tool> {
        Arc::new(FnTool::new(
            ToolSpec::new(name, "Returns a constant").argument(Argument::new("n", "number", ArgType::Integer)),
            move |_, _| Ok(value.clone()),
        ))
    }

    fn spec() -> ToolSpec {
        ToolSpec::new("classify", "Sign of n").argument(Argument::new("n", "number", ArgType::Integer))
    }

    fn n(args: &Args) -> i64 {
        args["n"].as_i64().unwrap_or(0)
    }

    #[test]
    fn test_conditional_runs_exactly_one_branch() {
        let cond = Conditional::new(spec(), |_, a| Ok(n(a) >= 0), constant("pos", json!("pos")))
            .otherwise(constant("neg", json!("neg")));

        let ctx = Context::new();
        assert_eq!(cond.invoke(&ctx, args(json!({"n": -2}))).unwrap(), json!("neg"));
        assert_eq!(ctx.children().len(), 1);
        assert_eq!(ctx.children()[0].tool_name().as_deref(), Some("neg"));
        assert_eq!(ctx.local().get("condition").unwrap(), json!(false));
    }

    #[test]
    fn test_conditional_without_otherwise_returns_null() {
        let cond = Conditional::new(spec(), |_, a| Ok(n(a) > 100), constant("big", json!("big")));
        let ctx = Context::new();
        assert_eq!(cond.invoke(&ctx, args(json!({"n": 1}))).unwrap(), Value::Null);
        assert!(ctx.children().is_empty());
    }

    #[test]
    fn test_predicate_errors_fail_the_conditional() {
        let cond = Conditional::new(
            spec(),
            |_, _| Err(AgentError::execution("type", "cannot decide")),
            constant("never", json!(0)),
        );
        let err = cond.call(args(json!({"n": 1}))).unwrap_err();
        assert_eq!(err.kind(), "type");
    }

    #[test]
    fn test_multi_conditional_first_match_wins() {
        let multi = MultiConditional::new(spec())
            .when(|_, a| Ok(n(a) < 0), constant("neg", json!("neg")))
            .when(|_, a| Ok(n(a) < 10), constant("small", json!("small")))
            .when(|_, a| Ok(n(a) < 5), constant("tiny", json!("tiny")))
            .otherwise(constant("large", json!("large")));

        let ctx = Context::new();
        assert_eq!(multi.invoke(&ctx, args(json!({"n": 3}))).unwrap(), json!("small"));
        assert_eq!(ctx.local().get("matched").unwrap(), json!(1));
        assert_eq!(multi.call(args(json!({"n": 50}))).unwrap(), json!("large"));
    }

    #[test]
    fn test_multi_conditional_without_match_or_default_fails() {
        let multi = MultiConditional::new(spec()).when(|_, a| Ok(n(a) < 0), constant("neg", json!(0)));
        let err = multi.call(args(json!({"n": 1}))).unwrap_err();
        assert_eq!(err.kind(), "no_match");
    }
}

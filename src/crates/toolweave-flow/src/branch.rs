//! Fan-out of one input to several units
//!
//! Every arm receives the branch's arguments (optionally reshaped by the
//! arm's input formatter) and runs concurrently on its own child context.
//! Outputs pass through the arm's output formatter and are aggregated by
//! position.
//!
//! | Completion | Returns                                        |
//! |------------|------------------------------------------------|
//! | `All`      | array of every arm's output                    |
//! | `Any`      | the first successful arm's output              |
//! | `N(k)`     | array, `null` for arms that did not succeed    |
//! | `Majority` | array, `null` for arms that did not succeed    |
//!
//! A result formatter, when set, replaces the default aggregate and sees
//! the positional outputs together with the recorded failures.

use crate::dispatch::{fan_out, CompletionStrategy, ErrorStrategy, Task};
use crate::error::FlowError;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use toolweave_core::{Args, Context, Failure, Result, Tool, ToolSpec};

type InputFormatter = dyn Fn(&Context, &Args) -> Result<Args> + Send + Sync;
type OutputFormatter = dyn Fn(&Context, Value) -> Result<Value> + Send + Sync;
pub(crate) type ResultFormatter =
    dyn Fn(&Context, Vec<Value>, Vec<Option<Failure>>) -> Result<Value> + Send + Sync;

/// One unit of a [`Branch`] and its formatters
pub struct BranchArm {
    tool: Arc<dyn Tool>,
    input: Option<Box<InputFormatter>>,
    output: Option<Box<OutputFormatter>>,
}

impl BranchArm {
    pub fn new(tool: Arc<dyn Tool>) -> Self {
        Self {
            tool,
            input: None,
            output: None,
        }
    }

    /// Reshape the branch arguments before this arm runs
    pub fn with_input<F>(mut self, formatter: F) -> Self
    where
        F: Fn(&Context, &Args) -> Result<Args> + Send + Sync + 'static,
    {
        self.input = Some(Box::new(formatter));
        self
    }

    /// Transform this arm's output before aggregation
    pub fn with_output<F>(mut self, formatter: F) -> Self
    where
        F: Fn(&Context, Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.output = Some(Box::new(formatter));
        self
    }
}

impl From<Arc<dyn Tool>> for BranchArm {
    fn from(tool: Arc<dyn Tool>) -> Self {
        BranchArm::new(tool)
    }
}

/// Concurrent fan-out of the same input
pub struct Branch {
    spec: ToolSpec,
    arms: Vec<BranchArm>,
    completion: CompletionStrategy,
    errors: ErrorStrategy,
    max_workers: Option<usize>,
    result_formatter: Option<Box<ResultFormatter>>,
}

impl Branch {
    /// Branch waiting for every arm and tolerating failed ones
    pub fn new(spec: ToolSpec, arms: Vec<BranchArm>) -> std::result::Result<Self, FlowError> {
        if arms.is_empty() {
            return Err(FlowError::Empty(spec.name));
        }
        Ok(Self {
            spec,
            arms,
            completion: CompletionStrategy::All,
            errors: ErrorStrategy::Ignore,
            max_workers: None,
            result_formatter: None,
        })
    }

    pub fn with_completion(
        mut self,
        completion: CompletionStrategy,
    ) -> std::result::Result<Self, FlowError> {
        if let CompletionStrategy::N(k) = completion {
            if k == 0 {
                return Err(FlowError::ZeroCompletions(self.spec.name));
            }
            if k > self.arms.len() {
                return Err(FlowError::Unsatisfiable {
                    name: self.spec.name,
                    required: k,
                    available: self.arms.len(),
                });
            }
        }
        self.completion = completion;
        Ok(self)
    }

    pub fn with_error_strategy(mut self, errors: ErrorStrategy) -> Self {
        self.errors = errors;
        self
    }

    /// Cap on concurrently running arms. Defaults to all of them.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers.max(1));
        self
    }

    pub fn with_result_formatter<F>(mut self, formatter: F) -> Self
    where
        F: Fn(&Context, Vec<Value>, Vec<Option<Failure>>) -> Result<Value> + Send + Sync + 'static,
    {
        self.result_formatter = Some(Box::new(formatter));
        self
    }

    pub fn completion(&self) -> CompletionStrategy {
        self.completion
    }

    pub fn error_strategy(&self) -> ErrorStrategy {
        self.errors
    }
}

impl fmt::Debug for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arms: Vec<&str> = self.arms.iter().map(|a| a.tool.name()).collect();
        f.debug_struct("Branch")
            .field("name", &self.spec.name)
            .field("arms", &arms)
            .field("completion", &self.completion)
            .field("errors", &self.errors)
            .finish()
    }
}

impl Tool for Branch {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn run(&self, ctx: &Context, args: Args) -> Result<Value> {
        let tasks = self
            .arms
            .iter()
            .map(|arm| {
                let args = match &arm.input {
                    Some(format) => format(ctx, &args)?,
                    None => args.clone(),
                };
                Ok(Task {
                    tool: Arc::clone(&arm.tool),
                    args,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let workers = self.max_workers.unwrap_or(self.arms.len());
        let mut settled = fan_out(ctx, tasks, workers, self.completion, self.errors)?;

        for (arm, slot) in self.arms.iter().zip(settled.outputs.iter_mut()) {
            let Some(format) = &arm.output else { continue };
            if let Some(value) = slot.take() {
                *slot = Some(format(ctx, value)?);
            }
        }

        if let Some(format) = &self.result_formatter {
            return format(ctx, settled.positional(), settled.failures);
        }
        if self.completion == CompletionStrategy::Any {
            return Ok(settled.outputs.into_iter().flatten().next().unwrap_or(Value::Null));
        }
        Ok(Value::Array(settled.positional()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolweave_core::{args, AgentError, ArgType, Argument, FnTool};

    fn spec() -> ToolSpec {
        ToolSpec::new("fan", "Fan-out").argument(Argument::new("x", "number", ArgType::Integer))
    }

    fn times(k: i64) -> BranchArm {
        BranchArm::new(Arc::new(FnTool::new(
            ToolSpec::new(format!("times_{}", k), "Multiply").argument(Argument::new(
                "x",
                "number",
                ArgType::Integer,
            )),
            move |_, args| Ok(json!(args["x"].as_i64().unwrap_or(0) * k)),
        )))
    }

    fn failing() -> BranchArm {
        BranchArm::new(Arc::new(FnTool::new(
            ToolSpec::new("failing", "Fails").argument(Argument::new("x", "number", ArgType::Integer)),
            |_, _| Err(AgentError::execution("value", "nope")),
        )))
    }

    #[test]
    fn test_all_returns_positional_outputs() {
        let branch = Branch::new(spec(), vec![times(1), times(2), times(3)]).unwrap();
        let ctx = Context::new();
        let out = branch.invoke(&ctx, args(json!({"x": 5}))).unwrap();
        assert_eq!(out, json!([5, 10, 15]));
        assert_eq!(ctx.children().len(), 3);
    }

    #[test]
    fn test_formatters_apply_per_arm() {
        let arms = vec![
            times(2).with_input(|_, a| {
                let mut a = a.clone();
                a.insert("x".to_string(), json!(100));
                Ok(a)
            }),
            times(2).with_output(|_, v| Ok(json!(format!("={}", v)))),
        ];
        let branch = Branch::new(spec(), arms).unwrap();
        assert_eq!(branch.call(args(json!({"x": 1}))).unwrap(), json!([200, "=2"]));
    }

    #[test]
    fn test_ignored_failures_become_null_and_reach_result_formatter() {
        let branch = Branch::new(spec(), vec![times(1), failing()])
            .unwrap()
            .with_result_formatter(|_, outputs, failures| {
                Ok(json!({
                    "outputs": outputs,
                    "failed": failures.iter().filter(|f| f.is_some()).count(),
                }))
            });
        let out = branch.call(args(json!({"x": 4}))).unwrap();
        assert_eq!(out, json!({"outputs": [4, null], "failed": 1}));
    }

    #[test]
    fn test_fail_strategy_propagates_arm_failure() {
        let branch = Branch::new(spec(), vec![times(1), failing()])
            .unwrap()
            .with_error_strategy(ErrorStrategy::Fail);
        let ctx = Context::new();
        let err = branch.invoke(&ctx, args(json!({"x": 4}))).unwrap_err();
        assert_eq!(err.kind(), "value");
        assert_eq!(ctx.error().unwrap().trace, vec!["failing", "fan"]);
    }

    #[test]
    fn test_completion_validation() {
        let too_many = Branch::new(spec(), vec![times(1)])
            .unwrap()
            .with_completion(CompletionStrategy::N(2));
        assert!(matches!(too_many, Err(FlowError::Unsatisfiable { required: 2, .. })));

        let zero = Branch::new(spec(), vec![times(1)])
            .unwrap()
            .with_completion(CompletionStrategy::N(0));
        assert!(matches!(zero, Err(FlowError::ZeroCompletions(_))));

        assert!(Branch::new(spec(), Vec::new()).is_err());
    }
}

//! Parallel map of one unit over a list

use crate::branch::ResultFormatter;
use crate::dispatch::{fan_out, CompletionStrategy, ErrorStrategy, Task};
use crate::error::FlowError;
use crate::sequence::next_args;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use toolweave_core::{AgentError, ArgType, Args, Argument, Context, Failure, Result, Tool, ToolSpec};

type ItemFormatter = dyn Fn(&Context, Value) -> Result<Value> + Send + Sync;

/// Runs a unit once per element of a list argument
///
/// Each element, after the optional item formatter, is turned into the
/// unit's arguments the same way a [`Sequence`](crate::Sequence) hands
/// outputs on. The result is an array in input order with `null` for
/// elements that did not succeed. Concurrency is bounded by
/// `max_workers`, falling back to the execution's
/// [`Options::max_workers`](toolweave_core::Options).
///
/// ```rust,ignore
/// let squares = ParallelList::new(square)
///     .with_item_formatter(|_, item| parse_int(item));
/// assert_eq!(squares.call(args(json!({"input": ["1", "2", "3"]})))?, json!([1, 4, 9]));
/// ```
pub struct ParallelList {
    spec: ToolSpec,
    tool: Arc<dyn Tool>,
    list_argument: String,
    item_formatter: Option<Box<ItemFormatter>>,
    result_formatter: Option<Box<ResultFormatter>>,
    completion: CompletionStrategy,
    errors: ErrorStrategy,
    max_workers: Option<usize>,
}

fn list_spec(name: String, description: String, list_argument: &str) -> ToolSpec {
    ToolSpec::new(name, description).argument(Argument::new(
        list_argument,
        "items to process, one invocation each",
        ArgType::List,
    ))
}

impl ParallelList {
    /// `<tool>::parallel_list`, reading its items from `input`
    pub fn new(tool: Arc<dyn Tool>) -> Self {
        let spec = list_spec(
            format!("{}::parallel_list", tool.name()),
            format!("Runs {} once per item: {}", tool.name(), tool.spec().description),
            "input",
        );
        Self {
            spec,
            tool,
            list_argument: "input".to_string(),
            item_formatter: None,
            result_formatter: None,
            completion: CompletionStrategy::All,
            errors: ErrorStrategy::Fail,
            max_workers: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.spec = list_spec(name.into(), description.into(), &self.list_argument);
        self
    }

    /// Read the items from `name` instead of `input`
    pub fn with_list_argument(mut self, name: impl Into<String>) -> Self {
        self.list_argument = name.into();
        self.spec = list_spec(
            std::mem::take(&mut self.spec.name),
            std::mem::take(&mut self.spec.description),
            &self.list_argument,
        );
        self
    }

    pub fn with_item_formatter<F>(mut self, formatter: F) -> Self
    where
        F: Fn(&Context, Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.item_formatter = Some(Box::new(formatter));
        self
    }

    pub fn with_result_formatter<F>(mut self, formatter: F) -> Self
    where
        F: Fn(&Context, Vec<Value>, Vec<Option<Failure>>) -> Result<Value> + Send + Sync + 'static,
    {
        self.result_formatter = Some(Box::new(formatter));
        self
    }

    /// `N(k)` larger than the list waits for every item
    pub fn with_completion(
        mut self,
        completion: CompletionStrategy,
    ) -> std::result::Result<Self, FlowError> {
        if completion == CompletionStrategy::N(0) {
            return Err(FlowError::ZeroCompletions(self.spec.name));
        }
        self.completion = completion;
        Ok(self)
    }

    pub fn with_error_strategy(mut self, errors: ErrorStrategy) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers.max(1));
        self
    }

    pub fn list_argument(&self) -> &str {
        &self.list_argument
    }
}

impl fmt::Debug for ParallelList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelList")
            .field("name", &self.spec.name)
            .field("tool", &self.tool.name())
            .field("list_argument", &self.list_argument)
            .field("completion", &self.completion)
            .field("errors", &self.errors)
            .field("max_workers", &self.max_workers)
            .finish()
    }
}

impl Tool for ParallelList {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn run(&self, ctx: &Context, mut args: Args) -> Result<Value> {
        let items = match args.remove(&self.list_argument) {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(AgentError::execution(
                    "type",
                    format!("'{}' must be a list", self.list_argument),
                ))
            }
        };

        let tasks = items
            .into_iter()
            .map(|item| {
                let item = match &self.item_formatter {
                    Some(format) => format(ctx, item)?,
                    None => item,
                };
                Ok(Task {
                    tool: Arc::clone(&self.tool),
                    args: next_args(self.tool.spec(), item),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let workers = self.max_workers.unwrap_or(ctx.options().max_workers);
        let settled = fan_out(ctx, tasks, workers, self.completion, self.errors)?;

        match &self.result_formatter {
            Some(format) => format(ctx, settled.positional(), settled.failures),
            None => Ok(Value::Array(settled.positional())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolweave_core::{args, FnTool};

    fn double() -> Arc<dyn Tool> {
        Arc::new(FnTool::new(
            ToolSpec::new("double", "2x").argument(Argument::new("n", "number", ArgType::Integer)),
            |_, args| Ok(json!(args["n"].as_i64().unwrap_or(0) * 2)),
        ))
    }

    #[test]
    fn test_default_spec_and_naming() {
        let list = ParallelList::new(double());
        assert_eq!(list.spec().name, "double::parallel_list");
        assert_eq!(list.spec().arguments[0].name, "input");

        let renamed = ParallelList::new(double())
            .named("doubler", "Doubles numbers")
            .with_list_argument("numbers");
        assert_eq!(renamed.spec().name, "doubler");
        assert_eq!(renamed.spec().arguments.len(), 1);
        assert_eq!(renamed.spec().arguments[0].name, "numbers");
        assert_eq!(renamed.list_argument(), "numbers");
    }

    #[test]
    fn test_maps_in_order() {
        let list = ParallelList::new(double()).with_max_workers(2);
        let ctx = Context::new();
        let out = list.invoke(&ctx, args(json!({"input": [1, 2, 3, 4, 5]}))).unwrap();
        assert_eq!(out, json!([2, 4, 6, 8, 10]));
        assert_eq!(ctx.children().len(), 5);
    }

    #[test]
    fn test_empty_list_returns_empty_array() {
        let out = ParallelList::new(double()).call(args(json!({"input": []}))).unwrap();
        assert_eq!(out, json!([]));
    }

    #[test]
    fn test_non_list_input_is_an_argument_error() {
        let err = ParallelList::new(double()).call(args(json!({"input": 3}))).unwrap_err();
        assert_eq!(err.kind(), "argument");
    }

    #[test]
    fn test_item_failure_fails_the_list_by_default() {
        let list = ParallelList::new(double());
        let err = list.call(args(json!({"input": [1, "two", 3]}))).unwrap_err();
        assert_eq!(err.kind(), "argument");
    }

    #[test]
    fn test_result_formatter_sees_failures() {
        let list = ParallelList::new(double())
            .with_error_strategy(ErrorStrategy::Ignore)
            .with_result_formatter(|_, outputs, failures| {
                let sum: i64 = outputs.iter().filter_map(Value::as_i64).sum();
                Ok(json!({ "sum": sum, "failed": failures.iter().flatten().count() }))
            });
        let out = list.call(args(json!({"input": [1, "two", 3]}))).unwrap();
        assert_eq!(out, json!({"sum": 8, "failed": 1}));
    }
}

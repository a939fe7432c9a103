//! Invokable units and their calling convention
//!
//! Everything that can be run against a [`Context`] implements [`Tool`]:
//! plain functions wrapped in [`FnTool`], LLM-backed [`Agent`]s and the
//! orchestration combinators alike. The runtime does not distinguish them.
//!
//! # Calling Convention
//!
//! ```text
//! invoke(ctx, args)
//!   1. validate args against the ToolSpec, fill defaults   (ArgumentError, no side effects)
//!   2. bind: ctx if it is still `created`, else ctx.child_context()
//!   3. begin: status=running, input=args, `started` event
//!   4. run(bound, args)  (panics are caught)
//!   5a. Ok  -> output, status=complete, `tool_return`
//!   5b. Err -> failure, status=error,   `tool_exception`
//! ```
//!
//! Blocking calls ([`Tool::invoke`], [`Tool::call`]) return the error to
//! the caller after bookkeeping. Non-blocking calls ([`spawn`]) return the
//! bound context immediately; the outcome is retrieved with
//! [`Context::wait`] or [`Context::future`].
//!
//! Nested calls pass the running context explicitly. Calling
//! `other.invoke(ctx, ..)` from inside `run` automatically creates a child
//! of `ctx`, so parent/child linkage follows the call site.
//!
//! [`Agent`]: crate::llm::Agent

use crate::context::{Args, Context};
use crate::error::{AgentError, Result};
use crate::logging::format_duration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use toolweave_checkpoint::Failure;
use tracing::{debug, warn};

/// Semantic type tag of an argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    String,
    Integer,
    Number,
    Boolean,
    List,
    Object,
    Any,
}

impl ArgType {
    /// Whether `value` is acceptable for this type
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ArgType::String => value.is_string(),
            ArgType::Integer => value.is_i64() || value.is_u64(),
            ArgType::Number => value.is_number(),
            ArgType::Boolean => value.is_boolean(),
            ArgType::List => value.is_array(),
            ArgType::Object => value.is_object(),
            ArgType::Any => true,
        }
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArgType::String => "string",
            ArgType::Integer => "integer",
            ArgType::Number => "number",
            ArgType::Boolean => "boolean",
            ArgType::List => "list",
            ArgType::Object => "object",
            ArgType::Any => "any",
        };
        f.write_str(name)
    }
}

/// Declared argument of a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    pub description: String,
    pub arg_type: ArgType,
    pub required: bool,
    pub default: Option<Value>,
}

impl Argument {
    /// Required argument
    pub fn new(name: impl Into<String>, description: impl Into<String>, arg_type: ArgType) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            arg_type,
            required: true,
            default: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Optional argument filled with `default` when omitted
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.required = false;
        self.default = Some(default.into());
        self
    }
}

/// Name, description and argument list of a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub arguments: Vec<Argument>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            arguments: Vec::new(),
        }
    }

    pub fn argument(mut self, argument: Argument) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn get_argument(&self, name: &str) -> Option<&Argument> {
        self.arguments.iter().find(|a| a.name == name)
    }

    /// Check `args` and fill in defaults
    ///
    /// Reports every missing, unexpected and mistyped argument at once.
    /// `null` is accepted for optional arguments.
    pub fn validate(&self, mut args: Args) -> Result<Args> {
        let mut missing = Vec::new();
        let mut invalid = Vec::new();

        for argument in &self.arguments {
            match args.get(&argument.name) {
                None => {
                    if let Some(default) = &argument.default {
                        args.insert(argument.name.clone(), default.clone());
                    } else if argument.required {
                        missing.push(argument.name.clone());
                    }
                }
                Some(Value::Null) if !argument.required => {}
                Some(value) if !argument.arg_type.accepts(value) => {
                    invalid.push(format!("{} (expected {})", argument.name, argument.arg_type));
                }
                Some(_) => {}
            }
        }

        let mut extraneous: Vec<String> = args
            .keys()
            .filter(|k| self.get_argument(k).is_none())
            .cloned()
            .collect();
        extraneous.sort();

        if missing.is_empty() && extraneous.is_empty() && invalid.is_empty() {
            Ok(args)
        } else {
            Err(AgentError::Argument {
                tool: self.name.clone(),
                missing,
                extraneous,
                invalid,
            })
        }
    }
}

/// An invokable unit of work
///
/// Implementors provide [`spec`](Tool::spec) and [`run`](Tool::run); the
/// provided methods implement the calling convention around `run`.
pub trait Tool: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    /// The unit's work. `ctx` is already bound and running.
    fn run(&self, ctx: &Context, args: Args) -> Result<Value>;

    fn name(&self) -> &str {
        &self.spec().name
    }

    /// Blocking invocation against `ctx` (or a child of it)
    fn invoke(&self, ctx: &Context, args: Args) -> Result<Value> {
        let bound = bind(self, ctx, args.clone())?;
        let args = bound.input().unwrap_or(args);
        execute(self, &bound, args)
    }

    /// Blocking invocation in a fresh execution
    fn call(&self, args: Args) -> Result<Value> {
        self.invoke(&Context::new(), args)
    }
}

/// Validate `args` and bind a context for `tool`
///
/// Returns the bound, running context: `ctx` itself when it has not been
/// used yet, otherwise a new child of `ctx`. The validated arguments are
/// stored as the bound context's input. A cancelled `ctx` is refused with
/// [`AgentError::Cancelled`] before any child is created.
pub fn bind<T: Tool + ?Sized>(tool: &T, ctx: &Context, args: Args) -> Result<Context> {
    let args = tool.spec().validate(args)?;
    ctx.claim_or_child(tool.name(), args)
}

/// Run `tool` on an already bound, running context and record the outcome
pub(crate) fn execute<T: Tool + ?Sized>(tool: &T, ctx: &Context, args: Args) -> Result<Value> {
    let span = tracing::info_span!("tool", name = %tool.name(), id = %ctx.id());
    let _enter = span.enter();
    let started = Instant::now();
    debug!("started");

    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| tool.run(ctx, args))) {
        Ok(outcome) => outcome,
        Err(payload) => Err(AgentError::execution("panic", panic_message(payload.as_ref()))),
    };

    match outcome {
        Ok(value) => {
            if ctx.complete(value.clone()) {
                debug!(elapsed = %format_duration(started.elapsed()), "complete");
                Ok(value)
            } else {
                debug!("finished after cancellation, output discarded");
                Err(AgentError::Cancelled(ctx.id()))
            }
        }
        Err(AgentError::Execution(failure)) => {
            let failure = failure.with_frame(tool.name());
            warn!(error = %failure, "failed");
            ctx.fail(failure.clone());
            Err(AgentError::Execution(failure))
        }
        Err(err) => {
            warn!(error = %err, "failed");
            ctx.fail(err.to_failure().with_frame(tool.name()));
            Err(err)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unit panicked".to_string()
    }
}

/// Non-blocking invocation
///
/// Validates and binds synchronously, so argument errors are returned
/// right away, then runs the unit on its own thread. The returned context
/// is the bound one; its outcome never reaches the caller as an error.
pub fn spawn<T>(tool: Arc<T>, ctx: &Context, args: Args) -> Result<Context>
where
    T: Tool + ?Sized + 'static,
{
    let bound = bind(tool.as_ref(), ctx, args.clone())?;
    let worker = bound.clone();
    let args = bound.input().unwrap_or(args);
    let spawned = thread::Builder::new()
        .name(format!("toolweave-{}", tool.name()))
        .spawn(move || {
            // The outcome is recorded on `worker`.
            let _ = execute(tool.as_ref(), &worker, args);
        });
    if let Err(e) = spawned {
        bound.fail(Failure::new("io", format!("failed to spawn worker thread: {}", e)));
        return Err(AgentError::Io(e));
    }
    Ok(bound)
}

/// Convert a JSON value into invocation arguments
///
/// Objects become the argument map, `null` becomes no arguments and any
/// other value is passed as the single argument `input`.
pub fn args(value: Value) -> Args {
    match value {
        Value::Object(map) => map,
        Value::Null => Args::new(),
        other => {
            let mut map = Args::new();
            map.insert("input".to_string(), other);
            map
        }
    }
}

type ToolFn = dyn Fn(&Context, Args) -> Result<Value> + Send + Sync;

/// A unit built from a closure
///
/// ```rust,ignore
/// let square = FnTool::new(
///     ToolSpec::new("square", "Square a number")
///         .argument(Argument::new("x", "value to square", ArgType::Number)),
///     |_ctx, args| {
///         let x = args["x"].as_f64().unwrap_or(0.0);
///         Ok(json!(x * x))
///     },
/// );
/// ```
pub struct FnTool {
    spec: ToolSpec,
    func: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F>(spec: ToolSpec, func: F) -> Self
    where
        F: Fn(&Context, Args) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            spec,
            func: Box::new(func),
        }
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool").field("spec", &self.spec).finish()
    }
}

impl Tool for FnTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn run(&self, ctx: &Context, args: Args) -> Result<Value> {
        (self.func)(ctx, args)
    }
}

/// Registry of units by name
///
/// The retry engine resolves the unit bound to a context through a
/// registry, so every unit that may need resuming must be registered.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit, returning the one it replaced
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        self.tools.insert(tool.name().to_string(), tool)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered names, sorted
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke a registered unit by name
    pub fn invoke(&self, name: &str, ctx: &Context, args: Args) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;
        tool.invoke(ctx, args)
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec() -> ToolSpec {
        ToolSpec::new("greet", "Greets someone")
            .argument(Argument::new("name", "who to greet", ArgType::String))
            .argument(Argument::new("times", "repetitions", ArgType::Integer).with_default(1))
            .argument(Argument::new("tag", "optional tag", ArgType::String).optional())
    }

    #[test]
    fn test_validate_fills_defaults() {
        let validated = spec().validate(args(json!({"name": "ada"}))).unwrap();
        assert_eq!(validated["times"], json!(1));
        assert!(!validated.contains_key("tag"));
    }

    #[test]
    fn test_validate_reports_all_problems() {
        let err = spec()
            .validate(args(json!({"times": "two", "extra": 1, "zzz": 2})))
            .unwrap_err();
        match err {
            AgentError::Argument {
                tool,
                missing,
                extraneous,
                invalid,
            } => {
                assert_eq!(tool, "greet");
                assert_eq!(missing, vec!["name"]);
                assert_eq!(extraneous, vec!["extra", "zzz"]);
                assert_eq!(invalid.len(), 1);
                assert!(invalid[0].starts_with("times"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validate_accepts_null_for_optional() {
        assert!(spec().validate(args(json!({"name": "x", "tag": null}))).is_ok());
    }

    #[test]
    fn test_arg_type_accepts() {
        assert!(ArgType::Integer.accepts(&json!(3)));
        assert!(!ArgType::Integer.accepts(&json!(3.5)));
        assert!(ArgType::Number.accepts(&json!(3.5)));
        assert!(ArgType::List.accepts(&json!([])));
        assert!(ArgType::Any.accepts(&json!(null)));
    }

    #[test]
    fn test_args_helper() {
        assert!(args(Value::Null).is_empty());
        assert_eq!(args(json!(5))["input"], json!(5));
        assert_eq!(args(json!({"a": 1}))["a"], json!(1));
    }

    #[test]
    fn test_registry() {
        let mut registry = ToolRegistry::new();
        let tool: Arc<dyn Tool> = Arc::new(FnTool::new(spec(), |_, a| Ok(a["name"].clone())));
        assert!(registry.register(Arc::clone(&tool)).is_none());
        assert!(registry.register(tool).is_some());
        assert_eq!(registry.tool_names(), vec!["greet"]);

        let out = registry
            .invoke("greet", &Context::new(), args(json!({"name": "bo"})))
            .unwrap();
        assert_eq!(out, json!("bo"));
        assert!(matches!(
            registry.invoke("nope", &Context::new(), Args::new()),
            Err(AgentError::ToolNotFound(_))
        ));
    }
}

//! Linear pipelines

use crate::error::FlowError;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use toolweave_core::{args, Args, Context, Result, Tool, ToolSpec};
use tracing::debug;

/// Arguments for invoking a unit with `spec` on a previous unit's output
///
/// An object whose keys are all declared by `spec` is passed as the
/// argument map. Anything else goes to the unit's only argument when it
/// has exactly one, and to `input` otherwise.
pub fn next_args(spec: &ToolSpec, output: Value) -> Args {
    match output {
        Value::Object(map) if map.keys().all(|k| spec.get_argument(k).is_some()) => map,
        other => match spec.arguments.as_slice() {
            [only] => {
                let mut map = Args::new();
                map.insert(only.name.clone(), other);
                map
            }
            _ => args(other),
        },
    }
}

/// Runs units one after another, feeding each the previous output
///
/// The first step receives the sequence's own arguments. The first failure
/// stops the pipeline and becomes the sequence's failure. The index of the
/// running step is kept in local state under `"step"`.
pub struct Sequence {
    spec: ToolSpec,
    steps: Vec<Arc<dyn Tool>>,
}

impl Sequence {
    pub fn new(spec: ToolSpec, steps: Vec<Arc<dyn Tool>>) -> std::result::Result<Self, FlowError> {
        if steps.is_empty() {
            return Err(FlowError::Empty(spec.name));
        }
        Ok(Self { spec, steps })
    }

    pub fn steps(&self) -> &[Arc<dyn Tool>] {
        &self.steps
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps: Vec<&str> = self.steps.iter().map(|s| s.name()).collect();
        f.debug_struct("Sequence")
            .field("name", &self.spec.name)
            .field("steps", &steps)
            .finish()
    }
}

impl Tool for Sequence {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn run(&self, ctx: &Context, args: Args) -> Result<Value> {
        let mut input = args;
        let mut output = Value::Null;
        for (index, step) in self.steps.iter().enumerate() {
            ctx.local().set("step", index);
            debug!(step = index, tool = %step.name(), "sequence step");
            output = step.invoke(ctx, input)?;
            if let Some(next) = self.steps.get(index + 1) {
                input = next_args(next.spec(), output.clone());
            } else {
                input = Args::new();
            }
        }
        Ok(output)
    }
}

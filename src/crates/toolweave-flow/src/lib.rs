//! # toolweave-flow - Orchestration combinators
//!
//! Every combinator here is an ordinary [`Tool`](toolweave_core::Tool):
//! it binds a context, records its outcome and can itself be composed,
//! persisted and resumed like any other unit. Inner units run on child
//! contexts, so the execution tree mirrors the composition.
//!
//! | Combinator           | Runs                                                    |
//! |----------------------|---------------------------------------------------------|
//! | [`Sequence`]         | steps in order, each fed the previous output            |
//! | [`Conditional`]      | one of two units, chosen by a predicate                 |
//! | [`MultiConditional`] | the first arm whose predicate holds                     |
//! | [`Branch`]           | several units concurrently on the same input            |
//! | [`ParallelList`]     | one unit concurrently over every item of a list         |
//! | [`Retry`]            | one unit again after allow-listed failures              |
//! | [`OnError`]          | a fallback unit when the wrapped one fails              |
//! | [`DoWhile`]          | one unit repeatedly while a condition holds             |
//!
//! Fan-out combinators share a bounded dispatcher with a
//! [`CompletionStrategy`] and an [`ErrorStrategy`]. Once the strategy is
//! satisfied (or has failed), siblings that are still running are
//! cancelled.
//!
//! ```rust,no_run
//! use serde_json::json;
//! use std::sync::Arc;
//! use toolweave_core::{args, ArgType, Argument, FnTool, Tool, ToolSpec};
//! use toolweave_flow::{ParallelList, Retry};
//!
//! let square: Arc<dyn Tool> = Arc::new(FnTool::new(
//!     ToolSpec::new("square", "n * n").argument(Argument::new("n", "number", ArgType::Integer)),
//!     |_, a| Ok(json!(a["n"].as_i64().unwrap_or(0).pow(2))),
//! ));
//! let squares = ParallelList::new(Arc::new(Retry::new(square, 3).retry_on(["value"])));
//! let out = squares.call(args(json!({"input": [1, 2, 3]}))).unwrap();
//! assert_eq!(out, json!([1, 4, 9]));
//! ```

pub mod branch;
pub mod conditional;
pub mod dispatch;
pub mod do_while;
pub mod error;
pub mod on_error;
pub mod parallel;
pub mod retry;
pub mod sequence;

pub use branch::{Branch, BranchArm};
pub use conditional::{Conditional, MultiConditional};
pub use dispatch::{CompletionStrategy, ErrorStrategy};
pub use do_while::DoWhile;
pub use error::FlowError;
pub use on_error::OnError;
pub use parallel::ParallelList;
pub use retry::{Retry, RetryPolicy};
pub use sequence::{next_args, Sequence};

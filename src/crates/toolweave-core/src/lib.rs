//! # toolweave-core - Execution tracking for composable agent tools
//!
//! **Thread-safe, hierarchical, event-sourced execution records** for units
//! of work ("tools") that call models and each other. Every invocation runs
//! against a [`Context`]: a node of an execution tree holding the unit's
//! input, output or failure, lifecycle status, history and scoped state.
//!
//! ## Core Concepts
//!
//! ### 1. Context and Execution
//!
//! A root [`Context`] starts an execution. Nested invocations run on child
//! contexts created with [`Context::child_context`], which share the
//! execution's arena, shared state and [`Options`]. See [`context`] for the
//! lifecycle and synchronization primitives (`wait`, `future`, `cancel`).
//!
//! ### 2. State Scopes
//!
//! | Scope  | Accessor             | Visible to                          |
//! |--------|----------------------|-------------------------------------|
//! | local  | [`Context::local`]   | that context only                   |
//! | shared | [`Context::shared`]  | every context of the execution      |
//! | debug  | [`Context::debug`]   | that context, while debug is on     |
//!
//! All scopes are backed by [`StateStore`], whose compound operations are
//! atomic per key.
//!
//! ### 3. Tools
//!
//! A [`Tool`] declares a [`ToolSpec`] and implements `run`. The provided
//! `invoke` validates arguments, binds a context, runs the unit and records
//! the outcome. [`spawn`] is the non-blocking variant.
//!
//! ### 4. Persistence and Retry
//!
//! [`persistence`] saves and loads whole trees. [`resume::retry`] finds the
//! first unfinished context of a (possibly reloaded) tree and re-runs its
//! unit in place.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde_json::json;
//! use toolweave_core::{args, ArgType, Argument, Context, FnTool, Status, Tool, ToolSpec};
//!
//! let add = FnTool::new(
//!     ToolSpec::new("add", "Add two integers")
//!         .argument(Argument::new("a", "left", ArgType::Integer))
//!         .argument(Argument::new("b", "right", ArgType::Integer)),
//!     |ctx, args| {
//!         ctx.shared().increment("additions", 1)?;
//!         Ok(json!(args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0)))
//!     },
//! );
//!
//! let ctx = Context::new();
//! let sum = add.invoke(&ctx, args(json!({"a": 2, "b": 3}))).unwrap();
//! assert_eq!(sum, json!(5));
//! assert_eq!(ctx.status(), Status::Complete);
//! ```
//!
//! ## See Also
//!
//! - `toolweave-checkpoint` - record types and snapshot stores
//! - `toolweave-flow` - sequence, branch, parallel and retry combinators

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod llm;
pub mod logging;
pub mod persistence;
pub mod resume;
pub mod state;
pub mod tool;

pub use config::{ConfigBuilder, Options};
pub use context::{Args, Context, ContextFuture, ExecutionEvent, Scope, StateHandle};
pub use error::{AgentError, Result};
pub use events::EventLog;
pub use llm::{Agent, Llm, Message, Prompt, Role};
pub use resume::{find_resume_point, retry};
pub use state::{DebugFlag, StateStore};
pub use tool::{args, bind, spawn, ArgType, Argument, FnTool, Tool, ToolRegistry, ToolSpec};
pub use toolweave_checkpoint::{ContextId, Event, EventKind, Failure, Status};

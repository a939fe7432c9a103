//! Bounded fan-out shared by [`Branch`](crate::Branch) and
//! [`ParallelList`](crate::ParallelList)
//!
//! Each task runs on a child of the combinator's context through
//! [`toolweave_core::spawn`]. At most `max_workers` tasks are in flight;
//! a new one starts whenever one settles. Completion is reported back
//! through [`Context::on_end`] into a queue the dispatching thread drains.
//!
//! ```text
//! launch min(workers, n) ──► on_end pushes index ──► settle ──► launch next
//!                                                      │
//!                     strategy satisfied / failed ─────┴──► cancel the rest
//! ```
//!
//! Results are positional: slot `i` always belongs to task `i`, whatever
//! order the tasks finish in.

use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use toolweave_core::{spawn, AgentError, Args, Context, Failure, Result, Status, Tool};
use tracing::debug;

/// How often a waiting dispatcher re-checks its own cancellation
const CANCEL_POLL: Duration = Duration::from_millis(20);

/// When a fan-out counts as done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionStrategy {
    /// Every task has settled
    #[default]
    All,
    /// The first successful task
    Any,
    /// The first `k` successful tasks
    N(usize),
    /// More than half of the tasks succeeded
    Majority,
}

impl CompletionStrategy {
    /// Successful completions needed out of `total` tasks
    pub fn required(&self, total: usize) -> usize {
        match self {
            CompletionStrategy::All => total,
            CompletionStrategy::Any => total.min(1),
            CompletionStrategy::N(k) => (*k).min(total),
            CompletionStrategy::Majority => {
                if total == 0 {
                    0
                } else {
                    total / 2 + 1
                }
            }
        }
    }
}

/// What a failing task does to the fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorStrategy {
    /// The first failure aborts the fan-out and becomes its error
    #[default]
    Fail,
    /// Failures are recorded and left out of the aggregate
    Ignore,
}

pub(crate) struct Task {
    pub tool: Arc<dyn Tool>,
    pub args: Args,
}

/// Per-task outcome, indexed like the submitted tasks
#[derive(Debug, Default)]
pub(crate) struct Settled {
    pub outputs: Vec<Option<Value>>,
    pub failures: Vec<Option<Failure>>,
}

impl Settled {
    fn with_len(n: usize) -> Self {
        Self {
            outputs: vec![None; n],
            failures: vec![None; n],
        }
    }

    /// Outputs with `null` in every slot that did not succeed
    pub fn positional(&self) -> Vec<Value> {
        self.outputs
            .iter()
            .map(|o| o.clone().unwrap_or(Value::Null))
            .collect()
    }
}

#[derive(Default)]
struct Completions {
    queue: Mutex<VecDeque<usize>>,
    ready: Condvar,
}

impl Completions {
    fn push(&self, index: usize) {
        self.queue.lock().push_back(index);
        self.ready.notify_one();
    }

    /// Next settled index, or `None` once `ctx` is cancelled
    fn next(&self, ctx: &Context) -> Option<usize> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(index) = queue.pop_front() {
                return Some(index);
            }
            if ctx.is_cancelled() {
                return None;
            }
            self.ready.wait_for(&mut queue, CANCEL_POLL);
        }
    }
}

struct Dispatcher<'a> {
    ctx: &'a Context,
    done: Arc<Completions>,
    pending: std::iter::Enumerate<std::vec::IntoIter<Task>>,
    running: Vec<Option<Context>>,
    settled: Settled,
}

impl Dispatcher<'_> {
    fn launch_next(&mut self) {
        let Some((index, task)) = self.pending.next() else {
            return;
        };
        match spawn(task.tool, self.ctx, task.args) {
            Ok(child) => {
                let done = Arc::clone(&self.done);
                child.on_end(move |_| done.push(index));
                self.running[index] = Some(child);
            }
            Err(err) => {
                // Rejected before a child existed; settles straight away.
                self.settled.failures[index] = Some(err.to_failure());
                self.done.push(index);
            }
        }
    }

    /// Record the outcome of task `index`; true when it succeeded
    fn settle(&mut self, index: usize) -> bool {
        let Some(child) = &self.running[index] else {
            return false;
        };
        match child.status() {
            Status::Complete => {
                self.settled.outputs[index] = Some(child.output().unwrap_or(Value::Null));
                true
            }
            Status::Cancelled => {
                self.settled.failures[index] = Some(Failure::new(
                    "cancelled",
                    format!("context {} was cancelled", child.id()),
                ));
                false
            }
            _ => {
                self.settled.failures[index] = child.error();
                false
            }
        }
    }

    fn cancel_unfinished(&self) -> usize {
        self.running
            .iter()
            .flatten()
            .filter(|child| !child.is_terminal())
            .map(Context::cancel)
            .filter(|&cancelled| cancelled)
            .count()
    }
}

/// Run `tasks` as children of `ctx` until `completion` is met
///
/// With [`ErrorStrategy::Fail`] the first failure is returned as the
/// fan-out's error. With [`ErrorStrategy::Ignore`] failures only matter
/// when they make the strategy unreachable; `All` then settles for
/// whatever succeeded.
pub(crate) fn fan_out(
    ctx: &Context,
    tasks: Vec<Task>,
    max_workers: usize,
    completion: CompletionStrategy,
    errors: ErrorStrategy,
) -> Result<Settled> {
    let total = tasks.len();
    let required = completion.required(total);
    if total == 0 {
        return Ok(Settled::default());
    }
    let workers = max_workers.clamp(1, total);
    debug!(total, workers, required, ?completion, ?errors, "fan-out");

    let mut dispatcher = Dispatcher {
        ctx,
        done: Arc::new(Completions::default()),
        pending: tasks.into_iter().enumerate(),
        running: vec![None; total],
        settled: Settled::with_len(total),
    };
    for _ in 0..workers {
        dispatcher.launch_next();
    }

    // `All` under `Ignore` waits for everything and keeps what succeeded.
    let settle_for_partial = completion == CompletionStrategy::All && errors == ErrorStrategy::Ignore;
    let (mut finished, mut succeeded) = (0usize, 0usize);
    let outcome = loop {
        if ctx.is_cancelled() {
            break Err(AgentError::Cancelled(ctx.id()));
        }
        if succeeded >= required || (settle_for_partial && finished == total) {
            break Ok(());
        }
        if finished == total || (!settle_for_partial && succeeded + (total - finished) < required) {
            break Err(AgentError::execution(
                "incomplete",
                format!("{} of {} required invocations succeeded", succeeded, required),
            ));
        }

        let Some(index) = dispatcher.done.next(ctx) else {
            break Err(AgentError::Cancelled(ctx.id()));
        };
        finished += 1;
        if dispatcher.settle(index) {
            succeeded += 1;
        } else if errors == ErrorStrategy::Fail {
            if let Some(failure) = dispatcher.settled.failures[index].clone() {
                break Err(AgentError::Execution(failure));
            }
        }
        dispatcher.launch_next();
    };

    let cancelled = dispatcher.cancel_unfinished();
    debug!(finished, succeeded, cancelled, "fan-out settled");
    outcome.map(|()| dispatcher.settled)
}

//! Execution tracking contexts
//!
//! A [`Context`] is one node of an execution tree. It records which unit ran
//! against it, the arguments it received, its lifecycle [`Status`], its
//! output or captured [`Failure`], an append-only event history and three
//! state scopes. Every nested invocation gets its own child context, so a
//! finished tree is a complete, inspectable record of a run.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────── Execution (one per root) ───────────────┐
//! │ nodes: RwLock<HashMap<ContextId, Arc<ContextNode>>>   (the arena)       │
//! │ shared: StateStore                                    (shared scope)    │
//! │ options: Options                                      (debug flag, ...) │
//! │ events: broadcast::Sender<ExecutionEvent>             (event sink)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//!          ▲                                 ▲
//!          │ Arc                             │ Arc
//! ┌────────┴─────────┐  parent_id   ┌───────┴──────────┐
//! │ Context (root)   │◄─────────────│ Context (child)  │
//! │  node: Arc<Node> │  children    │  node: Arc<Node> │
//! └──────────────────┘─────────────►└──────────────────┘
//! ```
//!
//! Nodes refer to each other by [`ContextId`] only; the arena resolves ids
//! to nodes. A `Context` is a cheap handle (two `Arc`s) and can be cloned
//! freely across threads.
//!
//! # Lifecycle
//!
//! ```text
//! created ──► running ──┬──► complete   (output set)
//!                       ├──► error      (failure set)
//!                       └──► cancelled
//! ```
//!
//! Once terminal, a context never changes again; the retry engine's reset
//! is the only transition back to `running`. [`wait`](Context::wait),
//! [`wait_timeout`](Context::wait_timeout), [`future`](Context::future) and
//! [`on_end`](Context::on_end) all observe the same single terminal outcome.
//!
//! # Example
//!
//! ```rust,ignore
//! let ctx = Context::new();
//! let value = adder.invoke(&ctx, args(json!({"a": 1, "b": 2})))?;
//! assert_eq!(ctx.status(), Status::Complete);
//! assert_eq!(ctx.output(), Some(value));
//!
//! for event in ctx.history() {
//!     println!("{} {}", event.timestamp, event.kind);
//! }
//! ```

use crate::config::Options;
use crate::error::{AgentError, Result};
use crate::events::EventLog;
use crate::state::{DebugFlag, StateStore};
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex, RwLock};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll, Waker};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use toolweave_checkpoint::{ContextId, Event, EventKind, Failure, FileSnapshotStore, SnapshotStore, Status};
use tracing::{debug, info, warn};

/// Keyword arguments of an invocation
pub type Args = Map<String, Value>;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Notification published to [`Context::subscribe`] receivers
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    /// An event was appended to a context's history
    Recorded {
        context_id: ContextId,
        root_id: ContextId,
        event: Event,
    },
    /// A context changed status
    StatusChanged {
        context_id: ContextId,
        root_id: ContextId,
        from: Status,
        to: Status,
    },
}

impl ExecutionEvent {
    pub fn context_id(&self) -> ContextId {
        match self {
            ExecutionEvent::Recorded { context_id, .. }
            | ExecutionEvent::StatusChanged { context_id, .. } => *context_id,
        }
    }
}

/// Arena and shared resources of one execution tree
pub(crate) struct Execution {
    pub(crate) nodes: RwLock<HashMap<ContextId, Arc<ContextNode>>>,
    pub(crate) shared: StateStore,
    pub(crate) options: Options,
    events: broadcast::Sender<ExecutionEvent>,
}

impl Execution {
    pub(crate) fn new(options: Options) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            nodes: RwLock::new(HashMap::new()),
            shared: StateStore::new(),
            options,
            events,
        }
    }

    pub(crate) fn insert(&self, node: Arc<ContextNode>) {
        self.nodes.write().insert(node.id, node);
    }

    fn get(&self, id: &ContextId) -> Option<Arc<ContextNode>> {
        self.nodes.read().get(id).cloned()
    }

    fn remove_subtree(&self, id: ContextId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let removed = self.nodes.write().remove(&id);
            if let Some(node) = removed {
                pending.extend(node.lifecycle.lock().children.iter().copied());
            }
        }
    }

    fn publish(&self, event: ExecutionEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

type EndListener = Box<dyn FnOnce(&Context) + Send>;

/// Mutable part of a node, guarded by one lock
#[derive(Default)]
pub(crate) struct Lifecycle {
    pub(crate) tool: Option<String>,
    pub(crate) status: Status,
    pub(crate) input: Option<Args>,
    pub(crate) output: Option<Value>,
    pub(crate) error: Option<Failure>,
    pub(crate) ended_at: Option<DateTime<Utc>>,
    pub(crate) children: Vec<ContextId>,
    listeners: Vec<EndListener>,
    wakers: Vec<Waker>,
}

impl Lifecycle {
    pub(crate) fn restored(
        tool: Option<String>,
        status: Status,
        input: Option<Args>,
        output: Option<Value>,
        error: Option<Failure>,
        ended_at: Option<DateTime<Utc>>,
        children: Vec<ContextId>,
    ) -> Self {
        Self {
            tool,
            status,
            input,
            output,
            error,
            ended_at,
            children,
            listeners: Vec::new(),
            wakers: Vec::new(),
        }
    }

    fn claim(&mut self, tool: &str, input: &Args) {
        self.tool = Some(tool.to_string());
        self.input = Some(input.clone());
        self.status = Status::Running;
    }
}

pub(crate) struct ContextNode {
    pub(crate) id: ContextId,
    pub(crate) parent_id: Option<ContextId>,
    pub(crate) root_id: ContextId,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) lifecycle: Mutex<Lifecycle>,
    ended: Condvar,
    pub(crate) history: EventLog,
    pub(crate) local: StateStore,
    pub(crate) debug: StateStore,
}

impl ContextNode {
    pub(crate) fn new(
        id: ContextId,
        parent_id: Option<ContextId>,
        root_id: ContextId,
        created_at: DateTime<Utc>,
        flag: &DebugFlag,
    ) -> Self {
        Self::restored(
            id,
            parent_id,
            root_id,
            created_at,
            Lifecycle::default(),
            EventLog::new(),
            flag,
        )
    }

    pub(crate) fn restored(
        id: ContextId,
        parent_id: Option<ContextId>,
        root_id: ContextId,
        created_at: DateTime<Utc>,
        lifecycle: Lifecycle,
        history: EventLog,
        flag: &DebugFlag,
    ) -> Self {
        Self {
            id,
            parent_id,
            root_id,
            created_at,
            lifecycle: Mutex::new(lifecycle),
            ended: Condvar::new(),
            history,
            local: StateStore::new(),
            debug: StateStore::gated(flag.clone()),
        }
    }
}

/// Handle to one node of an execution tree
#[derive(Clone)]
pub struct Context {
    exec: Arc<Execution>,
    node: Arc<ContextNode>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lc = self.node.lifecycle.lock();
        f.debug_struct("Context")
            .field("id", &self.node.id)
            .field("parent_id", &self.node.parent_id)
            .field("tool", &lc.tool)
            .field("status", &lc.status)
            .finish()
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.node.id == other.node.id && Arc::ptr_eq(&self.exec, &other.exec)
    }
}

impl Context {
    /// Root of a new execution with default options
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    /// Root of a new execution
    pub fn with_options(options: Options) -> Self {
        let exec = Arc::new(Execution::new(options));
        let id = ContextId::new();
        let node = Arc::new(ContextNode::new(id, None, id, Utc::now(), &exec.options.debug));
        exec.insert(Arc::clone(&node));
        let ctx = Context { exec, node };
        ctx.record(EventKind::Created, Value::Null);
        ctx
    }

    pub(crate) fn from_parts(exec: Arc<Execution>, node: Arc<ContextNode>) -> Self {
        Self { exec, node }
    }

    pub(crate) fn execution(&self) -> &Arc<Execution> {
        &self.exec
    }

    pub(crate) fn node(&self) -> &Arc<ContextNode> {
        &self.node
    }

    /// Create a properly linked child of this context
    ///
    /// The child shares this execution's arena, shared state and options.
    pub fn child_context(&self) -> Context {
        let created_at = Utc::now().max(self.node.created_at);
        let node = Arc::new(ContextNode::new(
            ContextId::new(),
            Some(self.node.id),
            self.node.root_id,
            created_at,
            &self.exec.options.debug,
        ));
        self.exec.insert(Arc::clone(&node));
        self.node.lifecycle.lock().children.push(node.id);

        let child = Context {
            exec: Arc::clone(&self.exec),
            node,
        };
        child.record(EventKind::Created, json!({ "parent": self.node.id }));
        self.record(EventKind::ChildCreated, json!({ "child": child.id() }));
        child
    }

    pub fn id(&self) -> ContextId {
        self.node.id
    }

    pub fn parent_id(&self) -> Option<ContextId> {
        self.node.parent_id
    }

    pub fn root_id(&self) -> ContextId {
        self.node.root_id
    }

    pub fn is_root(&self) -> bool {
        self.node.parent_id.is_none()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.node.created_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.node.lifecycle.lock().ended_at
    }

    pub fn status(&self) -> Status {
        self.node.lifecycle.lock().status
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Cooperative cancellation check for long-running unit code
    pub fn is_cancelled(&self) -> bool {
        self.status() == Status::Cancelled
    }

    /// Name of the bound unit
    pub fn tool_name(&self) -> Option<String> {
        self.node.lifecycle.lock().tool.clone()
    }

    pub fn input(&self) -> Option<Args> {
        self.node.lifecycle.lock().input.clone()
    }

    pub fn output(&self) -> Option<Value> {
        self.node.lifecycle.lock().output.clone()
    }

    pub fn error(&self) -> Option<Failure> {
        self.node.lifecycle.lock().error.clone()
    }

    pub fn options(&self) -> &Options {
        &self.exec.options
    }

    /// Copy of this node's history (descendants not included)
    pub fn history(&self) -> Vec<Event> {
        self.node.history.all()
    }

    pub fn event_log(&self) -> &EventLog {
        &self.node.history
    }

    /// Append an application-defined event to this node's history
    pub fn record(&self, kind: EventKind, payload: Value) -> Event {
        let event = self.node.history.record(kind, payload);
        self.exec.publish(ExecutionEvent::Recorded {
            context_id: self.node.id,
            root_id: self.node.root_id,
            event: event.clone(),
        });
        event
    }

    /// Receive every event and status change of the whole execution
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.exec.events.subscribe()
    }

    pub fn child_ids(&self) -> Vec<ContextId> {
        self.node.lifecycle.lock().children.clone()
    }

    /// Children in creation order
    pub fn children(&self) -> Vec<Context> {
        self.child_ids()
            .iter()
            .filter_map(|id| self.find(id))
            .collect()
    }

    pub fn parent(&self) -> Option<Context> {
        self.node.parent_id.and_then(|id| self.find(&id))
    }

    pub fn root(&self) -> Context {
        self.find(&self.node.root_id).unwrap_or_else(|| self.clone())
    }

    /// Resolve any context of the same execution by id
    pub fn find(&self, id: &ContextId) -> Option<Context> {
        self.exec.get(id).map(|node| Context {
            exec: Arc::clone(&self.exec),
            node,
        })
    }

    /// State visible only to this context
    pub fn local(&self) -> StateHandle<'_> {
        StateHandle::new(self, Scope::Local)
    }

    /// State shared by every context of the execution
    pub fn shared(&self) -> StateHandle<'_> {
        StateHandle::new(self, Scope::Shared)
    }

    /// Local state that only exists while the debug flag is on
    pub fn debug(&self) -> StateHandle<'_> {
        StateHandle::new(self, Scope::Debug)
    }

    /// Block until the context reaches a terminal status
    pub fn wait(&self) -> Result<Value> {
        let mut lc = self.node.lifecycle.lock();
        while !lc.status.is_terminal() {
            self.node.ended.wait(&mut lc);
        }
        self.outcome(&lc)
    }

    /// Block for at most `timeout`
    ///
    /// Expiry returns [`AgentError::Timeout`] and leaves the context as it
    /// is; cancelling afterwards is up to the caller.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Value> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.wait();
        };
        let mut lc = self.node.lifecycle.lock();
        while !lc.status.is_terminal() {
            if self.node.ended.wait_until(&mut lc, deadline).timed_out() && !lc.status.is_terminal() {
                return Err(AgentError::Timeout {
                    operation: format!("context {}", self.node.id),
                    duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
        }
        self.outcome(&lc)
    }

    /// Future resolving to the terminal outcome
    pub fn future(&self) -> ContextFuture {
        ContextFuture { ctx: self.clone() }
    }

    /// Run `callback` once the context is terminal (immediately if it already is)
    pub fn on_end<F>(&self, callback: F)
    where
        F: FnOnce(&Context) + Send + 'static,
    {
        let mut lc = self.node.lifecycle.lock();
        if lc.status.is_terminal() {
            drop(lc);
            callback(self);
        } else {
            lc.listeners.push(Box::new(callback));
        }
    }

    /// Mark this context and its unfinished descendants cancelled
    ///
    /// Returns whether this context itself transitioned. Work already
    /// running is not interrupted; it should poll [`is_cancelled`](Self::is_cancelled),
    /// and whatever it returns afterwards is discarded.
    pub fn cancel(&self) -> bool {
        let cancelled = self.finish(Status::Cancelled, None, None, EventKind::Cancelled, Value::Null);
        if cancelled {
            debug!(context = %self.node.id, "context cancelled");
        }
        for child in self.children() {
            child.cancel();
        }
        cancelled
    }

    /// Deepest failed contexts of this subtree with their failures
    ///
    /// A failed node whose children also failed is skipped in favour of
    /// those children, so the result points at where errors originated.
    pub fn root_failures(&self) -> Vec<(ContextId, Failure)> {
        let mut failures = Vec::new();
        let mut stack = vec![self.clone()];
        while let Some(ctx) = stack.pop() {
            let failed_children: Vec<Context> = ctx
                .children()
                .into_iter()
                .filter(|c| c.status() == Status::Error)
                .collect();
            if failed_children.is_empty() {
                if let Some(failure) = ctx.error() {
                    failures.push((ctx.id(), failure));
                }
            } else {
                stack.extend(failed_children.into_iter().rev());
            }
        }
        failures
    }

    fn outcome(&self, lc: &Lifecycle) -> Result<Value> {
        match lc.status {
            Status::Complete => Ok(lc.output.clone().unwrap_or(Value::Null)),
            Status::Error => Err(AgentError::Execution(
                lc.error
                    .clone()
                    .unwrap_or_else(|| Failure::new("unknown", "context failed without a failure")),
            )),
            Status::Cancelled => Err(AgentError::Cancelled(self.node.id)),
            other => Err(AgentError::Lifecycle(format!(
                "context {} is still {}",
                self.node.id, other
            ))),
        }
    }

    fn status_changed(&self, from: Status, to: Status) {
        self.exec.publish(ExecutionEvent::StatusChanged {
            context_id: self.node.id,
            root_id: self.node.root_id,
            from,
            to,
        });
    }

    /// Bind a unit and move `created -> running`
    pub(crate) fn begin(&self, tool: &str, input: Args) -> Result<()> {
        {
            let mut lc = self.node.lifecycle.lock();
            match lc.status {
                Status::Created => {}
                Status::Cancelled => return Err(AgentError::Cancelled(self.node.id)),
                other => {
                    return Err(AgentError::Lifecycle(format!(
                        "context {} is already {}",
                        self.node.id, other
                    )))
                }
            }
            lc.claim(tool, &input);
        }
        self.announce_start(tool, input);
        Ok(())
    }

    /// Bind a unit to this context if it is unused, otherwise to a new child
    ///
    /// The status check and the claim happen under one lock, so concurrent
    /// callers never both claim the same context. A cancelled context
    /// accepts no new work.
    pub(crate) fn claim_or_child(&self, tool: &str, input: Args) -> Result<Context> {
        let claimed = {
            let mut lc = self.node.lifecycle.lock();
            match lc.status {
                Status::Created => {
                    lc.claim(tool, &input);
                    true
                }
                Status::Cancelled => return Err(AgentError::Cancelled(self.node.id)),
                _ => false,
            }
        };
        if claimed {
            self.announce_start(tool, input);
            return Ok(self.clone());
        }

        let child = self.child_context();
        child.begin(tool, input)?;
        // A cancel that raced the child's creation may have missed it.
        if self.is_cancelled() {
            child.cancel();
            return Err(AgentError::Cancelled(self.node.id));
        }
        Ok(child)
    }

    fn announce_start(&self, tool: &str, input: Args) {
        self.record(EventKind::Started, json!({ "tool": tool, "input": input }));
        self.status_changed(Status::Created, Status::Running);
        if let Some(parent) = self.parent() {
            parent.record(EventKind::ToolCall, json!({ "child": self.node.id, "tool": tool }));
        }
    }

    pub(crate) fn complete(&self, output: Value) -> bool {
        let payload = json!({ "output": output });
        self.finish(Status::Complete, Some(output), None, EventKind::ToolReturn, payload)
    }

    pub(crate) fn fail(&self, failure: Failure) -> bool {
        let payload = json!({ "error": failure });
        self.finish(Status::Error, None, Some(failure), EventKind::ToolException, payload)
    }

    fn finish(
        &self,
        to: Status,
        output: Option<Value>,
        error: Option<Failure>,
        kind: EventKind,
        payload: Value,
    ) -> bool {
        let (from, listeners, wakers) = {
            let mut lc = self.node.lifecycle.lock();
            if lc.status.is_terminal() {
                return false;
            }
            self.record(kind, payload);
            let from = lc.status;
            lc.status = to;
            lc.output = output;
            lc.error = error;
            lc.ended_at = Some(Utc::now().max(self.node.created_at));
            (
                from,
                std::mem::take(&mut lc.listeners),
                std::mem::take(&mut lc.wakers),
            )
        };
        self.node.ended.notify_all();
        self.status_changed(from, to);
        for waker in wakers {
            waker.wake();
        }
        for listener in listeners {
            listener(self);
        }
        if self.is_root() {
            self.autosave(to);
        }
        true
    }

    /// Reset a non-complete context in place so its unit can run again
    ///
    /// Output and error are cleared and previous children are detached. The
    /// history is kept and gains a `retried` entry.
    pub(crate) fn reset_for_retry(&self) -> Result<()> {
        let (from, tool, input, discarded) = {
            let mut lc = self.node.lifecycle.lock();
            if lc.status == Status::Complete {
                return Err(AgentError::Lifecycle(format!(
                    "context {} is complete and cannot be retried",
                    self.node.id
                )));
            }
            let from = lc.status;
            lc.status = Status::Running;
            lc.output = None;
            lc.error = None;
            lc.ended_at = None;
            (
                from,
                lc.tool.clone(),
                lc.input.clone(),
                std::mem::take(&mut lc.children),
            )
        };
        let mut summaries = Vec::with_capacity(discarded.len());
        for id in &discarded {
            if let Some(child) = self.find(id) {
                summaries.push(child.discard_summary());
                child.cancel();
            }
            self.exec.remove_subtree(*id);
        }
        self.record(
            EventKind::Retried,
            json!({ "previous_status": from, "discarded_children": summaries }),
        );
        self.record(
            EventKind::Started,
            json!({ "tool": tool, "input": input, "resumed": true }),
        );
        if from != Status::Running {
            self.status_changed(from, Status::Running);
        }
        Ok(())
    }

    /// Final state of a subtree about to be dropped by a retry
    fn discard_summary(&self) -> Value {
        let (tool, status, error) = {
            let lc = self.node.lifecycle.lock();
            (lc.tool.clone(), lc.status, lc.error.clone())
        };
        let origins: Vec<Value> = self
            .root_failures()
            .into_iter()
            .filter(|(id, _)| *id != self.node.id)
            .map(|(id, failure)| json!({ "id": id, "error": failure }))
            .collect();
        json!({
            "id": self.node.id,
            "tool": tool,
            "status": status,
            "error": error,
            "descendants": self.descendant_count(),
            "failures": origins,
        })
    }

    fn descendant_count(&self) -> usize {
        self.children()
            .iter()
            .map(|child| 1 + child.descendant_count())
            .sum()
    }

    fn autosave(&self, status: Status) {
        let options = &self.exec.options;
        let wanted = match status {
            Status::Complete => options.save_on_success,
            Status::Error | Status::Cancelled => options.save_on_error,
            _ => false,
        };
        let Some(dir) = options.save_dir.as_ref().filter(|_| wanted) else {
            return;
        };
        let saved = FileSnapshotStore::new(dir)
            .and_then(|store| store.put(&crate::persistence::snapshot(self)));
        match saved {
            Ok(()) => info!(context = %self.node.id, dir = %dir.display(), %status, "execution autosaved"),
            Err(e) => warn!(context = %self.node.id, error = %e, "autosave failed"),
        }
    }
}

/// Future over a context's terminal outcome
///
/// Resolves when the context becomes terminal; every clone and every
/// waiter sees the same outcome. [`result`](ContextFuture::result) offers
/// the blocking form for callers outside an async runtime.
#[derive(Debug, Clone)]
pub struct ContextFuture {
    ctx: Context,
}

impl ContextFuture {
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn is_done(&self) -> bool {
        self.ctx.is_terminal()
    }

    /// Block until done and return the outcome
    pub fn result(&self) -> Result<Value> {
        self.ctx.wait()
    }

    pub fn result_timeout(&self, timeout: Duration) -> Result<Value> {
        self.ctx.wait_timeout(timeout)
    }
}

impl Future for ContextFuture {
    type Output = Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let mut lc = self.ctx.node.lifecycle.lock();
        if lc.status.is_terminal() {
            return Poll::Ready(self.ctx.outcome(&lc));
        }
        if !lc.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            lc.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

/// Which state store a [`StateHandle`] addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Local,
    Shared,
    Debug,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Local => "local",
            Scope::Shared => "shared",
            Scope::Debug => "debug",
        }
    }
}

/// Scoped view of a state store that records `state_update` events
pub struct StateHandle<'a> {
    ctx: &'a Context,
    scope: Scope,
}

impl<'a> StateHandle<'a> {
    fn new(ctx: &'a Context, scope: Scope) -> Self {
        Self { ctx, scope }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Underlying store
    pub fn store(&self) -> &'a StateStore {
        match self.scope {
            Scope::Local => &self.ctx.node.local,
            Scope::Shared => &self.ctx.exec.shared,
            Scope::Debug => &self.ctx.node.debug,
        }
    }

    fn touched(&self, key: &str, op: &str) {
        if self.store().is_enabled() {
            self.ctx.record(
                EventKind::StateUpdate,
                json!({ "scope": self.scope.as_str(), "key": key, "op": op }),
            );
        }
    }

    pub fn get(&self, key: &str) -> Result<Value> {
        self.store().get(key)
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.store().get_or(key, default)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.store().contains(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.store().keys()
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.store().set(key, value.into());
        self.touched(key, "set");
    }

    pub fn delete(&self, key: &str) -> Option<Value> {
        let previous = self.store().delete(key);
        if previous.is_some() {
            self.touched(key, "delete");
        }
        previous
    }

    pub fn append(&self, key: &str, item: impl Into<Value>) -> Result<()> {
        self.store().append(key, item.into())?;
        self.touched(key, "append");
        Ok(())
    }

    pub fn concat(&self, key: &str, suffix: &str) -> Result<()> {
        self.store().concat(key, suffix)?;
        self.touched(key, "concat");
        Ok(())
    }

    pub fn increment(&self, key: &str, by: i64) -> Result<()> {
        self.store().increment(key, by)?;
        self.touched(key, "increment");
        Ok(())
    }

    pub fn decrement(&self, key: &str, by: i64) -> Result<()> {
        self.store().decrement(key, by)?;
        self.touched(key, "decrement");
        Ok(())
    }

    pub fn update<F>(&self, key: &str, f: F)
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        self.store().update(key, f);
        self.touched(key, "update");
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.store().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn running(ctx: &Context, tool: &str) {
        ctx.begin(tool, Args::new()).unwrap();
    }

    #[test]
    fn test_new_context_is_created_root() {
        let ctx = Context::new();
        assert_eq!(ctx.status(), Status::Created);
        assert!(ctx.is_root());
        assert_eq!(ctx.root_id(), ctx.id());
        assert_eq!(ctx.history()[0].kind, EventKind::Created);
    }

    #[test]
    fn test_child_context_linkage() {
        let root = Context::new();
        let child = root.child_context();
        let grandchild = child.child_context();

        assert_eq!(child.parent_id(), Some(root.id()));
        assert_eq!(grandchild.root_id(), root.id());
        assert!(child.created_at() >= root.created_at());
        assert_eq!(root.child_ids(), vec![child.id()]);
        assert_eq!(grandchild.parent().unwrap(), child);
        assert_eq!(grandchild.root(), root);
        assert_eq!(root.event_log().count(&EventKind::ChildCreated), 1);
    }

    #[test]
    fn test_transitions_are_one_way() {
        let ctx = Context::new();
        running(&ctx, "t");
        assert!(ctx.begin("t", Args::new()).is_err());
        assert!(ctx.complete(json!(1)));
        assert!(!ctx.fail(Failure::new("value", "late")));
        assert!(!ctx.cancel());
        assert_eq!(ctx.status(), Status::Complete);
        assert_eq!(ctx.output(), Some(json!(1)));
        assert_eq!(ctx.error(), None);
    }

    #[test]
    fn test_wait_from_other_thread() {
        let ctx = Context::new();
        running(&ctx, "slow");
        let worker = ctx.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            worker.complete(json!("done"));
        });
        assert_eq!(ctx.wait().unwrap(), json!("done"));
        handle.join().unwrap();
    }

    #[test]
    fn test_many_waiters_see_same_outcome() {
        let ctx = Context::new();
        running(&ctx, "t");
        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let c = ctx.clone();
                thread::spawn(move || c.wait().unwrap_err().kind().to_string())
            })
            .collect();
        thread::sleep(Duration::from_millis(10));
        ctx.fail(Failure::new("value", "boom"));
        for w in waiters {
            assert_eq!(w.join().unwrap(), "value");
        }
    }

    #[test]
    fn test_wait_timeout_does_not_mutate() {
        let ctx = Context::new();
        running(&ctx, "t");
        let err = ctx.wait_timeout(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, AgentError::Timeout { .. }));
        assert_eq!(ctx.status(), Status::Running);
    }

    #[test]
    fn test_cancel_cascades_to_unfinished_descendants() {
        let root = Context::new();
        running(&root, "parent");
        let done = root.child_context();
        running(&done, "a");
        done.complete(json!(1));
        let busy = root.child_context();
        running(&busy, "b");
        let nested = busy.child_context();

        assert!(root.cancel());
        assert_eq!(done.status(), Status::Complete);
        assert_eq!(busy.status(), Status::Cancelled);
        assert_eq!(nested.status(), Status::Cancelled);
        assert!(matches!(busy.wait(), Err(AgentError::Cancelled(_))));
        assert!(matches!(nested.begin("late", Args::new()), Err(AgentError::Cancelled(_))));
    }

    #[test]
    fn test_on_end_fires_once() {
        let ctx = Context::new();
        running(&ctx, "t");
        let hits = Arc::new(Mutex::new(0));
        let h = Arc::clone(&hits);
        ctx.on_end(move |c| {
            assert!(c.is_terminal());
            *h.lock() += 1;
        });
        ctx.complete(json!(null));
        ctx.cancel();
        assert_eq!(*hits.lock(), 1);

        let h = Arc::clone(&hits);
        ctx.on_end(move |_| *h.lock() += 1);
        assert_eq!(*hits.lock(), 2);
    }

    #[test]
    fn test_reset_for_retry_detaches_children_and_keeps_history() {
        let ctx = Context::new();
        running(&ctx, "t");
        let child = ctx.child_context();
        ctx.fail(Failure::new("value", "boom"));
        let before = ctx.history().len();

        ctx.reset_for_retry().unwrap();
        assert_eq!(ctx.status(), Status::Running);
        let retried = ctx.event_log().of_kind(&EventKind::Retried);
        let discarded = &retried[0].payload["discarded_children"][0];
        assert_eq!(discarded["id"], json!(child.id()));
        assert_eq!(discarded["status"], json!(Status::Created));
        assert_eq!(ctx.error(), None);
        assert!(ctx.child_ids().is_empty());
        assert!(ctx.find(&child.id()).is_none());
        assert_eq!(ctx.history().len(), before + 2);
        assert_eq!(ctx.event_log().count(&EventKind::Retried), 1);

        ctx.complete(json!(2));
        assert!(ctx.reset_for_retry().is_err());
    }

    #[test]
    fn test_state_scopes() {
        let root = Context::new();
        let child = root.child_context();

        child.local().set("mine", 1);
        assert!(root.local().get("mine").is_err());

        child.shared().increment("hits", 1).unwrap();
        root.shared().increment("hits", 1).unwrap();
        assert_eq!(child.shared().get("hits").unwrap(), json!(2));

        assert_eq!(child.event_log().count(&EventKind::StateUpdate), 2);
    }

    #[test]
    fn test_debug_scope_follows_options_flag() {
        let off = Context::new();
        off.debug().set("trace", "x");
        assert!(matches!(off.debug().get("trace"), Err(AgentError::StateNotFound(_))));
        assert_eq!(off.event_log().count(&EventKind::StateUpdate), 0);

        let on = Context::with_options(Options::new().with_debug(true));
        on.debug().set("trace", "x");
        assert_eq!(on.debug().get("trace").unwrap(), json!("x"));
    }

    #[test]
    fn test_root_failures_point_at_origin() {
        let root = Context::new();
        running(&root, "pipeline");
        let ok = root.child_context();
        running(&ok, "ok");
        ok.complete(json!(1));
        let bad = root.child_context();
        running(&bad, "bad");
        let leaf = bad.child_context();
        running(&leaf, "leaf");
        leaf.fail(Failure::new("value", "origin"));
        bad.fail(Failure::new("value", "origin").with_frame("bad"));
        root.fail(Failure::new("value", "origin").with_frame("pipeline"));

        let failures = root.root_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, leaf.id());
        assert_eq!(failures[0].1.message, "origin");
    }

    #[tokio::test]
    async fn test_future_resolves() {
        let ctx = Context::new();
        running(&ctx, "t");
        let worker = ctx.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            worker.complete(json!(42));
        });
        assert_eq!(ctx.future().await.unwrap(), json!(42));
        assert!(ctx.future().is_done());
    }

    #[test]
    fn test_subscribe_receives_events() {
        let ctx = Context::new();
        let mut rx = ctx.subscribe();
        running(&ctx, "t");
        ctx.complete(json!(1));

        let mut statuses = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.context_id(), ctx.id());
            if let ExecutionEvent::StatusChanged { to, .. } = event {
                statuses.push(to);
            }
        }
        assert_eq!(statuses, vec![Status::Running, Status::Complete]);
    }
}

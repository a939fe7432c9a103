//! Save and load of context trees
//!
//! A context and all of its descendants are captured as an
//! [`ExecutionSnapshot`] (see `toolweave-checkpoint`) and written as JSON.
//! Loading rebuilds a fresh execution with the same ids, statuses, inputs,
//! outputs, failures, timestamps, histories and state contents.
//!
//! Contexts that were `running` when saved come back as `running`; nothing
//! is executing them anymore, which is exactly what the retry engine looks
//! for.
//!
//! Saving a non-root context produces a detached subtree. On load its top
//! node becomes the root of the new execution: its parent link is dropped
//! and every node's root id is rewritten to the top node's id.

use crate::config::Options;
use crate::context::{Context, ContextNode, Execution, Lifecycle};
use crate::error::Result;
use crate::events::EventLog;
use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;
use toolweave_checkpoint::{ContextSnapshot, ExecutionSnapshot, SnapshotStore};
use tracing::{debug, info};

/// Capture `ctx` and its descendants
pub fn snapshot(ctx: &Context) -> ExecutionSnapshot {
    let shared = ctx.execution().shared.snapshot();
    ExecutionSnapshot::new(node_snapshot(ctx), shared)
}

fn node_snapshot(ctx: &Context) -> ContextSnapshot {
    let node = ctx.node();
    let (tool, status, input, output, error, ended_at) = {
        let lc = node.lifecycle.lock();
        (
            lc.tool.clone(),
            lc.status,
            lc.input.clone(),
            lc.output.clone(),
            lc.error.clone(),
            lc.ended_at,
        )
    };
    let mut children = ctx.children();
    children.sort_by_key(|c| c.created_at());

    ContextSnapshot {
        id: node.id,
        parent_id: node.parent_id,
        root_id: node.root_id,
        tool,
        status,
        input,
        output,
        error,
        created_at: node.created_at,
        ended_at,
        history: node.history.all(),
        local: node.local.snapshot(),
        debug: node.debug.snapshot(),
        children: children.iter().map(node_snapshot).collect(),
    }
}

/// Rebuild an execution from a snapshot
///
/// The new execution uses `options`; the debug flag inside them gates the
/// restored debug state.
pub fn restore(snapshot: ExecutionSnapshot, options: Options) -> Result<Context> {
    let ExecutionSnapshot { shared, mut root, .. } = snapshot;
    if root.parent_id.is_some() {
        debug!(context = %root.id, "loading detached subtree as a new root");
        let top = root.id;
        root.parent_id = None;
        let mut stack = vec![&mut root];
        while let Some(node) = stack.pop() {
            node.root_id = top;
            stack.extend(node.children.iter_mut());
        }
    }
    root.validate()?;

    let exec = Arc::new(Execution::new(options));
    exec.shared.restore(shared);
    let root_id = root.id;
    insert_subtree(&exec, root);

    let node = exec
        .nodes
        .read()
        .get(&root_id)
        .cloned()
        .ok_or_else(|| toolweave_checkpoint::CheckpointError::Invalid("snapshot has no root".to_string()))?;
    Ok(Context::from_parts(exec, node))
}

fn insert_subtree(exec: &Execution, snapshot: ContextSnapshot) {
    let mut pending = vec![snapshot];
    while let Some(snap) = pending.pop() {
        let ContextSnapshot {
            id,
            parent_id,
            root_id,
            tool,
            status,
            input,
            output,
            error,
            created_at,
            ended_at,
            history,
            local,
            debug,
            children,
        } = snap;
        let child_ids = children.iter().map(|c| c.id).collect();
        let lifecycle = Lifecycle::restored(tool, status, input, output, error, ended_at, child_ids);
        let node = ContextNode::restored(
            id,
            parent_id,
            root_id,
            created_at,
            lifecycle,
            EventLog::from_events(history),
            &exec.options.debug,
        );
        node.local.restore(local);
        node.debug.restore(debug);
        exec.insert(Arc::new(node));
        pending.extend(children);
    }
}

/// Write `ctx` and its descendants as JSON
pub fn save<W: Write>(ctx: &Context, writer: W) -> Result<()> {
    snapshot(ctx).to_writer(writer)?;
    Ok(())
}

/// Read a tree written by [`save`], using default options
pub fn load<R: Read>(reader: R) -> Result<Context> {
    load_with_options(reader, Options::default())
}

pub fn load_with_options<R: Read>(reader: R, options: Options) -> Result<Context> {
    restore(ExecutionSnapshot::from_reader(reader)?, options)
}

/// Save to a file, creating parent directories as needed
pub fn save_to_path(ctx: &Context, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(fs::File::create(path)?);
    save(ctx, &mut writer)?;
    writer.flush()?;
    info!(context = %ctx.id(), path = %path.display(), "context saved");
    Ok(())
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Context> {
    load_from_path_with_options(path, Options::default())
}

pub fn load_from_path_with_options(path: impl AsRef<Path>, options: Options) -> Result<Context> {
    let path = path.as_ref();
    let ctx = load_with_options(BufReader::new(fs::File::open(path)?), options)?;
    info!(context = %ctx.id(), path = %path.display(), "context loaded");
    Ok(ctx)
}

/// Save into a snapshot store under the context's id
pub fn save_to_store(ctx: &Context, store: &dyn SnapshotStore) -> Result<()> {
    store.put(&snapshot(ctx))?;
    Ok(())
}

pub fn load_from_store(
    store: &dyn SnapshotStore,
    id: &toolweave_checkpoint::ContextId,
    options: Options,
) -> Result<Context> {
    restore(store.get(id)?, options)
}

impl Context {
    /// Save this context and its descendants to `path`
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        save_to_path(self, path)
    }

    /// Load a tree saved with [`Context::save`]
    pub fn load(path: impl AsRef<Path>) -> Result<Context> {
        load_from_path(path)
    }

    /// Snapshot of this context and its descendants
    pub fn to_snapshot(&self) -> ExecutionSnapshot {
        snapshot(self)
    }
}

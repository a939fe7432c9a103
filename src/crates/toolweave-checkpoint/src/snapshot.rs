//! Serialized form of an execution tree
//!
//! An [`ExecutionSnapshot`] is a self-contained JSON document holding one
//! context subtree (nested [`ContextSnapshot`]s, children in creation order)
//! together with the execution-wide shared state. The format is versioned;
//! readers reject versions they do not understand instead of guessing.

use crate::error::{CheckpointError, Result};
use crate::record::{ContextId, Event, Failure, Status};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::io::{Read, Write};

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// One context node and its descendants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub id: ContextId,
    pub parent_id: Option<ContextId>,
    pub root_id: ContextId,
    /// Name of the unit bound to the context, if any
    pub tool: Option<String>,
    pub status: Status,
    pub input: Option<Map<String, Value>>,
    /// Absent unless complete; a complete unit may have returned `null`
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_value"
    )]
    pub output: Option<Value>,
    pub error: Option<Failure>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: Vec<Event>,
    #[serde(default)]
    pub local: Map<String, Value>,
    #[serde(default)]
    pub debug: Map<String, Value>,
    #[serde(default)]
    pub children: Vec<ContextSnapshot>,
}

impl ContextSnapshot {
    /// Pre-order iterator over this node and all descendants
    pub fn iter(&self) -> SnapshotIter<'_> {
        SnapshotIter { stack: vec![self] }
    }

    pub fn find(&self, id: &ContextId) -> Option<&ContextSnapshot> {
        self.iter().find(|node| &node.id == id)
    }

    /// Check the structural invariants of the subtree
    ///
    /// Every child must point at its parent and share the root id, and the
    /// output/error fields must agree with the status.
    pub fn validate(&self) -> Result<()> {
        for node in self.iter() {
            match node.status {
                Status::Complete if node.output.is_none() => {
                    return Err(CheckpointError::Invalid(format!(
                        "context {} is complete without output",
                        node.id
                    )))
                }
                Status::Error if node.error.is_none() => {
                    return Err(CheckpointError::Invalid(format!(
                        "context {} is in error without a failure",
                        node.id
                    )))
                }
                _ => {}
            }
            if node.status != Status::Complete && node.output.is_some() {
                return Err(CheckpointError::Invalid(format!(
                    "context {} has output but status {}",
                    node.id, node.status
                )));
            }
            if node.status != Status::Error && node.error.is_some() {
                return Err(CheckpointError::Invalid(format!(
                    "context {} has an error but status {}",
                    node.id, node.status
                )));
            }
            for child in &node.children {
                if child.parent_id != Some(node.id) || child.root_id != node.root_id {
                    return Err(CheckpointError::Invalid(format!(
                        "context {} is not linked to parent {}",
                        child.id, node.id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A present field is `Some`, even when it holds `null`
fn present_value<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Pre-order traversal of a [`ContextSnapshot`] tree
pub struct SnapshotIter<'a> {
    stack: Vec<&'a ContextSnapshot>,
}

impl<'a> Iterator for SnapshotIter<'a> {
    type Item = &'a ContextSnapshot;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// A persisted execution: one subtree plus shared state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub shared: Map<String, Value>,
    pub root: ContextSnapshot,
}

impl ExecutionSnapshot {
    pub fn new(root: ContextSnapshot, shared: Map<String, Value>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            shared,
            root,
        }
    }

    /// Identifier the snapshot is stored under (the id of its top node)
    pub fn id(&self) -> ContextId {
        self.root.id
    }

    pub fn node_count(&self) -> usize {
        self.root.iter().count()
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let snapshot: Self = serde_json::from_reader(reader)?;
        snapshot.check()?;
        Ok(snapshot)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let snapshot: Self = serde_json::from_str(s)?;
        snapshot.check()?;
        Ok(snapshot)
    }

    fn check(&self) -> Result<()> {
        if self.version != SNAPSHOT_VERSION {
            return Err(CheckpointError::Invalid(format!(
                "unsupported snapshot version {} (expected {})",
                self.version, SNAPSHOT_VERSION
            )));
        }
        self.root.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EventKind;
    use serde_json::json;

    fn node(id: ContextId, parent: Option<ContextId>, root: ContextId) -> ContextSnapshot {
        ContextSnapshot {
            id,
            parent_id: parent,
            root_id: root,
            tool: Some("echo".to_string()),
            status: Status::Complete,
            input: Some(Map::new()),
            output: Some(json!(1)),
            error: None,
            created_at: Utc::now(),
            ended_at: Some(Utc::now()),
            history: vec![Event {
                seq: 0,
                kind: EventKind::Created,
                timestamp: Utc::now(),
                payload: Value::Null,
            }],
            local: Map::new(),
            debug: Map::new(),
            children: Vec::new(),
        }
    }

    fn tree() -> ContextSnapshot {
        let root_id = ContextId::new();
        let mut root = node(root_id, None, root_id);
        let a = node(ContextId::new(), Some(root_id), root_id);
        let mut b = node(ContextId::new(), Some(root_id), root_id);
        b.children.push(node(ContextId::new(), Some(b.id), root_id));
        root.children = vec![a, b];
        root
    }

    #[test]
    fn test_preorder_iteration() {
        let root = tree();
        let order: Vec<ContextId> = root.iter().map(|n| n.id).collect();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], root.id);
        assert_eq!(order[1], root.children[0].id);
        assert_eq!(order[2], root.children[1].id);
        assert_eq!(order[3], root.children[1].children[0].id);
    }

    #[test]
    fn test_json_round_trip() {
        let snapshot = ExecutionSnapshot::new(tree(), Map::new());
        let text = snapshot.to_json_string().unwrap();
        let back = ExecutionSnapshot::from_json_str(&text).unwrap();
        assert_eq!(back, snapshot);
        assert_eq!(back.node_count(), 4);
    }

    #[test]
    fn test_null_output_survives_round_trip() {
        let mut root = tree();
        root.children[0].output = Some(Value::Null);
        root.children[1].status = Status::Running;
        root.children[1].output = None;
        root.children[1].ended_at = None;
        let snapshot = ExecutionSnapshot::new(root, Map::new());

        let text = snapshot.to_json_string().unwrap();
        let back = ExecutionSnapshot::from_json_str(&text).unwrap();
        assert_eq!(back.root.children[0].output, Some(Value::Null));
        assert_eq!(back.root.children[1].output, None);
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut snapshot = ExecutionSnapshot::new(tree(), Map::new());
        snapshot.version = 99;
        let text = serde_json::to_string(&snapshot).unwrap();
        let err = ExecutionSnapshot::from_json_str(&text).unwrap_err();
        assert!(matches!(err, CheckpointError::Invalid(_)));
    }

    #[test]
    fn test_rejects_output_on_failed_node() {
        let mut root = tree();
        root.children[0].status = Status::Error;
        root.children[0].error = Some(Failure::new("value", "boom"));
        assert!(root.validate().is_err());

        root.children[0].output = None;
        assert!(root.validate().is_ok());
    }

    #[test]
    fn test_rejects_broken_linkage() {
        let mut root = tree();
        root.children[1].children[0].parent_id = Some(root.id);
        assert!(matches!(root.validate(), Err(CheckpointError::Invalid(_))));
    }
}

//! Snapshot store behaviour against real files, plus serialization
//! properties of the record types.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use toolweave_checkpoint::{
    CheckpointError, ContextId, ContextSnapshot, Event, EventKind, ExecutionSnapshot, Failure,
    FileSnapshotStore, SnapshotStore, Status,
};

fn leaf(id: ContextId, parent: Option<ContextId>, root: ContextId, status: Status) -> ContextSnapshot {
    let (output, error) = match status {
        Status::Complete => (Some(json!({"ok": true})), None),
        Status::Error => (None, Some(Failure::new("value", "boom").with_frame("leaf"))),
        _ => (None, None),
    };
    ContextSnapshot {
        id,
        parent_id: parent,
        root_id: root,
        tool: Some("leaf".to_string()),
        status,
        input: Some(Map::new()),
        output,
        error,
        created_at: Utc::now(),
        ended_at: None,
        history: Vec::new(),
        local: Map::new(),
        debug: Map::new(),
        children: Vec::new(),
    }
}

fn execution() -> ExecutionSnapshot {
    let root_id = ContextId::new();
    let mut root = leaf(root_id, None, root_id, Status::Running);
    root.children.push(leaf(ContextId::new(), Some(root_id), root_id, Status::Complete));
    root.children.push(leaf(ContextId::new(), Some(root_id), root_id, Status::Error));
    let mut shared = Map::new();
    shared.insert("hits".to_string(), json!(3));
    ExecutionSnapshot::new(root, shared)
}

#[test]
fn test_file_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSnapshotStore::new(dir.path().join("runs")).unwrap();
    let snapshot = execution();

    store.put(&snapshot).unwrap();
    assert!(store.path_for(&snapshot.id()).exists());

    let loaded = store.get(&snapshot.id()).unwrap();
    assert_eq!(loaded, snapshot);
    assert_eq!(loaded.root.children[1].error.as_ref().unwrap().kind, "value");
}

#[test]
fn test_file_store_list_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSnapshotStore::new(dir.path()).unwrap();
    let a = execution();
    let b = execution();
    store.put(&a).unwrap();
    store.put(&b).unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let mut expected = vec![a.id(), b.id()];
    expected.sort();
    assert_eq!(store.list().unwrap(), expected);

    assert!(store.delete(&a.id()).unwrap());
    assert!(!store.delete(&a.id()).unwrap());
    assert!(matches!(store.get(&a.id()), Err(CheckpointError::NotFound(_))));
    assert_eq!(store.list().unwrap(), vec![b.id()]);
}

#[test]
fn test_file_store_rejects_corrupt_document() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSnapshotStore::new(dir.path()).unwrap();
    let id = ContextId::new();
    std::fs::write(store.path_for(&id), "{ not json").unwrap();
    assert!(matches!(store.get(&id), Err(CheckpointError::Serialization(_))));
}

fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z]{0,8}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
            prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn prop_event_history_survives_json(payloads in prop::collection::vec(arb_value(), 0..8), secs in 0i64..4_000_000_000) {
        let start = Utc.timestamp_opt(secs, 0).unwrap();
        let history: Vec<Event> = payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| Event {
                seq: i as u64,
                kind: if i % 2 == 0 { EventKind::StateUpdate } else { EventKind::custom("note") },
                timestamp: start + chrono::Duration::milliseconds(i as i64),
                payload,
            })
            .collect();

        let mut snapshot = execution();
        snapshot.root.history = history;
        let text = snapshot.to_json_string().unwrap();
        let back = ExecutionSnapshot::from_json_str(&text).unwrap();
        prop_assert_eq!(back, snapshot);
    }
}

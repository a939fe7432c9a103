//! Thread-safe key/value state with atomic compound operations
//!
//! A [`StateStore`] backs each of the three state scopes of an execution:
//!
//! - **local** - one per context, invisible to parent and children
//! - **shared** - one per execution, reachable from every context in the tree
//! - **debug** - one per context, gated by a [`DebugFlag`]
//!
//! # Concurrency
//!
//! Every key owns its own lock. A compound operation (`append`, `concat`,
//! `increment`, `decrement`, `update`) holds that lock for its whole
//! read-modify-write, so concurrent calls on the same key are linearizable
//! and never lose updates. Operations on different keys do not contend
//! beyond a brief read lock on the key index.
//!
//! ```text
//! StateStore
//!   entries: RwLock<HashMap<key, Arc<Mutex<Option<Value>>>>>
//!                                  ^ per-key slot, None = deleted
//! ```
//!
//! # Type Rules
//!
//! | Operation               | Existing value must be | Absent key starts at |
//! |-------------------------|------------------------|----------------------|
//! | `append`                | list                   | `[]`                 |
//! | `concat`                | string                 | `""`                 |
//! | `increment`/`decrement` | number                 | `0`                  |
//!
//! Anything else is an [`AgentError::StateType`] and leaves the value as is.

use crate::error::{AgentError, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared on/off switch for debug-scoped state
///
/// Clones observe the same flag. Stores built with distinct flags are
/// fully independent, so tests can run with different settings side by
/// side.
#[derive(Debug, Clone, Default)]
pub struct DebugFlag(Arc<AtomicBool>);

impl DebugFlag {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::SeqCst);
    }

    pub fn enable(&self) {
        self.set(true);
    }

    pub fn disable(&self) {
        self.set(false);
    }
}

impl Serialize for DebugFlag {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bool(self.is_enabled())
    }
}

impl<'de> Deserialize<'de> for DebugFlag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        bool::deserialize(deserializer).map(DebugFlag::new)
    }
}

type Slot = Arc<Mutex<Option<Value>>>;

/// Key/value store with per-key atomic operations
#[derive(Debug, Default)]
pub struct StateStore {
    entries: RwLock<HashMap<String, Slot>>,
    gate: Option<DebugFlag>,
}

impl StateStore {
    /// Ungated store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose reads and writes only take effect while `flag` is on
    pub fn gated(flag: DebugFlag) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            gate: Some(flag),
        }
    }

    /// Whether reads and writes currently take effect
    pub fn is_enabled(&self) -> bool {
        self.gate.as_ref().map_or(true, DebugFlag::is_enabled)
    }

    fn existing(&self, key: &str) -> Option<Slot> {
        self.entries.read().get(key).cloned()
    }

    fn slot(&self, key: &str) -> Slot {
        if let Some(slot) = self.existing(key) {
            return slot;
        }
        let mut entries = self.entries.write();
        Arc::clone(entries.entry(key.to_string()).or_default())
    }

    /// Read a value
    pub fn get(&self, key: &str) -> Result<Value> {
        if !self.is_enabled() {
            return Err(AgentError::StateNotFound(key.to_string()));
        }
        self.existing(key)
            .and_then(|slot| slot.lock().clone())
            .ok_or_else(|| AgentError::StateNotFound(key.to_string()))
    }

    /// Read a value, falling back to `default` when absent
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_ok()
    }

    /// Overwrite a value (last write wins)
    pub fn set(&self, key: &str, value: Value) {
        if !self.is_enabled() {
            return;
        }
        *self.slot(key).lock() = Some(value);
    }

    /// Remove a value, returning the previous one
    pub fn delete(&self, key: &str) -> Option<Value> {
        if !self.is_enabled() {
            return None;
        }
        self.existing(key).and_then(|slot| slot.lock().take())
    }

    /// Push `item` onto the list at `key`
    pub fn append(&self, key: &str, item: Value) -> Result<()> {
        self.modify(key, |slot| match slot {
            None => {
                *slot = Some(Value::Array(vec![item]));
                Ok(())
            }
            Some(Value::Array(items)) => {
                items.push(item);
                Ok(())
            }
            Some(other) => Err(type_error(key, "list", other)),
        })
    }

    /// Append `suffix` to the string at `key`
    pub fn concat(&self, key: &str, suffix: &str) -> Result<()> {
        self.modify(key, |slot| match slot {
            None => {
                *slot = Some(Value::String(suffix.to_string()));
                Ok(())
            }
            Some(Value::String(s)) => {
                s.push_str(suffix);
                Ok(())
            }
            Some(other) => Err(type_error(key, "string", other)),
        })
    }

    /// Add `by` to the number at `key`
    ///
    /// Integers stay integers until they would overflow, then continue as
    /// floats. Floats stay floats.
    pub fn increment(&self, key: &str, by: i64) -> Result<()> {
        self.modify(key, |slot| {
            let next = match slot.as_ref() {
                None => Value::from(by),
                Some(Value::Number(n)) => add(key, n, by)?,
                Some(other) => return Err(type_error(key, "number", other)),
            };
            *slot = Some(next);
            Ok(())
        })
    }

    /// Subtract `by` from the number at `key`
    pub fn decrement(&self, key: &str, by: i64) -> Result<()> {
        match by.checked_neg() {
            Some(neg) => self.increment(key, neg),
            // i64::MIN has no negation
            None => self.modify(key, |slot| {
                let current = match slot.as_ref() {
                    None => 0.0,
                    Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
                    Some(other) => return Err(type_error(key, "number", other)),
                };
                *slot = Some(float(key, current - by as f64)?);
                Ok(())
            }),
        }
    }

    /// Replace the value at `key` with `f(current)` atomically
    ///
    /// `f` runs while the key is locked; it must not touch the same key of
    /// the same store.
    pub fn update<F>(&self, key: &str, f: F)
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        if !self.is_enabled() {
            return;
        }
        let slot = self.slot(key);
        let mut guard = slot.lock();
        let next = f(guard.as_ref());
        *guard = Some(next);
    }

    fn modify<F>(&self, key: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Option<Value>) -> Result<()>,
    {
        if !self.is_enabled() {
            return Ok(());
        }
        let slot = self.slot(key);
        let mut guard = slot.lock();
        f(&mut *guard)
    }

    /// Keys currently holding a value, sorted
    pub fn keys(&self) -> Vec<String> {
        let entries = self.entries.read();
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, slot)| slot.lock().is_some())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every stored value, ignoring the debug gate
    pub fn snapshot(&self) -> Map<String, Value> {
        self.entries
            .read()
            .iter()
            .filter_map(|(k, slot)| slot.lock().clone().map(|v| (k.clone(), v)))
            .collect()
    }

    /// Replace the whole contents, ignoring the debug gate
    pub fn restore(&self, values: Map<String, Value>) {
        let mut entries = self.entries.write();
        entries.clear();
        for (k, v) in values {
            entries.insert(k, Arc::new(Mutex::new(Some(v))));
        }
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

fn type_error(key: &str, expected: &'static str, found: &Value) -> AgentError {
    AgentError::StateType {
        key: key.to_string(),
        expected,
        found: type_name(found),
    }
}

fn add(key: &str, n: &Number, by: i64) -> Result<Value> {
    if let Some(i) = n.as_i64() {
        if let Some(sum) = i.checked_add(by) {
            return Ok(Value::from(sum));
        }
    }
    float(key, n.as_f64().unwrap_or(0.0) + by as f64)
}

fn float(key: &str, f: f64) -> Result<Value> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| AgentError::StateType {
            key: key.to_string(),
            expected: "finite number",
            found: "non-finite number",
        })
}

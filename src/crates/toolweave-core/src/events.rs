//! Append-only event log of a single context

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use toolweave_checkpoint::{Event, EventKind};

/// Ordered history of one context node
///
/// Entries are never mutated or removed. Timestamps are clamped so that an
/// entry is never earlier than the one before it, even if the wall clock
/// steps backwards; `seq` breaks ties between equal timestamps.
#[derive(Debug, Default)]
pub struct EventLog {
    events: RwLock<Vec<Event>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from persisted events
    pub(crate) fn from_events(events: Vec<Event>) -> Self {
        Self {
            events: RwLock::new(events),
        }
    }

    /// Append an event and return a copy of it
    pub fn record(&self, kind: EventKind, payload: Value) -> Event {
        let mut events = self.events.write();
        let now = Utc::now();
        let timestamp = match events.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        let event = Event {
            seq: events.len() as u64,
            kind,
            timestamp,
            payload,
        };
        events.push(event.clone());
        event
    }

    /// Copy of every event in insertion order
    pub fn all(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn last(&self) -> Option<Event> {
        self.events.read().last().cloned()
    }

    /// Events of one kind, in order
    pub fn of_kind(&self, kind: &EventKind) -> Vec<Event> {
        self.events
            .read()
            .iter()
            .filter(|e| &e.kind == kind)
            .cloned()
            .collect()
    }

    pub fn count(&self, kind: &EventKind) -> usize {
        self.events.read().iter().filter(|e| &e.kind == kind).count()
    }
}

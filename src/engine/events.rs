//! Event schedule lookups.
//!
//! The engine never caches event data. Start times and statuses are read
//! through the injected `EventSource` on every placement, cancellation and
//! settlement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::types::WagerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Scheduled,
    Live,
    Completed,
    Cancelled,
}

/// Minimal event record the engine needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: String,
    pub commence_time: DateTime<Utc>,
    pub status: EventStatus,
}

impl EventRecord {
    pub fn scheduled(event_id: &str, commence_time: DateTime<Utc>) -> Self {
        Self {
            event_id: event_id.to_string(),
            commence_time,
            status: EventStatus::Scheduled,
        }
    }
}

/// Read-only access to the event schedule.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Look up one event. `Ok(None)` when the id is unknown.
    async fn event(&self, event_id: &str) -> Result<Option<EventRecord>, WagerError>;
}

/// Static schedule held in memory. Useful for tests and the audit binary.
#[derive(Debug, Default)]
pub struct InMemoryEvents {
    events: RwLock<HashMap<String, EventRecord>>,
}

impl InMemoryEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: impl IntoIterator<Item = EventRecord>) -> Self {
        let store = Self::new();
        for e in events {
            store.upsert(e);
        }
        store
    }

    /// Insert or replace an event (e.g. when it goes live or is rescheduled).
    pub fn upsert(&self, event: EventRecord) {
        if let Ok(mut events) = self.events.write() {
            events.insert(event.event_id.clone(), event);
        }
    }
}

#[async_trait]
impl EventSource for InMemoryEvents {
    async fn event(&self, event_id: &str) -> Result<Option<EventRecord>, WagerError> {
        let events = self
            .events
            .read()
            .map_err(|_| WagerError::Storage("event schedule lock poisoned".to_string()))?;
        Ok(events.get(event_id).cloned())
    }
}

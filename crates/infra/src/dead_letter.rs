//! Dead-letter storage for events that exhausted their retries.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nexuscrm_events::{DomainEvent, EventId};

/// Entry in the dead-letter store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub event: DomainEvent,
    /// Total processing attempts made (initial + retries).
    pub attempts: u32,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(event: DomainEvent, attempts: u32, reason: impl Into<String>) -> Self {
        Self {
            event,
            attempts,
            reason: reason.into(),
            dead_lettered_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DeadLetterError {
    #[error("dead-letter store lock poisoned")]
    Poisoned,
    #[error("dead-letter backend error: {0}")]
    Backend(String),
}

pub trait DeadLetterStore: Send + Sync {
    /// Record (or replace) the entry for its event id.
    fn record(&self, entry: DeadLetterEntry) -> Result<(), DeadLetterError>;

    fn list(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, DeadLetterError>;

    /// Remove and return the entry for `event_id`.
    fn take(&self, event_id: EventId) -> Result<Option<DeadLetterEntry>, DeadLetterError>;

    fn len(&self) -> Result<usize, DeadLetterError>;
}

impl<D> DeadLetterStore for Arc<D>
where
    D: DeadLetterStore + ?Sized,
{
    fn record(&self, entry: DeadLetterEntry) -> Result<(), DeadLetterError> {
        (**self).record(entry)
    }

    fn list(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, DeadLetterError> {
        (**self).list(limit)
    }

    fn take(&self, event_id: EventId) -> Result<Option<DeadLetterEntry>, DeadLetterError> {
        (**self).take(event_id)
    }

    fn len(&self) -> Result<usize, DeadLetterError> {
        (**self).len()
    }
}

/// In-memory dead-letter store for tests/dev. Lists in event-id (creation) order.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterStore {
    entries: RwLock<BTreeMap<EventId, DeadLetterEntry>>,
}

impl InMemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeadLetterStore for InMemoryDeadLetterStore {
    fn record(&self, entry: DeadLetterEntry) -> Result<(), DeadLetterError> {
        let mut entries = self.entries.write().map_err(|_| DeadLetterError::Poisoned)?;
        entries.insert(entry.event.event_id(), entry);
        Ok(())
    }

    fn list(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, DeadLetterError> {
        let entries = self.entries.read().map_err(|_| DeadLetterError::Poisoned)?;
        Ok(entries.values().take(limit).cloned().collect())
    }

    fn take(&self, event_id: EventId) -> Result<Option<DeadLetterEntry>, DeadLetterError> {
        let mut entries = self.entries.write().map_err(|_| DeadLetterError::Poisoned)?;
        Ok(entries.remove(&event_id))
    }

    fn len(&self) -> Result<usize, DeadLetterError> {
        let entries = self.entries.read().map_err(|_| DeadLetterError::Poisoned)?;
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexuscrm_core::UserId;
    use serde_json::Map;
    use uuid::Uuid;

    fn event_with_id(n: u128) -> DomainEvent {
        DomainEvent::from_parts(
            EventId::from_uuid(Uuid::from_u128(n)),
            "lead.created",
            Map::new(),
            UserId::new(),
            None,
            Utc::now(),
        )
    }

    #[test]
    fn record_list_take() {
        let store = InMemoryDeadLetterStore::new();
        let first = event_with_id(1);
        let second = event_with_id(2);

        store.record(DeadLetterEntry::new(first.clone(), 4, "boom")).unwrap();
        store.record(DeadLetterEntry::new(second.clone(), 4, "boom")).unwrap();
        assert_eq!(store.len().unwrap(), 2);

        let listed = store.list(10).unwrap();
        assert_eq!(listed[0].event.event_id(), first.event_id());
        assert_eq!(store.list(1).unwrap().len(), 1);

        let taken = store.take(first.event_id()).unwrap().unwrap();
        assert_eq!(taken.attempts, 4);
        assert!(store.take(first.event_id()).unwrap().is_none());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn recording_same_event_twice_keeps_one_entry() {
        let store = InMemoryDeadLetterStore::new();
        let ev = event_with_id(7);
        store.record(DeadLetterEntry::new(ev.clone(), 4, "first")).unwrap();
        store.record(DeadLetterEntry::new(ev.clone(), 4, "second")).unwrap();

        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.take(ev.event_id()).unwrap().unwrap().reason, "second");
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use nexuscrm_core::{ProjectId, UserId};

use crate::kinds::{CrossModuleEvent, EventDecodeError};

/// Unique identifier of a domain event (dedup and retry key).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for EventId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// A domain event travelling between modules.
///
/// Events are:
/// - **immutable** (treat them as facts; no setters)
/// - identified by a globally unique `event_id` for the dedup window
/// - typed by a dotted `event_type` string (e.g. "user.created")
///
/// The payload is a structured JSON map. Use [`DomainEvent::decode`] to get the
/// typed [`CrossModuleEvent`] for the well-known event types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    event_id: EventId,
    event_type: String,
    payload: Map<String, JsonValue>,
    user_id: UserId,
    project_id: Option<ProjectId>,
    created_at: DateTime<Utc>,
}

impl DomainEvent {
    /// Create a new event stamped with a fresh id and the current time.
    pub fn new(
        event_type: impl Into<String>,
        payload: Map<String, JsonValue>,
        user_id: UserId,
        project_id: Option<ProjectId>,
    ) -> Self {
        Self::from_parts(
            EventId::new(),
            event_type,
            payload,
            user_id,
            project_id,
            Utc::now(),
        )
    }

    /// Rebuild an event from all of its parts (deserialisation, replays, tests).
    pub fn from_parts(
        event_id: EventId,
        event_type: impl Into<String>,
        payload: Map<String, JsonValue>,
        user_id: UserId,
        project_id: Option<ProjectId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id,
            event_type: event_type.into(),
            payload,
            user_id,
            project_id,
            created_at,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn payload(&self) -> &Map<String, JsonValue> {
        &self.payload
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn project_id(&self) -> Option<ProjectId> {
        self.project_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Age of the event relative to `now`.
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.created_at)
    }

    pub fn age(&self) -> chrono::Duration {
        self.age_at(Utc::now())
    }

    /// Decode the payload into the typed event for this `event_type`.
    pub fn decode(&self) -> Result<CrossModuleEvent, EventDecodeError> {
        CrossModuleEvent::from_parts(&self.event_type, &self.payload)
    }
}

impl From<CrossModuleEvent> for DomainEvent {
    fn from(value: CrossModuleEvent) -> Self {
        value.into_domain_event()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Map<String, JsonValue> {
        json!({"name": "Ana"}).as_object().cloned().unwrap()
    }

    #[test]
    fn new_events_get_unique_ids() {
        let user = UserId::new();
        let a = DomainEvent::new("user.created", payload(), user, None);
        let b = DomainEvent::new("user.created", payload(), user, None);
        assert_ne!(a.event_id(), b.event_id());
    }

    #[test]
    fn age_is_measured_from_created_at() {
        let created = Utc::now() - chrono::Duration::minutes(61);
        let ev = DomainEvent::from_parts(
            EventId::new(),
            "user.created",
            payload(),
            UserId::new(),
            None,
            created,
        );
        assert_eq!(ev.age_at(created + chrono::Duration::minutes(61)).num_minutes(), 61);
        assert!(ev.age() >= chrono::Duration::minutes(61));
    }

    #[test]
    fn events_survive_json_round_trip() {
        let ev = DomainEvent::new("project.created", payload(), UserId::new(), Some(ProjectId::new()));
        let json = serde_json::to_string(&ev).unwrap();
        let back: DomainEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(ev, back);
    }
}

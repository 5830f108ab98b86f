//! Event-type registry: which listeners and named actions react to an event type.
//!
//! The registry only stores identifiers. Handlers themselves are registered by id on
//! the integration service, so mappings can be changed at runtime without touching
//! handler wiring.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kinds::event_types;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Registry lock was poisoned by a panicking writer.
    #[error("event type registry lock poisoned")]
    Poisoned,
}

/// Listener ids and action names registered for one event type.
///
/// Both lists keep insertion order and never hold the same id twice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTypeMapping {
    #[serde(default)]
    listeners: Vec<String>,
    #[serde(default)]
    actions: Vec<String>,
}

impl EventTypeMapping {
    pub fn new<L, A>(listeners: L, actions: A) -> Self
    where
        L: IntoIterator,
        L::Item: Into<String>,
        A: IntoIterator,
        A::Item: Into<String>,
    {
        let mut mapping = Self::default();
        for l in listeners {
            mapping.add_listener(l);
        }
        for a in actions {
            mapping.add_action(a);
        }
        mapping
    }

    pub fn listeners(&self) -> &[String] {
        &self.listeners
    }

    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    pub fn add_listener(&mut self, id: impl Into<String>) {
        push_unique(&mut self.listeners, id.into());
    }

    pub fn add_action(&mut self, name: impl Into<String>) {
        push_unique(&mut self.actions, name.into());
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty() && self.actions.is_empty()
    }

    fn merge(&mut self, other: EventTypeMapping) {
        for l in other.listeners {
            push_unique(&mut self.listeners, l);
        }
        for a in other.actions {
            push_unique(&mut self.actions, a);
        }
    }
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

/// Concurrency-safe map from event type to [`EventTypeMapping`].
#[derive(Debug, Default)]
pub struct EventTypeRegistry {
    mappings: RwLock<HashMap<String, EventTypeMapping>>,
}

impl EventTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with the well-known cross-module event types.
    pub fn with_defaults() -> Self {
        let feed = ["activity.feed", "analytics.tracker"];
        let seeded = [
            (
                event_types::USER_CREATED,
                vec!["leads.create_default_lead", "projects.create_default_project"],
            ),
            (
                event_types::PROJECT_CREATED,
                vec!["tasks.create_default_tasks", "media.create_project_folder"],
            ),
            (
                event_types::LEAD_CREATED,
                vec!["email.subscribe_lead", "workflows.trigger_lead_workflows"],
            ),
            (
                event_types::EMAIL_CAMPAIGN_CREATED,
                vec!["analytics.init_campaign_metrics"],
            ),
            (
                event_types::POST_PUBLISHED,
                vec!["analytics.init_post_metrics", "leads.capture_post_engagement"],
            ),
        ];

        let map = seeded
            .into_iter()
            .map(|(ty, actions)| (ty.to_string(), EventTypeMapping::new(feed, actions)))
            .collect();

        Self {
            mappings: RwLock::new(map),
        }
    }

    /// Add listeners/actions for `event_type`, merging with any existing mapping.
    pub fn add_mapping(
        &self,
        event_type: impl Into<String>,
        mapping: EventTypeMapping,
    ) -> Result<(), RegistryError> {
        let mut guard = self.mappings.write().map_err(|_| RegistryError::Poisoned)?;
        guard.entry(event_type.into()).or_default().merge(mapping);
        Ok(())
    }

    /// Remove the mapping for `event_type`. Returns the removed mapping, if any.
    pub fn remove_mapping(&self, event_type: &str) -> Result<Option<EventTypeMapping>, RegistryError> {
        let mut guard = self.mappings.write().map_err(|_| RegistryError::Poisoned)?;
        Ok(guard.remove(event_type))
    }

    pub fn mapping(&self, event_type: &str) -> Result<Option<EventTypeMapping>, RegistryError> {
        let guard = self.mappings.read().map_err(|_| RegistryError::Poisoned)?;
        Ok(guard.get(event_type).cloned())
    }

    /// Snapshot of every mapping, ordered by event type.
    pub fn mappings(&self) -> Result<BTreeMap<String, EventTypeMapping>, RegistryError> {
        let guard = self.mappings.read().map_err(|_| RegistryError::Poisoned)?;
        Ok(guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    pub fn len(&self) -> Result<usize, RegistryError> {
        let guard = self.mappings.read().map_err(|_| RegistryError::Poisoned)?;
        Ok(guard.len())
    }

    pub fn is_empty(&self) -> Result<bool, RegistryError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn defaults_cover_every_known_event_type() {
        let registry = EventTypeRegistry::with_defaults();
        for ty in event_types::ALL {
            let mapping = registry.mapping(ty).unwrap().expect("seeded");
            assert!(mapping.listeners().contains(&"activity.feed".to_string()));
            assert!(!mapping.actions().is_empty());
        }
        assert_eq!(registry.len().unwrap(), event_types::ALL.len());
    }

    #[test]
    fn add_merges_without_duplicates() {
        let registry = EventTypeRegistry::new();
        registry
            .add_mapping("invoice.paid", EventTypeMapping::new(["audit"], ["notify"]))
            .unwrap();
        registry
            .add_mapping("invoice.paid", EventTypeMapping::new(["audit", "billing"], Vec::<String>::new()))
            .unwrap();

        let mapping = registry.mapping("invoice.paid").unwrap().unwrap();
        assert_eq!(mapping.listeners(), ["audit", "billing"]);
        assert_eq!(mapping.actions(), ["notify"]);
    }

    #[test]
    fn remove_returns_previous_mapping() {
        let registry = EventTypeRegistry::with_defaults();
        let removed = registry.remove_mapping("user.created").unwrap();
        assert!(removed.is_some());
        assert!(registry.mapping("user.created").unwrap().is_none());
        assert!(registry.remove_mapping("user.created").unwrap().is_none());
    }

    #[test]
    fn unknown_event_type_has_no_mapping() {
        let registry = EventTypeRegistry::with_defaults();
        assert!(registry.mapping("unknown.type").unwrap().is_none());
    }

    proptest! {
        #[test]
        fn listeners_never_hold_duplicates(ids in prop::collection::vec("[a-d]", 0..20)) {
            let mapping = EventTypeMapping::new(ids.clone(), Vec::<String>::new());

            let mut expected: Vec<String> = Vec::new();
            for id in ids {
                if !expected.contains(&id) {
                    expected.push(id);
                }
            }
            prop_assert_eq!(mapping.listeners(), expected.as_slice());
        }
    }
}

//! Routes an event to the listeners and actions its type is mapped to.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use nexuscrm_events::{
    DomainEvent, EventAction, EventListener, EventTypeMapping, EventTypeRegistry, HandlerError,
    RegistryError,
};

use crate::error::IntegrationError;

/// Handler implementations, registered by the ids used in event mappings.
#[derive(Default)]
pub struct HandlerSet {
    listeners: RwLock<HashMap<String, Arc<dyn EventListener>>>,
    actions: RwLock<HashMap<String, Arc<dyn EventAction>>>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the listener known as `id`.
    pub fn register_listener(&self, id: impl Into<String>, listener: impl EventListener + 'static) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.into(), Arc::new(listener));
    }

    /// Register (or replace) the action known as `name`.
    pub fn register_action(&self, name: impl Into<String>, action: impl EventAction + 'static) {
        self.actions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(action));
    }

    pub fn listener(&self, id: &str) -> Option<Arc<dyn EventListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn action(&self, name: &str) -> Option<Arc<dyn EventAction>> {
        self.actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Ids of every registered listener, sorted.
    pub fn listener_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn counts(&self) -> (usize, usize) {
        (
            self.listeners.read().unwrap_or_else(PoisonError::into_inner).len(),
            self.actions.read().unwrap_or_else(PoisonError::into_inner).len(),
        )
    }
}

impl std::fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (listeners, actions) = self.counts();
        f.debug_struct("HandlerSet")
            .field("listeners", &listeners)
            .field("actions", &actions)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrationStats {
    pub registered_event_types: usize,
    pub registered_listeners: usize,
    pub registered_actions: usize,
    pub events_processed: u64,
    pub unmapped_events: u64,
    pub handler_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    events_processed: u64,
    unmapped_events: u64,
    handler_failures: u64,
}

#[derive(Debug)]
pub struct IntegrationService {
    registry: Arc<EventTypeRegistry>,
    handlers: Arc<HandlerSet>,
    counters: Mutex<Counters>,
}

impl IntegrationService {
    pub fn new(registry: Arc<EventTypeRegistry>, handlers: Arc<HandlerSet>) -> Self {
        Self {
            registry,
            handlers,
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn registry(&self) -> &Arc<EventTypeRegistry> {
        &self.registry
    }

    pub fn handlers(&self) -> &Arc<HandlerSet> {
        &self.handlers
    }

    /// Run every listener, then every action, mapped to the event's type.
    ///
    /// Each handler is isolated: a failure is logged and the rest still run. Only
    /// retryable handler failures (and registry failures) are returned.
    #[instrument(skip_all, fields(event_id = %event.event_id(), event_type = %event.event_type()))]
    pub fn process_event(&self, event: &DomainEvent) -> Result<(), IntegrationError> {
        let Some(mapping) = self.registry.mapping(event.event_type())? else {
            warn!("no mapping registered for event type, skipping");
            self.counters().unmapped_events += 1;
            return Ok(());
        };

        let mut retryable = Vec::new();
        let mut failures = 0u64;

        for id in mapping.listeners() {
            let Some(listener) = self.handlers.listener(id) else {
                warn!(listener = %id, "mapped listener is not registered");
                continue;
            };
            if let Err(e) = listener.on_event(event) {
                failures += 1;
                record_failure(&mut retryable, "listener", id, e);
            }
        }

        for name in mapping.actions() {
            let Some(action) = self.handlers.action(name) else {
                warn!(action = %name, "mapped action is not registered");
                continue;
            };
            if let Err(e) = action.execute(event) {
                failures += 1;
                record_failure(&mut retryable, "action", name, e);
            }
        }

        {
            let mut counters = self.counters();
            counters.events_processed += 1;
            counters.handler_failures += failures;
        }

        if retryable.is_empty() {
            info!(failures, "event integrated");
            Ok(())
        } else {
            Err(IntegrationError::RetryableFailures {
                event_type: event.event_type().to_string(),
                failures: retryable,
            })
        }
    }

    /// Merge `mapping` into the entry for `event_type`.
    pub fn add_event_mapping(
        &self,
        event_type: impl Into<String>,
        mapping: EventTypeMapping,
    ) -> Result<(), RegistryError> {
        let event_type = event_type.into();
        debug!(%event_type, "event mapping added");
        self.registry.add_mapping(event_type, mapping)
    }

    pub fn remove_event_mapping(
        &self,
        event_type: &str,
    ) -> Result<Option<EventTypeMapping>, RegistryError> {
        debug!(%event_type, "event mapping removed");
        self.registry.remove_mapping(event_type)
    }

    pub fn get_event_mappings(
        &self,
    ) -> Result<std::collections::BTreeMap<String, EventTypeMapping>, RegistryError> {
        self.registry.mappings()
    }

    pub fn stats(&self) -> IntegrationStats {
        let (registered_listeners, registered_actions) = self.handlers.counts();
        let registered_event_types = self.registry.len().unwrap_or_else(|e| {
            error!(error = %e, "registry unavailable while collecting stats");
            0
        });
        let counters = self.counters();
        IntegrationStats {
            registered_event_types,
            registered_listeners,
            registered_actions,
            events_processed: counters.events_processed,
            unmapped_events: counters.unmapped_events,
            handler_failures: counters.handler_failures,
        }
    }

    fn counters(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn record_failure(retryable: &mut Vec<String>, kind: &str, id: &str, err: HandlerError) {
    if err.is_retryable() {
        warn!(handler = %id, kind, error = %err, "handler failed, will retry");
        retryable.push(format!("{id}: {err}"));
    } else {
        error!(handler = %id, kind, error = %err, "handler failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexuscrm_core::UserId;
    use serde_json::{Map, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(event_type: &str) -> DomainEvent {
        let payload: Map<String, serde_json::Value> =
            json!({"name": "Ana"}).as_object().cloned().unwrap();
        DomainEvent::new(event_type, payload, UserId::new(), None)
    }

    fn counting(counter: &Arc<AtomicUsize>) -> impl Fn(&DomainEvent) -> Result<(), HandlerError> + use<> {
        let counter = counter.clone();
        move |_: &DomainEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn service() -> IntegrationService {
        IntegrationService::new(Arc::new(EventTypeRegistry::new()), Arc::new(HandlerSet::new()))
    }

    #[test]
    fn unknown_event_type_is_a_no_op() {
        let service = service();
        assert!(service.process_event(&event("invoice.paid")).is_ok());
        assert_eq!(service.stats().unmapped_events, 1);
        assert_eq!(service.stats().events_processed, 0);
    }

    #[test]
    fn failing_listener_does_not_stop_siblings() {
        let service = service();
        let ran = Arc::new(AtomicUsize::new(0));
        service.handlers().register_listener("broken", |_: &DomainEvent| {
            Err::<(), _>(HandlerError::failed("boom"))
        });
        service.handlers().register_listener("feed", counting(&ran));
        service.handlers().register_action("leads.create_default_lead", counting(&ran));
        service
            .add_event_mapping(
                "user.created",
                EventTypeMapping::new(["broken", "feed", "missing"], ["leads.create_default_lead"]),
            )
            .unwrap();

        assert!(service.process_event(&event("user.created")).is_ok());
        assert_eq!(ran.load(Ordering::SeqCst), 2);
        assert_eq!(service.stats().handler_failures, 1);
    }

    #[test]
    fn retryable_failures_surface_after_all_handlers_ran() {
        let service = service();
        let ran = Arc::new(AtomicUsize::new(0));
        service.handlers().register_action("email.subscribe_lead", |_: &DomainEvent| {
            Err::<(), _>(HandlerError::retryable("smtp timeout"))
        });
        service.handlers().register_action("workflows.trigger_lead_workflows", counting(&ran));
        service
            .add_event_mapping(
                "lead.created",
                EventTypeMapping::new(
                    Vec::<String>::new(),
                    ["email.subscribe_lead", "workflows.trigger_lead_workflows"],
                ),
            )
            .unwrap();

        let err = service.process_event(&event("lead.created")).unwrap_err();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        match err {
            IntegrationError::RetryableFailures { event_type, failures } => {
                assert_eq!(event_type, "lead.created");
                assert_eq!(failures.len(), 1);
                assert!(failures[0].starts_with("email.subscribe_lead"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn removed_mapping_stops_routing() {
        let service = service();
        let ran = Arc::new(AtomicUsize::new(0));
        service.handlers().register_listener("feed", counting(&ran));
        service
            .add_event_mapping("post.published", EventTypeMapping::new(["feed"], Vec::<String>::new()))
            .unwrap();

        service.process_event(&event("post.published")).unwrap();
        assert!(service.remove_event_mapping("post.published").unwrap().is_some());
        service.process_event(&event("post.published")).unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(service.get_event_mappings().unwrap().is_empty());
    }
}

use thiserror::Error;

use crate::event::DomainEvent;
use crate::kinds::CrossModuleEvent;

/// Outcome of a single listener or action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// The handler failed; the failure is logged and siblings keep running.
    #[error("handler failed: {0}")]
    Failed(String),
    /// The handler failed in a way worth retrying the whole event for.
    #[error("handler failed (retryable): {0}")]
    Retryable(String),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Retryable(_))
    }
}

/// Reacts to an event (activity feeds, notifications, trackers).
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &DomainEvent) -> Result<(), HandlerError>;
}

impl<F> EventListener for F
where
    F: Fn(&DomainEvent) -> Result<(), HandlerError> + Send + Sync,
{
    fn on_event(&self, event: &DomainEvent) -> Result<(), HandlerError> {
        self(event)
    }
}

/// A named cross-module side effect (e.g. "create the default lead for a new user").
pub trait EventAction: Send + Sync {
    fn execute(&self, event: &DomainEvent) -> Result<(), HandlerError>;
}

impl<F> EventAction for F
where
    F: Fn(&DomainEvent) -> Result<(), HandlerError> + Send + Sync,
{
    fn execute(&self, event: &DomainEvent) -> Result<(), HandlerError> {
        self(event)
    }
}

/// Action over the typed payload.
///
/// Payloads that do not decode are a non-retryable failure: retrying would decode
/// the same bytes again.
pub struct TypedAction<F> {
    f: F,
}

pub fn typed_action<F>(f: F) -> TypedAction<F>
where
    F: Fn(&CrossModuleEvent) -> Result<(), HandlerError> + Send + Sync,
{
    TypedAction { f }
}

impl<F> EventAction for TypedAction<F>
where
    F: Fn(&CrossModuleEvent) -> Result<(), HandlerError> + Send + Sync,
{
    fn execute(&self, event: &DomainEvent) -> Result<(), HandlerError> {
        let typed = event
            .decode()
            .map_err(|e| HandlerError::failed(e.to_string()))?;
        (self.f)(&typed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexuscrm_core::UserId;
    use serde_json::{Map, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn closures_are_listeners() {
        let seen = AtomicUsize::new(0);
        let listener = |_: &DomainEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok::<(), HandlerError>(())
        };
        let ev = DomainEvent::new("x.y", Map::new(), UserId::new(), None);
        listener.on_event(&ev).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn typed_action_sees_decoded_payload() {
        let user_id = UserId::new();
        let action = typed_action(move |ev: &CrossModuleEvent| match ev {
            CrossModuleEvent::UserCreated { email, .. } if email == "ana@example.com" => Ok(()),
            other => Err(HandlerError::failed(format!("unexpected {}", other.event_type()))),
        });

        let ev: DomainEvent = CrossModuleEvent::UserCreated {
            user_id,
            name: "Ana".to_string(),
            email: "ana@example.com".to_string(),
            metadata: Map::new(),
        }
        .into();
        assert_eq!(action.execute(&ev), Ok(()));
    }

    #[test]
    fn typed_action_rejects_undecodable_payload() {
        let action = typed_action(|_: &CrossModuleEvent| Ok(()));
        let payload = json!({"unrelated": 1}).as_object().cloned().unwrap();
        let ev = DomainEvent::new("user.created", payload, UserId::new(), None);

        let err = action.execute(&ev).unwrap_err();
        assert!(!err.is_retryable());
    }
}

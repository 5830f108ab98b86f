use thiserror::Error;

use nexuscrm_events::{EventId, RegistryError};
use nexuscrm_infra::{CacheError, DeadLetterError, SchedulerError, TransactionError};

/// Why an event was rejected before processing. Never retried.
#[derive(Debug, Error)]
pub enum ValidationFailure {
    #[error("event {event_id} is stale ({age_secs}s old, limit {max_age_secs}s)")]
    Stale {
        event_id: EventId,
        age_secs: i64,
        max_age_secs: u64,
    },
    #[error("event {event_id} has an empty payload")]
    EmptyPayload { event_id: EventId },
    #[error("event {event_id} was already dispatched")]
    Duplicate { event_id: EventId },
    /// The dedup store could not be consulted; the event is rejected (fail closed).
    #[error("dedup check failed for event {event_id}: {source}")]
    Store {
        event_id: EventId,
        #[source]
        source: CacheError,
    },
}

/// A failure inside event processing; drives the dispatcher's retry path.
#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("retryable handler failures for {event_type}: {}", .failures.join("; "))]
    RetryableFailures {
        event_type: String,
        failures: Vec<String>,
    },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    DeadLetter(#[from] DeadLetterError),
    #[error("event {0} is not in the dead-letter store")]
    NotDeadLettered(EventId),
}

/// Aborts an orchestration flow; rendered into the result's `error` key.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("Validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),
    #[error("step '{step}' failed: {message}")]
    Step { step: &'static str, message: String },
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),
}

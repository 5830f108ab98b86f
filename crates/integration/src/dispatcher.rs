//! Event dispatcher: validation, dedup, pending queue, retry with backoff.
//!
//! ```text
//! dispatch(event)
//!   -> validate_event   (age, payload, dedup marker)  -- rejected: logged, no retry
//!   -> pending queue
//!   -> process_event    (in-flight guard -> EventProcessor)
//!        ok  -> removed from pending
//!        err -> schedule_retry -> TaskScheduler (delay_for(n)) -> process_event ...
//!                            \-> retries exhausted -> DeadLetterStore
//! ```
//!
//! The pending queue, in-flight set and retry tickets are per-instance memory. The
//! dedup marker and retry counters live in the shared cache and are the authority
//! across processes.
//!
//! Each scheduled retry carries a ticket. A timer only runs while its ticket is
//! still the current one for the event and the event is still pending; success,
//! `clear_queue`, dead-lettering and any newer attempt revoke it. At most one
//! retry timer per event is therefore live.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use nexuscrm_events::{DomainEvent, EventId};
use nexuscrm_infra::{
    DeadLetterEntry, DeadLetterStore, DeduplicationStore, DispatcherConfig, RetryOutcome,
    RetryPolicy, SharedCache, TaskScheduler,
};

use crate::error::{DispatchError, IntegrationError, ValidationFailure};
use crate::integration_service::{HandlerSet, IntegrationService};

/// Whatever consumes validated events. Errors drive the retry path.
pub trait EventProcessor: Send + Sync {
    fn process_event(&self, event: &DomainEvent) -> Result<(), IntegrationError>;
}

impl EventProcessor for IntegrationService {
    fn process_event(&self, event: &DomainEvent) -> Result<(), IntegrationError> {
        IntegrationService::process_event(self, event)
    }
}

impl<P> EventProcessor for Arc<P>
where
    P: EventProcessor + ?Sized,
{
    fn process_event(&self, event: &DomainEvent) -> Result<(), IntegrationError> {
        (**self).process_event(event)
    }
}

/// Adapts a closure into an [`EventProcessor`].
pub struct FnProcessor<F>(pub F);

impl<F> EventProcessor for FnProcessor<F>
where
    F: Fn(&DomainEvent) -> Result<(), IntegrationError> + Send + Sync,
{
    fn process_event(&self, event: &DomainEvent) -> Result<(), IntegrationError> {
        (self.0)(event)
    }
}

/// Runtime-adjustable dispatcher settings. `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherSettings {
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Base retry delay in seconds.
    #[serde(default)]
    pub retry_delay: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub queue_size: usize,
    pub processing_count: usize,
    pub max_retries: u32,
    /// Base retry delay in seconds.
    pub retry_delay: u64,
    pub dead_letters: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchReport {
    fn tally(&mut self, ok: bool) {
        if ok {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub processed: usize,
    pub remaining: usize,
}

/// Result of one processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Processed,
    /// Another call is already processing this event id; nothing was done.
    InFlight,
    /// The event left the queue or its retry was revoked; nothing was done.
    Skipped,
    /// Processing failed. `None` when the retry could not be scheduled either.
    Failed(Option<RetryOutcome>),
}

impl ProcessOutcome {
    pub fn is_processed(&self) -> bool {
        matches!(self, ProcessOutcome::Processed)
    }
}

#[derive(Debug)]
pub enum DispatchOutcome {
    /// Validation rejected the event; it was not queued.
    Rejected(ValidationFailure),
    Accepted(ProcessOutcome),
}

/// Why an attempt is being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    /// Caller asked for it; revokes any scheduled retry.
    Direct,
    /// Drained from the queue; only while still pending. Revokes any scheduled retry.
    Queued,
    /// A retry timer fired; only while its ticket is current and the event pending.
    Retry(u64),
}

#[derive(Debug, Clone, Copy)]
struct Settings {
    policy: RetryPolicy,
    max_event_age: Duration,
}

struct Inner<P, C, S, D> {
    processor: P,
    dedup: DeduplicationStore<C>,
    scheduler: S,
    dead_letters: D,
    handlers: Arc<HandlerSet>,
    settings: RwLock<Settings>,
    pending: Mutex<Vec<DomainEvent>>,
    in_flight: Mutex<HashSet<EventId>>,
    /// Current retry ticket per event with a live retry timer.
    retry_tickets: Mutex<HashMap<EventId, u64>>,
    next_ticket: AtomicU64,
}

/// Cheap to clone; clones share the queue, in-flight set and settings.
pub struct EventDispatcher<P, C, S, D> {
    inner: Arc<Inner<P, C, S, D>>,
}

impl<P, C, S, D> Clone for EventDispatcher<P, C, S, D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Removes its event id from the in-flight set when dropped.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<EventId>>,
    id: EventId,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<EventId>>, id: EventId) -> Option<Self> {
        let inserted = set.lock().unwrap_or_else(PoisonError::into_inner).insert(id);
        inserted.then_some(Self { set, id })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

impl<P, C, S, D> EventDispatcher<P, C, S, D>
where
    P: EventProcessor + 'static,
    C: SharedCache + 'static,
    S: TaskScheduler + 'static,
    D: DeadLetterStore + 'static,
{
    pub fn new(
        processor: P,
        cache: C,
        scheduler: S,
        dead_letters: D,
        handlers: Arc<HandlerSet>,
        config: &DispatcherConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                processor,
                dedup: DeduplicationStore::with_ttl(cache, config.dedup_ttl()),
                scheduler,
                dead_letters,
                handlers,
                settings: RwLock::new(Settings {
                    policy: config.retry_policy(),
                    max_event_age: config.max_event_age(),
                }),
                pending: Mutex::new(Vec::new()),
                in_flight: Mutex::new(HashSet::new()),
                retry_tickets: Mutex::new(HashMap::new()),
                next_ticket: AtomicU64::new(1),
            }),
        }
    }

    /// Validate, queue and immediately try to process `event`.
    ///
    /// Rejections are logged and returned, never raised; processing failures are
    /// handed to the retry path.
    #[instrument(skip_all, fields(event_id = %event.event_id(), event_type = %event.event_type()))]
    pub fn dispatch(&self, event: DomainEvent) -> DispatchOutcome {
        if let Err(failure) = self.validate_event(&event) {
            warn!(reason = %failure, "event rejected");
            return DispatchOutcome::Rejected(failure);
        }

        self.pending().push(event.clone());
        debug!("event queued");
        DispatchOutcome::Accepted(self.attempt(&event, Attempt::Direct))
    }

    /// Age, then payload, then the dedup marker; first failure wins.
    ///
    /// Passing the dedup check claims the event id for the dedup window.
    pub fn validate_event(&self, event: &DomainEvent) -> Result<(), ValidationFailure> {
        let event_id = event.event_id();
        let max_age = self.settings().max_event_age;
        let age = event.age();
        let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        if age.num_milliseconds() > max_age_ms {
            return Err(ValidationFailure::Stale {
                event_id,
                age_secs: age.num_seconds(),
                max_age_secs: max_age.as_secs(),
            });
        }

        if event.payload().is_empty() {
            return Err(ValidationFailure::EmptyPayload { event_id });
        }

        match self.inner.dedup.mark_processed(event_id) {
            Ok(true) => Ok(()),
            Ok(false) => Err(ValidationFailure::Duplicate { event_id }),
            Err(source) => Err(ValidationFailure::Store { event_id, source }),
        }
    }

    /// One processing attempt. Concurrent attempts for the same id are skipped.
    ///
    /// Supersedes any retry already scheduled for the event.
    pub fn process_event(&self, event: &DomainEvent) -> ProcessOutcome {
        self.attempt(event, Attempt::Direct)
    }

    #[instrument(skip_all, fields(event_id = %event.event_id(), event_type = %event.event_type()))]
    fn attempt(&self, event: &DomainEvent, attempt: Attempt) -> ProcessOutcome {
        let event_id = event.event_id();
        let Some(guard) = InFlightGuard::acquire(&self.inner.in_flight, event_id) else {
            warn!("event already being processed, skipping");
            return ProcessOutcome::InFlight;
        };

        // Checked under the in-flight guard so a timer and a drain cannot both pass.
        let runnable = match attempt {
            Attempt::Direct => {
                self.revoke_retry(event_id);
                true
            }
            Attempt::Queued => {
                let pending = self.is_pending(event_id);
                if pending {
                    self.revoke_retry(event_id);
                }
                pending
            }
            Attempt::Retry(ticket) => self.redeem_retry(event_id, ticket) && self.is_pending(event_id),
        };
        if !runnable {
            debug!(?attempt, "event no longer due, skipping");
            return ProcessOutcome::Skipped;
        }

        let result = self.inner.processor.process_event(event);
        drop(guard);

        match result {
            Ok(()) => {
                self.remove_pending(event_id);
                self.revoke_retry(event_id);
                if let Err(e) = self.inner.dedup.reset_retries(event_id) {
                    warn!(error = %e, "failed to reset retry counter");
                }
                info!("event processed");
                ProcessOutcome::Processed
            }
            Err(e) => {
                error!(error = %e, "event processing failed");
                match self.retry_or_dead_letter(event, &e.to_string()) {
                    Ok(outcome) => ProcessOutcome::Failed(Some(outcome)),
                    Err(e) => {
                        error!(error = %e, "failed to schedule retry; event stays pending");
                        ProcessOutcome::Failed(None)
                    }
                }
            }
        }
    }

    /// Schedule another attempt for `event`, or dead-letter it once the retry
    /// budget is spent.
    pub fn schedule_retry(&self, event: &DomainEvent) -> Result<RetryOutcome, DispatchError> {
        self.retry_or_dead_letter(event, "max retries exceeded")
    }

    fn retry_or_dead_letter(
        &self,
        event: &DomainEvent,
        reason: &str,
    ) -> Result<RetryOutcome, DispatchError> {
        let event_id = event.event_id();
        let policy = self.settings().policy;
        let retries = self.inner.dedup.retry_count(event_id)?;

        if !policy.should_retry(retries) {
            let attempts = retries.saturating_add(1);
            error!(%event_id, attempts, reason, "event permanently failed, dead-lettering");
            self.remove_pending(event_id);
            self.revoke_retry(event_id);
            self.inner
                .dead_letters
                .record(DeadLetterEntry::new(event.clone(), attempts, reason))?;
            return Ok(RetryOutcome::Exhausted { attempts });
        }

        let delay = policy.delay_for(retries);
        let retry = self.inner.dedup.increment_retry(event_id)?;

        let ticket = self.issue_retry(event_id);
        let weak: Weak<Inner<P, C, S, D>> = Arc::downgrade(&self.inner);
        let event = event.clone();
        let scheduled = self.inner.scheduler.schedule(
            delay,
            Box::new(move || {
                // The dispatcher may be gone by the time the timer fires.
                if let Some(inner) = weak.upgrade() {
                    EventDispatcher { inner }.attempt(&event, Attempt::Retry(ticket));
                }
            }),
        );
        if let Err(e) = scheduled {
            self.revoke_retry(event_id);
            return Err(e.into());
        }

        warn!(%event_id, retry, delay_secs = delay.as_secs(), "retry scheduled");
        Ok(RetryOutcome::Scheduled { retry, delay })
    }

    /// Process a snapshot of the pending queue, one event at a time.
    ///
    /// Events that left the queue since the snapshot are skipped. Running an event
    /// now replaces its scheduled retry rather than adding a second one.
    pub fn process_queue(&self) -> BatchReport {
        let snapshot = self.get_pending_events();
        self.drain(&snapshot)
    }

    /// Process each event independently; a failure never stops the rest.
    pub fn process_batch(&self, events: &[DomainEvent]) -> BatchReport {
        let mut report = BatchReport::default();
        for event in events {
            report.tally(self.process_event(event).is_processed());
        }
        info!(succeeded = report.succeeded, failed = report.failed, "batch processed");
        report
    }

    /// Process up to `limit` pending events, oldest first.
    pub fn process_pending(&self, limit: usize) -> DrainReport {
        let batch: Vec<DomainEvent> = self.get_pending_events().into_iter().take(limit).collect();
        let report = self.drain(&batch);
        DrainReport {
            processed: report.succeeded,
            remaining: self.pending().len(),
        }
    }

    fn drain(&self, events: &[DomainEvent]) -> BatchReport {
        let mut report = BatchReport::default();
        for event in events {
            match self.attempt(event, Attempt::Queued) {
                ProcessOutcome::Skipped => {}
                outcome => report.tally(outcome.is_processed()),
            }
        }
        info!(succeeded = report.succeeded, failed = report.failed, "queue drained");
        report
    }

    /// Deliver `event` to the named listeners only. Unknown ids count as failures.
    pub fn dispatch_to_listeners(&self, event: &DomainEvent, listener_ids: &[&str]) -> BatchReport {
        let mut report = BatchReport::default();
        for id in listener_ids {
            let ok = match self.inner.handlers.listener(id) {
                None => {
                    warn!(listener = %id, "listener is not registered");
                    false
                }
                Some(listener) => match listener.on_event(event) {
                    Ok(()) => true,
                    Err(e) => {
                        error!(listener = %id, error = %e, "listener failed");
                        false
                    }
                },
            };
            report.tally(ok);
        }
        report
    }

    /// Deliver `event` to every registered listener.
    pub fn dispatch_to_all_listeners(&self, event: &DomainEvent) -> BatchReport {
        let ids = self.inner.handlers.listener_ids();
        let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        self.dispatch_to_listeners(event, &ids)
    }

    pub fn get_stats(&self) -> DispatcherStats {
        let settings = self.settings();
        let dead_letters = self.inner.dead_letters.len().unwrap_or_else(|e| {
            error!(error = %e, "dead-letter store unavailable while collecting stats");
            0
        });
        DispatcherStats {
            queue_size: self.pending().len(),
            processing_count: self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            max_retries: settings.policy.max_retries,
            retry_delay: settings.policy.base_delay.as_secs(),
            dead_letters,
        }
    }

    pub fn configure(&self, changes: DispatcherSettings) {
        let mut settings = self.inner.settings.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(max_retries) = changes.max_retries {
            settings.policy.max_retries = max_retries;
        }
        if let Some(secs) = changes.retry_delay {
            settings.policy.base_delay = Duration::from_secs(secs);
        }
        info!(
            max_retries = settings.policy.max_retries,
            retry_delay_secs = settings.policy.base_delay.as_secs(),
            "dispatcher reconfigured"
        );
    }

    /// Drop every pending event and revoke their scheduled retries. Returns how
    /// many were dropped.
    pub fn clear_queue(&self) -> usize {
        let n = {
            let mut pending = self.pending();
            let n = pending.len();
            pending.clear();
            n
        };
        self.tickets().clear();
        info!(cleared = n, "pending queue cleared");
        n
    }

    pub fn get_pending_events(&self) -> Vec<DomainEvent> {
        self.pending().clone()
    }

    pub fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, DispatchError> {
        Ok(self.inner.dead_letters.list(limit)?)
    }

    /// Take `event_id` out of the dead-letter store and try it again with a fresh
    /// retry budget.
    #[instrument(skip(self))]
    pub fn redrive_dead_letter(&self, event_id: EventId) -> Result<ProcessOutcome, DispatchError> {
        let entry = self
            .inner
            .dead_letters
            .take(event_id)?
            .ok_or(DispatchError::NotDeadLettered(event_id))?;
        self.inner.dedup.reset_retries(event_id)?;
        self.pending().push(entry.event.clone());
        info!(previous_attempts = entry.attempts, "redriving dead-lettered event");
        Ok(self.attempt(&entry.event, Attempt::Direct))
    }

    fn settings(&self) -> Settings {
        *self.inner.settings.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, Vec<DomainEvent>> {
        self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove_pending(&self, event_id: EventId) {
        self.pending().retain(|e| e.event_id() != event_id);
    }

    fn is_pending(&self, event_id: EventId) -> bool {
        self.pending().iter().any(|e| e.event_id() == event_id)
    }

    fn tickets(&self) -> std::sync::MutexGuard<'_, HashMap<EventId, u64>> {
        self.inner.retry_tickets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// New current ticket for `event_id`; any older one stops being honoured.
    fn issue_retry(&self, event_id: EventId) -> u64 {
        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        self.tickets().insert(event_id, ticket);
        ticket
    }

    /// Consume `ticket` if it is still current.
    fn redeem_retry(&self, event_id: EventId, ticket: u64) -> bool {
        let mut tickets = self.tickets();
        if tickets.get(&event_id) == Some(&ticket) {
            tickets.remove(&event_id);
            true
        } else {
            false
        }
    }

    fn revoke_retry(&self, event_id: EventId) {
        self.tickets().remove(&event_id);
    }
}

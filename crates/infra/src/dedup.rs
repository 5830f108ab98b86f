//! Processed-markers and retry counters for events, kept in the shared cache.

use std::time::Duration;

use nexuscrm_events::EventId;

use crate::cache::{CacheError, SharedCache};

const PROCESSED_PREFIX: &str = "cross_module_event_processed:";
const RETRY_PREFIX: &str = "cross_module_event_retry:";

pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(3600);

/// Dedup window and retry bookkeeping for [`EventId`]s.
///
/// Both markers live for `ttl` (1 hour by default). The shared cache, not any
/// in-process set, is the authority for "has this event already been taken".
#[derive(Debug, Clone)]
pub struct DeduplicationStore<C> {
    cache: C,
    ttl: Duration,
}

impl<C: SharedCache> DeduplicationStore<C> {
    pub fn new(cache: C) -> Self {
        Self::with_ttl(cache, DEFAULT_DEDUP_TTL)
    }

    pub fn with_ttl(cache: C, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Atomically claim `event_id`. Returns `false` if it was already claimed.
    pub fn mark_processed(&self, event_id: EventId) -> Result<bool, CacheError> {
        self.cache
            .put_if_absent(&processed_key(event_id), "1", self.ttl)
    }

    pub fn is_processed(&self, event_id: EventId) -> Result<bool, CacheError> {
        self.cache.has(&processed_key(event_id))
    }

    /// Retries already scheduled for `event_id`.
    pub fn retry_count(&self, event_id: EventId) -> Result<u32, CacheError> {
        let key = retry_key(event_id);
        match self.cache.get(&key)? {
            Some(v) => v
                .parse::<u32>()
                .map_err(|_| CacheError::NotACounter { key }),
            None => Ok(0),
        }
    }

    /// Record one more retry. Returns the new count.
    pub fn increment_retry(&self, event_id: EventId) -> Result<u32, CacheError> {
        let n = self.cache.increment(&retry_key(event_id), self.ttl)?;
        Ok(u32::try_from(n).unwrap_or(u32::MAX))
    }

    pub fn reset_retries(&self, event_id: EventId) -> Result<(), CacheError> {
        self.cache.forget(&retry_key(event_id)).map(|_| ())
    }
}

fn processed_key(event_id: EventId) -> String {
    format!("{PROCESSED_PREFIX}{event_id}")
}

fn retry_key(event_id: EventId) -> String {
    format!("{RETRY_PREFIX}{event_id}")
}

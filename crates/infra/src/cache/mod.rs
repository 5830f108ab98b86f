//! Process-shared key/value cache with TTL.
//!
//! This is the only cross-process shared state the cross-module layer relies on:
//! dedup markers, retry counters, and memoized validation results all live here.
//! `put_if_absent` and `increment` must be atomic in every implementation.

use std::sync::Arc;
use std::time::Duration;

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_cache;

pub use in_memory::InMemorySharedCache;
#[cfg(feature = "redis")]
pub use redis_cache::RedisSharedCache;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("cache lock poisoned")]
    Poisoned,
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("value at '{key}' is not a counter")]
    NotACounter { key: String },
}

pub trait SharedCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store `value` under `key`, replacing any previous value and TTL.
    fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    fn has(&self, key: &str) -> Result<bool, CacheError>;

    /// Atomically store `value` only if `key` is absent.
    ///
    /// Returns `true` if this call stored the value.
    fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Atomically increment the integer at `key` (absent counts as 0) and refresh
    /// its TTL. Returns the new value.
    fn increment(&self, key: &str, ttl: Duration) -> Result<u64, CacheError>;

    /// Remove `key`. Returns `true` if it was present.
    fn forget(&self, key: &str) -> Result<bool, CacheError>;
}

impl<C> SharedCache for Arc<C>
where
    C: SharedCache + ?Sized,
{
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        (**self).put(key, value, ttl)
    }

    fn has(&self, key: &str) -> Result<bool, CacheError> {
        (**self).has(key)
    }

    fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        (**self).put_if_absent(key, value, ttl)
    }

    fn increment(&self, key: &str, ttl: Duration) -> Result<u64, CacheError> {
        (**self).increment(key, ttl)
    }

    fn forget(&self, key: &str) -> Result<bool, CacheError> {
        (**self).forget(key)
    }
}

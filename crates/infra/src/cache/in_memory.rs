//! In-memory shared cache for tests/dev (single process only).

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use super::{CacheError, SharedCache};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: String, ttl: Duration, now: Instant) -> Self {
        Self {
            value,
            expires_at: now.checked_add(ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// Writes between full sweeps of expired entries.
const SWEEP_EVERY: usize = 256;

/// Mutex-guarded map. Expired entries are dropped on access and by a full sweep
/// every [`SWEEP_EVERY`] writes, so keys that are never touched again still go.
#[derive(Debug, Default)]
pub struct InMemorySharedCache {
    entries: Mutex<HashMap<String, Entry>>,
    writes: AtomicUsize,
}

impl InMemorySharedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> Result<usize, CacheError> {
        let now = Instant::now();
        let entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(entries.values().filter(|e| e.is_live(now)).count())
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }

    /// Drop every expired entry now. Returns how many were dropped.
    pub fn purge_expired(&self) -> Result<usize, CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(Self::sweep(&mut entries, Instant::now()))
    }

    fn sweep(entries: &mut HashMap<String, Entry>, now: Instant) -> usize {
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }

    /// Count a write; sweep when the count reaches the interval.
    fn note_write(&self, entries: &mut HashMap<String, Entry>, now: Instant) {
        let n = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if n % SWEEP_EVERY == 0 {
            Self::sweep(entries, now);
        }
    }

    fn live_value(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) -> Option<String> {
        match entries.get(key) {
            Some(e) if e.is_live(now) => Some(e.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

impl SharedCache for InMemorySharedCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(Self::live_value(&mut entries, key, Instant::now()))
    }

    fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        self.note_write(&mut entries, now);
        entries.insert(key.to_string(), Entry::new(value.to_string(), ttl, now));
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(key)?.is_some())
    }

    fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        if Self::live_value(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        self.note_write(&mut entries, now);
        entries.insert(key.to_string(), Entry::new(value.to_string(), ttl, now));
        Ok(true)
    }

    fn increment(&self, key: &str, ttl: Duration) -> Result<u64, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        let current = match Self::live_value(&mut entries, key, now) {
            Some(v) => v.parse::<u64>().map_err(|_| CacheError::NotACounter {
                key: key.to_string(),
            })?,
            None => 0,
        };
        let next = current.saturating_add(1);
        self.note_write(&mut entries, now);
        entries.insert(key.to_string(), Entry::new(next.to_string(), ttl, now));
        Ok(next)
    }

    fn forget(&self, key: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(entries.remove(key).is_some_and(|e| e.is_live(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn put_get_has_forget() {
        let cache = InMemorySharedCache::new();
        assert!(!cache.has("k").unwrap());

        cache.put("k", "v", HOUR).unwrap();
        assert_eq!(cache.get("k").unwrap().as_deref(), Some("v"));
        assert!(cache.has("k").unwrap());

        assert!(cache.forget("k").unwrap());
        assert!(!cache.forget("k").unwrap());
        assert!(cache.get("k").unwrap().is_none());
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = InMemorySharedCache::new();
        cache.put("short", "v", Duration::from_millis(5)).unwrap();
        thread::sleep(Duration::from_millis(20));

        assert!(!cache.has("short").unwrap());
        assert!(cache.put_if_absent("short", "again", HOUR).unwrap());
    }

    #[test]
    fn untouched_expired_keys_are_swept_by_later_writes() {
        let cache = InMemorySharedCache::new();
        for i in 0..3 {
            cache.put(&format!("old-{i}"), "v", Duration::from_millis(5)).unwrap();
        }
        thread::sleep(Duration::from_millis(20));

        for i in 0..SWEEP_EVERY {
            assert!(cache.put_if_absent(&format!("new-{i}"), "1", HOUR).unwrap());
        }
        assert_eq!(cache.entries.lock().unwrap().len(), SWEEP_EVERY);
    }

    #[test]
    fn purge_expired_reports_what_it_dropped() {
        let cache = InMemorySharedCache::new();
        cache.put("short", "v", Duration::from_millis(5)).unwrap();
        cache.put("long", "v", HOUR).unwrap();
        thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.purge_expired().unwrap(), 1);
        assert_eq!(cache.purge_expired().unwrap(), 0);
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn put_if_absent_only_stores_once() {
        let cache = InMemorySharedCache::new();
        assert!(cache.put_if_absent("seen", "1", HOUR).unwrap());
        assert!(!cache.put_if_absent("seen", "2", HOUR).unwrap());
        assert_eq!(cache.get("seen").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn concurrent_put_if_absent_has_a_single_winner() {
        let cache = Arc::new(InMemorySharedCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                thread::spawn(move || cache.put_if_absent("race", "1", HOUR).unwrap())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn increment_counts_from_zero() {
        let cache = InMemorySharedCache::new();
        assert_eq!(cache.increment("n", HOUR).unwrap(), 1);
        assert_eq!(cache.increment("n", HOUR).unwrap(), 2);
        assert_eq!(cache.get("n").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn increment_rejects_non_numeric_values() {
        let cache = InMemorySharedCache::new();
        cache.put("n", "abc", HOUR).unwrap();
        assert!(matches!(
            cache.increment("n", HOUR),
            Err(CacheError::NotACounter { .. })
        ));
    }
}

//! Memoized cross-entity validation.
//!
//! Results of the external [`RuleEvaluator`] are stored in the shared cache under
//! `cross_module_validation:{rule}:{sha256}` where the digest covers the rule name,
//! the operand ids and the canonical JSON of the rule's context. An empty error
//! list means "valid"; a missing entry is simply re-evaluated.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error, instrument, warn};

use nexuscrm_infra::{CacheError, SharedCache};

use crate::collaborators::RuleEvaluator;
use crate::rules::ValidationRule;

const KEY_PREFIX: &str = "cross_module_validation:";

pub const DEFAULT_VALIDATION_TTL: Duration = Duration::from_secs(300);

/// Tracked keys are checked against the cache whenever their count reaches a
/// multiple of this.
const PRUNE_EVERY: usize = 256;

/// Returned in place of the evaluator's answer when the evaluator itself fails.
pub const INTERNAL_VALIDATION_ERROR: &str = "internal validation error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValidationStats {
    pub cache_size: usize,
    pub cache_timeout_secs: u64,
}

pub struct ValidationCache<C, E> {
    cache: C,
    evaluator: E,
    ttl: RwLock<Duration>,
    /// Keys this instance wrote that may still be live.
    written: Mutex<HashSet<String>>,
}

impl<C, E> ValidationCache<C, E>
where
    C: SharedCache,
    E: RuleEvaluator,
{
    pub fn new(cache: C, evaluator: E) -> Self {
        Self::with_ttl(cache, evaluator, DEFAULT_VALIDATION_TTL)
    }

    pub fn with_ttl(cache: C, evaluator: E, ttl: Duration) -> Self {
        Self {
            cache,
            evaluator,
            ttl: RwLock::new(ttl),
            written: Mutex::new(HashSet::new()),
        }
    }

    /// Validate `rule`, consulting the cache first. Never fails.
    #[instrument(skip_all, fields(rule = rule.name()))]
    pub fn validate(&self, rule: &ValidationRule) -> Vec<String> {
        let key = cache_key(rule);

        match self.cache.get(&key) {
            Ok(Some(cached)) => match serde_json::from_str::<Vec<String>>(&cached) {
                Ok(errors) => {
                    debug!(%key, "validation cache hit");
                    return errors;
                }
                Err(e) => warn!(%key, error = %e, "discarding unreadable validation cache entry"),
            },
            Ok(None) => {}
            Err(e) => warn!(%key, error = %e, "validation cache unavailable, evaluating directly"),
        }

        let errors = match self.evaluator.evaluate(rule) {
            Ok(errors) => errors,
            Err(e) => {
                error!(error = %e, "rule evaluator failed");
                return vec![INTERNAL_VALIDATION_ERROR.to_string()];
            }
        };

        if let Err(e) = self.store(&key, &errors) {
            warn!(%key, error = %e, "failed to memoize validation result");
        }
        errors
    }

    /// Validate each rule independently, in order.
    pub fn validate_batch(&self, rules: &[ValidationRule]) -> Vec<Vec<String>> {
        rules.iter().map(|r| self.validate(r)).collect()
    }

    /// Applies to entries written from now on.
    pub fn set_cache_timeout(&self, ttl: Duration) {
        *self.ttl.write().unwrap_or_else(PoisonError::into_inner) = ttl;
    }

    pub fn cache_timeout(&self) -> Duration {
        *self.ttl.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget every live entry this instance wrote. Returns how many were dropped.
    pub fn clear_cache(&self) -> Result<usize, CacheError> {
        let keys: Vec<String> = self
            .written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        let mut cleared = 0;
        for key in &keys {
            if self.cache.forget(key)? {
                cleared += 1;
            }
        }
        debug!(cleared, "validation cache cleared");
        Ok(cleared)
    }

    /// `cache_size` counts only entries that have not expired.
    pub fn stats(&self) -> ValidationStats {
        ValidationStats {
            cache_size: self.prune_expired(),
            cache_timeout_secs: self.cache_timeout().as_secs(),
        }
    }

    /// Stop tracking keys the cache no longer holds. Returns how many remain.
    fn prune_expired(&self) -> usize {
        let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
        // Unreachable cache: keep the key rather than lose track of it.
        written.retain(|key| self.cache.has(key).unwrap_or(true));
        written.len()
    }

    fn store(&self, key: &str, errors: &[String]) -> Result<(), CacheError> {
        let value =
            serde_json::to_string(errors).map_err(|e| CacheError::Backend(e.to_string()))?;
        self.cache.put(key, &value, self.cache_timeout())?;
        let tracked = {
            let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
            written.insert(key.to_string());
            written.len()
        };
        if tracked % PRUNE_EVERY == 0 {
            let remaining = self.prune_expired();
            debug!(tracked, remaining, "pruned expired validation keys");
        }
        Ok(())
    }
}

/// Deterministic cache key for `rule`.
pub fn cache_key(rule: &ValidationRule) -> String {
    let mut material = String::from(rule.name());
    material.push('|');
    material.push_str(&rule.operand_ids().join(","));
    if let Some(context) = rule.context() {
        material.push('|');
        // serde_json maps are ordered by key, so equal contexts serialize equally.
        material.push_str(&serde_json::Value::Object(context.clone()).to_string());
    }
    format!("{KEY_PREFIX}{}:{}", rule.name(), digest_hex(&material))
}

fn digest_hex(material: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(material.as_bytes());
    let digest = hasher.finalize();
    format!("{digest:x}")
}

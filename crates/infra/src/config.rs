//! Configuration loading and representation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub max_event_age_secs: u64,
    pub dedup_ttl_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_secs: 5,
            max_event_age_secs: 3600,
            dedup_ttl_secs: 3600,
        }
    }
}

impl DispatcherConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(self.max_retries, Duration::from_secs(self.retry_delay_secs))
    }

    pub fn max_event_age(&self) -> Duration {
        Duration::from_secs(self.max_event_age_secs)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub cache_ttl_secs: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self { cache_ttl_secs: 300 }
    }
}

impl ValidationConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Settings for the cross-module layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossModuleConfig {
    pub dispatcher: DispatcherConfig,
    pub validation: ValidationConfig,
    pub redis_url: Option<String>,
}

impl CrossModuleConfig {
    /// Defaults overlaid with `NEXUSCRM_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`CrossModuleConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let d = &mut cfg.dispatcher;

        overlay(&lookup, "NEXUSCRM_MAX_RETRIES", &mut d.max_retries)?;
        overlay(&lookup, "NEXUSCRM_RETRY_DELAY_SECS", &mut d.retry_delay_secs)?;
        overlay(&lookup, "NEXUSCRM_MAX_EVENT_AGE_SECS", &mut d.max_event_age_secs)?;
        overlay(&lookup, "NEXUSCRM_DEDUP_TTL_SECS", &mut d.dedup_ttl_secs)?;
        overlay(
            &lookup,
            "NEXUSCRM_VALIDATION_CACHE_TTL_SECS",
            &mut cfg.validation.cache_ttl_secs,
        )?;

        cfg.redis_url = lookup("NEXUSCRM_REDIS_URL").filter(|v| !v.trim().is_empty());
        Ok(cfg)
    }
}

fn overlay<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        *target = raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw.clone(),
        })?;
    }
    Ok(())
}

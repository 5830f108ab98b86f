//! Infrastructure layer: shared cache, scheduling, transactions, config.
//!
//! Every collaborator the cross-module services depend on is a trait here, with an
//! in-memory implementation for tests/dev and (behind the `redis` feature) a Redis
//! shared cache for multi-process deployments.

pub mod cache;
pub mod config;
pub mod dead_letter;
pub mod dedup;
pub mod retry;
pub mod scheduler;
pub mod transaction;

pub use cache::{CacheError, InMemorySharedCache, SharedCache};
#[cfg(feature = "redis")]
pub use cache::RedisSharedCache;
pub use config::{ConfigError, CrossModuleConfig, DispatcherConfig, ValidationConfig};
pub use dead_letter::{DeadLetterEntry, DeadLetterError, DeadLetterStore, InMemoryDeadLetterStore};
pub use dedup::{DEFAULT_DEDUP_TTL, DeduplicationStore};
pub use retry::{BackoffStrategy, RetryOutcome, RetryPolicy};
pub use scheduler::{
    ManualScheduler, ScheduledTask, SchedulerError, SchedulerStats, TaskScheduler, ThreadScheduler,
};
pub use transaction::{TransactionError, TransactionManager, TxId};

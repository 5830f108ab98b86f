//! Cross-module layer: event dispatch, module integration, validation,
//! relationship lookups and transactional orchestration.
//!
//! ```text
//! OrchestrationService ──emit──▶ EventDispatcher ──▶ IntegrationService ──▶ listeners / actions
//!        │                            │
//!        ├─ ValidationCache ─▶ RuleEvaluator        └─ retry (TaskScheduler) / dead letters
//!        └─ ModuleWriter + TransactionManager
//! RelationshipService ──▶ EntityReader
//! ```
//!
//! Everything outside this crate (module storage, rule evaluation, timers, the
//! shared cache) is reached through the traits in [`collaborators`] and
//! `nexuscrm_infra`.

pub mod collaborators;
pub mod dispatcher;
pub mod error;
pub mod integration_service;
pub mod memory;
pub mod orchestration;
pub mod relationship;
pub mod rules;
pub mod validation_cache;


pub use collaborators::{
    EntityReader, EntityRecord, ForeignKey, ModuleWriter, RuleEvaluator, StepOutcome, WriteStep,
};
pub use dispatcher::{
    BatchReport, DispatchOutcome, DispatcherSettings, DispatcherStats, DrainReport,
    EventDispatcher, EventProcessor, FnProcessor, ProcessOutcome,
};
pub use error::{DispatchError, IntegrationError, OrchestrationError, ValidationFailure};
pub use integration_service::{HandlerSet, IntegrationService, IntegrationStats};
pub use memory::InMemoryModuleStore;
pub use orchestration::{
    BatchOperation, EventEmitter, OperationKind, OrchestrationResult, OrchestrationService,
    OrchestrationStats, RuleValidator, ServiceStats, UNSUPPORTED_OPERATION,
};
pub use relationship::{RelationshipService, RelationshipStatistics};
pub use rules::{OwnershipRules, ValidationRule};
pub use validation_cache::{ValidationCache, ValidationStats, cache_key};

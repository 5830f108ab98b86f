//! Multi-step, transactional orchestration flows.
//!
//! Every flow runs inside one transaction:
//!
//! ```text
//! begin -> validate (rule, via ValidationCache) -> primary write
//!       -> [primary succeeded] secondary writes -> emit terminal event
//!       -> commit
//! any Err -> rollback, result = { "error": ... }
//! ```
//!
//! A step reporting `success: false` is recorded and the flow moves on; a step
//! returning `Err` aborts the flow and discards every write made so far.

mod batch;
mod flows;

pub use batch::{BatchOperation, OperationKind, UNSUPPORTED_OPERATION};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::{debug, error, info};

use nexuscrm_events::{CrossModuleEvent, DomainEvent};
use nexuscrm_infra::{
    DeadLetterStore, SharedCache, TaskScheduler, TransactionManager, TxId,
};

use crate::collaborators::{ModuleWriter, RuleEvaluator, StepOutcome, WriteStep};
use crate::dispatcher::{DispatcherStats, EventDispatcher, EventProcessor};
use crate::error::OrchestrationError;
use crate::integration_service::{IntegrationService, IntegrationStats};
use crate::rules::ValidationRule;
use crate::validation_cache::{ValidationCache, ValidationStats};

/// Where flows send their terminal events.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: DomainEvent);

    fn stats(&self) -> DispatcherStats;
}

impl<P, C, S, D> EventEmitter for EventDispatcher<P, C, S, D>
where
    P: EventProcessor + 'static,
    C: SharedCache + 'static,
    S: TaskScheduler + 'static,
    D: DeadLetterStore + 'static,
{
    fn emit(&self, event: DomainEvent) {
        // Rejections and processing failures are handled (and logged) by the dispatcher.
        self.dispatch(event);
    }

    fn stats(&self) -> DispatcherStats {
        self.get_stats()
    }
}

/// Cross-entity precondition checks used by flows.
pub trait RuleValidator: Send + Sync {
    fn validate(&self, rule: &ValidationRule) -> Vec<String>;

    fn stats(&self) -> ValidationStats;
}

impl<C, E> RuleValidator for ValidationCache<C, E>
where
    C: SharedCache,
    E: RuleEvaluator,
{
    fn validate(&self, rule: &ValidationRule) -> Vec<String> {
        ValidationCache::validate(self, rule)
    }

    fn stats(&self) -> ValidationStats {
        ValidationCache::stats(self)
    }
}

/// Outcome of one flow invocation.
///
/// Serializes as a map: step name to step outcome in execution order, or a map
/// holding only `error`.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestrationResult {
    Completed { steps: Vec<(&'static str, StepOutcome)> },
    Failed { error: String },
}

impl OrchestrationResult {
    pub fn failed(error: impl Into<String>) -> Self {
        OrchestrationResult::Failed {
            error: error.into(),
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            OrchestrationResult::Failed { error } => Some(error),
            OrchestrationResult::Completed { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error().is_some()
    }

    pub fn step(&self, name: &str) -> Option<&StepOutcome> {
        match self {
            OrchestrationResult::Completed { steps } => {
                steps.iter().find(|(n, _)| *n == name).map(|(_, o)| o)
            }
            OrchestrationResult::Failed { .. } => None,
        }
    }

    /// Step names in execution order.
    pub fn step_names(&self) -> Vec<&'static str> {
        match self {
            OrchestrationResult::Completed { steps } => steps.iter().map(|(n, _)| *n).collect(),
            OrchestrationResult::Failed { .. } => Vec::new(),
        }
    }
}

impl Serialize for OrchestrationResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            OrchestrationResult::Completed { steps } => {
                let mut map = serializer.serialize_map(Some(steps.len()))?;
                for (name, outcome) in steps {
                    map.serialize_entry(name, outcome)?;
                }
                map.end()
            }
            OrchestrationResult::Failed { error } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", error)?;
                map.end()
            }
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ServiceStats {
    pub module_integration: IntegrationStats,
    pub validation: ValidationStats,
    pub event_dispatcher: DispatcherStats,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct OrchestrationStats {
    pub timestamp: DateTime<Utc>,
    pub services: ServiceStats,
}

/// A flow, fully described before it runs.
pub(crate) struct Flow {
    pub name: &'static str,
    pub rule: Option<ValidationRule>,
    pub primary: WriteStep,
    pub secondaries: Vec<WriteStep>,
    pub event: Option<CrossModuleEvent>,
}

pub struct OrchestrationService {
    transactions: Arc<dyn TransactionManager>,
    writer: Arc<dyn ModuleWriter>,
    validator: Arc<dyn RuleValidator>,
    events: Arc<dyn EventEmitter>,
    integration: Arc<IntegrationService>,
}

impl OrchestrationService {
    pub fn new(
        transactions: Arc<dyn TransactionManager>,
        writer: Arc<dyn ModuleWriter>,
        validator: Arc<dyn RuleValidator>,
        events: Arc<dyn EventEmitter>,
        integration: Arc<IntegrationService>,
    ) -> Self {
        Self {
            transactions,
            writer,
            validator,
            events,
            integration,
        }
    }

    pub fn get_orchestration_stats(&self) -> OrchestrationStats {
        OrchestrationStats {
            timestamp: Utc::now(),
            services: ServiceStats {
                module_integration: self.integration.stats(),
                validation: self.validator.stats(),
                event_dispatcher: self.events.stats(),
            },
        }
    }

    pub(crate) fn run_flow(&self, flow: Flow) -> OrchestrationResult {
        let name = flow.name;
        let tx = match self.transactions.begin() {
            Ok(tx) => tx,
            Err(e) => {
                error!(flow = name, error = %e, "could not open transaction");
                return OrchestrationResult::failed(OrchestrationError::from(e).to_string());
            }
        };
        debug!(flow = name, %tx, "orchestration started");

        let outcome = self
            .run_steps(&tx, flow)
            .and_then(|steps| {
                self.transactions.commit(&tx)?;
                Ok(steps)
            });

        match outcome {
            Ok(steps) => {
                info!(flow = name, %tx, steps = steps.len(), "orchestration committed");
                OrchestrationResult::Completed { steps }
            }
            Err(e) => {
                if let Err(rollback) = self.transactions.rollback(&tx) {
                    error!(flow = name, %tx, error = %rollback, "rollback failed");
                }
                error!(flow = name, %tx, error = %e, "orchestration failed, rolled back");
                OrchestrationResult::failed(e.to_string())
            }
        }
    }

    fn run_steps(
        &self,
        tx: &TxId,
        flow: Flow,
    ) -> Result<Vec<(&'static str, StepOutcome)>, OrchestrationError> {
        if let Some(rule) = &flow.rule {
            let errors = self.validator.validate(rule);
            if !errors.is_empty() {
                return Err(OrchestrationError::Validation(errors));
            }
        }

        let primary = self.write(tx, &flow.primary)?;
        let primary_ok = primary.success;
        let mut steps = Vec::with_capacity(1 + flow.secondaries.len());
        steps.push((flow.primary.name, primary));

        if !primary_ok {
            debug!(flow = flow.name, "primary write reported failure, skipping dependents");
            return Ok(steps);
        }

        for step in &flow.secondaries {
            let outcome = self.write(tx, step)?;
            if !outcome.success {
                debug!(flow = flow.name, step = step.name, "secondary write reported failure");
            }
            steps.push((step.name, outcome));
        }

        if let Some(event) = flow.event {
            self.events.emit(event.into_domain_event());
        }
        Ok(steps)
    }

    fn write(&self, tx: &TxId, step: &WriteStep) -> Result<StepOutcome, OrchestrationError> {
        self.writer
            .write(tx, step)
            .map_err(|e| OrchestrationError::Step {
                step: step.name,
                message: format!("{e:#}"),
            })
    }
}

//! Boundaries to the business modules.
//!
//! The cross-module layer never touches module storage directly. It reads through
//! [`EntityReader`], writes through [`ModuleWriter`] (inside a transaction opened on
//! a `TransactionManager`), and asks a [`RuleEvaluator`] whether cross-entity
//! preconditions hold. Adapters return `anyhow::Result`; the services convert
//! failures into their own error taxonomy.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use nexuscrm_core::{EntityId, LeadId, ModuleKind, ProjectId, UserId};
use nexuscrm_infra::TxId;

use crate::rules::ValidationRule;

/// Evaluates one validation rule. An empty list means "valid".
pub trait RuleEvaluator: Send + Sync {
    fn evaluate(&self, rule: &ValidationRule) -> anyhow::Result<Vec<String>>;
}

impl<F> RuleEvaluator for F
where
    F: Fn(&ValidationRule) -> anyhow::Result<Vec<String>> + Send + Sync,
{
    fn evaluate(&self, rule: &ValidationRule) -> anyhow::Result<Vec<String>> {
        self(rule)
    }
}

/// A record as seen across module boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: EntityId,
    pub module: ModuleKind,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    #[serde(default)]
    pub lead_id: Option<LeadId>,
    #[serde(default)]
    pub attributes: Map<String, JsonValue>,
}

/// Foreign key used to list records related to a root entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForeignKey {
    User(UserId),
    Project(ProjectId),
    Lead(LeadId),
}

impl ForeignKey {
    pub fn matches(&self, record: &EntityRecord) -> bool {
        match self {
            ForeignKey::User(id) => record.user_id == Some(*id),
            ForeignKey::Project(id) => record.project_id == Some(*id),
            ForeignKey::Lead(id) => record.lead_id == Some(*id),
        }
    }
}

/// Read access to every module (`getById` / `getByXId`).
pub trait EntityReader: Send + Sync {
    fn get_by_id(&self, module: ModuleKind, id: EntityId) -> anyhow::Result<Option<EntityRecord>>;

    fn list_by(&self, module: ModuleKind, key: ForeignKey) -> anyhow::Result<Vec<EntityRecord>>;
}

impl<R> EntityReader for Arc<R>
where
    R: EntityReader + ?Sized,
{
    fn get_by_id(&self, module: ModuleKind, id: EntityId) -> anyhow::Result<Option<EntityRecord>> {
        (**self).get_by_id(module, id)
    }

    fn list_by(&self, module: ModuleKind, key: ForeignKey) -> anyhow::Result<Vec<EntityRecord>> {
        (**self).list_by(module, key)
    }
}

/// One write an orchestration flow asks a module to perform.
///
/// `name` is the key under which the outcome is reported. `entity_id` is set when
/// the caller already owns the record's identity (primary writes).
#[derive(Debug, Clone, PartialEq)]
pub struct WriteStep {
    pub name: &'static str,
    pub module: ModuleKind,
    pub entity_id: Option<EntityId>,
    pub user_id: Option<UserId>,
    pub project_id: Option<ProjectId>,
    pub lead_id: Option<LeadId>,
    pub attributes: Map<String, JsonValue>,
}

impl WriteStep {
    pub fn new(name: &'static str, module: ModuleKind) -> Self {
        Self {
            name,
            module,
            entity_id: None,
            user_id: None,
            project_id: None,
            lead_id: None,
            attributes: Map::new(),
        }
    }

    pub fn entity(mut self, id: EntityId) -> Self {
        self.entity_id = Some(id);
        self
    }

    pub fn user(mut self, id: UserId) -> Self {
        self.user_id = Some(id);
        self
    }

    pub fn project(mut self, id: Option<ProjectId>) -> Self {
        self.project_id = id;
        self
    }

    pub fn lead(mut self, id: LeadId) -> Self {
        self.lead_id = Some(id);
        self
    }

    pub fn attr(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }
}

/// Recorded outcome of one write step.
///
/// `success: false` is a handled failure that the flow records and moves past;
/// returning `Err` from [`ModuleWriter::write`] aborts and rolls back the flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub success: bool,
    #[serde(flatten)]
    pub details: Map<String, JsonValue>,
}

impl StepOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            details: Map::new(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        let mut details = Map::new();
        details.insert("error".to_string(), JsonValue::String(reason.into()));
        Self {
            success: false,
            details,
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// Transactional write access to every module.
pub trait ModuleWriter: Send + Sync {
    fn write(&self, tx: &TxId, step: &WriteStep) -> anyhow::Result<StepOutcome>;
}

impl<W> ModuleWriter for Arc<W>
where
    W: ModuleWriter + ?Sized,
{
    fn write(&self, tx: &TxId, step: &WriteStep) -> anyhow::Result<StepOutcome> {
        (**self).write(tx, step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_outcome_flattens_details() {
        let outcome = StepOutcome::ok().with("media_folder_id", "abc");
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({"success": true, "media_folder_id": "abc"})
        );
    }

    #[test]
    fn foreign_key_matches_on_its_own_column() {
        let user_id = UserId::new();
        let record = EntityRecord {
            id: EntityId::new(),
            module: ModuleKind::Posts,
            user_id: Some(user_id),
            project_id: None,
            lead_id: None,
            attributes: Map::new(),
        };
        assert!(ForeignKey::User(user_id).matches(&record));
        assert!(!ForeignKey::Project(ProjectId::new()).matches(&record));
    }
}

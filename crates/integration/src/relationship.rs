//! Read-side fan-out over every module related to a root entity.
//!
//! Never fails: a missing or unreadable root yields an empty map, and a module
//! that cannot be read is left out of the result.

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, error, instrument};

use nexuscrm_core::{EntityId, LeadId, ModuleKind, ProjectId, RootKind, UserId};

use crate::collaborators::{EntityReader, ForeignKey};

const USER_MODULES: [ModuleKind; 8] = [
    ModuleKind::Projects,
    ModuleKind::Leads,
    ModuleKind::EmailCampaigns,
    ModuleKind::Posts,
    ModuleKind::UniverseInstances,
    ModuleKind::Workflows,
    ModuleKind::AuraChats,
    ModuleKind::Analytics,
];

const PROJECT_MODULES: [ModuleKind; 7] = [
    ModuleKind::Leads,
    ModuleKind::EmailCampaigns,
    ModuleKind::Posts,
    ModuleKind::UniverseInstances,
    ModuleKind::Workflows,
    ModuleKind::AuraChats,
    ModuleKind::Analytics,
];

const LEAD_MODULES: [ModuleKind; 6] = [
    ModuleKind::EmailCampaigns,
    ModuleKind::Posts,
    ModuleKind::UniverseInstances,
    ModuleKind::Workflows,
    ModuleKind::AuraChats,
    ModuleKind::Analytics,
];

/// Per-user entity counts. Modules that cannot be read count as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelationshipStatistics {
    pub total_projects: usize,
    pub total_leads: usize,
    pub total_email_campaigns: usize,
    pub total_posts: usize,
    pub total_universe_instances: usize,
    pub total_workflows: usize,
    pub total_aura_chats: usize,
    pub total_analytics_metrics: usize,
}

#[derive(Debug, Clone)]
pub struct RelationshipService<R> {
    reader: R,
}

impl<R: EntityReader> RelationshipService<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Root record, its owners, and one list per related module.
    #[instrument(skip(self))]
    pub fn get_related_entities(&self, root: RootKind, id: EntityId) -> Map<String, JsonValue> {
        let record = match self.reader.get_by_id(root.module(), id) {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("root entity not found");
                return Map::new();
            }
            Err(e) => {
                error!(error = %e, "root entity lookup failed");
                return Map::new();
            }
        };

        let mut related = Map::new();
        related.insert(root.as_str().to_string(), to_json(&record));

        let (key, modules): (ForeignKey, &[ModuleKind]) = match root {
            RootKind::User => (ForeignKey::User(UserId::from_uuid(*id.as_uuid())), &USER_MODULES[..]),
            RootKind::Project => {
                let owner = record.user_id.map(|u| u.as_entity_id());
                self.insert_owner(&mut related, "user", ModuleKind::Users, owner);
                (ForeignKey::Project(ProjectId::from_uuid(*id.as_uuid())), &PROJECT_MODULES[..])
            }
            RootKind::Lead => {
                let owner = record.user_id.map(|u| u.as_entity_id());
                self.insert_owner(&mut related, "user", ModuleKind::Users, owner);
                self.insert_owner(
                    &mut related,
                    "project",
                    ModuleKind::Projects,
                    record.project_id.map(|p| p.as_entity_id()),
                );
                (ForeignKey::Lead(LeadId::from_uuid(*id.as_uuid())), &LEAD_MODULES[..])
            }
        };

        for module in modules {
            match self.reader.list_by(*module, key) {
                Ok(records) => {
                    related.insert(module.as_str().to_string(), to_json(&records));
                }
                Err(e) => error!(module = %module, error = %e, "related module lookup failed"),
            }
        }

        related
    }

    pub fn get_user_related_entities(&self, user_id: UserId) -> Map<String, JsonValue> {
        self.get_related_entities(RootKind::User, user_id.as_entity_id())
    }

    pub fn get_project_related_entities(&self, project_id: ProjectId) -> Map<String, JsonValue> {
        self.get_related_entities(RootKind::Project, project_id.as_entity_id())
    }

    pub fn get_lead_related_entities(&self, lead_id: LeadId) -> Map<String, JsonValue> {
        self.get_related_entities(RootKind::Lead, lead_id.as_entity_id())
    }

    #[instrument(skip(self))]
    pub fn get_relationship_statistics(&self, user_id: UserId) -> RelationshipStatistics {
        let count = |module: ModuleKind| match self.reader.list_by(module, ForeignKey::User(user_id)) {
            Ok(records) => records.len(),
            Err(e) => {
                error!(module = %module, error = %e, "statistics lookup failed");
                0
            }
        };

        RelationshipStatistics {
            total_projects: count(ModuleKind::Projects),
            total_leads: count(ModuleKind::Leads),
            total_email_campaigns: count(ModuleKind::EmailCampaigns),
            total_posts: count(ModuleKind::Posts),
            total_universe_instances: count(ModuleKind::UniverseInstances),
            total_workflows: count(ModuleKind::Workflows),
            total_aura_chats: count(ModuleKind::AuraChats),
            total_analytics_metrics: count(ModuleKind::Analytics),
        }
    }

    /// Owner slot is `null` when the root has no such owner or it no longer exists.
    fn insert_owner(
        &self,
        related: &mut Map<String, JsonValue>,
        slot: &str,
        module: ModuleKind,
        id: Option<EntityId>,
    ) {
        let Some(id) = id else {
            related.insert(slot.to_string(), JsonValue::Null);
            return;
        };
        match self.reader.get_by_id(module, id) {
            Ok(owner) => {
                related.insert(
                    slot.to_string(),
                    owner.as_ref().map(to_json).unwrap_or(JsonValue::Null),
                );
            }
            Err(e) => error!(module = %module, error = %e, "owner lookup failed"),
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> JsonValue {
    serde_json::to_value(value).unwrap_or_else(|e| {
        error!(error = %e, "failed to serialize related entity");
        JsonValue::Null
    })
}

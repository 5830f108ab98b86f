//! Cross-entity validation rules and a record-backed evaluator.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use nexuscrm_core::{
    EmailCampaignId, EmailListId, EntityId, LeadId, ModuleKind, PostId, ProjectId,
    SocialAccountId, UserId, WorkflowId,
};

use crate::collaborators::{EntityReader, EntityRecord, RuleEvaluator};

/// A precondition involving entities from more than one module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ValidationRule {
    UserProjectAssociation {
        user_id: UserId,
        project_id: ProjectId,
    },
    LeadToUserConversion {
        lead_id: LeadId,
    },
    PostSocialAccountAssociation {
        post_id: PostId,
        social_account_id: SocialAccountId,
        user_id: UserId,
    },
    EmailCampaignSending {
        campaign_id: EmailCampaignId,
        email_list_id: EmailListId,
        user_id: UserId,
    },
    WorkflowExecution {
        workflow_id: WorkflowId,
        #[serde(default)]
        context: Map<String, JsonValue>,
    },
    EntityDeletion {
        module: ModuleKind,
        entity_id: EntityId,
        user_id: UserId,
    },
    EntityUpdate {
        module: ModuleKind,
        entity_id: EntityId,
        user_id: UserId,
        #[serde(default)]
        changes: Map<String, JsonValue>,
    },
}

impl ValidationRule {
    pub fn name(&self) -> &'static str {
        match self {
            ValidationRule::UserProjectAssociation { .. } => "user_project_association",
            ValidationRule::LeadToUserConversion { .. } => "lead_to_user_conversion",
            ValidationRule::PostSocialAccountAssociation { .. } => "post_social_account_association",
            ValidationRule::EmailCampaignSending { .. } => "email_campaign_sending",
            ValidationRule::WorkflowExecution { .. } => "workflow_execution",
            ValidationRule::EntityDeletion { .. } => "entity_deletion",
            ValidationRule::EntityUpdate { .. } => "entity_update",
        }
    }

    /// Identifiers of every operand, in a fixed order.
    pub fn operand_ids(&self) -> Vec<String> {
        match self {
            ValidationRule::UserProjectAssociation {
                user_id,
                project_id,
            } => vec![user_id.to_string(), project_id.to_string()],
            ValidationRule::LeadToUserConversion { lead_id } => vec![lead_id.to_string()],
            ValidationRule::PostSocialAccountAssociation {
                post_id,
                social_account_id,
                user_id,
            } => vec![
                post_id.to_string(),
                social_account_id.to_string(),
                user_id.to_string(),
            ],
            ValidationRule::EmailCampaignSending {
                campaign_id,
                email_list_id,
                user_id,
            } => vec![
                campaign_id.to_string(),
                email_list_id.to_string(),
                user_id.to_string(),
            ],
            ValidationRule::WorkflowExecution { workflow_id, .. } => vec![workflow_id.to_string()],
            ValidationRule::EntityDeletion {
                module,
                entity_id,
                user_id,
            }
            | ValidationRule::EntityUpdate {
                module,
                entity_id,
                user_id,
                ..
            } => vec![
                module.as_str().to_string(),
                entity_id.to_string(),
                user_id.to_string(),
            ],
        }
    }

    /// Parameters that change the answer for the same operands.
    pub fn context(&self) -> Option<&Map<String, JsonValue>> {
        match self {
            ValidationRule::WorkflowExecution { context, .. } => Some(context),
            ValidationRule::EntityUpdate { changes, .. } => Some(changes),
            _ => None,
        }
    }
}

/// Evaluates rules against module records: existence, ownership and activity.
///
/// Records that an orchestration flow is about to create do not exist yet; rules
/// only constrain them when they are already present.
#[derive(Debug, Clone)]
pub struct OwnershipRules<R> {
    reader: R,
}

impl<R: EntityReader> OwnershipRules<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    fn owned_by(
        &self,
        errors: &mut Vec<String>,
        label: &str,
        record: Option<&EntityRecord>,
        user_id: UserId,
    ) {
        if let Some(r) = record {
            if r.user_id.is_some_and(|owner| owner != user_id) {
                errors.push(format!("{label} belongs to another user"));
            }
        }
    }
}

fn attr_str<'a>(record: &'a EntityRecord, key: &str) -> Option<&'a str> {
    record.attributes.get(key).and_then(JsonValue::as_str)
}

fn is_inactive(record: &EntityRecord) -> bool {
    matches!(record.attributes.get("active"), Some(JsonValue::Bool(false)))
        || matches!(attr_str(record, "status"), Some("inactive" | "archived" | "cancelled"))
}

impl<R: EntityReader> RuleEvaluator for OwnershipRules<R> {
    fn evaluate(&self, rule: &ValidationRule) -> anyhow::Result<Vec<String>> {
        let mut errors = Vec::new();

        match rule {
            ValidationRule::UserProjectAssociation {
                user_id,
                project_id,
            } => {
                match self.reader.get_by_id(ModuleKind::Users, user_id.as_entity_id())? {
                    None => errors.push("user does not exist".to_string()),
                    Some(user) if is_inactive(&user) => {
                        errors.push("user must be active to own projects".to_string())
                    }
                    Some(_) => {}
                }
                let project = self
                    .reader
                    .get_by_id(ModuleKind::Projects, project_id.as_entity_id())?;
                self.owned_by(&mut errors, "project", project.as_ref(), *user_id);
            }
            ValidationRule::LeadToUserConversion { lead_id } => {
                match self.reader.get_by_id(ModuleKind::Leads, lead_id.as_entity_id())? {
                    None => errors.push("lead does not exist".to_string()),
                    Some(lead) => {
                        let has = |k: &str| attr_str(&lead, k).is_some_and(|v| !v.trim().is_empty());
                        if !has("email") || !has("name") {
                            errors.push("lead needs an email and a name to be converted".to_string());
                        }
                    }
                }
            }
            ValidationRule::PostSocialAccountAssociation {
                post_id, user_id, ..
            } => {
                let post = self.reader.get_by_id(ModuleKind::Posts, post_id.as_entity_id())?;
                self.owned_by(&mut errors, "post", post.as_ref(), *user_id);
            }
            ValidationRule::EmailCampaignSending {
                campaign_id,
                email_list_id,
                user_id,
            } => {
                match self
                    .reader
                    .get_by_id(ModuleKind::EmailLists, email_list_id.as_entity_id())?
                {
                    None => errors.push("email list does not exist".to_string()),
                    Some(list) => self.owned_by(&mut errors, "email list", Some(&list), *user_id),
                }
                let campaign = self
                    .reader
                    .get_by_id(ModuleKind::EmailCampaigns, campaign_id.as_entity_id())?;
                self.owned_by(&mut errors, "campaign", campaign.as_ref(), *user_id);
            }
            ValidationRule::WorkflowExecution { workflow_id, .. } => {
                match self
                    .reader
                    .get_by_id(ModuleKind::Workflows, workflow_id.as_entity_id())?
                {
                    None => errors.push("workflow does not exist".to_string()),
                    Some(w) if is_inactive(&w) => {
                        errors.push("workflow must be active to execute".to_string())
                    }
                    Some(_) => {}
                }
            }
            ValidationRule::EntityDeletion {
                module,
                entity_id,
                user_id,
            }
            | ValidationRule::EntityUpdate {
                module,
                entity_id,
                user_id,
                ..
            } => match self.reader.get_by_id(*module, *entity_id)? {
                None => errors.push(format!("{module} record does not exist")),
                Some(record) => self.owned_by(&mut errors, module.as_str(), Some(&record), *user_id),
            },
        }

        Ok(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryModuleStore;
    use serde_json::json;
    use std::sync::Arc;

    fn user_record(id: UserId, status: &str) -> EntityRecord {
        EntityRecord {
            id: id.as_entity_id(),
            module: ModuleKind::Users,
            user_id: Some(id),
            project_id: None,
            lead_id: None,
            attributes: json!({"name": "Ana", "status": status})
                .as_object()
                .cloned()
                .unwrap(),
        }
    }

    #[test]
    fn rule_names_match_serde_tags() {
        let rule = ValidationRule::WorkflowExecution {
            workflow_id: WorkflowId::new(),
            context: Map::new(),
        };
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["rule"], json!(rule.name()));
    }

    #[test]
    fn context_only_exists_for_parameterised_rules() {
        let plain = ValidationRule::LeadToUserConversion {
            lead_id: LeadId::new(),
        };
        assert!(plain.context().is_none());
        assert_eq!(plain.operand_ids().len(), 1);
    }

    #[test]
    fn project_association_requires_active_owner() {
        let store = Arc::new(InMemoryModuleStore::new());
        let rules = OwnershipRules::new(store.clone());
        let user_id = UserId::new();
        let rule = ValidationRule::UserProjectAssociation {
            user_id,
            project_id: ProjectId::new(),
        };

        assert_eq!(rules.evaluate(&rule).unwrap(), vec!["user does not exist"]);

        store.insert(user_record(user_id, "inactive"));
        assert_eq!(
            rules.evaluate(&rule).unwrap(),
            vec!["user must be active to own projects"]
        );

        store.insert(user_record(user_id, "active"));
        assert!(rules.evaluate(&rule).unwrap().is_empty());
    }

    #[test]
    fn deletion_of_someone_elses_record_is_rejected() {
        let store = Arc::new(InMemoryModuleStore::new());
        let owner = UserId::new();
        store.insert(user_record(owner, "active"));

        let rules = OwnershipRules::new(store);
        let errors = rules
            .evaluate(&ValidationRule::EntityDeletion {
                module: ModuleKind::Users,
                entity_id: owner.as_entity_id(),
                user_id: UserId::new(),
            })
            .unwrap();
        assert_eq!(errors, vec!["users belongs to another user"]);
    }
}

//! Entity trait and the snapshots of module entities the cross-module layer works with.
//!
//! Persistence and business rules for these entities live in their owning modules.
//! The cross-module layer only ever sees immutable snapshots: enough identity and
//! ownership data to route events, key validation results, and fan out writes.

use serde::{Deserialize, Serialize};

use crate::id::{
    EmailCampaignId, EmailListId, LeadId, PostId, ProjectId, SocialAccountId, UserId, WorkflowId,
};

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    #[serde(default = "default_status")]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub user_id: UserId,
    pub name: String,
    #[serde(default)]
    pub project_type: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub user_id: UserId,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub user_id: UserId,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    pub content: String,
    #[serde(default)]
    pub post_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialAccount {
    pub id: SocialAccountId,
    pub user_id: UserId,
    pub platform: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailCampaign {
    pub id: EmailCampaignId,
    pub user_id: UserId,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    pub name: String,
    #[serde(default)]
    pub campaign_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailList {
    pub id: EmailListId,
    pub user_id: UserId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub user_id: UserId,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_status() -> String {
    "active".to_string()
}

fn default_true() -> bool {
    true
}

macro_rules! impl_entity {
    ($t:ty, $id:ty) => {
        impl Entity for $t {
            type Id = $id;

            fn id(&self) -> &Self::Id {
                &self.id
            }
        }
    };
}

impl_entity!(User, UserId);
impl_entity!(Project, ProjectId);
impl_entity!(Lead, LeadId);
impl_entity!(Post, PostId);
impl_entity!(SocialAccount, SocialAccountId);
impl_entity!(EmailCampaign, EmailCampaignId);
impl_entity!(EmailList, EmailListId);
impl_entity!(Workflow, WorkflowId);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snapshots_fill_optional_fields_from_defaults() {
        let user_id = UserId::new();
        let project: Project = serde_json::from_value(json!({
            "id": ProjectId::new(),
            "user_id": user_id,
            "name": "Launch",
        }))
        .unwrap();

        assert_eq!(project.user_id, user_id);
        assert_eq!(project.status, "active");
        assert!(project.project_type.is_none());
    }

    #[test]
    fn entity_id_is_exposed_through_trait() {
        let account = SocialAccount {
            id: SocialAccountId::new(),
            user_id: UserId::new(),
            platform: "instagram".to_string(),
            active: true,
        };
        assert_eq!(Entity::id(&account), &account.id);
    }
}

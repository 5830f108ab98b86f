//! Typed payloads for the well-known cross-module event types.
//!
//! Handlers match on [`CrossModuleEvent`] instead of probing payload keys. The wire
//! shape stays a plain `(event_type, payload)` pair so unknown event types can
//! still flow through the dispatcher untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use nexuscrm_core::{
    EmailCampaignId, LeadId, PostId, ProjectId, SocialAccountId, UserId,
};

use crate::event::DomainEvent;

/// Event type identifiers.
pub mod event_types {
    pub const USER_CREATED: &str = "user.created";
    pub const PROJECT_CREATED: &str = "project.created";
    pub const LEAD_CREATED: &str = "lead.created";
    pub const EMAIL_CAMPAIGN_CREATED: &str = "email_campaign.created";
    pub const POST_PUBLISHED: &str = "post.published";

    pub const ALL: [&str; 5] = [
        USER_CREATED,
        PROJECT_CREATED,
        LEAD_CREATED,
        EMAIL_CAMPAIGN_CREATED,
        POST_PUBLISHED,
    ];
}

#[derive(Debug, Error)]
pub enum EventDecodeError {
    #[error("unknown event type: {0}")]
    UnknownType(String),
    #[error("malformed payload for {event_type}: {message}")]
    Malformed { event_type: String, message: String },
}

/// Sum type over the event payloads modules exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CrossModuleEvent {
    #[serde(rename = "user.created")]
    UserCreated {
        user_id: UserId,
        name: String,
        email: String,
        #[serde(default)]
        metadata: Map<String, JsonValue>,
    },
    #[serde(rename = "project.created")]
    ProjectCreated {
        project_id: ProjectId,
        name: String,
        user_id: UserId,
        #[serde(default)]
        project_type: Option<String>,
        #[serde(default)]
        metadata: Map<String, JsonValue>,
    },
    #[serde(rename = "lead.created")]
    LeadCreated {
        lead_id: LeadId,
        name: String,
        email: String,
        user_id: UserId,
        #[serde(default)]
        project_id: Option<ProjectId>,
        #[serde(default)]
        source: Option<String>,
        #[serde(default)]
        metadata: Map<String, JsonValue>,
    },
    #[serde(rename = "email_campaign.created")]
    EmailCampaignCreated {
        campaign_id: EmailCampaignId,
        name: String,
        user_id: UserId,
        #[serde(default)]
        project_id: Option<ProjectId>,
        #[serde(default)]
        campaign_type: Option<String>,
        #[serde(default)]
        metadata: Map<String, JsonValue>,
    },
    #[serde(rename = "post.published")]
    PostPublished {
        post_id: PostId,
        content: String,
        user_id: UserId,
        #[serde(default)]
        project_id: Option<ProjectId>,
        #[serde(default)]
        post_type: Option<String>,
        #[serde(default)]
        social_account_ids: Vec<SocialAccountId>,
        #[serde(default)]
        metadata: Map<String, JsonValue>,
    },
}

impl CrossModuleEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            CrossModuleEvent::UserCreated { .. } => event_types::USER_CREATED,
            CrossModuleEvent::ProjectCreated { .. } => event_types::PROJECT_CREATED,
            CrossModuleEvent::LeadCreated { .. } => event_types::LEAD_CREATED,
            CrossModuleEvent::EmailCampaignCreated { .. } => event_types::EMAIL_CAMPAIGN_CREATED,
            CrossModuleEvent::PostPublished { .. } => event_types::POST_PUBLISHED,
        }
    }

    pub fn user_id(&self) -> UserId {
        match self {
            CrossModuleEvent::UserCreated { user_id, .. }
            | CrossModuleEvent::ProjectCreated { user_id, .. }
            | CrossModuleEvent::LeadCreated { user_id, .. }
            | CrossModuleEvent::EmailCampaignCreated { user_id, .. }
            | CrossModuleEvent::PostPublished { user_id, .. } => *user_id,
        }
    }

    pub fn project_id(&self) -> Option<ProjectId> {
        match self {
            CrossModuleEvent::UserCreated { .. } => None,
            CrossModuleEvent::ProjectCreated { project_id, .. } => Some(*project_id),
            CrossModuleEvent::LeadCreated { project_id, .. }
            | CrossModuleEvent::EmailCampaignCreated { project_id, .. }
            | CrossModuleEvent::PostPublished { project_id, .. } => *project_id,
        }
    }

    /// Decode a typed event from its wire parts.
    pub fn from_parts(
        event_type: &str,
        payload: &Map<String, JsonValue>,
    ) -> Result<Self, EventDecodeError> {
        if !event_types::ALL.contains(&event_type) {
            return Err(EventDecodeError::UnknownType(event_type.to_string()));
        }

        let mut tagged = Map::new();
        tagged.insert("type".to_string(), JsonValue::String(event_type.to_string()));
        tagged.insert("data".to_string(), JsonValue::Object(payload.clone()));

        serde_json::from_value(JsonValue::Object(tagged)).map_err(|e| EventDecodeError::Malformed {
            event_type: event_type.to_string(),
            message: e.to_string(),
        })
    }

    /// Split into `(event_type, payload)`.
    pub fn into_parts(self) -> (&'static str, Map<String, JsonValue>) {
        let event_type = self.event_type();
        let payload = match serde_json::to_value(&self) {
            Ok(JsonValue::Object(mut tagged)) => match tagged.remove("data") {
                Some(JsonValue::Object(data)) => data,
                _ => Map::new(),
            },
            _ => Map::new(),
        };
        (event_type, payload)
    }

    /// Wrap into a fresh [`DomainEvent`] (new id, stamped now).
    pub fn into_domain_event(self) -> DomainEvent {
        let user_id = self.user_id();
        let project_id = self.project_id();
        let (event_type, payload) = self.into_parts();
        DomainEvent::new(event_type, payload, user_id, project_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn orchestration_metadata() -> Map<String, JsonValue> {
        json!({"orchestration": true}).as_object().cloned().unwrap()
    }

    #[test]
    fn typed_event_becomes_domain_event_with_routing_fields() {
        let user_id = UserId::new();
        let project_id = ProjectId::new();
        let ev = CrossModuleEvent::ProjectCreated {
            project_id,
            name: "Launch".to_string(),
            user_id,
            project_type: Some("web".to_string()),
            metadata: orchestration_metadata(),
        }
        .into_domain_event();

        assert_eq!(ev.event_type(), "project.created");
        assert_eq!(ev.user_id(), user_id);
        assert_eq!(ev.project_id(), Some(project_id));
        assert_eq!(ev.payload()["name"], json!("Launch"));
        assert_eq!(ev.payload()["metadata"]["orchestration"], json!(true));
    }

    #[test]
    fn domain_event_decodes_back_to_typed_event() {
        let typed = CrossModuleEvent::PostPublished {
            post_id: PostId::new(),
            content: "hello".to_string(),
            user_id: UserId::new(),
            project_id: None,
            post_type: None,
            social_account_ids: vec![SocialAccountId::new()],
            metadata: Map::new(),
        };
        let ev: DomainEvent = typed.clone().into();
        assert_eq!(ev.decode().unwrap(), typed);
    }

    #[test]
    fn unknown_type_is_reported() {
        let err = CrossModuleEvent::from_parts("invoice.paid", &Map::new()).unwrap_err();
        assert!(matches!(err, EventDecodeError::UnknownType(t) if t == "invoice.paid"));
    }

    #[test]
    fn missing_fields_are_malformed() {
        let payload = json!({"name": "x"}).as_object().cloned().unwrap();
        let err = CrossModuleEvent::from_parts("user.created", &payload).unwrap_err();
        assert!(matches!(err, EventDecodeError::Malformed { .. }));
    }
}

use serde_json::{Map, Value as JsonValue};
use tracing::instrument;

use nexuscrm_core::{
    EmailCampaign, EmailList, Lead, ModuleKind, Post, Project, SocialAccount, User, Workflow,
};
use nexuscrm_events::CrossModuleEvent;

use super::{Flow, OrchestrationResult, OrchestrationService};
use crate::collaborators::WriteStep;
use crate::rules::ValidationRule;

fn orchestration_metadata() -> Map<String, JsonValue> {
    let mut metadata = Map::new();
    metadata.insert("orchestration".to_string(), JsonValue::Bool(true));
    metadata
}

impl OrchestrationService {
    /// `user` -> lead, email_list, project, universe_instance, aura_chat; emits `user.created`.
    #[instrument(skip_all, fields(user_id = %user.id))]
    pub fn orchestrate_user_creation(&self, user: &User) -> OrchestrationResult {
        let owned = |name: &'static str, module: ModuleKind| {
            WriteStep::new(name, module)
                .user(user.id)
                .attr("default", true)
        };

        self.run_flow(Flow {
            name: "user_creation",
            rule: None,
            primary: WriteStep::new("user", ModuleKind::Users)
                .entity(user.id.as_entity_id())
                .user(user.id)
                .attr("name", user.name.as_str())
                .attr("email", user.email.as_str())
                .attr("status", user.status.as_str()),
            secondaries: vec![
                owned("lead", ModuleKind::Leads),
                owned("email_list", ModuleKind::EmailLists),
                owned("project", ModuleKind::Projects),
                owned("universe_instance", ModuleKind::UniverseInstances),
                owned("aura_chat", ModuleKind::AuraChats),
            ],
            event: Some(CrossModuleEvent::UserCreated {
                user_id: user.id,
                name: user.name.clone(),
                email: user.email.clone(),
                metadata: orchestration_metadata(),
            }),
        })
    }

    /// `project` -> tasks, media_folder, workflow, analytics_metrics; emits `project.created`.
    #[instrument(skip_all, fields(project_id = %project.id, user_id = %user.id))]
    pub fn orchestrate_project_creation(&self, project: &Project, user: &User) -> OrchestrationResult {
        let dependent = |name: &'static str, module: ModuleKind| {
            WriteStep::new(name, module)
                .user(user.id)
                .project(Some(project.id))
        };

        self.run_flow(Flow {
            name: "project_creation",
            rule: Some(ValidationRule::UserProjectAssociation {
                user_id: user.id,
                project_id: project.id,
            }),
            primary: WriteStep::new("project", ModuleKind::Projects)
                .entity(project.id.as_entity_id())
                .user(user.id)
                .attr("name", project.name.as_str())
                .attr("project_type", project.project_type.clone())
                .attr("status", project.status.as_str()),
            secondaries: vec![
                dependent("tasks", ModuleKind::Tasks),
                dependent("media_folder", ModuleKind::MediaFolders),
                dependent("workflow", ModuleKind::Workflows),
                dependent("analytics_metrics", ModuleKind::Analytics),
            ],
            event: Some(CrossModuleEvent::ProjectCreated {
                project_id: project.id,
                name: project.name.clone(),
                user_id: user.id,
                project_type: project.project_type.clone(),
                metadata: orchestration_metadata(),
            }),
        })
    }

    #[instrument(skip_all, fields(lead_id = %lead.id, user_id = %user.id))]
    pub fn orchestrate_lead_creation(&self, lead: &Lead, user: &User) -> OrchestrationResult {
        let dependent = |name: &'static str, module: ModuleKind| {
            WriteStep::new(name, module)
                .user(user.id)
                .project(lead.project_id)
                .lead(lead.id)
        };

        self.run_flow(Flow {
            name: "lead_creation",
            rule: None,
            primary: WriteStep::new("lead", ModuleKind::Leads)
                .entity(lead.id.as_entity_id())
                .user(user.id)
                .project(lead.project_id)
                .attr("name", lead.name.as_str())
                .attr("email", lead.email.as_str())
                .attr("source", lead.source.clone()),
            secondaries: vec![
                dependent("email_list_subscription", ModuleKind::EmailLists),
                dependent("workflow_trigger", ModuleKind::Workflows),
                dependent("aura_chat", ModuleKind::AuraChats),
                dependent("analytics_metrics", ModuleKind::Analytics),
            ],
            event: Some(CrossModuleEvent::LeadCreated {
                lead_id: lead.id,
                name: lead.name.clone(),
                email: lead.email.clone(),
                user_id: user.id,
                project_id: lead.project_id,
                source: lead.source.clone(),
                metadata: orchestration_metadata(),
            }),
        })
    }

    #[instrument(skip_all, fields(post_id = %post.id, social_account_id = %account.id, user_id = %user.id))]
    pub fn orchestrate_post_publication(
        &self,
        post: &Post,
        account: &SocialAccount,
        user: &User,
    ) -> OrchestrationResult {
        let dependent = |name: &'static str, module: ModuleKind| {
            WriteStep::new(name, module)
                .user(user.id)
                .project(post.project_id)
                .attr("post_id", post.id.to_string())
        };

        self.run_flow(Flow {
            name: "post_publication",
            rule: Some(ValidationRule::PostSocialAccountAssociation {
                post_id: post.id,
                social_account_id: account.id,
                user_id: user.id,
            }),
            primary: WriteStep::new("post", ModuleKind::Posts)
                .entity(post.id.as_entity_id())
                .user(user.id)
                .project(post.project_id)
                .attr("content", post.content.as_str())
                .attr("post_type", post.post_type.clone())
                .attr("social_account_id", account.id.to_string())
                .attr("platform", account.platform.as_str())
                .attr("status", "published"),
            secondaries: vec![
                dependent("analytics_metrics", ModuleKind::Analytics),
                dependent("lead_creation", ModuleKind::Leads),
                dependent("email_campaign", ModuleKind::EmailCampaigns),
            ],
            event: Some(CrossModuleEvent::PostPublished {
                post_id: post.id,
                content: post.content.clone(),
                user_id: user.id,
                project_id: post.project_id,
                post_type: post.post_type.clone(),
                social_account_ids: vec![account.id],
                metadata: orchestration_metadata(),
            }),
        })
    }

    #[instrument(skip_all, fields(campaign_id = %campaign.id, email_list_id = %list.id, user_id = %user.id))]
    pub fn orchestrate_email_campaign_sending(
        &self,
        campaign: &EmailCampaign,
        list: &EmailList,
        user: &User,
    ) -> OrchestrationResult {
        let dependent = |name: &'static str, module: ModuleKind| {
            WriteStep::new(name, module)
                .user(user.id)
                .project(campaign.project_id)
                .attr("campaign_id", campaign.id.to_string())
        };

        self.run_flow(Flow {
            name: "email_campaign_sending",
            rule: Some(ValidationRule::EmailCampaignSending {
                campaign_id: campaign.id,
                email_list_id: list.id,
                user_id: user.id,
            }),
            primary: WriteStep::new("campaign", ModuleKind::EmailCampaigns)
                .entity(campaign.id.as_entity_id())
                .user(user.id)
                .project(campaign.project_id)
                .attr("name", campaign.name.as_str())
                .attr("campaign_type", campaign.campaign_type.clone())
                .attr("email_list_id", list.id.to_string())
                .attr("status", "sent"),
            secondaries: vec![
                dependent("analytics_metrics", ModuleKind::Analytics),
                dependent("workflow_trigger", ModuleKind::Workflows),
                dependent("lead_creation", ModuleKind::Leads),
            ],
            event: Some(CrossModuleEvent::EmailCampaignCreated {
                campaign_id: campaign.id,
                name: campaign.name.clone(),
                user_id: user.id,
                project_id: campaign.project_id,
                campaign_type: campaign.campaign_type.clone(),
                metadata: orchestration_metadata(),
            }),
        })
    }

    /// No terminal event: executions are not broadcast.
    #[instrument(skip_all, fields(workflow_id = %workflow.id))]
    pub fn orchestrate_workflow_execution(
        &self,
        workflow: &Workflow,
        context: &Map<String, JsonValue>,
    ) -> OrchestrationResult {
        let dependent = |name: &'static str, module: ModuleKind| {
            WriteStep::new(name, module)
                .user(workflow.user_id)
                .project(workflow.project_id)
                .attr("workflow_id", workflow.id.to_string())
        };

        self.run_flow(Flow {
            name: "workflow_execution",
            rule: Some(ValidationRule::WorkflowExecution {
                workflow_id: workflow.id,
                context: context.clone(),
            }),
            primary: WriteStep::new("workflow", ModuleKind::Workflows)
                .entity(workflow.id.as_entity_id())
                .user(workflow.user_id)
                .project(workflow.project_id)
                .attr("last_context", JsonValue::Object(context.clone())),
            secondaries: vec![
                dependent("analytics_metrics", ModuleKind::Analytics),
                dependent("activities", ModuleKind::Activities),
                dependent("notifications", ModuleKind::Notifications),
            ],
            event: None,
        })
    }
}

//! Batch orchestration: a list of `{type, data}` operations, each its own flow.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::{info, warn};

use nexuscrm_core::{EmailCampaign, EmailList, Lead, Post, Project, SocialAccount, User, Workflow};

use super::{OrchestrationResult, OrchestrationService};

pub const UNSUPPORTED_OPERATION: &str = "unsupported operation type";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    UserCreation,
    ProjectCreation,
    LeadCreation,
    PostPublication,
    EmailCampaignSending,
    WorkflowExecution,
}

impl OperationKind {
    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(JsonValue::String(s.to_string())).ok()
    }
}

/// One batch entry. `op_type` stays a string so an unknown type only fails its own slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOperation {
    #[serde(rename = "type")]
    pub op_type: String,
    #[serde(default)]
    pub data: JsonValue,
}

impl BatchOperation {
    pub fn new(kind: OperationKind, data: JsonValue) -> Self {
        let op_type = match serde_json::to_value(kind) {
            Ok(JsonValue::String(s)) => s,
            _ => String::new(),
        };
        Self { op_type, data }
    }
}

#[derive(Deserialize)]
struct UserCreationData {
    user: User,
}

#[derive(Deserialize)]
struct ProjectCreationData {
    project: Project,
    user: User,
}

#[derive(Deserialize)]
struct LeadCreationData {
    lead: Lead,
    user: User,
}

#[derive(Deserialize)]
struct PostPublicationData {
    post: Post,
    social_account: SocialAccount,
    user: User,
}

#[derive(Deserialize)]
struct EmailCampaignSendingData {
    campaign: EmailCampaign,
    email_list: EmailList,
    user: User,
}

#[derive(Deserialize)]
struct WorkflowExecutionData {
    workflow: Workflow,
    #[serde(default)]
    context: Map<String, JsonValue>,
}

fn decode<T: DeserializeOwned>(data: &JsonValue) -> Result<T, OrchestrationResult> {
    T::deserialize(data)
        .map_err(|e| OrchestrationResult::failed(format!("invalid operation data: {e}")))
}

impl OrchestrationService {
    /// Run each operation as an independent flow, in order.
    ///
    /// Every flow has its own transaction; a failing slot never affects the others.
    pub fn orchestrate_batch_operations(&self, operations: &[BatchOperation]) -> Vec<OrchestrationResult> {
        let results: Vec<OrchestrationResult> =
            operations.iter().map(|op| self.run_operation(op)).collect();

        let failed = results.iter().filter(|r| r.is_error()).count();
        info!(total = operations.len(), failed, "batch orchestration finished");
        results
    }

    fn run_operation(&self, op: &BatchOperation) -> OrchestrationResult {
        let Some(kind) = OperationKind::parse(&op.op_type) else {
            warn!(op_type = %op.op_type, "unsupported batch operation");
            return OrchestrationResult::failed(UNSUPPORTED_OPERATION);
        };

        let result = match kind {
            OperationKind::UserCreation => {
                decode::<UserCreationData>(&op.data).map(|d| self.orchestrate_user_creation(&d.user))
            }
            OperationKind::ProjectCreation => decode::<ProjectCreationData>(&op.data)
                .map(|d| self.orchestrate_project_creation(&d.project, &d.user)),
            OperationKind::LeadCreation => decode::<LeadCreationData>(&op.data)
                .map(|d| self.orchestrate_lead_creation(&d.lead, &d.user)),
            OperationKind::PostPublication => decode::<PostPublicationData>(&op.data)
                .map(|d| self.orchestrate_post_publication(&d.post, &d.social_account, &d.user)),
            OperationKind::EmailCampaignSending => decode::<EmailCampaignSendingData>(&op.data)
                .map(|d| self.orchestrate_email_campaign_sending(&d.campaign, &d.email_list, &d.user)),
            OperationKind::WorkflowExecution => decode::<WorkflowExecutionData>(&op.data)
                .map(|d| self.orchestrate_workflow_execution(&d.workflow, &d.context)),
        };

        result.unwrap_or_else(|invalid| {
            warn!(op_type = %op.op_type, error = ?invalid.error(), "batch operation rejected");
            invalid
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_kinds_parse_from_wire_names() {
        assert_eq!(OperationKind::parse("post_publication"), Some(OperationKind::PostPublication));
        assert_eq!(OperationKind::parse("invoice_creation"), None);
        assert_eq!(
            BatchOperation::new(OperationKind::WorkflowExecution, JsonValue::Null).op_type,
            "workflow_execution"
        );
    }

    #[test]
    fn bad_data_names_the_problem() {
        let err = decode::<UserCreationData>(&serde_json::json!({"user": {"id": "nope"}})).err();
        let message = err.as_ref().and_then(|r| r.error()).unwrap_or_default();
        assert!(message.starts_with("invalid operation data:"), "{message}");
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use nexuscrm_core::{ProjectId, UserId};
use nexuscrm_events::EventId;
use nexuscrm_integration::{BatchOperation, OrchestrationResult};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct DispatchEventRequest {
    pub event_type: String,
    #[serde(default)]
    pub payload: Map<String, JsonValue>,
    pub user_id: UserId,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProcessEventsRequest {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub operations: Vec<BatchOperation>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct DispatchEventResponse {
    pub event_id: EventId,
    pub event_type: String,
    pub dispatched_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ValidationResponse {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl From<Vec<String>> for ValidationResponse {
    fn from(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub results: Vec<OrchestrationResult>,
}

#[derive(Debug, Serialize)]
pub struct ClearedResponse {
    pub cleared: usize,
}

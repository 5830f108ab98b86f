//! Cross-module administration: event intake, queue draining, validation,
//! batch orchestration, relationship lookups and runtime configuration.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use chrono::Utc;
use tracing::error;

use nexuscrm_core::{EntityId, RootKind, UserId};
use nexuscrm_events::{DomainEvent, EventId, EventTypeMapping};
use nexuscrm_integration::{DispatchOutcome, DispatcherSettings, ValidationRule};

use crate::app::dto::{
    BatchRequest, BatchResponse, ClearedResponse, DispatchEventRequest, DispatchEventResponse,
    LimitQuery, ProcessEventsRequest, ValidationResponse,
};
use crate::app::errors;
use crate::app::services::AppServices;

const DEFAULT_PROCESS_LIMIT: usize = 100;
const DEFAULT_DEAD_LETTER_LIMIT: usize = 50;

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new()
        .route("/stats", get(stats))
        .route("/events", post(dispatch_event))
        .route("/events/process", post(process_events))
        .route("/validate", post(validate))
        .route("/validation-cache", delete(clear_validation_cache))
        .route("/orchestrate/batch", post(orchestrate_batch))
        .route("/relationships/:root_type/:id", get(related_entities))
        .route("/users/:id/statistics", get(user_statistics))
        .route("/dispatcher/config", put(configure_dispatcher))
        .route("/queue", delete(clear_queue))
        .route("/dead-letters", get(list_dead_letters))
        .route("/dead-letters/:event_id/redrive", post(redrive_dead_letter))
        .route("/event-mappings", get(list_event_mappings))
        .route(
            "/event-mappings/:event_type",
            put(add_event_mapping).delete(remove_event_mapping),
        )
}

/// Dispatch and orchestration run handlers synchronously; keep them off the
/// async workers.
async fn run_blocking<F>(services: &Arc<AppServices>, work: F) -> axum::response::Response
where
    F: FnOnce(&AppServices) -> axum::response::Response + Send + 'static,
{
    let services = Arc::clone(services);
    match tokio::task::spawn_blocking(move || work(&services)).await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "blocking request task failed");
            errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "request processing failed",
            )
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// GET /cross-module/stats
pub async fn stats(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    Json(services.orchestration.get_orchestration_stats()).into_response()
}

/// POST /cross-module/events
///
/// Only event types with a registered mapping are accepted.
pub async fn dispatch_event(
    Extension(services): Extension<Arc<AppServices>>,
    Json(req): Json<DispatchEventRequest>,
) -> axum::response::Response {
    if req.payload.is_empty() {
        return errors::json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_event",
            "payload must not be empty",
        );
    }
    match services.integration.registry().mapping(&req.event_type) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return errors::json_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "unknown_event_type",
                format!("no mapping registered for '{}'", req.event_type),
            );
        }
        Err(e) => return errors::registry_error_to_response(e),
    }

    let event = DomainEvent::new(req.event_type, req.payload, req.user_id, req.project_id);
    let response = DispatchEventResponse {
        event_id: event.event_id(),
        event_type: event.event_type().to_string(),
        dispatched_at: Utc::now(),
    };

    run_blocking(&services, move |services| match services.dispatcher.dispatch(event) {
        DispatchOutcome::Rejected(failure) => errors::validation_failure_to_response(failure),
        // Processing failures are retried in the background.
        DispatchOutcome::Accepted(_) => (StatusCode::ACCEPTED, Json(response)).into_response(),
    })
    .await
}

/// POST /cross-module/events/process  `{limit?}`
pub async fn process_events(
    Extension(services): Extension<Arc<AppServices>>,
    body: Option<Json<ProcessEventsRequest>>,
) -> axum::response::Response {
    let limit = body
        .and_then(|Json(req)| req.limit)
        .unwrap_or(DEFAULT_PROCESS_LIMIT);
    run_blocking(&services, move |services| {
        Json(services.dispatcher.process_pending(limit)).into_response()
    })
    .await
}

/// DELETE /cross-module/queue
pub async fn clear_queue(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    Json(ClearedResponse {
        cleared: services.dispatcher.clear_queue(),
    })
    .into_response()
}

/// PUT /cross-module/dispatcher/config  `{max_retries?, retry_delay?}`
pub async fn configure_dispatcher(
    Extension(services): Extension<Arc<AppServices>>,
    Json(settings): Json<DispatcherSettings>,
) -> axum::response::Response {
    services.dispatcher.configure(settings);
    Json(services.dispatcher.get_stats()).into_response()
}

/// GET /cross-module/dead-letters?limit=N
pub async fn list_dead_letters(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<LimitQuery>,
) -> axum::response::Response {
    match services
        .dispatcher
        .dead_letters(query.limit.unwrap_or(DEFAULT_DEAD_LETTER_LIMIT))
    {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

/// POST /cross-module/dead-letters/:event_id/redrive
pub async fn redrive_dead_letter(
    Extension(services): Extension<Arc<AppServices>>,
    Path(event_id): Path<String>,
) -> axum::response::Response {
    let Ok(uuid) = event_id.parse::<uuid::Uuid>() else {
        return errors::json_error(StatusCode::BAD_REQUEST, "invalid_event_id", "event id must be a UUID");
    };
    run_blocking(&services, move |services| {
        match services.dispatcher.redrive_dead_letter(EventId::from_uuid(uuid)) {
            Ok(outcome) => {
                Json(serde_json::json!({ "processed": outcome.is_processed() })).into_response()
            }
            Err(e) => errors::dispatch_error_to_response(e),
        }
    })
    .await
}

// ─────────────────────────────────────────────────────────────────────────────
// Event mappings
// ─────────────────────────────────────────────────────────────────────────────

/// GET /cross-module/event-mappings
pub async fn list_event_mappings(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.integration.get_event_mappings() {
        Ok(mappings) => Json(mappings).into_response(),
        Err(e) => errors::registry_error_to_response(e),
    }
}

/// PUT /cross-module/event-mappings/:event_type  `{listeners, actions}` (merged)
pub async fn add_event_mapping(
    Extension(services): Extension<Arc<AppServices>>,
    Path(event_type): Path<String>,
    Json(mapping): Json<EventTypeMapping>,
) -> axum::response::Response {
    if let Err(e) = services.integration.add_event_mapping(event_type.as_str(), mapping) {
        return errors::registry_error_to_response(e);
    }
    match services.integration.registry().mapping(&event_type) {
        Ok(mapping) => Json(mapping).into_response(),
        Err(e) => errors::registry_error_to_response(e),
    }
}

/// DELETE /cross-module/event-mappings/:event_type
pub async fn remove_event_mapping(
    Extension(services): Extension<Arc<AppServices>>,
    Path(event_type): Path<String>,
) -> axum::response::Response {
    match services.integration.remove_event_mapping(&event_type) {
        Ok(Some(_)) => StatusCode::NO_CONTENT.into_response(),
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no mapping registered for '{event_type}'"),
        ),
        Err(e) => errors::registry_error_to_response(e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation & orchestration
// ─────────────────────────────────────────────────────────────────────────────

/// POST /cross-module/validate  (a `ValidationRule`, tagged by `rule`)
pub async fn validate(
    Extension(services): Extension<Arc<AppServices>>,
    Json(rule): Json<ValidationRule>,
) -> axum::response::Response {
    Json(ValidationResponse::from(services.validation.validate(&rule))).into_response()
}

/// DELETE /cross-module/validation-cache
pub async fn clear_validation_cache(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.validation.clear_cache() {
        Ok(cleared) => Json(ClearedResponse { cleared }).into_response(),
        Err(e) => errors::json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", e.to_string()),
    }
}

/// POST /cross-module/orchestrate/batch  `{operations: [{type, data}]}`
///
/// Always 200; failures are reported per slot.
pub async fn orchestrate_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Json(req): Json<BatchRequest>,
) -> axum::response::Response {
    run_blocking(&services, move |services| {
        let results = services
            .orchestration
            .orchestrate_batch_operations(&req.operations);
        Json(BatchResponse { results }).into_response()
    })
    .await
}

// ─────────────────────────────────────────────────────────────────────────────
// Relationships
// ─────────────────────────────────────────────────────────────────────────────

/// GET /cross-module/relationships/:root_type/:id
pub async fn related_entities(
    Extension(services): Extension<Arc<AppServices>>,
    Path((root_type, id)): Path<(String, String)>,
) -> axum::response::Response {
    let root: RootKind = match errors::parse_path(&root_type, "invalid_root_type") {
        Ok(root) => root,
        Err(resp) => return resp,
    };
    let id: EntityId = match errors::parse_path(&id, "invalid_id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    Json(services.relationships.get_related_entities(root, id)).into_response()
}

/// GET /cross-module/users/:id/statistics
pub async fn user_statistics(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let user_id: UserId = match errors::parse_path(&id, "invalid_id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    Json(services.relationships.get_relationship_statistics(user_id)).into_response()
}

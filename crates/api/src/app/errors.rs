use std::str::FromStr;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use nexuscrm_core::DomainError;
use nexuscrm_events::RegistryError;
use nexuscrm_integration::{DispatchError, ValidationFailure};

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn validation_failure_to_response(failure: ValidationFailure) -> axum::response::Response {
    let message = failure.to_string();
    match failure {
        ValidationFailure::Stale { .. } | ValidationFailure::EmptyPayload { .. } => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_event", message)
        }
        ValidationFailure::Duplicate { .. } => {
            json_error(StatusCode::CONFLICT, "duplicate_event", message)
        }
        ValidationFailure::Store { .. } => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", message)
        }
    }
}

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::NotDeadLettered(id) => json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("event {id} is not dead-lettered"),
        ),
        DispatchError::Cache(e) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", e.to_string())
        }
        DispatchError::Scheduler(e) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "scheduler_error", e.to_string())
        }
        DispatchError::DeadLetter(e) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "dead_letter_error", e.to_string())
        }
    }
}

pub fn registry_error_to_response(err: RegistryError) -> axum::response::Response {
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "registry_error", err.to_string())
}

/// Parse a path segment, answering 400 with `code` when it is malformed.
pub fn parse_path<T>(raw: &str, code: &'static str) -> Result<T, axum::response::Response>
where
    T: FromStr<Err = DomainError>,
{
    raw.parse()
        .map_err(|e: DomainError| json_error(StatusCode::BAD_REQUEST, code, e.to_string()))
}

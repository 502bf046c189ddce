// Route modules for the Gatekeeper API
pub mod permissions; // Effective permission queries, grants, revokes and copies
pub mod resource_types; // Resource type catalog
pub mod resources; // Resource catalog
pub mod subjects; // Subject catalog

use axum::{
    http::{header::WARNING, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, error};

use crate::permissions::{PermissionError, SubjectType};

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

/// Convert PermissionError to HTTP response
///
/// Server faults are logged in full and reported without detail.
pub fn permission_error_to_response(err: PermissionError) -> Response {
    let (status, error_code) = match &err {
        PermissionError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        PermissionError::IncorrectSubjectType { .. } => {
            (StatusCode::BAD_REQUEST, "incorrect_subject_type")
        }
        PermissionError::UnknownPermissionLevel(_) => {
            (StatusCode::BAD_REQUEST, "unknown_permission_level")
        }
        PermissionError::UnknownResourceType(_) => {
            (StatusCode::BAD_REQUEST, "unknown_resource_type")
        }
        PermissionError::InvalidSubjectType(_) => (StatusCode::BAD_REQUEST, "invalid_subject_type"),
        PermissionError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        PermissionError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
        PermissionError::InvariantViolation(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "invariant_violation")
        }
        PermissionError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
        PermissionError::Directory(_) => (StatusCode::INTERNAL_SERVER_ERROR, "directory_error"),
    };

    let message = if err.is_client_error() {
        debug!("Request rejected: {}", err);
        err.to_string()
    } else {
        error!("Request failed: {}", err);
        "internal server error".to_string()
    };

    (status, Json(ErrorResponse::new(error_code, &message))).into_response()
}

/// Parse a subject type taken from a path or query string.
pub fn parse_subject_type(value: &str) -> Result<SubjectType, Response> {
    value.parse().map_err(permission_error_to_response)
}

/// Attach an HTTP `Warning` header when directory enrichment failed.
pub fn with_warning(mut response: Response, warning: Option<String>) -> Response {
    if let Some(reason) = warning {
        response
            .headers_mut()
            .insert(WARNING, warning_header_value(&reason));
    }
    response
}

/// Build a `199` warn-text value. Characters outside printable ASCII are
/// replaced, as are quotes and backslashes, so the header is always valid.
fn warning_header_value(reason: &str) -> HeaderValue {
    let text: String = reason
        .chars()
        .map(|c| match c {
            '"' | '\\' => '\'',
            ' '..='~' => c,
            _ => ' ',
        })
        .collect();
    HeaderValue::from_str(&format!("199 gatekeeper \"{}\"", text.trim()))
        .unwrap_or_else(|_| HeaderValue::from_static("199 gatekeeper \"enrichment failed\""))
}

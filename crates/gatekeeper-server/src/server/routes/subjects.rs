//! Subject catalog routes

use super::{parse_subject_type, permission_error_to_response};
use crate::permissions::{Subject, SubjectIn};
use crate::server::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

/// Create the subjects router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/subjects", get(list_handler).post(add_handler))
        .route("/subjects/:id", put(update_handler).delete(delete_handler))
        .route(
            "/subjects/by-external-id/:subject_type/:subject_id",
            delete(delete_by_external_id_handler),
        )
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub subject_type: Option<String>,
    pub subject_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubjectListResponse {
    pub subjects: Vec<Subject>,
}

/// GET /subjects
#[instrument(skip(state))]
pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    let subject_type = match query.subject_type.as_deref().map(parse_subject_type) {
        Some(Ok(t)) => Some(t),
        Some(Err(response)) => return response,
        None => None,
    };

    match state
        .catalog
        .list_subjects(subject_type, query.subject_id.as_deref())
        .await
    {
        Ok(subjects) => (StatusCode::OK, Json(SubjectListResponse { subjects })).into_response(),
        Err(e) => permission_error_to_response(e),
    }
}

/// POST /subjects
#[instrument(skip(state))]
pub async fn add_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubjectIn>,
) -> Response {
    match state.catalog.add_subject(&request).await {
        Ok(subject) => {
            info!("Subject created: {}/{}", subject.subject_type, subject.subject_id);
            (StatusCode::CREATED, Json(subject)).into_response()
        }
        Err(e) => permission_error_to_response(e),
    }
}

/// PUT /subjects/:id
#[instrument(skip(state))]
pub async fn update_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<SubjectIn>,
) -> Response {
    match state.catalog.update_subject(&id, &request).await {
        Ok(subject) => (StatusCode::OK, Json(subject)).into_response(),
        Err(e) => permission_error_to_response(e),
    }
}

/// DELETE /subjects/:id
#[instrument(skip(state))]
pub async fn delete_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.catalog.delete_subject(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => permission_error_to_response(e),
    }
}

/// DELETE /subjects/by-external-id/:subject_type/:subject_id
#[instrument(skip(state))]
pub async fn delete_by_external_id_handler(
    State(state): State<Arc<AppState>>,
    Path((subject_type, subject_id)): Path<(String, String)>,
) -> Response {
    let subject_type = match parse_subject_type(&subject_type) {
        Ok(t) => t,
        Err(response) => return response,
    };

    match state
        .catalog
        .delete_subject_by_external_id(subject_type, &subject_id)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => permission_error_to_response(e),
    }
}

//! Permission API Routes
//!
//! - GET /permissions - Every grant, uncollapsed
//! - POST /permissions - Grant a permission
//! - GET /permissions/resources/:rt/:rn - Every grant on one resource
//! - GET /permissions/subjects/:st/:sid[/:rt[/:rn]] - Effective permissions
//! - PUT/DELETE /permissions/subjects/:st/:sid/:rt/:rn - Grant or revoke by path
//! - POST /permissions/subjects/:st/:sid/copy - Copy grants to other subjects
//! - GET /permissions/abbreviated/subjects/:st/:sid/:rt - Effective permissions without subject details

use super::{parse_subject_type, permission_error_to_response, with_warning};
use crate::permissions::{
    Enriched, Permission, PermissionGrantRequest, PermissionPutRequest, SubjectsIn,
};
use crate::server::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Create the permissions router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/permissions", get(list_handler).post(grant_handler))
        .route(
            "/permissions/resources/:resource_type/:resource_name",
            get(resource_permissions_handler),
        )
        .route(
            "/permissions/subjects/:subject_type/:subject_id",
            get(effective_handler),
        )
        .route(
            "/permissions/subjects/:subject_type/:subject_id/copy",
            post(copy_handler),
        )
        .route(
            "/permissions/subjects/:subject_type/:subject_id/:resource_type",
            get(effective_for_type_handler),
        )
        .route(
            "/permissions/subjects/:subject_type/:subject_id/:resource_type/:resource_name",
            get(effective_for_resource_handler)
                .put(put_handler)
                .delete(revoke_handler),
        )
        .route(
            "/permissions/abbreviated/subjects/:subject_type/:subject_id/:resource_type",
            get(abbreviated_handler),
        )
        .with_state(state)
}

// === Request/Response Types ===

/// Query parameters accepted by effective permission lookups
#[derive(Debug, Default, Deserialize)]
pub struct LookupQuery {
    /// Include the permissions of the subject's groups
    #[serde(default)]
    pub lookup: bool,
    /// Omit grants below this level
    pub min_level: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PermissionListResponse<T> {
    pub permissions: Vec<T>,
}

#[derive(Debug, Serialize)]
pub struct CopyResponse {
    pub copied: usize,
}

fn list_response(result: Enriched<Vec<Permission>>) -> Response {
    let Enriched { value, warning } = result;
    debug!("Returning {} permissions", value.len());
    with_warning(
        (
            StatusCode::OK,
            Json(PermissionListResponse { permissions: value }),
        )
            .into_response(),
        warning,
    )
}

fn permission_response(result: Enriched<Permission>) -> Response {
    let Enriched { value, warning } = result;
    with_warning((StatusCode::OK, Json(value)).into_response(), warning)
}

// === Handlers ===

/// GET /permissions
#[instrument(skip(state))]
pub async fn list_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.permissions.list_permissions().await {
        Ok(result) => list_response(result),
        Err(e) => permission_error_to_response(e),
    }
}

/// POST /permissions
#[instrument(skip(state))]
pub async fn grant_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PermissionGrantRequest>,
) -> Response {
    info!(
        "Grant {} on {}/{} to {}/{}",
        request.permission_level,
        request.resource.resource_type,
        request.resource.name,
        request.subject.subject_type,
        request.subject.subject_id
    );

    match state.permissions.grant(&request).await {
        Ok(result) => permission_response(result),
        Err(e) => permission_error_to_response(e),
    }
}

/// GET /permissions/resources/:resource_type/:resource_name
#[instrument(skip(state))]
pub async fn resource_permissions_handler(
    State(state): State<Arc<AppState>>,
    Path((resource_type, resource_name)): Path<(String, String)>,
) -> Response {
    match state
        .permissions
        .list_resource_permissions(&resource_type, &resource_name)
        .await
    {
        Ok(result) => list_response(result),
        Err(e) => permission_error_to_response(e),
    }
}

/// GET /permissions/subjects/:subject_type/:subject_id
#[instrument(skip(state))]
pub async fn effective_handler(
    State(state): State<Arc<AppState>>,
    Path((subject_type, subject_id)): Path<(String, String)>,
    Query(query): Query<LookupQuery>,
) -> Response {
    let subject_type = match parse_subject_type(&subject_type) {
        Ok(t) => t,
        Err(response) => return response,
    };

    match state
        .permissions
        .effective_permissions(
            subject_type,
            &subject_id,
            query.lookup,
            query.min_level.as_deref(),
        )
        .await
    {
        Ok(result) => list_response(result),
        Err(e) => permission_error_to_response(e),
    }
}

/// GET /permissions/subjects/:subject_type/:subject_id/:resource_type
#[instrument(skip(state))]
pub async fn effective_for_type_handler(
    State(state): State<Arc<AppState>>,
    Path((subject_type, subject_id, resource_type)): Path<(String, String, String)>,
    Query(query): Query<LookupQuery>,
) -> Response {
    let subject_type = match parse_subject_type(&subject_type) {
        Ok(t) => t,
        Err(response) => return response,
    };

    match state
        .permissions
        .effective_permissions_for_type(
            subject_type,
            &subject_id,
            &resource_type,
            query.lookup,
            query.min_level.as_deref(),
        )
        .await
    {
        Ok(result) => list_response(result),
        Err(e) => permission_error_to_response(e),
    }
}

/// GET /permissions/subjects/:subject_type/:subject_id/:resource_type/:resource_name
#[instrument(skip(state))]
pub async fn effective_for_resource_handler(
    State(state): State<Arc<AppState>>,
    Path((subject_type, subject_id, resource_type, resource_name)): Path<(
        String,
        String,
        String,
        String,
    )>,
    Query(query): Query<LookupQuery>,
) -> Response {
    let subject_type = match parse_subject_type(&subject_type) {
        Ok(t) => t,
        Err(response) => return response,
    };

    match state
        .permissions
        .effective_permissions_for_resource(
            subject_type,
            &subject_id,
            &resource_type,
            &resource_name,
            query.lookup,
            query.min_level.as_deref(),
        )
        .await
    {
        Ok(result) => list_response(result),
        Err(e) => permission_error_to_response(e),
    }
}

/// PUT /permissions/subjects/:subject_type/:subject_id/:resource_type/:resource_name
#[instrument(skip(state))]
pub async fn put_handler(
    State(state): State<Arc<AppState>>,
    Path((subject_type, subject_id, resource_type, resource_name)): Path<(
        String,
        String,
        String,
        String,
    )>,
    Json(request): Json<PermissionPutRequest>,
) -> Response {
    let subject_type = match parse_subject_type(&subject_type) {
        Ok(t) => t,
        Err(response) => return response,
    };

    info!(
        "Put {} on {}/{} for {}/{}",
        request.permission_level, resource_type, resource_name, subject_type, subject_id
    );

    match state
        .permissions
        .put_permission(
            subject_type,
            &subject_id,
            &resource_type,
            &resource_name,
            &request.permission_level,
        )
        .await
    {
        Ok(result) => permission_response(result),
        Err(e) => permission_error_to_response(e),
    }
}

/// DELETE /permissions/subjects/:subject_type/:subject_id/:resource_type/:resource_name
#[instrument(skip(state))]
pub async fn revoke_handler(
    State(state): State<Arc<AppState>>,
    Path((subject_type, subject_id, resource_type, resource_name)): Path<(
        String,
        String,
        String,
        String,
    )>,
) -> Response {
    let subject_type = match parse_subject_type(&subject_type) {
        Ok(t) => t,
        Err(response) => return response,
    };

    match state
        .permissions
        .revoke(subject_type, &subject_id, &resource_type, &resource_name)
        .await
    {
        Ok(()) => {
            info!("Permission revoked");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => permission_error_to_response(e),
    }
}

/// POST /permissions/subjects/:subject_type/:subject_id/copy
#[instrument(skip(state, request))]
pub async fn copy_handler(
    State(state): State<Arc<AppState>>,
    Path((subject_type, subject_id)): Path<(String, String)>,
    Json(request): Json<SubjectsIn>,
) -> Response {
    let subject_type = match parse_subject_type(&subject_type) {
        Ok(t) => t,
        Err(response) => return response,
    };

    match state
        .permissions
        .copy_permissions(subject_type, &subject_id, &request.subjects)
        .await
    {
        Ok(copied) => {
            info!("Copied {} grants to {} subjects", copied, request.subjects.len());
            (StatusCode::OK, Json(CopyResponse { copied })).into_response()
        }
        Err(e) => permission_error_to_response(e),
    }
}

/// GET /permissions/abbreviated/subjects/:subject_type/:subject_id/:resource_type
#[instrument(skip(state))]
pub async fn abbreviated_handler(
    State(state): State<Arc<AppState>>,
    Path((subject_type, subject_id, resource_type)): Path<(String, String, String)>,
    Query(query): Query<LookupQuery>,
) -> Response {
    let subject_type = match parse_subject_type(&subject_type) {
        Ok(t) => t,
        Err(response) => return response,
    };

    match state
        .permissions
        .abbreviated_effective_permissions_for_type(
            subject_type,
            &subject_id,
            &resource_type,
            query.lookup,
            query.min_level.as_deref(),
        )
        .await
    {
        Ok(permissions) => {
            (StatusCode::OK, Json(PermissionListResponse { permissions })).into_response()
        }
        Err(e) => permission_error_to_response(e),
    }
}

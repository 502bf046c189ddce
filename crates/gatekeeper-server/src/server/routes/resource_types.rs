//! Resource type catalog routes

use super::permission_error_to_response;
use crate::permissions::{ResourceType, ResourceTypeIn};
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

/// Create the resource types router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/resource_types", get(list_handler).post(add_handler))
        .route("/resource_types/:id", put(update_handler).delete(delete_handler))
        .route("/resource_types/by-name/:name", delete(delete_by_name_handler))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub resource_type_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResourceTypeListResponse {
    pub resource_types: Vec<ResourceType>,
}

/// GET /resource_types
#[instrument(skip(state))]
pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    match state
        .catalog
        .list_resource_types(query.resource_type_name.as_deref())
        .await
    {
        Ok(resource_types) => {
            (StatusCode::OK, Json(ResourceTypeListResponse { resource_types })).into_response()
        }
        Err(e) => permission_error_to_response(e),
    }
}

/// POST /resource_types
#[instrument(skip(state))]
pub async fn add_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResourceTypeIn>,
) -> Response {
    match state.catalog.add_resource_type(&request).await {
        Ok(resource_type) => {
            info!("Resource type created: {}", resource_type.name);
            (StatusCode::CREATED, Json(resource_type)).into_response()
        }
        Err(e) => permission_error_to_response(e),
    }
}

/// PUT /resource_types/:id
#[instrument(skip(state))]
pub async fn update_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<ResourceTypeIn>,
) -> Response {
    match state.catalog.update_resource_type(&id, &request).await {
        Ok(resource_type) => (StatusCode::OK, Json(resource_type)).into_response(),
        Err(e) => permission_error_to_response(e),
    }
}

/// DELETE /resource_types/:id
#[instrument(skip(state))]
pub async fn delete_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.catalog.delete_resource_type(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => permission_error_to_response(e),
    }
}

/// DELETE /resource_types/by-name/:name
#[instrument(skip(state))]
pub async fn delete_by_name_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    match state.catalog.delete_resource_type_by_name(&name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => permission_error_to_response(e),
    }
}

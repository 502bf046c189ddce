//! Resource catalog routes

use super::permission_error_to_response;
use crate::permissions::{Resource, ResourceIn, ResourceUpdate};
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

/// Create the resources router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/resources", get(list_handler).post(add_handler))
        .route("/resources/:id", put(update_handler).delete(delete_handler))
        .route(
            "/resources/by-name/:resource_type/:resource_name",
            delete(delete_by_name_handler),
        )
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub resource_type_name: Option<String>,
    pub resource_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResourceListResponse {
    pub resources: Vec<Resource>,
}

/// GET /resources
#[instrument(skip(state))]
pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    match state
        .catalog
        .list_resources(
            query.resource_type_name.as_deref(),
            query.resource_name.as_deref(),
        )
        .await
    {
        Ok(resources) => (StatusCode::OK, Json(ResourceListResponse { resources })).into_response(),
        Err(e) => permission_error_to_response(e),
    }
}

/// POST /resources
#[instrument(skip(state))]
pub async fn add_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResourceIn>,
) -> Response {
    match state.catalog.add_resource(&request).await {
        Ok(resource) => {
            info!("Resource created: {}/{}", resource.resource_type, resource.name);
            (StatusCode::CREATED, Json(resource)).into_response()
        }
        Err(e) => permission_error_to_response(e),
    }
}

/// PUT /resources/:id
#[instrument(skip(state))]
pub async fn update_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<ResourceUpdate>,
) -> Response {
    match state.catalog.update_resource(&id, &request).await {
        Ok(resource) => (StatusCode::OK, Json(resource)).into_response(),
        Err(e) => permission_error_to_response(e),
    }
}

/// DELETE /resources/:id
#[instrument(skip(state))]
pub async fn delete_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.catalog.delete_resource(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => permission_error_to_response(e),
    }
}

/// DELETE /resources/by-name/:resource_type/:resource_name
#[instrument(skip(state))]
pub async fn delete_by_name_handler(
    State(state): State<Arc<AppState>>,
    Path((resource_type, resource_name)): Path<(String, String)>,
) -> Response {
    match state
        .catalog
        .delete_resource_by_name(&resource_type, &resource_name)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => permission_error_to_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticGroupDirectory;
    use crate::permissions::ResourceTypeIn;
    use crate::server::routes::test_support::{send, test_state};
    use serde_json::json;

    async fn create_test_app() -> (Arc<AppState>, Router) {
        let state = test_state(Arc::new(StaticGroupDirectory::new())).await;
        for name in ["app", "analysis"] {
            state
                .catalog
                .add_resource_type(&ResourceTypeIn {
                    name: name.to_string(),
                    description: None,
                })
                .await
                .unwrap();
        }
        (state.clone(), router(state))
    }

    async fn add(app: &Router, resource_type: &str, name: &str) -> (StatusCode, serde_json::Value) {
        let (status, _, body) = send(
            app,
            "POST",
            "/resources",
            Some(json!({ "name": name, "resource_type": resource_type })),
        )
        .await;
        (status, body)
    }

    #[tokio::test]
    async fn test_add_and_filter() {
        let (_, app) = create_test_app().await;

        assert_eq!(add(&app, "app", "cat").await.0, StatusCode::CREATED);
        assert_eq!(add(&app, "app", "dog").await.0, StatusCode::CREATED);
        assert_eq!(add(&app, "analysis", "cat").await.0, StatusCode::CREATED);

        let (status, body) = add(&app, "app", "cat").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "conflict");

        let (status, body) = add(&app, "widget", "cat").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "unknown_resource_type");

        let (_, _, body) = send(&app, "GET", "/resources", None).await;
        assert_eq!(body["resources"].as_array().unwrap().len(), 3);

        let (_, _, body) = send(&app, "GET", "/resources?resource_type_name=app", None).await;
        assert_eq!(body["resources"].as_array().unwrap().len(), 2);

        let (_, _, body) = send(&app, "GET", "/resources?resource_name=cat", None).await;
        let resources = body["resources"].as_array().unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0]["resource_type"], "analysis");
    }

    #[tokio::test]
    async fn test_rename() {
        let (_, app) = create_test_app().await;
        let (_, cat) = add(&app, "app", "cat").await;
        add(&app, "app", "dog").await;
        let uri = format!("/resources/{}", cat["id"].as_str().unwrap());

        let (status, _, body) = send(&app, "PUT", &uri, Some(json!({ "name": "lion" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "lion");
        assert_eq!(body["resource_type"], "app");

        let (status, _, _) = send(&app, "PUT", &uri, Some(json!({ "name": "dog" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _, _) =
            send(&app, "PUT", "/resources/missing", Some(json!({ "name": "x" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_cascades_permissions() {
        let (state, app) = create_test_app().await;
        state
            .permissions
            .put_permission(crate::permissions::SubjectType::User, "alice", "app", "cat", "read")
            .await
            .unwrap();

        let (status, _, _) = send(&app, "DELETE", "/resources/by-name/app/cat", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let permissions = state.permissions.list_permissions().await.unwrap().into_inner();
        assert!(permissions.is_empty());

        let (status, _, _) = send(&app, "DELETE", "/resources/by-name/app/cat", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

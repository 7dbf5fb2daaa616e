//! Axum HTTP surface of the provisioning service.

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use fleet_core::{
    types::{CreateSandboxRequest, SandboxStatus},
    Error, Result,
};

use crate::service::Provisioner;

/// Error body: `{"detail": "..."}`.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidThreadId(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let detail = match &self.0 {
            // The message alone reads better than the variant prefix.
            Error::NotFound(msg) | Error::Cluster(msg) => msg.clone(),
            other => other.to_string(),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub ok: bool,
    pub sandbox_id: String,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub sandboxes: Vec<SandboxStatus>,
    pub count: usize,
}

/// Build the router.
pub fn build_router(provisioner: Arc<Provisioner>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/sandboxes", post(create_handler).get(list_handler))
        .route(
            "/api/sandboxes/:sandbox_id",
            get(get_handler).delete(delete_handler),
        )
        .with_state(provisioner)
        .layer(TraceLayer::new_for_http())
}

/// Bind `0.0.0.0:{port}` and serve until the future is dropped.
pub async fn serve(provisioner: Arc<Provisioner>, port: u16) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::config(format!("Failed to bind {}: {}", addr, e)))?;

    tracing::info!(addr = %addr, "Provisioner listening");

    axum::serve(listener, build_router(provisioner))
        .await
        .map_err(|e| Error::internal(format!("Server error: {}", e)))
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn create_handler(
    State(provisioner): State<Arc<Provisioner>>,
    Json(req): Json<CreateSandboxRequest>,
) -> std::result::Result<Json<SandboxStatus>, ApiError> {
    Ok(Json(provisioner.create(&req).await?))
}

async fn get_handler(
    State(provisioner): State<Arc<Provisioner>>,
    Path(sandbox_id): Path<String>,
) -> std::result::Result<Json<SandboxStatus>, ApiError> {
    Ok(Json(provisioner.get(&sandbox_id).await?))
}

async fn delete_handler(
    State(provisioner): State<Arc<Provisioner>>,
    Path(sandbox_id): Path<String>,
) -> std::result::Result<Json<DeleteResponse>, ApiError> {
    provisioner.destroy(&sandbox_id).await?;
    Ok(Json(DeleteResponse {
        ok: true,
        sandbox_id,
    }))
}

async fn list_handler(
    State(provisioner): State<Arc<Provisioner>>,
) -> std::result::Result<Json<ListResponse>, ApiError> {
    let sandboxes = provisioner.list().await?;
    Ok(Json(ListResponse {
        count: sandboxes.len(),
        sandboxes,
    }))
}

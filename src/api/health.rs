use axum::{extract::State, http::StatusCode, routing::get, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::app_state::AppState;
use crate::utils::api_response::ApiResponse;
use crate::utils::error::AppError;

#[derive(Serialize, ToSchema)]
pub struct HealthStatus {
    pub status: String,
}

/// Defines health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health/live", get(liveness_check)) // ✅ Liveness check
        .route("/health/ready", get(readiness_check)) // ✅ Readiness check
}

/// **Liveness Check**: the process is up. Does not touch the store.
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses((status = 200, description = "API is live", body = HealthStatus))
)]
pub async fn liveness_check() -> ApiResponse<HealthStatus> {
    ApiResponse::success(StatusCode::OK, "API is live", HealthStatus { status: "live".to_string() })
}

/// **Readiness Check**: the store answers.
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "API is ready", body = HealthStatus),
        (status = 500, description = "Store unavailable")
    )
)]
pub async fn readiness_check(
    State(state): State<AppState>,
) -> Result<ApiResponse<HealthStatus>, ApiResponse<()>> {
    state.store.ping().await.map_err(AppError::from)?;
    Ok(ApiResponse::success(StatusCode::OK, "API is ready", HealthStatus { status: "ready".to_string() }))
}

use utoipa::OpenApi;
#[derive(OpenApi)]
#[openapi(
    paths(liveness_check, readiness_check),
    components(schemas(HealthStatus)),
    tags((name = "Health", description = "Liveness and readiness probes"))
)]
pub struct HealthDoc;

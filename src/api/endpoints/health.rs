use axum::extract::State;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, HealthResponse};
use crate::config;

/// `GET /v1/health`
pub async fn check(State(ctx): State<ApiContext>) -> Result<Json<HealthResponse>, ApiError> {
    let catalog_version = ctx.store.current_meta()?.map(|m| m.bundle_version);
    Ok(Json(HealthResponse {
        status: "ok",
        version: config::APP_VERSION,
        catalog_version,
        rules_version: ctx.orchestrator.engine().version().to_string(),
    }))
}

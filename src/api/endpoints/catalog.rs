//! `/v1/catalog/*`: read-only catalog lookups.

use axum::extract::{Path, State};
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::models::{Guideline, LabTest};

/// `GET /v1/catalog/tests/:code`
pub async fn test(
    State(ctx): State<ApiContext>,
    Path(code): Path<String>,
) -> Result<Json<LabTest>, ApiError> {
    ctx.store
        .get_test(&code)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Test {code} not found")))
}

/// `GET /v1/catalog/tests/:code/guideline`
pub async fn guideline(
    State(ctx): State<ApiContext>,
    Path(code): Path<String>,
) -> Result<Json<Guideline>, ApiError> {
    ctx.store
        .get_guideline(&code)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No guideline for {code}")))
}

//! `/v1/labs/*` handlers.

use axum::extract::State;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, InterpretRequest, OkResponse};
use crate::interpret::{InterpretationResult, NewLabResult};
use crate::models::LabResult;

/// `POST /v1/labs/results`: persist a raw result and return it.
pub async fn ingest(
    State(ctx): State<ApiContext>,
    Json(body): Json<NewLabResult>,
) -> Result<Json<LabResult>, ApiError> {
    let stored = ctx.orchestrator.ingest(body)?;
    Ok(Json(stored))
}

/// `POST /v1/labs/interpret`: best-effort interpretation, always 200 for valid input.
pub async fn interpret(
    State(ctx): State<ApiContext>,
    Json(body): Json<InterpretRequest>,
) -> Result<Json<InterpretationResult>, ApiError> {
    let result = ctx
        .orchestrator
        .interpret_with_context(&body.patient_id, &body.items, body.context)
        .await?;
    Ok(Json(result))
}

/// `GET /v1/labs/rules`
pub async fn rules(State(ctx): State<ApiContext>) -> Json<OkResponse> {
    let engine = ctx.orchestrator.engine();
    tracing::debug!(version = engine.version(), rules = engine.rule_count(), "Rule bundle liveness");
    Json(OkResponse { ok: true })
}

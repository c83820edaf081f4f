//! HTTP router. Routes are nested under `/v1/`.
//!
//! Layers (outermost → innermost): Cache-Control header → access log → handler.

use axum::http::{header, HeaderValue};
use axum::routing::{get, post};
use axum::Router;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;

/// Build the service router.
///
/// NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
pub fn api_router(ctx: ApiContext) -> Router {
    let v1 = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/labs/results", post(endpoints::labs::ingest))
        .route("/labs/interpret", post(endpoints::labs::interpret))
        .route("/labs/rules", get(endpoints::labs::rules))
        .route("/catalog/tests/:code", get(endpoints::catalog::test))
        .route("/catalog/tests/:code/guideline", get(endpoints::catalog::guideline))
        .with_state(ctx);

    Router::new()
        .nest("/v1", v1)
        .layer(axum::middleware::from_fn(middleware::access_log::log_access))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
}

pub mod dto;
pub mod errors;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use handlers::ApiDoc;

use crate::{
    flush::FlushWorker,
    metrics::{self, Metrics},
    readiness::ReadinessService,
    temperature::TemperatureService,
};

/// Services shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub temperature: Arc<TemperatureService>,
    pub flusher: Arc<FlushWorker>,
    pub readiness: Arc<ReadinessService>,
    pub metrics: Metrics,
}

pub fn router(state: AppState) -> Router {
    let http_metrics = state.metrics.clone();
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/temperature", get(handlers::get_temperature))
        .route("/store", post(handlers::store))
        .route("/readyz", get(handlers::readyz))
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .split_for_parts();

    router
        .route("/version", get(handlers::version))
        .route("/health", get(handlers::health))
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
        .layer(middleware::from_fn_with_state(http_metrics, metrics::track_http))
}

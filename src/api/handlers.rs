use anyhow::Context;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use tracing::{error, info};
use utoipa::OpenApi;

use super::{
    dto::{
        CacheAgeDto, ErrorDto, ReadinessDto, ReadinessStatus, SenseBoxAvailabilityDto, StoreDto,
        TemperatureDto, TemperatureStatus, VersionDto,
    },
    errors::AppError,
    AppState,
};

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Average temperature across the configured senseBoxes.
///
/// Served from cache when possible; falls back to the latest stored record
/// when no station has fresh data.
#[utoipa::path(
    get,
    path = "/temperature",
    responses(
        (status = 200, description = "Current average temperature", body = TemperatureDto),
        (status = 503, description = "No live or stored data available", body = ErrorDto),
    ),
    tag = "temperature"
)]
pub async fn get_temperature(
    State(state): State<AppState>,
) -> Result<Json<TemperatureDto>, AppError> {
    let Some(response) = state.temperature.cached().await else {
        state.metrics.record_temperature_request(None);
        return Err(AppError::NoData);
    };

    let body = TemperatureDto::at(&response, Utc::now());
    state.metrics.record_temperature_request(Some(body.data_age_seconds.unwrap_or(0.0)));
    info!(
        average_temperature = body.average_temperature,
        status = ?body.status,
        data_age_seconds = ?body.data_age_seconds,
        "Returning temperature"
    );
    Ok(Json(body))
}

/// Flush buffered readings to object storage now.
#[utoipa::path(
    post,
    path = "/store",
    responses(
        (status = 200, description = "Buffered records flushed", body = StoreDto),
        (status = 503, description = "Object storage not configured", body = ErrorDto),
    ),
    tag = "temperature"
)]
pub async fn store(State(state): State<AppState>) -> Result<Json<StoreDto>, AppError> {
    let flushed = state.flusher.flush().await.ok_or(AppError::StorageUnavailable)?;
    Ok(Json(StoreDto { flushed }))
}

/// Whether the service can answer `/temperature` usefully.
///
/// `503` only when more than half of the senseBoxes are unreachable and the
/// cached temperature is older than the allowed age.
#[utoipa::path(
    get,
    path = "/readyz",
    responses(
        (status = 200, description = "Ready", body = ReadinessDto),
        (status = 503, description = "Not ready", body = ReadinessDto),
    ),
    tag = "system"
)]
pub async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<ReadinessDto>) {
    let report = state.readiness.evaluate().await;
    let status = if report.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report.into()))
}

/// Deployed package version.
#[utoipa::path(
    get,
    path = "/version",
    responses(
        (status = 200, description = "Service version", body = VersionDto),
    ),
    tag = "system"
)]
pub async fn version() -> Json<VersionDto> {
    Json(VersionDto {
        version: env!("CARGO_PKG_VERSION").to_owned(),
    })
}

/// Liveness: the process is up and serving.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "system"
)]
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Prometheus text exposition of the service metrics.
#[utoipa::path(
    get,
    path = "/metrics",
    responses(
        (status = 200, description = "Prometheus metrics in text format", body = String, content_type = "text/plain"),
        (status = 500, description = "Failed to encode metrics"),
    ),
    tag = "system"
)]
pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.encode() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!(error = %format!("{e:#}"), "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// OpenAPI document
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(get_temperature, store, readyz, version, health, metrics),
    components(schemas(
        TemperatureDto,
        TemperatureStatus,
        StoreDto,
        ReadinessDto,
        ReadinessStatus,
        SenseBoxAvailabilityDto,
        CacheAgeDto,
        VersionDto,
        ErrorDto,
    )),
    tags(
        (name = "temperature", description = "Temperature endpoints"),
        (name = "system",      description = "System endpoints"),
    ),
    info(
        title = "HiveBox API",
        version = "0.1.0",
        description = "Average temperature from openSenseMap senseBoxes"
    )
)]
pub struct ApiDoc;

/// The OpenAPI document as pretty-printed JSON.
pub fn openapi_json() -> anyhow::Result<String> {
    ApiDoc::openapi()
        .to_pretty_json()
        .context("Failed to serialise OpenAPI document")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

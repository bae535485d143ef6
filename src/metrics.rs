//! Prometheus instrumentation.
//!
//! Each [`Metrics`] owns its registry, so `/metrics` exposes exactly the
//! collectors of one service graph.

use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use tokio::time::Instant;

/// HTTP request latency buckets (seconds).
const HTTP_LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

const CACHE_TYPE: &str = "valkey";
const STORAGE_TYPE: &str = "minio";

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    /// labels: type
    pub cache_hit_total: CounterVec,
    /// labels: type
    pub cache_miss_total: CounterVec,
    /// labels: type, status (success/failed)
    pub storage_write_operations_total: CounterVec,
    /// labels: status (success/no_data)
    pub temperature_requests_total: CounterVec,
    pub temperature_data_age_seconds: Gauge,
    /// labels: method, path, status
    pub http_requests_total: CounterVec,
    /// labels: method, path, status
    pub http_request_duration_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let cache_hit_total = CounterVec::new(
            Opts::new("cache_hit_total", "Total number of cache hits"),
            &["type"],
        )?;
        let cache_miss_total = CounterVec::new(
            Opts::new("cache_miss_total", "Total number of cache misses"),
            &["type"],
        )?;
        let storage_write_operations_total = CounterVec::new(
            Opts::new("storage_write_operations_total", "Total storage write operations"),
            &["type", "status"],
        )?;
        let temperature_requests_total = CounterVec::new(
            Opts::new("temperature_requests_total", "Total temperature endpoint requests"),
            &["status"],
        )?;
        let temperature_data_age_seconds = Gauge::new(
            "temperature_data_age_seconds",
            "Age in seconds of the most recent temperature value",
        )?;
        let http_requests_total = CounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests"),
            &["method", "path", "status"],
        )?;
        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "HTTP request duration in seconds")
                .buckets(HTTP_LATENCY_BUCKETS.to_vec()),
            &["method", "path", "status"],
        )?;

        registry.register(Box::new(cache_hit_total.clone()))?;
        registry.register(Box::new(cache_miss_total.clone()))?;
        registry.register(Box::new(storage_write_operations_total.clone()))?;
        registry.register(Box::new(temperature_requests_total.clone()))?;
        registry.register(Box::new(temperature_data_age_seconds.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            cache_hit_total,
            cache_miss_total,
            storage_write_operations_total,
            temperature_requests_total,
            temperature_data_age_seconds,
            http_requests_total,
            http_request_duration_seconds,
        })
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        let counter = if hit { &self.cache_hit_total } else { &self.cache_miss_total };
        counter.with_label_values(&[CACHE_TYPE]).inc();
    }

    pub fn record_storage_write(&self, success: bool) {
        let status = if success { "success" } else { "failed" };
        self.storage_write_operations_total
            .with_label_values(&[STORAGE_TYPE, status])
            .inc();
    }

    /// Count one `/temperature` request and, when known, publish the age of
    /// the value it returned.
    pub fn record_temperature_request(&self, data_age_seconds: Option<f64>) {
        let status = match data_age_seconds {
            Some(age) => {
                self.temperature_data_age_seconds.set(age);
                "success"
            }
            None => "no_data",
        };
        self.temperature_requests_total.with_label_values(&[status]).inc();
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, elapsed: Duration) {
        let status = status.to_string();
        let labels = [method, path, status.as_str()];
        self.http_requests_total.with_label_values(&labels).inc();
        self.http_request_duration_seconds
            .with_label_values(&labels)
            .observe(elapsed.as_secs_f64());
    }

    /// Prometheus text exposition of every registered collector.
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context("Failed to encode metrics")?;
        String::from_utf8(buffer).context("Metrics exposition is not UTF-8")
    }
}

/// Middleware counting every request by method, matched route and status.
pub async fn track_http(State(metrics): State<Metrics>, request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_owned(), |p| p.as_str().to_owned());

    let response = next.run(request).await;

    metrics.record_http_request(&method, &path, response.status().as_u16(), started.elapsed());
    response
}

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::{
    cache::CacheClient,
    config::CacheConfig,
    flush::FlushWorker,
    sensors::SensorService,
    storage::RecordStore,
};

pub const CACHE_KEY_LATEST: &str = "temperature:latest";
pub const CACHE_LOCK_KEY: &str = "temperature:latest:lock";

/// Comfort band for an average temperature in °C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum TemperatureStatus {
    #[serde(rename = "Too Cold")]
    TooCold,
    Good,
    #[serde(rename = "Too Hot")]
    TooHot,
}

impl TemperatureStatus {
    /// `< 10` is too cold, `10..=36` is good, `> 36` is too hot.
    pub fn from_celsius(t: f64) -> Self {
        if t < 10.0 {
            Self::TooCold
        } else if t <= 36.0 {
            Self::Good
        } else {
            Self::TooHot
        }
    }
}

/// The cached `/temperature` payload.
///
/// Deserialization fails when the average or status is missing, which the
/// cache treats as a miss. The observation time is stored rather than an
/// age, so a cache hit reports how old the data is at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureResponse {
    pub average_temperature: f64,
    pub status: TemperatureStatus,
    /// Newest contributing observation, or the stored record's timestamp.
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

impl TemperatureResponse {
    fn new(average: f64, observed_at: DateTime<Utc>) -> Self {
        let average_temperature = round2(average);
        Self {
            average_temperature,
            status: TemperatureStatus::from_celsius(average_temperature),
            observed_at: Some(observed_at),
        }
    }

    /// Seconds between `observed_at` and `now`, never negative.
    pub fn data_age_seconds(&self, now: DateTime<Utc>) -> Option<f64> {
        self.observed_at.map(|at| age_seconds(at, now))
    }
}

/// Serves the latest average temperature.
///
/// Live data comes from the sensor aggregator; when no device has fresh
/// data the most recent durable record is used instead. With a cache store
/// configured, responses are cached (cache-aside) and refreshed ahead of
/// expiry by at most one refresher at a time.
pub struct TemperatureService {
    sensors: SensorService,
    cache: Option<CacheClient>,
    records: Option<RecordStore>,
    flusher: Arc<FlushWorker>,
    settings: CacheConfig,
}

impl TemperatureService {
    pub fn new(
        sensors: SensorService,
        cache: Option<CacheClient>,
        records: Option<RecordStore>,
        flusher: Arc<FlushWorker>,
        settings: CacheConfig,
    ) -> Self {
        Self { sensors, cache, records, flusher, settings }
    }

    /// Compute a fresh response without touching the cache.
    ///
    /// A live aggregate is queued for durable storage; a fallback record is
    /// not, since it is already stored.
    pub async fn latest(&self) -> Option<TemperatureResponse> {
        if let Some(reading) = self.sensors.aggregate_configured().await {
            let response = TemperatureResponse::new(reading.average_temperature, reading.newest_observed_at);
            self.flusher
                .collect(response.average_temperature, reading.source_ids.clone());
            info!(
                average_temperature = response.average_temperature,
                sources = reading.source_ids.len(),
                "Computed live temperature"
            );
            return Some(response);
        }

        let Some(records) = &self.records else {
            warn!("No live temperature data and object storage is not configured");
            return None;
        };

        info!("No fresh senseBox temperature data; trying object storage");
        match records.get_latest_record().await {
            Some(record) => {
                info!(
                    average_temperature = record.average_temperature,
                    recorded_at = %record.timestamp,
                    "Serving temperature from latest stored record"
                );
                Some(TemperatureResponse::new(record.average_temperature, record.timestamp))
            }
            None => {
                warn!("No temperature data available from senseBox or object storage");
                None
            }
        }
    }

    /// Cache-aside read with refresh-ahead.
    ///
    /// Without a cache store every call computes synchronously.
    pub async fn cached(self: &Arc<Self>) -> Option<TemperatureResponse> {
        let Some(cache) = &self.cache else {
            return self.latest().await;
        };

        if let Some(hit) = cache.get_json::<TemperatureResponse>(CACHE_KEY_LATEST).await {
            let ttl = cache.ttl(CACHE_KEY_LATEST).await;
            debug!(ttl = ?ttl, "Temperature cache hit");
            if ttl.is_some_and(|t| t <= self.settings.refresh_threshold_secs) {
                self.trigger_refresh();
            }
            return Some(hit);
        }

        debug!("Temperature cache miss");
        let response = self.latest().await?;
        cache
            .set_json(CACHE_KEY_LATEST, &response, self.settings.ttl_secs)
            .await;
        Some(response)
    }

    /// Recompute and rewrite the cache entry in the background.
    pub fn trigger_refresh(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.refresh().await;
        });
    }

    /// Recompute and rewrite the cache entry if no other refresh holds the
    /// lock. Returns whether this call did the refresh.
    pub async fn refresh(&self) -> bool {
        let Some(cache) = &self.cache else {
            return false;
        };

        let Some(token) = cache.acquire_lock(CACHE_LOCK_KEY, self.settings.lock_ttl_secs).await else {
            debug!("Temperature refresh already in progress; skipping");
            return false;
        };

        match self.latest().await {
            Some(response) => {
                cache
                    .set_json(CACHE_KEY_LATEST, &response, self.settings.ttl_secs)
                    .await;
                debug!("Temperature cache refreshed");
            }
            None => debug!("Temperature refresh found no data; keeping current entry"),
        }

        cache.release_lock(CACHE_LOCK_KEY, token).await;
        true
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn age_seconds(observed_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let ms = (now - observed_at).num_milliseconds().max(0);
    ms as f64 / 1000.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

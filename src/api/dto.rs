use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{readiness::ReadinessReport, temperature::TemperatureResponse};

pub use crate::temperature::TemperatureStatus;

/// Response for `GET /temperature`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TemperatureDto {
    /// Mean of the fresh device readings in °C, rounded to 2 decimals.
    pub average_temperature: f64,
    pub status: TemperatureStatus,
    /// Seconds since the newest contributing observation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_age_seconds: Option<f64>,
}

impl TemperatureDto {
    /// Body for `r` with its data age measured at `now`.
    pub fn at(r: &TemperatureResponse, now: DateTime<Utc>) -> Self {
        Self {
            average_temperature: r.average_temperature,
            status: r.status,
            data_age_seconds: r.data_age_seconds(now),
        }
    }
}

/// Response for `POST /store`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StoreDto {
    /// Buffered records drained to object storage.
    pub flushed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessStatus {
    Ready,
    NotReady,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SenseBoxAvailabilityDto {
    pub accessible: usize,
    pub total: usize,
    pub inaccessible: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CacheAgeDto {
    /// `null` when no cache store is configured or nothing is cached.
    pub age_seconds: Option<u64>,
    pub max_age_seconds: u64,
}

/// Response for `GET /readyz`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReadinessDto {
    pub status: ReadinessStatus,
    pub sensebox: SenseBoxAvailabilityDto,
    pub cache: CacheAgeDto,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<ReadinessReport> for ReadinessDto {
    fn from(r: ReadinessReport) -> Self {
        Self {
            status: if r.ready { ReadinessStatus::Ready } else { ReadinessStatus::NotReady },
            sensebox: SenseBoxAvailabilityDto {
                accessible: r.accessible,
                total: r.total,
                inaccessible: r.inaccessible,
            },
            cache: CacheAgeDto {
                age_seconds: r.cache_age_seconds,
                max_age_seconds: r.max_cache_age_seconds,
            },
            reason: r.reason,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VersionDto {
    pub version: String,
}

/// Body of every non-2xx response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDto {
    pub error: String,
    pub message: String,
}

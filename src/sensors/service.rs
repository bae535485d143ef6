use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::{
    config::SenseBoxConfig,
    sensebox::{models::Measurement, SensorApi},
};

/// Cross-device average over the fresh measurements of one aggregation run.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateReading {
    pub average_temperature: f64,
    /// Contributing devices, in configured order. Never empty.
    pub source_ids: Vec<String>,
    pub newest_observed_at: DateTime<Utc>,
}

pub struct SensorService {
    api: Arc<dyn SensorApi>,
    device_ids: Vec<String>,
    phenomenon: String,
    max_age: TimeDelta,
}

impl SensorService {
    pub fn new(api: Arc<dyn SensorApi>, config: &SenseBoxConfig) -> Self {
        Self {
            api,
            device_ids: config.box_ids.clone(),
            phenomenon: config.phenomenon.clone(),
            max_age: to_time_delta(config.max_age),
        }
    }

    /// Aggregate the configured devices. See [`SensorService::aggregate`].
    pub async fn aggregate_configured(&self) -> Option<AggregateReading> {
        self.aggregate(&self.device_ids).await
    }

    /// Query every device once (concurrently) and average the fresh readings.
    ///
    /// A device that fails, times out or yields no usable measurement is
    /// skipped. Returns `None` when no device contributes.
    pub async fn aggregate(&self, device_ids: &[String]) -> Option<AggregateReading> {
        let fetches = device_ids.iter().map(|id| self.fresh_measurement(id));
        let results = join_all(fetches).await;

        let now = Utc::now();
        let included: Vec<(&String, Measurement)> = device_ids
            .iter()
            .zip(results)
            .filter_map(|(id, m)| m.map(|m| (id, m)))
            .filter(|(id, m)| {
                let fresh = is_fresh(m.observed_at, now, self.max_age);
                if !fresh {
                    debug!(
                        device_id = %id,
                        age_secs = (now - m.observed_at).num_seconds(),
                        "Skipping stale senseBox measurement"
                    );
                }
                fresh
            })
            .collect();

        let reading = average(&included);
        if reading.is_none() {
            info!("No fresh temperature data available from senseBoxes");
        }
        reading
    }

    async fn fresh_measurement(&self, device_id: &str) -> Option<Measurement> {
        let payload = match self.api.fetch_device(device_id).await {
            Ok(p) => p,
            Err(e) => {
                warn!(device_id = %device_id, error = %format!("{e:#}"), "Failed to fetch senseBox");
                return None;
            }
        };

        let measurement = payload.measurement(&self.phenomenon);
        if measurement.is_none() {
            debug!(
                device_id = %device_id,
                phenomenon = %self.phenomenon,
                "No usable temperature measurement in senseBox payload"
            );
        }
        measurement
    }
}

/// `true` iff `now - observed_at <= max_age`. The boundary is inclusive.
pub fn is_fresh(observed_at: DateTime<Utc>, now: DateTime<Utc>, max_age: TimeDelta) -> bool {
    now - observed_at <= max_age
}

fn average(included: &[(&String, Measurement)]) -> Option<AggregateReading> {
    let newest_observed_at = included.iter().map(|(_, m)| m.observed_at).max()?;
    let sum: f64 = included.iter().map(|(_, m)| m.value).sum();

    Some(AggregateReading {
        average_temperature: sum / included.len() as f64,
        source_ids: included.iter().map(|(id, _)| (*id).clone()).collect(),
        newest_observed_at,
    })
}

fn to_time_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

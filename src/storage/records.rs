use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::ObjectStore;
use crate::metrics::Metrics;

/// Key prefix shared by every temperature record.
pub const RECORDS_PREFIX: &str = "temperature/";

/// One durable aggregate reading.
///
/// Serialized as `{"average_temperature", "timestamp", "source_hivebox_ids"}`
/// with an RFC 3339 timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub average_temperature: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "source_hivebox_ids", default)]
    pub source_ids: Vec<String>,
}

impl PersistedRecord {
    /// Record stamped with the current UTC time.
    pub fn now(average_temperature: f64, source_ids: Vec<String>) -> Self {
        Self {
            average_temperature,
            timestamp: Utc::now(),
            source_ids,
        }
    }

    /// `temperature/YYYY/MM/DD/HHMMSS.json`. Two records in the same second
    /// share a key; the later write wins.
    pub fn object_key(&self) -> String {
        self.timestamp
            .format("temperature/%Y/%m/%d/%H%M%S.json")
            .to_string()
    }
}

/// Durable store adapter: reads and writes [`PersistedRecord`]s as JSON objects.
#[derive(Clone)]
pub struct RecordStore {
    store: Arc<dyn ObjectStore>,
    create_bucket: bool,
    metrics: Metrics,
}

impl RecordStore {
    pub fn new(store: Arc<dyn ObjectStore>, create_bucket: bool, metrics: Metrics) -> Self {
        Self { store, create_bucket, metrics }
    }

    /// Write one record. Failures are logged and reported as `false`.
    pub async fn put_record(&self, record: &PersistedRecord) -> bool {
        let written = self.write(record).await;
        self.metrics.record_storage_write(written);
        written
    }

    async fn write(&self, record: &PersistedRecord) -> bool {
        let key = record.object_key();
        let body = match serde_json::to_vec(record) {
            Ok(body) => body,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize temperature record");
                return false;
            }
        };

        match self.store.put_object(&key, body, "application/json").await {
            Ok(()) => {
                debug!(key = %key, "Temperature record written");
                true
            }
            Err(e) => {
                warn!(key = %key, error = %format!("{e:#}"), "Failed to write temperature record");
                false
            }
        }
    }

    /// Write every record in order, returning how many were stored.
    pub async fn put_records(&self, records: &[PersistedRecord]) -> usize {
        let mut written = 0;
        for record in records {
            if self.put_record(record).await {
                written += 1;
            }
        }
        written
    }

    /// Most recently modified record, ties broken by key.
    ///
    /// Listing, fetching and parsing failures all yield `None`.
    pub async fn get_latest_record(&self) -> Option<PersistedRecord> {
        let objects = match self.store.list_objects(RECORDS_PREFIX).await {
            Ok(objects) => objects,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Failed to list temperature records");
                return None;
            }
        };

        let latest = objects
            .into_iter()
            .max_by(|a, b| (a.last_modified, &a.key).cmp(&(b.last_modified, &b.key)))?;

        let bytes = match self.store.get_object(&latest.key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %latest.key, error = %format!("{e:#}"), "Failed to read latest temperature record");
                return None;
            }
        };

        match serde_json::from_slice::<PersistedRecord>(&bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(key = %latest.key, error = %e, "Failed to parse latest temperature record");
                None
            }
        }
    }

    /// Verify the bucket exists, creating it when allowed.
    pub async fn ensure_bucket(&self) -> Result<()> {
        let bucket = self.store.bucket();
        let exists = self
            .store
            .bucket_exists()
            .await
            .context("Object storage is not reachable")?;

        if exists {
            info!(bucket = %bucket, "Object storage bucket is ready");
            return Ok(());
        }

        if !self.create_bucket {
            bail!("bucket {bucket:?} does not exist and bucket creation is disabled");
        }

        self.store
            .create_bucket()
            .await
            .with_context(|| format!("Failed to create bucket {bucket:?}"))?;
        info!(bucket = %bucket, "Created object storage bucket");
        Ok(())
    }

    /// [`RecordStore::ensure_bucket`] with linear backoff: after failed
    /// attempt `n` the next one waits `base_delay * n`.
    pub async fn ensure_bucket_with_retry(&self, max_attempts: u32, base_delay: Duration) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.ensure_bucket().await {
                Ok(()) => {
                    info!(attempt, "Object storage connection established");
                    return Ok(());
                }
                Err(e) if attempt < max_attempts => {
                    let wait = base_delay * attempt;
                    warn!(
                        attempt,
                        max_attempts,
                        error = %format!("{e:#}"),
                        wait_secs = wait.as_secs_f64(),
                        "Object storage not ready; retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(attempts = attempt, error = %format!("{e:#}"), "Object storage never became ready");
                    return Err(e.context(format!("object storage not ready after {attempt} attempts")));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! In-memory stand-ins for the sensor API, cache store and object store,
//! plus a harness that wires the full service graph on top of them.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::time::Instant;

use crate::{
    api::AppState,
    cache::{CacheClient, CacheStore},
    config::{CacheConfig, SenseBoxConfig},
    flush::FlushWorker,
    metrics::Metrics,
    readiness::ReadinessService,
    sensebox::{models::DevicePayload, SensorApi},
    sensors::SensorService,
    storage::{ObjectMeta, ObjectStore, PersistedRecord, RecordStore},
    temperature::TemperatureService,
};

// ---------------------------------------------------------------------------
// Sensor API
// ---------------------------------------------------------------------------

enum FakeDevice {
    Payload(serde_json::Value),
    Failing,
}

/// Devices without an entry behave like unreachable hosts.
#[derive(Default)]
pub struct FakeSensorApi {
    devices: Mutex<HashMap<String, FakeDevice>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Mutex<Option<Duration>>,
}

impl FakeSensorApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_payload(&self, id: &str, payload: serde_json::Value) {
        self.devices
            .lock()
            .unwrap()
            .insert(id.to_owned(), FakeDevice::Payload(payload));
    }

    pub fn set_measurement(&self, id: &str, value: f64, observed_at: DateTime<Utc>) {
        self.set_payload(
            id,
            json!({
                "sensors": [
                    { "title": "rel. Luftfeuchte",
                      "lastMeasurement": { "value": "50.0", "createdAt": observed_at.to_rfc3339() } },
                    { "title": "Temperatur",
                      "lastMeasurement": { "value": value.to_string(), "createdAt": observed_at.to_rfc3339() } }
                ]
            }),
        );
    }

    /// A measurement taken one minute ago.
    pub fn set_fresh(&self, id: &str, value: f64) {
        self.set_measurement(id, value, Utc::now() - TimeDelta::minutes(1));
    }

    pub fn set_failing(&self, id: &str) {
        self.devices
            .lock()
            .unwrap()
            .insert(id.to_owned(), FakeDevice::Failing);
    }

    /// Every fetch sleeps this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn fetch_count(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn fetch_count_for(&self, id: &str) -> usize {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl SensorApi for FakeSensorApi {
    async fn fetch_device(&self, device_id: &str) -> Result<DevicePayload> {
        *self.calls.lock().unwrap().entry(device_id.to_owned()).or_default() += 1;

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let payload = match self.devices.lock().unwrap().get(device_id) {
            Some(FakeDevice::Payload(v)) => v.clone(),
            Some(FakeDevice::Failing) | None => bail!("device {device_id} timed out"),
        };
        Ok(serde_json::from_value(payload)?)
    }
}

// ---------------------------------------------------------------------------
// Cache store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
    unavailable: AtomicBool,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every operation fails like a dropped connection.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn insert_raw(&self, key: &str, value: &str, ttl_secs: u64) {
        let expires = Instant::now() + Duration::from_secs(ttl_secs);
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_owned(), (value.to_owned(), Some(expires)));
    }

    pub fn insert_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        self.insert_raw(key, &serde_json::to_string(value).unwrap(), ttl_secs);
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.live(key).map(|(v, _)| v)
    }

    /// Remaining TTL rounded up to whole seconds.
    pub fn ttl_of(&self, key: &str) -> Option<u64> {
        let (_, expires) = self.live(key)?;
        let remaining = expires?.saturating_duration_since(Instant::now());
        Some(remaining.as_millis().div_ceil(1000) as u64)
    }

    fn live(&self, key: &str) -> Option<(String, Option<Instant>)> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        if matches!(entries.get(key), Some((_, expires)) if !unexpired(*expires, now)) {
            entries.remove(key);
        }
        entries.get(key).cloned()
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        Ok(())
    }
}

fn unexpired(expires: Option<Instant>, now: Instant) -> bool {
    expires.is_none_or(|at| at > now)
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.raw(key))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.check()?;
        self.insert_raw(key, value, ttl_secs);
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>> {
        self.check()?;
        Ok(self.ttl_of(key))
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        if matches!(entries.get(key), Some((_, expires)) if unexpired(*expires, now)) {
            return Ok(false);
        }
        let expires = now + Duration::from_secs(ttl_secs);
        entries.insert(key.to_owned(), (value.to_owned(), Some(expires)));
        Ok(true)
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let owned = matches!(
            entries.get(key),
            Some((value, expires)) if value == expected && unexpired(*expires, now)
        );
        if owned {
            entries.remove(key);
        }
        Ok(owned)
    }
}

// ---------------------------------------------------------------------------
// Object store
// ---------------------------------------------------------------------------

pub struct MemoryObjectStore {
    bucket: String,
    has_bucket: AtomicBool,
    objects: Mutex<BTreeMap<String, (Vec<u8>, DateTime<Utc>)>>,
    unavailable: AtomicBool,
    puts: AtomicUsize,
    bucket_checks: AtomicUsize,
    failing_bucket_checks: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new(bucket: &str) -> Self {
        let store = Self::without_bucket(bucket);
        store.has_bucket.store(true, Ordering::SeqCst);
        store
    }

    pub fn without_bucket(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_owned(),
            has_bucket: AtomicBool::new(false),
            objects: Mutex::new(BTreeMap::new()),
            unavailable: AtomicBool::new(false),
            puts: AtomicUsize::new(0),
            bucket_checks: AtomicUsize::new(0),
            failing_bucket_checks: AtomicUsize::new(0),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// The next `n` bucket checks fail as if the endpoint were unreachable.
    pub fn fail_next_bucket_checks(&self, n: usize) {
        self.failing_bucket_checks.store(n, Ordering::SeqCst);
    }

    pub fn insert(&self, key: &str, record: &PersistedRecord, last_modified: DateTime<Utc>) {
        self.insert_raw(key, &serde_json::to_vec(record).unwrap(), last_modified);
    }

    pub fn insert_raw(&self, key: &str, body: &[u8], last_modified: DateTime<Utc>) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_owned(), (body.to_vec(), last_modified));
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn has_bucket(&self) -> bool {
        self.has_bucket.load(Ordering::SeqCst)
    }

    pub fn bucket_check_count(&self) -> usize {
        self.bucket_checks.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn bucket_exists(&self) -> Result<bool> {
        self.bucket_checks.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let failing = self
            .failing_bucket_checks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            bail!("endpoint unreachable");
        }
        Ok(self.has_bucket())
    }

    async fn create_bucket(&self) -> Result<()> {
        self.check()?;
        self.has_bucket.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn put_object(&self, key: &str, body: Vec<u8>, _content_type: &str) -> Result<()> {
        self.check()?;
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.insert_raw(key, &body, Utc::now());
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        self.check()?;
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, (_, modified))| ObjectMeta {
                key: key.clone(),
                last_modified: Some(*modified),
            })
            .collect())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        self.check()?;
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|(body, _)| body.clone())
            .ok_or_else(|| anyhow!("no such key: {key}"))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct HarnessOptions {
    pub cache: bool,
    pub storage: bool,
    pub device_ids: Vec<&'static str>,
    pub cache_ttl_secs: u64,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            cache: true,
            storage: true,
            device_ids: vec!["a", "b", "c"],
            cache_ttl_secs: 60,
        }
    }
}

/// The full service graph over in-memory collaborators.
pub struct Harness {
    pub sensors: Arc<FakeSensorApi>,
    pub cache: Arc<MemoryCacheStore>,
    pub objects: Arc<MemoryObjectStore>,
    pub metrics: Metrics,
    pub flusher: Arc<FlushWorker>,
    pub temperature: Arc<TemperatureService>,
    pub readiness: Arc<ReadinessService>,
}

impl Harness {
    pub fn new(options: HarnessOptions) -> Self {
        let sensors = Arc::new(FakeSensorApi::new());
        let cache = Arc::new(MemoryCacheStore::new());
        let objects = Arc::new(MemoryObjectStore::new("temperature-records"));

        let sensebox = SenseBoxConfig {
            box_ids: options.device_ids.iter().map(|s| (*s).to_owned()).collect(),
            ..SenseBoxConfig::default()
        };
        let settings = CacheConfig {
            ttl_secs: options.cache_ttl_secs,
            ..CacheConfig::default()
        };

        let metrics = Metrics::new().unwrap();
        let cache_client = options
            .cache
            .then(|| CacheClient::new(cache.clone(), metrics.clone()));
        let records = options
            .storage
            .then(|| RecordStore::new(objects.clone(), false, metrics.clone()));

        let flusher = Arc::new(FlushWorker::new(records.clone(), Duration::from_secs(300)));
        let temperature = Arc::new(TemperatureService::new(
            SensorService::new(sensors.clone(), &sensebox),
            cache_client.clone(),
            records,
            flusher.clone(),
            settings,
        ));
        let readiness = Arc::new(ReadinessService::new(
            sensors.clone(),
            sensebox.box_ids.clone(),
            cache_client,
            settings.ttl_secs,
            300,
        ));

        Self { sensors, cache, objects, metrics, flusher, temperature, readiness }
    }

    pub fn state(&self) -> AppState {
        AppState {
            temperature: self.temperature.clone(),
            flusher: self.flusher.clone(),
            readiness: self.readiness.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

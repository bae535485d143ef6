use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Stations polled when `SENSEBOX_IDS` is not set.
pub const DEFAULT_SENSEBOX_IDS: [&str; 3] = [
    "5c647389a100840019eea656",
    "66268770eaca630008ec4f9e",
    "6570eb180db9850007f21abe",
];

pub const DEFAULT_SENSEBOX_API_BASE: &str = "https://api.opensensemap.org";

/// Title of the openSenseMap sensor that carries air temperature.
pub const DEFAULT_TEMPERATURE_PHENOMENON: &str = "Temperatur";

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub sensebox: SenseBoxConfig,
    /// `None` when `VALKEY_HOST` is unset; caching is then bypassed.
    pub valkey: Option<ValkeyConfig>,
    pub cache: CacheConfig,
    /// `None` unless every required `MINIO_*` variable is present.
    pub minio: Option<MinioConfig>,
    pub skip_minio_check: bool,
    /// Periodic flush interval in seconds.
    pub flush_interval_secs: u64,
    /// Cache age above which `/readyz` may report not ready.
    pub readiness_cache_max_age_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SenseBoxConfig {
    pub api_base: String,
    pub box_ids: Vec<String>,
    pub phenomenon: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Oldest measurement still considered fresh (inclusive).
    pub max_age: Duration,
}

impl Default for SenseBoxConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_SENSEBOX_API_BASE.to_owned(),
            box_ids: DEFAULT_SENSEBOX_IDS.iter().map(|s| (*s).to_owned()).collect(),
            phenomenon: DEFAULT_TEMPERATURE_PHENOMENON.to_owned(),
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(5),
            max_age: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValkeyConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
    pub ssl: bool,
    pub timeout: Duration,
}

impl ValkeyConfig {
    /// Connection URL in the form understood by the `redis` crate.
    pub fn url(&self) -> String {
        let scheme = if self.ssl { "rediss" } else { "redis" };
        let auth = match &self.password {
            Some(password) => format!(":{password}@"),
            None => String::new(),
        };
        format!("{scheme}://{auth}{}:{}/{}", self.host, self.port, self.db)
    }
}

/// Timings for the cached `/temperature` response.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    /// A hit with this many seconds (or fewer) left schedules a refresh.
    pub refresh_threshold_secs: u64,
    pub lock_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60,
            refresh_threshold_secs: 10,
            lock_ttl_secs: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MinioConfig {
    /// `host:port` without scheme; the scheme follows `secure`.
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub secure: bool,
    pub region: String,
    pub create_bucket: bool,
    pub timeout: Duration,
}

impl MinioConfig {
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://") {
            return self.endpoint.clone();
        }
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}", self.endpoint)
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "5000")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            sensebox: sensebox_from_env()?,
            valkey: valkey_from_env()?,
            cache: CacheConfig {
                ttl_secs: positive("CACHE_TTL_SECONDS", "60")?,
                refresh_threshold_secs: optional("CACHE_REFRESH_THRESHOLD_SECONDS", "10")
                    .parse()
                    .context("CACHE_REFRESH_THRESHOLD_SECONDS must be a non-negative integer")?,
                lock_ttl_secs: positive("CACHE_LOCK_TTL_SECONDS", "10")?,
            },
            minio: minio_from_env()?,
            skip_minio_check: flag("SKIP_MINIO_CHECK", false),
            flush_interval_secs: positive("FLUSH_INTERVAL_SECS", "300")?,
            readiness_cache_max_age_secs: optional("READINESS_CACHE_MAX_AGE_SECS", "300")
                .parse()
                .context("READINESS_CACHE_MAX_AGE_SECS must be a non-negative integer")?,
        })
    }
}

fn sensebox_from_env() -> Result<SenseBoxConfig> {
    let defaults = SenseBoxConfig::default();
    let box_ids = parse_box_ids(&optional("SENSEBOX_IDS", ""));

    Ok(SenseBoxConfig {
        api_base: optional("SENSEBOX_API_BASE", DEFAULT_SENSEBOX_API_BASE),
        box_ids: if box_ids.is_empty() { defaults.box_ids } else { box_ids },
        phenomenon: optional("SENSEBOX_PHENOMENON", DEFAULT_TEMPERATURE_PHENOMENON),
        // Unparsable timeouts fall back to the defaults instead of failing startup.
        connect_timeout: Duration::from_secs(lenient_secs("SENSEBOX_CONNECT_TIMEOUT", 2)),
        read_timeout: Duration::from_secs(lenient_secs("SENSEBOX_READ_TIMEOUT", 5)),
        max_age: Duration::from_secs(
            optional("FRESHNESS_MAX_AGE_SECS", "3600")
                .parse()
                .context("FRESHNESS_MAX_AGE_SECS must be a non-negative integer")?,
        ),
    })
}

fn valkey_from_env() -> Result<Option<ValkeyConfig>> {
    let Some(host) = present("VALKEY_HOST") else {
        return Ok(None);
    };

    Ok(Some(ValkeyConfig {
        host,
        port: optional("VALKEY_PORT", "6379")
            .parse()
            .context("VALKEY_PORT must be a valid port number")?,
        db: optional("VALKEY_DB", "0")
            .parse()
            .context("VALKEY_DB must be an integer")?,
        password: present("VALKEY_PASSWORD"),
        ssl: flag("VALKEY_SSL", false),
        timeout: seconds_f64("VALKEY_TIMEOUT", "2.0")?,
    }))
}

fn minio_from_env() -> Result<Option<MinioConfig>> {
    let (Some(endpoint), Some(access_key), Some(secret_key), Some(bucket)) = (
        present("MINIO_ENDPOINT"),
        present("MINIO_ACCESS_KEY"),
        present("MINIO_SECRET_KEY"),
        present("MINIO_BUCKET"),
    ) else {
        return Ok(None);
    };

    Ok(Some(MinioConfig {
        endpoint,
        access_key,
        secret_key,
        bucket,
        secure: flag("MINIO_SECURE", true),
        region: optional("MINIO_REGION", "us-east-1"),
        create_bucket: flag("MINIO_CREATE_BUCKET", false),
        timeout: seconds_f64("MINIO_TIMEOUT", "5.0")?,
    }))
}

/// Parse `"id1,id2"` into trimmed, non-empty device ids.
fn parse_box_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Returns the variable only when it is set to a non-empty value.
fn present(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn flag(key: &str, default: bool) -> bool {
    std::env::var(key).map(|v| parse_flag(&v)).unwrap_or(default)
}

/// A strictly positive integer; `0` is rejected like any malformed value.
fn positive(key: &str, default: &str) -> Result<u64> {
    parse_positive(key, &optional(key, default))
}

fn parse_positive(key: &str, raw: &str) -> Result<u64> {
    let value: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a positive integer"))?;
    if value == 0 {
        bail!("{key} must be a positive integer, got 0");
    }
    Ok(value)
}

fn lenient_secs(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn seconds_f64(key: &str, default: &str) -> Result<Duration> {
    let secs: f64 = optional(key, default)
        .parse()
        .with_context(|| format!("{key} must be a number of seconds"))?;
    Duration::try_from_secs_f64(secs).with_context(|| format!("{key} must not be negative"))
}

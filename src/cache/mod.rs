pub mod valkey;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::metrics::Metrics;

pub use valkey::ValkeyStore;

/// String-keyed key-value store with per-key expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Remaining time to live in seconds. `None` when the key is absent or
    /// has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<u64>>;

    /// Atomically set `key` only if it does not exist. Returns whether the
    /// value was written.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool>;

    /// Atomically delete `key` only while it still holds `expected`.
    /// Returns whether the key was deleted.
    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool>;
}

/// Proof of lock ownership returned by [`CacheClient::acquire_lock`].
#[derive(Debug)]
pub struct LockToken(String);

/// JSON-level view of a [`CacheStore`].
///
/// Every store error is logged and swallowed: a broken cache behaves like a
/// miss and never fails the caller.
#[derive(Clone)]
pub struct CacheClient {
    store: Arc<dyn CacheStore>,
    metrics: Metrics,
}

impl CacheClient {
    pub fn new(store: Arc<dyn CacheStore>, metrics: Metrics) -> Self {
        Self { store, metrics }
    }

    /// Decode the value at `key`. Absent, unreadable or malformed entries
    /// all come back as `None` and count as misses.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.lookup(key).await;
        self.metrics.record_cache_lookup(value.is_some());
        value
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %format!("{e:#}"), "Cache get failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key = %key, error = %e, "Invalid JSON in cache");
                None
            }
        }
    }

    pub async fn set_json<T: Serialize + Sync>(&self, key: &str, value: &T, ttl_secs: u64) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize cache entry");
                return;
            }
        };

        if let Err(e) = self.store.set_ex(key, &raw, ttl_secs).await {
            warn!(key = %key, error = %format!("{e:#}"), "Cache set failed");
        }
    }

    pub async fn ttl(&self, key: &str) -> Option<u64> {
        match self.store.ttl(key).await {
            Ok(ttl) => ttl,
            Err(e) => {
                warn!(key = %key, error = %format!("{e:#}"), "Cache ttl failed");
                None
            }
        }
    }

    /// Try to take the lock at `key` under a fresh owner token. A store
    /// error counts as "not acquired".
    pub async fn acquire_lock(&self, key: &str, ttl_secs: u64) -> Option<LockToken> {
        let token = Uuid::new_v4().to_string();
        match self.store.set_nx_ex(key, &token, ttl_secs).await {
            Ok(true) => Some(LockToken(token)),
            Ok(false) => None,
            Err(e) => {
                warn!(key = %key, error = %format!("{e:#}"), "Cache lock failed");
                None
            }
        }
    }

    /// Release the lock only if `token` still owns it. A lock that expired
    /// and was taken by someone else is left alone.
    pub async fn release_lock(&self, key: &str, token: LockToken) {
        match self.store.delete_if_eq(key, &token.0).await {
            Ok(true) => {}
            Ok(false) => debug!(key = %key, "Lock expired before release; not deleting"),
            Err(e) => warn!(key = %key, error = %format!("{e:#}"), "Cache unlock failed"),
        }
    }
}

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::warn;

use crate::{cache::CacheClient, sensebox::SensorApi, temperature::CACHE_KEY_LATEST};

/// Outcome of one readiness evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadinessReport {
    pub ready: bool,
    pub accessible: usize,
    pub total: usize,
    pub inaccessible: usize,
    /// `None` when no cache store is configured or the entry has no TTL.
    pub cache_age_seconds: Option<u64>,
    pub max_cache_age_seconds: u64,
    pub reason: Option<String>,
}

/// Decides whether the service should receive traffic.
///
/// Not ready only when more than half of the devices are unreachable *and*
/// the cached response is older than the allowed age. Either condition on
/// its own is tolerated.
pub struct ReadinessService {
    api: Arc<dyn SensorApi>,
    device_ids: Vec<String>,
    cache: Option<CacheClient>,
    cache_ttl_secs: u64,
    max_cache_age_secs: u64,
}

impl ReadinessService {
    pub fn new(
        api: Arc<dyn SensorApi>,
        device_ids: Vec<String>,
        cache: Option<CacheClient>,
        cache_ttl_secs: u64,
        max_cache_age_secs: u64,
    ) -> Self {
        Self { api, device_ids, cache, cache_ttl_secs, max_cache_age_secs }
    }

    pub async fn evaluate(&self) -> ReadinessReport {
        let (accessible, total) = self.check_accessibility().await;
        let cache_age_seconds = self.cache_age_seconds().await;

        let inaccessible = total - accessible;
        let too_many_inaccessible = inaccessible > total / 2;
        let cache_too_old = cache_age_seconds.is_some_and(|age| age > self.max_cache_age_secs);

        let ready = !(too_many_inaccessible && cache_too_old);
        let reason = (!ready).then(|| {
            format!(
                "More than 50% of senseBoxes are inaccessible ({inaccessible}/{total}) \
                 and cached data is older than {} seconds.",
                self.max_cache_age_secs
            )
        });

        if !ready {
            warn!(
                inaccessible,
                total,
                cache_age_seconds = ?cache_age_seconds,
                "Readiness check failed"
            );
        }

        ReadinessReport {
            ready,
            accessible,
            total,
            inaccessible,
            cache_age_seconds,
            max_cache_age_seconds: self.max_cache_age_secs,
            reason,
        }
    }

    /// Check every device concurrently; returns `(accessible, total)`.
    async fn check_accessibility(&self) -> (usize, usize) {
        let checks = self.device_ids.iter().map(|id| self.api.is_accessible(id));
        let accessible = join_all(checks).await.into_iter().filter(|ok| *ok).count();
        (accessible, self.device_ids.len())
    }

    /// Seconds since the cached response was written, derived from its
    /// remaining TTL and clamped at zero.
    async fn cache_age_seconds(&self) -> Option<u64> {
        let ttl = self.cache.as_ref()?.ttl(CACHE_KEY_LATEST).await?;
        Some(self.cache_ttl_secs.saturating_sub(ttl))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Explicit cache handle owned by the conversation layer.
//!
//! Composes key generation, policy selection, the store, and the metrics
//! recorder behind one value with an explicit lifecycle: construct with
//! [`ResponseCache::new`], optionally [`start_sweeper`](ResponseCache::start_sweeper),
//! and [`shutdown`](ResponseCache::shutdown) when done.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::key::KeyGenerator;
use super::metrics::{CacheCounters, MetricsExport, MetricsRecorder, MetricsSnapshot, MetricsTrend, PerformanceReport};
use super::policy::{CachePolicy, PolicyManager, SystemLoad};
use super::store::{SizeEstimator, Store, default_size_estimator};
use crate::Error;
use crate::config::CacheConfig;
use crate::content::CacheableContent;

/// Response cache handle.
#[derive(Debug)]
pub struct ResponseCache {
    config: CacheConfig,
    keys: KeyGenerator,
    policies: PolicyManager,
    store: Arc<Store>,
    metrics: Arc<MetricsRecorder>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ResponseCache {
    /// Build a cache from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `config` fails validation.
    pub fn new(config: CacheConfig) -> Result<Self, Error> {
        Self::with_size_estimator(config, default_size_estimator())
    }

    /// Build a cache that accounts entry sizes with `estimator`.
    pub fn with_size_estimator(config: CacheConfig, estimator: SizeEstimator) -> Result<Self, Error> {
        config.validate()?;

        let metrics = Arc::new(MetricsRecorder::from_config(&config));
        let store = Arc::new(Store::with_estimator(&config, Arc::clone(&metrics), estimator));

        tracing::info!(
            max_entries = config.max_entries,
            max_memory_bytes = config.max_memory_bytes,
            default_ttl_secs = config.default_ttl_secs,
            "response cache created"
        );

        let keys = KeyGenerator::new(&config);
        let policies = PolicyManager::from_config(&config);
        Ok(Self { config, keys, policies, store, metrics, sweeper: Mutex::new(None) })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn key_generator(&self) -> &KeyGenerator {
        &self.keys
    }

    pub fn policy_manager(&self) -> &PolicyManager {
        &self.policies
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn generate_key(&self, content: &CacheableContent, context: Option<&Map<String, Value>>) -> Result<String, Error> {
        self.keys.generate_key(content, context)
    }

    pub fn evaluate_policy(
        &self, content: &CacheableContent, context: Option<&Map<String, Value>>, load: Option<&SystemLoad>,
    ) -> CachePolicy {
        self.policies.evaluate_policy(content, context, load)
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.store.get(key)
    }

    pub fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) {
        self.store.set(key, value, ttl);
    }

    /// Store `value` under the TTL chosen by `policy`.
    pub fn set_with_policy(&self, key: &str, value: Bytes, policy: &CachePolicy) {
        self.store.set(key, value, Some(policy.ttl));
    }

    pub fn delete(&self, key: &str) -> bool {
        self.store.delete(key)
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    /// Decode a cached JSON value.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if the stored bytes are not a valid `T`.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
        self.store
            .get(key)
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()
            .map_err(Error::from)
    }

    /// Encode `value` as JSON and cache it.
    pub fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<(), Error> {
        let bytes = serde_json::to_vec(value)?;
        self.store.set(key, Bytes::from(bytes), ttl);
        Ok(())
    }

    /// Return the cached artifact for `content`, computing and caching it on a miss.
    ///
    /// The store lock is never held while `compute` runs. A failed computation
    /// caches nothing.
    pub async fn get_or_compute<F, Fut, E>(
        &self, content: &CacheableContent, context: Option<&Map<String, Value>>, load: Option<&SystemLoad>, compute: F,
    ) -> Result<Bytes, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
        E: From<Error>,
    {
        let key = self.generate_key(content, context)?;
        let policy = self.evaluate_policy(content, context, load);

        if let Some(hit) = self.store.get(&key) {
            return Ok(hit);
        }

        let value = compute().await?;
        self.set_with_policy(&key, value.clone(), &policy);
        Ok(value)
    }

    pub fn get_metrics(&self) -> CacheCounters {
        self.store.metrics_snapshot()
    }

    pub fn get_performance_report(&self) -> PerformanceReport {
        self.metrics.get_performance_report()
    }

    pub fn get_metrics_trend(&self, period_minutes: u64) -> MetricsTrend {
        self.metrics.get_metrics_trend(period_minutes)
    }

    pub fn take_snapshot(&self) -> MetricsSnapshot {
        self.metrics.take_snapshot()
    }

    pub fn export_metrics(&self) -> MetricsExport {
        self.metrics.export_metrics()
    }

    pub fn clear_metrics(&self) {
        self.metrics.clear_metrics();
        self.store.publish_stats();
    }

    /// Spawn the periodic expired-entry sweep on the current tokio runtime.
    ///
    /// Returns false when no sweep interval is configured, a sweep is already
    /// running, or there is no runtime to spawn on.
    pub fn start_sweeper(&self) -> bool {
        let Some(interval) = self.config.sweep_interval() else {
            return false;
        };
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no tokio runtime available; expired-entry sweep not started");
            return false;
        };

        let store = Arc::clone(&self.store);
        *sweeper = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = store.purge_expired();
                if removed > 0 {
                    tracing::info!(removed, "swept expired cache entries");
                }
            }
        }));
        tracing::info!(interval_secs = interval.as_secs(), "expired-entry sweep started");
        true
    }

    /// Stop the sweep, if running. Entries and metrics are left intact.
    pub fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
            tracing::info!("response cache shut down");
        }
    }
}

impl Drop for ResponseCache {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

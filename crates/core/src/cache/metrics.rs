//! Cache operation metrics, snapshots, and derived health reports.
//!
//! Counters are cumulative until [`MetricsRecorder::clear_metrics`]; taking a
//! snapshot freezes them into a bounded history without resetting anything.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;

const LOW_HIT_RATE: f64 = 0.5;
const HIGH_MEMORY_UTILIZATION: f64 = 0.8;
const HIGH_EVICTION_RATE: f64 = 0.1;
const HIGH_LATENCY_MS: f64 = 100.0;

/// Hit-rate change between the ends of the trend window that counts as movement.
const TREND_THRESHOLD: f64 = 0.05;

/// Number of most recent windowed snapshots compared for the health trend.
const TREND_POINTS: usize = 3;

/// Cumulative operation counters plus live store size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub size: usize,
    pub memory_usage_bytes: u64,
}

impl CacheCounters {
    pub fn hit_rate(&self) -> f64 {
        ratio(self.hits, self.hits + self.misses)
    }

    pub fn total_operations(&self) -> u64 {
        self.hits + self.misses + self.sets + self.deletes
    }
}

/// Immutable point-in-time record of the counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub size: usize,
    pub memory_usage_bytes: u64,
    pub avg_response_time_ms: f64,
}

impl MetricsSnapshot {
    fn new(timestamp: DateTime<Utc>, counters: CacheCounters, avg_response_time_ms: f64) -> Self {
        Self {
            timestamp,
            hits: counters.hits,
            misses: counters.misses,
            sets: counters.sets,
            deletes: counters.deletes,
            evictions: counters.evictions,
            size: counters.size,
            memory_usage_bytes: counters.memory_usage_bytes,
            avg_response_time_ms,
        }
    }

    pub fn hit_rate(&self) -> f64 {
        ratio(self.hits, self.hits + self.misses)
    }

    pub fn total_operations(&self) -> u64 {
        self.hits + self.misses + self.sets + self.deletes
    }
}

/// Derived health view over the current counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub efficiency: f64,
    pub memory_utilization: f64,
    pub eviction_rate: f64,
    pub average_response_time_ms: f64,
    /// Composite 0-100 score.
    pub health_score: u8,
    pub recommendations: Vec<String>,
}

/// Direction of the hit rate across recent snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthTrend {
    Improving,
    Declining,
    Stable,
}

/// Summary of the snapshot history within a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsTrend {
    pub period_minutes: u64,
    pub samples: usize,
    pub avg_hit_rate: f64,
    pub peak_memory_usage: u64,
    /// Operations performed inside the window, measured against the last
    /// snapshot taken before it (or zero when there is none).
    pub total_operations: u64,
    pub health_trend: HealthTrend,
}

/// Full dump of recorder state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsExport {
    pub counters: CacheCounters,
    pub average_response_time_ms: f64,
    pub response_time_samples: usize,
    pub snapshots: Vec<MetricsSnapshot>,
    pub report: PerformanceReport,
}

#[derive(Debug, Default)]
struct MetricsState {
    counters: CacheCounters,
    response_times: VecDeque<f64>,
    history: VecDeque<MetricsSnapshot>,
}

/// Thread-safe recorder fed by the store on every operation.
#[derive(Debug)]
pub struct MetricsRecorder {
    max_snapshot_history: usize,
    max_response_time_samples: usize,
    memory_ceiling_bytes: u64,
    state: Mutex<MetricsState>,
}

impl MetricsRecorder {
    /// Create a recorder with explicit history and sample caps.
    ///
    /// `memory_ceiling_bytes` is the denominator for memory utilization.
    pub fn new(max_snapshot_history: usize, max_response_time_samples: usize, memory_ceiling_bytes: u64) -> Self {
        Self {
            max_snapshot_history: max_snapshot_history.max(1),
            max_response_time_samples: max_response_time_samples.max(1),
            memory_ceiling_bytes: memory_ceiling_bytes.max(1),
            state: Mutex::new(MetricsState::default()),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_snapshot_history, config.max_response_time_samples, config.max_memory_bytes)
    }

    pub fn record_hit(&self, response_time_ms: Option<f64>) {
        let mut state = self.state.lock();
        state.counters.hits += 1;
        self.push_response_time(&mut state, response_time_ms);
    }

    pub fn record_miss(&self, response_time_ms: Option<f64>) {
        let mut state = self.state.lock();
        state.counters.misses += 1;
        self.push_response_time(&mut state, response_time_ms);
    }

    pub fn record_set(&self) {
        self.state.lock().counters.sets += 1;
    }

    pub fn record_delete(&self) {
        self.state.lock().counters.deletes += 1;
    }

    pub fn record_eviction(&self) {
        self.state.lock().counters.evictions += 1;
    }

    /// Replace the live size figures.
    pub fn update_stats(&self, size: usize, memory_usage_bytes: u64) {
        let mut state = self.state.lock();
        state.counters.size = size;
        state.counters.memory_usage_bytes = memory_usage_bytes;
    }

    pub fn counters(&self) -> CacheCounters {
        self.state.lock().counters
    }

    pub fn hit_rate(&self) -> f64 {
        self.counters().hit_rate()
    }

    /// Rolling average over the retained response time samples.
    pub fn average_response_time_ms(&self) -> f64 {
        average(&self.state.lock().response_times)
    }

    /// Snapshot history, oldest first.
    pub fn history(&self) -> Vec<MetricsSnapshot> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// Freeze the current counters into the history and return the snapshot.
    pub fn take_snapshot(&self) -> MetricsSnapshot {
        let mut state = self.state.lock();
        let snapshot = MetricsSnapshot::new(Utc::now(), state.counters, average(&state.response_times));
        state.history.push_back(snapshot.clone());
        while state.history.len() > self.max_snapshot_history {
            state.history.pop_front();
        }
        snapshot
    }

    pub fn get_performance_report(&self) -> PerformanceReport {
        let state = self.state.lock();
        self.build_report(&state)
    }

    /// Summarize snapshots taken within the last `period_minutes`.
    pub fn get_metrics_trend(&self, period_minutes: u64) -> MetricsTrend {
        let state = self.state.lock();
        let window_start = i64::try_from(period_minutes)
            .ok()
            .and_then(Duration::try_minutes)
            .and_then(|period| Utc::now().checked_sub_signed(period))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        summarize_trend(&state.history, window_start, period_minutes)
    }

    pub fn export_metrics(&self) -> MetricsExport {
        let state = self.state.lock();
        MetricsExport {
            counters: state.counters,
            average_response_time_ms: average(&state.response_times),
            response_time_samples: state.response_times.len(),
            snapshots: state.history.iter().cloned().collect(),
            report: self.build_report(&state),
        }
    }

    /// Reset counters, response time samples, and history.
    pub fn clear_metrics(&self) {
        *self.state.lock() = MetricsState::default();
    }

    fn push_response_time(&self, state: &mut MetricsState, response_time_ms: Option<f64>) {
        let Some(ms) = response_time_ms else {
            return;
        };
        let ms = if ms.is_finite() { ms.max(0.0) } else { 0.0 };
        state.response_times.push_back(ms);
        while state.response_times.len() > self.max_response_time_samples {
            state.response_times.pop_front();
        }
    }

    fn build_report(&self, state: &MetricsState) -> PerformanceReport {
        let c = &state.counters;
        let hit_rate = c.hit_rate();
        let miss_rate = 1.0 - hit_rate;
        let efficiency = ratio(c.hits, c.total_operations());
        let memory_utilization = (c.memory_usage_bytes as f64 / self.memory_ceiling_bytes as f64).min(1.0);
        let eviction_rate = c.evictions as f64 / c.sets.max(1) as f64;
        let average_response_time_ms = average(&state.response_times);

        let score = hit_rate * 40.0
            + efficiency * 30.0
            + (1.0 - memory_utilization) * 20.0
            + (1.0 - eviction_rate.min(1.0)) * 10.0;
        let health_score = score.round().clamp(0.0, 100.0) as u8;

        let mut recommendations = Vec::new();
        if c.hits + c.misses > 0 && hit_rate < LOW_HIT_RATE {
            recommendations.push(format!(
                "Hit rate is low ({:.1}%); consider longer TTLs or broader key normalization",
                hit_rate * 100.0
            ));
        }
        if memory_utilization > HIGH_MEMORY_UTILIZATION {
            recommendations.push(format!(
                "Memory utilization is high ({:.1}%); consider raising max_memory_bytes or shortening TTLs",
                memory_utilization * 100.0
            ));
        }
        if eviction_rate > HIGH_EVICTION_RATE {
            recommendations.push(format!(
                "Eviction rate is high ({:.1}%); consider raising max_entries",
                eviction_rate * 100.0
            ));
        }
        if average_response_time_ms > HIGH_LATENCY_MS {
            recommendations.push(format!("Average response time is high ({average_response_time_ms:.1}ms)"));
        }
        if recommendations.is_empty() {
            recommendations.push("Cache performance is optimal".to_string());
        }

        PerformanceReport {
            hit_rate,
            miss_rate,
            efficiency,
            memory_utilization,
            eviction_rate,
            average_response_time_ms,
            health_score,
            recommendations,
        }
    }
}

fn summarize_trend(history: &VecDeque<MetricsSnapshot>, window_start: DateTime<Utc>, period_minutes: u64) -> MetricsTrend {
    let baseline = history
        .iter()
        .filter(|s| s.timestamp < window_start)
        .map(MetricsSnapshot::total_operations)
        .next_back()
        .unwrap_or(0);
    let window: Vec<&MetricsSnapshot> = history.iter().filter(|s| s.timestamp >= window_start).collect();

    let Some(latest) = window.last() else {
        return MetricsTrend {
            period_minutes,
            samples: 0,
            avg_hit_rate: 0.0,
            peak_memory_usage: 0,
            total_operations: 0,
            health_trend: HealthTrend::Stable,
        };
    };

    let hit_rates: Vec<f64> = window.iter().map(|s| s.hit_rate()).collect();
    let avg_hit_rate = hit_rates.iter().sum::<f64>() / hit_rates.len() as f64;
    let peak_memory_usage = window.iter().map(|s| s.memory_usage_bytes).max().unwrap_or(0);

    let recent = &hit_rates[hit_rates.len().saturating_sub(TREND_POINTS)..];
    let health_trend = match (recent.first(), recent.last()) {
        (Some(first), Some(last)) if recent.len() > 1 => {
            let delta = last - first;
            if delta > TREND_THRESHOLD {
                HealthTrend::Improving
            } else if delta < -TREND_THRESHOLD {
                HealthTrend::Declining
            } else {
                HealthTrend::Stable
            }
        }
        _ => HealthTrend::Stable,
    };

    MetricsTrend {
        period_minutes,
        samples: window.len(),
        avg_hit_rate,
        peak_memory_usage,
        total_operations: latest.total_operations().saturating_sub(baseline),
        health_trend,
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 { 0.0 } else { numerator as f64 / denominator as f64 }
}

fn average(samples: &VecDeque<f64>) -> f64 {
    if samples.is_empty() { 0.0 } else { samples.iter().sum::<f64>() / samples.len() as f64 }
}

//! In-memory response cache for generated conversation artifacts.
//!
//! The cache is split into four cooperating parts:
//!
//! - [`key`]: deterministic, privacy-filtered keys derived from request content
//! - [`policy`]: weighted condition scoring that selects a TTL per request
//! - [`store`]: bounded LRU storage with entry-count, memory, and TTL limits
//! - [`metrics`]: counters, snapshot history, and derived health reports
//!
//! [`ResponseCache`] wires them together behind a single handle.

pub mod handle;
pub mod key;
pub mod metrics;
pub mod policy;
pub mod store;

pub use crate::Error;

pub use handle::ResponseCache;
pub use key::KeyGenerator;
pub use metrics::{CacheCounters, HealthTrend, MetricsExport, MetricsRecorder, MetricsSnapshot, MetricsTrend, PerformanceReport};
pub use policy::{CachePolicy, Condition, ConditionKind, Operator, PolicyAnalysis, PolicyManager, SystemLoad};
pub use store::{CacheEntry, SizeEstimator, Store};

//! Core types for the cachet response cache.
//!
//! This crate provides:
//! - Content-addressed cache keys with sensitive-field filtering
//! - Rule-based TTL policies with load-adaptive shortening
//! - A bounded LRU store with memory accounting and lazy expiry
//! - Operation metrics, health reports, and trend analysis
//! - Layered configuration and unified error types

pub mod cache;
pub mod config;
pub mod content;
pub mod error;

pub use cache::{CachePolicy, KeyGenerator, MetricsRecorder, PolicyManager, ResponseCache, Store, SystemLoad};
pub use config::{AdaptiveConfig, CacheConfig, ConfigError};
pub use content::{CacheableContent, ContentKind};
pub use error::Error;

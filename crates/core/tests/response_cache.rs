use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use cachet_core::cache::policy::DEFAULT_POLICY;
use cachet_core::{CacheConfig, CacheableContent, ContentKind, Error, ResponseCache, SystemLoad};
use serde_json::{Map, Value, json};

fn cache_with(config: CacheConfig) -> ResponseCache {
    ResponseCache::new(config).unwrap()
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected an object"),
    }
}

#[test]
fn test_lru_scenario_with_two_slots() {
    let cache = cache_with(CacheConfig { max_entries: 2, ..Default::default() });
    cache.set("txt:a", Bytes::from_static(b"1"), None);
    cache.set("txt:b", Bytes::from_static(b"2"), None);
    assert_eq!(cache.get("txt:a"), Some(Bytes::from_static(b"1")));
    cache.set("txt:c", Bytes::from_static(b"3"), None);

    assert!(cache.get("txt:b").is_none());
    assert!(cache.get("txt:a").is_some());
    assert!(cache.get("txt:c").is_some());

    let counters = cache.get_metrics();
    assert_eq!(counters.evictions, 1);
    assert_eq!(counters.size, 2);
}

#[test]
fn test_oldest_of_hundred_evicted() {
    let cache = cache_with(CacheConfig { max_entries: 100, ..Default::default() });
    for i in 0..=100 {
        cache.set(&format!("txt:k{i}"), Bytes::from(format!("v{i}")), None);
    }
    assert!(!cache.store().contains("txt:k0"));
    assert!(cache.store().contains("txt:k1"));
    assert!(cache.store().contains("txt:k100"));
    assert_eq!(cache.store().len(), 100);
    assert_eq!(cache.get_metrics().evictions, 1);
}

#[test]
fn test_expired_entry_is_a_miss_not_an_eviction() {
    let cache = cache_with(CacheConfig::default());
    cache.set("txt:short", Bytes::from_static(b"v"), Some(Duration::from_millis(100)));
    std::thread::sleep(Duration::from_millis(150));

    assert!(cache.get("txt:short").is_none());
    let counters = cache.get_metrics();
    assert_eq!(counters.misses, 1);
    assert_eq!(counters.evictions, 0);
    assert_eq!(counters.size, 0);
    assert_eq!(counters.memory_usage_bytes, 0);
}

#[test]
fn test_overwrite_keeps_one_entry() {
    let cache = cache_with(CacheConfig::default());
    cache.set("txt:same", Bytes::from_static(b"value"), None);
    let single = cache.store().memory_usage();
    cache.set("txt:same", Bytes::from_static(b"value"), None);

    assert_eq!(cache.store().len(), 1);
    assert_eq!(cache.store().memory_usage(), single);
    assert_eq!(cache.get_metrics().sets, 2);
}

#[test]
fn test_memory_bound_with_custom_estimator() {
    let config = CacheConfig { max_memory_bytes: 250, ..Default::default() };
    let cache = ResponseCache::with_size_estimator(config, Arc::new(|_key: &str, _value: &[u8]| 100_u64)).unwrap();
    for i in 0..5 {
        cache.set(&format!("txt:m{i}"), Bytes::from_static(b"v"), None);
        assert!(cache.store().memory_usage() <= 250);
    }
    assert_eq!(cache.store().keys(), vec!["txt:m4".to_string(), "txt:m3".to_string()]);
    assert_eq!(cache.get_metrics().evictions, 3);
}

#[test]
fn test_sensitive_context_fields_do_not_change_key() {
    let cache = cache_with(CacheConfig::default());
    let content = CacheableContent::text("What's the weather like?");

    let alice = object(json!({"userId": "alice", "topic": "weather"}));
    let bob = object(json!({"userId": "bob", "sessionId": "s-9", "topic": "weather"}));
    let other_topic = object(json!({"userId": "alice", "topic": "sports"}));

    let key_alice = cache.generate_key(&content, Some(&alice)).unwrap();
    let key_bob = cache.generate_key(&content, Some(&bob)).unwrap();
    let key_other = cache.generate_key(&content, Some(&other_topic)).unwrap();

    assert_eq!(key_alice, key_bob);
    assert_ne!(key_alice, key_other);
    assert!(!key_alice.contains("alice"));
}

#[test]
fn test_keys_are_normalized_and_typed() {
    let cache = cache_with(CacheConfig::default());
    let a = cache.generate_key(&CacheableContent::text("Hello,   World!"), None).unwrap();
    let b = cache.generate_key(&CacheableContent::text("hello world"), None).unwrap();
    assert_eq!(a, b);

    let image = CacheableContent::multimodal("hello world", vec![Bytes::from_static(b"\x89PNG")]);
    let c = cache.generate_key(&image, None).unwrap();
    assert_ne!(a, c);

    let keys = cache.key_generator();
    assert!(keys.validate_key(&a));
    assert!(c.len() <= keys.max_key_length());
    assert_eq!(keys.extract_content_type(&a), Some(ContentKind::Text));
    assert_eq!(keys.extract_content_type(&c), Some(ContentKind::Multimodal));
}

#[test]
fn test_empty_content_rejected() {
    let cache = cache_with(CacheConfig::default());
    let result = cache.generate_key(&CacheableContent::text("  ?!  "), None);
    assert!(matches!(result, Err(Error::InvalidInput(_))));
}

#[test]
fn test_report_hit_rate_matches_counters() {
    let cache = cache_with(CacheConfig::default());
    cache.set("txt:x", Bytes::from_static(b"1"), None);
    for _ in 0..3 {
        cache.get("txt:x");
    }
    cache.get("txt:missing");

    let counters = cache.get_metrics();
    let report = cache.get_performance_report();
    let expected = counters.hits as f64 / (counters.hits + counters.misses) as f64;
    assert!((report.hit_rate - expected).abs() < 1e-9);
    assert!((report.hit_rate - 0.75).abs() < 1e-9);
    assert!(report.health_score <= 100);
}

#[test]
fn test_policy_fallback_and_selection() {
    let cache = cache_with(CacheConfig { builtin_policies: false, ..Default::default() });
    let policy = cache.evaluate_policy(&CacheableContent::text("anything"), None, None);
    assert_eq!(policy.name, DEFAULT_POLICY);
    assert_eq!(policy.ttl, Duration::from_secs(3600));

    cache
        .policy_manager()
        .create_custom_policy("images", ContentKind::Multimodal, 15, 5)
        .unwrap();
    let image = CacheableContent::multimodal("look", vec![Bytes::from_static(b"img")]);
    let policy = cache.evaluate_policy(&image, None, None);
    assert_eq!(policy.name, "images");
    assert_eq!(policy.ttl, Duration::from_secs(900));
    assert_eq!(cache.evaluate_policy(&CacheableContent::text("anything"), None, None).name, DEFAULT_POLICY);
}

#[test]
fn test_builtin_policies_react_to_context_and_load() {
    let cache = cache_with(CacheConfig::default());
    let content = CacheableContent::text("quick question");

    assert_eq!(cache.evaluate_policy(&content, None, None).name, "short_text");

    let urgent = object(json!({"priority": "high"}));
    let policy = cache.evaluate_policy(&content, Some(&urgent), None);
    assert_eq!(policy.name, "high_priority");
    assert_eq!(policy.ttl, Duration::from_secs(4 * 3600));

    let busy = SystemLoad { cpu_usage: Some(97.0), ..Default::default() };
    let policy = cache.evaluate_policy(&content, None, Some(&busy));
    assert_eq!(policy.name, "short_text");
    assert_eq!(policy.ttl, Duration::from_secs(15 * 60));
}

#[tokio::test]
async fn test_get_or_compute_runs_once() {
    let cache = cache_with(CacheConfig::default());
    let content = CacheableContent::text("tell me a joke");
    let calls = AtomicUsize::new(0);

    for _ in 0..3 {
        let counter = &calls;
        let value = cache
            .get_or_compute(&content, None, None, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(Bytes::from_static(b"why did the crab cross the road"))
            })
            .await
            .unwrap();
        assert_eq!(value, Bytes::from_static(b"why did the crab cross the road"));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let counters = cache.get_metrics();
    assert_eq!(counters.misses, 1);
    assert_eq!(counters.hits, 2);
    assert_eq!(counters.sets, 1);
}

#[tokio::test]
async fn test_failed_compute_caches_nothing() {
    let cache = cache_with(CacheConfig::default());
    let content = CacheableContent::text("unlucky");

    let result = cache
        .get_or_compute(&content, None, None, || async { Err::<Bytes, _>(Error::InvalidInput("provider failed".into())) })
        .await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));
    assert!(cache.store().is_empty());

    let result = cache
        .get_or_compute(&CacheableContent::text("..."), None, None, || async { Ok::<_, Error>(Bytes::new()) })
        .await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));
}

#[test]
fn test_snapshots_and_export() {
    let cache = cache_with(CacheConfig { max_snapshot_history: 2, ..Default::default() });
    cache.set("txt:a", Bytes::from_static(b"1"), None);
    cache.get("txt:a");
    for _ in 0..3 {
        cache.take_snapshot();
    }

    let export = cache.export_metrics();
    assert_eq!(export.snapshots.len(), 2);
    assert_eq!(export.counters.hits, 1);

    let trend = cache.get_metrics_trend(60);
    assert_eq!(trend.samples, 2);

    cache.clear_metrics();
    let export = cache.export_metrics();
    assert!(export.snapshots.is_empty());
    assert_eq!(export.counters.hits, 0);
    assert_eq!(export.counters.size, 1);
}

#[test]
fn test_clear_keeps_counters() {
    let cache = cache_with(CacheConfig::default());
    cache.set("txt:a", Bytes::from_static(b"1"), None);
    cache.get("txt:a");
    cache.clear();

    assert!(cache.store().is_empty());
    let counters = cache.get_metrics();
    assert_eq!(counters.hits, 1);
    assert_eq!(counters.size, 0);
    assert_eq!(counters.memory_usage_bytes, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sweeper_lifecycle() {
    let cache = cache_with(CacheConfig { sweep_interval_secs: Some(1), ..Default::default() });
    cache.set("txt:gone", Bytes::from_static(b"v"), Some(Duration::from_millis(100)));
    cache.set("txt:kept", Bytes::from_static(b"v"), None);

    assert!(cache.start_sweeper());
    tokio::time::sleep(Duration::from_millis(1300)).await;

    assert!(!cache.store().contains("txt:gone"));
    assert!(cache.store().contains("txt:kept"));
    cache.shutdown();
    cache.shutdown();
    assert!(cache.start_sweeper(), "sweep can be restarted after shutdown");
    cache.shutdown();
}

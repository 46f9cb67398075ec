//! Unit tests for the FHIRPath parse cache

use std::sync::Arc;

use cuprum_fhirpath::ast::Ast;
use cuprum_fhirpath::cache::ParseCache;

fn entry(name: &str) -> Arc<Ast> {
    Arc::new(Ast::Symbol(name.to_string()))
}

#[test]
fn test_rejects_zero_capacity() {
    assert!(ParseCache::new(0).is_err());
    assert!(ParseCache::new(1).is_ok());
}

#[test]
fn test_size_never_exceeds_max() {
    let mut cache = ParseCache::new(2).unwrap();
    cache.set("a".into(), entry("a"));
    cache.set("b".into(), entry("b"));
    cache.set("c".into(), entry("c"));
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.max_size(), 2);
}

#[test]
fn test_eviction_targets_least_recent() {
    let mut cache = ParseCache::new(2).unwrap();
    cache.set("a".into(), entry("a"));
    cache.set("b".into(), entry("b"));

    // Promote "a"; inserting "c" must now evict "b"
    assert!(cache.get("a").is_some());
    cache.set("c".into(), entry("c"));

    assert!(cache.get("a").is_some());
    assert!(cache.get("b").is_none());
    assert!(cache.get("c").is_some());
}

#[test]
fn test_set_updates_and_promotes_existing_key() {
    let mut cache = ParseCache::new(2).unwrap();
    cache.set("a".into(), entry("a"));
    cache.set("b".into(), entry("b"));

    // Re-set "a" (update + promote), then insert "c": "b" is evicted
    cache.set("a".into(), entry("a2"));
    cache.set("c".into(), entry("c"));

    assert_eq!(cache.get("a"), Some(entry("a2")));
    assert!(cache.get("b").is_none());
}

#[test]
fn test_statistics() {
    let mut cache = ParseCache::new(10).unwrap();
    cache.set("a".into(), entry("a"));

    assert!(cache.get("a").is_some());
    assert!(cache.get("a").is_some());
    assert!(cache.get("missing").is_none());

    assert_eq!(cache.gets(), 3);
    assert_eq!(cache.hits(), 2);
    assert!((cache.hit_rate() - 2.0 / 3.0).abs() < f64::EPSILON);
}

#[test]
fn test_stats_survive_clear() {
    let mut cache = ParseCache::new(10).unwrap();
    cache.set("a".into(), entry("a"));
    assert!(cache.get("a").is_some());

    cache.clear();
    assert_eq!(cache.len(), 0);
    assert_eq!(cache.gets(), 1);
    assert_eq!(cache.hits(), 1);

    cache.reset_stats();
    assert_eq!(cache.gets(), 0);
    assert_eq!(cache.hits(), 0);
    assert_eq!(cache.hit_rate(), 0.0);
}

#[test]
fn test_iteration_order_is_lru_first_and_reflects_promotion() {
    let mut cache = ParseCache::new(3).unwrap();
    cache.set("a".into(), entry("a"));
    cache.set("b".into(), entry("b"));
    cache.set("c".into(), entry("c"));

    // "a" is least recent
    let keys: Vec<&str> = cache.iter_lru_first().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, vec!["a", "b", "c"]);

    // Promoting "a" moves it to most-recent
    assert!(cache.get("a").is_some());
    let keys: Vec<&str> = cache.iter_lru_first().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, vec!["b", "c", "a"]);
}

/// The process-wide cache scenario: parsing `Patient.name` three times and
/// `Patient.id` once yields gets=4, hits=2, rate=0.5.
///
/// This is the only test touching the global cache; it installs a fresh one
/// to stay independent of test ordering.
#[test]
fn test_global_parse_hit_rate() {
    cuprum_fhirpath::set_parse_cache(ParseCache::new(100).unwrap());

    cuprum_fhirpath::parse("Patient.name").unwrap();
    cuprum_fhirpath::parse("Patient.name").unwrap();
    cuprum_fhirpath::parse("Patient.name").unwrap();
    cuprum_fhirpath::parse("Patient.id").unwrap();

    cuprum_fhirpath::with_parse_cache(|cache| {
        assert_eq!(cache.gets(), 4);
        assert_eq!(cache.hits(), 2);
        assert!((cache.hit_rate() - 0.5).abs() < f64::EPSILON);
    });
}

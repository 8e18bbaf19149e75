//! Integration tests for cache coherence and degraded mode

use crate::integration::test_utils::{
    embedded_engine, seed_chain, temporary_config, FlakyCache, InterleavingCache,
};
use heritage::{ContextData, ContextEngine, Level};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// An update to GLOBAL is visible from a cached TASK view without explicit invalidation
#[test]
fn test_global_update_reaches_cached_task() {
    let engine = embedded_engine("acme");
    let global = engine
        .create_context(Level::Global, None, ContextData::new().with("theme", "light"))
        .unwrap();
    let project = engine
        .create_context(Level::Project, Some(&global), ContextData::new())
        .unwrap();
    let branch = engine
        .create_context(Level::Branch, Some(&project), ContextData::new())
        .unwrap();
    let tasks: Vec<_> = (0..3)
        .map(|_| {
            engine
                .create_context(Level::Task, Some(&branch), ContextData::new())
                .unwrap()
        })
        .collect();

    for task in &tasks {
        assert_eq!(
            engine.get_effective_context(task).unwrap().get("theme"),
            Some(&json!("light"))
        );
    }
    let hits_before = engine.cache_stats().unwrap().hits;
    engine.get_effective_context(&tasks[0]).unwrap();
    assert!(engine.cache_stats().unwrap().hits > hits_before);

    engine
        .update_context(&global, ContextData::new().with("theme", "dark"), 1)
        .unwrap();

    for task in &tasks {
        let effective = engine.get_effective_context(task).unwrap();
        assert_eq!(effective.get("theme"), Some(&json!("dark")));
        assert_eq!(effective.version_at(Level::Global), Some(2));
    }
}

/// Updating a middle node refreshes its subtree and leaves sibling subtrees cached
#[test]
fn test_update_invalidates_only_the_written_subtree() {
    let engine = embedded_engine("acme");
    let chain = seed_chain(&engine);
    let other_project = engine
        .create_context(Level::Project, Some(&chain.global), ContextData::new().with("lang", "de"))
        .unwrap();

    engine.get_effective_context(&chain.task).unwrap();
    engine.get_effective_context(&other_project).unwrap();

    engine
        .update_context(&chain.project, ContextData::new().with("lang", "fr"), 1)
        .unwrap();

    let hits_before = engine.cache_stats().unwrap().hits;
    assert_eq!(
        engine.get_effective_context(&other_project).unwrap().get("lang"),
        Some(&json!("de"))
    );
    assert_eq!(engine.cache_stats().unwrap().hits, hits_before + 1);
    assert_eq!(
        engine.get_effective_context(&chain.task).unwrap().get("lang"),
        Some(&json!("fr"))
    );
}

/// Cascade delete evicts every deleted node's view
#[test]
fn test_cascade_delete_evicts_views() {
    let engine = embedded_engine("acme");
    let chain = seed_chain(&engine);
    engine.get_effective_context(&chain.task).unwrap();

    let deleted = engine.delete_context(&chain.project, true).unwrap();
    assert_eq!(deleted, vec![chain.task.clone(), chain.branch.clone(), chain.project.clone()]);
    assert!(engine.get_effective_context(&chain.task).is_err());
}

/// A cache outage after startup degrades to uncached reads; evictions missed during the
/// outage are applied before the cache is trusted again
#[test]
fn test_outage_degrades_and_recovers_without_stale_reads() {
    let cache = Arc::new(FlakyCache::new());
    let mut config = temporary_config("acme");
    config.cache.recovery_interval_ms = 50;
    let engine = ContextEngine::from_config_with_cache(&config, cache.clone()).unwrap();
    assert_eq!(engine.backend_description(), "embedded + flaky cache");

    let chain = seed_chain(&engine);
    assert_eq!(
        engine.get_effective_context(&chain.task).unwrap().get("theme"),
        Some(&json!("dark"))
    );

    cache.set_down(true);
    engine
        .update_context(&chain.global, ContextData::new().with("theme", "light"), 1)
        .unwrap();
    for _ in 0..3 {
        assert_eq!(
            engine.get_effective_context(&chain.task).unwrap().get("theme"),
            Some(&json!("light"))
        );
    }
    let stats = engine.cache_stats().unwrap();
    assert_eq!(stats.outages, 1);
    assert!(stats.degraded_reads >= 3);
    assert!(cache.failures() > 0);

    cache.set_down(false);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(
        engine.get_effective_context(&chain.task).unwrap().get("theme"),
        Some(&json!("light"))
    );
    // served from the repopulated cache
    let hits_before = engine.cache_stats().unwrap().hits;
    engine.get_effective_context(&chain.task).unwrap();
    assert_eq!(engine.cache_stats().unwrap().hits, hits_before + 1);
}

/// While the cache is down, reads skip it entirely until the recovery interval passes
#[test]
fn test_degraded_reads_bypass_the_backend() {
    let cache = Arc::new(FlakyCache::new());
    let mut config = temporary_config("acme");
    config.cache.recovery_interval_ms = 60_000;
    let engine = ContextEngine::from_config_with_cache(&config, cache.clone()).unwrap();
    let chain = seed_chain(&engine);

    cache.set_down(true);
    engine.get_effective_context(&chain.task).unwrap();
    let failures = cache.failures();
    assert_eq!(failures, 1);

    for _ in 0..10 {
        engine.get_effective_context(&chain.task).unwrap();
    }
    assert_eq!(cache.failures(), failures);
    assert_eq!(engine.cache_stats().unwrap().degraded_reads, 11);
}

/// A write landing while a reader stores the old record leaves no stale view behind, even
/// when another reader resolves before the racing store is undone
#[test]
fn test_write_racing_node_store_leaves_no_stale_view() {
    let cache = Arc::new(InterleavingCache::new(":node:GLOBAL/acme"));
    let engine = Arc::new(
        ContextEngine::from_config_with_cache(&temporary_config("acme"), cache.clone()).unwrap(),
    );
    let global = engine
        .create_context(Level::Global, None, ContextData::new().with("theme", "light"))
        .unwrap();
    let project = engine
        .create_context(Level::Project, Some(&global), ContextData::new())
        .unwrap();
    let branch = engine
        .create_context(Level::Branch, Some(&project), ContextData::new())
        .unwrap();
    let task = engine
        .create_context(Level::Task, Some(&branch), ContextData::new())
        .unwrap();

    let seen = Arc::new(Mutex::new(None));
    let (writer, reader, observed) = (engine.clone(), engine.clone(), seen.clone());
    let (written, resolved) = (global.clone(), task.clone());
    cache.arm(
        move || {
            writer
                .update_context(&written, ContextData::new().with("theme", "dark"), 1)
                .unwrap();
        },
        move || {
            let view = reader.get_effective_context(&resolved).unwrap();
            *observed.lock().unwrap() = view.get("theme").cloned();
        },
    );

    // caches GLOBAL's record; the write commits between the epoch check and the store
    let first = engine.get_context(&global).unwrap();
    assert_eq!(first.version, 1);
    assert!(cache.fired());

    assert_eq!(*seen.lock().unwrap(), Some(json!("dark")));
    let effective = engine.get_effective_context(&task).unwrap();
    assert_eq!(effective.get("theme"), Some(&json!("dark")));
    assert_eq!(effective.version_at(Level::Global), Some(2));
    assert_eq!(engine.get_context(&global).unwrap().version, 2);
}

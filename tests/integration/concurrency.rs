//! Integration tests for concurrent writers and readers

use crate::integration::test_utils::{embedded_engine, seed_chain};
use heritage::{ContextData, ContextError, Level};
use serde_json::json;
use std::sync::{Arc, Barrier};
use std::thread;

/// Two updates racing on the same expected version: exactly one wins
#[test]
fn test_concurrent_updates_single_winner() {
    for _ in 0..10 {
        let engine = Arc::new(embedded_engine("acme"));
        let chain = seed_chain(&engine);
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = ["first", "second"]
            .into_iter()
            .map(|writer| {
                let engine = engine.clone();
                let barrier = barrier.clone();
                let node = chain.project.clone();
                thread::spawn(move || {
                    barrier.wait();
                    engine.update_context(&node, ContextData::new().with("writer", writer), 1)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "exactly one update must win: {:?}", results);
        for result in &results {
            match result {
                Ok(version) => assert_eq!(*version, 2),
                Err(ContextError::VersionConflict { current, .. }) => assert_eq!(*current, 2),
                Err(other) => panic!("unexpected error: {}", other),
            }
        }
        assert_eq!(engine.get_context(&chain.project).unwrap().version, 2);
    }
}

/// Readers racing a writer may briefly see older views, but once everyone is done the
/// cache holds nothing older than the last committed write
#[test]
fn test_cache_settles_fresh_under_contention() {
    let engine = Arc::new(embedded_engine("acme"));
    let chain = seed_chain(&engine);
    let rounds = 20u64;

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            let task = chain.task.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    engine.get_effective_context(&task).unwrap();
                }
            })
        })
        .collect();

    for round in 0..rounds {
        let version = engine
            .update_context(
                &chain.global,
                ContextData::new().with("round", round),
                round + 1,
            )
            .unwrap();
        assert_eq!(version, round + 2);
    }

    for reader in readers {
        reader.join().unwrap();
    }
    let effective = engine.get_effective_context(&chain.task).unwrap();
    assert_eq!(effective.get("round"), Some(&json!(rounds - 1)));
    assert_eq!(effective.version_at(Level::Global), Some(rounds + 1));
}

/// Concurrent applies of one proposal write the target once
#[test]
fn test_proposal_applied_once() {
    let engine = Arc::new(embedded_engine("acme"));
    let chain = seed_chain(&engine);
    let id = engine
        .propose_delegation(
            &chain.task,
            &chain.project,
            ContextData::new().with("pattern", "retry-with-backoff"),
        )
        .unwrap();
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            let barrier = barrier.clone();
            let id = id.clone();
            thread::spawn(move || {
                barrier.wait();
                engine.apply_delegation(&id).is_ok()
            })
        })
        .collect();
    let applied = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(applied, 1);
    assert_eq!(engine.get_context(&chain.project).unwrap().version, 2);
}

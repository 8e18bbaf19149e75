//! Property-based tests for merge and resolution laws

use heritage::inheritance::merge::{apply_patch, merge_values};
use heritage::inheritance::InheritanceResolver;
use heritage::repository::{Repository, StoreRepository};
use heritage::store::SledNodeStore;
use heritage::{ContextData, Level, MergePolicy, NodeRef, TenantId};
use proptest::collection::{btree_map, vec};
use proptest::prelude::*;
use proptest::test_runner::{Config, TestRunner};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const LEVELS: [Level; 4] = [Level::Global, Level::Project, Level::Branch, Level::Task];

fn layer() -> impl Strategy<Value = BTreeMap<String, i64>> {
    btree_map("[a-e]", any::<i64>(), 0..4)
}

fn data_from(layer: &BTreeMap<String, i64>) -> ContextData {
    layer
        .iter()
        .fold(ContextData::new(), |data, (k, v)| data.with(k.clone(), *v))
}

/// Seed a four-level chain into a fresh embedded store and return the TASK ref.
fn seed(layers: &[BTreeMap<String, i64>; 4]) -> (InheritanceResolver, NodeRef) {
    let tenant = TenantId::new("prop");
    let store = Arc::new(SledNodeStore::temporary(&tenant).unwrap());
    let repo: Arc<dyn Repository> = Arc::new(StoreRepository::new(store, tenant));
    let mut parent: Option<NodeRef> = None;
    for (level, values) in LEVELS.iter().zip(layers.iter()) {
        let record = repo
            .create(*level, parent.as_ref(), data_from(values))
            .unwrap();
        parent = Some(record.node_ref());
    }
    (InheritanceResolver::new(repo), parent.unwrap())
}

fn runner() -> TestRunner {
    TestRunner::new(Config {
        cases: 32,
        ..Config::default()
    })
}

/// Every key resolves to the value of the most specific level that defines it
#[test]
fn test_nearest_level_wins_property() {
    runner()
        .run(&[layer(), layer(), layer(), layer()], |layers| {
            let (resolver, task) = seed(&layers);
            let effective = resolver.resolve_effective(&task).unwrap();

            let keys: BTreeSet<&String> = layers.iter().flat_map(|l| l.keys()).collect();
            assert_eq!(effective.merged_data.len(), keys.len());
            for key in keys {
                let (level, value) = LEVELS
                    .iter()
                    .zip(layers.iter())
                    .rev()
                    .find_map(|(level, l)| l.get(key).map(|v| (*level, *v)))
                    .unwrap();
                assert_eq!(effective.get(key), Some(&json!(value)));
                assert_eq!(effective.provenance[key], level);
            }
            assert_eq!(effective.as_of_versions.len(), 4);
            Ok(())
        })
        .unwrap();
}

/// Resolving twice without writes yields the same view
#[test]
fn test_resolution_idempotence_property() {
    runner()
        .run(&[layer(), layer(), layer(), layer()], |layers| {
            let (resolver, task) = seed(&layers);
            let first = resolver.resolve_effective(&task).unwrap();
            let second = resolver.resolve_effective(&task).unwrap();
            assert_eq!(first.merged_data, second.merged_data);
            assert_eq!(first.provenance, second.provenance);
            assert_eq!(first.fingerprint(), second.fingerprint());
            Ok(())
        })
        .unwrap();
}

/// Append-tagged lists concatenate root to leaf; untagged lists are replaced
#[test]
fn test_append_concatenates_property() {
    let mut runner = TestRunner::default();

    runner
        .run(
            &(vec(vec(any::<u8>(), 0..4), 1..5), any::<bool>()),
            |(lists, append)| {
                let mut policies = BTreeMap::new();
                if append {
                    policies.insert("items".to_string(), MergePolicy::Append);
                }

                let mut merged = Map::new();
                for list in &lists {
                    let mut overlay = Map::new();
                    overlay.insert("items".to_string(), json!(list));
                    merge_values(&mut merged, &overlay, &policies, "");
                }

                let expected: Vec<u8> = if append {
                    lists.iter().flatten().copied().collect()
                } else {
                    lists.last().cloned().unwrap_or_default()
                };
                assert_eq!(merged.get("items"), Some(&json!(expected)));
                Ok(())
            },
        )
        .unwrap();
}

/// A patch overrides the keys it names and leaves every other target key alone
#[test]
fn test_patch_preserves_untouched_keys_property() {
    let mut runner = TestRunner::default();

    runner
        .run(&(layer(), layer()), |(target, patch)| {
            let merged = apply_patch(&data_from(&target), &data_from(&patch));

            for (key, value) in &target {
                let expected = patch.get(key).unwrap_or(value);
                assert_eq!(merged.get(key), Some(&Value::from(*expected)));
            }
            for (key, value) in &patch {
                assert_eq!(merged.get(key), Some(&Value::from(*value)));
            }
            Ok(())
        })
        .unwrap();
}

//! Integration tests for effective-context resolution

use crate::integration::test_utils::{embedded_engine, seed_chain, HidingRepository};
use heritage::inheritance::InheritanceResolver;
use heritage::repository::{Repository, StoreRepository};
use heritage::store::{ContextNode, SledNodeStore};
use heritage::types::Deadline;
use heritage::{ContextData, ContextError, Level, MergePolicy, NodeRef, TenantId};
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// GLOBAL{theme} → PROJECT{lang} → BRANCH{} → TASK{assignee} merges with per-key provenance
#[test]
fn test_concrete_four_level_scenario() {
    let engine = embedded_engine("acme");
    let chain = seed_chain(&engine);

    let effective = engine.get_effective_context(&chain.task).unwrap();
    assert_eq!(
        serde_json::Value::Object(effective.merged_data.clone()),
        json!({"theme": "dark", "lang": "en", "assignee": "alice"})
    );
    assert_eq!(effective.provenance["theme"], Level::Global);
    assert_eq!(effective.provenance["lang"], Level::Project);
    assert_eq!(effective.provenance["assignee"], Level::Task);
    assert_eq!(effective.provenance.len(), 3);
    assert_eq!(effective.as_of_versions.len(), 4);
    assert!(!effective.is_partial());
}

/// A freshly created node resolves to its own data with its own level as provenance
#[test]
fn test_create_then_resolve_roundtrip() {
    let engine = embedded_engine("acme");
    let global = engine
        .create_context(Level::Global, None, ContextData::new())
        .unwrap();
    let project = engine
        .create_context(Level::Project, Some(&global), ContextData::new().with("k", "v"))
        .unwrap();

    let effective = engine.get_effective_context(&project).unwrap();
    assert_eq!(effective.get("k"), Some(&json!("v")));
    assert_eq!(effective.provenance["k"], Level::Project);
}

/// Two resolutions with no intervening writes agree
#[test]
fn test_resolution_is_idempotent() {
    let engine = embedded_engine("acme");
    let chain = seed_chain(&engine);

    let first = engine.get_effective_context_fresh(&chain.task).unwrap();
    let second = engine.get_effective_context_fresh(&chain.task).unwrap();
    assert_eq!(first.merged_data, second.merged_data);
    assert_eq!(first.provenance, second.provenance);
    assert_eq!(first.fingerprint(), second.fingerprint());
}

/// Nearer levels override scalars, maps merge, append lists concatenate root to leaf
#[test]
fn test_merge_policies_across_levels() {
    let engine = embedded_engine("acme");
    let global = engine
        .create_context(
            Level::Global,
            None,
            ContextData::new()
                .with("limits", json!({"cpu": 1, "mem": 512}))
                .with("tags", json!(["org"]))
                .with("owners", json!(["root"]))
                .with_policy("tags", MergePolicy::Append),
        )
        .unwrap();
    let project = engine
        .create_context(
            Level::Project,
            Some(&global),
            ContextData::new()
                .with("limits", json!({"mem": 1024}))
                .with("tags", json!(["web"]))
                .with("owners", json!(["team-web"])),
        )
        .unwrap();

    let effective = engine.get_effective_context(&project).unwrap();
    assert_eq!(effective.get("limits"), Some(&json!({"cpu": 1, "mem": 1024})));
    assert_eq!(effective.get("tags"), Some(&json!(["org", "web"])));
    assert_eq!(effective.get("owners"), Some(&json!(["team-web"])));
    assert_eq!(effective.provenance["limits"], Level::Project);
}

/// Repository whose reads take a fixed time
struct SlowRepository {
    inner: StoreRepository,
    delay: Duration,
}

impl Repository for SlowRepository {
    fn create_with_id(
        &self,
        level: Level,
        parent: Option<&NodeRef>,
        id: Option<String>,
        data: ContextData,
    ) -> Result<ContextNode, ContextError> {
        self.inner.create_with_id(level, parent, id, data)
    }

    fn get(&self, node: &NodeRef) -> Result<ContextNode, ContextError> {
        thread::sleep(self.delay);
        self.inner.get(node)
    }

    fn update(
        &self,
        node: &NodeRef,
        data: ContextData,
        expected_version: u64,
    ) -> Result<ContextNode, ContextError> {
        self.inner.update(node, data, expected_version)
    }

    fn delete_into(
        &self,
        node: &NodeRef,
        cascade: bool,
        deleted: &mut Vec<NodeRef>,
    ) -> Result<(), ContextError> {
        self.inner.delete_into(node, cascade, deleted)
    }

    fn children_of(&self, node: &NodeRef) -> Result<Vec<NodeRef>, ContextError> {
        self.inner.children_of(node)
    }

    fn list(&self, level: Level) -> Result<Vec<ContextNode>, ContextError> {
        self.inner.list(level)
    }

    fn tenant(&self) -> &TenantId {
        self.inner.tenant()
    }

    fn describe(&self) -> String {
        "slow".to_string()
    }
}

fn seeded_store_repository() -> (StoreRepository, Vec<NodeRef>) {
    let tenant = TenantId::new("acme");
    let store = SledNodeStore::temporary(&tenant).unwrap();
    let repo = StoreRepository::new(Arc::new(store), tenant);
    let global = repo
        .create(Level::Global, None, ContextData::new().with("theme", "dark"))
        .unwrap()
        .node_ref();
    let project = repo
        .create(Level::Project, Some(&global), ContextData::new().with("lang", "en"))
        .unwrap()
        .node_ref();
    let branch = repo
        .create(Level::Branch, Some(&project), ContextData::new().with("ci", true))
        .unwrap()
        .node_ref();
    let task = repo
        .create(Level::Task, Some(&branch), ContextData::new().with("assignee", "alice"))
        .unwrap()
        .node_ref();
    (repo, vec![global, project, branch, task])
}

/// A missing ancestor yields a partial view naming the gap instead of an error
#[test]
fn test_missing_ancestor_yields_gap() {
    let (inner, nodes) = seeded_store_repository();
    let repo = HidingRepository {
        inner,
        hidden: nodes[1].clone(),
    };
    let resolver = InheritanceResolver::new(Arc::new(repo));

    let effective = resolver.resolve_effective(&nodes[3]).unwrap();
    assert_eq!(effective.gap, Some(Level::Project));
    assert!(effective.is_partial());
    assert_eq!(effective.get("ci"), Some(&json!(true)));
    assert_eq!(effective.get("assignee"), Some(&json!("alice")));
    assert!(effective.get("theme").is_none());
    assert_eq!(effective.as_of_versions.len(), 2);
}

/// The target itself missing is NotFound
#[test]
fn test_missing_target_is_not_found() {
    let (inner, _) = seeded_store_repository();
    let resolver = InheritanceResolver::new(Arc::new(inner));
    let result = resolver.resolve_effective(&NodeRef::new(Level::Task, "ghost"));
    assert!(matches!(result, Err(ContextError::NotFound(_))));
}

/// A deadline that passes mid-walk returns the chain merged so far inside the timeout
#[test]
fn test_deadline_returns_partial_chain() {
    let (inner, nodes) = seeded_store_repository();
    let repo = SlowRepository {
        inner,
        delay: Duration::from_millis(40),
    };
    let resolver = InheritanceResolver::new(Arc::new(repo));

    let result = resolver.resolve_with_deadline(&nodes[3], Deadline::after(Duration::from_millis(60)));
    match result {
        Err(ContextError::Timeout { node, partial }) => {
            assert_eq!(node, nodes[3]);
            assert!(!partial.as_of_versions.is_empty());
            assert!(partial.as_of_versions.len() < 4);
            assert_eq!(partial.get("assignee"), Some(&json!("alice")));
            assert!(partial.get("theme").is_none());
        }
        other => panic!("expected timeout, got {:?}", other.map(|c| c.merged_data)),
    }
}

//! Integration tests for the embedded node and proposal stores

use heritage::delegation::{DelegationWorkflow, ProposalStatus, ProposalStore, SledProposalStore};
use heritage::repository::{Repository, StoreRepository};
use heritage::store::{NodeStore, RemoveOutcome, SledNodeStore, SwapOutcome};
use heritage::{ContextData, Level, NodeRef, TenantId};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn open(dir: &TempDir, tenant: &TenantId) -> SledNodeStore {
    SledNodeStore::new(dir.path().join("db"), tenant).unwrap()
}

/// Nodes, versions and the adjacency index survive closing and reopening the database
#[test]
fn test_store_persists_after_reopen() {
    let dir = TempDir::new().unwrap();
    let tenant = TenantId::new("acme");
    let global = NodeRef::global(&tenant);
    let project = NodeRef::new(Level::Project, "web");

    {
        let store = Arc::new(open(&dir, &tenant));
        let repo = StoreRepository::new(store.clone(), tenant.clone());
        repo.create(Level::Global, None, ContextData::new().with("theme", "dark"))
            .unwrap();
        repo.create_with_id(
            Level::Project,
            Some(&global),
            Some("web".to_string()),
            ContextData::new().with("lang", "en"),
        )
        .unwrap();
        repo.update(&project, ContextData::new().with("lang", "fr"), 1)
            .unwrap();
        store.flush().unwrap();
    }

    let store = open(&dir, &tenant);
    let record = store.get(&project).unwrap().unwrap();
    assert_eq!(record.version, 2);
    assert_eq!(record.data.get("lang"), Some(&json!("fr")));
    assert_eq!(record.parent, Some(global.clone()));
    assert_eq!(store.children(&global).unwrap(), vec![project.clone()]);
    assert_eq!(store.list(Level::Project).unwrap().len(), 1);
}

/// The store-level guards hold on a reopened database as well
#[test]
fn test_guards_after_reopen() {
    let dir = TempDir::new().unwrap();
    let tenant = TenantId::new("acme");
    let global = NodeRef::global(&tenant);
    {
        let store = Arc::new(open(&dir, &tenant));
        let repo = StoreRepository::new(store.clone(), tenant.clone());
        repo.create(Level::Global, None, ContextData::new()).unwrap();
        repo.create_with_id(
            Level::Project,
            Some(&global),
            Some("web".to_string()),
            ContextData::new(),
        )
        .unwrap();
        store.flush().unwrap();
    }

    let store = open(&dir, &tenant);
    assert_eq!(store.remove(&global).unwrap(), RemoveOutcome::HasChildren(1));

    let project = NodeRef::new(Level::Project, "web");
    let current = store.get(&project).unwrap().unwrap();
    let next = current.next_version(ContextData::new().with("k", "v"));
    assert_eq!(
        store.compare_and_swap(&project, 7, &next).unwrap(),
        SwapOutcome::VersionMismatch { current: 1 }
    );
    assert_eq!(
        store.compare_and_swap(&project, 1, &next).unwrap(),
        SwapOutcome::Swapped
    );
    assert_eq!(store.remove(&project).unwrap(), RemoveOutcome::Removed);
    assert!(store.children(&global).unwrap().is_empty());
}

/// Proposals share the node database and outlive the workflow that wrote them
#[test]
fn test_proposals_share_node_database() {
    let dir = TempDir::new().unwrap();
    let tenant = TenantId::new("acme");
    let global = NodeRef::global(&tenant);

    let id = {
        let store = Arc::new(open(&dir, &tenant));
        let proposals = Arc::new(SledProposalStore::new(store.db(), &tenant).unwrap());
        let repo: Arc<dyn Repository> =
            Arc::new(StoreRepository::new(store.clone(), tenant.clone()));
        repo.create(Level::Global, None, ContextData::new()).unwrap();
        let project = repo
            .create(Level::Project, Some(&global), ContextData::new())
            .unwrap();

        let workflow = DelegationWorkflow::new(repo, proposals);
        let proposal = workflow
            .propose(
                &project.node_ref(),
                &global,
                ContextData::new().with("ci", "strict"),
                None,
            )
            .unwrap();
        workflow.approve(&proposal.id).unwrap();
        store.flush().unwrap();
        proposal.id
    };

    let store = open(&dir, &tenant);
    let proposals = SledProposalStore::new(store.db(), &tenant).unwrap();
    let stored = proposals.get(&id).unwrap().unwrap();
    assert_eq!(stored.status, ProposalStatus::Approved);
    assert_eq!(stored.target, global);
    assert_eq!(stored.target_version, 1);

    // another tenant in the same database sees no proposals
    let other = SledProposalStore::new(store.db(), &TenantId::new("globex")).unwrap();
    assert!(other.list().unwrap().is_empty());
}

//! Proposal storage.

use crate::delegation::{DelegationProposal, ProposalStatus};
use crate::error::StorageError;
use crate::types::TenantId;
use parking_lot::RwLock;
use sled::{Db, Tree};
use std::collections::HashMap;

const TREE_PROPOSALS: &str = "proposals";

pub trait ProposalStore: Send + Sync {
    fn insert(&self, proposal: &DelegationProposal) -> Result<(), StorageError>;

    fn get(&self, id: &str) -> Result<Option<DelegationProposal>, StorageError>;

    /// Store `next` only if the stored proposal is still in `expected` status.
    /// Returns false when the status moved or the proposal is gone.
    fn replace(
        &self,
        next: &DelegationProposal,
        expected: ProposalStatus,
    ) -> Result<bool, StorageError>;

    /// All proposals, oldest first.
    fn list(&self) -> Result<Vec<DelegationProposal>, StorageError>;
}

/// Proposals held for the lifetime of the process.
#[derive(Default)]
pub struct MemoryProposalStore {
    proposals: RwLock<HashMap<String, DelegationProposal>>,
}

impl MemoryProposalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProposalStore for MemoryProposalStore {
    fn insert(&self, proposal: &DelegationProposal) -> Result<(), StorageError> {
        self.proposals
            .write()
            .insert(proposal.id.clone(), proposal.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<DelegationProposal>, StorageError> {
        Ok(self.proposals.read().get(id).cloned())
    }

    fn replace(
        &self,
        next: &DelegationProposal,
        expected: ProposalStatus,
    ) -> Result<bool, StorageError> {
        let mut proposals = self.proposals.write();
        match proposals.get_mut(&next.id) {
            Some(current) if current.status == expected => {
                *current = next.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn list(&self) -> Result<Vec<DelegationProposal>, StorageError> {
        let mut all: Vec<_> = self.proposals.read().values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }
}

/// Proposals kept next to the nodes in the embedded database, one tree per tenant.
#[derive(Clone)]
pub struct SledProposalStore {
    tree: Tree,
}

impl SledProposalStore {
    pub fn new(db: &Db, tenant: &TenantId) -> Result<Self, StorageError> {
        let tree = db.open_tree(format!("{}.{}", TREE_PROPOSALS, tenant))?;
        Ok(Self { tree })
    }
}

impl ProposalStore for SledProposalStore {
    fn insert(&self, proposal: &DelegationProposal) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(proposal)?;
        self.tree.insert(proposal.id.as_bytes(), bytes)?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<DelegationProposal>, StorageError> {
        match self.tree.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn replace(
        &self,
        next: &DelegationProposal,
        expected: ProposalStatus,
    ) -> Result<bool, StorageError> {
        let Some(raw) = self.tree.get(next.id.as_bytes())? else {
            return Ok(false);
        };
        let current: DelegationProposal = serde_json::from_slice(&raw)?;
        if current.status != expected {
            return Ok(false);
        }
        let bytes = serde_json::to_vec(next)?;
        let swapped = self
            .tree
            .compare_and_swap(next.id.as_bytes(), Some(raw), Some(bytes))?;
        Ok(swapped.is_ok())
    }

    fn list(&self) -> Result<Vec<DelegationProposal>, StorageError> {
        let mut all = Vec::new();
        for entry in self.tree.iter() {
            let (_, bytes) = entry?;
            all.push(serde_json::from_slice::<DelegationProposal>(&bytes)?);
        }
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }
}

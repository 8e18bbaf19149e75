use crate::delegation::{DelegationProposal, ProposalStatus, ProposalStore};
use crate::error::ContextError;
use crate::inheritance::merge::apply_patch;
use crate::repository::Repository;
use crate::store::ContextNode;
use crate::types::{ContextData, NodeRef};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Drives proposals through their state machine.
///
/// Transitions are compare-and-swap on the stored status, so two callers can never both move
/// a proposal out of the same state. Within one process `apply` additionally holds a
/// per-proposal lock so a proposal is applied at most once.
pub struct DelegationWorkflow {
    repo: Arc<dyn Repository>,
    proposals: Arc<dyn ProposalStore>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DelegationWorkflow {
    pub fn new(repo: Arc<dyn Repository>, proposals: Arc<dyn ProposalStore>) -> Self {
        Self {
            repo,
            proposals,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Record a proposal to copy `patch` from `source` up to `target`.
    pub fn propose(
        &self,
        source: &NodeRef,
        target: &NodeRef,
        patch: ContextData,
        reason: Option<String>,
    ) -> Result<DelegationProposal, ContextError> {
        if patch.is_empty() {
            return Err(ContextError::Validation(
                "Delegation patch cannot be empty".to_string(),
            ));
        }
        patch.validate()?;
        if !target.level.is_above(source.level) {
            return Err(ContextError::Validation(format!(
                "Delegation target {} must be above source {}",
                target, source
            )));
        }

        let target_node = self.ancestor_at(source, target)?;
        let proposal = DelegationProposal {
            id: Uuid::new_v4().to_string(),
            source: source.clone(),
            target: target.clone(),
            patch,
            reason,
            status: ProposalStatus::Pending,
            target_version: target_node.version,
            created_at: Utc::now(),
            resolved_at: None,
            conflict_version: None,
        };
        self.proposals.insert(&proposal)?;
        info!(
            proposal = %proposal.id,
            source = %source,
            target = %target,
            target_version = proposal.target_version,
            "Delegation proposed"
        );
        Ok(proposal)
    }

    /// Walk up from `source` and return `target` if it is on the chain.
    ///
    /// A missing intermediate ancestor fails validation: the chain cannot prove `target` is
    /// above `source`.
    fn ancestor_at(&self, source: &NodeRef, target: &NodeRef) -> Result<ContextNode, ContextError> {
        let mut current = self.repo.get(source)?;
        while current.level != target.level {
            let Some(parent) = current.parent.clone() else {
                break;
            };
            current = match self.repo.get(&parent) {
                Ok(node) => node,
                Err(ContextError::NotFound(missing)) => {
                    return Err(ContextError::Validation(format!(
                        "Chain of {} is broken at {}",
                        source, missing
                    )))
                }
                Err(e) => return Err(e),
            };
        }
        if current.node_ref() != *target {
            return Err(ContextError::Validation(format!(
                "{} is not an ancestor of {}",
                target, source
            )));
        }
        Ok(current)
    }

    pub fn get(&self, id: &str) -> Result<DelegationProposal, ContextError> {
        self.proposals
            .get(id)?
            .ok_or_else(|| ContextError::ProposalNotFound(id.to_string()))
    }

    pub fn list(&self, status: Option<ProposalStatus>) -> Result<Vec<DelegationProposal>, ContextError> {
        let all = self.proposals.list()?;
        Ok(match status {
            Some(status) => all.into_iter().filter(|p| p.status == status).collect(),
            None => all,
        })
    }

    pub fn approve(&self, id: &str) -> Result<DelegationProposal, ContextError> {
        self.with_lock(id, || {
            let proposal = self.get(id)?;
            self.transition(&proposal, ProposalStatus::Approved)
        })
    }

    pub fn reject(&self, id: &str) -> Result<DelegationProposal, ContextError> {
        self.with_lock(id, || {
            let proposal = self.get(id)?;
            let rejected = self.transition(&proposal, ProposalStatus::Rejected)?;
            info!(proposal = %id, "Delegation rejected");
            Ok(rejected)
        })
    }

    /// Merge the patch into the target.
    ///
    /// A `PENDING` proposal is approved first. If the target moved since the proposal was
    /// made the proposal becomes `CONFLICTED` and nothing is written. A missing target fails
    /// with `NotFound` and leaves the proposal as it was.
    pub fn apply(&self, id: &str) -> Result<ContextNode, ContextError> {
        self.with_lock(id, || {
            let mut proposal = self.get(id)?;
            if proposal.status.is_terminal() {
                return Err(ContextError::InvalidTransition {
                    proposal_id: id.to_string(),
                    from: proposal.status,
                    to: ProposalStatus::Applied,
                });
            }

            let target = self.repo.get(&proposal.target)?;
            if proposal.status == ProposalStatus::Pending {
                proposal = self.transition(&proposal, ProposalStatus::Approved)?;
            }
            if target.version != proposal.target_version {
                return Err(self.conflict(&proposal, target.version));
            }

            let merged = apply_patch(&target.data, &proposal.patch);
            let updated = match self.repo.update(&proposal.target, merged, target.version) {
                Ok(updated) => updated,
                Err(ContextError::VersionConflict { current, .. }) => {
                    return Err(self.conflict(&proposal, current));
                }
                Err(e) => return Err(e),
            };

            let applied = proposal.transitioned(ProposalStatus::Applied);
            if !self.proposals.replace(&applied, ProposalStatus::Approved)? {
                warn!(proposal = %id, "Proposal changed while applying; target was still updated");
            }
            info!(
                proposal = %id,
                target = %proposal.target,
                version = updated.version,
                "Delegation applied"
            );
            Ok(updated)
        })
    }

    fn transition(
        &self,
        proposal: &DelegationProposal,
        to: ProposalStatus,
    ) -> Result<DelegationProposal, ContextError> {
        let from = proposal.status;
        if !from.can_transition_to(to) {
            return Err(ContextError::InvalidTransition {
                proposal_id: proposal.id.clone(),
                from,
                to,
            });
        }
        let next = proposal.transitioned(to);
        if self.proposals.replace(&next, from)? {
            return Ok(next);
        }
        // another process moved it first
        let current = self.get(&proposal.id)?;
        Err(ContextError::InvalidTransition {
            proposal_id: proposal.id.clone(),
            from: current.status,
            to,
        })
    }

    /// Mark the proposal `CONFLICTED` and build the error to return.
    fn conflict(&self, proposal: &DelegationProposal, current: u64) -> ContextError {
        debug!(
            proposal = %proposal.id,
            target = %proposal.target,
            expected = proposal.target_version,
            current,
            "Delegation conflicted"
        );
        let mut conflicted = proposal.transitioned(ProposalStatus::Conflicted);
        conflicted.conflict_version = Some(current);
        match self.proposals.replace(&conflicted, proposal.status) {
            Ok(true) => {}
            Ok(false) => warn!(proposal = %proposal.id, "Proposal changed before it could be marked conflicted"),
            Err(e) => return ContextError::Storage(e),
        }
        ContextError::DelegationConflict {
            proposal_id: proposal.id.clone(),
            expected: proposal.target_version,
            current,
        }
    }

    fn with_lock<T>(&self, id: &str, f: impl FnOnce() -> T) -> T {
        let lock = self
            .locks
            .lock()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard = lock.lock();
            f()
        };
        let mut locks = self.locks.lock();
        // map entry plus ours: nobody else is waiting
        if Arc::strong_count(&lock) == 2 {
            locks.remove(id);
        }
        result
    }
}

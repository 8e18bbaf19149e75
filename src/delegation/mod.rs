//! Delegation Workflow
//!
//! Promotes a subset of a descendant's data upward to an ancestor through an explicit
//! propose → approve → apply flow. Application goes through a normal repository update, so
//! optimistic versioning and the invalidation cascade apply unchanged.

pub mod store;
pub mod workflow;

pub use store::{MemoryProposalStore, ProposalStore, SledProposalStore};
pub use workflow::DelegationWorkflow;

use crate::types::{ContextData, NodeRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Applied,
    Rejected,
    Conflicted,
}

impl ProposalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProposalStatus::Pending => "PENDING",
            ProposalStatus::Approved => "APPROVED",
            ProposalStatus::Applied => "APPLIED",
            ProposalStatus::Rejected => "REJECTED",
            ProposalStatus::Conflicted => "CONFLICTED",
        }
    }

    /// `APPLIED`, `REJECTED` and `CONFLICTED` never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProposalStatus::Applied | ProposalStatus::Rejected | ProposalStatus::Conflicted
        )
    }

    pub fn can_transition_to(self, to: ProposalStatus) -> bool {
        use ProposalStatus::*;
        matches!(
            (self, to),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Conflicted)
                | (Approved, Applied)
                | (Approved, Rejected)
                | (Approved, Conflicted)
        )
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One promote-upward request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationProposal {
    pub id: String,
    pub source: NodeRef,
    /// Strict ancestor of `source`.
    pub target: NodeRef,
    pub patch: ContextData,
    #[serde(default)]
    pub reason: Option<String>,
    pub status: ProposalStatus,
    /// Target version observed at proposal time.
    pub target_version: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Target version found at apply time when the proposal conflicted.
    #[serde(default)]
    pub conflict_version: Option<u64>,
}

impl DelegationProposal {
    /// Copy moved to `status`; terminal states stamp `resolved_at`.
    pub fn transitioned(&self, status: ProposalStatus) -> Self {
        let mut next = self.clone();
        next.status = status;
        if status.is_terminal() {
            next.resolved_at = Some(Utc::now());
        }
        next
    }
}

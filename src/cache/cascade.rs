//! Invalidation cascade.
//!
//! A write to a node changes the effective context of every descendant, so the cascade walks
//! the subtree breadth-first and evicts one level per backend call. The written node loses
//! both its node and effective entries; descendants only lose their effective entries.

use crate::cache::{CacheLayer, EntryKind};
use crate::error::ContextError;
use crate::repository::Repository;
use crate::types::{Deadline, NodeRef};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Outcome of one cascade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeReport {
    pub root: NodeRef,
    /// Nodes whose entries were evicted, root first.
    pub invalidated: Vec<NodeRef>,
    /// False when the deadline cut the walk short or a child listing failed. Entries left
    /// behind expire with the cache TTL.
    pub complete: bool,
}

pub fn invalidate_subtree(
    repo: &dyn Repository,
    layer: &CacheLayer,
    root: &NodeRef,
    deadline: Deadline,
) -> CascadeReport {
    layer.evict(
        std::slice::from_ref(root),
        &[EntryKind::Node, EntryKind::Effective],
    );
    let mut report = CascadeReport {
        root: root.clone(),
        invalidated: vec![root.clone()],
        complete: true,
    };

    let mut frontier = vec![root.clone()];
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for node in &frontier {
            if deadline.expired() {
                return incomplete(report, "deadline passed");
            }
            match repo.children_of(node) {
                Ok(children) => next.extend(children),
                // deleted under us; nothing below it to evict
                Err(ContextError::NotFound(_)) => {}
                Err(e) => {
                    warn!(node = %node, error = %e, "Failed to list children during invalidation");
                    report.complete = false;
                }
            }
        }
        if next.is_empty() {
            break;
        }
        layer.evict(&next, &[EntryKind::Effective]);
        report.invalidated.extend(next.iter().cloned());
        frontier = next;
    }

    debug!(
        root = %root,
        invalidated = report.invalidated.len(),
        complete = report.complete,
        "Invalidation cascade finished"
    );
    if !report.complete {
        warn!(root = %root, "Invalidation cascade incomplete; stale entries expire with the TTL");
    }
    report
}

fn incomplete(mut report: CascadeReport, reason: &str) -> CascadeReport {
    report.complete = false;
    warn!(
        root = %report.root,
        invalidated = report.invalidated.len(),
        reason,
        "Invalidation cascade incomplete; stale entries expire with the TTL"
    );
    report
}

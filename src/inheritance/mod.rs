//! Inheritance Resolver
//!
//! Computes the effective view of a node by walking its ancestor chain up to `GLOBAL` and
//! merging root → leaf. The walk takes no locks: concurrent updates to two ancestors during
//! one resolution can produce a view that never existed as a whole (read skew).

pub mod merge;

use crate::error::ContextError;
use crate::repository::Repository;
use crate::store::ContextNode;
use crate::types::{Deadline, Level, NodeRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Version of one chain member read during resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeVersion {
    pub node: NodeRef,
    pub version: u64,
}

/// Merged view of a node and its ancestors. Computed, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveContext {
    pub node: NodeRef,
    pub merged_data: Map<String, Value>,
    /// Most specific level whose value survived the merge, per top-level key.
    pub provenance: BTreeMap<String, Level>,
    /// Every node actually read, root first.
    pub as_of_versions: Vec<NodeVersion>,
    /// Level of the first missing ancestor, if the chain is broken.
    #[serde(default)]
    pub gap: Option<Level>,
    pub resolved_at: DateTime<Utc>,
}

impl EffectiveContext {
    /// True when the chain had a gap; such views are returned but never cached.
    pub fn is_partial(&self) -> bool {
        self.gap.is_some()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.merged_data.get(key)
    }

    /// Version of the chain member at `level`, if it was read.
    pub fn version_at(&self, level: Level) -> Option<u64> {
        self.as_of_versions
            .iter()
            .find(|v| v.node.level == level)
            .map(|v| v.version)
    }

    /// Stable digest of `merged_data` and `provenance`, usable as an ETag.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for (key, value) in &self.merged_data {
            hasher.update(key.as_bytes());
            hasher.update(&[0]);
            hasher.update(value.to_string().as_bytes());
            hasher.update(&[0]);
            if let Some(level) = self.provenance.get(key) {
                hasher.update(level.as_str().as_bytes());
            }
            hasher.update(&[0xff]);
        }
        hex::encode(hasher.finalize().as_bytes())
    }
}

/// Merge a chain given leaf-first (as collected by the upward walk).
fn merge_chain(target: &NodeRef, leaf_first: &[ContextNode], gap: Option<Level>) -> EffectiveContext {
    let root_first: Vec<&ContextNode> = leaf_first.iter().rev().collect();
    let policies = merge::combined_policies(root_first.iter().map(|n| &n.data));

    let mut merged_data = Map::new();
    let mut provenance = BTreeMap::new();
    for node in &root_first {
        merge::merge_values(&mut merged_data, &node.data.values, &policies, "");
        for key in node.data.values.keys() {
            provenance.insert(key.clone(), node.level);
        }
    }

    EffectiveContext {
        node: target.clone(),
        merged_data,
        provenance,
        as_of_versions: root_first
            .iter()
            .map(|n| NodeVersion {
                node: n.node_ref(),
                version: n.version,
            })
            .collect(),
        gap,
        resolved_at: Utc::now(),
    }
}

/// Walks ancestor chains through the repository interface.
#[derive(Clone)]
pub struct InheritanceResolver {
    repo: Arc<dyn Repository>,
}

impl InheritanceResolver {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Resolve without a deadline.
    pub fn resolve_effective(&self, node: &NodeRef) -> Result<EffectiveContext, ContextError> {
        self.resolve_with_deadline(node, Deadline::none())
    }

    /// Resolve the effective context of `node`.
    ///
    /// Fails with `NotFound` only when `node` itself is missing. A missing ancestor yields a
    /// partial view with `gap` set. When the deadline passes mid-walk the chain read so far
    /// is merged and returned inside `ContextError::Timeout`.
    pub fn resolve_with_deadline(
        &self,
        node: &NodeRef,
        deadline: Deadline,
    ) -> Result<EffectiveContext, ContextError> {
        if deadline.expired() {
            return Err(timeout(node, &[], None));
        }
        let target = self.repo.get(node)?;
        let mut next = target.parent.clone();
        let mut chain = vec![target];
        let mut gap = None;

        while let Some(parent_ref) = next {
            if deadline.expired() {
                return Err(timeout(node, &chain, gap));
            }
            let child_level = chain.last().map(|n| n.level).unwrap_or(node.level);
            if Some(parent_ref.level) != child_level.parent() {
                return Err(ContextError::Validation(format!(
                    "Corrupt chain under {}: parent {} is not one level up",
                    node, parent_ref
                )));
            }
            match self.repo.get(&parent_ref) {
                Ok(parent) => {
                    next = parent.parent.clone();
                    chain.push(parent);
                }
                Err(ContextError::NotFound(missing)) => {
                    debug!(node = %node, missing = %missing, "Ancestor missing; returning partial view");
                    gap = Some(missing.level);
                    next = None;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(merge_chain(node, &chain, gap))
    }
}

fn timeout(node: &NodeRef, chain: &[ContextNode], gap: Option<Level>) -> ContextError {
    ContextError::Timeout {
        node: node.clone(),
        partial: Box::new(merge_chain(node, chain, gap)),
    }
}

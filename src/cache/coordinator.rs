//! Cache Coordinator
//!
//! Serves effective contexts from the cache and falls back to the resolver on a miss. It only
//! talks to the repository interface; merging stays inside the resolver.
//!
//! The resolver reads the uncached base repository. An effective view built from node entries
//! could inherit a record cached by a reader that raced a write, and outlive that record's
//! own eviction.

use crate::cache::{cascade, CacheLayer, CacheStats, CascadeReport, EntryKind};
use crate::error::ContextError;
use crate::inheritance::{EffectiveContext, InheritanceResolver};
use crate::repository::Repository;
use crate::types::{Deadline, NodeRef};
use std::sync::Arc;
use tracing::debug;

pub struct CacheCoordinator {
    repo: Arc<dyn Repository>,
    resolver: InheritanceResolver,
    layer: Option<Arc<CacheLayer>>,
}

impl CacheCoordinator {
    /// `repo` is the uncached base repository; `layer` is `None` when the deployment runs
    /// uncached.
    pub fn new(repo: Arc<dyn Repository>, layer: Option<Arc<CacheLayer>>) -> Self {
        let resolver = InheritanceResolver::new(repo.clone());
        Self {
            repo,
            resolver,
            layer,
        }
    }

    pub fn resolver(&self) -> &InheritanceResolver {
        &self.resolver
    }

    pub fn is_cached(&self) -> bool {
        self.layer.is_some()
    }

    pub fn get_or_resolve(&self, node: &NodeRef) -> Result<EffectiveContext, ContextError> {
        self.get_or_resolve_with_deadline(node, Deadline::none())
    }

    pub fn get_or_resolve_with_deadline(
        &self,
        node: &NodeRef,
        deadline: Deadline,
    ) -> Result<EffectiveContext, ContextError> {
        if let Some(layer) = &self.layer {
            if let Some(hit) = layer.get_effective(node) {
                return Ok(hit);
            }
        }
        self.resolve_and_store(node, deadline)
    }

    /// Resolve through the store regardless of what is cached, then repopulate the entry.
    pub fn refresh(
        &self,
        node: &NodeRef,
        deadline: Deadline,
    ) -> Result<EffectiveContext, ContextError> {
        self.resolve_and_store(node, deadline)
    }

    fn resolve_and_store(
        &self,
        node: &NodeRef,
        deadline: Deadline,
    ) -> Result<EffectiveContext, ContextError> {
        let epoch = self.layer.as_ref().map(|layer| layer.epoch());
        let context = self.resolver.resolve_with_deadline(node, deadline)?;

        if let (Some(layer), Some(epoch)) = (&self.layer, epoch) {
            if context.is_partial() {
                debug!(node = %node, gap = ?context.gap, "Not caching partial effective context");
            } else {
                layer.put_effective(&context, epoch);
            }
        }
        Ok(context)
    }

    /// Drop the cached entries of one node.
    pub fn invalidate(&self, node: &NodeRef) {
        if let Some(layer) = &self.layer {
            layer.evict(
                std::slice::from_ref(node),
                &[EntryKind::Node, EntryKind::Effective],
            );
        }
    }

    /// Drop the cached entries of `node` and the effective entries of all its descendants.
    pub fn invalidate_subtree(&self, node: &NodeRef, deadline: Deadline) -> CascadeReport {
        match &self.layer {
            Some(layer) => cascade::invalidate_subtree(self.repo.as_ref(), layer, node, deadline),
            None => CascadeReport {
                root: node.clone(),
                invalidated: Vec::new(),
                complete: true,
            },
        }
    }

    pub fn stats(&self) -> Option<CacheStats> {
        self.layer.as_ref().map(|layer| layer.stats())
    }
}

//! Context Engine
//!
//! The external surface of the crate, consumed by a presentation or API layer. Built once
//! from configuration; every call is synchronous and independent, and all state lives in the
//! selected backends.

use crate::cache::{CacheBackend, CacheCoordinator, CacheStats, CascadeReport};
use crate::config::HeritageConfig;
use crate::delegation::{DelegationProposal, DelegationWorkflow, ProposalStatus};
use crate::error::ContextError;
use crate::inheritance::EffectiveContext;
use crate::repository::selection::{select_backends, select_backends_with_cache};
use crate::repository::{Repository, SelectedBackends};
use crate::store::ContextNode;
use crate::types::{ContextData, Deadline, Level, NodeRef, TenantId};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Context engine service
///
/// Owns the repository stack, the cache coordinator and the delegation workflow. Safe to
/// share across threads behind an `Arc`.
pub struct ContextEngine {
    repo: Arc<dyn Repository>,
    coordinator: CacheCoordinator,
    delegation: DelegationWorkflow,
    resolve_timeout: Option<Duration>,
    description: String,
}

impl ContextEngine {
    /// Select backends from `config` and wire the engine.
    pub fn from_config(config: &HeritageConfig) -> Result<Self, ContextError> {
        let backends = select_backends(config)?;
        Ok(Self::from_backends(backends, config.resolver.timeout()))
    }

    /// Like [`ContextEngine::from_config`] with a caller-provided cache backend.
    pub fn from_config_with_cache(
        config: &HeritageConfig,
        cache: Arc<dyn CacheBackend>,
    ) -> Result<Self, ContextError> {
        let backends = select_backends_with_cache(config, cache)?;
        Ok(Self::from_backends(backends, config.resolver.timeout()))
    }

    pub fn from_backends(backends: SelectedBackends, resolve_timeout: Option<Duration>) -> Self {
        let SelectedBackends {
            repository,
            base,
            cache,
            proposals,
            description,
        } = backends;
        Self {
            coordinator: CacheCoordinator::new(base, cache),
            delegation: DelegationWorkflow::new(repository.clone(), proposals),
            repo: repository,
            resolve_timeout,
            description,
        }
    }

    fn deadline(&self) -> Deadline {
        self.resolve_timeout.map_or_else(Deadline::none, Deadline::after)
    }

    pub fn tenant(&self) -> &TenantId {
        self.repo.tenant()
    }

    /// Backend stack chosen at startup, e.g. `"embedded + memory cache"`.
    pub fn backend_description(&self) -> &str {
        &self.description
    }

    /// Create a context node with a generated id.
    ///
    /// # Arguments
    /// * `level` - Level of the new node
    /// * `parent` - Node exactly one level up; `None` only for `GLOBAL`
    /// * `data` - Initial data
    ///
    /// # Returns
    /// The reference of the created node, or `Validation` if the parent is missing or at the
    /// wrong level.
    pub fn create_context(
        &self,
        level: Level,
        parent: Option<&NodeRef>,
        data: ContextData,
    ) -> Result<NodeRef, ContextError> {
        Ok(self.repo.create(level, parent, data)?.node_ref())
    }

    pub fn create_context_with_id(
        &self,
        level: Level,
        parent: Option<&NodeRef>,
        id: impl Into<String>,
        data: ContextData,
    ) -> Result<NodeRef, ContextError> {
        Ok(self
            .repo
            .create_with_id(level, parent, Some(id.into()), data)?
            .node_ref())
    }

    /// Raw node record, without inheritance.
    pub fn get_context(&self, node: &NodeRef) -> Result<ContextNode, ContextError> {
        self.repo.get(node)
    }

    /// Effective context of `node`, served from the cache when possible.
    ///
    /// A missing ancestor yields a partial view with `gap` set. When the configured resolver
    /// deadline passes, `Timeout` carries the chain merged so far.
    pub fn get_effective_context(&self, node: &NodeRef) -> Result<EffectiveContext, ContextError> {
        self.coordinator
            .get_or_resolve_with_deadline(node, self.deadline())
    }

    /// Effective context resolved from the store, bypassing and then repopulating the cache.
    pub fn get_effective_context_fresh(
        &self,
        node: &NodeRef,
    ) -> Result<EffectiveContext, ContextError> {
        self.coordinator.refresh(node, self.deadline())
    }

    /// Replace a node's data under optimistic concurrency.
    ///
    /// # Returns
    /// The new version. On a stale `expected_version` fails with `VersionConflict` carrying the
    /// current version. Cached views of the node and its descendants are invalidated before
    /// this returns.
    pub fn update_context(
        &self,
        node: &NodeRef,
        data: ContextData,
        expected_version: u64,
    ) -> Result<u64, ContextError> {
        let updated = self.repo.update(node, data, expected_version)?;
        Ok(updated.version)
    }

    /// Delete a node, or with `cascade` its whole subtree. Returns the deleted nodes, leaves
    /// first.
    pub fn delete_context(
        &self,
        node: &NodeRef,
        cascade: bool,
    ) -> Result<Vec<NodeRef>, ContextError> {
        let deleted = self.repo.delete(node, cascade)?;
        debug!(node = %node, cascade, deleted = deleted.len(), "Context deleted");
        Ok(deleted)
    }

    pub fn children_of(&self, node: &NodeRef) -> Result<Vec<NodeRef>, ContextError> {
        self.repo.children_of(node)
    }

    pub fn parent_of(&self, node: &NodeRef) -> Result<Option<NodeRef>, ContextError> {
        self.repo.parent_of(node)
    }

    pub fn list_contexts(&self, level: Level) -> Result<Vec<ContextNode>, ContextError> {
        self.repo.list(level)
    }

    pub fn propose_delegation(
        &self,
        source: &NodeRef,
        target: &NodeRef,
        patch: ContextData,
    ) -> Result<String, ContextError> {
        self.propose_delegation_with_reason(source, target, patch, None)
    }

    pub fn propose_delegation_with_reason(
        &self,
        source: &NodeRef,
        target: &NodeRef,
        patch: ContextData,
        reason: Option<String>,
    ) -> Result<String, ContextError> {
        Ok(self.delegation.propose(source, target, patch, reason)?.id)
    }

    pub fn approve_delegation(&self, proposal_id: &str) -> Result<DelegationProposal, ContextError> {
        self.delegation.approve(proposal_id)
    }

    pub fn reject_delegation(&self, proposal_id: &str) -> Result<DelegationProposal, ContextError> {
        self.delegation.reject(proposal_id)
    }

    /// Apply a proposal; fails with `DelegationConflict` if the target moved since it was
    /// proposed.
    pub fn apply_delegation(&self, proposal_id: &str) -> Result<ContextNode, ContextError> {
        self.delegation.apply(proposal_id)
    }

    pub fn get_proposal(&self, proposal_id: &str) -> Result<DelegationProposal, ContextError> {
        self.delegation.get(proposal_id)
    }

    pub fn list_proposals(
        &self,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<DelegationProposal>, ContextError> {
        self.delegation.list(status)
    }

    /// Explicitly drop cached views for `node` and its descendants.
    pub fn invalidate_subtree(&self, node: &NodeRef) -> CascadeReport {
        self.coordinator.invalidate_subtree(node, self.deadline())
    }

    /// `None` when running uncached.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.coordinator.stats()
    }
}

//! Caching decorator over a repository.
//!
//! Node reads go through the cache. Every successful update runs the invalidation cascade
//! before returning, so a reader that starts after `update` returns never sees the old value
//! in this process.

use crate::cache::{cascade, CacheLayer, EntryKind};
use crate::error::ContextError;
use crate::repository::Repository;
use crate::store::ContextNode;
use crate::types::{ContextData, Deadline, Level, NodeRef, TenantId};
use std::sync::Arc;
use tracing::debug;

pub struct CachingRepository {
    inner: Arc<dyn Repository>,
    layer: Arc<CacheLayer>,
}

impl CachingRepository {
    pub fn new(inner: Arc<dyn Repository>, layer: Arc<CacheLayer>) -> Self {
        Self { inner, layer }
    }

    pub fn layer(&self) -> &Arc<CacheLayer> {
        &self.layer
    }

    pub fn inner(&self) -> &Arc<dyn Repository> {
        &self.inner
    }
}

impl Repository for CachingRepository {
    fn create_with_id(
        &self,
        level: Level,
        parent: Option<&NodeRef>,
        id: Option<String>,
        data: ContextData,
    ) -> Result<ContextNode, ContextError> {
        // a new leaf changes no existing effective view
        self.inner.create_with_id(level, parent, id, data)
    }

    fn get(&self, node: &NodeRef) -> Result<ContextNode, ContextError> {
        if let Some(record) = self.layer.get_node(node) {
            return Ok(record);
        }
        let epoch = self.layer.epoch();
        let record = self.inner.get(node)?;
        self.layer.put_node(&record, epoch);
        Ok(record)
    }

    fn update(
        &self,
        node: &NodeRef,
        data: ContextData,
        expected_version: u64,
    ) -> Result<ContextNode, ContextError> {
        let updated = self.inner.update(node, data, expected_version)?;
        let report = cascade::invalidate_subtree(
            self.inner.as_ref(),
            &self.layer,
            node,
            Deadline::none(),
        );
        debug!(
            node = %node,
            version = updated.version,
            invalidated = report.invalidated.len(),
            "Update committed and cache invalidated"
        );
        Ok(updated)
    }

    fn delete_into(
        &self,
        node: &NodeRef,
        cascade: bool,
        deleted: &mut Vec<NodeRef>,
    ) -> Result<(), ContextError> {
        let before = deleted.len();
        let result = self.inner.delete_into(node, cascade, deleted);
        // a cascade that fails partway has still removed these
        self.layer
            .evict(&deleted[before..], &[EntryKind::Node, EntryKind::Effective]);
        result
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
        format!("{} + {} cache", self.inner.describe(), self.layer.backend_name())
    }
}

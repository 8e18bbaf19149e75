//! Repository
//!
//! Uniform CRUD and adjacency queries over context nodes. [`StoreRepository`] enforces the
//! tree invariants on top of any [`NodeStore`]; [`CachingRepository`] decorates a repository
//! with node caching and the synchronous invalidation cascade. [`selection`] builds the stack
//! from configuration once at startup.

pub mod cached;
pub mod selection;

pub use cached::CachingRepository;
pub use selection::{select_backends, SelectedBackends};

use crate::error::ContextError;
use crate::store::{ContextNode, InsertOutcome, NodeStore, RemoveOutcome, SwapOutcome};
use crate::types::{ContextData, Level, NodeRef, TenantId};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Attempts to clear a subtree when children keep appearing under a node being deleted.
const CASCADE_DELETE_ATTEMPTS: usize = 3;

/// Repository interface
pub trait Repository: Send + Sync {
    /// Create a node. `id` defaults to a fresh UUID; `GLOBAL` always uses the tenant id.
    fn create_with_id(
        &self,
        level: Level,
        parent: Option<&NodeRef>,
        id: Option<String>,
        data: ContextData,
    ) -> Result<ContextNode, ContextError>;

    fn create(
        &self,
        level: Level,
        parent: Option<&NodeRef>,
        data: ContextData,
    ) -> Result<ContextNode, ContextError> {
        self.create_with_id(level, parent, None, data)
    }

    fn get(&self, node: &NodeRef) -> Result<ContextNode, ContextError>;

    /// Replace a node's data if `expected_version` is still current.
    fn update(
        &self,
        node: &NodeRef,
        data: ContextData,
        expected_version: u64,
    ) -> Result<ContextNode, ContextError>;

    /// Delete a node, or with `cascade` its whole subtree bottom-up, pushing each removed
    /// node onto `deleted` leaves first. On error `deleted` still holds what was removed
    /// before the failure.
    fn delete_into(
        &self,
        node: &NodeRef,
        cascade: bool,
        deleted: &mut Vec<NodeRef>,
    ) -> Result<(), ContextError>;

    /// Returns the deleted nodes, leaves first.
    fn delete(&self, node: &NodeRef, cascade: bool) -> Result<Vec<NodeRef>, ContextError> {
        let mut deleted = Vec::new();
        self.delete_into(node, cascade, &mut deleted)?;
        Ok(deleted)
    }

    fn children_of(&self, node: &NodeRef) -> Result<Vec<NodeRef>, ContextError>;

    fn parent_of(&self, node: &NodeRef) -> Result<Option<NodeRef>, ContextError> {
        Ok(self.get(node)?.parent)
    }

    fn list(&self, level: Level) -> Result<Vec<ContextNode>, ContextError>;

    fn tenant(&self) -> &TenantId;

    /// Human-readable description of the backend stack.
    fn describe(&self) -> String;
}

/// Repository over a raw node store
pub struct StoreRepository {
    store: Arc<dyn NodeStore>,
    tenant: TenantId,
}

impl StoreRepository {
    pub fn new(store: Arc<dyn NodeStore>, tenant: TenantId) -> Self {
        Self { store, tenant }
    }

    fn validate_create(
        &self,
        level: Level,
        parent: Option<&NodeRef>,
        id: Option<String>,
    ) -> Result<String, ContextError> {
        match (level.parent(), parent) {
            (None, None) => {}
            (None, Some(p)) => {
                return Err(ContextError::Validation(format!(
                    "{} has no parent, got {}",
                    level, p
                )))
            }
            (Some(expected), None) => {
                return Err(ContextError::Validation(format!(
                    "{} requires a {} parent",
                    level, expected
                )))
            }
            (Some(expected), Some(p)) if p.level != expected => {
                return Err(ContextError::Validation(format!(
                    "Parent of {} must be exactly one level up ({}), got {}",
                    level, expected, p
                )))
            }
            (Some(_), Some(_)) => {}
        }

        if level == Level::Global {
            return match id {
                Some(id) if id != self.tenant.as_str() => Err(ContextError::Validation(format!(
                    "GLOBAL id must be the tenant id '{}', got '{}'",
                    self.tenant, id
                ))),
                _ => Ok(self.tenant.as_str().to_string()),
            };
        }

        match id {
            Some(id) if id.trim().is_empty() => {
                Err(ContextError::Validation("Context id cannot be empty".to_string()))
            }
            Some(id) => Ok(id),
            None => Ok(Uuid::new_v4().to_string()),
        }
    }

    /// Remove `node` and everything under it, children first.
    fn delete_subtree(&self, node: &NodeRef, deleted: &mut Vec<NodeRef>) -> Result<(), ContextError> {
        for _ in 0..CASCADE_DELETE_ATTEMPTS {
            for child in self.store.children(node)? {
                self.delete_subtree(&child, deleted)?;
            }
            match self.store.remove(node)? {
                RemoveOutcome::Removed => {
                    deleted.push(node.clone());
                    return Ok(());
                }
                // removed concurrently; end state is the same
                RemoveOutcome::Missing => return Ok(()),
                RemoveOutcome::HasChildren(count) => {
                    debug!(node = %node, children = count, "Children appeared during cascade delete; retrying");
                }
            }
        }
        let children = self.store.children(node)?.len();
        warn!(node = %node, children, "Cascade delete gave up; children keep appearing");
        Err(ContextError::HasChildren {
            node: node.clone(),
            children,
        })
    }
}

impl Repository for StoreRepository {
    fn create_with_id(
        &self,
        level: Level,
        parent: Option<&NodeRef>,
        id: Option<String>,
        data: ContextData,
    ) -> Result<ContextNode, ContextError> {
        data.validate()?;
        let id = self.validate_create(level, parent, id)?;
        let record = ContextNode::new(NodeRef::new(level, id), parent.cloned(), data);

        match self.store.insert(&record)? {
            InsertOutcome::Inserted => {
                debug!(node = %record.node_ref(), "Context created");
                Ok(record)
            }
            InsertOutcome::AlreadyExists if level == Level::Global => Err(ContextError::Validation(
                format!("GLOBAL context already exists for tenant '{}'", self.tenant),
            )),
            InsertOutcome::AlreadyExists => Err(ContextError::Validation(format!(
                "{} already exists",
                record.node_ref()
            ))),
            InsertOutcome::ParentMissing => Err(ContextError::Validation(format!(
                "Parent {} does not exist",
                record.parent.as_ref().map(ToString::to_string).unwrap_or_default()
            ))),
        }
    }

    fn get(&self, node: &NodeRef) -> Result<ContextNode, ContextError> {
        self.store
            .get(node)?
            .ok_or_else(|| ContextError::NotFound(node.clone()))
    }

    fn update(
        &self,
        node: &NodeRef,
        data: ContextData,
        expected_version: u64,
    ) -> Result<ContextNode, ContextError> {
        data.validate()?;
        let current = self.get(node)?;
        if current.version != expected_version {
            debug!(node = %node, expected_version, current = current.version, "Version conflict");
            return Err(ContextError::VersionConflict {
                node: node.clone(),
                expected: expected_version,
                current: current.version,
            });
        }

        let next = current.next_version(data);
        match self.store.compare_and_swap(node, expected_version, &next)? {
            SwapOutcome::Swapped => Ok(next),
            SwapOutcome::Missing => Err(ContextError::NotFound(node.clone())),
            SwapOutcome::VersionMismatch { current } => {
                debug!(node = %node, expected_version, current, "Version conflict");
                Err(ContextError::VersionConflict {
                    node: node.clone(),
                    expected: expected_version,
                    current,
                })
            }
        }
    }

    fn delete_into(
        &self,
        node: &NodeRef,
        cascade: bool,
        deleted: &mut Vec<NodeRef>,
    ) -> Result<(), ContextError> {
        if cascade {
            // surface NotFound for the root rather than an empty result
            self.get(node)?;
            let before = deleted.len();
            self.delete_subtree(node, deleted)?;
            debug!(node = %node, deleted = deleted.len() - before, "Cascade delete finished");
            return Ok(());
        }

        match self.store.remove(node)? {
            RemoveOutcome::Removed => {
                deleted.push(node.clone());
                Ok(())
            }
            RemoveOutcome::Missing => Err(ContextError::NotFound(node.clone())),
            RemoveOutcome::HasChildren(children) => Err(ContextError::HasChildren {
                node: node.clone(),
                children,
            }),
        }
    }

    fn children_of(&self, node: &NodeRef) -> Result<Vec<NodeRef>, ContextError> {
        Ok(self.store.children(node)?)
    }

    fn list(&self, level: Level) -> Result<Vec<ContextNode>, ContextError> {
        Ok(self.store.list(level)?)
    }

    fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    fn describe(&self) -> String {
        self.store.backend_name().to_string()
    }
}

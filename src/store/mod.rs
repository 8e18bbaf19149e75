//! Context Node Store
//!
//! Durable CRUD for context nodes plus the parent→children adjacency index.
//! Two backends implement [`NodeStore`]: an embedded sled database and a managed remote
//! relational service reached over HTTP.

pub mod persistence;
pub mod remote;

pub use persistence::SledNodeStore;
pub use remote::RemoteNodeStore;

use crate::error::StorageError;
use crate::types::{ContextData, Level, NodeRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// ContextNode: one scoped record of configuration/state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextNode {
    pub level: Level,
    pub id: String,
    /// Owning node one level up; `None` only for `GLOBAL`.
    pub parent: Option<NodeRef>,
    pub data: ContextData,
    /// Starts at 1 and increases by one on every successful update.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContextNode {
    /// A fresh node at version 1.
    pub fn new(node: NodeRef, parent: Option<NodeRef>, data: ContextData) -> Self {
        let now = Utc::now();
        Self {
            level: node.level,
            id: node.id,
            parent,
            data,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn node_ref(&self) -> NodeRef {
        NodeRef::new(self.level, self.id.clone())
    }

    /// Copy with new data, the next version and a fresh `updated_at`.
    pub fn next_version(&self, data: ContextData) -> Self {
        Self {
            data,
            version: self.version + 1,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// Result of [`NodeStore::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
    ParentMissing,
}

/// Result of [`NodeStore::compare_and_swap`].
#[derive(Debug, Clone, PartialEq)]
pub enum SwapOutcome {
    Swapped,
    Missing,
    VersionMismatch { current: u64 },
}

/// Result of [`NodeStore::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    Missing,
    HasChildren(usize),
}

/// Node store interface.
///
/// Implementations make `insert`, `compare_and_swap` and `remove` atomic with respect to the
/// adjacency index: a child is never recorded under a missing parent and a node with
/// children is never removed.
pub trait NodeStore: Send + Sync {
    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    fn get(&self, node: &NodeRef) -> Result<Option<ContextNode>, StorageError>;

    /// Insert a new node and register it under its parent.
    fn insert(&self, node: &ContextNode) -> Result<InsertOutcome, StorageError>;

    /// Replace the stored node if its version equals `expected_version`.
    fn compare_and_swap(
        &self,
        node: &NodeRef,
        expected_version: u64,
        next: &ContextNode,
    ) -> Result<SwapOutcome, StorageError>;

    /// Remove a childless node and unregister it from its parent.
    fn remove(&self, node: &NodeRef) -> Result<RemoveOutcome, StorageError>;

    /// Direct children from the adjacency index.
    fn children(&self, node: &NodeRef) -> Result<Vec<NodeRef>, StorageError>;

    /// All nodes at a level.
    fn list(&self, level: Level) -> Result<Vec<ContextNode>, StorageError>;
}

/// Storage key for a node: `LEVEL/id`.
pub(crate) fn node_key(node: &NodeRef) -> String {
    format!("{}/{}", node.level, node.id)
}

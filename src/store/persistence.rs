//! Embedded persistence layer for the node store

use crate::error::StorageError;
use crate::store::{node_key, ContextNode, InsertOutcome, NodeStore, RemoveOutcome, SwapOutcome};
use crate::types::{Level, NodeRef, TenantId};
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use sled::{Db, Tree};
use std::path::Path;

const TREE_NODES: &str = "nodes";
const TREE_CHILDREN: &str = "children";

/// Sled-based implementation of NodeStore
///
/// Two trees per tenant: `nodes.<tenant>` maps `LEVEL/id` to the JSON node record, and
/// `children.<tenant>` maps a parent key to the JSON list of its children. Writes that touch
/// both run in one sled transaction.
#[derive(Clone)]
pub struct SledNodeStore {
    db: Db,
    nodes: Tree,
    children: Tree,
}

impl SledNodeStore {
    /// Open (or create) a store at the given directory.
    pub fn new<P: AsRef<Path>>(path: P, tenant: &TenantId) -> Result<Self, StorageError> {
        let db = sled::open(path.as_ref()).map_err(|e| {
            StorageError::Backend(format!(
                "Failed to open sled database at {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;
        Self::from_db(db, tenant)
    }

    /// Open a throwaway store that is removed when dropped.
    pub fn temporary(tenant: &TenantId) -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, tenant)
    }

    pub fn from_db(db: Db, tenant: &TenantId) -> Result<Self, StorageError> {
        let nodes = db.open_tree(format!("{}.{}", TREE_NODES, tenant))?;
        let children = db.open_tree(format!("{}.{}", TREE_CHILDREN, tenant))?;
        Ok(Self {
            db,
            nodes,
            children,
        })
    }

    /// Get the underlying sled database (shared with the proposal store)
    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

fn abort<T>(err: impl Into<StorageError>) -> Result<T, ConflictableTransactionError<StorageError>> {
    Err(ConflictableTransactionError::Abort(err.into()))
}

fn unwrap_tx<T>(result: Result<T, TransactionError<StorageError>>) -> Result<T, StorageError> {
    result.map_err(|e| match e {
        TransactionError::Abort(err) => err,
        TransactionError::Storage(err) => err.into(),
    })
}

fn decode_children(raw: Option<sled::IVec>) -> Result<Vec<NodeRef>, serde_json::Error> {
    match raw {
        Some(bytes) => serde_json::from_slice(&bytes),
        None => Ok(Vec::new()),
    }
}

impl NodeStore for SledNodeStore {
    fn backend_name(&self) -> &'static str {
        "embedded"
    }

    fn get(&self, node: &NodeRef) -> Result<Option<ContextNode>, StorageError> {
        match self.nodes.get(node_key(node).as_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn insert(&self, node: &ContextNode) -> Result<InsertOutcome, StorageError> {
        let key = node_key(&node.node_ref());
        let value = serde_json::to_vec(node)?;
        let child = node.node_ref();

        let result = (&self.nodes, &self.children).transaction(|(nodes, children)| {
            if nodes.get(key.as_bytes())?.is_some() {
                return Ok(InsertOutcome::AlreadyExists);
            }
            if let Some(parent) = &node.parent {
                let parent_key = node_key(parent);
                if nodes.get(parent_key.as_bytes())?.is_none() {
                    return Ok(InsertOutcome::ParentMissing);
                }
                let mut siblings = match decode_children(children.get(parent_key.as_bytes())?) {
                    Ok(list) => list,
                    Err(e) => return abort(e),
                };
                siblings.push(child.clone());
                let encoded = match serde_json::to_vec(&siblings) {
                    Ok(bytes) => bytes,
                    Err(e) => return abort(e),
                };
                children.insert(parent_key.as_bytes(), encoded)?;
            }
            nodes.insert(key.as_bytes(), value.clone())?;
            Ok(InsertOutcome::Inserted)
        });
        unwrap_tx(result)
    }

    fn compare_and_swap(
        &self,
        node: &NodeRef,
        expected_version: u64,
        next: &ContextNode,
    ) -> Result<SwapOutcome, StorageError> {
        let key = node_key(node);
        let value = serde_json::to_vec(next)?;

        let result = self.nodes.transaction(|nodes| {
            let Some(raw) = nodes.get(key.as_bytes())? else {
                return Ok(SwapOutcome::Missing);
            };
            let current: ContextNode = match serde_json::from_slice(&raw) {
                Ok(record) => record,
                Err(e) => return abort(e),
            };
            if current.version != expected_version {
                return Ok(SwapOutcome::VersionMismatch {
                    current: current.version,
                });
            }
            nodes.insert(key.as_bytes(), value.clone())?;
            Ok(SwapOutcome::Swapped)
        });
        unwrap_tx(result)
    }

    fn remove(&self, node: &NodeRef) -> Result<RemoveOutcome, StorageError> {
        let key = node_key(node);

        let result = (&self.nodes, &self.children).transaction(|(nodes, children)| {
            let Some(raw) = nodes.get(key.as_bytes())? else {
                return Ok(RemoveOutcome::Missing);
            };
            let own_children = match decode_children(children.get(key.as_bytes())?) {
                Ok(list) => list,
                Err(e) => return abort(e),
            };
            if !own_children.is_empty() {
                return Ok(RemoveOutcome::HasChildren(own_children.len()));
            }
            let record: ContextNode = match serde_json::from_slice(&raw) {
                Ok(record) => record,
                Err(e) => return abort(e),
            };
            if let Some(parent) = &record.parent {
                let parent_key = node_key(parent);
                let mut siblings = match decode_children(children.get(parent_key.as_bytes())?) {
                    Ok(list) => list,
                    Err(e) => return abort(e),
                };
                siblings.retain(|sibling| sibling != node);
                if siblings.is_empty() {
                    children.remove(parent_key.as_bytes())?;
                } else {
                    let encoded = match serde_json::to_vec(&siblings) {
                        Ok(bytes) => bytes,
                        Err(e) => return abort(e),
                    };
                    children.insert(parent_key.as_bytes(), encoded)?;
                }
            }
            children.remove(key.as_bytes())?;
            nodes.remove(key.as_bytes())?;
            Ok(RemoveOutcome::Removed)
        });
        unwrap_tx(result)
    }

    fn children(&self, node: &NodeRef) -> Result<Vec<NodeRef>, StorageError> {
        Ok(decode_children(self.children.get(node_key(node).as_bytes())?)?)
    }

    fn list(&self, level: Level) -> Result<Vec<ContextNode>, StorageError> {
        let prefix = format!("{}/", level);
        let mut records = Vec::new();
        for item in self.nodes.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }
}

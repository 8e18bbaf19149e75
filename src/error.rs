//! Error types for the context inheritance engine.

use crate::delegation::ProposalStatus;
use crate::inheritance::EffectiveContext;
use crate::types::NodeRef;
use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Remote store returned {status}: {message}")]
    Remote { status: u16, message: String },
}

/// Cache backend errors. Logged by the engine, never returned to callers.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Cache protocol error: {0}")]
    Protocol(String),

    #[error("Cache serialization error: {0}")]
    Serialization(String),
}

/// Errors surfaced by the repository, resolver, delegation workflow and engine.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Context not found: {0}")]
    NotFound(NodeRef),

    #[error("Version conflict on {node}: expected {expected}, current {current}")]
    VersionConflict {
        node: NodeRef,
        expected: u64,
        current: u64,
    },

    #[error("{node} has {children} children; delete with cascade to remove them")]
    HasChildren { node: NodeRef, children: usize },

    #[error("Delegation {proposal_id} conflicted: target moved from version {expected} to {current}")]
    DelegationConflict {
        proposal_id: String,
        expected: u64,
        current: u64,
    },

    #[error("Delegation proposal not found: {0}")]
    ProposalNotFound(String),

    #[error("Delegation {proposal_id} cannot move from {from} to {to}")]
    InvalidTransition {
        proposal_id: String,
        from: ProposalStatus,
        to: ProposalStatus,
    },

    #[error("Resolving {node} timed out after reading {} node(s)", .partial.as_of_versions.len())]
    Timeout {
        node: NodeRef,
        partial: Box<EffectiveContext>,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ContextError {
    /// Stable code for the presentation layer.
    pub fn code(&self) -> &'static str {
        match self {
            ContextError::Validation(_) => "VALIDATION",
            ContextError::NotFound(_) => "NOT_FOUND",
            ContextError::VersionConflict { .. } => "VERSION_CONFLICT",
            ContextError::HasChildren { .. } => "HAS_CHILDREN",
            ContextError::DelegationConflict { .. } => "CONFLICTED",
            ContextError::ProposalNotFound(_) => "PROPOSAL_NOT_FOUND",
            ContextError::InvalidTransition { .. } => "INVALID_TRANSITION",
            ContextError::Timeout { .. } => "TIMEOUT",
            ContextError::Storage(_) => "STORAGE",
            ContextError::Config(_) => "CONFIG",
        }
    }

    /// Current version carried by a version conflict, if any.
    pub fn current_version(&self) -> Option<u64> {
        match self {
            ContextError::VersionConflict { current, .. }
            | ContextError::DelegationConflict { current, .. } => Some(*current),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for ContextError {
    fn from(err: config::ConfigError) -> Self {
        ContextError::Config(err.to_string())
    }
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Backend(format!("sled: {}", err))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<sled::Error> for ContextError {
    fn from(err: sled::Error) -> Self {
        ContextError::Storage(err.into())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

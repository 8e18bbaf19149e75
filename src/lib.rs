//! Heritage: Hierarchical Context Inheritance
//!
//! Stores scoped context at four levels (GLOBAL → PROJECT → BRANCH → TASK) and computes the
//! effective context of any node by merging its ancestor chain, nearer levels overriding.
//! Writes use optimistic versioning; cached views are invalidated synchronously down the
//! written subtree; descendants can promote data upward through an explicit delegation flow.

pub mod cache;
pub mod config;
pub mod delegation;
pub mod engine;
pub mod error;
pub(crate) mod http;
pub mod inheritance;
pub mod logging;
pub mod repository;
pub mod store;
pub mod types;

pub use engine::ContextEngine;
pub use error::ContextError;
pub use inheritance::EffectiveContext;
pub use types::{ContextData, Level, MergePolicy, NodeRef, TenantId};

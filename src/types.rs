//! Core types shared across the engine.

use crate::error::ContextError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Scope level of a context node.
///
/// Levels form a strict total order with `Global` as the root. Navigation between levels
/// goes through [`Level::parent`] and [`Level::child`], so adding a level is a compile-time
/// checked change in every `match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Level {
    Global,
    Project,
    Branch,
    Task,
}

impl Level {
    /// All levels, root first.
    pub const ALL: [Level; 4] = [Level::Global, Level::Project, Level::Branch, Level::Task];

    /// The level directly above this one, `None` for the root.
    pub fn parent(self) -> Option<Level> {
        match self {
            Level::Global => None,
            Level::Project => Some(Level::Global),
            Level::Branch => Some(Level::Project),
            Level::Task => Some(Level::Branch),
        }
    }

    /// The level directly below this one, `None` for leaves.
    pub fn child(self) -> Option<Level> {
        match self {
            Level::Global => Some(Level::Project),
            Level::Project => Some(Level::Branch),
            Level::Branch => Some(Level::Task),
            Level::Task => None,
        }
    }

    /// Distance from the root (`Global` is 0).
    pub fn depth(self) -> usize {
        match self {
            Level::Global => 0,
            Level::Project => 1,
            Level::Branch => 2,
            Level::Task => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Global => "GLOBAL",
            Level::Project => "PROJECT",
            Level::Branch => "BRANCH",
            Level::Task => "TASK",
        }
    }

    /// True if `self` is strictly above `other` in the hierarchy.
    pub fn is_above(self, other: Level) -> bool {
        self.depth() < other.depth()
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GLOBAL" => Ok(Level::Global),
            "PROJECT" => Ok(Level::Project),
            "BRANCH" => Ok(Level::Branch),
            "TASK" => Ok(Level::Task),
            other => Err(ContextError::Validation(format!("Unknown level: {}", other))),
        }
    }
}

/// Reference to a context node: its level plus an id unique within that level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeRef {
    pub level: Level,
    pub id: String,
}

impl NodeRef {
    pub fn new(level: Level, id: impl Into<String>) -> Self {
        Self {
            level,
            id: id.into(),
        }
    }

    /// The `GLOBAL` singleton for a tenant.
    pub fn global(tenant: &TenantId) -> Self {
        Self::new(Level::Global, tenant.as_str())
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.level, self.id)
    }
}

/// Opaque caller/tenant identity. Only scopes the `GLOBAL` singleton and storage namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self("default".to_string())
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a key combines with the same key from a less specific level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergePolicy {
    /// Nearer level replaces the inherited value (maps still merge key-by-key).
    #[default]
    Override,
    /// Lists are concatenated root-to-leaf.
    Append,
}

/// The `data` payload of a context node.
///
/// `values` keeps insertion order. `policies` tags keys with a [`MergePolicy`]; nested keys
/// are addressed by dotted path (`"limits.retries"`). Untagged keys use `Override`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextData {
    #[serde(default)]
    pub values: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub policies: BTreeMap<String, MergePolicy>,
}

impl ContextData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON value, which must be an object.
    pub fn from_json(value: Value) -> Result<Self, ContextError> {
        match value {
            Value::Object(values) => Ok(Self {
                values,
                policies: BTreeMap::new(),
            }),
            other => Err(ContextError::Validation(format!(
                "Context data must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn with_policy(mut self, path: impl Into<String>, policy: MergePolicy) -> Self {
        self.policies.insert(path.into(), policy);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn policy_for(&self, path: &str) -> MergePolicy {
        self.policies.get(path).copied().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Reject policy tags that are not usable.
    pub fn validate(&self) -> Result<(), ContextError> {
        for path in self.policies.keys() {
            if path.is_empty() || path.split('.').any(str::is_empty) {
                return Err(ContextError::Validation(format!(
                    "Invalid merge policy path: '{}'",
                    path
                )));
            }
        }
        Ok(())
    }
}

impl From<Map<String, Value>> for ContextData {
    fn from(values: Map<String, Value>) -> Self {
        Self {
            values,
            policies: BTreeMap::new(),
        }
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Optional point in time after which resolution and cascades stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline that never expires.
    pub fn none() -> Self {
        Self { at: None }
    }

    /// Falls back to no deadline when `timeout` is too large to represent.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
        }
    }

    pub fn at(instant: Instant) -> Self {
        Self { at: Some(instant) }
    }

    pub fn expired(&self) -> bool {
        self.at.map_or(false, |at| Instant::now() >= at)
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }
}

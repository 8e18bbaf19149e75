//! Configuration System
//!
//! Deployment configuration read once at process start: tenant identity, storage and cache
//! backend selection, resolver deadline and logging. Layered sources are merged by
//! [`ConfigLoader`]; the result is an immutable [`HeritageConfig`] passed explicitly to the
//! engine.

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

mod loader;
mod sources;

pub use loader::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeritageConfig {
    /// Opaque tenant identity; scopes the GLOBAL singleton and storage namespaces.
    #[serde(default = "default_tenant")]
    pub tenant: String,

    #[serde(default)]
    pub deployment: DeploymentConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_tenant() -> String {
    "default".to_string()
}

impl Default for HeritageConfig {
    fn default() -> Self {
        Self {
            tenant: default_tenant(),
            deployment: DeploymentConfig::default(),
            storage: StorageConfig::default(),
            cache: CacheConfig::default(),
            resolver: ResolverConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    #[default]
    Isolated,
    Test,
    Managed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default)]
    pub mode: DeploymentMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    /// Embedded for isolated and test deployments, remote for managed ones.
    #[default]
    Auto,
    Embedded,
    Remote,
}

impl StorageBackendKind {
    /// Resolve `Auto` against the deployment mode.
    pub fn resolve(self, mode: DeploymentMode) -> StorageBackendKind {
        match (self, mode) {
            (StorageBackendKind::Auto, DeploymentMode::Managed) => StorageBackendKind::Remote,
            (StorageBackendKind::Auto, _) => StorageBackendKind::Embedded,
            (explicit, _) => explicit,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackendKind,

    #[serde(default)]
    pub embedded: EmbeddedStoreConfig,

    #[serde(default)]
    pub remote: RemoteStoreConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedStoreConfig {
    /// Database directory; defaults to the platform data dir.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Throwaway database removed on drop.
    #[serde(default)]
    pub temporary: bool,
}

impl EmbeddedStoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_store_path)
    }
}

fn default_store_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "heritage")
        .map(|dirs| dirs.data_dir().join("store"))
        .unwrap_or_else(|| PathBuf::from(".heritage/store"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStoreConfig {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_table")]
    pub table: String,

    #[serde(default = "default_remote_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_table() -> String {
    "context_nodes".to_string()
}

fn default_remote_timeout_ms() -> u64 {
    10_000
}

impl Default for RemoteStoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            table: default_table(),
            timeout_ms: default_remote_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    /// Redis-compatible REST endpoint.
    Rest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub backend: CacheBackendKind,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_cache_timeout_ms")]
    pub timeout_ms: u64,

    /// Minimum spacing between reachability probes while the cache is down.
    #[serde(default = "default_recovery_interval_ms")]
    pub recovery_interval_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_cache_timeout_ms() -> u64 {
    2_000
}

fn default_recovery_interval_ms() -> u64 {
    1_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            backend: CacheBackendKind::default(),
            url: None,
            token: None,
            ttl_secs: default_ttl_secs(),
            timeout_ms: default_cache_timeout_ms(),
            recovery_interval_ms: default_recovery_interval_ms(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_millis(self.recovery_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Default deadline for resolution and cascades; 0 disables it.
    #[serde(default = "default_resolver_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_resolver_timeout_ms() -> u64 {
    5_000
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_resolver_timeout_ms(),
        }
    }
}

impl ResolverConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    Tenant(String),
    Storage(String),
    Cache(String),
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValidationError::Tenant(msg) => write!(f, "Tenant: {}", msg),
            ConfigValidationError::Storage(msg) => write!(f, "Storage: {}", msg),
            ConfigValidationError::Cache(msg) => write!(f, "Cache: {}", msg),
        }
    }
}

impl std::error::Error for ConfigValidationError {}

impl HeritageConfig {
    /// Validate the entire configuration, reporting every problem at once.
    pub fn validate(&self) -> Result<(), Vec<ConfigValidationError>> {
        let mut errors = Vec::new();

        if self.tenant.trim().is_empty() {
            errors.push(ConfigValidationError::Tenant(
                "tenant cannot be empty".to_string(),
            ));
        } else if self.tenant.contains(['/', ':']) {
            errors.push(ConfigValidationError::Tenant(format!(
                "tenant '{}' cannot contain '/' or ':'",
                self.tenant
            )));
        }

        let backend = self.storage.backend.resolve(self.deployment.mode);
        if backend == StorageBackendKind::Remote && blank(&self.storage.remote.url) {
            errors.push(ConfigValidationError::Storage(
                "remote backend requires storage.remote.url".to_string(),
            ));
        }
        if backend == StorageBackendKind::Remote && self.storage.remote.table.trim().is_empty() {
            errors.push(ConfigValidationError::Storage(
                "storage.remote.table cannot be empty".to_string(),
            ));
        }

        if self.cache.enabled {
            if self.cache.backend == CacheBackendKind::Rest && blank(&self.cache.url) {
                errors.push(ConfigValidationError::Cache(
                    "rest cache requires cache.url".to_string(),
                ));
            }
            if self.cache.ttl_secs == 0 {
                errors.push(ConfigValidationError::Cache(
                    "cache.ttl_secs must be greater than zero".to_string(),
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

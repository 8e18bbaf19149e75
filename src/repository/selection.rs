//! Backend selection
//!
//! Runs once at process start: chooses the base store from the deployment configuration,
//! probes the cache once, and wraps the base repository in the caching decorator only when
//! the probe succeeds. An unreachable cache yields an uncached stack instead of a failure.

use crate::cache::{CacheBackend, CacheLayer, MemoryCacheBackend, RestCacheBackend};
use crate::config::{CacheBackendKind, HeritageConfig, StorageBackendKind};
use crate::delegation::{MemoryProposalStore, ProposalStore, SledProposalStore};
use crate::error::ContextError;
use crate::repository::{CachingRepository, Repository, StoreRepository};
use crate::store::{NodeStore, RemoteNodeStore, SledNodeStore};
use crate::types::TenantId;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The wired backend stack.
pub struct SelectedBackends {
    /// Repository to use for all reads and writes; cached when a cache is available.
    pub repository: Arc<dyn Repository>,
    /// Uncached base repository.
    pub base: Arc<dyn Repository>,
    pub cache: Option<Arc<CacheLayer>>,
    pub proposals: Arc<dyn ProposalStore>,
    pub description: String,
}

pub fn select_backends(config: &HeritageConfig) -> Result<SelectedBackends, ContextError> {
    let cache_backend = if config.cache.enabled {
        build_cache_backend(config)
    } else {
        None
    };
    assemble(config, cache_backend)
}

/// Same as [`select_backends`] with a caller-provided cache backend (still probed once).
pub fn select_backends_with_cache(
    config: &HeritageConfig,
    cache: Arc<dyn CacheBackend>,
) -> Result<SelectedBackends, ContextError> {
    assemble(config, Some(cache))
}

fn assemble(
    config: &HeritageConfig,
    cache_backend: Option<Arc<dyn CacheBackend>>,
) -> Result<SelectedBackends, ContextError> {
    if let Err(errors) = config.validate() {
        let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
        return Err(ContextError::Config(format!(
            "Configuration validation failed: {}",
            messages.join("; ")
        )));
    }

    let tenant = TenantId::new(config.tenant.clone());
    let (store, proposals) = build_store(config, &tenant)?;
    let base: Arc<dyn Repository> = Arc::new(StoreRepository::new(store, tenant.clone()));

    let cache = cache_backend
        .filter(|backend| probe(backend.as_ref()))
        .map(|backend| {
            Arc::new(
                CacheLayer::new(backend, tenant, config.cache.ttl())
                    .with_recovery_interval(config.cache.recovery_interval()),
            )
        });

    let repository: Arc<dyn Repository> = match &cache {
        Some(layer) => Arc::new(CachingRepository::new(base.clone(), layer.clone())),
        None => base.clone(),
    };
    let description = repository.describe();
    info!(
        tenant = %config.tenant,
        deployment = ?config.deployment.mode,
        backends = %description,
        "Context backends selected"
    );

    Ok(SelectedBackends {
        repository,
        base,
        cache,
        proposals,
        description,
    })
}

fn build_store(
    config: &HeritageConfig,
    tenant: &TenantId,
) -> Result<(Arc<dyn NodeStore>, Arc<dyn ProposalStore>), ContextError> {
    match config.storage.backend.resolve(config.deployment.mode) {
        StorageBackendKind::Remote => {
            let remote = &config.storage.remote;
            let url = remote.url.clone().unwrap_or_default();
            let store = RemoteNodeStore::new(
                url,
                remote.api_key.clone(),
                remote.table.clone(),
                tenant.clone(),
                Duration::from_millis(remote.timeout_ms),
            )?;
            Ok((Arc::new(store), Arc::new(MemoryProposalStore::new())))
        }
        // Auto is resolved above
        StorageBackendKind::Embedded | StorageBackendKind::Auto => {
            let embedded = &config.storage.embedded;
            let store = if embedded.temporary {
                SledNodeStore::temporary(tenant)?
            } else {
                let path = embedded.resolved_path();
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(crate::error::StorageError::from)?;
                }
                SledNodeStore::new(&path, tenant)?
            };
            let proposals = SledProposalStore::new(store.db(), tenant)?;
            Ok((Arc::new(store), Arc::new(proposals)))
        }
    }
}

fn build_cache_backend(config: &HeritageConfig) -> Option<Arc<dyn CacheBackend>> {
    match config.cache.backend {
        CacheBackendKind::Memory => Some(Arc::new(MemoryCacheBackend::new())),
        CacheBackendKind::Rest => {
            let url = config.cache.url.clone().unwrap_or_default();
            match RestCacheBackend::new(url, config.cache.token.clone(), config.cache.timeout()) {
                Ok(backend) => Some(Arc::new(backend)),
                Err(e) => {
                    warn!(error = %e, "Failed to build cache client; running uncached");
                    None
                }
            }
        }
    }
}

fn probe(backend: &dyn CacheBackend) -> bool {
    match backend.ping() {
        Ok(()) => {
            info!(backend = backend.name(), "Cache backend reachable");
            true
        }
        Err(e) => {
            warn!(backend = backend.name(), error = %e, "Cache backend unreachable at startup; running uncached");
            false
        }
    }
}

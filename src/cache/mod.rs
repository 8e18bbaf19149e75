//! Cache layer
//!
//! The cache is a derived, disposable projection of the store: dropping every entry costs
//! latency, never correctness. Backend failures are absorbed here and logged once per
//! outage; callers always fall back to uncached operation.

pub mod cascade;
pub mod coordinator;
pub mod memory;
pub mod rest;

pub use cascade::{invalidate_subtree, CascadeReport};
pub use coordinator::CacheCoordinator;
pub use memory::MemoryCacheBackend;
pub use rest::RestCacheBackend;

use crate::error::CacheError;
use crate::inheritance::EffectiveContext;
use crate::store::ContextNode;
use crate::types::{NodeRef, TenantId};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Minimum spacing between reachability probes while degraded.
pub const DEFAULT_RECOVERY_INTERVAL: Duration = Duration::from_secs(1);

const NEVER_PROBED: u64 = u64::MAX;

/// External key/value cache with TTL and explicit delete.
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reachability probe.
    fn ping(&self) -> Result<(), CacheError>;

    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    fn delete(&self, keys: &[String]) -> Result<(), CacheError>;
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    /// Stores dropped because an invalidation raced the resolution.
    pub skipped_stores: u64,
    pub invalidations: u64,
    /// Reads served without the cache because the backend failed.
    pub degraded_reads: u64,
    pub outages: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    skipped_stores: AtomicU64,
    invalidations: AtomicU64,
    degraded_reads: AtomicU64,
    outages: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Entry kinds stored under a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Raw node record cached by the repository decorator.
    Node,
    /// Resolved effective context cached by the coordinator.
    Effective,
}

/// Shared cache access for the repository decorator and the coordinator.
///
/// Every eviction advances an in-process epoch. A store made by a reader is undone when the
/// epoch moved during its read, so a resolution that started before a write can never leave
/// its stale result behind.
///
/// While degraded, the backend is probed at most once per recovery interval; every other
/// access bypasses it.
pub struct CacheLayer {
    backend: Arc<dyn CacheBackend>,
    tenant: TenantId,
    ttl: Duration,
    epoch: AtomicU64,
    degraded: AtomicBool,
    recovery_interval: Duration,
    started: Instant,
    /// Milliseconds since `started` of the last probe or backend failure.
    last_probe_ms: AtomicU64,
    /// Keys whose eviction failed during an outage; deleted before the cache is trusted again.
    pending_evictions: Mutex<BTreeSet<String>>,
    counters: Counters,
}

impl CacheLayer {
    pub fn new(backend: Arc<dyn CacheBackend>, tenant: TenantId, ttl: Duration) -> Self {
        Self {
            backend,
            tenant,
            ttl,
            epoch: AtomicU64::new(0),
            degraded: AtomicBool::new(false),
            recovery_interval: DEFAULT_RECOVERY_INTERVAL,
            started: Instant::now(),
            last_probe_ms: AtomicU64::new(NEVER_PROBED),
            pending_evictions: Mutex::new(BTreeSet::new()),
            counters: Counters::default(),
        }
    }

    pub fn with_recovery_interval(mut self, interval: Duration) -> Self {
        self.recovery_interval = interval;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn key(&self, kind: EntryKind, node: &NodeRef) -> String {
        let kind = match kind {
            EntryKind::Node => "node",
            EntryKind::Effective => "eff",
        };
        format!("heritage:{}:{}:{}/{}", self.tenant, kind, node.level, node.id)
    }

    /// Current invalidation epoch; capture before reading from the store.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            stores: c.stores.load(Ordering::Relaxed),
            skipped_stores: c.skipped_stores.load(Ordering::Relaxed),
            invalidations: c.invalidations.load(Ordering::Relaxed),
            degraded_reads: c.degraded_reads.load(Ordering::Relaxed),
            outages: c.outages.load(Ordering::Relaxed),
        }
    }

    pub fn get_effective(&self, node: &NodeRef) -> Option<EffectiveContext> {
        self.read(EntryKind::Effective, node)
    }

    pub fn put_effective(&self, context: &EffectiveContext, epoch: u64) -> bool {
        self.write(EntryKind::Effective, &context.node, context, epoch)
    }

    pub fn get_node(&self, node: &NodeRef) -> Option<ContextNode> {
        self.read(EntryKind::Node, node)
    }

    pub fn put_node(&self, record: &ContextNode, epoch: u64) -> bool {
        self.write(EntryKind::Node, &record.node_ref(), record, epoch)
    }

    /// Evict the given entry kinds for each node in one backend call.
    pub fn evict(&self, nodes: &[NodeRef], kinds: &[EntryKind]) {
        if nodes.is_empty() || kinds.is_empty() {
            return;
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let keys: Vec<String> = nodes
            .iter()
            .flat_map(|node| kinds.iter().map(move |kind| self.key(*kind, node)))
            .collect();
        self.counters
            .invalidations
            .fetch_add(nodes.len() as u64, Ordering::Relaxed);

        if self.is_degraded() && !self.try_recover() {
            self.pending_evictions.lock().extend(keys);
            return;
        }
        self.delete_or_defer(keys);
    }

    /// Delete now, or keep the keys for the recovery flush.
    fn delete_or_defer(&self, keys: Vec<String>) {
        if let Err(e) = self.backend.delete(&keys) {
            self.note_failure("evict", &e);
            self.pending_evictions.lock().extend(keys);
        }
    }

    fn read<T: DeserializeOwned>(&self, kind: EntryKind, node: &NodeRef) -> Option<T> {
        if self.is_degraded() && !self.try_recover() {
            bump(&self.counters.degraded_reads);
            return None;
        }
        let key = self.key(kind, node);
        match self.backend.get(&key) {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    bump(&self.counters.hits);
                    Some(value)
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Dropping undecodable cache entry");
                    self.delete_or_defer(vec![key]);
                    bump(&self.counters.misses);
                    None
                }
            },
            Ok(None) => {
                bump(&self.counters.misses);
                None
            }
            Err(e) => {
                self.note_failure("get", &e);
                bump(&self.counters.degraded_reads);
                None
            }
        }
    }

    fn write<T: Serialize>(&self, kind: EntryKind, node: &NodeRef, value: &T, epoch: u64) -> bool {
        if self.epoch() != epoch {
            bump(&self.counters.skipped_stores);
            return false;
        }
        if self.is_degraded() {
            return false;
        }
        let key = self.key(kind, node);
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to encode cache entry");
                return false;
            }
        };
        if let Err(e) = self.backend.set(&key, &raw, self.ttl) {
            self.note_failure("set", &e);
            return false;
        }
        // an eviction may have landed between the epoch check and the set
        if self.epoch() != epoch {
            bump(&self.counters.skipped_stores);
            self.delete_or_defer(vec![key]);
            return false;
        }
        bump(&self.counters.stores);
        true
    }

    fn note_failure(&self, operation: &str, error: &CacheError) {
        // a failed call counts as a probe
        self.last_probe_ms.store(self.elapsed_ms(), Ordering::SeqCst);
        if !self.degraded.swap(true, Ordering::SeqCst) {
            bump(&self.counters.outages);
            warn!(
                backend = self.backend.name(),
                operation,
                error = %error,
                "Cache backend unavailable; serving uncached until it recovers"
            );
        } else {
            debug!(operation, error = %error, "Cache still unavailable");
        }
    }

    /// Flush evictions missed during the outage. The cache is trusted again only if they all
    /// land.
    fn try_recover(&self) -> bool {
        if !self.claim_probe() {
            return false;
        }
        if self.backend.ping().is_err() {
            return false;
        }
        let pending: Vec<String> = self.pending_evictions.lock().iter().cloned().collect();
        if !pending.is_empty() {
            if let Err(e) = self.backend.delete(&pending) {
                debug!(error = %e, "Cache recovery flush failed");
                return false;
            }
            let mut guard = self.pending_evictions.lock();
            for key in &pending {
                guard.remove(key);
            }
        }
        self.degraded.store(false, Ordering::SeqCst);
        info!(
            backend = self.backend.name(),
            flushed = pending.len(),
            "Cache backend recovered"
        );
        true
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(NEVER_PROBED - 1)
    }

    /// True for exactly one caller once the recovery interval has passed since the last probe.
    fn claim_probe(&self) -> bool {
        let now = self.elapsed_ms();
        let last = self.last_probe_ms.load(Ordering::SeqCst);
        let interval = u64::try_from(self.recovery_interval.as_millis()).unwrap_or(u64::MAX);
        if last != NEVER_PROBED && now.saturating_sub(last) < interval {
            return false;
        }
        self.last_probe_ms
            .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

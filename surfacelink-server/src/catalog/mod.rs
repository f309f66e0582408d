//! Catalog cache
//!
//! Enumerating the host's catalog is slow and only legal on the privileged
//! thread, so enumerated nodes are cached by path. Every population runs
//! through [`HostContext::catalog`] on that thread, which checks the slot
//! before browsing. Lookups from other tasks serialise per key on the slot's
//! population lock, so concurrent misses share one queued job instead of
//! each enqueueing their own.
//!
//! [`HostContext::catalog`]: crate::host::HostContext::catalog

mod path;

pub use path::CatalogPath;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::RwLock;
use surfacelink_protocol::CatalogNode;
use surfacelink_utils::Result;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::executor::ExecutionQueue;

/// A cached enumeration result
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub path: CatalogPath,
    pub node: Arc<CatalogNode>,
    pub populated_at: Instant,
}

/// Per-key slot
///
/// `entry` is written only on the privileged thread. `populating` is held
/// by a non-privileged lookup while its population job is queued.
#[derive(Debug)]
pub(crate) struct Slot {
    path: CatalogPath,
    entry: RwLock<Option<CacheEntry>>,
    populating: AsyncMutex<()>,
}

impl Slot {
    fn new(path: CatalogPath) -> Self {
        Self {
            path,
            entry: RwLock::new(None),
            populating: AsyncMutex::new(()),
        }
    }

    pub(crate) fn node(&self) -> Option<Arc<CatalogNode>> {
        self.entry.read().as_ref().map(|entry| Arc::clone(&entry.node))
    }

    fn is_filled(&self) -> bool {
        self.entry.read().is_some()
    }

    /// Store an entry produced on the privileged thread
    ///
    /// Returns false if the slot was already filled.
    pub(crate) fn fill(&self, node: Arc<CatalogNode>) -> bool {
        let mut entry = self.entry.write();
        if entry.is_some() {
            return false;
        }
        *entry = Some(CacheEntry {
            path: self.path.clone(),
            node,
            populated_at: Instant::now(),
        });
        true
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Populated entries
    pub entries: usize,
    /// Host enumerations performed since start
    pub populations: u64,
    pub invalidations: u64,
}

/// Path-keyed cache of host catalog enumerations
pub struct CatalogCache {
    slots: DashMap<String, Arc<Slot>>,
    queue: ExecutionQueue,
    populations: AtomicU64,
    invalidations: AtomicU64,
}

impl CatalogCache {
    /// Create an empty cache that populates through `queue`
    pub fn new(queue: ExecutionQueue) -> Self {
        Self {
            slots: DashMap::new(),
            queue,
            populations: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub(crate) fn slot(&self, path: &CatalogPath) -> Arc<Slot> {
        self.slots
            .entry(path.key())
            .or_insert_with(|| Arc::new(Slot::new(path.clone())))
            .clone()
    }

    pub(crate) fn record_population(&self, path: &CatalogPath) {
        self.populations.fetch_add(1, Ordering::SeqCst);
        debug!(path = %path, "Populated catalog entry");
    }

    /// Look up a node from a non-privileged context
    ///
    /// A hit returns without touching the queue. A miss submits one
    /// population job; lookups of the same key that arrive meanwhile wait
    /// for it and then read the filled slot. A failed population leaves the
    /// key empty so the next lookup retries.
    pub async fn lookup(&self, path: &CatalogPath) -> Result<Arc<CatalogNode>> {
        let slot = self.slot(path);
        if let Some(node) = slot.node() {
            return Ok(node);
        }

        let _populating = slot.populating.lock().await;
        if let Some(node) = slot.node() {
            return Ok(node);
        }

        let target = path.clone();
        self.queue
            .submit("catalog.populate", None, None, move |ctx| {
                ctx.catalog(&target)
            })
            .await
    }

    /// Whether `path` has a populated entry
    pub fn is_cached(&self, path: &CatalogPath) -> bool {
        self.slots
            .get(&path.key())
            .map(|slot| slot.is_filled())
            .unwrap_or(false)
    }

    /// Drop every entry at or below `prefix`
    ///
    /// Matching is by whole segments. The root prefix drops everything.
    /// Returns the number of populated entries removed.
    pub fn invalidate(&self, prefix: &CatalogPath) -> usize {
        if prefix.is_root() {
            return self.invalidate_all();
        }

        let mut removed = 0;
        self.slots.retain(|_, slot| {
            if slot.path.starts_with(prefix) {
                if slot.is_filled() {
                    removed += 1;
                }
                false
            } else {
                true
            }
        });

        self.invalidations.fetch_add(1, Ordering::SeqCst);
        info!(prefix = %prefix, removed, "Invalidated catalog entries");
        removed
    }

    /// Drop every entry
    pub fn invalidate_all(&self) -> usize {
        let removed = self.len();
        self.slots.clear();
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        info!(removed, "Invalidated entire catalog cache");
        removed
    }

    /// Number of populated entries
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_filled()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            populations: self.populations.load(Ordering::SeqCst),
            invalidations: self.invalidations.load(Ordering::SeqCst),
        }
    }
}

impl std::fmt::Debug for CatalogCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogCache")
            .field("keys", &self.slots.len())
            .field("populations", &self.populations.load(Ordering::SeqCst))
            .finish()
    }
}

//! Host integration
//!
//! A [`Host`] is the single-threaded application the bridge drives. It is
//! owned by the privileged executor and only ever called from that thread,
//! so implementations need `Send` but never `Sync`.

mod static_catalog;

pub use static_catalog::{CatalogTree, StaticCatalogHost, TreeNode};

use std::sync::Arc;

use surfacelink_protocol::CatalogNode;
use surfacelink_utils::Result;

use crate::catalog::{CatalogCache, CatalogPath};

/// The application whose API may only be used from one thread
pub trait Host: Send + 'static {
    /// Short name used in logs
    fn name(&self) -> &str {
        "host"
    }

    /// Called once on the privileged thread before the first command
    fn on_start(&mut self) {}

    /// Enumerate the catalog node at `path` and its direct children
    ///
    /// The root path lists the top-level categories. This may be slow.
    fn browse(&mut self, path: &CatalogPath) -> Result<CatalogNode>;

    /// Called once on the privileged thread after the last command
    fn teardown(&mut self) {}
}

/// What a job sees while running on the privileged thread
pub struct HostContext {
    host: Box<dyn Host>,
    catalog: Arc<CatalogCache>,
}

impl HostContext {
    pub fn new(host: Box<dyn Host>, catalog: Arc<CatalogCache>) -> Self {
        Self { host, catalog }
    }

    pub fn host(&self) -> &dyn Host {
        self.host.as_ref()
    }

    pub fn host_mut(&mut self) -> &mut dyn Host {
        self.host.as_mut()
    }

    pub fn catalog_cache(&self) -> &Arc<CatalogCache> {
        &self.catalog
    }

    /// Cached catalog node, enumerating the host inline on a miss
    ///
    /// Jobs already own the privileged thread, so unlike
    /// [`CatalogCache::lookup`] this never goes back through the queue.
    /// Every population of the cache goes through here.
    pub fn catalog(&mut self, path: &CatalogPath) -> Result<Arc<CatalogNode>> {
        let slot = self.catalog.slot(path);
        if let Some(node) = slot.node() {
            return Ok(node);
        }

        let node = Arc::new(self.host.browse(path)?);
        self.catalog.record_population(path);
        slot.fill(Arc::clone(&node));
        Ok(node)
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("host", &self.host.name())
            .finish()
    }
}

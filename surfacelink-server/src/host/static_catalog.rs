//! Reference host serving a fixed catalog tree
//!
//! Stands in for a real application: the tree comes from a JSON file or a
//! small built-in set of categories. Optional latency makes enumeration
//! behave like the slow host API it replaces.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use surfacelink_protocol::{name_matches, CatalogItem, CatalogNode};
use surfacelink_utils::{BridgeError, Result};
use tracing::{debug, info};

use super::Host;
use crate::catalog::CatalogPath;

/// One node of a catalog tree file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TreeNode {
    pub name: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub is_device: bool,
    #[serde(default)]
    pub is_loadable: bool,
    #[serde(default)]
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    fn folder(name: &str, children: Vec<TreeNode>) -> Self {
        Self {
            name: name.into(),
            uri: None,
            is_device: false,
            is_loadable: false,
            children,
        }
    }

    fn device(name: &str) -> Self {
        Self {
            name: name.into(),
            uri: Some(format!("device:{}", name.to_ascii_lowercase().replace(' ', "-"))),
            is_device: true,
            is_loadable: true,
            children: Vec::new(),
        }
    }

    fn preset(name: &str) -> Self {
        Self {
            name: name.into(),
            uri: Some(format!("preset:{}", name.to_ascii_lowercase().replace(' ', "-"))),
            is_device: false,
            is_loadable: true,
            children: Vec::new(),
        }
    }

    fn item(&self) -> CatalogItem {
        CatalogItem {
            name: self.name.clone(),
            uri: self.uri.clone(),
            is_folder: !self.children.is_empty(),
            is_device: self.is_device,
            is_loadable: self.is_loadable,
        }
    }

    fn node(&self) -> CatalogNode {
        CatalogNode {
            name: self.name.clone(),
            uri: self.uri.clone(),
            is_folder: !self.children.is_empty(),
            is_device: self.is_device,
            is_loadable: self.is_loadable,
            children: self.children.iter().map(TreeNode::item).collect(),
        }
    }
}

/// Contents of a catalog tree file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogTree {
    pub categories: Vec<TreeNode>,
}

impl CatalogTree {
    /// Built-in demo catalog
    pub fn builtin() -> Self {
        Self {
            categories: vec![
                TreeNode::folder(
                    "Instruments",
                    vec![
                        TreeNode::device("Analog"),
                        TreeNode::device("Drum Rack"),
                        TreeNode::device("Operator"),
                        TreeNode::device("Wavetable"),
                    ],
                ),
                TreeNode::folder(
                    "Sounds",
                    vec![
                        TreeNode::folder(
                            "Bass",
                            vec![TreeNode::preset("Deep Sub"), TreeNode::preset("Reese Bass")],
                        ),
                        TreeNode::folder(
                            "Pad",
                            vec![TreeNode::preset("Warm Pad"), TreeNode::preset("Glass Pad")],
                        ),
                    ],
                ),
                TreeNode::folder(
                    "Drums",
                    vec![TreeNode::folder(
                        "Kits",
                        vec![TreeNode::preset("808 Core Kit"), TreeNode::preset("909 Core Kit")],
                    )],
                ),
                TreeNode::folder(
                    "Audio Effects",
                    vec![
                        TreeNode::device("Delay"),
                        TreeNode::device("EQ Eight"),
                        TreeNode::device("Reverb"),
                    ],
                ),
                TreeNode::folder(
                    "MIDI Effects",
                    vec![TreeNode::device("Arpeggiator"), TreeNode::device("Chord")],
                ),
            ],
        }
    }

    /// Load a tree from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| BridgeError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| BridgeError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    fn resolve(&self, path: &CatalogPath) -> Result<&TreeNode> {
        let mut level = &self.categories;
        let mut found = None;
        for segment in path.segments() {
            let node = level
                .iter()
                .find(|n| name_matches(&n.name, segment))
                .ok_or_else(|| BridgeError::command(format!("Path part '{}' not found", segment)))?;
            level = &node.children;
            found = Some(node);
        }
        found.ok_or_else(|| BridgeError::internal("root path has no tree node"))
    }
}

/// [`Host`] backed by a [`CatalogTree`]
pub struct StaticCatalogHost {
    tree: CatalogTree,
    latency: Duration,
    browse_calls: Arc<AtomicUsize>,
}

impl StaticCatalogHost {
    pub fn new(tree: CatalogTree) -> Self {
        Self {
            tree,
            latency: Duration::ZERO,
            browse_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn builtin() -> Self {
        Self::new(CatalogTree::builtin())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let tree = CatalogTree::from_file(path)?;
        info!(path = %path.display(), categories = tree.categories.len(), "Loaded catalog tree");
        Ok(Self::new(tree))
    }

    /// Sleep this long in every enumeration
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Shared counter of enumerations, readable after the host is moved
    pub fn browse_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.browse_calls)
    }
}

impl Host for StaticCatalogHost {
    fn name(&self) -> &str {
        "static-catalog"
    }

    fn browse(&mut self, path: &CatalogPath) -> Result<CatalogNode> {
        self.browse_calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        debug!(path = %path, "Enumerating catalog");

        if path.is_root() {
            return Ok(CatalogNode::folder(
                "Catalog",
                self.tree.categories.iter().map(TreeNode::item).collect(),
            ));
        }
        self.tree.resolve(path).map(TreeNode::node)
    }
}

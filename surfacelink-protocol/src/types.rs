//! Catalog descriptors shared by the bridge and its clients

use serde::{Deserialize, Serialize};

/// A browsable catalog entry without its children
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogItem {
    pub name: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub is_folder: bool,
    #[serde(default)]
    pub is_device: bool,
    #[serde(default)]
    pub is_loadable: bool,
}

/// A catalog node and the items directly below it
///
/// This is the unit the host enumerates and the bridge caches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogNode {
    pub name: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub is_folder: bool,
    #[serde(default)]
    pub is_device: bool,
    #[serde(default)]
    pub is_loadable: bool,
    #[serde(default)]
    pub children: Vec<CatalogItem>,
}

impl CatalogNode {
    /// Create a folder node with the given children
    pub fn folder(name: impl Into<String>, children: Vec<CatalogItem>) -> Self {
        Self {
            name: name.into(),
            uri: None,
            is_folder: !children.is_empty(),
            is_device: false,
            is_loadable: false,
            children,
        }
    }

    /// Descriptor of this node without children
    pub fn as_item(&self) -> CatalogItem {
        CatalogItem {
            name: self.name.clone(),
            uri: self.uri.clone(),
            is_folder: self.is_folder,
            is_device: self.is_device,
            is_loadable: self.is_loadable,
        }
    }

    /// Find a direct child whose name matches a path segment
    pub fn child(&self, segment: &str) -> Option<&CatalogItem> {
        self.children
            .iter()
            .find(|item| name_matches(&item.name, segment))
    }
}

/// Check whether a catalog name matches a path segment
///
/// Comparison ignores ASCII case, and spaces in the name may be written as
/// underscores (`audio_effects` selects "Audio Effects").
pub fn name_matches(name: &str, segment: &str) -> bool {
    if name.eq_ignore_ascii_case(segment) {
        return true;
    }
    name.len() == segment.len()
        && name
            .bytes()
            .zip(segment.bytes())
            .all(|(n, s)| n.eq_ignore_ascii_case(&s) || (n == b' ' && s == b'_'))
}

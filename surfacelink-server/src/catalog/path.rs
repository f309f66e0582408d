//! Catalog paths
//!
//! A path is a `/`-separated list of segments starting at a top-level
//! category, e.g. `instruments/Analog`. The empty path is the catalog root.

use std::fmt;

use surfacelink_protocol::name_matches;

/// A parsed catalog path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CatalogPath {
    segments: Vec<String>,
}

impl CatalogPath {
    /// The catalog root
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a path, trimming whitespace and skipping empty segments
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('/')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// First segment, naming the top-level category
    pub fn category(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    /// Path of a direct child
    pub fn join(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Self { segments }
    }

    /// Path of the first `len` segments
    pub fn prefix(&self, len: usize) -> Self {
        Self {
            segments: self.segments[..len.min(self.segments.len())].to_vec(),
        }
    }

    /// Cache key: lowercase, spaces folded to underscores
    ///
    /// Two paths that select the same node produce the same key.
    pub fn key(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.to_ascii_lowercase().replace(' ', "_"))
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Whether `prefix` covers this path, comparing whole segments
    ///
    /// `drums` covers `drums` and `drums/kits` but not `drumsets`.
    pub fn starts_with(&self, prefix: &CatalogPath) -> bool {
        prefix.segments.len() <= self.segments.len()
            && prefix
                .segments
                .iter()
                .zip(&self.segments)
                .all(|(p, s)| name_matches(s, p) || name_matches(p, s))
    }
}

impl fmt::Display for CatalogPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

impl From<&str> for CatalogPath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

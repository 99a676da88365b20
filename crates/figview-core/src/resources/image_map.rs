//! Shared table of resolved image assets.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Key of an image fill: the paint's `imageRef`, or `node:<id>` when absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageKey(String);

impl ImageKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Synthesized key for an image paint without a reference.
    pub fn for_node(id: &str) -> Self {
        Self(format!("node:{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key was synthesized from a node id.
    pub fn is_synthesized(&self) -> bool {
        self.0.starts_with("node:")
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImageKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Raw bytes of a resolved image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    pub bytes: Bytes,
    pub content_type: Option<String>,
    /// Where the bytes came from; `None` for assets embedded in the payload.
    pub source_url: Option<String>,
}

impl ImageAsset {
    pub fn new(bytes: impl Into<Bytes>, content_type: Option<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type,
            source_url: None,
        }
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }
}

/// Mapping ImageKey → ImageAsset, shared between resolver and renderer.
///
/// Clones share the same table. Absence of a key means "not yet resolved".
#[derive(Debug, Clone, Default)]
pub struct ImageMap {
    inner: Arc<RwLock<HashMap<ImageKey, ImageAsset>>>,
}

impl ImageMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: ImageKey, asset: ImageAsset) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(key, asset);
    }

    pub fn get(&self, key: &ImageKey) -> Option<ImageAsset> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(key).cloned()
    }

    pub fn contains(&self, key: &ImageKey) -> bool {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seed the map with assets embedded in the exported payload.
    pub fn extend(&self, assets: impl IntoIterator<Item = (ImageKey, ImageAsset)>) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.extend(assets);
    }

    /// Point-in-time copy for a render pass.
    pub fn snapshot(&self) -> HashMap<ImageKey, ImageAsset> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

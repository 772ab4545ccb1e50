//! LRU cache for rendered page artifacts.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use super::types::PageArtifact;

/// Cache key for rendered pages.
///
/// Scoped to one document: every opened document gets a fresh cache, so the
/// key only needs to distinguish page and scale. An artifact rendered at one
/// scale is never returned for another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Page number (1-indexed).
    pub page: u32,
    /// Scale factor (stored as millionths for stable hashing)
    pub scale_millionths: u32,
}

impl CacheKey {
    #[must_use]
    pub fn new(page: u32, scale: f32) -> Self {
        Self {
            page,
            scale_millionths: (scale * 1_000_000.0) as u32,
        }
    }

    /// Scale factor this key was built from.
    #[must_use]
    pub fn scale(&self) -> f32 {
        self.scale_millionths as f32 / 1_000_000.0
    }
}

/// LRU cache of rendered pages, shared between the session and its workers.
pub struct PageCache {
    cache: LruCache<CacheKey, Arc<PageArtifact>>,
}

impl PageCache {
    /// Create a new cache with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    /// Get a cached page, promoting it in the LRU order.
    #[must_use]
    pub fn get(&mut self, key: &CacheKey) -> Option<Arc<PageArtifact>> {
        self.cache.get(key).cloned()
    }

    /// Check if a key is in the cache without promoting it.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.cache.contains(key)
    }

    /// Insert a page into the cache, returning an Arc to the data.
    pub fn insert(&mut self, key: CacheKey, artifact: PageArtifact) -> Arc<PageArtifact> {
        let arc = Arc::new(artifact);
        self.cache.put(key, arc.clone());
        arc
    }

    /// Clear all cached pages.
    pub fn invalidate_all(&mut self) {
        self.cache.clear();
    }

    /// Invalidate all cached versions of a specific page.
    pub fn invalidate_page(&mut self, page: u32) {
        let keys_to_remove: Vec<_> = self
            .cache
            .iter()
            .filter(|(k, _)| k.page == page)
            .map(|(k, _)| *k)
            .collect();

        for key in keys_to_remove {
            self.cache.pop(&key);
        }
    }

    /// Number of cached pages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

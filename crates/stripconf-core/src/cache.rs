//! Lazily-filled local caches
//!
//! Each category of description owned by `ConfigDb` lives in a [`CacheSlot`].
//! A slot is either stale (must be fetched before use) or fresh. Contents are
//! only replaced wholesale: a failed fetch leaves the slot stale with its
//! previous contents untouched, so a slot is never partially populated.

use std::collections::BTreeMap;

/// Collections that can be held in a cache slot
pub trait CacheContents: Default {
    fn entry_count(&self) -> usize;
}

impl<T> CacheContents for Vec<T> {
    fn entry_count(&self) -> usize {
        self.len()
    }
}

impl<K: Ord, V> CacheContents for BTreeMap<K, V> {
    fn entry_count(&self) -> usize {
        self.len()
    }
}

#[derive(Debug, Clone)]
pub struct CacheSlot<T> {
    contents: T,
    stale: bool,
}

impl<T: CacheContents> Default for CacheSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: CacheContents> CacheSlot<T> {
    /// A new slot is empty and stale
    pub fn new() -> Self {
        Self {
            contents: T::default(),
            stale: true,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn contents(&self) -> &T {
        &self.contents
    }

    pub fn len(&self) -> usize {
        self.contents.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard contents and force a fetch on next access
    pub fn reset(&mut self) {
        self.contents = T::default();
        self.stale = true;
    }

    /// Install freshly fetched (or caller-supplied) contents
    pub fn fill(&mut self, contents: T) {
        self.contents = contents;
        self.stale = false;
    }
}

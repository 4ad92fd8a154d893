//! Response caches for [`crate::Client`].

use std::collections::HashMap;
use std::sync::RwLock;

/// A byte cache keyed by URI.
pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn insert(&self, key: &str, bytes: &[u8]);
}

/// Caches nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl Cache for NoCache {
    fn get(&self, _key: &str) -> Option<Vec<u8>> {
        None
    }

    fn insert(&self, _key: &str, _bytes: &[u8]) {}
}

/// Unbounded in-memory cache, intended to live for a single load.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |e| e.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.read().ok()?.get(key).cloned()
    }

    fn insert(&self, key: &str, bytes: &[u8]) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key.to_string(), bytes.to_vec());
        }
    }
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::symbol_info::SymbolInfo;

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Cache keyed by (library_path, offset), shared across every resolution
/// call a `SymbolResolver` makes. Readers never block each other; writers
/// (cache fills on miss) briefly exclude everyone.
#[derive(Default)]
pub struct SymbolCache {
    entries: RwLock<FxHashMap<(Arc<str>, u64), SymbolInfo>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SymbolCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, library_path: &str, offset: u64) -> Option<SymbolInfo> {
        let key_lookup = self.entries.read().get(&(Arc::from(library_path), offset)).cloned();
        match key_lookup {
            Some(info) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(info)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, library_path: Arc<str>, offset: u64, info: SymbolInfo) {
        self.entries.write().insert((library_path, offset), info);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats { hits: self.hits.load(Ordering::Relaxed), misses: self.misses.load(Ordering::Relaxed) }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every cached entry and resets the hit/miss counters to zero.
    pub fn clear(&self) {
        self.entries.write().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

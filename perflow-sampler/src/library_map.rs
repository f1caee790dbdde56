//! `LibraryMap`: an immutable snapshot of a process's executable memory
//! regions, and resolution of a raw address to `(library_path, offset)`.

use std::sync::Arc;

/// One loaded-library extent. Half-open interval `[base, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryEntry {
    pub library_path: Arc<str>,
    pub base_address: u64,
    pub end_address: u64,
    pub executable: bool,
}

impl LibraryEntry {
    pub fn contains(&self, addr: u64) -> bool {
        self.base_address <= addr && addr < self.end_address
    }
}

/// Sentinel path used when resolution misses.
pub const UNRESOLVED_LIBRARY: &str = "[unresolved]";

/// An ordered, immutable list of [`LibraryEntry`] values, indexable by
/// snapshot id (see [`crate::library_map::LibraryMapRegistry`]).
#[derive(Debug, Clone, Default)]
pub struct LibraryMap {
    /// Sorted by `base_address`, non-overlapping.
    entries: Vec<LibraryEntry>,
}

impl LibraryMap {
    /// Builds a map from raw `/proc/<pid>/maps`-style regions, keeping only
    /// executable regions and merging adjacent regions that share a path.
    pub fn from_regions(regions: impl IntoIterator<Item = crate::proc_maps::MapRegion>) -> Self {
        let mut executable: Vec<_> = regions.into_iter().filter(|r| r.is_executable).collect();
        executable.sort_by_key(|r| r.start);

        let mut merged: Vec<LibraryEntry> = Vec::new();
        for region in executable {
            if let Some(last) = merged.last_mut() {
                if *last.library_path == region.path && last.end_address == region.start {
                    last.end_address = region.end;
                    continue;
                }
            }
            merged.push(LibraryEntry {
                library_path: Arc::from(region.path.as_str()),
                base_address: region.start,
                end_address: region.end,
                executable: true,
            });
        }
        Self { entries: merged }
    }

    pub fn from_entries(mut entries: Vec<LibraryEntry>) -> Self {
        entries.sort_by_key(|e| e.base_address);
        Self { entries }
    }

    pub fn entries(&self) -> &[LibraryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves `addr` to `(library_path, offset)`. Binary search over the
    /// sorted, non-overlapping entries. Returns `None` (unresolved) on
    /// miss.
    pub fn resolve(&self, addr: u64) -> Option<(&str, u64)> {
        let idx = match self.entries.binary_search_by(|e| e.base_address.cmp(&addr)) {
            Ok(i) => i,
            Err(0) => return None,
            Err(i) => i - 1,
        };
        let entry = &self.entries[idx];
        if entry.contains(addr) {
            Some((&entry.library_path, addr - entry.base_address))
        } else {
            None
        }
    }
}

/// Ordered collection of `LibraryMap` snapshots, indexed by snapshot id.
/// A fresh snapshot is registered at sampler startup (id 0) and again every
/// time a dynamic-load event is detected; samples captured in
/// between reference the preceding id.
#[derive(Debug, Clone, Default)]
pub struct LibraryMapRegistry {
    snapshots: Vec<LibraryMap>,
}

impl LibraryMapRegistry {
    pub fn new() -> Self {
        Self { snapshots: Vec::new() }
    }

    /// Registers `map` under the next snapshot id and returns it.
    pub fn register(&mut self, map: LibraryMap) -> u32 {
        let id = self.snapshots.len() as u32;
        self.snapshots.push(map);
        id
    }

    pub fn get(&self, snapshot_id: u32) -> Option<&LibraryMap> {
        self.snapshots.get(snapshot_id as usize)
    }

    pub fn current_id(&self) -> u32 {
        self.snapshots.len().saturating_sub(1) as u32
    }

    pub fn snapshots(&self) -> &[LibraryMap] {
        &self.snapshots
    }
}

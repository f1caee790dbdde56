//! Turns a raw captured address into a [`ResolvedFrame`], consulting the
//! rank's `LibraryMap` snapshots and, optionally, a `SymbolResolver`.
//!
//! A `.pflw` file stores only raw addresses and counts; it does not tag
//! each stack with the snapshot id that was current when it was captured.
//! Since a dynamic-load event only ever *adds* entries (a library that
//! later gets `dlclose`'d was still loaded, and still valid to resolve
//! against, for every sample taken before the unload), resolution tries
//! the most recent snapshot first and falls back to earlier ones on miss.

use std::sync::Arc;

use perflow_sampler::LibraryMap;
use perflow_symbols::SymbolResolver;

use crate::resolved_frame::ResolvedFrame;

pub struct OffsetConverter<'a> {
    /// Snapshots in id order; resolution walks them newest-first.
    snapshots: &'a [LibraryMap],
    resolver: Option<&'a SymbolResolver>,
}

impl<'a> OffsetConverter<'a> {
    pub fn new(snapshots: &'a [LibraryMap], resolver: Option<&'a SymbolResolver>) -> Self {
        Self { snapshots, resolver }
    }

    fn resolve_library(&self, addr: u64) -> Option<(Arc<str>, u64)> {
        for map in self.snapshots.iter().rev() {
            if let Some((path, offset)) = map.resolve(addr) {
                return Some((Arc::from(path), offset));
            }
        }
        None
    }

    /// Converts one raw address. Always succeeds: an address that misses
    /// every snapshot resolves to the `[unresolved]` sentinel library with
    /// the raw address standing in for an offset, so unsymbolized frames
    /// still aggregate rather than being dropped.
    pub fn convert(&self, raw_address: u64) -> ResolvedFrame {
        let (library_path, offset) = match self.resolve_library(raw_address) {
            Some(pair) => pair,
            None => (Arc::from(perflow_sampler::UNRESOLVED_LIBRARY), raw_address),
        };

        let frame = ResolvedFrame::without_symbols(raw_address, library_path.clone(), offset);
        match self.resolver {
            Some(resolver) => match resolver.resolve(&library_path, offset, raw_address) {
                Ok(info) => frame.with_symbol(&info),
                Err(_) => frame,
            },
            None => frame,
        }
    }

    /// Converts a whole stack, innermost frame first, batching symbol
    /// lookups per library so a multi-frame stack through one library
    /// costs one subprocess invocation instead of one per frame.
    pub fn convert_batch(&self, raw_addresses: &[u64]) -> Vec<ResolvedFrame> {
        let pairs: Vec<(Arc<str>, u64, u64)> = raw_addresses
            .iter()
            .map(|&addr| match self.resolve_library(addr) {
                Some((path, offset)) => (path, offset, addr),
                None => (Arc::from(perflow_sampler::UNRESOLVED_LIBRARY), addr, addr),
            })
            .collect();

        let Some(resolver) = self.resolver else {
            return pairs
                .into_iter()
                .map(|(path, offset, addr)| ResolvedFrame::without_symbols(addr, path, offset))
                .collect();
        };

        let mut by_library: std::collections::HashMap<Arc<str>, Vec<u64>> = std::collections::HashMap::new();
        for (path, offset, _) in &pairs {
            by_library.entry(path.clone()).or_default().push(*offset);
        }

        let mut resolved_by_library: std::collections::HashMap<Arc<str>, std::collections::HashMap<u64, perflow_symbols::SymbolInfo>> =
            std::collections::HashMap::new();
        for (path, offsets) in &by_library {
            let keyed: Vec<(u64, u64)> = offsets.iter().map(|&o| (o, o)).collect();
            if let Ok(infos) = resolver.resolve_batch(path, &keyed) {
                let map = resolved_by_library.entry(path.clone()).or_default();
                for (offset, info) in offsets.iter().zip(infos) {
                    map.insert(*offset, info);
                }
            }
        }

        pairs
            .into_iter()
            .map(|(path, offset, addr)| {
                let frame = ResolvedFrame::without_symbols(addr, path.clone(), offset);
                match resolved_by_library.get(&path).and_then(|m| m.get(&offset)) {
                    Some(info) => frame.with_symbol(info),
                    None => frame,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perflow_sampler::{LibraryEntry, LibraryMap};

    fn map_with(entries: Vec<LibraryEntry>) -> LibraryMap {
        LibraryMap::from_entries(entries)
    }

    #[test]
    fn resolves_against_most_recent_snapshot() {
        let first = map_with(vec![LibraryEntry { library_path: "/app".into(), base_address: 0x1000, end_address: 0x2000, executable: true }]);
        let second = map_with(vec![
            LibraryEntry { library_path: "/app".into(), base_address: 0x1000, end_address: 0x2000, executable: true },
            LibraryEntry { library_path: "/lib/libfoo.so".into(), base_address: 0x5000, end_address: 0x6000, executable: true },
        ]);
        let snapshots = [first, second];
        let converter = OffsetConverter::new(&snapshots, None);

        let frame = converter.convert(0x5100);
        assert_eq!(&*frame.library_path, "/lib/libfoo.so");
        assert_eq!(frame.offset_within_library, 0x100);
    }

    #[test]
    fn falls_back_to_unresolved_sentinel() {
        let snapshots: [LibraryMap; 0] = [];
        let converter = OffsetConverter::new(&snapshots, None);
        let frame = converter.convert(0xdead);
        assert_eq!(&*frame.library_path, perflow_sampler::UNRESOLVED_LIBRARY);
        assert_eq!(frame.offset_within_library, 0xdead);
    }

    #[test]
    fn convert_batch_preserves_order() {
        let map = map_with(vec![LibraryEntry { library_path: "/app".into(), base_address: 0x1000, end_address: 0x3000, executable: true }]);
        let snapshots = [map];
        let converter = OffsetConverter::new(&snapshots, None);
        let frames = converter.convert_batch(&[0x1100, 0x1200, 0x1300]);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].offset_within_library, 0x100);
        assert_eq!(frames[2].offset_within_library, 0x300);
    }
}

use perflow_core::CallStack;
use perflow_sampler::{LibraryEntry, LibraryMap, StoreExporter, StoreImporter};
use proptest::prelude::*;

/// Generates non-overlapping, sorted executable regions so resolution has
/// a unique covering entry (or none) for any address, matching the
/// invariant `LibraryMap` construction relies on.
fn arb_library_map() -> impl Strategy<Value = Vec<(u64, u64)>> {
    prop::collection::vec(1u64..0x1000, 1..8).prop_map(|gaps| {
        let mut base = 0x1000u64;
        let mut regions = Vec::new();
        for gap in gaps {
            let end = base + gap;
            regions.push((base, end));
            base = end + 0x100; // guaranteed gap between libraries
        }
        regions
    })
}

proptest! {
    /// P3: resolution is deterministic and returns the unique covering
    /// entry, if any.
    #[test]
    fn p3_library_map_resolution_is_deterministic(
        regions in arb_library_map(),
        probe in 0u64..0x100_000,
    ) {
        let entries: Vec<LibraryEntry> = regions
            .iter()
            .enumerate()
            .map(|(i, &(base, end))| LibraryEntry {
                library_path: format!("/lib{i}.so").into(),
                base_address: base,
                end_address: end,
                executable: true,
            })
            .collect();
        let map = LibraryMap::from_entries(entries.clone());

        let expected = entries.iter().find(|e| e.contains(probe));
        let first = map.resolve(probe);
        let second = map.resolve(probe);
        prop_assert_eq!(first, second);

        match expected {
            Some(entry) => {
                let (path, offset) = first.expect("a covering entry exists");
                prop_assert_eq!(path, &*entry.library_path);
                prop_assert_eq!(offset, probe - entry.base_address);
            }
            None => prop_assert!(first.is_none()),
        }
    }

    /// P4: exporter/importer round-trip preserves the (key, counter)
    /// multiset.
    #[test]
    fn p4_store_roundtrip_preserves_entries(
        stacks in prop::collection::vec(
            (prop::collection::vec(any::<u64>(), 0..16), 1u64..10_000),
            0..20,
        ),
        compress in any::<bool>(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let exporter = StoreExporter::new(dir.path(), "proptest");
        let entries: Vec<(CallStack, u64)> = stacks
            .iter()
            .map(|(frames, count)| (frames.iter().copied().collect(), *count))
            .collect();

        let path = exporter.write_samples(0, &entries, 128, 0, compress).unwrap();
        let imported = StoreImporter::read_samples(&path).unwrap();

        prop_assert_eq!(imported.entries.len(), entries.len());
        for ((expected_stack, expected_count), (actual_stack, actual_count)) in
            entries.iter().zip(imported.entries.iter())
        {
            prop_assert_eq!(expected_stack.as_slice(), actual_stack.as_slice());
            prop_assert_eq!(expected_count, actual_count);
        }
    }
}

//! `PerRankStore`: the on-disk binary record of captured stacks and
//! library-map snapshots, one file pair per process rank.
//!
//! Writing goes through a same-directory temp file that is fsynced then
//! renamed into place, the way samply persists profile output via
//! `tempfile` rather than writing the target path directly.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use perflow_core::CallStack;

use crate::error::StoreError;
use crate::library_map::{LibraryEntry, LibraryMap};

pub const PFLW_MAGIC: [u8; 4] = *b"PFLW";
pub const PFLW_VERSION: u32 = 1;
pub const PFLW_HEADER_LEN: usize = 64;

pub const LMAP_MAGIC: [u8; 4] = *b"LMAP";
pub const LMAP_VERSION: u32 = 1;

/// Writes a `.pflw` sample-data file and a matching `.libmap` library-map
/// file for one rank. Both writes are atomic at the granularity of the
/// complete file (temp file + fsync + rename).
pub struct StoreExporter {
    pub output_directory: PathBuf,
    pub filename_prefix: String,
}

impl StoreExporter {
    pub fn new(output_directory: impl Into<PathBuf>, filename_prefix: impl Into<String>) -> Self {
        Self { output_directory: output_directory.into(), filename_prefix: filename_prefix.into() }
    }

    pub fn sample_file_path(&self, rank: u32, compressed: bool) -> PathBuf {
        let ext = if compressed { "pflw.gz" } else { "pflw" };
        self.output_directory.join(format!("{}_rank_{}.{}", self.filename_prefix, rank, ext))
    }

    pub fn library_map_file_path(&self, rank: u32) -> PathBuf {
        self.output_directory.join(format!("{}_rank_{}.libmap", self.filename_prefix, rank))
    }

    /// Writes the sample-data file for `rank`. `entries` is the snapshot of
    /// a `SampleMap`; `capture_timestamp_ns` is informational.
    pub fn write_samples(
        &self,
        rank: u32,
        entries: &[(CallStack, u64)],
        max_stack_depth: u32,
        capture_timestamp_ns: u64,
        compress: bool,
    ) -> Result<PathBuf, StoreError> {
        let mut body = Vec::new();
        for (stack, count) in entries {
            body.write_u32::<LittleEndian>(stack.depth() as u32).unwrap();
            body.write_u32::<LittleEndian>(0).unwrap(); // reserved
            body.write_u64::<LittleEndian>(*count).unwrap();
            for &addr in stack.as_slice() {
                body.write_u64::<LittleEndian>(addr).unwrap();
            }
        }

        let payload = if compress {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&body).expect("in-memory zlib encode cannot fail");
            encoder.finish().expect("in-memory zlib encode cannot fail")
        } else {
            body
        };

        let mut header = [0u8; PFLW_HEADER_LEN];
        header[0..4].copy_from_slice(&PFLW_MAGIC);
        header[4..8].copy_from_slice(&PFLW_VERSION.to_le_bytes());
        header[8] = compress as u8;
        // bytes 9..16 reserved padding, left zero
        header[16..24].copy_from_slice(&(entries.len() as u64).to_le_bytes());
        header[24..32].copy_from_slice(&capture_timestamp_ns.to_le_bytes());
        header[32..36].copy_from_slice(&max_stack_depth.to_le_bytes());
        // bytes 36..64 reserved, left zero

        let path = self.sample_file_path(rank, compress);
        write_atomically(&path, |f| {
            f.write_all(&header)?;
            f.write_all(&payload)
        })?;
        Ok(path)
    }

    /// Writes the library-map file for `rank`, covering every snapshot
    /// taken during the session in snapshot-id order.
    pub fn write_library_maps(&self, rank: u32, snapshots: &[LibraryMap]) -> Result<PathBuf, StoreError> {
        let mut body = Vec::new();
        body.write_u32::<LittleEndian>(LMAP_VERSION).unwrap();
        body.write_u32::<LittleEndian>(rank).unwrap();
        body.write_u32::<LittleEndian>(snapshots.len() as u32).unwrap();
        body.write_u32::<LittleEndian>(0).unwrap(); // reserved

        for (snapshot_id, map) in snapshots.iter().enumerate() {
            body.write_u32::<LittleEndian>(snapshot_id as u32).unwrap();
            body.write_u32::<LittleEndian>(map.entries().len() as u32).unwrap();
            for entry in map.entries() {
                let path_bytes = entry.library_path.as_bytes();
                body.write_u16::<LittleEndian>(path_bytes.len() as u16).unwrap();
                body.write_u64::<LittleEndian>(entry.base_address).unwrap();
                body.write_u64::<LittleEndian>(entry.end_address).unwrap();
                body.write_u8(entry.executable as u8).unwrap();
                body.extend_from_slice(path_bytes);
            }
        }

        let path = self.library_map_file_path(rank);
        write_atomically(&path, |f| {
            f.write_all(&LMAP_MAGIC)?;
            f.write_all(&body)
        })?;
        Ok(path)
    }
}

fn write_atomically(
    final_path: &Path,
    write_body: impl FnOnce(&mut File) -> io::Result<()>,
) -> Result<(), StoreError> {
    let dir = final_path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| StoreError::io(final_path, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StoreError::io(final_path, e))?;
    write_body(tmp.as_file_mut()).map_err(|e| StoreError::io(final_path, e))?;
    tmp.as_file_mut().sync_all().map_err(|e| StoreError::io(final_path, e))?;
    tmp.persist(final_path)
        .map_err(|e| StoreError::io(final_path, e.error))?;
    Ok(())
}

/// Reads `.pflw`/`.libmap` files produced by [`StoreExporter`].
pub struct StoreImporter;

/// Parsed contents of a `.pflw` file, ready to stream into a `SampleMap`.
pub struct ImportedSamples {
    pub capture_timestamp_ns: u64,
    pub max_stack_depth: u32,
    pub entries: Vec<(CallStack, u64)>,
}

impl StoreImporter {
    pub fn read_samples(path: &Path) -> Result<ImportedSamples, StoreError> {
        let mut file = File::open(path).map_err(|e| StoreError::io(path, e))?;
        let mut header = [0u8; PFLW_HEADER_LEN];
        read_exact_or_truncated(&mut file, &mut header, path)?;

        let magic: [u8; 4] = header[0..4].try_into().unwrap();
        if magic != PFLW_MAGIC {
            return Err(StoreError::MagicMismatch { path: path.to_owned(), expected: PFLW_MAGIC, found: magic });
        }
        let version = u32::from_le_bytes(header[4..8].try_into().unwrap());
        if version != PFLW_VERSION {
            return Err(StoreError::UnsupportedVersion { path: path.to_owned(), version });
        }
        let compressed = header[8] != 0;
        let entry_count = u64::from_le_bytes(header[16..24].try_into().unwrap());
        let capture_timestamp_ns = u64::from_le_bytes(header[24..32].try_into().unwrap());
        let max_stack_depth = u32::from_le_bytes(header[32..36].try_into().unwrap());

        let mut rest = Vec::new();
        file.read_to_end(&mut rest).map_err(|e| StoreError::io(path, e))?;
        let body = if compressed {
            let mut decoder = ZlibDecoder::new(&rest[..]);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).map_err(|e| StoreError::io(path, e))?;
            out
        } else {
            rest
        };

        let mut cursor = &body[..];
        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            if cursor.len() < 16 {
                return Err(StoreError::Truncated { path: path.to_owned(), expected: 16, found: cursor.len() });
            }
            let depth = cursor.read_u32::<LittleEndian>().unwrap() as usize;
            let _reserved = cursor.read_u32::<LittleEndian>().unwrap();
            let counter = cursor.read_u64::<LittleEndian>().unwrap();

            let needed = depth * 8;
            if cursor.len() < needed {
                return Err(StoreError::Truncated { path: path.to_owned(), expected: needed, found: cursor.len() });
            }
            let mut stack = CallStack::new();
            for _ in 0..depth {
                let addr = cursor.read_u64::<LittleEndian>().unwrap();
                stack.push(addr);
            }
            entries.push((stack, counter));
        }

        Ok(ImportedSamples { capture_timestamp_ns, max_stack_depth, entries })
    }

    pub fn read_library_maps(path: &Path) -> Result<(u32, Vec<LibraryMap>), StoreError> {
        let mut file = File::open(path).map_err(|e| StoreError::io(path, e))?;
        let mut magic = [0u8; 4];
        read_exact_or_truncated(&mut file, &mut magic, path)?;
        if magic != LMAP_MAGIC {
            return Err(StoreError::MagicMismatch { path: path.to_owned(), expected: LMAP_MAGIC, found: magic });
        }
        let mut rest = Vec::new();
        file.read_to_end(&mut rest).map_err(|e| StoreError::io(path, e))?;
        let mut cursor = &rest[..];

        let version = read_u32_or_truncated(&mut cursor, path)?;
        if version != LMAP_VERSION {
            return Err(StoreError::UnsupportedVersion { path: path.to_owned(), version });
        }
        let rank_id = read_u32_or_truncated(&mut cursor, path)?;
        let snapshot_count = read_u32_or_truncated(&mut cursor, path)?;
        let _reserved = read_u32_or_truncated(&mut cursor, path)?;

        let mut snapshots = Vec::with_capacity(snapshot_count as usize);
        for _ in 0..snapshot_count {
            let _snapshot_id = read_u32_or_truncated(&mut cursor, path)?;
            let entry_count = read_u32_or_truncated(&mut cursor, path)?;
            let mut entries = Vec::with_capacity(entry_count as usize);
            for _ in 0..entry_count {
                if cursor.len() < 2 {
                    return Err(StoreError::Truncated { path: path.to_owned(), expected: 2, found: cursor.len() });
                }
                let path_len = cursor.read_u16::<LittleEndian>().unwrap() as usize;
                if cursor.len() < 17 {
                    return Err(StoreError::Truncated { path: path.to_owned(), expected: 17, found: cursor.len() });
                }
                let base = cursor.read_u64::<LittleEndian>().unwrap();
                let end = cursor.read_u64::<LittleEndian>().unwrap();
                let executable = cursor.read_u8().unwrap() != 0;
                if cursor.len() < path_len {
                    return Err(StoreError::Truncated { path: path.to_owned(), expected: path_len, found: cursor.len() });
                }
                let (path_bytes, remainder) = cursor.split_at(path_len);
                cursor = remainder;
                let library_path = String::from_utf8_lossy(path_bytes).into_owned();
                entries.push(LibraryEntry {
                    library_path: library_path.into(),
                    base_address: base,
                    end_address: end,
                    executable,
                });
            }
            snapshots.push(LibraryMap::from_entries(entries));
        }

        Ok((rank_id, snapshots))
    }
}

fn read_exact_or_truncated(file: &mut File, buf: &mut [u8], path: &Path) -> Result<(), StoreError> {
    match file.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(StoreError::Truncated { path: path.to_owned(), expected: buf.len(), found: 0 })
        }
        Err(e) => Err(StoreError::io(path, e)),
    }
}

fn read_u32_or_truncated(cursor: &mut &[u8], path: &Path) -> Result<u32, StoreError> {
    if cursor.len() < 4 {
        return Err(StoreError::Truncated { path: path.to_owned(), expected: 4, found: cursor.len() });
    }
    Ok(cursor.read_u32::<LittleEndian>().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_uncompressed_samples() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = StoreExporter::new(dir.path(), "perflow");
        let stack: CallStack = [0x1000u64, 0x2000, 0x3000].into_iter().collect();
        let entries = vec![(stack, 4u64)];
        let path = exporter.write_samples(0, &entries, 128, 123456, false).unwrap();
        let imported = StoreImporter::read_samples(&path).unwrap();
        assert_eq!(imported.entries.len(), 1);
        assert_eq!(imported.entries[0].1, 4);
        assert_eq!(imported.entries[0].0.as_slice(), &[0x1000, 0x2000, 0x3000]);
        assert_eq!(imported.capture_timestamp_ns, 123456);
    }

    #[test]
    fn roundtrip_compressed_samples() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = StoreExporter::new(dir.path(), "perflow");
        let entries: Vec<_> = (0..50)
            .map(|i| (CallStack::from_iter([i as u64, i as u64 + 1]), i as u64))
            .collect();
        let path = exporter.write_samples(2, &entries, 128, 0, true).unwrap();
        assert!(path.to_string_lossy().ends_with(".pflw.gz"));
        let imported = StoreImporter::read_samples(&path).unwrap();
        assert_eq!(imported.entries.len(), 50);
    }

    #[test]
    fn empty_run_roundtrips_to_zero_entries() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = StoreExporter::new(dir.path(), "perflow");
        let path = exporter.write_samples(0, &[], 128, 0, false).unwrap();
        let imported = StoreImporter::read_samples(&path).unwrap();
        assert!(imported.entries.is_empty());
    }

    #[test]
    fn rejects_wrong_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.pflw");
        std::fs::write(&path, [0u8; 64]).unwrap();
        let err = StoreImporter::read_samples(&path).unwrap_err();
        assert!(matches!(err, StoreError::MagicMismatch { .. }));
    }

    #[test]
    fn rejects_truncated_entries() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = StoreExporter::new(dir.path(), "perflow");
        let stack: CallStack = [1u64, 2, 3].into_iter().collect();
        let path = exporter.write_samples(0, &[(stack, 1)], 128, 0, false).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 4); // chop off the last frame
        std::fs::write(&path, bytes).unwrap();
        let err = StoreImporter::read_samples(&path).unwrap_err();
        assert!(matches!(err, StoreError::Truncated { .. }));
    }

    #[test]
    fn library_map_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = StoreExporter::new(dir.path(), "perflow");
        let map = LibraryMap::from_entries(vec![LibraryEntry {
            library_path: "/app".into(),
            base_address: 0x1000,
            end_address: 0x4000,
            executable: true,
        }]);
        let path = exporter.write_library_maps(3, &[map]).unwrap();
        let (rank, snapshots) = StoreImporter::read_library_maps(&path).unwrap();
        assert_eq!(rank, 3);
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].resolve(0x1500), Some(("/app", 0x500)));
    }
}

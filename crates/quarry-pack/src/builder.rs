//! Pack construction for tests and fixtures.

use std::io::Write;
use std::path::{Path, PathBuf};

use quarry_types::StoredObject;

use crate::error::{PackError, PackResult};
use crate::format::{kind_code, put_varint, FORMAT_VERSION, PACK_MAGIC};
use crate::index::{IndexEntry, PackIndex};

const ZSTD_LEVEL: i32 = 3;

/// Accumulates objects and lays them out as a pack plus its index.
#[derive(Default)]
pub struct PackBuilder {
    objects: Vec<StoredObject>,
}

impl PackBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, object: &StoredObject) {
        self.objects.push(object.clone());
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Pack bytes and the matching index. Objects pushed twice are stored
    /// twice but indexed once.
    pub fn build(&self) -> PackResult<(Vec<u8>, PackIndex)> {
        let mut pack = Vec::new();
        pack.extend_from_slice(PACK_MAGIC);
        pack.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
        pack.extend_from_slice(&(self.objects.len() as u32).to_be_bytes());

        let mut entries = Vec::with_capacity(self.objects.len());
        for object in &self.objects {
            let offset = pack.len() as u64;
            let compressed = zstd::encode_all(object.data.as_slice(), ZSTD_LEVEL)
                .map_err(|e| PackError::CompressionFailed(e.to_string()))?;
            pack.push(kind_code(object.kind));
            put_varint(&mut pack, object.data.len() as u64);
            put_varint(&mut pack, compressed.len() as u64);
            pack.extend_from_slice(&compressed);
            entries.push(IndexEntry {
                id: object.compute_id(),
                offset,
                crc32: crc32fast::hash(&compressed),
            });
        }

        let trailer = *blake3::hash(&pack).as_bytes();
        pack.extend_from_slice(&trailer);
        Ok((pack, PackIndex::new(entries, trailer)))
    }

    /// Write `<name>.pack` then `<name>.idx` into `dir`, each published by
    /// rename. Returns the pack path.
    pub fn write(&self, dir: &Path, name: &str) -> PackResult<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let (pack, index) = self.build()?;
        let pack_path = dir.join(format!("{name}.pack"));
        publish(dir, &pack_path, &pack)?;
        publish(dir, &pack_path.with_extension("idx"), &index.to_bytes())?;
        Ok(pack_path)
    }
}

fn publish(dir: &Path, path: &Path, bytes: &[u8]) -> PackResult<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| PackError::Io(e.error))?;
    Ok(())
}

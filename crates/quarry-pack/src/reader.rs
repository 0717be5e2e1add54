use std::fs::File;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use quarry_types::{ObjectId, StoredObject};

use crate::error::{PackError, PackResult};
use crate::format::{kind_for_code, Cursor, FORMAT_VERSION, PACK_HEADER_LEN, PACK_MAGIC, TRAILER_LEN};
use crate::index::{IndexEntry, PackIndex};

enum PackData {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for PackData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(map) => map,
            Self::Owned(bytes) => bytes,
        }
    }
}

/// Random-access reads from one pack through its index.
///
/// Opening checks the header against the index: same object count, and the
/// pack's trailer equals the one the index was built for. Each read then
/// checks the entry CRC, the decompressed length and the content hash.
pub struct PackReader {
    path: Option<PathBuf>,
    data: PackData,
    index: PackIndex,
}

impl PackReader {
    pub fn from_bytes(pack_data: Vec<u8>, index: PackIndex) -> PackResult<Self> {
        Self::from_data(None, PackData::Owned(pack_data), index)
    }

    /// Open a `.pack` file and its sibling `.idx`.
    ///
    /// A missing index surfaces as an I/O `NotFound` error so callers can
    /// skip packs that are still being written.
    pub fn open(pack_path: &Path) -> PackResult<Self> {
        let index = PackIndex::parse(&std::fs::read(pack_path.with_extension("idx"))?)?;
        let file = File::open(pack_path)?;
        // SAFETY: packs are published by rename and never rewritten in place.
        let map = unsafe { Mmap::map(&file)? };
        Self::from_data(Some(pack_path.to_path_buf()), PackData::Mapped(map), index)
    }

    fn from_data(path: Option<PathBuf>, data: PackData, index: PackIndex) -> PackResult<Self> {
        let header_error = |reason: &str| PackError::CorruptEntry {
            offset: 0,
            reason: reason.into(),
        };
        if data.len() < PACK_HEADER_LEN + TRAILER_LEN {
            return Err(header_error("pack data too short"));
        }

        let mut header = Cursor::new(&data);
        let magic: [u8; 4] = header.array().ok_or_else(|| header_error("pack data too short"))?;
        if &magic != PACK_MAGIC {
            return Err(PackError::InvalidMagic {
                expected: String::from_utf8_lossy(PACK_MAGIC).into(),
                actual: String::from_utf8_lossy(&magic).into(),
            });
        }
        let version = header.u32().ok_or_else(|| header_error("pack data too short"))?;
        if version != FORMAT_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }
        let count = header.u32().ok_or_else(|| header_error("pack data too short"))?;
        if count as usize != index.len() {
            return Err(header_error(&format!(
                "pack holds {count} objects but its index lists {}",
                index.len()
            )));
        }
        if data[data.len() - TRAILER_LEN..] != index.pack_trailer()[..] {
            return Err(PackError::IndexCorrupted("index belongs to a different pack".into()));
        }

        Ok(Self { path, data, index })
    }

    /// `Ok(None)` if this pack does not hold `id`.
    pub fn read_object(&self, id: &ObjectId) -> PackResult<Option<StoredObject>> {
        match self.index.find(id) {
            Some(entry) => self.read_entry(entry).map(Some),
            None => Ok(None),
        }
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.index.contains(id)
    }

    pub fn object_count(&self) -> usize {
        self.index.len()
    }

    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    /// Path of the `.pack` file, if opened from disk.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn read_entry(&self, entry: &IndexEntry) -> PackResult<StoredObject> {
        let offset = entry.offset;
        let corrupt = |reason: String| PackError::CorruptEntry { offset, reason };
        let body = &self.data[..self.data.len() - TRAILER_LEN];
        let start = usize::try_from(offset)
            .ok()
            .filter(|&start| start >= PACK_HEADER_LEN)
            .ok_or_else(|| corrupt("offset outside pack body".into()))?;
        let mut cursor = Cursor::at(body, start);

        let code = cursor.u8().ok_or_else(|| corrupt("offset outside pack body".into()))?;
        let kind = kind_for_code(code).ok_or_else(|| corrupt(format!("unknown kind code {code}")))?;
        let (raw_len, stored_len) = cursor
            .varint()
            .zip(cursor.varint())
            .ok_or_else(|| corrupt("bad entry lengths".into()))?;
        let compressed = usize::try_from(stored_len)
            .ok()
            .and_then(|len| cursor.take(len))
            .ok_or_else(|| corrupt("entry runs past pack body".into()))?;

        if crc32fast::hash(compressed) != entry.crc32 {
            return Err(PackError::CrcMismatch { id: entry.id });
        }
        let data = zstd::decode_all(compressed).map_err(|e| PackError::DecompressionFailed(e.to_string()))?;
        if data.len() as u64 != raw_len {
            return Err(corrupt(format!("expected {raw_len} bytes, inflated to {}", data.len())));
        }

        let object = StoredObject::new(kind, data);
        if object.compute_id() != entry.id {
            return Err(corrupt(format!("content does not hash to {}", entry.id)));
        }
        Ok(object)
    }
}

impl std::fmt::Debug for PackReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackReader")
            .field("path", &self.path)
            .field("object_count", &self.object_count())
            .finish()
    }
}

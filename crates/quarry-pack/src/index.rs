use quarry_types::{ObjectId, OBJECT_ID_LEN};

use crate::error::{PackError, PackResult};
use crate::format::{Cursor, FORMAT_VERSION, INDEX_MAGIC, TRAILER_LEN};

/// Where one object sits in its pack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub id: ObjectId,
    pub offset: u64,
    /// CRC32 of the entry's compressed bytes.
    pub crc32: u32,
}

/// The `.idx` companion of a pack.
///
/// Entries are kept sorted by ID. `fan_out[b]` counts entries whose first
/// ID byte is at most `b`, so a lookup only searches one bucket.
#[derive(Clone, Debug)]
pub struct PackIndex {
    entries: Vec<IndexEntry>,
    fan_out: [u32; 256],
    pack_trailer: [u8; TRAILER_LEN],
}

fn corrupt(reason: &str) -> PackError {
    PackError::IndexCorrupted(reason.to_string())
}

fn fan_out_of(entries: &[IndexEntry]) -> [u32; 256] {
    let mut fan_out = [0u32; 256];
    for entry in entries {
        fan_out[usize::from(entry.id.as_bytes()[0])] += 1;
    }
    let mut running = 0;
    for slot in &mut fan_out {
        running += *slot;
        *slot = running;
    }
    fan_out
}

impl PackIndex {
    /// Index `entries` in any order. For a repeated ID the first entry wins.
    pub fn new(mut entries: Vec<IndexEntry>, pack_trailer: [u8; TRAILER_LEN]) -> Self {
        entries.sort_by_key(|entry| entry.id);
        entries.dedup_by_key(|entry| entry.id);
        Self {
            fan_out: fan_out_of(&entries),
            entries,
            pack_trailer,
        }
    }

    pub fn find(&self, id: &ObjectId) -> Option<&IndexEntry> {
        let first = usize::from(id.as_bytes()[0]);
        let start = match first {
            0 => 0,
            _ => self.fan_out[first - 1] as usize,
        };
        let bucket = self.entries.get(start..self.fan_out[first] as usize)?;
        let at = bucket.binary_search_by(|entry| entry.id.cmp(id)).ok()?;
        bucket.get(at)
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.find(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, sorted by ID.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// The trailer the pack is expected to end with.
    pub fn pack_trailer(&self) -> &[u8; TRAILER_LEN] {
        &self.pack_trailer
    }

    /// Parse `.idx` bytes. The fan-out table must agree with the IDs that
    /// follow it, and the IDs must be strictly ascending.
    pub fn parse(data: &[u8]) -> PackResult<Self> {
        let mut cursor = Cursor::new(data);
        let magic: [u8; 4] = cursor.array().ok_or_else(|| corrupt("too short"))?;
        if &magic != INDEX_MAGIC {
            return Err(PackError::InvalidMagic {
                expected: String::from_utf8_lossy(INDEX_MAGIC).into(),
                actual: String::from_utf8_lossy(&magic).into(),
            });
        }
        let version = cursor.u32().ok_or_else(|| corrupt("too short"))?;
        if version != FORMAT_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }

        let mut fan_out = [0u32; 256];
        for slot in &mut fan_out {
            *slot = cursor.u32().ok_or_else(|| corrupt("fan-out truncated"))?;
        }
        let count = fan_out[255] as usize;
        let body = count
            .checked_mul(OBJECT_ID_LEN + 4 + 8)
            .and_then(|len| len.checked_add(TRAILER_LEN));
        if body.map_or(true, |len| cursor.remaining() < len) {
            return Err(corrupt("data truncated"));
        }

        let truncated = || corrupt("data truncated");
        let ids = (0..count)
            .map(|_| cursor.array().map(ObjectId::from_hash))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(truncated)?;
        let crcs = (0..count)
            .map(|_| cursor.u32())
            .collect::<Option<Vec<_>>>()
            .ok_or_else(truncated)?;
        let offsets = (0..count)
            .map(|_| cursor.u64())
            .collect::<Option<Vec<_>>>()
            .ok_or_else(truncated)?;
        let pack_trailer = cursor.array().ok_or_else(truncated)?;

        let entries: Vec<IndexEntry> = ids
            .into_iter()
            .zip(crcs)
            .zip(offsets)
            .map(|((id, crc32), offset)| IndexEntry { id, offset, crc32 })
            .collect();
        if entries.windows(2).any(|pair| pair[0].id >= pair[1].id) {
            return Err(corrupt("ids not strictly ascending"));
        }
        if fan_out_of(&entries) != fan_out {
            return Err(corrupt("fan-out does not match ids"));
        }

        Ok(Self {
            entries,
            fan_out,
            pack_trailer,
        })
    }

    /// Column-major `.idx` bytes.
    #[cfg(any(test, feature = "testing"))]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(INDEX_MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
        buf.extend(self.fan_out.iter().flat_map(|n| n.to_be_bytes()));
        buf.extend(self.entries.iter().flat_map(|e| *e.id.as_bytes()));
        buf.extend(self.entries.iter().flat_map(|e| e.crc32.to_be_bytes()));
        buf.extend(self.entries.iter().flat_map(|e| e.offset.to_be_bytes()));
        buf.extend_from_slice(&self.pack_trailer);
        buf
    }
}

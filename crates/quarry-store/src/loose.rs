//! Loose object file format.
//!
//! A loose object is the zstd-compressed concatenation of a header
//! `"<kind> <size>\0"` and the payload, stored at
//! `objects/<first two hex>/<remaining hex>`.

use quarry_types::{ObjectId, ObjectKind, StoredObject};

use crate::error::{StoreError, StoreResult};

/// Encode an object into the compressed loose representation.
pub fn encode(obj: &StoredObject, level: i32) -> StoreResult<Vec<u8>> {
    let mut raw = Vec::with_capacity(obj.data.len() + 16);
    raw.extend_from_slice(format!("{} {}\0", obj.kind, obj.data.len()).as_bytes());
    raw.extend_from_slice(&obj.data);
    Ok(zstd::encode_all(raw.as_slice(), level)?)
}

/// Decode a loose file read from disk. `id` is only used for error reports.
pub fn decode(id: &ObjectId, compressed: &[u8]) -> StoreResult<StoredObject> {
    let corrupt = |reason: String| StoreError::CorruptObject { id: *id, reason };

    let raw = zstd::decode_all(compressed).map_err(|e| corrupt(format!("decompress: {e}")))?;
    let nul = raw
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| corrupt("missing header terminator".into()))?;
    let header = std::str::from_utf8(&raw[..nul])
        .map_err(|_| corrupt("header is not UTF-8".into()))?;
    let (kind, size) = header
        .split_once(' ')
        .ok_or_else(|| corrupt(format!("malformed header {header:?}")))?;
    let kind: ObjectKind = kind.parse().map_err(|e| corrupt(format!("{e}")))?;
    let size: usize = size
        .parse()
        .map_err(|_| corrupt(format!("bad size in header {header:?}")))?;

    let data = raw[nul + 1..].to_vec();
    if data.len() != size {
        return Err(corrupt(format!(
            "size mismatch: header says {size}, payload is {}",
            data.len()
        )));
    }
    Ok(StoredObject::new(kind, data))
}

//! Byte layout shared by packs and their indexes.
//!
//! ```text
//! .pack   "QPAK" | version u32 | count u32 | entry* | blake3 of everything before
//! entry   kind u8 | varint raw len | varint stored len | zstd bytes
//! .idx    "QIDX" | version u32 | fan-out u32 x 256 | ids | crc32s | offsets u64 | pack trailer
//! ```
//!
//! Fixed-width integers are big-endian. Varints are little-endian base-128.

use quarry_types::ObjectKind;

pub(crate) const PACK_MAGIC: &[u8; 4] = b"QPAK";
pub(crate) const INDEX_MAGIC: &[u8; 4] = b"QIDX";
pub(crate) const FORMAT_VERSION: u32 = 1;
pub(crate) const PACK_HEADER_LEN: usize = 12;
pub(crate) const TRAILER_LEN: usize = 32;

/// Git's numbering for the four object kinds.
pub(crate) fn kind_code(kind: ObjectKind) -> u8 {
    match kind {
        ObjectKind::Commit => 1,
        ObjectKind::Tree => 2,
        ObjectKind::Blob => 3,
        ObjectKind::Tag => 4,
    }
}

pub(crate) fn kind_for_code(code: u8) -> Option<ObjectKind> {
    ObjectKind::ALL.into_iter().find(|&kind| kind_code(kind) == code)
}

/// Forward-only reader over a byte slice. Reads past the end return `None`
/// and leave the position unchanged.
pub(crate) struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self::at(data, 0)
    }

    pub(crate) fn at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub(crate) fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let bytes = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    pub(crate) fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.take(N)?.try_into().ok()
    }

    pub(crate) fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    pub(crate) fn u32(&mut self) -> Option<u32> {
        self.array().map(u32::from_be_bytes)
    }

    pub(crate) fn u64(&mut self) -> Option<u64> {
        self.array().map(u64::from_be_bytes)
    }

    /// `None` if the varint is truncated or does not fit in 64 bits.
    pub(crate) fn varint(&mut self) -> Option<u64> {
        let start = self.pos;
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let Some(byte) = self.u8() else { break };
            let bits = u64::from(byte & 0x7F);
            if shift == 63 && bits > 1 {
                break;
            }
            value |= bits << shift;
            if byte & 0x80 == 0 {
                return Some(value);
            }
        }
        self.pos = start;
        None
    }
}

#[cfg(any(test, feature = "testing"))]
pub(crate) fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_codes_follow_git() {
        assert_eq!(kind_code(ObjectKind::Commit), 1);
        assert_eq!(kind_code(ObjectKind::Tag), 4);
        for kind in ObjectKind::ALL {
            assert_eq!(kind_for_code(kind_code(kind)), Some(kind));
        }
        assert_eq!(kind_for_code(0), None);
        assert_eq!(kind_for_code(7), None);
    }

    #[test]
    fn varints_at_width_boundaries() {
        for value in [0u64, 1, 127, 128, 16_383, 16_384, u64::from(u32::MAX), u64::MAX] {
            let mut buf = Vec::new();
            put_varint(&mut buf, value);
            let mut cursor = Cursor::new(&buf);
            assert_eq!(cursor.varint(), Some(value));
            assert_eq!(cursor.remaining(), 0);
        }
    }

    #[test]
    fn bad_varints_leave_cursor_in_place() {
        let mut truncated = Cursor::new(&[0x80, 0x80]);
        assert_eq!(truncated.varint(), None);
        assert_eq!(truncated.remaining(), 2);

        let overflow = [0xFF; 11];
        assert_eq!(Cursor::new(&overflow).varint(), None);
    }

    #[test]
    fn fixed_width_reads_stop_at_the_end() {
        let data = [0, 0, 1, 0, 9];
        let mut cursor = Cursor::new(&data);
        assert_eq!(cursor.u32(), Some(256));
        assert_eq!(cursor.u32(), None);
        assert_eq!(cursor.u8(), Some(9));
        assert_eq!(Cursor::at(&data, 10).take(0), None);
    }
}

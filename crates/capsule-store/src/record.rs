use serde::{Deserialize, Serialize};

use capsule_types::{CapsuleHash, CapsuleOffset, HASH_LEN, RECORD_HEADER_LEN};

use crate::error::{StoreError, StoreResult};

/// Record header size: 2 bytes length + 4 bytes hash.
pub const HEADER_LEN: u16 = RECORD_HEADER_LEN;

/// Size of the zero length field that ends the record list.
pub const TERMINATOR_LEN: u16 = 2;

/// Zero bytes written by an erase. One more than the terminator so that the
/// first even address holds a terminator whatever the container's parity.
pub const ERASE_MARKER: [u8; 3] = [0, 0, 0];

/// Header of a capsule record.
///
/// On-media format:
/// ```text
/// [2 bytes: record length, header included (little-endian u16)]
/// [4 bytes: content hash]
/// [length - 6 bytes: code]
/// ```
/// A length of zero is the terminator, not a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordHeader {
    pub length: u16,
    pub hash: CapsuleHash,
}

impl RecordHeader {
    /// Header for a record carrying `code`.
    pub fn for_code(hash: CapsuleHash, code: &[u8]) -> StoreResult<Self> {
        let length = u16::try_from(code.len())
            .ok()
            .and_then(|n| n.checked_add(HEADER_LEN))
            .ok_or(StoreError::LengthMismatch {
                declared: u16::MAX,
                code_len: code.len(),
            })?;
        Ok(Self { length, hash })
    }

    /// Check that the header can be written as a real record.
    pub fn validate(&self) -> StoreResult<()> {
        if self.length == 0 {
            return Err(StoreError::ZeroLength);
        }
        if self.length < HEADER_LEN {
            return Err(StoreError::RecordTooShort {
                length: self.length,
                header: HEADER_LEN,
            });
        }
        Ok(())
    }

    /// Number of code bytes following the header.
    pub fn code_len(&self) -> u16 {
        self.length.saturating_sub(HEADER_LEN)
    }

    pub fn encode(&self) -> [u8; HEADER_LEN as usize] {
        let mut out = [0u8; HEADER_LEN as usize];
        out[0..2].copy_from_slice(&self.length.to_le_bytes());
        out[2..2 + HASH_LEN].copy_from_slice(self.hash.as_bytes());
        out
    }

    pub fn decode(bytes: &[u8; HEADER_LEN as usize]) -> Self {
        let length = u16::from_le_bytes([bytes[0], bytes[1]]);
        let hash = CapsuleHash::new([bytes[2], bytes[3], bytes[4], bytes[5]]);
        Self { length, hash }
    }

    /// Whether this header identifies the capsule `(length, hash)`.
    pub fn matches(&self, length: u16, hash: &CapsuleHash) -> bool {
        self.length == length && self.hash == *hash
    }
}

/// A record found in a container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapsuleRecord {
    /// Offset of the length field.
    pub offset: CapsuleOffset,
    pub header: RecordHeader,
}

impl CapsuleRecord {
    pub fn length(&self) -> u16 {
        self.header.length
    }

    pub fn hash(&self) -> CapsuleHash {
        self.header.hash
    }

    /// Offset of the first code byte.
    pub fn code_offset(&self) -> u32 {
        u32::from(self.offset.get()) + u32::from(HEADER_LEN)
    }

    /// Offset just past the record.
    pub fn end_offset(&self) -> u32 {
        u32::from(self.offset.get()) + u32::from(self.header.length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_layout() {
        let header = RecordHeader {
            length: 0x0110,
            hash: CapsuleHash::new([1, 2, 3, 4]),
        };
        assert_eq!(header.encode(), [0x10, 0x01, 1, 2, 3, 4]);
        assert_eq!(RecordHeader::decode(&header.encode()), header);
    }

    #[test]
    fn for_code_counts_header() {
        let header = RecordHeader::for_code(CapsuleHash::new([0; 4]), &[0u8; 10]).unwrap();
        assert_eq!(header.length, 16);
        assert_eq!(header.code_len(), 10);
    }

    #[test]
    fn for_code_rejects_oversized_code() {
        let code = vec![0u8; u16::MAX as usize];
        assert!(matches!(
            RecordHeader::for_code(CapsuleHash::new([0; 4]), &code),
            Err(StoreError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn validate_rejects_terminator_and_short_lengths() {
        let hash = CapsuleHash::new([9; 4]);
        assert!(matches!(
            RecordHeader { length: 0, hash }.validate(),
            Err(StoreError::ZeroLength)
        ));
        assert!(matches!(
            RecordHeader { length: 5, hash }.validate(),
            Err(StoreError::RecordTooShort { length: 5, header: 6 })
        ));
        assert!(RecordHeader { length: 6, hash }.validate().is_ok());
    }

    #[test]
    fn record_offsets() {
        let rec = CapsuleRecord {
            offset: CapsuleOffset::new(10),
            header: RecordHeader {
                length: 8,
                hash: CapsuleHash::new([0; 4]),
            },
        };
        assert_eq!(rec.code_offset(), 16);
        assert_eq!(rec.end_offset(), 18);
    }
}

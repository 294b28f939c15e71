use std::fmt;

use serde::{Deserialize, Serialize};

/// Size of a record header on media: 2-byte length plus 4-byte hash.
pub const RECORD_HEADER_LEN: u16 = 6;

/// Byte offset of a record header, relative to the container's base.
///
/// This is the only handle callers hold for a stored capsule. It points at the
/// length field, not at the code, and is invalidated by an erase.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CapsuleOffset(pub u16);

impl CapsuleOffset {
    pub const ZERO: Self = Self(0);

    pub const fn new(offset: u16) -> Self {
        Self(offset)
    }

    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for CapsuleOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}", self.0)
    }
}

impl From<u16> for CapsuleOffset {
    fn from(offset: u16) -> Self {
        Self(offset)
    }
}

/// Absolute byte address in program memory.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CodeAddress(pub u32);

impl CodeAddress {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    /// Whether the address lies on an instruction-word boundary.
    pub const fn is_word_aligned(self) -> bool {
        self.0 & 1 == 0
    }

    /// Convert to the word-addressed program counter value.
    ///
    /// The program counter counts 16-bit instruction words, so the byte
    /// address is halved. Only the low 16 bits of the result survive: code
    /// beyond the first 64 Ki-words (128 KiB) cannot be reached by a computed
    /// call and is not supported.
    pub const fn to_instruction(self) -> InstructionAddress {
        InstructionAddress((self.0 >> 1) as u16)
    }
}

impl fmt::Display for CodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#07x}", self.0)
    }
}

/// Word-addressed program counter value, as loaded into `Z` for `ICALL`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct InstructionAddress(pub u16);

impl InstructionAddress {
    pub const fn get(self) -> u16 {
        self.0
    }

    /// The byte address of the first byte of this instruction word.
    pub const fn to_byte_address(self) -> CodeAddress {
        CodeAddress((self.0 as u32) << 1)
    }
}

impl fmt::Display for InstructionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}w", self.0)
    }
}

/// Type tag of a file in the firmware archive.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FileType(pub u8);

impl FileType {
    /// Library code produced by the build.
    pub const LIBRARY: Self = Self(0);
    /// Application object/property tables.
    pub const TABLES: Self = Self(1);
    /// Reserved region holding capsule records.
    pub const CAPSULE_BUFFER: Self = Self(4);
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::LIBRARY => write!(f, "library"),
            Self::TABLES => write!(f, "tables"),
            Self::CAPSULE_BUFFER => write!(f, "capsule-buffer"),
            Self(other) => write!(f, "type#{other}"),
        }
    }
}

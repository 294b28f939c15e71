use serde::{Deserialize, Serialize};

use capsule_types::{CodeAddress, FileType};

use crate::error::FlashResult;

/// One file in the archive's table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Absolute byte address of the file's first byte.
    pub base: CodeAddress,
    /// File size in bytes.
    pub len: u32,
    /// Declared type tag.
    pub file_type: FileType,
}

impl FileEntry {
    /// One past the file's last byte.
    pub fn end(&self) -> CodeAddress {
        CodeAddress::new(self.base.get() + self.len)
    }

    /// Whether `addr..addr + len` lies entirely inside the file.
    pub fn contains_range(&self, addr: CodeAddress, len: u32) -> bool {
        addr >= self.base && u64::from(addr.get()) + u64::from(len) <= u64::from(self.end().get())
    }
}

/// Read-only view of the firmware archive and the memory it lives in.
///
/// Implementations must keep the file table stable for their whole lifetime;
/// only the bytes inside files may change (through a [`Reprogrammer`]).
pub trait Archive {
    /// Number of files in the table.
    fn file_count(&self) -> usize;

    /// The table entry at `index`.
    fn file(&self, index: usize) -> FlashResult<FileEntry>;

    /// Read one byte at an absolute address.
    fn read_u8(&self, addr: CodeAddress) -> FlashResult<u8>;

    /// Read a little-endian 16-bit value at an absolute address.
    ///
    /// No alignment is required.
    fn read_u16(&self, addr: CodeAddress) -> FlashResult<u16> {
        let lo = self.read_u8(addr)?;
        let hi = self.read_u8(CodeAddress::new(addr.get() + 1))?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    /// Fill `buf` from consecutive addresses starting at `addr`.
    fn read_bytes(&self, addr: CodeAddress, buf: &mut [u8]) -> FlashResult<()> {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.read_u8(CodeAddress::new(addr.get() + i as u32))?;
        }
        Ok(())
    }
}

/// Driver for rewriting a file in place.
///
/// Calls follow `open`, any number of `write`s, then `close`. Bytes written
/// are only guaranteed to be committed once `close` returns. Prefer
/// [`WriteSession`](crate::WriteSession), which guarantees the `close`.
pub trait Reprogrammer {
    /// Start writing file `file_index` at byte `offset` within the file.
    fn open(&mut self, file_index: usize, offset: u32) -> FlashResult<()>;

    /// Write bytes at the current position and advance it.
    fn write(&mut self, bytes: &[u8]) -> FlashResult<()>;

    /// Flush and finish the session.
    fn close(&mut self) -> FlashResult<()>;
}

impl<T: Archive + ?Sized> Archive for &T {
    fn file_count(&self) -> usize {
        (**self).file_count()
    }

    fn file(&self, index: usize) -> FlashResult<FileEntry> {
        (**self).file(index)
    }

    fn read_u8(&self, addr: CodeAddress) -> FlashResult<u8> {
        (**self).read_u8(addr)
    }

    fn read_u16(&self, addr: CodeAddress) -> FlashResult<u16> {
        (**self).read_u16(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_end_and_range() {
        let entry = FileEntry {
            base: CodeAddress::new(0x100),
            len: 16,
            file_type: FileType::CAPSULE_BUFFER,
        };
        assert_eq!(entry.end(), CodeAddress::new(0x110));
        assert!(entry.contains_range(CodeAddress::new(0x100), 16));
        assert!(entry.contains_range(CodeAddress::new(0x10e), 2));
        assert!(!entry.contains_range(CodeAddress::new(0x10f), 2));
        assert!(!entry.contains_range(CodeAddress::new(0xff), 1));
    }
}

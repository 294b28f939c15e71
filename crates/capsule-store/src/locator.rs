use tracing::debug;

use capsule_flash::{Archive, FileEntry};
use capsule_types::{CapsuleOffset, CodeAddress, FileType, RECORD_HEADER_LEN};

use crate::error::{StoreError, StoreResult};

/// Index of the first file tagged `file_type`, scanning the table in order.
pub fn locate_container<A: Archive + ?Sized>(archive: &A, file_type: FileType) -> StoreResult<usize> {
    for index in 0..archive.file_count() {
        if archive.file(index)?.file_type == file_type {
            debug!(index, %file_type, "capsule container located");
            return Ok(index);
        }
    }
    Err(StoreError::ContainerMissing { file_type })
}

/// Like [`locate_container`], but treats a missing container as a fault.
///
/// Firmware without a container is malformed; on the device the panic
/// handler halts the node.
///
/// # Panics
///
/// Panics if no file is tagged `file_type` or the file table is unreadable.
pub fn locate_container_or_halt<A: Archive + ?Sized>(archive: &A, file_type: FileType) -> usize {
    match locate_container(archive, file_type) {
        Ok(index) => index,
        Err(e) => panic!("capsule store fault: {e}"),
    }
}

/// Code address of the capsule whose header sits at `offset`.
///
/// Locates the container on every call; [`Container::code_address`] is the
/// cached form.
pub fn resolve_code_address<A: Archive + ?Sized>(
    archive: &A,
    file_type: FileType,
    offset: CapsuleOffset,
) -> StoreResult<CodeAddress> {
    let index = locate_container(archive, file_type)?;
    Ok(Container::from_entry(index, archive.file(index)?)?.code_address(offset))
}

/// The capsule container's place in the archive.
///
/// The file table never changes after build time, so this can be computed
/// once and kept for the lifetime of the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Container {
    index: usize,
    entry: FileEntry,
}

impl Container {
    /// Locate the container and capture its table entry.
    pub fn locate<A: Archive + ?Sized>(archive: &A, file_type: FileType) -> StoreResult<Self> {
        let index = locate_container(archive, file_type)?;
        Self::from_entry(index, archive.file(index)?)
    }

    pub fn from_entry(index: usize, entry: FileEntry) -> StoreResult<Self> {
        if entry.len > u32::from(u16::MAX) {
            return Err(StoreError::ContainerTooLarge { len: entry.len });
        }
        Ok(Self { index, entry })
    }

    /// Position of the container in the archive's file table.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn base(&self) -> CodeAddress {
        self.entry.base
    }

    /// Container size in bytes. Fits in 16 bits by construction.
    pub fn capacity(&self) -> u16 {
        self.entry.len as u16
    }

    /// Offset of the first record: skips one byte when the base is odd so
    /// that code lands on instruction-word boundaries.
    pub fn first_offset(&self) -> CapsuleOffset {
        if self.entry.base.is_word_aligned() {
            CapsuleOffset::ZERO
        } else {
            CapsuleOffset::new(1)
        }
    }

    /// Absolute address of a byte inside the container.
    pub fn address_of(&self, offset: u32) -> CodeAddress {
        CodeAddress::new(self.entry.base.get() + offset)
    }

    /// `base + offset + 6`: the first code byte of the record at `offset`.
    pub fn code_address(&self, offset: CapsuleOffset) -> CodeAddress {
        self.address_of(u32::from(offset.get()) + u32::from(RECORD_HEADER_LEN))
    }
}

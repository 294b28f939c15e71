use capsule_flash::FlashError;
use capsule_types::{CapsuleHandle, CapsuleOffset, FileType, Generation, TypeError};

use crate::executor::ExecError;

/// Errors from capsule store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The archive has no file tagged as a capsule container. The firmware
    /// image is malformed and nothing in this crate can proceed.
    #[error("no capsule container (file type {file_type}) in archive")]
    ContainerMissing { file_type: FileType },

    /// The container is larger than 16-bit offsets can address.
    #[error("capsule container of {len} bytes exceeds the 16-bit offset range")]
    ContainerTooLarge { len: u32 },

    /// A record header that cannot be part of a well-formed record list.
    #[error("corrupt record at offset {offset}: {reason}")]
    CorruptRecord {
        offset: CapsuleOffset,
        length: u16,
        reason: String,
    },

    /// A length field of zero would read back as the terminator.
    #[error("capsule length must be non-zero")]
    ZeroLength,

    /// The declared length does not cover the record header.
    #[error("capsule length {length} is shorter than the {header}-byte header")]
    RecordTooShort { length: u16, header: u16 },

    /// The declared length disagrees with the code supplied.
    #[error("declared record length {declared} does not match header plus {code_len} code bytes")]
    LengthMismatch { declared: u16, code_len: usize },

    /// Not enough free space after the last record.
    #[error("container full: record of {needed} bytes at offset {offset}, {available} bytes free")]
    ContainerFull {
        offset: CapsuleOffset,
        needed: u16,
        available: u16,
    },

    /// An offset that does not fall inside the container.
    #[error("offset {offset} is outside the {capacity}-byte container")]
    OffsetOutOfRange {
        offset: CapsuleOffset,
        capacity: u16,
    },

    /// A handle issued before the most recent erase.
    #[error("stale capsule handle {handle}: store is at generation {current}")]
    StaleHandle {
        handle: CapsuleHandle,
        current: Generation,
    },

    /// The caller's return buffer cannot hold the requested result.
    #[error("return buffer of {actual} bytes cannot hold a {needed}-byte result")]
    ReturnBufferTooSmall { needed: usize, actual: usize },

    #[error("execution failed: {0}")]
    Execution(#[from] ExecError),

    #[error("flash error: {0}")]
    Flash(#[from] FlashError),

    #[error("type error: {0}")]
    Type(#[from] TypeError),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

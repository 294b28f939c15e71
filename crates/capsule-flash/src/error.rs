use capsule_types::CodeAddress;

/// Errors from archive reads, reprogramming, and image persistence.
#[derive(Debug, thiserror::Error)]
pub enum FlashError {
    /// A file index past the end of the archive's file table.
    #[error("file index {index} out of range (archive has {count} files)")]
    FileIndexOutOfRange { index: usize, count: usize },

    /// A read outside the program memory backing the archive.
    #[error("address {addr} is outside program memory")]
    AddressOutOfRange { addr: CodeAddress },

    /// A write that would run past the end of the open file.
    #[error("write of {len} bytes at offset {offset} overruns file {file_index} ({capacity} bytes)")]
    WriteOutOfBounds {
        file_index: usize,
        offset: u32,
        len: usize,
        capacity: u32,
    },

    /// `write` or `close` without a preceding `open`.
    #[error("no write session is open")]
    SessionNotOpen,

    /// `open` while another session is still open.
    #[error("a write session is already open on file {0}")]
    SessionAlreadyOpen(usize),

    /// The image layout cannot be built.
    #[error("invalid flash layout: {0}")]
    InvalidLayout(String),

    #[error("invalid image magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("unsupported image version: {0}")]
    UnsupportedVersion(u32),

    #[error("image checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for flash operations.
pub type FlashResult<T> = Result<T, FlashError>;

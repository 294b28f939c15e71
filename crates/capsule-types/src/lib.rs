//! Foundation types for the capsule store.
//!
//! Every other crate in the workspace depends on `capsule-types`. The types
//! here are small `Copy` values that describe where a capsule lives and how
//! it is identified; none of them touch memory.
//!
//! # Key Types
//!
//! - [`CapsuleHash`] -- 4-byte content hash stored in every record header
//! - [`CapsuleOffset`] -- header offset of a record, relative to its container
//! - [`CodeAddress`] / [`InstructionAddress`] -- byte and word code addresses
//! - [`FileType`] -- archive file type tag
//! - [`Generation`] / [`CapsuleHandle`] -- erase-aware capsule references
//! - [`ReturnWidth`] -- number of result bytes delivered by an invocation

pub mod address;
pub mod error;
pub mod handle;
pub mod hash;
pub mod hasher;

pub use address::{CapsuleOffset, CodeAddress, FileType, InstructionAddress, RECORD_HEADER_LEN};
pub use error::TypeError;
pub use handle::{CapsuleHandle, Generation, ReturnWidth};
pub use hash::{CapsuleHash, HASH_LEN};
pub use hasher::CapsuleHasher;

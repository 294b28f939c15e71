//! Program-memory collaborators of the capsule store.
//!
//! The capsule store does not own flash. It reads the firmware archive through
//! the [`Archive`] trait and rewrites the capsule container through the
//! [`Reprogrammer`] trait, always inside a [`WriteSession`] that is closed
//! even on early return.
//!
//! [`FlashImage`] implements both traits over a byte vector. It stands in for
//! the device in tests and host tooling, and can be persisted to disk in a
//! CRC-checked frame.
//!
//! # Design Rules
//!
//! 1. The archive's file table is fixed when the image is built; only file
//!    contents change afterwards.
//! 2. Multi-byte values are little-endian, matching the target.
//! 3. Writes never cross the end of the file they were opened on.

pub mod error;
pub mod image;
pub mod persist;
pub mod session;
pub mod traits;

pub use error::{FlashError, FlashResult};
pub use image::{FileSpec, FlashImage, FlashImageBuilder, FlashLayout};
pub use session::WriteSession;
pub use traits::{Archive, FileEntry, Reprogrammer};

//! Content-addressed store of executable code capsules.
//!
//! A capsule is a record in a dedicated file of a flash archive:
//!
//! ```text
//! [u16 LE length][4-byte hash][code ...]
//! ```
//!
//! where `length` counts the whole record, header included. Records are laid
//! back to back from the first even address in the file, and a zero length
//! field ends the list. Capsules are identified by their `(length, hash)`
//! header; code bytes are never compared.
//!
//! # Operations
//!
//! - [`find_or_free_offset`] -- look a capsule up or report where free space
//!   starts
//! - [`append`] / [`append_code`] -- write a capsule unless it is stored
//! - [`erase`] -- logically empty the container
//! - [`invoke`] -- call stored code through a [`CapsuleExecutor`]
//!
//! [`CapsuleStore`] ties these to one archive, caches the container's
//! location and tracks a [`Generation`](capsule_types::Generation) so
//! handles from before an erase are refused.
//!
//! # Executors
//!
//! - `NativeExecutor` -- `ICALL` into flash, AVR targets only
//! - [`SimulatedExecutor`] -- host interpreter for capsule stubs

#![cfg_attr(target_arch = "avr", feature(asm_experimental_arch))]

pub mod config;
pub mod directory;
pub mod error;
pub mod executor;
pub mod invoker;
pub mod locator;
pub mod maintenance;
#[cfg(target_arch = "avr")]
pub mod native;
pub mod record;
pub mod sim;
pub mod store;
pub mod writer;

// Re-export primary types at crate root for ergonomic imports.
pub use config::StoreConfig;
pub use directory::{find_or_free_offset, Records, Slot};
pub use error::{StoreError, StoreResult};
pub use executor::{CapsuleExecutor, ExecError};
pub use invoker::invoke;
pub use locator::{locate_container, locate_container_or_halt, resolve_code_address, Container};
pub use maintenance::erase;
#[cfg(target_arch = "avr")]
pub use native::NativeExecutor;
pub use record::{CapsuleRecord, RecordHeader};
pub use sim::SimulatedExecutor;
pub use store::{CapsuleStore, Lookup};
pub use writer::{append, append_code, Appended};

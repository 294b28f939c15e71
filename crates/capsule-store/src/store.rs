use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use capsule_flash::{Archive, Reprogrammer};
use capsule_types::{
    CapsuleHandle, CapsuleHash, CapsuleOffset, CodeAddress, Generation, ReturnWidth,
};

use crate::config::StoreConfig;
use crate::directory::{find_or_free_offset, Records, Slot};
use crate::error::{StoreError, StoreResult};
use crate::executor::CapsuleExecutor;
use crate::invoker;
use crate::locator::Container;
use crate::maintenance;
use crate::record::{CapsuleRecord, RecordHeader};
use crate::sim::SimulatedExecutor;
use crate::writer::{self, Appended};

/// Outcome of [`CapsuleStore::lookup`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Lookup {
    /// The capsule is stored; the handle is valid until the next erase.
    Found { handle: CapsuleHandle },
    /// The capsule is not stored; free space starts at `offset`.
    Free { offset: CapsuleOffset },
}

impl Lookup {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found { .. })
    }

    pub fn offset(&self) -> CapsuleOffset {
        match *self {
            Self::Found { handle } => handle.offset,
            Self::Free { offset } => offset,
        }
    }
}

/// A capsule container inside a flash archive.
///
/// The container is located once at open; the file table cannot change
/// afterwards. Reads take `&self` and writes take `&mut self`, so a store
/// shared between threads needs an outer lock.
pub struct CapsuleStore<F> {
    flash: F,
    config: StoreConfig,
    container: Container,
    generation: Generation,
}

impl<F: Archive + Reprogrammer> CapsuleStore<F> {
    /// Open the container tagged `config.container_file_type`.
    pub fn open(flash: F, config: StoreConfig) -> StoreResult<Self> {
        let container = Container::locate(&flash, config.container_file_type)?;
        debug!(
            index = container.index(),
            base = %container.base(),
            capacity = container.capacity(),
            "capsule store opened"
        );
        Ok(Self {
            flash,
            config,
            container,
            generation: Generation::INITIAL,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn container(&self) -> Container {
        self.container
    }

    /// Index of the container in the file table.
    pub fn container_index(&self) -> usize {
        self.container.index()
    }

    /// Re-run the table scan. Always agrees with [`container_index`](Self::container_index).
    pub fn locate_container(&self) -> StoreResult<usize> {
        crate::locator::locate_container(&self.flash, self.config.container_file_type)
    }

    /// Byte address of the code of the capsule whose header is at `offset`.
    pub fn resolve_code_address(&self, offset: CapsuleOffset) -> CodeAddress {
        self.container.code_address(offset)
    }

    /// Look a capsule up by header; `(true, offset)` on a hit, `(false,
    /// first_free)` on a miss.
    pub fn find_or_free_offset(
        &self,
        length: u16,
        hash: &CapsuleHash,
    ) -> StoreResult<(bool, CapsuleOffset)> {
        find_or_free_offset(&self.flash, self.container, length, hash).map(Slot::into_pair)
    }

    /// Like [`find_or_free_offset`](Self::find_or_free_offset), but a hit
    /// carries the current generation.
    pub fn lookup(&self, length: u16, hash: &CapsuleHash) -> StoreResult<Lookup> {
        Ok(
            match find_or_free_offset(&self.flash, self.container, length, hash)? {
                Slot::Found(offset) => Lookup::Found {
                    handle: CapsuleHandle::new(offset, self.generation),
                },
                Slot::Free(offset) => Lookup::Free { offset },
            },
        )
    }

    /// Records in storage order.
    pub fn records(&self) -> Records<'_, F> {
        Records::new(&self.flash, self.container)
    }

    /// Bytes before the first free offset, alignment padding included.
    pub fn used_bytes(&self) -> StoreResult<u16> {
        let mut records = self.records();
        for record in records.by_ref() {
            record?;
        }
        Ok(records.offset().get())
    }

    pub fn free_bytes(&self) -> StoreResult<u16> {
        Ok(self.container.capacity().saturating_sub(self.used_bytes()?))
    }

    /// Collect every record, failing on the first corrupt one.
    pub fn list(&self) -> StoreResult<Vec<CapsuleRecord>> {
        self.records().collect()
    }

    /// Append a record unless an identical header is already stored.
    pub fn append(&mut self, header: RecordHeader, code: &[u8]) -> StoreResult<Appended> {
        writer::append(&mut self.flash, self.container, header, code)
    }

    /// Append `code` under `hash`, computing the length field.
    pub fn append_code(&mut self, hash: CapsuleHash, code: &[u8]) -> StoreResult<Appended> {
        writer::append_code(&mut self.flash, self.container, hash, code)
    }

    /// Logically empty the container and start a new generation.
    pub fn erase(&mut self) -> StoreResult<()> {
        maintenance::erase(&mut self.flash, self.container)?;
        self.generation = self.generation.next();
        info!(generation = %self.generation, "capsule store generation advanced");
        Ok(())
    }

    /// Number of erases since open.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Offset of `handle` if it was issued in the current generation.
    pub fn check_handle(&self, handle: CapsuleHandle) -> StoreResult<CapsuleOffset> {
        if handle.generation != self.generation {
            return Err(StoreError::StaleHandle {
                handle,
                current: self.generation,
            });
        }
        Ok(handle.offset)
    }

    /// A simulator configured with this store's step limit.
    pub fn simulator(&self) -> SimulatedExecutor {
        SimulatedExecutor::new(self.config.sim_step_limit)
    }

    /// Call the capsule at `offset` with the configured return width.
    ///
    /// # Safety
    ///
    /// See [`invoker::invoke`].
    pub unsafe fn invoke<E: CapsuleExecutor + ?Sized>(
        &self,
        executor: &mut E,
        offset: CapsuleOffset,
        ret: &mut [u8],
    ) -> StoreResult<()> {
        self.invoke_with_width(executor, offset, self.config.default_return_width, ret)
    }

    /// Call the capsule at `offset`, collecting `width` result bytes.
    ///
    /// # Safety
    ///
    /// See [`invoker::invoke`].
    pub unsafe fn invoke_with_width<E: CapsuleExecutor + ?Sized>(
        &self,
        executor: &mut E,
        offset: CapsuleOffset,
        width: ReturnWidth,
        ret: &mut [u8],
    ) -> StoreResult<()> {
        invoker::invoke(&self.flash, self.container, executor, offset, width, ret)
    }

    /// Call the capsule behind `handle`, refusing handles from an earlier
    /// generation.
    ///
    /// # Safety
    ///
    /// `handle` must come from a [`lookup`](Self::lookup) hit on this store.
    /// See [`invoker::invoke`].
    pub unsafe fn invoke_handle<E: CapsuleExecutor + ?Sized>(
        &self,
        executor: &mut E,
        handle: CapsuleHandle,
        ret: &mut [u8],
    ) -> StoreResult<()> {
        let offset = self.check_handle(handle)?;
        self.invoke(executor, offset, ret)
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    /// Give the flash back, ending the store.
    pub fn into_inner(self) -> F {
        self.flash
    }
}

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use capsule_flash::{Archive, Reprogrammer, WriteSession};
use capsule_types::{CapsuleHash, CapsuleOffset};

use crate::directory::{find_or_free_offset, Slot};
use crate::error::{StoreError, StoreResult};
use crate::locator::Container;
use crate::record::{RecordHeader, HEADER_LEN, TERMINATOR_LEN};

/// Result of an append.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appended {
    /// Header offset of the capsule.
    pub offset: CapsuleOffset,
    /// `false` when an identical capsule was already stored and nothing was
    /// written.
    pub stored: bool,
}

/// Append a capsule unless one with the same (length, hash) is stored.
///
/// The record goes at the first free offset, followed by a fresh terminator
/// when at least two bytes remain; a record that ends exactly at the
/// container's end is terminated by the end itself. Header and terminator
/// are written in a single session.
pub fn append<F>(
    flash: &mut F,
    container: Container,
    header: RecordHeader,
    code: &[u8],
) -> StoreResult<Appended>
where
    F: Archive + Reprogrammer + ?Sized,
{
    header.validate()?;
    if usize::from(header.length) != usize::from(HEADER_LEN) + code.len() {
        return Err(StoreError::LengthMismatch {
            declared: header.length,
            code_len: code.len(),
        });
    }

    let offset = match find_or_free_offset(&*flash, container, header.length, &header.hash)? {
        Slot::Found(offset) => {
            debug!(offset = offset.get(), hash = %header.hash, "capsule already stored");
            return Ok(Appended {
                offset,
                stored: false,
            });
        }
        Slot::Free(offset) => offset,
    };

    let capacity = container.capacity();
    let available = capacity.saturating_sub(offset.get());
    if header.length > available {
        return Err(StoreError::ContainerFull {
            offset,
            needed: header.length,
            available,
        });
    }

    let mut session = WriteSession::open(flash, container.index(), u32::from(offset.get()))?;
    session.write(&header.encode())?;
    session.write(code)?;
    if available - header.length >= TERMINATOR_LEN {
        session.write(&[0; TERMINATOR_LEN as usize])?;
    }
    session.close()?;

    info!(
        offset = offset.get(),
        length = header.length,
        hash = %header.hash,
        "capsule appended"
    );
    Ok(Appended {
        offset,
        stored: true,
    })
}

/// Append `code` with a header whose length is computed from it.
pub fn append_code<F>(
    flash: &mut F,
    container: Container,
    hash: CapsuleHash,
    code: &[u8],
) -> StoreResult<Appended>
where
    F: Archive + Reprogrammer + ?Sized,
{
    let header = RecordHeader::for_code(hash, code)?;
    append(flash, container, header, code)
}

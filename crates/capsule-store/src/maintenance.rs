use tracing::info;

use capsule_flash::{Reprogrammer, WriteSession};

use crate::error::StoreResult;
use crate::locator::Container;
use crate::record::ERASE_MARKER;

/// Logically empty the container.
///
/// Writes three zero bytes at the start of the file. Whether the base is even
/// (records start at byte 0) or odd (records start at byte 1), the first two
/// bytes the directory reads are then zero. Nothing past the marker is
/// cleared; every previously returned offset becomes meaningless.
pub fn erase<R: Reprogrammer + ?Sized>(reprog: &mut R, container: Container) -> StoreResult<()> {
    let mut session = WriteSession::open(reprog, container.index(), 0)?;
    session.write(&ERASE_MARKER)?;
    session.close()?;
    info!(file_index = container.index(), "capsule container erased");
    Ok(())
}

use tracing::debug;

use capsule_flash::Archive;
use capsule_types::{CapsuleOffset, ReturnWidth};

use crate::error::{StoreError, StoreResult};
use crate::executor::CapsuleExecutor;
use crate::locator::Container;
use crate::record::HEADER_LEN;

/// Call the capsule whose header sits at `offset` and collect its result.
///
/// The code address is `base + offset + 6`, halved into a word address for
/// the call. The offset is only checked against the container's bounds; a
/// caller holding an offset from before an erase calls whatever now lives
/// there.
///
/// # Safety
///
/// `offset` must be the header offset of a complete capsule stored in the
/// current generation of the container, and the capsule must be trusted code
/// for the executor's processor. See [`CapsuleExecutor::call`].
pub unsafe fn invoke<A, E>(
    archive: &A,
    container: Container,
    executor: &mut E,
    offset: CapsuleOffset,
    width: ReturnWidth,
    ret: &mut [u8],
) -> StoreResult<()>
where
    A: Archive,
    E: CapsuleExecutor + ?Sized,
{
    if ret.len() < width.len() {
        return Err(StoreError::ReturnBufferTooSmall {
            needed: width.len(),
            actual: ret.len(),
        });
    }
    if u32::from(offset.get()) + u32::from(HEADER_LEN) > u32::from(container.capacity()) {
        return Err(StoreError::OffsetOutOfRange {
            offset,
            capacity: container.capacity(),
        });
    }

    let code = container.code_address(offset);
    let entry = code.to_instruction();
    debug!(offset = offset.get(), %code, %entry, %width, "invoking capsule");
    executor.call(archive, entry, width, ret)?;
    Ok(())
}

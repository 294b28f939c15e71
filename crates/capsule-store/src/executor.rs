use capsule_flash::{Archive, FlashError};
use capsule_types::{InstructionAddress, ReturnWidth};

/// Errors raised while running capsule code.
///
/// The native executor cannot fail once the call is made; these come from
/// executors that observe the code as it runs.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("unsupported opcode {opcode:#06x} at {pc}")]
    UnsupportedOpcode { pc: InstructionAddress, opcode: u16 },

    #[error("store to data address {addr:#06x} outside the return buffer")]
    StoreOutOfBounds { addr: u16 },

    #[error("capsule did not return within {limit} instructions")]
    StepLimitExceeded { limit: u32 },

    #[error("instruction fetch failed: {0}")]
    Fetch(#[from] FlashError),
}

/// Performs the computed call into stored capsule code.
///
/// Contract shared by every implementation:
/// - control enters at `entry`, a word address, with the return buffer's
///   address in the callee-saved `Y` pointer (`R29:R28`);
/// - the capsule runs to its `RET`, synchronously, with no timeout;
/// - on return, `width.len()` bytes are copied from the result registers,
///   starting at `width.first_register()`, to where `Y` points.
pub trait CapsuleExecutor {
    /// Call the capsule at `entry` and deliver its result into `ret`.
    ///
    /// `program` is the memory the capsule is fetched from. `ret` is at least
    /// `width.len()` bytes long.
    ///
    /// # Safety
    ///
    /// `entry` must be the first instruction of complete, trusted capsule
    /// code for the executing processor. Native execution transfers control
    /// to arbitrary bytes: a malformed capsule can corrupt any state, and a
    /// capsule that never returns never gives control back.
    unsafe fn call(
        &mut self,
        program: &dyn Archive,
        entry: InstructionAddress,
        width: ReturnWidth,
        ret: &mut [u8],
    ) -> Result<(), ExecError>;
}

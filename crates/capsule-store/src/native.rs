//! Direct execution of capsule code on the AVR core.
//!
//! This is the one place the workspace transfers control to bytes it did not
//! compile. Everything else reaches it through [`CapsuleExecutor`].

use core::arch::asm;

use capsule_flash::Archive;
use capsule_types::{InstructionAddress, ReturnWidth};

use crate::executor::{CapsuleExecutor, ExecError};

/// Executes capsules with `ICALL`.
///
/// `Y` is the frame pointer and cannot be an asm operand, so each sequence
/// saves it, loads the buffer address into it from `X`, calls through `Z`,
/// stores the result registers through `Y`, and restores it. Capsules must
/// preserve `Y` like any avr-gcc callee. `ICALL` reaches the first 64 Ki-words
/// of flash only.
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeExecutor;

impl CapsuleExecutor for NativeExecutor {
    unsafe fn call(
        &mut self,
        _program: &dyn Archive,
        entry: InstructionAddress,
        width: ReturnWidth,
        ret: &mut [u8],
    ) -> Result<(), ExecError> {
        let target = entry.get();
        let buffer = ret.as_mut_ptr();
        match width {
            ReturnWidth::Byte => asm!(
                "push r28",
                "push r29",
                "movw r28, r26",
                "icall",
                "st Y, r24",
                "pop r29",
                "pop r28",
                in("Z") target,
                in("X") buffer,
                clobber_abi("C"),
            ),
            ReturnWidth::Word => asm!(
                "push r28",
                "push r29",
                "movw r28, r26",
                "icall",
                "st Y+, r24",
                "st Y+, r25",
                "pop r29",
                "pop r28",
                in("Z") target,
                in("X") buffer,
                clobber_abi("C"),
            ),
            ReturnWidth::DWord => asm!(
                "push r28",
                "push r29",
                "movw r28, r26",
                "icall",
                "st Y+, r22",
                "st Y+, r23",
                "st Y+, r24",
                "st Y+, r25",
                "pop r29",
                "pop r28",
                in("Z") target,
                in("X") buffer,
                clobber_abi("C"),
            ),
        }
        Ok(())
    }
}

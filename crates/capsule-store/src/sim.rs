//! Host-side emulation of the capsule calling convention.
//!
//! [`SimulatedExecutor`] runs the small AVR instruction subset found in
//! capsule stubs: register loads and moves, 8-bit adds, stores through `Y`,
//! relative calls and returns. It exists so the invocation contract can be
//! exercised without hardware; it is not a general AVR emulator.

use tracing::{debug, trace};

use capsule_flash::Archive;
use capsule_types::{InstructionAddress, ReturnWidth};

use crate::executor::{CapsuleExecutor, ExecError};

/// Data address the simulator assigns to the caller's return buffer.
pub const RETURN_BUFFER_ADDR: u16 = 0x0100;

const YL: usize = 28;
const YH: usize = 29;
const ZL: usize = 30;
const ZH: usize = 31;

/// Interpreter for capsule stubs.
#[derive(Clone, Debug)]
pub struct SimulatedExecutor {
    regs: [u8; 32],
    step_limit: u32,
    steps: u32,
}

impl SimulatedExecutor {
    pub fn new(step_limit: u32) -> Self {
        Self {
            regs: [0; 32],
            step_limit,
            steps: 0,
        }
    }

    /// Register file as left by the last call.
    pub fn registers(&self) -> &[u8; 32] {
        &self.regs
    }

    /// Instructions executed by the last call, the final `RET` included.
    pub fn steps(&self) -> u32 {
        self.steps
    }

    fn y(&self) -> u16 {
        u16::from_le_bytes([self.regs[YL], self.regs[YH]])
    }

    fn set_y(&mut self, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.regs[YL] = lo;
        self.regs[YH] = hi;
    }

    fn store(&self, ret: &mut [u8], addr: u16, value: u8) -> Result<(), ExecError> {
        let slot = addr
            .checked_sub(RETURN_BUFFER_ADDR)
            .map(usize::from)
            .filter(|&i| i < ret.len())
            .ok_or(ExecError::StoreOutOfBounds { addr })?;
        ret[slot] = value;
        Ok(())
    }

    fn run(
        &mut self,
        program: &dyn Archive,
        entry: InstructionAddress,
        ret: &mut [u8],
    ) -> Result<(), ExecError> {
        let mut pc = entry.get();
        let mut call_stack: Vec<u16> = Vec::new();
        self.steps = 0;

        loop {
            if self.steps >= self.step_limit {
                return Err(ExecError::StepLimitExceeded {
                    limit: self.step_limit,
                });
            }
            self.steps += 1;

            let here = InstructionAddress(pc);
            let op = program.read_u16(here.to_byte_address())?;
            trace!(pc = %here, opcode = op, "sim step");
            let mut next = pc.wrapping_add(1);

            match op {
                opcodes::NOP => {}
                opcodes::RET => match call_stack.pop() {
                    Some(addr) => next = addr,
                    None => return Ok(()),
                },
                _ if op & 0xF000 == 0xE000 => {
                    // LDI Rd, K
                    let d = 16 + usize::from((op >> 4) & 0x0F);
                    self.regs[d] = (((op >> 4) & 0xF0) | (op & 0x0F)) as u8;
                }
                _ if op & 0xFC00 == 0x2C00 => {
                    // MOV Rd, Rr
                    let (d, r) = two_regs(op);
                    self.regs[d] = self.regs[r];
                }
                _ if op & 0xFC00 == 0x0C00 => {
                    // ADD Rd, Rr
                    let (d, r) = two_regs(op);
                    self.regs[d] = self.regs[d].wrapping_add(self.regs[r]);
                }
                _ if op & 0xFE0F == 0x9209 => {
                    // ST Y+, Rr
                    let r = usize::from((op >> 4) & 0x1F);
                    let y = self.y();
                    self.store(ret, y, self.regs[r])?;
                    self.set_y(y.wrapping_add(1));
                }
                _ if op & 0xD208 == 0x8208 => {
                    // STD Y+q, Rr (ST Y, Rr when q = 0)
                    let r = usize::from((op >> 4) & 0x1F);
                    let q = ((op >> 8) & 0x20) | ((op >> 7) & 0x18) | (op & 0x07);
                    self.store(ret, self.y().wrapping_add(q), self.regs[r])?;
                }
                _ if op & 0xF000 == 0xD000 => {
                    // RCALL k
                    let k = sign_extend_12(op & 0x0FFF);
                    call_stack.push(next);
                    next = next.wrapping_add(k as u16);
                }
                _ => {
                    return Err(ExecError::UnsupportedOpcode { pc: here, opcode: op });
                }
            }
            pc = next;
        }
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl CapsuleExecutor for SimulatedExecutor {
    unsafe fn call(
        &mut self,
        program: &dyn Archive,
        entry: InstructionAddress,
        width: ReturnWidth,
        ret: &mut [u8],
    ) -> Result<(), ExecError> {
        self.regs = [0; 32];
        self.set_y(RETURN_BUFFER_ADDR);
        let [zl, zh] = entry.get().to_le_bytes();
        self.regs[ZL] = zl;
        self.regs[ZH] = zh;

        debug!(entry = %entry, %width, "simulated capsule call");
        self.run(program, entry, ret)?;

        // Post-call sequence: store the result registers through Y.
        let y = self.y();
        let first = width.first_register();
        for i in 0..width.len() {
            self.store(ret, y.wrapping_add(i as u16), self.regs[first + i])?;
        }
        debug!(steps = self.steps, "simulated capsule returned");
        Ok(())
    }
}

fn two_regs(op: u16) -> (usize, usize) {
    let d = usize::from((op >> 4) & 0x1F);
    let r = usize::from(((op >> 5) & 0x10) | (op & 0x0F));
    (d, r)
}

fn sign_extend_12(v: u16) -> i16 {
    ((v << 4) as i16) >> 4
}

/// Encoders for the instructions the simulator understands.
pub mod opcodes {
    pub const NOP: u16 = 0x0000;
    pub const RET: u16 = 0x9508;

    /// `LDI Rd, K`, with `d` in 16..=31.
    pub const fn ldi(d: u8, k: u8) -> u16 {
        let d = (d - 16) as u16;
        let k = k as u16;
        0xE000 | ((k & 0xF0) << 4) | (d << 4) | (k & 0x0F)
    }

    /// `MOV Rd, Rr`.
    pub const fn mov(d: u8, r: u8) -> u16 {
        0x2C00 | two_regs(d, r)
    }

    /// `ADD Rd, Rr`.
    pub const fn add(d: u8, r: u8) -> u16 {
        0x0C00 | two_regs(d, r)
    }

    /// `ST Y, Rr`.
    pub const fn st_y(r: u8) -> u16 {
        std_y(0, r)
    }

    /// `ST Y+, Rr`.
    pub const fn st_y_inc(r: u8) -> u16 {
        0x9209 | ((r as u16) << 4)
    }

    /// `STD Y+q, Rr`, with `q` in 0..=63.
    pub const fn std_y(q: u8, r: u8) -> u16 {
        let q = q as u16;
        0x8208 | ((q & 0x20) << 8) | ((q & 0x18) << 7) | (q & 0x07) | ((r as u16) << 4)
    }

    /// `RCALL k`, relative to the following instruction.
    pub const fn rcall(k: i16) -> u16 {
        0xD000 | (k as u16 & 0x0FFF)
    }

    const fn two_regs(d: u8, r: u8) -> u16 {
        let d = d as u16;
        let r = r as u16;
        ((r & 0x10) << 5) | (d << 4) | (r & 0x0F)
    }

    /// Little-endian machine code for a sequence of instruction words.
    pub fn assemble(words: &[u16]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }
}

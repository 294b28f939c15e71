use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::CapsuleOffset;
use crate::error::TypeError;

/// Monotonic erase counter of a capsule store.
///
/// Starts at zero and advances by one on every erase. Offsets handed out
/// under one generation are meaningless under any other.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Generation(pub u32);

impl Generation {
    pub const INITIAL: Self = Self(0);

    /// The generation that follows this one. Wraps after `u32::MAX` erases.
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// A capsule offset tagged with the store generation it was issued under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapsuleHandle {
    pub offset: CapsuleOffset,
    pub generation: Generation,
}

impl CapsuleHandle {
    pub const fn new(offset: CapsuleOffset, generation: Generation) -> Self {
        Self { offset, generation }
    }
}

impl fmt::Display for CapsuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.offset, self.generation)
    }
}

/// Number of result bytes an invocation copies out of the return registers.
///
/// The stable contract is [`ReturnWidth::Byte`]: one byte taken from `R24`.
/// The wider forms follow the avr-gcc return convention (`R25:R24` for 16
/// bits, `R25:R22` for 32 bits, least significant byte first) and must be
/// requested explicitly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnWidth {
    #[default]
    Byte,
    Word,
    DWord,
}

impl ReturnWidth {
    /// Number of bytes written into the return buffer.
    pub const fn len(self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
            Self::DWord => 4,
        }
    }

    /// First register of the result, in store order.
    pub const fn first_register(self) -> usize {
        match self {
            Self::Byte | Self::Word => 24,
            Self::DWord => 22,
        }
    }

    pub fn from_len(len: usize) -> Result<Self, TypeError> {
        match len {
            1 => Ok(Self::Byte),
            2 => Ok(Self::Word),
            4 => Ok(Self::DWord),
            other => Err(TypeError::InvalidReturnWidth(other)),
        }
    }
}

impl fmt::Display for ReturnWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Byte => write!(f, "byte"),
            Self::Word => write!(f, "word"),
            Self::DWord => write!(f, "dword"),
        }
    }
}

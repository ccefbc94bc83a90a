//! Load-reservation state and atomic read-modify-write operations.
//!
//! Each hart owns one reservation slot. `reserve` records an address,
//! and `store_conditional` always clears the slot, succeeding only when
//! the cleared reservation matched the address exactly.

use super::error::{ExceptionKind, MachineException, MachineResult};

/// Per-hart LR/SC reservation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AtomicReservation {
    addr: Option<u64>,
}

impl AtomicReservation {
    pub const fn new() -> Self {
        Self { addr: None }
    }

    fn check_alignment(size: usize, addr: u64) -> MachineResult<()> {
        if addr & (size as u64 - 1) != 0 {
            return Err(MachineException::of(ExceptionKind::InvalidAlignment, addr));
        }
        Ok(())
    }

    /// Record `addr` as the hart's sole reservation.
    pub fn reserve(&mut self, size: usize, addr: u64) -> MachineResult<bool> {
        Self::check_alignment(size, addr)?;
        self.addr = Some(addr);
        Ok(true)
    }

    /// Clear the reservation and report whether it matched `addr`.
    pub fn store_conditional(&mut self, size: usize, addr: u64) -> MachineResult<bool> {
        Self::check_alignment(size, addr)?;
        let matched = self.addr == Some(addr);
        self.addr = None;
        Ok(matched)
    }

    /// Current reservation, if any.
    pub fn reservation(&self) -> Option<u64> {
        self.addr
    }

    pub fn clear(&mut self) {
        self.addr = None;
    }
}

/// Read-modify-write operation of an AMO instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmoOp {
    Add,
    Swap,
    Xor,
    Or,
    And,
    Min,
    Max,
    MinU,
    MaxU,
}

impl AmoOp {
    /// Decode the funct5 field of an AMO instruction. LR and SC are not
    /// read-modify-write operations and return `None`.
    pub fn from_funct5(funct5: u32) -> Option<Self> {
        Some(match funct5 {
            0b00000 => Self::Add,
            0b00001 => Self::Swap,
            0b00100 => Self::Xor,
            0b01000 => Self::Or,
            0b01100 => Self::And,
            0b10000 => Self::Min,
            0b10100 => Self::Max,
            0b11000 => Self::MinU,
            0b11100 => Self::MaxU,
            _ => return None,
        })
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Add => "AMOADD",
            Self::Swap => "AMOSWAP",
            Self::Xor => "AMOXOR",
            Self::Or => "AMOOR",
            Self::And => "AMOAND",
            Self::Min => "AMOMIN",
            Self::Max => "AMOMAX",
            Self::MinU => "AMOMINU",
            Self::MaxU => "AMOMAXU",
        }
    }

    pub fn apply_u32(self, old: u32, value: u32) -> u32 {
        match self {
            Self::Add => old.wrapping_add(value),
            Self::Swap => value,
            Self::Xor => old ^ value,
            Self::Or => old | value,
            Self::And => old & value,
            Self::Min => (old as i32).min(value as i32) as u32,
            Self::Max => (old as i32).max(value as i32) as u32,
            Self::MinU => old.min(value),
            Self::MaxU => old.max(value),
        }
    }

    pub fn apply_u64(self, old: u64, value: u64) -> u64 {
        match self {
            Self::Add => old.wrapping_add(value),
            Self::Swap => value,
            Self::Xor => old ^ value,
            Self::Or => old | value,
            Self::And => old & value,
            Self::Min => (old as i64).min(value as i64) as u64,
            Self::Max => (old as i64).max(value as i64) as u64,
            Self::MinU => old.min(value),
            Self::MaxU => old.max(value),
        }
    }
}

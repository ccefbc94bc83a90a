//! Decoder-cache entries.

use crate::decode::Bytecode;

/// One decoder-cache slot per 2-byte (compressed) or 4-byte unit of an
/// execute segment.
///
/// `idxend` is the distance, in units, from this slot to the last
/// instruction of its block, so `block_bytes()` moves a program counter
/// from a block entry to that last instruction. `icount` is the number of
/// instructions from this slot to the block end, inclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderEntry {
    pub bytecode: Bytecode,
    /// Index into the segment's handler table, 0 when unresolved. The
    /// live-patch probe reuses this byte as its state.
    pub handler: u8,
    pub idxend: u16,
    pub icount: u16,
    /// Rewritten instruction bits, layout chosen by `bytecode`.
    pub instr: u32,
}

impl DecoderEntry {
    /// An entry that traps with an illegal-opcode fault.
    pub const INVALID: Self = Self {
        bytecode: Bytecode::Invalid,
        handler: 0,
        idxend: 0,
        icount: 0,
        instr: 0,
    };

    pub const fn new(bytecode: Bytecode, instr: u32) -> Self {
        Self {
            bytecode,
            handler: 0,
            idxend: 0,
            icount: 0,
            instr,
        }
    }

    /// Bytes from this slot to the last instruction of the block.
    #[inline]
    pub fn block_bytes(&self, compressed: bool) -> u64 {
        (self.idxend as u64) << unit_shift(compressed)
    }

    /// Instructions charged when a block is entered at this slot.
    #[inline]
    pub fn instruction_count(&self) -> u64 {
        self.icount as u64
    }

    /// Replace bytecode and handler together.
    #[inline]
    pub fn set_bytecode_and_handler(&mut self, bytecode: Bytecode, handler: u8) {
        self.bytecode = bytecode;
        self.handler = handler;
    }
}

/// Log2 of the decoder-cache unit size.
#[inline]
pub const fn unit_shift(compressed: bool) -> u32 {
    if compressed {
        1
    } else {
        2
    }
}

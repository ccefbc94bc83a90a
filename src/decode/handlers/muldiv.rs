//! M extension.

use super::base::op;
use super::{print, InstructionHandler};
use crate::cpu::alu;
use crate::cpu::instruction::{opcode, Instruction};
use crate::cpu::AddressType;

pub(super) fn decode<A: AddressType>(instr: Instruction) -> Option<InstructionHandler<A>> {
    let key = instr.rtype().jumptable_friendly_op();
    let handler = match instr.opcode() {
        opcode::OP => match key {
            0x010 => op!("MUL", alu::mul::<A>),
            0x011 => op!("MULH", alu::mulh::<A>),
            0x012 => op!("MULHSU", alu::mulhsu::<A>),
            0x013 => op!("MULHU", alu::mulhu::<A>),
            0x014 => op!("DIV", alu::div::<A>),
            0x015 => op!("DIVU", alu::divu::<A>),
            0x016 => op!("REM", alu::rem::<A>),
            0x017 => op!("REMU", alu::remu::<A>),
            _ => return None,
        },
        opcode::OP32 if A::is_rv64() => match key {
            0x010 => op!("MULW", alu::mulw::<A>),
            0x014 => op!("DIVW", alu::divw::<A>),
            0x015 => op!("DIVUW", alu::divuw::<A>),
            0x016 => op!("REMW", alu::remw::<A>),
            0x017 => op!("REMUW", alu::remuw::<A>),
            _ => return None,
        },
        _ => return None,
    };
    Some(handler)
}

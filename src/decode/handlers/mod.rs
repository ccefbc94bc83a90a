//! Precise-mode instruction handlers.
//!
//! [`decode_one`] maps any instruction word to an [`InstructionHandler`]:
//! a mnemonic, a function executing exactly one instruction and a printer.
//! Handlers run with the program counter at the instruction itself. A
//! handler that transfers control leaves `pc` at `target - length` so the
//! caller's `pc += length` lands on the target.
//!
//! # Module Organization
//!
//! | Module | Extensions |
//! |--------|------------|
//! | `base` | RV32I/RV64I, Zicsr, Zifencei |
//! | `muldiv` | M |
//! | `bitmanip` | Zba, Zbb, Zbs |
//! | `atomic` | A |
//! | `float` | F, D |
//! | `vector` | V subset |
//! | `compressed` | C |

mod atomic;
mod base;
mod bitmanip;
mod compressed;
pub(crate) mod float;
mod muldiv;
mod print;
mod vector;

use std::fmt;

use crate::cpu::instruction::{opcode, Instruction};
use crate::cpu::{AddressType, ExceptionKind, MachineException, MachineResult};
use crate::machine::Machine;

/// Executes one instruction.
pub type Handler<A> = fn(&mut Machine<A>, Instruction) -> MachineResult<()>;

/// Formats one instruction given its mnemonic and address.
pub type Printer = fn(&'static str, Instruction, u64) -> String;

/// Handler, printer and mnemonic of one decoded instruction.
pub struct InstructionHandler<A: AddressType> {
    /// Upper-case mnemonic. Distinct handlers never share a name.
    pub name: &'static str,
    pub handler: Handler<A>,
    pub printer: Printer,
}

impl<A: AddressType> InstructionHandler<A> {
    pub const fn new(name: &'static str, handler: Handler<A>, printer: Printer) -> Self {
        Self { name, handler, printer }
    }

    #[inline]
    pub fn execute(&self, machine: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
        (self.handler)(machine, instr)
    }

    /// Mnemonic and operands, without address or encoding.
    pub fn print(&self, instr: Instruction, pc: u64) -> String {
        (self.printer)(self.name, instr, pc)
    }

    pub fn is_illegal(&self) -> bool {
        self.name == ILLEGAL
    }
}

impl<A: AddressType> Clone for InstructionHandler<A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A: AddressType> Copy for InstructionHandler<A> {}

impl<A: AddressType> fmt::Debug for InstructionHandler<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("InstructionHandler").field(&self.name).finish()
    }
}

const ILLEGAL: &str = "ILLEGAL";
const UNIMPLEMENTED: &str = "UNIMPLEMENTED";

fn execute_illegal<A: AddressType>(_: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    Err(MachineException::of(ExceptionKind::IllegalOpcode, instr.whole() as u64))
}

fn execute_unimplemented<A: AddressType>(_: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    if instr.length() == 2 {
        Err(MachineException::new(
            ExceptionKind::UnimplementedInstruction,
            "Unimplemented compressed instruction",
            instr.whole() as u64,
        ))
    } else {
        Err(MachineException::of(ExceptionKind::UnimplementedInstruction, instr.whole() as u64))
    }
}

/// Handler for encodings that do not exist.
pub fn illegal<A: AddressType>() -> InstructionHandler<A> {
    InstructionHandler::new(ILLEGAL, execute_illegal::<A>, print::raw)
}

/// Handler for encodings that exist but are not supported.
pub fn unimplemented<A: AddressType>() -> InstructionHandler<A> {
    InstructionHandler::new(UNIMPLEMENTED, execute_unimplemented::<A>, print::raw)
}

/// Decode one instruction for precise execution. Total: every word maps to
/// some handler.
pub fn decode_one<A: AddressType>(instr: Instruction) -> InstructionHandler<A> {
    if instr.is_compressed() {
        return compressed::decode::<A>(instr);
    }
    match instr.opcode() {
        opcode::LOAD
        | opcode::STORE
        | opcode::BRANCH
        | opcode::JAL
        | opcode::JALR
        | opcode::LUI
        | opcode::AUIPC
        | opcode::MISC_MEM
        | opcode::SYSTEM => base::decode::<A>(instr),
        opcode::OP_IMM | opcode::OP_IMM32 => {
            base::decode::<A>(instr).or_else(|| bitmanip::decode::<A>(instr))
        }
        opcode::OP | opcode::OP32 => base::decode::<A>(instr)
            .or_else(|| muldiv::decode::<A>(instr))
            .or_else(|| bitmanip::decode::<A>(instr)),
        opcode::AMO => atomic::decode::<A>(instr),
        opcode::LOAD_FP | opcode::STORE_FP => match instr.funct3() {
            0x2 | 0x3 => float::decode::<A>(instr),
            _ => vector::decode::<A>(instr),
        },
        opcode::FMADD | opcode::FMSUB | opcode::FNMSUB | opcode::FNMADD | opcode::OP_FP => {
            float::decode::<A>(instr)
        }
        opcode::OP_V => vector::decode::<A>(instr),
        _ => None,
    }
    .unwrap_or_else(|| fallback::<A>(instr))
}

/// Illegal for opcodes this crate never recognizes, unimplemented for the
/// known extension spaces.
fn fallback<A: AddressType>(instr: Instruction) -> InstructionHandler<A> {
    match instr.opcode() {
        opcode::LOAD_FP | opcode::STORE_FP | opcode::OP_V | opcode::OP_FP | opcode::AMO => {
            unimplemented::<A>()
        }
        _ => illegal::<A>(),
    }
}

/// Convenience wrapper used by instruction printing.
pub fn print_instruction<A: AddressType>(instr: Instruction, pc: u64) -> String {
    decode_one::<A>(instr).print(instr, pc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name32(word: u32) -> &'static str {
        decode_one::<u32>(Instruction::new(word)).name
    }

    fn name64(word: u32) -> &'static str {
        decode_one::<u64>(Instruction::new(word)).name
    }

    #[test]
    fn test_decode_names() {
        assert_eq!(name32(0x003100B3), "ADD");
        assert_eq!(name32(0x403100B3), "SUB");
        assert_eq!(name32(0x023100B3), "MUL");
        assert_eq!(name32(0x00500093), "ADDI");
        assert_eq!(name32(0x00008067), "JALR");
        assert_eq!(name32(0x00000073), "ECALL");
        assert_eq!(name32(0x1000202F), "LR.W");
        assert_eq!(name32(0x00208053), "FADD.S");
        assert_eq!(name32(0x60009093), "CLZ");
        assert_eq!(name32(0x4505), "C.LI");
        assert_eq!(name32(0x8082), "C.JR");
    }

    #[test]
    fn test_width_dependent_names() {
        // ld x1, 0(x2)
        assert_eq!(name32(0x00013083), ILLEGAL);
        assert_eq!(name64(0x00013083), "LD");
        // addw
        assert_eq!(name32(0x003100BB), ILLEGAL);
        assert_eq!(name64(0x003100BB), "ADDW");
        // c.jal on RV32, c.addiw on RV64
        assert_eq!(name32(0x2085), "C.JAL");
        assert_eq!(name64(0x2085), "C.ADDIW");
    }

    #[test]
    fn test_illegal_and_unimplemented() {
        assert!(decode_one::<u32>(Instruction::new(0)).is_illegal());
        assert!(decode_one::<u32>(Instruction::new(0xFFFF_FFFF)).is_illegal());
        // vlse32 (strided) is recognized but not supported
        assert_eq!(name32(0x0A016007), UNIMPLEMENTED);
    }

    /// Sampled decode totality: every word decodes to some handler and the
    /// handler name is consistent with the dispatch classification.
    #[test]
    fn test_decode_totality_sampled() {
        let mut x: u32 = 0x9E37_79B9;
        for _ in 0..200_000 {
            // xorshift32
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            let word = if x & 0b11 == 0b11 { x } else { x & 0xFFFF };
            let instr = Instruction::new(word);
            let h32 = decode_one::<u32>(instr);
            let h64 = decode_one::<u64>(instr);
            assert!(!h32.name.is_empty() && !h64.name.is_empty());
            let _ = h32.print(instr, 0x1000);
            let _ = h64.print(instr, 0x1000);
        }
    }

    #[test]
    fn test_printer() {
        let add = Instruction::new(0x003100B3);
        assert_eq!(decode_one::<u32>(add).print(add, 0), "ADD ra, sp, gp");
        let lw = Instruction::new(0x00412083); // lw x1, 4(x2)
        assert_eq!(decode_one::<u32>(lw).print(lw, 0), "LW ra, 4(sp)");
    }
}

//! Zba, Zbb and Zbs.

use super::base::{op, shift_imm};
use super::{print, InstructionHandler};
use crate::cpu::alu;
use crate::cpu::instruction::{opcode, Instruction};
use crate::cpu::AddressType;

/// `rd = f(rs1)`.
macro_rules! unary {
    ($name:expr, $f:expr) => {
        InstructionHandler::<A>::new(
            $name,
            |m, i| {
                let value = ($f)(m.cpu.reg(i.rs1()));
                m.cpu.set_reg(i.rd(), value);
                Ok(())
            },
            print::unary,
        )
    };
}

pub(super) fn decode<A: AddressType>(instr: Instruction) -> Option<InstructionHandler<A>> {
    let rv64 = A::is_rv64();
    // Bit 5 of a shift amount is reserved on RV32
    let shamt_high = if rv64 { 0xFC0 } else { 0xFE0 };
    let handler = match instr.opcode() {
        opcode::OP => match instr.rtype().jumptable_friendly_op() {
            0x102 => op!("SH1ADD", |a, b| alu::sh_add::<A>(a, b, 1)),
            0x104 => op!("SH2ADD", |a, b| alu::sh_add::<A>(a, b, 2)),
            0x106 => op!("SH3ADD", |a, b| alu::sh_add::<A>(a, b, 3)),
            0x207 => op!("ANDN", alu::andn::<A>),
            0x206 => op!("ORN", alu::orn::<A>),
            0x204 => op!("XNOR", alu::xnor::<A>),
            0x054 => op!("MIN", alu::min::<A>),
            0x055 => op!("MINU", alu::minu::<A>),
            0x056 => op!("MAX", alu::max::<A>),
            0x057 => op!("MAXU", alu::maxu::<A>),
            0x301 => op!("ROL", alu::rol::<A>),
            0x305 => op!("ROR", alu::ror::<A>),
            0x044 if !rv64 && instr.rs2() == 0 => unary!("ZEXT.H", alu::zext_h::<A>),
            0x141 => op!("BSET", alu::bset::<A>),
            0x241 => op!("BCLR", alu::bclr::<A>),
            0x341 => op!("BINV", alu::binv::<A>),
            0x245 => op!("BEXT", alu::bext::<A>),
            _ => return None,
        },
        opcode::OP_IMM => {
            let i = instr.itype();
            match (i.funct3, i.imm) {
                (0x1, 0x600) => unary!("CLZ", alu::clz::<A>),
                (0x1, 0x601) => unary!("CTZ", alu::ctz::<A>),
                (0x1, 0x602) => unary!("CPOP", alu::cpop::<A>),
                (0x1, 0x604) => unary!("SEXT.B", alu::sext_b::<A>),
                (0x1, 0x605) => unary!("SEXT.H", alu::sext_h::<A>),
                (0x1, imm) if imm & shamt_high == 0x280 => shift_imm!("BSETI", alu::bset::<A>),
                (0x1, imm) if imm & shamt_high == 0x480 => shift_imm!("BCLRI", alu::bclr::<A>),
                (0x1, imm) if imm & shamt_high == 0x680 => shift_imm!("BINVI", alu::binv::<A>),
                (0x5, 0x287) => unary!("ORC.B", alu::orc_b::<A>),
                (0x5, 0x698) if !rv64 => unary!("REV8", alu::rev8::<A>),
                (0x5, 0x6B8) if rv64 => unary!("REV8", alu::rev8::<A>),
                (0x5, imm) if imm & shamt_high == 0x480 => shift_imm!("BEXTI", alu::bext::<A>),
                (0x5, imm) if imm & shamt_high == 0x600 => shift_imm!("RORI", alu::ror::<A>),
                _ => return None,
            }
        }
        opcode::OP32 if rv64 => match instr.rtype().jumptable_friendly_op() {
            0x040 => op!("ADD.UW", |a, b| alu::sh_add_uw::<A>(a, b, 0)),
            0x102 => op!("SH1ADD.UW", |a, b| alu::sh_add_uw::<A>(a, b, 1)),
            0x104 => op!("SH2ADD.UW", |a, b| alu::sh_add_uw::<A>(a, b, 2)),
            0x106 => op!("SH3ADD.UW", |a, b| alu::sh_add_uw::<A>(a, b, 3)),
            0x044 if instr.rs2() == 0 => unary!("ZEXT.H", alu::zext_h::<A>),
            0x301 => op!("ROLW", |a, b: A| alu::rolw::<A>(a, b.to_u64() as u32)),
            0x305 => op!("RORW", |a, b: A| alu::rorw::<A>(a, b.to_u64() as u32)),
            _ => return None,
        },
        opcode::OP_IMM32 if rv64 => {
            let i = instr.itype();
            match (i.funct3, i.imm) {
                (0x1, 0x600) => unary!("CLZW", alu::clzw::<A>),
                (0x1, 0x601) => unary!("CTZW", alu::ctzw::<A>),
                (0x1, 0x602) => unary!("CPOPW", alu::cpopw::<A>),
                (0x1, imm) if imm & 0xFC0 == 0x080 => {
                    shift_imm!("SLLI.UW", |a, b: A| alu::slli_uw::<A>(a, b.to_u64() as u32))
                }
                (0x5, imm) if imm & 0xFE0 == 0x600 => {
                    shift_imm!("RORIW", |a, b: A| alu::rorw::<A>(a, b.to_u64() as u32))
                }
                _ => return None,
            }
        }
        _ => return None,
    };
    Some(handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{Machine, MachineOptions};

    fn exec<A: AddressType>(word: u32, x2: u64, x3: u64) -> u64 {
        let mut m = Machine::<A>::new(MachineOptions::default());
        m.cpu.registers_mut().set_u64(2, x2);
        m.cpu.registers_mut().set_u64(3, x3);
        let instr = Instruction::new(word);
        decode::<A>(instr).unwrap().execute(&mut m, instr).unwrap();
        m.cpu.registers().get_u64(1)
    }

    #[test]
    fn test_zba() {
        // sh2add x1, x2, x3
        assert_eq!(exec::<u32>(0x203140B3, 3, 100), 112);
        // add.uw x1, x2, x3
        assert_eq!(exec::<u64>(0x083100BB, 0xFFFF_FFFF_0000_0001, 1), 2);
    }

    #[test]
    fn test_zbb() {
        // clz x1, x2
        assert_eq!(exec::<u32>(0x60011093, 1, 0), 31);
        assert_eq!(exec::<u64>(0x60011093, 1, 0), 63);
        // max x1, x2, x3
        assert_eq!(exec::<u32>(0x0A3160B3, (-5i32) as u32 as u64, 3), 3);
        // rev8 on RV32
        assert_eq!(exec::<u32>(0x69815093, 0x1122_3344, 0), 0x4433_2211);
        // orc.b
        assert_eq!(exec::<u32>(0x28715093, 0x0010_0200, 0), 0x00FF_FF00);
    }

    #[test]
    fn test_zbs() {
        // bseti x1, x2, 4
        assert_eq!(exec::<u32>(0x28411093, 0, 0), 16);
        // bext x1, x2, x3
        assert_eq!(exec::<u64>(0x483150B3, 1 << 40, 40), 1);
    }

    #[test]
    fn test_rv32_reserved_shift_bit() {
        // bseti with shamt 32 does not exist on RV32
        assert!(decode::<u32>(Instruction::new(0x2A011093)).is_none());
        assert!(decode::<u64>(Instruction::new(0x2A011093)).is_some());
    }
}

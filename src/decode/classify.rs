//! Bytecode classification.
//!
//! Maps any instruction word to the bytecode that dispatches it. The
//! mapping is pure and total: every encoding lands on some bytecode, with
//! [`Bytecode::Function`] / [`Bytecode::CFunction`] as the catch-all for
//! instructions executed through the precise handler table, and
//! [`Bytecode::Invalid`] for encodings that can never execute.

use crate::cpu::instruction::{ci_code, opcode, Instruction};
use crate::cpu::AddressType;

use super::bytecode::Bytecode;

/// Classify a compressed instruction.
fn classify_compressed<A: AddressType>(instr: Instruction) -> Bytecode {
    let ci = instr.compressed();
    let rv64 = A::is_rv64();

    match ci.opcode() {
        // Quadrant 0
        op if op == ci_code(0b000, 0b00) => {
            // All zero bits is the defined illegal instruction
            if ci.whole() == 0 {
                Bytecode::Invalid
            } else if ci.addi4spn_imm() != 0 {
                Bytecode::CAddi // C.ADDI4SPN
            } else {
                Bytecode::CFunction // reserved
            }
        }
        op if op == ci_code(0b010, 0b00) => Bytecode::CLdw, // C.LW
        op if op == ci_code(0b011, 0b00) => {
            if rv64 {
                Bytecode::CLdd // C.LD
            } else {
                Bytecode::CFunction // C.FLW
            }
        }
        op if op == ci_code(0b110, 0b00) => Bytecode::CStw, // C.SW
        op if op == ci_code(0b111, 0b00) => {
            if rv64 {
                Bytecode::CStd // C.SD
            } else {
                Bytecode::CFunction // C.FSW
            }
        }

        // Quadrant 1
        op if op == ci_code(0b000, 0b01) => {
            if ci.rd() != 0 {
                Bytecode::CAddi
            } else {
                Bytecode::CFunction // C.NOP
            }
        }
        op if op == ci_code(0b001, 0b01) => {
            if rv64 && ci.rd() == 0 {
                Bytecode::CFunction // reserved
            } else {
                Bytecode::CJalAddiw
            }
        }
        op if op == ci_code(0b010, 0b01) => {
            if ci.rd() != 0 {
                Bytecode::CLi
            } else {
                Bytecode::CFunction // hint
            }
        }
        op if op == ci_code(0b011, 0b01) => {
            if ci.rd() == 2 && ci.addi16sp_imm() != 0 {
                Bytecode::CAddi // C.ADDI16SP
            } else {
                Bytecode::CFunction // C.LUI
            }
        }
        op if op == ci_code(0b100, 0b01) => match ci.funct2_high() {
            // shamt[5] is reserved on RV32
            0x0 if rv64 || !ci.topbit() => Bytecode::CSrli,
            0x2 => Bytecode::CAndi,
            0x3 => {
                // C.SUB, C.XOR, C.OR, C.AND and the RV64 word forms
                match ci.funct2_low() | if ci.topbit() { 0x4 } else { 0 } {
                    0x1 => Bytecode::CXor,
                    0x2 => Bytecode::COr,
                    _ => Bytecode::CFunction,
                }
            }
            _ => Bytecode::CFunction, // C.SRAI
        },
        op if op == ci_code(0b101, 0b01) => Bytecode::CJmp,
        op if op == ci_code(0b110, 0b01) => Bytecode::CBeqz,
        op if op == ci_code(0b111, 0b01) => Bytecode::CBnez,

        // Quadrant 2
        op if op == ci_code(0b000, 0b10) => {
            if ci.rd() != 0 && (rv64 || !ci.topbit()) {
                Bytecode::CSlli
            } else {
                Bytecode::CFunction // hint
            }
        }
        op if op == ci_code(0b010, 0b10) => {
            if ci.rd() != 0 {
                Bytecode::CLdw // C.LWSP
            } else {
                Bytecode::CFunction
            }
        }
        op if op == ci_code(0b011, 0b10) => {
            if rv64 && ci.rd() != 0 {
                Bytecode::CLdd // C.LDSP
            } else {
                Bytecode::CFunction // C.FLWSP
            }
        }
        op if op == ci_code(0b100, 0b10) => {
            let topbit = ci.topbit();
            match (topbit, ci.rd() != 0, ci.rs2() != 0) {
                (false, true, false) => Bytecode::CJr,
                (true, true, false) => Bytecode::CJalr,
                (false, true, true) => Bytecode::CMv,
                (true, true, true) => Bytecode::CAdd,
                _ => Bytecode::CFunction, // C.EBREAK and reserved
            }
        }
        op if op == ci_code(0b110, 0b10) => Bytecode::CStw, // C.SWSP
        op if op == ci_code(0b111, 0b10) => {
            if rv64 {
                Bytecode::CStd // C.SDSP
            } else {
                Bytecode::CFunction // C.FSWSP
            }
        }
        // C.FLD, C.FSD, C.FLDSP, C.FSDSP and reserved encodings
        _ => Bytecode::CFunction,
    }
}

/// Classify an instruction word into its dispatch bytecode.
pub fn computed_index_for<A: AddressType>(instr: Instruction) -> Bytecode {
    if instr.is_compressed() {
        return classify_compressed::<A>(instr);
    }
    let rv64 = A::is_rv64();

    match instr.opcode() {
        opcode::LOAD => {
            let i = instr.itype();
            if i.rd == 0 {
                return Bytecode::Function;
            }
            match i.funct3 {
                0x0 => Bytecode::Ldb,
                0x1 => Bytecode::Ldh,
                0x2 => Bytecode::Ldw,
                0x3 if rv64 => Bytecode::Ldd,
                0x4 => Bytecode::Ldbu,
                0x5 => Bytecode::Ldhu,
                0x6 if rv64 => Bytecode::Ldwu,
                _ => Bytecode::Invalid,
            }
        }
        opcode::STORE => match instr.stype().funct3 {
            0x0 => Bytecode::Stb,
            0x1 => Bytecode::Sth,
            0x2 => Bytecode::Stw,
            0x3 if rv64 => Bytecode::Std,
            _ => Bytecode::Invalid,
        },
        opcode::BRANCH => match instr.btype().funct3 {
            0x0 => Bytecode::Beq,
            0x1 => Bytecode::Bne,
            0x4 => Bytecode::Blt,
            0x5 => Bytecode::Bge,
            0x6 => Bytecode::Bltu,
            0x7 => Bytecode::Bgeu,
            _ => Bytecode::Invalid,
        },
        opcode::LUI => {
            if instr.utype().rd == 0 {
                Bytecode::Function
            } else {
                Bytecode::Lui
            }
        }
        opcode::AUIPC => {
            if instr.utype().rd == 0 {
                Bytecode::Function
            } else {
                Bytecode::Auipc
            }
        }
        opcode::JAL => Bytecode::Jal,
        opcode::JALR if instr.funct3() == 0 => Bytecode::Jalr,
        opcode::JALR => Bytecode::Invalid,
        opcode::OP_IMM => {
            let i = instr.itype();
            if i.rd == 0 {
                return Bytecode::Function;
            }
            // shamt[5] is reserved on RV32
            let rv32_wide_shift = !rv64 && i.imm & 0x20 != 0;
            match i.funct3 {
                0x1 | 0x5 if rv32_wide_shift => Bytecode::Function,
                0x0 => {
                    if i.rs1 == 0 {
                        Bytecode::Li
                    } else if i.signed_imm() == 0 {
                        Bytecode::Mv
                    } else {
                        Bytecode::Addi
                    }
                }
                0x1 => match (i.high_bits(), i.imm) {
                    (0x000, _) => Bytecode::Slli,
                    (_, 0b0110_0000_0100) => Bytecode::SextB,
                    (_, 0b0110_0000_0101) => Bytecode::SextH,
                    (0x280, _) => Bytecode::Bseti,
                    _ => Bytecode::Function,
                },
                0x2 => Bytecode::Slti,
                0x3 => Bytecode::Sltiu,
                0x4 => Bytecode::Xori,
                0x5 => {
                    if i.high_bits() == 0x000 {
                        Bytecode::Srli
                    } else if i.is_srai() {
                        Bytecode::Srai
                    } else if i.high_bits() == 0x480 {
                        Bytecode::Bexti
                    } else {
                        Bytecode::Function
                    }
                }
                0x6 => Bytecode::Ori,
                _ => Bytecode::Andi,
            }
        }
        opcode::OP => {
            if instr.rd() == 0 {
                return Bytecode::Function;
            }
            match instr.rtype().jumptable_friendly_op() {
                0x000 => Bytecode::OpAdd,
                0x200 => Bytecode::OpSub,
                0x001 => Bytecode::OpSll,
                0x002 => Bytecode::OpSlt,
                0x003 => Bytecode::OpSltu,
                0x004 => Bytecode::OpXor,
                0x005 => Bytecode::OpSrl,
                0x006 => Bytecode::OpOr,
                0x007 => Bytecode::OpAnd,
                0x010 => Bytecode::OpMul,
                0x014 => Bytecode::OpDiv,
                0x015 => Bytecode::OpDivu,
                0x016 => Bytecode::OpRem,
                0x017 => Bytecode::OpRemu,
                // ZEXT.H is only encoded in OP on RV32
                0x044 if !rv64 && instr.rs2() == 0 => Bytecode::OpZextH,
                0x102 => Bytecode::OpSh1add,
                0x104 => Bytecode::OpSh2add,
                0x106 => Bytecode::OpSh3add,
                0x205 => Bytecode::OpSra,
                _ => Bytecode::Function,
            }
        }
        opcode::OP32 => {
            if !rv64 {
                return Bytecode::Invalid;
            }
            if instr.rd() == 0 {
                return Bytecode::Function;
            }
            match instr.rtype().jumptable_friendly_op() {
                0x000 => Bytecode::OpAddw,
                0x200 => Bytecode::OpSubw,
                0x010 => Bytecode::OpMulw,
                0x040 => Bytecode::OpAddUw,
                0x044 if instr.rs2() == 0 => Bytecode::OpZextH,
                0x102 => Bytecode::OpSh1addUw,
                0x104 => Bytecode::OpSh2addUw,
                _ => Bytecode::Function,
            }
        }
        opcode::OP_IMM32 => {
            if !rv64 {
                return Bytecode::Invalid;
            }
            let i = instr.itype();
            if i.rd == 0 {
                return Bytecode::Function;
            }
            match i.funct3 {
                0x0 => Bytecode::Addiw,
                0x1 if i.imm & 0xFE0 == 0x000 => Bytecode::Slliw,
                0x5 if i.imm & 0xFE0 == 0x000 => Bytecode::Srliw,
                0x5 if i.imm & 0xFE0 == 0x400 => Bytecode::Sraiw,
                _ => Bytecode::Function,
            }
        }
        opcode::SYSTEM => {
            let i = instr.itype();
            if i.funct3 == 0 && i.rs1 == 0 && i.rd == 0 {
                match i.imm {
                    0x000 => return Bytecode::Syscall,
                    // WFI and the custom STOP encoding
                    0x105 | 0x7FF => return Bytecode::Stop,
                    _ => {}
                }
            }
            Bytecode::System
        }
        opcode::MISC_MEM => Bytecode::Function,
        opcode::LOAD_FP => match instr.funct3() {
            0x2 => Bytecode::Flw,
            0x3 => Bytecode::Fld,
            0x6 if instr.vls().mop == 0 && instr.vls().lumop == 0 && instr.vls().nf == 0 => Bytecode::Vle32,
            0x0 | 0x5 | 0x6 | 0x7 => Bytecode::Function,
            _ => Bytecode::Invalid,
        },
        opcode::STORE_FP => match instr.funct3() {
            0x2 => Bytecode::Fsw,
            0x3 => Bytecode::Fsd,
            0x6 if instr.vls().mop == 0 && instr.vls().lumop == 0 && instr.vls().nf == 0 => Bytecode::Vse32,
            0x0 | 0x5 | 0x6 | 0x7 => Bytecode::Function,
            _ => Bytecode::Invalid,
        },
        opcode::FMADD => {
            if instr.r4type().funct2 < 2 {
                Bytecode::Fmadd
            } else {
                Bytecode::Function
            }
        }
        opcode::FMSUB | opcode::FNMADD | opcode::FNMSUB => Bytecode::Function,
        opcode::OP_FP => {
            if instr.r4type().funct2 >= 2 {
                return Bytecode::Function;
            }
            match instr.fpfunc() {
                0b00000 => Bytecode::Fadd,
                0b00001 => Bytecode::Fsub,
                0b00010 => Bytecode::Fmul,
                0b00011 => Bytecode::Fdiv,
                _ => Bytecode::Function,
            }
        }
        opcode::OP_V => {
            let vi = instr.opvv();
            match (vi.funct3, vi.funct6) {
                // OPFVV
                (0x1, 0b000000) => Bytecode::VfaddVv,
                // OPFVF
                (0x5, 0b100100) => Bytecode::VfmulVf,
                _ => Bytecode::Function,
            }
        }
        opcode::AMO => Bytecode::Function,
        // Unknown instructions can be custom-handled
        _ => Bytecode::Function,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify32(word: u32) -> Bytecode {
        computed_index_for::<u32>(Instruction::new(word))
    }

    fn classify64(word: u32) -> Bytecode {
        computed_index_for::<u64>(Instruction::new(word))
    }

    #[test]
    fn test_addi_family() {
        assert_eq!(classify32(0x00500093), Bytecode::Li); // addi x1, x0, 5
        assert_eq!(classify32(0x00010093), Bytecode::Mv); // addi x1, x2, 0
        assert_eq!(classify32(0x00510093), Bytecode::Addi); // addi x1, x2, 5
        assert_eq!(classify32(0x00000013), Bytecode::Function); // nop (rd = x0)
    }

    #[test]
    fn test_shift_immediates() {
        assert_eq!(classify32(0x00309093), Bytecode::Slli); // slli x1, x1, 3
        assert_eq!(classify32(0x4030D093), Bytecode::Srai);
        assert_eq!(classify32(0x0030D093), Bytecode::Srli);
        assert_eq!(classify32(0x60409093), Bytecode::SextB);
        assert_eq!(classify32(0x28309093), Bytecode::Bseti);
        assert_eq!(classify32(0x4830D093), Bytecode::Bexti);
        // clz is executed through the handler table
        assert_eq!(classify32(0x60009093), Bytecode::Function);
    }

    #[test]
    fn test_op_family() {
        assert_eq!(classify32(0x003100B3), Bytecode::OpAdd);
        assert_eq!(classify32(0x403100B3), Bytecode::OpSub);
        assert_eq!(classify32(0x023100B3), Bytecode::OpMul);
        assert_eq!(classify32(0x023140B3), Bytecode::OpDiv);
        assert_eq!(classify32(0x203120B3), Bytecode::OpSh1add);
        assert_eq!(classify32(0x003100B3 & !0xF80), Bytecode::Function); // rd = x0
    }

    #[test]
    fn test_width_dependent() {
        // ld x1, 0(x2)
        assert_eq!(classify32(0x00013083), Bytecode::Invalid);
        assert_eq!(classify64(0x00013083), Bytecode::Ldd);
        // addiw x1, x2, 1
        assert_eq!(classify32(0x0011009B), Bytecode::Invalid);
        assert_eq!(classify64(0x0011009B), Bytecode::Addiw);
        // addw x1, x2, x3
        assert_eq!(classify64(0x003100BB), Bytecode::OpAddw);
    }

    #[test]
    fn test_system() {
        assert_eq!(classify32(0x00000073), Bytecode::Syscall); // ecall
        assert_eq!(classify32(0x00100073), Bytecode::System); // ebreak
        assert_eq!(classify32(0x10500073), Bytecode::Stop); // wfi
        assert_eq!(classify32(0x7FF00073), Bytecode::Stop);
        assert_eq!(classify32(0xC00020F3), Bytecode::System); // rdcycle x1
    }

    #[test]
    fn test_control_flow() {
        assert_eq!(classify32(0xFE208CE3), Bytecode::Beq);
        assert_eq!(classify32(0x001000EF), Bytecode::Jal);
        assert_eq!(classify32(0x00008067), Bytecode::Jalr); // ret
    }

    #[test]
    fn test_compressed() {
        assert_eq!(classify32(0x0000), Bytecode::Invalid);
        assert_eq!(classify32(0x0808), Bytecode::CAddi); // c.addi4spn
        assert_eq!(classify32(0x557D), Bytecode::CLi);
        assert_eq!(classify32(0x7139), Bytecode::CAddi); // c.addi16sp
        assert_eq!(classify32(0x8082), Bytecode::CJr); // c.jr ra
        assert_eq!(classify32(0x9082), Bytecode::CJalr); // c.jalr ra
        assert_eq!(classify32(0x852E), Bytecode::CMv); // c.mv a0, a1
        assert_eq!(classify32(0x952E), Bytecode::CAdd); // c.add a0, a1
        assert_eq!(classify32(0x9002), Bytecode::CFunction); // c.ebreak
        assert_eq!(classify32(0x0001), Bytecode::CFunction); // c.nop
        assert_eq!(classify32(0x60A2), Bytecode::CFunction); // c.flwsp on RV32
        assert_eq!(classify64(0x60A2), Bytecode::CLdd); // c.ldsp on RV64
        assert_eq!(classify32(0x8D2D), Bytecode::CXor); // c.xor a0, a1
        assert_eq!(classify32(0x8D4D), Bytecode::COr); // c.or a0, a1
        assert_eq!(classify32(0x8D0D), Bytecode::CFunction); // c.sub a0, a1
    }

    #[test]
    fn test_total_on_sampled_words() {
        // Classification must never panic and must be deterministic.
        let mut state = 0x9E37_79B9_7F4A_7C15u64;
        for _ in 0..200_000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let word = (state >> 16) as u32;
            let a = classify32(word);
            let b = classify64(word);
            assert_eq!(a, classify32(word));
            assert_eq!(b, classify64(word));
            assert!((a as usize) < Bytecode::COUNT);
        }
    }
}

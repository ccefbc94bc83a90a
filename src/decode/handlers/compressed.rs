//! C extension.
//!
//! Control transfers have their own handlers since they link and jump by
//! two bytes. Every other compressed instruction executes as its 32-bit
//! expansion, which keeps a single implementation of each operation.

use super::base::pc_relative;
use super::{decode_one, illegal, print, InstructionHandler};
use crate::cpu::instruction::{ci_code, opcode, CompressedInstruction, Instruction, REG_RA, REG_SP, REG_ZERO};
use crate::cpu::{AddressType, ExceptionKind, MachineException, MachineResult};
use crate::machine::Machine;

const fn i_type(op: u32, rd: u32, funct3: u32, rs1: u32, imm: i32) -> u32 {
    ((imm as u32 & 0xFFF) << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | op
}

const fn s_type(op: u32, funct3: u32, rs1: u32, rs2: u32, imm: u32) -> u32 {
    (((imm >> 5) & 0x7F) << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | ((imm & 0x1F) << 7) | op
}

const fn r_type(op: u32, rd: u32, funct3: u32, rs1: u32, rs2: u32, funct7: u32) -> u32 {
    (funct7 << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | op
}

const fn u_type(op: u32, rd: u32, imm: i32) -> u32 {
    (imm as u32 & 0xFFFF_F000) | (rd << 7) | op
}

/// Mnemonic and 32-bit equivalent of a non-control compressed instruction.
fn expand_named<A: AddressType>(ci: CompressedInstruction) -> Option<(&'static str, Instruction)> {
    let rv64 = A::is_rv64();
    let (low, high) = (ci.creg_low(), ci.creg_high());
    let (name, word) = match ci.opcode() {
        c if c == ci_code(0b000, 0b00) => {
            let imm = ci.addi4spn_imm();
            if imm == 0 {
                return None;
            }
            ("C.ADDI4SPN", i_type(opcode::OP_IMM, low, 0x0, REG_SP, imm as i32))
        }
        c if c == ci_code(0b001, 0b00) => ("C.FLD", i_type(opcode::LOAD_FP, low, 0x3, high, ci.double_offset() as i32)),
        c if c == ci_code(0b010, 0b00) => ("C.LW", i_type(opcode::LOAD, low, 0x2, high, ci.word_offset() as i32)),
        c if c == ci_code(0b011, 0b00) => {
            if rv64 {
                ("C.LD", i_type(opcode::LOAD, low, 0x3, high, ci.double_offset() as i32))
            } else {
                ("C.FLW", i_type(opcode::LOAD_FP, low, 0x2, high, ci.word_offset() as i32))
            }
        }
        c if c == ci_code(0b101, 0b00) => ("C.FSD", s_type(opcode::STORE_FP, 0x3, high, low, ci.double_offset())),
        c if c == ci_code(0b110, 0b00) => ("C.SW", s_type(opcode::STORE, 0x2, high, low, ci.word_offset())),
        c if c == ci_code(0b111, 0b00) => {
            if rv64 {
                ("C.SD", s_type(opcode::STORE, 0x3, high, low, ci.double_offset()))
            } else {
                ("C.FSW", s_type(opcode::STORE_FP, 0x2, high, low, ci.word_offset()))
            }
        }
        c if c == ci_code(0b000, 0b01) => {
            let name = if ci.rd() == REG_ZERO { "C.NOP" } else { "C.ADDI" };
            (name, i_type(opcode::OP_IMM, ci.rd(), 0x0, ci.rd(), ci.ci_imm()))
        }
        c if c == ci_code(0b001, 0b01) && rv64 => {
            if ci.rd() == REG_ZERO {
                return None;
            }
            ("C.ADDIW", i_type(opcode::OP_IMM32, ci.rd(), 0x0, ci.rd(), ci.ci_imm()))
        }
        c if c == ci_code(0b010, 0b01) => ("C.LI", i_type(opcode::OP_IMM, ci.rd(), 0x0, REG_ZERO, ci.ci_imm())),
        c if c == ci_code(0b011, 0b01) => {
            if ci.rd() == REG_SP {
                let imm = ci.addi16sp_imm();
                if imm == 0 {
                    return None;
                }
                ("C.ADDI16SP", i_type(opcode::OP_IMM, REG_SP, 0x0, REG_SP, imm))
            } else {
                if ci.ci_imm() == 0 {
                    return None;
                }
                ("C.LUI", u_type(opcode::LUI, ci.rd(), ci.lui_imm()))
            }
        }
        c if c == ci_code(0b100, 0b01) => return expand_arith::<A>(ci),
        c if c == ci_code(0b000, 0b10) => {
            if !rv64 && ci.topbit() {
                return None;
            }
            ("C.SLLI", i_type(opcode::OP_IMM, ci.rd(), 0x1, ci.rd(), ci.shift_imm() as i32))
        }
        c if c == ci_code(0b001, 0b10) => ("C.FLDSP", i_type(opcode::LOAD_FP, ci.rd(), 0x3, REG_SP, ci.ldsp_offset() as i32)),
        c if c == ci_code(0b010, 0b10) => {
            if ci.rd() == REG_ZERO {
                return None;
            }
            ("C.LWSP", i_type(opcode::LOAD, ci.rd(), 0x2, REG_SP, ci.lwsp_offset() as i32))
        }
        c if c == ci_code(0b011, 0b10) => {
            if !rv64 {
                ("C.FLWSP", i_type(opcode::LOAD_FP, ci.rd(), 0x2, REG_SP, ci.lwsp_offset() as i32))
            } else if ci.rd() == REG_ZERO {
                return None;
            } else {
                ("C.LDSP", i_type(opcode::LOAD, ci.rd(), 0x3, REG_SP, ci.ldsp_offset() as i32))
            }
        }
        c if c == ci_code(0b100, 0b10) => match (ci.topbit(), ci.rd(), ci.rs2()) {
            (false, _, rs2) if rs2 != 0 => ("C.MV", r_type(opcode::OP, ci.rd(), 0x0, REG_ZERO, rs2, 0)),
            (true, rd, rs2) if rd != 0 && rs2 != 0 => ("C.ADD", r_type(opcode::OP, rd, 0x0, rd, rs2, 0)),
            // Same encoding space as C.ADD with rd = x0: a hint
            (true, 0, rs2) if rs2 != 0 => ("C.ADD", r_type(opcode::OP, 0, 0x0, 0, rs2, 0)),
            _ => return None,
        },
        c if c == ci_code(0b101, 0b10) => ("C.FSDSP", s_type(opcode::STORE_FP, 0x3, REG_SP, ci.rs2(), ci.sdsp_offset())),
        c if c == ci_code(0b110, 0b10) => ("C.SWSP", s_type(opcode::STORE, 0x2, REG_SP, ci.rs2(), ci.swsp_offset())),
        c if c == ci_code(0b111, 0b10) => {
            if rv64 {
                ("C.SDSP", s_type(opcode::STORE, 0x3, REG_SP, ci.rs2(), ci.sdsp_offset()))
            } else {
                ("C.FSWSP", s_type(opcode::STORE_FP, 0x2, REG_SP, ci.rs2(), ci.swsp_offset()))
            }
        }
        _ => return None,
    };
    Some((name, Instruction::new(word)))
}

/// Quadrant 1, funct3 `100`: shifts, ANDI and register arithmetic.
fn expand_arith<A: AddressType>(ci: CompressedInstruction) -> Option<(&'static str, Instruction)> {
    let rv64 = A::is_rv64();
    let (rd, rs2) = (ci.creg_high(), ci.creg_low());
    let shamt = ci.shift_imm();
    if ci.funct2_high() < 2 && !rv64 && ci.topbit() {
        return None;
    }
    let (name, word) = match (ci.funct2_high(), ci.topbit(), ci.funct2_low()) {
        (0b00, _, _) => ("C.SRLI", i_type(opcode::OP_IMM, rd, 0x5, rd, shamt as i32)),
        (0b01, _, _) => ("C.SRAI", i_type(opcode::OP_IMM, rd, 0x5, rd, (0x400 | shamt) as i32)),
        (0b10, _, _) => ("C.ANDI", i_type(opcode::OP_IMM, rd, 0x7, rd, ci.ci_imm())),
        (0b11, false, 0b00) => ("C.SUB", r_type(opcode::OP, rd, 0x0, rd, rs2, 0x20)),
        (0b11, false, 0b01) => ("C.XOR", r_type(opcode::OP, rd, 0x4, rd, rs2, 0)),
        (0b11, false, 0b10) => ("C.OR", r_type(opcode::OP, rd, 0x6, rd, rs2, 0)),
        (0b11, false, 0b11) => ("C.AND", r_type(opcode::OP, rd, 0x7, rd, rs2, 0)),
        (0b11, true, 0b00) if rv64 => ("C.SUBW", r_type(opcode::OP32, rd, 0x0, rd, rs2, 0x20)),
        (0b11, true, 0b01) if rv64 => ("C.ADDW", r_type(opcode::OP32, rd, 0x0, rd, rs2, 0)),
        _ => return None,
    };
    Some((name, Instruction::new(word)))
}

/// 32-bit equivalent of a compressed instruction. `None` for control
/// transfers, C.EBREAK and reserved encodings.
fn expand<A: AddressType>(ci: CompressedInstruction) -> Option<Instruction> {
    expand_named::<A>(ci).map(|(_, wide)| wide)
}

fn execute_expanded<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    let wide = expand::<A>(instr.compressed())
        .ok_or_else(|| MachineException::of(ExceptionKind::IllegalOpcode, instr.whole() as u64))?;
    decode_one::<A>(wide).execute(m, wide)
}

fn print_expanded<A: AddressType>(name: &'static str, instr: Instruction, pc: u64) -> String {
    match expand::<A>(instr.compressed()) {
        Some(wide) => (decode_one::<A>(wide).printer)(name, wide, pc),
        None => print::raw(name, instr, pc),
    }
}

fn print_expanded32(name: &'static str, instr: Instruction, pc: u64) -> String {
    print_expanded::<u32>(name, instr, pc)
}

fn print_expanded64(name: &'static str, instr: Instruction, pc: u64) -> String {
    print_expanded::<u64>(name, instr, pc)
}

fn c_j<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    let dest = pc_relative(m, instr.compressed().jump_imm());
    m.jump_to(dest, 2)
}

fn c_jal<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    let link = pc_relative(m, 2);
    let dest = pc_relative(m, instr.compressed().jump_imm());
    m.jump_to(dest, 2)?;
    m.cpu.registers_mut().set_u64(REG_RA, link);
    Ok(())
}

fn c_jr<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    let dest = m.cpu.registers().get_u64(instr.compressed().rd()) & !1;
    m.jump_to(dest, 2)
}

fn c_jalr<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    let link = pc_relative(m, 2);
    let dest = m.cpu.registers().get_u64(instr.compressed().rd()) & !1;
    m.jump_to(dest, 2)?;
    m.cpu.registers_mut().set_u64(REG_RA, link);
    Ok(())
}

fn c_beqz<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    let ci = instr.compressed();
    if m.cpu.registers().get_u64(ci.creg_high()) == 0 {
        let dest = pc_relative(m, ci.branch_imm());
        m.jump_to(dest, 2)?;
    }
    Ok(())
}

fn c_bnez<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    let ci = instr.compressed();
    if m.cpu.registers().get_u64(ci.creg_high()) != 0 {
        let dest = pc_relative(m, ci.branch_imm());
        m.jump_to(dest, 2)?;
    }
    Ok(())
}

fn c_ebreak<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    m.system(instr)
}

fn print_c_jump(name: &'static str, instr: Instruction, pc: u64) -> String {
    let offset = instr.compressed().jump_imm();
    format!("{} PC{:+} (0x{:X})", name, offset, pc.wrapping_add(offset as i64 as u64))
}

fn print_c_branch(name: &'static str, instr: Instruction, pc: u64) -> String {
    let ci = instr.compressed();
    let offset = ci.branch_imm();
    format!(
        "{} {}, PC{:+} (0x{:X})",
        name,
        crate::cpu::registers::reg_name(ci.creg_high()),
        offset,
        pc.wrapping_add(offset as i64 as u64)
    )
}

fn print_c_register(name: &'static str, instr: Instruction, _: u64) -> String {
    format!("{} {}", name, crate::cpu::registers::reg_name(instr.compressed().rd()))
}

/// Decode a compressed instruction. Total.
pub(super) fn decode<A: AddressType>(instr: Instruction) -> InstructionHandler<A> {
    let ci = instr.compressed();
    let control = match ci.opcode() {
        c if c == ci_code(0b001, 0b01) && !A::is_rv64() => {
            Some(InstructionHandler::new("C.JAL", c_jal::<A>, print_c_jump))
        }
        c if c == ci_code(0b101, 0b01) => Some(InstructionHandler::new("C.J", c_j::<A>, print_c_jump)),
        c if c == ci_code(0b110, 0b01) => Some(InstructionHandler::new("C.BEQZ", c_beqz::<A>, print_c_branch)),
        c if c == ci_code(0b111, 0b01) => Some(InstructionHandler::new("C.BNEZ", c_bnez::<A>, print_c_branch)),
        c if c == ci_code(0b100, 0b10) && ci.rs2() == 0 => match (ci.topbit(), ci.rd()) {
            (false, 0) => Some(illegal::<A>()),
            (false, _) => Some(InstructionHandler::new("C.JR", c_jr::<A>, print_c_register)),
            (true, 0) => Some(InstructionHandler::new("C.EBREAK", c_ebreak::<A>, print::none)),
            (true, _) => Some(InstructionHandler::new("C.JALR", c_jalr::<A>, print_c_register)),
        },
        _ => None,
    };
    if let Some(handler) = control {
        return handler;
    }
    let printer = if A::is_rv64() { print_expanded64 } else { print_expanded32 };
    match expand_named::<A>(ci) {
        Some((name, _)) => InstructionHandler::new(name, execute_expanded::<A>, printer),
        None => illegal::<A>(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{Machine, MachineOptions};

    fn exec<A: AddressType>(m: &mut Machine<A>, half: u16) -> MachineResult<()> {
        let instr = Instruction::new(half as u32);
        decode::<A>(instr).execute(m, instr)
    }

    #[test]
    fn test_expansions_match_wide_forms() {
        // c.li a0, 1 => addi a0, zero, 1
        assert_eq!(expand::<u32>(CompressedInstruction::new(0x4505)), Some(Instruction::new(0x00100513)));
        // c.mv a0, a1 => add a0, zero, a1
        assert_eq!(expand::<u32>(CompressedInstruction::new(0x852E)), Some(Instruction::new(0x00B00533)));
        // c.lw a1, 4(a0) => lw a1, 4(a0)
        assert_eq!(expand::<u32>(CompressedInstruction::new(0x414C)), Some(Instruction::new(0x00452583)));
        // c.sdsp ra, 8(sp) => sd ra, 8(sp)
        assert_eq!(expand::<u64>(CompressedInstruction::new(0xE406)), Some(Instruction::new(0x00113423)));
        // c.sub a0, a1
        assert_eq!(expand::<u32>(CompressedInstruction::new(0x8D0D)), Some(Instruction::new(0x40B50533)));
    }

    #[test]
    fn test_width_dependent_quadrant_zero() {
        // 0x6108: c.ld a0, 0(a0) on RV64, c.flw fa0, 0(a0) on RV32
        assert_eq!(decode::<u64>(Instruction::new(0x6108)).name, "C.LD");
        assert_eq!(decode::<u32>(Instruction::new(0x6108)).name, "C.FLW");
    }

    #[test]
    fn test_reserved_encodings() {
        assert!(decode::<u32>(Instruction::new(0x0000)).is_illegal());
        // c.jr x0
        assert!(decode::<u32>(Instruction::new(0x8002)).is_illegal());
        // c.lwsp x0
        assert!(decode::<u32>(Instruction::new(0x4002)).is_illegal());
        // c.addi16sp with zero immediate
        assert!(decode::<u32>(Instruction::new(0x6101)).is_illegal());
        // c.slli with shamt[5] on RV32
        assert!(decode::<u32>(Instruction::new(0x1082)).is_illegal());
        assert_eq!(decode::<u64>(Instruction::new(0x1082)).name, "C.SLLI");
    }

    #[test]
    fn test_execute_expanded_and_control() {
        let mut m = Machine::<u32>::new(MachineOptions::default());
        m.cpu.set_pc(0x1000);
        // c.li a0, 1
        exec(&mut m, 0x4505).unwrap();
        assert_eq!(m.cpu.reg(10), 1);
        // c.bnez a0, +8 leaves pc at target - 2
        exec(&mut m, 0xE501).unwrap();
        assert_eq!(m.cpu.pc(), 0x1006);
        // c.jalr a0 links past the two-byte instruction
        m.cpu.set_pc(0x2000);
        m.cpu.set_reg(10, 0x3000);
        exec(&mut m, 0x9502).unwrap();
        assert_eq!(m.cpu.reg(1), 0x2002);
        assert_eq!(m.cpu.pc(), 0x2FFE);
    }

    #[test]
    fn test_printing() {
        let lw = Instruction::new(0x414C);
        assert_eq!(decode::<u32>(lw).print(lw, 0), "C.LW a1, 4(a0)");
        let j = Instruction::new(0xBFFD);
        assert_eq!(decode::<u32>(j).print(j, 0x100), "C.J PC-2 (0xFE)");
    }
}

//! RV32I/RV64I base integer instructions, Zicsr and Zifencei.

use super::{print, InstructionHandler};
use crate::cpu::alu;
use crate::cpu::instruction::{opcode, Instruction};
use crate::cpu::AddressType;
use crate::machine::Machine;

/// Effective address `rs1 + imm` at guest width.
#[inline]
pub(super) fn effective_address<A: AddressType>(m: &Machine<A>, rs1: u32, imm: i32) -> u64 {
    alu::add_imm(m.cpu.reg(rs1), imm as i64).to_u64()
}

/// `pc + offset` at guest width.
#[inline]
pub(super) fn pc_relative<A: AddressType>(m: &Machine<A>, offset: i32) -> u64 {
    alu::add_imm(m.cpu.registers().pc, offset as i64).to_u64()
}

fn load_address<A: AddressType>(m: &Machine<A>, i: Instruction) -> u64 {
    let i = i.itype();
    effective_address(m, i.rs1, i.signed_imm())
}

fn store_address<A: AddressType>(m: &Machine<A>, i: Instruction) -> u64 {
    let s = i.stype();
    effective_address(m, s.rs1, s.signed_imm())
}

fn branch<A: AddressType>(m: &mut Machine<A>, i: Instruction, taken: fn(A, A) -> bool) -> crate::cpu::MachineResult<()> {
    let b = i.btype();
    if taken(m.cpu.reg(b.rs1), m.cpu.reg(b.rs2)) {
        let dest = pc_relative(m, b.signed_imm());
        m.jump_to(dest, 4)?;
    }
    Ok(())
}

/// Register/register operation `rd = f(rs1, rs2)`.
macro_rules! op {
    ($name:expr, $f:expr) => {
        InstructionHandler::<A>::new(
            $name,
            |m, i| {
                let r = i.rtype();
                let value = ($f)(m.cpu.reg(r.rs1), m.cpu.reg(r.rs2));
                m.cpu.set_reg(r.rd, value);
                Ok(())
            },
            print::rtype,
        )
    };
}

/// Register/immediate operation `rd = f(rs1, sext(imm))`.
macro_rules! op_imm {
    ($name:expr, $f:expr) => {
        InstructionHandler::<A>::new(
            $name,
            |m, i| {
                let it = i.itype();
                let value = ($f)(m.cpu.reg(it.rs1), A::from_i64(it.signed_imm() as i64));
                m.cpu.set_reg(it.rd, value);
                Ok(())
            },
            print::itype,
        )
    };
}

/// Shift by immediate, `rd = f(rs1, shamt)`.
macro_rules! shift_imm {
    ($name:expr, $f:expr) => {
        InstructionHandler::<A>::new(
            $name,
            |m, i| {
                let it = i.itype();
                let value = ($f)(m.cpu.reg(it.rs1), A::from_u64(it.shift64_imm() as u64));
                m.cpu.set_reg(it.rd, value);
                Ok(())
            },
            print::shift,
        )
    };
}

pub(super) use {op, shift_imm};

/// Mask of reserved shift-immediate bits that must be zero.
fn shift_reserved<A: AddressType>() -> u32 {
    if A::is_rv64() {
        0x3C0
    } else {
        0x3E0
    }
}

pub(super) fn decode<A: AddressType>(instr: Instruction) -> Option<InstructionHandler<A>> {
    let rv64 = A::is_rv64();
    let handler = match instr.opcode() {
        opcode::LOAD => match instr.funct3() {
            0x0 => InstructionHandler::<A>::new(
                "LB",
                |m, i| {
                    let v: u8 = m.memory.read(load_address(m, i))?;
                    m.cpu.registers_mut().set_i64(i.rd(), v as i8 as i64);
                    Ok(())
                },
                print::load,
            ),
            0x1 => InstructionHandler::<A>::new(
                "LH",
                |m, i| {
                    let v: u16 = m.memory.read(load_address(m, i))?;
                    m.cpu.registers_mut().set_i64(i.rd(), v as i16 as i64);
                    Ok(())
                },
                print::load,
            ),
            0x2 => InstructionHandler::<A>::new(
                "LW",
                |m, i| {
                    let v: u32 = m.memory.read(load_address(m, i))?;
                    m.cpu.registers_mut().set_i64(i.rd(), v as i32 as i64);
                    Ok(())
                },
                print::load,
            ),
            0x3 if rv64 => InstructionHandler::<A>::new(
                "LD",
                |m, i| {
                    let v: u64 = m.memory.read(load_address(m, i))?;
                    m.cpu.registers_mut().set_u64(i.rd(), v);
                    Ok(())
                },
                print::load,
            ),
            0x4 => InstructionHandler::<A>::new(
                "LBU",
                |m, i| {
                    let v: u8 = m.memory.read(load_address(m, i))?;
                    m.cpu.registers_mut().set_u64(i.rd(), v as u64);
                    Ok(())
                },
                print::load,
            ),
            0x5 => InstructionHandler::<A>::new(
                "LHU",
                |m, i| {
                    let v: u16 = m.memory.read(load_address(m, i))?;
                    m.cpu.registers_mut().set_u64(i.rd(), v as u64);
                    Ok(())
                },
                print::load,
            ),
            0x6 if rv64 => InstructionHandler::<A>::new(
                "LWU",
                |m, i| {
                    let v: u32 = m.memory.read(load_address(m, i))?;
                    m.cpu.registers_mut().set_u64(i.rd(), v as u64);
                    Ok(())
                },
                print::load,
            ),
            _ => return None,
        },

        opcode::STORE => match instr.funct3() {
            0x0 => InstructionHandler::<A>::new(
                "SB",
                |m, i| {
                    let addr = store_address(m, i);
                    m.memory.write(addr, m.cpu.registers().get_u64(i.stype().rs2) as u8)
                },
                print::store,
            ),
            0x1 => InstructionHandler::<A>::new(
                "SH",
                |m, i| {
                    let addr = store_address(m, i);
                    m.memory.write(addr, m.cpu.registers().get_u64(i.stype().rs2) as u16)
                },
                print::store,
            ),
            0x2 => InstructionHandler::<A>::new(
                "SW",
                |m, i| {
                    let addr = store_address(m, i);
                    m.memory.write(addr, m.cpu.registers().get_u64(i.stype().rs2) as u32)
                },
                print::store,
            ),
            0x3 if rv64 => InstructionHandler::<A>::new(
                "SD",
                |m, i| {
                    let addr = store_address(m, i);
                    m.memory.write(addr, m.cpu.registers().get_u64(i.stype().rs2))
                },
                print::store,
            ),
            _ => return None,
        },

        opcode::BRANCH => match instr.funct3() {
            0x0 => InstructionHandler::<A>::new("BEQ", |m, i| branch(m, i, |a, b| a == b), print::branch),
            0x1 => InstructionHandler::<A>::new("BNE", |m, i| branch(m, i, |a, b| a != b), print::branch),
            0x4 => InstructionHandler::<A>::new(
                "BLT",
                |m, i| branch(m, i, |a: A, b: A| a.to_i64() < b.to_i64()),
                print::branch,
            ),
            0x5 => InstructionHandler::<A>::new(
                "BGE",
                |m, i| branch(m, i, |a: A, b: A| a.to_i64() >= b.to_i64()),
                print::branch,
            ),
            0x6 => InstructionHandler::<A>::new("BLTU", |m, i| branch(m, i, |a, b| a < b), print::branch),
            0x7 => InstructionHandler::<A>::new("BGEU", |m, i| branch(m, i, |a, b| a >= b), print::branch),
            _ => return None,
        },

        opcode::JAL => InstructionHandler::<A>::new(
            "JAL",
            |m, i| {
                let j = i.jtype();
                let link = pc_relative(m, 4);
                let dest = pc_relative(m, j.jump_offset());
                m.jump_to(dest, 4)?;
                m.cpu.registers_mut().set_u64(j.rd, link);
                Ok(())
            },
            print::jal,
        ),
        opcode::JALR if instr.funct3() == 0 => InstructionHandler::<A>::new(
            "JALR",
            |m, i| {
                let it = i.itype();
                let dest = effective_address(m, it.rs1, it.signed_imm()) & !1;
                let link = pc_relative(m, 4);
                m.jump_to(dest, 4)?;
                m.cpu.registers_mut().set_u64(it.rd, link);
                Ok(())
            },
            print::load,
        ),

        opcode::LUI => InstructionHandler::<A>::new(
            "LUI",
            |m, i| {
                let u = i.utype();
                m.cpu.registers_mut().set_i64(u.rd, u.upper_imm() as i64);
                Ok(())
            },
            print::utype,
        ),
        opcode::AUIPC => InstructionHandler::<A>::new(
            "AUIPC",
            |m, i| {
                let u = i.utype();
                let value = pc_relative(m, u.upper_imm());
                m.cpu.registers_mut().set_u64(u.rd, value);
                Ok(())
            },
            print::utype,
        ),

        opcode::OP_IMM => {
            let i = instr.itype();
            match i.funct3 {
                0x0 => op_imm!("ADDI", alu::add::<A>),
                0x2 => op_imm!("SLTI", alu::slt::<A>),
                0x3 => op_imm!("SLTIU", alu::sltu::<A>),
                0x4 => op_imm!("XORI", |a: A, b: A| A::from_u64(a.to_u64() ^ b.to_u64())),
                0x6 => op_imm!("ORI", |a: A, b: A| A::from_u64(a.to_u64() | b.to_u64())),
                0x7 => op_imm!("ANDI", |a: A, b: A| A::from_u64(a.to_u64() & b.to_u64())),
                0x1 if i.imm & (0xC00 | shift_reserved::<A>()) == 0 => shift_imm!("SLLI", alu::sll::<A>),
                0x5 if i.imm & (0xC00 | shift_reserved::<A>()) == 0 => shift_imm!("SRLI", alu::srl::<A>),
                0x5 if i.imm & (0xC00 | shift_reserved::<A>()) == 0x400 => shift_imm!("SRAI", alu::sra::<A>),
                _ => return None,
            }
        }

        opcode::OP => match instr.rtype().jumptable_friendly_op() {
            0x000 => op!("ADD", alu::add::<A>),
            0x200 => op!("SUB", alu::sub::<A>),
            0x001 => op!("SLL", alu::sll::<A>),
            0x002 => op!("SLT", alu::slt::<A>),
            0x003 => op!("SLTU", alu::sltu::<A>),
            0x004 => op!("XOR", |a: A, b: A| A::from_u64(a.to_u64() ^ b.to_u64())),
            0x005 => op!("SRL", alu::srl::<A>),
            0x205 => op!("SRA", alu::sra::<A>),
            0x006 => op!("OR", |a: A, b: A| A::from_u64(a.to_u64() | b.to_u64())),
            0x007 => op!("AND", |a: A, b: A| A::from_u64(a.to_u64() & b.to_u64())),
            _ => return None,
        },

        opcode::OP32 if rv64 => match instr.rtype().jumptable_friendly_op() {
            0x000 => op!("ADDW", alu::addw::<A>),
            0x200 => op!("SUBW", alu::subw::<A>),
            0x001 => op!("SLLW", |a: A, b: A| alu::sllw(a, b.to_u64() as u32)),
            0x005 => op!("SRLW", |a: A, b: A| alu::srlw(a, b.to_u64() as u32)),
            0x205 => op!("SRAW", |a: A, b: A| alu::sraw(a, b.to_u64() as u32)),
            _ => return None,
        },
        opcode::OP_IMM32 if rv64 => {
            let i = instr.itype();
            match i.funct3 {
                0x0 => op_imm!("ADDIW", alu::addw::<A>),
                0x1 if i.imm & 0xFE0 == 0 => {
                    shift_imm!("SLLIW", |a: A, b: A| alu::sllw(a, b.to_u64() as u32))
                }
                0x5 if i.imm & 0xFE0 == 0 => {
                    shift_imm!("SRLIW", |a: A, b: A| alu::srlw(a, b.to_u64() as u32))
                }
                0x5 if i.imm & 0xFE0 == 0x400 => {
                    shift_imm!("SRAIW", |a: A, b: A| alu::sraw(a, b.to_u64() as u32))
                }
                _ => return None,
            }
        }

        opcode::MISC_MEM => match instr.funct3() {
            0x0 => InstructionHandler::<A>::new("FENCE", |_, _| Ok(()), print::none),
            0x1 => InstructionHandler::<A>::new("FENCE.I", |_, _| Ok(()), print::none),
            _ => return None,
        },

        opcode::SYSTEM => decode_system::<A>(instr)?,
        _ => return None,
    };
    Some(handler)
}

fn system<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> crate::cpu::MachineResult<()> {
    m.system(instr)
}

fn decode_system<A: AddressType>(instr: Instruction) -> Option<InstructionHandler<A>> {
    let i = instr.itype();
    let handler = match i.funct3 {
        0x0 if i.rd == 0 && i.rs1 == 0 => match i.imm {
            0x000 => InstructionHandler::<A>::new("ECALL", system::<A>, print::none),
            0x001 => InstructionHandler::<A>::new("EBREAK", system::<A>, print::none),
            0x105 => InstructionHandler::<A>::new("WFI", system::<A>, print::none),
            0x7FF => InstructionHandler::<A>::new("STOP", system::<A>, print::none),
            _ => return None,
        },
        0x1 => InstructionHandler::<A>::new("CSRRW", system::<A>, print::csr),
        0x2 => InstructionHandler::<A>::new("CSRRS", system::<A>, print::csr),
        0x3 => InstructionHandler::<A>::new("CSRRC", system::<A>, print::csr),
        0x5 => InstructionHandler::<A>::new("CSRRWI", system::<A>, print::csr),
        0x6 => InstructionHandler::<A>::new("CSRRSI", system::<A>, print::csr),
        0x7 => InstructionHandler::<A>::new("CSRRCI", system::<A>, print::csr),
        _ => return None,
    };
    Some(handler)
}

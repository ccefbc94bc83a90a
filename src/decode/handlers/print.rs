//! Instruction printers, one per operand format.

use crate::cpu::instruction::Instruction;
use crate::cpu::registers::{freg_name, reg_name};
use crate::machine::system::csr_name;

fn target(pc: u64, offset: i32) -> u64 {
    pc.wrapping_add(offset as i64 as u64)
}

pub(super) fn raw(name: &'static str, instr: Instruction, _: u64) -> String {
    format!("{} 0x{:X}", name, instr.whole())
}

pub(super) fn none(name: &'static str, _: Instruction, _: u64) -> String {
    name.to_string()
}

pub(super) fn rtype(name: &'static str, instr: Instruction, _: u64) -> String {
    let r = instr.rtype();
    format!("{} {}, {}, {}", name, reg_name(r.rd), reg_name(r.rs1), reg_name(r.rs2))
}

pub(super) fn unary(name: &'static str, instr: Instruction, _: u64) -> String {
    format!("{} {}, {}", name, reg_name(instr.rd()), reg_name(instr.rs1()))
}

pub(super) fn itype(name: &'static str, instr: Instruction, _: u64) -> String {
    let i = instr.itype();
    format!("{} {}, {}, {}", name, reg_name(i.rd), reg_name(i.rs1), i.signed_imm())
}

pub(super) fn shift(name: &'static str, instr: Instruction, _: u64) -> String {
    let i = instr.itype();
    format!("{} {}, {}, {}", name, reg_name(i.rd), reg_name(i.rs1), i.shift64_imm())
}

pub(super) fn load(name: &'static str, instr: Instruction, _: u64) -> String {
    let i = instr.itype();
    format!("{} {}, {}({})", name, reg_name(i.rd), i.signed_imm(), reg_name(i.rs1))
}

pub(super) fn store(name: &'static str, instr: Instruction, _: u64) -> String {
    let s = instr.stype();
    format!("{} {}, {}({})", name, reg_name(s.rs2), s.signed_imm(), reg_name(s.rs1))
}

pub(super) fn branch(name: &'static str, instr: Instruction, pc: u64) -> String {
    let b = instr.btype();
    format!(
        "{} {}, {}, PC{:+} (0x{:X})",
        name,
        reg_name(b.rs1),
        reg_name(b.rs2),
        b.signed_imm(),
        target(pc, b.signed_imm())
    )
}

pub(super) fn jal(name: &'static str, instr: Instruction, pc: u64) -> String {
    let j = instr.jtype();
    format!(
        "{} {}, PC{:+} (0x{:X})",
        name,
        reg_name(j.rd),
        j.jump_offset(),
        target(pc, j.jump_offset())
    )
}

pub(super) fn utype(name: &'static str, instr: Instruction, _: u64) -> String {
    let u = instr.utype();
    format!("{} {}, 0x{:X}", name, reg_name(u.rd), u.imm)
}

pub(super) fn csr(name: &'static str, instr: Instruction, _: u64) -> String {
    let i = instr.itype();
    let csr = match csr_name(i.imm) {
        Some(csr) => csr.to_string(),
        None => format!("0x{:03X}", i.imm),
    };
    if i.funct3 & 0x4 != 0 {
        format!("{} {}, {}, {}", name, reg_name(i.rd), csr, i.rs1)
    } else {
        format!("{} {}, {}, {}", name, reg_name(i.rd), csr, reg_name(i.rs1))
    }
}

pub(super) fn amo(name: &'static str, instr: Instruction, _: u64) -> String {
    let a = instr.atype();
    format!("{} {}, {}, ({})", name, reg_name(a.rd), reg_name(a.rs2), reg_name(a.rs1))
}

pub(super) fn load_reserved(name: &'static str, instr: Instruction, _: u64) -> String {
    let a = instr.atype();
    format!("{} {}, ({})", name, reg_name(a.rd), reg_name(a.rs1))
}

pub(super) fn fp_load(name: &'static str, instr: Instruction, _: u64) -> String {
    let i = instr.itype();
    format!("{} {}, {}({})", name, freg_name(i.rd), i.signed_imm(), reg_name(i.rs1))
}

pub(super) fn fp_store(name: &'static str, instr: Instruction, _: u64) -> String {
    let s = instr.stype();
    format!("{} {}, {}({})", name, freg_name(s.rs2), s.signed_imm(), reg_name(s.rs1))
}

pub(super) fn fp_rtype(name: &'static str, instr: Instruction, _: u64) -> String {
    let r = instr.rtype();
    format!("{} {}, {}, {}", name, freg_name(r.rd), freg_name(r.rs1), freg_name(r.rs2))
}

pub(super) fn fp_r4(name: &'static str, instr: Instruction, _: u64) -> String {
    let r = instr.r4type();
    format!(
        "{} {}, {}, {}, {}",
        name,
        freg_name(r.rd),
        freg_name(r.rs1),
        freg_name(r.rs2),
        freg_name(r.rs3)
    )
}

pub(super) fn fp_unary(name: &'static str, instr: Instruction, _: u64) -> String {
    format!("{} {}, {}", name, freg_name(instr.rd()), freg_name(instr.rs1()))
}

/// Integer destination, FP sources.
pub(super) fn fp_to_int(name: &'static str, instr: Instruction, _: u64) -> String {
    format!("{} {}, {}", name, reg_name(instr.rd()), freg_name(instr.rs1()))
}

pub(super) fn fp_compare(name: &'static str, instr: Instruction, _: u64) -> String {
    let r = instr.rtype();
    format!("{} {}, {}, {}", name, reg_name(r.rd), freg_name(r.rs1), freg_name(r.rs2))
}

/// FP destination, integer source.
pub(super) fn int_to_fp(name: &'static str, instr: Instruction, _: u64) -> String {
    format!("{} {}, {}", name, freg_name(instr.rd()), reg_name(instr.rs1()))
}

pub(super) fn vector_mem(name: &'static str, instr: Instruction, _: u64) -> String {
    let v = instr.vls();
    format!("{} v{}, ({})", name, v.vd, reg_name(v.rs1))
}

pub(super) fn vector_vv(name: &'static str, instr: Instruction, _: u64) -> String {
    let v = instr.opvv();
    format!("{} v{}, v{}, v{}", name, v.vd, v.vs2, v.vs1)
}

pub(super) fn vector_vf(name: &'static str, instr: Instruction, _: u64) -> String {
    let v = instr.opvv();
    format!("{} v{}, v{}, {}", name, v.vd, v.vs2, freg_name(v.vs1))
}

pub(super) fn vsetvli(name: &'static str, instr: Instruction, _: u64) -> String {
    let i = instr.itype();
    let sew = 8u32 << ((i.imm >> 3) & 0x7);
    if instr.whole() >> 30 == 0b11 {
        format!("{} {}, {}, e{}", name, reg_name(i.rd), i.rs1, sew)
    } else {
        format!("{} {}, {}, e{}", name, reg_name(i.rd), reg_name(i.rs1), sew)
    }
}

//! A extension.
//!
//! All AMOs of one width share a handler that re-reads the operation from
//! `funct5`. Double-word forms on RV32 decode to a handler that raises an
//! illegal-operation fault instead of truncating.

use super::{print, InstructionHandler};
use crate::cpu::instruction::Instruction;
use crate::cpu::{AddressType, AmoOp, ExceptionKind, MachineException, MachineResult};
use crate::machine::Machine;

const LR: u32 = 0b00010;
const SC: u32 = 0b00011;

fn amo_name(op: AmoOp, double: bool) -> &'static str {
    match (op, double) {
        (AmoOp::Add, false) => "AMOADD.W",
        (AmoOp::Swap, false) => "AMOSWAP.W",
        (AmoOp::Xor, false) => "AMOXOR.W",
        (AmoOp::Or, false) => "AMOOR.W",
        (AmoOp::And, false) => "AMOAND.W",
        (AmoOp::Min, false) => "AMOMIN.W",
        (AmoOp::Max, false) => "AMOMAX.W",
        (AmoOp::MinU, false) => "AMOMINU.W",
        (AmoOp::MaxU, false) => "AMOMAXU.W",
        (AmoOp::Add, true) => "AMOADD.D",
        (AmoOp::Swap, true) => "AMOSWAP.D",
        (AmoOp::Xor, true) => "AMOXOR.D",
        (AmoOp::Or, true) => "AMOOR.D",
        (AmoOp::And, true) => "AMOAND.D",
        (AmoOp::Min, true) => "AMOMIN.D",
        (AmoOp::Max, true) => "AMOMAX.D",
        (AmoOp::MinU, true) => "AMOMINU.D",
        (AmoOp::MaxU, true) => "AMOMAXU.D",
    }
}

fn check_alignment(addr: u64, size: u64) -> MachineResult<()> {
    if addr & (size - 1) != 0 {
        return Err(MachineException::of(ExceptionKind::InvalidAlignment, addr));
    }
    Ok(())
}

fn operation(instr: Instruction) -> MachineResult<AmoOp> {
    AmoOp::from_funct5(instr.atype().funct5)
        .ok_or_else(|| MachineException::of(ExceptionKind::IllegalOpcode, instr.whole() as u64))
}

fn lr_w<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    let a = instr.atype();
    let addr = m.cpu.registers().get_u64(a.rs1);
    check_alignment(addr, 4)?;
    let value: u32 = m.memory.read(addr)?;
    m.cpu.reservation_mut().reserve(4, addr)?;
    m.cpu.registers_mut().set_i64(a.rd, value as i32 as i64);
    Ok(())
}

fn sc_w<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    let a = instr.atype();
    let addr = m.cpu.registers().get_u64(a.rs1);
    check_alignment(addr, 4)?;
    // A faulting store leaves the reservation in place
    if m.cpu.reservation().reservation() == Some(addr) {
        let value = m.cpu.registers().get_u64(a.rs2) as u32;
        m.memory.write(addr, value)?;
    }
    let success = m.cpu.reservation_mut().store_conditional(4, addr)?;
    m.cpu.registers_mut().set_u64(a.rd, (!success) as u64);
    Ok(())
}

fn amo_w<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    let op = operation(instr)?;
    let a = instr.atype();
    let addr = m.cpu.registers().get_u64(a.rs1);
    check_alignment(addr, 4)?;
    let old: u32 = m.memory.writable_read(addr)?;
    let value = op.apply_u32(old, m.cpu.registers().get_u64(a.rs2) as u32);
    m.memory.write(addr, value)?;
    m.cpu.registers_mut().set_i64(a.rd, old as i32 as i64);
    Ok(())
}

fn lr_d<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    let a = instr.atype();
    let addr = m.cpu.registers().get_u64(a.rs1);
    check_alignment(addr, 8)?;
    let value: u64 = m.memory.read(addr)?;
    m.cpu.reservation_mut().reserve(8, addr)?;
    m.cpu.registers_mut().set_u64(a.rd, value);
    Ok(())
}

fn sc_d<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    let a = instr.atype();
    let addr = m.cpu.registers().get_u64(a.rs1);
    check_alignment(addr, 8)?;
    if m.cpu.reservation().reservation() == Some(addr) {
        let value = m.cpu.registers().get_u64(a.rs2);
        m.memory.write(addr, value)?;
    }
    let success = m.cpu.reservation_mut().store_conditional(8, addr)?;
    m.cpu.registers_mut().set_u64(a.rd, (!success) as u64);
    Ok(())
}

fn amo_d<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    let op = operation(instr)?;
    let a = instr.atype();
    let addr = m.cpu.registers().get_u64(a.rs1);
    check_alignment(addr, 8)?;
    let old: u64 = m.memory.writable_read(addr)?;
    let value = op.apply_u64(old, m.cpu.registers().get_u64(a.rs2));
    m.memory.write(addr, value)?;
    m.cpu.registers_mut().set_u64(a.rd, old);
    Ok(())
}

fn double_on_rv32<A: AddressType>(_: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    Err(MachineException::new(
        ExceptionKind::IllegalOperation,
        "Double-word atomic on a 32-bit machine",
        instr.whole() as u64,
    ))
}

pub(super) fn decode<A: AddressType>(instr: Instruction) -> Option<InstructionHandler<A>> {
    let a = instr.atype();
    let handler = match (a.funct3, a.funct5) {
        (0x2, LR) if a.rs2 == 0 => InstructionHandler::new("LR.W", lr_w::<A>, print::load_reserved),
        (0x2, SC) => InstructionHandler::new("SC.W", sc_w::<A>, print::amo),
        (0x2, f) => InstructionHandler::new(amo_name(AmoOp::from_funct5(f)?, false), amo_w::<A>, print::amo),
        (0x3, _) if !A::is_rv64() => {
            let name = match a.funct5 {
                LR if a.rs2 == 0 => "LR.D",
                SC => "SC.D",
                f => amo_name(AmoOp::from_funct5(f)?, true),
            };
            InstructionHandler::new(name, double_on_rv32::<A>, print::amo)
        }
        (0x3, LR) if a.rs2 == 0 => InstructionHandler::new("LR.D", lr_d::<A>, print::load_reserved),
        (0x3, SC) => InstructionHandler::new("SC.D", sc_d::<A>, print::amo),
        (0x3, f) => InstructionHandler::new(amo_name(AmoOp::from_funct5(f)?, true), amo_d::<A>, print::amo),
        _ => return None,
    };
    Some(handler)
}

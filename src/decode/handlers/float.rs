//! F and D extensions.
//!
//! Single-precision values live NaN-boxed in the 64-bit FP registers. A
//! single-precision read of a register that is not a valid NaN-box yields
//! the canonical NaN. Arithmetic results that are NaN are canonicalized.
//! Basic arithmetic uses host round-to-nearest and does not accrue flags;
//! conversions, comparisons and min/max honor the rounding mode and raise
//! `fflags`.

use super::base::effective_address;
use super::{print, InstructionHandler};
use crate::cpu::fpu::{self, RoundingMode, CANONICAL_NAN_F32, CANONICAL_NAN_F64};
use crate::cpu::instruction::{opcode, Instruction};
use crate::cpu::registers::Registers;
use crate::cpu::{AddressType, ExceptionKind, MachineException, MachineResult};
use crate::machine::Machine;

/// Single-precision bits of `reg`, unboxed.
#[inline]
pub(crate) fn read_f32_bits<A: AddressType>(regs: &Registers<A>, reg: u32) -> u32 {
    let fr = regs.getfl(reg);
    if fr.is_nanboxed() {
        fr.bits() as u32
    } else {
        CANONICAL_NAN_F32
    }
}

#[inline]
pub(crate) fn read_f32<A: AddressType>(regs: &Registers<A>, reg: u32) -> f32 {
    f32::from_bits(read_f32_bits(regs, reg))
}

#[inline]
pub(crate) fn write_f32<A: AddressType>(regs: &mut Registers<A>, reg: u32, value: f32) {
    let bits = if value.is_nan() { CANONICAL_NAN_F32 } else { value.to_bits() };
    regs.getfl_mut(reg).load_u32(bits);
}

#[inline]
pub(crate) fn write_f64<A: AddressType>(regs: &mut Registers<A>, reg: u32, value: f64) {
    let bits = if value.is_nan() { CANONICAL_NAN_F64 } else { value.to_bits() };
    regs.getfl_mut(reg).load_u64(bits);
}

fn raise<A: AddressType>(m: &mut Machine<A>, flags: u32) {
    if flags != 0 {
        let fcsr = m.cpu.registers_mut().fcsr_mut();
        let accrued = fcsr.fflags() | flags;
        fcsr.set_fflags(accrued);
    }
}

fn rounding<A: AddressType>(m: &Machine<A>, instr: Instruction) -> MachineResult<RoundingMode> {
    RoundingMode::resolve(instr.funct3(), m.cpu.registers().fcsr().frm()).ok_or_else(|| {
        MachineException::new(
            ExceptionKind::IllegalOperation,
            "Invalid floating-point rounding mode",
            instr.whole() as u64,
        )
    })
}

/// `fd = f(fs1, fs2)` in single precision.
macro_rules! binop_s {
    ($name:expr, $f:expr) => {
        InstructionHandler::<A>::new(
            $name,
            |m, i| {
                let r = i.rtype();
                let regs = m.cpu.registers_mut();
                let value = ($f)(read_f32(regs, r.rs1), read_f32(regs, r.rs2));
                write_f32(regs, r.rd, value);
                Ok(())
            },
            print::fp_rtype,
        )
    };
}

/// `fd = f(fs1, fs2)` in double precision.
macro_rules! binop_d {
    ($name:expr, $f:expr) => {
        InstructionHandler::<A>::new(
            $name,
            |m, i| {
                let r = i.rtype();
                let regs = m.cpu.registers_mut();
                let value = ($f)(regs.getfl(r.rs1).f64(), regs.getfl(r.rs2).f64());
                write_f64(regs, r.rd, value);
                Ok(())
            },
            print::fp_rtype,
        )
    };
}

/// Fused multiply-add family, `fd = f(fs1, fs2, fs3)`.
macro_rules! fused {
    ($name:expr, $double:expr, $f:expr) => {
        InstructionHandler::<A>::new(
            $name,
            |m, i| {
                let r = i.r4type();
                let regs = m.cpu.registers_mut();
                if $double {
                    let (a, b, c) = (regs.getfl(r.rs1).f64(), regs.getfl(r.rs2).f64(), regs.getfl(r.rs3).f64());
                    write_f64(regs, r.rd, ($f)(a, b, c));
                } else {
                    let (a, b, c) = (read_f32(regs, r.rs1), read_f32(regs, r.rs2), read_f32(regs, r.rs3));
                    write_f32(regs, r.rd, ($f)(a as f64, b as f64, c as f64) as f32);
                }
                Ok(())
            },
            print::fp_r4,
        )
    };
}

/// Float-to-integer conversion saturating to `[$min, $max]`. The result is
/// sign-extended from 32 bits for the word forms.
macro_rules! to_int {
    ($name:expr, $double:expr, $min:expr, $max:expr, $word:expr) => {
        InstructionHandler::<A>::new(
            $name,
            |m, i| {
                let rm = rounding(m, i)?;
                let value = if $double {
                    m.cpu.registers().getfl(i.rs1()).f64()
                } else {
                    read_f32(m.cpu.registers(), i.rs1()) as f64
                };
                let (result, flags) = fpu::fcvt_to_int(value, rm, $min as i128, $max as i128);
                let result = if $word { result as i32 as i64 as u64 } else { result as u64 };
                m.cpu.registers_mut().set_u64(i.rd(), result);
                raise(m, flags);
                Ok(())
            },
            print::fp_to_int,
        )
    };
}

/// Integer-to-float conversion from `rs1` read through `$read`.
macro_rules! from_int {
    ($name:expr, $double:expr, $read:expr) => {
        InstructionHandler::<A>::new(
            $name,
            |m, i| {
                let regs = m.cpu.registers_mut();
                let value = ($read)(regs.get_u64(i.rs1()));
                if $double {
                    write_f64(regs, i.rd(), value as f64);
                } else {
                    write_f32(regs, i.rd(), value as f32);
                }
                Ok(())
            },
            print::int_to_fp,
        )
    };
}

fn sign_inject_f32(a: u32, b: u32, funct3: u32) -> Option<u32> {
    let sign = match funct3 {
        0 => b & 0x8000_0000,
        1 => !b & 0x8000_0000,
        2 => (a ^ b) & 0x8000_0000,
        _ => return None,
    };
    Some((a & 0x7FFF_FFFF) | sign)
}

fn sign_inject_f64(a: u64, b: u64, funct3: u32) -> Option<u64> {
    const SIGN: u64 = 1 << 63;
    let sign = match funct3 {
        0 => b & SIGN,
        1 => !b & SIGN,
        2 => (a ^ b) & SIGN,
        _ => return None,
    };
    Some((a & !SIGN) | sign)
}

fn fsgnj_s<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    let r = instr.rtype();
    let regs = m.cpu.registers_mut();
    let (a, b) = (read_f32_bits(regs, r.rs1), read_f32_bits(regs, r.rs2));
    let bits = sign_inject_f32(a, b, r.funct3)
        .ok_or_else(|| MachineException::of(ExceptionKind::IllegalOpcode, instr.whole() as u64))?;
    regs.getfl_mut(r.rd).load_u32(bits);
    Ok(())
}

fn fsgnj_d<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    let r = instr.rtype();
    let regs = m.cpu.registers_mut();
    let (a, b) = (regs.getfl(r.rs1).bits(), regs.getfl(r.rs2).bits());
    let bits = sign_inject_f64(a, b, r.funct3)
        .ok_or_else(|| MachineException::of(ExceptionKind::IllegalOpcode, instr.whole() as u64))?;
    regs.getfl_mut(r.rd).load_u64(bits);
    Ok(())
}

fn fminmax_s<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    let r = instr.rtype();
    let regs = m.cpu.registers();
    let (bits, flags) = fpu::fminmax_f32(read_f32_bits(regs, r.rs1), read_f32_bits(regs, r.rs2), r.funct3 == 1);
    m.cpu.registers_mut().getfl_mut(r.rd).load_u32(bits);
    raise(m, flags);
    Ok(())
}

fn fminmax_d<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    let r = instr.rtype();
    let regs = m.cpu.registers();
    let (bits, flags) = fpu::fminmax_f64(regs.getfl(r.rs1).bits(), regs.getfl(r.rs2).bits(), r.funct3 == 1);
    m.cpu.registers_mut().getfl_mut(r.rd).load_u64(bits);
    raise(m, flags);
    Ok(())
}

/// FEQ (funct3 2), FLT (1) and FLE (0).
fn compare_s<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    let r = instr.rtype();
    let regs = m.cpu.registers();
    let (a, b) = (read_f32_bits(regs, r.rs1), read_f32_bits(regs, r.rs2));
    let (af, bf) = (f32::from_bits(a), f32::from_bits(b));
    let result = match r.funct3 {
        2 => af == bf,
        1 => af < bf,
        _ => af <= bf,
    };
    let flags = fpu::compare_flags_f32(a, b, r.funct3 != 2);
    m.cpu.registers_mut().set_u64(r.rd, result as u64);
    raise(m, flags);
    Ok(())
}

fn compare_d<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    let r = instr.rtype();
    let regs = m.cpu.registers();
    let (a, b) = (regs.getfl(r.rs1).bits(), regs.getfl(r.rs2).bits());
    let (af, bf) = (f64::from_bits(a), f64::from_bits(b));
    let result = match r.funct3 {
        2 => af == bf,
        1 => af < bf,
        _ => af <= bf,
    };
    let flags = fpu::compare_flags_f64(a, b, r.funct3 != 2);
    m.cpu.registers_mut().set_u64(r.rd, result as u64);
    raise(m, flags);
    Ok(())
}

fn decode_load_store<A: AddressType>(instr: Instruction) -> Option<InstructionHandler<A>> {
    let handler = match (instr.opcode(), instr.funct3()) {
        (opcode::LOAD_FP, 0x2) => InstructionHandler::<A>::new(
            "FLW",
            |m, i| {
                let it = i.itype();
                let bits: u32 = m.memory.read(effective_address(m, it.rs1, it.signed_imm()))?;
                m.cpu.registers_mut().getfl_mut(it.rd).load_u32(bits);
                Ok(())
            },
            print::fp_load,
        ),
        (opcode::LOAD_FP, 0x3) => InstructionHandler::<A>::new(
            "FLD",
            |m, i| {
                let it = i.itype();
                let bits: u64 = m.memory.read(effective_address(m, it.rs1, it.signed_imm()))?;
                m.cpu.registers_mut().getfl_mut(it.rd).load_u64(bits);
                Ok(())
            },
            print::fp_load,
        ),
        (opcode::STORE_FP, 0x2) => InstructionHandler::<A>::new(
            "FSW",
            |m, i| {
                let s = i.stype();
                let addr = effective_address(m, s.rs1, s.signed_imm());
                let bits = m.cpu.registers().getfl(s.rs2).bits() as u32;
                m.memory.write(addr, bits)
            },
            print::fp_store,
        ),
        (opcode::STORE_FP, 0x3) => InstructionHandler::<A>::new(
            "FSD",
            |m, i| {
                let s = i.stype();
                let addr = effective_address(m, s.rs1, s.signed_imm());
                let bits = m.cpu.registers().getfl(s.rs2).bits();
                m.memory.write(addr, bits)
            },
            print::fp_store,
        ),
        _ => return None,
    };
    Some(handler)
}

fn decode_fused<A: AddressType>(instr: Instruction) -> Option<InstructionHandler<A>> {
    let r = instr.r4type();
    let handler = match (instr.opcode(), r.funct2) {
        (opcode::FMADD, 0) => fused!("FMADD.S", false, |a: f64, b: f64, c: f64| a.mul_add(b, c)),
        (opcode::FMADD, 1) => fused!("FMADD.D", true, |a: f64, b: f64, c: f64| a.mul_add(b, c)),
        (opcode::FMSUB, 0) => fused!("FMSUB.S", false, |a: f64, b: f64, c: f64| a.mul_add(b, -c)),
        (opcode::FMSUB, 1) => fused!("FMSUB.D", true, |a: f64, b: f64, c: f64| a.mul_add(b, -c)),
        (opcode::FNMSUB, 0) => fused!("FNMSUB.S", false, |a: f64, b: f64, c: f64| (-a).mul_add(b, c)),
        (opcode::FNMSUB, 1) => fused!("FNMSUB.D", true, |a: f64, b: f64, c: f64| (-a).mul_add(b, c)),
        (opcode::FNMADD, 0) => fused!("FNMADD.S", false, |a: f64, b: f64, c: f64| (-a).mul_add(b, -c)),
        (opcode::FNMADD, 1) => fused!("FNMADD.D", true, |a: f64, b: f64, c: f64| (-a).mul_add(b, -c)),
        _ => return None,
    };
    Some(handler)
}

fn decode_op_fp<A: AddressType>(instr: Instruction) -> Option<InstructionHandler<A>> {
    let rv64 = A::is_rv64();
    let r = instr.rtype();
    let handler = match (r.funct7, r.rs2, r.funct3) {
        (0x00, _, _) => binop_s!("FADD.S", |a: f32, b: f32| a + b),
        (0x01, _, _) => binop_d!("FADD.D", |a: f64, b: f64| a + b),
        (0x04, _, _) => binop_s!("FSUB.S", |a: f32, b: f32| a - b),
        (0x05, _, _) => binop_d!("FSUB.D", |a: f64, b: f64| a - b),
        (0x08, _, _) => binop_s!("FMUL.S", |a: f32, b: f32| a * b),
        (0x09, _, _) => binop_d!("FMUL.D", |a: f64, b: f64| a * b),
        (0x0C, _, _) => binop_s!("FDIV.S", |a: f32, b: f32| a / b),
        (0x0D, _, _) => binop_d!("FDIV.D", |a: f64, b: f64| a / b),
        (0x2C, 0, _) => binop_s!("FSQRT.S", |a: f32, _| a.sqrt()),
        (0x2D, 0, _) => binop_d!("FSQRT.D", |a: f64, _| a.sqrt()),
        (0x10, _, 0) => InstructionHandler::new("FSGNJ.S", fsgnj_s::<A>, print::fp_rtype),
        (0x10, _, 1) => InstructionHandler::new("FSGNJN.S", fsgnj_s::<A>, print::fp_rtype),
        (0x10, _, 2) => InstructionHandler::new("FSGNJX.S", fsgnj_s::<A>, print::fp_rtype),
        (0x11, _, 0) => InstructionHandler::new("FSGNJ.D", fsgnj_d::<A>, print::fp_rtype),
        (0x11, _, 1) => InstructionHandler::new("FSGNJN.D", fsgnj_d::<A>, print::fp_rtype),
        (0x11, _, 2) => InstructionHandler::new("FSGNJX.D", fsgnj_d::<A>, print::fp_rtype),
        (0x14, _, 0) => InstructionHandler::new("FMIN.S", fminmax_s::<A>, print::fp_rtype),
        (0x14, _, 1) => InstructionHandler::new("FMAX.S", fminmax_s::<A>, print::fp_rtype),
        (0x15, _, 0) => InstructionHandler::new("FMIN.D", fminmax_d::<A>, print::fp_rtype),
        (0x15, _, 1) => InstructionHandler::new("FMAX.D", fminmax_d::<A>, print::fp_rtype),
        (0x20, 1, _) => InstructionHandler::<A>::new(
            "FCVT.S.D",
            |m, i| {
                let regs = m.cpu.registers_mut();
                let value = regs.getfl(i.rs1()).f64();
                write_f32(regs, i.rd(), value as f32);
                Ok(())
            },
            print::fp_unary,
        ),
        (0x21, 0, _) => InstructionHandler::<A>::new(
            "FCVT.D.S",
            |m, i| {
                let regs = m.cpu.registers_mut();
                let value = read_f32(regs, i.rs1());
                write_f64(regs, i.rd(), value as f64);
                Ok(())
            },
            print::fp_unary,
        ),
        (0x50, _, 0) => InstructionHandler::new("FLE.S", compare_s::<A>, print::fp_compare),
        (0x50, _, 1) => InstructionHandler::new("FLT.S", compare_s::<A>, print::fp_compare),
        (0x50, _, 2) => InstructionHandler::new("FEQ.S", compare_s::<A>, print::fp_compare),
        (0x51, _, 0) => InstructionHandler::new("FLE.D", compare_d::<A>, print::fp_compare),
        (0x51, _, 1) => InstructionHandler::new("FLT.D", compare_d::<A>, print::fp_compare),
        (0x51, _, 2) => InstructionHandler::new("FEQ.D", compare_d::<A>, print::fp_compare),
        (0x60, 0, _) => to_int!("FCVT.W.S", false, i32::MIN, i32::MAX, true),
        (0x60, 1, _) => to_int!("FCVT.WU.S", false, 0, u32::MAX, true),
        (0x60, 2, _) if rv64 => to_int!("FCVT.L.S", false, i64::MIN, i64::MAX, false),
        (0x60, 3, _) if rv64 => to_int!("FCVT.LU.S", false, 0, u64::MAX, false),
        (0x61, 0, _) => to_int!("FCVT.W.D", true, i32::MIN, i32::MAX, true),
        (0x61, 1, _) => to_int!("FCVT.WU.D", true, 0, u32::MAX, true),
        (0x61, 2, _) if rv64 => to_int!("FCVT.L.D", true, i64::MIN, i64::MAX, false),
        (0x61, 3, _) if rv64 => to_int!("FCVT.LU.D", true, 0, u64::MAX, false),
        (0x68, 0, _) => from_int!("FCVT.S.W", false, |v: u64| v as i32 as f64),
        (0x68, 1, _) => from_int!("FCVT.S.WU", false, |v: u64| v as u32 as f64),
        (0x68, 2, _) if rv64 => from_int!("FCVT.S.L", false, |v: u64| v as i64 as f32 as f64),
        (0x68, 3, _) if rv64 => from_int!("FCVT.S.LU", false, |v: u64| v as f32 as f64),
        (0x69, 0, _) => from_int!("FCVT.D.W", true, |v: u64| v as i32 as f64),
        (0x69, 1, _) => from_int!("FCVT.D.WU", true, |v: u64| v as u32 as f64),
        (0x69, 2, _) if rv64 => from_int!("FCVT.D.L", true, |v: u64| v as i64 as f64),
        (0x69, 3, _) if rv64 => from_int!("FCVT.D.LU", true, |v: u64| v as f64),
        (0x70, 0, 0) => InstructionHandler::<A>::new(
            "FMV.X.W",
            |m, i| {
                let bits = m.cpu.registers().getfl(i.rs1()).bits() as u32;
                m.cpu.registers_mut().set_i64(i.rd(), bits as i32 as i64);
                Ok(())
            },
            print::fp_to_int,
        ),
        (0x70, 0, 1) => InstructionHandler::<A>::new(
            "FCLASS.S",
            |m, i| {
                let class = fpu::fclass_f32(read_f32_bits(m.cpu.registers(), i.rs1()));
                m.cpu.registers_mut().set_u64(i.rd(), class as u64);
                Ok(())
            },
            print::fp_to_int,
        ),
        (0x71, 0, 0) if rv64 => InstructionHandler::<A>::new(
            "FMV.X.D",
            |m, i| {
                let bits = m.cpu.registers().getfl(i.rs1()).bits();
                m.cpu.registers_mut().set_u64(i.rd(), bits);
                Ok(())
            },
            print::fp_to_int,
        ),
        (0x71, 0, 1) => InstructionHandler::<A>::new(
            "FCLASS.D",
            |m, i| {
                let class = fpu::fclass_f64(m.cpu.registers().getfl(i.rs1()).bits());
                m.cpu.registers_mut().set_u64(i.rd(), class as u64);
                Ok(())
            },
            print::fp_to_int,
        ),
        (0x78, 0, 0) => InstructionHandler::<A>::new(
            "FMV.W.X",
            |m, i| {
                let regs = m.cpu.registers_mut();
                let bits = regs.get_u64(i.rs1()) as u32;
                regs.getfl_mut(i.rd()).load_u32(bits);
                Ok(())
            },
            print::int_to_fp,
        ),
        (0x79, 0, 0) if rv64 => InstructionHandler::<A>::new(
            "FMV.D.X",
            |m, i| {
                let regs = m.cpu.registers_mut();
                let bits = regs.get_u64(i.rs1());
                regs.getfl_mut(i.rd()).load_u64(bits);
                Ok(())
            },
            print::int_to_fp,
        ),
        _ => return None,
    };
    Some(handler)
}

pub(super) fn decode<A: AddressType>(instr: Instruction) -> Option<InstructionHandler<A>> {
    match instr.opcode() {
        opcode::LOAD_FP | opcode::STORE_FP => decode_load_store::<A>(instr),
        opcode::FMADD | opcode::FMSUB | opcode::FNMSUB | opcode::FNMADD => decode_fused::<A>(instr),
        opcode::OP_FP => decode_op_fp::<A>(instr),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::fpu::{FFLAG_NV, FFLAG_NX};
    use crate::machine::{Machine, MachineOptions};

    fn exec<A: AddressType>(m: &mut Machine<A>, word: u32) {
        let instr = Instruction::new(word);
        decode::<A>(instr).unwrap().execute(m, instr).unwrap();
    }

    fn machine() -> Machine<u64> {
        Machine::<u64>::new(MachineOptions::default())
    }

    #[test]
    fn test_single_arithmetic_nanboxes() {
        let mut m = machine();
        m.cpu.registers_mut().getfl_mut(1).set_f32(1.5);
        m.cpu.registers_mut().getfl_mut(2).set_f32(2.25);
        // fadd.s f3, f1, f2
        exec(&mut m, 0x002081D3);
        let f3 = m.cpu.registers().getfl(3);
        assert!(f3.is_nanboxed());
        assert_eq!(f3.f32(), 3.75);
    }

    #[test]
    fn test_unboxed_operand_reads_as_nan() {
        let mut m = machine();
        m.cpu.registers_mut().getfl_mut(1).set_f64(1.0);
        m.cpu.registers_mut().getfl_mut(2).set_f32(2.0);
        exec(&mut m, 0x002081D3);
        assert_eq!(m.cpu.registers().getfl(3).bits() as u32, CANONICAL_NAN_F32);
    }

    #[test]
    fn test_double_fused() {
        let mut m = machine();
        let regs = m.cpu.registers_mut();
        regs.getfl_mut(1).set_f64(2.0);
        regs.getfl_mut(2).set_f64(3.0);
        regs.getfl_mut(3).set_f64(1.0);
        // fmadd.d f4, f1, f2, f3
        exec(&mut m, 0x1A208243);
        assert_eq!(m.cpu.registers().getfl(4).f64(), 7.0);
    }

    #[test]
    fn test_conversion_flags() {
        let mut m = machine();
        m.cpu.registers_mut().getfl_mut(1).set_f64(-2.5);
        // fcvt.w.d x5, f1, rtz
        exec(&mut m, 0xC20092D3);
        assert_eq!(m.cpu.registers().get_i64(5), -2);
        assert_eq!(m.cpu.registers().fcsr().fflags(), FFLAG_NX);
        // fcvt.wu.d x5, f1, rtz saturates to zero
        exec(&mut m, 0xC21092D3);
        assert_eq!(m.cpu.registers().get_i64(5), 0);
        assert_eq!(m.cpu.registers().fcsr().fflags(), FFLAG_NX | FFLAG_NV);
    }

    #[test]
    fn test_compare_and_move() {
        let mut m = machine();
        m.cpu.registers_mut().getfl_mut(1).set_f32(1.0);
        m.cpu.registers_mut().getfl_mut(2).set_f32(2.0);
        // flt.s x5, f1, f2
        exec(&mut m, 0xA02092D3);
        assert_eq!(m.cpu.registers().get_u64(5), 1);
        // fmv.x.w x6, f2
        exec(&mut m, 0xE0010353);
        assert_eq!(m.cpu.registers().get_u64(6), 2.0f32.to_bits() as u64);
    }

    #[test]
    fn test_sign_injection() {
        assert_eq!(sign_inject_f32(0x3F80_0000, 0x8000_0000, 0), Some(0xBF80_0000));
        assert_eq!(sign_inject_f32(0xBF80_0000, 0x8000_0000, 1), Some(0x3F80_0000));
        assert_eq!(sign_inject_f64(1 << 63, 1 << 63, 2), Some(0));
        assert_eq!(sign_inject_f64(0, 0, 3), None);
    }

    #[test]
    fn test_rv64_only_forms() {
        // fcvt.l.s x5, f1
        assert!(decode::<u32>(Instruction::new(0xC02082D3)).is_none());
        assert_eq!(decode::<u64>(Instruction::new(0xC02082D3)).unwrap().name, "FCVT.L.S");
    }
}

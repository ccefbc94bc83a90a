//! V extension subset: configuration, unit-stride 32-bit loads/stores and
//! two f32 arithmetic forms. Memory forms always move a whole register.

use super::{print, InstructionHandler};
use crate::cpu::instruction::{opcode, Instruction};
use crate::cpu::registers::{VECTOR_F32_LANES, VLEN_BYTES};
use crate::cpu::{AddressType, MachineResult};
use crate::machine::Machine;

use super::float::read_f32;

/// Elements per register for a `vtype` value, ignoring LMUL.
pub(crate) fn vlmax(vtype: u64) -> u64 {
    let sew = 8u64 << ((vtype >> 3) & 0x7);
    (VLEN_BYTES as u64 * 8) / sew
}

/// Apply a new configuration and return the resulting `vl`.
fn set_vector_config<A: AddressType>(m: &mut Machine<A>, rd: u32, avl: Option<u64>, vtype: u64) -> u64 {
    let max = vlmax(vtype);
    let rvv = m.cpu.registers_mut().rvv_mut();
    let vl = match avl {
        Some(avl) => avl.min(max),
        None if rd != 0 => max,
        // rd = rs1 = x0 keeps the current length
        None => rvv.vl.min(max),
    };
    rvv.vl = vl;
    rvv.vtype = vtype;
    m.cpu.registers_mut().set_u64(rd, vl);
    vl
}

fn vsetvli<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    let i = instr.itype();
    let avl = (i.rs1 != 0).then(|| m.cpu.registers().get_u64(i.rs1));
    set_vector_config(m, i.rd, avl, (instr.whole() >> 20 & 0x7FF) as u64);
    Ok(())
}

fn vsetivli<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    let i = instr.itype();
    set_vector_config(m, i.rd, Some(i.rs1 as u64), (instr.whole() >> 20 & 0x3FF) as u64);
    Ok(())
}

fn vsetvl<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    let r = instr.rtype();
    let avl = (r.rs1 != 0).then(|| m.cpu.registers().get_u64(r.rs1));
    let vtype = m.cpu.registers().get_u64(r.rs2);
    set_vector_config(m, r.rd, avl, vtype);
    Ok(())
}

fn vle32<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    let v = instr.vls();
    let addr = m.cpu.registers().get_u64(v.rs1);
    let mut bytes = [0u8; VLEN_BYTES];
    m.memory.read_bytes(addr, &mut bytes)?;
    m.cpu.registers_mut().rvv_mut().get_mut(v.vd).load_bytes(&bytes);
    Ok(())
}

fn vse32<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    let v = instr.vls();
    let addr = m.cpu.registers().get_u64(v.rs1);
    let bytes = m.cpu.registers().rvv().get(v.vd).to_bytes();
    m.memory.write_bytes(addr, &bytes)
}

fn vfadd_vv<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    let v = instr.opvv();
    let rvv = m.cpu.registers_mut().rvv_mut();
    let (a, b) = (*rvv.get(v.vs2).f32(), *rvv.get(v.vs1).f32());
    let dst = rvv.get_mut(v.vd).f32_mut();
    for lane in 0..VECTOR_F32_LANES {
        dst[lane] = a[lane] + b[lane];
    }
    Ok(())
}

fn vfmul_vf<A: AddressType>(m: &mut Machine<A>, instr: Instruction) -> MachineResult<()> {
    let v = instr.opvv();
    let scalar = read_f32(m.cpu.registers(), v.vs1);
    let rvv = m.cpu.registers_mut().rvv_mut();
    let a = *rvv.get(v.vs2).f32();
    for (dst, src) in rvv.get_mut(v.vd).f32_mut().iter_mut().zip(a) {
        *dst = src * scalar;
    }
    Ok(())
}

pub(super) fn decode<A: AddressType>(instr: Instruction) -> Option<InstructionHandler<A>> {
    let handler = match instr.opcode() {
        opcode::LOAD_FP => {
            let v = instr.vls();
            match (v.width, v.mop, v.lumop, v.nf) {
                (0x6, 0, 0, 0) => InstructionHandler::new("VLE32.V", vle32::<A>, print::vector_mem),
                _ => return None,
            }
        }
        opcode::STORE_FP => {
            let v = instr.vls();
            match (v.width, v.mop, v.lumop, v.nf) {
                (0x6, 0, 0, 0) => InstructionHandler::new("VSE32.V", vse32::<A>, print::vector_mem),
                _ => return None,
            }
        }
        opcode::OP_V => {
            let v = instr.opvv();
            match (v.funct3, v.funct6) {
                (0x7, _) => match instr.whole() >> 30 {
                    0b00 | 0b01 => InstructionHandler::new("VSETVLI", vsetvli::<A>, print::vsetvli),
                    0b11 => InstructionHandler::new("VSETIVLI", vsetivli::<A>, print::vsetvli),
                    _ if instr.whole() >> 25 == 0b100_0000 => {
                        InstructionHandler::new("VSETVL", vsetvl::<A>, print::rtype)
                    }
                    _ => return None,
                },
                (0x1, 0b000000) => InstructionHandler::new("VFADD.VV", vfadd_vv::<A>, print::vector_vv),
                (0x5, 0b100100) => InstructionHandler::new("VFMUL.VF", vfmul_vf::<A>, print::vector_vf),
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

    fn exec(m: &mut Machine<u64>, word: u32) {
        let instr = Instruction::new(word);
        decode::<u64>(instr).unwrap().execute(m, instr).unwrap();
    }

    #[test]
    fn test_vsetvli() {
        let mut m = Machine::<u64>::new(MachineOptions::default());
        m.cpu.set_reg(11, 100);
        // vsetvli a0, a1, e32
        exec(&mut m, 0x0105F557);
        assert_eq!(m.cpu.reg(10), 8);
        assert_eq!(m.cpu.registers().rvv().vl, 8);
        // vsetivli a0, 3, e8
        exec(&mut m, 0xC001F557);
        assert_eq!(m.cpu.reg(10), 3);
        assert_eq!(vlmax(0), 32);
    }

    #[test]
    fn test_load_add_store() {
        let mut m = Machine::<u64>::new(MachineOptions::default());
        let data: Vec<u8> = (0..8).flat_map(|i| (i as f32).to_le_bytes()).collect();
        m.memory.write_bytes(0x1000, &data).unwrap();
        m.cpu.set_reg(10, 0x1000);
        m.cpu.set_reg(11, 0x2000);
        // vle32.v v1, (a0)
        exec(&mut m, 0x02056087);
        // vfadd.vv v2, v1, v1
        exec(&mut m, 0x02109157);
        // fmul by 0.5 through vfmul.vf v3, v2, fa0
        m.cpu.registers_mut().getfl_mut(10).set_f32(0.5);
        exec(&mut m, 0x922551D7);
        // vse32.v v3, (a1)
        exec(&mut m, 0x0205E1A7);
        for i in 0..8u64 {
            let bits: u32 = m.memory.read(0x2000 + 4 * i).unwrap();
            assert_eq!(f32::from_bits(bits), i as f32);
        }
    }

    #[test]
    fn test_unsupported_forms() {
        // strided load
        assert!(decode::<u64>(Instruction::new(0x0A016007)).is_none());
        // vadd.vv (integer) is not part of the subset
        assert!(decode::<u64>(Instruction::new(0x02208057)).is_none());
    }
}

//! SYSTEM instructions: environment calls, breakpoints, halting and the
//! Zicsr control and status registers.

use std::time::{SystemTime, UNIX_EPOCH};

use super::{Machine, SYSCALL_EBREAK};
use crate::cpu::instruction::{Instruction, REG_A7};
use crate::cpu::{AddressType, ExceptionKind, MachineException, MachineResult};

pub const CSR_FFLAGS: u32 = 0x001;
pub const CSR_FRM: u32 = 0x002;
pub const CSR_FCSR: u32 = 0x003;
pub const CSR_CYCLE: u32 = 0xC00;
pub const CSR_TIME: u32 = 0xC01;
pub const CSR_INSTRET: u32 = 0xC02;
pub const CSR_CYCLEH: u32 = 0xC80;
pub const CSR_TIMEH: u32 = 0xC81;
pub const CSR_INSTRETH: u32 = 0xC82;
pub const CSR_MVENDORID: u32 = 0xF11;
pub const CSR_MARCHID: u32 = 0xF12;
pub const CSR_MIMPID: u32 = 0xF13;
pub const CSR_MHARTID: u32 = 0xF14;

/// `CSRRW x0, cycle, x0`, the canonical unimplemented instruction.
const UNIMP_INSTRUCTION: u32 = 0xC000_1073;

/// Assembler name of a CSR this machine knows.
pub fn csr_name(csr: u32) -> Option<&'static str> {
    let name = match csr {
        CSR_FFLAGS => "fflags",
        CSR_FRM => "frm",
        CSR_FCSR => "fcsr",
        CSR_CYCLE => "cycle",
        CSR_TIME => "time",
        CSR_INSTRET => "instret",
        CSR_CYCLEH => "cycleh",
        CSR_TIMEH => "timeh",
        CSR_INSTRETH => "instreth",
        CSR_MVENDORID => "mvendorid",
        CSR_MARCHID => "marchid",
        CSR_MIMPID => "mimpid",
        CSR_MHARTID => "mhartid",
        _ => return None,
    };
    Some(name)
}

fn wall_clock_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

impl<A: AddressType> Machine<A> {
    /// Execute a SYSTEM instruction (or C.EBREAK).
    pub fn system(&mut self, instr: Instruction) -> MachineResult<()> {
        if instr.is_compressed() {
            // C.EBREAK is the only compressed SYSTEM instruction
            return self.system_call(SYSCALL_EBREAK);
        }
        let i = instr.itype();
        match i.funct3 {
            0x0 if i.rd == 0 && i.rs1 == 0 => match i.imm {
                0x000 => {
                    let nr = self.cpu.registers().get_u64(REG_A7) as usize;
                    self.system_call(nr)
                }
                0x001 => self.system_call(SYSCALL_EBREAK),
                // WFI and STOP
                0x105 | 0x7FF => {
                    self.stop();
                    Ok(())
                }
                _ => Err(MachineException::of(ExceptionKind::IllegalOpcode, instr.whole() as u64)),
            },
            0x1..=0x3 | 0x5..=0x7 => self.csr_instruction(instr),
            _ => Err(MachineException::of(ExceptionKind::IllegalOpcode, instr.whole() as u64)),
        }
    }

    /// Invoke system call `nr`.
    pub fn system_call(&mut self, nr: usize) -> MachineResult<()> {
        match self.syscall_handler(nr) {
            Some(handler) => handler(self),
            None => {
                let unhandled = self.on_unhandled_syscall.clone();
                unhandled(self, nr)
            }
        }
    }

    fn csr_instruction(&mut self, instr: Instruction) -> MachineResult<()> {
        let i = instr.itype();
        let csr = i.imm & 0xFFF;
        let immediate = i.funct3 & 0x4 != 0;
        let source = if immediate {
            i.rs1 as u64
        } else {
            self.cpu.registers().get_u64(i.rs1)
        };
        // CSRRW(I) always writes, CSRRS/C(I) only with a non-zero source field
        let is_write = i.funct3 & 0x3 == 0x1 || i.rs1 != 0;
        let is_read = i.funct3 & 0x3 != 0x1 || i.rd != 0;

        if instr.whole() == UNIMP_INSTRUCTION {
            return Err(MachineException::of(ExceptionKind::UnimplementedInstruction, instr.whole() as u64));
        }

        let old = self.read_csr(csr, instr)?;
        if is_write {
            let value = match i.funct3 & 0x3 {
                0x1 => source,
                0x2 => old | source,
                _ => old & !source,
            };
            self.write_csr(csr, value, instr)?;
        }
        if is_read {
            self.cpu.registers_mut().set_u64(i.rd, old);
        }
        Ok(())
    }

    fn read_csr(&self, csr: u32, instr: Instruction) -> MachineResult<u64> {
        let rv32 = !A::is_rv64();
        let fcsr = self.cpu.registers().fcsr();
        let value = match csr {
            CSR_FFLAGS => fcsr.fflags() as u64,
            CSR_FRM => fcsr.frm() as u64,
            CSR_FCSR => fcsr.whole() as u64,
            CSR_CYCLE | CSR_INSTRET => self.instruction_counter(),
            CSR_TIME => wall_clock_nanos(),
            CSR_CYCLEH | CSR_INSTRETH if rv32 => self.instruction_counter() >> 32,
            CSR_TIMEH if rv32 => wall_clock_nanos() >> 32,
            CSR_MVENDORID | CSR_MARCHID => 0,
            CSR_MIMPID => 1,
            CSR_MHARTID => self.cpu.cpu_id() as u64,
            _ => return Err(unknown_csr(instr)),
        };
        Ok(value)
    }

    fn write_csr(&mut self, csr: u32, value: u64, instr: Instruction) -> MachineResult<()> {
        let fcsr = self.cpu.registers_mut().fcsr_mut();
        match csr {
            CSR_FFLAGS => fcsr.set_fflags(value as u32),
            CSR_FRM => fcsr.set_frm(value as u32),
            CSR_FCSR => fcsr.set_whole(value as u32),
            _ => {
                return Err(MachineException::new(
                    ExceptionKind::IllegalOperation,
                    "Write to a read-only CSR",
                    instr.whole() as u64,
                ))
            }
        }
        Ok(())
    }
}

fn unknown_csr(instr: Instruction) -> MachineException {
    log::debug!("Unknown CSR 0x{:03X}", instr.itype().imm);
    MachineException::new(ExceptionKind::IllegalOperation, "Unknown CSR", instr.whole() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::MachineOptions;

    fn csr_op(funct3: u32, rd: u32, rs1: u32, csr: u32) -> Instruction {
        Instruction::new((csr << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | 0x73)
    }

    #[test]
    fn test_ecall_dispatches_a7() {
        let mut m = Machine::<u64>::new(MachineOptions::default());
        m.install_syscall_handler(42, |m| {
            let arg = m.sysarg(0).to_u64();
            m.set_result(arg * 2);
            Ok(())
        })
        .unwrap();
        m.cpu.set_reg(REG_A7, 42);
        m.cpu.set_reg(10, 21);
        m.system(Instruction::new(0x00000073)).unwrap();
        assert_eq!(m.cpu.reg(10), 42);
    }

    #[test]
    fn test_unhandled_syscall_returns_enosys() {
        let mut m = Machine::<u32>::new(MachineOptions::default());
        m.cpu.set_reg(REG_A7, 300);
        m.system(Instruction::new(0x00000073)).unwrap();
        assert_eq!(m.cpu.reg(10) as i32, -38);
    }

    #[test]
    fn test_ebreak_and_stop() {
        let mut m = Machine::<u32>::new(MachineOptions::default());
        m.install_syscall_handler(SYSCALL_EBREAK, |m| {
            m.set_result(0xBB);
            Ok(())
        })
        .unwrap();
        m.system(Instruction::new(0x00100073)).unwrap();
        assert_eq!(m.cpu.reg(10), 0xBB);
        m.cpu.set_reg(10, 0);
        m.system(Instruction::new(0x9002)).unwrap();
        assert_eq!(m.cpu.reg(10), 0xBB);

        assert!(!m.stopped());
        m.system(Instruction::new(0x10500073)).unwrap();
        assert!(m.stopped());
    }

    #[test]
    fn test_fcsr_access() {
        let mut m = Machine::<u32>::new(MachineOptions::default());
        m.cpu.set_reg(5, 0b010_00011);
        // csrrw x0, fcsr, t0
        m.system(csr_op(1, 0, 5, CSR_FCSR)).unwrap();
        // csrrs x6, frm, x0
        m.system(csr_op(2, 6, 0, CSR_FRM)).unwrap();
        assert_eq!(m.cpu.reg(6), 0b010);
        // csrrci x7, fflags, 1
        m.system(csr_op(7, 7, 1, CSR_FFLAGS)).unwrap();
        assert_eq!(m.cpu.reg(7), 0b00011);
        assert_eq!(m.cpu.registers().fcsr().fflags(), 0b00010);
    }

    #[test]
    fn test_counters_and_ids() {
        let mut m = Machine::<u32>::new(MachineOptions {
            cpu_id: 3,
            ..MachineOptions::default()
        });
        m.set_instruction_counter(0x1_0000_0005);
        m.system(csr_op(2, 1, 0, CSR_CYCLE)).unwrap();
        m.system(csr_op(2, 2, 0, CSR_INSTRETH)).unwrap();
        m.system(csr_op(2, 3, 0, CSR_MHARTID)).unwrap();
        m.system(csr_op(2, 4, 0, CSR_MIMPID)).unwrap();
        assert_eq!(m.cpu.reg(1), 5);
        assert_eq!(m.cpu.reg(2), 1);
        assert_eq!(m.cpu.reg(3), 3);
        assert_eq!(m.cpu.reg(4), 1);

        // High halves only exist on RV32
        let mut m64 = Machine::<u64>::new(MachineOptions::default());
        let err = m64.system(csr_op(2, 1, 0, CSR_CYCLEH)).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::IllegalOperation);
    }

    #[test]
    fn test_illegal_csr_accesses() {
        let mut m = Machine::<u64>::new(MachineOptions::default());
        assert_eq!(
            m.system(Instruction::new(UNIMP_INSTRUCTION)).unwrap_err().kind,
            ExceptionKind::UnimplementedInstruction
        );
        m.cpu.set_reg(5, 1);
        // csrrw x0, cycle, t0
        let err = m.system(csr_op(1, 0, 5, CSR_CYCLE)).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::IllegalOperation);
        // mstatus is not provided
        let err = m.system(csr_op(2, 1, 0, 0x300)).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::IllegalOperation);
        // funct3 = 4 does not exist
        let err = m.system(Instruction::new(0x00004073)).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::IllegalOpcode);
        assert_eq!(csr_name(CSR_TIME), Some("time"));
        assert_eq!(csr_name(0x300), None);
    }
}

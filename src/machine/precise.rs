//! Precise mode: one instruction at a time through the decoder, without
//! the decoder cache. Used for single-stepping and debugging.

use super::Machine;
use crate::cpu::{AddressType, ExceptionKind, MachineException, MachineResult};
use crate::decode::handlers;

impl<A: AddressType> Machine<A> {
    /// Execute the instruction at `pc` and retire it.
    ///
    /// The instruction is decoded afresh from the segment's copy of the
    /// code, so breakpoints and live patches installed in the decoder cache
    /// do not apply here.
    pub fn step_one(&mut self) -> MachineResult<()> {
        let pc = self.cpu.pc();
        let exec = {
            let current = self.cpu.current_execute_segment();
            if current.is_stale() || !current.is_within(pc, 2) {
                self.next_execute_segment(pc)?
            } else {
                current.clone()
            }
        };
        // Exec traps may have moved the program counter
        let pc = self.cpu.pc();
        let instr = exec.read_instruction(pc);
        if instr.is_compressed() && !self.options.compressed {
            return Err(MachineException::of(ExceptionKind::IllegalOpcode, instr.whole() as u64));
        }
        if !exec.is_within(pc, instr.length() as u64) {
            return Err(MachineException::new(
                ExceptionKind::ExecutionSpaceProtectionFault,
                "Instruction crosses the end of the execute segment",
                pc,
            ));
        }

        let handler = handlers::decode_one::<A>(instr);
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("{}", self.to_string(instr, pc));
        }
        handler.execute(self, instr)?;

        let next = self.cpu.pc().wrapping_add(instr.length() as u64);
        self.cpu.set_pc(next);
        self.counter = self.counter.saturating_add(1);
        Ok(())
    }

    /// Step from the current program counter until the machine stops or
    /// the counter reaches [`max_instructions`](Self::max_instructions).
    ///
    /// Returns `true` when the machine halted itself.
    pub fn simulate_precise(&mut self) -> MachineResult<bool> {
        self.stopped = false;
        while !self.stopped {
            if self.counter >= self.max_counter {
                return Ok(false);
            }
            self.step_one()?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::MachineOptions;
    use crate::memory::PageAttributes;

    fn load(m: &mut Machine<u32>, addr: u64, bytes: &[u8]) {
        m.memory.set_page_attr(addr, bytes.len() as u64, PageAttributes::RX);
        m.memory.copy_to_guest(addr, bytes).unwrap();
    }

    fn words(code: &[u32]) -> Vec<u8> {
        code.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_step_one() {
        let mut m = Machine::<u32>::default();
        // addi x1, x0, 5 ; add x2, x1, x1
        load(&mut m, 0x1000, &words(&[0x00500093, 0x00108133]));
        m.cpu.set_pc(0x1000);
        m.step_one().unwrap();
        assert_eq!((m.cpu.pc(), m.cpu.reg(1)), (0x1004, 5));
        m.step_one().unwrap();
        assert_eq!((m.cpu.pc(), m.cpu.reg(2)), (0x1008, 10));
        assert_eq!(m.instruction_counter(), 2);
    }

    #[test]
    fn test_taken_branch_lands_on_target() {
        let mut m = Machine::<u32>::default();
        // beq x0, x0, +8
        load(&mut m, 0x1000, &words(&[0x00000463, 0, 0x7FF00073]));
        m.cpu.set_pc(0x1000);
        m.step_one().unwrap();
        assert_eq!(m.cpu.pc(), 0x1008);
        assert!(m.simulate_precise().unwrap());
        assert_eq!(m.instruction_counter(), 2);
    }

    #[test]
    fn test_budget() {
        let mut m = Machine::<u32>::new(MachineOptions {
            max_instructions: 3,
            ..MachineOptions::default()
        });
        // jal x0, 0
        load(&mut m, 0x1000, &words(&[0x0000006F]));
        m.cpu.set_pc(0x1000);
        assert!(!m.simulate_precise().unwrap());
        assert_eq!(m.instruction_counter(), 3);
        assert_eq!(m.cpu.pc(), 0x1000);
    }

    #[test]
    fn test_compressed_disabled() {
        let mut m = Machine::<u32>::new(MachineOptions {
            compressed: false,
            ..MachineOptions::default()
        });
        // c.li a0, 1 ; c.nop
        load(&mut m, 0x1000, &[0x05, 0x45, 0x01, 0x00]);
        m.cpu.set_pc(0x1000);
        let err = m.step_one().unwrap_err();
        assert_eq!(err.kind, ExceptionKind::IllegalOpcode);
        assert_eq!(m.cpu.pc(), 0x1000);
        assert_eq!(m.instruction_counter(), 0);
    }

    #[test]
    fn test_fault_keeps_pc() {
        let mut m = Machine::<u32>::default();
        // unimp
        load(&mut m, 0x1000, &words(&[0xC0001073]));
        m.cpu.set_pc(0x1000);
        let err = m.simulate_precise().unwrap_err();
        assert_eq!(err.kind, ExceptionKind::UnimplementedInstruction);
        assert_eq!(m.cpu.pc(), 0x1000);
    }
}

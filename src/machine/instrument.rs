//! Breakpoints and live-patch fast paths on the decoder cache.

use super::Machine;
use crate::cpu::{AddressType, MachineResult};

impl<A: AddressType> Machine<A> {
    /// Install a breakpoint at `addr` and return the original instruction.
    ///
    /// Executing the breakpoint invokes system call
    /// [`SYSCALL_EBREAK`](super::SYSCALL_EBREAK). The address is remembered
    /// so segments rebuilt later get the breakpoint too.
    pub fn install_breakpoint(&mut self, addr: u64) -> MachineResult<u32> {
        let exec = self.execute_segment_at(addr)?;
        let original = exec.install_ebreak(addr)?;
        if !self.options.ebreak_locations.contains(&addr) {
            self.options.ebreak_locations.push(addr);
        }
        log::debug!("Breakpoint installed at 0x{:X} (was 0x{:08X})", addr, original);
        Ok(original)
    }

    /// Remove the breakpoint at `addr`, restoring `original`.
    pub fn remove_breakpoint(&mut self, addr: u64, original: u32) -> MachineResult<()> {
        self.options.ebreak_locations.retain(|&a| a != addr);
        let exec = self.execute_segment_at(addr)?;
        exec.restore_instruction(addr, original)?;
        log::debug!("Breakpoint removed at 0x{:X}", addr);
        Ok(())
    }

    /// Arm a live-patch probe on the return of the function at `addr`.
    ///
    /// The first time the return executes it becomes a plain halt if it
    /// returns to the exit address, or an ordinary return otherwise.
    /// Returns whether the return was patched. Code in segments that are
    /// likely self-modifying is left alone.
    pub fn create_fast_path_function(&mut self, addr: u64) -> MachineResult<bool> {
        let exec = self.execute_segment_at(addr)?;
        if exec.is_likely_jit() {
            log::debug!("No fast path for 0x{:X}: segment is likely self-modifying", addr);
            return Ok(false);
        }
        exec.create_fast_path_function(addr)
    }
}

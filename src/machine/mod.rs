//! The machine: one hart, its guest memory and the embedder surface.
//!
//! # Module Organization
//!
//! | Module | Contents |
//! |--------|----------|
//! | `dispatch` | Block-mode interpreter loop |
//! | `precise` | One-instruction-at-a-time execution |
//! | `segments` | Execute-segment resolution, exec traps and page faults |
//! | `system` | SYSTEM instructions, CSRs and system calls |
//! | `instrument` | Breakpoints and live-patch fast paths |
//! | `serialize` | Register snapshots |
//! | `vmcall` | Calling guest functions from the host |

mod dispatch;
mod instrument;
mod precise;
mod segments;
pub mod serialize;
pub mod system;
mod vmcall;

use std::fmt;
use std::rc::Rc;

use crate::cpu::instruction::{Instruction, REG_A0};
use crate::cpu::{AddressType, Cpu, ExceptionKind, MachineException, MachineResult};
use crate::decode::handlers;
use crate::memory::Memory;
use crate::segment::{ExecuteSegment, SharedSegments};

pub use serialize::SnapshotError;
pub use vmcall::CallArg;

/// Size of the system call table.
pub const SYSCALLS_MAX: usize = 512;
/// System call number that EBREAK and C.EBREAK dispatch to.
pub const SYSCALL_EBREAK: usize = SYSCALLS_MAX - 1;

/// Default guest memory limit.
pub const DEFAULT_MEMORY_MAX: u64 = 64 << 20;
/// Default instruction budget for [`Machine::run`].
pub const DEFAULT_MAX_INSTRUCTIONS: u64 = 10_000_000;

/// System call handler. Arguments are in `a0`..`a6`, the result goes to `a0`.
pub type SyscallHandler<A> = fn(&mut Machine<A>) -> MachineResult<()>;

/// Called for system call numbers without a handler.
pub type UnhandledSyscall<A> = Rc<dyn Fn(&mut Machine<A>, usize) -> MachineResult<()>>;

/// Called when dispatch reaches a page without execute permission. The
/// handler may make the page executable, or move `pc` elsewhere.
pub type ExecPageFault<A> = Rc<dyn Fn(&mut Machine<A>, u64) -> MachineResult<()>>;

/// Replaces the default execute-segment policy. Returning `None` falls
/// back to the default interpreter-only policy.
pub type ExecuteSegmentOverride<A> =
    Rc<dyn Fn(&mut Machine<A>, u64) -> MachineResult<Option<Rc<ExecuteSegment<A>>>>>;

/// Construction options of a [`Machine`].
#[derive(Clone)]
pub struct MachineOptions<A: AddressType> {
    /// Upper bound on materialized guest memory.
    pub memory_max: u64,
    /// Default budget for [`Machine::run`] and precise mode.
    pub max_instructions: u64,
    /// Enable the C extension. When disabled, execute segments use 4-byte
    /// units and compressed instructions are illegal.
    pub compressed: bool,
    /// Registry of execute segments shared with other machines.
    pub shared_segments: Option<SharedSegments<A>>,
    /// Addresses that get an EBREAK installed whenever a covering segment
    /// is built.
    pub ebreak_locations: Vec<u64>,
    /// Value reported through `mhartid`.
    pub cpu_id: u32,
}

impl<A: AddressType> Default for MachineOptions<A> {
    fn default() -> Self {
        Self {
            memory_max: DEFAULT_MEMORY_MAX,
            max_instructions: DEFAULT_MAX_INSTRUCTIONS,
            compressed: true,
            shared_segments: None,
            ebreak_locations: Vec::new(),
            cpu_id: 0,
        }
    }
}

impl<A: AddressType> fmt::Debug for MachineOptions<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineOptions")
            .field("memory_max", &self.memory_max)
            .field("max_instructions", &self.max_instructions)
            .field("compressed", &self.compressed)
            .field("shared_segments", &self.shared_segments.is_some())
            .field("ebreak_locations", &self.ebreak_locations.len())
            .field("cpu_id", &self.cpu_id)
            .finish()
    }
}

/// A RISC-V hart with its memory, instruction budget and callbacks.
pub struct Machine<A: AddressType> {
    pub cpu: Cpu<A>,
    pub memory: Memory<A>,
    counter: u64,
    max_counter: u64,
    stopped: bool,
    options: MachineOptions<A>,
    syscall_handlers: Vec<Option<SyscallHandler<A>>>,
    on_unhandled_syscall: UnhandledSyscall<A>,
    on_exec_page_fault: Option<ExecPageFault<A>>,
    on_execute_segment: Option<ExecuteSegmentOverride<A>>,
}

fn default_unhandled_syscall<A: AddressType>(m: &mut Machine<A>, nr: usize) -> MachineResult<()> {
    log::warn!("Unhandled system call {} at 0x{:X}", nr, m.cpu.pc());
    // -ENOSYS
    m.set_result(-38i64 as u64);
    Ok(())
}

impl<A: AddressType> Machine<A> {
    pub fn new(options: MachineOptions<A>) -> Self {
        Self {
            cpu: Cpu::new(options.cpu_id),
            memory: Memory::new(options.memory_max),
            counter: 0,
            max_counter: options.max_instructions,
            stopped: false,
            syscall_handlers: vec![None; SYSCALLS_MAX],
            on_unhandled_syscall: Rc::new(default_unhandled_syscall::<A>),
            on_exec_page_fault: None,
            on_execute_segment: None,
            options,
        }
    }

    pub fn options(&self) -> &MachineOptions<A> {
        &self.options
    }

    pub fn cpu(&self) -> &Cpu<A> {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu<A> {
        &mut self.cpu
    }

    pub fn memory(&self) -> &Memory<A> {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory<A> {
        &mut self.memory
    }

    /// Instructions retired so far.
    #[inline]
    pub fn instruction_counter(&self) -> u64 {
        self.counter
    }

    pub fn set_instruction_counter(&mut self, counter: u64) {
        self.counter = counter;
    }

    pub fn increment_counter(&mut self, n: u64) {
        self.counter = self.counter.saturating_add(n);
    }

    /// Counter value at which the current run yields.
    #[inline]
    pub fn max_instructions(&self) -> u64 {
        self.max_counter
    }

    pub fn set_max_instructions(&mut self, max: u64) {
        self.max_counter = max;
    }

    /// Halt the machine. The current run returns at its next check.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Whether the machine halted itself during the last run.
    pub fn stopped(&self) -> bool {
        self.stopped
    }

    pub fn is_compressed_enabled(&self) -> bool {
        self.options.compressed
    }

    /// Transfer control to `dest` from an instruction of `len` bytes.
    /// Leaves `pc` at `dest - len` so the caller's step lands on `dest`.
    pub fn jump_to(&mut self, dest: u64, len: u64) -> MachineResult<()> {
        let align = if self.options.compressed { 1 } else { 3 };
        if dest & align != 0 {
            return Err(MachineException::of(ExceptionKind::MisalignedInstruction, dest));
        }
        self.cpu.set_pc(dest.wrapping_sub(len));
        Ok(())
    }

    /// Install `handler` for system call `nr`.
    pub fn install_syscall_handler(&mut self, nr: usize, handler: SyscallHandler<A>) -> MachineResult<()> {
        let slot = self.syscall_handlers.get_mut(nr).ok_or_else(|| {
            MachineException::new(ExceptionKind::IllegalOperation, "System call number out of range", nr as u64)
        })?;
        *slot = Some(handler);
        Ok(())
    }

    pub fn syscall_handler(&self, nr: usize) -> Option<SyscallHandler<A>> {
        self.syscall_handlers.get(nr).copied().flatten()
    }

    pub fn set_unhandled_syscall_handler(&mut self, handler: UnhandledSyscall<A>) {
        self.on_unhandled_syscall = handler;
    }

    pub fn set_exec_page_fault_handler(&mut self, handler: ExecPageFault<A>) {
        self.on_exec_page_fault = Some(handler);
    }

    pub fn set_execute_segment_handler(&mut self, handler: ExecuteSegmentOverride<A>) {
        self.on_execute_segment = Some(handler);
    }

    /// System call argument `n` (`a0` + n).
    #[inline]
    pub fn sysarg(&self, n: u32) -> A {
        self.cpu.reg(REG_A0 + n)
    }

    /// Store a system call result in `a0`.
    #[inline]
    pub fn set_result(&mut self, value: u64) {
        self.cpu.registers_mut().set_u64(REG_A0, value);
    }

    /// `[PC] HEX mnemonic operands` for the instruction `instr` at `pc`.
    pub fn to_string(&self, instr: Instruction, pc: u64) -> String {
        let handler = handlers::decode_one::<A>(instr);
        let text = handler.print(instr, pc);
        let width = A::BYTES * 2;
        if instr.length() == 2 {
            format!("[0x{:0width$X}] {:04X}     {}", pc, instr.whole() & 0xFFFF, text, width = width)
        } else {
            format!("[0x{:0width$X}] {:08X} {}", pc, instr.whole(), text, width = width)
        }
    }
}

impl<A: AddressType> Default for Machine<A> {
    fn default() -> Self {
        Self::new(MachineOptions::default())
    }
}

impl<A: AddressType> fmt::Debug for Machine<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("pc", &format_args!("0x{:X}", self.cpu.pc()))
            .field("counter", &self.counter)
            .field("max_counter", &self.max_counter)
            .field("stopped", &self.stopped)
            .field("memory", &self.memory)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jump_alignment() {
        let mut m = Machine::<u32>::new(MachineOptions::default());
        m.jump_to(0x1002, 4).unwrap();
        assert_eq!(m.cpu.pc(), 0xFFE);
        assert_eq!(m.jump_to(0x1001, 4).unwrap_err().kind, ExceptionKind::MisalignedInstruction);

        let mut m = Machine::<u32>::new(MachineOptions {
            compressed: false,
            ..MachineOptions::default()
        });
        assert_eq!(m.jump_to(0x1002, 4).unwrap_err().kind, ExceptionKind::MisalignedInstruction);
        // Fault leaves pc untouched
        assert_eq!(m.cpu.pc(), 0);
    }

    #[test]
    fn test_to_string() {
        let m = Machine::<u32>::default();
        let add = Instruction::new(0x003100B3);
        assert_eq!(m.to_string(add, 0x1000), "[0x00001000] 003100B3 ADD ra, sp, gp");
        let li = Instruction::new(0x4505);
        assert_eq!(m.to_string(li, 0x1004), "[0x00001004] 4505     C.LI a0, zero, 1");

        let m64 = Machine::<u64>::default();
        assert!(m64.to_string(add, 0x1000).starts_with("[0x0000000000001000] "));
    }

    #[test]
    fn test_syscall_table() {
        let mut m = Machine::<u64>::default();
        assert!(m.syscall_handler(93).is_none());
        m.install_syscall_handler(93, |m| {
            m.stop();
            Ok(())
        })
        .unwrap();
        assert!(m.syscall_handler(93).is_some());
        let err = m.install_syscall_handler(SYSCALLS_MAX, |_| Ok(())).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::IllegalOperation);
    }

    #[test]
    fn test_counters() {
        let mut m = Machine::<u32>::new(MachineOptions {
            max_instructions: 50,
            ..MachineOptions::default()
        });
        assert_eq!(m.max_instructions(), 50);
        m.increment_counter(3);
        assert_eq!(m.instruction_counter(), 3);
        assert!(!m.stopped());
        m.stop();
        assert!(m.stopped());
    }
}

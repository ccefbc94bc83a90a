//! Hart state and the pieces of instruction semantics shared by both
//! execution modes.
//!
//! # Module Organization
//!
//! | Module | Contents |
//! |--------|----------|
//! | `address` | RV32/RV64 width abstraction |
//! | `instruction` | Instruction word and its encoding views |
//! | `registers` | Integer, FP and vector register files |
//! | `alu` | Integer arithmetic shared by dispatch and precise handlers |
//! | `fpu` | FP classification, min/max and conversions |
//! | `atomics` | LR/SC reservation and AMO operations |
//! | `error` | Machine faults |

pub mod address;
pub mod alu;
pub mod atomics;
pub mod error;
pub mod fpu;
pub mod instruction;
pub mod registers;

use std::rc::Rc;

pub use address::{xlen_mask, AddressType};
pub use atomics::{AmoOp, AtomicReservation};
pub use error::{ExceptionKind, MachineException, MachineResult};
pub use instruction::{CompressedInstruction, Instruction};
pub use registers::Registers;

use crate::segment::ExecuteSegment;

/// One hart: architectural registers, the LR/SC reservation and the
/// execute segment that currently covers the program counter.
pub struct Cpu<A: AddressType> {
    registers: Registers<A>,
    reservation: AtomicReservation,
    exec: Rc<ExecuteSegment<A>>,
    cpu_id: u32,
}

impl<A: AddressType> Cpu<A> {
    pub fn new(cpu_id: u32) -> Self {
        Self {
            registers: Registers::new(),
            reservation: AtomicReservation::new(),
            exec: ExecuteSegment::empty(),
            cpu_id,
        }
    }

    #[inline]
    pub fn registers(&self) -> &Registers<A> {
        &self.registers
    }

    #[inline]
    pub fn registers_mut(&mut self) -> &mut Registers<A> {
        &mut self.registers
    }

    #[inline]
    pub fn reg(&self, reg: u32) -> A {
        self.registers.get(reg)
    }

    #[inline]
    pub fn set_reg(&mut self, reg: u32, value: A) {
        self.registers.set(reg, value);
    }

    #[inline]
    pub fn pc(&self) -> u64 {
        self.registers.pc_u64()
    }

    #[inline]
    pub fn set_pc(&mut self, pc: u64) {
        self.registers.set_pc_u64(pc);
    }

    pub fn reservation(&self) -> &AtomicReservation {
        &self.reservation
    }

    pub fn reservation_mut(&mut self) -> &mut AtomicReservation {
        &mut self.reservation
    }

    /// Hart number reported through `mhartid`.
    pub fn cpu_id(&self) -> u32 {
        self.cpu_id
    }

    /// The execute segment used by the last dispatch.
    pub fn current_execute_segment(&self) -> &Rc<ExecuteSegment<A>> {
        &self.exec
    }

    pub(crate) fn set_execute_segment(&mut self, exec: Rc<ExecuteSegment<A>>) {
        self.exec = exec;
    }

    /// Forget the current execute segment. The next run resolves it again.
    pub fn reset_execute_segment(&mut self) {
        self.exec = ExecuteSegment::empty();
    }

    /// Whether `addr` lies inside the current execute segment.
    pub fn is_executable(&self, addr: u64) -> bool {
        self.exec.is_within(addr, 2)
    }
}

impl<A: AddressType> Default for Cpu<A> {
    fn default() -> Self {
        Self::new(0)
    }
}

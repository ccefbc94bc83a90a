//! Machine faults.
//!
//! Every fault raised by decoding, dispatch, memory access or the atomic
//! unit is a [`MachineException`]. It unwinds the dispatch loop through
//! ordinary `Result` propagation and carries the offending value (an
//! address or instruction word) in `data`.

use thiserror::Error;

/// Kind of machine fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    /// The machine or an execute segment is in an unusable state.
    InvalidProgram,
    /// The instruction word does not match any supported encoding.
    IllegalOpcode,
    /// The encoding exists but the operation is not allowed here.
    IllegalOperation,
    /// Memory access without the required page permission.
    ProtectionFault,
    /// Instruction fetch from non-executable memory.
    ExecutionSpaceProtectionFault,
    /// Fault handlers kept redirecting without forward progress.
    ExecutionLoopDetected,
    /// Jump or branch target violates instruction alignment.
    MisalignedInstruction,
    /// Sized access at an address not aligned to its size.
    InvalidAlignment,
    /// Recognized instruction without an implementation.
    UnimplementedInstruction,
    /// Instruction length other than 2 or 4 bytes.
    UnimplementedInstructionLength,
    /// Reservation protocol violation.
    DeadlockReached,
    /// Allocation failure or memory limit reached.
    OutOfMemory,
    /// Extension disabled in the machine options.
    FeatureDisabled,
    /// A guest call ran out of instruction budget.
    MachineTimeout,
    /// Anything else.
    UnknownException,
}

impl ExceptionKind {
    /// Default message for this kind of fault.
    pub fn message(self) -> &'static str {
        match self {
            Self::InvalidProgram => "Machine not initialized",
            Self::IllegalOpcode => "Illegal opcode executed",
            Self::IllegalOperation => "Illegal operation during instruction decoding",
            Self::ProtectionFault => "Protection fault",
            Self::ExecutionSpaceProtectionFault => "Execution space protection fault",
            Self::ExecutionLoopDetected => "Execution loop detected",
            Self::MisalignedInstruction => "Misaligned instruction executed",
            Self::InvalidAlignment => "Invalid alignment for address",
            Self::UnimplementedInstruction => "Unimplemented instruction executed",
            Self::UnimplementedInstructionLength => "Unimplemented instruction format length",
            Self::DeadlockReached => "Atomics deadlock reached",
            Self::OutOfMemory => "Out of memory",
            Self::FeatureDisabled => "Feature disabled",
            Self::MachineTimeout => "Maximum instructions reached",
            Self::UnknownException => "Unknown exception",
        }
    }
}

/// A fault raised by the machine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message} (data: 0x{data:X})")]
pub struct MachineException {
    /// Fault kind.
    pub kind: ExceptionKind,
    /// Human-readable description of the specific failure.
    pub message: &'static str,
    /// Offending address, instruction word or count.
    pub data: u64,
}

impl MachineException {
    /// Create a fault with a specific message.
    pub fn new(kind: ExceptionKind, message: &'static str, data: u64) -> Self {
        Self {
            kind,
            message,
            data,
        }
    }

    /// Create a fault using the default message for its kind.
    pub fn of(kind: ExceptionKind, data: u64) -> Self {
        Self::new(kind, kind.message(), data)
    }
}

/// Result type used throughout the machine.
pub type MachineResult<T> = Result<T, MachineException>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_message() {
        let e = MachineException::of(ExceptionKind::IllegalOpcode, 0x1234);
        assert_eq!(e.kind, ExceptionKind::IllegalOpcode);
        assert_eq!(e.to_string(), "Illegal opcode executed (data: 0x1234)");
    }

    #[test]
    fn test_custom_message() {
        let e = MachineException::new(ExceptionKind::InvalidProgram, "Execute segment was invalid", 0);
        assert_eq!(e.message, "Execute segment was invalid");
        assert_ne!(e, MachineException::of(ExceptionKind::InvalidProgram, 0));
    }
}

//! Calling guest functions from the host.
//!
//! A call follows the standard calling convention: integer arguments go in
//! `a0`..`a7`, floating-point arguments in `fa0`..`fa7`, and byte buffers
//! are copied onto the guest stack and passed by address. The return
//! address is the machine's exit address, so returning from the function
//! halts the machine.

use super::Machine;
use crate::cpu::instruction::{REG_A0, REG_FA0, REG_RA, REG_SP};
use crate::cpu::registers::FpRegister;
use crate::cpu::{xlen_mask, AddressType, ExceptionKind, MachineException, MachineResult};

/// Argument registers of each kind.
const MAX_ARGS: u32 = 8;

/// Argument of a guest function call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallArg {
    /// Register-sized integer.
    Int(u64),
    /// 64-bit integer. Takes a register pair on RV32, low half first.
    Long(u64),
    Float(f32),
    Double(f64),
    /// Copied onto the stack; the register gets its address.
    Bytes(Vec<u8>),
}

impl From<i32> for CallArg {
    fn from(value: i32) -> Self {
        Self::Int(value as i64 as u64)
    }
}

impl From<u32> for CallArg {
    fn from(value: u32) -> Self {
        Self::Int(value as u64)
    }
}

impl From<i64> for CallArg {
    fn from(value: i64) -> Self {
        Self::Long(value as u64)
    }
}

impl From<u64> for CallArg {
    fn from(value: u64) -> Self {
        Self::Long(value)
    }
}

impl From<f32> for CallArg {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<f64> for CallArg {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&[u8]> for CallArg {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

/// Passed as a NUL-terminated C string.
impl From<&str> for CallArg {
    fn from(value: &str) -> Self {
        let mut bytes = Vec::with_capacity(value.len() + 1);
        bytes.extend_from_slice(value.as_bytes());
        bytes.push(0);
        Self::Bytes(bytes)
    }
}

fn too_many_arguments(count: u32) -> MachineException {
    MachineException::new(ExceptionKind::IllegalOperation, "Too many arguments for a guest call", count as u64)
}

impl<A: AddressType> Machine<A> {
    /// Copy `data` below the stack pointer, 16-byte aligned, and return its
    /// guest address. The stack pointer is moved to that address.
    pub fn stack_push(&mut self, data: &[u8]) -> MachineResult<u64> {
        let sp = self.cpu.registers().get_u64(REG_SP);
        let addr = sp.wrapping_sub(data.len() as u64) & !0xF & xlen_mask::<A>();
        self.memory.write_bytes(addr, data)?;
        self.cpu.registers_mut().set_u64(REG_SP, addr);
        Ok(addr)
    }

    /// Load `args` into argument registers and point `ra` at the exit
    /// address.
    pub fn setup_call(&mut self, args: &[CallArg]) -> MachineResult<()> {
        let exit = self.memory.exit_address();
        self.cpu.registers_mut().set_u64(REG_RA, exit);

        let mut iarg = REG_A0;
        let mut farg = REG_FA0;
        for arg in args {
            match arg {
                CallArg::Int(value) => self.int_arg(&mut iarg, *value)?,
                CallArg::Long(value) => {
                    self.int_arg(&mut iarg, *value)?;
                    if !A::is_rv64() {
                        self.int_arg(&mut iarg, *value >> 32)?;
                    }
                }
                CallArg::Float(value) => {
                    self.float_arg(&mut farg)?.set_f32(*value);
                }
                CallArg::Double(value) => {
                    self.float_arg(&mut farg)?.set_f64(*value);
                }
                CallArg::Bytes(bytes) => {
                    let addr = self.stack_push(bytes)?;
                    self.int_arg(&mut iarg, addr)?;
                }
            }
        }

        let sp = self.cpu.registers().get_u64(REG_SP);
        self.cpu.registers_mut().set_u64(REG_SP, sp & !0xF);
        Ok(())
    }

    fn int_arg(&mut self, next: &mut u32, value: u64) -> MachineResult<()> {
        if *next >= REG_A0 + MAX_ARGS {
            return Err(too_many_arguments(*next - REG_A0 + 1));
        }
        self.cpu.registers_mut().set_u64(*next, value);
        *next += 1;
        Ok(())
    }

    fn float_arg(&mut self, next: &mut u32) -> MachineResult<&mut FpRegister> {
        if *next >= REG_FA0 + MAX_ARGS {
            return Err(too_many_arguments(*next - REG_FA0 + 1));
        }
        let reg = *next;
        *next += 1;
        Ok(self.cpu.registers_mut().getfl_mut(reg))
    }

    /// Call the guest function at `addr` with `args` and return `a0`.
    ///
    /// The function runs in block mode with a fresh budget of `max`
    /// instructions. On a normal return the stack pointer is restored to
    /// its value before the call. Running out of budget is a
    /// [`ExceptionKind::MachineTimeout`] fault; the machine state is kept so
    /// the call can be continued with [`run`](Self::run).
    pub fn vmcall(&mut self, addr: u64, args: &[CallArg], max: u64) -> MachineResult<A> {
        let sp = self.cpu.registers().get_u64(REG_SP);
        self.setup_call(args)?;
        log::trace!("vmcall 0x{:X} with {} argument(s)", addr, args.len());

        if !self.simulate(addr, 0, max)? {
            return Err(MachineException::new(
                ExceptionKind::MachineTimeout,
                "Guest call exceeded its instruction budget",
                max,
            ));
        }
        self.cpu.registers_mut().set_u64(REG_SP, sp);
        Ok(self.cpu.reg(REG_A0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::Bytecode;
    use crate::memory::PageAttributes;

    const STOP: u32 = 0x7FF00073;
    const RET: u32 = 0x00008067;
    const EXIT: u64 = 0x4000;
    const STACK_TOP: u64 = 0x9000;

    fn machine<A: AddressType>(code: &[u32]) -> Machine<A> {
        let mut m = Machine::<A>::default();
        let bytes: Vec<u8> = code.iter().flat_map(|w| w.to_le_bytes()).collect();
        m.memory.set_page_attr(0x1000, bytes.len() as u64, PageAttributes::RX);
        m.memory.copy_to_guest(0x1000, &bytes).unwrap();
        m.memory.set_page_attr(EXIT, 4, PageAttributes::RX);
        m.memory.copy_to_guest(EXIT, &STOP.to_le_bytes()).unwrap();
        m.memory.set_exit_address(EXIT);
        m.memory.set_page_attr(0x8000, 0x1000, PageAttributes::RW);
        m.cpu.registers_mut().set_u64(REG_SP, STACK_TOP);
        m
    }

    // add a0, a0, a1 ; ret
    const ADD_ARGS: [u32; 2] = [0x00B50533, RET];

    #[test]
    fn test_call_returns_through_exit() {
        let mut m = machine::<u64>(&ADD_ARGS);
        let result = m.vmcall(0x1000, &[40i32.into(), 2i32.into()], 100).unwrap();
        assert_eq!(result, 42);
        assert_eq!(m.cpu.reg(REG_RA), EXIT);
        // add, ret, stop
        assert_eq!(m.instruction_counter(), 3);
        assert_eq!(m.cpu.registers().get_u64(REG_SP), STACK_TOP);
    }

    #[test]
    fn test_call_with_fast_path() {
        let mut m = machine::<u64>(&ADD_ARGS);
        assert!(m.create_fast_path_function(0x1000).unwrap());
        for (a, b) in [(1i32, 2i32), (-5, 3)] {
            let result = m.vmcall(0x1000, &[a.into(), b.into()], 100).unwrap();
            assert_eq!(result as i64, (a + b) as i64);
            // The return halts directly
            assert_eq!(m.instruction_counter(), 2);
        }
        let seg = m.cpu.current_execute_segment().clone();
        assert_eq!(seg.entry_at(0x1004).bytecode, Bytecode::Stop);
    }

    #[test]
    fn test_string_argument_on_stack() {
        // lbu a0, 0(a0) ; ret
        let mut m = machine::<u64>(&[0x00054503, RET]);
        let result = m.vmcall(0x1000, &["hello".into()], 100).unwrap();
        assert_eq!(result, b'h' as u64);
        assert_eq!(m.memory.read_string(0x9000 - 16, 16).unwrap(), "hello");
        assert_eq!(m.cpu.registers().get_u64(REG_SP), STACK_TOP);
    }

    #[test]
    fn test_float_arguments() {
        // fadd.s fa0, fa0, fa1 ; ret
        let mut m = machine::<u64>(&[0x00B57553, RET]);
        m.vmcall(0x1000, &[1.25f32.into(), 2.25f32.into()], 100).unwrap();
        assert_eq!(m.cpu.registers().getfl(REG_FA0).f32(), 3.5);
    }

    #[test]
    fn test_long_argument_on_rv32() {
        let mut m = machine::<u32>(&ADD_ARGS);
        // Low half in a0, high half in a1
        let result = m.vmcall(0x1000, &[0x1_0000_0002u64.into()], 100).unwrap();
        assert_eq!(result, 3);
    }

    #[test]
    fn test_call_timeout() {
        // j .
        let mut m = machine::<u64>(&[0x0000006F]);
        let err = m.vmcall(0x1000, &[], 50).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::MachineTimeout);
        assert_eq!(m.cpu.pc(), 0x1000);
    }

    #[test]
    fn test_too_many_arguments() {
        let mut m = machine::<u64>(&ADD_ARGS);
        let args: Vec<CallArg> = (0..9i32).map(CallArg::from).collect();
        let err = m.setup_call(&args).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::IllegalOperation);
    }
}

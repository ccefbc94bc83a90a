//! Breakpoint and live-patch instrumentation of a built decoder cache.
//!
//! Both entry points mutate entries in place. Block metadata stays
//! consistent: splitting a block at an address rewrites every earlier
//! entry of that block so it ends exactly on the instrumented address.

use super::entry::DecoderEntry;
use super::execute_segment::ExecuteSegment;
use super::generate::ends_block;
use crate::cpu::instruction::{Instruction, REG_RA};
use crate::cpu::{AddressType, ExceptionKind, MachineException, MachineResult};
use crate::decode::{computed_index_for, threaded_rewrite, Bytecode, FasterItype};

/// EBREAK.
pub const EBREAK_INSTRUCTION: u32 = 0x0010_0073;
/// C.EBREAK.
pub const C_EBREAK_INSTRUCTION: u32 = 0x9002;

/// State of a speculative return probe, stored in the entry's handler
/// byte while its bytecode is [`Bytecode::LivePatch`].
///
/// A probe is untried until it first executes. It then becomes either
/// confirmed-fast (hot-swapped to STOP) or confirmed-slow (restored to the
/// plain return bytecode). Both transitions are permanent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LivePatchProbe {
    /// Untried `JALR x0, 0(ra)`.
    Jalr = 1,
    /// Untried `C.JR ra`.
    CJr = 2,
}

impl LivePatchProbe {
    pub fn from_handler(handler: u8) -> Option<Self> {
        match handler {
            1 => Some(Self::Jalr),
            2 => Some(Self::CJr),
            _ => None,
        }
    }

    /// Bytecode restored when the probe is confirmed slow.
    pub fn fallback(self) -> Bytecode {
        match self {
            Self::Jalr => Bytecode::Jalr,
            Self::CJr => Bytecode::CJr,
        }
    }
}

impl<A: AddressType> ExecuteSegment<A> {
    /// Split the block containing `addr` so that `addr` ends it. Returns
    /// the decoder-cache index of `addr`.
    fn create_block_ending_entry_at(&self, addr: u64) -> MachineResult<usize> {
        let unit = 1u64 << self.shift();
        if !self.is_within(addr, unit) {
            return Err(MachineException::new(
                ExceptionKind::ExecutionSpaceProtectionFault,
                "Breakpoint address is not within the execute segment",
                addr,
            ));
        }
        let idx = self.index_of(addr);
        let entry = self.entry(idx);
        if entry.icount == 0 || addr & (unit - 1) != 0 {
            return Err(MachineException::new(
                ExceptionKind::InvalidProgram,
                "Breakpoint address is not an instruction boundary",
                addr,
            ));
        }

        // Earlier entries of the same block all end where this one does
        let block_end = addr + entry.block_bytes(self.is_compressed());
        let limit: usize = if self.is_compressed() { 255 } else { 0xFFFF };
        let begin_idx = self.index_of(self.exec_begin());
        let mut start = idx;
        let mut j = idx;
        while j > begin_idx && idx - (j - 1) <= limit {
            j -= 1;
            let e = self.entry(j);
            if e.icount != 0 && self.pc_of(j) + e.block_bytes(self.is_compressed()) == block_end {
                start = j;
            } else if !self.is_compressed() {
                break;
            }
        }

        let block_begin = self.pc_of(start);
        let mut starts = Vec::new();
        let mut pc = block_begin;
        while pc < addr {
            starts.push(pc);
            pc += if self.is_compressed() {
                self.read_instruction(pc).length() as u64
            } else {
                4
            };
        }
        if pc != addr {
            return Err(MachineException::new(
                ExceptionKind::InvalidProgram,
                "Last instruction in breakpoint block was not aligned",
                pc,
            ));
        }

        let n = starts.len();
        for (i, &p) in starts.iter().enumerate() {
            self.update_entry(self.index_of(p), |e| {
                e.idxend = ((addr - p) >> self.shift()) as u16;
                e.icount = (n - i + 1) as u16;
            });
        }
        Ok(idx)
    }

    /// Install a trapping EBREAK at `addr` and return the original raw
    /// instruction so it can be restored with
    /// [`restore_instruction`](Self::restore_instruction).
    pub fn install_ebreak(&self, addr: u64) -> MachineResult<u32> {
        let idx = self.create_block_ending_entry_at(addr)?;
        let original = self.read_instruction(addr);
        let ebreak = if original.is_compressed() {
            C_EBREAK_INSTRUCTION
        } else {
            EBREAK_INSTRUCTION
        };
        self.set_entry(
            idx,
            DecoderEntry {
                bytecode: Bytecode::System,
                handler: 0,
                idxend: 0,
                icount: 1,
                instr: ebreak,
            },
        );
        log::debug!("Installed breakpoint at 0x{:X} (was 0x{:X})", addr, original.whole());
        Ok(original.whole())
    }

    /// Put `original` back at `addr` as a one-instruction block.
    pub fn restore_instruction(&self, addr: u64, original: u32) -> MachineResult<()> {
        let idx = self.create_block_ending_entry_at(addr)?;
        let instr = Instruction::new(original);
        let entry = if ends_block::<A>(instr) {
            let bytecode = computed_index_for::<A>(instr);
            let (bytecode, rewritten) =
                threaded_rewrite::<A>(bytecode, A::from_u64(addr), instr, &self.span(), self.is_compressed())?;
            DecoderEntry::new(bytecode, rewritten)
        } else {
            // A block must not fall through into the next one
            DecoderEntry::new(Bytecode::FuncBlock, original)
        };
        self.set_entry(
            idx,
            DecoderEntry {
                idxend: 0,
                icount: 1,
                ..entry
            },
        );
        log::debug!("Restored instruction 0x{:X} at 0x{:X}", original, addr);
        Ok(())
    }

    /// Walk forward from a function entry to its return and turn the
    /// return into a live-patch probe. Returns false when no plain return
    /// is found, or when the function might end in a tail call.
    pub fn create_fast_path_function(&self, mut block_pc: u64) -> MachineResult<bool> {
        if !self.is_within(block_pc, 2) {
            return Err(MachineException::new(
                ExceptionKind::ExecutionSpaceProtectionFault,
                "Function start address is not within the execute segment",
                block_pc,
            ));
        }
        let compressed = self.is_compressed();
        let unit = 1u64 << self.shift();
        let end = self.exec_end();

        while block_pc < end {
            block_pc += self.entry_at(block_pc).block_bytes(compressed);
            if block_pc >= end {
                return Err(MachineException::new(
                    ExceptionKind::InvalidProgram,
                    "Function block ended outside execute area",
                    block_pc,
                ));
            }
            let idx = self.index_of(block_pc);
            let entry = self.entry(idx);
            match entry.bytecode {
                Bytecode::Jalr => {
                    let instr = FasterItype::from_whole(entry.instr);
                    if instr.rs2() == REG_RA && instr.rs1() == 0 && instr.signed_imm() == 0 {
                        self.arm_probe(idx, block_pc, LivePatchProbe::Jalr)?;
                        return Ok(true);
                    }
                    // Possibly a tail call
                    return Ok(false);
                }
                Bytecode::CJr => {
                    if entry.instr == REG_RA {
                        self.arm_probe(idx, block_pc, LivePatchProbe::CJr)?;
                        return Ok(true);
                    }
                    return Ok(false);
                }
                Bytecode::Stop => return Ok(true),
                Bytecode::LivePatch if LivePatchProbe::from_handler(entry.handler).is_some() => {
                    return Ok(true);
                }
                _ => {}
            }
            block_pc += unit;
        }
        Ok(false)
    }

    fn arm_probe(&self, idx: usize, pc: u64, probe: LivePatchProbe) -> MachineResult<()> {
        if self.entry(idx).idxend != 0 {
            return Err(MachineException::new(
                ExceptionKind::InvalidProgram,
                "Function block ended but was not last instruction in block",
                pc,
            ));
        }
        self.update_entry(idx, |e| e.set_bytecode_and_handler(Bytecode::LivePatch, probe as u8));
        log::debug!("Armed live-patch probe {:?} at 0x{:X}", probe, pc);
        Ok(())
    }

    /// Resolve the live-patch probe at `idx` on its first execution and
    /// return the bytecode the entry now holds.
    pub fn resolve_live_patch(&self, idx: usize, ra: u64, exit_address: u64) -> Bytecode {
        let entry = self.entry(idx);
        let next = match LivePatchProbe::from_handler(entry.handler) {
            Some(_) if ra == exit_address => Bytecode::Stop,
            Some(probe) => probe.fallback(),
            None => Bytecode::Invalid,
        };
        self.update_entry(idx, |e| e.set_bytecode_and_handler(next, 0));
        log::debug!("Live-patch at 0x{:X} resolved to {:?}", self.pc_of(idx), next);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADD: u32 = 0x003100B3; // add x1, x2, x3
    const ADDI: u32 = 0x00108093; // addi x1, x1, 1
    const RET: u32 = 0x00008067; // jalr x0, 0(ra)
    const JR_T0: u32 = 0x00028067; // jalr x0, 0(t0)

    fn words(code: &[u32]) -> Vec<u8> {
        code.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_breakpoint_block_accounting() {
        let code = words(&[ADD, ADDI, ADDI, ADD, RET]);
        let seg = ExecuteSegment::<u32>::create(&code, 0x1000, false, &[]).unwrap();
        assert_eq!(seg.entry_at(0x1000).block_bytes(false), 16);

        let old = seg.install_ebreak(0x1008).unwrap();
        assert_eq!(old, ADDI);

        let start = seg.entry_at(0x1000);
        assert_eq!(0x1000 + start.block_bytes(false), 0x1008);
        assert_eq!(start.instruction_count(), 3);
        assert_eq!(seg.entry_at(0x1004).block_bytes(false), 4);
        assert_eq!(seg.entry_at(0x1004).instruction_count(), 2);
        let bp = seg.entry_at(0x1008);
        assert_eq!(bp.bytecode, Bytecode::System);
        assert_eq!(bp.instr, EBREAK_INSTRUCTION);
        assert_eq!((bp.block_bytes(false), bp.instruction_count()), (0, 1));
        // Later entries keep their block
        assert_eq!(seg.entry_at(0x100C).block_bytes(false), 4);
    }

    #[test]
    fn test_breakpoint_restore() {
        let code = words(&[ADD, ADDI, RET]);
        let seg = ExecuteSegment::<u64>::create(&code, 0x1000, false, &[]).unwrap();
        let old = seg.install_ebreak(0x1004).unwrap();
        seg.restore_instruction(0x1004, old).unwrap();
        let e = seg.entry_at(0x1004);
        assert_eq!(e.bytecode, Bytecode::FuncBlock);
        assert_eq!(e.instr, ADDI);
        assert_eq!(e.instruction_count(), 1);

        let old = seg.install_ebreak(0x1008).unwrap();
        seg.restore_instruction(0x1008, old).unwrap();
        assert_eq!(seg.entry_at(0x1008).bytecode, Bytecode::Jalr);
    }

    #[test]
    fn test_breakpoint_outside_segment() {
        let seg = ExecuteSegment::<u32>::create(&words(&[ADD, RET]), 0x1000, false, &[]).unwrap();
        let err = seg.install_ebreak(0x2000).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::ExecutionSpaceProtectionFault);
    }

    #[test]
    fn test_compressed_breakpoint() {
        // c.li a0,1 ; addi x1,x1,1 ; c.li a0,1 ; c.jr ra
        let mut code: Vec<u8> = 0x4505u16.to_le_bytes().to_vec();
        code.extend_from_slice(&ADDI.to_le_bytes());
        code.extend_from_slice(&0x4505u16.to_le_bytes());
        code.extend_from_slice(&0x8082u16.to_le_bytes());
        let seg = ExecuteSegment::<u32>::create(&code, 0x3000, true, &[]).unwrap();

        // Middle of the 32-bit instruction
        assert_eq!(seg.install_ebreak(0x3004).unwrap_err().kind, ExceptionKind::InvalidProgram);

        assert_eq!(seg.install_ebreak(0x3006).unwrap(), 0x4505);
        let start = seg.entry_at(0x3000);
        assert_eq!(start.block_bytes(true), 6);
        assert_eq!(start.instruction_count(), 3);
        assert_eq!(seg.entry_at(0x3002).instruction_count(), 2);
        assert_eq!(seg.entry_at(0x3006).instr, C_EBREAK_INSTRUCTION);
    }

    #[test]
    fn test_fast_path_function() {
        let code = words(&[ADD, ADDI, RET]);
        let seg = ExecuteSegment::<u32>::create(&code, 0x1000, false, &[]).unwrap();
        assert!(seg.create_fast_path_function(0x1000).unwrap());
        let e = seg.entry_at(0x1008);
        assert_eq!((e.bytecode, e.handler), (Bytecode::LivePatch, LivePatchProbe::Jalr as u8));
        // Already armed
        assert!(seg.create_fast_path_function(0x1000).unwrap());
    }

    #[test]
    fn test_fast_path_rejects_tail_call() {
        let code = words(&[ADD, JR_T0]);
        let seg = ExecuteSegment::<u32>::create(&code, 0x1000, false, &[]).unwrap();
        assert!(!seg.create_fast_path_function(0x1000).unwrap());
        assert_eq!(seg.entry_at(0x1004).bytecode, Bytecode::Jalr);
    }

    #[test]
    fn test_live_patch_transitions_once() {
        let code = words(&[ADD, RET, ADD, RET]);
        let seg = ExecuteSegment::<u32>::create(&code, 0x1000, false, &[]).unwrap();
        assert!(seg.create_fast_path_function(0x1000).unwrap());
        assert!(seg.create_fast_path_function(0x1008).unwrap());

        let fast = seg.index_of(0x1004);
        assert_eq!(seg.resolve_live_patch(fast, 0xDEAD, 0xDEAD), Bytecode::Stop);
        assert_eq!(seg.entry(fast).bytecode, Bytecode::Stop);

        let slow = seg.index_of(0x100C);
        assert_eq!(seg.resolve_live_patch(slow, 0x1234, 0xDEAD), Bytecode::Jalr);
        assert_eq!(seg.entry(slow).handler, 0);
    }
}

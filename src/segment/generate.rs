//! Decoder-cache generation and block realization.
//!
//! Building a segment happens in three passes over the copied code:
//!
//! 1. Every instruction start is classified and rewritten. In compressed
//!    mode the upper half of a 32-bit instruction gets an invalid entry so
//!    that jumping into the middle of an instruction traps.
//! 2. Block metadata is realized. Without compressed instructions a single
//!    backward scan counts the distance to the next block terminator. With
//!    them, blocks are measured forward and are limited to 255 units.
//! 3. Configured EBREAK locations inside the range are installed.

use std::cell::Cell;

use super::crc32c::crc32c;
use super::entry::{unit_shift, DecoderEntry};
use super::execute_segment::ExecuteSegment;
use crate::cpu::instruction::{ci_code, CompressedInstruction, Instruction};
use crate::cpu::{AddressType, ExceptionKind, MachineException, MachineResult};
use crate::decode::{computed_index_for, is_block_terminator, threaded_rewrite, Bytecode, ExecSpan};
use crate::memory::{PAGE_MASK, PAGE_SIZE};

/// Longest run of units in one compressed-mode block.
const MAX_COMPRESSED_BLOCK_UNITS: u64 = 255;
/// Longest run of instructions in one block without compressed
/// instructions.
const MAX_BLOCK_INSTRUCTIONS: u32 = 0xFFFF;

fn invalid_program(message: &'static str, data: u64) -> MachineException {
    MachineException::new(ExceptionKind::InvalidProgram, message, data)
}

/// Allocate `len` copies of `value`, reporting allocation failure as
/// [`ExceptionKind::OutOfMemory`] at `addr`.
pub fn try_alloc_slice<T: Clone>(len: usize, value: T, addr: u64) -> MachineResult<Box<[T]>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| {
        MachineException::new(ExceptionKind::OutOfMemory, "Unable to allocate execute segment", addr)
    })?;
    buf.resize(len, value);
    Ok(buf.into_boxed_slice())
}

/// Whether a compressed instruction falls through to the next one.
pub(crate) fn is_regular_compressed<A: AddressType>(ci: CompressedInstruction) -> bool {
    let op = ci.opcode();
    if op == ci_code(0b001, 0b01) {
        // C.JAL on RV32, C.ADDIW on RV64
        return A::is_rv64();
    }
    if op == ci_code(0b101, 0b01) || op == ci_code(0b110, 0b01) || op == ci_code(0b111, 0b01) {
        return false;
    }
    if op == ci_code(0b100, 0b10) && ci.rd() != 0 && ci.rs2() == 0 {
        // C.JR / C.JALR
        return false;
    }
    true
}

/// Whether `instr` must be the last instruction of a block.
pub(crate) fn ends_block<A: AddressType>(instr: Instruction) -> bool {
    if instr.is_compressed() {
        !is_regular_compressed::<A>(instr.compressed())
    } else {
        is_block_terminator(instr)
    }
}

impl<A: AddressType> ExecuteSegment<A> {
    /// Copy `code` (guest bytes starting at `vaddr`) into a new segment and
    /// build its decoder cache.
    pub fn create(
        code: &[u8],
        vaddr: u64,
        compressed: bool,
        ebreak_locations: &[u64],
    ) -> MachineResult<Self> {
        let exlen = code.len() as u64;
        let unit = 1u64 << unit_shift(compressed);
        if exlen % unit != 0 {
            return Err(invalid_program("Misaligned execute segment length", exlen));
        }

        let pbase = vaddr & !PAGE_MASK;
        let prelen = vaddr - pbase;
        // Four bytes of slack for unchecked reads and the trailing entry
        let plen = (exlen + prelen + 4 + PAGE_MASK) & !PAGE_MASK;
        let exec_end = vaddr
            .checked_add(exlen)
            .filter(|end| A::is_rv64() || *end <= 1u64 << 32)
            .ok_or_else(|| invalid_program("Segment virtual base was bogus", vaddr))?;
        if pbase.checked_add(plen).is_none() {
            return Err(invalid_program("Segment virtual base was bogus", vaddr));
        }
        if plen / PAGE_SIZE == 0 {
            return Err(invalid_program("Program produced empty decoder cache", vaddr));
        }

        let mut data = try_alloc_slice(plen as usize, 0u8, vaddr)?;
        data[prelen as usize..(prelen + exlen) as usize].copy_from_slice(code);
        let hash = crc32c(code);

        let entries = try_alloc_slice(
            (plen >> unit_shift(compressed)) as usize,
            Cell::new(DecoderEntry::INVALID),
            vaddr,
        )?;
        let segment = Self::from_parts(pbase, vaddr, exec_end, data, entries, compressed, hash);

        segment.generate_decoder_cache()?;
        segment.realize_blocks()?;

        for &addr in ebreak_locations {
            if addr != 0 && addr >= segment.exec_begin() && addr < segment.exec_end() {
                segment.install_ebreak(addr)?;
                log::debug!("Added ebreak location at 0x{:X}", addr);
            }
        }

        log::debug!(
            "Created execute segment 0x{:X}-0x{:X} ({} bytes, crc32c 0x{:08X})",
            vaddr,
            exec_end,
            exlen,
            hash
        );
        Ok(segment)
    }

    /// Classify and rewrite every instruction start.
    fn generate_decoder_cache(&self) -> MachineResult<()> {
        let begin = self.exec_begin();
        let end = self.exec_end();
        let span = ExecSpan::new(begin, end);
        let compressed = self.is_compressed();

        let mut was_full_instruction = true;
        let mut dst = begin;
        while dst < end {
            let instruction = self.read_instruction(dst);
            let entry = if !compressed && instruction.is_compressed() {
                DecoderEntry::new(Bytecode::Invalid, instruction.whole())
            } else if !compressed || was_full_instruction {
                let bytecode = computed_index_for::<A>(instruction);
                let (bytecode, rewritten) =
                    threaded_rewrite::<A>(bytecode, A::from_u64(dst), instruction, &span, compressed)?;
                DecoderEntry::new(bytecode, rewritten)
            } else {
                // Upper half of a 32-bit instruction
                DecoderEntry::INVALID
            };
            if entry.bytecode.is_branch() {
                log::trace!("Branch bytecode {:?} at 0x{:X}", entry.bytecode, dst);
            }
            self.set_entry(self.index_of(dst), entry);

            if compressed {
                dst += 2;
                was_full_instruction = if was_full_instruction {
                    instruction.length() == 2
                } else {
                    true
                };
            } else {
                dst += 4;
            }
        }
        self.set_entry(self.index_of(end), DecoderEntry::INVALID);
        Ok(())
    }

    fn realize_blocks(&self) -> MachineResult<()> {
        if self.is_compressed() {
            self.realize_compressed()
        } else {
            self.realize_uncompressed()
        }
    }

    /// Backward scan: every entry learns the distance to the next block
    /// terminator below it.
    fn realize_uncompressed(&self) -> MachineResult<()> {
        let base = self.exec_begin();
        let last = self.exec_end();
        let mut idxend: u32 = 0;
        let Some(mut pc) = last.checked_sub(4) else {
            return Ok(());
        };
        while pc >= base && pc < last {
            let instruction = self.read_instruction(pc);
            let idx = self.index_of(pc);
            if is_block_terminator(instruction) {
                idxend = 0;
            }
            if idxend == MAX_BLOCK_INSTRUCTIONS {
                // Invalid entries already end execution
                if self.entry(idx).bytecode != Bytecode::Invalid {
                    self.set_entry(idx, DecoderEntry::new(Bytecode::FuncBlock, instruction.whole()));
                }
                idxend = 0;
            }
            self.update_entry(idx, |e| {
                e.idxend = idxend as u16;
                e.icount = (idxend + 1) as u16;
            });
            idxend += 1;

            match pc.checked_sub(4) {
                Some(prev) => pc = prev,
                None => break,
            }
        }
        Ok(())
    }

    /// Forward scan over compressed code, one block at a time.
    fn realize_compressed(&self) -> MachineResult<()> {
        let base = self.exec_begin();
        let last = self.exec_end();
        if base >= last {
            return Err(invalid_program("The execute segment has an overflow", base));
        }
        if base & 1 != 0 {
            return Err(invalid_program("The execute segment is misaligned", base));
        }

        // (index, units) of each instruction in the current block
        let mut block: Vec<(usize, u64)> = Vec::with_capacity(256);
        let mut pc = base;
        while pc < last {
            block.clear();
            let block_pc = pc;
            let block_idx = self.index_of(pc);
            let mut idx = block_idx;
            loop {
                let instruction = self.read_instruction(pc);
                let length = instruction.length() as u64;
                let units = length >> 1;
                block.push((idx, units));

                pc = pc.checked_add(length).ok_or_else(|| {
                    invalid_program("PC overflow during execute segment decoding", pc)
                })?;

                // An instruction crossing the end is garbage
                if pc > last {
                    self.set_entry(idx, DecoderEntry::INVALID);
                    break;
                }
                if ends_block::<A>(instruction) {
                    break;
                }
                // The last instruction should have ended the block
                if pc >= last {
                    self.set_entry(idx, DecoderEntry::INVALID);
                    break;
                }
                if (idx - block_idx) as u64 + units >= MAX_COMPRESSED_BLOCK_UNITS {
                    self.set_entry(idx, DecoderEntry::new(Bytecode::FuncBlock, instruction.whole()));
                    break;
                }
                idx += units as usize;
            }
            self.fill_entries(&block, block_pc, pc)?;
        }
        Ok(())
    }

    fn fill_entries(&self, block: &[(usize, u64)], block_pc: u64, current_pc: u64) -> MachineResult<()> {
        let Some(&(_, last_units)) = block.last() else {
            return Err(invalid_program("Encountered empty block after measuring", block_pc));
        };
        // Units from the block start to its last instruction
        let mut count = ((current_pc - block_pc) >> 1) - last_units;
        if count > MAX_COMPRESSED_BLOCK_UNITS {
            return Err(invalid_program("Too many non-branching instructions in a row", block_pc));
        }
        let n = block.len();
        for (i, &(idx, units)) in block.iter().enumerate() {
            self.update_entry(idx, |e| {
                e.idxend = count as u16;
                e.icount = (n - i) as u16;
            });
            count = count.saturating_sub(units);
        }
        log::trace!("Block 0x{:X} has {} instructions", block_pc, n);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADD_X1_X2_X3: u32 = 0x003100B3;
    const ADDI_X1_X1_1: u32 = 0x00108093;
    const BEQ_X0_X0_8: u32 = 0x00000463;
    const STOP: u32 = 0x7FF00073;

    fn words(code: &[u32]) -> Vec<u8> {
        code.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    fn halves(code: &[u16]) -> Vec<u8> {
        code.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_uncompressed_blocks() {
        let code = words(&[ADD_X1_X2_X3, ADDI_X1_X1_1, BEQ_X0_X0_8, ADD_X1_X2_X3, STOP]);
        let seg = ExecuteSegment::<u32>::create(&code, 0x1000, false, &[]).unwrap();

        let first = seg.entry_at(0x1000);
        assert_eq!(first.bytecode, Bytecode::OpAdd);
        assert_eq!(first.block_bytes(false), 8);
        assert_eq!(first.instruction_count(), 3);
        assert_eq!(seg.entry_at(0x1008).block_bytes(false), 0);
        assert_eq!(seg.entry_at(0x100C).block_bytes(false), 4);
        assert_eq!(seg.entry_at(0x1010).bytecode, Bytecode::Stop);
        // Trailing entry
        assert_eq!(seg.entry_at(0x1014), DecoderEntry::INVALID);
    }

    #[test]
    fn test_segment_geometry() {
        let code = words(&[ADD_X1_X2_X3, STOP]);
        let seg = ExecuteSegment::<u64>::create(&code, 0x10010, false, &[]).unwrap();
        assert_eq!(seg.pagedata_base(), 0x10000);
        assert_eq!(seg.exec_begin(), 0x10010);
        assert_eq!(seg.exec_end(), 0x10018);
        assert_eq!(seg.crc32c(), crc32c(&code));
        assert_eq!(seg.data().len(), 4096);
    }

    #[test]
    fn test_misaligned_length_rejected() {
        let err = ExecuteSegment::<u32>::create(&[0x13, 0, 0, 0, 0, 0], 0x1000, false, &[]).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::InvalidProgram);
        assert!(ExecuteSegment::<u32>::create(&[0; 6], 0x1000, true, &[]).is_ok());
    }

    #[test]
    fn test_rv32_range_overflow() {
        let code = words(&[STOP]);
        let err = ExecuteSegment::<u32>::create(&code, 0xFFFF_FFFE, false, &[]).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::InvalidProgram);
    }

    #[test]
    fn test_compressed_blocks() {
        // c.li a0,1 ; addi x1,x1,1 ; c.mv a1,a0 ; c.jr ra
        let mut code = halves(&[0x4505]);
        code.extend_from_slice(&ADDI_X1_X1_1.to_le_bytes());
        code.extend_from_slice(&halves(&[0x85AA, 0x8082]));
        let seg = ExecuteSegment::<u32>::create(&code, 0x2000, true, &[]).unwrap();

        let first = seg.entry_at(0x2000);
        assert_eq!(first.bytecode, Bytecode::CAddi);
        assert_eq!(first.block_bytes(true), 8);
        assert_eq!(first.instruction_count(), 4);
        // Upper half of the 32-bit instruction
        assert_eq!(seg.entry_at(0x2004).bytecode, Bytecode::Invalid);
        assert_eq!(seg.entry_at(0x2004).icount, 0);
        assert_eq!(seg.entry_at(0x2002).instruction_count(), 3);
        assert_eq!(seg.entry_at(0x2006).block_bytes(true), 2);
        assert_eq!(seg.entry_at(0x2008).bytecode, Bytecode::CJr);
        assert_eq!(seg.entry_at(0x2008).instruction_count(), 1);
    }

    #[test]
    fn test_compressed_unterminated_tail_is_invalid() {
        // c.li a0,1 ; c.li a0,1 (no terminator)
        let code = halves(&[0x4505, 0x4505]);
        let seg = ExecuteSegment::<u64>::create(&code, 0x2000, true, &[]).unwrap();
        assert_eq!(seg.entry_at(0x2000).bytecode, Bytecode::CAddi);
        assert_eq!(seg.entry_at(0x2002).bytecode, Bytecode::Invalid);
        assert_eq!(seg.entry_at(0x2000).instruction_count(), 2);
    }

    #[test]
    fn test_long_compressed_run_is_split() {
        let mut code = halves(&vec![0x4505; 300]);
        code.extend_from_slice(&halves(&[0x8082]));
        let seg = ExecuteSegment::<u32>::create(&code, 0x4000, true, &[]).unwrap();
        let first = seg.entry_at(0x4000);
        assert!(first.idxend <= 255);
        let end = 0x4000 + first.block_bytes(true);
        assert_eq!(seg.entry_at(end).bytecode, Bytecode::FuncBlock);
        assert_eq!(seg.entry_at(end).instr, 0x4505);
    }

    #[test]
    fn test_ebreak_locations_installed() {
        let code = words(&[ADD_X1_X2_X3, ADDI_X1_X1_1, STOP]);
        let seg = ExecuteSegment::<u32>::create(&code, 0x1000, false, &[0x1004, 0x9000]).unwrap();
        assert_eq!(seg.entry_at(0x1004).bytecode, Bytecode::System);
        assert_eq!(seg.entry_at(0x1000).block_bytes(false), 4);
        assert_eq!(seg.entry_at(0x1000).instruction_count(), 2);
    }

    #[test]
    fn test_terminators() {
        assert!(ends_block::<u32>(Instruction::new(BEQ_X0_X0_8)));
        assert!(!ends_block::<u32>(Instruction::new(ADD_X1_X2_X3)));
        // c.jal is a jump on RV32 and c.addiw on RV64
        assert!(ends_block::<u32>(Instruction::new(0x2001)));
        assert!(!ends_block::<u64>(Instruction::new(0x2085)));
        assert!(ends_block::<u64>(Instruction::new(0x8082)));
        // c.ebreak falls through
        assert!(!ends_block::<u64>(Instruction::new(0x9002)));
    }
}

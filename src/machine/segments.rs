//! Execute-segment resolution.
//!
//! Dispatch asks for a new segment whenever control leaves the current one
//! or the current one went stale. Resolution runs page exec traps first,
//! then looks in the memory registry, then asks the embedder's segment
//! policy, and finally builds a new segment from the executable pages
//! around `pc`. Pages without execute permission go through the page fault
//! handler.

use std::rc::Rc;

use super::Machine;
use crate::cpu::{AddressType, ExceptionKind, MachineException, MachineResult};
use crate::memory::{page_number, PAGE_MASK, PAGE_SIZE};
use crate::segment::crc32c::crc32c;
use crate::segment::{try_alloc_slice, ExecuteSegment, SegmentKey};

/// Redirections tolerated while resolving one address.
const MAX_RESTARTS: usize = 4;

impl<A: AddressType> Machine<A> {
    /// Resolve the execute segment for `pc` and make it current.
    ///
    /// Exec traps and the page fault handler may move `pc`; the final
    /// address is left in the program counter.
    pub fn next_execute_segment(&mut self, pc: u64) -> MachineResult<Rc<ExecuteSegment<A>>> {
        let mut pc = pc;
        for _ in 0..MAX_RESTARTS {
            let align = if self.options.compressed { 1 } else { 3 };
            if pc & align != 0 {
                return Err(MachineException::of(ExceptionKind::MisalignedInstruction, pc));
            }
            self.cpu.set_pc(pc);
            let pageno = page_number(pc);

            if let Some(trap) = self.memory.exec_trap(pageno) {
                trap(self, pc & PAGE_MASK, pc)?;
                if self.cpu.pc() != pc {
                    log::debug!("Exec trap on page 0x{:X} redirected 0x{:X} to 0x{:X}", pageno, pc, self.cpu.pc());
                    pc = self.cpu.pc();
                    continue;
                }
            }

            if let Some(segment) = self.memory.exec_segment_for(pc) {
                return Ok(self.enter_segment(segment, pc));
            }

            if let Some(policy) = self.on_execute_segment.clone() {
                if let Some(segment) = policy(self, pc)? {
                    if segment.is_stale() || !segment.is_within(pc, 2) {
                        return Err(MachineException::new(
                            ExceptionKind::InvalidProgram,
                            "Execute segment override does not cover the program counter",
                            pc,
                        ));
                    }
                    self.memory.insert_execute_segment(segment.clone());
                    return Ok(self.enter_segment(segment, pc));
                }
            }

            if self.memory.page_attr(pageno).exec {
                let segment = self.build_execute_segment(pc)?;
                return Ok(self.enter_segment(segment, pc));
            }

            let Some(handler) = self.on_exec_page_fault.clone() else {
                return Err(MachineException::of(ExceptionKind::ExecutionSpaceProtectionFault, pc));
            };
            handler(self, pc)?;
            if self.cpu.pc() == pc && !self.memory.page_attr(pageno).exec {
                return Err(MachineException::of(ExceptionKind::ExecutionSpaceProtectionFault, pc));
            }
            pc = self.cpu.pc();
        }
        Err(MachineException::of(ExceptionKind::ExecutionLoopDetected, pc))
    }

    fn enter_segment(&mut self, segment: Rc<ExecuteSegment<A>>, pc: u64) -> Rc<ExecuteSegment<A>> {
        self.cpu.set_pc(pc);
        self.cpu.set_execute_segment(segment.clone());
        segment
    }

    /// Segment covering `addr`, built without running traps or callbacks.
    pub(crate) fn execute_segment_at(&mut self, addr: u64) -> MachineResult<Rc<ExecuteSegment<A>>> {
        if let Some(segment) = self.memory.exec_segment_for(addr) {
            return Ok(segment);
        }
        if !self.memory.page_attr(page_number(addr)).exec {
            return Err(MachineException::of(ExceptionKind::ExecutionSpaceProtectionFault, addr));
        }
        self.build_execute_segment(addr)
    }

    /// Merge the executable pages around `pc` into one segment, reusing a
    /// shared build of identical code when one exists.
    fn build_execute_segment(&mut self, pc: u64) -> MachineResult<Rc<ExecuteSegment<A>>> {
        let compressed = self.options.compressed;
        let pageno = page_number(pc);
        let page_limit = if A::is_rv64() {
            u64::MAX / PAGE_SIZE
        } else {
            (1u64 << 32) / PAGE_SIZE
        };

        // The copy and the decoder cache may not outgrow guest memory
        let max_pages = (self.memory.memory_max() / PAGE_SIZE).max(1);
        let too_large = || {
            MachineException::new(ExceptionKind::OutOfMemory, "Execute segment exceeds the memory limit", pc)
        };

        let mut first = pageno;
        while first > 0 && self.memory.page_attr(first - 1).exec {
            first -= 1;
            if pageno + 1 - first > max_pages {
                return Err(too_large());
            }
        }
        let mut last = pageno + 1;
        while last < page_limit && self.memory.page_attr(last).exec {
            last += 1;
            if last - first > max_pages {
                return Err(too_large());
            }
        }

        let begin = first * PAGE_SIZE;
        let len = (last - first) * PAGE_SIZE;
        let mut code = try_alloc_slice(len as usize, 0u8, begin)?.into_vec();
        self.memory.read_bytes_unchecked(begin, &mut code);
        let key = SegmentKey {
            begin,
            crc32c: crc32c(&code),
            len,
            compressed,
        };

        self.memory.evict_stale_segments();
        let likely_jit = (first..last).any(|p| self.memory.page_attr(p).write);
        let execute_only = (first..last).all(|p| !self.memory.page_attr(p).read);
        // Self-modifying code and per-machine breakpoints stay private
        let shared = self
            .options
            .shared_segments
            .as_ref()
            .filter(|_| !likely_jit && self.options.ebreak_locations.is_empty());
        let segment = match shared.and_then(|s| s.get(&key)) {
            Some(segment) => segment,
            None => {
                let mut segment = ExecuteSegment::create(&code, begin, compressed, &self.options.ebreak_locations)?;
                segment.set_flags(likely_jit, execute_only);
                let segment = Rc::new(segment);
                if let Some(shared) = shared {
                    shared.insert(&segment);
                }
                segment
            }
        };
        self.memory.insert_execute_segment(segment.clone());
        Ok(segment)
    }

    /// Drop every execute segment. The next dispatch rebuilds from memory.
    pub fn evict_execute_segments(&mut self) {
        self.memory.evict_execute_segments();
        self.cpu.reset_execute_segment();
    }
}

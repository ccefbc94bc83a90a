//! Paged guest memory.
//!
//! Sparse storage of 4 KiB pages keyed by page number, each with its own
//! read/write/exec attributes. Pages are materialized on first write;
//! unmapped memory reads as zero and carries [`PageAttributes::default`].
//!
//! Memory also owns the registry of execute segments built from its
//! executable pages. Any write that reaches an executable page marks the
//! segments covering it stale so dispatch rebuilds them on next entry.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use byteorder::{ByteOrder, LittleEndian};

use crate::cpu::{AddressType, ExceptionKind, MachineException, MachineResult};
use crate::machine::Machine;
use crate::segment::ExecuteSegment;

pub const PAGE_SIZE: u64 = 4096;
pub const PAGE_MASK: u64 = PAGE_SIZE - 1;

/// Page permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageAttributes {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
}

impl PageAttributes {
    pub const RW: Self = Self { read: true, write: true, exec: false };
    pub const RX: Self = Self { read: true, write: false, exec: true };
    pub const RWX: Self = Self { read: true, write: true, exec: true };
    pub const X: Self = Self { read: false, write: false, exec: true };
    pub const NONE: Self = Self { read: false, write: false, exec: false };
}

impl Default for PageAttributes {
    fn default() -> Self {
        Self::RW
    }
}

/// Callback run when dispatch enters a trapped executable page. Receives
/// the page offset of the entry address and the entry address itself.
pub type ExecTrap<A> = Rc<dyn Fn(&mut Machine<A>, u64, u64) -> MachineResult<()>>;

/// Fixed-size little-endian value stored in guest memory.
pub trait MemoryValue: Copy {
    const SIZE: usize;
    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(self, bytes: &mut [u8]);
}

impl MemoryValue for u8 {
    const SIZE: usize = 1;
    fn read_le(bytes: &[u8]) -> Self {
        bytes[0]
    }
    fn write_le(self, bytes: &mut [u8]) {
        bytes[0] = self;
    }
}

macro_rules! impl_memory_value {
    ($ty:ty, $size:expr, $read:ident, $write:ident) => {
        impl MemoryValue for $ty {
            const SIZE: usize = $size;
            fn read_le(bytes: &[u8]) -> Self {
                LittleEndian::$read(bytes)
            }
            fn write_le(self, bytes: &mut [u8]) {
                LittleEndian::$write(bytes, self)
            }
        }
    };
}

impl_memory_value!(u16, 2, read_u16, write_u16);
impl_memory_value!(u32, 4, read_u32, write_u32);
impl_memory_value!(u64, 8, read_u64, write_u64);

struct Page {
    attr: PageAttributes,
    data: Option<Box<[u8; PAGE_SIZE as usize]>>,
}

/// Guest address space of one machine.
pub struct Memory<A: AddressType> {
    pages: BTreeMap<u64, Page>,
    /// Upper bound on materialized page bytes.
    memory_max: u64,
    allocated: u64,
    exit_address: u64,
    segments: Vec<Rc<ExecuteSegment<A>>>,
    exec_traps: HashMap<u64, ExecTrap<A>>,
}

#[inline]
pub fn page_number(addr: u64) -> u64 {
    addr / PAGE_SIZE
}

impl<A: AddressType> Memory<A> {
    pub fn new(memory_max: u64) -> Self {
        Self {
            pages: BTreeMap::new(),
            memory_max,
            allocated: 0,
            exit_address: 0,
            segments: Vec::new(),
            exec_traps: HashMap::new(),
        }
    }

    pub fn memory_max(&self) -> u64 {
        self.memory_max
    }

    /// Bytes of page data currently materialized.
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated
    }

    /// Guest address whose return marks the end of a function call made by
    /// the embedder.
    pub fn exit_address(&self) -> u64 {
        self.exit_address
    }

    pub fn set_exit_address(&mut self, addr: u64) {
        self.exit_address = addr;
    }

    /// Attributes of page number `pageno`.
    pub fn page_attr(&self, pageno: u64) -> PageAttributes {
        self.pages.get(&pageno).map(|p| p.attr).unwrap_or_default()
    }

    /// Set the attributes of every page overlapping `[addr, addr + len)`.
    pub fn set_page_attr(&mut self, addr: u64, len: u64, attr: PageAttributes) {
        if len == 0 {
            return;
        }
        let first = page_number(addr);
        let last = page_number(addr.saturating_add(len - 1));
        for pageno in first..=last {
            let page = self.pages.entry(pageno).or_insert(Page { attr, data: None });
            if page.attr.exec && !attr.exec {
                // Code leaving the executable set invalidates its segments
                Self::mark_stale(&self.segments, pageno * PAGE_SIZE, PAGE_SIZE);
            }
            page.attr = attr;
        }
    }

    /// Install an execute trap on page number `pageno`.
    pub fn set_exec_trap(&mut self, pageno: u64, trap: ExecTrap<A>) {
        self.exec_traps.insert(pageno, trap);
    }

    pub fn remove_exec_trap(&mut self, pageno: u64) {
        self.exec_traps.remove(&pageno);
    }

    pub fn exec_trap(&self, pageno: u64) -> Option<ExecTrap<A>> {
        self.exec_traps.get(&pageno).cloned()
    }

    fn page_data_mut(&mut self, pageno: u64) -> MachineResult<&mut [u8; PAGE_SIZE as usize]> {
        let page = self.pages.entry(pageno).or_insert(Page {
            attr: PageAttributes::default(),
            data: None,
        });
        if page.data.is_none() {
            if self.allocated + PAGE_SIZE > self.memory_max {
                return Err(MachineException::new(
                    ExceptionKind::OutOfMemory,
                    "Out of memory: page allocation exceeds the memory limit",
                    pageno * PAGE_SIZE,
                ));
            }
            self.allocated += PAGE_SIZE;
            page.data = Some(Box::new([0u8; PAGE_SIZE as usize]));
        }
        match page.data.as_deref_mut() {
            Some(data) => Ok(data),
            None => Err(MachineException::of(ExceptionKind::OutOfMemory, pageno * PAGE_SIZE)),
        }
    }

    fn check_range(&self, addr: u64, len: u64, allowed: impl Fn(PageAttributes) -> bool) -> MachineResult<()> {
        if len == 0 {
            return Ok(());
        }
        let last = addr.checked_add(len - 1).ok_or_else(|| {
            MachineException::new(ExceptionKind::ProtectionFault, "Access wraps the address space", addr)
        })?;
        for pageno in page_number(addr)..=page_number(last) {
            if !allowed(self.page_attr(pageno)) {
                return Err(MachineException::of(
                    ExceptionKind::ProtectionFault,
                    addr.max(pageno * PAGE_SIZE),
                ));
            }
        }
        Ok(())
    }

    /// Read without permission checks. Unmapped bytes read as zero.
    pub fn read_bytes_unchecked(&self, addr: u64, buf: &mut [u8]) {
        let mut current = addr;
        let mut done = 0;
        while done < buf.len() {
            let offset = (current & PAGE_MASK) as usize;
            let chunk = (buf.len() - done).min(PAGE_SIZE as usize - offset);
            let dst = &mut buf[done..done + chunk];
            match self.pages.get(&page_number(current)).and_then(|p| p.data.as_deref()) {
                Some(data) => dst.copy_from_slice(&data[offset..offset + chunk]),
                None => dst.fill(0),
            }
            current = current.wrapping_add(chunk as u64);
            done += chunk;
        }
    }

    fn write_bytes_unchecked(&mut self, addr: u64, src: &[u8]) -> MachineResult<()> {
        let mut current = addr;
        let mut done = 0;
        let mut touched_exec = false;
        while done < src.len() {
            let pageno = page_number(current);
            touched_exec |= self.page_attr(pageno).exec;
            let offset = (current & PAGE_MASK) as usize;
            let chunk = (src.len() - done).min(PAGE_SIZE as usize - offset);
            let data = self.page_data_mut(pageno)?;
            data[offset..offset + chunk].copy_from_slice(&src[done..done + chunk]);
            current = current.wrapping_add(chunk as u64);
            done += chunk;
        }
        if touched_exec {
            Self::mark_stale(&self.segments, addr, src.len() as u64);
        }
        Ok(())
    }

    fn mark_stale(segments: &[Rc<ExecuteSegment<A>>], addr: u64, len: u64) {
        let end = addr.saturating_add(len);
        for segment in segments {
            if addr < segment.exec_end() && end > segment.exec_begin() && !segment.is_stale() {
                log::debug!("Write at 0x{:X} marks {:?} stale", addr, segment);
                segment.set_stale(true);
            }
        }
    }

    /// Read `buf.len()` bytes from readable memory.
    pub fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> MachineResult<()> {
        self.check_range(addr, buf.len() as u64, |a| a.read)?;
        self.read_bytes_unchecked(addr, buf);
        Ok(())
    }

    /// Write bytes to writable memory.
    pub fn write_bytes(&mut self, addr: u64, src: &[u8]) -> MachineResult<()> {
        self.check_range(addr, src.len() as u64, |a| a.write)?;
        self.write_bytes_unchecked(addr, src)
    }

    /// Copy bytes into guest memory regardless of page permissions.
    /// Used by loaders.
    pub fn copy_to_guest(&mut self, addr: u64, src: &[u8]) -> MachineResult<()> {
        self.write_bytes_unchecked(addr, src)
    }

    /// Copy bytes out of guest memory regardless of page permissions.
    pub fn copy_from_guest(&self, addr: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.read_bytes_unchecked(addr, &mut buf);
        buf
    }

    pub fn read<T: MemoryValue>(&self, addr: u64) -> MachineResult<T> {
        let mut buf = [0u8; 8];
        let bytes = &mut buf[..T::SIZE];
        self.read_bytes(addr, bytes)?;
        Ok(T::read_le(bytes))
    }

    pub fn write<T: MemoryValue>(&mut self, addr: u64, value: T) -> MachineResult<()> {
        let mut buf = [0u8; 8];
        let bytes = &mut buf[..T::SIZE];
        value.write_le(bytes);
        self.write_bytes(addr, bytes)
    }

    /// Read a value that is about to be modified in place. Requires both
    /// read and write permission.
    pub fn writable_read<T: MemoryValue>(&mut self, addr: u64) -> MachineResult<T> {
        self.check_range(addr, T::SIZE as u64, |a| a.read && a.write)?;
        let mut buf = [0u8; 8];
        let bytes = &mut buf[..T::SIZE];
        self.read_bytes_unchecked(addr, bytes);
        Ok(T::read_le(bytes))
    }

    /// Read a NUL-terminated string of at most `max` bytes.
    pub fn read_string(&self, addr: u64, max: usize) -> MachineResult<String> {
        let mut out = Vec::new();
        for offset in 0..max as u64 {
            let byte: u8 = self.read(addr.wrapping_add(offset))?;
            if byte == 0 {
                break;
            }
            out.push(byte);
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Non-stale segment covering `addr`.
    pub fn exec_segment_for(&self, addr: u64) -> Option<Rc<ExecuteSegment<A>>> {
        self.segments
            .iter()
            .find(|s| !s.is_stale() && s.is_within(addr, 2))
            .cloned()
    }

    pub fn execute_segments(&self) -> &[Rc<ExecuteSegment<A>>] {
        &self.segments
    }

    /// Register `segment`. Registering the same segment twice is a no-op.
    pub fn insert_execute_segment(&mut self, segment: Rc<ExecuteSegment<A>>) {
        if !self.segments.iter().any(|s| Rc::ptr_eq(s, &segment)) {
            self.segments.push(segment);
        }
    }

    pub fn evict_execute_segment(&mut self, segment: &Rc<ExecuteSegment<A>>) {
        self.segments.retain(|s| !Rc::ptr_eq(s, segment));
    }

    /// Drop stale segments from the registry.
    pub fn evict_stale_segments(&mut self) {
        let before = self.segments.len();
        self.segments.retain(|s| !s.is_stale());
        if self.segments.len() != before {
            log::debug!("Evicted {} stale execute segment(s)", before - self.segments.len());
        }
    }

    pub fn evict_execute_segments(&mut self) {
        self.segments.clear();
    }
}

impl<A: AddressType> std::fmt::Debug for Memory<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("pages", &self.pages.len())
            .field("allocated", &self.allocated)
            .field("segments", &self.segments.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Memory<u64> {
        Memory::new(16 * PAGE_SIZE)
    }

    #[test]
    fn test_unmapped_reads_zero() {
        let mem = memory();
        assert_eq!(mem.read::<u32>(0x1234).unwrap(), 0);
        assert_eq!(mem.allocated_bytes(), 0);
    }

    #[test]
    fn test_little_endian_cross_page() {
        let mut mem = memory();
        mem.write::<u64>(0x1FFC, 0x1122_3344_5566_7788).unwrap();
        assert_eq!(mem.read::<u32>(0x1FFC).unwrap(), 0x5566_7788);
        assert_eq!(mem.read::<u32>(0x2000).unwrap(), 0x1122_3344);
        assert_eq!(mem.read::<u8>(0x2003).unwrap(), 0x11);
        assert_eq!(mem.allocated_bytes(), 2 * PAGE_SIZE);
    }

    #[test]
    fn test_permissions() {
        let mut mem = memory();
        mem.set_page_attr(0x1000, 0x1000, PageAttributes::RX);
        mem.copy_to_guest(0x1000, &[1, 2, 3, 4]).unwrap();
        assert_eq!(mem.read::<u32>(0x1000).unwrap(), 0x0403_0201);
        let err = mem.write::<u32>(0x1000, 0).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::ProtectionFault);
        assert_eq!(mem.writable_read::<u32>(0x1000).unwrap_err().kind, ExceptionKind::ProtectionFault);

        mem.set_page_attr(0x3000, 1, PageAttributes::NONE);
        assert_eq!(mem.read::<u8>(0x3000).unwrap_err().kind, ExceptionKind::ProtectionFault);
    }

    #[test]
    fn test_memory_limit() {
        let mut mem = Memory::<u32>::new(PAGE_SIZE);
        mem.write::<u32>(0, 1).unwrap();
        let err = mem.write::<u32>(PAGE_SIZE, 1).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::OutOfMemory);
    }

    #[test]
    fn test_write_to_code_marks_segment_stale() {
        let mut mem = memory();
        let code: Vec<u8> = [0x003100B3u32, 0x00008067].iter().flat_map(|w| w.to_le_bytes()).collect();
        mem.set_page_attr(0x1000, 0x1000, PageAttributes::RWX);
        mem.copy_to_guest(0x1000, &code).unwrap();
        let seg = Rc::new(ExecuteSegment::create(&code, 0x1000, false, &[]).unwrap());
        mem.insert_execute_segment(seg.clone());
        assert!(mem.exec_segment_for(0x1004).is_some());

        // Data write elsewhere in the page does not overlap the code
        mem.write::<u32>(0x1800, 7).unwrap();
        assert!(!seg.is_stale());

        mem.write::<u32>(0x1004, 0x13).unwrap();
        assert!(seg.is_stale());
        assert!(mem.exec_segment_for(0x1004).is_none());
        mem.evict_stale_segments();
        assert!(mem.execute_segments().is_empty());
    }

    #[test]
    fn test_read_string() {
        let mut mem = memory();
        mem.write_bytes(0x100, b"hello\0world").unwrap();
        assert_eq!(mem.read_string(0x100, 64).unwrap(), "hello");
        assert_eq!(mem.read_string(0x106, 3).unwrap(), "wor");
    }
}

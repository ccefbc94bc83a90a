//! Execute segments.
//!
//! An execute segment owns a padded copy of one contiguous executable
//! range together with its decoder cache. The copy starts at the page
//! base below `exec_begin` and carries at least four zero bytes past
//! `exec_end`, so a 4-byte read at any instruction start inside the
//! range never needs a bounds check, and the cache always has a trailing
//! invalid entry at `exec_end`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use byteorder::{ByteOrder, LittleEndian};

use super::entry::{unit_shift, DecoderEntry};
use crate::cpu::{AddressType, Instruction};
use crate::decode::handlers::{self, InstructionHandler};
use crate::decode::ExecSpan;

pub struct ExecuteSegment<A: AddressType> {
    pagedata_base: u64,
    exec_begin: u64,
    exec_end: u64,
    data: Box<[u8]>,
    entries: Box<[Cell<DecoderEntry>]>,
    compressed: bool,
    execute_only: bool,
    likely_jit: bool,
    stale: Cell<bool>,
    crc32c: u32,
    /// Resolved slow-path handlers. Index 0 is always the illegal handler.
    handlers: RefCell<Vec<InstructionHandler<A>>>,
}

impl<A: AddressType> ExecuteSegment<A> {
    pub(crate) fn from_parts(
        pagedata_base: u64,
        exec_begin: u64,
        exec_end: u64,
        data: Box<[u8]>,
        entries: Box<[Cell<DecoderEntry>]>,
        compressed: bool,
        crc32c: u32,
    ) -> Self {
        Self {
            pagedata_base,
            exec_begin,
            exec_end,
            data,
            entries,
            compressed,
            execute_only: false,
            likely_jit: false,
            stale: Cell::new(false),
            crc32c,
            handlers: RefCell::new(vec![handlers::illegal::<A>()]),
        }
    }

    /// The placeholder segment a hart holds before its first dispatch.
    pub fn empty() -> Rc<Self> {
        Rc::new(Self::from_parts(0, 0, 0, Box::new([]), Box::new([]), false, 0))
    }

    pub fn is_empty(&self) -> bool {
        self.exec_begin == self.exec_end
    }

    /// Page-aligned address of the first byte of the owned copy.
    #[inline]
    pub fn pagedata_base(&self) -> u64 {
        self.pagedata_base
    }

    #[inline]
    pub fn exec_begin(&self) -> u64 {
        self.exec_begin
    }

    #[inline]
    pub fn exec_end(&self) -> u64 {
        self.exec_end
    }

    pub fn span(&self) -> ExecSpan {
        ExecSpan::new(self.exec_begin, self.exec_end)
    }

    /// Whether `[addr, addr + len)` lies inside the executable range.
    #[inline]
    pub fn is_within(&self, addr: u64, len: u64) -> bool {
        match addr.checked_add(len) {
            Some(end) => addr >= self.exec_begin && end <= self.exec_end,
            None => false,
        }
    }

    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Log2 of the decoder-cache unit.
    #[inline]
    pub fn shift(&self) -> u32 {
        unit_shift(self.compressed)
    }

    pub fn is_execute_only(&self) -> bool {
        self.execute_only
    }

    pub fn is_likely_jit(&self) -> bool {
        self.likely_jit
    }

    pub(crate) fn set_flags(&mut self, likely_jit: bool, execute_only: bool) {
        self.likely_jit = likely_jit;
        self.execute_only = execute_only;
    }

    #[inline]
    pub fn is_stale(&self) -> bool {
        self.stale.get()
    }

    pub fn set_stale(&self, stale: bool) {
        self.stale.set(stale);
    }

    pub fn crc32c(&self) -> u32 {
        self.crc32c
    }

    /// Number of decoder-cache entries, including the trailing ones.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Decoder-cache index of `addr`.
    #[inline]
    pub fn index_of(&self, addr: u64) -> usize {
        (addr.wrapping_sub(self.pagedata_base) >> self.shift()) as usize
    }

    /// Guest address of decoder-cache index `idx`.
    #[inline]
    pub fn pc_of(&self, idx: usize) -> u64 {
        self.pagedata_base + ((idx as u64) << self.shift())
    }

    /// Entry at `idx`. Indices past the cache read as invalid.
    #[inline]
    pub fn entry(&self, idx: usize) -> DecoderEntry {
        match self.entries.get(idx) {
            Some(cell) => cell.get(),
            None => DecoderEntry::INVALID,
        }
    }

    #[inline]
    pub fn entry_at(&self, addr: u64) -> DecoderEntry {
        self.entry(self.index_of(addr))
    }

    pub(crate) fn set_entry(&self, idx: usize, entry: DecoderEntry) {
        if let Some(cell) = self.entries.get(idx) {
            cell.set(entry);
        }
    }

    pub(crate) fn update_entry(&self, idx: usize, f: impl FnOnce(&mut DecoderEntry)) {
        if let Some(cell) = self.entries.get(idx) {
            let mut entry = cell.get();
            f(&mut entry);
            cell.set(entry);
        }
    }

    /// The owned copy, starting at `pagedata_base`.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Raw instruction at `addr`, 16 bits wide when compressed.
    /// Addresses outside the copy read as zero.
    pub fn read_instruction(&self, addr: u64) -> Instruction {
        let offset = addr.wrapping_sub(self.pagedata_base) as usize;
        let whole = match self.data.get(offset..offset.saturating_add(4)) {
            Some(bytes) => LittleEndian::read_u32(bytes),
            None => match self.data.get(offset..offset.saturating_add(2)) {
                Some(bytes) => LittleEndian::read_u16(bytes) as u32,
                None => 0,
            },
        };
        if whole & 0b11 != 0b11 {
            Instruction::new(whole & 0xFFFF)
        } else {
            Instruction::new(whole)
        }
    }

    /// Handler stored at `index` in the handler table.
    pub fn handler(&self, index: u8) -> Option<InstructionHandler<A>> {
        self.handlers.borrow().get(index as usize).copied()
    }

    /// Slow-path handler for the entry at `idx`, decoding and caching it
    /// on first use.
    pub fn resolve_handler(&self, idx: usize, instr: Instruction) -> InstructionHandler<A> {
        let entry = self.entry(idx);
        if entry.handler != 0 {
            if let Some(handler) = self.handler(entry.handler) {
                return handler;
            }
        }
        let handler = handlers::decode_one::<A>(instr);
        if let Some(index) = self.handler_index_for(&handler) {
            self.update_entry(idx, |e| e.handler = index);
        }
        handler
    }

    /// Table index of `handler`, inserting it when new. Returns `None`
    /// once the table is full.
    fn handler_index_for(&self, handler: &InstructionHandler<A>) -> Option<u8> {
        let mut table = self.handlers.borrow_mut();
        if let Some(pos) = table.iter().position(|h| h.name == handler.name) {
            return u8::try_from(pos).ok();
        }
        if table.len() > u8::MAX as usize {
            return None;
        }
        table.push(*handler);
        u8::try_from(table.len() - 1).ok()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.borrow().len()
    }
}

impl<A: AddressType> fmt::Debug for ExecuteSegment<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteSegment")
            .field("begin", &format_args!("0x{:X}", self.exec_begin))
            .field("end", &format_args!("0x{:X}", self.exec_end))
            .field("compressed", &self.compressed)
            .field("likely_jit", &self.likely_jit)
            .field("stale", &self.stale.get())
            .field("crc32c", &format_args!("0x{:08X}", self.crc32c))
            .finish()
    }
}

//! Register snapshots.
//!
//! A snapshot holds the hart state only: counters, program counter, the
//! integer, floating-point and vector register files, `fcsr` and the exit
//! address. Guest memory is not part of it. All fields are little-endian:
//!
//! | Field | Size |
//! |-------|------|
//! | magic | 8 |
//! | register width in bytes | 1 |
//! | cpu id | 4 |
//! | instruction counter | 8 |
//! | pc | 8 |
//! | integer registers | 32 x 8 |
//! | FP registers | 32 x 8 |
//! | fcsr | 4 |
//! | vl, vtype | 2 x 8 |
//! | vector registers | 32 x 32 |
//! | exit address | 8 |

use std::io::{self, Cursor, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use super::Machine;
use crate::cpu::registers::{NUM_FP_REGS, NUM_INT_REGS, NUM_VECTOR_REGS, VLEN_BYTES};
use crate::cpu::AddressType;

/// Identifies a register snapshot.
pub const SNAPSHOT_MAGIC: u64 = 0x9c36_ab93_01ae_d873;

/// Errors from restoring a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("not a register snapshot (magic 0x{0:016X})")]
    BadMagic(u64),
    #[error("snapshot register width {found} does not match machine width {expected}")]
    WidthMismatch { expected: u8, found: u8 },
    #[error("snapshot I/O: {0}")]
    Io(#[from] io::Error),
}

/// Snapshot contents, fully parsed before anything is applied.
struct Snapshot {
    counter: u64,
    pc: u64,
    int_regs: [u64; NUM_INT_REGS],
    fp_regs: [u64; NUM_FP_REGS],
    fcsr: u32,
    vl: u64,
    vtype: u64,
    vectors: Vec<[u8; VLEN_BYTES]>,
    exit_address: u64,
}

impl<A: AddressType> Machine<A> {
    /// Append a snapshot of the hart to `out`. Returns the number of bytes
    /// written.
    pub fn serialize_to(&self, out: &mut Vec<u8>) -> Result<usize, SnapshotError> {
        let before = out.len();
        self.write_snapshot(out)?;
        Ok(out.len() - before)
    }

    fn write_snapshot<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let regs = self.cpu.registers();
        w.write_u64::<LittleEndian>(SNAPSHOT_MAGIC)?;
        w.write_u8(A::BYTES as u8)?;
        w.write_u32::<LittleEndian>(self.cpu.cpu_id())?;
        w.write_u64::<LittleEndian>(self.counter)?;
        w.write_u64::<LittleEndian>(self.cpu.pc())?;
        for reg in 0..NUM_INT_REGS as u32 {
            w.write_u64::<LittleEndian>(regs.get_u64(reg))?;
        }
        for reg in 0..NUM_FP_REGS as u32 {
            w.write_u64::<LittleEndian>(regs.getfl(reg).bits())?;
        }
        w.write_u32::<LittleEndian>(regs.fcsr().whole())?;
        let rvv = regs.rvv();
        w.write_u64::<LittleEndian>(rvv.vl)?;
        w.write_u64::<LittleEndian>(rvv.vtype)?;
        for reg in 0..NUM_VECTOR_REGS as u32 {
            w.write_all(&rvv.get(reg).to_bytes())?;
        }
        w.write_u64::<LittleEndian>(self.memory.exit_address())?;
        Ok(())
    }

    /// Restore a snapshot written by [`serialize_to`](Self::serialize_to).
    ///
    /// The budget is reset to zero and the current execute segment is
    /// dropped, so the next run resolves code afresh. Nothing is modified
    /// when the snapshot is rejected.
    pub fn deserialize_from(&mut self, data: &[u8]) -> Result<(), SnapshotError> {
        let snapshot = Self::read_snapshot(&mut Cursor::new(data))?;

        let regs = self.cpu.registers_mut();
        for (reg, value) in snapshot.int_regs.iter().enumerate() {
            regs.set_u64(reg as u32, *value);
        }
        for (reg, bits) in snapshot.fp_regs.iter().enumerate() {
            regs.getfl_mut(reg as u32).load_u64(*bits);
        }
        regs.fcsr_mut().set_whole(snapshot.fcsr);
        let rvv = regs.rvv_mut();
        rvv.vl = snapshot.vl;
        rvv.vtype = snapshot.vtype;
        for (reg, bytes) in snapshot.vectors.iter().enumerate() {
            rvv.get_mut(reg as u32).load_bytes(bytes);
        }

        self.cpu.set_pc(snapshot.pc);
        self.cpu.reservation_mut().clear();
        self.cpu.reset_execute_segment();
        self.memory.set_exit_address(snapshot.exit_address);
        self.counter = snapshot.counter;
        self.max_counter = 0;
        self.stopped = false;
        log::debug!("Restored snapshot at pc 0x{:X}, counter {}", snapshot.pc, snapshot.counter);
        Ok(())
    }

    fn read_snapshot(r: &mut Cursor<&[u8]>) -> Result<Snapshot, SnapshotError> {
        let magic = r.read_u64::<LittleEndian>()?;
        if magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::BadMagic(magic));
        }
        let width = r.read_u8()?;
        if width as usize != A::BYTES {
            return Err(SnapshotError::WidthMismatch {
                expected: A::BYTES as u8,
                found: width,
            });
        }
        let _cpu_id = r.read_u32::<LittleEndian>()?;
        let counter = r.read_u64::<LittleEndian>()?;
        let pc = r.read_u64::<LittleEndian>()?;
        let mut int_regs = [0u64; NUM_INT_REGS];
        r.read_u64_into::<LittleEndian>(&mut int_regs)?;
        let mut fp_regs = [0u64; NUM_FP_REGS];
        r.read_u64_into::<LittleEndian>(&mut fp_regs)?;
        let fcsr = r.read_u32::<LittleEndian>()?;
        let vl = r.read_u64::<LittleEndian>()?;
        let vtype = r.read_u64::<LittleEndian>()?;
        let mut vectors = vec![[0u8; VLEN_BYTES]; NUM_VECTOR_REGS];
        for lane in vectors.iter_mut() {
            io::Read::read_exact(r, lane)?;
        }
        let exit_address = r.read_u64::<LittleEndian>()?;
        Ok(Snapshot {
            counter,
            pc,
            int_regs,
            fp_regs,
            fcsr,
            vl,
            vtype,
            vectors,
            exit_address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::MachineOptions;

    fn populated() -> Machine<u64> {
        let mut m = Machine::<u64>::new(MachineOptions::default());
        for reg in 1..32 {
            m.cpu.set_reg(reg, 0x1111 * reg as u64);
        }
        m.cpu.registers_mut().getfl_mut(3).set_f64(2.5);
        m.cpu.registers_mut().getfl_mut(4).set_f32(-1.0);
        m.cpu.registers_mut().fcsr_mut().set_whole(0b001_00101);
        m.cpu.registers_mut().rvv_mut().vl = 8;
        m.cpu.registers_mut().rvv_mut().get_mut(5).f32_mut()[2] = 7.0;
        m.cpu.set_pc(0x4_0000);
        m.set_instruction_counter(1234);
        m.memory.set_exit_address(0xDEAD_0000);
        m
    }

    #[test]
    fn test_snapshot_restores_state() {
        let m = populated();
        let mut out = Vec::new();
        let written = m.serialize_to(&mut out).unwrap();
        assert_eq!(written, out.len());
        assert_eq!(&out[..8], &SNAPSHOT_MAGIC.to_le_bytes());

        let mut restored = Machine::<u64>::new(MachineOptions::default());
        restored.deserialize_from(&out).unwrap();
        assert_eq!(restored.cpu.registers().as_slice(), m.cpu.registers().as_slice());
        assert_eq!(restored.cpu.registers().getfl(3).f64(), 2.5);
        assert_eq!(restored.cpu.registers().getfl(4).f32(), -1.0);
        assert_eq!(restored.cpu.registers().fcsr().whole(), 0b001_00101);
        assert_eq!(restored.cpu.registers().rvv().vl, 8);
        assert_eq!(restored.cpu.registers().rvv().get(5).f32()[2], 7.0);
        assert_eq!(restored.cpu.pc(), 0x4_0000);
        assert_eq!(restored.instruction_counter(), 1234);
        assert_eq!(restored.max_instructions(), 0);
        assert_eq!(restored.memory.exit_address(), 0xDEAD_0000);
        assert!(restored.cpu.current_execute_segment().is_empty());
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut out = Vec::new();
        populated().serialize_to(&mut out).unwrap();
        out[0] ^= 0xFF;
        let mut m = Machine::<u64>::new(MachineOptions::default());
        assert!(matches!(m.deserialize_from(&out), Err(SnapshotError::BadMagic(_))));
        // Untouched
        assert_eq!(m.cpu.reg(1), 0);
    }

    #[test]
    fn test_rejects_other_width() {
        let mut out = Vec::new();
        populated().serialize_to(&mut out).unwrap();
        let mut m32 = Machine::<u32>::new(MachineOptions::default());
        match m32.deserialize_from(&out) {
            Err(SnapshotError::WidthMismatch { expected, found }) => assert_eq!((expected, found), (4, 8)),
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }

    #[test]
    fn test_rejects_truncated() {
        let mut out = Vec::new();
        populated().serialize_to(&mut out).unwrap();
        out.truncate(out.len() - 4);
        let mut m = Machine::<u64>::new(MachineOptions::default());
        assert!(matches!(m.deserialize_from(&out), Err(SnapshotError::Io(_))));
        assert_eq!(m.cpu.pc(), 0);
    }
}

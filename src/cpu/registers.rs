//! Register files of a RISC-V hart.
//!
//! - **Integer**: 32 × XLEN registers (x0-x31), x0 reads as zero
//! - **Floating-point**: 32 × 64-bit registers (f0-f31), single precision
//!   values are NaN-boxed in the upper half
//! - **FCSR**: accrued exception flags and rounding mode
//! - **Vector**: 32 × 256-bit registers, viewed as f32 lanes
//!
//! Handlers never write x0; every integer write goes through
//! [`Registers::set`], which drops writes to register zero.

use std::fmt;

use super::address::AddressType;

/// Number of integer registers.
pub const NUM_INT_REGS: usize = 32;

/// Number of floating-point registers.
pub const NUM_FP_REGS: usize = 32;

/// Number of vector registers.
pub const NUM_VECTOR_REGS: usize = 32;

/// Vector register length in bytes (VLEN = 256).
pub const VLEN_BYTES: usize = 32;

/// f32 lanes per vector register.
pub const VECTOR_F32_LANES: usize = VLEN_BYTES / 4;

/// ABI names of the integer registers.
pub const INT_REG_NAMES: [&str; NUM_INT_REGS] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

/// ABI names of the floating-point registers.
pub const FP_REG_NAMES: [&str; NUM_FP_REGS] = [
    "ft0", "ft1", "ft2", "ft3", "ft4", "ft5", "ft6", "ft7", "fs0", "fs1", "fa0", "fa1", "fa2",
    "fa3", "fa4", "fa5", "fa6", "fa7", "fs2", "fs3", "fs4", "fs5", "fs6", "fs7", "fs8", "fs9",
    "fs10", "fs11", "ft8", "ft9", "ft10", "ft11",
];

/// ABI name of an integer register.
#[inline]
pub fn reg_name(reg: u32) -> &'static str {
    INT_REG_NAMES[(reg & 0x1F) as usize]
}

/// ABI name of a floating-point register.
#[inline]
pub fn freg_name(reg: u32) -> &'static str {
    FP_REG_NAMES[(reg & 0x1F) as usize]
}

/// A 64-bit floating-point register.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct FpRegister(u64);

impl FpRegister {
    const NANBOX: u64 = 0xFFFF_FFFF_0000_0000;

    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn f32(self) -> f32 {
        f32::from_bits(self.0 as u32)
    }

    #[inline]
    pub fn f64(self) -> f64 {
        f64::from_bits(self.0)
    }

    /// Low 32 bits as an integer.
    #[inline]
    pub const fn i32(self) -> i32 {
        self.0 as u32 as i32
    }

    /// Whether the upper half holds a valid NaN-box.
    #[inline]
    pub const fn is_nanboxed(self) -> bool {
        self.0 & Self::NANBOX == Self::NANBOX
    }

    #[inline]
    pub fn set_f32(&mut self, value: f32) {
        self.load_u32(value.to_bits());
    }

    #[inline]
    pub fn set_f64(&mut self, value: f64) {
        self.0 = value.to_bits();
    }

    /// Load raw single precision bits and NaN-box them.
    #[inline]
    pub fn load_u32(&mut self, value: u32) {
        self.0 = Self::NANBOX | value as u64;
    }

    #[inline]
    pub fn load_u64(&mut self, value: u64) {
        self.0 = value;
    }
}

impl fmt::Debug for FpRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nanboxed() {
            write!(f, "{}f", self.f32())
        } else {
            write!(f, "{}", self.f64())
        }
    }
}

/// Floating-point control and status register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fcsr(u32);

impl Fcsr {
    #[inline]
    pub const fn whole(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn set_whole(&mut self, value: u32) {
        self.0 = value & 0xFF;
    }

    /// Accrued exception flags (5 bits).
    #[inline]
    pub const fn fflags(self) -> u32 {
        self.0 & 0x1F
    }

    #[inline]
    pub fn set_fflags(&mut self, value: u32) {
        self.0 = (self.0 & !0x1F) | (value & 0x1F);
    }

    /// Dynamic rounding mode (3 bits).
    #[inline]
    pub const fn frm(self) -> u32 {
        (self.0 >> 5) & 0x7
    }

    #[inline]
    pub fn set_frm(&mut self, value: u32) {
        self.0 = (self.0 & !0xE0) | ((value & 0x7) << 5);
    }
}

/// A single vector register.
#[derive(Clone, Copy, PartialEq)]
pub struct VectorLane([f32; VECTOR_F32_LANES]);

impl Default for VectorLane {
    fn default() -> Self {
        Self([0.0; VECTOR_F32_LANES])
    }
}

impl VectorLane {
    #[inline]
    pub fn f32(&self) -> &[f32; VECTOR_F32_LANES] {
        &self.0
    }

    #[inline]
    pub fn f32_mut(&mut self) -> &mut [f32; VECTOR_F32_LANES] {
        &mut self.0
    }

    /// Raw little-endian bytes of the register.
    pub fn to_bytes(&self) -> [u8; VLEN_BYTES] {
        let mut out = [0u8; VLEN_BYTES];
        for (chunk, lane) in out.chunks_exact_mut(4).zip(self.0.iter()) {
            chunk.copy_from_slice(&lane.to_bits().to_le_bytes());
        }
        out
    }

    /// Load raw little-endian bytes into the register.
    pub fn load_bytes(&mut self, bytes: &[u8; VLEN_BYTES]) {
        for (lane, chunk) in self.0.iter_mut().zip(bytes.chunks_exact(4)) {
            *lane = f32::from_bits(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
    }
}

impl fmt::Debug for VectorLane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

/// Vector register file.
#[derive(Clone, Default)]
pub struct VectorRegisters {
    regs: [VectorLane; NUM_VECTOR_REGS],
    /// Current vector length in elements (set by VSETVLI).
    pub vl: u64,
    /// Raw vtype value.
    pub vtype: u64,
}

impl VectorRegisters {
    #[inline]
    pub fn get(&self, reg: u32) -> &VectorLane {
        &self.regs[(reg & 0x1F) as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, reg: u32) -> &mut VectorLane {
        &mut self.regs[(reg & 0x1F) as usize]
    }
}

impl fmt::Debug for VectorRegisters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let non_zero = self
            .regs
            .iter()
            .enumerate()
            .filter(|(_, v)| v.0.iter().any(|x| x.to_bits() != 0))
            .count();
        write!(
            f,
            "VectorRegisters {{ vl: {}, vtype: 0x{:X}, {} non-zero }}",
            self.vl, self.vtype, non_zero
        )
    }
}

/// Complete architectural register state of one hart.
#[derive(Clone)]
pub struct Registers<A: AddressType> {
    regs: [A; NUM_INT_REGS],
    /// Program counter.
    pub pc: A,
    fcsr: Fcsr,
    fregs: [FpRegister; NUM_FP_REGS],
    rvv: VectorRegisters,
}

impl<A: AddressType> Default for Registers<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: AddressType> Registers<A> {
    /// Create a zeroed register file.
    pub fn new() -> Self {
        Self {
            regs: [A::default(); NUM_INT_REGS],
            pc: A::default(),
            fcsr: Fcsr::default(),
            fregs: [FpRegister::default(); NUM_FP_REGS],
            rvv: VectorRegisters::default(),
        }
    }

    /// Read an integer register.
    #[inline]
    pub fn get(&self, reg: u32) -> A {
        self.regs[(reg & 0x1F) as usize]
    }

    /// Write an integer register. Writes to x0 are discarded.
    #[inline]
    pub fn set(&mut self, reg: u32, value: A) {
        if reg != 0 {
            self.regs[(reg & 0x1F) as usize] = value;
        }
    }

    /// Read an integer register zero-extended to 64 bits.
    #[inline]
    pub fn get_u64(&self, reg: u32) -> u64 {
        self.get(reg).to_u64()
    }

    /// Read an integer register sign-extended to 64 bits.
    #[inline]
    pub fn get_i64(&self, reg: u32) -> i64 {
        self.get(reg).to_i64()
    }

    /// Write a 64-bit value, truncated to XLEN.
    #[inline]
    pub fn set_u64(&mut self, reg: u32, value: u64) {
        self.set(reg, A::from_u64(value));
    }

    /// Write a signed 64-bit value, truncated to XLEN.
    #[inline]
    pub fn set_i64(&mut self, reg: u32, value: i64) {
        self.set(reg, A::from_i64(value));
    }

    #[inline]
    pub fn pc_u64(&self) -> u64 {
        self.pc.to_u64()
    }

    #[inline]
    pub fn set_pc_u64(&mut self, pc: u64) {
        self.pc = A::from_u64(pc);
    }

    #[inline]
    pub fn getfl(&self, reg: u32) -> FpRegister {
        self.fregs[(reg & 0x1F) as usize]
    }

    #[inline]
    pub fn getfl_mut(&mut self, reg: u32) -> &mut FpRegister {
        &mut self.fregs[(reg & 0x1F) as usize]
    }

    #[inline]
    pub fn fcsr(&self) -> Fcsr {
        self.fcsr
    }

    #[inline]
    pub fn fcsr_mut(&mut self) -> &mut Fcsr {
        &mut self.fcsr
    }

    #[inline]
    pub fn rvv(&self) -> &VectorRegisters {
        &self.rvv
    }

    #[inline]
    pub fn rvv_mut(&mut self) -> &mut VectorRegisters {
        &mut self.rvv
    }

    /// All integer registers.
    pub fn as_slice(&self) -> &[A; NUM_INT_REGS] {
        &self.regs
    }

    /// Multi-line dump of the integer registers and pc.
    pub fn to_string_int(&self) -> String {
        let width = A::BYTES * 2;
        let mut out = String::new();
        for (i, value) in self.regs.iter().enumerate().skip(1) {
            out.push_str(&format!(
                "[{:>4}\t{:0width$X}] ",
                INT_REG_NAMES[i],
                value.to_u64(),
                width = width
            ));
            if i % 5 == 4 {
                out.push('\n');
            }
        }
        out.push_str(&format!("\n[  pc\t{:0width$X}]", self.pc.to_u64(), width = width));
        out
    }

    /// Multi-line dump of the floating-point registers.
    pub fn to_string_fp(&self) -> String {
        let mut out = String::new();
        for (i, reg) in self.fregs.iter().enumerate() {
            out.push_str(&format!("[{:>4}\t{:?}] ", FP_REG_NAMES[i], reg));
            if i % 4 == 3 {
                out.push('\n');
            }
        }
        out.push_str(&format!(
            "[fcsr\tfflags={:05b} frm={}]",
            self.fcsr.fflags(),
            self.fcsr.frm()
        ));
        out
    }
}

impl<A: AddressType> fmt::Debug for Registers<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only show non-zero registers
        let non_zero: Vec<_> = self
            .regs
            .iter()
            .enumerate()
            .filter(|(_, v)| v.to_u64() != 0)
            .collect();

        write!(f, "Registers {{ pc: 0x{:X}", self.pc.to_u64())?;
        for (reg, val) in non_zero {
            write!(f, ", {}: 0x{:X}", INT_REG_NAMES[reg], val.to_u64())?;
        }
        write!(f, " }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_register_is_hardwired() {
        let mut regs = Registers::<u64>::new();
        regs.set(0, 42);
        regs.set(5, 7);
        assert_eq!(regs.get(0), 0);
        assert_eq!(regs.get(5), 7);
    }

    #[test]
    fn test_truncating_writes() {
        let mut regs = Registers::<u32>::new();
        regs.set_i64(1, -1);
        assert_eq!(regs.get(1), u32::MAX);
        assert_eq!(regs.get_i64(1), -1);
        assert_eq!(regs.get_u64(1), 0xFFFF_FFFF);
    }

    #[test]
    fn test_nanboxing() {
        let mut f = FpRegister::default();
        f.set_f32(1.5);
        assert!(f.is_nanboxed());
        assert_eq!(f.f32(), 1.5);
        f.set_f64(2.0);
        assert!(!f.is_nanboxed());
        assert_eq!(f.f64(), 2.0);
    }

    #[test]
    fn test_fcsr_fields() {
        let mut fcsr = Fcsr::default();
        fcsr.set_frm(0b101);
        fcsr.set_fflags(0b10001);
        assert_eq!(fcsr.frm(), 0b101);
        assert_eq!(fcsr.fflags(), 0b10001);
        assert_eq!(fcsr.whole(), 0b101_10001);
        fcsr.set_whole(0xFFFF_FFFF);
        assert_eq!(fcsr.whole(), 0xFF);
    }

    #[test]
    fn test_vector_bytes() {
        let mut v = VectorLane::default();
        v.f32_mut()[1] = 1.0;
        let bytes = v.to_bytes();
        assert_eq!(&bytes[4..8], &1.0f32.to_bits().to_le_bytes());
        let mut w = VectorLane::default();
        w.load_bytes(&bytes);
        assert_eq!(v, w);
    }

    #[test]
    fn test_debug_shows_non_zero() {
        let mut regs = Registers::<u32>::new();
        regs.set(10, 0x10);
        assert_eq!(format!("{:?}", regs), "Registers { pc: 0x0, a0: 0x10 }");
    }
}

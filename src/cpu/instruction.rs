//! Instruction word views.
//!
//! An [`Instruction`] is an opaque 32-bit word. Each encoding family is read
//! through an explicit view conversion (`rtype()`, `itype()`, ...) that
//! extracts the fields by masking and shifting, so no two views ever alias
//! the same storage. Compressed (16-bit) instructions are viewed through
//! [`CompressedInstruction`].
//!
//! # Example
//!
//! ```
//! use rvcore::cpu::Instruction;
//!
//! // add x1, x2, x3
//! let instr = Instruction::new(0x003100B3);
//! assert_eq!(instr.length(), 4);
//! let r = instr.rtype();
//! assert_eq!((r.rd, r.rs1, r.rs2), (1, 2, 3));
//! ```

use std::fmt;

/// Major opcodes (bits 6:0) of 32-bit instructions.
pub mod opcode {
    pub const LOAD: u32 = 0x03;
    pub const LOAD_FP: u32 = 0x07;
    pub const MISC_MEM: u32 = 0x0F;
    pub const OP_IMM: u32 = 0x13;
    pub const AUIPC: u32 = 0x17;
    pub const OP_IMM32: u32 = 0x1B;
    pub const STORE: u32 = 0x23;
    pub const STORE_FP: u32 = 0x27;
    pub const AMO: u32 = 0x2F;
    pub const OP: u32 = 0x33;
    pub const LUI: u32 = 0x37;
    pub const OP32: u32 = 0x3B;
    pub const FMADD: u32 = 0x43;
    pub const FMSUB: u32 = 0x47;
    pub const FNMSUB: u32 = 0x4B;
    pub const FNMADD: u32 = 0x4F;
    pub const OP_FP: u32 = 0x53;
    pub const OP_V: u32 = 0x57;
    pub const BRANCH: u32 = 0x63;
    pub const JALR: u32 = 0x67;
    pub const JAL: u32 = 0x6F;
    pub const SYSTEM: u32 = 0x73;
}

/// ABI register numbers used by the core.
pub const REG_ZERO: u32 = 0;
pub const REG_RA: u32 = 1;
pub const REG_SP: u32 = 2;
pub const REG_A0: u32 = 10;
pub const REG_A7: u32 = 17;
/// First floating-point argument register.
pub const REG_FA0: u32 = 10;

/// Sign-extend the low `bits` bits of `value`.
#[inline]
pub const fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

/// Register-register view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rtype {
    pub rd: u32,
    pub funct3: u32,
    pub rs1: u32,
    pub rs2: u32,
    pub funct7: u32,
}

impl Rtype {
    /// Combined `funct7:funct3` key used to select OP/OP-32 operations.
    #[inline]
    pub const fn jumptable_friendly_op(&self) -> u32 {
        self.funct3 | (self.funct7 << 4)
    }
}

/// Register-immediate view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Itype {
    pub rd: u32,
    pub funct3: u32,
    pub rs1: u32,
    /// Raw 12-bit immediate.
    pub imm: u32,
}

impl Itype {
    #[inline]
    pub const fn signed_imm(&self) -> i32 {
        sign_extend(self.imm, 12)
    }

    /// Shift amount for 32-bit shifts.
    #[inline]
    pub const fn shift_imm(&self) -> u32 {
        self.imm & 0x1F
    }

    /// Shift amount for 64-bit shifts.
    #[inline]
    pub const fn shift64_imm(&self) -> u32 {
        self.imm & 0x3F
    }

    /// Immediate bits above a 6-bit shift amount.
    #[inline]
    pub const fn high_bits(&self) -> u32 {
        self.imm & 0xFC0
    }

    #[inline]
    pub const fn is_srai(&self) -> bool {
        self.high_bits() == 0x400
    }
}

/// Store view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stype {
    pub funct3: u32,
    pub rs1: u32,
    pub rs2: u32,
    imm: u32,
}

impl Stype {
    #[inline]
    pub const fn signed_imm(&self) -> i32 {
        sign_extend(self.imm, 12)
    }
}

/// Conditional branch view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Btype {
    pub funct3: u32,
    pub rs1: u32,
    pub rs2: u32,
    imm: u32,
}

impl Btype {
    #[inline]
    pub const fn signed_imm(&self) -> i32 {
        sign_extend(self.imm, 13)
    }
}

/// Upper-immediate view (LUI, AUIPC).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Utype {
    pub rd: u32,
    /// Raw 20-bit immediate.
    pub imm: u32,
}

impl Utype {
    /// Immediate shifted into place and sign-extended.
    #[inline]
    pub const fn upper_imm(&self) -> i32 {
        (self.imm << 12) as i32
    }
}

/// Jump view (JAL).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jtype {
    pub rd: u32,
    imm: u32,
}

impl Jtype {
    #[inline]
    pub const fn jump_offset(&self) -> i32 {
        sign_extend(self.imm, 21)
    }
}

/// Atomic memory operation view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Atype {
    pub rd: u32,
    pub funct3: u32,
    pub rs1: u32,
    pub rs2: u32,
    pub rl: bool,
    pub aq: bool,
    pub funct5: u32,
}

/// Four-register floating-point view (also used for OP-FP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct R4type {
    pub rd: u32,
    pub funct3: u32,
    pub rs1: u32,
    pub rs2: u32,
    pub funct2: u32,
    pub rs3: u32,
}

/// Vector unit-stride load/store view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlsType {
    pub vd: u32,
    pub width: u32,
    pub rs1: u32,
    pub lumop: u32,
    pub vm: bool,
    pub mop: u32,
    pub nf: u32,
}

/// Vector arithmetic view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpvvType {
    pub vd: u32,
    pub funct3: u32,
    pub vs1: u32,
    pub vs2: u32,
    pub vm: bool,
    pub funct6: u32,
}

/// A raw instruction word.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Instruction(u32);

impl Instruction {
    #[inline]
    pub const fn new(whole: u32) -> Self {
        Self(whole)
    }

    #[inline]
    pub const fn whole(self) -> u32 {
        self.0
    }

    /// Length in bytes: 2 for compressed encodings, otherwise 4.
    #[inline]
    pub const fn length(self) -> u32 {
        if self.0 & 0x3 == 0x3 {
            4
        } else {
            2
        }
    }

    #[inline]
    pub const fn is_compressed(self) -> bool {
        self.length() == 2
    }

    #[inline]
    pub const fn opcode(self) -> u32 {
        self.0 & 0x7F
    }

    #[inline]
    const fn bits(self, lo: u32, len: u32) -> u32 {
        (self.0 >> lo) & ((1 << len) - 1)
    }

    #[inline]
    pub const fn rd(self) -> u32 {
        self.bits(7, 5)
    }

    #[inline]
    pub const fn funct3(self) -> u32 {
        self.bits(12, 3)
    }

    #[inline]
    pub const fn rs1(self) -> u32 {
        self.bits(15, 5)
    }

    #[inline]
    pub const fn rs2(self) -> u32 {
        self.bits(20, 5)
    }

    /// OP-FP function selector (bits 31:27).
    #[inline]
    pub const fn fpfunc(self) -> u32 {
        self.bits(27, 5)
    }

    /// Vector operand width / category (funct3).
    #[inline]
    pub const fn vwidth(self) -> u32 {
        self.funct3()
    }

    pub const fn rtype(self) -> Rtype {
        Rtype {
            rd: self.rd(),
            funct3: self.funct3(),
            rs1: self.rs1(),
            rs2: self.rs2(),
            funct7: self.bits(25, 7),
        }
    }

    pub const fn itype(self) -> Itype {
        Itype {
            rd: self.rd(),
            funct3: self.funct3(),
            rs1: self.rs1(),
            imm: self.bits(20, 12),
        }
    }

    pub const fn stype(self) -> Stype {
        Stype {
            funct3: self.funct3(),
            rs1: self.rs1(),
            rs2: self.rs2(),
            imm: self.bits(7, 5) | (self.bits(25, 7) << 5),
        }
    }

    pub const fn btype(self) -> Btype {
        let imm = (self.bits(8, 4) << 1)
            | (self.bits(25, 6) << 5)
            | (self.bits(7, 1) << 11)
            | (self.bits(31, 1) << 12);
        Btype {
            funct3: self.funct3(),
            rs1: self.rs1(),
            rs2: self.rs2(),
            imm,
        }
    }

    pub const fn utype(self) -> Utype {
        Utype {
            rd: self.rd(),
            imm: self.bits(12, 20),
        }
    }

    pub const fn jtype(self) -> Jtype {
        let imm = (self.bits(21, 10) << 1)
            | (self.bits(20, 1) << 11)
            | (self.bits(12, 8) << 12)
            | (self.bits(31, 1) << 20);
        Jtype { rd: self.rd(), imm }
    }

    pub const fn atype(self) -> Atype {
        Atype {
            rd: self.rd(),
            funct3: self.funct3(),
            rs1: self.rs1(),
            rs2: self.rs2(),
            rl: self.bits(25, 1) != 0,
            aq: self.bits(26, 1) != 0,
            funct5: self.bits(27, 5),
        }
    }

    pub const fn r4type(self) -> R4type {
        R4type {
            rd: self.rd(),
            funct3: self.funct3(),
            rs1: self.rs1(),
            rs2: self.rs2(),
            funct2: self.bits(25, 2),
            rs3: self.bits(27, 5),
        }
    }

    pub const fn vls(self) -> VlsType {
        VlsType {
            vd: self.rd(),
            width: self.funct3(),
            rs1: self.rs1(),
            lumop: self.rs2(),
            vm: self.bits(25, 1) != 0,
            mop: self.bits(26, 2),
            nf: self.bits(29, 3),
        }
    }

    pub const fn opvv(self) -> OpvvType {
        OpvvType {
            vd: self.rd(),
            funct3: self.funct3(),
            vs1: self.rs1(),
            vs2: self.rs2(),
            vm: self.bits(25, 1) != 0,
            funct6: self.bits(26, 6),
        }
    }

    /// View the low half as a compressed instruction.
    #[inline]
    pub const fn compressed(self) -> CompressedInstruction {
        CompressedInstruction(self.0 as u16)
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_compressed() {
            write!(f, "Instruction(0x{:04X})", self.0 as u16)
        } else {
            write!(f, "Instruction(0x{:08X})", self.0)
        }
    }
}

impl From<u32> for Instruction {
    fn from(whole: u32) -> Self {
        Self(whole)
    }
}

/// Build a compressed opcode key from funct3 and quadrant.
#[inline]
pub const fn ci_code(funct3: u16, quadrant: u16) -> u16 {
    (funct3 << 13) | quadrant
}

/// A 16-bit compressed instruction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CompressedInstruction(u16);

impl CompressedInstruction {
    #[inline]
    pub const fn new(whole: u16) -> Self {
        Self(whole)
    }

    #[inline]
    pub const fn whole(self) -> u16 {
        self.0
    }

    #[inline]
    const fn bits(self, lo: u32, len: u32) -> u32 {
        ((self.0 as u32) >> lo) & ((1 << len) - 1)
    }

    /// `funct3:quadrant` key, comparable with [`ci_code`].
    #[inline]
    pub const fn opcode(self) -> u16 {
        self.0 & 0xE003
    }

    #[inline]
    pub const fn funct3(self) -> u32 {
        self.bits(13, 3)
    }

    #[inline]
    pub const fn quadrant(self) -> u32 {
        self.bits(0, 2)
    }

    /// Bit 12, used to split CR-format and shift encodings.
    #[inline]
    pub const fn topbit(self) -> bool {
        self.bits(12, 1) != 0
    }

    /// Full register field at bits 11:7 (CR, CI).
    #[inline]
    pub const fn rd(self) -> u32 {
        self.bits(7, 5)
    }

    /// Full register field at bits 6:2 (CR, CSS).
    #[inline]
    pub const fn rs2(self) -> u32 {
        self.bits(2, 5)
    }

    /// Compact register at bits 4:2, already offset to x8..x15.
    #[inline]
    pub const fn creg_low(self) -> u32 {
        self.bits(2, 3) + 8
    }

    /// Compact register at bits 9:7, already offset to x8..x15.
    #[inline]
    pub const fn creg_high(self) -> u32 {
        self.bits(7, 3) + 8
    }

    /// CA-format selector bits 11:10.
    #[inline]
    pub const fn funct2_high(self) -> u32 {
        self.bits(10, 2)
    }

    /// CA-format selector bits 6:5.
    #[inline]
    pub const fn funct2_low(self) -> u32 {
        self.bits(5, 2)
    }

    /// CI-format 6-bit signed immediate.
    #[inline]
    pub const fn ci_imm(self) -> i32 {
        sign_extend(self.bits(2, 5) | (self.bits(12, 1) << 5), 6)
    }

    /// Shift amount for C.SLLI/C.SRLI/C.SRAI.
    #[inline]
    pub const fn shift_imm(self) -> u32 {
        self.bits(2, 5) | (self.bits(12, 1) << 5)
    }

    /// C.LUI immediate, already shifted.
    #[inline]
    pub const fn lui_imm(self) -> i32 {
        self.ci_imm() << 12
    }

    /// C.ADDI16SP immediate.
    pub const fn addi16sp_imm(self) -> i32 {
        let imm = (self.bits(6, 1) << 4)
            | (self.bits(2, 1) << 5)
            | (self.bits(5, 1) << 6)
            | (self.bits(3, 2) << 7)
            | (self.bits(12, 1) << 9);
        sign_extend(imm, 10)
    }

    /// C.ADDI4SPN immediate.
    pub const fn addi4spn_imm(self) -> u32 {
        (self.bits(6, 1) << 2) | (self.bits(5, 1) << 3) | (self.bits(11, 2) << 4) | (self.bits(7, 4) << 6)
    }

    /// C.LW/C.SW/C.FLW/C.FSW offset.
    pub const fn word_offset(self) -> u32 {
        (self.bits(6, 1) << 2) | (self.bits(10, 3) << 3) | (self.bits(5, 1) << 6)
    }

    /// C.LD/C.SD/C.FLD/C.FSD offset.
    pub const fn double_offset(self) -> u32 {
        (self.bits(10, 3) << 3) | (self.bits(5, 2) << 6)
    }

    /// C.LWSP/C.FLWSP offset.
    pub const fn lwsp_offset(self) -> u32 {
        (self.bits(4, 3) << 2) | (self.bits(12, 1) << 5) | (self.bits(2, 2) << 6)
    }

    /// C.LDSP/C.FLDSP offset.
    pub const fn ldsp_offset(self) -> u32 {
        (self.bits(5, 2) << 3) | (self.bits(12, 1) << 5) | (self.bits(2, 3) << 6)
    }

    /// C.SWSP/C.FSWSP offset.
    pub const fn swsp_offset(self) -> u32 {
        (self.bits(9, 4) << 2) | (self.bits(7, 2) << 6)
    }

    /// C.SDSP/C.FSDSP offset.
    pub const fn sdsp_offset(self) -> u32 {
        (self.bits(10, 3) << 3) | (self.bits(7, 3) << 6)
    }

    /// C.J/C.JAL offset.
    pub const fn jump_imm(self) -> i32 {
        let imm = (self.bits(3, 3) << 1)
            | (self.bits(11, 1) << 4)
            | (self.bits(2, 1) << 5)
            | (self.bits(7, 1) << 6)
            | (self.bits(6, 1) << 7)
            | (self.bits(9, 2) << 8)
            | (self.bits(8, 1) << 10)
            | (self.bits(12, 1) << 11);
        sign_extend(imm, 12)
    }

    /// C.BEQZ/C.BNEZ offset.
    pub const fn branch_imm(self) -> i32 {
        let imm = (self.bits(3, 2) << 1)
            | (self.bits(10, 2) << 3)
            | (self.bits(2, 1) << 5)
            | (self.bits(5, 2) << 6)
            | (self.bits(12, 1) << 8);
        sign_extend(imm, 9)
    }
}

impl fmt::Debug for CompressedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompressedInstruction(0x{:04X})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length() {
        assert_eq!(Instruction::new(0x00000013).length(), 4);
        assert_eq!(Instruction::new(0x4501).length(), 2);
        assert_eq!(Instruction::new(0x0000).length(), 2);
    }

    #[test]
    fn test_itype_immediates() {
        // addi x5, x6, -1
        let i = Instruction::new(0xFFF30293).itype();
        assert_eq!((i.rd, i.rs1), (5, 6));
        assert_eq!(i.signed_imm(), -1);
        // srai x1, x1, 3
        let srai = Instruction::new(0x4030D093).itype();
        assert!(srai.is_srai());
        assert_eq!(srai.shift64_imm(), 3);
    }

    #[test]
    fn test_branch_and_jump_offsets() {
        // beq x1, x2, -8
        assert_eq!(Instruction::new(0xFE208CE3).btype().signed_imm(), -8);
        // bne x0, x0, +16
        assert_eq!(Instruction::new(0x00001863).btype().signed_imm(), 16);
        // jal x1, +2048
        assert_eq!(Instruction::new(0x001000EF).jtype().jump_offset(), 2048);
        // jal x0, -4
        assert_eq!(Instruction::new(0xFFDFF06F).jtype().jump_offset(), -4);
    }

    #[test]
    fn test_store_immediate() {
        // sw x2, -4(x1)
        let s = Instruction::new(0xFE20AE23).stype();
        assert_eq!((s.rs1, s.rs2), (1, 2));
        assert_eq!(s.signed_imm(), -4);
    }

    #[test]
    fn test_upper_immediate() {
        // lui x1, 0x80000
        let u = Instruction::new(0x800000B7).utype();
        assert_eq!(u.rd, 1);
        assert_eq!(u.upper_imm(), i32::MIN);
    }

    #[test]
    fn test_compressed_immediates() {
        // c.li a0, -1
        let li = CompressedInstruction::new(0x557D);
        assert_eq!(li.opcode(), ci_code(0b010, 0b01));
        assert_eq!(li.rd(), 10);
        assert_eq!(li.ci_imm(), -1);
        // c.addi16sp sp, -64
        assert_eq!(CompressedInstruction::new(0x7139).addi16sp_imm(), -64);
        // c.addi4spn a0, sp, 16
        let spn = CompressedInstruction::new(0x0808);
        assert_eq!(spn.addi4spn_imm(), 16);
        assert_eq!(spn.creg_low(), 10);
        // c.j -2
        assert_eq!(CompressedInstruction::new(0xBFFD).jump_imm(), -2);
        // c.beqz a0, +8
        let beqz = CompressedInstruction::new(0xC501);
        assert_eq!(beqz.branch_imm(), 8);
        assert_eq!(beqz.creg_high(), 10);
    }

    #[test]
    fn test_compressed_memory_offsets() {
        // c.lw a1, 4(a0)
        let lw = CompressedInstruction::new(0x414C);
        assert_eq!(lw.word_offset(), 4);
        assert_eq!((lw.creg_low(), lw.creg_high()), (11, 10));
        // c.ldsp ra, 8(sp)
        assert_eq!(CompressedInstruction::new(0x60A2).ldsp_offset(), 8);
        // c.sdsp ra, 8(sp)
        assert_eq!(CompressedInstruction::new(0xE406).sdsp_offset(), 8);
        // c.swsp ra, 12(sp)
        assert_eq!(CompressedInstruction::new(0xC606).swsp_offset(), 12);
    }
}

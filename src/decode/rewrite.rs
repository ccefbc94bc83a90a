//! Threaded rewrite.
//!
//! Every decoder-cache entry stores its instruction in a layout chosen for
//! the bytecode that dispatches it. Register numbers are repacked into
//! whole bytes and immediates are stored pre-sign-extended, so the
//! dispatch loop never has to reassemble scattered immediate bits.
//! Control-transfer targets are checked against the execute segment here,
//! once, so the dispatch loop can jump without bounds checks. A target
//! outside the segment or misaligned demotes the entry to
//! [`Bytecode::Invalid`].

use crate::cpu::error::{ExceptionKind, MachineException, MachineResult};
use crate::cpu::instruction::{opcode, ci_code, Instruction, REG_RA, REG_SP};
use crate::cpu::{xlen_mask, AddressType};

use super::bytecode::Bytecode;

/// Register/register/immediate layout.
///
/// `imm` in bits 15:0, `rs2` in bits 23:16, `rs1` in bits 31:24.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FasterItype(u32);

impl FasterItype {
    #[inline]
    pub const fn new(rs1: u32, rs2: u32, imm: i32) -> Self {
        Self((imm as u32 & 0xFFFF) | ((rs2 & 0xFF) << 16) | ((rs1 & 0xFF) << 24))
    }

    #[inline]
    pub const fn from_whole(whole: u32) -> Self {
        Self(whole)
    }

    #[inline]
    pub const fn whole(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn rs1(self) -> u32 {
        self.0 >> 24
    }

    #[inline]
    pub const fn rs2(self) -> u32 {
        (self.0 >> 16) & 0xFF
    }

    #[inline]
    pub const fn signed_imm(self) -> i32 {
        self.0 as u16 as i16 as i32
    }

    #[inline]
    pub const fn unsigned_imm(self) -> u32 {
        self.0 & 0xFFFF
    }
}

/// Three-register layout: `rd` in bits 15:0, `rs2` in 23:16, `rs1` in 31:24.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FasterOpType(u32);

impl FasterOpType {
    #[inline]
    pub const fn new(rd: u32, rs1: u32, rs2: u32) -> Self {
        Self((rd & 0xFFFF) | ((rs2 & 0xFF) << 16) | ((rs1 & 0xFF) << 24))
    }

    #[inline]
    pub const fn from_whole(whole: u32) -> Self {
        Self(whole)
    }

    #[inline]
    pub const fn whole(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn rd(self) -> u32 {
        self.0 & 0xFFFF
    }

    #[inline]
    pub const fn rs1(self) -> u32 {
        self.0 >> 24
    }

    #[inline]
    pub const fn rs2(self) -> u32 {
        (self.0 >> 16) & 0xFF
    }
}

/// Load-immediate layout: `rd` in bits 7:0, `imm` in bits 31:16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FasterImmediate(u32);

impl FasterImmediate {
    #[inline]
    pub const fn new(rd: u32, imm: i32) -> Self {
        Self((rd & 0xFF) | ((imm as u32 & 0xFFFF) << 16))
    }

    #[inline]
    pub const fn from_whole(whole: u32) -> Self {
        Self(whole)
    }

    #[inline]
    pub const fn whole(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn rd(self) -> u32 {
        self.0 & 0xFF
    }

    #[inline]
    pub const fn signed_imm(self) -> i32 {
        (self.0 >> 16) as u16 as i16 as i32
    }
}

/// Register move layout: `rs1` in bits 7:0, `rd` in bits 15:8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FasterMove(u32);

impl FasterMove {
    #[inline]
    pub const fn new(rd: u32, rs1: u32) -> Self {
        Self((rs1 & 0xFF) | ((rd & 0xFF) << 8))
    }

    #[inline]
    pub const fn from_whole(whole: u32) -> Self {
        Self(whole)
    }

    #[inline]
    pub const fn whole(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn rd(self) -> u32 {
        (self.0 >> 8) & 0xFF
    }

    #[inline]
    pub const fn rs1(self) -> u32 {
        self.0 & 0xFF
    }
}

/// Jump / upper-immediate layout: 24-bit `offset`, `rd` in bits 31:24.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FasterJtype(u32);

impl FasterJtype {
    #[inline]
    pub const fn new(rd: u32, offset: u32) -> Self {
        Self((offset & 0xFF_FFFF) | ((rd & 0xFF) << 24))
    }

    #[inline]
    pub const fn from_whole(whole: u32) -> Self {
        Self(whole)
    }

    #[inline]
    pub const fn whole(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn rd(self) -> u32 {
        self.0 >> 24
    }

    /// Offset sign-extended from 24 bits.
    #[inline]
    pub const fn signed_imm(self) -> i32 {
        ((self.0 << 8) as i32) >> 8
    }

    /// Offset interpreted as a LUI/AUIPC immediate (stored shifted by 4).
    #[inline]
    pub const fn upper_imm(self) -> i32 {
        (self.0 << 8) as i32
    }
}

/// Floating-point arithmetic layout: `func`, `rd`, `rs2`, `rs1` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FasterFloatType(u32);

impl FasterFloatType {
    #[inline]
    pub const fn new(func: u32, rd: u32, rs1: u32, rs2: u32) -> Self {
        Self((func & 0xFF) | ((rd & 0xFF) << 8) | ((rs2 & 0xFF) << 16) | ((rs1 & 0xFF) << 24))
    }

    #[inline]
    pub const fn from_whole(whole: u32) -> Self {
        Self(whole)
    }

    #[inline]
    pub const fn whole(self) -> u32 {
        self.0
    }

    /// Operand precision: 0 = single, 1 = double.
    #[inline]
    pub const fn func(self) -> u32 {
        self.0 & 0xFF
    }

    #[inline]
    pub const fn rd(self) -> u32 {
        (self.0 >> 8) & 0xFF
    }

    #[inline]
    pub const fn rs2(self) -> u32 {
        (self.0 >> 16) & 0xFF
    }

    #[inline]
    pub const fn rs1(self) -> u32 {
        self.0 >> 24
    }
}

/// Virtual address range `[begin, end)` that control transfers must stay in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecSpan {
    pub begin: u64,
    pub end: u64,
}

impl ExecSpan {
    pub const fn new(begin: u64, end: u64) -> Self {
        Self { begin, end }
    }

    /// Whether `[addr, addr + len)` lies entirely inside the span.
    #[inline]
    pub fn is_within(&self, addr: u64, len: u64) -> bool {
        match addr.checked_add(len) {
            Some(addr_end) => addr >= self.begin && addr_end <= self.end,
            None => false,
        }
    }
}

/// `pc + offset` at guest width, or `None` when the sum wraps.
#[inline]
fn branch_target<A: AddressType>(pc: A, offset: i32) -> Option<u64> {
    let target = pc.to_u64() as i128 + offset as i128;
    if target < 0 || target > xlen_mask::<A>() as i128 {
        None
    } else {
        Some(target as u64)
    }
}

/// RV64-only bytecodes become invalid on RV32, keeping the original bits.
fn rv64_only<A: AddressType>(bytecode: Bytecode, whole: u32, original: u32) -> (Bytecode, u32) {
    if A::is_rv64() {
        (bytecode, whole)
    } else {
        (Bytecode::Invalid, original)
    }
}

/// Rewrite `instr` for dispatch by `bytecode`.
///
/// Returns the (possibly demoted or specialized) bytecode and the rewritten
/// instruction bits. `compressed` selects 2-byte target alignment.
pub fn threaded_rewrite<A: AddressType>(
    bytecode: Bytecode,
    pc: A,
    instr: Instruction,
    span: &ExecSpan,
    compressed: bool,
) -> MachineResult<(Bytecode, u32)> {
    let pcal: u64 = if compressed { 2 } else { 4 };
    let shift_mask = A::BITS - 1;
    let original = instr.whole();
    let ci = instr.compressed();

    // The target only needs room for the smallest instruction
    let aligned_target = |offset: i32| -> Option<u64> {
        branch_target(pc, offset).filter(|&addr| span.is_within(addr, pcal) && addr % pcal == 0)
    };

    let rewritten = match bytecode {
        Bytecode::Invalid
        | Bytecode::Function
        | Bytecode::FuncBlock
        | Bytecode::Stop
        | Bytecode::System
        | Bytecode::Syscall
        | Bytecode::Fmadd
        | Bytecode::CFunction => (bytecode, original),

        Bytecode::Lui | Bytecode::Auipc => {
            let u = instr.utype();
            (bytecode, FasterJtype::new(u.rd, u.imm << 4).whole())
        }
        Bytecode::Mv => {
            let i = instr.itype();
            (bytecode, FasterMove::new(i.rd, i.rs1).whole())
        }
        Bytecode::Li => {
            let i = instr.itype();
            (bytecode, FasterImmediate::new(i.rd, i.signed_imm()).whole())
        }

        Bytecode::Slliw | Bytecode::Srliw | Bytecode::Sraiw => {
            let i = instr.itype();
            let whole = FasterItype::new(i.rd, i.rs1, (i.imm & 31) as i32).whole();
            rv64_only::<A>(bytecode, whole, original)
        }
        Bytecode::Slli | Bytecode::Srli | Bytecode::Srai | Bytecode::Bseti | Bytecode::Bexti => {
            let i = instr.itype();
            (bytecode, FasterItype::new(i.rd, i.rs1, (i.imm & shift_mask) as i32).whole())
        }
        Bytecode::Addiw => {
            let i = instr.itype();
            let whole = FasterItype::new(i.rd, i.rs1, i.signed_imm()).whole();
            rv64_only::<A>(bytecode, whole, original)
        }
        Bytecode::SextB
        | Bytecode::SextH
        | Bytecode::Addi
        | Bytecode::Slti
        | Bytecode::Sltiu
        | Bytecode::Xori
        | Bytecode::Ori
        | Bytecode::Andi => {
            let i = instr.itype();
            (bytecode, FasterItype::new(i.rd, i.rs1, i.signed_imm()).whole())
        }

        Bytecode::Beq | Bytecode::Bne | Bytecode::Blt | Bytecode::Bge | Bytecode::Bltu | Bytecode::Bgeu => {
            let b = instr.btype();
            let imm = b.signed_imm();
            if aligned_target(imm).is_none() {
                return Ok((Bytecode::Invalid, original));
            }
            let whole = FasterItype::new(b.rs1, b.rs2, imm).whole();
            // Forward branches skip the budget check
            let bytecode = match bytecode {
                Bytecode::Beq if imm > 0 => Bytecode::BeqFw,
                Bytecode::Bne if imm > 0 => Bytecode::BneFw,
                other => other,
            };
            (bytecode, whole)
        }

        Bytecode::OpAddw
        | Bytecode::OpSubw
        | Bytecode::OpMulw
        | Bytecode::OpAddUw
        | Bytecode::OpSh1addUw
        | Bytecode::OpSh2addUw => {
            let r = instr.rtype();
            let whole = FasterOpType::new(r.rd, r.rs1, r.rs2).whole();
            rv64_only::<A>(bytecode, whole, original)
        }
        Bytecode::OpAdd
        | Bytecode::OpSub
        | Bytecode::OpSll
        | Bytecode::OpSlt
        | Bytecode::OpSltu
        | Bytecode::OpXor
        | Bytecode::OpSrl
        | Bytecode::OpSra
        | Bytecode::OpOr
        | Bytecode::OpAnd
        | Bytecode::OpMul
        | Bytecode::OpDiv
        | Bytecode::OpDivu
        | Bytecode::OpRem
        | Bytecode::OpRemu
        | Bytecode::OpZextH
        | Bytecode::OpSh1add
        | Bytecode::OpSh2add
        | Bytecode::OpSh3add => {
            let r = instr.rtype();
            (bytecode, FasterOpType::new(r.rd, r.rs1, r.rs2).whole())
        }

        Bytecode::Ldwu | Bytecode::Ldd => {
            let i = instr.itype();
            let whole = FasterItype::new(i.rd, i.rs1, i.signed_imm()).whole();
            rv64_only::<A>(bytecode, whole, original)
        }
        Bytecode::Ldb | Bytecode::Ldbu | Bytecode::Ldh | Bytecode::Ldhu | Bytecode::Ldw | Bytecode::Flw | Bytecode::Fld => {
            let i = instr.itype();
            (bytecode, FasterItype::new(i.rd, i.rs1, i.signed_imm()).whole())
        }
        Bytecode::Std => {
            let s = instr.stype();
            let whole = FasterItype::new(s.rs1, s.rs2, s.signed_imm()).whole();
            rv64_only::<A>(bytecode, whole, original)
        }
        Bytecode::Stb | Bytecode::Sth | Bytecode::Stw | Bytecode::Fsw | Bytecode::Fsd => {
            let s = instr.stype();
            (bytecode, FasterItype::new(s.rs1, s.rs2, s.signed_imm()).whole())
        }

        Bytecode::Jal => {
            let j = instr.jtype();
            let offset = j.jump_offset();
            if aligned_target(offset).is_none() {
                return Ok((Bytecode::Invalid, original));
            }
            match j.rd {
                0 => (Bytecode::FastJal, offset as u32),
                REG_RA => (Bytecode::FastCall, offset as u32),
                rd => (bytecode, FasterJtype::new(rd, offset as u32).whole()),
            }
        }
        Bytecode::Jalr => {
            let i = instr.itype();
            (bytecode, FasterItype::new(i.rd, i.rs1, i.signed_imm()).whole())
        }

        Bytecode::Fadd | Bytecode::Fsub | Bytecode::Fmul | Bytecode::Fdiv => {
            let f = instr.r4type();
            (bytecode, FasterFloatType::new(f.funct2, f.rd, f.rs1, f.rs2).whole())
        }

        Bytecode::Vle32 | Bytecode::Vse32 => {
            let v = instr.vls();
            (bytecode, FasterMove::new(v.vd, v.rs1).whole())
        }
        Bytecode::VfaddVv | Bytecode::VfmulVf => {
            let v = instr.opvv();
            (bytecode, FasterOpType::new(v.vd, v.vs1, v.vs2).whole())
        }

        Bytecode::CAddi => {
            let whole = if ci.opcode() == ci_code(0b000, 0b00) {
                // C.ADDI4SPN
                FasterItype::new(ci.creg_low(), REG_SP, ci.addi4spn_imm() as i32)
            } else if ci.opcode() == ci_code(0b011, 0b01) {
                // C.ADDI16SP
                FasterItype::new(REG_SP, REG_SP, ci.addi16sp_imm())
            } else {
                FasterItype::new(ci.rd(), ci.rd(), ci.ci_imm())
            };
            (Bytecode::CAddi, whole.whole())
        }
        Bytecode::CLi => (Bytecode::CAddi, FasterItype::new(ci.rd(), 0, ci.ci_imm()).whole()),
        Bytecode::CMv => (bytecode, FasterMove::new(ci.rd(), ci.rs2()).whole()),
        Bytecode::CSlli => {
            let shift = ci.shift_imm() & shift_mask;
            (bytecode, FasterItype::new(ci.rd(), 0, shift as i32).whole())
        }
        Bytecode::CSrli => {
            let shift = ci.shift_imm() & shift_mask;
            (bytecode, FasterItype::new(ci.creg_high(), 0, shift as i32).whole())
        }
        Bytecode::CAndi => (bytecode, FasterItype::new(ci.creg_high(), 0, ci.ci_imm()).whole()),
        Bytecode::CAdd => (bytecode, FasterItype::new(ci.rd(), ci.rs2(), 0).whole()),
        Bytecode::CXor | Bytecode::COr => {
            (bytecode, FasterItype::new(ci.creg_high(), ci.creg_low(), 0).whole())
        }
        Bytecode::CBeqz | Bytecode::CBnez => {
            let imm = ci.branch_imm();
            if aligned_target(imm).is_none() {
                return Ok((Bytecode::Invalid, original));
            }
            (bytecode, FasterItype::new(ci.creg_high(), 0, imm).whole())
        }
        Bytecode::CJalAddiw if A::is_rv64() => {
            // C.ADDIW
            (bytecode, FasterItype::new(ci.rd(), ci.rd(), ci.ci_imm()).whole())
        }
        Bytecode::CJmp | Bytecode::CJalAddiw => {
            let imm = ci.jump_imm();
            if aligned_target(imm).is_none() {
                return Ok((Bytecode::Invalid, original));
            }
            (bytecode, imm as u32)
        }
        Bytecode::CJr | Bytecode::CJalr => (bytecode, ci.rd()),
        Bytecode::CLdd => {
            let whole = if ci.quadrant() == 0 {
                // C.LD: destination rd', base rs1'
                FasterItype::new(ci.creg_low(), ci.creg_high(), ci.double_offset() as i32)
            } else {
                // C.LDSP
                FasterItype::new(ci.rd(), REG_SP, ci.ldsp_offset() as i32)
            };
            (bytecode, whole.whole())
        }
        Bytecode::CStd => {
            let whole = if ci.quadrant() == 0 {
                // C.SD: base rs1', source rs2'
                FasterItype::new(ci.creg_high(), ci.creg_low(), ci.double_offset() as i32)
            } else {
                // C.SDSP
                FasterItype::new(REG_SP, ci.rs2(), ci.sdsp_offset() as i32)
            };
            (bytecode, whole.whole())
        }
        Bytecode::CLdw => {
            let whole = if ci.quadrant() == 0 {
                // C.LW
                FasterItype::new(ci.creg_low(), ci.creg_high(), ci.word_offset() as i32)
            } else {
                // C.LWSP
                FasterItype::new(ci.rd(), REG_SP, ci.lwsp_offset() as i32)
            };
            (bytecode, whole.whole())
        }
        Bytecode::CStw => {
            let whole = if ci.quadrant() == 0 {
                // C.SW
                FasterItype::new(ci.creg_high(), ci.creg_low(), ci.word_offset() as i32)
            } else {
                // C.SWSP
                FasterItype::new(REG_SP, ci.rs2(), ci.swsp_offset() as i32)
            };
            (bytecode, whole.whole())
        }

        Bytecode::LivePatch => {
            return Err(MachineException::new(
                ExceptionKind::InvalidProgram,
                "Live-patch bytecode is not valid here",
                original as u64,
            ))
        }
        Bytecode::BeqFw | Bytecode::BneFw | Bytecode::FastJal | Bytecode::FastCall => {
            return Err(MachineException::new(
                ExceptionKind::InvalidProgram,
                "Invalid bytecode for threaded rewrite",
                bytecode as u64,
            ))
        }
    };
    Ok(rewritten)
}

/// Whether `instr` ends a basic block in a 4-byte-only or mixed stream.
#[inline]
pub(crate) fn is_block_terminator(instr: Instruction) -> bool {
    matches!(
        instr.opcode(),
        opcode::BRANCH | opcode::SYSTEM | opcode::JAL | opcode::JALR
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPAN: ExecSpan = ExecSpan::new(0x1000, 0x2000);

    fn rewrite32(bc: Bytecode, pc: u32, word: u32) -> (Bytecode, u32) {
        threaded_rewrite::<u32>(bc, pc, Instruction::new(word), &SPAN, true).unwrap()
    }

    #[test]
    fn test_layouts() {
        let i = FasterItype::new(5, 6, -1);
        assert_eq!((i.rs1(), i.rs2(), i.signed_imm()), (5, 6, -1));
        assert_eq!(i.unsigned_imm(), 0xFFFF);

        let op = FasterOpType::new(1, 2, 3);
        assert_eq!((op.rd(), op.rs1(), op.rs2()), (1, 2, 3));

        let li = FasterImmediate::new(10, -2048);
        assert_eq!((li.rd(), li.signed_imm()), (10, -2048));

        let mv = FasterMove::new(7, 9);
        assert_eq!((mv.rd(), mv.rs1()), (7, 9));

        let j = FasterJtype::new(3, (-8i32) as u32);
        assert_eq!((j.rd(), j.signed_imm()), (3, -8));

        let f = FasterFloatType::new(1, 2, 3, 4);
        assert_eq!((f.func(), f.rd(), f.rs1(), f.rs2()), (1, 2, 3, 4));
    }

    #[test]
    fn test_span() {
        assert!(SPAN.is_within(0x1FFC, 4));
        assert!(!SPAN.is_within(0x1FFE, 4));
        assert!(!SPAN.is_within(0xFFE, 2));
        assert!(!SPAN.is_within(u64::MAX, 4));
    }

    #[test]
    fn test_addi_and_li() {
        // addi x5, x6, -1
        let (bc, whole) = rewrite32(Bytecode::Addi, 0x1000, 0xFFF30293);
        assert_eq!(bc, Bytecode::Addi);
        let i = FasterItype::from_whole(whole);
        assert_eq!((i.rs1(), i.rs2(), i.signed_imm()), (5, 6, -1));

        // li x1, 5
        let (bc, whole) = rewrite32(Bytecode::Li, 0x1000, 0x00500093);
        assert_eq!(bc, Bytecode::Li);
        assert_eq!(FasterImmediate::from_whole(whole).signed_imm(), 5);
    }

    #[test]
    fn test_lui_immediate() {
        // lui x1, 0x80000
        let (_, whole) = rewrite32(Bytecode::Lui, 0x1000, 0x800000B7);
        let j = FasterJtype::from_whole(whole);
        assert_eq!(j.rd(), 1);
        assert_eq!(j.upper_imm(), i32::MIN);
    }

    #[test]
    fn test_branch_within_segment() {
        // beq x1, x2, -8 at 0x1010
        let (bc, whole) = rewrite32(Bytecode::Beq, 0x1010, 0xFE208CE3);
        assert_eq!(bc, Bytecode::Beq);
        assert_eq!(FasterItype::from_whole(whole).signed_imm(), -8);

        // bne x0, x0, +16 is a forward branch
        let (bc, _) = rewrite32(Bytecode::Bne, 0x1000, 0x00001863);
        assert_eq!(bc, Bytecode::BneFw);
    }

    #[test]
    fn test_branch_outside_segment_is_invalid() {
        // Target 0x2000 is one past the last byte: no room for an instruction
        let (bc, whole) = rewrite32(Bytecode::Bne, 0x1FF0, 0x00001863);
        assert_eq!(bc, Bytecode::Invalid);
        assert_eq!(whole, 0x00001863);

        // Target below the segment start
        let (bc, _) = rewrite32(Bytecode::Beq, 0x1004, 0xFE208CE3);
        assert_eq!(bc, Bytecode::Invalid);
    }

    #[test]
    fn test_jal_specializations() {
        // jal x0, -4
        let (bc, whole) = rewrite32(Bytecode::Jal, 0x1004, 0xFFDFF06F);
        assert_eq!(bc, Bytecode::FastJal);
        assert_eq!(whole as i32, -4);

        // jal ra, +2048
        let (bc, whole) = rewrite32(Bytecode::Jal, 0x1000, 0x001000EF);
        assert_eq!(bc, Bytecode::FastCall);
        assert_eq!(whole, 2048);

        // jal x5, +2048 keeps the link register
        let (bc, whole) = rewrite32(Bytecode::Jal, 0x1000, 0x001002EF);
        assert_eq!(bc, Bytecode::Jal);
        let j = FasterJtype::from_whole(whole);
        assert_eq!((j.rd(), j.signed_imm()), (5, 2048));

        // Out of segment
        let (bc, _) = rewrite32(Bytecode::Jal, 0x1F00, 0x001000EF);
        assert_eq!(bc, Bytecode::Invalid);
    }

    #[test]
    fn test_rv64_only_demoted_on_rv32() {
        let (bc, _) = rewrite32(Bytecode::Addiw, 0x1000, 0x0011009B);
        assert_eq!(bc, Bytecode::Invalid);
        let (bc, _) = threaded_rewrite::<u64>(Bytecode::Addiw, 0x1000, Instruction::new(0x0011009B), &SPAN, true).unwrap();
        assert_eq!(bc, Bytecode::Addiw);
    }

    #[test]
    fn test_compressed_rewrites() {
        // c.li a0, -1 becomes C.ADDI with x0 source
        let (bc, whole) = rewrite32(Bytecode::CLi, 0x1000, 0x557D);
        assert_eq!(bc, Bytecode::CAddi);
        let i = FasterItype::from_whole(whole);
        assert_eq!((i.rs1(), i.rs2(), i.signed_imm()), (10, 0, -1));

        // c.addi4spn a0, sp, 16
        let (_, whole) = rewrite32(Bytecode::CAddi, 0x1000, 0x0808);
        let i = FasterItype::from_whole(whole);
        assert_eq!((i.rs1(), i.rs2(), i.signed_imm()), (10, 2, 16));

        // c.lw a1, 4(a0)
        let (_, whole) = rewrite32(Bytecode::CLdw, 0x1000, 0x414C);
        let i = FasterItype::from_whole(whole);
        assert_eq!((i.rs1(), i.rs2(), i.signed_imm()), (11, 10, 4));

        // c.sdsp ra, 8(sp)
        let (_, whole) =
            threaded_rewrite::<u64>(Bytecode::CStd, 0x1000, Instruction::new(0xE406), &SPAN, true).unwrap();
        let i = FasterItype::from_whole(whole);
        assert_eq!((i.rs1(), i.rs2(), i.signed_imm()), (2, 1, 8));

        // c.jr ra
        assert_eq!(rewrite32(Bytecode::CJr, 0x1000, 0x8082), (Bytecode::CJr, 1));
    }

    #[test]
    fn test_compressed_ld_uses_rd_prime_as_destination() {
        // c.ld a1, 8(a0): rd' = a1 (bits 4:2), rs1' = a0 (bits 9:7)
        let word = 0x650C;
        let (bc, whole) =
            threaded_rewrite::<u64>(Bytecode::CLdd, 0x1000, Instruction::new(word), &SPAN, true).unwrap();
        assert_eq!(bc, Bytecode::CLdd);
        let i = FasterItype::from_whole(whole);
        assert_eq!((i.rs1(), i.rs2(), i.signed_imm()), (11, 10, 8));
    }

    #[test]
    fn test_compressed_jump_range_check() {
        // c.j -2 at the segment start lands outside
        let (bc, _) = rewrite32(Bytecode::CJmp, 0x1000, 0xBFFD);
        assert_eq!(bc, Bytecode::Invalid);
        let (bc, whole) = rewrite32(Bytecode::CJmp, 0x1002, 0xBFFD);
        assert_eq!(bc, Bytecode::CJmp);
        assert_eq!(whole as i32, -2);
    }

    #[test]
    fn test_target_at_last_halfword() {
        // 0x1FFE holds room for one compressed instruction
        let (bc, _) = rewrite32(Bytecode::Bne, 0x1FEE, 0x00001863);
        assert_eq!(bc, Bytecode::BneFw);

        // jal x0, +16
        let (bc, whole) = rewrite32(Bytecode::Jal, 0x1FEE, 0x0100006F);
        assert_eq!(bc, Bytecode::FastJal);
        assert_eq!(whole, 16);

        // c.j +2
        let (bc, whole) = rewrite32(Bytecode::CJmp, 0x1FFC, 0xA009);
        assert_eq!(bc, Bytecode::CJmp);
        assert_eq!(whole, 2);

        // Without compressed instructions the target is misaligned
        let (bc, _) =
            threaded_rewrite::<u32>(Bytecode::Jal, 0x1FEE, Instruction::new(0x0100006F), &SPAN, false).unwrap();
        assert_eq!(bc, Bytecode::Invalid);
    }

    #[test]
    fn test_livepatch_is_an_error() {
        let err = threaded_rewrite::<u32>(Bytecode::LivePatch, 0x1000, Instruction::new(0x8082), &SPAN, true)
            .unwrap_err();
        assert_eq!(err.kind, ExceptionKind::InvalidProgram);
    }

    #[test]
    fn test_rewrite_is_deterministic() {
        let mut state = 0xD1B5_4A32_D192_ED03u64;
        for _ in 0..50_000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let word = (state >> 11) as u32;
            let pc = 0x1000 + ((state as u32) & 0xFFE);
            let instr = Instruction::new(word);
            let bc = super::super::classify::computed_index_for::<u64>(instr);
            let first = threaded_rewrite::<u64>(bc, pc as u64, instr, &SPAN, true).unwrap();
            let second = threaded_rewrite::<u64>(bc, pc as u64, instr, &SPAN, true).unwrap();
            assert_eq!(first, second);
        }
    }
}

//! Dispatch bytecodes.
//!
//! A bytecode names the dispatch handler and the rewrite layout of a
//! decoder-cache entry. It is not part of the guest ISA. Each variant
//! notes which rewritten layout its `instr` field carries:
//!
//! | Layout | Fields |
//! |--------|--------|
//! | `Itype`  | [`FasterItype`](super::rewrite::FasterItype) |
//! | `Op`     | [`FasterOpType`](super::rewrite::FasterOpType) |
//! | `Imm`    | [`FasterImmediate`](super::rewrite::FasterImmediate) |
//! | `Move`   | [`FasterMove`](super::rewrite::FasterMove) |
//! | `Jtype`  | [`FasterJtype`](super::rewrite::FasterJtype) |
//! | `Float`  | [`FasterFloatType`](super::rewrite::FasterFloatType) |
//! | `Raw`    | original instruction bits |
//! | `Offset` | signed jump distance in bytes |
//! | `Reg`    | a single register number |

/// Dispatch tag of a decoder-cache entry.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Bytecode {
    /// Raw. Traps with an illegal-opcode fault.
    #[default]
    Invalid = 0,
    /// Itype: rs1 = rd, rs2 = source.
    Addi,
    /// Imm.
    Li,
    /// Move.
    Mv,

    /// Itype, shift amount masked to XLEN-1.
    Slli,
    Slti,
    Sltiu,
    Xori,
    Srli,
    Srai,
    Ori,
    Andi,

    /// Jtype, immediate pre-shifted by 4.
    Lui,
    Auipc,

    /// Itype: rs1 = destination, rs2 = base.
    Ldb,
    Ldbu,
    Ldh,
    Ldhu,
    Ldw,

    /// Itype: rs1 = base, rs2 = source.
    Stb,
    Sth,
    Stw,

    /// RV64 only.
    Ldwu,
    Ldd,
    Std,

    /// Itype: rs1, rs2 compared; imm is the branch offset.
    Beq,
    Bne,
    Blt,
    Bge,
    Bltu,
    Bgeu,
    /// Forward-only branches that skip the budget check.
    BeqFw,
    BneFw,

    /// Jtype.
    Jal,
    /// Itype: rs1 = link register, rs2 = base.
    Jalr,
    /// Offset. Direct jump without link.
    FastJal,
    /// Offset. Direct call linking into RA.
    FastCall,

    /// Op.
    OpAdd,
    OpSub,
    OpSll,
    OpSlt,
    OpSltu,
    OpXor,
    OpSrl,
    OpOr,
    OpAnd,
    OpMul,
    OpDiv,
    OpDivu,
    OpRem,
    OpRemu,
    OpSra,
    OpZextH,
    OpSh1add,
    OpSh2add,
    OpSh3add,

    /// Itype.
    SextB,
    SextH,
    Bseti,
    Bexti,

    /// Itype, RV64 only.
    Addiw,
    Slliw,
    Srliw,
    Sraiw,
    /// Op, RV64 only.
    OpAddw,
    OpSubw,
    OpMulw,
    OpAddUw,
    OpSh1addUw,
    OpSh2addUw,

    /// Itype: rs1 = destination, rs2 = source.
    CAddi,
    /// Itype (rewritten to `CAddi` with x0 source).
    CLi,
    /// Move.
    CMv,
    /// Itype: rs1 = destination.
    CSlli,
    /// Itype: rs1 = tested register.
    CBeqz,
    CBnez,
    /// Offset.
    CJmp,
    /// Reg.
    CJr,
    /// Offset on RV32 (C.JAL), Itype on RV64 (C.ADDIW).
    CJalAddiw,
    /// Reg.
    CJalr,
    /// Itype, load/store layouts.
    CLdd,
    CStd,
    CLdw,
    CStw,
    /// Itype: rs1 = destination.
    CSrli,
    CAndi,
    /// Itype: rs1 = destination, rs2 = source.
    CAdd,
    CXor,
    COr,
    /// Raw compressed instruction, resolved through the handler table.
    CFunction,

    /// Raw. ECALL.
    Syscall,
    /// Raw. Halts the machine.
    Stop,

    /// Itype, load/store layouts on FP registers.
    Flw,
    Fld,
    Fsw,
    Fsd,
    /// Float.
    Fadd,
    Fsub,
    Fmul,
    Fdiv,
    /// Raw.
    Fmadd,
    /// Move: rd = vd, rs1 = base.
    Vle32,
    Vse32,
    /// Op: rd = vd.
    VfaddVv,
    VfmulVf,

    /// Raw, resolved through the handler table.
    Function,
    /// Raw, resolved through the handler table, and ends a block.
    FuncBlock,
    /// Raw return instruction probed once against the exit address.
    LivePatch,
    /// Raw. SYSTEM instructions other than ECALL/STOP.
    System,
}

impl Bytecode {
    /// Number of bytecodes.
    pub const COUNT: usize = Self::System as usize + 1;

    /// Every bytecode in numeric order.
    pub const ALL: [Bytecode; Self::COUNT] = {
        use Bytecode::*;
        [
            Invalid, Addi, Li, Mv, Slli, Slti, Sltiu, Xori, Srli, Srai, Ori, Andi, Lui, Auipc,
            Ldb, Ldbu, Ldh, Ldhu, Ldw, Stb, Sth, Stw, Ldwu, Ldd, Std, Beq, Bne, Blt, Bge, Bltu,
            Bgeu, BeqFw, BneFw, Jal, Jalr, FastJal, FastCall, OpAdd, OpSub, OpSll, OpSlt, OpSltu,
            OpXor, OpSrl, OpOr, OpAnd, OpMul, OpDiv, OpDivu, OpRem, OpRemu, OpSra, OpZextH,
            OpSh1add, OpSh2add, OpSh3add, SextB, SextH, Bseti, Bexti, Addiw, Slliw, Srliw, Sraiw,
            OpAddw, OpSubw, OpMulw, OpAddUw, OpSh1addUw, OpSh2addUw, CAddi, CLi, CMv, CSlli,
            CBeqz, CBnez, CJmp, CJr, CJalAddiw, CJalr, CLdd, CStd, CLdw, CStw, CSrli, CAndi, CAdd,
            CXor, COr, CFunction, Syscall, Stop, Flw, Fld, Fsw, Fsd, Fadd, Fsub, Fmul, Fdiv,
            Fmadd, Vle32, Vse32, VfaddVv, VfmulVf, Function, FuncBlock, LivePatch, System,
        ]
    };

    /// Convert from the raw tag value.
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// Whether this is a conditional branch bytecode.
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Self::Beq
                | Self::Bne
                | Self::Blt
                | Self::Bge
                | Self::Bltu
                | Self::Bgeu
                | Self::BeqFw
                | Self::BneFw
                | Self::CBeqz
                | Self::CBnez
        )
    }

    /// Whether this bytecode is dispatched from a compressed instruction.
    pub fn is_compressed(self) -> bool {
        (Self::CAddi as u8..=Self::CFunction as u8).contains(&(self as u8))
    }
}

//! Block-mode dispatch.
//!
//! Entering a block charges every instruction up to its end to the
//! counter; leaving a block early refunds the instructions that did not
//! run. The budget is only checked where control can flow backward or
//! leave the segment, so straight-line code and forward branches never
//! pay for it.

use std::rc::Rc;

use super::Machine;
use crate::cpu::address::xlen_mask;
use crate::cpu::alu;
use crate::cpu::instruction::{Instruction, REG_A7, REG_RA};
use crate::cpu::registers::{VECTOR_F32_LANES, VLEN_BYTES};
use crate::cpu::{AddressType, ExceptionKind, MachineException, MachineResult};
use crate::decode::handlers::float::{read_f32, write_f32, write_f64};
use crate::decode::{Bytecode, FasterFloatType, FasterImmediate, FasterItype, FasterJtype, FasterMove, FasterOpType};
use crate::segment::{DecoderEntry, ExecuteSegment};

const STOP_INSTRUCTION: u32 = 0x7FF0_0073;
const WFI_INSTRUCTION: u32 = 0x1050_0073;

/// Where control goes after one decoder-cache entry.
enum Next {
    /// Fall through to the instruction `len` bytes ahead.
    Step(u64),
    /// Transfer to a target inside the current segment that was validated
    /// when the entry was rewritten.
    Branch { target: u64, check: bool },
    /// Transfer to an arbitrary address.
    Jump(u64),
    /// The entry rewrote itself and must run again.
    Redispatch,
    /// The machine stopped. Execution resumes at the given address.
    Halt(u64),
}

#[inline]
fn imm<A: AddressType>(i: FasterItype) -> A {
    A::from_i64(i.signed_imm() as i64)
}

#[inline]
fn relative<A: AddressType>(pc: u64, offset: i32) -> u64 {
    pc.wrapping_add(offset as i64 as u64) & xlen_mask::<A>()
}

impl<A: AddressType> Machine<A> {
    /// Run from `pc` in block mode until the machine stops or `counter`
    /// reaches `max`.
    ///
    /// Returns `true` when the machine halted itself and `false` when the
    /// budget ran out. Either way the program counter and the instruction
    /// counter are saved so a later call resumes exactly where this one
    /// left off.
    pub fn simulate(&mut self, pc: u64, counter: u64, max: u64) -> MachineResult<bool> {
        self.counter = counter;
        self.max_counter = max;
        self.stopped = false;

        let compressed = self.options.compressed;
        let mut counter = counter;
        let mut pc = pc & xlen_mask::<A>();
        let mut exec = self.cpu.current_execute_segment().clone();
        let mut check = true;

        loop {
            if check && counter >= self.max_counter {
                self.cpu.set_pc(pc);
                self.counter = counter;
                return Ok(false);
            }
            if exec.is_stale() || !exec.is_within(pc, 2) {
                self.counter = counter;
                exec = self.next_execute_segment(pc)?;
                pc = self.cpu.pc();
                if self.stopped {
                    return Ok(true);
                }
            }

            let head = exec.entry_at(pc);
            counter = counter.saturating_add(head.instruction_count());
            let last = pc + head.block_bytes(compressed);

            check = loop {
                let idx = exec.index_of(pc);
                let entry = exec.entry(idx);
                let next = match self.execute_entry(&exec, idx, entry, pc, &mut counter) {
                    Ok(next) => next,
                    Err(err) => {
                        log::debug!("Fault at 0x{:X}: {}", pc, err);
                        self.cpu.set_pc(pc);
                        self.counter = counter.saturating_sub(entry.instruction_count());
                        return Err(err);
                    }
                };
                // Instructions charged on block entry that will not run
                let unretired = entry.instruction_count().saturating_sub(1);
                match next {
                    Next::Step(len) => {
                        let at_end = pc >= last;
                        pc += len;
                        if at_end {
                            break false;
                        }
                    }
                    Next::Redispatch => {}
                    Next::Branch { target, check } => {
                        counter = counter.saturating_sub(unretired);
                        pc = target;
                        break check;
                    }
                    Next::Jump(dest) => {
                        counter = counter.saturating_sub(unretired);
                        pc = dest;
                        break true;
                    }
                    Next::Halt(resume) => {
                        counter = counter.saturating_sub(unretired);
                        self.cpu.set_pc(resume);
                        self.counter = counter;
                        return Ok(true);
                    }
                }
            };
        }
    }

    /// Continue from the saved program counter with `additional`
    /// instructions of budget.
    pub fn run(&mut self, additional: u64) -> MachineResult<bool> {
        let pc = self.cpu.pc();
        let counter = self.counter;
        self.simulate(pc, counter, counter.saturating_add(additional))
    }

    #[inline]
    fn load_address(&self, i: FasterItype) -> u64 {
        alu::add_imm(self.cpu.reg(i.rs2()), i.signed_imm() as i64).to_u64()
    }

    #[inline]
    fn store_address(&self, i: FasterItype) -> u64 {
        alu::add_imm(self.cpu.reg(i.rs1()), i.signed_imm() as i64).to_u64()
    }

    #[inline]
    fn aligned_destination(&self, dest: u64) -> MachineResult<u64> {
        let align = if self.options.compressed { 1 } else { 3 };
        if dest & align != 0 {
            return Err(MachineException::of(ExceptionKind::MisalignedInstruction, dest));
        }
        Ok(dest)
    }

    fn execute_entry(
        &mut self,
        exec: &Rc<ExecuteSegment<A>>,
        idx: usize,
        entry: DecoderEntry,
        pc: u64,
        counter: &mut u64,
    ) -> MachineResult<Next> {
        let bits = entry.instr;
        let next = match entry.bytecode {
            Bytecode::Invalid => {
                return Err(MachineException::of(ExceptionKind::IllegalOpcode, bits as u64));
            }

            Bytecode::Addi | Bytecode::CAddi => {
                let i = FasterItype::from_whole(bits);
                let value = alu::add_imm(self.cpu.reg(i.rs2()), i.signed_imm() as i64);
                self.cpu.set_reg(i.rs1(), value);
                Next::Step(if entry.bytecode == Bytecode::Addi { 4 } else { 2 })
            }
            Bytecode::Li => {
                let i = FasterImmediate::from_whole(bits);
                self.cpu.set_reg(i.rd(), A::from_i64(i.signed_imm() as i64));
                Next::Step(4)
            }
            Bytecode::Mv | Bytecode::CMv => {
                let i = FasterMove::from_whole(bits);
                let value = self.cpu.reg(i.rs1());
                self.cpu.set_reg(i.rd(), value);
                Next::Step(if entry.bytecode == Bytecode::Mv { 4 } else { 2 })
            }

            Bytecode::Slli
            | Bytecode::Slti
            | Bytecode::Sltiu
            | Bytecode::Xori
            | Bytecode::Srli
            | Bytecode::Srai
            | Bytecode::Ori
            | Bytecode::Andi
            | Bytecode::SextB
            | Bytecode::SextH
            | Bytecode::Bseti
            | Bytecode::Bexti => {
                let i = FasterItype::from_whole(bits);
                let src = self.cpu.reg(i.rs2());
                let shamt = A::from_u64(i.unsigned_imm() as u64);
                let value = match entry.bytecode {
                    Bytecode::Slli => alu::sll(src, shamt),
                    Bytecode::Slti => alu::slt(src, imm(i)),
                    Bytecode::Sltiu => alu::sltu(src, imm(i)),
                    Bytecode::Xori => A::from_u64(src.to_u64() ^ imm::<A>(i).to_u64()),
                    Bytecode::Srli => alu::srl(src, shamt),
                    Bytecode::Srai => alu::sra(src, shamt),
                    Bytecode::Ori => A::from_u64(src.to_u64() | imm::<A>(i).to_u64()),
                    Bytecode::Andi => A::from_u64(src.to_u64() & imm::<A>(i).to_u64()),
                    Bytecode::SextB => alu::sext_b(src),
                    Bytecode::SextH => alu::sext_h(src),
                    Bytecode::Bseti => alu::bset(src, shamt),
                    _ => alu::bext(src, shamt),
                };
                self.cpu.set_reg(i.rs1(), value);
                Next::Step(4)
            }

            Bytecode::Lui => {
                let j = FasterJtype::from_whole(bits);
                self.cpu.set_reg(j.rd(), A::from_i64(j.upper_imm() as i64));
                Next::Step(4)
            }
            Bytecode::Auipc => {
                let j = FasterJtype::from_whole(bits);
                self.cpu.set_reg(j.rd(), A::from_u64(relative::<A>(pc, j.upper_imm())));
                Next::Step(4)
            }

            Bytecode::Ldb | Bytecode::Ldbu | Bytecode::Ldh | Bytecode::Ldhu | Bytecode::Ldw | Bytecode::Ldwu | Bytecode::Ldd => {
                let i = FasterItype::from_whole(bits);
                let addr = self.load_address(i);
                let value = match entry.bytecode {
                    Bytecode::Ldb => self.memory.read::<u8>(addr)? as i8 as i64 as u64,
                    Bytecode::Ldbu => self.memory.read::<u8>(addr)? as u64,
                    Bytecode::Ldh => self.memory.read::<u16>(addr)? as i16 as i64 as u64,
                    Bytecode::Ldhu => self.memory.read::<u16>(addr)? as u64,
                    Bytecode::Ldw => self.memory.read::<u32>(addr)? as i32 as i64 as u64,
                    Bytecode::Ldwu => self.memory.read::<u32>(addr)? as u64,
                    _ => self.memory.read::<u64>(addr)?,
                };
                self.cpu.registers_mut().set_u64(i.rs1(), value);
                Next::Step(4)
            }
            Bytecode::Stb | Bytecode::Sth | Bytecode::Stw | Bytecode::Std => {
                let i = FasterItype::from_whole(bits);
                let addr = self.store_address(i);
                let value = self.cpu.registers().get_u64(i.rs2());
                match entry.bytecode {
                    Bytecode::Stb => self.memory.write(addr, value as u8)?,
                    Bytecode::Sth => self.memory.write(addr, value as u16)?,
                    Bytecode::Stw => self.memory.write(addr, value as u32)?,
                    _ => self.memory.write(addr, value)?,
                }
                Next::Step(4)
            }

            Bytecode::Beq
            | Bytecode::Bne
            | Bytecode::Blt
            | Bytecode::Bge
            | Bytecode::Bltu
            | Bytecode::Bgeu
            | Bytecode::BeqFw
            | Bytecode::BneFw => {
                let i = FasterItype::from_whole(bits);
                let (a, b) = (self.cpu.reg(i.rs1()), self.cpu.reg(i.rs2()));
                let taken = match entry.bytecode {
                    Bytecode::Beq | Bytecode::BeqFw => a == b,
                    Bytecode::Bne | Bytecode::BneFw => a != b,
                    Bytecode::Blt => a.to_i64() < b.to_i64(),
                    Bytecode::Bge => a.to_i64() >= b.to_i64(),
                    Bytecode::Bltu => a.to_u64() < b.to_u64(),
                    _ => a.to_u64() >= b.to_u64(),
                };
                if taken {
                    let check = !matches!(entry.bytecode, Bytecode::BeqFw | Bytecode::BneFw);
                    Next::Branch {
                        target: relative::<A>(pc, i.signed_imm()),
                        check,
                    }
                } else {
                    Next::Step(4)
                }
            }

            Bytecode::Jal => {
                let j = FasterJtype::from_whole(bits);
                self.cpu.set_reg(j.rd(), A::from_u64(pc + 4));
                Next::Branch {
                    target: relative::<A>(pc, j.signed_imm()),
                    check: true,
                }
            }
            Bytecode::FastJal => Next::Branch {
                target: relative::<A>(pc, bits as i32),
                check: true,
            },
            Bytecode::FastCall => {
                self.cpu.set_reg(REG_RA, A::from_u64(pc + 4));
                Next::Branch {
                    target: relative::<A>(pc, bits as i32),
                    check: true,
                }
            }
            Bytecode::Jalr => {
                let i = FasterItype::from_whole(bits);
                let dest = self.aligned_destination(self.load_address(i) & !1)?;
                self.cpu.set_reg(i.rs1(), A::from_u64(pc + 4));
                Next::Jump(dest)
            }

            Bytecode::OpAdd
            | Bytecode::OpSub
            | Bytecode::OpSll
            | Bytecode::OpSlt
            | Bytecode::OpSltu
            | Bytecode::OpXor
            | Bytecode::OpSrl
            | Bytecode::OpOr
            | Bytecode::OpAnd
            | Bytecode::OpMul
            | Bytecode::OpDiv
            | Bytecode::OpDivu
            | Bytecode::OpRem
            | Bytecode::OpRemu
            | Bytecode::OpSra
            | Bytecode::OpZextH
            | Bytecode::OpSh1add
            | Bytecode::OpSh2add
            | Bytecode::OpSh3add
            | Bytecode::OpAddw
            | Bytecode::OpSubw
            | Bytecode::OpMulw
            | Bytecode::OpAddUw
            | Bytecode::OpSh1addUw
            | Bytecode::OpSh2addUw => {
                let r = FasterOpType::from_whole(bits);
                let (a, b) = (self.cpu.reg(r.rs1()), self.cpu.reg(r.rs2()));
                let value = match entry.bytecode {
                    Bytecode::OpAdd => alu::add(a, b),
                    Bytecode::OpSub => alu::sub(a, b),
                    Bytecode::OpSll => alu::sll(a, b),
                    Bytecode::OpSlt => alu::slt(a, b),
                    Bytecode::OpSltu => alu::sltu(a, b),
                    Bytecode::OpXor => A::from_u64(a.to_u64() ^ b.to_u64()),
                    Bytecode::OpSrl => alu::srl(a, b),
                    Bytecode::OpOr => A::from_u64(a.to_u64() | b.to_u64()),
                    Bytecode::OpAnd => A::from_u64(a.to_u64() & b.to_u64()),
                    Bytecode::OpMul => alu::mul(a, b),
                    Bytecode::OpDiv => alu::div(a, b),
                    Bytecode::OpDivu => alu::divu(a, b),
                    Bytecode::OpRem => alu::rem(a, b),
                    Bytecode::OpRemu => alu::remu(a, b),
                    Bytecode::OpSra => alu::sra(a, b),
                    Bytecode::OpZextH => alu::zext_h(a),
                    Bytecode::OpSh1add => alu::sh_add(a, b, 1),
                    Bytecode::OpSh2add => alu::sh_add(a, b, 2),
                    Bytecode::OpSh3add => alu::sh_add(a, b, 3),
                    Bytecode::OpAddw => alu::addw(a, b),
                    Bytecode::OpSubw => alu::subw(a, b),
                    Bytecode::OpMulw => alu::mulw(a, b),
                    Bytecode::OpAddUw => alu::sh_add_uw(a, b, 0),
                    Bytecode::OpSh1addUw => alu::sh_add_uw(a, b, 1),
                    _ => alu::sh_add_uw(a, b, 2),
                };
                self.cpu.set_reg(r.rd(), value);
                Next::Step(4)
            }

            Bytecode::Addiw | Bytecode::Slliw | Bytecode::Srliw | Bytecode::Sraiw => {
                let i = FasterItype::from_whole(bits);
                let src = self.cpu.reg(i.rs2());
                let shamt = i.unsigned_imm();
                let value = match entry.bytecode {
                    Bytecode::Addiw => alu::addw(src, imm(i)),
                    Bytecode::Slliw => alu::sllw(src, shamt),
                    Bytecode::Srliw => alu::srlw(src, shamt),
                    _ => alu::sraw(src, shamt),
                };
                self.cpu.set_reg(i.rs1(), value);
                Next::Step(4)
            }

            Bytecode::CLi => {
                // Rewritten to CAddi when the segment is built
                return Err(MachineException::of(ExceptionKind::IllegalOpcode, bits as u64));
            }
            Bytecode::CSlli | Bytecode::CSrli | Bytecode::CAndi => {
                let i = FasterItype::from_whole(bits);
                let src = self.cpu.reg(i.rs1());
                let value = match entry.bytecode {
                    Bytecode::CSlli => alu::sll(src, A::from_u64(i.unsigned_imm() as u64)),
                    Bytecode::CSrli => alu::srl(src, A::from_u64(i.unsigned_imm() as u64)),
                    _ => A::from_u64(src.to_u64() & imm::<A>(i).to_u64()),
                };
                self.cpu.set_reg(i.rs1(), value);
                Next::Step(2)
            }
            Bytecode::CAdd | Bytecode::CXor | Bytecode::COr => {
                let i = FasterItype::from_whole(bits);
                let (a, b) = (self.cpu.reg(i.rs1()), self.cpu.reg(i.rs2()));
                let value = match entry.bytecode {
                    Bytecode::CAdd => alu::add(a, b),
                    Bytecode::CXor => A::from_u64(a.to_u64() ^ b.to_u64()),
                    _ => A::from_u64(a.to_u64() | b.to_u64()),
                };
                self.cpu.set_reg(i.rs1(), value);
                Next::Step(2)
            }
            Bytecode::CBeqz | Bytecode::CBnez => {
                let i = FasterItype::from_whole(bits);
                let zero = self.cpu.reg(i.rs1()).to_u64() == 0;
                if zero == (entry.bytecode == Bytecode::CBeqz) {
                    Next::Branch {
                        target: relative::<A>(pc, i.signed_imm()),
                        check: true,
                    }
                } else {
                    Next::Step(2)
                }
            }
            Bytecode::CJmp => Next::Branch {
                target: relative::<A>(pc, bits as i32),
                check: true,
            },
            Bytecode::CJalAddiw if A::is_rv64() => {
                let i = FasterItype::from_whole(bits);
                let value = alu::addw(self.cpu.reg(i.rs2()), imm(i));
                self.cpu.set_reg(i.rs1(), value);
                Next::Step(2)
            }
            Bytecode::CJalAddiw => {
                self.cpu.set_reg(REG_RA, A::from_u64(pc + 2));
                Next::Branch {
                    target: relative::<A>(pc, bits as i32),
                    check: true,
                }
            }
            Bytecode::CJr | Bytecode::CJalr => {
                let dest = self.aligned_destination(self.cpu.registers().get_u64(bits) & !1)?;
                if entry.bytecode == Bytecode::CJalr {
                    self.cpu.set_reg(REG_RA, A::from_u64(pc + 2));
                }
                Next::Jump(dest)
            }
            Bytecode::CLdd | Bytecode::CLdw => {
                let i = FasterItype::from_whole(bits);
                let addr = self.load_address(i);
                let value = if entry.bytecode == Bytecode::CLdd {
                    self.memory.read::<u64>(addr)?
                } else {
                    self.memory.read::<u32>(addr)? as i32 as i64 as u64
                };
                self.cpu.registers_mut().set_u64(i.rs1(), value);
                Next::Step(2)
            }
            Bytecode::CStd | Bytecode::CStw => {
                let i = FasterItype::from_whole(bits);
                let addr = self.store_address(i);
                let value = self.cpu.registers().get_u64(i.rs2());
                if entry.bytecode == Bytecode::CStd {
                    self.memory.write(addr, value)?;
                } else {
                    self.memory.write(addr, value as u32)?;
                }
                Next::Step(2)
            }

            Bytecode::Flw | Bytecode::Fld => {
                let i = FasterItype::from_whole(bits);
                let addr = self.load_address(i);
                if entry.bytecode == Bytecode::Flw {
                    let value: u32 = self.memory.read(addr)?;
                    self.cpu.registers_mut().getfl_mut(i.rs1()).load_u32(value);
                } else {
                    let value: u64 = self.memory.read(addr)?;
                    self.cpu.registers_mut().getfl_mut(i.rs1()).load_u64(value);
                }
                Next::Step(4)
            }
            Bytecode::Fsw | Bytecode::Fsd => {
                let i = FasterItype::from_whole(bits);
                let addr = self.store_address(i);
                let value = self.cpu.registers().getfl(i.rs2()).bits();
                if entry.bytecode == Bytecode::Fsw {
                    self.memory.write(addr, value as u32)?;
                } else {
                    self.memory.write(addr, value)?;
                }
                Next::Step(4)
            }
            Bytecode::Fadd | Bytecode::Fsub | Bytecode::Fmul | Bytecode::Fdiv => {
                let f = FasterFloatType::from_whole(bits);
                let regs = self.cpu.registers_mut();
                if f.func() == 0 {
                    let (a, b) = (read_f32(regs, f.rs1()), read_f32(regs, f.rs2()));
                    let value = match entry.bytecode {
                        Bytecode::Fadd => a + b,
                        Bytecode::Fsub => a - b,
                        Bytecode::Fmul => a * b,
                        _ => a / b,
                    };
                    write_f32(regs, f.rd(), value);
                } else {
                    let (a, b) = (regs.getfl(f.rs1()).f64(), regs.getfl(f.rs2()).f64());
                    let value = match entry.bytecode {
                        Bytecode::Fadd => a + b,
                        Bytecode::Fsub => a - b,
                        Bytecode::Fmul => a * b,
                        _ => a / b,
                    };
                    write_f64(regs, f.rd(), value);
                }
                Next::Step(4)
            }

            Bytecode::Vle32 => {
                let v = FasterMove::from_whole(bits);
                let addr = self.cpu.registers().get_u64(v.rs1());
                let mut bytes = [0u8; VLEN_BYTES];
                self.memory.read_bytes(addr, &mut bytes)?;
                self.cpu.registers_mut().rvv_mut().get_mut(v.rd()).load_bytes(&bytes);
                Next::Step(4)
            }
            Bytecode::Vse32 => {
                let v = FasterMove::from_whole(bits);
                let addr = self.cpu.registers().get_u64(v.rs1());
                let bytes = self.cpu.registers().rvv().get(v.rd()).to_bytes();
                self.memory.write_bytes(addr, &bytes)?;
                Next::Step(4)
            }
            Bytecode::VfaddVv => {
                let v = FasterOpType::from_whole(bits);
                let rvv = self.cpu.registers_mut().rvv_mut();
                let (a, b) = (*rvv.get(v.rs2()).f32(), *rvv.get(v.rs1()).f32());
                let dst = rvv.get_mut(v.rd()).f32_mut();
                for lane in 0..VECTOR_F32_LANES {
                    dst[lane] = a[lane] + b[lane];
                }
                Next::Step(4)
            }
            Bytecode::VfmulVf => {
                let v = FasterOpType::from_whole(bits);
                let scalar = read_f32(self.cpu.registers(), v.rs1());
                let rvv = self.cpu.registers_mut().rvv_mut();
                let a = *rvv.get(v.rs2()).f32();
                for (dst, src) in rvv.get_mut(v.rd()).f32_mut().iter_mut().zip(a) {
                    *dst = src * scalar;
                }
                Next::Step(4)
            }

            Bytecode::Stop => {
                let resume = if bits == STOP_INSTRUCTION || bits == WFI_INSTRUCTION {
                    pc + 4
                } else {
                    // A return that was hot-swapped into a halt
                    self.cpu.registers().get_u64(REG_RA) & !1
                };
                self.stopped = true;
                Next::Halt(resume)
            }
            Bytecode::LivePatch => {
                let ra = self.cpu.registers().get_u64(REG_RA);
                exec.resolve_live_patch(idx, ra, self.memory.exit_address());
                Next::Redispatch
            }

            Bytecode::Function
            | Bytecode::FuncBlock
            | Bytecode::Fmadd
            | Bytecode::CFunction
            | Bytecode::System
            | Bytecode::Syscall => self.slow_path(exec, idx, entry, pc, counter)?,
        };
        Ok(next)
    }

    /// Run an entry through its precise-mode handler with the machine
    /// state synchronized: `pc` at the instruction and the counter equal to
    /// the instructions retired before it.
    #[cold]
    fn slow_path(
        &mut self,
        exec: &ExecuteSegment<A>,
        idx: usize,
        entry: DecoderEntry,
        pc: u64,
        counter: &mut u64,
    ) -> MachineResult<Next> {
        let instr = Instruction::new(entry.instr);
        let len = instr.length() as u64;
        let pending = entry.instruction_count();
        self.cpu.set_pc(pc);
        self.counter = counter.saturating_sub(pending);

        match entry.bytecode {
            Bytecode::System => self.system(instr)?,
            Bytecode::Syscall => {
                let nr = self.cpu.registers().get_u64(REG_A7) as usize;
                self.system_call(nr)?;
            }
            _ => exec.resolve_handler(idx, instr).execute(self, instr)?,
        }

        *counter = self.counter.saturating_add(pending);
        let resume = self.cpu.pc().wrapping_add(len) & xlen_mask::<A>();
        if self.stopped {
            return Ok(Next::Halt(resume));
        }
        let ends_block = matches!(entry.bytecode, Bytecode::FuncBlock | Bytecode::System | Bytecode::Syscall);
        if self.cpu.pc() != pc || ends_block {
            return Ok(Next::Jump(resume));
        }
        Ok(Next::Step(len))
    }
}

//! Per-instruction x86-32 selection
//!
//! Each IR op lowers to a byte sequence attached to its [`BackendData`].
//! Ops with implicit physical operands (multiply, divide and modulo use
//! EAX and EDX, register shifts use CL, the string copies use ESI, EDI and
//! ECX) save any conflicting register on demand, preferring a free
//! register over a stack push and restoring in reverse order. Ops needing
//! a byte-accessible register route through EAX, EBX, ECX or EDX.

use crate::encode::{cc, has_byte_form, Asm, BackendData, ImmKind, EAX, ECX, EDX, EDI, ESI, ESP};
use lyra_common::{LyraError, LyraResult};
use lyra_ir::{Instruction, Opcode, RegId, GPR_SIZE};

// Protocol of the runtime's syscall thunk, reached through the reserved
// slot at the head of the global region.
const THUNK_MMAP: u32 = 0;
const THUNK_MUNMAP: u32 = 1;

const PROT_READ: u32 = 0x1;
const PROT_WRITE: u32 = 0x2;
const MAP_PRIVATE: u32 = 0x02;
const MAP_ANONYMOUS: u32 = 0x20;
const MAP_STACK: u32 = 0x20000;

/// Lower one instruction into its byte buffer.
pub fn select(insn: &Instruction, b: &mut BackendData) -> LyraResult<()> {
    let mut a = Asm::new(b, &insn.unused_regs);
    let (r1, r2, r3) = (insn.r1, insn.r2, insn.r3);

    use Opcode::*;
    match insn.op {
        // ---- three-register arithmetic reduced to two-operand form ----
        Add => commutative3(&mut a, r1, r2, r3, Asm::add_rr)?,
        Mul => commutative3(&mut a, r1, r2, r3, Asm::imul_rr)?,

        Sub => {
            if r1 != r3 {
                if r1 != r2 {
                    a.cpy(r1, r2)?;
                }
                a.sub_rr(r1, r3)?;
            } else if r1 != r2 {
                // r1 == r3: compute -(r3 - r2) in place.
                a.sub_rr(r3, r2)?;
                a.neg(r1)?;
            } else {
                a.sub_rr(r1, r2)?;
            }
        }

        Neg => {
            if r1 != r2 {
                a.cpy(r1, r2)?;
            }
            a.neg(r1)?;
        }

        Not => {
            if r1 != r2 {
                a.cpy(r1, r2)?;
            }
            a.not(r1)?;
        }

        Addi => {
            if r1 != r2 {
                a.cpy(r1, r2)?;
            }
            a.add_ri(r1, 0)?;
        }

        Muli => {
            // imul r32, r/m32, imm: a genuine three-operand form.
            if a.wide() {
                a.byte(0x69);
                a.modrm_rr(r1, r2)?;
                a.imm32_slot(0);
            } else {
                a.byte(0x6b);
                a.modrm_rr(r1, r2)?;
                a.imm8_slot(0);
            }
        }

        // ---- widening multiply and division through EAX:EDX ----
        Mulh => mul_high(&mut a, r1, r2, r3, true)?,
        Mulhu => mul_high(&mut a, r1, r2, r3, false)?,
        Mulhi => {
            let d = claim_scratch(&mut a, &[EAX, EDX, r1, r2])?;
            a.mov_ri(d, 0)?;
            mul_high_with(&mut a, r1, r2, d)?;
            release_scratch(&mut a, d)?;
        }
        Mulhui => {
            let d = claim_scratch(&mut a, &[EAX, EDX, r1, r2])?;
            a.mov_ri(d, 0)?;
            mul_high_unsigned_with(&mut a, r1, r2, d)?;
            release_scratch(&mut a, d)?;
        }

        Div => divmod(&mut a, r1, r2, DivSrc::Reg(r3), true, false)?,
        Mod => divmod(&mut a, r1, r2, DivSrc::Reg(r3), true, true)?,
        Divu => divmod(&mut a, r1, r2, DivSrc::Reg(r3), false, false)?,
        Modu => divmod(&mut a, r1, r2, DivSrc::Reg(r3), false, true)?,
        Divi => divmod(&mut a, r1, r2, DivSrc::Imm, true, false)?,
        Modi => divmod(&mut a, r1, r2, DivSrc::Imm, true, true)?,
        Divui => divmod(&mut a, r1, r2, DivSrc::Imm, false, false)?,
        Modui => divmod(&mut a, r1, r2, DivSrc::Imm, false, true)?,
        Divi2 => divmod_swapped(&mut a, r1, r2, true, false)?,
        Modi2 => divmod_swapped(&mut a, r1, r2, true, true)?,
        Divui2 => divmod_swapped(&mut a, r1, r2, false, false)?,
        Modui2 => divmod_swapped(&mut a, r1, r2, false, true)?,

        // ---- bitwise ----
        And => commutative3(&mut a, r1, r2, r3, Asm::and_rr)?,
        Or => commutative3(&mut a, r1, r2, r3, Asm::or_rr)?,
        Xor => commutative3(&mut a, r1, r2, r3, Asm::xor_rr)?,
        Andi => {
            if r1 != r2 {
                a.cpy(r1, r2)?;
            }
            a.and_ri(r1)?;
        }
        Ori => {
            if r1 != r2 {
                a.cpy(r1, r2)?;
            }
            a.or_ri(r1)?;
        }
        Xori => {
            if r1 != r2 {
                a.cpy(r1, r2)?;
            }
            a.xor_ri(r1)?;
        }

        Cpy => {
            if r1 != r2 {
                a.cpy(r1, r2)?;
            }
        }

        // ---- shifts ----
        Sll => shift_by_reg(&mut a, Asm::SHL, r1, r2, r3)?,
        Srl => shift_by_reg(&mut a, Asm::SHR, r1, r2, r3)?,
        Sra => shift_by_reg(&mut a, Asm::SAR, r1, r2, r3)?,
        Slli => shift_by_literal(&mut a, Asm::SHL, r1, r2, insn)?,
        Srli => shift_by_literal(&mut a, Asm::SHR, r1, r2, insn)?,
        Srai => shift_by_literal(&mut a, Asm::SAR, r1, r2, insn)?,
        Slli2 => shift_imm_by_reg(&mut a, Asm::SHL, r1, r2)?,
        Srli2 => shift_imm_by_reg(&mut a, Asm::SHR, r1, r2)?,
        Srai2 => shift_imm_by_reg(&mut a, Asm::SAR, r1, r2)?,

        // ---- extension ----
        Zxt => extend(&mut a, r1, r2, insn, false)?,
        Sxt => extend(&mut a, r1, r2, insn, true)?,

        // ---- set-if-compare ----
        Seq => set_compare_rr(&mut a, cc::E, r1, r2, r3)?,
        Sne => set_compare_rr(&mut a, cc::NE, r1, r2, r3)?,
        Slt => set_compare_rr(&mut a, cc::L, r1, r2, r3)?,
        Slte => set_compare_rr(&mut a, cc::LE, r1, r2, r3)?,
        Sltu => set_compare_rr(&mut a, cc::B, r1, r2, r3)?,
        Slteu => set_compare_rr(&mut a, cc::BE, r1, r2, r3)?,
        Seqi => set_compare_ri(&mut a, cc::E, r1, r2)?,
        Snei => set_compare_ri(&mut a, cc::NE, r1, r2)?,
        Slti => set_compare_ri(&mut a, cc::L, r1, r2)?,
        Sltei => set_compare_ri(&mut a, cc::LE, r1, r2)?,
        Sltui => set_compare_ri(&mut a, cc::B, r1, r2)?,
        Slteui => set_compare_ri(&mut a, cc::BE, r1, r2)?,
        Sgti => set_compare_ri(&mut a, cc::G, r1, r2)?,
        Sgtei => set_compare_ri(&mut a, cc::GE, r1, r2)?,
        Sgtui => set_compare_ri(&mut a, cc::A, r1, r2)?,
        Sgteui => set_compare_ri(&mut a, cc::AE, r1, r2)?,
        Sz => {
            if r1 != r2 {
                a.cpy(r1, r2)?;
            }
            a.test_rr(r1, r1)?;
            set_bool(&mut a, cc::E, r1)?;
        }
        Snz => {
            if r1 != r2 {
                a.cpy(r1, r2)?;
            }
            a.test_rr(r1, r1)?;
            set_bool(&mut a, cc::NE, r1)?;
        }

        // ---- branches to relative targets ----
        Jeq => branch_rr(&mut a, cc::E, r1, r2)?,
        Jne => branch_rr(&mut a, cc::NE, r1, r2)?,
        Jlt => branch_rr(&mut a, cc::L, r1, r2)?,
        Jlte => branch_rr(&mut a, cc::LE, r1, r2)?,
        Jltu => branch_rr(&mut a, cc::B, r1, r2)?,
        Jlteu => branch_rr(&mut a, cc::BE, r1, r2)?,
        Jz => {
            a.test_rr(r1, r1)?;
            a.jcc(cc::E, 0)?;
        }
        Jnz => {
            a.test_rr(r1, r1)?;
            a.jcc(cc::NE, 0)?;
        }
        J => a.jmp(0)?,

        // ---- branches to register targets ----
        Jeqr => branch_reg(&mut a, cc::E, r1, r2, r3)?,
        Jner => branch_reg(&mut a, cc::NE, r1, r2, r3)?,
        Jltr => branch_reg(&mut a, cc::L, r1, r2, r3)?,
        Jlter => branch_reg(&mut a, cc::LE, r1, r2, r3)?,
        Jltur => branch_reg(&mut a, cc::B, r1, r2, r3)?,
        Jlteur => branch_reg(&mut a, cc::BE, r1, r2, r3)?,
        Jzr => {
            a.test_rr(r1, r1)?;
            skip_then_jmp_reg(&mut a, cc::NE, r2)?;
        }
        Jnzr => {
            a.test_rr(r1, r1)?;
            skip_then_jmp_reg(&mut a, cc::E, r2)?;
        }
        Jr => a.jmp_reg(r1)?,

        // ---- branches to absolute immediate targets ----
        Jeqi => branch_abs(&mut a, cc::E, r1, r2)?,
        Jnei => branch_abs(&mut a, cc::NE, r1, r2)?,
        Jlti => branch_abs(&mut a, cc::L, r1, r2)?,
        Jltei => branch_abs(&mut a, cc::LE, r1, r2)?,
        Jltui => branch_abs(&mut a, cc::B, r1, r2)?,
        Jlteui => branch_abs(&mut a, cc::BE, r1, r2)?,
        Jzi => {
            a.test_rr(r1, r1)?;
            skip_then_jmp_abs(&mut a, cc::NE)?;
        }
        Jnzi => {
            a.test_rr(r1, r1)?;
            skip_then_jmp_abs(&mut a, cc::E)?;
        }
        Ji => jmp_abs(&mut a)?,

        // ---- calls and returns ----
        Jpush => a.call(0)?,
        Jpushr => a.call_reg(r1)?,
        Jpushi => {
            // Call to an absolute address through a register; the stack
            // must stay untouched, so a pushed save is not an option.
            let s = a
                .find_unused_reg(&[])
                .ok_or_else(|| LyraError::backend("call to an immediate address needs a free register"))?;
            a.mov_ri(s, 0)?;
            a.call_reg(s)?;
        }
        Jpop => a.ret(),

        Jl => {
            // Jump-and-link: no one-instruction form exists, so read the
            // instruction pointer with call/pop, advance it past this
            // sequence, then jump.
            a.bytes(&[0xe8, 0, 0, 0, 0]);
            a.pop(r1)?;
            // pop(1) + add(3) + jmp(5) bytes follow the pop's address.
            a.add_ri_literal(r1, 9)?;
            a.byte(0xe9);
            a.imm32_slot(0);
        }
        Jlr => {
            a.bytes(&[0xe8, 0, 0, 0, 0]);
            a.pop(r1)?;
            a.add_ri_literal(r1, 6)?;
            a.jmp_reg(r2)?;
        }
        Jli => {
            a.bytes(&[0xe8, 0, 0, 0, 0]);
            a.pop(r1)?;
            a.add_ri_literal(r1, 10)?;
            jmp_abs(&mut a)?;
        }

        // ---- pc-relative addresses ----
        Afip => {
            // call +0 leaves the next address on the stack; the popped
            // value plus the immediate reaches the target. The misc
            // addend accounts for the bytes after the fixup anchor.
            a.bytes(&[0xe8, 0, 0, 0, 0]);
            let mark = a.b.binary.len();
            a.pop(r1)?;
            a.add_ri(r1, 0)?;
            let tail = (a.b.binary.len() - mark) as u32;
            if let Some(s) = &mut a.b.imm {
                s.misc = s.misc.wrapping_add(tail);
            }
        }

        Li => a.mov_ri(r1, 0)?,

        // ---- loads ----
        Ld8 | Ld16 | Ld32 => {
            a.load_mem_disp(width_of(insn.op), r1, r2, 0)?;
        }
        Ld8r | Ld16r | Ld32r => {
            a.load_mem(width_of(insn.op), r1, r2)?;
        }
        Ld8i | Ld16i | Ld32i => {
            // Absolute address: materialize it, then load through it.
            a.mov_ri(r1, 0)?;
            a.load_mem(width_of(insn.op), r1, r1)?;
        }

        // ---- stores ----
        St8 | St8r | St8i | St16 | St16r | St16i | St32 | St32r | St32i => {
            store(&mut a, insn, r1, r2)?;
        }

        // ---- load-store exchanges ----
        Ldst8r => {
            if !has_byte_form(r1) {
                let s = claim_byte_scratch(&mut a, &[r1, r2])?;
                a.cpy(s, r1)?;
                a.byte(0x86);
                a.modrm_mem(s, r2)?;
                a.cpy(r1, s)?;
                release_scratch(&mut a, s)?;
            } else {
                a.byte(0x86);
                a.modrm_mem(r1, r2)?;
            }
        }
        Ldst16r => {
            a.byte(0x66);
            a.xchg_mem(r1, r2)?;
        }
        Ldst32r => a.xchg_mem(r1, r2)?,
        Ldst8 => {
            let routed = !has_byte_form(r1);
            let src = if routed {
                let s = claim_byte_scratch(&mut a, &[r1, r2])?;
                a.cpy(s, r1)?;
                s
            } else {
                r1
            };
            a.byte(0x86);
            if a.wide() {
                a.modrm_mem_disp32(src, r2)?;
                a.imm32_slot(0);
            } else {
                a.modrm_mem_disp8(src, r2)?;
                a.imm8_slot(0);
            }
            if routed {
                a.cpy(r1, src)?;
                release_scratch(&mut a, src)?;
            }
        }
        Ldst8i => {
            let addr = claim_scratch(&mut a, &[r1, r2])?;
            a.mov_ri(addr, 0)?;
            if !has_byte_form(r1) {
                let s = claim_byte_scratch(&mut a, &[r1, addr])?;
                a.cpy(s, r1)?;
                a.byte(0x86);
                a.modrm_mem(s, addr)?;
                a.cpy(r1, s)?;
                release_scratch(&mut a, s)?;
            } else {
                a.byte(0x86);
                a.modrm_mem(r1, addr)?;
            }
            release_scratch(&mut a, addr)?;
        }
        Ldst16 | Ldst32 => {
            if insn.op == Ldst16 {
                a.byte(0x66);
            }
            a.byte(0x87);
            if a.wide() {
                a.modrm_mem_disp32(r1, r2)?;
                a.imm32_slot(0);
            } else {
                a.modrm_mem_disp8(r1, r2)?;
                a.imm8_slot(0);
            }
        }
        Ldst16i | Ldst32i => {
            let addr = claim_scratch(&mut a, &[r1, r2])?;
            a.mov_ri(addr, 0)?;
            if insn.op == Ldst16i {
                a.byte(0x66);
            }
            a.xchg_mem(r1, addr)?;
            release_scratch(&mut a, addr)?;
        }

        // ---- bulk copies ----
        Mem8cpy | Mem16cpy | Mem32cpy => bulk_copy(&mut a, insn, false)?,
        Mem8cpy2 | Mem16cpy2 | Mem32cpy2 => bulk_copy(&mut a, insn, true)?,
        Mem8cpyi | Mem16cpyi | Mem32cpyi => bulk_copy_imm(&mut a, insn, false)?,
        Mem8cpyi2 | Mem16cpyi2 | Mem32cpyi2 => bulk_copy_imm(&mut a, insn, true)?,

        // ---- page management through the syscall thunk ----
        Pagealloc => page_alloc_reg(&mut a, r1, r2)?,
        Pagealloci | Stackpagealloc => {
            let pages = insn.const_imm().unwrap_or(1) as u32;
            let bytes = if insn.op == Stackpagealloc {
                lyra_ir::PAGE_SIZE
            } else {
                pages.wrapping_mul(lyra_ir::PAGE_SIZE)
            };
            let stack = insn.op == Stackpagealloc;
            page_alloc_fixed(&mut a, r1, bytes, stack)?;
        }
        Pagefree => page_free_reg(&mut a, r1, r2)?,
        Pagefreei | Stackpagefree => {
            let pages = insn.const_imm().unwrap_or(1) as u32;
            let bytes = if insn.op == Stackpagefree {
                lyra_ir::PAGE_SIZE
            } else {
                pages.wrapping_mul(lyra_ir::PAGE_SIZE)
            };
            page_free_fixed(&mut a, r1, bytes)?;
        }

        Machinecode => {
            a.bytes(&insn.machinecode);
        }

        Nop => a.nop(),
        Comment => {}

        // 64-bit widths have no lowering on this target.
        _ => {
            return Err(LyraError::backend(format!(
                "no x86-32 lowering for {}",
                insn.op
            )))
        }
    }
    Ok(())
}

fn width_of(op: Opcode) -> u32 {
    use Opcode::*;
    match op {
        Ld8 | Ld8r | Ld8i | St8 | St8r | St8i | Ldst8 | Ldst8r | Ldst8i | Mem8cpy | Mem8cpyi
        | Mem8cpy2 | Mem8cpyi2 => 1,
        Ld16 | Ld16r | Ld16i | St16 | St16r | St16i | Ldst16 | Ldst16r | Ldst16i | Mem16cpy
        | Mem16cpyi | Mem16cpy2 | Mem16cpyi2 => 2,
        _ => 4,
    }
}

/// Commutative three-register op: avoid the copy when the destination
/// already holds an operand.
fn commutative3<'a>(
    a: &mut Asm<'a>,
    r1: RegId,
    r2: RegId,
    r3: RegId,
    op: fn(&mut Asm<'a>, RegId, RegId) -> LyraResult<()>,
) -> LyraResult<()> {
    if r1 != r3 {
        if r1 != r2 {
            a.cpy(r1, r2)?;
        }
        op(a, r1, r3)
    } else {
        op(a, r1, r2)
    }
}

/// A scratch register not in `not_these`: a frontend-reported unused one
/// when available, a saved one otherwise.
fn claim_scratch(a: &mut Asm, not_these: &[RegId]) -> LyraResult<RegId> {
    if let Some(u) = a.find_unused_reg(not_these) {
        a.tmp_in_use[u as usize] = true;
        return Ok(u);
    }
    let pick = (1..8u32)
        .find(|r| !not_these.contains(r) && !a.tmp_in_use[*r as usize])
        .ok_or_else(|| LyraError::backend("no scratch register available"))?;
    a.save_reg(pick, not_these)?;
    a.tmp_in_use[pick as usize] = true;
    Ok(pick)
}

/// Like [`claim_scratch`] but restricted to byte-accessible registers.
fn claim_byte_scratch(a: &mut Asm, not_these: &[RegId]) -> LyraResult<RegId> {
    let byte_regs = [EAX, crate::encode::EBX, ECX, EDX];
    if let Some(u) = a
        .find_unused_reg(not_these)
        .filter(|r| byte_regs.contains(r))
    {
        a.tmp_in_use[u as usize] = true;
        return Ok(u);
    }
    let pick = byte_regs
        .into_iter()
        .find(|r| !not_these.contains(r) && !a.tmp_in_use[*r as usize])
        .ok_or_else(|| LyraError::backend("no byte-accessible scratch register"))?;
    a.save_reg(pick, not_these)?;
    a.tmp_in_use[pick as usize] = true;
    Ok(pick)
}

fn release_scratch(a: &mut Asm, r: RegId) -> LyraResult<()> {
    a.tmp_in_use[r as usize] = false;
    a.restore_reg(r)
}

/// High half of a widening multiply: EDX:EAX := EAX * operand.
fn mul_high(a: &mut Asm, r1: RegId, r2: RegId, r3: RegId, signed: bool) -> LyraResult<()> {
    if signed {
        mul_high_with(a, r1, r2, r3)
    } else {
        mul_high_unsigned_with(a, r1, r2, r3)
    }
}

fn mul_high_with(a: &mut Asm, r1: RegId, r2: RegId, r3: RegId) -> LyraResult<()> {
    mul_high_common(a, r1, r2, r3, true)
}

fn mul_high_unsigned_with(a: &mut Asm, r1: RegId, r2: RegId, r3: RegId) -> LyraResult<()> {
    mul_high_common(a, r1, r2, r3, false)
}

fn mul_high_common(a: &mut Asm, r1: RegId, r2: RegId, r3: RegId, signed: bool) -> LyraResult<()> {
    let not_these = [EAX, EDX, r1, r2, r3];

    if EAX != r1 {
        a.save_reg(EAX, &not_these)?;
    }
    if EDX != r1 {
        a.save_reg(EDX, &not_these)?;
    }

    // The multiplicand must survive EAX being loaded.
    let mut operand = r3;
    if r3 == EAX {
        let s = claim_scratch(a, &not_these)?;
        a.cpy(s, r3)?;
        operand = s;
    }
    if r2 != EAX {
        a.cpy(EAX, r2)?;
    }
    if signed {
        a.imul_implicit(operand)?;
    } else {
        a.mul_implicit(operand)?;
    }
    if r1 != EDX {
        a.cpy(r1, EDX)?;
    }

    if operand != r3 {
        release_scratch(a, operand)?;
    }
    if EDX != r1 {
        a.restore_reg(EDX)?;
    }
    if EAX != r1 {
        a.restore_reg(EAX)?;
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum DivSrc {
    Reg(RegId),
    /// Divisor from the primary immediate slot.
    Imm,
}

/// Division and modulo through EAX:EDX.
fn divmod(a: &mut Asm, r1: RegId, r2: RegId, src: DivSrc, signed: bool, remainder: bool) -> LyraResult<()> {
    let r3 = match src {
        DivSrc::Reg(r) => r,
        DivSrc::Imm => 0,
    };
    let not_these = [EAX, EDX, r1, r2, r3];

    if EAX != r1 {
        a.save_reg(EAX, &not_these)?;
    }
    if EDX != r1 {
        a.save_reg(EDX, &not_these)?;
    }

    // The divisor must live outside EAX and EDX.
    let divisor = match src {
        DivSrc::Imm => {
            let s = claim_scratch(a, &not_these)?;
            a.mov_ri(s, 0)?;
            s
        }
        DivSrc::Reg(r) if r == EAX || r == EDX => {
            let s = claim_scratch(a, &not_these)?;
            a.cpy(s, r)?;
            s
        }
        DivSrc::Reg(r) => r,
    };

    if r2 != EAX {
        a.cpy(EAX, r2)?;
    }
    if signed {
        a.cdq();
        a.idiv_implicit(divisor)?;
    } else {
        a.zero(EDX)?;
        a.div_implicit(divisor)?;
    }

    let result = if remainder { EDX } else { EAX };
    if r1 != result {
        a.cpy(r1, result)?;
    }

    if !matches!(src, DivSrc::Reg(r) if r == divisor) {
        release_scratch(a, divisor)?;
    }
    if EDX != r1 {
        a.restore_reg(EDX)?;
    }
    if EAX != r1 {
        a.restore_reg(EAX)?;
    }
    Ok(())
}

/// Swapped-immediate division: the immediate is the dividend.
fn divmod_swapped(a: &mut Asm, r1: RegId, r2: RegId, signed: bool, remainder: bool) -> LyraResult<()> {
    let not_these = [EAX, EDX, r1, r2];

    if EAX != r1 {
        a.save_reg(EAX, &not_these)?;
    }
    if EDX != r1 {
        a.save_reg(EDX, &not_these)?;
    }

    let divisor = if r2 == EAX || r2 == EDX {
        let s = claim_scratch(a, &not_these)?;
        a.cpy(s, r2)?;
        s
    } else {
        r2
    };

    a.mov_ri(EAX, 0)?;
    if signed {
        a.cdq();
        a.idiv_implicit(divisor)?;
    } else {
        a.zero(EDX)?;
        a.div_implicit(divisor)?;
    }

    let result = if remainder { EDX } else { EAX };
    if r1 != result {
        a.cpy(r1, result)?;
    }

    if divisor != r2 {
        release_scratch(a, divisor)?;
    }
    if EDX != r1 {
        a.restore_reg(EDX)?;
    }
    if EAX != r1 {
        a.restore_reg(EAX)?;
    }
    Ok(())
}

/// Register-amount shift: the amount lives in CL.
fn shift_by_reg(a: &mut Asm, ext: u8, r1: RegId, r2: RegId, r3: RegId) -> LyraResult<()> {
    if r1 == ECX {
        // The destination is the count register: shift in a scratch.
        let s = claim_scratch(a, &[ECX, r1, r2, r3])?;
        a.cpy(s, r2)?;
        if r3 != ECX {
            a.cpy(ECX, r3)?;
        }
        a.shift_cl(ext, s)?;
        a.cpy(r1, s)?;
        release_scratch(a, s)?;
        return Ok(());
    }

    let saved_ecx = r3 != ECX;
    if saved_ecx {
        a.save_reg(ECX, &[ECX, r1, r2, r3])?;
        a.cpy(ECX, r3)?;
    }
    if r1 != r2 {
        a.cpy(r1, r2)?;
    }
    a.shift_cl(ext, r1)?;
    if saved_ecx {
        a.restore_reg(ECX)?;
    }
    Ok(())
}

fn shift_by_literal(a: &mut Asm, ext: u8, r1: RegId, r2: RegId, insn: &Instruction) -> LyraResult<()> {
    let amount = insn
        .const_imm()
        .ok_or_else(|| LyraError::backend("shift amount must be a literal"))? as u8;
    if r1 != r2 {
        a.cpy(r1, r2)?;
    }
    a.shift_imm(ext, r1, amount)
}

/// Swapped-immediate shift: the immediate is the value shifted.
fn shift_imm_by_reg(a: &mut Asm, ext: u8, r1: RegId, r2: RegId) -> LyraResult<()> {
    if r1 == ECX {
        let s = claim_scratch(a, &[ECX, r1, r2])?;
        a.mov_ri(s, 0)?;
        if r2 != ECX {
            a.cpy(ECX, r2)?;
        }
        a.shift_cl(ext, s)?;
        a.cpy(r1, s)?;
        release_scratch(a, s)?;
        return Ok(());
    }
    let saved_ecx = r2 != ECX;
    if saved_ecx {
        a.save_reg(ECX, &[ECX, r1, r2])?;
        a.cpy(ECX, r2)?;
    }
    a.mov_ri(r1, 0)?;
    a.shift_cl(ext, r1)?;
    if saved_ecx {
        a.restore_reg(ECX)?;
    }
    Ok(())
}

/// ZXT/SXT with a byte-count immediate.
fn extend(a: &mut Asm, r1: RegId, r2: RegId, insn: &Instruction, signed: bool) -> LyraResult<()> {
    let width = insn
        .const_imm()
        .ok_or_else(|| LyraError::backend("extension width must be a literal"))? as u32;
    match width {
        1 => {
            if has_byte_form(r2) {
                if signed {
                    a.movsx8(r1, r2)?;
                } else {
                    a.movzx8(r1, r2)?;
                }
            } else {
                let s = claim_byte_scratch(a, &[r1, r2])?;
                a.cpy(s, r2)?;
                if signed {
                    a.movsx8(r1, s)?;
                } else {
                    a.movzx8(r1, s)?;
                }
                release_scratch(a, s)?;
            }
        }
        2 => {
            if signed {
                a.movsx16(r1, r2)?;
            } else {
                a.movzx16(r1, r2)?;
            }
        }
        _ => {
            if r1 != r2 {
                a.cpy(r1, r2)?;
            }
        }
    }
    Ok(())
}

/// Latch flags, set the low byte of `r1`, widen it.
fn set_bool(a: &mut Asm, cc: u8, r1: RegId) -> LyraResult<()> {
    if has_byte_form(r1) {
        a.setcc(cc, r1)?;
        a.movzx8(r1, r1)
    } else {
        // Saving clobbers no flags (mov and push leave them alone).
        let s = claim_byte_scratch(a, &[r1])?;
        a.setcc(cc, s)?;
        a.movzx8(s, s)?;
        a.cpy(r1, s)?;
        release_scratch(a, s)
    }
}

fn set_compare_rr(a: &mut Asm, cc: u8, r1: RegId, r2: RegId, r3: RegId) -> LyraResult<()> {
    a.cmp_rr(r2, r3)?;
    set_bool(a, cc, r1)
}

fn set_compare_ri(a: &mut Asm, cc: u8, r1: RegId, r2: RegId) -> LyraResult<()> {
    if r1 != r2 {
        a.cpy(r1, r2)?;
    }
    a.cmp_ri(r1)?;
    set_bool(a, cc, r1)
}

fn branch_rr(a: &mut Asm, cc: u8, r1: RegId, r2: RegId) -> LyraResult<()> {
    a.cmp_rr(r1, r2)?;
    a.jcc(cc, 0)
}

fn invert_cc(cc_in: u8) -> u8 {
    cc_in ^ 1
}

/// Branch-if-condition to a register address: an inverted short skip over
/// the two-byte register jump.
fn skip_then_jmp_reg(a: &mut Asm, inverted: u8, target: RegId) -> LyraResult<()> {
    a.byte(0x70 + inverted);
    a.byte(0x02);
    a.jmp_reg(target)
}

fn branch_reg(a: &mut Asm, cc: u8, r1: RegId, r2: RegId, target: RegId) -> LyraResult<()> {
    a.cmp_rr(r1, r2)?;
    skip_then_jmp_reg(a, invert_cc(cc), target)
}

/// Jump to an absolute address held in the primary slot: push it and
/// return into it.
fn jmp_abs(a: &mut Asm) -> LyraResult<()> {
    a.byte(0x68);
    a.imm32_slot(0);
    if let Some(s) = &mut a.b.imm {
        s.kind = ImmKind::Imm32;
    }
    a.ret();
    Ok(())
}

/// Skip over the six-byte push/ret absolute jump when the condition does
/// not hold.
fn skip_then_jmp_abs(a: &mut Asm, inverted: u8) -> LyraResult<()> {
    a.byte(0x70 + inverted);
    a.byte(0x06);
    jmp_abs(a)
}

fn branch_abs(a: &mut Asm, cc: u8, r1: RegId, r2: RegId) -> LyraResult<()> {
    a.cmp_rr(r1, r2)?;
    skip_then_jmp_abs(a, invert_cc(cc))
}

/// Stores, with the byte-register routing for 8-bit widths.
fn store(a: &mut Asm, insn: &Instruction, r1: RegId, r2: RegId) -> LyraResult<()> {
    use Opcode::*;
    let width = width_of(insn.op);
    let disp = matches!(insn.op, St8 | St16 | St32);
    let absolute = matches!(insn.op, St8i | St16i | St32i);

    let mut src = r1;
    let routed = width == 1 && !has_byte_form(r1);
    if routed {
        let s = claim_byte_scratch(a, &[r1, r2])?;
        a.cpy(s, r1)?;
        src = s;
    }

    if absolute {
        // Materialize the address in a scratch register.
        let addr = claim_scratch(a, &[src, r1, r2])?;
        a.mov_ri(addr, 0)?;
        a.store_mem(width, src, addr)?;
        release_scratch(a, addr)?;
    } else if disp {
        a.store_mem_disp(width, src, r2, 0)?;
    } else {
        a.store_mem(width, src, r2)?;
    }

    if routed {
        release_scratch(a, src)?;
    }
    Ok(())
}

/// Physical operand setup shared by the string copies: EDI takes the
/// destination, ESI the source, ECX the unit count. The stack shuffle is
/// immune to operand overlap.
fn bulk_copy_setup(a: &mut Asm, r1: RegId, r2: RegId, r3: Option<RegId>) -> LyraResult<()> {
    for phys in [EDI, ESI, ECX] {
        let in_use = !a.unused.contains(&phys);
        let is_operand = phys == r1 || phys == r2 || Some(phys) == r3;
        if in_use && !is_operand {
            a.save_reg(phys, &[EDI, ESI, ECX, r1, r2, r3.unwrap_or(0)])?;
        }
    }
    a.push(r1)?;
    a.push(r2)?;
    if let Some(r3) = r3 {
        a.push(r3)?;
        a.pop(ECX)?;
    }
    a.pop(ESI)?;
    a.pop(EDI)?;
    Ok(())
}

fn bulk_copy_teardown(a: &mut Asm) -> LyraResult<()> {
    for phys in [ECX, ESI, EDI] {
        a.restore_reg(phys)?;
    }
    Ok(())
}

fn bulk_copy(a: &mut Asm, insn: &Instruction, backward: bool) -> LyraResult<()> {
    if insn.r1 == insn.r2 || insn.r2 == insn.r3 {
        return Err(LyraError::backend(
            "bulk copy requires distinct source and destination registers",
        ));
    }
    bulk_copy_setup(a, insn.r1, insn.r2, Some(insn.r3))?;
    if backward {
        a.std();
    } else {
        a.cld();
    }
    a.rep_movs(width_of(insn.op));
    if backward {
        a.cld();
    }
    bulk_copy_teardown(a)
}

fn bulk_copy_imm(a: &mut Asm, insn: &Instruction, backward: bool) -> LyraResult<()> {
    if insn.r1 == insn.r2 {
        return Err(LyraError::backend(
            "bulk copy requires distinct source and destination registers",
        ));
    }
    bulk_copy_setup(a, insn.r1, insn.r2, None)?;
    // The unit count comes from the immediate.
    a.byte(0xb8 + crate::encode::lookup_reg(ECX)?);
    a.imm32_slot(0);
    if backward {
        a.std();
    } else {
        a.cld();
    }
    a.rep_movs(width_of(insn.op));
    if backward {
        a.cld();
    }
    bulk_copy_teardown(a)
}

/// Push all in-use registers except `keep`, cdecl-call the runtime thunk
/// and restore.
fn push_used_regs(a: &mut Asm, keep: RegId) -> LyraResult<Vec<RegId>> {
    let mut pushed = Vec::new();
    for r in 1..8u32 {
        if r != keep && !a.unused.contains(&r) {
            a.push(r)?;
            pushed.push(r);
        }
    }
    Ok(pushed)
}

fn pop_used_regs(a: &mut Asm, pushed: &[RegId]) -> LyraResult<()> {
    for &r in pushed.iter().rev() {
        a.pop(r)?;
    }
    Ok(())
}

/// Retrieve the thunk address (whose pointer sits in the reserved global
/// slot) into `r` and call it; the secondary immediate carries the fixup.
fn call_thunk_through(a: &mut Asm, r: RegId) -> LyraResult<()> {
    // afip-style sequence against the secondary slot.
    a.bytes(&[0xe8, 0, 0, 0, 0]);
    let mark = a.b.binary.len();
    a.pop(r)?;
    a.add_ri2(r, 0)?;
    let tail = (a.b.binary.len() - mark) as u32;
    if let Some(s) = &mut a.b.imm2 {
        s.misc = s.misc.wrapping_add(tail);
    }
    a.load_mem(GPR_SIZE, r, r)?;
    a.call_reg(r)
}

fn page_alloc_common(a: &mut Asm, r1: RegId, length_from: Option<RegId>, bytes: u32, stack: bool) -> LyraResult<()> {
    let pushed = push_used_regs(a, r1)?;

    // mmap arguments, last first: offset, fd, flags, prot, length, start.
    a.push_literal(0);
    a.push_literal(0);
    let flags = MAP_PRIVATE | MAP_ANONYMOUS | if stack { MAP_STACK } else { 0 };
    a.push_literal(flags);
    a.push_literal(PROT_READ | PROT_WRITE);
    match length_from {
        Some(r) => a.push(r)?,
        None => a.push_literal(bytes),
    }
    a.push_literal(0);
    a.push_literal(THUNK_MMAP);

    call_thunk_through(a, r1)?;

    if r1 != EAX {
        a.cpy(r1, EAX)?;
    }
    a.add_ri_literal(ESP, (7 * GPR_SIZE) as i32)?;

    pop_used_regs(a, &pushed)
}

fn page_alloc_reg(a: &mut Asm, r1: RegId, r2: RegId) -> LyraResult<()> {
    // Convert the page count in r2 to a byte count.
    a.shift_imm(Asm::SHL, r2, lyra_ir::PAGE_SIZE.trailing_zeros() as u8)?;
    page_alloc_common(a, r1, Some(r2), 0, false)
}

fn page_alloc_fixed(a: &mut Asm, r1: RegId, bytes: u32, stack: bool) -> LyraResult<()> {
    page_alloc_common(a, r1, None, bytes, stack)
}

fn page_free_common(a: &mut Asm, addr: RegId, length_from: Option<RegId>, bytes: u32, scratch: RegId) -> LyraResult<()> {
    let pushed = push_used_regs(a, 0)?;

    match length_from {
        Some(r) => a.push(r)?,
        None => a.push_literal(bytes),
    }
    a.push(addr)?;
    a.push_literal(THUNK_MUNMAP);

    call_thunk_through(a, scratch)?;

    a.add_ri_literal(ESP, (3 * GPR_SIZE) as i32)?;

    pop_used_regs(a, &pushed)
}

fn page_free_reg(a: &mut Asm, r1: RegId, r2: RegId) -> LyraResult<()> {
    a.shift_imm(Asm::SHL, r2, lyra_ir::PAGE_SIZE.trailing_zeros() as u8)?;
    page_free_common(a, r1, Some(r2), 0, r2)
}

fn page_free_fixed(a: &mut Asm, r1: RegId, bytes: u32) -> LyraResult<()> {
    // The thunk address needs a scratch register; the freed address was
    // already pushed, so r1 itself serves.
    page_free_common(a, r1, None, bytes, r1)
}

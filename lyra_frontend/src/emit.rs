//! IR op constructors
//!
//! Every constructor owns three contracts: peephole reduction (strength
//! reduction of multiply/divide/modulo by powers of two, `cpy` elision when
//! source equals destination, immediate folds), destination sign/zero
//! extension tracking computed from operand sizes and immediate byte
//! counts, and the register-pressure precondition run before anything that
//! is not a no-op or comment is appended.

use crate::parser::Parser;
use crate::CompileFlags;
use lyra_common::LyraResult;
use lyra_ir::{ImmPart, InsnId, Instruction, Opcode, RegId, GPR_SIZE};

/// Bytes needed to hold `n` as an unsigned value.
pub fn count_zero_extended_bytes(n: u64) -> u32 {
    let mut bytes = 1;
    while bytes < 8 && n >> (bytes * 8) != 0 {
        bytes += 1;
    }
    bytes
}

/// Bytes needed to hold `n` as a sign-extended value.
pub fn count_sign_extended_bytes(n: u64) -> u32 {
    let mut bytes = 1;
    while bytes < 8 {
        let shift = bytes * 8 - 1;
        let high = (n as i64) >> shift;
        if high == 0 || high == -1 {
            break;
        }
        bytes += 1;
    }
    bytes
}

/// Log2 of `n` when it is a power of two.
pub fn log2_of_power_of_two(n: u64) -> Option<u64> {
    if n != 0 && n & (n - 1) == 0 {
        Some(n.trailing_zeros() as u64)
    } else {
        None
    }
}

/// Mask applied by the target to register shift amounts.
const SHIFT_AMOUNT_MASK: u64 = (GPR_SIZE as u64 * 8) - 1;

impl Parser<'_> {
    /// Append an instruction to the current function, honoring the
    /// register-pressure precondition and recording the unused-register
    /// list and debug attribution.
    pub(crate) fn new_insn(&mut self, op: Opcode) -> LyraResult<InsnId> {
        if !self.emitting() {
            // The sizing pass (and type probing) walks the same code paths
            // without appending anything.
            return Ok(0);
        }
        if !op.is_inert() {
            let min = self.opts.min_unused_regs.get(op);
            self.ensure_unused_regs(min)?;
        }
        let mut insn = Instruction::new(op);
        insn.unused_regs = self.regfile().unused_ids();
        insn.dbg = self.dbg_here();
        Ok(self.curfunc_mut().push_insn(insn))
    }

    /// The instruction being built, or the scratch sink while not
    /// emitting.
    fn edit(&mut self, id: InsnId) -> &mut Instruction {
        if self.emitting() {
            self.curfunc_mut().insn_mut(id)
        } else {
            self.scratch_insn = Instruction::new(Opcode::Nop);
            &mut self.scratch_insn
        }
    }

    /// Append a comment instruction when comment emission is enabled.
    pub(crate) fn emit_comment(&mut self, text: impl Into<String>) {
        if !self.opts.flags.contains(CompileFlags::COMMENT) || !self.emitting() {
            return;
        }
        let mut insn = Instruction::new(Opcode::Comment);
        insn.comment = Some(text.into());
        self.curfunc_mut().push_insn(insn);
    }

    pub(crate) fn i_machinecode(&mut self, bytes: Vec<u8>) -> LyraResult<InsnId> {
        let id = self.new_insn(Opcode::Machinecode)?;
        self.edit(id).machinecode = bytes;
        Ok(id)
    }

    fn reg_meta(&self, id: RegId) -> (u32, bool, bool) {
        let r = self.reg(id);
        (r.size, r.zext, r.sext)
    }

    fn set_ext(&mut self, id: RegId, zext: bool, sext: bool) {
        let r = self.regfile().get_mut(id);
        r.zext = zext;
        r.sext = sext;
    }

    fn clear_ext(&mut self, id: RegId) {
        self.set_ext(id, false, false);
    }

    fn push3(&mut self, op: Opcode, r1: RegId, r2: RegId, r3: RegId) -> LyraResult<InsnId> {
        let id = self.new_insn(op)?;
        let insn = self.edit(id);
        insn.r1 = r1;
        insn.r2 = r2;
        insn.r3 = r3;
        Ok(id)
    }

    fn push2i(&mut self, op: Opcode, r1: RegId, r2: RegId, n: i64) -> LyraResult<InsnId> {
        let id = self.new_insn(op)?;
        let insn = self.edit(id);
        insn.r1 = r1;
        insn.r2 = r2;
        insn.push_imm(ImmPart::Value(n));
        Ok(id)
    }

    fn push2parts(
        &mut self,
        op: Opcode,
        r1: RegId,
        r2: RegId,
        parts: &[ImmPart],
    ) -> LyraResult<InsnId> {
        let id = self.new_insn(op)?;
        let insn = self.edit(id);
        insn.r1 = r1;
        insn.r2 = r2;
        for &p in parts {
            insn.push_imm(p);
        }
        Ok(id)
    }

    // ---- copies and constants ----

    /// `cpy r1, r2`; elided when source equals destination.
    pub(crate) fn i_cpy(&mut self, r1: RegId, r2: RegId) -> LyraResult<()> {
        if r1 == r2 {
            return Ok(());
        }
        self.push3(Opcode::Cpy, r1, r2, 0)?;
        let (s1, _, _) = self.reg_meta(r1);
        let (s2, z2, x2) = self.reg_meta(r2);
        self.set_ext(r1, z2 && s1 >= s2, x2 && s1 >= s2);
        Ok(())
    }

    /// `li r1, n`.
    pub(crate) fn i_li(&mut self, r1: RegId, n: u64) -> LyraResult<()> {
        let id = self.new_insn(Opcode::Li)?;
        let insn = self.edit(id);
        insn.r1 = r1;
        insn.push_imm(ImmPart::Value(n as i64));
        let (s1, _, _) = self.reg_meta(r1);
        self.set_ext(
            r1,
            s1 >= count_zero_extended_bytes(n),
            s1 >= count_sign_extended_bytes(n),
        );
        Ok(())
    }

    /// `afip r1, <parts>`: r1 := address of the referenced location.
    pub(crate) fn i_afip(&mut self, r1: RegId, parts: &[ImmPart]) -> LyraResult<InsnId> {
        let id = self.push2parts(Opcode::Afip, r1, 0, parts)?;
        self.clear_ext(r1);
        Ok(id)
    }

    // ---- arithmetic ----

    pub(crate) fn i_add(&mut self, r1: RegId, r2: RegId, r3: RegId) -> LyraResult<()> {
        self.push3(Opcode::Add, r1, r2, r3)?;
        // With either-extended inputs the sum is sign extended when the
        // destination is strictly wider than both, the strictness
        // absorbing the carry bit. Zero extension needs both inputs zero
        // extended.
        let (s1, _, _) = self.reg_meta(r1);
        let (s2, z2, x2) = self.reg_meta(r2);
        let (s3, z3, x3) = self.reg_meta(r3);
        let wider = s1 > s2 && s1 > s3;
        self.set_ext(r1, z2 && z3 && wider, (z2 || x2) && (z3 || x3) && wider);
        Ok(())
    }

    /// `addi r1, r2, n`; an addend of zero reduces to `cpy`.
    pub(crate) fn i_addi(&mut self, r1: RegId, r2: RegId, n: i64) -> LyraResult<()> {
        if n == 0 {
            return self.i_cpy(r1, r2);
        }
        self.push2i(Opcode::Addi, r1, r2, n)?;
        // The immediate is assumed sign extended; the same
        // strictly-wider rule as the register form applies, against the
        // immediate's byte counts.
        let (s1, _, _) = self.reg_meta(r1);
        let (s2, z2, x2) = self.reg_meta(r2);
        let imm_zxt = count_zero_extended_bytes(n as u64);
        let imm_sxt = count_sign_extended_bytes(n as u64);
        let sext = (z2 || x2) && s1 > s2 && s1 > imm_sxt;
        let zext = z2 && imm_zxt < GPR_SIZE && s1 > s2 && s1 > imm_zxt;
        self.set_ext(r1, zext, sext);
        Ok(())
    }

    /// `addi` with relocation parts (address arithmetic).
    pub(crate) fn i_addi_parts(&mut self, r1: RegId, r2: RegId, parts: &[ImmPart]) -> LyraResult<()> {
        self.push2parts(Opcode::Addi, r1, r2, parts)?;
        self.clear_ext(r1);
        Ok(())
    }

    /// `sub r1, r2, r3`; equal operands fold to a zero load.
    pub(crate) fn i_sub(&mut self, r1: RegId, r2: RegId, r3: RegId) -> LyraResult<()> {
        if r2 == r3 {
            return self.i_li(r1, 0);
        }
        self.push3(Opcode::Sub, r1, r2, r3)?;
        // Same strictly-wider sign-extension rule as addition; the
        // negation makes zero extension unpredictable.
        let (s1, _, _) = self.reg_meta(r1);
        let (s2, z2, x2) = self.reg_meta(r2);
        let (s3, z3, x3) = self.reg_meta(r3);
        let sext = (z2 || x2) && (z3 || x3) && s1 > s2 && s1 > s3;
        self.set_ext(r1, false, sext);
        Ok(())
    }

    pub(crate) fn i_neg(&mut self, r1: RegId, r2: RegId) -> LyraResult<()> {
        self.push3(Opcode::Neg, r1, r2, 0)?;
        // An extended input negated stays sign extended in a strictly
        // wider destination; zero extension cannot be predicted.
        let (s1, _, _) = self.reg_meta(r1);
        let (s2, z2, x2) = self.reg_meta(r2);
        self.set_ext(r1, false, (z2 || x2) && s1 > s2);
        Ok(())
    }

    pub(crate) fn i_mul(&mut self, r1: RegId, r2: RegId, r3: RegId) -> LyraResult<()> {
        self.push3(Opcode::Mul, r1, r2, r3)?;
        // The product's extension width is the sum of the operand
        // widths: both zero extended stays zero extended at `>=` that
        // sum; both sign extended stays sign extended at `>=`; a mixed
        // pair needs strictly more room.
        let (s1, _, _) = self.reg_meta(r1);
        let (s2, z2, x2) = self.reg_meta(r2);
        let (s3, z3, x3) = self.reg_meta(r3);
        let sum = s2 + s3;
        if z2 {
            if z3 {
                self.set_ext(r1, s1 >= sum, s1 > sum);
            } else if x3 {
                self.set_ext(r1, false, s1 > sum);
            } else {
                self.clear_ext(r1);
            }
        } else if x2 {
            if x3 {
                self.set_ext(r1, false, s1 >= sum);
            } else if z3 {
                self.set_ext(r1, false, s1 > sum);
            } else {
                self.clear_ext(r1);
            }
        } else {
            self.clear_ext(r1);
        }
        Ok(())
    }

    /// `muli r1, r2, n` with the multiply folds: by zero, by one, by a
    /// power of two.
    pub(crate) fn i_muli(&mut self, r1: RegId, r2: RegId, n: u64) -> LyraResult<()> {
        if n == 0 {
            return self.i_li(r1, 0);
        }
        if n == 1 {
            return self.i_cpy(r1, r2);
        }
        if let Some(shift) = log2_of_power_of_two(n) {
            return self.i_slli(r1, r2, shift);
        }
        self.push2i(Opcode::Muli, r1, r2, n as i64)?;
        // Same width-sum rule as the register form, with the immediate's
        // byte counts; an immediate that is not zero extended is assumed
        // sign extended.
        let (s1, _, _) = self.reg_meta(r1);
        let (s2, z2, x2) = self.reg_meta(r2);
        let imm_zxt = count_zero_extended_bytes(n);
        let imm_sxt = count_sign_extended_bytes(n);
        if z2 {
            if imm_zxt < GPR_SIZE {
                let sum = s2 + imm_zxt;
                self.set_ext(r1, s1 >= sum, s1 > sum);
            } else {
                self.set_ext(r1, false, s1 > s2 + imm_sxt);
            }
        } else if x2 {
            self.set_ext(r1, false, s1 >= s2 + imm_sxt);
        } else {
            self.clear_ext(r1);
        }
        Ok(())
    }

    /// `div r1, r2, r3`; equal operands fold to a one load.
    pub(crate) fn i_div(&mut self, r1: RegId, r2: RegId, r3: RegId) -> LyraResult<()> {
        if r2 == r3 {
            return self.i_li(r1, 1);
        }
        self.push3(Opcode::Div, r1, r2, r3)?;
        // The quotient's magnitude never exceeds the dividend's, so the
        // dividend's extension bounds the result.
        let (s1, _, _) = self.reg_meta(r1);
        let (s2, z2, x2) = self.reg_meta(r2);
        let (_, z3, _) = self.reg_meta(r3);
        if z2 {
            if z3 {
                self.set_ext(r1, s1 >= s2, s1 > s2);
            } else {
                self.set_ext(r1, false, s1 > s2);
            }
        } else if x2 {
            self.set_ext(r1, false, s1 >= s2);
        } else {
            self.clear_ext(r1);
        }
        Ok(())
    }

    /// `mod r1, r2, r3`; equal operands fold to a zero load.
    pub(crate) fn i_mod(&mut self, r1: RegId, r2: RegId, r3: RegId) -> LyraResult<()> {
        if r2 == r3 {
            return self.i_li(r1, 0);
        }
        self.push3(Opcode::Mod, r1, r2, r3)?;
        // The remainder's magnitude never exceeds the divisor's, so the
        // divisor's extension bounds the result.
        let (s1, _, _) = self.reg_meta(r1);
        let (_, z2, _) = self.reg_meta(r2);
        let (s3, z3, x3) = self.reg_meta(r3);
        if z3 {
            if z2 {
                self.set_ext(r1, s1 >= s3, s1 > s3);
            } else {
                self.set_ext(r1, false, s1 > s3);
            }
        } else if x3 {
            self.set_ext(r1, false, s1 >= s3);
        } else {
            self.clear_ext(r1);
        }
        Ok(())
    }

    /// `divu r1, r2, r3`; equal operands fold to a one load.
    pub(crate) fn i_divu(&mut self, r1: RegId, r2: RegId, r3: RegId) -> LyraResult<()> {
        if r2 == r3 {
            return self.i_li(r1, 1);
        }
        self.push3(Opcode::Divu, r1, r2, r3)?;
        // The quotient never exceeds the dividend.
        let (s1, _, _) = self.reg_meta(r1);
        let (s2, z2, _) = self.reg_meta(r2);
        if z2 {
            self.set_ext(r1, s1 >= s2, s1 > s2);
        } else {
            self.clear_ext(r1);
        }
        Ok(())
    }

    /// `modu r1, r2, r3`; equal operands fold to a zero load.
    pub(crate) fn i_modu(&mut self, r1: RegId, r2: RegId, r3: RegId) -> LyraResult<()> {
        if r2 == r3 {
            return self.i_li(r1, 0);
        }
        self.push3(Opcode::Modu, r1, r2, r3)?;
        // The remainder never exceeds the divisor.
        let (s1, _, _) = self.reg_meta(r1);
        let (s3, z3, _) = self.reg_meta(r3);
        if z3 {
            self.set_ext(r1, s1 >= s3, s1 > s3);
        } else {
            self.clear_ext(r1);
        }
        Ok(())
    }

    /// `divi r1, r2, n`; division by one reduces to `cpy`.
    pub(crate) fn i_divi(&mut self, r1: RegId, r2: RegId, n: i64) -> LyraResult<()> {
        if n == 1 {
            return self.i_cpy(r1, r2);
        }
        self.push2i(Opcode::Divi, r1, r2, n)?;
        // Bounded by the dividend, as the register form; a negative
        // immediate flips the sign, so zero extension survives only a
        // positive divisor.
        let (s1, _, _) = self.reg_meta(r1);
        let (s2, z2, x2) = self.reg_meta(r2);
        if z2 {
            if n >= 0 {
                self.set_ext(r1, s1 >= s2, s1 > s2);
            } else {
                self.set_ext(r1, false, s1 > s2);
            }
        } else if x2 {
            self.set_ext(r1, false, s1 >= s2);
        } else {
            self.clear_ext(r1);
        }
        Ok(())
    }

    /// `divui r1, r2, n`; by one reduces to `cpy`, by a power of two to a
    /// logical right shift.
    pub(crate) fn i_divui(&mut self, r1: RegId, r2: RegId, n: u64) -> LyraResult<()> {
        if n == 1 {
            return self.i_cpy(r1, r2);
        }
        if let Some(shift) = log2_of_power_of_two(n) {
            return self.i_srli(r1, r2, shift);
        }
        self.push2i(Opcode::Divui, r1, r2, n as i64)?;
        let (s1, _, _) = self.reg_meta(r1);
        let (s2, z2, _) = self.reg_meta(r2);
        if z2 {
            self.set_ext(r1, s1 >= s2, s1 > s2);
        } else {
            self.clear_ext(r1);
        }
        Ok(())
    }

    /// `modi r1, r2, n`; a modulus of one (or zero, which folds rather
    /// than trap at compile time) yields zero.
    pub(crate) fn i_modi(&mut self, r1: RegId, r2: RegId, n: i64) -> LyraResult<()> {
        if n == 0 || n == 1 {
            return self.i_li(r1, 0);
        }
        self.push2i(Opcode::Modi, r1, r2, n)?;
        // Bounded by the immediate divisor's byte counts; an immediate
        // that is not zero extended is assumed sign extended.
        let (s1, _, _) = self.reg_meta(r1);
        let (_, z2, _) = self.reg_meta(r2);
        let imm_zxt = count_zero_extended_bytes(n as u64);
        if imm_zxt < GPR_SIZE {
            if z2 {
                self.set_ext(r1, s1 >= imm_zxt, s1 > imm_zxt);
            } else {
                self.set_ext(r1, false, s1 > imm_zxt);
            }
        } else {
            let imm_sxt = count_sign_extended_bytes(n as u64);
            self.set_ext(r1, false, s1 >= imm_sxt);
        }
        Ok(())
    }

    /// `modui r1, r2, n`; by a power of two reduces to a mask.
    pub(crate) fn i_modui(&mut self, r1: RegId, r2: RegId, n: u64) -> LyraResult<()> {
        if n == 1 {
            return self.i_li(r1, 0);
        }
        if log2_of_power_of_two(n).is_some() {
            return self.i_andi(r1, r2, n - 1);
        }
        self.push2i(Opcode::Modui, r1, r2, n as i64)?;
        // Bounded by the immediate divisor when it is zero extended.
        let (s1, _, _) = self.reg_meta(r1);
        let imm_zxt = count_zero_extended_bytes(n);
        if imm_zxt < GPR_SIZE {
            self.set_ext(r1, s1 >= imm_zxt, s1 > imm_zxt);
        } else {
            self.clear_ext(r1);
        }
        Ok(())
    }

    /// Swapped-immediate divide: `r1 := n / r2`.
    pub(crate) fn i_divi2(&mut self, r1: RegId, r2: RegId, n: i64) -> LyraResult<()> {
        self.push2i(Opcode::Divi2, r1, r2, n)?;
        self.clear_ext(r1);
        Ok(())
    }

    /// Swapped-immediate modulo: `r1 := n % r2`.
    pub(crate) fn i_modi2(&mut self, r1: RegId, r2: RegId, n: i64) -> LyraResult<()> {
        self.push2i(Opcode::Modi2, r1, r2, n)?;
        self.clear_ext(r1);
        Ok(())
    }

    pub(crate) fn i_divui2(&mut self, r1: RegId, r2: RegId, n: u64) -> LyraResult<()> {
        self.push2i(Opcode::Divui2, r1, r2, n as i64)?;
        self.clear_ext(r1);
        Ok(())
    }

    pub(crate) fn i_modui2(&mut self, r1: RegId, r2: RegId, n: u64) -> LyraResult<()> {
        self.push2i(Opcode::Modui2, r1, r2, n as i64)?;
        let (s1, _, _) = self.reg_meta(r1);
        let (s2, z2, _) = self.reg_meta(r2);
        if z2 {
            self.set_ext(r1, s1 >= s2, s1 > s2);
        } else {
            self.clear_ext(r1);
        }
        Ok(())
    }

    // ---- bitwise ----

    pub(crate) fn i_and(&mut self, r1: RegId, r2: RegId, r3: RegId) -> LyraResult<()> {
        self.push3(Opcode::And, r1, r2, r3)?;
        // AND only clears bits, so either zero-extended operand bounds the
        // result.
        let (s1, _, _) = self.reg_meta(r1);
        let (s2, z2, _) = self.reg_meta(r2);
        let (s3, z3, _) = self.reg_meta(r3);
        let zext = (z2 && s1 >= s2) || (z3 && s1 >= s3);
        let sext = (z2 && s1 > s2) || (z3 && s1 > s3);
        self.set_ext(r1, zext, sext);
        Ok(())
    }

    pub(crate) fn i_andi(&mut self, r1: RegId, r2: RegId, n: u64) -> LyraResult<()> {
        self.push2i(Opcode::Andi, r1, r2, n as i64)?;
        let (s1, _, _) = self.reg_meta(r1);
        let (s2, z2, _) = self.reg_meta(r2);
        let imm_zxt = count_zero_extended_bytes(n);
        let zext = (z2 && s1 >= s2) || (imm_zxt < GPR_SIZE && s1 >= imm_zxt);
        let sext = (z2 && s1 > s2) || (imm_zxt < GPR_SIZE && s1 > imm_zxt);
        self.set_ext(r1, zext, sext);
        Ok(())
    }

    fn or_xor_ext(&mut self, r1: RegId, r2: RegId, r3: RegId) {
        // The result is extended only when both operands are, and the
        // destination holds the larger operand.
        let (s1, _, _) = self.reg_meta(r1);
        let (s2, z2, _) = self.reg_meta(r2);
        let (s3, z3, _) = self.reg_meta(r3);
        let max = s2.max(s3);
        self.set_ext(r1, z2 && z3 && s1 >= max, z2 && z3 && s1 > max);
    }

    pub(crate) fn i_or(&mut self, r1: RegId, r2: RegId, r3: RegId) -> LyraResult<()> {
        self.push3(Opcode::Or, r1, r2, r3)?;
        self.or_xor_ext(r1, r2, r3);
        Ok(())
    }

    pub(crate) fn i_ori(&mut self, r1: RegId, r2: RegId, n: u64) -> LyraResult<()> {
        self.push2i(Opcode::Ori, r1, r2, n as i64)?;
        let (s1, _, _) = self.reg_meta(r1);
        let (s2, z2, _) = self.reg_meta(r2);
        let imm_zxt = count_zero_extended_bytes(n);
        let max = s2.max(imm_zxt);
        self.set_ext(r1, z2 && imm_zxt < GPR_SIZE && s1 >= max, z2 && imm_zxt < GPR_SIZE && s1 > max);
        Ok(())
    }

    /// `xor r1, r2, r3`. Also the zero idiom: `xor r, r, r` loads zero.
    pub(crate) fn i_xor(&mut self, r1: RegId, r2: RegId, r3: RegId) -> LyraResult<()> {
        self.push3(Opcode::Xor, r1, r2, r3)?;
        if r1 == r2 && r2 == r3 {
            let (s1, _, _) = self.reg_meta(r1);
            self.set_ext(r1, true, s1 >= 1);
        } else {
            self.or_xor_ext(r1, r2, r3);
        }
        Ok(())
    }

    pub(crate) fn i_xori(&mut self, r1: RegId, r2: RegId, n: u64) -> LyraResult<()> {
        self.push2i(Opcode::Xori, r1, r2, n as i64)?;
        let (s1, _, _) = self.reg_meta(r1);
        let (s2, z2, _) = self.reg_meta(r2);
        let imm_zxt = count_zero_extended_bytes(n);
        let max = s2.max(imm_zxt);
        self.set_ext(r1, z2 && imm_zxt < GPR_SIZE && s1 >= max, z2 && imm_zxt < GPR_SIZE && s1 > max);
        Ok(())
    }

    pub(crate) fn i_not(&mut self, r1: RegId, r2: RegId) -> LyraResult<()> {
        self.push3(Opcode::Not, r1, r2, 0)?;
        self.clear_ext(r1);
        Ok(())
    }

    // ---- shifts ----

    pub(crate) fn i_sll(&mut self, r1: RegId, r2: RegId, r3: RegId) -> LyraResult<()> {
        self.push3(Opcode::Sll, r1, r2, r3)?;
        self.clear_ext(r1);
        Ok(())
    }

    /// `slli r1, r2, n`; a shift of zero reduces to `cpy`. Extension is
    /// preserved when the destination holds the source widened by the
    /// masked shift amount.
    pub(crate) fn i_slli(&mut self, r1: RegId, r2: RegId, n: u64) -> LyraResult<()> {
        if n == 0 {
            return self.i_cpy(r1, r2);
        }
        self.push2i(Opcode::Slli, r1, r2, n as i64)?;
        let (s1, _, _) = self.reg_meta(r1);
        let (s2, z2, x2) = self.reg_meta(r2);
        let widened = s2 + ((n & SHIFT_AMOUNT_MASK) / 8) as u32;
        if s1 >= widened {
            self.set_ext(r1, z2, x2);
        } else {
            self.clear_ext(r1);
        }
        Ok(())
    }

    /// Swapped-immediate left shift: `r1 := n << r2`.
    pub(crate) fn i_slli2(&mut self, r1: RegId, r2: RegId, n: u64) -> LyraResult<()> {
        self.push2i(Opcode::Slli2, r1, r2, n as i64)?;
        self.clear_ext(r1);
        Ok(())
    }

    pub(crate) fn i_srl(&mut self, r1: RegId, r2: RegId, r3: RegId) -> LyraResult<()> {
        self.push3(Opcode::Srl, r1, r2, r3)?;
        // Shifting right never grows the unsigned value.
        let (s1, _, _) = self.reg_meta(r1);
        let (s2, z2, _) = self.reg_meta(r2);
        if z2 {
            self.set_ext(r1, s1 >= s2, s1 > s2);
        } else {
            self.clear_ext(r1);
        }
        Ok(())
    }

    pub(crate) fn i_srli(&mut self, r1: RegId, r2: RegId, n: u64) -> LyraResult<()> {
        if n == 0 {
            return self.i_cpy(r1, r2);
        }
        self.push2i(Opcode::Srli, r1, r2, n as i64)?;
        let (s1, _, _) = self.reg_meta(r1);
        let (s2, z2, _) = self.reg_meta(r2);
        let narrowed = s2.saturating_sub(((n & SHIFT_AMOUNT_MASK) / 8) as u32).max(1);
        if z2 {
            self.set_ext(r1, s1 >= narrowed, s1 > narrowed);
        } else {
            self.clear_ext(r1);
        }
        Ok(())
    }

    pub(crate) fn i_srli2(&mut self, r1: RegId, r2: RegId, n: u64) -> LyraResult<()> {
        self.push2i(Opcode::Srli2, r1, r2, n as i64)?;
        self.clear_ext(r1);
        Ok(())
    }

    pub(crate) fn i_sra(&mut self, r1: RegId, r2: RegId, r3: RegId) -> LyraResult<()> {
        self.push3(Opcode::Sra, r1, r2, r3)?;
        let (s1, _, _) = self.reg_meta(r1);
        let (s2, _, x2) = self.reg_meta(r2);
        if x2 {
            self.set_ext(r1, false, s1 >= s2);
        } else {
            self.clear_ext(r1);
        }
        Ok(())
    }

    pub(crate) fn i_srai(&mut self, r1: RegId, r2: RegId, n: u64) -> LyraResult<()> {
        if n == 0 {
            return self.i_cpy(r1, r2);
        }
        self.push2i(Opcode::Srai, r1, r2, n as i64)?;
        let (s1, _, _) = self.reg_meta(r1);
        let (s2, _, x2) = self.reg_meta(r2);
        if x2 {
            self.set_ext(r1, false, s1 >= s2);
        } else {
            self.clear_ext(r1);
        }
        Ok(())
    }

    pub(crate) fn i_srai2(&mut self, r1: RegId, r2: RegId, n: u64) -> LyraResult<()> {
        self.push2i(Opcode::Srai2, r1, r2, n as i64)?;
        self.clear_ext(r1);
        Ok(())
    }

    // ---- extension ----

    /// `zxt r1, r2, w`: zero-extend the low `w` bytes.
    pub(crate) fn i_zxt(&mut self, r1: RegId, r2: RegId, width: u32) -> LyraResult<()> {
        self.push2i(Opcode::Zxt, r1, r2, width as i64)?;
        let (s1, _, _) = self.reg_meta(r1);
        self.set_ext(r1, s1 >= width, s1 > width);
        Ok(())
    }

    /// `sxt r1, r2, w`: sign-extend the low `w` bytes.
    pub(crate) fn i_sxt(&mut self, r1: RegId, r2: RegId, width: u32) -> LyraResult<()> {
        self.push2i(Opcode::Sxt, r1, r2, width as i64)?;
        let (s1, _, _) = self.reg_meta(r1);
        self.set_ext(r1, false, s1 >= width);
        Ok(())
    }

    // ---- set-if-compare ----

    fn set_bool_ext(&mut self, r1: RegId) {
        let (s1, _, _) = self.reg_meta(r1);
        self.set_ext(r1, true, s1 > 1);
    }

    pub(crate) fn i_set3(&mut self, op: Opcode, r1: RegId, r2: RegId, r3: RegId) -> LyraResult<()> {
        self.push3(op, r1, r2, r3)?;
        self.set_bool_ext(r1);
        Ok(())
    }

    pub(crate) fn i_set2i(&mut self, op: Opcode, r1: RegId, r2: RegId, n: i64) -> LyraResult<()> {
        self.push2i(op, r1, r2, n)?;
        self.set_bool_ext(r1);
        Ok(())
    }

    /// `sz`/`snz`: set if zero / nonzero.
    pub(crate) fn i_setz(&mut self, op: Opcode, r1: RegId, r2: RegId) -> LyraResult<()> {
        self.push3(op, r1, r2, 0)?;
        self.set_bool_ext(r1);
        Ok(())
    }

    // ---- branches ----

    /// Unconditional jump to a label of the current function, resolved
    /// when the function finishes parsing.
    pub(crate) fn i_j_label(&mut self, label: &str) -> LyraResult<InsnId> {
        let id = self.new_insn(Opcode::J)?;
        if self.emitting() {
            let cur = self.cur;
            self.labels.entry(cur).or_default().pending.push((label.to_string(), id));
        }
        Ok(id)
    }

    /// Conditional branch on one register to a label.
    pub(crate) fn i_branch1_label(&mut self, op: Opcode, r1: RegId, label: &str) -> LyraResult<InsnId> {
        let id = self.new_insn(op)?;
        self.edit(id).r1 = r1;
        if self.emitting() {
            let cur = self.cur;
            self.labels.entry(cur).or_default().pending.push((label.to_string(), id));
        }
        Ok(id)
    }

    /// Conditional branch comparing two registers, to a label.
    pub(crate) fn i_branch2_label(
        &mut self,
        op: Opcode,
        r1: RegId,
        r2: RegId,
        label: &str,
    ) -> LyraResult<InsnId> {
        let id = self.new_insn(op)?;
        let insn = self.edit(id);
        insn.r1 = r1;
        insn.r2 = r2;
        if self.emitting() {
            let cur = self.cur;
            self.labels.entry(cur).or_default().pending.push((label.to_string(), id));
        }
        Ok(id)
    }

    /// `jr r`: jump to the address in a register.
    pub(crate) fn i_jr(&mut self, r1: RegId) -> LyraResult<InsnId> {
        let id = self.new_insn(Opcode::Jr)?;
        self.edit(id).r1 = r1;
        Ok(id)
    }

    /// Branch-if-condition to a register address. The address register
    /// must differ from the compared operands.
    pub(crate) fn i_branch_reg(
        &mut self,
        op: Opcode,
        r1: RegId,
        r2: RegId,
        target: RegId,
    ) -> LyraResult<InsnId> {
        if target == r1 || (r2 != 0 && target == r2) {
            return Err(self
                .err_internal("branch target register cannot equal a branch operand"));
        }
        self.push3(op, r1, r2, target)
    }

    /// `jpush <func>`: call, pushing the return address.
    pub(crate) fn i_jpush_func(&mut self, callee: lyra_ir::FuncId) -> LyraResult<InsnId> {
        let id = self.new_insn(Opcode::Jpush)?;
        self.edit(id).push_imm(ImmPart::OffsetToFunction(callee));
        Ok(id)
    }

    /// `jpop`: return, popping the return address.
    pub(crate) fn i_jpop(&mut self) -> LyraResult<InsnId> {
        self.new_insn(Opcode::Jpop)
    }

    /// `jl r1, <func>`: call leaving the return address in `r1`.
    pub(crate) fn i_jl_func(&mut self, r1: RegId, callee: lyra_ir::FuncId) -> LyraResult<InsnId> {
        let id = self.new_insn(Opcode::Jl)?;
        let insn = self.edit(id);
        insn.r1 = r1;
        insn.push_imm(ImmPart::OffsetToFunction(callee));
        self.clear_ext(r1);
        Ok(id)
    }

    // ---- loads and stores ----

    fn ld_op(width: u32, reg_form: bool) -> Opcode {
        match (width, reg_form) {
            (1, false) => Opcode::Ld8,
            (1, true) => Opcode::Ld8r,
            (2, false) => Opcode::Ld16,
            (2, true) => Opcode::Ld16r,
            (4, false) => Opcode::Ld32,
            (4, true) => Opcode::Ld32r,
            _ => if reg_form { Opcode::Ld64r } else { Opcode::Ld64 },
        }
    }

    fn st_op(width: u32, reg_form: bool) -> Opcode {
        match (width, reg_form) {
            (1, false) => Opcode::St8,
            (1, true) => Opcode::St8r,
            (2, false) => Opcode::St16,
            (2, true) => Opcode::St16r,
            (4, false) => Opcode::St32,
            (4, true) => Opcode::St32r,
            _ => if reg_form { Opcode::St64r } else { Opcode::St64 },
        }
    }

    /// Load `width` bytes from `[r2 + parts]` into `r1`, zero-extending.
    pub(crate) fn i_ld(
        &mut self,
        width: u32,
        r1: RegId,
        r2: RegId,
        parts: &[ImmPart],
    ) -> LyraResult<()> {
        let only_zero = parts.iter().all(|p| p.as_value() == Some(0));
        if only_zero || parts.is_empty() {
            self.push3(Self::ld_op(width, true), r1, r2, 0)?;
        } else {
            self.push2parts(Self::ld_op(width, false), r1, r2, parts)?;
        }
        let (s1, _, _) = self.reg_meta(r1);
        self.set_ext(r1, s1 >= width, s1 > width);
        Ok(())
    }

    /// Store the low `width` bytes of `r1` at `[r2 + parts]`.
    pub(crate) fn i_st(
        &mut self,
        width: u32,
        r1: RegId,
        r2: RegId,
        parts: &[ImmPart],
    ) -> LyraResult<()> {
        let only_zero = parts.iter().all(|p| p.as_value() == Some(0));
        if only_zero || parts.is_empty() {
            self.push3(Self::st_op(width, true), r1, r2, 0)?;
        } else {
            self.push2parts(Self::st_op(width, false), r1, r2, parts)?;
        }
        Ok(())
    }

    /// Gpr-sized load.
    pub(crate) fn i_ld_gpr(&mut self, r1: RegId, r2: RegId, offset: i64) -> LyraResult<()> {
        self.i_ld(GPR_SIZE, r1, r2, &[ImmPart::Value(offset)])
    }

    /// Gpr-sized store.
    pub(crate) fn i_st_gpr(&mut self, r1: RegId, r2: RegId, offset: i64) -> LyraResult<()> {
        self.i_st(GPR_SIZE, r1, r2, &[ImmPart::Value(offset)])
    }

    // ---- bulk copies ----

    /// `memcpy [r1], [r2], r3` in gpr-sized units; distinct registers
    /// required.
    pub(crate) fn i_memcpy(&mut self, r1: RegId, r2: RegId, r3: RegId) -> LyraResult<()> {
        if r1 == r2 || r2 == r3 {
            return Err(self.err_internal("bulk copy requires distinct registers"));
        }
        let op = match GPR_SIZE {
            1 => Opcode::Mem8cpy,
            2 => Opcode::Mem16cpy,
            4 => Opcode::Mem32cpy,
            _ => Opcode::Mem64cpy,
        };
        self.push3(op, r1, r2, r3)?;
        Ok(())
    }

    /// Bulk copy of a constant byte count.
    pub(crate) fn i_memcpyi(&mut self, r1: RegId, r2: RegId, count: u64) -> LyraResult<()> {
        if r1 == r2 {
            return Err(self.err_internal("bulk copy requires distinct registers"));
        }
        let op = match GPR_SIZE {
            1 => Opcode::Mem8cpyi,
            2 => Opcode::Mem16cpyi,
            4 => Opcode::Mem32cpyi,
            _ => Opcode::Mem64cpyi,
        };
        self.push2i(op, r1, r2, count as i64)?;
        Ok(())
    }

    // ---- page management ----

    pub(crate) fn i_stackpagealloc(&mut self, r1: RegId) -> LyraResult<InsnId> {
        let id = self.new_insn(Opcode::Stackpagealloc)?;
        self.edit(id).r1 = r1;
        self.clear_ext(r1);
        Ok(id)
    }

    pub(crate) fn i_stackpagefree(&mut self, r1: RegId) -> LyraResult<InsnId> {
        let id = self.new_insn(Opcode::Stackpagefree)?;
        self.edit(id).r1 = r1;
        Ok(id)
    }

    // ---- labels ----

    /// Place a label at the next instruction to be emitted.
    pub(crate) fn place_label(&mut self, name: &str) {
        if !self.emitting() {
            return;
        }
        let at = self.curfunc().instrs.len() as InsnId;
        let cur = self.cur;
        self.labels.entry(cur).or_default().defined.insert(name.to_string(), at);
    }

    /// Resolve the pending jumps of a function against its labels. Called
    /// when the function finishes parsing.
    pub(crate) fn resolve_labels(&mut self, func: lyra_ir::FuncId) -> LyraResult<()> {
        let ctx = match self.labels.get_mut(&func) {
            Some(c) => std::mem::take(c),
            None => return Ok(()),
        };
        for (name, insn) in ctx.pending {
            let target = *ctx
                .defined
                .get(&name)
                .ok_or_else(|| self.err_semantic(format!("label {name} was never placed")))?;
            if target as usize >= self.func(func).instrs.len() {
                // A label placed past the last instruction lands on
                // filler so the displacement stays well defined.
                self.func_mut(func).push_insn(Instruction::new(Opcode::Nop));
            }
            self.func_mut(func)
                .insn_mut(insn)
                .push_imm(ImmPart::OffsetToInstruction(lyra_ir::imm::InsnRef {
                    func,
                    insn: target,
                }));
        }
        // Catchable-labels resolve throws from descendants.
        for (name, thrower, insn) in ctx.pending_throws {
            let target = ctx
                .catchables
                .get(&name)
                .copied()
                .flatten()
                .ok_or_else(|| self.err_semantic(format!("catchable-label {name} was never placed")))?;
            self.func_mut(thrower)
                .insn_mut(insn)
                .push_imm(ImmPart::OffsetToInstruction(lyra_ir::imm::InsnRef {
                    func,
                    insn: target,
                }));
        }
        self.labels.insert(func, crate::parser::LabelCtx::default());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{Parser, Pass};
    use crate::CompileOptions;
    use lyra_ir::Module;

    fn emitter(opts: &CompileOptions) -> Parser<'_> {
        Parser::new(opts, Pass::Emit, None)
    }

    fn last_op(p: &Parser) -> Opcode {
        p.func(Module::ROOT).instrs.last().unwrap().op
    }

    #[test]
    fn byte_count_helpers() {
        assert_eq!(count_zero_extended_bytes(0), 1);
        assert_eq!(count_zero_extended_bytes(255), 1);
        assert_eq!(count_zero_extended_bytes(256), 2);
        assert_eq!(count_zero_extended_bytes(u64::MAX), 8);
        assert_eq!(count_sign_extended_bytes(127), 1);
        assert_eq!(count_sign_extended_bytes(128), 2);
        assert_eq!(count_sign_extended_bytes((-128i64) as u64), 1);
        assert_eq!(count_sign_extended_bytes((-129i64) as u64), 2);
    }

    #[test]
    fn addi_zero_reduces_to_cpy_and_cpy_to_self_vanishes() {
        let opts = CompileOptions::new("");
        let mut p = emitter(&opts);
        p.i_addi(1, 2, 0).unwrap();
        assert_eq!(last_op(&p), Opcode::Cpy);

        let before = p.func(Module::ROOT).instrs.len();
        p.i_cpy(3, 3).unwrap();
        assert_eq!(p.func(Module::ROOT).instrs.len(), before);
    }

    #[test]
    fn multiply_folds_to_shift_copy_or_zero() {
        let opts = CompileOptions::new("");
        let mut p = emitter(&opts);

        p.i_muli(1, 2, 8).unwrap();
        assert_eq!(last_op(&p), Opcode::Slli);
        assert_eq!(p.func(Module::ROOT).instrs.last().unwrap().const_imm(), Some(3));

        p.i_muli(1, 2, 1).unwrap();
        assert_eq!(last_op(&p), Opcode::Cpy);

        p.i_muli(1, 2, 0).unwrap();
        assert_eq!(last_op(&p), Opcode::Li);
    }

    #[test]
    fn unsigned_modulo_by_power_of_two_becomes_a_mask() {
        let opts = CompileOptions::new("");
        let mut p = emitter(&opts);
        p.i_modui(1, 2, 8).unwrap();
        let insn = p.func(Module::ROOT).instrs.last().unwrap();
        assert_eq!(insn.op, Opcode::Andi);
        assert_eq!(insn.const_imm(), Some(7));
    }

    #[test]
    fn division_folds() {
        let opts = CompileOptions::new("");
        let mut p = emitter(&opts);
        p.i_divi(1, 2, 1).unwrap();
        assert_eq!(last_op(&p), Opcode::Cpy);
        p.i_divui(1, 2, 16).unwrap();
        assert_eq!(last_op(&p), Opcode::Srli);
        p.i_modi(1, 2, 1).unwrap();
        assert_eq!(last_op(&p), Opcode::Li);
    }

    #[test]
    fn loads_mark_the_destination_extension_state() {
        let opts = CompileOptions::new("");
        let mut p = emitter(&opts);

        // A narrow load into a full-width destination is both zero and
        // sign extended; a full-width load is only zero extended.
        p.regfile().get_mut(1).size = GPR_SIZE;
        p.i_ld(1, 1, 2, &[]).unwrap();
        assert!(p.reg(1).zext);
        assert!(p.reg(1).sext);

        p.regfile().get_mut(3).size = GPR_SIZE;
        p.i_ld(GPR_SIZE, 3, 2, &[]).unwrap();
        assert!(p.reg(3).zext);
        assert!(!p.reg(3).sext);
    }

    #[test]
    fn the_xor_zero_idiom_is_zero_extended() {
        let opts = CompileOptions::new("");
        let mut p = emitter(&opts);
        p.i_xor(1, 1, 1).unwrap();
        assert!(p.reg(1).zext);
    }

    #[test]
    fn li_extension_follows_the_immediate_byte_counts() {
        let opts = CompileOptions::new("");
        let mut p = emitter(&opts);

        p.regfile().get_mut(1).size = 1;
        p.i_li(1, 200).unwrap();
        // 200 fits one unsigned byte but not one signed byte.
        assert!(p.reg(1).zext);
        assert!(!p.reg(1).sext);

        p.regfile().get_mut(2).size = 2;
        p.i_li(2, 200).unwrap();
        assert!(p.reg(2).zext);
        assert!(p.reg(2).sext);
    }

    #[test]
    fn set_results_are_byte_sized_booleans() {
        let opts = CompileOptions::new("");
        let mut p = emitter(&opts);
        p.regfile().get_mut(1).size = GPR_SIZE;
        p.i_set3(Opcode::Slt, 1, 2, 3).unwrap();
        assert!(p.reg(1).zext);
        assert!(p.reg(1).sext);
    }

    #[test]
    fn slli_preserves_extension_when_the_destination_is_wide_enough() {
        let opts = CompileOptions::new("");
        let mut p = emitter(&opts);

        p.regfile().get_mut(2).size = 1;
        p.regfile().get_mut(2).zext = true;
        p.regfile().get_mut(1).size = GPR_SIZE;
        p.i_slli(1, 2, 8).unwrap();
        // One source byte shifted left by one byte still fits four.
        assert!(p.reg(1).zext);

        p.regfile().get_mut(4).size = GPR_SIZE;
        p.regfile().get_mut(4).zext = true;
        p.regfile().get_mut(3).size = GPR_SIZE;
        p.i_slli(3, 4, 16).unwrap();
        assert!(!p.reg(3).zext);
    }

    #[test]
    fn branch_to_register_rejects_operand_aliasing() {
        let opts = CompileOptions::new("");
        let mut p = emitter(&opts);
        assert!(p.i_branch_reg(Opcode::Jeqr, 1, 2, 1).is_err());
        assert!(p.i_branch_reg(Opcode::Jeqr, 1, 2, 3).is_ok());
    }

    #[test]
    fn bulk_copy_rejects_equal_registers() {
        let opts = CompileOptions::new("");
        let mut p = emitter(&opts);
        assert!(p.i_memcpy(1, 1, 2).is_err());
        assert!(p.i_memcpy(1, 2, 3).is_ok());
    }

    /// Shorthand for staging an operand register's width and extension
    /// state.
    fn stage(p: &mut Parser, id: lyra_ir::RegId, size: u32, zext: bool, sext: bool) {
        let r = p.regfile().get_mut(id);
        r.size = size;
        r.zext = zext;
        r.sext = sext;
    }

    #[test]
    fn add_extension_needs_a_strictly_wider_destination() {
        let opts = CompileOptions::new("");
        let mut p = emitter(&opts);

        // Both inputs zero extended, destination strictly wider: both
        // flags hold, the strictness absorbing the carry.
        stage(&mut p, 2, 1, true, false);
        stage(&mut p, 3, 1, true, false);
        stage(&mut p, 1, 4, false, false);
        p.i_add(1, 2, 3).unwrap();
        assert!(p.reg(1).zext);
        assert!(p.reg(1).sext);

        // Same-width destination: the carry can spill, nothing holds.
        stage(&mut p, 4, 1, false, false);
        p.i_add(4, 2, 3).unwrap();
        assert!(!p.reg(4).zext);
        assert!(!p.reg(4).sext);

        // A sign-extended input poisons zero extension but not sign
        // extension.
        stage(&mut p, 5, 1, false, true);
        stage(&mut p, 6, 4, false, false);
        p.i_add(6, 5, 2).unwrap();
        assert!(!p.reg(6).zext);
        assert!(p.reg(6).sext);
    }

    #[test]
    fn addi_extension_counts_the_immediate_bytes() {
        let opts = CompileOptions::new("");
        let mut p = emitter(&opts);

        stage(&mut p, 2, 1, true, false);
        stage(&mut p, 1, 4, false, false);
        p.i_addi(1, 2, 5).unwrap();
        assert!(p.reg(1).zext);
        assert!(p.reg(1).sext);

        // A destination no wider than the input predicts nothing.
        stage(&mut p, 3, 1, false, false);
        p.i_addi(3, 2, 5).unwrap();
        assert!(!p.reg(3).zext);
        assert!(!p.reg(3).sext);
    }

    #[test]
    fn sub_folds_equal_operands_and_never_zero_extends() {
        let opts = CompileOptions::new("");
        let mut p = emitter(&opts);

        stage(&mut p, 1, 4, false, false);
        p.i_sub(1, 2, 2).unwrap();
        let insn = p.func(Module::ROOT).instrs.last().unwrap();
        assert_eq!(insn.op, Opcode::Li);
        assert_eq!(insn.const_imm(), Some(0));

        stage(&mut p, 2, 1, false, true);
        stage(&mut p, 3, 1, true, false);
        stage(&mut p, 4, 4, false, false);
        p.i_sub(4, 2, 3).unwrap();
        assert!(!p.reg(4).zext);
        assert!(p.reg(4).sext);
    }

    #[test]
    fn neg_extension_follows_any_extended_input() {
        let opts = CompileOptions::new("");
        let mut p = emitter(&opts);

        stage(&mut p, 2, 1, true, false);
        stage(&mut p, 1, 4, false, false);
        p.i_neg(1, 2).unwrap();
        assert!(!p.reg(1).zext);
        assert!(p.reg(1).sext);

        stage(&mut p, 3, 1, false, false);
        p.i_neg(3, 2).unwrap();
        assert!(!p.reg(3).sext);
    }

    #[test]
    fn mul_extension_sums_the_operand_widths() {
        let opts = CompileOptions::new("");
        let mut p = emitter(&opts);

        // Both sign extended: the product is sign extended at `>=` the
        // width sum.
        stage(&mut p, 2, 2, false, true);
        stage(&mut p, 3, 2, false, true);
        stage(&mut p, 1, 4, false, false);
        p.i_mul(1, 2, 3).unwrap();
        assert!(!p.reg(1).zext);
        assert!(p.reg(1).sext);

        // Both zero extended at exactly the width sum: zero extension
        // holds, sign extension needs one more byte.
        stage(&mut p, 4, 1, true, false);
        stage(&mut p, 5, 1, true, false);
        stage(&mut p, 6, 2, false, false);
        p.i_mul(6, 4, 5).unwrap();
        assert!(p.reg(6).zext);
        assert!(!p.reg(6).sext);

        // Mixed pair: strictly more room than the sum is required.
        stage(&mut p, 7, 4, false, false);
        p.i_mul(7, 4, 2).unwrap();
        assert!(!p.reg(7).zext);
        assert!(p.reg(7).sext);
    }

    #[test]
    fn div_extension_is_bounded_by_the_dividend() {
        let opts = CompileOptions::new("");
        let mut p = emitter(&opts);

        stage(&mut p, 1, 4, false, false);
        p.i_div(1, 2, 2).unwrap();
        let insn = p.func(Module::ROOT).instrs.last().unwrap();
        assert_eq!(insn.op, Opcode::Li);
        assert_eq!(insn.const_imm(), Some(1));

        stage(&mut p, 2, 2, true, false);
        stage(&mut p, 3, 2, true, false);
        stage(&mut p, 4, 4, false, false);
        p.i_div(4, 2, 3).unwrap();
        assert!(p.reg(4).zext);
        assert!(p.reg(4).sext);

        // A sign-extended dividend keeps sign extension at `>=` its own
        // width, and zero extension is lost.
        stage(&mut p, 5, 2, false, true);
        stage(&mut p, 6, 2, false, false);
        p.i_div(6, 5, 3).unwrap();
        assert!(!p.reg(6).zext);
        assert!(p.reg(6).sext);
    }

    #[test]
    fn mod_extension_is_bounded_by_the_divisor() {
        let opts = CompileOptions::new("");
        let mut p = emitter(&opts);

        stage(&mut p, 1, 4, false, false);
        p.i_mod(1, 2, 2).unwrap();
        let insn = p.func(Module::ROOT).instrs.last().unwrap();
        assert_eq!(insn.op, Opcode::Li);
        assert_eq!(insn.const_imm(), Some(0));

        stage(&mut p, 2, 4, true, false);
        stage(&mut p, 3, 2, true, false);
        stage(&mut p, 4, 4, false, false);
        p.i_mod(4, 2, 3).unwrap();
        assert!(p.reg(4).zext);
        assert!(p.reg(4).sext);

        stage(&mut p, 5, 2, false, true);
        stage(&mut p, 6, 2, false, false);
        p.i_mod(6, 3, 5).unwrap();
        assert!(!p.reg(6).zext);
        assert!(p.reg(6).sext);
    }

    #[test]
    fn exhausted_pool_spills_a_bound_register() {
        let opts = CompileOptions::new("");
        let mut p = emitter(&opts);

        // Work inside a leaf function so spilled locals address off the
        // stack pointer.
        let mut leaf = lyra_ir::Function::new("leaf", "void");
        leaf.parent = Some(Module::ROOT);
        leaf.is_defined = true;
        let leaf_id = p.module.alloc(leaf);
        p.cur = leaf_id;

        // Bind the whole pool to dirty variables.
        for _ in 0..crate::regalloc::GPR_COUNT {
            let var = p.alloc_tempvar("uint").unwrap();
            p.var_to_reg_for_write(var).unwrap();
        }
        assert_eq!(p.regfile().unused_count(), 0);

        // The next allocation must write one back and hand it out.
        let reg = p.alloc_reg(false).unwrap();
        assert!((1..=crate::regalloc::GPR_COUNT).contains(&reg));
        assert!(p
            .func(leaf_id)
            .instrs
            .iter()
            .any(|i| matches!(i.op, Opcode::St32 | Opcode::St32r)));
    }
}

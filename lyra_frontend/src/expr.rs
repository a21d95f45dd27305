//! Expression evaluation
//!
//! Precedence climbing over the source, emitting IR as operands and
//! operators are consumed. Operator applications resolve against user
//! operator functions first (nearest scope first, first matcher wins),
//! then against the native operation set. Constants fold without emitting.
//! Postfix `++`/`--` are deferred and drained at statement boundaries and
//! before control-flow branches.

use crate::parser::{Parser, PostfixCall, VarKey};
use crate::symbols::{SearchMode, Symbol};
use crate::types::{
    alignment_of, is_enum, is_funcptr, is_native, is_native_or_pointer, is_pointer, is_signed,
    native_size, pointee, round_up, split_array,
};
use crate::CompileFlags;
use lyra_common::LyraResult;
use lyra_ir::{FuncId, ImmPart, Opcode, RegId, Variable, GPR_SIZE};

/// Result of evaluating (part of) an expression.
#[derive(Debug, Clone)]
pub(crate) enum ExprVal {
    /// The expression produced no value, as a void call does.
    NoRet,
    /// A variable, possibly a tempvar or a compile-time constant.
    Var(VarKey),
    /// An lvalue at the address held by a pointer-typed variable.
    Deref { addr: VarKey, typ: String },
}

const PREC_ASSIGN: u8 = 1;

fn binop_prec(op: &str) -> u8 {
    match op {
        "=" | "+=" | "-=" | "*=" | "/=" | "%=" | "<<=" | ">>=" | "&=" | "|=" | "^=" => PREC_ASSIGN,
        "||" => 2,
        "&&" => 3,
        "|" => 4,
        "^" => 5,
        "&" => 6,
        "==" | "!=" => 7,
        "<" | "<=" | ">" | ">=" => 8,
        "<<" | ">>" => 9,
        "+" | "-" => 10,
        "*" | "/" | "%" => 11,
        _ => 0,
    }
}

impl Parser<'_> {
    // ---- variables and registers ----

    /// Reserve `size` bytes in the current function's locals region.
    pub(crate) fn alloc_local(&mut self, size: u32) -> u32 {
        let align = size.clamp(1, GPR_SIZE);
        let f = self.curfunc_mut();
        f.local_size = round_up(f.local_size, align);
        let offset = f.local_size;
        f.local_size += size;
        offset
    }

    /// Create a tempvar with storage in the locals region. Tempvars are
    /// freed at expression boundaries.
    pub(crate) fn alloc_tempvar(&mut self, typ: &str) -> LyraResult<VarKey> {
        let size = if typ == "void" { GPR_SIZE } else { self.sizeof_type(typ)? };
        let name = self.new_tempvar_name();
        let offset = self.alloc_local(size);
        let mut v = Variable::new(name, typ);
        v.size = size;
        v.offset = offset;
        v.scope_depth = self.scope_current;
        v.scope_snapshot = self.scope_snapshot_now();
        if self.opts.flags.contains(CompileFlags::ALL_VAR_VOLATILE) {
            v.always_volatile.set(true);
        }
        let id = self.curfunc_mut().push_var(v);
        Ok((self.cur, id))
    }

    /// Create a storage-less compile-time constant.
    pub(crate) fn const_var(&mut self, typ: &str, value: u64) -> VarKey {
        let name = self.new_tempvar_name();
        let mut v = Variable::new(name, typ);
        v.isnumber = true;
        v.numbervalue = value;
        v.scope_depth = self.scope_current;
        v.scope_snapshot = self.scope_snapshot_now();
        let id = self.curfunc_mut().push_var(v);
        (self.cur, id)
    }

    pub(crate) fn var_of(&self, key: VarKey) -> &Variable {
        self.func(key.0).var(key.1)
    }

    /// Drop any register binding of a variable without writing back; used
    /// when aliasing makes the cached value untrustworthy.
    pub(crate) fn discard_var_binding(&mut self, key: VarKey) {
        if let Some(reg) = self.regfile().find_bound(key) {
            let r = self.regfile().get_mut(reg);
            r.var = None;
            r.dirty = false;
        }
    }

    /// Bring a variable's value into a register, reusing a live binding
    /// when one exists. Constants load their value; volatile variables
    /// are always re-read from memory.
    pub(crate) fn var_to_reg(&mut self, key: VarKey) -> LyraResult<RegId> {
        if !self.emitting() {
            return Ok(1);
        }
        let v = self.var_of(key).clone();

        if v.isnumber {
            let reg = self.alloc_reg(false)?;
            self.load_imm(reg, v.numbervalue)?;
            return Ok(reg);
        }

        let volatile = v.always_volatile.get();
        if !volatile {
            if let Some(reg) = self.regfile().find_bound(key) {
                self.regfile().touch(reg);
                return Ok(reg);
            }
        }

        let reg = self.alloc_reg(false)?;
        self.regfile().get_mut(reg).size = v.size.clamp(1, GPR_SIZE);
        self.lock_reg(reg);
        let (base, parts) = self.var_address(key)?;
        self.lock_reg(base);
        let width = v.size.clamp(1, GPR_SIZE);
        let result = self.i_ld(width, reg, base, &parts);
        self.unlock_reg(base);
        self.unlock_reg(reg);
        result?;
        if !volatile {
            self.regfile().get_mut(reg).var = Some(key);
        }
        Ok(reg)
    }

    /// Allocate a register to hold a new value for a variable, binding it
    /// dirty without loading the old value.
    pub(crate) fn var_to_reg_for_write(&mut self, key: VarKey) -> LyraResult<RegId> {
        if !self.emitting() {
            return Ok(1);
        }
        let size = self.var_of(key).size.clamp(1, GPR_SIZE);
        let reg = if let Some(reg) = self.regfile().find_bound(key) {
            self.regfile().touch(reg);
            reg
        } else {
            self.alloc_reg(false)?
        };
        let r = self.regfile().get_mut(reg);
        r.var = Some(key);
        r.dirty = true;
        r.size = size;
        Ok(reg)
    }

    /// A write to the variable just happened through `reg`; flush
    /// immediately when the variable is volatile.
    pub(crate) fn written_through_reg(&mut self, reg: RegId, key: VarKey) -> LyraResult<()> {
        if !self.emitting() {
            return Ok(());
        }
        if self.var_of(key).always_volatile.get() {
            self.flush_reg_to_var(reg, key)?;
            let r = self.regfile().get_mut(reg);
            r.var = None;
            r.dirty = false;
        }
        Ok(())
    }

    /// Load an immediate, using the xor idiom for zero.
    pub(crate) fn load_imm(&mut self, reg: RegId, value: u64) -> LyraResult<()> {
        if value == 0 {
            self.i_xor(reg, reg, reg)
        } else {
            self.i_li(reg, value)
        }
    }

    // ---- values ----

    /// The type a value carries in expressions.
    pub(crate) fn val_type(&self, val: &ExprVal) -> String {
        match val {
            ExprVal::NoRet => "void".to_string(),
            ExprVal::Var(key) => {
                let v = self.var_of(*key);
                let t = v.effective_type();
                if v.byref {
                    pointee(t).to_string()
                } else {
                    t.to_string()
                }
            }
            ExprVal::Deref { typ, .. } => typ.clone(),
        }
    }

    /// Replace a byref variable by the dereference of its stored pointer,
    /// which is what reading or writing it means.
    fn resolve_byref(&mut self, val: ExprVal) -> LyraResult<ExprVal> {
        if let ExprVal::Var(key) = &val {
            let v = self.var_of(*key);
            if v.byref {
                let typ = pointee(v.effective_type()).to_string();
                return Ok(ExprVal::Deref { addr: *key, typ });
            }
        }
        Ok(val)
    }

    /// Bring a value into a register for reading.
    pub(crate) fn val_to_reg(&mut self, val: &ExprVal) -> LyraResult<RegId> {
        match val {
            ExprVal::NoRet => Err(self.err_semantic("expression has no value")),
            ExprVal::Var(key) => self.var_to_reg(*key),
            ExprVal::Deref { addr, typ } => {
                if !self.emitting() {
                    return Ok(1);
                }
                let width = self.sizeof_type(typ)?.clamp(1, GPR_SIZE);
                let ptr = self.var_to_reg(*addr)?;
                self.lock_reg(ptr);
                let reg = self.alloc_reg(false)?;
                self.regfile().get_mut(reg).size = width;
                let result = self.i_ld(width, reg, ptr, &[]);
                self.unlock_reg(ptr);
                result?;
                Ok(reg)
            }
        }
    }

    /// Whether a value is a compile-time constant, and its value.
    pub(crate) fn val_const(&self, val: &ExprVal) -> Option<u64> {
        match val {
            ExprVal::Var(key) => {
                let v = self.var_of(*key);
                if v.isnumber {
                    Some(v.numbervalue)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Materialize a value as a variable with storage, so it can be
    /// addressed or passed.
    pub(crate) fn val_to_var(&mut self, val: ExprVal) -> LyraResult<VarKey> {
        match val {
            ExprVal::NoRet => Err(self.err_semantic("expression has no value")),
            ExprVal::Var(key) => Ok(key),
            ExprVal::Deref { ref typ, .. } => {
                let typ = typ.clone();
                let tmp = self.alloc_tempvar(&typ)?;
                if self.emitting() {
                    let reg = self.val_to_reg(&val)?;
                    let r = self.regfile().get_mut(reg);
                    r.var = Some(tmp);
                    r.dirty = true;
                }
                Ok(tmp)
            }
        }
    }

    /// Address of an lvalue, in a fresh register.
    pub(crate) fn val_address_to_reg(&mut self, val: &ExprVal) -> LyraResult<RegId> {
        if !self.emitting() {
            return Ok(1);
        }
        match val {
            ExprVal::NoRet => Err(self.err_semantic("expression has no address")),
            ExprVal::Var(key) => {
                if self.var_of(*key).isnumber {
                    return Err(self.err_semantic("a constant has no address"));
                }
                // The cached register value may be newer than memory;
                // write it back so the address sees the true value.
                if let Some(reg) = self.regfile().find_bound(*key) {
                    if self.regfile().get(reg).dirty {
                        self.flush_reg_to_var(reg, *key)?;
                    }
                    self.discard_var_binding(*key);
                }
                let (base, parts) = self.var_address(*key)?;
                self.lock_reg(base);
                let reg = self.alloc_reg(false)?;
                let result = self.i_addi_parts(reg, base, &parts);
                self.unlock_reg(base);
                result?;
                Ok(reg)
            }
            ExprVal::Deref { addr, .. } => self.var_to_reg(*addr),
        }
    }

    /// Store a value into an lvalue, running the native assignment.
    pub(crate) fn store_into(&mut self, place: &ExprVal, value: ExprVal) -> LyraResult<ExprVal> {
        let dst_type = self.val_type(place);
        let src_type = self.val_type(&value);
        self.check_native_assign(&dst_type, &src_type)?;

        match place {
            ExprVal::NoRet => Err(self.err_semantic("cannot assign to this expression")),
            ExprVal::Var(key) => {
                let v = self.var_of(*key).clone();
                if v.isnumber {
                    return Err(self.err_semantic("cannot assign to a constant"));
                }
                if v.bitselect != 0 {
                    self.store_bitfield(*key, &value)?;
                } else if is_native_or_pointer(&dst_type) || is_enum(&dst_type) || is_funcptr(&dst_type) {
                    if self.emitting() {
                        if let Some(n) = self.val_const(&value) {
                            // A constant lands directly in the register
                            // bound to the destination.
                            let dst = self.var_to_reg_for_write(*key)?;
                            self.load_imm(dst, n)?;
                            self.regfile().get_mut(dst).dirty = true;
                            self.written_through_reg(dst, *key)?;
                        } else {
                            let src = self.val_to_reg(&value)?;
                            self.lock_reg(src);
                            let dst = self.var_to_reg_for_write(*key)?;
                            let copy = self.i_cpy(dst, src);
                            self.unlock_reg(src);
                            copy?;
                            if dst != src {
                                self.regfile().get_mut(dst).dirty = true;
                            }
                            self.written_through_reg(dst, *key)?;
                        }
                    }
                } else {
                    self.store_aggregate(place, &value, &dst_type)?;
                }
                Ok(place.clone())
            }
            ExprVal::Deref { addr, typ } => {
                if is_native_or_pointer(typ) || is_enum(typ) || is_funcptr(typ) {
                    if self.emitting() {
                        let width = self.sizeof_type(typ)?.clamp(1, GPR_SIZE);
                        let src = self.val_to_reg(&value)?;
                        self.lock_reg(src);
                        let ptr = self.var_to_reg(*addr)?;
                        self.lock_reg(ptr);
                        let result = self.i_st(width, src, ptr, &[]);
                        self.unlock_reg(ptr);
                        self.unlock_reg(src);
                        result?;
                    }
                } else {
                    self.store_aggregate(place, &value, typ)?;
                }
                Ok(place.clone())
            }
        }
    }

    /// The native assignment signature `=|dst|src|` accepts native,
    /// pointer, enum and pointer-to-function operand pairs, and identical
    /// aggregate types.
    fn check_native_assign(&self, dst: &str, src: &str) -> LyraResult<()> {
        let scalar =
            |t: &str| is_native_or_pointer(t) || is_enum(t) || is_funcptr(t);
        if scalar(dst) && scalar(src) {
            return Ok(());
        }
        if dst == src {
            return Ok(());
        }
        Err(self.err_semantic(format!("incompatible types in assignment: {dst} = {src}")))
    }

    /// Aggregate assignment: bulk copy between the operand addresses.
    fn store_aggregate(&mut self, place: &ExprVal, value: &ExprVal, typ: &str) -> LyraResult<()> {
        let size = self.sizeof_type(typ)?;
        if !self.emitting() {
            return Ok(());
        }
        let dst = self.val_address_to_reg(place)?;
        self.lock_reg(dst);
        let src = self.val_address_to_reg(value)?;
        self.lock_reg(src);
        let units = size.div_ceil(GPR_SIZE);
        let copy = self.i_memcpyi(dst, src, units as u64);
        self.unlock_reg(src);
        self.unlock_reg(dst);
        copy
    }

    /// Read-modify-write of a bitfield member, packed right-to-left in its
    /// containing native integer.
    fn store_bitfield(&mut self, key: VarKey, value: &ExprVal) -> LyraResult<()> {
        if !self.emitting() {
            return Ok(());
        }
        let v = self.var_of(key).clone();
        let mask = v.bitselect;
        let shift = mask.trailing_zeros() as u64;
        let width = v.size.clamp(1, GPR_SIZE);

        let src = self.val_to_reg(value)?;
        self.lock_reg(src);

        let (base, parts) = self.var_address(key)?;
        self.lock_reg(base);
        let word = self.alloc_reg(false)?;
        self.lock_reg(word);

        let result = (|| {
            self.i_ld(width, word, base, &parts)?;
            self.i_andi(word, word, !mask)?;
            let shifted = self.alloc_reg(false)?;
            self.lock_reg(shifted);
            let r = (|| {
                self.i_slli(shifted, src, shift)?;
                self.i_andi(shifted, shifted, mask)?;
                self.i_or(word, word, shifted)?;
                self.i_st(width, word, base, &parts)
            })();
            self.unlock_reg(shifted);
            r
        })();

        self.unlock_reg(word);
        self.unlock_reg(base);
        self.unlock_reg(src);
        result
    }

    /// Read a bitfield member into a tempvar.
    fn load_bitfield(&mut self, key: VarKey) -> LyraResult<ExprVal> {
        let v = self.var_of(key).clone();
        let tmp = self.alloc_tempvar(v.effective_type())?;
        if self.emitting() {
            let mask = v.bitselect;
            let shift = mask.trailing_zeros() as u64;
            let reg = self.var_to_reg(key)?;
            self.lock_reg(reg);
            let out = self.alloc_reg(false)?;
            let result = (|| {
                self.i_andi(out, reg, mask)?;
                self.i_srli(out, out, shift)
            })();
            self.unlock_reg(reg);
            result?;
            let r = self.regfile().get_mut(out);
            r.var = Some(tmp);
            r.dirty = true;
        }
        Ok(ExprVal::Var(tmp))
    }

    // ---- postfix deferral ----

    /// Apply the deferred `++`/`--` operations in recorded order.
    pub(crate) fn drain_postfix_ops(&mut self) -> LyraResult<()> {
        let pending = std::mem::take(&mut self.postfix);
        for call in pending {
            let delta = self.postfix_delta(&call)?;
            self.apply_incdec_to_var(call.var, delta)?;
        }
        Ok(())
    }

    /// Add `delta` to a variable in place; byref variables update their
    /// pointee through the stored pointer.
    fn apply_incdec_to_var(&mut self, key: VarKey, delta: i64) -> LyraResult<()> {
        if !self.emitting() {
            return Ok(());
        }
        let v = self.var_of(key).clone();
        if !v.byref {
            let reg = self.var_to_reg(key)?;
            self.lock_reg(reg);
            let dst = self.var_to_reg_for_write(key)?;
            let r = self.i_addi(dst, reg, delta);
            self.unlock_reg(reg);
            r?;
            return self.written_through_reg(dst, key);
        }
        let typ = pointee(v.effective_type()).to_string();
        let width = self.sizeof_type(&typ)?.clamp(1, GPR_SIZE);
        let ptr = self.var_to_reg(key)?;
        self.lock_reg(ptr);
        let val = self.alloc_reg(false)?;
        self.lock_reg(val);
        let r = (|| {
            self.i_ld(width, val, ptr, &[])?;
            self.i_addi(val, val, delta)?;
            self.i_st(width, val, ptr, &[])
        })();
        self.unlock_reg(val);
        self.unlock_reg(ptr);
        r
    }

    fn postfix_delta(&self, call: &PostfixCall) -> LyraResult<i64> {
        let typ = {
            let v = self.var_of(call.var);
            let t = v.effective_type();
            if v.byref { pointee(t).to_string() } else { t.to_string() }
        };
        let step = if is_pointer(&typ) {
            let elem = pointee(&typ);
            round_up(self.sizeof_type(elem)?.max(1), alignment_of(elem)) as i64
        } else {
            1
        };
        Ok(if call.op == "++" { step } else { -step })
    }

    /// Free tempvars at an expression boundary. Variables feeding pending
    /// postfix operations stay alive until the queue drains.
    pub(crate) fn free_tempvars(&mut self) {
        let protected: Vec<VarKey> = self.postfix.iter().map(|p| p.var).collect();
        let cur = self.cur;
        let ids: Vec<u32> = self
            .func(cur)
            .vars
            .iter()
            .enumerate()
            .filter(|(i, v)| {
                // Tempvars, and the `name.offset` sub-variables aliasing
                // part of a named variable, die with the expression.
                v.alive
                    && (v.is_tempvar() || v.name.contains('.'))
                    && !protected.contains(&(cur, *i as u32))
            })
            .map(|(i, _)| i as u32)
            .collect();
        for id in ids {
            self.discard_var_binding((cur, id));
            self.func_mut(cur).var_mut(id).alive = false;
        }
    }

    // ---- the evaluator ----

    /// Evaluate an expression whose operators bind at least as tightly as
    /// `min_prec`.
    pub(crate) fn evaluate_expression(&mut self, min_prec: u8) -> LyraResult<ExprVal> {
        let mut lhs = self.parse_unary()?;

        loop {
            self.skip_space();
            let op_pos = self.pos;
            let op = match self.peek_binop() {
                Some(op) => op,
                None => return Ok(lhs),
            };
            let prec = binop_prec(op);
            if prec < min_prec {
                return Ok(lhs);
            }
            self.pos += op.len();
            self.skip_space();

            let next_min = if prec == PREC_ASSIGN { prec } else { prec + 1 };
            let rhs = self.evaluate_expression(next_min)?;

            lhs = self.apply_binop(op, lhs, rhs, op_pos)?;
        }
    }

    /// The binary operator at the cursor, longest first so `<<=` is not
    /// read as `<`.
    fn peek_binop(&self) -> Option<&'static str> {
        const OPS: &[&str] = &[
            "<<=", ">>=", "==", "!=", "<=", ">=", "&&", "||", "<<", ">>", "+=", "-=", "*=", "/=",
            "%=", "&=", "|=", "^=", "=", "<", ">", "+", "-", "*", "/", "%", "&", "|", "^",
        ];
        for op in OPS {
            let bytes = op.as_bytes();
            if self.src.len() - self.pos >= bytes.len()
                && &self.src[self.pos..self.pos + bytes.len()] == bytes
            {
                return Some(op);
            }
        }
        None
    }

    fn parse_unary(&mut self) -> LyraResult<ExprVal> {
        self.skip_space();
        let pos = self.pos;

        // Prefix operators.
        if self.peek() == b'+' && self.peek_at(1) == b'+' {
            self.pos += 2;
            self.skip_space();
            let operand = self.parse_unary()?;
            return self.apply_prefix_incdec("++", operand, pos);
        }
        if self.peek() == b'-' && self.peek_at(1) == b'-' {
            self.pos += 2;
            self.skip_space();
            let operand = self.parse_unary()?;
            return self.apply_prefix_incdec("--", operand, pos);
        }
        match self.peek() {
            b'-' => {
                self.pos += 1;
                self.skip_space();
                let operand = self.parse_unary()?;
                return self.apply_unary_op("-", operand, pos);
            }
            b'!' => {
                self.pos += 1;
                self.skip_space();
                let operand = self.parse_unary()?;
                return self.apply_unary_op("!", operand, pos);
            }
            b'~' => {
                self.pos += 1;
                self.skip_space();
                let operand = self.parse_unary()?;
                return self.apply_unary_op("~", operand, pos);
            }
            b'*' => {
                self.pos += 1;
                self.skip_space();
                let operand = self.parse_unary()?;
                let typ = self.val_type(&operand);
                if !is_pointer(&typ) {
                    return Err(self.err_semantic_at("dereference of a non-pointer", pos));
                }
                let addr = self.val_to_var(operand)?;
                return self.parse_postfix(ExprVal::Deref {
                    addr,
                    typ: pointee(&typ).to_string(),
                });
            }
            b'&' => {
                self.pos += 1;
                self.skip_space();
                let operand = self.parse_unary()?;
                let typ = self.val_type(&operand);
                let tmp = self.alloc_tempvar(&format!("{typ}*"))?;
                if self.emitting() {
                    let reg = self.val_address_to_reg(&operand)?;
                    let r = self.regfile().get_mut(reg);
                    r.var = Some(tmp);
                    r.dirty = true;
                }
                return self.parse_postfix(ExprVal::Var(tmp));
            }
            _ => {}
        }

        let primary = self.parse_primary()?;
        self.parse_postfix(primary)
    }

    fn parse_primary(&mut self) -> LyraResult<ExprVal> {
        self.skip_space();
        let pos = self.pos;

        if self.peek() == b'(' {
            self.pos += 1;
            self.skip_space();
            // A parenthesized type is a cast.
            if let Some(cast_type) = self.try_parse_cast_type()? {
                self.skip_space();
                let operand = self.parse_unary()?;
                return self.apply_cast(&cast_type, operand, pos);
            }
            let val = self.evaluate_expression(1)?;
            self.expect_byte(b')')?;
            return Ok(val);
        }

        if self.peek() == b'"' {
            let bytes = self.read_string_literal()?;
            self.skip_space();
            let offset = self.intern_string(&bytes);
            let tmp = self.alloc_tempvar("u8*")?;
            if self.emitting() {
                let reg = self.alloc_reg(false)?;
                self.i_afip(reg, &[ImmPart::OffsetToStringRegion, ImmPart::Value(offset as i64)])?;
                let r = self.regfile().get_mut(reg);
                r.var = Some(tmp);
                r.dirty = true;
            }
            return Ok(ExprVal::Var(tmp));
        }

        if let Some(n) = self.read_number()? {
            self.skip_space();
            return Ok(ExprVal::Var(self.const_var("uint", n)));
        }

        let name = self.read_symbol();
        if name.is_empty() {
            self.reverse_skip_space();
            return Err(self.err_syntax("expecting an expression"));
        }
        self.skip_space();

        if name == "typeof" {
            return Err(self.err_syntax_at("typeof is only valid where a type is expected", pos));
        }

        if self.peek() == b'(' {
            return self.parse_call(&name, pos);
        }

        match self.search_symbol(&name, SearchMode::Normal) {
            Some(Symbol::Variable(key)) => Ok(ExprVal::Var(key)),
            Some(Symbol::Function(_)) => {
                Err(self.err_semantic_at(format!("function {name} used without a call"), pos))
            }
            Some(Symbol::Type(..)) => {
                Err(self.err_semantic_at(format!("type {name} used in an expression"), pos))
            }
            None => Err(self.err_semantic_at(format!("symbol {name} not in scope"), pos)),
        }
    }

    /// `(type)` cast detection: only when the parenthesized symbol names a
    /// visible type, followed by pointer specs.
    fn try_parse_cast_type(&mut self) -> LyraResult<Option<String>> {
        let saved = self.pos;
        let name = self.read_symbol();
        if name.is_empty() {
            self.pos = saved;
            return Ok(None);
        }
        let is_type = is_native(&name)
            || name == "void"
            || self.find_typedef(&name).is_some()
            || self
                .find_typedef(&format!("{}{}", lyra_ir::types::ENUM_NAME_PREFIX, name))
                .is_some();
        if !is_type {
            self.pos = saved;
            return Ok(None);
        }
        let mut typ = if self.find_typedef(&format!("{}{}", lyra_ir::types::ENUM_NAME_PREFIX, name)).is_some()
            && !is_native(&name)
        {
            format!("{}{}", lyra_ir::types::ENUM_NAME_PREFIX, name)
        } else {
            name
        };
        self.skip_space();
        while self.peek() == b'*' {
            typ.push('*');
            self.pos += 1;
            self.skip_space();
        }
        if self.peek() != b')' {
            self.pos = saved;
            return Ok(None);
        }
        self.pos += 1;
        Ok(Some(typ))
    }

    fn apply_cast(&mut self, typ: &str, operand: ExprVal, pos: usize) -> LyraResult<ExprVal> {
        if let Some(n) = self.val_const(&operand) {
            return Ok(ExprVal::Var(self.const_var(typ, n)));
        }
        let src_type = self.val_type(&operand);
        if !is_native_or_pointer(&src_type) && !is_enum(&src_type) {
            return Err(self.err_semantic_at(
                format!("cannot cast {src_type} to {typ}"),
                pos,
            ));
        }
        let tmp = self.alloc_tempvar(typ)?;
        if self.emitting() {
            let src = self.val_to_reg(&operand)?;
            self.lock_reg(src);
            let dst = self.var_to_reg_for_write(tmp)?;
            let r = self.i_cpy(dst, src);
            self.unlock_reg(src);
            r?;
            // Narrowing casts must drop the stale high bits.
            let width = self.sizeof_type(typ)?.clamp(1, GPR_SIZE);
            if width < GPR_SIZE {
                if is_signed(typ) {
                    self.i_sxt(dst, dst, width)?;
                } else {
                    self.i_zxt(dst, dst, width)?;
                }
            }
            self.regfile().get_mut(dst).dirty = true;
        }
        self.parse_postfix(ExprVal::Var(tmp))
    }

    /// Postfix forms: member select, indexing, `++`, `--`.
    fn parse_postfix(&mut self, mut val: ExprVal) -> LyraResult<ExprVal> {
        loop {
            self.skip_space();
            let pos = self.pos;

            if self.peek() == b'.' && !self.peek_at(1).is_ascii_digit() {
                self.pos += 1;
                self.skip_space();
                let field = self.read_symbol();
                if field.is_empty() {
                    return Err(self.err_syntax("expecting a member name after '.'"));
                }
                self.skip_space();
                val = self.select_member(val, &field, pos)?;
                continue;
            }

            if self.peek() == b'[' {
                self.pos += 1;
                self.skip_space();
                let index = self.evaluate_expression(1)?;
                self.expect_byte(b']')?;
                val = self.index_value(val, index, pos)?;
                continue;
            }

            if self.peek() == b'+' && self.peek_at(1) == b'+' {
                self.pos += 2;
                self.skip_space();
                val = self.defer_postfix("++", val, pos)?;
                continue;
            }
            if self.peek() == b'-' && self.peek_at(1) == b'-' {
                self.pos += 2;
                self.skip_space();
                val = self.defer_postfix("--", val, pos)?;
                continue;
            }

            return Ok(val);
        }
    }

    /// `x++` / `x--`: the expression value is the current value; the
    /// update joins the deferred queue drained at the statement boundary.
    fn defer_postfix(&mut self, op: &'static str, val: ExprVal, pos: usize) -> LyraResult<ExprVal> {
        let key = match &val {
            ExprVal::Var(key) if !self.var_of(*key).isnumber => *key,
            _ => return Err(self.err_semantic_at(format!("{op} needs a variable"), pos)),
        };
        let typ = self.val_type(&val);
        let tmp = self.alloc_tempvar(&typ)?;
        if self.emitting() {
            let cur = self.var_to_reg(key)?;
            self.lock_reg(cur);
            let copy = self.var_to_reg_for_write(tmp)?;
            let r = self.i_cpy(copy, cur);
            self.unlock_reg(cur);
            r?;
        }
        self.postfix.push(PostfixCall { op, var: key, pos });
        Ok(ExprVal::Var(tmp))
    }

    fn apply_prefix_incdec(
        &mut self,
        op: &'static str,
        operand: ExprVal,
        pos: usize,
    ) -> LyraResult<ExprVal> {
        let key = match &operand {
            ExprVal::Var(key) if !self.var_of(*key).isnumber => *key,
            _ => return Err(self.err_semantic_at(format!("{op} needs a variable"), pos)),
        };
        let delta = self.postfix_delta(&PostfixCall { op, var: key, pos })?;
        self.apply_incdec_to_var(key, delta)?;
        Ok(operand)
    }

    /// Member selection on aggregates, enums do not reach here. Pointers
    /// to aggregates select through one implicit dereference; byref
    /// variables read through their stored pointer.
    fn select_member(&mut self, val: ExprVal, field: &str, pos: usize) -> LyraResult<ExprVal> {
        let val = self.resolve_byref(val)?;
        let mut typ = self.val_type(&val);
        let mut val = val;

        if is_pointer(&typ) {
            let addr = self.val_to_var(val)?;
            typ = pointee(&typ).to_string();
            val = ExprVal::Deref { addr, typ: typ.clone() };
        }

        let member = self
            .find_member(&typ, field)
            .ok_or_else(|| self.err_semantic_at(format!("{typ} has no member {field}"), pos))?;

        match val {
            ExprVal::Var(parent_key) => {
                let parent = self.var_of(parent_key).clone();
                // Sub-variable aliasing part of the parent's storage; the
                // shared volatile flag keeps aliased accesses honest.
                let mut sub = Variable::new(
                    format!("{}.{}", parent.name, member.offset),
                    member.typ.clone(),
                );
                sub.size = member.size;
                sub.offset = parent.offset + member.offset;
                sub.bitselect = member.bitselect;
                sub.is_static = parent.is_static;
                sub.always_volatile = parent.always_volatile.clone();
                sub.scope_depth = parent.scope_depth;
                sub.scope_snapshot = parent.scope_snapshot.clone();
                // Writes through the alias invalidate the parent cache.
                self.discard_var_binding(parent_key);
                let id = self.func_mut(parent_key.0).push_var(sub);
                let key = (parent_key.0, id);
                if self.var_of(key).bitselect != 0 {
                    self.load_bitfield(key)
                } else {
                    Ok(ExprVal::Var(key))
                }
            }
            ExprVal::Deref { addr, .. } => {
                if member.bitselect != 0 {
                    return Err(self.err_semantic_at(
                        "bitfield access through a pointer is not supported",
                        pos,
                    ));
                }
                let ptr_type = format!("{}*", member.typ);
                let tmp = self.alloc_tempvar(&ptr_type)?;
                if self.emitting() {
                    let base = self.var_to_reg(addr)?;
                    self.lock_reg(base);
                    let reg = self.var_to_reg_for_write(tmp)?;
                    let r = self.i_addi(reg, base, member.offset as i64);
                    self.unlock_reg(base);
                    r?;
                }
                Ok(ExprVal::Deref { addr: tmp, typ: member.typ.clone() })
            }
            ExprVal::NoRet => Err(self.err_semantic_at("expression has no value", pos)),
        }
    }

    /// Indexing arrays and pointers.
    fn index_value(&mut self, val: ExprVal, index: ExprVal, pos: usize) -> LyraResult<ExprVal> {
        let val = self.resolve_byref(val)?;
        let typ = self.val_type(&val);

        let (elem, base_is_array) = if let Some((elem, _)) = split_array(&typ) {
            (elem.to_string(), true)
        } else if is_pointer(&typ) {
            (pointee(&typ).to_string(), false)
        } else {
            return Err(self.err_semantic_at(format!("{typ} cannot be indexed"), pos));
        };

        let stride = round_up(self.sizeof_type(&elem)?.max(1), alignment_of(&elem));

        let ptr_type = format!("{elem}*");
        let tmp = self.alloc_tempvar(&ptr_type)?;
        if self.emitting() {
            let base = if base_is_array {
                self.val_address_to_reg(&val)?
            } else {
                self.val_to_reg(&val)?
            };
            self.lock_reg(base);

            let result = if let Some(n) = self.val_const(&index) {
                let reg = self.var_to_reg_for_write(tmp)?;
                self.i_addi(reg, base, (n * stride as u64) as i64)
            } else {
                let idx = self.val_to_reg(&index)?;
                self.lock_reg(idx);
                let scaled = self.alloc_reg(false)?;
                self.lock_reg(scaled);
                let r = (|| {
                    self.i_muli(scaled, idx, stride as u64)?;
                    let reg = self.var_to_reg_for_write(tmp)?;
                    self.i_add(reg, base, scaled)
                })();
                self.unlock_reg(scaled);
                self.unlock_reg(idx);
                r
            };
            self.unlock_reg(base);
            result?;
        }
        Ok(ExprVal::Deref { addr: tmp, typ: elem })
    }

    // ---- operator application ----

    fn apply_unary_op(&mut self, op: &str, operand: ExprVal, pos: usize) -> LyraResult<ExprVal> {
        let operand = self.resolve_byref(operand)?;
        let typ = self.val_type(&operand);

        // Constant folding.
        if let Some(n) = self.val_const(&operand) {
            let folded = match op {
                "-" => (n as i64).wrapping_neg() as u64,
                "~" => !n,
                "!" => (n == 0) as u64,
                _ => return Err(self.err_internal(format!("unknown unary operator {op}"))),
            };
            return Ok(ExprVal::Var(self.const_var(&typ, folded)));
        }

        // User operator overloads win over the native operation.
        if let Some(callee) = self.resolve_user_op(op, &[typ.clone()]) {
            return self.emit_user_call(callee, vec![operand], pos);
        }

        if !is_native_or_pointer(&typ) && !is_enum(&typ) {
            return Err(self.err_semantic_at(format!("operator {op} cannot take {typ}"), pos));
        }

        let out_type = if op == "!" { "uint".to_string() } else { typ };
        let tmp = self.alloc_tempvar(&out_type)?;
        if self.emitting() {
            let src = self.val_to_reg(&operand)?;
            self.lock_reg(src);
            let dst = self.var_to_reg_for_write(tmp)?;
            let r = match op {
                "-" => self.i_neg(dst, src),
                "~" => self.i_not(dst, src),
                "!" => self.i_setz(Opcode::Sz, dst, src),
                _ => unreachable!(),
            };
            self.unlock_reg(src);
            r?;
        }
        Ok(ExprVal::Var(tmp))
    }

    fn apply_binop(
        &mut self,
        op: &str,
        lhs: ExprVal,
        rhs: ExprVal,
        pos: usize,
    ) -> LyraResult<ExprVal> {
        if op == "=" {
            let lhs = self.resolve_byref(lhs)?;
            let rhs = self.resolve_byref(rhs)?;
            return self.store_into(&lhs, rhs);
        }
        if let Some(base) = op.strip_suffix('=') {
            if binop_prec(op) == PREC_ASSIGN {
                // Compound assignment expands to the base operation
                // followed by a store.
                let lhs = self.resolve_byref(lhs)?;
                let rhs = self.resolve_byref(rhs)?;
                let value = self.apply_native_or_user_binop(base, lhs.clone(), rhs, pos)?;
                return self.store_into(&lhs, value);
            }
        }

        let lhs = self.resolve_byref(lhs)?;
        let rhs = self.resolve_byref(rhs)?;
        self.apply_native_or_user_binop(op, lhs, rhs, pos)
    }

    fn apply_native_or_user_binop(
        &mut self,
        op: &str,
        lhs: ExprVal,
        rhs: ExprVal,
        pos: usize,
    ) -> LyraResult<ExprVal> {
        let lt = self.val_type(&lhs);
        let rt = self.val_type(&rhs);

        // User operator overloads, nearest scope first.
        if let Some(callee) = self.resolve_user_op(op, &[lt.clone(), rt.clone()]) {
            return self.emit_user_call(callee, vec![lhs, rhs], pos);
        }

        // Constant folding.
        if let (Some(a), Some(b)) = (self.val_const(&lhs), self.val_const(&rhs)) {
            if let Some(folded) = fold_binop(op, a, b, is_signed(&lt) && is_signed(&rt)) {
                let out = if binop_prec(op) == 7 || binop_prec(op) == 8 || op == "&&" || op == "||"
                {
                    "uint".to_string()
                } else {
                    lt
                };
                return Ok(ExprVal::Var(self.const_var(&out, folded)));
            }
        }

        let scalar = |t: &str| is_native_or_pointer(t) || is_enum(t);
        if !scalar(&lt) || !scalar(&rt) {
            return Err(self.err_semantic_at(
                format!("no operator matches {op}|{lt}|{rt}|"),
                pos,
            ));
        }

        self.emit_native_binop(op, lhs, rhs, &lt, &rt, pos)
    }

    fn emit_native_binop(
        &mut self,
        op: &str,
        lhs: ExprVal,
        rhs: ExprVal,
        lt: &str,
        rt: &str,
        pos: usize,
    ) -> LyraResult<ExprVal> {
        let signed = is_signed(lt) && is_signed(rt);
        let comparison = matches!(op, "==" | "!=" | "<" | "<=" | ">" | ">=" | "&&" | "||");

        // Pointer arithmetic scales by the pointee stride.
        let (lhs, rhs) = if op == "+" || op == "-" {
            let scale = |me: &mut Self, ptr_t: &str, idx: ExprVal| -> LyraResult<ExprVal> {
                let elem = pointee(ptr_t);
                let stride = round_up(me.sizeof_type(elem)?.max(1), alignment_of(elem));
                if stride == 1 {
                    return Ok(idx);
                }
                let stride_var = ExprVal::Var(me.const_var("uint", stride as u64));
                me.apply_native_or_user_binop(
                    "*",
                    idx,
                    stride_var,
                    pos,
                )
            };
            if is_pointer(lt) && !is_pointer(rt) {
                let scaled = scale(self, lt, rhs)?;
                (lhs, scaled)
            } else if is_pointer(rt) && !is_pointer(lt) && op == "+" {
                let scaled = scale(self, rt, lhs)?;
                (scaled, rhs)
            } else {
                (lhs, rhs)
            }
        } else {
            (lhs, rhs)
        };

        let out_type = if comparison {
            "uint".to_string()
        } else if is_pointer(lt) && is_pointer(rt) && op == "-" {
            "uint".to_string()
        } else if is_pointer(lt) {
            lt.to_string()
        } else if is_pointer(rt) {
            rt.to_string()
        } else {
            let ls = native_size(lt).unwrap_or(GPR_SIZE);
            let rs = native_size(rt).unwrap_or(GPR_SIZE);
            if ls >= rs { lt.to_string() } else { rt.to_string() }
        };

        let tmp = self.alloc_tempvar(&out_type)?;
        if self.emitting() {
            // The logical connectives always read both operands from
            // registers; everything else can take an immediate form, with
            // the swapped-immediate opcodes covering a constant left
            // operand of the non-commutative operations.
            let connective = matches!(op, "&&" | "||");
            let rconst = if connective { None } else { self.val_const(&rhs) };
            let lconst = if connective || rconst.is_some() { None } else { self.val_const(&lhs) };

            if let Some(n) = lconst.filter(|_| has_swapped_form(op)) {
                let b = self.val_to_reg(&rhs)?;
                self.lock_reg(b);
                let dst = self.var_to_reg_for_write(tmp)?;
                let r = self.emit_binop_insn_swapped(op, dst, b, n, signed);
                self.unlock_reg(b);
                r?;
                self.regfile().get_mut(dst).dirty = true;
                return Ok(ExprVal::Var(tmp));
            }

            let a = self.val_to_reg(&lhs)?;
            self.lock_reg(a);
            let b = if rconst.is_none() {
                let b = self.val_to_reg(&rhs)?;
                self.lock_reg(b);
                Some(b)
            } else {
                None
            };
            let dst = self.var_to_reg_for_write(tmp)?;

            let r = self.emit_binop_insn(op, dst, a, b, rconst, signed);
            if let Some(b) = b {
                self.unlock_reg(b);
            }
            self.unlock_reg(a);
            r?;
            self.regfile().get_mut(dst).dirty = true;
        }

        // Pointer difference divides back down by the stride.
        if is_pointer(lt) && is_pointer(rt) && op == "-" {
            let elem = pointee(lt);
            let stride = round_up(self.sizeof_type(elem)?.max(1), alignment_of(elem));
            if stride > 1 {
                let divisor = ExprVal::Var(self.const_var("uint", stride as u64));
                return self.apply_native_or_user_binop("/", ExprVal::Var(tmp), divisor, pos);
            }
        }

        Ok(ExprVal::Var(tmp))
    }

    fn emit_binop_insn(
        &mut self,
        op: &str,
        dst: RegId,
        a: RegId,
        b: Option<RegId>,
        rconst: Option<u64>,
        signed: bool,
    ) -> LyraResult<()> {
        use Opcode::*;
        match (op, b, rconst) {
            ("+", Some(b), _) => self.i_add(dst, a, b),
            ("+", None, Some(n)) => self.i_addi(dst, a, n as i64),
            ("-", Some(b), _) => self.i_sub(dst, a, b),
            ("-", None, Some(n)) => self.i_addi(dst, a, -(n as i64)),
            ("*", Some(b), _) => self.i_mul(dst, a, b),
            ("*", None, Some(n)) => self.i_muli(dst, a, n),
            ("/", Some(b), _) => {
                if signed { self.i_div(dst, a, b) } else { self.i_divu(dst, a, b) }
            }
            ("/", None, Some(n)) => {
                if signed { self.i_divi(dst, a, n as i64) } else { self.i_divui(dst, a, n) }
            }
            ("%", Some(b), _) => {
                if signed { self.i_mod(dst, a, b) } else { self.i_modu(dst, a, b) }
            }
            ("%", None, Some(n)) => {
                if signed { self.i_modi(dst, a, n as i64) } else { self.i_modui(dst, a, n) }
            }
            ("&", Some(b), _) => self.i_and(dst, a, b),
            ("&", None, Some(n)) => self.i_andi(dst, a, n),
            ("|", Some(b), _) => self.i_or(dst, a, b),
            ("|", None, Some(n)) => self.i_ori(dst, a, n),
            ("^", Some(b), _) => self.i_xor(dst, a, b),
            ("^", None, Some(n)) => self.i_xori(dst, a, n),
            ("<<", Some(b), _) => self.i_sll(dst, a, b),
            ("<<", None, Some(n)) => self.i_slli(dst, a, n),
            (">>", Some(b), _) => {
                if signed { self.i_sra(dst, a, b) } else { self.i_srl(dst, a, b) }
            }
            (">>", None, Some(n)) => {
                if signed { self.i_srai(dst, a, n) } else { self.i_srli(dst, a, n) }
            }
            ("==", Some(b), _) => self.i_set3(Seq, dst, a, b),
            ("==", None, Some(n)) => self.i_set2i(Seqi, dst, a, n as i64),
            ("!=", Some(b), _) => self.i_set3(Sne, dst, a, b),
            ("!=", None, Some(n)) => self.i_set2i(Snei, dst, a, n as i64),
            ("<", Some(b), _) => {
                if signed { self.i_set3(Slt, dst, a, b) } else { self.i_set3(Sltu, dst, a, b) }
            }
            ("<", None, Some(n)) => {
                if signed {
                    self.i_set2i(Slti, dst, a, n as i64)
                } else {
                    self.i_set2i(Sltui, dst, a, n as i64)
                }
            }
            ("<=", Some(b), _) => {
                if signed { self.i_set3(Slte, dst, a, b) } else { self.i_set3(Slteu, dst, a, b) }
            }
            ("<=", None, Some(n)) => {
                if signed {
                    self.i_set2i(Sltei, dst, a, n as i64)
                } else {
                    self.i_set2i(Slteui, dst, a, n as i64)
                }
            }
            // Greater-than swaps to the less-than family; the immediate
            // forms have dedicated opcodes.
            (">", Some(b), _) => {
                if signed { self.i_set3(Slt, dst, b, a) } else { self.i_set3(Sltu, dst, b, a) }
            }
            (">", None, Some(n)) => {
                if signed {
                    self.i_set2i(Sgti, dst, a, n as i64)
                } else {
                    self.i_set2i(Sgtui, dst, a, n as i64)
                }
            }
            (">=", Some(b), _) => {
                if signed { self.i_set3(Slte, dst, b, a) } else { self.i_set3(Slteu, dst, b, a) }
            }
            (">=", None, Some(n)) => {
                if signed {
                    self.i_set2i(Sgtei, dst, a, n as i64)
                } else {
                    self.i_set2i(Sgteui, dst, a, n as i64)
                }
            }
            // Logical connectives evaluate both sides and combine their
            // truth values.
            ("&&", Some(b), _) => {
                self.i_setz(Snz, dst, a)?;
                let t = self.alloc_reg(false)?;
                self.lock_reg(t);
                let r = (|| {
                    self.i_setz(Snz, t, b)?;
                    self.i_and(dst, dst, t)
                })();
                self.unlock_reg(t);
                r
            }
            ("||", Some(b), _) => {
                self.i_setz(Snz, dst, a)?;
                let t = self.alloc_reg(false)?;
                self.lock_reg(t);
                let r = (|| {
                    self.i_setz(Snz, t, b)?;
                    self.i_or(dst, dst, t)
                })();
                self.unlock_reg(t);
                r
            }
            _ => Err(self.err_internal(format!("unhandled native operator {op}"))),
        }
    }

    /// Constant-left operand: commutative operations swap into the plain
    /// immediate forms, the rest use their dedicated swapped-immediate
    /// opcodes, and constant-left comparisons flip direction.
    fn emit_binop_insn_swapped(
        &mut self,
        op: &str,
        dst: RegId,
        b: RegId,
        n: u64,
        signed: bool,
    ) -> LyraResult<()> {
        use Opcode::*;
        match op {
            "+" => self.i_addi(dst, b, n as i64),
            "*" => self.i_muli(dst, b, n),
            "&" => self.i_andi(dst, b, n),
            "|" => self.i_ori(dst, b, n),
            "^" => self.i_xori(dst, b, n),
            "==" => self.i_set2i(Seqi, dst, b, n as i64),
            "!=" => self.i_set2i(Snei, dst, b, n as i64),
            "/" => {
                if signed { self.i_divi2(dst, b, n as i64) } else { self.i_divui2(dst, b, n) }
            }
            "%" => {
                if signed { self.i_modi2(dst, b, n as i64) } else { self.i_modui2(dst, b, n) }
            }
            "<<" => self.i_slli2(dst, b, n),
            ">>" => {
                if signed { self.i_srai2(dst, b, n) } else { self.i_srli2(dst, b, n) }
            }
            // n < x is x > n, and so on.
            "<" => {
                if signed {
                    self.i_set2i(Sgti, dst, b, n as i64)
                } else {
                    self.i_set2i(Sgtui, dst, b, n as i64)
                }
            }
            "<=" => {
                if signed {
                    self.i_set2i(Sgtei, dst, b, n as i64)
                } else {
                    self.i_set2i(Sgteui, dst, b, n as i64)
                }
            }
            ">" => {
                if signed {
                    self.i_set2i(Slti, dst, b, n as i64)
                } else {
                    self.i_set2i(Sltui, dst, b, n as i64)
                }
            }
            ">=" => {
                if signed {
                    self.i_set2i(Sltei, dst, b, n as i64)
                } else {
                    self.i_set2i(Slteui, dst, b, n as i64)
                }
            }
            _ => Err(self.err_internal(format!("operator {op} has no swapped form"))),
        }
    }

    // ---- calls and overload resolution ----

    /// Call signature for overload resolution: `name|t1|t2|…|` with byref
    /// parameter types stripped of their trailing `*`.
    pub(crate) fn call_signature(name: &str, types: &[String]) -> String {
        let mut sig = String::from(name);
        sig.push('|');
        for t in types {
            sig.push_str(t);
            sig.push('|');
        }
        sig
    }

    /// First visible user function whose call-site matcher accepts the
    /// signature, in textual scope order.
    fn resolve_user_op(&mut self, name: &str, types: &[String]) -> Option<FuncId> {
        let sig = Self::call_signature(name, types);
        let candidates = self.candidate_funcs(name);
        for id in candidates {
            if let Some(pattern) = self.func(id).fcall_pattern.clone() {
                if self.matcher_accepts(&pattern, &sig) {
                    return Some(id);
                }
            }
        }
        None
    }

    /// Compile-and-cache wrapper around the pattern engine.
    pub(crate) fn matcher_accepts(&mut self, pattern: &str, sig: &str) -> bool {
        if !self.matcher_cache.contains_key(pattern) {
            match regex::Regex::new(pattern) {
                Ok(re) => {
                    self.matcher_cache.insert(pattern.to_string(), re);
                }
                Err(_) => return false,
            }
        }
        self.matcher_cache[pattern].is_match(sig)
    }

    /// Parse `name(arg, …)` and emit the call.
    fn parse_call(&mut self, name: &str, pos: usize) -> LyraResult<ExprVal> {
        self.expect_byte(b'(')?;
        let mut args = Vec::new();
        if self.peek() != b')' {
            loop {
                let arg = self.evaluate_expression(1)?;
                let arg = self.resolve_byref(arg)?;
                args.push(arg);
                if !self.accept_byte(b',') {
                    break;
                }
            }
        }
        self.expect_byte(b')')?;

        let types: Vec<String> = args.iter().map(|a| self.val_type(a)).collect();
        let callee = self
            .resolve_user_op(name, &types)
            .ok_or_else(|| {
                self.err_semantic_at(
                    format!(
                        "no function matches {}",
                        Self::call_signature(name, &types)
                    ),
                    pos,
                )
            })?;
        self.emit_user_call(callee, args, pos)
    }

    /// Emit a resolved call: store arguments into the callee's shared
    /// region, flush, jump-and-push, then read the result slot.
    pub(crate) fn emit_user_call(
        &mut self,
        callee: FuncId,
        args: Vec<ExprVal>,
        pos: usize,
    ) -> LyraResult<ExprVal> {
        self.func_mut(callee).was_used = true;

        let callee_f = self.func(callee).clone();
        let geom = self.frame_geom(callee);

        // Fixed parameters, then any variadic tail.
        let mut slots: Vec<(u32, u32, bool)> = Vec::new(); // offset, size, byref
        let mut next_offset = callee_f
            .retvar
            .map(|r| {
                let v = callee_f.var(r);
                round_up(v.size, GPR_SIZE)
            })
            .unwrap_or(0);
        for (i, arg) in args.iter().enumerate() {
            if let Some(&param) = callee_f.params.get(i) {
                let p = callee_f.var(param);
                let size = if p.byref { GPR_SIZE } else { round_up(p.size.max(1), GPR_SIZE) };
                slots.push((p.offset, size, p.byref));
                next_offset = next_offset.max(p.offset + size);
            } else {
                if !callee_f.variadic {
                    return Err(self.err_semantic_at(
                        format!("too many arguments for {}", callee_f.name),
                        pos,
                    ));
                }
                let t = self.val_type(arg);
                let size = round_up(self.sizeof_type(&t)?.max(1), GPR_SIZE);
                slots.push((next_offset, size, false));
                next_offset += size;
            }
        }

        // The sizing pass records the widest use of the callee's shared
        // region across call sites.
        if !self.is_emit() {
            let needed = next_offset;
            let f = self.func_mut(callee);
            if needed > f.shared_region_size {
                f.shared_region_size = needed;
            }
        }

        if self.emitting() {
            // Arguments land where the callee will see its shared region.
            // With the shared region at the frame top, the slot address
            // depends only on the callee's shared size: past the
            // return-address push, below this stack pointer.
            let shared_end = (lyra_ir::GPR_SIZE + geom.shared_size) as i64;
            for (arg, (offset, size, byref)) in args.iter().zip(&slots) {
                let slot = *offset as i64 - shared_end;
                if *byref {
                    let addr = self.val_address_to_reg(arg)?;
                    self.lock_reg(addr);
                    let r = self.i_st_gpr(addr, lyra_ir::REG_STACKPTR, slot);
                    self.unlock_reg(addr);
                    r?;
                } else if *size <= GPR_SIZE {
                    let reg = self.val_to_reg(arg)?;
                    self.lock_reg(reg);
                    let t = self.val_type(arg);
                    let width = self.sizeof_type(&t)?.clamp(1, GPR_SIZE);
                    let r = self.i_st(width, reg, lyra_ir::REG_STACKPTR, &[ImmPart::Value(slot)]);
                    self.unlock_reg(reg);
                    r?;
                } else {
                    // Aggregate by value: bulk copy into the slot.
                    let src = self.val_address_to_reg(arg)?;
                    self.lock_reg(src);
                    let dst = self.alloc_reg(false)?;
                    self.lock_reg(dst);
                    let count = self.alloc_reg(false)?;
                    self.lock_reg(count);
                    let r = (|| {
                        self.i_addi(dst, lyra_ir::REG_STACKPTR, slot)?;
                        self.load_imm(count, (*size / GPR_SIZE) as u64)?;
                        self.i_memcpy(dst, src, count)
                    })();
                    self.unlock_reg(count);
                    self.unlock_reg(dst);
                    self.unlock_reg(src);
                    r?;
                }
            }

            // The callee may reach any variable through pointers or its
            // lexical parents; memory must be current.
            self.flush_and_discard_all(crate::regalloc::FlushMode::FlushAndDiscardAll)?;

            if self.func(callee).stackframe_holder.is_some() {
                self.lock_reg(lyra_ir::REG_RETURNADDR);
                let r = self.i_jl_func(lyra_ir::REG_RETURNADDR, callee);
                self.unlock_reg(lyra_ir::REG_RETURNADDR);
                r?;
            } else {
                self.i_jpush_func(callee)?;
            }
        }

        if callee_f.rettype == "void" || callee_f.retvar.is_none() {
            self.free_call_dead_args();
            return Ok(ExprVal::NoRet);
        }

        // Read the result from the shared region's head.
        let rettype = callee_f.rettype.clone();
        let tmp = self.alloc_tempvar(&rettype)?;
        if self.emitting() {
            let slot = -((lyra_ir::GPR_SIZE + geom.shared_size) as i64);
            let width = self.sizeof_type(&rettype)?.clamp(1, GPR_SIZE);
            let reg = self.alloc_reg(false)?;
            self.i_ld(width, reg, lyra_ir::REG_STACKPTR, &[ImmPart::Value(slot)])?;
            let r = self.regfile().get_mut(reg);
            r.var = Some(tmp);
            r.dirty = true;
        }
        Ok(ExprVal::Var(tmp))
    }

    fn free_call_dead_args(&mut self) {
        // Argument tempvars die with the expression; nothing extra to do
        // here beyond what the expression boundary frees.
    }

    // ---- statement-level helpers ----

    /// Evaluate a full expression statement: expression, postfix drain,
    /// tempvar release.
    pub(crate) fn evaluate_expression_statement(&mut self) -> LyraResult<()> {
        self.evaluate_expression(1)?;
        self.drain_postfix_ops()?;
        self.free_tempvars();
        Ok(())
    }

    /// Evaluate an expression that must reduce to a compile-time constant.
    pub(crate) fn evaluate_constant(&mut self) -> LyraResult<u64> {
        let saved_probe = self.probe;
        self.probe = true;
        let result = self.evaluate_expression(1);
        self.probe = saved_probe;
        let val = result?;
        self.val_const(&val)
            .ok_or_else(|| self.err_semantic("expecting a constant expression"))
    }

    /// Evaluate a condition to a register, or to a constant when it folds.
    /// Conditions must be native, pointer or enum typed.
    pub(crate) fn evaluate_condition(&mut self) -> LyraResult<CondVal> {
        let pos = self.pos;
        let val = self.evaluate_expression(1)?;
        let val = self.resolve_byref(val)?;
        let typ = self.val_type(&val);
        if !is_native_or_pointer(&typ) && !is_enum(&typ) {
            return Err(self.err_semantic_at(
                format!("a condition cannot have type {typ}"),
                pos,
            ));
        }
        if let Some(n) = self.val_const(&val) {
            return Ok(CondVal::Const(n != 0));
        }
        // Deferred postfix updates run before any branch on the condition.
        let reg = self.val_to_reg(&val)?;
        self.lock_reg(reg);
        let drained = self.drain_postfix_ops();
        self.unlock_reg(reg);
        drained?;
        Ok(CondVal::Reg(reg))
    }
}

/// A condition either folded to a constant or lives in a register.
#[derive(Debug, Clone, Copy)]
pub(crate) enum CondVal {
    Const(bool),
    Reg(RegId),
}

/// Operators with a constant-left lowering that avoids materializing the
/// constant.
fn has_swapped_form(op: &str) -> bool {
    matches!(
        op,
        "+" | "*" | "&" | "|" | "^" | "==" | "!=" | "/" | "%" | "<<" | ">>" | "<" | "<=" | ">"
            | ">="
    )
}

fn fold_binop(op: &str, a: u64, b: u64, signed: bool) -> Option<u64> {
    Some(match op {
        "+" => a.wrapping_add(b),
        "-" => a.wrapping_sub(b),
        "*" => a.wrapping_mul(b),
        "/" => {
            if b == 0 {
                return None;
            }
            if signed { ((a as i64) / (b as i64)) as u64 } else { a / b }
        }
        "%" => {
            if b == 0 {
                return None;
            }
            if signed { ((a as i64) % (b as i64)) as u64 } else { a % b }
        }
        "&" => a & b,
        "|" => a | b,
        "^" => a ^ b,
        "<<" => a.wrapping_shl(b as u32),
        ">>" => {
            if signed {
                ((a as i64).wrapping_shr(b as u32)) as u64
            } else {
                a.wrapping_shr(b as u32)
            }
        }
        "==" => (a == b) as u64,
        "!=" => (a != b) as u64,
        "<" => if signed { ((a as i64) < (b as i64)) as u64 } else { (a < b) as u64 },
        "<=" => if signed { ((a as i64) <= (b as i64)) as u64 } else { (a <= b) as u64 },
        ">" => if signed { ((a as i64) > (b as i64)) as u64 } else { (a > b) as u64 },
        ">=" => if signed { ((a as i64) >= (b as i64)) as u64 } else { (a >= b) as u64 },
        "&&" => ((a != 0) && (b != 0)) as u64,
        "||" => ((a != 0) || (b != 0)) as u64,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binop_precedence_orders_c_like() {
        assert!(binop_prec("*") > binop_prec("+"));
        assert!(binop_prec("+") > binop_prec("<<"));
        assert!(binop_prec("<<") > binop_prec("<"));
        assert!(binop_prec("<") > binop_prec("=="));
        assert!(binop_prec("==") > binop_prec("&"));
        assert!(binop_prec("&") > binop_prec("^"));
        assert!(binop_prec("^") > binop_prec("|"));
        assert!(binop_prec("|") > binop_prec("&&"));
        assert!(binop_prec("&&") > binop_prec("||"));
        assert!(binop_prec("||") > binop_prec("="));
    }

    #[test]
    fn folding_matches_two_complement_semantics() {
        assert_eq!(fold_binop("+", u64::MAX, 1, false), Some(0));
        assert_eq!(fold_binop("/", 7, 2, false), Some(3));
        assert_eq!(fold_binop("/", (-7i64) as u64, 2, true), Some((-3i64) as u64));
        assert_eq!(fold_binop("/", 1, 0, false), None);
        assert_eq!(fold_binop("<", (-1i64) as u64, 1, true), Some(1));
        assert_eq!(fold_binop("<", (-1i64) as u64, 1, false), Some(0));
    }
}

//! Initializer lowering
//!
//! Scalars assign through the normal assignment path. Braced initializers
//! fill arrays (`[i] = expr`, positional, nested braces; indices
//! non-decreasing and in range) and aggregates (`.field = expr`,
//! multi-step `.a.b`, nested braces). A `static` variable's initializer
//! runs once: a zero-initialized global byte guards it.

use crate::expr::ExprVal;
use crate::parser::{Parser, VarKey};
use crate::regalloc::FlushMode;
use crate::types::{alignment_of, round_up, split_array};
use lyra_common::LyraResult;
use lyra_ir::{ImmPart, Opcode, Variable};

impl Parser<'_> {
    /// Parse the initializer following a declarator. The cursor sits on
    /// the first expression token or on `{`.
    pub(crate) fn parse_initializer(&mut self, key: VarKey, is_static: bool) -> LyraResult<()> {
        if !is_static {
            return self.parse_initializer_inner(key);
        }

        // One-time guard around a static initializer: a global byte,
        // zero until the first execution passes through.
        let flag_offset = self.alloc_global(1);
        self.status_vars.push(flag_offset);

        let label_skip = self.new_label_name();

        if self.emitting() {
            let (base, parts) = self.global_slot_address(flag_offset)?;
            self.lock_reg(base);
            let flag = self.alloc_reg(false)?;
            self.lock_reg(flag);
            let r = (|| {
                self.i_ld(1, flag, base, &parts)?;
                self.flush_and_discard_all(FlushMode::DoNotDiscard)?;
                self.i_branch1_label(Opcode::Jnz, flag, &label_skip)
            })();
            self.unlock_reg(flag);
            self.unlock_reg(base);
            r?;
        }

        self.parse_initializer_inner(key)?;
        self.drain_postfix_ops()?;

        if self.emitting() {
            let (base, parts) = self.global_slot_address(flag_offset)?;
            self.lock_reg(base);
            let one = self.alloc_reg(false)?;
            self.lock_reg(one);
            let r = (|| {
                self.i_li(one, 1)?;
                self.i_st(1, one, base, &parts)
            })();
            self.unlock_reg(one);
            self.unlock_reg(base);
            r?;
            self.flush_and_discard_all(FlushMode::FlushAndDiscardAll)?;
            self.place_label(&label_skip);
        }
        Ok(())
    }

    fn global_slot_address(&mut self, offset: u32) -> LyraResult<(lyra_ir::RegId, Vec<ImmPart>)> {
        let (base, fresh) = self.reg_for_role(crate::regalloc::RegRole::GlobalRegionAddr)?;
        if fresh {
            self.lock_reg(base);
            let r = self.i_afip(base, &[ImmPart::OffsetToGlobalRegion]);
            self.unlock_reg(base);
            r?;
        }
        Ok((base, vec![ImmPart::Value(offset as i64)]))
    }

    fn parse_initializer_inner(&mut self, key: VarKey) -> LyraResult<()> {
        self.skip_space();
        if self.peek() == b'{' {
            let typ = self.var_of(key).typ.clone();
            self.parse_braced_initializer(key, &typ)
        } else {
            let value = self.evaluate_expression(2)?;
            self.store_into(&ExprVal::Var(key), value)?;
            Ok(())
        }
    }

    fn parse_braced_initializer(&mut self, key: VarKey, typ: &str) -> LyraResult<()> {
        self.expect_byte(b'{')?;

        if let Some((elem, count)) = split_array(typ) {
            let elem = elem.to_string();
            self.parse_array_initializer(key, &elem, count)?;
        } else if self.find_typedef(typ).is_some() {
            self.parse_aggregate_initializer(key, typ)?;
        } else {
            return Err(self.err_semantic(format!("{typ} cannot take a braced initializer")));
        }

        self.expect_byte(b'}')?;
        Ok(())
    }

    fn parse_array_initializer(&mut self, key: VarKey, elem: &str, count: u64) -> LyraResult<()> {
        let stride = round_up(self.sizeof_type(elem)?.max(1), alignment_of(elem));
        let mut next_index = 0u64;

        loop {
            self.skip_space();
            if self.peek() == b'}' {
                return Ok(());
            }

            let pos = self.pos;
            let index = if self.peek() == b'[' {
                self.pos += 1;
                self.skip_space();
                let i = self.evaluate_constant()?;
                self.expect_byte(b']')?;
                self.accept_byte(b'=');
                i
            } else {
                next_index
            };

            if index < next_index {
                return Err(self.err_semantic_at("array initializer indices must not decrease", pos));
            }
            if index >= count {
                return Err(self.err_semantic_at(
                    format!("index {index} is out of bounds for {count} elements"),
                    pos,
                ));
            }

            let place = self.element_alias(key, (index * stride as u64) as u32, elem)?;
            self.skip_space();
            if self.peek() == b'{' {
                let elem_type = self.var_of(place).typ.clone();
                self.parse_braced_initializer(place, &elem_type)?;
            } else {
                let value = self.evaluate_expression(2)?;
                self.store_into(&ExprVal::Var(place), value)?;
            }

            next_index = index + 1;
            if !self.accept_byte(b',') {
                return Ok(());
            }
        }
    }

    fn parse_aggregate_initializer(&mut self, key: VarKey, typ: &str) -> LyraResult<()> {
        loop {
            self.skip_space();
            if self.peek() == b'}' {
                return Ok(());
            }

            let pos = self.pos;
            self.expect_byte(b'.')?;

            // Multi-step selection: `.a.b` walks member offsets.
            let mut cur_type = typ.to_string();
            let mut offset = 0u32;
            loop {
                let field = self.read_symbol();
                if field.is_empty() {
                    return Err(self.err_syntax("expecting a member name"));
                }
                self.skip_space();
                let member = self.find_member(&cur_type, &field).ok_or_else(|| {
                    self.err_semantic_at(format!("{cur_type} has no member {field}"), pos)
                })?;
                offset += member.offset;
                cur_type = member.typ.clone();
                if self.peek() == b'.' && !self.peek_at(1).is_ascii_digit() {
                    self.pos += 1;
                    continue;
                }
                break;
            }

            let place = self.element_alias(key, offset, &cur_type)?;
            self.skip_space();
            if self.peek() == b'{' {
                self.parse_braced_initializer(place, &cur_type)?;
            } else {
                self.accept_byte(b'=');
                self.skip_space();
                let value = self.evaluate_expression(2)?;
                self.store_into(&ExprVal::Var(place), value)?;
            }

            if !self.accept_byte(b',') {
                return Ok(());
            }
        }
    }

    /// Alias a slice of a variable's storage, as element or member
    /// initialization targets.
    fn element_alias(&mut self, key: VarKey, offset: u32, typ: &str) -> LyraResult<VarKey> {
        let parent = self.var_of(key).clone();
        let mut sub = Variable::new(format!("{}.{}", parent.name, offset), typ);
        sub.size = self.sizeof_type(typ)?;
        sub.offset = parent.offset + offset;
        sub.is_static = parent.is_static;
        sub.always_volatile = parent.always_volatile.clone();
        sub.scope_depth = parent.scope_depth;
        sub.scope_snapshot = parent.scope_snapshot.clone();
        self.discard_var_binding(key);
        let id = self.func_mut(key.0).push_var(sub);
        Ok((key.0, id))
    }
}

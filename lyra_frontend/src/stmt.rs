//! Statement parsing and control-flow lowering
//!
//! One entry point drives every context through a mode flag: function
//! bodies, argument lists, type bodies, single expressions, blocks and the
//! two signature-reading modes. Control statements create and resolve
//! labels, honoring the save/restore discipline for the surrounding loop
//! and switch context on every exit path.

use crate::expr::{CondVal, ExprVal};
use crate::parser::{Parser, SwitchBlock};
use crate::regalloc::FlushMode;
use crate::symbols::{SearchMode, Symbol};
use crate::types::{is_enum, is_native, round_up};
use crate::CompileFlags;
use lyra_common::LyraResult;
use lyra_ir::types::ENUM_NAME_PREFIX;
use lyra_ir::{ImmPart, Module, Opcode, TypeDef, Variable, GPR_SIZE};

/// Parsing context of [`Parser::parse_statement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    FunctionBody,
    FunctionArg,
    Struct,
    Pstruct,
    Union,
    SingleExpr,
    Block,
    /// Reading the argument types of a pointer-to-function type,
    /// appending to the carried type string.
    PointerToFunctionType,
    /// Reading a function signature the same way, with `|` separators.
    FunctionSignature,
}

impl Parser<'_> {
    /// Parse the whole source as the root function's body.
    pub fn parse_root(&mut self) -> LyraResult<()> {
        self.skip_space();
        self.install_root_variables()?;
        self.emit_prologue()?;

        while !self.at_end() {
            self.parse_statement(ParseMode::FunctionBody)?;
            self.skip_space();
        }

        if self.is_emit() {
            self.flush_and_discard_all(FlushMode::DoNotFlushRegForLocals)?;
        }
        if !self.body_already_returned() || self.has_dangling_end_jump(Module::ROOT) {
            self.emit_epilogue()?;
        }
        if self.is_emit() {
            self.emit_import_thunks()?;
        }
        self.resolve_labels(Module::ROOT)?;
        self.free_unused_functions();
        Ok(())
    }

    /// `arg`, `env`, the reserved loader slots and the driver's
    /// predeclared variables, injected before parsing.
    fn install_root_variables(&mut self) -> LyraResult<()> {
        let all_volatile = self.opts.flags.contains(CompileFlags::ALL_VAR_VOLATILE);

        let mut arg = Variable::new("arg", "u8***");
        arg.byref = true;
        arg.size = GPR_SIZE;
        arg.predeclared_id = 1;
        arg.offset = self.alloc_global(GPR_SIZE);
        self.func_mut(Module::ROOT).push_var(arg);

        let mut env = Variable::new("env", "u8***");
        env.byref = true;
        env.size = GPR_SIZE;
        env.predeclared_id = 2;
        env.offset = self.alloc_global(GPR_SIZE);
        self.func_mut(Module::ROOT).push_var(env);

        // Reserved slots: the syscall thunk pointer and the request
        // buffer pointer used by the page allocator lowering.
        let mut sys = Variable::new("", "u8*");
        sys.size = 2 * GPR_SIZE;
        sys.predeclared_id = 3;
        sys.offset = self.alloc_global(2 * GPR_SIZE);
        self.func_mut(Module::ROOT).push_var(sys);

        for (i, p) in self.opts.predeclared_vars.clone().iter().enumerate() {
            let id = i as u32 + 5;
            if id > lyra_ir::PAGE_SIZE {
                return Err(self.err_internal("too many predeclared variables"));
            }
            let mut v = Variable::new(p.name.clone(), "uint");
            v.byref = p.byref;
            v.has_callback = p.has_callback;
            v.predeclared_id = id;
            v.size = GPR_SIZE;
            v.offset = self.alloc_global(GPR_SIZE);
            // A callback implies the driver reads memory, so the value
            // must never live only in a register.
            if p.has_callback || all_volatile {
                v.always_volatile.set(true);
            }
            self.func_mut(Module::ROOT).push_var(v);
        }
        Ok(())
    }

    /// Declared-but-undefined functions become imports: a slot in the
    /// string region receives the callee address at load time and the
    /// function body indirects through it.
    fn emit_import_thunks(&mut self) -> LyraResult<()> {
        let ids: Vec<lyra_ir::FuncId> = self
            .module
            .iter()
            .map(|(id, _)| id)
            .filter(|&id| id != Module::ROOT)
            .collect();
        for id in ids {
            let f = self.func(id);
            if f.to_export && !f.is_defined {
                return Err(lyra_common::LyraError::linkage(
                    format!("function {} is exported but never defined", f.name),
                    self.position_of(f.decl_id.saturating_sub(lyra_ir::PAGE_SIZE) as usize),
                ));
            }
            if f.is_defined || !f.was_used || f.to_import != 0 {
                continue;
            }
            if self.opts.flags.contains(CompileFlags::NO_FUNCTION_IMPORT) {
                return Err(lyra_common::LyraError::linkage(
                    format!("function {} is declared but never defined", f.name),
                    self.position_of(f.decl_id.saturating_sub(lyra_ir::PAGE_SIZE) as usize),
                ));
            }

            // Space at the end of the string region for the loader-filled
            // address slot.
            let slot = self.string_region.len() as u32;
            self.string_region.extend_from_slice(&[0u8; GPR_SIZE as usize]);
            self.func_mut(id).to_import = slot + 1;

            let saved_cur = self.cur;
            self.cur = id;
            // afip %1, <string region + slot>; ld %2, %1;
            // add %1, %1, %2; jr %1
            self.lock_reg(1);
            self.lock_reg(2);
            let r = (|| {
                self.i_afip(1, &[ImmPart::OffsetToStringRegion, ImmPart::Value(slot as i64)])?;
                self.i_ld(GPR_SIZE, 2, 1, &[])?;
                self.i_add(1, 1, 2)?;
                self.i_jr(1)
            })();
            self.unlock_reg(2);
            self.unlock_reg(1);
            self.cur = saved_cur;
            r?;
        }
        Ok(())
    }

    /// Functions the sizing pass declared but nothing ever called are
    /// dropped from the module.
    fn free_unused_functions(&mut self) {
        if !self.is_emit() {
            return;
        }
        for f in &mut self.module.funcs {
            if !f.was_used && !f.is_defined && !f.to_export {
                f.name.clear();
                f.instrs.clear();
            }
        }
    }

    /// Whether a pending jump of `func` targets a label placed past the
    /// last emitted instruction; such a label needs the trailing epilogue
    /// to land on.
    pub(crate) fn has_dangling_end_jump(&self, func: lyra_ir::FuncId) -> bool {
        let len = self.func(func).instrs.len() as lyra_ir::InsnId;
        self.labels
            .get(&func)
            .map(|ctx| {
                ctx.pending
                    .iter()
                    .any(|(name, _)| ctx.defined.get(name) == Some(&len))
            })
            .unwrap_or(false)
    }

    /// Whether the current function's last instruction already returns
    /// control, making the fall-through exit unreachable.
    pub(crate) fn body_already_returned(&self) -> bool {
        if !self.emitting() {
            return false;
        }
        matches!(
            self.curfunc().instrs.last().map(|i| i.op),
            Some(Opcode::Jpop) | Some(Opcode::Jr)
        )
    }

    /// Parse one statement (or one type-body / argument-list element).
    pub(crate) fn parse_statement(&mut self, mode: ParseMode) -> LyraResult<()> {
        self.skip_space();

        match mode {
            ParseMode::Struct | ParseMode::Pstruct | ParseMode::Union => {
                return self.parse_member_declaration(mode);
            }
            ParseMode::FunctionArg => {
                return self.parse_parameter_declaration();
            }
            ParseMode::PointerToFunctionType | ParseMode::FunctionSignature => {
                return self.parse_signature_types(mode);
            }
            _ => {}
        }

        if self.peek() == b';' {
            self.pos += 1;
            self.skip_space();
            return Ok(());
        }

        if self.peek() == b'{' {
            return self.parse_block();
        }

        if self.check_keyword("if") {
            return self.parse_if();
        }
        if self.check_keyword("while") {
            return self.parse_while();
        }
        if self.check_keyword("do") {
            return self.parse_do_while();
        }
        if self.check_keyword("switch") {
            return self.parse_switch();
        }
        if self.check_keyword("break") {
            return self.parse_break();
        }
        if self.check_keyword("continue") {
            return self.parse_continue();
        }
        if self.check_keyword("return") {
            return self.parse_return();
        }
        if self.check_keyword("goto") {
            return self.parse_goto();
        }
        if self.check_keyword("throw") {
            return self.parse_throw();
        }
        if self.check_keyword("catch") {
            return self.parse_catch();
        }
        if self.check_keyword("asm") {
            return self.parse_asm();
        }

        // Label: an identifier directly followed by ':' in statement
        // position, provided it does not start a declaration.
        if let Some(()) = self.try_parse_label()? {
            return Ok(());
        }

        // Declarations: optional prefixes, a type builder or a type name.
        if self.try_parse_declaration()? {
            return Ok(());
        }

        // Anything else is an expression statement.
        self.evaluate_expression_statement()?;
        self.expect_byte(b';')?;
        Ok(())
    }

    fn parse_block(&mut self) -> LyraResult<()> {
        self.expect_byte(b'{')?;
        let saved_switch = self.switchblock.take();
        self.scope_entering();

        let result = (|| {
            while self.peek() != b'}' {
                if self.at_end() {
                    return Err(self.err_syntax("expecting '}'"));
                }
                self.parse_statement(ParseMode::Block)?;
                self.skip_space();
            }
            Ok(())
        })();

        self.scope_leaving();
        self.switchblock = saved_switch;
        result?;
        self.expect_byte(b'}')?;
        Ok(())
    }

    /// The statement after `if (…)` or a loop head: a block or a single
    /// statement.
    fn parse_controlled_statement(&mut self) -> LyraResult<()> {
        if self.peek() == b'{' {
            self.parse_block()
        } else {
            self.parse_statement(ParseMode::SingleExpr)
        }
    }

    fn parse_if(&mut self) -> LyraResult<()> {
        self.expect_byte(b'(')?;
        let cond = self.evaluate_condition()?;
        self.expect_byte(b')')?;

        let label_alt = self.new_label_name();
        let label_end = self.new_label_name();

        match cond {
            CondVal::Const(true) => {}
            CondVal::Const(false) => {
                self.i_j_label(&label_alt)?;
            }
            CondVal::Reg(reg) => {
                self.lock_reg(reg);
                let r = (|| {
                    self.flush_and_discard_all(FlushMode::FlushAndDiscardAll)?;
                    self.i_branch1_label(Opcode::Jz, reg, &label_alt)
                })();
                self.unlock_reg(reg);
                r?;
            }
        }
        self.free_tempvars();

        self.parse_controlled_statement()?;

        self.skip_space();
        if self.check_keyword("else") {
            if self.body_already_returned() {
                // The arm ended in a return; a jump over the else arm
                // would be unreachable.
            } else {
                self.flush_and_discard_all(FlushMode::FlushAndDiscardAll)?;
                self.i_j_label(&label_end)?;
            }
            self.place_label(&label_alt);

            if self.check_keyword("if") {
                self.parse_if()?;
            } else {
                self.parse_controlled_statement()?;
            }
            self.flush_and_discard_all(FlushMode::FlushAndDiscardAll)?;
            self.place_label(&label_end);
        } else {
            // Guard against a dangling statement being mistaken for an
            // else arm: the brace must be followed by a line break.
            if !self.newline_before_next_token() && !self.at_end() && self.peek() != b'}' {
                return Err(self.err_syntax(
                    "expecting a newline after '}' of an if() without else",
                ));
            }
            self.flush_and_discard_all(FlushMode::FlushAndDiscardAll)?;
            self.place_label(&label_alt);
        }
        Ok(())
    }

    fn parse_while(&mut self) -> LyraResult<()> {
        let label_continue = self.new_label_name();
        let label_end = self.new_label_name();

        let saved_continue = self.label_continue.replace(label_continue.clone());
        let saved_end = self.label_end_of_loop.replace(label_end.clone());

        let result = (|| {
            self.flush_and_discard_all(FlushMode::FlushAndDiscardAll)?;
            self.place_label(&label_continue);

            self.expect_byte(b'(')?;
            let cond = self.evaluate_condition()?;
            self.expect_byte(b')')?;

            match cond {
                CondVal::Const(true) => {}
                CondVal::Const(false) => {
                    self.i_j_label(&label_end)?;
                }
                CondVal::Reg(reg) => {
                    self.lock_reg(reg);
                    let r = (|| {
                        self.flush_and_discard_all(FlushMode::FlushAndDiscardAll)?;
                        self.i_branch1_label(Opcode::Jz, reg, &label_end)
                    })();
                    self.unlock_reg(reg);
                    r?;
                }
            }
            self.free_tempvars();

            self.parse_controlled_statement()?;

            self.flush_and_discard_all(FlushMode::FlushAndDiscardAll)?;
            self.i_j_label(&label_continue)?;
            self.place_label(&label_end);
            Ok(())
        })();

        self.label_continue = saved_continue;
        self.label_end_of_loop = saved_end;
        result
    }

    fn parse_do_while(&mut self) -> LyraResult<()> {
        let label_body = self.new_label_name();
        let label_continue = self.new_label_name();
        let label_end = self.new_label_name();

        let saved_continue = self.label_continue.replace(label_continue.clone());
        let saved_end = self.label_end_of_loop.replace(label_end.clone());

        let result = (|| {
            self.flush_and_discard_all(FlushMode::FlushAndDiscardAll)?;
            self.place_label(&label_body);

            self.parse_controlled_statement()?;
            self.skip_space();
            if !self.check_keyword("while") {
                return Err(self.err_syntax("expecting while() of a do-while"));
            }

            // `continue` inside the body jumps to the condition.
            self.flush_and_discard_all(FlushMode::FlushAndDiscardAll)?;
            self.place_label(&label_continue);

            self.expect_byte(b'(')?;
            let cond = self.evaluate_condition()?;
            self.expect_byte(b')')?;
            self.expect_byte(b';')?;

            match cond {
                CondVal::Const(false) => {}
                CondVal::Const(true) => {
                    self.i_j_label(&label_body)?;
                }
                CondVal::Reg(reg) => {
                    self.lock_reg(reg);
                    let r = (|| {
                        self.flush_and_discard_all(FlushMode::FlushAndDiscardAll)?;
                        self.i_branch1_label(Opcode::Jnz, reg, &label_body)
                    })();
                    self.unlock_reg(reg);
                    r?;
                }
            }
            self.free_tempvars();
            self.place_label(&label_end);
            Ok(())
        })();

        self.label_continue = saved_continue;
        self.label_end_of_loop = saved_end;
        result
    }

    fn parse_break(&mut self) -> LyraResult<()> {
        let label = self
            .label_end_of_loop
            .clone()
            .ok_or_else(|| self.err_semantic("break outside of a loop or switch"))?;
        self.expect_byte(b';')?;
        self.drain_postfix_ops()?;
        self.flush_and_discard_all(FlushMode::FlushAndDiscardAll)?;
        self.i_j_label(&label)?;
        Ok(())
    }

    fn parse_continue(&mut self) -> LyraResult<()> {
        let label = self
            .label_continue
            .clone()
            .ok_or_else(|| self.err_semantic("continue outside of a loop"))?;
        self.expect_byte(b';')?;
        self.drain_postfix_ops()?;
        self.flush_and_discard_all(FlushMode::FlushAndDiscardAll)?;
        self.i_j_label(&label)?;
        Ok(())
    }

    fn parse_return(&mut self) -> LyraResult<()> {
        self.skip_space();
        if self.peek() != b';' {
            let pos = self.pos;
            let retvar = self.curfunc().retvar.ok_or_else(|| {
                self.err_semantic_at("returning a value from a void function", pos)
            })?;
            let value = self.evaluate_expression(1)?;
            let cur = self.cur;
            self.store_into(&ExprVal::Var((cur, retvar)), value)?;
        }
        self.expect_byte(b';')?;
        self.drain_postfix_ops()?;
        self.free_tempvars();
        self.flush_and_discard_all(FlushMode::DoNotFlushRegForLocalsKeepReturnAddr)?;
        self.emit_epilogue()?;
        Ok(())
    }

    fn parse_goto(&mut self) -> LyraResult<()> {
        let name = self.read_symbol();
        if name.is_empty() {
            return Err(self.err_syntax("expecting a label name after goto"));
        }
        self.skip_space();
        self.expect_byte(b';')?;
        self.drain_postfix_ops()?;
        self.flush_and_discard_all(FlushMode::FlushAndDiscardAll)?;
        self.i_j_label(&name)?;
        Ok(())
    }

    /// `throw name;`: unwind ancestor stackframes to the declaring
    /// function and jump to its catchable-label. The label is searched
    /// strictly in parents, never the throwing function itself.
    fn parse_throw(&mut self) -> LyraResult<()> {
        let pos = self.pos;
        let name = self.read_symbol();
        if name.is_empty() {
            return Err(self.err_syntax("expecting a catchable-label name after throw"));
        }
        self.skip_space();
        self.expect_byte(b';')?;

        // The declaring ancestor may place its catch statement after this
        // nested function's definition; the sizing pass collected every
        // declaration, so the emission pass can search it.
        let declares = |me: &Self, f: lyra_ir::FuncId| -> bool {
            if me
                .declared_catchables
                .get(&f)
                .map(|names| names.contains(&name))
                .unwrap_or(false)
            {
                return true;
            }
            let decl_id = me.func(f).decl_id;
            me.pass1_func(decl_id)
                .map(|p1| p1.catchables.contains(&name))
                .unwrap_or(false)
        };

        let mut owner = self.curfunc().parent;
        let mut delta = 1u32;
        let target = loop {
            match owner {
                Some(f) => {
                    if declares(self, f) {
                        break Some(f);
                    }
                    owner = self.func(f).parent;
                    delta += 1;
                }
                None => {
                    if self.is_emit() {
                        return Err(self.err_semantic_at(
                            format!("no parent function declares catchable-label {name}"),
                            pos,
                        ));
                    }
                    // The sizing pass cannot see catch statements that
                    // come later; the emission pass settles it.
                    break None;
                }
            }
        };

        self.drain_postfix_ops()?;
        self.flush_and_discard_all(FlushMode::FlushAndDiscardAll)?;
        if target.is_some() {
            // A function borrowing its caller's frame already stands in
            // its parent's frame; the walk starts one level nearer.
            let levels = if self.curfunc().stackframe_holder.is_some() {
                delta.saturating_sub(1)
            } else {
                delta
            };
            self.emit_set_stackptr_to_ancestor_frame(levels)?;
        }

        if self.emitting() {
            if let Some(target) = target {
                let insn = self.new_insn(Opcode::J)?;
                let thrower = self.cur;
                self.labels
                    .entry(target)
                    .or_default()
                    .pending_throws
                    .push((name, thrower, insn));
            }
        }
        Ok(())
    }

    /// `catch name1, name2, …;` places catchable-labels at this point of
    /// the current function.
    fn parse_catch(&mut self) -> LyraResult<()> {
        loop {
            let name = self.read_symbol();
            if name.is_empty() {
                return Err(self.err_syntax("expecting a catchable-label name"));
            }
            self.skip_space();

            let cur = self.cur;
            self.declared_catchables.entry(cur).or_default().push(name.clone());

            if self.is_emit() {
                self.flush_and_discard_all(FlushMode::FlushAndDiscardAll)?;
                let at = self.curfunc().instrs.len() as lyra_ir::InsnId;
                let ctx = self.labels.entry(cur).or_default();
                if ctx.catchables.insert(name.clone(), Some(at)).flatten().is_some() {
                    return Err(self.err_semantic(format!("catchable-label {name} redeclared")));
                }
            }

            if !self.accept_byte(b',') {
                break;
            }
        }
        self.expect_byte(b';')?;
        Ok(())
    }

    /// `name:` places a label; all registers flush so any jump to it sees
    /// memory as the truth.
    fn try_parse_label(&mut self) -> LyraResult<Option<()>> {
        let saved = self.pos;
        let name = self.read_symbol();
        if name.is_empty() {
            self.pos = saved;
            return Ok(None);
        }
        if self.peek() != b':' || self.peek_at(1) == b':' {
            self.pos = saved;
            return Ok(None);
        }
        // A declaration like `u32 x;` never has ':' right after the first
        // symbol, so this is unambiguous.
        self.pos += 1;
        self.skip_space();
        self.flush_and_discard_all(FlushMode::FlushAndDiscardAll)?;
        self.place_label(&name);
        Ok(Some(()))
    }

    // ---- switch ----

    /// Lower `switch` to a dense jump table: subtract the lowest case,
    /// bounds-check, index a run of fixed-stride jumps.
    fn parse_switch(&mut self) -> LyraResult<()> {
        self.expect_byte(b'(')?;
        let pos = self.pos;
        let value = self.evaluate_expression(1)?;
        self.expect_byte(b')')?;

        let expr_type = self.val_type(&value);
        if !is_native(&expr_type) && !is_enum(&expr_type) {
            return Err(self.err_semantic_at(
                format!("switch needs an enum or integer, not {expr_type}"),
                pos,
            ));
        }

        // The value survives the case bodies in a tempvar home.
        let holder = self.val_to_var(value)?;
        if self.emitting() {
            if let Some(reg) = self.regfile().find_bound(holder) {
                if self.regfile().get(reg).dirty {
                    self.flush_reg_to_var(reg, holder)?;
                }
            }
        }
        self.drain_postfix_ops()?;

        let label_dispatch = self.new_label_name();
        let label_end = self.new_label_name();

        let saved_switch = self.switchblock.replace(SwitchBlock {
            expr_type: expr_type.clone(),
            default_case: None,
            cases: Default::default(),
        });
        // `break` inside a switch exits it.
        let saved_break = self.label_end_of_loop.replace(label_end.clone());

        let result = (|| {
            self.flush_and_discard_all(FlushMode::FlushAndDiscardAll)?;
            self.i_j_label(&label_dispatch)?;

            self.expect_byte(b'{')?;
            while self.peek() != b'}' {
                if self.at_end() {
                    return Err(self.err_syntax("expecting '}' of switch"));
                }
                if self.check_keyword("case") {
                    let label_case = self.new_label_name();
                    loop {
                        let case_pos = self.pos;
                        let n = self.evaluate_constant()?;
                        if n > u32::MAX as u64 {
                            return Err(self.err_semantic_at(
                                "case value does not fit the target word",
                                case_pos,
                            ));
                        }
                        if self.is_emit() {
                            let block = self.switchblock.as_mut().unwrap();
                            if block.cases.insert(n, label_case.clone()).is_some() {
                                return Err(
                                    self.err_semantic_at("duplicate case value", case_pos)
                                );
                            }
                        }
                        if !self.accept_byte(b',') {
                            break;
                        }
                    }
                    self.expect_byte(b':')?;
                    self.flush_and_discard_all(FlushMode::FlushAndDiscardAll)?;
                    self.place_label(&label_case);
                    self.parse_block()?;
                    self.flush_and_discard_all(FlushMode::FlushAndDiscardAll)?;
                    self.i_j_label(&label_end)?;
                } else if self.check_keyword("default") {
                    self.expect_byte(b':')?;
                    let label_default = self.new_label_name();
                    if self.is_emit() {
                        let block = self.switchblock.as_mut().unwrap();
                        if block.default_case.is_some() {
                            return Err(self.err_semantic("duplicate default case"));
                        }
                        block.default_case = Some(label_default.clone());
                    }
                    self.flush_and_discard_all(FlushMode::FlushAndDiscardAll)?;
                    self.place_label(&label_default);
                    self.parse_block()?;
                    self.flush_and_discard_all(FlushMode::FlushAndDiscardAll)?;
                    self.i_j_label(&label_end)?;
                } else {
                    return Err(self.err_syntax("expecting case or default"));
                }
                self.skip_space();
            }
            self.expect_byte(b'}')?;

            // Dispatch section.
            self.place_label(&label_dispatch);
            self.emit_switch_dispatch(holder, &label_end)?;
            self.place_label(&label_end);
            Ok(())
        })();

        self.label_end_of_loop = saved_break;
        let block = std::mem::replace(&mut self.switchblock, saved_switch);
        drop(block);
        self.free_tempvars();
        result
    }

    fn emit_switch_dispatch(&mut self, holder: crate::parser::VarKey, label_end: &str) -> LyraResult<()> {
        if !self.emitting() {
            return Ok(());
        }
        let block = self.switchblock.clone().unwrap();
        let fallback = block.default_case.clone().unwrap_or_else(|| label_end.to_string());

        if block.cases.is_empty() {
            self.i_j_label(&fallback)?;
            return Ok(());
        }

        let lowest = *block.cases.keys().next().unwrap();
        let highest = *block.cases.keys().next_back().unwrap();
        let range = highest - lowest;

        let stride_log2 = self.opts.jumpcase_clog2sz;
        let label_table = self.new_label_name();

        let value = self.var_to_reg(holder)?;
        self.lock_reg(value);
        let idx = self.alloc_reg(false)?;
        self.lock_reg(idx);
        let base = self.alloc_reg(false)?;
        self.lock_reg(base);

        let bound = self.alloc_reg(false)?;
        self.lock_reg(bound);

        let result = (|| {
            self.i_addi(idx, value, -(lowest as i64))?;
            // In range: idx <= highest - lowest, unsigned.
            self.load_imm(bound, range)?;
            self.i_branch2_label(Opcode::Jlteu, idx, bound, &label_table)?;
            self.i_j_label(&fallback)?;

            self.place_label(&label_table);
            // Table base, then base + (idx << stride). The base address
            // points at the first table entry, known only once the
            // sequence is out (strength reduction can drop instructions).
            let afip_id = self.i_afip(base, &[])?;
            self.i_slli(idx, idx, stride_log2 as u64)?;
            self.i_add(base, base, idx)?;
            self.i_jr(base)?;
            let table_first = self.curfunc().instrs.len() as lyra_ir::InsnId;
            let cur_func = self.cur;
            self.curfunc_mut().insn_mut(afip_id).push_imm(ImmPart::OffsetToInstruction(
                lyra_ir::imm::InsnRef { func: cur_func, insn: table_first },
            ));

            // The dense run of fixed-stride jumps.
            for v in lowest..=highest {
                let target = block.cases.get(&v).cloned().unwrap_or_else(|| fallback.clone());
                let j = self.i_j_label(&target)?;
                self.curfunc_mut().insn_mut(j).binsz = 1 << stride_log2;
            }
            Ok(())
        })();

        self.unlock_reg(base);
        self.unlock_reg(bound);
        self.unlock_reg(idx);
        self.unlock_reg(value);
        result
    }

    // ---- asm ----

    /// `asm { op …; op …; }` or `asm op …;`. Registers named `%n` are
    /// reserved for the duration of the block.
    fn parse_asm(&mut self) -> LyraResult<()> {
        let block = self.accept_byte(b'{');
        loop {
            self.skip_space();
            if block && self.peek() == b'}' {
                self.pos += 1;
                self.skip_space();
                break;
            }
            self.parse_asm_statement()?;
            if !block {
                break;
            }
        }
        self.unreserve_all_regs();
        Ok(())
    }

    fn parse_asm_statement(&mut self) -> LyraResult<()> {
        let pos = self.pos;
        let mnemonic = self.read_symbol();
        if mnemonic.is_empty() {
            return Err(self.err_syntax("expecting an assembly mnemonic"));
        }
        self.skip_space();

        // `byte n, n, …;` embeds opaque machine code verbatim.
        if mnemonic == "byte" {
            let mut payload = Vec::new();
            while self.peek() != b';' {
                let n = self
                    .read_number()?
                    .ok_or_else(|| self.err_syntax("expecting a byte value"))?;
                if n > 0xff {
                    return Err(self.err_semantic("machine code bytes must fit in 8 bits"));
                }
                payload.push(n as u8);
                self.skip_space();
                if !self.accept_byte(b',') {
                    break;
                }
            }
            self.expect_byte(b';')?;
            if self.emitting() {
                self.i_machinecode(payload)?;
            }
            return Ok(());
        }

        let op = asm_opcode(&mnemonic)
            .ok_or_else(|| self.err_syntax_at(format!("unknown mnemonic {mnemonic}"), pos))?;

        let mut regs = Vec::new();
        let mut imm: Option<i64> = None;
        while self.peek() != b';' {
            if self.peek() == b'%' {
                self.pos += 1;
                let n = self
                    .read_number()?
                    .ok_or_else(|| self.err_syntax("expecting a register number after '%'"))?;
                if n >= crate::regalloc::GPR_COUNT as u64 + 1 {
                    return Err(self.err_semantic("no such register"));
                }
                regs.push(n as lyra_ir::RegId);
                if n != 0 && self.emitting() {
                    self.reserve_reg(n as lyra_ir::RegId);
                }
            } else if self.peek() == b'-' || self.peek().is_ascii_digit() || self.peek() == b'\'' {
                let neg = self.accept_byte(b'-');
                let n = self
                    .read_number()?
                    .ok_or_else(|| self.err_syntax("expecting an immediate"))?;
                imm = Some(if neg { -(n as i64) } else { n as i64 });
            } else {
                return Err(self.err_syntax("expecting a register or immediate"));
            }
            self.skip_space();
            if !self.accept_byte(b',') {
                break;
            }
        }
        self.expect_byte(b';')?;

        if self.emitting() {
            let id = self.new_insn(op)?;
            let insn = self.curfunc_mut().insn_mut(id);
            let mut it = regs.into_iter();
            insn.r1 = it.next().unwrap_or(0);
            insn.r2 = it.next().unwrap_or(0);
            insn.r3 = it.next().unwrap_or(0);
            if let Some(n) = imm {
                insn.push_imm(ImmPart::Value(n));
            }
        }
        Ok(())
    }

    // ---- declarations (variables, types, functions) ----

    /// Attempt a declaration at the cursor. Returns false when the
    /// statement is not a declaration, leaving the cursor untouched.
    pub(crate) fn try_parse_declaration(&mut self) -> LyraResult<bool> {
        let saved = self.pos;

        let mut is_export = self.export_inferred;
        let mut is_static = false;
        loop {
            if self.check_keyword("export") {
                is_export = true;
            } else if self.check_keyword("static") {
                is_static = true;
            } else {
                break;
            }
        }

        if self.check_keyword("struct") {
            return self.parse_aggregate_declaration(ParseMode::Struct, None).map(|_| true);
        }
        if self.check_keyword("pstruct") {
            return self.parse_aggregate_declaration(ParseMode::Pstruct, None).map(|_| true);
        }
        if self.check_keyword("union") {
            return self.parse_aggregate_declaration(ParseMode::Union, None).map(|_| true);
        }
        if self.check_keyword("enum") {
            return self.parse_enum_declaration().map(|_| true);
        }

        let decl_start = self.pos;
        let typ = match self.try_read_type()? {
            Some(t) => t,
            None => {
                if is_static || (is_export && !self.export_inferred) {
                    return Err(self.err_syntax("expecting a type after the declaration prefix"));
                }
                self.pos = saved;
                return Ok(false);
            }
        };

        self.parse_declarators(&typ, is_export, is_static, decl_start)?;
        Ok(true)
    }

    /// Read a type name (with `typeof(e)` and pointer/array specs) when
    /// the cursor is on one.
    pub(crate) fn try_read_type(&mut self) -> LyraResult<Option<String>> {
        let saved = self.pos;
        let name = self.read_symbol();
        if name.is_empty() {
            return Ok(None);
        }

        let mut base = if name == "typeof" {
            self.skip_space();
            self.expect_byte(b'(')?;
            let saved_probe = self.probe;
            self.probe = true;
            let val = self.evaluate_expression(1);
            self.probe = saved_probe;
            let val = val?;
            self.expect_byte(b')')?;
            self.val_type(&val)
        } else if name == "void" || is_native(&name) {
            name
        } else {
            let enum_name = format!("{ENUM_NAME_PREFIX}{name}");
            if self.find_typedef(&name).is_some() {
                name
            } else if self.find_typedef(&enum_name).is_some() {
                enum_name
            } else {
                self.pos = saved;
                return Ok(None);
            }
        };

        self.skip_space();
        self.read_type_spec(&mut base)?;

        // A type followed by '(' is a pointer-to-function type; the type
        // read so far is its return type. Chained parentheses read
        // functions returning pointers to functions.
        if self.peek() == b'(' {
            let saved = std::mem::replace(&mut self.contain_parsed, base);
            let result = (|| {
                while self.peek() == b'(' {
                    self.pos += 1;
                    self.skip_space();
                    self.contain_parsed.push('(');
                    if self.peek() != b')' {
                        self.parse_statement(ParseMode::PointerToFunctionType)?;
                    } else {
                        self.contain_parsed.push(')');
                        self.pos += 1;
                        self.skip_space();
                    }
                    let mut chained = std::mem::take(&mut self.contain_parsed);
                    self.read_type_spec(&mut chained)?;
                    self.contain_parsed = chained;
                }
                Ok(())
            })();
            base = std::mem::replace(&mut self.contain_parsed, saved);
            result?;
        }

        Ok(Some(base))
    }

    /// Append pointer and array specifications to a type string.
    pub(crate) fn read_type_spec(&mut self, typ: &mut String) -> LyraResult<()> {
        loop {
            if self.peek() == b'*' {
                self.pos += 1;
                typ.push('*');
                self.skip_space();
            } else if self.peek() == b'[' {
                let pos = self.pos;
                self.pos += 1;
                self.skip_space();
                let n = self.evaluate_constant()?;
                if n == 0 {
                    return Err(self.err_semantic_at("array size must be a non-null constant", pos));
                }
                self.expect_byte(b']')?;
                typ.push('[');
                typ.push_str(&n.to_string());
                typ.push(']');
            } else {
                return Ok(());
            }
        }
    }

    /// One or more declarators after a type, each optionally byref, a
    /// bitfield, initialized, or a function declaration.
    fn parse_declarators(
        &mut self,
        typ: &str,
        is_export: bool,
        is_static: bool,
        decl_start: usize,
    ) -> LyraResult<()> {
        loop {
            let byref = self.accept_byte(b'&');

            let is_operator = self.check_keyword("operator");
            let name = if is_operator {
                let op = self.read_operator_symbol()?;
                self.skip_space();
                op
            } else {
                let n = self.read_symbol();
                self.skip_space();
                n
            };
            if name.is_empty() {
                self.reverse_skip_space();
                return Err(self.err_syntax("expecting a name to declare"));
            }

            if self.peek() == b'(' {
                // Function declaration or definition.
                self.func_declaration(typ, &name, byref, is_export, is_operator, decl_start)?;
                return Ok(());
            }

            if typ == "void" {
                return Err(self.err_semantic("a variable cannot have type void"));
            }
            if byref {
                return Err(self.err_semantic("byref is only valid on parameters"));
            }

            let mut var_type = typ.to_string();
            self.read_type_spec(&mut var_type)?;

            self.declare_variable(&var_type, &name, is_static)?;

            if !self.accept_byte(b',') {
                break;
            }
        }
        self.expect_byte(b';')?;
        Ok(())
    }

    /// The operator symbol after the `operator` keyword.
    fn read_operator_symbol(&mut self) -> LyraResult<String> {
        const OPS: &[&str] = &[
            "<<=", ">>=", "==", "!=", "<=", ">=", "&&", "||", "<<", ">>", "+=", "-=", "*=", "/=",
            "%=", "&=", "|=", "^=", "++", "--", "=", "<", ">", "+", "-", "*", "/", "%", "&", "|",
            "^", "!", "~",
        ];
        for op in OPS {
            let b = op.as_bytes();
            if self.src.len() - self.pos >= b.len() && &self.src[self.pos..self.pos + b.len()] == b {
                self.pos += b.len();
                return Ok(op.to_string());
            }
        }
        Err(self.err_syntax("expecting an operator symbol after the operator keyword"))
    }

    /// Declare a variable in the current function, with optional
    /// initializer.
    fn declare_variable(&mut self, typ: &str, name: &str, is_static: bool) -> LyraResult<()> {
        if self
            .search_symbol(name, SearchMode::InCurrentScopeOnly)
            .is_some()
        {
            // Same name at the same depth in the same scope instance only.
            if let Some(Symbol::Variable(key)) = self.search_symbol(name, SearchMode::InCurrentScopeOnly) {
                let v = self.var_of(key);
                if v.scope_depth == self.scope_current && v.scope_snapshot == self.scope_snapshot_now()
                {
                    return Err(self.err_semantic(format!("duplicate symbol {name}")));
                }
            }
        }

        let size = self.sizeof_type(typ)?;
        let mut v = Variable::new(name, typ);
        v.size = size;
        v.is_static = is_static;
        v.scope_depth = self.scope_current;
        v.scope_snapshot = self.scope_snapshot_now();
        if self.opts.flags.contains(CompileFlags::ALL_VAR_VOLATILE) {
            v.always_volatile.set(true);
        }

        let key = if is_static || self.cur == Module::ROOT {
            v.offset = self.alloc_global(size);
            if is_static && self.cur != Module::ROOT {
                // Statics of nested functions still live in the global
                // region but stay findable only through their scope.
                let id = self.curfunc_mut().push_var(v);
                (self.cur, id)
            } else {
                let id = self.func_mut(Module::ROOT).push_var(v);
                (Module::ROOT, id)
            }
        } else {
            v.offset = self.alloc_local(size);
            let id = self.curfunc_mut().push_var(v);
            (self.cur, id)
        };

        self.skip_space();
        if self.peek() == b'=' && self.peek_at(1) != b'=' {
            self.pos += 1;
            self.skip_space();
            self.parse_initializer(key, is_static)?;
        } else if self.peek() == b'{' {
            self.parse_initializer(key, is_static)?;
        }

        self.drain_postfix_ops()?;
        self.free_tempvars();
        Ok(())
    }

    // ---- aggregate and enum type declarations ----

    /// `struct|pstruct|union name[:base] { members }`, or an anonymous
    /// form inside another type, laid out per the enclosing kind.
    fn parse_aggregate_declaration(
        &mut self,
        mode: ParseMode,
        enclosing: Option<ParseMode>,
    ) -> LyraResult<()> {
        let name = self.read_symbol();
        self.skip_space();

        let anonymous = name.is_empty();
        if anonymous && self.current_type.is_none() {
            return Err(
                self.err_syntax("an anonymous type is only valid inside another type")
            );
        }

        let type_name = if anonymous {
            self.tempvar_counter += 1;
            format!("$anon{}", self.tempvar_counter)
        } else {
            name.clone()
        };

        let base = if self.accept_byte(b':') {
            let b = self.read_symbol();
            if b.is_empty() {
                return Err(self.err_syntax("expecting a base type name after ':'"));
            }
            self.skip_space();
            Some(b)
        } else {
            None
        };

        if self.peek() != b'{' {
            // Forward declaration.
            if anonymous {
                return Err(self.err_syntax("expecting '{' of an anonymous type"));
            }
            let mut t = TypeDef::new(&type_name);
            t.scope_depth = self.scope_current;
            t.scope_snapshot = self.scope_snapshot_now();
            self.curfunc_mut().types.push(t);
            self.expect_byte(b';')?;
            return Ok(());
        }
        self.expect_byte(b'{')?;

        let mut t = TypeDef::new(&type_name);
        t.scope_depth = self.scope_current;
        t.scope_snapshot = self.scope_snapshot_now();

        // Single inheritance: the base's members come first and the
        // derived layout continues past them.
        if let Some(base_name) = &base {
            let b = self
                .find_typedef(base_name)
                .cloned()
                .ok_or_else(|| self.err_semantic(format!("unknown base type {base_name}")))?;
            if b.size == 0 {
                return Err(self.err_semantic(format!("base type {base_name} is not defined")));
            }
            t.members = b.members.clone();
            t.size = b.size;
            t.base = Some(base_name.clone());
        }

        let saved_type = self.current_type.replace(t);
        let result = (|| {
            while self.peek() != b'}' {
                if self.at_end() {
                    return Err(self.err_syntax("expecting '}' of a type definition"));
                }
                self.parse_statement(mode)?;
                self.skip_space();
            }
            Ok(())
        })();
        let mut t = self.current_type.take().unwrap();
        self.current_type = saved_type;
        result?;
        self.expect_byte(b'}')?;

        if t.members.is_empty() {
            return Err(self.err_semantic("a type needs at least one member"));
        }

        // Round the size so arrays of this type keep native alignment;
        // packed layouts keep their exact byte count.
        if mode != ParseMode::Pstruct {
            let align = t
                .members
                .iter()
                .map(|m| crate::types::alignment_of(&m.typ))
                .max()
                .unwrap_or(1);
            t.size = round_up(t.size, align);
        }

        let t = self.adjust_offsets_of_type_members(t);

        if anonymous {
            // Register the type, then add the anonymous member variable
            // to the enclosing type.
            let enclosing = enclosing
                .ok_or_else(|| self.err_syntax("an anonymous type needs an enclosing type"))?;
            let size = t.size;
            let tname = t.name.clone();
            self.curfunc_mut().types.push(t);
            self.add_member_variable(enclosing, "", &tname, size, 0)?;
        } else {
            self.curfunc_mut().types.push(t);
            self.skip_space();
            self.accept_byte(b';');
        }
        Ok(())
    }

    /// `enum name { A, B = expr, C };` — enumerators become compile-time
    /// constants of the enum type.
    fn parse_enum_declaration(&mut self) -> LyraResult<()> {
        let name = self.read_symbol();
        if name.is_empty() {
            return Err(self.err_syntax("expecting an enum name"));
        }
        self.skip_space();
        let type_name = format!("{ENUM_NAME_PREFIX}{name}");

        self.expect_byte(b'{')?;

        let mut t = TypeDef::new(&type_name);
        t.size = GPR_SIZE;
        t.scope_depth = self.scope_current;
        t.scope_snapshot = self.scope_snapshot_now();
        self.curfunc_mut().types.push(t);

        let mut next = 0u64;
        loop {
            let ename = self.read_symbol();
            if ename.is_empty() {
                return Err(self.err_syntax("expecting an enumerator name"));
            }
            self.skip_space();
            if self.accept_byte(b'=') {
                next = self.evaluate_constant()?;
            }

            let mut v = Variable::new(&ename, &type_name);
            v.isnumber = true;
            v.numbervalue = next;
            v.scope_depth = self.scope_current;
            v.scope_snapshot = self.scope_snapshot_now();
            self.curfunc_mut().push_var(v);
            next = next.wrapping_add(1);

            if !self.accept_byte(b',') {
                break;
            }
            self.skip_space();
            if self.peek() == b'}' {
                break;
            }
        }
        self.expect_byte(b'}')?;
        self.accept_byte(b';');
        Ok(())
    }

    /// A member declaration inside a struct, pstruct or union body.
    fn parse_member_declaration(&mut self, mode: ParseMode) -> LyraResult<()> {
        if self.check_keyword("struct") {
            return self.parse_aggregate_declaration(ParseMode::Struct, Some(mode));
        }
        if self.check_keyword("pstruct") {
            return self.parse_aggregate_declaration(ParseMode::Pstruct, Some(mode));
        }
        if self.check_keyword("union") {
            return self.parse_aggregate_declaration(ParseMode::Union, Some(mode));
        }

        let typ = self
            .try_read_type()?
            .ok_or_else(|| self.err_syntax("expecting a member type"))?;

        loop {
            let name = self.read_symbol();
            if name.is_empty() {
                return Err(self.err_syntax("expecting a member name"));
            }
            self.skip_space();

            let mut member_type = typ.clone();
            self.read_type_spec(&mut member_type)?;

            // Bitfield: `name:N` inside struct/pstruct on a native type.
            let mut bitselect = 0u64;
            if self.peek() == b':' {
                if mode == ParseMode::Union {
                    return Err(self.err_semantic("bitfields are not valid inside an union"));
                }
                if !is_native(&member_type) {
                    return Err(self.err_semantic("a bitfield needs a native integer type"));
                }
                self.pos += 1;
                self.skip_space();
                let pos = self.pos;
                let bits = self.evaluate_constant()?;
                let size_bits = self.sizeof_type(&member_type)? as u64 * 8;
                if bits == 0 || bits >= size_bits {
                    return Err(self.err_semantic_at(
                        "bitfield width must be smaller than its type",
                        pos,
                    ));
                }
                bitselect = ((1u64 << bits) - 1) << self.next_bitfield_shift(&member_type, bits)?;
            }

            let size = self.sizeof_type(&member_type)?;
            self.add_member_variable(mode, &name, &member_type, size, bitselect)?;

            if !self.accept_byte(b',') {
                break;
            }
        }
        self.expect_byte(b';')?;
        Ok(())
    }

    /// Bit position where the next bitfield continues within the current
    /// type's trailing native member, packing right-to-left. A field that
    /// does not fit the remaining bits starts a fresh word.
    fn next_bitfield_shift(&mut self, typ: &str, bits: u64) -> LyraResult<u64> {
        let t = self.current_type.as_ref().unwrap();
        if let Some(last) = t.members.last() {
            if last.typ == typ && last.bitselect != 0 {
                let used = 64 - last.bitselect.leading_zeros() as u64;
                let size_bits = self.sizeof_type(typ)? as u64 * 8;
                if used + bits <= size_bits {
                    return Ok(used);
                }
            }
        }
        Ok(0)
    }

    /// Append a member to the type being built, laying it out per the
    /// type kind: aligned for struct, byte-tight for pstruct, overlaid
    /// for union.
    fn add_member_variable(
        &mut self,
        mode: ParseMode,
        name: &str,
        typ: &str,
        size: u32,
        bitselect: u64,
    ) -> LyraResult<()> {
        let t = self.current_type.as_mut().unwrap();

        if !name.is_empty() && t.members.iter().any(|m| m.name == name) {
            return Err(lyra_common::LyraError::semantic(
                format!("duplicate member {name}"),
                self.position(),
            ));
        }

        let mut m = Variable::new(name, typ);
        m.size = size;
        m.bitselect = bitselect;

        if bitselect != 0 && bitselect.trailing_zeros() > 0 {
            // Continuation of the previous bitfield word: share its
            // offset and consume no new space.
            let prev_offset = t.members.last().map(|p| p.offset).unwrap_or(0);
            m.offset = prev_offset;
            t.members.push(m);
            return Ok(());
        }

        let offset = match mode {
            ParseMode::Union => 0,
            ParseMode::Pstruct => t.size,
            _ => round_up(t.size, crate::types::alignment_of(typ)),
        };
        m.offset = offset;
        t.size = t.size.max(offset + size);
        t.members.push(m);
        Ok(())
    }

    /// Argument types of a pointer-to-function type or a function
    /// signature, appended to the carried type string up to and including
    /// the closing parenthesis. A symbol after an argument type is
    /// clarification only and is skipped; `&` marks a byref argument in
    /// the pointer-to-function encoding and is ignored in signatures.
    fn parse_signature_types(&mut self, mode: ParseMode) -> LyraResult<()> {
        loop {
            let pos = self.pos;
            let typ = self
                .try_read_type()?
                .ok_or_else(|| self.err_syntax("expecting a type"))?;
            if typ == "void" {
                return Err(self.err_semantic_at("an argument to function cannot be void", pos));
            }

            let mut piece = std::mem::take(&mut self.contain_parsed);
            piece.push_str(&typ);

            if self.accept_byte(b'&') && mode == ParseMode::PointerToFunctionType {
                piece.push('&');
            }

            // ei: void(u8* filename, uint offset) error; the argument
            // names document the callback and carry no meaning.
            self.read_symbol();
            self.skip_space();

            if self.accept_byte(b',') {
                piece.push(if mode == ParseMode::PointerToFunctionType { ',' } else { '|' });
                self.contain_parsed = piece;
                continue;
            }

            piece.push(')');
            self.contain_parsed = piece;
            return self.expect_byte(b')');
        }
    }

    /// Parameter declarations: `type [&] name [, …]`.
    fn parse_parameter_declaration(&mut self) -> LyraResult<()> {
        let typ = self
            .try_read_type()?
            .ok_or_else(|| self.err_syntax("expecting a parameter type"))?;
        if typ == "void" {
            return Err(self.err_semantic("a parameter cannot have type void"));
        }

        let byref = self.accept_byte(b'&');

        let name = {
            let n = self.read_symbol();
            if n.is_empty() {
                return Err(self.err_syntax("expecting a parameter name"));
            }
            self.skip_space();
            n
        };

        let size = if byref { GPR_SIZE } else { self.sizeof_type(&typ)? };
        let stored_type = if byref { format!("{typ}*") } else { typ };

        let mut v = Variable::new(name, stored_type);
        v.byref = byref;
        v.size = size;
        v.scope_depth = self.scope_current;
        v.scope_snapshot = self.scope_snapshot_now();
        if self.opts.flags.contains(CompileFlags::ALL_VAR_VOLATILE) {
            v.always_volatile.set(true);
        }
        // The offset within the shared region is assigned by the
        // declarator once the full list is known.
        let id = self.curfunc_mut().push_var(v);
        self.curfunc_mut().params.push(id);
        Ok(())
    }
}

/// Mnemonics accepted inside `asm` blocks.
fn asm_opcode(mnemonic: &str) -> Option<Opcode> {
    use Opcode::*;
    Some(match mnemonic {
        "add" => Add,
        "addi" => Addi,
        "sub" => Sub,
        "neg" => Neg,
        "mul" => Mul,
        "mulh" => Mulh,
        "div" => Div,
        "mod" => Mod,
        "mulhu" => Mulhu,
        "divu" => Divu,
        "modu" => Modu,
        "muli" => Muli,
        "divi" => Divi,
        "modi" => Modi,
        "and" => And,
        "andi" => Andi,
        "or" => Or,
        "ori" => Ori,
        "xor" => Xor,
        "xori" => Xori,
        "not" => Not,
        "cpy" => Cpy,
        "sll" => Sll,
        "slli" => Slli,
        "srl" => Srl,
        "srli" => Srli,
        "sra" => Sra,
        "srai" => Srai,
        "zxt" => Zxt,
        "sxt" => Sxt,
        "seq" => Seq,
        "sne" => Sne,
        "slt" => Slt,
        "slte" => Slte,
        "sltu" => Sltu,
        "slteu" => Slteu,
        "sz" => Sz,
        "snz" => Snz,
        "jr" => Jr,
        "jpushr" => Jpushr,
        "jpop" => Jpop,
        "ld8" => Ld8r,
        "ld16" => Ld16r,
        "ld32" => Ld32r,
        "ld64" => Ld64r,
        "st8" => St8r,
        "st16" => St16r,
        "st32" => St32r,
        "st64" => St64r,
        "ldst8" => Ldst8r,
        "ldst16" => Ldst16r,
        "ldst32" => Ldst32r,
        "ldst64" => Ldst64r,
        "pagealloc" => Pagealloc,
        "pagefree" => Pagefree,
        "stackpagealloc" => Stackpagealloc,
        "stackpagefree" => Stackpagefree,
        "nop" => Nop,
        _ => return None,
    })
}

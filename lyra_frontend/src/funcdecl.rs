//! Function declaration and definition
//!
//! Called on `(` after a return type and a name. Builds the placeholder,
//! parses the parameter list under a fresh scope, derives the three
//! signature strings (call signature, call-site matcher, linking
//! signature), reconciles declarations with definitions by mutual
//! matcher acceptance, and parses the body under saved loop/switch/label
//! contexts.

use crate::parser::Parser;
use crate::regalloc::FlushMode;
use crate::stmt::ParseMode;
use crate::types::{is_native_or_pointer, pointee, round_up};
use crate::CompileFlags;
use lyra_common::LyraResult;
use lyra_ir::{FuncId, Function, Variable, GPR_SIZE};

/// Ceiling on the byte total a function's parameters may occupy in the
/// shared region.
pub const MAX_ARG_USAGE: u32 = 256;

impl Parser<'_> {
    /// Parse a function declaration or definition; the cursor sits on the
    /// opening parenthesis of the parameter list.
    pub(crate) fn func_declaration(
        &mut self,
        rettype: &str,
        name: &str,
        byref: bool,
        is_export: bool,
        is_operator: bool,
        decl_start: usize,
    ) -> LyraResult<()> {
        if byref {
            return Err(self.err_semantic("a function cannot return byref"));
        }

        let decl_id = self.decl_id(decl_start);
        let parent = self.cur;

        // Placeholder linked under the current function.
        let mut placeholder = Function::new(name, rettype);
        placeholder.decl_id = decl_id;
        placeholder.parent = Some(parent);
        let func = self.module.alloc(placeholder);
        self.func_mut(parent).children.push(func);

        // Parameters parse under the new function and a fresh scope.
        let saved_scope = self.scope_save_and_reset();
        let saved_cur = self.cur;
        self.cur = func;

        let result = self.parse_signature(func, rettype);

        self.cur = saved_cur;
        self.scope_restore(saved_scope);
        result?;

        self.build_signatures(func, is_operator)?;

        if is_operator && self.all_params_native(func) {
            return Err(self.err_semantic_at(
                "a native operation cannot be overloaded",
                decl_start,
            ));
        }

        // An existing sibling whose matcher mutually accepts this
        // signature is the same function being completed.
        let target = match self.find_matching_sibling(parent, func)? {
            Some(existing) => {
                let (e_ret, e_var) = {
                    let e = self.func(existing);
                    (e.rettype.clone(), e.variadic)
                };
                let n = self.func(func);
                if e_ret != n.rettype {
                    return Err(self.err_semantic_at(
                        "return type differs from the earlier declaration",
                        decl_start,
                    ));
                }
                if e_var != n.variadic {
                    return Err(self.err_semantic_at(
                        "variadicity differs from the earlier declaration",
                        decl_start,
                    ));
                }
                // Drop the placeholder.
                self.func_mut(parent).children.retain(|&c| c != func);
                self.func_mut(func).name.clear();
                existing
            }
            None => func,
        };

        if is_export && !self.opts.flags.contains(CompileFlags::NO_FUNCTION_EXPORT) {
            self.func_mut(target).to_export = true;
        }

        self.skip_space();
        if self.peek() == b'{' {
            self.parse_function_body(target)?;
        } else {
            self.expect_byte(b';')?;
            // A declaration pass one discovered nobody ever uses is not
            // kept around in pass two.
            if self.is_emit() && target == func {
                if let Some(p1) = self.pass1_func(decl_id) {
                    if !p1.was_used && !p1.shares_caller_frame {
                        self.func_mut(parent).children.retain(|&c| c != func);
                        self.func_mut(func).name.clear();
                    }
                }
            }
        }
        Ok(())
    }

    /// Parameter list (and retvar) of a fresh function.
    fn parse_signature(&mut self, func: FuncId, rettype: &str) -> LyraResult<()> {
        self.expect_byte(b'(')?;
        self.scope_entering();

        let result = (|| {
            if rettype != "void" {
                let size = self.sizeof_type(rettype)?;
                let mut rv = Variable::new("", rettype);
                rv.size = size;
                rv.offset = 0;
                let id = self.curfunc_mut().push_var(rv);
                self.curfunc_mut().retvar = Some(id);
            }

            while self.peek() != b')' {
                if self.peek() == b'.' && self.peek_at(1) == b'.' && self.peek_at(2) == b'.' {
                    self.pos += 3;
                    self.skip_space();
                    self.curfunc_mut().variadic = true;
                    break;
                }
                self.parse_statement(ParseMode::FunctionArg)?;
                if !self.accept_byte(b',') {
                    break;
                }
            }
            Ok(())
        })();

        self.scope_leaving();
        result?;
        self.expect_byte(b')')?;

        // Lay the shared region out: the return slot first, parameters
        // after, each gpr-rounded.
        let retvar_size = {
            let f = self.func(func);
            f.retvar.map(|r| round_up(f.var(r).size, GPR_SIZE)).unwrap_or(0)
        };
        let mut offset = retvar_size;
        let params = self.func(func).params.clone();
        for &p in &params {
            let size = round_up(self.func(func).var(p).size.max(1), GPR_SIZE);
            self.func_mut(func).var_mut(p).offset = offset;
            offset += size;
        }
        if offset > MAX_ARG_USAGE {
            return Err(self.err_semantic("function arguments usage exceeds limit"));
        }
        self.func_mut(func).shared_region_size = offset;
        Ok(())
    }

    /// The three strings of a function: call signature for in-module
    /// overload resolution, the call-site matcher, and the linking
    /// signature for the binary importer/exporter.
    fn build_signatures(&mut self, func: FuncId, _is_operator: bool) -> LyraResult<()> {
        let f = self.func(func);
        let name = f.name.clone();

        let mut declared: Vec<(String, bool)> = Vec::new();
        for &p in &f.params {
            let v = f.var(p);
            let t = if v.byref { pointee(&v.typ).to_string() } else { v.typ.clone() };
            declared.push((t, v.byref));
        }
        let variadic = f.variadic;

        let mut call_sig = String::from(&name);
        call_sig.push('|');
        for (t, _) in &declared {
            call_sig.push_str(t);
            call_sig.push('|');
        }

        let mut pattern = String::from("^");
        pattern.push_str(&regex::escape(&name));
        pattern.push_str("\\|");
        for (t, _) in &declared {
            if t == "void*" {
                // A void* parameter accepts any pointer type.
                pattern.push_str("[^|]*\\*\\|");
            } else {
                pattern.push_str(&regex::escape(t));
                pattern.push_str("\\|");
            }
        }
        if variadic {
            pattern.push_str("(?:[^|]+\\|)*");
        }
        pattern.push('$');

        let mut link_sig = String::from(&name);
        link_sig.push('(');
        for (i, (t, byref)) in declared.iter().enumerate() {
            if i != 0 {
                link_sig.push(',');
            }
            link_sig.push_str(t);
            if *byref {
                link_sig.push('&');
            }
        }
        if variadic {
            if !declared.is_empty() {
                link_sig.push(',');
            }
            link_sig.push_str("...");
        }
        link_sig.push(')');

        let f = self.func_mut(func);
        f.call_sig = call_sig;
        f.fcall_pattern = Some(pattern);
        f.link_sig = link_sig;
        Ok(())
    }

    fn all_params_native(&self, func: FuncId) -> bool {
        let f = self.func(func);
        f.params.iter().all(|&p| {
            let v = f.var(p);
            let t = if v.byref { pointee(&v.typ).to_string() } else { v.typ.clone() };
            is_native_or_pointer(&t)
        })
    }

    /// A sibling (other than `candidate`) whose matcher accepts the
    /// candidate's call signature, or the reverse.
    fn find_matching_sibling(
        &mut self,
        parent: FuncId,
        candidate: FuncId,
    ) -> LyraResult<Option<FuncId>> {
        let cand_name = self.func(candidate).name.clone();
        let cand_sig = self.func(candidate).call_sig.clone();
        let cand_pattern = self.func(candidate).fcall_pattern.clone();

        let siblings = self.func(parent).children.clone();
        for sib in siblings {
            if sib == candidate || self.func(sib).name != cand_name {
                continue;
            }
            let sib_sig = self.func(sib).call_sig.clone();
            let sib_pattern = self.func(sib).fcall_pattern.clone();

            let forward = sib_pattern
                .as_deref()
                .map(|p| self.matcher_accepts(p, &cand_sig))
                .unwrap_or(false);
            let backward = cand_pattern
                .as_deref()
                .map(|p| self.matcher_accepts(p, &sib_sig))
                .unwrap_or(false);

            if forward || backward {
                return Ok(Some(sib));
            }
        }
        Ok(None)
    }

    /// Parse `{ body }` of a definition under fresh contexts.
    fn parse_function_body(&mut self, func: FuncId) -> LyraResult<()> {
        if self.func(func).is_defined {
            return Err(self.err_semantic(format!(
                "function {} is already defined",
                self.func(func).name
            )));
        }
        self.func_mut(func).is_defined = true;

        // Pass one decided whether this function's frame is inlined into
        // its caller's.
        if self.is_emit() {
            let decl_id = self.func(func).decl_id;
            if let Some(p1) = self.pass1_func(decl_id) {
                let shares_caller_frame = p1.shares_caller_frame;
                let stackframe_pointers_cache_size = p1.stackframe_pointers_cache_size;
                if shares_caller_frame {
                    let parent = self.func(func).parent;
                    self.func_mut(func).stackframe_holder = parent;
                }
                self.func_mut(func).stackframe_pointers_cache_size =
                    stackframe_pointers_cache_size;
            }
        }

        let saved_scope = self.scope_save_and_reset();
        let saved_cur = self.cur;
        let saved_end = self.label_end_of_loop.take();
        let saved_continue = self.label_continue.take();
        let saved_switch = self.switchblock.take();
        let saved_postfix = std::mem::take(&mut self.postfix);

        self.cur = func;

        let result = (|| {
            self.expect_byte(b'{')?;
            self.scope_entering();
            self.emit_prologue()?;

            let body = (|| {
                while self.peek() != b'}' {
                    if self.at_end() {
                        return Err(self.err_syntax("expecting '}' of a function body"));
                    }
                    self.parse_statement(ParseMode::FunctionBody)?;
                    self.skip_space();
                }
                Ok(())
            })();

            self.scope_leaving();
            body?;
            self.expect_byte(b'}')?;

            // The fall-through exit; a body whose last statement already
            // returned needs no second epilogue, unless a label placed at
            // the very end still needs code to land on.
            if !self.body_already_returned() || self.has_dangling_end_jump(func) {
                self.flush_and_discard_all(FlushMode::DoNotFlushRegForLocalsKeepReturnAddr)?;
                self.emit_epilogue()?;
            }
            self.resolve_labels(func)?;
            Ok(())
        })();

        self.cur = saved_cur;
        self.label_end_of_loop = saved_end;
        self.label_continue = saved_continue;
        self.switchblock = saved_switch;
        self.postfix = saved_postfix;

        result?;

        // The sizing pass decides frame sharing once the whole body is
        // known: only a childless function needing no frame of its own
        // can borrow its caller's.
        if !self.is_emit() && !self.opts.flags.contains(CompileFlags::NO_STACKFRAME_SHARING) {
            let f = self.func(func);
            let shareable = f.children.is_empty()
                && f.local_size == 0
                && f.shared_region_size == 0
                && f.params.is_empty()
                && f.rettype == "void"
                && !f.to_export;
            if shareable {
                let parent = self.func(func).parent;
                self.func_mut(func).stackframe_holder = parent;
            }
        }
        Ok(())
    }
}

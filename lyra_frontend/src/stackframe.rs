//! Stackframe layout, prologue/epilogue and variable addressing
//!
//! A frame grows toward lower addresses. From the stack pointer upward:
//! the frame-size word (letting stack walks find the frame top), the
//! stackframe-pointer cache, locals, then the shared region through which
//! callers pass arguments and read results. Keeping the shared region at
//! the top means a caller addresses it as `%0 - gpr - sharedsize`,
//! independent of the callee's locals. The return address pushed by the
//! caller's `jpush` sits just above the frame.
//!
//! A function either owns its frame, or holds a stackframe holder: its
//! frame is inlined into the caller's, entry and exit leave the stack
//! pointer alone, the return address arrives in `%1` and `jr %1` returns.

use crate::parser::{Parser, VarKey};
use crate::regalloc::RegRole;
use crate::CompileFlags;
use lyra_common::LyraResult;
use lyra_ir::{FuncId, ImmPart, Module, RegId, GPR_SIZE, PAGE_SIZE, REG_RETURNADDR, REG_STACKPTR};

/// Resolved frame measurements of one function.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameGeom {
    pub cache_size: u32,
    pub shared_size: u32,
    pub local_size: u32,
}

impl FrameGeom {
    /// Bytes the prologue subtracts from the stack pointer.
    pub fn frame_size(&self) -> u32 {
        GPR_SIZE + self.cache_size + self.shared_size + self.local_size
    }

    pub fn shared_base(&self) -> u32 {
        GPR_SIZE + self.cache_size + self.local_size
    }

    pub fn locals_base(&self) -> u32 {
        GPR_SIZE + self.cache_size
    }
}

impl Parser<'_> {
    /// Frame measurements of `func`. During emission the sizes come from
    /// the sizing pass, because locals are still being discovered while
    /// the body is parsed.
    pub(crate) fn frame_geom(&self, func: FuncId) -> FrameGeom {
        let f = self.func(func);
        if let Some(p1) = self.pass1_func(f.decl_id) {
            FrameGeom {
                cache_size: p1.stackframe_pointers_cache_size,
                shared_size: p1.shared_region_size,
                local_size: p1.local_size,
            }
        } else {
            FrameGeom {
                cache_size: f.stackframe_pointers_cache_size,
                shared_size: f.shared_region_size,
                local_size: f.local_size,
            }
        }
    }

    /// Emit the function entry sequence. For an owning function:
    ///
    /// ```text
    /// addi %0, %0, -(gpr + cache + shared + locals)
    /// li   %1, gpr + cache + shared + locals
    /// st   %1, %0
    /// ```
    ///
    /// The stored word lets `throw` and nested-variable access walk to the
    /// frame top. A function holding a stackframe holder emits nothing.
    pub(crate) fn emit_prologue(&mut self) -> LyraResult<()> {
        if !self.emitting() {
            return Ok(());
        }
        let cur = self.cur;
        if self.func(cur).stackframe_holder.is_some() {
            return Ok(());
        }

        self.emit_comment("begin: entering function");

        if cur == Module::ROOT {
            self.emit_root_page_check()?;
        }

        let frame = self.frame_geom(cur).frame_size();
        self.i_addi(REG_STACKPTR, REG_STACKPTR, -(frame as i64))?;

        self.lock_reg(REG_RETURNADDR);
        self.i_li(REG_RETURNADDR, frame as u64)?;
        self.i_st_gpr(REG_RETURNADDR, REG_STACKPTR, 0)?;
        self.unlock_reg(REG_RETURNADDR);

        self.emit_comment("end: done");
        Ok(())
    }

    /// Emit the function exit sequence; the inverse of the prologue.
    pub(crate) fn emit_epilogue(&mut self) -> LyraResult<()> {
        if !self.emitting() {
            return Ok(());
        }
        let cur = self.cur;

        if self.func(cur).stackframe_holder.is_some() {
            // The return address was left in %1 by the caller.
            self.i_jr(REG_RETURNADDR)?;
            return Ok(());
        }

        let frame = self.frame_geom(cur).frame_size();
        self.i_addi(REG_STACKPTR, REG_STACKPTR, frame as i64)?;

        if cur == Module::ROOT {
            self.emit_root_page_release()?;
        }

        self.i_jpop()?;
        Ok(())
    }

    /// The root prologue must guarantee stack room before its frame is
    /// carved: when the current page has fewer than
    /// `2*gpr + shared + provision` bytes left, allocate a page, chain the
    /// old stack pointer at its base and continue from its top.
    fn emit_root_page_check(&mut self) -> LyraResult<()> {
        let geom = self.frame_geom(Module::ROOT);
        let threshold =
            (2 * GPR_SIZE + geom.shared_size + self.opts.stackpage_alloc_provision) as u64;

        let alloc = self.new_label_name();
        let skip = self.new_label_name();

        let t = self.alloc_reg(true)?;
        self.lock_reg(t);
        // Distance from the page base.
        self.i_andi(t, REG_STACKPTR, (PAGE_SIZE - 1) as u64)?;
        let thr = self.alloc_reg(true)?;
        self.lock_reg(thr);
        let cmp = (|| {
            self.load_imm(thr, threshold)?;
            self.i_branch2_label(lyra_ir::Opcode::Jltu, t, thr, &alloc)
        })();
        self.unlock_reg(thr);
        self.unlock_reg(t);
        cmp?;
        self.i_j_label(&skip)?;

        self.place_label(&alloc);
        let page = self.alloc_reg(true)?;
        self.lock_reg(page);
        self.i_stackpagealloc(page)?;
        // Chain: the new page's base holds the previous stack pointer.
        self.i_st_gpr(REG_STACKPTR, page, 0)?;
        self.i_addi(
            REG_STACKPTR,
            page,
            (PAGE_SIZE - self.opts.stackpage_alloc_provision) as i64,
        )?;
        self.unlock_reg(page);

        self.place_label(&skip);
        Ok(())
    }

    /// The root epilogue frees chained stack pages: while the page base
    /// holds a chained stack pointer, restore it and release the page.
    fn emit_root_page_release(&mut self) -> LyraResult<()> {
        let again = self.new_label_name();
        let done = self.new_label_name();

        self.place_label(&again);
        let base = self.alloc_reg(true)?;
        self.lock_reg(base);
        self.i_andi(base, REG_STACKPTR, !(PAGE_SIZE as u64 - 1))?;
        let chained = self.alloc_reg(true)?;
        self.lock_reg(chained);
        self.i_ld_gpr(chained, base, 0)?;
        self.i_branch1_label(lyra_ir::Opcode::Jz, chained, &done)?;
        self.i_cpy(REG_STACKPTR, chained)?;
        self.i_stackpagefree(base)?;
        self.unlock_reg(chained);
        self.unlock_reg(base);
        self.i_j_label(&again)?;
        self.place_label(&done);
        Ok(())
    }

    /// Walk the stack pointer up `levels` frames using the frame-size word
    /// each frame stores at its base, leaving the result in `dst`.
    pub(crate) fn emit_frame_walk(&mut self, dst: RegId, levels: u32) -> LyraResult<()> {
        self.lock_reg(dst);
        self.i_cpy(dst, REG_STACKPTR)?;
        let scratch = self.alloc_reg(false)?;
        self.lock_reg(scratch);
        for _ in 0..levels {
            // dst += [dst] + gpr: past this frame and its return address.
            self.i_ld_gpr(scratch, dst, 0)?;
            self.i_add(dst, dst, scratch)?;
            self.i_addi(dst, dst, GPR_SIZE as i64)?;
        }
        self.unlock_reg(scratch);
        self.unlock_reg(dst);
        Ok(())
    }

    /// Restore the stack pointer to the frame of the ancestor `levels` up,
    /// as `throw` requires before jumping to a catchable-label.
    pub(crate) fn emit_set_stackptr_to_ancestor_frame(&mut self, levels: u32) -> LyraResult<()> {
        if levels == 0 {
            return Ok(());
        }
        let t = self.alloc_reg(true)?;
        self.emit_frame_walk(t, levels)?;
        self.i_cpy(REG_STACKPTR, t)?;
        Ok(())
    }

    /// Lexical distance from the current function up to `ancestor`.
    pub(crate) fn func_level_delta(&self, ancestor: FuncId) -> Option<u32> {
        let mut delta = 0;
        let mut cur = Some(self.cur);
        while let Some(id) = cur {
            if id == ancestor {
                return Some(delta);
            }
            delta += 1;
            cur = self.func(id).parent;
        }
        None
    }

    /// Compute the addressing of a variable: a base register (locked by
    /// the caller while in use) plus immediate parts.
    ///
    /// Locals and parameters of the current function address off the stack
    /// pointer; statics and root-function variables address off the cached
    /// global-region register; variables of lexical ancestors address off
    /// a register caching the ancestor's frame pointer.
    pub(crate) fn var_address(&mut self, key: VarKey) -> LyraResult<(RegId, Vec<ImmPart>)> {
        let (owner, id) = key;
        let v = self.func(owner).var(id).clone();

        // Static storage and root-function variables live in the global
        // region.
        if v.is_static || owner == Module::ROOT {
            let (base, fresh) = self.reg_for_role(RegRole::GlobalRegionAddr)?;
            if fresh {
                self.lock_reg(base);
                self.i_afip(base, &[ImmPart::OffsetToGlobalRegion])?;
                self.unlock_reg(base);
            }
            return Ok((base, vec![ImmPart::Value(v.offset as i64)]));
        }

        let geom = self.frame_geom(owner);
        let in_shared = {
            let f = self.func(owner);
            f.params.contains(&id) || f.retvar == Some(id)
        };
        let region_base = if in_shared { geom.shared_base() } else { geom.locals_base() };
        let offset = (region_base + v.offset) as i64;

        if owner == self.cur {
            return Ok((REG_STACKPTR, vec![ImmPart::Value(offset)]));
        }

        // Ancestor variable: cache the ancestor's frame pointer.
        let delta = self
            .func_level_delta(owner)
            .ok_or_else(|| self.err_internal("variable owner is not an ancestor"))?;
        let (base, fresh) = self.reg_for_role(RegRole::FuncLevel(delta))?;
        if fresh {
            self.emit_frame_walk(base, delta)?;
        }
        Ok((base, vec![ImmPart::Value(offset)]))
    }

    /// Write a register back to its bound variable's storage.
    pub(crate) fn flush_reg_to_var(&mut self, reg: RegId, key: VarKey) -> LyraResult<()> {
        if !self.emitting() {
            return Ok(());
        }
        if self.opts.flags.contains(CompileFlags::COMMENT) {
            let name = self.func(key.0).var(key.1).name.clone();
            self.emit_comment(format!("flushing reg %{reg} to {name}"));
        }
        let width = self.func(key.0).var(key.1).size.min(GPR_SIZE).max(1);
        self.lock_reg(reg);
        let (base, parts) = self.var_address(key)?;
        self.lock_reg(base);
        let result = self.i_st(width, reg, base, &parts);
        self.unlock_reg(base);
        self.unlock_reg(reg);
        result
    }
}

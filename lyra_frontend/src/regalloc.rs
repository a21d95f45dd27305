//! Virtual-register pool
//!
//! The frontend allocates from a small per-function pool sized to the
//! number of physical registers the backend can map 1:1 (the stack pointer
//! `%0` is never in the pool). Registers carry a bound variable, dirty and
//! lock state, and role bits for cached addresses. Allocation is
//! least-recently-used; when nothing is free, dirty variable-bound
//! registers are flushed before cached-address roles are discarded.

use crate::parser::{Parser, VarKey};
use crate::CompileFlags;
use lyra_common::LyraResult;
use lyra_ir::{RegId, GPR_SIZE};

/// Pool size: `%1` through `%7`.
pub const GPR_COUNT: u32 = 7;

/// One virtual register of a function's pool.
#[derive(Debug, Clone)]
pub struct Reg {
    pub id: RegId,
    pub var: Option<VarKey>,
    pub dirty: bool,
    /// Pinned for the instruction currently being constructed.
    pub lock: bool,
    /// Pinned across an `asm` block.
    pub reserved: bool,
    pub returnaddr: bool,
    /// Nonzero when the register caches the stackframe pointer of the
    /// ancestor this many levels up.
    pub funclevel: u32,
    pub globalregionaddr: bool,
    pub stringregionaddr: bool,
    pub thisaddr: bool,
    pub retvaraddr: bool,
    pub size: u32,
    pub zext: bool,
    pub sext: bool,
}

impl Reg {
    fn new(id: RegId) -> Self {
        Self {
            id,
            var: None,
            dirty: false,
            lock: false,
            reserved: false,
            returnaddr: false,
            funclevel: 0,
            globalregionaddr: false,
            stringregionaddr: false,
            thisaddr: false,
            retvaraddr: false,
            size: GPR_SIZE,
            zext: false,
            sext: false,
        }
    }

    /// No binding, no role, no pin: free for allocation.
    pub fn is_unused(&self) -> bool {
        !(self.returnaddr
            || self.funclevel != 0
            || self.globalregionaddr
            || self.stringregionaddr
            || self.thisaddr
            || self.retvaraddr
            || self.var.is_some()
            || self.lock
            || self.reserved)
    }

    fn clear_roles(&mut self) {
        self.returnaddr = false;
        self.funclevel = 0;
        self.globalregionaddr = false;
        self.stringregionaddr = false;
        self.thisaddr = false;
        self.retvaraddr = false;
    }
}

/// A function's register pool with its LRU order.
#[derive(Debug, Clone)]
pub struct RegFile {
    regs: Vec<Reg>,
    /// Most recently used first.
    order: Vec<RegId>,
}

impl Default for RegFile {
    fn default() -> Self {
        Self::new()
    }
}

impl RegFile {
    pub fn new() -> Self {
        // Entry zero stands for the stack pointer: present so register
        // ids index directly, permanently reserved so it is never
        // allocated, flushed or discarded.
        let mut regs: Vec<Reg> = (0..=GPR_COUNT).map(Reg::new).collect();
        regs[0].reserved = true;
        let order = (1..=GPR_COUNT).rev().collect();
        Self { regs, order }
    }

    pub fn get(&self, id: RegId) -> &Reg {
        &self.regs[id as usize]
    }

    pub fn get_mut(&mut self, id: RegId) -> &mut Reg {
        &mut self.regs[id as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reg> {
        self.regs.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Reg> {
        self.regs.iter_mut()
    }

    /// Move a register to the most-recently-used position.
    pub fn touch(&mut self, id: RegId) {
        self.order.retain(|&r| r != id);
        self.order.insert(0, id);
    }

    /// Unused registers in least-recently-used-first order.
    fn unused_lru(&self) -> impl Iterator<Item = RegId> + '_ {
        self.order.iter().rev().copied().filter(|&id| self.get(id).is_unused())
    }

    pub fn unused_count(&self) -> u32 {
        self.iter().filter(|r| r.is_unused()).count() as u32
    }

    /// Ids of currently unused registers, recorded on each instruction for
    /// the backend's pressure decisions.
    pub fn unused_ids(&self) -> Vec<RegId> {
        self.iter().filter(|r| r.is_unused()).map(|r| r.id).collect()
    }

    pub fn find_bound(&self, var: VarKey) -> Option<RegId> {
        self.iter().find(|r| r.var == Some(var)).map(|r| r.id)
    }

    pub fn find_role(&self, role: RegRole) -> Option<RegId> {
        self.iter().find(|r| role.matches(r)).map(|r| r.id)
    }
}

/// Cached-address roles a register can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegRole {
    ReturnAddr,
    FuncLevel(u32),
    GlobalRegionAddr,
    StringRegionAddr,
    ThisAddr,
    RetvarAddr,
}

impl RegRole {
    fn matches(self, r: &Reg) -> bool {
        match self {
            RegRole::ReturnAddr => r.returnaddr,
            RegRole::FuncLevel(n) => r.funclevel == n,
            RegRole::GlobalRegionAddr => r.globalregionaddr,
            RegRole::StringRegionAddr => r.stringregionaddr,
            RegRole::ThisAddr => r.thisaddr,
            RegRole::RetvarAddr => r.retvaraddr,
        }
    }

    pub(crate) fn apply(self, r: &mut Reg) {
        match self {
            RegRole::ReturnAddr => r.returnaddr = true,
            RegRole::FuncLevel(n) => r.funclevel = n,
            RegRole::GlobalRegionAddr => r.globalregionaddr = true,
            RegRole::StringRegionAddr => r.stringregionaddr = true,
            RegRole::ThisAddr => r.thisaddr = true,
            RegRole::RetvarAddr => r.retvaraddr = true,
        }
    }
}

/// Which registers [`Parser::flush_and_discard_all`] spares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Flush everything dirty, discard every binding and role.
    FlushAndDiscardAll,
    /// Flush everything dirty but keep bindings and roles.
    DoNotDiscard,
    /// Discard all; skip writing back locals of the current function (they
    /// are dying anyway, as at a return).
    DoNotFlushRegForLocals,
    /// As above, but the return-address role survives.
    DoNotFlushRegForLocalsKeepReturnAddr,
    /// As above, but stackframe-pointer roles survive.
    DoNotFlushRegForLocalsKeepFuncLevel,
}

impl Parser<'_> {
    pub(crate) fn regfile(&mut self) -> &mut RegFile {
        self.regs.entry(self.cur).or_default()
    }

    pub(crate) fn regfile_ref(&self) -> &RegFile {
        static EMPTY: std::sync::OnceLock<RegFile> = std::sync::OnceLock::new();
        self.regs.get(&self.cur).unwrap_or_else(|| EMPTY.get_or_init(RegFile::new))
    }

    pub(crate) fn reg(&self, id: RegId) -> &Reg {
        self.regfile_ref().get(id)
    }

    pub(crate) fn lock_reg(&mut self, id: RegId) {
        self.regfile().get_mut(id).lock = true;
    }

    pub(crate) fn unlock_reg(&mut self, id: RegId) {
        self.regfile().get_mut(id).lock = false;
    }

    /// Allocate an unused register, spilling if the pool is exhausted.
    /// `critical` bypasses the least-recently-used bias and takes the
    /// first free register.
    pub(crate) fn alloc_reg(&mut self, critical: bool) -> LyraResult<RegId> {
        let picked = if critical {
            self.regfile().iter().find(|r| r.is_unused()).map(|r| r.id)
        } else {
            self.regfile().unused_lru().next()
        };

        let id = match picked {
            Some(id) => id,
            None => self.spill_one_reg()?,
        };

        let r = self.regfile().get_mut(id);
        r.size = GPR_SIZE;
        r.zext = false;
        r.sext = false;
        r.dirty = false;
        self.regfile().touch(id);
        Ok(id)
    }

    /// Free a register by writing back and unbinding the least recently
    /// used spillable one. Clean bindings go first because dropping them
    /// emits nothing.
    fn spill_one_reg(&mut self) -> LyraResult<RegId> {
        let candidates: Vec<RegId> = self.regfile().order.iter().rev().copied().collect();
        for &id in &candidates {
            let r = self.reg(id);
            if !r.lock && !r.reserved && r.var.is_some() && !r.dirty {
                self.discard_reg(id)?;
                return Ok(id);
            }
        }
        for &id in &candidates {
            let r = self.reg(id);
            if !r.lock && !r.reserved && r.var.is_some() {
                self.discard_reg(id)?;
                return Ok(id);
            }
        }
        // Cached-address roles only when nothing else gives.
        for &id in &candidates {
            let r = self.reg(id);
            if !r.lock && !r.reserved && !r.is_unused() {
                self.discard_reg(id)?;
                return Ok(id);
            }
        }
        Err(self.err_internal("could not find enough unused registers"))
    }

    /// Write a dirty register back to its variable and drop the binding
    /// and any role.
    pub(crate) fn discard_reg(&mut self, id: RegId) -> LyraResult<()> {
        let (dirty, var) = {
            let r = self.reg(id);
            (r.dirty, r.var)
        };
        if dirty {
            if let Some(var) = var {
                self.flush_reg_to_var(id, var)?;
            }
        }
        let r = self.regfile().get_mut(id);
        r.var = None;
        r.dirty = false;
        r.clear_roles();
        if self.opts.flags.contains(CompileFlags::COMMENT) {
            self.emit_comment(format!("reg %{id} discarded"));
        }
        Ok(())
    }

    /// The constructor precondition: make at least `count` registers
    /// unused. Dirty variable-bound registers flush first so that
    /// cached-address roles stay usable while flushing; roles are
    /// discarded only if still short.
    pub(crate) fn ensure_unused_regs(&mut self, count: u32) -> LyraResult<()> {
        if count == 0 || self.regfile().unused_count() >= count {
            return Ok(());
        }
        let mut missing = count - self.regfile().unused_count();

        if self.opts.flags.contains(CompileFlags::COMMENT) {
            self.emit_comment("begin: insure enough unused registers");
        }

        let ids: Vec<RegId> = self.regfile().order.iter().rev().copied().collect();
        for &id in &ids {
            if missing == 0 {
                break;
            }
            let r = self.reg(id);
            if !r.lock && !r.reserved && r.var.is_some() {
                self.discard_reg(id)?;
                missing -= 1;
            }
        }
        for &id in &ids {
            if missing == 0 {
                break;
            }
            let r = self.reg(id);
            if !r.lock && !r.reserved && !r.is_unused() {
                self.discard_reg(id)?;
                missing -= 1;
            }
        }

        if self.opts.flags.contains(CompileFlags::COMMENT) {
            self.emit_comment("end: insure enough unused registers");
        }

        if missing > 0 {
            return Err(self.err_internal("could not find enough unused registers"));
        }
        Ok(())
    }

    /// Flush and discard per `mode`. Reserved registers are never touched.
    pub(crate) fn flush_and_discard_all(&mut self, mode: FlushMode) -> LyraResult<()> {
        let ids: Vec<RegId> = self.regfile().iter().map(|r| r.id).collect();
        for id in ids {
            let (var, dirty, reserved) = {
                let r = self.reg(id);
                (r.var, r.dirty, r.reserved)
            };
            if reserved {
                continue;
            }

            let skip_flush = match mode {
                FlushMode::FlushAndDiscardAll | FlushMode::DoNotDiscard => false,
                _ => var.map(|v| self.var_is_local_nonstatic(v)).unwrap_or(false),
            };

            if dirty && !skip_flush {
                if let Some(var) = var {
                    self.flush_reg_to_var(id, var)?;
                }
            }

            if mode == FlushMode::DoNotDiscard {
                let r = self.regfile().get_mut(id);
                r.dirty = false;
                continue;
            }

            let keep_role = {
                let r = self.reg(id);
                match mode {
                    FlushMode::DoNotFlushRegForLocalsKeepReturnAddr => r.returnaddr,
                    FlushMode::DoNotFlushRegForLocalsKeepFuncLevel => r.funclevel != 0,
                    _ => false,
                }
            };

            let r = self.regfile().get_mut(id);
            r.var = None;
            r.dirty = false;
            if !keep_role {
                r.clear_roles();
            }
        }
        Ok(())
    }

    /// Whether a variable lives in the current function's locals region.
    /// Statics, root-function variables, parameters and the return
    /// variable all have storage an outsider reads, so they are never
    /// "locals" for flush purposes.
    pub(crate) fn var_is_local_nonstatic(&self, key: VarKey) -> bool {
        let (func, id) = key;
        if func != self.cur || func == lyra_ir::Module::ROOT {
            return false;
        }
        let f = self.func(func);
        let v = f.var(id);
        !v.is_static && !f.params.contains(&id) && f.retvar != Some(id)
    }

    /// Find or allocate the register caching a role address. The caller
    /// emits the instructions computing the address when `allocated` comes
    /// back true.
    pub(crate) fn reg_for_role(&mut self, role: RegRole) -> LyraResult<(RegId, bool)> {
        if let Some(id) = self.regfile().find_role(role) {
            self.regfile().touch(id);
            return Ok((id, false));
        }
        let id = self.alloc_reg(true)?;
        role.apply(self.regfile().get_mut(id));
        Ok((id, true))
    }

    /// Reserve registers across an `asm` block.
    pub(crate) fn reserve_reg(&mut self, id: RegId) {
        self.regfile().get_mut(id).reserved = true;
    }

    pub(crate) fn unreserve_all_regs(&mut self) {
        for r in self.regfile().iter_mut() {
            if r.id != 0 {
                r.reserved = false;
            }
        }
    }
}

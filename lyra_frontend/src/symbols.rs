//! Symbol search
//!
//! Candidates are filtered by scope visibility (depth at most the current
//! depth, and scope-vector prefix equality up to the candidate's depth),
//! then by category tag. Unless restricted to the current scope, the search
//! ascends through parent functions; symbols of ancestors are visible to
//! nested functions, which is what statically-scoped nesting means here.

use crate::parser::{Parser, VarKey};
use lyra_ir::{FuncId, VarId};

/// Search behavior of [`Parser::search_symbol`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Walk the current function, then its ancestors.
    Normal,
    /// Only the current function's lists.
    InCurrentScopeOnly,
}

/// Which category a found symbol belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    Variable(VarKey),
    /// `(owning function, index into its types)`
    Type(FuncId, usize),
    Function(FuncId),
}

impl Parser<'_> {
    /// Find the nearest visible symbol named `name`, any category.
    pub(crate) fn search_symbol(&self, name: &str, mode: SearchMode) -> Option<Symbol> {
        let mut func = self.cur;
        loop {
            if let Some(v) = self.search_var_in(func, name) {
                return Some(Symbol::Variable((func, v)));
            }
            if let Some(t) = self.search_type_in(func, name) {
                return Some(Symbol::Type(func, t));
            }
            if let Some(f) = self.search_func_in(func, name) {
                return Some(Symbol::Function(f));
            }
            if mode == SearchMode::InCurrentScopeOnly {
                return None;
            }
            func = self.func(func).parent?;
        }
    }

    /// Scope filtering applies only within the current function; symbols of
    /// ancestor functions were sealed when their bodies closed, so they are
    /// visible as long as they exist.
    fn visible(&self, owner: FuncId, depth: u32, snapshot: &[u32]) -> bool {
        if owner != self.cur {
            return true;
        }
        self.scope_reaches(depth, snapshot)
    }

    pub(crate) fn search_var_in(&self, func: FuncId, name: &str) -> Option<VarId> {
        let f = self.func(func);
        // Later declarations shadow earlier ones at deeper scopes; walking
        // from the end finds the innermost first.
        for (id, v) in f.vars.iter().enumerate().rev() {
            if v.alive
                && v.name == name
                && self.visible(func, v.scope_depth, &v.scope_snapshot)
            {
                return Some(id as VarId);
            }
        }
        None
    }

    pub(crate) fn search_type_in(&self, func: FuncId, name: &str) -> Option<usize> {
        let f = self.func(func);
        for (i, t) in f.types.iter().enumerate().rev() {
            if t.name == name && self.visible(func, t.scope_depth, &t.scope_snapshot) {
                return Some(i);
            }
        }
        None
    }

    pub(crate) fn search_func_in(&self, func: FuncId, name: &str) -> Option<FuncId> {
        let f = self.func(func);
        for &child in f.children.iter().rev() {
            if self.func(child).name == name {
                return Some(child);
            }
        }
        None
    }

    /// All visible sibling functions named `name`, nearest scope first.
    /// Overload resolution walks these in order.
    pub(crate) fn candidate_funcs(&self, name: &str) -> Vec<FuncId> {
        let mut out = Vec::new();
        let mut func = Some(self.cur);
        while let Some(id) = func {
            for &child in self.func(id).children.iter().rev() {
                if self.func(child).name == name {
                    out.push(child);
                }
            }
            func = self.func(id).parent;
        }
        out
    }
}

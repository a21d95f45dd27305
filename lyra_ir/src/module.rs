//! The compile-result graph consumed by backends

use crate::function::{FuncId, Function};

/// Arena of all functions produced by a compilation. The root function is
/// always id 0; definition order is arena order.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub funcs: Vec<Function>,
}

impl Module {
    pub const ROOT: FuncId = 0;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, func: Function) -> FuncId {
        self.funcs.push(func);
        (self.funcs.len() - 1) as FuncId
    }

    pub fn func(&self, id: FuncId) -> &Function {
        &self.funcs[id as usize]
    }

    pub fn func_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.funcs[id as usize]
    }

    /// Functions in definition order.
    pub fn iter(&self) -> impl Iterator<Item = (FuncId, &Function)> {
        self.funcs.iter().enumerate().map(|(i, f)| (i as FuncId, f))
    }

    /// Walk `from` and its ancestors, innermost first.
    pub fn ancestors(&self, from: FuncId) -> impl Iterator<Item = FuncId> + '_ {
        let mut cur = Some(from);
        std::iter::from_fn(move || {
            let id = cur?;
            cur = self.func(id).parent;
            Some(id)
        })
    }
}

/// Everything the frontend hands to a backend.
#[derive(Debug, Clone, Default)]
pub struct CompileResult {
    pub module: Module,
    /// Constant strings, addressed PC-relatively after the executable
    /// instructions.
    pub string_region: Vec<u8>,
    /// Byte total of the global variable region the loader must provide.
    pub global_region_size: u32,
    /// Offsets of one-time-initialization guard bytes within the global
    /// region; the loader provides the region zeroed.
    pub status_vars: Vec<u32>,
    /// Whether instructions carry debug attribution.
    pub debug_info: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Instruction, Opcode};
    use pretty_assertions::assert_eq;

    #[test]
    fn ancestors_walk_innermost_first() {
        let mut m = Module::new();
        m.alloc(Function::new("", "void"));
        let mut outer = Function::new("outer", "void");
        outer.parent = Some(Module::ROOT);
        let outer_id = m.alloc(outer);
        let mut inner = Function::new("inner", "void");
        inner.parent = Some(outer_id);
        let inner_id = m.alloc(inner);

        let chain: Vec<_> = m.ancestors(inner_id).collect();
        assert_eq!(chain, vec![inner_id, outer_id, Module::ROOT]);
    }

    #[test]
    fn instruction_ids_are_chronological() {
        let mut f = Function::new("f", "void");
        let a = f.push_insn(Instruction::new(Opcode::Nop));
        let b = f.push_insn(Instruction::new(Opcode::Jpop));
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(f.insn(b).op, Opcode::Jpop);
    }

    #[test]
    fn opcode_families() {
        assert!(Opcode::Jpush.is_branch());
        assert!(Opcode::Mem32cpy.is_memcpy());
        assert!(Opcode::Comment.is_inert());
        assert!(!Opcode::Add.is_branch());
        assert_eq!(Opcode::Slteui.mnemonic(), "SLTEUI");
    }
}

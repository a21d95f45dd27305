//! Functions and variables

use crate::instruction::{InsnId, Instruction};
use crate::types::TypeDef;
use std::cell::Cell;
use std::rc::Rc;

/// Index of a function in the module arena.
pub type FuncId = u32;

/// Index of a variable within its owning function.
pub type VarId = u32;

/// A named storage location: parameter, local, static, tempvar, type member
/// or compile-time constant.
#[derive(Debug, Clone)]
pub struct Variable {
    /// Empty for anonymous type members.
    pub name: String,
    /// Type string, e.g. `uint`, `u8*`, `mystruct[4]`.
    pub typ: String,
    /// When set, overrides `typ` during expression evaluation.
    pub cast: Option<String>,
    pub size: u32,
    /// Offset within the owning region (stackframe, global region or
    /// containing type).
    pub offset: u32,
    /// Bit mask selecting this bitfield within its containing native
    /// integer; zero when the variable is not a bitfield.
    pub bitselect: u64,
    pub byref: bool,
    pub is_static: bool,
    /// Compile-time constant; `numbervalue` holds the value and no storage
    /// is allocated.
    pub isnumber: bool,
    pub numbervalue: u64,
    /// Shared with aliased sub-variables of the same main variable.
    pub always_volatile: Rc<Cell<bool>>,
    /// Predeclared variable with a driver callback.
    pub has_callback: bool,
    /// Nonzero id for driver-predeclared variables.
    pub predeclared_id: u32,
    pub scope_depth: u32,
    /// Value of `scope[0..scope_depth]` at the declaration site.
    pub scope_snapshot: Vec<u32>,
    /// Position in the parameter list; parameters only.
    pub arg_order: u32,
    /// Cleared when the variable is freed at scope exit or tempvar drain.
    pub alive: bool,
}

impl Variable {
    pub fn new(name: impl Into<String>, typ: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            typ: typ.into(),
            cast: None,
            size: 0,
            offset: 0,
            bitselect: 0,
            byref: false,
            is_static: false,
            isnumber: false,
            numbervalue: 0,
            always_volatile: Rc::new(Cell::new(false)),
            has_callback: false,
            predeclared_id: 0,
            scope_depth: 0,
            scope_snapshot: Vec::new(),
            arg_order: 0,
            alive: true,
        }
    }

    /// The type used during expression evaluation.
    pub fn effective_type(&self) -> &str {
        self.cast.as_deref().unwrap_or(&self.typ)
    }

    /// Tempvars are created by the expression evaluator and freed at
    /// expression boundaries.
    pub fn is_tempvar(&self) -> bool {
        self.name.starts_with('$')
    }
}

/// A named code entity.
///
/// `instrs` is chronological; for any defined function it is non-empty and
/// its terminal instruction returns control. `decl_id` is derived from the
/// byte offset of the declaration in the source buffer, so it is stable
/// between the sizing pass and the emission pass.
#[derive(Debug, Clone, Default)]
pub struct Function {
    pub name: String,
    pub rettype: String,
    pub decl_id: u32,
    pub parent: Option<FuncId>,
    pub children: Vec<FuncId>,
    pub variadic: bool,
    /// Parameter variables in declaration order.
    pub params: Vec<VarId>,
    /// The implicit return variable, occupying the head of the shared
    /// region; `None` for void functions.
    pub retvar: Option<VarId>,
    pub vars: Vec<Variable>,
    pub types: Vec<TypeDef>,
    /// Byte total of the locals region.
    pub local_size: u32,
    /// Byte total of the shared region through which callers pass
    /// arguments and retrieve results.
    pub shared_region_size: u32,
    pub instrs: Vec<Instruction>,
    /// `name|type1|type2|…|` used for in-module overload resolution.
    pub call_sig: String,
    /// Pattern accepting the call signatures this function can service.
    pub fcall_pattern: Option<String>,
    /// `name(type1,type2&,…)` used by the binary importer/exporter.
    pub link_sig: String,
    pub to_export: bool,
    /// When nonzero, `to_import - 1` is the offset within the string region
    /// holding the imported callee's address slot.
    pub to_import: u32,
    /// Set when this function's frame is inlined into a caller's frame.
    pub stackframe_holder: Option<FuncId>,
    /// Participates in stackframe-pointer sharing (children reach ancestors
    /// through the saved-stackframe-pointer cache).
    pub uses_stackframe_pointers_cache: bool,
    pub stackframe_pointers_cache_size: u32,
    pub is_defined: bool,
    pub was_used: bool,
}

impl Function {
    pub fn new(name: impl Into<String>, rettype: impl Into<String>) -> Self {
        Self { name: name.into(), rettype: rettype.into(), ..Self::default() }
    }

    pub fn push_insn(&mut self, insn: Instruction) -> InsnId {
        self.instrs.push(insn);
        (self.instrs.len() - 1) as InsnId
    }

    pub fn insn(&self, id: InsnId) -> &Instruction {
        &self.instrs[id as usize]
    }

    pub fn insn_mut(&mut self, id: InsnId) -> &mut Instruction {
        &mut self.instrs[id as usize]
    }

    pub fn var(&self, id: VarId) -> &Variable {
        &self.vars[id as usize]
    }

    pub fn var_mut(&mut self, id: VarId) -> &mut Variable {
        &mut self.vars[id as usize]
    }

    pub fn push_var(&mut self, var: Variable) -> VarId {
        self.vars.push(var);
        (self.vars.len() - 1) as VarId
    }

    /// Live variables in declaration order.
    pub fn live_vars(&self) -> impl Iterator<Item = (VarId, &Variable)> {
        self.vars
            .iter()
            .enumerate()
            .filter(|(_, v)| v.alive)
            .map(|(i, v)| (i as VarId, v))
    }
}

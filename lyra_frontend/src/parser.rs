//! Parser context shared by every frontend module
//!
//! The original design of this frontend keeps one mutable context threaded
//! through statement parsing, expression evaluation, register management
//! and function declaration. Each concern lives in its own module as an
//! `impl Parser` block; this module owns the struct and the cross-cutting
//! helpers.

use crate::regalloc::RegFile;
use crate::{CompileFlags, CompileOptions};
use hashbrown::HashMap;
use lyra_common::{LyraError, LyraResult, Position};
use lyra_ir::{
    CompileResult, DbgInfo, FuncId, Function, InsnId, Module, TypeDef, VarId, GPR_SIZE, PAGE_SIZE,
};
use regex::Regex;
use std::collections::BTreeMap;

/// Which of the two passes is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Sizing and forward declaration; nothing is emitted.
    Size,
    /// IR emission.
    Emit,
}

/// What pass one learned about one function, keyed by declaration id.
#[derive(Debug, Clone, Default)]
pub struct Pass1Func {
    pub local_size: u32,
    pub shared_region_size: u32,
    pub was_used: bool,
    /// The function's frame is inlined into its caller's frame.
    pub shares_caller_frame: bool,
    /// Children reach ancestors through the saved-stackframe-pointer cache.
    pub cached_stackframes: bool,
    pub stackframe_pointers_cache_size: u32,
    /// Catchable-label names this function declares; lets pass two
    /// resolve a throw that textually precedes the catch statement.
    pub catchables: Vec<String>,
}

/// Result of the sizing pass, consumed by the emission pass.
#[derive(Debug, Clone, Default)]
pub struct Pass1Info {
    pub funcs: HashMap<u32, Pass1Func>,
}

/// A variable addressed as `(owning function, index)`.
pub type VarKey = (FuncId, VarId);

/// A deferred `++`/`--` recorded during expression evaluation.
#[derive(Debug, Clone)]
pub struct PostfixCall {
    pub op: &'static str,
    pub var: VarKey,
    pub pos: usize,
}

/// A switch block being parsed.
#[derive(Debug, Clone, Default)]
pub struct SwitchBlock {
    pub expr_type: String,
    pub default_case: Option<String>,
    pub cases: BTreeMap<u64, String>,
}

/// Per-function label state.
#[derive(Debug, Clone, Default)]
pub struct LabelCtx {
    /// Label name to the index of the first instruction following its
    /// placement.
    pub defined: HashMap<String, InsnId>,
    /// Jumps awaiting a label: `(label, instruction holding the jump)`.
    pub pending: Vec<(String, InsnId)>,
    /// Catchable-labels declared in this function. Resolved when this
    /// function finishes parsing, because nested functions may throw to a
    /// label placed after their definition.
    pub catchables: HashMap<String, Option<InsnId>>,
    /// Throw sites in descendants: `(label, function of the jump, jump)`.
    pub pending_throws: Vec<(String, FuncId, InsnId)>,
}

pub struct Parser<'a> {
    pub(crate) opts: &'a CompileOptions,
    pub(crate) src: &'a [u8],
    pub(crate) pos: usize,
    pub(crate) pass: Pass,
    pub(crate) pass1: Option<Pass1Info>,

    pub(crate) module: Module,
    /// The function being defined or processed.
    pub(crate) cur: FuncId,

    /// `scope[i]` counts the disjoint scopes seen at depth `i + 1`.
    pub(crate) scope: Vec<u32>,
    pub(crate) scope_current: u32,

    pub(crate) regs: HashMap<FuncId, RegFile>,

    /// Loop context, saved and restored around nested constructs.
    pub(crate) label_end_of_loop: Option<String>,
    pub(crate) label_continue: Option<String>,
    pub(crate) switchblock: Option<SwitchBlock>,

    pub(crate) labels: HashMap<FuncId, LabelCtx>,

    pub(crate) postfix: Vec<PostfixCall>,

    pub(crate) string_region: Vec<u8>,
    pub(crate) string_offsets: HashMap<Vec<u8>, u32>,

    pub(crate) global_size: u32,
    /// Global-region offsets of static-init guard bytes the program start
    /// must zero.
    pub(crate) status_vars: Vec<u32>,

    /// Implicit `export` toggled by the preprocessor sentinels.
    pub(crate) export_inferred: bool,

    pub(crate) tempvar_counter: u32,
    pub(crate) label_counter: u32,

    /// Evaluating for type or constant only, as under `typeof`; nothing is
    /// emitted.
    pub(crate) probe: bool,

    /// The struct/pstruct/union type currently being built.
    pub(crate) current_type: Option<TypeDef>,

    pub(crate) matcher_cache: HashMap<String, Regex>,

    /// Catchable-label names per function, recorded in both passes as
    /// `catch` statements parse.
    pub(crate) declared_catchables: HashMap<FuncId, Vec<String>>,

    /// Accumulator for the type-reading recursion of the
    /// pointer-to-function and function-signature parsing modes.
    pub(crate) contain_parsed: String,

    /// Sink for constructor writes while not emitting, so the sizing pass
    /// and type probes walk identical code paths.
    pub(crate) scratch_insn: lyra_ir::Instruction,

    line_starts: Vec<u32>,
}

impl<'a> Parser<'a> {
    pub fn new(opts: &'a CompileOptions, pass: Pass, pass1: Option<Pass1Info>) -> Self {
        let src = opts.source.as_bytes();
        let mut line_starts = vec![0u32];
        for (i, &b) in src.iter().enumerate() {
            if b == b'\n' {
                line_starts.push((i + 1) as u32);
            }
        }

        let mut module = Module::new();
        let mut root = Function::new("", "void");
        root.is_defined = true;
        root.was_used = true;
        module.alloc(root);

        Self {
            opts,
            src,
            pos: 0,
            pass,
            pass1,
            module,
            cur: Module::ROOT,
            scope: Vec::new(),
            scope_current: 0,
            regs: HashMap::new(),
            label_end_of_loop: None,
            label_continue: None,
            switchblock: None,
            labels: HashMap::new(),
            postfix: Vec::new(),
            string_region: Vec::new(),
            string_offsets: HashMap::new(),
            global_size: 0,
            status_vars: Vec::new(),
            export_inferred: false,
            tempvar_counter: 0,
            label_counter: 0,
            probe: false,
            current_type: None,
            matcher_cache: HashMap::new(),
            declared_catchables: HashMap::new(),
            contain_parsed: String::new(),
            scratch_insn: lyra_ir::Instruction::new(lyra_ir::Opcode::Nop),
            line_starts,
        }
    }

    pub(crate) fn is_emit(&self) -> bool {
        self.pass == Pass::Emit
    }

    /// Whether constructors append instructions: the emission pass, and
    /// not probing for a type.
    pub(crate) fn emitting(&self) -> bool {
        self.pass == Pass::Emit && !self.probe
    }

    /// Position of a byte offset, for diagnostics and debug info.
    pub(crate) fn position_of(&self, offset: usize) -> Position {
        let line = match self.line_starts.binary_search(&(offset as u32)) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        Position::new((line + 1) as u32, offset as u32, self.line_starts[line])
    }

    pub(crate) fn position(&self) -> Position {
        self.position_of(self.pos)
    }

    pub(crate) fn dbg_here(&self) -> Option<DbgInfo> {
        if !self.opts.flags.contains(CompileFlags::GENERATE_DEBUG_INFO) {
            return None;
        }
        let pos = self.position();
        Some(DbgInfo {
            path: self.opts.path.clone(),
            line: pos.line,
            line_offset: pos.line_offset,
        })
    }

    pub(crate) fn err_syntax(&self, msg: impl Into<String>) -> LyraError {
        LyraError::syntax(msg, self.position())
    }

    pub(crate) fn err_syntax_at(&self, msg: impl Into<String>, offset: usize) -> LyraError {
        LyraError::syntax(msg, self.position_of(offset))
    }

    pub(crate) fn err_semantic(&self, msg: impl Into<String>) -> LyraError {
        LyraError::semantic(msg, self.position())
    }

    pub(crate) fn err_semantic_at(&self, msg: impl Into<String>, offset: usize) -> LyraError {
        LyraError::semantic(msg, self.position_of(offset))
    }

    pub(crate) fn err_internal(&self, msg: impl Into<String>) -> LyraError {
        LyraError::internal(msg, self.position())
    }

    /// Declaration-site id of a byte offset. Biased past the page size so
    /// it can never collide with predeclared-variable ids.
    pub(crate) fn decl_id(&self, offset: usize) -> u32 {
        offset as u32 + PAGE_SIZE
    }

    pub(crate) fn func(&self, id: FuncId) -> &Function {
        self.module.func(id)
    }

    pub(crate) fn func_mut(&mut self, id: FuncId) -> &mut Function {
        self.module.func_mut(id)
    }

    pub(crate) fn curfunc(&self) -> &Function {
        self.module.func(self.cur)
    }

    pub(crate) fn curfunc_mut(&mut self) -> &mut Function {
        self.module.func_mut(self.cur)
    }

    pub(crate) fn new_tempvar_name(&mut self) -> String {
        self.tempvar_counter += 1;
        format!("${}", self.tempvar_counter)
    }

    pub(crate) fn new_label_name(&mut self) -> String {
        self.label_counter += 1;
        format!("@{}", self.label_counter)
    }

    /// Intern a constant byte string in the string region, returning its
    /// offset. Strings are deduplicated and kept gpr-aligned so import
    /// slots appended later stay aligned.
    pub(crate) fn intern_string(&mut self, bytes: &[u8]) -> u32 {
        if let Some(&o) = self.string_offsets.get(bytes) {
            return o;
        }
        let offset = self.string_region.len() as u32;
        self.string_region.extend_from_slice(bytes);
        self.string_region.push(0);
        while self.string_region.len() % GPR_SIZE as usize != 0 {
            self.string_region.push(0);
        }
        self.string_offsets.insert(bytes.to_vec(), offset);
        offset
    }

    /// Reserve bytes in the global variable region.
    pub(crate) fn alloc_global(&mut self, size: u32) -> u32 {
        let align = size.min(GPR_SIZE).max(1);
        self.global_size = (self.global_size + align - 1) & !(align - 1);
        let offset = self.global_size;
        self.global_size += size;
        offset
    }

    pub(crate) fn pass1_func(&self, decl_id: u32) -> Option<&Pass1Func> {
        self.pass1.as_ref().and_then(|p| p.funcs.get(&decl_id))
    }

    /// Harvest sizing results at the end of pass one.
    pub fn into_pass1_info(self) -> Pass1Info {
        let mut info = Pass1Info::default();
        for (id, f) in self.module.iter() {
            info.funcs.insert(
                f.decl_id,
                Pass1Func {
                    local_size: f.local_size,
                    shared_region_size: f.shared_region_size,
                    was_used: f.was_used,
                    shares_caller_frame: f.stackframe_holder.is_some(),
                    cached_stackframes: f.uses_stackframe_pointers_cache,
                    stackframe_pointers_cache_size: f.stackframe_pointers_cache_size,
                    catchables: self.declared_catchables.get(&id).cloned().unwrap_or_default(),
                },
            );
        }
        info
    }

    /// Finish pass two and hand the module to a backend.
    pub fn finish(self) -> LyraResult<CompileResult> {
        Ok(CompileResult {
            module: self.module,
            string_region: self.string_region,
            global_region_size: self.global_size,
            status_vars: self.status_vars,
            debug_info: self.opts.flags.contains(CompileFlags::GENERATE_DEBUG_INFO),
        })
    }
}

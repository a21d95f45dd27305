//! Two-pass frontend for the Lyra language
//!
//! Pass one walks the source sizing stackframes and forward-declaring
//! functions without emitting anything; pass two re-walks it emitting IR.
//! Decisions that must agree between the passes (function identity,
//! declaration starts) are derived from byte offsets in the source buffer.

pub mod emit;
pub mod expr;
pub mod funcdecl;
pub mod init;
pub mod reader;
pub mod regalloc;
pub mod scope;
pub mod stackframe;
pub mod stmt;
pub mod symbols;
pub mod types;

mod parser;

use bitflags::bitflags;
use hashbrown::HashMap;
use lyra_common::LyraResult;
use lyra_ir::{CompileResult, Opcode};

pub use parser::{Parser, Pass, Pass1Info};

bitflags! {
    /// Behavior toggles of a compilation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CompileFlags: u32 {
        /// Emit COMMENT instructions narrating register traffic.
        const COMMENT = 1;
        /// Attach source attribution to every instruction.
        const GENERATE_DEBUG_INFO = 1 << 1;
        /// Every function owns its stackframe.
        const NO_STACKFRAME_SHARING = 1 << 2;
        /// Declared-but-undefined functions are linkage errors instead of
        /// imports.
        const NO_FUNCTION_IMPORT = 1 << 3;
        /// Ignore `export` keywords.
        const NO_FUNCTION_EXPORT = 1 << 4;
        /// Treat every variable as volatile.
        const ALL_VAR_VOLATILE = 1 << 5;
    }
}

/// A variable injected into the root function before parsing.
#[derive(Debug, Clone)]
pub struct PredeclaredVar {
    pub name: String,
    pub byref: bool,
    /// The driver wants a callback when the variable is touched; implies
    /// always-volatile.
    pub has_callback: bool,
}

/// Per-opcode register-pressure requirements used by the constructor
/// precondition. Unlisted opcodes fall back to a per-family default.
#[derive(Debug, Clone, Default)]
pub struct MinUnusedRegs {
    overrides: HashMap<Opcode, u32>,
}

impl MinUnusedRegs {
    pub fn set(&mut self, op: Opcode, count: u32) {
        self.overrides.insert(op, count);
    }

    pub fn get(&self, op: Opcode) -> u32 {
        if let Some(&n) = self.overrides.get(&op) {
            return n;
        }
        if op.is_memcpy() {
            3
        } else if op.is_branch() {
            2
        } else if op.is_inert() {
            0
        } else {
            1
        }
    }
}

/// Everything the driver hands to [`compile`].
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Preprocessed source text; comments already stripped, preprocessor
    /// sentinels may remain.
    pub source: String,
    /// Path cited by diagnostics and debug information.
    pub path: String,
    /// log2 of the stride of jump-table entries.
    pub jumpcase_clog2sz: u32,
    /// Extra bytes reserved at the top of each stack page.
    pub stackpage_alloc_provision: u32,
    pub min_unused_regs: MinUnusedRegs,
    pub predeclared_vars: Vec<PredeclaredVar>,
    pub flags: CompileFlags,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            source: String::new(),
            path: String::from("<input>"),
            jumpcase_clog2sz: 3,
            stackpage_alloc_provision: 0,
            min_unused_regs: MinUnusedRegs::default(),
            predeclared_vars: Vec::new(),
            flags: CompileFlags::empty(),
        }
    }
}

impl CompileOptions {
    pub fn new(source: impl Into<String>) -> Self {
        Self { source: source.into(), ..Self::default() }
    }
}

/// Compile a source buffer to IR.
///
/// Runs the sizing pass, then the emission pass over a fresh module,
/// reconciling the two by declaration-site ids.
pub fn compile(opts: &CompileOptions) -> LyraResult<CompileResult> {
    log::debug!("pass 1: sizing {}", opts.path);
    let mut sizing = Parser::new(opts, Pass::Size, None);
    sizing.parse_root()?;
    let pass1 = sizing.into_pass1_info();

    log::debug!("pass 2: emitting {}", opts.path);
    let mut emitting = Parser::new(opts, Pass::Emit, Some(pass1));
    emitting.parse_root()?;
    emitting.finish()
}

//! x86-32 backend
//!
//! Lowers the IR to machine code in three phases: per-instruction byte
//! selection with immediate placeholders, binary offset assignment, and
//! iterative fixup resolution that promotes 8-bit immediates to 32-bit
//! forms until a fixed point. The selection assumes a code segment whose
//! default operand and address sizes are 32 bits.

pub mod encode;
pub mod link;
pub mod select;

use bitflags::bitflags;
use lyra_common::LyraResult;
use lyra_ir::CompileResult;

bitflags! {
    /// Placement choices for the sections following the instructions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BackendFlags: u32 {
        /// Align the string region to 32 bits (the default when no
        /// alignment flag is given).
        const ALIGN32 = 1;
        /// Page-align the string region.
        const PAGEALIGNDATA = 1 << 1;
        /// Page-align everything, sections included.
        const PAGEALIGNALL = 1 << 2;
    }
}

/// Everything the backend produces for the loader.
#[derive(Debug, Clone, Default)]
pub struct BackendResult {
    /// Executable instructions followed by the aligned string region.
    pub execbin: Vec<u8>,
    pub executable_instrs_size: u32,
    pub constant_strings_size: u32,
    pub global_region_size: u32,
    /// Export entries: linking signature, NUL, little-endian u32 offset
    /// of the function within the executable.
    pub export_info: Vec<u8>,
    /// Import entries: linking signature, NUL, little-endian u32 offset
    /// within the string region of the loader-filled address slot.
    pub import_info: Vec<u8>,
    /// Two length-prefixed debug sections: source attribution quadruples
    /// and the file path string table.
    pub debug_info: Vec<u8>,
}

/// Lower a compile result to x86-32 machine code.
pub fn backend_x86(result: &CompileResult, flags: BackendFlags) -> LyraResult<BackendResult> {
    link::run(result, flags)
}

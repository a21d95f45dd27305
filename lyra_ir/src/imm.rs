//! Immediate chains
//!
//! An instruction's immediate is an ordered list of cells, each contributing
//! additively to the final value. Offsets are relative addresses computed by
//! the backend once binary offsets are known; they are always measured from
//! the end of the immediate field (the address of the next instruction on
//! the target).

use crate::function::FuncId;
use crate::instruction::InsnId;
use serde::{Deserialize, Serialize};

/// A reference to an instruction of some function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InsnRef {
    pub func: FuncId,
    pub insn: InsnId,
}

/// One additive cell of an immediate chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImmPart {
    /// Literal addend.
    Value(i64),
    /// Displacement to the referenced instruction.
    OffsetToInstruction(InsnRef),
    /// Displacement to the first instruction of the referenced function.
    OffsetToFunction(FuncId),
    /// Displacement to the base of the global variable region.
    OffsetToGlobalRegion,
    /// Displacement to the base of the constant string region.
    OffsetToStringRegion,
}

impl ImmPart {
    /// The literal value when the chain is a single constant.
    pub fn as_value(&self) -> Option<i64> {
        match self {
            ImmPart::Value(n) => Some(*n),
            _ => None,
        }
    }
}

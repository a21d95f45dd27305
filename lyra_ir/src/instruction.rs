//! IR instructions

use crate::imm::ImmPart;
use crate::opcode::Opcode;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Virtual register id. `%0` is the stack pointer.
pub type RegId = u32;

/// Index of an instruction within its function's chronological vector.
pub type InsnId = u32;

/// Debug source attribution of an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbgInfo {
    pub path: String,
    pub line: u32,
    pub line_offset: u32,
}

/// A single IR instruction.
///
/// Operand registers default to 0 and are meaningful only where the opcode
/// uses them. The immediate chain is summed by backends; `binsz`, when
/// nonzero, requires the encoded form to be padded to exactly that many
/// bytes (jump tables rely on a fixed stride).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: Opcode,
    pub r1: RegId,
    pub r2: RegId,
    pub r3: RegId,
    pub imm: SmallVec<[ImmPart; 2]>,
    pub binsz: u32,
    /// Virtual registers unused at this instruction, informational for
    /// backend pressure decisions.
    pub unused_regs: Vec<RegId>,
    pub dbg: Option<DbgInfo>,
    /// Comment text for listing backends; only on `Opcode::Comment`.
    pub comment: Option<String>,
    /// Opaque byte payload; only on `Opcode::Machinecode`.
    pub machinecode: Vec<u8>,
}

impl Instruction {
    pub fn new(op: Opcode) -> Self {
        Self {
            op,
            r1: 0,
            r2: 0,
            r3: 0,
            imm: SmallVec::new(),
            binsz: 0,
            unused_regs: Vec::new(),
            dbg: None,
            comment: None,
            machinecode: Vec::new(),
        }
    }

    pub fn with_regs(op: Opcode, r1: RegId, r2: RegId, r3: RegId) -> Self {
        Self { r1, r2, r3, ..Self::new(op) }
    }

    /// The immediate when the chain is one literal cell.
    pub fn const_imm(&self) -> Option<i64> {
        match self.imm.as_slice() {
            [part] => part.as_value(),
            _ => None,
        }
    }

    pub fn push_imm(&mut self, part: ImmPart) {
        self.imm.push(part);
    }
}

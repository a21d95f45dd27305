//! The closed opcode set of the IR
//!
//! Opcode names are load-store-register machine semantics, not
//! target-specific. Suffix conventions: `I` takes the immediate as the
//! second source operand, `I2` swaps the immediate into the first source
//! position, `R` takes the branch or load/store address from a register.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    // Arithmetic.
    Add,
    Addi,
    Sub,
    Neg,
    Mul,
    Mulh,
    Div,
    Mod,
    Mulhu,
    Divu,
    Modu,
    Muli,
    Mulhi,
    Divi,
    Modi,
    Divi2,
    Modi2,
    Mulhui,
    Divui,
    Modui,
    Divui2,
    Modui2,

    // Bitwise.
    And,
    Andi,
    Or,
    Ori,
    Xor,
    Xori,
    Not,
    Cpy,

    // Shifts.
    Sll,
    Slli,
    Slli2,
    Srl,
    Srli,
    Srli2,
    Sra,
    Srai,
    Srai2,

    // Extension.
    Zxt,
    Sxt,

    // Set-if-compare.
    Seq,
    Sne,
    Seqi,
    Snei,
    Slt,
    Slte,
    Sltu,
    Slteu,
    Slti,
    Sltei,
    Sltui,
    Slteui,
    Sgti,
    Sgtei,
    Sgtui,
    Sgteui,
    Sz,
    Snz,

    // Branches.
    Jeq,
    Jeqi,
    Jeqr,
    Jne,
    Jnei,
    Jner,
    Jlt,
    Jlti,
    Jltr,
    Jlte,
    Jltei,
    Jlter,
    Jltu,
    Jltui,
    Jltur,
    Jlteu,
    Jlteui,
    Jlteur,
    Jz,
    Jzi,
    Jzr,
    Jnz,
    Jnzi,
    Jnzr,
    J,
    Ji,
    Jr,
    Jl,
    Jli,
    Jlr,
    Jpush,
    Jpushi,
    Jpushr,
    Jpop,

    // Address from instruction pointer.
    Afip,

    // Load immediate.
    Li,

    // Loads.
    Ld8,
    Ld8r,
    Ld8i,
    Ld16,
    Ld16r,
    Ld16i,
    Ld32,
    Ld32r,
    Ld32i,
    Ld64,
    Ld64r,
    Ld64i,

    // Stores.
    St8,
    St8r,
    St8i,
    St16,
    St16r,
    St16i,
    St32,
    St32r,
    St32i,
    St64,
    St64r,
    St64i,

    // Atomic load-store exchanges.
    Ldst8,
    Ldst8r,
    Ldst8i,
    Ldst16,
    Ldst16r,
    Ldst16i,
    Ldst32,
    Ldst32r,
    Ldst32i,
    Ldst64,
    Ldst64r,
    Ldst64i,

    // Bulk copies; the `2` variants copy backward.
    Mem8cpy,
    Mem8cpyi,
    Mem8cpy2,
    Mem8cpyi2,
    Mem16cpy,
    Mem16cpyi,
    Mem16cpy2,
    Mem16cpyi2,
    Mem32cpy,
    Mem32cpyi,
    Mem32cpy2,
    Mem32cpyi2,
    Mem64cpy,
    Mem64cpyi,
    Mem64cpy2,
    Mem64cpyi2,

    // Page management.
    Pagealloc,
    Pagealloci,
    Stackpagealloc,
    Pagefree,
    Pagefreei,
    Stackpagefree,

    // Opaque byte payload.
    Machinecode,

    Nop,
    Comment,
}

impl Opcode {
    /// Mnemonic used in listings and logs.
    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            Add => "ADD",
            Addi => "ADDI",
            Sub => "SUB",
            Neg => "NEG",
            Mul => "MUL",
            Mulh => "MULH",
            Div => "DIV",
            Mod => "MOD",
            Mulhu => "MULHU",
            Divu => "DIVU",
            Modu => "MODU",
            Muli => "MULI",
            Mulhi => "MULHI",
            Divi => "DIVI",
            Modi => "MODI",
            Divi2 => "DIVI2",
            Modi2 => "MODI2",
            Mulhui => "MULHUI",
            Divui => "DIVUI",
            Modui => "MODUI",
            Divui2 => "DIVUI2",
            Modui2 => "MODUI2",
            And => "AND",
            Andi => "ANDI",
            Or => "OR",
            Ori => "ORI",
            Xor => "XOR",
            Xori => "XORI",
            Not => "NOT",
            Cpy => "CPY",
            Sll => "SLL",
            Slli => "SLLI",
            Slli2 => "SLLI2",
            Srl => "SRL",
            Srli => "SRLI",
            Srli2 => "SRLI2",
            Sra => "SRA",
            Srai => "SRAI",
            Srai2 => "SRAI2",
            Zxt => "ZXT",
            Sxt => "SXT",
            Seq => "SEQ",
            Sne => "SNE",
            Seqi => "SEQI",
            Snei => "SNEI",
            Slt => "SLT",
            Slte => "SLTE",
            Sltu => "SLTU",
            Slteu => "SLTEU",
            Slti => "SLTI",
            Sltei => "SLTEI",
            Sltui => "SLTUI",
            Slteui => "SLTEUI",
            Sgti => "SGTI",
            Sgtei => "SGTEI",
            Sgtui => "SGTUI",
            Sgteui => "SGTEUI",
            Sz => "SZ",
            Snz => "SNZ",
            Jeq => "JEQ",
            Jeqi => "JEQI",
            Jeqr => "JEQR",
            Jne => "JNE",
            Jnei => "JNEI",
            Jner => "JNER",
            Jlt => "JLT",
            Jlti => "JLTI",
            Jltr => "JLTR",
            Jlte => "JLTE",
            Jltei => "JLTEI",
            Jlter => "JLTER",
            Jltu => "JLTU",
            Jltui => "JLTUI",
            Jltur => "JLTUR",
            Jlteu => "JLTEU",
            Jlteui => "JLTEUI",
            Jlteur => "JLTEUR",
            Jz => "JZ",
            Jzi => "JZI",
            Jzr => "JZR",
            Jnz => "JNZ",
            Jnzi => "JNZI",
            Jnzr => "JNZR",
            J => "J",
            Ji => "JI",
            Jr => "JR",
            Jl => "JL",
            Jli => "JLI",
            Jlr => "JLR",
            Jpush => "JPUSH",
            Jpushi => "JPUSHI",
            Jpushr => "JPUSHR",
            Jpop => "JPOP",
            Afip => "AFIP",
            Li => "LI",
            Ld8 => "LD8",
            Ld8r => "LD8R",
            Ld8i => "LD8I",
            Ld16 => "LD16",
            Ld16r => "LD16R",
            Ld16i => "LD16I",
            Ld32 => "LD32",
            Ld32r => "LD32R",
            Ld32i => "LD32I",
            Ld64 => "LD64",
            Ld64r => "LD64R",
            Ld64i => "LD64I",
            St8 => "ST8",
            St8r => "ST8R",
            St8i => "ST8I",
            St16 => "ST16",
            St16r => "ST16R",
            St16i => "ST16I",
            St32 => "ST32",
            St32r => "ST32R",
            St32i => "ST32I",
            St64 => "ST64",
            St64r => "ST64R",
            St64i => "ST64I",
            Ldst8 => "LDST8",
            Ldst8r => "LDST8R",
            Ldst8i => "LDST8I",
            Ldst16 => "LDST16",
            Ldst16r => "LDST16R",
            Ldst16i => "LDST16I",
            Ldst32 => "LDST32",
            Ldst32r => "LDST32R",
            Ldst32i => "LDST32I",
            Ldst64 => "LDST64",
            Ldst64r => "LDST64R",
            Ldst64i => "LDST64I",
            Mem8cpy => "MEM8CPY",
            Mem8cpyi => "MEM8CPYI",
            Mem8cpy2 => "MEM8CPY2",
            Mem8cpyi2 => "MEM8CPYI2",
            Mem16cpy => "MEM16CPY",
            Mem16cpyi => "MEM16CPYI",
            Mem16cpy2 => "MEM16CPY2",
            Mem16cpyi2 => "MEM16CPYI2",
            Mem32cpy => "MEM32CPY",
            Mem32cpyi => "MEM32CPYI",
            Mem32cpy2 => "MEM32CPY2",
            Mem32cpyi2 => "MEM32CPYI2",
            Mem64cpy => "MEM64CPY",
            Mem64cpyi => "MEM64CPYI",
            Mem64cpy2 => "MEM64CPY2",
            Mem64cpyi2 => "MEM64CPYI2",
            Pagealloc => "PAGEALLOC",
            Pagealloci => "PAGEALLOCI",
            Stackpagealloc => "STACKPAGEALLOC",
            Pagefree => "PAGEFREE",
            Pagefreei => "PAGEFREEI",
            Stackpagefree => "STACKPAGEFREE",
            Machinecode => "MACHINECODE",
            Nop => "NOP",
            Comment => "COMMENT",
        }
    }

    /// Whether this opcode transfers control.
    pub fn is_branch(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Jeq | Jeqi
                | Jeqr
                | Jne
                | Jnei
                | Jner
                | Jlt
                | Jlti
                | Jltr
                | Jlte
                | Jltei
                | Jlter
                | Jltu
                | Jltui
                | Jltur
                | Jlteu
                | Jlteui
                | Jlteur
                | Jz
                | Jzi
                | Jzr
                | Jnz
                | Jnzi
                | Jnzr
                | J
                | Ji
                | Jr
                | Jl
                | Jli
                | Jlr
                | Jpush
                | Jpushi
                | Jpushr
                | Jpop
        )
    }

    /// Whether this opcode is a bulk memory copy.
    pub fn is_memcpy(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Mem8cpy
                | Mem8cpyi
                | Mem8cpy2
                | Mem8cpyi2
                | Mem16cpy
                | Mem16cpyi
                | Mem16cpy2
                | Mem16cpyi2
                | Mem32cpy
                | Mem32cpyi
                | Mem32cpy2
                | Mem32cpyi2
                | Mem64cpy
                | Mem64cpyi
                | Mem64cpy2
                | Mem64cpyi2
        )
    }

    /// Whether this opcode emits nothing executable.
    pub fn is_inert(self) -> bool {
        matches!(self, Opcode::Nop | Opcode::Comment)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

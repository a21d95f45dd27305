//! Source location tracking for the Lyra compiler

use serde::{Deserialize, Serialize};
use std::fmt;

/// A position in the preprocessed source buffer.
///
/// The frontend works on a flat byte buffer, so a position is a line number
/// plus two byte offsets: the offset of the position itself and the offset
/// of the start of its line. Both are kept because debug information and
/// error reports cite them separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub offset: u32,
    pub line_offset: u32,
}

impl Position {
    pub fn new(line: u32, offset: u32, line_offset: u32) -> Self {
        Self { line, offset, line_offset }
    }

    pub fn start() -> Self {
        Self::new(1, 0, 0)
    }

    /// Column within the line, 1-based.
    pub fn column(&self) -> u32 {
        self.offset - self.line_offset + 1
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_is_relative_to_line_start() {
        let pos = Position::new(3, 47, 40);
        assert_eq!(pos.column(), 8);
    }

    #[test]
    fn display_cites_line_and_offset() {
        assert_eq!(Position::new(12, 345, 340).to_string(), "12:345");
    }
}

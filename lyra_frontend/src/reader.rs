//! Byte cursor over the preprocessed source buffer
//!
//! Comments are stripped before the frontend runs, so skipping whitespace
//! only has to handle blanks, newlines and the preprocessor sentinels
//! `#+e` / `#-e`, which toggle implicit `export` on following declarations.

use crate::parser::Parser;
use lyra_common::LyraResult;

impl Parser<'_> {
    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.src.len() || self.src[self.pos] == 0
    }

    pub(crate) fn peek(&self) -> u8 {
        if self.pos < self.src.len() {
            self.src[self.pos]
        } else {
            0
        }
    }

    pub(crate) fn peek_at(&self, offset: usize) -> u8 {
        let i = self.pos + offset;
        if i < self.src.len() {
            self.src[i]
        } else {
            0
        }
    }

    pub(crate) fn bump(&mut self) -> u8 {
        let b = self.peek();
        if b != 0 {
            self.pos += 1;
        }
        b
    }

    /// Skip whitespace and preprocessor sentinels.
    pub(crate) fn skip_space(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.pos += 1;
                }
                b'#' if self.peek_at(1) == b'+' && self.peek_at(2) == b'e' => {
                    self.pos += 3;
                    self.export_inferred = true;
                }
                b'#' if self.peek_at(1) == b'-' && self.peek_at(2) == b'e' => {
                    self.pos += 3;
                    self.export_inferred = false;
                }
                _ => return,
            }
        }
    }

    /// Back the cursor up over whitespace so errors cite the end of the
    /// offending token instead of the start of the next one.
    pub(crate) fn reverse_skip_space(&mut self) {
        while self.pos > 0 && (self.src[self.pos - 1] as char).is_ascii_whitespace() {
            self.pos -= 1;
        }
    }

    /// Whether there is a newline between the cursor and the next
    /// non-blank character. Used by the `if`-without-`else` safeguard.
    pub(crate) fn newline_before_next_token(&self) -> bool {
        let mut i = self.pos;
        while i < self.src.len() {
            match self.src[i] {
                b'\n' => return true,
                b' ' | b'\t' | b'\r' => i += 1,
                _ => return false,
            }
        }
        true
    }

    pub(crate) fn is_ident_start(b: u8) -> bool {
        b.is_ascii_alphabetic() || b == b'_'
    }

    pub(crate) fn is_ident_continue(b: u8) -> bool {
        b.is_ascii_alphanumeric() || b == b'_'
    }

    /// Read an identifier, or an empty string when the cursor is not on
    /// one. Does not skip leading space.
    pub(crate) fn read_symbol(&mut self) -> String {
        let start = self.pos;
        if !Self::is_ident_start(self.peek()) {
            return String::new();
        }
        while Self::is_ident_continue(self.peek()) {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.src[start..self.pos]).into_owned()
    }

    /// Consume `keyword` when it appears at the cursor as a whole word,
    /// with trailing space skipped.
    pub(crate) fn check_keyword(&mut self, keyword: &str) -> bool {
        let k = keyword.as_bytes();
        if self.src.len() - self.pos.min(self.src.len()) < k.len() {
            return false;
        }
        if &self.src[self.pos..self.pos + k.len()] != k {
            return false;
        }
        if Self::is_ident_continue(self.peek_at(k.len())) {
            return false;
        }
        self.pos += k.len();
        self.skip_space();
        true
    }

    /// Consume one expected punctuation byte, with trailing space skipped.
    pub(crate) fn expect_byte(&mut self, b: u8) -> LyraResult<()> {
        if self.peek() != b {
            self.reverse_skip_space();
            return Err(self.err_syntax(format!("expecting '{}'", b as char)));
        }
        self.pos += 1;
        self.skip_space();
        Ok(())
    }

    /// Consume one punctuation byte when present, with trailing space
    /// skipped.
    pub(crate) fn accept_byte(&mut self, b: u8) -> bool {
        if self.peek() == b {
            self.pos += 1;
            self.skip_space();
            true
        } else {
            false
        }
    }

    /// Read an integer literal: decimal, `0x`, `0o`, `0b` or a quoted
    /// character. Returns `None` when the cursor is not on one.
    pub(crate) fn read_number(&mut self) -> LyraResult<Option<u64>> {
        let b = self.peek();
        if b == b'\'' {
            return self.read_char_literal().map(Some);
        }
        if !b.is_ascii_digit() {
            return Ok(None);
        }

        let (radix, skip) = if b == b'0' {
            match self.peek_at(1) {
                b'x' | b'X' => (16, 2),
                b'o' | b'O' => (8, 2),
                b'b' | b'B' => (2, 2),
                _ => (10, 0),
            }
        } else {
            (10, 0)
        };
        self.pos += skip;

        let start = self.pos;
        let mut value: u64 = 0;
        while let Some(d) = (self.peek() as char).to_digit(radix) {
            value = value
                .checked_mul(radix as u64)
                .and_then(|v| v.checked_add(d as u64))
                .ok_or_else(|| self.err_syntax("integer literal overflows 64 bits"))?;
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.err_syntax("expecting digits after the radix prefix"));
        }
        Ok(Some(value))
    }

    fn read_char_literal(&mut self) -> LyraResult<u64> {
        self.pos += 1; // opening quote
        let c = match self.bump() {
            b'\\' => match self.bump() {
                b'n' => b'\n',
                b't' => b'\t',
                b'r' => b'\r',
                b'0' => 0,
                b'\\' => b'\\',
                b'\'' => b'\'',
                b'"' => b'"',
                other => other,
            },
            0 => return Err(self.err_syntax("unterminated character literal")),
            other => other,
        };
        if self.peek() != b'\'' {
            return Err(self.err_syntax("expecting closing quote of character literal"));
        }
        self.pos += 1;
        Ok(c as u64)
    }

    /// Read a double-quoted string literal, processing backslash escapes.
    /// The cursor must be on the opening quote.
    pub(crate) fn read_string_literal(&mut self) -> LyraResult<Vec<u8>> {
        self.pos += 1; // opening quote
        let mut out = Vec::new();
        loop {
            match self.bump() {
                0 => return Err(self.err_syntax("unterminated string literal")),
                b'"' => break,
                b'\\' => match self.bump() {
                    b'n' => out.push(b'\n'),
                    b't' => out.push(b'\t'),
                    b'r' => out.push(b'\r'),
                    b'0' => out.push(0),
                    0 => return Err(self.err_syntax("unterminated string literal")),
                    other => out.push(other),
                },
                other => out.push(other),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::{Parser, Pass};
    use crate::CompileOptions;

    #[test]
    fn skip_space_handles_export_sentinels() {
        let opts = CompileOptions::new("  #+e  uint");
        let mut p = Parser::new(&opts, Pass::Size, None);
        p.skip_space();
        assert!(p.export_inferred);
        assert_eq!(p.peek(), b'u');
    }

    #[test]
    fn read_symbol_stops_at_punctuation() {
        let opts = CompileOptions::new("foo_1(");
        let mut p = Parser::new(&opts, Pass::Size, None);
        assert_eq!(p.read_symbol(), "foo_1");
        assert_eq!(p.peek(), b'(');
    }

    #[test]
    fn check_keyword_requires_word_boundary() {
        let opts = CompileOptions::new("elsewhere");
        let mut p = Parser::new(&opts, Pass::Size, None);
        assert!(!p.check_keyword("else"));
        assert_eq!(p.pos, 0);
    }

    #[test]
    fn number_radixes() {
        for (src, expect) in [("42", 42u64), ("0x2a", 42), ("0o52", 42), ("0b101010", 42)] {
            let opts = CompileOptions::new(src);
            let mut p = Parser::new(&opts, Pass::Size, None);
            assert_eq!(p.read_number().unwrap(), Some(expect));
        }
    }

    #[test]
    fn char_literal_escapes() {
        let opts = CompileOptions::new("'\\n'");
        let mut p = Parser::new(&opts, Pass::Size, None);
        assert_eq!(p.read_number().unwrap(), Some(b'\n' as u64));
    }

    #[test]
    fn string_literal_escapes() {
        let opts = CompileOptions::new("\"a\\tb\"");
        let mut p = Parser::new(&opts, Pass::Size, None);
        assert_eq!(p.read_string_literal().unwrap(), b"a\tb".to_vec());
    }

    #[test]
    fn newline_safeguard_sees_through_blanks() {
        let opts = CompileOptions::new("   \n else");
        let p = Parser::new(&opts, Pass::Size, None);
        assert!(p.newline_before_next_token());
    }
}

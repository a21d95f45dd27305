//! Text formatting with field padding
//!
//! Format specifier syntax is `%[|][pad][width]spec` where `spec` is one of
//! `i` (signed decimal), `d` (unsigned decimal), `x` (hexadecimal), `o`
//! (octal), `b` (binary), `c` (character) or `s` (string). `width` is the
//! minimum field width. `pad`, when present, is one or more characters that
//! are neither `1`..`9` nor a specifier character unless escaped with a
//! backslash: the first character replaces the space fill, the rest are
//! written between the fill and the substituted value. `|` left-aligns the
//! value within the field. `%%` is a literal percent.
//!
//! ```
//! use lyra_common::{strfmt, FmtArg};
//! assert_eq!(strfmt("Value is :%10d", &[FmtArg::Uint(22)]), "Value is :        22");
//! assert_eq!(strfmt("Value is %-> [10d]", &[FmtArg::Uint(22)]), "Value is -----> [22]");
//! ```

/// An argument consumed by one format specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmtArg<'a> {
    Int(i64),
    Uint(u64),
    Char(char),
    Str(&'a str),
}

impl FmtArg<'_> {
    fn as_u64(&self) -> u64 {
        match *self {
            FmtArg::Int(n) => n as u64,
            FmtArg::Uint(n) => n,
            FmtArg::Char(c) => c as u64,
            FmtArg::Str(_) => 0,
        }
    }

    fn as_i64(&self) -> i64 {
        self.as_u64() as i64
    }
}

fn is_specifier(c: char) -> bool {
    matches!(c, 'i' | 'd' | 'x' | 'o' | 'b' | 'c' | 's')
}

fn to_radix(mut n: u64, radix: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n != 0 {
        digits.push(char::from_digit((n % radix) as u32, radix as u32).unwrap());
        n /= radix;
    }
    digits.iter().rev().collect()
}

/// Format `fmt`, substituting one argument per specifier in order.
///
/// Specifiers beyond the argument list substitute nothing.
pub fn strfmt(fmt: &str, args: &[FmtArg]) -> String {
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars().peekable();
    let mut next_arg = 0usize;

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }

        let left_align = if chars.peek() == Some(&'|') {
            chars.next();
            true
        } else {
            false
        };

        // Pad characters: anything outside 1..9 and the specifier set,
        // with backslash lifting that restriction for one character.
        let mut pad = String::new();
        while let Some(&p) = chars.peek() {
            if p == '\\' {
                chars.next();
                if let Some(escaped) = chars.next() {
                    pad.push(escaped);
                }
            } else if !p.is_ascii_digit() && !is_specifier(p) || p == '0' {
                chars.next();
                pad.push(p);
            } else {
                break;
            }
        }

        let mut width = 0usize;
        while let Some(&d) = chars.peek() {
            if d.is_ascii_digit() {
                chars.next();
                width = width * 10 + d.to_digit(10).unwrap() as usize;
            } else {
                break;
            }
        }

        let spec = match chars.next() {
            Some(s) if is_specifier(s) => s,
            // A malformed specifier is copied through untouched.
            Some(s) => {
                out.push('%');
                out.push_str(&pad);
                if width != 0 {
                    out.push_str(&width.to_string());
                }
                out.push(s);
                continue;
            }
            None => break,
        };

        let arg = args.get(next_arg).copied();
        next_arg += 1;

        let value = match (spec, arg) {
            (_, None) => String::new(),
            ('i', Some(a)) => a.as_i64().to_string(),
            ('d', Some(a)) => a.as_u64().to_string(),
            ('x', Some(a)) => to_radix(a.as_u64(), 16),
            ('o', Some(a)) => to_radix(a.as_u64(), 8),
            ('b', Some(a)) => to_radix(a.as_u64(), 2),
            ('c', Some(FmtArg::Char(c))) => c.to_string(),
            ('c', Some(a)) => char::from_u32(a.as_u64() as u32).unwrap_or('\u{fffd}').to_string(),
            ('s', Some(FmtArg::Str(s))) => s.to_string(),
            ('s', Some(_)) => String::new(),
            _ => String::new(),
        };

        let mut pad_chars = pad.chars();
        let fill = pad_chars.next().unwrap_or(' ');
        let extras: String = pad_chars.collect();

        let used = value.chars().count() + extras.chars().count();
        let fill_count = width.saturating_sub(used);

        if left_align {
            out.push_str(&value);
            out.push_str(&extras);
            for _ in 0..fill_count {
                out.push(fill);
            }
        } else {
            for _ in 0..fill_count {
                out.push(fill);
            }
            out.push_str(&extras);
            out.push_str(&value);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(strfmt("no specifiers here", &[]), "no specifiers here");
    }

    #[test]
    fn literal_percent() {
        assert_eq!(strfmt("100%% done", &[]), "100% done");
    }

    #[test]
    fn right_align_default() {
        assert_eq!(strfmt("Value is :%10d", &[FmtArg::Uint(22)]), "Value is :        22");
    }

    #[test]
    fn pad_fill_and_overwrites() {
        assert_eq!(strfmt("Value is %-> [10d]", &[FmtArg::Uint(22)]), "Value is -----> [22]");
    }

    #[test]
    fn escaped_specifier_char_as_pad() {
        assert_eq!(strfmt("Value is %-> 0\\x10x]", &[FmtArg::Uint(22)]), "Value is ----> 0x16]");
    }

    #[test]
    fn escaped_backslash_as_pad() {
        assert_eq!(strfmt("Value is %-> \\\\10d]", &[FmtArg::Uint(22)]), "Value is -----> \\22]");
    }

    #[test]
    fn left_align_puts_overwrites_after_value() {
        assert_eq!(strfmt("value is : [>%|-<]10d", &[FmtArg::Uint(22)]), "value is : [>22<]------");
    }

    #[test]
    fn signed_decimal() {
        assert_eq!(strfmt("%i", &[FmtArg::Int(-5)]), "-5");
    }

    #[test_case('x', 255, "ff" ; "hex")]
    #[test_case('o', 8, "10" ; "octal")]
    #[test_case('b', 5, "101" ; "binary")]
    fn radix_specifiers(spec: char, n: u64, expect: &str) {
        assert_eq!(strfmt(&format!("%{spec}"), &[FmtArg::Uint(n)]), expect);
    }

    #[test]
    fn char_and_str() {
        assert_eq!(strfmt("%c%s", &[FmtArg::Char('a'), FmtArg::Str("bc")]), "abc");
    }

    #[test]
    fn missing_argument_substitutes_nothing() {
        assert_eq!(strfmt("x=%d.", &[]), "x=.");
    }

    #[test]
    fn zero_is_a_valid_pad_character() {
        assert_eq!(strfmt("%04x", &[FmtArg::Uint(0xab)]), "00ab");
    }
}

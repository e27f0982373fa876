//! Backslash escapes in command line arguments, so that `--read-ter '\r\n'` means CR LF.
use std::iter::Peekable;
use std::str::Chars;

use anyhow::anyhow;

use crate::Error;

/// Decode a terminator argument. An empty argument disables the terminator.
pub fn parse_terminator(arg: &str) -> crate::Result<Option<String>> {
    if arg.is_empty() {
        return Ok(None);
    }
    decode_escapes(arg).map(Some)
}

/// Replace backslash escapes with the characters they stand for.
///
/// Unknown escapes such as `\q` are kept as written.
pub fn decode_escapes(input: &str) -> crate::Result<String> {
    let mut ret = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            ret.push(c);
            continue;
        }
        let esc = chars
            .next()
            .ok_or_else(|| Error::argument(anyhow!("`{}`: \\ at end of string", input)))?;
        match esc {
            '\n' => {}
            '\\' => ret.push('\\'),
            '\'' => ret.push('\''),
            '"' => ret.push('"'),
            'a' => ret.push('\x07'),
            'b' => ret.push('\x08'),
            'f' => ret.push('\x0c'),
            'n' => ret.push('\n'),
            'r' => ret.push('\r'),
            't' => ret.push('\t'),
            'v' => ret.push('\x0b'),
            '0'..='7' => ret.push(octal(esc, &mut chars)),
            'x' => ret.push(hex(input, &mut chars, 2)?),
            'u' => ret.push(hex(input, &mut chars, 4)?),
            'U' => ret.push(hex(input, &mut chars, 8)?),
            'N' => {
                return Err(Error::argument(anyhow!(
                    "`{}`: named unicode escapes are not supported",
                    input
                )))
            }
            other => {
                ret.push('\\');
                ret.push(other);
            }
        }
    }
    Ok(ret)
}

// up to three digits, the first one already consumed
fn octal(first: char, chars: &mut Peekable<Chars>) -> char {
    let mut value = first.to_digit(8).unwrap_or(0);
    for _ in 0..2 {
        match chars.peek().and_then(|x| x.to_digit(8)) {
            Some(digit) => {
                value = value * 8 + digit;
                chars.next();
            }
            None => break,
        }
    }
    // at most 0o777
    std::char::from_u32(value).unwrap_or('\u{FFFD}')
}

fn hex(input: &str, chars: &mut Peekable<Chars>, digits: usize) -> crate::Result<char> {
    let mut value = 0_u32;
    for _ in 0..digits {
        let digit = chars
            .peek()
            .and_then(|x| x.to_digit(16))
            .ok_or_else(|| Error::argument(anyhow!("`{}`: truncated \\x, \\u or \\U escape", input)))?;
        value = value * 16 + digit;
        chars.next();
    }
    std::char::from_u32(value)
        .ok_or_else(|| Error::argument(anyhow!("`{}`: illegal unicode character {:#X}", input, value)))
}

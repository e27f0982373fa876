use std::fmt::Write;

use crate::scpi::Sample;

pub const SAMPLE_PREVIEW_LEN: usize = 20;
pub const RAW_PREVIEW_LEN: usize = 64;
pub const ELLIPSIS: &str = "...";

/// `[a, b, c]`, cut to the first [`SAMPLE_PREVIEW_LEN`] samples and followed by an ellipsis if longer.
pub fn format_samples(samples: &[Sample]) -> String {
    let shown = &samples[..samples.len().min(SAMPLE_PREVIEW_LEN)];
    let list = shown.iter().map(|x| x.to_string()).collect::<Vec<_>>().join(", ");
    if samples.len() > SAMPLE_PREVIEW_LEN {
        format!("[{}] {}", list, ELLIPSIS)
    } else {
        format!("[{}]", list)
    }
}

/// The first [`RAW_PREVIEW_LEN`] bytes as a byte string literal, always followed by an ellipsis.
pub fn format_raw(data: &[u8]) -> String {
    let shown = &data[..data.len().min(RAW_PREVIEW_LEN)];
    format!("{} {}", byte_literal(shown), ELLIPSIS)
}

/// Render bytes as `b'...'`, escaping everything that is not printable ASCII.
pub fn byte_literal(data: &[u8]) -> String {
    let quote = if data.contains(&b'\'') && !data.contains(&b'"') {
        '"'
    } else {
        '\''
    };
    let mut ret = String::with_capacity(data.len() + 3);
    ret.push('b');
    ret.push(quote);
    for &x in data {
        match x {
            b'\\' => ret.push_str("\\\\"),
            b'\t' => ret.push_str("\\t"),
            b'\n' => ret.push_str("\\n"),
            b'\r' => ret.push_str("\\r"),
            x if x as char == quote => {
                ret.push('\\');
                ret.push(quote);
            }
            0x20..=0x7E => ret.push(x as char),
            x => {
                let _ = write!(ret, "\\x{:02x}", x);
            }
        }
    }
    ret.push(quote);
    ret
}

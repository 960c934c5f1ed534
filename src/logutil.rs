//! Log helpers for text that arrives from the mesh or from HTTP clients.
//! Such strings can carry newlines or control bytes that would split a log line.

use std::fmt::Write;

/// Single-line, length-capped rendering of untrusted text for log output.
///
/// Newlines, tabs and other control characters are escaped; anything past
/// `max_chars` characters is cut and marked with `…`. Cutting counts chars,
/// so multi-byte UTF-8 sequences are never split.
pub fn preview(s: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(s.len().min(max_chars) + 4);
    for (count, ch) in s.chars().enumerate() {
        if count >= max_chars {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Hex dump of the first `max` bytes, for trace-level frame logging.
pub fn hex_snippet(data: &[u8], max: usize) -> String {
    let mut out = String::with_capacity(max.min(data.len()) * 2);
    for b in data.iter().take(max) {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

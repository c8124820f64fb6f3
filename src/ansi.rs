//! Escape-sequence stripping for trigger matching.
//!
//! Output is only cleaned for substring search; the bytes forwarded to the
//! real terminal are never touched.

use regex::Regex;
use std::sync::OnceLock;

/// Cursor-forward (`ESC [ n C`). Some TUIs pad words with it instead of spaces.
fn cursor_forward_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1b\[[0-9]*C").expect("valid cursor-forward pattern"))
}

fn escape_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"\x1b\[\??[0-9;]*[a-zA-Z]", // CSI, optionally private-mode
            r"|\x1b\][^\x07]*\x07",      // OSC terminated by BEL
            r"|\x1b[()][0-9A-Za-z]",     // charset selection
            r"|\x1b[=>]",                // keypad mode
        ))
        .expect("valid escape pattern")
    })
}

/// Remove terminal control sequences so trigger phrases can be found with a
/// plain substring search.
///
/// Cursor-forward sequences become a single space before anything else is
/// removed, otherwise adjacent words drawn with cursor movement would fuse.
/// Truncated sequences are left as-is.
pub fn strip_escapes(text: &str) -> String {
    let spaced = cursor_forward_re().replace_all(text, " ");
    escape_re().replace_all(&spaced, "").into_owned()
}

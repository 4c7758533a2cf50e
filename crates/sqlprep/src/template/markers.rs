//! Marker protocol.
//!
//! Every expansion point is replaced by a two-char marker (NUL followed by
//! the 1-based slot index encoded as a `char`) and the replacement text is
//! parked in a side table. Scanning passes skip the char after a NUL, so a
//! payload char that happens to look like `?` or `:` can never be re-parsed,
//! and nothing ever expands inside an already-substituted region. A final
//! [`Markers::resolve`] pass splices the replacements back in.
//!
//! NUL cannot occur in normal SQL input, which is what makes the scheme
//! collision-free. Index values that would land in the UTF-16 surrogate gap
//! are unrepresentable as `char`; hitting that bound (55k+ live
//! substitutions in one query) is reported as too many substitutions.

use crate::error::{PrepError, PrepResult};

/// The marker sentinel.
pub(crate) const MARK: char = '\0';

/// Side table of pending replacements.
#[derive(Debug, Default)]
pub(crate) struct Markers {
    repl: Vec<String>,
}

impl Markers {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Park a replacement and return the marker token to splice into the
    /// working string.
    pub(crate) fn push(&mut self, replacement: String) -> PrepResult<String> {
        self.repl.push(replacement);
        let idx = self.repl.len() as u32;
        let Some(payload) = char::from_u32(idx) else {
            return Err(PrepError::template("too many substitutions in one query"));
        };
        let mut marker = String::with_capacity(2);
        marker.push(MARK);
        marker.push(payload);
        Ok(marker)
    }

    /// Replace every marker in `s` with its parked replacement.
    pub(crate) fn resolve(&self, s: &str) -> PrepResult<String> {
        let mut out = String::with_capacity(s.len());
        let mut chars = s.chars();
        while let Some(ch) = chars.next() {
            if ch != MARK {
                out.push(ch);
                continue;
            }
            let payload = chars
                .next()
                .ok_or_else(|| PrepError::template("dangling substitution marker"))?;
            let text = (payload as usize)
                .checked_sub(1)
                .and_then(|idx| self.repl.get(idx))
                .ok_or_else(|| PrepError::template("unknown substitution marker"))?;
            out.push_str(text);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut m = Markers::new();
        let a = m.push("'one'".to_string()).unwrap();
        let b = m.push("two".to_string()).unwrap();
        let s = format!("x {a} y {b} z");
        assert_eq!(m.resolve(&s).unwrap(), "x 'one' y two z");
    }

    #[test]
    fn payload_chars_are_opaque() {
        let mut m = Markers::new();
        // Fill slots until the payload char equals '?' (0x3F = 63).
        let mut marker = String::new();
        for i in 1..='?' as usize {
            marker = m.push(format!("v{i}")).unwrap();
        }
        assert_eq!(marker.chars().nth(1), Some('?'));
        let s = format!("a {marker} b");
        assert_eq!(m.resolve(&s).unwrap(), "a v63 b");
    }

    #[test]
    fn unknown_marker_fails() {
        let m = Markers::new();
        assert!(m.resolve("x\u{0}\u{5}").is_err());
        assert!(m.resolve("x\u{0}").is_err());
    }
}

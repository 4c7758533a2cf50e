//! String-literal scanner.
//!
//! Isolates single-quoted SQL literals before any substitution pass runs:
//! each literal (quotes included) is parked in the marker table and replaced
//! by a marker, so no later pass can mis-parse template syntax that appears
//! inside quoted text. Inside a literal, `\'` and doubled `''` do not close
//! it.

use super::markers::Markers;
use crate::error::{PrepError, PrepResult};

/// Replace every single-quoted literal in `sql` with a marker.
pub(crate) fn hide_literals(sql: &str, markers: &mut Markers) -> PrepResult<String> {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\'' {
            out.push(ch);
            continue;
        }

        let mut literal = String::from('\'');
        loop {
            match chars.next() {
                Some('\\') => {
                    literal.push('\\');
                    match chars.next() {
                        Some(escaped) => literal.push(escaped),
                        None => return Err(PrepError::template("unterminated string literal")),
                    }
                }
                Some('\'') => {
                    if chars.peek() == Some(&'\'') {
                        literal.push('\'');
                        literal.push(chars.next().unwrap());
                    } else {
                        literal.push('\'');
                        break;
                    }
                }
                Some(c) => literal.push(c),
                None => return Err(PrepError::template("unterminated string literal")),
            }
        }
        out.push_str(&markers.push(literal)?);
    }

    Ok(out)
}

//! Quoting service: host values → SQL literals, names → quoted identifiers.
//!
//! Everything here is pure. String-body escaping defaults to the engine's
//! built-in rules; when a live connection is available the command facade
//! routes through the connection's `esc` instead (some servers change
//! escaping rules per session, e.g. `NO_BACKSLASH_ESCAPES`).
//!
//! # Example
//! ```ignore
//! use sqlprep::{Engine, Quoter, ReservedWords, SqlValue};
//!
//! let reserved: ReservedWords = ["order"].into_iter().collect();
//! let q = Quoter::with_reserved(Engine::MySql, reserved.into());
//! assert_eq!(q.ident("Order.col")?, "`Order`.col");
//! assert_eq!(q.value(&SqlValue::from("it's"))?, r"'it\'s'");
//! # Ok::<(), sqlprep::PrepError>(())
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PrepError, PrepResult};
use crate::value::{format_float, SqlValue};

/// Target SQL dialect. The core is engine-agnostic up to a small set of
/// knobs: boolean literal spelling, string-body escaping, and whether an
/// errno classifier is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    #[default]
    MySql,
    Generic,
}

impl Engine {
    /// Boolean literal spelling: `1`/`0` on MySQL, `true`/`false` otherwise.
    pub fn bool_sql(self, value: bool) -> &'static str {
        match self {
            Self::MySql => {
                if value {
                    "1"
                } else {
                    "0"
                }
            }
            Self::Generic => {
                if value {
                    "true"
                } else {
                    "false"
                }
            }
        }
    }

    /// Canonical spelling of an engine keyword sentinel.
    pub fn keyword_sql(self, keyword: Keyword) -> &'static str {
        match keyword {
            Keyword::Null => "null",
            Keyword::Default => "default",
        }
    }
}

/// Symbolic handles for engine-distinguished keyword values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Null,
    Default,
}

/// Set of identifiers the engine parses as keywords; members require
/// back-quoting when used as identifiers. Lookup is case-insensitive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReservedWords {
    words: HashSet<String>,
}

impl ReservedWords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, word: impl AsRef<str>) {
        self.words.insert(word.as_ref().to_ascii_lowercase());
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(&word.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// A minimal built-in fallback for servers whose catalog does not expose
    /// a keywords view. Intentionally small: only words that commonly appear
    /// as column or table names.
    pub fn builtin_fallback() -> Self {
        [
            "add", "all", "alter", "and", "as", "asc", "between", "by", "case", "check",
            "column", "condition", "create", "cross", "default", "delete", "desc", "distinct",
            "drop", "else", "exists", "false", "for", "foreign", "from", "group", "having",
            "if", "ignore", "in", "index", "inner", "insert", "interval", "into", "is", "join",
            "key", "keys", "left", "like", "limit", "lock", "not", "null", "on", "or", "order",
            "outer", "primary", "range", "references", "release", "rename", "repeat", "replace",
            "right", "schema", "select", "set", "show", "table", "then", "to", "trigger",
            "true", "union", "unique", "update", "usage", "use", "using", "values", "when",
            "where", "while", "with",
        ]
        .into_iter()
        .collect()
    }
}

impl<S: AsRef<str>> FromIterator<S> for ReservedWords {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut rw = Self::new();
        for w in iter {
            rw.insert(w);
        }
        rw
    }
}

/// Converts host values into SQL literals and names into quoted identifiers.
#[derive(Debug, Clone)]
pub struct Quoter {
    pub engine: Engine,
    pub reserved: Arc<ReservedWords>,
}

impl Quoter {
    /// A quoter with no reserved words (identifiers pass through unquoted).
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            reserved: Arc::new(ReservedWords::new()),
        }
    }

    pub fn with_reserved(engine: Engine, reserved: Arc<ReservedWords>) -> Self {
        Self { engine, reserved }
    }

    /// Render a value as a SQL literal.
    ///
    /// - `Null` → `null`, `Default` → `default`
    /// - numbers → lossless decimal; NaN and ±∞ → `null`
    /// - booleans → engine spelling
    /// - strings → engine-escaped single-quoted
    /// - binary → hex literal `x'..'`
    /// - non-empty sequences → comma-joined values (for `IN (?)`)
    /// - empty sequences → `null` (beware `NOT IN (null)` matches nothing)
    pub fn value(&self, value: &SqlValue) -> PrepResult<String> {
        match value {
            SqlValue::Null => Ok(self.engine.keyword_sql(Keyword::Null).to_string()),
            SqlValue::Default => Ok(self.engine.keyword_sql(Keyword::Default).to_string()),
            SqlValue::Bool(b) => Ok(self.engine.bool_sql(*b).to_string()),
            SqlValue::Int(v) => Ok(v.to_string()),
            SqlValue::UInt(v) => Ok(v.to_string()),
            SqlValue::Float(v) => Ok(format_float(*v)
                .unwrap_or_else(|| self.engine.keyword_sql(Keyword::Null).to_string())),
            SqlValue::Text(s) => {
                let mut out = String::with_capacity(s.len() + 2);
                out.push('\'');
                self.escape_into(s, &mut out);
                out.push('\'');
                Ok(out)
            }
            SqlValue::Bytes(data) => {
                let mut out = String::with_capacity(data.len() * 2 + 3);
                out.push_str("x'");
                for byte in data {
                    use std::fmt::Write;
                    let _ = write!(&mut out, "{byte:02x}");
                }
                out.push('\'');
                Ok(out)
            }
            SqlValue::List(values) => {
                if values.is_empty() {
                    return Ok(self.engine.keyword_sql(Keyword::Null).to_string());
                }
                let mut out = String::new();
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&self.value(v)?);
                }
                Ok(out)
            }
        }
    }

    /// Quote an identifier (column, table, or `db.table` path).
    ///
    /// Leading/trailing whitespace is trimmed. An input that already begins
    /// with a backtick is returned verbatim (the caller pre-quoted it).
    /// Otherwise the input is split on `.` and each segment is back-quoted
    /// iff it is a reserved word of the target engine. Dots inside actual
    /// names are not supported.
    pub fn ident(&self, name: &str) -> PrepResult<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PrepError::quote("identifier missing"));
        }
        if name.starts_with('`') {
            return Ok(name.to_string());
        }

        let mut out = String::with_capacity(name.len());
        for (i, segment) in name.split('.').enumerate() {
            if i > 0 {
                out.push('.');
            }
            if segment.is_empty() {
                return Err(PrepError::quote(format!("empty segment in identifier '{name}'")));
            }
            if self.reserved.contains(segment) {
                out.push('`');
                for ch in segment.chars() {
                    if ch == '`' {
                        out.push('`');
                    }
                    out.push(ch);
                }
                out.push('`');
            } else {
                out.push_str(segment);
            }
        }
        Ok(out)
    }

    /// Escape a string body per the engine's default rules (without the
    /// surrounding quotes).
    pub fn esc_str(&self, s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        self.escape_into(s, &mut out);
        out
    }

    fn escape_into(&self, s: &str, out: &mut String) {
        match self.engine {
            Engine::MySql => {
                for ch in s.chars() {
                    match ch {
                        '\'' => out.push_str("\\'"),
                        '\\' => out.push_str("\\\\"),
                        '\0' => out.push_str("\\0"),
                        '\n' => out.push_str("\\n"),
                        '\r' => out.push_str("\\r"),
                        '\u{1a}' => out.push_str("\\Z"),
                        _ => out.push(ch),
                    }
                }
            }
            Engine::Generic => {
                for ch in s.chars() {
                    if ch == '\'' {
                        out.push('\'');
                    }
                    out.push(ch);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mysql() -> Quoter {
        Quoter::new(Engine::MySql)
    }

    #[test]
    fn scalars() {
        let q = mysql();
        assert_eq!(q.value(&SqlValue::Null).unwrap(), "null");
        assert_eq!(q.value(&SqlValue::Default).unwrap(), "default");
        assert_eq!(q.value(&SqlValue::Int(-7)).unwrap(), "-7");
        assert_eq!(q.value(&SqlValue::UInt(18446744073709551615)).unwrap(), "18446744073709551615");
        assert_eq!(q.value(&SqlValue::Bool(true)).unwrap(), "1");
        assert_eq!(
            Quoter::new(Engine::Generic).value(&SqlValue::Bool(true)).unwrap(),
            "true"
        );
    }

    #[test]
    fn nan_and_infinity_render_null() {
        let q = mysql();
        assert_eq!(q.value(&SqlValue::Float(f64::NAN)).unwrap(), "null");
        assert_eq!(q.value(&SqlValue::Float(f64::NEG_INFINITY)).unwrap(), "null");
    }

    #[test]
    fn string_escaping() {
        let q = mysql();
        assert_eq!(q.value(&SqlValue::from("it's")).unwrap(), r"'it\'s'");
        assert_eq!(q.value(&SqlValue::from("a\\b")).unwrap(), r"'a\\b'");
        assert_eq!(
            Quoter::new(Engine::Generic).value(&SqlValue::from("it's")).unwrap(),
            "'it''s'"
        );
    }

    #[test]
    fn bytes_render_hex() {
        let q = mysql();
        assert_eq!(q.value(&SqlValue::bytes(vec![0xde, 0xad])).unwrap(), "x'dead'");
    }

    #[test]
    fn lists_join_and_empty_list_is_null() {
        let q = mysql();
        assert_eq!(q.value(&SqlValue::from(vec![1, 2, 3])).unwrap(), "1, 2, 3");
        assert_eq!(q.value(&SqlValue::List(vec![])).unwrap(), "null");
    }

    #[test]
    fn ident_backquotes_reserved_segments_only() {
        let reserved: ReservedWords = ["order"].into_iter().collect();
        let q = Quoter::with_reserved(Engine::MySql, Arc::new(reserved));
        assert_eq!(q.ident("Order.col").unwrap(), "`Order`.col");
        assert_eq!(q.ident("users").unwrap(), "users");
        assert_eq!(q.ident("  users  ").unwrap(), "users");
    }

    #[test]
    fn ident_passes_prequoted_through() {
        let q = mysql();
        assert_eq!(q.ident("`weird name`").unwrap(), "`weird name`");
    }

    #[test]
    fn ident_rejects_empty() {
        let q = mysql();
        assert!(q.ident("").is_err());
        assert!(q.ident("a..b").is_err());
    }

    #[test]
    fn reserved_words_are_case_insensitive() {
        let rw: ReservedWords = ["ORDER"].into_iter().collect();
        assert!(rw.contains("order"));
        assert!(rw.contains("Order"));
        assert!(!rw.contains("users"));
    }
}

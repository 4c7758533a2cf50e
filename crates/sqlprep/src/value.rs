//! Host value model.
//!
//! [`SqlValue`] is the tagged-variant type carried through the template
//! pipeline: parameter maps, positional arguments, column defaults and
//! prepared-statement bindings all hold `SqlValue`s. The engine keywords
//! `null` and `default` are first-class variants rather than magic strings,
//! so a caller can write `("status", SqlValue::Default)` without the quoter
//! ever confusing it with the string `'default'`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PrepError, PrepResult};

/// A host value on its way into a SQL statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlValue {
    /// SQL `null`.
    Null,
    /// The `default` keyword (column default).
    Default,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// A sequence, rendered comma-joined (for `IN (?)`).
    List(Vec<SqlValue>),
}

impl SqlValue {
    /// Construct a binary value.
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Self::Bytes(data.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Truthiness used by the `#if` evaluator: `null` and `false` are false,
    /// everything else is true.
    pub fn truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            _ => true,
        }
    }

    /// The numeric view of this value, when it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::UInt(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Render the unquoted textual form, as inserted by verbatim slots and
    /// macro-argument expansion. Sequences and binary data have no verbatim
    /// form and are rejected.
    pub fn raw_text(&self) -> PrepResult<String> {
        match self {
            Self::Null => Ok("null".to_string()),
            Self::Default => Ok("default".to_string()),
            Self::Bool(b) => Ok(if *b { "true" } else { "false" }.to_string()),
            Self::Int(v) => Ok(v.to_string()),
            Self::UInt(v) => Ok(v.to_string()),
            Self::Float(v) => match format_float(*v) {
                Some(s) => Ok(s),
                None => Ok("null".to_string()),
            },
            Self::Text(s) => Ok(s.clone()),
            Self::Bytes(_) => Err(PrepError::quote("binary value has no verbatim form")),
            Self::List(_) => Err(PrepError::quote("sequence value has no verbatim form")),
        }
    }
}

/// Lossless decimal rendering of a float; `None` for NaN and ±∞.
///
/// Rust's shortest round-trip `Display` is exact for every finite `f64`, so
/// no precision knob is needed.
pub(crate) fn format_float(v: f64) -> Option<String> {
    if !v.is_finite() {
        return None;
    }
    Some(v.to_string())
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for SqlValue {
    fn from(v: u32) -> Self {
        Self::UInt(v.into())
    }
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f32> for SqlValue {
    fn from(v: f32) -> Self {
        Self::Float(v.into())
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Self::Null,
        }
    }
}

impl<T: Into<SqlValue>> From<Vec<T>> for SqlValue {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

/// Per-query named parameters.
///
/// # Example
/// ```ignore
/// use sqlprep::{Params, SqlValue};
///
/// let params = Params::new()
///     .with("t", "Order")
///     .with("v", 7)
///     .with("ids", vec![1, 2, 3]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Params {
    map: HashMap<String, SqlValue>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter (builder form).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.map.insert(name.into(), value.into());
        self
    }

    /// Add a parameter in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> &mut Self {
        self.map.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.map.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
}

impl<K: Into<String>, V: Into<SqlValue>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            map: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Per-field serializer override: renders a value as a SQL fragment in place
/// of the stock quoter (e.g. numeric timestamp → `from_unixtime(...)`).
#[derive(Clone)]
pub struct ToSqlHook(pub Arc<dyn Fn(&SqlValue) -> PrepResult<String> + Send + Sync>);

impl ToSqlHook {
    pub fn new(f: impl Fn(&SqlValue) -> PrepResult<String> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn apply(&self, value: &SqlValue) -> PrepResult<String> {
        (self.0)(value)
    }
}

impl std::fmt::Debug for ToSqlHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ToSqlHook").field(&"<fn>").finish()
    }
}

/// Per-field binding override: rewrites a value before it is bound to a
/// prepared-statement parameter.
#[derive(Clone)]
pub struct ToBinHook(pub Arc<dyn Fn(&SqlValue) -> PrepResult<SqlValue> + Send + Sync>);

impl ToBinHook {
    pub fn new(f: impl Fn(&SqlValue) -> PrepResult<SqlValue> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn apply(&self, value: &SqlValue) -> PrepResult<SqlValue> {
        (self.0)(value)
    }
}

impl std::fmt::Debug for ToBinHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ToBinHook").field(&"<fn>").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!SqlValue::Null.truthy());
        assert!(!SqlValue::Bool(false).truthy());
        assert!(SqlValue::Bool(true).truthy());
        assert!(SqlValue::Int(0).truthy());
        assert!(SqlValue::Text(String::new()).truthy());
    }

    #[test]
    fn raw_text_forms() {
        assert_eq!(SqlValue::from("abc").raw_text().unwrap(), "abc");
        assert_eq!(SqlValue::from(42).raw_text().unwrap(), "42");
        assert_eq!(SqlValue::Null.raw_text().unwrap(), "null");
        assert_eq!(SqlValue::Default.raw_text().unwrap(), "default");
        assert!(SqlValue::from(vec![1, 2]).raw_text().is_err());
    }

    #[test]
    fn float_rendering_is_lossless() {
        let v = 0.1_f64 + 0.2_f64;
        let s = format_float(v).unwrap();
        assert_eq!(s.parse::<f64>().unwrap(), v);
        assert_eq!(format_float(f64::NAN), None);
        assert_eq!(format_float(f64::INFINITY), None);
    }

    #[test]
    fn option_and_vec_conversions() {
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert_eq!(
            SqlValue::from(vec!["a", "b"]),
            SqlValue::List(vec![SqlValue::from("a"), SqlValue::from("b")])
        );
    }

    #[test]
    fn params_builder() {
        let p = Params::new().with("a", 1).with("b", "x");
        assert_eq!(p.get("a"), Some(&SqlValue::Int(1)));
        assert!(p.contains("b"));
        assert_eq!(p.len(), 2);
    }
}

//! Connection collaborator interface.
//!
//! The wire-protocol client is not part of the core: the command facade is
//! generic over [`Connection`], which any driver (or an in-memory fake in
//! tests) implements. One operation is in flight per connection at a time:
//! the methods take `&mut self` and the caller serializes access; use
//! separate connections from separate tasks for concurrency.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PrepError, PrepResult};
use crate::quote::Engine;
use crate::value::SqlValue;

/// Options for establishing a connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub db: Option<String>,
}

/// Cache scope key: reserved words and schema snapshots are shared between
/// all handles connected to the same endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerKey {
    pub host: String,
    pub port: u16,
}

impl ServerKey {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for ServerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Result-set column metadata as reported by the driver.
#[derive(Debug, Clone, Default)]
pub struct FieldInfo {
    pub name: String,
    /// Engine native type tag, when the driver reports one.
    pub native_type: Option<String>,
    /// Originating table, when the driver reports one.
    pub table: Option<String>,
    pub schema: Option<String>,
}

impl FieldInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// One result row: positional values sharing the result set's column names.
#[derive(Debug, Clone)]
pub struct Row {
    cols: Arc<[String]>,
    vals: Vec<SqlValue>,
}

impl Row {
    pub fn new(cols: Arc<[String]>, vals: Vec<SqlValue>) -> Self {
        Self { cols, vals }
    }

    pub fn columns(&self) -> &[String] {
        &self.cols
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.vals
    }

    pub fn into_values(self) -> Vec<SqlValue> {
        self.vals
    }

    /// Value by column name.
    pub fn get(&self, col: &str) -> Option<&SqlValue> {
        let idx = self.cols.iter().position(|c| c == col)?;
        self.vals.get(idx)
    }

    /// Value by column name, failing on an unknown column.
    pub fn try_get(&self, col: &str) -> PrepResult<&SqlValue> {
        self.get(col)
            .ok_or_else(|| PrepError::decode(col, "no such column in result set"))
    }

    pub fn get_str(&self, col: &str) -> PrepResult<&str> {
        match self.try_get(col)? {
            SqlValue::Text(s) => Ok(s),
            other => Err(PrepError::decode(col, format!("expected string, got {other:?}"))),
        }
    }

    pub fn get_opt_str(&self, col: &str) -> PrepResult<Option<&str>> {
        match self.try_get(col)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(s) => Ok(Some(s)),
            other => Err(PrepError::decode(col, format!("expected string, got {other:?}"))),
        }
    }

    pub fn get_u64(&self, col: &str) -> PrepResult<u64> {
        match self.try_get(col)? {
            SqlValue::UInt(v) => Ok(*v),
            SqlValue::Int(v) if *v >= 0 => Ok(*v as u64),
            other => Err(PrepError::decode(col, format!("expected unsigned, got {other:?}"))),
        }
    }

    pub fn get_opt_u64(&self, col: &str) -> PrepResult<Option<u64>> {
        match self.try_get(col)? {
            SqlValue::Null => Ok(None),
            _ => self.get_u64(col).map(Some),
        }
    }

    pub fn get_u32(&self, col: &str) -> PrepResult<u32> {
        let v = self.get_u64(col)?;
        u32::try_from(v).map_err(|_| PrepError::decode(col, format!("value {v} out of range")))
    }

    pub fn get_bool(&self, col: &str) -> PrepResult<bool> {
        match self.try_get(col)? {
            SqlValue::Bool(b) => Ok(*b),
            SqlValue::Int(v) => Ok(*v != 0),
            SqlValue::UInt(v) => Ok(*v != 0),
            other => Err(PrepError::decode(col, format!("expected bool, got {other:?}"))),
        }
    }
}

/// One result set off the wire.
#[derive(Debug, Clone, Default)]
pub struct QueryReply {
    pub fields: Vec<FieldInfo>,
    pub rows: Vec<Row>,
    /// Rows affected, for statements without a result set.
    pub affected: u64,
    pub last_insert_id: Option<u64>,
    /// Whether another result set follows (multi-statement queries).
    pub has_more: bool,
}

/// The driver contract the command facade builds on.
///
/// Every wire-reaching method may suspend on I/O. Errors are surfaced as
/// [`PrepError::Db`] carrying the engine errno and SQLSTATE; the facade runs
/// the engine classifier over them.
pub trait Connection: Send {
    type Stmt: PreparedStatement;

    fn connect(opts: &ConnectOptions) -> impl Future<Output = PrepResult<Self>> + Send
    where
        Self: Sized;

    fn close(&mut self) -> impl Future<Output = PrepResult<()>> + Send;

    /// Switch the default database.
    fn use_db(&mut self, db: &str) -> impl Future<Output = PrepResult<()>> + Send;

    /// Engine-safe escape of a string body (no surrounding quotes).
    fn esc(&self, s: &str) -> String;

    fn query(&mut self, sql: &str) -> impl Future<Output = PrepResult<QueryReply>> + Send;

    /// Fetch the next result set of a multi-statement query, if any.
    fn read_result(&mut self) -> impl Future<Output = PrepResult<Option<QueryReply>>> + Send;

    fn prepare(&mut self, sql: &str) -> impl Future<Output = PrepResult<Self::Stmt>> + Send;

    /// The target dialect of this connection.
    fn engine(&self) -> Engine;

    /// The `(host, port)` cache scope of this connection.
    fn server_key(&self) -> ServerKey;
}

/// A server-side prepared statement.
pub trait PreparedStatement: Send {
    fn query(
        &mut self,
        values: &[SqlValue],
    ) -> impl Future<Output = PrepResult<QueryReply>> + Send;

    /// Release the server-side handle. Required explicitly; drivers should
    /// also release on drop to avoid leaking statements on the server.
    fn free(&mut self) -> impl Future<Output = PrepResult<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Row {
        let cols: Arc<[String]> = vec!["id".to_string(), "name".to_string(), "age".to_string()]
            .into();
        Row::new(
            cols,
            vec![
                SqlValue::UInt(7),
                SqlValue::from("bob"),
                SqlValue::Null,
            ],
        )
    }

    #[test]
    fn access_by_name_and_position() {
        let r = row();
        assert_eq!(r.get("id"), Some(&SqlValue::UInt(7)));
        assert_eq!(r.values()[1], SqlValue::from("bob"));
        assert_eq!(r.get("missing"), None);
    }

    #[test]
    fn typed_getters() {
        let r = row();
        assert_eq!(r.get_u64("id").unwrap(), 7);
        assert_eq!(r.get_str("name").unwrap(), "bob");
        assert_eq!(r.get_opt_str("age").unwrap(), None);
        assert!(r.get_str("id").is_err());
        assert!(r.try_get("missing").is_err());
    }
}

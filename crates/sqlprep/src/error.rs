//! Error types for sqlprep
//!
//! ## Error classification
//!
//! `PrepError` variants fall into two categories:
//!
//! **Fatal, non-retriable**: a bug in the template, the environment, or the
//! schema description; raised before anything touches the connection:
//! [`Template`](PrepError::Template), [`Quote`](PrepError::Quote),
//! [`Schema`](PrepError::Schema).
//!
//! **Surfaced**: carried up from the backend with engine `errno` and
//! `sqlstate`: [`Db`](PrepError::Db). When the target engine has a registered
//! classifier ([`DbError::classify`]), the error is enriched with a normalized
//! [`code`](DbError::code) tag and the column / table / foreign-key names
//! extracted from the server message, so callers can match on
//! `code == Some(ErrorCode::Uk)` instead of scraping message text.

use thiserror::Error;

use crate::quote::Engine;

/// Result type alias for sqlprep operations
pub type PrepResult<T> = Result<T, PrepError>;

/// Error types for template processing and database operations.
#[derive(Debug, Error)]
pub enum PrepError {
    /// Template syntax or expansion error (unclosed literal, unbalanced
    /// `#if`, unknown macro/constant/parameter, mixed bind styles).
    #[error("Template error: {0}")]
    Template(String),

    /// Value or identifier quoting error (unsupported value type, empty
    /// identifier).
    #[error("Quoting error: {0}")]
    Quote(String),

    /// Schema model error (unresolved foreign key columns, diff referencing
    /// an unknown table or column).
    #[error("Schema error: {0}")]
    Schema(String),

    /// Row decode/mapping error (catalog drift or type mismatch).
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Connection-collaborator error (configuration or transport).
    #[error("Connection error: {0}")]
    Connection(String),

    /// Error reported by the database server.
    #[error("{0}")]
    Db(DbError),

    /// Other / catch-all error.
    #[error("{0}")]
    Other(String),
}

impl PrepError {
    /// Create a template error
    pub fn template(message: impl Into<String>) -> Self {
        Self::Template(message.into())
    }

    /// Create a quoting error
    pub fn quote(message: impl Into<String>) -> Self {
        Self::Quote(message.into())
    }

    /// Create a schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Check if this error originated from the database server
    pub fn is_db(&self) -> bool {
        matches!(self, Self::Db(_))
    }

    /// Check if this is a template/quoting/schema error (raised before the
    /// operation reached the connection)
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Template(_) | Self::Quote(_) | Self::Schema(_))
    }

    /// Return the engine error number if this error came from the server.
    pub fn errno(&self) -> Option<u32> {
        match self {
            Self::Db(e) => e.errno,
            _ => None,
        }
    }

    /// Return the SQLSTATE code if this error came from the server.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Self::Db(e) => e.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Return the normalized error code tag, if classified.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Db(e) => e.code,
            _ => None,
        }
    }
}

impl From<DbError> for PrepError {
    fn from(err: DbError) -> Self {
        Self::Db(err)
    }
}

/// Normalized tag assigned to a classified backend error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// A column without a default was omitted from an insert.
    Required,
    /// NULL written to a `not null` column.
    NotNull,
    /// Primary key violation.
    Pk,
    /// Unique key violation.
    Uk,
    /// Foreign key violation.
    Fk,
}

impl ErrorCode {
    /// The wire-stable tag string for this code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::NotNull => "not_null",
            Self::Pk => "pk",
            Self::Uk => "uk",
            Self::Fk => "fk",
        }
    }
}

/// An error reported by the database server.
///
/// `errno` and `sqlstate` come straight off the wire. `code` and the name
/// fields are filled in by the engine classifier where one is registered;
/// without a classifier the raw message is carried as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbError {
    /// Engine-specific error number (`sqlcode`).
    pub errno: Option<u32>,
    /// Five-character SQLSTATE.
    pub sqlstate: Option<String>,
    /// Server message (replaced by a friendlier one when classified).
    pub message: String,
    /// Normalized tag, when the errno classifier recognized the error.
    pub code: Option<ErrorCode>,
    /// Offending column, when extractable.
    pub col: Option<String>,
    /// Offending table, when extractable.
    pub table: Option<String>,
    /// Referencing table of a failed foreign key.
    pub fk_table: Option<String>,
    /// Referencing column of a failed foreign key.
    pub fk_col: Option<String>,
}

impl DbError {
    /// Create a raw, unclassified server error.
    pub fn new(errno: impl Into<Option<u32>>, sqlstate: impl Into<Option<String>>, message: impl Into<String>) -> Self {
        Self {
            errno: errno.into(),
            sqlstate: sqlstate.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    /// Run the engine's errno classifier over this error, enriching it with
    /// a normalized [`code`](Self::code) and extracted names. Engines without
    /// a classifier leave the error untouched.
    pub fn classify(mut self, engine: Engine) -> Self {
        if let Engine::MySql = engine {
            classify_mysql(&mut self);
        }
        self
    }
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Database error")?;
        if let Some(errno) = self.errno {
            write!(f, " {errno}")?;
        }
        if let Some(state) = &self.sqlstate {
            write!(f, " ({state})")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Pull the n-th (0-based) quoted token out of a server message.
fn nth_quoted(message: &str, open: char, close: char, n: usize) -> Option<String> {
    let mut rest = message;
    let mut idx = 0;
    loop {
        let start = rest.find(open)?;
        rest = &rest[start + open.len_utf8()..];
        let end = rest.find(close)?;
        let token = rest[..end].to_string();
        rest = &rest[end + close.len_utf8()..];
        if idx == n {
            return Some(token);
        }
        idx += 1;
    }
}

/// MySQL/MariaDB errno classifier.
///
/// Recognized errnos:
/// - 1364 `ER_NO_DEFAULT_FOR_FIELD` → `required`
/// - 1048 `ER_BAD_NULL_ERROR` → `not_null`
/// - 1062 `ER_DUP_ENTRY` → `pk` for the PRIMARY key, `uk` otherwise
/// - 1451 `ER_ROW_IS_REFERENCED_2`, 1452 `ER_NO_REFERENCED_ROW_2` → `fk`
fn classify_mysql(err: &mut DbError) {
    let Some(errno) = err.errno else { return };
    match errno {
        1364 => {
            err.code = Some(ErrorCode::Required);
            err.col = nth_quoted(&err.message, '\'', '\'', 0);
            if let Some(col) = &err.col {
                err.message = format!("value required for column '{col}'");
            }
        }
        1048 => {
            err.code = Some(ErrorCode::NotNull);
            err.col = nth_quoted(&err.message, '\'', '\'', 0);
            if let Some(col) = &err.col {
                err.message = format!("column '{col}' cannot be null");
            }
        }
        1062 => {
            // "Duplicate entry 'v' for key 'tbl.key_name'"
            let key = nth_quoted(&err.message, '\'', '\'', 1).unwrap_or_default();
            let (table, key_name) = match key.split_once('.') {
                Some((t, k)) => (Some(t.to_string()), k.to_string()),
                None => (None, key),
            };
            err.table = table;
            err.code = if key_name.eq_ignore_ascii_case("PRIMARY") {
                Some(ErrorCode::Pk)
            } else {
                Some(ErrorCode::Uk)
            };
            err.col = Some(key_name);
        }
        1451 | 1452 => {
            err.code = Some(ErrorCode::Fk);
            // "... a foreign key constraint fails (`db`.`tbl`, CONSTRAINT
            //  `fk` FOREIGN KEY (`col`) REFERENCES `parent` (`id`) ...)"
            err.fk_table = nth_quoted(&err.message, '`', '`', 1);
            err.fk_col = nth_quoted(&err.message, '`', '`', 3);
            err.table = nth_quoted(&err.message, '`', '`', 4);
        }
        _ => {}
    }
}

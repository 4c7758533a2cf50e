//! # sqlprep
//!
//! A SQL preprocessing and schema-management engine.
//!
//! sqlprep sits between application code and a relational server (MySQL is
//! the reference dialect; the core is engine-agnostic up to a small set of
//! knobs). It turns SQL templates (conditional directives, macros,
//! constants, named and positional placeholders) into concrete queries,
//! and keeps a normalized schema model it can introspect, diff and turn
//! back into DDL.
//!
//! ## Features
//!
//! - **Template pipeline**: `#if`/`#elif`/`#else`/`#endif` against a
//!   parameter environment, `$const` / `$macro(...)` expansion, `{verbatim}`
//!   slots, `:name` / `::name` named parameters, `?` / `??` positional
//!   arguments; all literal-safe (nothing expands inside a quoted string)
//! - **Two output modes**: fully literalized SQL ([`render`]) or
//!   prepared-statement SQL plus a bind plan ([`prepare`])
//! - **Quoting service**: lossless value literals, reserved-word-aware
//!   identifier quoting ([`Quoter`])
//! - **Schema model**: tables, columns, keys, indexes, foreign keys, checks,
//!   triggers, procedures ([`Schema`], [`Table`], [`Field`])
//! - **Introspection**: rebuild the model from `information_schema`
//!   ([`introspect`])
//! - **Diff + DDL planning**: an ordered, applyable statement list between
//!   two snapshots ([`diff_schemas`], [`plan`])
//! - **Command facade**: template-routed queries, prepared statements,
//!   transactions and a per-server schema cache over any driver that
//!   implements [`Connection`] ([`Command`])
//!
//! ## Template quick tour
//!
//! ```ignore
//! use sqlprep::{render, Environment, Params};
//!
//! let env = Environment::default();
//! let params = Params::new().with("t", "Order").with("min", 5);
//! let out = render(
//!     "SELECT * FROM ::t\n#if min\nWHERE qty >= :min\n#endif",
//!     &env,
//!     &params,
//!     &[],
//! )?;
//! # Ok::<(), sqlprep::PrepError>(())
//! ```

mod command;
mod connection;
mod ddl;
mod diff;
mod error;
mod introspect;
mod preprocess;
mod quote;
mod schema;
mod template;
mod value;

pub use command::cache::{CacheRegistry, ServerCache};
pub use command::{Command, PreparedCommand, QueryOptions, ResultSet};
pub use connection::{
    ConnectOptions, Connection, FieldInfo, PreparedStatement, QueryReply, Row, ServerKey,
};
pub use ddl::DdlEmitter;
pub use diff::{diff_schemas, plan, PkChange, SchemaDiff, TableDiff};
pub use error::{DbError, ErrorCode, PrepError, PrepResult};
pub use introspect::{
    field_from_column, introspect, load_reserved_words, snapshot, ColumnRow, SchemaSnapshot,
};
pub use preprocess::preprocess;
pub use quote::{Engine, Keyword, Quoter, ReservedWords};
pub use schema::{
    AttrRegistry, Check, Field, FieldAttrs, FieldType, ForeignKey, Index, ProcParam, Procedure,
    RefAction, Schema, Table, TableAttrs, Trigger, TriggerOp, TriggerTime, UniqueKey,
};
pub use template::{prepare, render, BindSite, Environment, MacroFn, Prepared, Rendered};
pub use value::{Params, SqlValue, ToBinHook, ToSqlHook};

//! Template expander.
//!
//! Turns SQL source text enriched with conditional directives, macros,
//! constants and parameter placeholders into a concrete SQL string: either
//! fully literalized ([`render`]) or as a prepared-statement text plus a
//! bind plan ([`prepare`]).
//!
//! ```text
//! SELECT ::t.col FROM ::t WHERE x = :v    -- identifier + value params
//! SELECT * FROM t WHERE id IN (?)         -- positional, list-aware
//! alter table t add $fk(t, a, u)          -- macro call
//! ```
//!
//! # Example
//! ```ignore
//! use sqlprep::{render, Environment, Params};
//!
//! let env = Environment::default();
//! let params = Params::new().with("t", "users").with("v", 7);
//! let out = render("SELECT * FROM ::t WHERE x = :v", &env, &params, &[])?;
//! assert_eq!(out.sql, "SELECT * FROM users WHERE x = 7");
//! # Ok::<(), sqlprep::PrepError>(())
//! ```
//!
//! Behavior is a pure function of the inputs: all macros, constants and
//! reserved words come in through the [`Environment`], never from process
//! globals.

mod expand;
mod literals;
mod markers;


use std::collections::HashMap;
use std::sync::Arc;

use crate::error::PrepResult;
use crate::preprocess::preprocess;
use crate::quote::{Engine, Quoter, ReservedWords};
use crate::value::{Params, SqlValue};

/// A macro callable: receives the expanded argument texts, returns the SQL
/// fragment that replaces the call site.
pub type MacroFn = Arc<dyn Fn(&[String]) -> PrepResult<String> + Send + Sync>;

/// Process-lifetime template environment: engine knobs, constants, macros
/// and the reserved-word table. Cheap to clone; expected to be built at
/// startup and treated as immutable afterwards.
#[derive(Clone, Default)]
pub struct Environment {
    pub engine: Engine,
    defines: HashMap<String, String>,
    macros: HashMap<String, MacroFn>,
    reserved: Arc<ReservedWords>,
}

impl Environment {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            ..Self::default()
        }
    }

    /// Register a constant for `$name` expansion (builder form).
    pub fn with_define(mut self, name: impl Into<String>, sql: impl Into<String>) -> Self {
        self.defines.insert(name.into(), sql.into());
        self
    }

    /// Register a macro for `$name(...)` expansion (builder form).
    pub fn with_macro(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&[String]) -> PrepResult<String> + Send + Sync + 'static,
    ) -> Self {
        self.macros.insert(name.into(), Arc::new(f));
        self
    }

    /// Install the reserved-word table used by the identifier quoter.
    pub fn with_reserved(mut self, reserved: Arc<ReservedWords>) -> Self {
        self.reserved = reserved;
        self
    }

    /// Replace the reserved-word table in place (used by the command facade
    /// once the table is lazily loaded from the server).
    pub fn set_reserved(&mut self, reserved: Arc<ReservedWords>) {
        self.reserved = reserved;
    }

    pub fn reserved(&self) -> &Arc<ReservedWords> {
        &self.reserved
    }

    pub(crate) fn quoter(&self) -> Quoter {
        Quoter::with_reserved(self.engine, Arc::clone(&self.reserved))
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("engine", &self.engine)
            .field("defines", &self.defines.keys())
            .field("macros", &self.macros.keys())
            .field("reserved_words", &self.reserved.len())
            .finish()
    }
}

/// One bind site of a prepared statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindSite {
    /// Bind from the positional argument list.
    Arg(usize),
    /// Bind from the named parameter map.
    Param(String),
}

/// Output of [`render`]: fully literalized SQL.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub sql: String,
    /// Named parameters encountered, in order (caller telemetry).
    pub param_names: Vec<String>,
}

/// Output of [`prepare`]: SQL with `?` placeholders plus the bind plan.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub sql: String,
    /// Named parameters encountered, in order (caller telemetry).
    pub param_names: Vec<String>,
    /// Ordered bind sites; resolved against `(params, args)` per execution.
    pub param_map: Vec<BindSite>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Literal,
    Prepare,
}

/// True when the input can contain no directive, comment or expansion point.
fn has_template_syntax(sql: &str) -> bool {
    sql.contains(['#', '$', ':', '?', '{']) || sql.contains("--")
}

/// Preprocess and expand a template into executable SQL, quoting every
/// parameter and argument into the text.
pub fn render(
    sql: &str,
    env: &Environment,
    params: &Params,
    args: &[SqlValue],
) -> PrepResult<Rendered> {
    if !has_template_syntax(sql) {
        return Ok(Rendered {
            sql: sql.to_string(),
            param_names: Vec::new(),
        });
    }
    let preprocessed = preprocess(sql, params)?;
    let expansion = expand::expand(&preprocessed, Mode::Literal, env, params, args)?;
    Ok(Rendered {
        sql: expansion.sql,
        param_names: expansion.param_names,
    })
}

/// Preprocess and expand a template into prepared-statement SQL: value
/// sites become `?` and are recorded in the bind plan; identifier sites are
/// still resolved now (identifiers cannot be bound).
pub fn prepare(
    sql: &str,
    env: &Environment,
    params: &Params,
    args: &[SqlValue],
) -> PrepResult<Prepared> {
    if !has_template_syntax(sql) {
        return Ok(Prepared {
            sql: sql.to_string(),
            param_names: Vec::new(),
            param_map: Vec::new(),
        });
    }
    let preprocessed = preprocess(sql, params)?;
    let expansion = expand::expand(&preprocessed, Mode::Prepare, env, params, args)?;
    Ok(Prepared {
        sql: expansion.sql,
        param_names: expansion.param_names,
        param_map: expansion.param_map,
    })
}

//! Prepared-statement handle.
//!
//! Built once by [`Command::prepare`](super::Command::prepare); each
//! execution rebinds the plan's sites (positional args by index, named
//! params by name) into driver parameters, applying per-field `to_bin`
//! hooks where registered. The server-side statement must be released with
//! [`free`](PreparedCommand::free).

use std::collections::HashMap;

use crate::connection::{PreparedStatement, QueryReply};
use crate::error::{PrepError, PrepResult};
use crate::template::BindSite;
use crate::value::{Params, SqlValue, ToBinHook};

pub struct PreparedCommand<S: PreparedStatement> {
    stmt: S,
    sql: String,
    param_names: Vec<String>,
    param_map: Vec<BindSite>,
    bin_hooks: HashMap<String, ToBinHook>,
    freed: bool,
}

impl<S: PreparedStatement> PreparedCommand<S> {
    pub(super) fn new(
        stmt: S,
        sql: String,
        param_names: Vec<String>,
        param_map: Vec<BindSite>,
    ) -> Self {
        Self {
            stmt,
            sql,
            param_names,
            param_map,
            bin_hooks: HashMap::new(),
            freed: false,
        }
    }

    /// The prepared SQL text (with `?` placeholders).
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Named parameters encountered at prepare time, in order.
    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    pub fn param_map(&self) -> &[BindSite] {
        &self.param_map
    }

    /// Register a binding override for a named parameter (typically a
    /// field's `to_bin` hook).
    pub fn bind_hook(&mut self, name: impl Into<String>, hook: ToBinHook) -> &mut Self {
        self.bin_hooks.insert(name.into(), hook);
        self
    }

    /// Resolve the bind plan against `(params, args)`.
    ///
    /// A binding failure leaves the statement reusable.
    fn bind(&self, params: &Params, args: &[SqlValue]) -> PrepResult<Vec<SqlValue>> {
        let mut values = Vec::with_capacity(self.param_map.len());
        for site in &self.param_map {
            let value = match site {
                BindSite::Arg(index) => args.get(*index).cloned().ok_or_else(|| {
                    PrepError::template(format!("missing positional argument {}", index + 1))
                })?,
                BindSite::Param(name) => {
                    let value = params.get(name).cloned().ok_or_else(|| {
                        PrepError::template(format!("missing named parameter :{name}"))
                    })?;
                    match self.bin_hooks.get(name) {
                        Some(hook) => hook.apply(&value)?,
                        None => value,
                    }
                }
            };
            values.push(value);
        }
        Ok(values)
    }

    /// Execute with the given environment and return the result set.
    pub async fn query(&mut self, params: &Params, args: &[SqlValue]) -> PrepResult<QueryReply> {
        if self.freed {
            return Err(PrepError::Other("prepared statement already freed".to_string()));
        }
        let values = self.bind(params, args)?;
        self.stmt.query(&values).await
    }

    /// Execute and return the affected-row count.
    pub async fn exec(&mut self, params: &Params, args: &[SqlValue]) -> PrepResult<u64> {
        Ok(self.query(params, args).await?.affected)
    }

    /// Release the server-side statement.
    pub async fn free(&mut self) -> PrepResult<()> {
        if self.freed {
            return Ok(());
        }
        self.freed = true;
        self.stmt.free().await
    }
}

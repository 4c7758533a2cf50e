//! Command facade.
//!
//! Binds the template pipeline, the quoting service and the schema
//! subsystem to a live connection. One in-flight operation per handle; use
//! one handle per task. Reserved words and the schema snapshot are cached
//! per endpoint and shared between handles (see [`cache`]).
//!
//! # Example
//! ```ignore
//! use sqlprep::{Command, Environment, Params, QueryOptions};
//!
//! let mut cmd = Command::new(conn, Environment::default());
//! let sets = cmd
//!     .query(
//!         "SELECT * FROM users WHERE status = :status",
//!         &Params::new().with("status", "active"),
//!         &[],
//!         &QueryOptions::default(),
//!     )
//!     .await?;
//! for row in &sets[0].rows {
//!     println!("{:?}", row.get("username"));
//! }
//! # Ok::<(), sqlprep::PrepError>(())
//! ```

pub mod cache;
mod prepared;

#[cfg(test)]
mod tests;

pub use prepared::PreparedCommand;

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::connection::{Connection, FieldInfo, QueryReply, Row};
use crate::error::{PrepError, PrepResult};
use crate::introspect;
use crate::schema::{AttrRegistry, Field, FieldAttrs, Schema};
use crate::template::{prepare as template_prepare, render, Environment};
use crate::value::{Params, SqlValue};
use cache::{CacheRegistry, ServerCache};

/// Result-shaping options.
#[derive(Default, Clone)]
pub struct QueryOptions {
    /// Skip the template pipeline and send the SQL as-is.
    pub no_parse: bool,
    /// Skip field-descriptor construction; rows are accessed positionally.
    pub compact: bool,
    /// Enrich each returned field with the canonical descriptor from the
    /// schema cache (introspecting on first use).
    pub get_table_defs: bool,
    /// Per-column attribute overlays for this query, keyed by column name.
    pub field_attrs: HashMap<String, FieldAttrs>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_parse(mut self) -> Self {
        self.no_parse = true;
        self
    }

    pub fn compact(mut self) -> Self {
        self.compact = true;
        self
    }

    pub fn get_table_defs(mut self) -> Self {
        self.get_table_defs = true;
        self
    }

    pub fn field_attr(mut self, col: impl Into<String>, attrs: FieldAttrs) -> Self {
        self.field_attrs.insert(col.into(), attrs);
        self
    }
}

/// One shaped result set.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// Field descriptors, one per column (empty in compact mode).
    pub fields: Vec<Field>,
    pub rows: Vec<Row>,
    pub affected: u64,
    pub last_insert_id: Option<u64>,
}

impl ResultSet {
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// Group rows by the textual form of one column's value.
    pub fn group_by(&self, col: &str) -> PrepResult<IndexMap<String, Vec<Row>>> {
        let mut groups: IndexMap<String, Vec<Row>> = IndexMap::new();
        for row in &self.rows {
            let key = row.try_get(col)?.raw_text()?;
            groups.entry(key).or_default().push(row.clone());
        }
        Ok(groups)
    }
}

/// Statement prefixes that invalidate the schema cache.
const DDL_PREFIXES: [&str; 5] = ["create", "alter", "drop", "grant", "revoke"];

/// Prefix scan for DDL, applied to every `;`-separated statement.
fn is_ddl(sql: &str) -> bool {
    sql.split(';').any(|stmt| {
        let stmt = stmt.trim_start();
        DDL_PREFIXES.iter().any(|prefix| {
            stmt.len() >= prefix.len()
                && stmt[..prefix.len()].eq_ignore_ascii_case(prefix)
                && stmt[prefix.len()..]
                    .chars()
                    .next()
                    .map_or(true, |c| !c.is_ascii_alphanumeric() && c != '_')
        })
    })
}

fn truncate_for_log(sql: &str) -> &str {
    let mut end = sql.len().min(200);
    while !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}

/// A command handle over one connection.
pub struct Command<C: Connection> {
    conn: C,
    env: Environment,
    /// Process-wide attribute overlays applied during introspection.
    attrs: AttrRegistry,
    /// Databases covered by the schema cache; defaults to the connection's
    /// current database.
    dbs: Vec<String>,
    cache: Arc<ServerCache>,
}

impl<C: Connection> Command<C> {
    pub fn new(conn: C, env: Environment) -> Self {
        let cache = CacheRegistry::global().get(&conn.server_key());
        Self {
            conn,
            env,
            attrs: AttrRegistry::default(),
            dbs: Vec::new(),
            cache,
        }
    }

    /// Set the attribute registries applied on introspection.
    pub fn with_attrs(mut self, attrs: AttrRegistry) -> Self {
        self.attrs = attrs;
        self
    }

    /// Set the databases covered by the schema cache.
    pub fn with_dbs(mut self, dbs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dbs = dbs.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn connection(&mut self) -> &mut C {
        &mut self.conn
    }

    fn classify(&self, err: PrepError) -> PrepError {
        match err {
            PrepError::Db(db) => PrepError::Db(db.classify(self.conn.engine())),
            other => other,
        }
    }

    /// Load the reserved-word table on first use and share it through the
    /// per-server cache.
    async fn ensure_reserved(&mut self) -> PrepResult<()> {
        if let Some(words) = self.cache.reserved() {
            self.env.set_reserved(words);
            return Ok(());
        }
        let words = Arc::new(introspect::load_reserved_words(&mut self.conn).await?);
        self.cache.install_reserved(Arc::clone(&words));
        self.env.set_reserved(words);
        Ok(())
    }

    /// The cached schema snapshot, introspecting when absent.
    pub async fn schema(&mut self) -> PrepResult<Arc<Schema>> {
        if let Some(snapshot) = self.cache.schema() {
            return Ok(snapshot.schema);
        }
        if self.dbs.is_empty() {
            let reply = self.conn.query("select database()").await.map_err(|e| self.classify(e))?;
            let current = reply
                .rows
                .first()
                .and_then(|r| r.values().first())
                .and_then(|v| match v {
                    SqlValue::Text(s) => Some(s.clone()),
                    _ => None,
                })
                .ok_or_else(|| PrepError::schema("no database selected for introspection"))?;
            self.dbs = vec![current];
        }
        let snapshot = introspect::snapshot(&mut self.conn, &self.dbs, &self.attrs).await?;
        self.cache.install_schema(snapshot.clone());
        Ok(snapshot.schema)
    }

    /// Run a template through the pipeline and execute it, returning all
    /// result sets (multi-statement queries produce several).
    pub async fn query(
        &mut self,
        sql: &str,
        params: &Params,
        args: &[SqlValue],
        opts: &QueryOptions,
    ) -> PrepResult<Vec<ResultSet>> {
        let text = if opts.no_parse {
            sql.to_string()
        } else {
            self.ensure_reserved().await?;
            render(sql, &self.env, params, args)?.sql
        };
        tracing::debug!(target: "sqlprep", sql = truncate_for_log(&text), "query");

        let mut replies = Vec::new();
        let reply = self.conn.query(&text).await.map_err(|e| self.classify(e))?;
        let mut more = reply.has_more;
        replies.push(reply);
        while more {
            match self.conn.read_result().await.map_err(|e| self.classify(e))? {
                Some(next) => {
                    more = next.has_more;
                    replies.push(next);
                }
                None => break,
            }
        }

        if is_ddl(&text) {
            tracing::warn!(target: "sqlprep", server = %self.conn.server_key(), "DDL executed, schema cache invalidated");
            self.cache.invalidate_schema();
        }

        let schema = if opts.get_table_defs {
            Some(self.schema().await?)
        } else {
            None
        };

        replies
            .into_iter()
            .map(|r| self.shape(r, opts, schema.as_deref()))
            .collect()
    }

    fn shape(
        &self,
        reply: QueryReply,
        opts: &QueryOptions,
        schema: Option<&Schema>,
    ) -> PrepResult<ResultSet> {
        let fields = if opts.compact {
            Vec::new()
        } else {
            reply
                .fields
                .iter()
                .map(|info| self.shape_field(info, opts, schema))
                .collect()
        };
        Ok(ResultSet {
            fields,
            rows: reply.rows,
            affected: reply.affected,
            last_insert_id: reply.last_insert_id,
        })
    }

    fn shape_field(
        &self,
        info: &FieldInfo,
        opts: &QueryOptions,
        schema: Option<&Schema>,
    ) -> Field {
        let canonical = schema.and_then(|s| {
            let table_key = format!("{}.{}", info.schema.as_deref()?, info.table.as_deref()?);
            s.table(&table_key)?.field(&info.name).cloned()
        });
        let mut field = canonical.unwrap_or_else(|| Field {
            col: info.name.clone(),
            native_type: info.native_type.clone(),
            ..Field::default()
        });
        if let Some(attrs) = opts.field_attrs.get(&info.name) {
            attrs.apply(&mut field);
        }
        field
    }

    /// Execute and return the affected-row count of the first result.
    pub async fn exec(&mut self, sql: &str, params: &Params, args: &[SqlValue]) -> PrepResult<u64> {
        let sets = self.query(sql, params, args, &QueryOptions::new().compact()).await?;
        Ok(sets.first().map_or(0, |s| s.affected))
    }

    /// Execute and return the first row of the first result set, if any.
    pub async fn first_row(
        &mut self,
        sql: &str,
        params: &Params,
        args: &[SqlValue],
    ) -> PrepResult<Option<Row>> {
        let mut sets = self.query(sql, params, args, &QueryOptions::new().compact()).await?;
        Ok(sets
            .first_mut()
            .and_then(|set| (!set.rows.is_empty()).then(|| set.rows.remove(0))))
    }

    /// Execute and visit every row of every result set.
    pub async fn each_row(
        &mut self,
        sql: &str,
        params: &Params,
        args: &[SqlValue],
        mut f: impl FnMut(&Row) -> PrepResult<()>,
    ) -> PrepResult<()> {
        let sets = self.query(sql, params, args, &QueryOptions::new().compact()).await?;
        for set in &sets {
            for row in &set.rows {
                f(row)?;
            }
        }
        Ok(())
    }

    /// Execute and visit every row as a positional value slice.
    pub async fn each_row_vals(
        &mut self,
        sql: &str,
        params: &Params,
        args: &[SqlValue],
        mut f: impl FnMut(&[SqlValue]) -> PrepResult<()>,
    ) -> PrepResult<()> {
        self.each_row(sql, params, args, |row| f(row.values())).await
    }

    /// Execute and group the first result set's rows by a column.
    pub async fn each_group(
        &mut self,
        col: &str,
        sql: &str,
        params: &Params,
        args: &[SqlValue],
    ) -> PrepResult<IndexMap<String, Vec<Row>>> {
        let sets = self.query(sql, params, args, &QueryOptions::new().compact()).await?;
        sets.first().map_or_else(|| Ok(IndexMap::new()), |s| s.group_by(col))
    }

    /// Run the template in prepare mode and create a server-side prepared
    /// statement with its bind plan.
    pub async fn prepare(
        &mut self,
        sql: &str,
        params: &Params,
        args: &[SqlValue],
    ) -> PrepResult<PreparedCommand<C::Stmt>> {
        self.ensure_reserved().await?;
        let prepared = template_prepare(sql, &self.env, params, args)?;
        tracing::debug!(target: "sqlprep", sql = truncate_for_log(&prepared.sql), "prepare");
        let stmt = self.conn.prepare(&prepared.sql).await.map_err(|e| self.classify(e))?;
        Ok(PreparedCommand::new(
            stmt,
            prepared.sql,
            prepared.param_names,
            prepared.param_map,
        ))
    }

    pub async fn begin(&mut self) -> PrepResult<()> {
        self.conn
            .query("start transaction")
            .await
            .map_err(|e| self.classify(e))?;
        Ok(())
    }

    pub async fn commit(&mut self) -> PrepResult<()> {
        self.conn.query("commit").await.map_err(|e| self.classify(e))?;
        Ok(())
    }

    pub async fn rollback(&mut self) -> PrepResult<()> {
        self.conn.query("rollback").await.map_err(|e| self.classify(e))?;
        Ok(())
    }
}

/// Runs the given block inside a database transaction.
///
/// - Issues `start transaction` on the handle.
/// - Commits on `Ok(_)`, rolls back on `Err(_)`.
/// - A rollback failure is folded into the returned error.
///
/// The block must evaluate to `sqlprep::PrepResult<T>`.
///
/// ```ignore
/// let moved = sqlprep::atomic!(cmd, {
///     cmd.exec("UPDATE acc SET bal = bal - :n WHERE id = :src", &p, &[]).await?;
///     cmd.exec("UPDATE acc SET bal = bal + :n WHERE id = :dst", &p, &[]).await?;
///     Ok(())
/// })?;
/// ```
#[macro_export]
macro_rules! atomic {
    ($cmd:expr, $body:block) => {{
        $cmd.begin().await?;
        let __sqlprep_tx_result: $crate::PrepResult<_> = async { $body }.await;
        match __sqlprep_tx_result {
            Ok(value) => {
                $cmd.commit().await?;
                Ok(value)
            }
            Err(error) => match $cmd.rollback().await {
                Ok(()) => Err(error),
                Err(rollback_err) => Err($crate::PrepError::Other(format!(
                    "{error} (rollback failed: {rollback_err})"
                ))),
            },
        }
    }};
}

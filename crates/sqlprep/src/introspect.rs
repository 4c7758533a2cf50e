//! Schema introspector.
//!
//! Reconstructs a normalized [`Schema`] from the server's information
//! catalog: columns, primary/unique/foreign keys, leftover indexes, checks,
//! triggers (filtered to the current user) and procedures.
//!
//! The native→canonical type mapping is a pure function
//! ([`field_from_column`]) so the fiddly parts (integer range tables,
//! display-width defaults, enum value lists) are testable without a server.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::connection::Connection;
use crate::error::{PrepError, PrepResult};
use crate::quote::ReservedWords;
use crate::schema::{
    AttrRegistry, Check, Field, FieldType, ForeignKey, Index, ProcParam, Procedure, RefAction,
    Schema, Table, Trigger, TriggerOp, TriggerTime, UniqueKey,
};
use crate::template::{render, Environment};
use crate::value::{Params, SqlValue};

/// A timestamped schema snapshot, as installed into the per-server cache.
#[derive(Debug, Clone)]
pub struct SchemaSnapshot {
    pub retrieved_at: DateTime<Utc>,
    pub schema: Arc<Schema>,
}

/// Raw column record off `information_schema.columns`.
#[derive(Debug, Clone, Default)]
pub struct ColumnRow {
    pub schema: String,
    pub table: String,
    pub col: String,
    pub ordinal: u32,
    /// Bare type name (`int`, `varchar`, ...).
    pub data_type: String,
    /// Full type text (`int(10) unsigned`, `enum('a','b')`, ...).
    pub column_type: String,
    pub default: Option<String>,
    pub nullable: bool,
    /// The `extra` column (`auto_increment`, ...).
    pub extra: String,
    pub char_max_len: Option<u64>,
    pub num_precision: Option<u32>,
    pub num_scale: Option<u32>,
    pub charset: Option<String>,
    pub collation: Option<String>,
    pub comment: Option<String>,
}

/// Signed and unsigned ranges of the MySQL integer types.
fn int_range(data_type: &str, unsigned: bool) -> Option<(f64, f64)> {
    let (min, max, umax) = match data_type {
        "tinyint" => (-128.0, 127.0, 255.0),
        "smallint" => (-32768.0, 32767.0, 65535.0),
        "mediumint" => (-8388608.0, 8388607.0, 16777215.0),
        "int" | "integer" => (-2147483648.0, 2147483647.0, 4294967295.0),
        "bigint" => (i64::MIN as f64, i64::MAX as f64, u64::MAX as f64),
        _ => return None,
    };
    Some(if unsigned { (0.0, umax) } else { (min, max) })
}

/// Default display width of an integer type (what the server reports when
/// the DDL did not specify one).
fn default_display_width(data_type: &str, unsigned: bool) -> Option<u32> {
    let (signed, uns) = match data_type {
        "tinyint" => (4, 3),
        "smallint" => (6, 5),
        "mediumint" => (9, 8),
        "int" | "integer" => (11, 10),
        "bigint" => (20, 20),
        _ => return None,
    };
    Some(if unsigned { uns } else { signed })
}

/// Parse the `(N)` display width out of a `column_type` like `int(10) unsigned`.
fn display_width(column_type: &str) -> Option<u32> {
    let open = column_type.find('(')?;
    let close = column_type[open..].find(')')? + open;
    column_type[open + 1..close].parse().ok()
}

/// Parse the value list of an `enum('a','b')` / `set('a','b')` column type.
fn parse_enum_values(column_type: &str) -> Vec<String> {
    let Some(open) = column_type.find('(') else {
        return Vec::new();
    };
    let Some(close) = column_type.rfind(')') else {
        return Vec::new();
    };
    let body = &column_type[open + 1..close];

    let mut values = Vec::new();
    let mut current = String::new();
    let mut chars = body.chars().peekable();
    let mut in_quote = false;

    while let Some(ch) = chars.next() {
        if in_quote {
            match ch {
                '\'' => {
                    if chars.peek() == Some(&'\'') {
                        current.push(chars.next().unwrap());
                    } else {
                        in_quote = false;
                        values.push(std::mem::take(&mut current));
                    }
                }
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                }
                _ => current.push(ch),
            }
        } else if ch == '\'' {
            in_quote = true;
        }
    }
    values
}

fn parse_default(raw: Option<&str>, ftype: Option<FieldType>) -> Option<SqlValue> {
    let raw = raw?;
    if raw.eq_ignore_ascii_case("null") {
        return Some(SqlValue::Null);
    }
    if matches!(ftype, Some(FieldType::Number)) {
        if let Ok(v) = raw.parse::<i64>() {
            return Some(SqlValue::Int(v));
        }
        if let Ok(v) = raw.parse::<f64>() {
            return Some(SqlValue::Float(v));
        }
    }
    Some(SqlValue::Text(raw.to_string()))
}

/// Map a raw catalog column to the canonical field descriptor.
pub fn field_from_column(row: &ColumnRow) -> Field {
    let unsigned = row.column_type.contains("unsigned");
    let mut field = Field {
        col: row.col.clone(),
        col_index: row.ordinal,
        native_type: Some(row.data_type.clone()),
        unsigned,
        not_null: !row.nullable,
        auto_increment: row.extra.to_ascii_lowercase().contains("auto_increment"),
        charset: row.charset.clone(),
        collation: row.collation.clone(),
        comment: row.comment.clone().filter(|c| !c.is_empty()),
        ..Field::default()
    };

    match row.data_type.as_str() {
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" => {
            let width = display_width(&row.column_type);
            // tinyint(1) is the MySQL boolean convention.
            if row.data_type == "tinyint" && !unsigned && width == Some(1) {
                field.ftype = Some(FieldType::Bool);
            } else {
                field.ftype = Some(FieldType::Number);
                let (min, max) = int_range(&row.data_type, unsigned).unwrap();
                field.min = Some(min);
                field.max = Some(max);
                // Preserve the display width only when it differs from the
                // type's default.
                if let Some(w) = width {
                    if Some(w) != default_display_width(&row.data_type, unsigned) {
                        field.digits = Some(w);
                    }
                }
            }
        }
        "decimal" | "numeric" => {
            let digits = row.num_precision.unwrap_or(10);
            let decimals = row.num_scale.unwrap_or(0);
            field.digits = Some(digits);
            field.decimals = Some(decimals);
            if digits > 15 {
                field.ftype = Some(FieldType::Decimal);
            } else {
                field.ftype = Some(FieldType::Number);
                let whole = i32::try_from(digits - decimals).unwrap_or(0);
                let max = 10f64.powi(whole) - 10f64.powi(-(decimals as i32));
                field.min = Some(if unsigned { 0.0 } else { -max });
                field.max = Some(max);
            }
        }
        "float" | "double" | "real" => {
            field.ftype = Some(FieldType::Number);
            field.decimals = row.num_scale;
        }
        "bit" => {
            let bits = display_width(&row.column_type).unwrap_or(1);
            if bits == 1 {
                field.ftype = Some(FieldType::Bool);
            } else {
                field.ftype = Some(FieldType::Number);
                field.min = Some(0.0);
                field.max = Some(2f64.powi(bits as i32) - 1.0);
            }
        }
        "year" => {
            field.ftype = Some(FieldType::Number);
            field.min = Some(1901.0);
            field.max = Some(2055.0);
        }
        "date" => {
            field.ftype = Some(FieldType::Date);
        }
        "datetime" | "timestamp" | "time" => {
            field.ftype = Some(FieldType::Date);
            field.has_time = true;
        }
        "enum" | "set" => {
            field.ftype = Some(FieldType::Enum);
            field.enum_values = parse_enum_values(&row.column_type);
        }
        "char" => {
            field.ftype = Some(FieldType::Text);
            field.padded = true;
            field.size = row.char_max_len;
        }
        "varchar" | "tinytext" | "text" | "mediumtext" | "longtext" | "json" => {
            field.ftype = Some(FieldType::Text);
            field.size = row.char_max_len;
        }
        "binary" => {
            field.ftype = Some(FieldType::Blob);
            field.padded = true;
            field.size = row.char_max_len;
        }
        "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => {
            field.ftype = Some(FieldType::Blob);
            field.size = row.char_max_len;
        }
        _ => {}
    }

    field.default = parse_default(row.default.as_deref(), field.ftype);
    field
}

const COLUMNS_SQL: &str = "\
select table_schema, table_name, column_name, ordinal_position, data_type,
       column_type, column_default, is_nullable, extra,
       character_maximum_length, numeric_precision, numeric_scale,
       character_set_name, collation_name, column_comment
from information_schema.columns
where table_schema in (?)
order by table_schema, table_name, ordinal_position";

const CONSTRAINTS_SQL: &str = "\
select tc.table_schema, tc.table_name, tc.constraint_name, tc.constraint_type,
       kcu.column_name, kcu.referenced_table_schema, kcu.referenced_table_name,
       kcu.referenced_column_name, rc.update_rule, rc.delete_rule
from information_schema.table_constraints tc
join information_schema.key_column_usage kcu
  on kcu.constraint_schema = tc.constraint_schema
 and kcu.constraint_name = tc.constraint_name
 and kcu.table_schema = tc.table_schema
 and kcu.table_name = tc.table_name
left join information_schema.referential_constraints rc
  on rc.constraint_schema = tc.constraint_schema
 and rc.constraint_name = tc.constraint_name
where tc.table_schema in (?)
  and tc.constraint_type in ('PRIMARY KEY', 'UNIQUE', 'FOREIGN KEY')
order by tc.table_schema, tc.table_name, tc.constraint_name, kcu.ordinal_position";

const INDEXES_SQL: &str = "\
select table_schema, table_name, index_name, column_name, collation
from information_schema.statistics
where table_schema in (?)
order by table_schema, table_name, index_name, seq_in_index";

const CHECKS_SQL: &str = "\
select tc.constraint_schema, tc.table_name, tc.constraint_name, cc.check_clause
from information_schema.check_constraints cc
join information_schema.table_constraints tc
  on tc.constraint_schema = cc.constraint_schema
 and tc.constraint_name = cc.constraint_name
where tc.constraint_type = 'CHECK' and tc.constraint_schema in (?)
order by tc.constraint_schema, tc.table_name, tc.constraint_name";

const TRIGGERS_SQL: &str = "\
select trigger_schema, event_object_table, trigger_name, action_order,
       action_timing, event_manipulation, action_statement, definer
from information_schema.triggers
where trigger_schema in (?)
order by trigger_schema, event_object_table, trigger_name";

const ROUTINES_SQL: &str = "\
select routine_schema, routine_name, routine_type, dtd_identifier,
       routine_definition
from information_schema.routines
where routine_schema in (?) and routine_type = 'PROCEDURE'
order by routine_schema, routine_name";

const PARAMETERS_SQL: &str = "\
select specific_schema, specific_name, parameter_name, parameter_mode,
       dtd_identifier
from information_schema.parameters
where specific_schema in (?) and parameter_name is not null
order by specific_schema, specific_name, ordinal_position";

async fn catalog_query<C: Connection>(
    conn: &mut C,
    sql: &str,
    dbs: &[String],
) -> PrepResult<Vec<crate::connection::Row>> {
    let env = Environment::new(conn.engine());
    let list = SqlValue::List(dbs.iter().map(|d| SqlValue::Text(d.clone())).collect());
    let rendered = render(sql, &env, &Params::new(), &[list])?;
    Ok(conn.query(&rendered.sql).await?.rows)
}

/// Populate a [`Schema`] for the given databases, applying the caller's
/// attribute overlays last.
pub async fn introspect<C: Connection>(
    conn: &mut C,
    dbs: &[String],
    attrs: &AttrRegistry,
) -> PrepResult<Schema> {
    let mut schema = Schema::new(conn.engine());

    for row in catalog_query(conn, COLUMNS_SQL, dbs).await? {
        let db = row.get_str("table_schema")?.to_string();
        let table_name = row.get_str("table_name")?.to_string();
        let col = ColumnRow {
            schema: db.clone(),
            table: table_name.clone(),
            col: row.get_str("column_name")?.to_string(),
            ordinal: row.get_u32("ordinal_position")?,
            data_type: row.get_str("data_type")?.to_ascii_lowercase(),
            column_type: row.get_str("column_type")?.to_string(),
            default: row.get_opt_str("column_default")?.map(str::to_string),
            nullable: row.get_str("is_nullable")?.eq_ignore_ascii_case("yes"),
            extra: row.get_str("extra")?.to_string(),
            char_max_len: row.get_opt_u64("character_maximum_length")?,
            num_precision: row.get_opt_u64("numeric_precision")?.map(|v| v as u32),
            num_scale: row.get_opt_u64("numeric_scale")?.map(|v| v as u32),
            charset: row.get_opt_str("character_set_name")?.map(str::to_string),
            collation: row.get_opt_str("collation_name")?.map(str::to_string),
            comment: row.get_opt_str("column_comment")?.map(str::to_string),
        };
        let field = field_from_column(&col);

        let key = format!("{db}.{table_name}");
        let table = schema
            .tables
            .entry(key)
            .or_insert_with(|| Table::new(db, table_name));
        if field.auto_increment {
            table.ai_col = Some(field.col.clone());
        }
        table.fields.insert(field.col.clone(), field);
    }

    load_constraints(conn, dbs, &mut schema).await?;
    load_indexes(conn, dbs, &mut schema).await?;
    load_checks(conn, dbs, &mut schema).await?;
    load_triggers(conn, dbs, &mut schema).await?;
    load_procedures(conn, dbs, &mut schema).await?;

    for table in schema.tables.values() {
        table.validate()?;
    }

    schema.apply_attrs(attrs);
    Ok(schema)
}

/// Introspect and stamp a snapshot for the per-server cache.
pub async fn snapshot<C: Connection>(
    conn: &mut C,
    dbs: &[String],
    attrs: &AttrRegistry,
) -> PrepResult<SchemaSnapshot> {
    let schema = introspect(conn, dbs, attrs).await?;
    tracing::info!(target: "sqlprep", dbs = ?dbs, tables = schema.tables.len(), "schema snapshot refreshed");
    Ok(SchemaSnapshot {
        retrieved_at: Utc::now(),
        schema: Arc::new(schema),
    })
}

async fn load_constraints<C: Connection>(
    conn: &mut C,
    dbs: &[String],
    schema: &mut Schema,
) -> PrepResult<()> {
    for row in catalog_query(conn, CONSTRAINTS_SQL, dbs).await? {
        let key = format!(
            "{}.{}",
            row.get_str("table_schema")?,
            row.get_str("table_name")?
        );
        let Some(table) = schema.tables.get_mut(&key) else {
            continue;
        };
        let name = row.get_str("constraint_name")?.to_string();
        let col = row.get_str("column_name")?.to_string();

        match row.get_str("constraint_type")? {
            "PRIMARY KEY" => table.pk.push(col),
            "UNIQUE" => {
                table
                    .uks
                    .entry(name)
                    .or_insert_with(|| UniqueKey { cols: Vec::new() })
                    .cols
                    .push(col);
            }
            "FOREIGN KEY" => {
                let ref_schema = row.get_opt_str("referenced_table_schema")?.unwrap_or_default();
                let ref_table = row.get_opt_str("referenced_table_name")?.unwrap_or_default();
                let ref_col = row.get_opt_str("referenced_column_name")?.unwrap_or_default();
                let fk = table.fks.entry(name).or_insert_with(|| ForeignKey {
                    ref_table: format!("{ref_schema}.{ref_table}"),
                    cols: Vec::new(),
                    ref_cols: Vec::new(),
                    onupdate: row
                        .get_opt_str("update_rule")
                        .ok()
                        .flatten()
                        .and_then(RefAction::from_rule),
                    ondelete: row
                        .get_opt_str("delete_rule")
                        .ok()
                        .flatten()
                        .and_then(RefAction::from_rule),
                });
                fk.cols.push(col.clone());
                fk.ref_cols.push(ref_col.to_string());
                // Single-column foreign keys annotate the field itself.
                if fk.cols.len() == 1 {
                    if let Some(field) = table.fields.get_mut(&col) {
                        field.ref_table = Some(fk.ref_table.clone());
                        field.ref_col = Some(ref_col.to_string());
                    }
                } else if let Some(field) = table.fields.get_mut(&fk.cols[0]) {
                    field.ref_table = None;
                    field.ref_col = None;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

async fn load_indexes<C: Connection>(
    conn: &mut C,
    dbs: &[String],
    schema: &mut Schema,
) -> PrepResult<()> {
    for row in catalog_query(conn, INDEXES_SQL, dbs).await? {
        let key = format!(
            "{}.{}",
            row.get_str("table_schema")?,
            row.get_str("table_name")?
        );
        let Some(table) = schema.tables.get_mut(&key) else {
            continue;
        };
        let name = row.get_str("index_name")?.to_string();
        // Skip indexes that back a constraint.
        if name == "PRIMARY" || table.uks.contains_key(&name) || table.fks.contains_key(&name) {
            continue;
        }
        let col = row.get_str("column_name")?.to_string();
        // The collation flag distinguishes ascending from descending parts.
        let desc = row.get_opt_str("collation")?.is_some_and(|c| c == "D");
        let ix = table.ixs.entry(name).or_insert_with(|| Index {
            cols: Vec::new(),
            descs: Vec::new(),
        });
        ix.cols.push(col);
        ix.descs.push(desc);
    }
    Ok(())
}

async fn load_checks<C: Connection>(
    conn: &mut C,
    dbs: &[String],
    schema: &mut Schema,
) -> PrepResult<()> {
    // Older servers have no check_constraints view; treat that as "no
    // checks" rather than a failure.
    let rows = match catalog_query(conn, CHECKS_SQL, dbs).await {
        Ok(rows) => rows,
        Err(PrepError::Db(_)) => return Ok(()),
        Err(e) => return Err(e),
    };
    for row in rows {
        let key = format!(
            "{}.{}",
            row.get_str("constraint_schema")?,
            row.get_str("table_name")?
        );
        let Some(table) = schema.tables.get_mut(&key) else {
            continue;
        };
        table.checks.insert(
            row.get_str("constraint_name")?.to_string(),
            Check {
                expr: row.get_str("check_clause")?.to_string(),
            },
        );
    }
    Ok(())
}

fn trigger_time(timing: &str) -> PrepResult<TriggerTime> {
    match timing.to_ascii_lowercase().as_str() {
        "before" => Ok(TriggerTime::Before),
        "after" => Ok(TriggerTime::After),
        other => Err(PrepError::decode("action_timing", format!("unknown timing '{other}'"))),
    }
}

fn trigger_op(event: &str) -> PrepResult<TriggerOp> {
    match event.to_ascii_lowercase().as_str() {
        "insert" => Ok(TriggerOp::Insert),
        "update" => Ok(TriggerOp::Update),
        "delete" => Ok(TriggerOp::Delete),
        other => Err(PrepError::decode("event_manipulation", format!("unknown event '{other}'"))),
    }
}

async fn load_triggers<C: Connection>(
    conn: &mut C,
    dbs: &[String],
    schema: &mut Schema,
) -> PrepResult<()> {
    let user_reply = conn.query("select current_user()").await?;
    let current_user = user_reply
        .rows
        .first()
        .and_then(|r| r.values().first())
        .and_then(|v| match v {
            SqlValue::Text(s) => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_default();

    for row in catalog_query(conn, TRIGGERS_SQL, dbs).await? {
        // Only triggers owned by the current user are visible to it in full.
        if row.get_str("definer")? != current_user {
            continue;
        }
        let key = format!(
            "{}.{}",
            row.get_str("trigger_schema")?,
            row.get_str("event_object_table")?
        );
        let Some(table) = schema.tables.get_mut(&key) else {
            continue;
        };
        table.triggers.insert(
            row.get_str("trigger_name")?.to_string(),
            Trigger {
                when: trigger_time(row.get_str("action_timing")?)?,
                op: trigger_op(row.get_str("event_manipulation")?)?,
                pos: row.get_u32("action_order")?,
                body: row.get_str("action_statement")?.to_string(),
            },
        );
    }
    Ok(())
}

async fn load_procedures<C: Connection>(
    conn: &mut C,
    dbs: &[String],
    schema: &mut Schema,
) -> PrepResult<()> {
    for row in catalog_query(conn, ROUTINES_SQL, dbs).await? {
        let name = row.get_str("routine_name")?.to_string();
        schema.procs.insert(
            name,
            Procedure {
                params: Vec::new(),
                returns: row.get_opt_str("dtd_identifier")?.map(str::to_string),
                body: row.get_opt_str("routine_definition")?.unwrap_or_default().to_string(),
            },
        );
    }
    for row in catalog_query(conn, PARAMETERS_SQL, dbs).await? {
        let name = row.get_str("specific_name")?.to_string();
        let Some(proc) = schema.procs.get_mut(&name) else {
            continue;
        };
        proc.params.push(ProcParam {
            name: row.get_str("parameter_name")?.to_string(),
            mode: row
                .get_opt_str("parameter_mode")?
                .unwrap_or("in")
                .to_ascii_lowercase(),
            native_type: row.get_str("dtd_identifier")?.to_string(),
        });
    }
    Ok(())
}

/// Load the engine's reserved words from the catalog, falling back to the
/// built-in list on servers without a keywords view.
pub async fn load_reserved_words<C: Connection>(conn: &mut C) -> PrepResult<ReservedWords> {
    let reply = match conn
        .query("select word from information_schema.keywords where reserved = 1")
        .await
    {
        Ok(reply) => reply,
        Err(PrepError::Db(_)) => return Ok(ReservedWords::builtin_fallback()),
        Err(e) => return Err(e),
    };
    let mut words = ReservedWords::new();
    for row in &reply.rows {
        words.insert(row.get_str("word")?);
    }
    Ok(words)
}

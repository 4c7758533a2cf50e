//! Normalized schema model.
//!
//! The in-memory representation of databases, tables, columns and
//! constraints, produced by the introspector or hand-built by callers.
//! Tables are immutable once published into the schema cache and replaced
//! atomically when DDL invalidates the snapshot.
//!
//! All mappings that carry a contractual iteration order (`fields`, `uks`,
//! `ixs`, `fks`, `checks`, `triggers`, `Schema::tables`) are insertion-order
//! maps.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{PrepError, PrepResult};
use crate::quote::Engine;
use crate::value::{SqlValue, ToBinHook, ToSqlHook};

/// Canonical, engine-neutral column type.
///
/// `decimal` tags exact decimals too wide for a double (precision > 15);
/// narrower decimals and every integer type map to `number`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Number,
    Decimal,
    Date,
    Enum,
    #[serde(rename = "string")]
    Text,
    Blob,
    Bool,
}

/// Canonical column descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Field {
    /// Column name.
    pub col: String,
    /// 1-based ordinal position.
    pub col_index: u32,
    #[serde(rename = "type")]
    pub ftype: Option<FieldType>,
    /// Engine-specific native type tag (`int`, `varchar`, ...).
    pub native_type: Option<String>,
    /// Max length in characters (strings) or bytes (binary).
    pub size: Option<u64>,
    /// Total significant digits (numerics) or display width (integers,
    /// only when it differs from the type default).
    pub digits: Option<u32>,
    pub decimals: Option<u32>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub unsigned: bool,
    pub not_null: bool,
    pub auto_increment: bool,
    pub default: Option<SqlValue>,
    /// Date types: whether a time-of-day component is present.
    pub has_time: bool,
    /// Fixed-width types (`char`, `binary`): values are padded.
    pub padded: bool,
    pub enum_values: Vec<String>,
    pub charset: Option<String>,
    pub collation: Option<String>,
    /// Single-column foreign key target, when one exists.
    pub ref_table: Option<String>,
    pub ref_col: Option<String>,
    pub comment: Option<String>,
    /// Serializer override used by the value quoter.
    #[serde(skip)]
    pub to_sql: Option<ToSqlHook>,
    /// Binding override used by prepared statements.
    #[serde(skip)]
    pub to_bin: Option<ToBinHook>,
}

/// Equality over the declarative attributes; serializer hooks are not part
/// of a column's identity.
impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.col == other.col
            && self.ftype == other.ftype
            && self.native_type == other.native_type
            && self.size == other.size
            && self.digits == other.digits
            && self.decimals == other.decimals
            && self.min == other.min
            && self.max == other.max
            && self.unsigned == other.unsigned
            && self.not_null == other.not_null
            && self.auto_increment == other.auto_increment
            && self.default == other.default
            && self.has_time == other.has_time
            && self.padded == other.padded
            && self.enum_values == other.enum_values
            && self.charset == other.charset
            && self.collation == other.collation
            && self.ref_table == other.ref_table
            && self.ref_col == other.ref_col
            && self.comment == other.comment
    }
}

impl Field {
    pub fn new(col: impl Into<String>, col_index: u32, ftype: FieldType) -> Self {
        Self {
            col: col.into(),
            col_index,
            ftype: Some(ftype),
            ..Self::default()
        }
    }

    /// Render a value as a SQL literal for this column: the field's `to_sql`
    /// hook when one is set (e.g. numeric timestamp → `from_unixtime(...)`),
    /// the stock value quoter otherwise.
    pub fn sql_value(&self, value: &SqlValue, quoter: &crate::quote::Quoter) -> PrepResult<String> {
        match &self.to_sql {
            Some(hook) => hook.apply(value),
            None => quoter.value(value),
        }
    }

    /// Rewrite a value for prepared-statement binding via the field's
    /// `to_bin` hook, when one is set.
    pub fn bin_value(&self, value: &SqlValue) -> PrepResult<SqlValue> {
        match &self.to_bin {
            Some(hook) => hook.apply(value),
            None => Ok(value.clone()),
        }
    }
}

/// Referential action; absent means the engine default (`no action`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefAction {
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl RefAction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Restrict => "restrict",
            Self::Cascade => "cascade",
            Self::SetNull => "set null",
            Self::SetDefault => "set default",
        }
    }

    /// Parse an information-catalog rule; `NO ACTION` (the default) maps to
    /// `None`.
    pub fn from_rule(rule: &str) -> Option<Self> {
        match rule.to_ascii_lowercase().as_str() {
            "restrict" => Some(Self::Restrict),
            "cascade" => Some(Self::Cascade),
            "set null" => Some(Self::SetNull),
            "set default" => Some(Self::SetDefault),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub ref_table: String,
    pub cols: Vec<String>,
    pub ref_cols: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onupdate: Option<RefAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ondelete: Option<RefAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueKey {
    pub cols: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub cols: Vec<String>,
    /// Per-column descending flag, parallel to `cols`.
    pub descs: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub expr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerTime {
    Before,
    After,
}

impl TriggerTime {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOp {
    Insert,
    Update,
    Delete,
}

impl TriggerOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub when: TriggerTime,
    pub op: TriggerOp,
    /// Action order among same-event triggers.
    pub pos: u32,
    /// Engine-specific body.
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcParam {
    pub name: String,
    /// `in` / `out` / `inout`.
    pub mode: String,
    pub native_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Procedure {
    pub params: Vec<ProcParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
    pub body: String,
}

/// A table descriptor: ordered fields plus keys, indexes and constraints,
/// each addressable by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Table {
    pub schema: String,
    pub name: String,
    /// Table default charset/collation; column collations are emitted in
    /// DDL only when they differ.
    pub charset: Option<String>,
    pub collation: Option<String>,
    /// Ordered by `col_index`, keyed by column name.
    pub fields: IndexMap<String, Field>,
    /// Primary key column names, possibly empty.
    pub pk: Vec<String>,
    /// The auto-increment column, at most one.
    pub ai_col: Option<String>,
    pub uks: IndexMap<String, UniqueKey>,
    pub ixs: IndexMap<String, Index>,
    pub fks: IndexMap<String, ForeignKey>,
    pub checks: IndexMap<String, Check>,
    pub triggers: IndexMap<String, Trigger>,
}

impl Table {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// `schema.table`, the key under which this table lives in a [`Schema`].
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn field(&self, col: &str) -> Option<&Field> {
        self.fields.get(col)
    }

    /// Check the structural invariants: every referenced column exists, at
    /// most one auto-increment column, foreign keys have matching column
    /// counts.
    pub fn validate(&self) -> PrepResult<()> {
        let missing = |col: &str, what: &str| {
            PrepError::schema(format!(
                "{} references unknown column '{col}' of table {}",
                what,
                self.qualified_name()
            ))
        };

        for col in &self.pk {
            if !self.fields.contains_key(col) {
                return Err(missing(col, "primary key"));
            }
        }
        if let Some(ai) = &self.ai_col {
            if !self.fields.contains_key(ai) {
                return Err(missing(ai, "auto_increment"));
            }
        }
        let ai_fields = self.fields.values().filter(|f| f.auto_increment).count();
        if ai_fields > 1 {
            return Err(PrepError::schema(format!(
                "table {} has {ai_fields} auto-increment columns",
                self.qualified_name()
            )));
        }

        for (name, uk) in &self.uks {
            for col in &uk.cols {
                if !self.fields.contains_key(col) {
                    return Err(missing(col, &format!("unique key '{name}'")));
                }
            }
        }
        for (name, ix) in &self.ixs {
            for col in &ix.cols {
                if !self.fields.contains_key(col) {
                    return Err(missing(col, &format!("index '{name}'")));
                }
            }
        }
        for (name, fk) in &self.fks {
            if fk.cols.len() != fk.ref_cols.len() {
                return Err(PrepError::schema(format!(
                    "foreign key '{name}' of table {} has {} columns but {} referenced columns",
                    self.qualified_name(),
                    fk.cols.len(),
                    fk.ref_cols.len()
                )));
            }
            for col in &fk.cols {
                if !self.fields.contains_key(col) {
                    return Err(missing(col, &format!("foreign key '{name}'")));
                }
            }
        }
        Ok(())
    }
}

/// A full schema snapshot: tables keyed by `schema.table`, procedures keyed
/// by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    pub engine: Engine,
    pub tables: IndexMap<String, Table>,
    pub procs: IndexMap<String, Procedure>,
}

impl Schema {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            ..Self::default()
        }
    }

    pub fn table(&self, qualified: &str) -> Option<&Table> {
        self.tables.get(qualified)
    }

    /// Insert a table under its `schema.table` key after validating it.
    pub fn add_table(&mut self, table: Table) -> PrepResult<()> {
        table.validate()?;
        self.tables.insert(table.qualified_name(), table);
        Ok(())
    }

    /// Apply caller-supplied attribute overlays to every table. Runs last,
    /// after introspection, so callers can tighten canonical types without
    /// editing upstream descriptors.
    pub fn apply_attrs(&mut self, attrs: &AttrRegistry) {
        for table in self.tables.values_mut() {
            attrs.apply_to_table(table);
        }
    }
}

/// Partial column overlay; `None` fields leave the canonical value alone.
#[derive(Debug, Clone, Default)]
pub struct FieldAttrs {
    pub ftype: Option<FieldType>,
    pub size: Option<u64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub not_null: Option<bool>,
    pub default: Option<SqlValue>,
    pub has_time: Option<bool>,
    pub comment: Option<String>,
    pub to_sql: Option<ToSqlHook>,
    pub to_bin: Option<ToBinHook>,
}

impl FieldAttrs {
    pub fn apply(&self, field: &mut Field) {
        if let Some(t) = self.ftype {
            field.ftype = Some(t);
        }
        if let Some(size) = self.size {
            field.size = Some(size);
        }
        if let Some(min) = self.min {
            field.min = Some(min);
        }
        if let Some(max) = self.max {
            field.max = Some(max);
        }
        if let Some(not_null) = self.not_null {
            field.not_null = not_null;
        }
        if let Some(default) = &self.default {
            field.default = Some(default.clone());
        }
        if let Some(has_time) = self.has_time {
            field.has_time = has_time;
        }
        if let Some(comment) = &self.comment {
            field.comment = Some(comment.clone());
        }
        if let Some(hook) = &self.to_sql {
            field.to_sql = Some(hook.clone());
        }
        if let Some(hook) = &self.to_bin {
            field.to_bin = Some(hook.clone());
        }
    }
}

/// Table-level overlay.
#[derive(Debug, Clone, Default)]
pub struct TableAttrs {
    pub comment: Option<String>,
}

/// Process-wide attribute registries, populated at startup.
///
/// Overlay precedence, weakest first: canonical field, then `col_attrs`
/// (keyed `schema.table.col`), `col_name_attrs` (column name),
/// `col_type_attrs` (canonical type), `native_type_attrs` (engine native
/// type). Later registries override earlier ones.
#[derive(Debug, Clone, Default)]
pub struct AttrRegistry {
    pub table_attrs: HashMap<String, TableAttrs>,
    pub col_attrs: HashMap<String, FieldAttrs>,
    pub col_name_attrs: HashMap<String, FieldAttrs>,
    pub col_type_attrs: HashMap<FieldType, FieldAttrs>,
    pub native_type_attrs: HashMap<String, FieldAttrs>,
}

impl AttrRegistry {
    pub fn apply_to_table(&self, table: &mut Table) {
        let table_key = table.qualified_name();
        for field in table.fields.values_mut() {
            if let Some(attrs) = self.col_attrs.get(&format!("{table_key}.{}", field.col)) {
                attrs.apply(field);
            }
            if let Some(attrs) = self.col_name_attrs.get(&field.col) {
                attrs.apply(field);
            }
            if let Some(attrs) = field.ftype.and_then(|t| self.col_type_attrs.get(&t)) {
                attrs.apply(field);
            }
            if let Some(attrs) = field
                .native_type
                .as_deref()
                .and_then(|t| self.native_type_attrs.get(t))
            {
                attrs.apply(field);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_fields(cols: &[&str]) -> Table {
        let mut t = Table::new("db", "t");
        for (i, col) in cols.iter().enumerate() {
            t.fields
                .insert(col.to_string(), Field::new(*col, i as u32 + 1, FieldType::Number));
        }
        t
    }

    #[test]
    fn validate_accepts_consistent_table() {
        let mut t = table_with_fields(&["id", "name"]);
        t.pk = vec!["id".to_string()];
        t.uks.insert(
            "uk_name".to_string(),
            UniqueKey {
                cols: vec!["name".to_string()],
            },
        );
        assert!(t.validate().is_ok());
    }

    #[test]
    fn validate_rejects_unknown_pk_column() {
        let mut t = table_with_fields(&["id"]);
        t.pk = vec!["nope".to_string()];
        assert!(t.validate().is_err());
    }

    #[test]
    fn validate_rejects_mismatched_fk_arity() {
        let mut t = table_with_fields(&["a", "b"]);
        t.fks.insert(
            "fk".to_string(),
            ForeignKey {
                ref_table: "u".to_string(),
                cols: vec!["a".to_string(), "b".to_string()],
                ref_cols: vec!["x".to_string()],
                onupdate: None,
                ondelete: None,
            },
        );
        assert!(t.validate().is_err());
    }

    #[test]
    fn validate_rejects_two_auto_increment_columns() {
        let mut t = table_with_fields(&["a", "b"]);
        for f in t.fields.values_mut() {
            f.auto_increment = true;
        }
        assert!(t.validate().is_err());
    }

    #[test]
    fn overlay_precedence() {
        let mut table = table_with_fields(&["ts"]);
        table.fields.get_mut("ts").unwrap().native_type = Some("bigint".to_string());

        let mut attrs = AttrRegistry::default();
        attrs.col_attrs.insert(
            "db.t.ts".to_string(),
            FieldAttrs {
                comment: Some("from col_attrs".to_string()),
                ..Default::default()
            },
        );
        attrs.col_name_attrs.insert(
            "ts".to_string(),
            FieldAttrs {
                comment: Some("from col_name_attrs".to_string()),
                ..Default::default()
            },
        );
        attrs.native_type_attrs.insert(
            "bigint".to_string(),
            FieldAttrs {
                ftype: Some(FieldType::Date),
                has_time: Some(true),
                ..Default::default()
            },
        );

        attrs.apply_to_table(&mut table);
        let f = table.field("ts").unwrap();
        // col_name_attrs overrides col_attrs; native_type_attrs overrides
        // the canonical type.
        assert_eq!(f.comment.as_deref(), Some("from col_name_attrs"));
        assert_eq!(f.ftype, Some(FieldType::Date));
        assert!(f.has_time);
    }

    #[test]
    fn to_sql_hook_overrides_the_value_quoter() {
        use crate::quote::{Engine, Quoter};
        use crate::value::ToSqlHook;

        let quoter = Quoter::new(Engine::MySql);
        let mut f = Field::new("ts", 1, FieldType::Number);
        assert_eq!(f.sql_value(&SqlValue::Int(99), &quoter).unwrap(), "99");

        f.to_sql = Some(ToSqlHook::new(|v| match v {
            SqlValue::Int(n) => Ok(format!("from_unixtime({n})")),
            other => Err(PrepError::quote(format!("expected unix time, got {other:?}"))),
        }));
        assert_eq!(
            f.sql_value(&SqlValue::Int(99), &quoter).unwrap(),
            "from_unixtime(99)"
        );
    }

    #[test]
    fn schema_json_round_trip() {
        let mut schema = Schema::new(Engine::MySql);
        let mut t = table_with_fields(&["id"]);
        t.pk = vec!["id".to_string()];
        schema.add_table(t).unwrap();

        let json = serde_json::to_string(&schema).unwrap();
        let back: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tables.len(), 1);
        assert_eq!(back.table("db.t").unwrap().pk, vec!["id".to_string()]);
    }
}

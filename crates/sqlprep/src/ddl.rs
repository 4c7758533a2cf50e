//! DDL emitter.
//!
//! Renders schema entities as SQL definition fragments and full
//! CREATE statements. Fragment methods (`sql_col`, `sql_pk`, `sql_uk`, ...)
//! return the body text used both inside `create table` and in the diff
//! planner's `alter table ... add ...` statements.

use crate::error::{PrepError, PrepResult};
use crate::quote::{Engine, Quoter};
use crate::schema::{
    Check, Field, FieldType, ForeignKey, Index, Procedure, Table, Trigger, UniqueKey,
};
use crate::value::SqlValue;

#[derive(Debug, Clone)]
pub struct DdlEmitter {
    quoter: Quoter,
}

impl DdlEmitter {
    pub fn new(engine: Engine) -> Self {
        Self {
            quoter: Quoter::new(engine),
        }
    }

    pub fn with_quoter(quoter: Quoter) -> Self {
        Self { quoter }
    }

    pub(crate) fn ident(&self, name: &str) -> PrepResult<String> {
        self.quoter.ident(name)
    }

    fn ident_list(&self, cols: &[String]) -> PrepResult<String> {
        let mut out = String::new();
        for (i, col) in cols.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&self.ident(col)?);
        }
        Ok(out)
    }

    /// Reconstruct the native type text of a column.
    fn type_sql(&self, field: &Field) -> String {
        let native = field.native_type.as_deref().unwrap_or(match field.ftype {
            Some(FieldType::Number) => "bigint",
            Some(FieldType::Decimal) => "decimal",
            Some(FieldType::Date) => "datetime",
            Some(FieldType::Enum) => "enum",
            Some(FieldType::Bool) => "tinyint",
            Some(FieldType::Blob) => "blob",
            _ => "varchar",
        });

        match native {
            "enum" | "set" => {
                let mut out = String::from(native);
                out.push('(');
                for (i, v) in field.enum_values.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push('\'');
                    out.push_str(&self.quoter.esc_str(v));
                    out.push('\'');
                }
                out.push(')');
                out
            }
            "decimal" | "numeric" => match (field.digits, field.decimals) {
                (Some(d), Some(s)) => format!("{native}({d},{s})"),
                (Some(d), None) => format!("{native}({d})"),
                _ => native.to_string(),
            },
            "char" | "varchar" | "binary" | "varbinary" => match field.size {
                Some(size) => format!("{native}({size})"),
                None => native.to_string(),
            },
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" => {
                let width = if field.ftype == Some(FieldType::Bool) {
                    Some(1)
                } else {
                    field.digits
                };
                match width {
                    Some(w) => format!("{native}({w})"),
                    None => native.to_string(),
                }
            }
            _ => native.to_string(),
        }
    }

    fn default_sql(&self, value: &SqlValue) -> PrepResult<String> {
        // `current_timestamp` and friends are expressions, not strings.
        if let SqlValue::Text(s) = value {
            let lower = s.to_ascii_lowercase();
            if lower == "current_timestamp" || lower.starts_with("current_timestamp(") {
                return Ok(s.clone());
            }
        }
        self.quoter.value(value)
    }

    /// Column definition with the name padded to `width` (for aligned
    /// `create table` bodies; pass 0 for no alignment).
    pub fn sql_col(&self, field: &Field, table: &Table, width: usize) -> PrepResult<String> {
        let name = self.ident(&field.col)?;
        let mut out = format!("{name:<width$} {}", self.type_sql(field));

        if field.unsigned {
            out.push_str(" unsigned");
        }
        if let Some(collation) = &field.collation {
            if table.collation.as_deref() != Some(collation.as_str()) {
                out.push_str(" collate ");
                out.push_str(collation);
            }
        }
        if field.not_null {
            out.push_str(" not null");
        }
        if field.auto_increment {
            out.push_str(" auto_increment");
        }
        // A single-column primary key is declared inline.
        if table.pk.len() == 1 && table.pk[0] == field.col {
            out.push_str(" primary key");
        }
        if let Some(default) = &field.default {
            out.push_str(" default ");
            out.push_str(&self.default_sql(default)?);
        }
        if let Some(comment) = &field.comment {
            out.push_str(" comment ");
            out.push_str(&self.quoter.value(&SqlValue::Text(comment.clone()))?);
        }
        Ok(out)
    }

    pub fn sql_pk(&self, table: &Table) -> PrepResult<String> {
        Ok(format!("primary key ({})", self.ident_list(&table.pk)?))
    }

    pub fn sql_uk(&self, name: &str, uk: &UniqueKey) -> PrepResult<String> {
        Ok(format!(
            "unique key {} ({})",
            self.ident(name)?,
            self.ident_list(&uk.cols)?
        ))
    }

    pub fn sql_ix(&self, name: &str, ix: &Index) -> PrepResult<String> {
        let mut cols = String::new();
        for (i, col) in ix.cols.iter().enumerate() {
            if i > 0 {
                cols.push_str(", ");
            }
            cols.push_str(&self.ident(col)?);
            if ix.descs.get(i).copied().unwrap_or(false) {
                cols.push_str(" desc");
            }
        }
        Ok(format!("index {} ({cols})", self.ident(name)?))
    }

    /// Foreign-key definition. Default (`no action`) rules are omitted.
    pub fn sql_fk(&self, name: &str, fk: &ForeignKey) -> PrepResult<String> {
        if fk.ref_cols.is_empty() || fk.ref_cols.iter().any(String::is_empty) {
            return Err(PrepError::schema(format!(
                "foreign key '{name}' has unresolved referenced columns"
            )));
        }
        let mut out = format!(
            "constraint {} foreign key ({}) references {} ({})",
            self.ident(name)?,
            self.ident_list(&fk.cols)?,
            self.ident(&fk.ref_table)?,
            self.ident_list(&fk.ref_cols)?
        );
        if let Some(rule) = fk.onupdate {
            out.push_str(" on update ");
            out.push_str(rule.as_sql());
        }
        if let Some(rule) = fk.ondelete {
            out.push_str(" on delete ");
            out.push_str(rule.as_sql());
        }
        Ok(out)
    }

    pub fn sql_check(&self, name: &str, check: &Check) -> PrepResult<String> {
        Ok(format!(
            "constraint {} check ({})",
            self.ident(name)?,
            check.expr
        ))
    }

    pub fn sql_trigger(&self, table: &Table, name: &str, trigger: &Trigger) -> PrepResult<String> {
        Ok(format!(
            "create trigger {} {} {} on {} for each row\n{}",
            self.ident(name)?,
            trigger.when.as_sql(),
            trigger.op.as_sql(),
            self.ident(&table.qualified_name())?,
            trigger.body
        ))
    }

    pub fn sql_proc(&self, name: &str, proc: &Procedure) -> PrepResult<String> {
        let mut params = String::new();
        for (i, p) in proc.params.iter().enumerate() {
            if i > 0 {
                params.push_str(", ");
            }
            params.push_str(&p.mode);
            params.push(' ');
            params.push_str(&self.ident(&p.name)?);
            params.push(' ');
            params.push_str(&p.native_type);
        }
        Ok(format!(
            "create procedure {} ({params})\n{}",
            self.ident(name)?,
            proc.body
        ))
    }

    /// Full `create table` statement: columns, composite primary key, then
    /// unique keys, indexes, foreign keys and checks, each sub-group in
    /// sorted key order. Set `with_fks` to false to defer foreign keys (the
    /// diff planner adds them after all tables exist).
    pub fn sql_table(&self, table: &Table, with_fks: bool) -> PrepResult<String> {
        let width = table
            .fields
            .values()
            .map(|f| self.ident(&f.col).map(|s| s.len()))
            .collect::<PrepResult<Vec<_>>>()?
            .into_iter()
            .max()
            .unwrap_or(0);

        let mut lines = Vec::new();
        for field in table.fields.values() {
            lines.push(self.sql_col(field, table, width)?);
        }
        if table.pk.len() > 1 {
            lines.push(self.sql_pk(table)?);
        }

        let mut sorted_keys: Vec<&String> = table.uks.keys().collect();
        sorted_keys.sort();
        for name in sorted_keys {
            lines.push(self.sql_uk(name, &table.uks[name.as_str()])?);
        }

        let mut sorted_keys: Vec<&String> = table.ixs.keys().collect();
        sorted_keys.sort();
        for name in sorted_keys {
            lines.push(self.sql_ix(name, &table.ixs[name.as_str()])?);
        }

        if with_fks {
            let mut sorted_keys: Vec<&String> = table.fks.keys().collect();
            sorted_keys.sort();
            for name in sorted_keys {
                lines.push(self.sql_fk(name, &table.fks[name.as_str()])?);
            }
        }

        let mut sorted_keys: Vec<&String> = table.checks.keys().collect();
        sorted_keys.sort();
        for name in sorted_keys {
            lines.push(self.sql_check(name, &table.checks[name.as_str()])?);
        }

        let mut out = format!("create table {} (\n", self.ident(&table.qualified_name())?);
        for (i, line) in lines.iter().enumerate() {
            out.push_str("    ");
            out.push_str(line);
            if i + 1 < lines.len() {
                out.push(',');
            }
            out.push('\n');
        }
        out.push(')');
        if let Some(charset) = &table.charset {
            out.push_str(" character set ");
            out.push_str(charset);
        }
        if let Some(collation) = &table.collation {
            out.push_str(" collate ");
            out.push_str(collation);
        }
        Ok(out)
    }

    pub fn sql_db(&self, name: &str) -> PrepResult<String> {
        Ok(format!("create database {}", self.ident(name)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RefAction, TriggerOp, TriggerTime};

    fn emitter() -> DdlEmitter {
        DdlEmitter::new(Engine::MySql)
    }

    fn users_table() -> Table {
        let mut t = Table::new("db", "users");
        let mut id = Field::new("id", 1, FieldType::Number);
        id.native_type = Some("int".to_string());
        id.not_null = true;
        id.auto_increment = true;
        let mut name = Field::new("name", 2, FieldType::Text);
        name.native_type = Some("varchar".to_string());
        name.size = Some(64);
        name.not_null = true;
        t.fields.insert("id".to_string(), id);
        t.fields.insert("name".to_string(), name);
        t.pk = vec!["id".to_string()];
        t.ai_col = Some("id".to_string());
        t
    }

    #[test]
    fn column_definition_with_modifiers() {
        let t = users_table();
        let sql = emitter().sql_col(t.field("id").unwrap(), &t, 4).unwrap();
        assert_eq!(sql, "id   int not null auto_increment primary key");
    }

    #[test]
    fn create_table_with_inline_pk() {
        let sql = emitter().sql_table(&users_table(), true).unwrap();
        assert_eq!(
            sql,
            "create table db.users (\n    id   int not null auto_increment primary key,\n    name varchar(64) not null\n)"
        );
    }

    #[test]
    fn composite_pk_is_a_separate_line() {
        let mut t = users_table();
        t.pk = vec!["id".to_string(), "name".to_string()];
        let sql = emitter().sql_table(&t, true).unwrap();
        assert!(sql.contains("primary key (id, name)"));
        assert!(!sql.contains("auto_increment primary key"));
    }

    #[test]
    fn subgroups_render_in_sorted_key_order() {
        let mut t = users_table();
        t.uks.insert(
            "z_uk".to_string(),
            UniqueKey { cols: vec!["name".to_string()] },
        );
        t.uks.insert(
            "a_uk".to_string(),
            UniqueKey { cols: vec!["id".to_string()] },
        );
        let sql = emitter().sql_table(&t, true).unwrap();
        let a = sql.find("unique key a_uk").unwrap();
        let z = sql.find("unique key z_uk").unwrap();
        assert!(a < z);
    }

    #[test]
    fn fk_with_rules_and_unresolved_failure() {
        let e = emitter();
        let fk = ForeignKey {
            ref_table: "db.users".to_string(),
            cols: vec!["user_id".to_string()],
            ref_cols: vec!["id".to_string()],
            onupdate: Some(RefAction::Cascade),
            ondelete: None,
        };
        assert_eq!(
            e.sql_fk("fk_user", &fk).unwrap(),
            "constraint fk_user foreign key (user_id) references db.users (id) on update cascade"
        );

        let broken = ForeignKey {
            ref_cols: vec![],
            ..fk
        };
        assert!(e.sql_fk("fk_user", &broken).is_err());
    }

    #[test]
    fn index_with_descending_part() {
        let ix = Index {
            cols: vec!["a".to_string(), "b".to_string()],
            descs: vec![false, true],
        };
        assert_eq!(emitter().sql_ix("ix_ab", &ix).unwrap(), "index ix_ab (a, b desc)");
    }

    #[test]
    fn enum_type_renders_value_list() {
        let mut f = Field::new("state", 1, FieldType::Enum);
        f.native_type = Some("enum".to_string());
        f.enum_values = vec!["new".to_string(), "it's".to_string()];
        let t = Table::new("db", "t");
        let sql = emitter().sql_col(&f, &t, 0).unwrap();
        assert_eq!(sql, r"state enum('new','it\'s')");
    }

    #[test]
    fn default_expressions_are_not_quoted() {
        let mut f = Field::new("ts", 1, FieldType::Date);
        f.native_type = Some("timestamp".to_string());
        f.default = Some(SqlValue::Text("CURRENT_TIMESTAMP".to_string()));
        let t = Table::new("db", "t");
        let sql = emitter().sql_col(&f, &t, 0).unwrap();
        assert_eq!(sql, "ts timestamp default CURRENT_TIMESTAMP");

        let mut f2 = Field::new("state", 1, FieldType::Text);
        f2.native_type = Some("varchar".to_string());
        f2.size = Some(8);
        f2.default = Some(SqlValue::Text("new".to_string()));
        let sql = emitter().sql_col(&f2, &t, 0).unwrap();
        assert_eq!(sql, "state varchar(8) default 'new'");
    }

    #[test]
    fn trigger_and_db() {
        let t = users_table();
        let trg = Trigger {
            when: TriggerTime::Before,
            op: TriggerOp::Insert,
            pos: 1,
            body: "set new.name = trim(new.name)".to_string(),
        };
        assert_eq!(
            emitter().sql_trigger(&t, "trg_trim", &trg).unwrap(),
            "create trigger trg_trim before insert on db.users for each row\nset new.name = trim(new.name)"
        );
        assert_eq!(emitter().sql_db("shop").unwrap(), "create database shop");
    }
}

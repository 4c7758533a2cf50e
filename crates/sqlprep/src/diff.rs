//! Schema differ and DDL planner.
//!
//! [`diff_schemas`] computes the structured delta between two snapshots;
//! [`plan`] turns a delta into an ordered list of DDL statements. The
//! statement order is what makes the script applyable: foreign keys
//! referring to a table are dropped before the table is, and added only
//! after every referenced table exists.
//!
//! Within each per-table sub-step, elements are emitted in the insertion
//! order of the diff; a caller that needs fully deterministic output
//! supplies a diff built from deterministically-ordered schemas.

use indexmap::IndexMap;

use crate::ddl::DdlEmitter;
use crate::error::PrepResult;
use crate::schema::{
    Check, Field, ForeignKey, Index, Procedure, Schema, Table, Trigger, UniqueKey,
};

/// Primary-key delta of an updated table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PkChange {
    Drop,
    Add(Vec<String>),
    /// Drop the old key, then add this one.
    Change(Vec<String>),
}

/// Per-table delta. Constraint modifications are modeled as remove + add
/// (engines cannot alter a key in place).
#[derive(Debug, Clone, Default)]
pub struct TableDiff {
    /// The new-side table (context for column definitions and alignment).
    pub table: Table,
    pub fields_add: IndexMap<String, Field>,
    pub fields_remove: Vec<String>,
    /// New definitions of changed columns.
    pub fields_update: IndexMap<String, Field>,
    pub pk: Option<PkChange>,
    pub uks_add: IndexMap<String, UniqueKey>,
    pub uks_remove: Vec<String>,
    pub ixs_add: IndexMap<String, Index>,
    pub ixs_remove: Vec<String>,
    pub fks_add: IndexMap<String, ForeignKey>,
    pub fks_remove: Vec<String>,
    pub checks_add: IndexMap<String, Check>,
    pub checks_remove: Vec<String>,
    pub triggers_add: IndexMap<String, Trigger>,
    pub triggers_remove: Vec<String>,
}

impl TableDiff {
    pub fn is_empty(&self) -> bool {
        self.fields_add.is_empty()
            && self.fields_remove.is_empty()
            && self.fields_update.is_empty()
            && self.pk.is_none()
            && self.uks_add.is_empty()
            && self.uks_remove.is_empty()
            && self.ixs_add.is_empty()
            && self.ixs_remove.is_empty()
            && self.fks_add.is_empty()
            && self.fks_remove.is_empty()
            && self.checks_add.is_empty()
            && self.checks_remove.is_empty()
            && self.triggers_add.is_empty()
            && self.triggers_remove.is_empty()
    }
}

/// Structured delta between two schemas.
#[derive(Debug, Clone, Default)]
pub struct SchemaDiff {
    pub tables_add: IndexMap<String, Table>,
    pub tables_remove: Vec<String>,
    pub tables_update: IndexMap<String, TableDiff>,
    pub procs_add: IndexMap<String, Procedure>,
    pub procs_remove: Vec<String>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.tables_add.is_empty()
            && self.tables_remove.is_empty()
            && self.tables_update.is_empty()
            && self.procs_add.is_empty()
            && self.procs_remove.is_empty()
    }
}

/// Diff two keyed maps into (added, removed, changed) name sets, where a
/// changed entry appears as remove + add.
fn diff_keyed<'a, T: PartialEq + Clone>(
    old: &'a IndexMap<String, T>,
    new: &'a IndexMap<String, T>,
) -> (IndexMap<String, T>, Vec<String>) {
    let mut add = IndexMap::new();
    let mut remove = Vec::new();

    for (name, old_entry) in old {
        match new.get(name) {
            Some(new_entry) if new_entry == old_entry => {}
            _ => remove.push(name.clone()),
        }
    }
    for (name, new_entry) in new {
        if old.get(name) != Some(new_entry) {
            add.insert(name.clone(), new_entry.clone());
        }
    }
    (add, remove)
}

fn diff_table(old: &Table, new: &Table) -> TableDiff {
    let mut diff = TableDiff {
        table: new.clone(),
        ..TableDiff::default()
    };

    for (name, old_field) in &old.fields {
        match new.fields.get(name) {
            None => diff.fields_remove.push(name.clone()),
            Some(new_field) if new_field != old_field => {
                diff.fields_update.insert(name.clone(), new_field.clone());
            }
            Some(_) => {}
        }
    }
    for (name, field) in &new.fields {
        if !old.fields.contains_key(name) {
            diff.fields_add.insert(name.clone(), field.clone());
        }
    }

    if old.pk != new.pk {
        diff.pk = Some(if new.pk.is_empty() {
            PkChange::Drop
        } else if old.pk.is_empty() {
            PkChange::Add(new.pk.clone())
        } else {
            PkChange::Change(new.pk.clone())
        });
    }

    (diff.uks_add, diff.uks_remove) = diff_keyed(&old.uks, &new.uks);
    (diff.ixs_add, diff.ixs_remove) = diff_keyed(&old.ixs, &new.ixs);
    (diff.fks_add, diff.fks_remove) = diff_keyed(&old.fks, &new.fks);
    (diff.checks_add, diff.checks_remove) = diff_keyed(&old.checks, &new.checks);
    (diff.triggers_add, diff.triggers_remove) = diff_keyed(&old.triggers, &new.triggers);

    diff
}

/// Compute the structured delta that transforms `old` into `new`.
pub fn diff_schemas(old: &Schema, new: &Schema) -> SchemaDiff {
    let mut diff = SchemaDiff::default();

    for (key, new_table) in &new.tables {
        if !old.tables.contains_key(key) {
            diff.tables_add.insert(key.clone(), new_table.clone());
        }
    }
    for (key, old_table) in &old.tables {
        match new.tables.get(key) {
            None => diff.tables_remove.push(key.clone()),
            Some(new_table) => {
                let table_diff = diff_table(old_table, new_table);
                if !table_diff.is_empty() {
                    diff.tables_update.insert(key.clone(), table_diff);
                }
            }
        }
    }

    (diff.procs_add, diff.procs_remove) = diff_keyed(&old.procs, &new.procs);
    diff
}

/// Triggers of a freshly created table, in creation order: by operation,
/// then timing, then action order.
fn sorted_triggers(table: &Table) -> Vec<(&String, &Trigger)> {
    let mut triggers: Vec<(&String, &Trigger)> = table.triggers.iter().collect();
    triggers.sort_by_key(|(_, t)| (t.op, t.when, t.pos));
    triggers
}

/// Emit the ordered DDL statement list that applies `diff`.
///
/// Statement order:
/// 1. drop removed procedures
/// 2. per updated table, drop removed foreign keys
/// 3. drop removed tables
/// 4. create added tables (bodies only) and their triggers
/// 5. per updated table: columns, primary key, unique keys, indexes,
///    checks, triggers
/// 6. per updated table, add foreign keys
/// 7. per added table, add foreign keys (all referenced tables now exist)
/// 8. create added procedures
pub fn plan(diff: &SchemaDiff, emitter: &DdlEmitter) -> PrepResult<Vec<String>> {
    let mut out = Vec::new();

    for name in &diff.procs_remove {
        out.push(format!("drop procedure {}", emitter.ident(name)?));
    }

    for (key, table_diff) in &diff.tables_update {
        let table = emitter.ident(key)?;
        for name in &table_diff.fks_remove {
            out.push(format!(
                "alter table {table} drop foreign key {}",
                emitter.ident(name)?
            ));
        }
    }

    for key in &diff.tables_remove {
        out.push(format!("drop table {}", emitter.ident(key)?));
    }

    for table in diff.tables_add.values() {
        out.push(emitter.sql_table(table, false)?);
        for (name, trigger) in sorted_triggers(table) {
            out.push(emitter.sql_trigger(table, name, trigger)?);
        }
    }

    for (key, d) in &diff.tables_update {
        let table = emitter.ident(key)?;

        for name in &d.fields_remove {
            out.push(format!("alter table {table} drop column {}", emitter.ident(name)?));
        }
        for field in d.fields_add.values() {
            out.push(format!(
                "alter table {table} add column {}",
                emitter.sql_col(field, &d.table, 0)?
            ));
        }
        for field in d.fields_update.values() {
            out.push(format!(
                "alter table {table} modify column {}",
                emitter.sql_col(field, &d.table, 0)?
            ));
        }

        match &d.pk {
            Some(PkChange::Drop) => out.push(format!("alter table {table} drop primary key")),
            Some(PkChange::Add(_)) => {
                out.push(format!("alter table {table} add {}", emitter.sql_pk(&d.table)?));
            }
            Some(PkChange::Change(_)) => {
                out.push(format!("alter table {table} drop primary key"));
                out.push(format!("alter table {table} add {}", emitter.sql_pk(&d.table)?));
            }
            None => {}
        }

        for name in &d.uks_remove {
            out.push(format!("alter table {table} drop key {}", emitter.ident(name)?));
        }
        for (name, uk) in &d.uks_add {
            out.push(format!("alter table {table} add {}", emitter.sql_uk(name, uk)?));
        }

        for name in &d.ixs_remove {
            out.push(format!("alter table {table} drop index {}", emitter.ident(name)?));
        }
        for (name, ix) in &d.ixs_add {
            out.push(format!("alter table {table} add {}", emitter.sql_ix(name, ix)?));
        }

        for name in &d.checks_remove {
            out.push(format!("alter table {table} drop check {}", emitter.ident(name)?));
        }
        for (name, check) in &d.checks_add {
            out.push(format!("alter table {table} add {}", emitter.sql_check(name, check)?));
        }

        for name in &d.triggers_remove {
            out.push(format!("drop trigger {}", emitter.ident(name)?));
        }
        for (name, trigger) in &d.triggers_add {
            out.push(emitter.sql_trigger(&d.table, name, trigger)?);
        }
    }

    for (key, d) in &diff.tables_update {
        let table = emitter.ident(key)?;
        for (name, fk) in &d.fks_add {
            out.push(format!("alter table {table} add {}", emitter.sql_fk(name, fk)?));
        }
    }

    // Deferred so every referenced table exists.
    for (key, table) in &diff.tables_add {
        let table_name = emitter.ident(key)?;
        let mut sorted_keys: Vec<&String> = table.fks.keys().collect();
        sorted_keys.sort();
        for name in sorted_keys {
            out.push(format!(
                "alter table {table_name} add {}",
                emitter.sql_fk(name, &table.fks[name.as_str()])?
            ));
        }
    }

    for (name, proc) in &diff.procs_add {
        out.push(emitter.sql_proc(name, proc)?);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::Engine;
    use crate::schema::{FieldType, TriggerOp, TriggerTime};

    fn field(col: &str, index: u32) -> Field {
        let mut f = Field::new(col, index, FieldType::Number);
        f.native_type = Some("int".to_string());
        f
    }

    fn simple_table(name: &str, cols: &[&str]) -> Table {
        let mut t = Table::new("db", name);
        for (i, col) in cols.iter().enumerate() {
            t.fields.insert(col.to_string(), field(col, i as u32 + 1));
        }
        t
    }

    fn fk_to(target: &str, col: &str) -> ForeignKey {
        ForeignKey {
            ref_table: format!("db.{target}"),
            cols: vec![col.to_string()],
            ref_cols: vec!["id".to_string()],
            onupdate: None,
            ondelete: None,
        }
    }

    #[test]
    fn field_changes_are_detected() {
        let old = simple_table("t", &["a", "b", "c"]);
        let mut new = simple_table("t", &["a", "b", "d"]);
        new.fields.get_mut("b").unwrap().not_null = true;

        let d = diff_table(&old, &new);
        assert_eq!(d.fields_remove, vec!["c".to_string()]);
        assert!(d.fields_add.contains_key("d"));
        assert!(d.fields_update.contains_key("b"));
        assert!(!d.fields_update.contains_key("a"));
    }

    #[test]
    fn changed_unique_key_is_removed_and_added() {
        let mut old = simple_table("t", &["a", "b"]);
        old.uks.insert(
            "uk".to_string(),
            UniqueKey { cols: vec!["a".to_string()] },
        );
        let mut new = simple_table("t", &["a", "b"]);
        new.uks.insert(
            "uk".to_string(),
            UniqueKey { cols: vec!["a".to_string(), "b".to_string()] },
        );

        let d = diff_table(&old, &new);
        assert_eq!(d.uks_remove, vec!["uk".to_string()]);
        assert!(d.uks_add.contains_key("uk"));
    }

    #[test]
    fn pk_transitions() {
        let mut old = simple_table("t", &["a", "b"]);
        let mut new = simple_table("t", &["a", "b"]);

        new.pk = vec!["a".to_string()];
        assert_eq!(diff_table(&old, &new).pk, Some(PkChange::Add(vec!["a".to_string()])));

        old.pk = vec!["a".to_string()];
        new.pk = vec![];
        assert_eq!(diff_table(&old, &new).pk, Some(PkChange::Drop));

        new.pk = vec!["b".to_string()];
        assert_eq!(diff_table(&old, &new).pk, Some(PkChange::Change(vec!["b".to_string()])));
    }

    #[test]
    fn unchanged_tables_produce_no_update_entry() {
        let mut old = Schema::new(Engine::MySql);
        old.add_table(simple_table("t", &["a"])).unwrap();
        let new = old.clone();
        assert!(diff_schemas(&old, &new).is_empty());
    }

    /// Removing table A while adding B (fk → pre-existing U) and C (fk → B):
    /// fk drops come first, then the table drop, then bodies, then fk adds
    /// in table order.
    #[test]
    fn plan_orders_drops_creates_and_fk_adds() {
        let mut old = Schema::new(Engine::MySql);
        old.add_table(simple_table("a", &["id"])).unwrap();
        let mut u = simple_table("u", &["id", "a_id"]);
        u.fks.insert("fk_u_a".to_string(), fk_to("a", "a_id"));
        old.add_table(u).unwrap();

        let mut new = Schema::new(Engine::MySql);
        new.add_table(simple_table("u", &["id", "a_id"])).unwrap();
        let mut b = simple_table("b", &["id", "u_id"]);
        b.fks.insert("fk_b_u".to_string(), fk_to("u", "u_id"));
        new.add_table(b).unwrap();
        let mut c = simple_table("c", &["id", "b_id"]);
        c.fks.insert("fk_c_b".to_string(), fk_to("b", "b_id"));
        new.add_table(c).unwrap();

        let diff = diff_schemas(&old, &new);
        let stmts = plan(&diff, &DdlEmitter::new(Engine::MySql)).unwrap();

        let pos = |needle: &str| {
            stmts
                .iter()
                .position(|s| s.contains(needle))
                .unwrap_or_else(|| panic!("missing statement containing '{needle}'"))
        };

        let drop_fk = pos("drop foreign key fk_u_a");
        let drop_a = pos("drop table db.a");
        let create_b = pos("create table db.b");
        let create_c = pos("create table db.c");
        let add_fk_b = pos("add constraint fk_b_u");
        let add_fk_c = pos("add constraint fk_c_b");

        assert!(drop_fk < drop_a);
        assert!(drop_a < create_b);
        assert!(create_b < create_c);
        assert!(create_c < add_fk_b, "fk adds must follow all creates");
        assert!(add_fk_b < add_fk_c);

        // Created bodies must not embed outgoing foreign keys.
        assert!(!stmts[create_b].contains("foreign key"));
        assert!(!stmts[create_c].contains("foreign key"));
    }

    #[test]
    fn new_table_triggers_sort_by_op_timing_pos() {
        let mut t = simple_table("t", &["id"]);
        let trig = |op, when, pos| Trigger {
            op,
            when,
            pos,
            body: "begin end".to_string(),
        };
        t.triggers.insert(
            "z_upd".to_string(),
            trig(TriggerOp::Update, TriggerTime::Before, 1),
        );
        t.triggers.insert(
            "a_ins_after".to_string(),
            trig(TriggerOp::Insert, TriggerTime::After, 2),
        );
        t.triggers.insert(
            "b_ins_after".to_string(),
            trig(TriggerOp::Insert, TriggerTime::After, 1),
        );
        t.triggers.insert(
            "ins_before".to_string(),
            trig(TriggerOp::Insert, TriggerTime::Before, 1),
        );

        let names: Vec<&str> = sorted_triggers(&t).into_iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["ins_before", "b_ins_after", "a_ins_after", "z_upd"]);
    }

    #[test]
    fn update_substeps_follow_the_contract_order() {
        let mut old = simple_table("t", &["a", "b"]);
        old.uks.insert("uk_old".to_string(), UniqueKey { cols: vec!["a".to_string()] });
        old.ixs.insert(
            "ix_old".to_string(),
            Index { cols: vec!["b".to_string()], descs: vec![false] },
        );

        let mut new = simple_table("t", &["a", "c"]);
        new.fields.get_mut("a").unwrap().not_null = true;
        new.pk = vec!["a".to_string()];
        new.uks.insert("uk_new".to_string(), UniqueKey { cols: vec!["c".to_string()] });
        new.ixs.insert(
            "ix_new".to_string(),
            Index { cols: vec!["a".to_string()], descs: vec![false] },
        );

        let mut old_schema = Schema::new(Engine::MySql);
        old_schema.add_table(old).unwrap();
        let mut new_schema = Schema::new(Engine::MySql);
        new_schema.add_table(new).unwrap();

        let stmts = plan(
            &diff_schemas(&old_schema, &new_schema),
            &DdlEmitter::new(Engine::MySql),
        )
        .unwrap();
        let pos = |needle: &str| stmts.iter().position(|s| s.contains(needle)).unwrap();

        assert!(pos("drop column b") < pos("add column c"));
        assert!(pos("add column c") < pos("modify column a"));
        assert!(pos("modify column a") < pos("add primary key"));
        assert!(pos("add primary key") < pos("drop key uk_old"));
        assert!(pos("drop key uk_old") < pos("add unique key uk_new"));
        assert!(pos("add unique key uk_new") < pos("drop index ix_old"));
        assert!(pos("drop index ix_old") < pos("add index ix_new"));
    }

    #[test]
    fn procs_bracket_the_plan() {
        let proc = Procedure {
            params: vec![],
            returns: None,
            body: "begin select 1; end".to_string(),
        };
        let mut old = Schema::new(Engine::MySql);
        old.procs.insert("old_proc".to_string(), proc.clone());
        old.add_table(simple_table("t", &["a"])).unwrap();

        let mut new = Schema::new(Engine::MySql);
        new.procs.insert("new_proc".to_string(), proc);

        let stmts = plan(&diff_schemas(&old, &new), &DdlEmitter::new(Engine::MySql)).unwrap();
        assert!(stmts.first().unwrap().starts_with("drop procedure old_proc"));
        assert!(stmts.last().unwrap().starts_with("create procedure new_proc"));
    }
}

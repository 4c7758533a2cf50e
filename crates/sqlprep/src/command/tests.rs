use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::*;
use crate::connection::{ConnectOptions, PreparedStatement, ServerKey};
use crate::error::DbError;
use crate::quote::Engine;
use crate::value::ToBinHook;

fn mk_row(cols: &[&str], vals: Vec<SqlValue>) -> Row {
    let cols: Arc<[String]> = cols.iter().map(|c| c.to_string()).collect::<Vec<_>>().into();
    Row::new(cols, vals)
}

fn rows_reply(fields: &[&str], rows: Vec<Row>) -> QueryReply {
    QueryReply {
        fields: fields.iter().map(|f| FieldInfo::named(*f)).collect(),
        rows,
        ..QueryReply::default()
    }
}

type Responder = Box<dyn FnMut(&str) -> PrepResult<QueryReply> + Send>;

struct MockStmt {
    bound: Arc<std::sync::Mutex<Vec<Vec<SqlValue>>>>,
    freed: Arc<AtomicBool>,
}

impl PreparedStatement for MockStmt {
    async fn query(&mut self, values: &[SqlValue]) -> PrepResult<QueryReply> {
        self.bound.lock().unwrap().push(values.to_vec());
        Ok(QueryReply {
            affected: 1,
            ..QueryReply::default()
        })
    }

    async fn free(&mut self) -> PrepResult<()> {
        self.freed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MockConn {
    key: ServerKey,
    executed: Vec<String>,
    respond: Responder,
    queued_results: Vec<QueryReply>,
    bound: Arc<std::sync::Mutex<Vec<Vec<SqlValue>>>>,
    freed: Arc<AtomicBool>,
}

impl MockConn {
    fn new(host: &str) -> Self {
        Self {
            key: ServerKey::new(host, 3306),
            executed: Vec::new(),
            respond: Box::new(|_| Ok(QueryReply::default())),
            queued_results: Vec::new(),
            bound: Arc::new(std::sync::Mutex::new(Vec::new())),
            freed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn with_responder(mut self, respond: Responder) -> Self {
        self.respond = respond;
        self
    }
}

impl Connection for MockConn {
    type Stmt = MockStmt;

    async fn connect(_opts: &ConnectOptions) -> PrepResult<Self> {
        Ok(Self::new("mock"))
    }

    async fn close(&mut self) -> PrepResult<()> {
        Ok(())
    }

    async fn use_db(&mut self, _db: &str) -> PrepResult<()> {
        Ok(())
    }

    fn esc(&self, s: &str) -> String {
        s.replace('\'', "\\'")
    }

    async fn query(&mut self, sql: &str) -> PrepResult<QueryReply> {
        self.executed.push(sql.to_string());
        (self.respond)(sql)
    }

    async fn read_result(&mut self) -> PrepResult<Option<QueryReply>> {
        Ok(if self.queued_results.is_empty() {
            None
        } else {
            Some(self.queued_results.remove(0))
        })
    }

    async fn prepare(&mut self, sql: &str) -> PrepResult<Self::Stmt> {
        self.executed.push(format!("PREPARE {sql}"));
        Ok(MockStmt {
            bound: Arc::clone(&self.bound),
            freed: Arc::clone(&self.freed),
        })
    }

    fn engine(&self) -> Engine {
        Engine::MySql
    }

    fn server_key(&self) -> ServerKey {
        self.key.clone()
    }
}

/// Responder that serves a one-table catalog (`db.t` with an int `id`), an
/// empty keywords view and a current user.
fn catalog_responder() -> Responder {
    Box::new(|sql: &str| {
        if sql.contains("information_schema.keywords") {
            return Ok(rows_reply(
                &["word"],
                vec![mk_row(&["word"], vec![SqlValue::from("order")])],
            ));
        }
        if sql.contains("select database()") {
            return Ok(rows_reply(&["database()"], vec![mk_row(&["database()"], vec![SqlValue::from("db")])]));
        }
        if sql.contains("current_user") {
            return Ok(rows_reply(
                &["current_user()"],
                vec![mk_row(&["current_user()"], vec![SqlValue::from("app@%")])],
            ));
        }
        if sql.contains("information_schema.columns") {
            let cols = [
                "table_schema",
                "table_name",
                "column_name",
                "ordinal_position",
                "data_type",
                "column_type",
                "column_default",
                "is_nullable",
                "extra",
                "character_maximum_length",
                "numeric_precision",
                "numeric_scale",
                "character_set_name",
                "collation_name",
                "column_comment",
            ];
            let row = mk_row(
                &cols,
                vec![
                    SqlValue::from("db"),
                    SqlValue::from("t"),
                    SqlValue::from("id"),
                    SqlValue::UInt(1),
                    SqlValue::from("int"),
                    SqlValue::from("int(11)"),
                    SqlValue::Null,
                    SqlValue::from("NO"),
                    SqlValue::from(""),
                    SqlValue::Null,
                    SqlValue::UInt(10),
                    SqlValue::UInt(0),
                    SqlValue::Null,
                    SqlValue::Null,
                    SqlValue::from(""),
                ],
            );
            return Ok(rows_reply(&cols, vec![row]));
        }
        Ok(QueryReply::default())
    })
}

fn cmd_for(conn: MockConn) -> Command<MockConn> {
    Command::new(conn, Environment::new(Engine::MySql))
}

#[tokio::test]
async fn query_routes_through_the_template_pipeline() {
    let mut cmd = cmd_for(MockConn::new("tpl-host"));
    let params = Params::new().with("v", 7);
    cmd.query("SELECT * FROM t WHERE a = :v", &params, &[], &QueryOptions::new())
        .await
        .unwrap();
    let executed = cmd.connection().executed.last().unwrap();
    assert_eq!(executed, "SELECT * FROM t WHERE a = 7");
}

#[tokio::test]
async fn no_parse_sends_sql_verbatim() {
    let mut cmd = cmd_for(MockConn::new("noparse-host"));
    cmd.query("SELECT ':v' -- kept", &Params::new(), &[], &QueryOptions::new().no_parse())
        .await
        .unwrap();
    assert_eq!(cmd.connection().executed, vec!["SELECT ':v' -- kept"]);
}

#[tokio::test]
async fn reserved_words_load_lazily_and_feed_the_ident_quoter() {
    let conn = MockConn::new("reserved-host").with_responder(catalog_responder());
    let mut cmd = cmd_for(conn);
    let params = Params::new().with("t", "Order");
    cmd.query("SELECT * FROM ::t", &params, &[], &QueryOptions::new())
        .await
        .unwrap();
    let executed = cmd.connection().executed.last().unwrap();
    assert_eq!(executed, "SELECT * FROM `Order`");
}

#[tokio::test]
async fn multi_result_sets_accumulate() {
    let mut conn = MockConn::new("multi-host");
    conn.respond = Box::new(|_| {
        Ok(QueryReply {
            rows: vec![mk_row(&["a"], vec![SqlValue::Int(1)])],
            fields: vec![FieldInfo::named("a")],
            has_more: true,
            ..QueryReply::default()
        })
    });
    conn.queued_results = vec![rows_reply(&["b"], vec![mk_row(&["b"], vec![SqlValue::Int(2)])])];

    let mut cmd = cmd_for(conn);
    let sets = cmd
        .query("SELECT 1; SELECT 2", &Params::new(), &[], &QueryOptions::new().no_parse())
        .await
        .unwrap();
    assert_eq!(sets.len(), 2);
    assert_eq!(sets[0].rows[0].get("a"), Some(&SqlValue::Int(1)));
    assert_eq!(sets[1].rows[0].get("b"), Some(&SqlValue::Int(2)));
}

#[tokio::test]
async fn ddl_invalidates_the_shared_schema_cache() {
    let conn_a = MockConn::new("ddl-host").with_responder(catalog_responder());
    let conn_b = MockConn::new("ddl-host").with_responder(catalog_responder());
    let mut cmd_a = cmd_for(conn_a).with_dbs(["db"]);
    let mut cmd_b = cmd_for(conn_b).with_dbs(["db"]);

    let before = cmd_a.schema().await.unwrap();
    assert!(before.table("db.t").is_some());
    // The other handle shares the snapshot without introspecting.
    let shared = cmd_b.schema().await.unwrap();
    assert!(Arc::ptr_eq(&before, &shared));
    let introspections_before = cmd_b
        .connection()
        .executed
        .iter()
        .filter(|sql| sql.contains("information_schema.columns"))
        .count();
    assert_eq!(introspections_before, 0);

    cmd_a
        .exec("alter table t add column x int", &Params::new(), &[])
        .await
        .unwrap();

    // The next schema query on any handle re-introspects.
    let after = cmd_b.schema().await.unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    let introspections_after = cmd_b
        .connection()
        .executed
        .iter()
        .filter(|sql| sql.contains("information_schema.columns"))
        .count();
    assert_eq!(introspections_after, 1);
}

#[tokio::test]
async fn plain_queries_do_not_invalidate_the_cache() {
    let conn = MockConn::new("plain-host").with_responder(catalog_responder());
    let mut cmd = cmd_for(conn).with_dbs(["db"]);
    let before = cmd.schema().await.unwrap();
    cmd.exec("update t set a = 1", &Params::new(), &[]).await.unwrap();
    let after = cmd.schema().await.unwrap();
    assert!(Arc::ptr_eq(&before, &after));
}

#[test]
fn ddl_detection_prefix_scan() {
    assert!(is_ddl("create table t (a int)"));
    assert!(is_ddl("  ALTER TABLE t ADD x int"));
    assert!(is_ddl("select 1; drop table t"));
    assert!(is_ddl("grant all on *.* to x"));
    assert!(!is_ddl("select * from created_items"));
    assert!(!is_ddl("update t set created = 1"));
    assert!(!is_ddl("select 'drop table t'"));
}

#[tokio::test]
async fn first_row_and_each_group() {
    let mut conn = MockConn::new("rows-host");
    conn.respond = Box::new(|sql| {
        if sql.contains("information_schema.keywords") {
            return Ok(QueryReply::default());
        }
        Ok(rows_reply(
            &["grp", "n"],
            vec![
                mk_row(&["grp", "n"], vec![SqlValue::from("a"), SqlValue::Int(1)]),
                mk_row(&["grp", "n"], vec![SqlValue::from("b"), SqlValue::Int(2)]),
                mk_row(&["grp", "n"], vec![SqlValue::from("a"), SqlValue::Int(3)]),
            ],
        ))
    });
    let mut cmd = cmd_for(conn);

    let first = cmd
        .first_row("select * from t", &Params::new(), &[])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.get("n"), Some(&SqlValue::Int(1)));

    let groups = cmd
        .each_group("grp", "select * from t", &Params::new(), &[])
        .await
        .unwrap();
    assert_eq!(groups["a"].len(), 2);
    assert_eq!(groups["b"].len(), 1);
}

#[tokio::test]
async fn field_attrs_overlay_result_descriptors() {
    let mut conn = MockConn::new("attrs-host");
    conn.respond = Box::new(|_| Ok(rows_reply(&["ts"], vec![])));
    let mut cmd = cmd_for(conn);

    let opts = QueryOptions::new().field_attr(
        "ts",
        FieldAttrs {
            comment: Some("unix time".to_string()),
            ..FieldAttrs::default()
        },
    );
    let sets = cmd.query("select ts from t", &Params::new(), &[], &opts).await.unwrap();
    assert_eq!(sets[0].fields[0].comment.as_deref(), Some("unix time"));
}

#[tokio::test]
async fn backend_errors_are_classified() {
    let mut conn = MockConn::new("err-host");
    conn.respond = Box::new(|_| {
        Err(PrepError::Db(DbError::new(
            1062,
            Some("23000".to_string()),
            "Duplicate entry 'x' for key 't.uk_name'",
        )))
    });
    let mut cmd = cmd_for(conn);
    let err = cmd
        .exec("insert into t values (1)", &Params::new(), &[])
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(crate::error::ErrorCode::Uk));
    assert_eq!(err.sqlstate(), Some("23000"));
}

#[tokio::test]
async fn prepared_statement_binds_plan_sites_and_hooks() {
    let conn = MockConn::new("prep-host");
    let bound = Arc::clone(&conn.bound);
    let mut cmd = cmd_for(conn);

    let mut stmt = cmd
        .prepare("insert into t (a, b) values (:a, :ts)", &Params::new(), &[])
        .await
        .unwrap();
    assert_eq!(stmt.sql(), "insert into t (a, b) values (?, ?)");

    stmt.bind_hook(
        "ts",
        ToBinHook::new(|v| match v {
            SqlValue::Int(n) => Ok(SqlValue::Text(format!("from_unixtime({n})"))),
            other => Ok(other.clone()),
        }),
    );

    let params = Params::new().with("a", 1).with("ts", 99);
    stmt.exec(&params, &[]).await.unwrap();
    assert_eq!(
        bound.lock().unwrap()[0],
        vec![SqlValue::Int(1), SqlValue::Text("from_unixtime(99)".to_string())]
    );

    // A binding failure leaves the statement reusable.
    let err = stmt.exec(&Params::new().with("a", 1), &[]).await.unwrap_err();
    assert!(matches!(err, PrepError::Template(_)));
    stmt.exec(&params, &[]).await.unwrap();
    assert_eq!(bound.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn prepared_statement_free_releases_the_handle() {
    let conn = MockConn::new("free-host");
    let freed = Arc::clone(&conn.freed);
    let mut cmd = cmd_for(conn);
    let mut stmt = cmd.prepare("select ?", &Params::new(), &[]).await.unwrap();
    stmt.free().await.unwrap();
    assert!(freed.load(Ordering::SeqCst));
    assert!(stmt.exec(&Params::new(), &[SqlValue::Int(1)]).await.is_err());
}

async fn transfer(cmd: &mut Command<MockConn>, fail: bool) -> PrepResult<()> {
    crate::atomic!(cmd, {
        cmd.exec("update t set a = 1", &Params::new(), &[]).await?;
        if fail {
            return Err(PrepError::Other("boom".to_string()));
        }
        Ok(())
    })
}

/// Executed statements minus the lazy reserved-word load.
fn executed_sql(cmd: &mut Command<MockConn>) -> Vec<String> {
    cmd.connection()
        .executed
        .iter()
        .filter(|sql| !sql.contains("information_schema"))
        .cloned()
        .collect()
}

#[tokio::test]
async fn atomic_commits_on_success_and_rolls_back_on_error() {
    let mut cmd = cmd_for(MockConn::new("tx-host"));
    transfer(&mut cmd, false).await.unwrap();
    assert_eq!(
        executed_sql(&mut cmd),
        vec!["start transaction", "update t set a = 1", "commit"]
    );

    let mut cmd = cmd_for(MockConn::new("tx-host-2"));
    assert!(transfer(&mut cmd, true).await.is_err());
    assert_eq!(
        executed_sql(&mut cmd),
        vec!["start transaction", "update t set a = 1", "rollback"]
    );
}

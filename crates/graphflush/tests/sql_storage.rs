use asupersync::runtime::RuntimeBuilder;
use std::future::Future;
use std::sync::{Arc, Mutex};

use graphflush::prelude::*;
use graphflush::{QueryError, QueryErrorKind, Row};

#[derive(Debug, Default)]
struct MockState {
    statements: Vec<(String, Vec<Value>)>,
    next_id: i64,
    fail_inserts: usize,
}

/// Records every statement. Queries find nothing; inserts hand out
/// sequential ids after failing `fail_inserts` times with a unique violation.
#[derive(Debug, Clone, Default)]
struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    fn record(&self, sql: &str, params: &[Value]) {
        let mut guard = self.state.lock().expect("lock poisoned");
        guard.statements.push((sql.to_string(), params.to_vec()));
    }

    fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.state.lock().expect("lock poisoned").statements.clone()
    }

    fn sql(&self) -> Vec<String> {
        self.statements().into_iter().map(|(sql, _)| sql).collect()
    }
}

impl Connection for MockConnection {
    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        self.record(sql, params);
        async move { Outcome::Ok(Vec::new()) }
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        self.record(sql, params);
        let affected = params.len().max(1) as u64;
        async move { Outcome::Ok(affected) }
    }

    fn insert(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        self.record(sql, params);
        let result = {
            let mut guard = self.state.lock().expect("lock poisoned");
            if guard.fail_inserts > 0 {
                guard.fail_inserts -= 1;
                Err(Error::Query(QueryError::unique_violation("duplicate key")))
            } else {
                guard.next_id += 1;
                Ok(guard.next_id)
            }
        };
        async move {
            match result {
                Ok(id) => Outcome::Ok(id),
                Err(e) => Outcome::Err(e),
            }
        }
    }
}

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

fn schema() -> Schema {
    Schema::new(vec![
        EntityModel::new("user")
            .field(FieldDef::primary_key("id"))
            .field(FieldDef::scalar("email").unique()),
        EntityModel::new("order")
            .table("orders")
            .field(FieldDef::primary_key("id"))
            .field(FieldDef::scalar("code").unique())
            .field(FieldDef::reference("user", "user").column("user_id")),
    ])
    .expect("valid schema")
}

#[test]
fn sqlite_record_flush_renders_parent_then_child() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let conn = MockConnection::default();
    let db = Database::new(schema(), SqlStorage::new(conn.clone(), Dialect::Sqlite));

    let user = db.record("user", [("email", "a@example.com")]).unwrap();
    let order = db.record("order", [("code", "A-1")]).unwrap();
    order.set("user", &user).unwrap();

    rt.block_on(async {
        unwrap_outcome(db.save(&cx, &order).await);
    });

    assert_eq!(
        conn.statements(),
        vec![
            (
                r#"SELECT "id", "email" FROM "user" WHERE "email" = ?1"#.to_string(),
                vec![Value::from("a@example.com")],
            ),
            (
                r#"INSERT INTO "user" ("email") VALUES (?1)"#.to_string(),
                vec![Value::from("a@example.com")],
            ),
            (
                r#"SELECT "id", "code", "user_id" FROM "orders" WHERE "code" = ?1"#.to_string(),
                vec![Value::from("A-1")],
            ),
            (
                r#"INSERT INTO "orders" ("code", "user_id") VALUES (?1, ?2)"#.to_string(),
                vec![Value::from("A-1"), Value::BigInt(1)],
            ),
        ]
    );
    assert_eq!(user.primary_key(), Some(Value::BigInt(1)));
    assert_eq!(order.primary_key(), Some(Value::BigInt(2)));
}

#[test]
fn lost_insert_race_retries_lookup() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let conn = MockConnection::default();
    conn.state.lock().expect("lock poisoned").fail_inserts = 1;
    let db = Database::new(schema(), SqlStorage::new(conn.clone(), Dialect::Sqlite));

    let user = db.record("user", [("email", "race@example.com")]).unwrap();
    rt.block_on(async {
        unwrap_outcome(db.save(&cx, &user).await);
    });

    let sql = conn.sql();
    assert_eq!(sql.len(), 4);
    assert!(sql[0].starts_with("SELECT"));
    assert!(sql[1].starts_with("INSERT"));
    assert!(sql[2].starts_with("SELECT"));
    assert!(sql[3].starts_with("INSERT"));
    assert!(user.has_primary_key());
}

#[test]
fn postgres_update_and_delete_use_primary_key() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let conn = MockConnection::default();
    let db = Database::new(schema(), SqlStorage::new(conn.clone(), Dialect::Postgres));

    let user = db.record("user", [] as [(&str, Value); 0]).unwrap();
    user.set_primary_key(Value::BigInt(7));

    rt.block_on(async {
        unwrap_outcome(db.update(&cx, &user, [("email", "new@example.com")]).await);
        unwrap_outcome(db.delete(&cx, &user).await);
    });

    assert_eq!(
        conn.statements(),
        vec![
            (
                r#"UPDATE "user" SET "email" = $1 WHERE "id" = $2"#.to_string(),
                vec![Value::from("new@example.com"), Value::BigInt(7)],
            ),
            (
                r#"DELETE FROM "user" WHERE "id" = $1"#.to_string(),
                vec![Value::BigInt(7)],
            ),
        ]
    );
    assert!(user.is_deleted());
}

#[test]
fn postgres_table_flush_renders_bulk_statements() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let conn = MockConnection::default();
    let db = Database::new(schema(), SqlStorage::new(conn.clone(), Dialect::Postgres));
    let table = db.table("user").unwrap();

    table.append([("email", "a@example.com")]).unwrap();
    table.append([("email", "b@example.com")]).unwrap();

    rt.block_on(async {
        unwrap_outcome(flush_table(&cx, db.storage(), table, db.options()).await);
    });

    let select = r#"SELECT "id", "email" FROM "user" WHERE ("email" = $1) OR ("email" = $2)"#;
    assert_eq!(
        conn.sql(),
        vec![
            select.to_string(),
            r#"INSERT INTO "user" ("email") VALUES ($1), ($2)"#.to_string(),
            select.to_string(),
        ]
    );
}

#[test]
fn bulk_insert_keeps_supplied_keys_apart_from_generated_ones() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let conn = MockConnection::default();
    let db = Database::new(schema(), SqlStorage::new(conn.clone(), Dialect::Postgres));
    let table = db.table("user").unwrap();

    table
        .append([("id", Value::BigInt(9)), ("email", Value::from("keyed@example.com"))])
        .unwrap();
    table.append([("email", "generated@example.com")]).unwrap();

    rt.block_on(async {
        unwrap_outcome(flush_table(&cx, db.storage(), table, db.options()).await);
    });

    let statements = conn.statements();
    assert_eq!(statements.len(), 4);
    assert_eq!(
        statements[1],
        (
            r#"INSERT INTO "user" ("id", "email") VALUES ($1, $2)"#.to_string(),
            vec![Value::BigInt(9), Value::from("keyed@example.com")],
        )
    );
    assert_eq!(
        statements[2],
        (
            r#"INSERT INTO "user" ("email") VALUES ($1)"#.to_string(),
            vec![Value::from("generated@example.com")],
        )
    );
}

#[test]
fn storage_errors_propagate() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let conn = MockConnection::default();
    let db = Database::new(schema(), SqlStorage::new(conn.clone(), Dialect::Mysql));

    // Without a unique key there is no lookup, so a unique violation is final.
    let user = db.record("user", [] as [(&str, Value); 0]).unwrap();
    conn.state.lock().expect("lock poisoned").fail_inserts = 1;
    user.set("email", Value::Null).unwrap();

    rt.block_on(async {
        match db.save(&cx, &user).await {
            Outcome::Err(Error::Query(err)) => assert_eq!(err.kind, QueryErrorKind::Constraint),
            other => panic!("expected a query error, got {other:?}"),
        }
    });
    assert_eq!(conn.sql(), vec!["INSERT INTO `user` (`email`) VALUES (?)".to_string()]);
}

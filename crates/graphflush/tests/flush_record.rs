use asupersync::runtime::RuntimeBuilder;
use futures::future::join_all;

use graphflush::prelude::*;
use graphflush::{SchemaErrorKind, Strictness};

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

fn schema() -> Schema {
    Schema::from_json(
        r#"{
            "entities": [
                { "name": "user", "fields": [
                    { "name": "id", "primary_key": true },
                    { "name": "email", "unique": true },
                    { "name": "name", "nullable": true },
                    { "name": "status", "references": "order", "nullable": true }
                ] },
                { "name": "order", "fields": [
                    { "name": "id", "primary_key": true },
                    { "name": "code", "unique": true },
                    { "name": "user", "column": "user_id", "references": "user" }
                ] },
                { "name": "node", "fields": [
                    { "name": "id", "primary_key": true },
                    { "name": "name", "unique": true },
                    { "name": "next", "references": "node" }
                ] }
            ]
        }"#,
    )
    .expect("valid schema")
}

fn model(db: &Database<MemoryStorage>, entity: &str) -> std::sync::Arc<EntityModel> {
    db.schema().model(entity).expect("known entity")
}

#[test]
fn sequential_saves_of_same_unique_key_store_one_row() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let db = Database::new(schema(), MemoryStorage::new());

    let first = db.record("user", [("email", "same@example.com")]).unwrap();
    let second = db
        .record("user", [("email", "same@example.com"), ("name", "Bea")])
        .unwrap();

    rt.block_on(async {
        unwrap_outcome(db.save(&cx, &first).await);
        unwrap_outcome(db.save(&cx, &second).await);
    });

    assert!(first.has_primary_key());
    assert_eq!(first.primary_key(), second.primary_key());
    assert!(!second.is_dirty());
    assert_eq!(second.method(), FlushMethod::Update);

    let rows = db.storage().rows(&model(&db, "user")).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_by_name("name"), Some(&Value::from("Bea")));
}

#[test]
fn concurrent_saves_of_same_unique_key_store_one_row() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let db = Database::new(schema(), MemoryStorage::yielding());

    let records: Vec<Record> = (0..5)
        .map(|_| db.record("user", [("email", "race@example.com")]).unwrap())
        .collect();

    rt.block_on(async {
        let outcomes = join_all(records.iter().map(|r| db.save(&cx, r))).await;
        for outcome in outcomes {
            unwrap_outcome(outcome);
        }
    });

    assert_eq!(db.storage().row_count(&model(&db, "user")).unwrap(), 1);
    let key = records[0].primary_key();
    assert!(key.is_some());
    for record in &records {
        assert_eq!(record.primary_key(), key);
        assert!(!record.is_dirty());
    }
}

#[test]
fn parent_is_written_before_child() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let db = Database::new(schema(), MemoryStorage::new());

    let user = db.record("user", [("email", "parent@example.com")]).unwrap();
    let order = db.record("order", [("code", "P-1")]).unwrap();
    order.set("user", &user).unwrap();
    assert!(!order.is_flushable(Strictness::Strict));

    rt.block_on(async {
        unwrap_outcome(db.save(&cx, &order).await);
    });

    let user_key = user.primary_key().expect("parent has a key");
    let rows = db.storage().rows(&model(&db, "order")).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_by_name("user_id"), Some(&user_key));
    assert!(order.is_flushable(Strictness::Strict));
}

#[test]
fn shared_parent_is_inserted_once() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let db = Database::new(schema(), MemoryStorage::yielding());

    let user = db.record("user", [("email", "shared@example.com")]).unwrap();
    let orders: Vec<Record> = (0..3)
        .map(|i| {
            let order = db.record("order", [("code", format!("S-{i}"))]).unwrap();
            order.set("user", &user).unwrap();
            order
        })
        .collect();

    rt.block_on(async {
        for order in &orders {
            unwrap_outcome(db.save(&cx, order).await);
        }
    });

    assert_eq!(db.storage().row_count(&model(&db, "user")).unwrap(), 1);
    assert_eq!(db.storage().row_count(&model(&db, "order")).unwrap(), 3);
}

#[test]
fn mandatory_cycle_is_rejected() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let db = Database::new(schema(), MemoryStorage::new());

    let a = db.record("node", [("name", "a")]).unwrap();
    let b = db.record("node", [("name", "b")]).unwrap();
    a.set("next", &b).unwrap();
    b.set("next", &a).unwrap();

    rt.block_on(async {
        match db.save(&cx, &a).await {
            Outcome::Err(Error::DependencyCycle(err)) => {
                assert_eq!(err.entity, "node");
                assert!(err.unresolved.contains(&"next".to_string()));
            }
            other => panic!("expected a dependency cycle, got {other:?}"),
        }
    });

    assert!(!a.has_primary_key());
    assert!(!b.has_primary_key());
    assert_eq!(db.storage().stats().total(), 0);
}

#[test]
fn self_reference_is_rejected() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let db = Database::new(schema(), MemoryStorage::new());

    let node = db.record("node", [("name", "loop")]).unwrap();
    node.set("next", &node).unwrap();

    rt.block_on(async {
        assert!(matches!(
            db.save(&cx, &node).await,
            Outcome::Err(Error::DependencyCycle(_))
        ));
    });
}

#[test]
fn update_clears_written_fields_only() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let db = Database::new(schema(), MemoryStorage::new());

    let user = db.record("user", [("email", "dirty@example.com")]).unwrap();
    let order = db.record("order", [("code", "D-1")]).unwrap();

    rt.block_on(async {
        unwrap_outcome(db.save(&cx, &user).await);

        // `status` points at an order without a key, so it cannot be written yet.
        user.mark_for_update();
        user.set("name", "Dee").unwrap();
        user.set("email", "dee@example.com").unwrap();
        user.set("status", &order).unwrap();
        order.set("user", &user).unwrap();
        assert_eq!(user.dirty_fields(), vec!["email", "name", "status"]);

        unwrap_outcome(db.save(&cx, &user).await);
    });

    assert!(!user.is_dirty());
    assert!(!order.is_dirty());
    let rows = db.storage().rows(&model(&db, "user")).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_by_name("name"), Some(&Value::from("Dee")));
    assert_eq!(rows[0].get_by_name("email"), Some(&Value::from("dee@example.com")));
    assert_eq!(rows[0].get_by_name("status"), order.primary_key().as_ref());
}

#[test]
fn update_of_vanished_row_fails() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let db = Database::new(schema(), MemoryStorage::new());
    let user_model = model(&db, "user");

    let user = db.record("user", [("email", "gone@example.com")]).unwrap();

    rt.block_on(async {
        unwrap_outcome(db.save(&cx, &user).await);
        let key = user.primary_key().expect("inserted");

        let removed = unwrap_outcome(
            db.storage()
                .delete(&cx, &user_model, &Filter::eq("id", key))
                .await,
        );
        assert_eq!(removed, 1);

        match db.update(&cx, &user, [("name", "Ghost")]).await {
            Outcome::Err(Error::ConcurrentModification(err)) => {
                assert_eq!(err.entity, "user");
            }
            other => panic!("expected a concurrent modification, got {other:?}"),
        }
    });

    assert!(user.is_dirty());
    assert_eq!(db.storage().row_count(&user_model).unwrap(), 0);
}

#[test]
fn parent_updated_by_unique_key_adopts_stored_key() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let db = Database::new(schema(), MemoryStorage::new());
    let user_model = model(&db, "user");

    let user = db.record("user", [("email", "pat@example.com")]).unwrap();
    let order = db.record("order", [("code", "P-7")]).unwrap();

    rt.block_on(async {
        let values = vec![("email".to_string(), Value::from("pat@example.com"))];
        let key = unwrap_outcome(db.storage().insert(&cx, &user_model, &values).await);

        user.mark_for_update();
        user.set("name", "Pat").unwrap();
        order.set("user", &user).unwrap();
        unwrap_outcome(db.save(&cx, &order).await);

        assert_eq!(user.primary_key(), Some(key));
    });

    assert!(!user.is_dirty());
    assert!(!order.is_dirty());
    let users = db.storage().rows(&user_model).unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].get_by_name("name"), Some(&Value::from("Pat")));
    let orders = db.storage().rows(&model(&db, "order")).unwrap();
    assert_eq!(orders[0].get_by_name("user_id"), user.primary_key().as_ref());
}

#[test]
fn update_and_delete_through_database() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let db = Database::new(schema(), MemoryStorage::new());
    let user_model = model(&db, "user");

    let user = db.record("user", [("email", "life@example.com")]).unwrap();

    rt.block_on(async {
        unwrap_outcome(db.save(&cx, &user).await);
        unwrap_outcome(db.update(&cx, &user, [("name", "Liv")]).await);

        let rows = db.storage().rows(&user_model).unwrap();
        assert_eq!(rows[0].get_by_name("name"), Some(&Value::from("Liv")));

        unwrap_outcome(db.delete(&cx, &user).await);
    });

    assert!(user.is_deleted());
    assert!(!user.is_dirty());
    assert_eq!(db.storage().row_count(&user_model).unwrap(), 0);
    assert_eq!(db.storage().stats().deletes, 1);
}

#[test]
fn delete_without_identifying_key_fails() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let db = Database::new(schema(), MemoryStorage::new());

    let user = db.record("user", [("name", "Nobody")]).unwrap();

    rt.block_on(async {
        match db.delete(&cx, &user).await {
            Outcome::Err(Error::Schema(err)) => {
                assert_eq!(err.kind, SchemaErrorKind::NoIdentifyingKey);
            }
            other => panic!("expected a schema error, got {other:?}"),
        }
    });
    assert!(!user.is_deleted());
}

#[test]
fn invalid_assignments_are_rejected() {
    let db = Database::new(schema(), MemoryStorage::new());
    let user = db.record("user", [("email", "v@example.com")]).unwrap();
    let node = db.record("node", [("name", "n")]).unwrap();

    assert!(matches!(
        user.set("nickname", "v"),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        user.set("status", &node),
        Err(Error::Validation(_))
    ));
    assert!(matches!(user.set("email", Value::Default), Err(Error::Validation(_))));
    assert_eq!(user.dirty_fields(), vec!["email"]);
}

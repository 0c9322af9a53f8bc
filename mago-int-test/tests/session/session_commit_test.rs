use mago::common::Value;
use mago::doc;
use mago::errors::ErrorKind;
use mago::session::EntityState;
use mago_int_test::test_util::{cleanup, create_faulty_test_context, create_test_context, run_test};

#[test]
fn test_commit_order_new_dirty_deleted() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let orders = db.collection("orders")?;
            let session = db.session()?;

            let user = users.create(doc! { name: "a" })?;
            let gone = orders.create(doc! { total: 1 })?;
            session.add(&user)?;
            session.add(&gone)?;
            session.commit()?;

            let order = orders.create(doc! { total: 2 })?;
            session.add(&order)?;
            user.put("name", "b")?;
            session.delete(&gone)?;
            session.commit()?;

            assert_eq!(users.find_by_id(&user.id().unwrap())?.unwrap().get("name"), Some(Value::from("b")));
            assert!(orders.find_by_id(&gone.id().unwrap())?.is_none());
            assert!(orders.find_by_id(&order.id().unwrap())?.is_some());
            assert_eq!(session.len(EntityState::Clean), 2);
            assert_eq!(session.len(EntityState::New), 0);
            assert_eq!(session.len(EntityState::Dirty), 0);
            assert_eq!(session.len(EntityState::Deleted), 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_failed_commit_leaves_nothing_behind() {
    run_test(
        create_faulty_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let session = db.session()?;

            let first = users.create(doc! { name: "a" })?;
            let second = users.create(doc! { name: "b" })?;
            session.add(&first)?;
            session.add(&second)?;

            // second insert fails
            ctx.faults().fail_write(2);
            let err = session.commit().unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::PersistenceFailure);

            assert_eq!(users.size()?, 0);
            assert!(session.is_empty());
            assert_eq!(first.state(), None);
            assert!(first.id().is_none());
            assert!(second.id().is_none());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_failed_commit_restores_updated_rows() {
    run_test(
        create_faulty_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let session = db.session()?;

            let first = users.create(doc! { name: "a" })?;
            let second = users.create(doc! { name: "b" })?;
            let third = users.create(doc! { name: "c" })?;
            session.add_all(vec![first.clone(), second.clone(), third.clone()])?;
            session.commit()?;

            first.put("name", "a2")?;
            second.put("name", "b2")?;
            session.delete(&third)?;

            // first sync succeeds, second fails
            ctx.faults().fail_write(2);
            assert!(session.commit().is_err());

            let stored = users.find_by_id(&first.id().unwrap())?.unwrap();
            assert_eq!(stored.get("name"), Some(Value::from("a")));
            assert!(users.find_by_id(&third.id().unwrap())?.is_some());

            assert_eq!(first.get("name"), Some(Value::from("a")));
            assert_eq!(second.get("name"), Some(Value::from("b")));
            assert_eq!(first.state(), Some(EntityState::Clean));
            assert_eq!(third.state(), Some(EntityState::Clean));

            // the session is usable again
            first.put("name", "a3")?;
            session.commit()?;
            let stored = users.find_by_id(&first.id().unwrap())?.unwrap();
            assert_eq!(stored.get("name"), Some(Value::from("a3")));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_failed_delete_is_compensated() {
    run_test(
        create_faulty_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let session = db.session()?;

            let first = users.create(doc! { name: "a" })?;
            let second = users.create(doc! { name: "b" })?;
            session.add_all(vec![first.clone(), second.clone()])?;
            session.commit()?;

            session.delete(&first)?;
            session.delete(&second)?;
            ctx.faults().fail_write(2);
            assert!(session.commit().is_err());

            assert_eq!(users.size()?, 2);
            assert_eq!(first.state(), Some(EntityState::Clean));
            assert_eq!(second.state(), Some(EntityState::Clean));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_commit_durable_writes_through_transaction() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let orders = db.collection("orders")?;
            let session = db.session()?;

            let user = users.create(doc! { name: "a" })?;
            session.add(&user)?;
            session.commit()?;

            user.put("name", "b")?;
            let order = orders.create(doc! { total: 3 })?;
            session.add(&order)?;
            session.commit_durable()?;

            assert_eq!(user.state(), Some(EntityState::Clean));
            assert_eq!(order.state(), Some(EntityState::Clean));
            assert!(user.in_flight().is_empty());
            assert!(order.in_flight().is_empty());
            assert_eq!(users.find_by_id(&user.id().unwrap())?.unwrap().get("name"), Some(Value::from("b")));
            assert_eq!(orders.size()?, 1);
            assert_eq!(db.collection("transaction")?.size()?, 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_commit_durable_failure_rolls_back() {
    run_test(
        create_faulty_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let session = db.session()?;

            let user = users.create(doc! { name: "a" })?;
            session.add(&user)?;
            session.commit()?;
            user.put("name", "b")?;

            // log record is written, the entity write fails
            ctx.faults().fail_write(2);
            let err = session.commit_durable().unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::TransactionFailed);
            assert_eq!(err.root_cause().kind(), &ErrorKind::PersistenceFailure);

            assert_eq!(user.get("name"), Some(Value::from("a")));
            assert_eq!(user.state(), Some(EntityState::Clean));
            let stored = users.find_by_id(&user.id().unwrap())?.unwrap();
            assert_eq!(stored.get("name"), Some(Value::from("a")));
            assert!(stored.in_flight().is_empty());
            assert_eq!(db.collection("transaction")?.size()?, 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_commit_durable_keeps_ids_when_recovery_is_required() {
    run_test(
        create_faulty_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let session = db.session()?;

            let fresh = users.create(doc! { name: "c" })?;
            session.add(&fresh)?;
            let id = fresh.id().unwrap();

            // record and entity are written, the commit record is not
            ctx.faults().crash_at_write(3);
            let err = session.commit_durable().unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::RecoveryRequired);
            ctx.faults().heal();

            assert_eq!(fresh.id(), Some(id));
            assert_eq!(fresh.state(), None);

            // adding it again refers to the same row
            session.add(&fresh)?;
            session.commit()?;

            let restarted = ctx.restart()?;
            let users = restarted.collection("users")?;
            assert_eq!(users.size()?, 1);
            let stored = users.find_by_id(&id)?.unwrap();
            assert_eq!(stored.get("name"), Some(Value::from("c")));
            assert!(stored.in_flight().is_empty());
            Ok(())
        },
        cleanup,
    )
}

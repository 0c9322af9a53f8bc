use mago::common::Value;
use mago::doc;
use mago::errors::ErrorKind;
use mago::transaction::LifecycleState;
use mago_int_test::test_util::{cleanup, create_faulty_test_context, create_test_context, random_person, run_test};

#[test]
fn test_commit_across_collections() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let orders = db.collection("orders")?;

            let account = users.create(doc! { name: "a", balance: 10 })?;
            account.save()?;
            let stale = orders.create(doc! { total: 0 })?;
            stale.save()?;

            account.put("balance", 7)?;
            let order = orders.create(doc! { total: 3 })?;

            let tx = db.begin_transaction()?;
            tx.insert(&order)?;
            tx.update(&account)?;
            tx.remove(&stale)?;
            assert_eq!(tx.state(), LifecycleState::Initial);
            tx.commit()?;

            assert_eq!(tx.state(), LifecycleState::Finished);
            assert!(tx.is_closed());
            assert_eq!(users.find_by_id(&account.id().unwrap())?.unwrap().get("balance"), Some(Value::I64(7)));
            assert!(orders.find_by_id(&order.id().unwrap())?.is_some());
            assert!(orders.find_by_id(&stale.id().unwrap())?.is_none());
            assert_eq!(db.collection("transaction")?.size()?, 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_insert_all_assigns_ids() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let entities = vec![users.create(random_person())?, users.create(random_person())?];

            let tx = db.begin_transaction()?;
            tx.insert_all(entities.iter())?;
            assert!(entities.iter().all(|e| e.id().is_some()));
            tx.commit()?;

            assert_eq!(users.size()?, 2);
            for entity in entities.iter() {
                let stored = users.find_by_id(&entity.id().unwrap())?.unwrap();
                assert!(stored.in_flight().is_empty());
            }
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_record_is_written_before_effects() {
    run_test(
        create_faulty_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let user = users.create(doc! { name: "a" })?;

            let tx = db.begin_transaction()?;
            tx.insert(&user)?;

            // the very first write is the log record
            ctx.faults().fail_write(1);
            let err = tx.commit().unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::TransactionFailed);
            assert_eq!(users.size()?, 0);
            assert_eq!(db.collection("transaction")?.size()?, 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_failed_commit_rolls_back() {
    run_test(
        create_faulty_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let orders = db.collection("orders")?;

            let account = users.create(doc! { balance: 10 })?;
            account.save()?;
            account.put("balance", 5)?;
            let order = orders.create(doc! { total: 5 })?;

            let tx = db.begin_transaction()?;
            tx.insert(&order)?;
            tx.update(&account)?;

            // record, order insert, then the account write fails
            ctx.faults().fail_write(3);
            let err = tx.commit().unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::TransactionFailed);
            assert_eq!(err.cause().unwrap().kind(), &ErrorKind::PersistenceFailure);

            assert_eq!(orders.size()?, 0);
            let stored = users.find_by_id(&account.id().unwrap())?.unwrap();
            assert_eq!(stored.get("balance"), Some(Value::I64(10)));
            assert!(stored.in_flight().is_empty());
            assert!(order.in_flight().is_empty());
            assert_eq!(db.collection("transaction")?.size()?, 0);
            assert!(tx.is_closed());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_failed_rollback_requires_recovery() {
    run_test(
        create_faulty_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let user = users.create(doc! { name: "a" })?;

            let tx = db.begin_transaction()?;
            tx.insert(&user)?;

            // the process "dies" right after the entity write
            ctx.faults().crash_at_write(3);
            let err = tx.commit().unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::RecoveryRequired);
            assert!(err.message().contains(&tx.id().to_string()));
            assert!(!tx.is_closed());

            ctx.faults().heal();
            let log = db.collection("transaction")?;
            assert_eq!(log.size()?, 1);

            let report = db.recover()?;
            assert_eq!(report.recovered, vec![tx.id()]);
            assert_eq!(log.size()?, 0);
            let stored = users.find_by_id(&user.id().unwrap())?.unwrap();
            assert!(stored.in_flight().is_empty());
            assert_eq!(stored.get("name"), Some(Value::from("a")));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_settled_steps_have_no_effect() {
    run_test(
        create_faulty_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let user = users.create(doc! { name: "a" })?;

            let tx = db.begin_transaction()?;
            tx.insert(&user)?;
            tx.to_pending()?;
            let pending = users.find_by_id(&user.id().unwrap())?.unwrap();

            // counting only, nothing fails
            let faults = ctx.faults();
            faults.fail_write(usize::MAX);

            // the entity is already written, only the log record is rewritten
            tx.to_pending()?;
            assert_eq!(faults.writes(), 1);
            let again = users.find_by_id(&user.id().unwrap())?.unwrap();
            assert_eq!(again.attributes(), pending.attributes());
            assert_eq!(again.in_flight(), pending.in_flight());

            tx.to_commit()?;
            assert_eq!(faults.writes(), 3);
            let settled = users.find_by_id(&user.id().unwrap())?.unwrap();

            tx.to_commit()?;
            assert_eq!(faults.writes(), 4);
            let again = users.find_by_id(&user.id().unwrap())?.unwrap();
            assert_eq!(again.attributes(), settled.attributes());
            assert!(again.in_flight().is_empty());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_terminal_transaction_is_not_reusable() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let tx = db.begin_transaction()?;
            tx.insert(&users.create(doc! { name: "a" })?)?;
            tx.commit()?;

            let err = tx.commit().unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
            assert!(tx.rollback().is_err());
            assert!(tx.to_pending().is_err());
            Ok(())
        },
        cleanup,
    )
}

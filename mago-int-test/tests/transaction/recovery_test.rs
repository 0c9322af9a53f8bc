use mago::collection::EntityCollection;
use mago::common::Value;
use mago::doc;
use mago::errors::{ErrorKind, MagoResult};
use mago::filter::all;
use mago::session::EntityState;
use mago::transaction::RecoveryScanner;
use mago_int_test::test_util::{cleanup, create_faulty_test_context, create_test_context, run_test};

fn unsettled(collection: &EntityCollection) -> MagoResult<usize> {
    Ok(collection.find(all())?.filter(|e| !e.in_flight().is_empty()).count())
}

#[test]
fn test_crash_after_pending_is_recovered_on_restart() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let orders = db.collection("orders")?;

            let user = users.create(doc! { name: "a" })?;
            let order = orders.create(doc! { total: 9 })?;
            let tx = db.begin_transaction()?;
            tx.insert(&user)?;
            tx.insert(&order)?;
            tx.to_pending()?;
            // process dies here

            let restarted = ctx.restart()?;
            let users = restarted.collection("users")?;
            let orders = restarted.collection("orders")?;

            assert_eq!(restarted.collection("transaction")?.size()?, 0);
            let stored_user = users.find_by_id(&user.id().unwrap())?.unwrap();
            let stored_order = orders.find_by_id(&order.id().unwrap())?.unwrap();
            assert_eq!(stored_user.get("name"), Some(Value::from("a")));
            assert_eq!(stored_order.get("total"), Some(Value::I64(9)));
            assert!(stored_user.in_flight().is_empty());
            assert!(stored_order.in_flight().is_empty());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_recovered_state_matches_uninterrupted_commit() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;

            let seed = users.create(doc! { name: "seed", balance: 1 })?;
            seed.save()?;
            let gone = users.create(doc! { name: "gone" })?;
            gone.save()?;

            seed.put("balance", 2)?;
            let fresh = users.create(doc! { name: "fresh" })?;

            let tx = db.begin_transaction()?;
            tx.insert(&fresh)?;
            tx.update(&seed)?;
            tx.remove(&gone)?;
            tx.to_pending()?;

            let restarted = ctx.restart()?;
            let users = restarted.collection("users")?;
            let mut names: Vec<String> = users
                .find(all())?
                .map(|e| e.get("name").and_then(|v| v.as_string().cloned()).unwrap_or_default())
                .collect();
            names.sort();
            assert_eq!(names, vec!["fresh".to_string(), "seed".to_string()]);

            let stored_seed = users.find_by_id(&seed.id().unwrap())?.unwrap();
            assert_eq!(stored_seed.attributes(), doc! { name: "seed", balance: 2 });
            assert!(stored_seed.in_flight().is_empty());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_recover_from_initial_record() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let user = users.create(doc! { name: "a" })?;

            let tx = db.begin_transaction()?;
            tx.insert(&user)?;
            tx.save()?;
            assert_eq!(users.size()?, 0);

            let restarted = ctx.restart()?;
            assert_eq!(restarted.collection("users")?.size()?, 1);
            assert_eq!(restarted.collection("transaction")?.size()?, 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_recover_from_commit_record() {
    run_test(
        create_faulty_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let first = users.create(doc! { name: "a" })?;
            let second = users.create(doc! { name: "b" })?;

            let tx = db.begin_transaction()?;
            tx.insert_all(vec![&first, &second])?;
            tx.to_pending()?;

            // commit record is written, the first marker removal is, the second is not
            ctx.faults().crash_at_write(3);
            assert!(tx.to_commit().is_err());
            ctx.faults().heal();

            assert_eq!(unsettled(&users)?, 1);

            let restarted = ctx.restart()?;
            let users = restarted.collection("users")?;
            assert_eq!(users.size()?, 2);
            assert_eq!(unsettled(&users)?, 0);
            assert_eq!(restarted.collection("transaction")?.size()?, 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_half_undone_rollback_is_recovered_forward() {
    run_test(
        create_faulty_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let first = users.create(doc! { name: "a" })?;
            let second = users.create(doc! { name: "b" })?;

            let tx = db.begin_transaction()?;
            tx.insert(&first)?;
            tx.insert(&second)?;

            // 1 record, 2-3 inserts, 4 commit record, 5-6 marker removals,
            // 7 record reopened, 8-9 restores in reverse order
            ctx.faults().fail_writes(&[6, 8]);
            let err = tx.commit().unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::RecoveryRequired);
            ctx.faults().heal();

            // first was undone, second was not
            assert!(users.find_by_id(&first.id().unwrap())?.is_none());
            assert!(users.find_by_id(&second.id().unwrap())?.is_some());
            let log = db.collection("transaction")?;
            let record = log.find_by_id(&tx.id())?.unwrap();
            assert_eq!(record.get("state"), Some(Value::from("pending")));

            let restarted = ctx.restart()?;
            let users = restarted.collection("users")?;
            assert_eq!(users.size()?, 2);
            assert_eq!(unsettled(&users)?, 0);
            assert_eq!(restarted.collection("transaction")?.size()?, 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_scanner_discards_finished_and_reports_bad_records() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.restart_without_recovery()?;
            let registry = db.registry();
            let log = db.collection("transaction")?;
            let users = db.collection("users")?;

            log.create(doc! { state: "finished" })?.save()?;

            let tx = db.begin_transaction()?;
            tx.insert(&users.create(doc! { name: "a" })?)?;
            tx.save()?;

            let broken = log.create(doc! { state: "pending", new: "not a grouping" })?;
            broken.save()?;

            let report = RecoveryScanner::new(log.clone(), registry.clone()).run()?;
            assert_eq!(report.discarded, 1);
            assert_eq!(report.recovered, vec![tx.id()]);
            assert_eq!(report.failed.len(), 1);
            assert_eq!(report.failed[0].0, broken.id().unwrap().to_string());
            assert_eq!(users.size()?, 1);
            assert_eq!(log.size()?, 1);

            // the bad record stays for inspection, a second run is stable
            let report = RecoveryScanner::new(log, registry).run()?;
            assert_eq!(report.discarded, 0);
            assert!(report.recovered.is_empty());
            assert_eq!(report.failed.len(), 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_durable_session_commit_survives_crash() {
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
            let fresh = users.create(doc! { name: "c" })?;
            session.add(&fresh)?;

            // record, both entity writes, then the process dies
            ctx.faults().crash_at_write(4);
            assert!(session.commit_durable().is_err());
            assert_eq!(user.state(), Some(EntityState::Clean));
            ctx.faults().heal();

            let restarted = ctx.restart()?;
            let users = restarted.collection("users")?;
            assert_eq!(users.size()?, 2);
            let stored = users.find_by_id(&user.id().unwrap())?.unwrap();
            assert_eq!(stored.get("name"), Some(Value::from("b")));
            assert!(stored.in_flight().is_empty());
            Ok(())
        },
        cleanup,
    )
}

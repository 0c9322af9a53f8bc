use mago::common::Value;
use mago::doc;
use mago::errors::ErrorKind;
use mago::filter::all;
use mago::session::EntityState;
use mago_int_test::test_util::{cleanup, create_test_context, random_person, run_test};

#[test]
fn test_fresh_entity_is_new_without_backup() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let session = db.session()?;

            let user = users.create(random_person())?;
            session.add(&user)?;

            assert!(user.id().is_some());
            assert_eq!(user.state(), Some(EntityState::New));
            assert_eq!(session.state_of(&user), Some(EntityState::New));
            assert!(session.backup_of(&user).is_none());
            assert_eq!(user.session_id().as_deref(), Some(session.id()));
            assert_eq!(users.size()?, 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_dirty_tracks_difference_only() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let session = db.session()?;

            let user = users.create(doc! { name: "Alice", balance: 10 })?;
            session.add(&user)?;
            session.commit()?;
            assert_eq!(user.state(), Some(EntityState::Clean));

            user.put("balance", 20)?;
            assert_eq!(user.state(), Some(EntityState::Dirty));
            let backup = session.backup_of(&user).unwrap();
            assert_eq!(backup.len(), 1);
            assert_eq!(backup.get("balance"), Some(&Some(Value::I64(10))));

            user.put("balance", 30)?;
            let backup = session.backup_of(&user).unwrap();
            assert_eq!(backup.get("balance"), Some(&Some(Value::I64(10))));

            user.put("balance", 10)?;
            assert_eq!(user.state(), Some(EntityState::Clean));
            assert!(session.backup_of(&user).is_none());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_add_all_then_commit() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let session = db.session()?;

            let entities = vec![
                users.create(random_person())?,
                users.create(random_person())?,
                users.create(random_person())?,
            ];
            assert_eq!(session.add_all(entities.clone())?, 3);
            assert_eq!(session.len(EntityState::New), 3);

            session.commit()?;
            assert_eq!(session.len(EntityState::Clean), 3);
            assert_eq!(users.size()?, 3);
            for entity in entities.iter() {
                assert_eq!(entity.state(), Some(EntityState::Clean));
                let stored = users.find_by_id(&entity.id().unwrap())?.unwrap();
                assert_eq!(stored.attributes(), entity.attributes());
            }
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_rollback_restores_dirty_entity() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let session = db.session()?;

            let entities = vec![
                users.create(doc! { name: "a" })?,
                users.create(doc! { name: "b" })?,
                users.create(doc! { name: "c" })?,
            ];
            session.add_all(entities.clone())?;
            session.commit()?;

            let target = &entities[1];
            target.put("name", "changed")?;
            target.put("extra", true)?;
            target.remove("name")?;
            assert_eq!(target.state(), Some(EntityState::Dirty));

            session.rollback()?;
            assert_eq!(target.state(), Some(EntityState::Clean));
            assert_eq!(target.get("name"), Some(Value::from("b")));
            assert_eq!(target.get("extra"), None);
            assert!(session.backup_of(target).is_none());
            assert_eq!(session.len(EntityState::Dirty), 0);
            assert!(users.find_by_id(&target.id().unwrap())?.is_some());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_rollback_undoes_delete_and_forgets_new() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let session = db.session()?;

            let kept = users.create(doc! { name: "kept" })?;
            session.add(&kept)?;
            session.commit()?;

            session.delete(&kept)?;
            assert_eq!(kept.state(), Some(EntityState::Deleted));

            let fresh = users.create(doc! { name: "fresh" })?;
            session.add(&fresh)?;

            session.rollback()?;
            assert_eq!(kept.state(), Some(EntityState::Clean));
            assert!(!session.contains(&fresh));
            assert_eq!(fresh.state(), None);
            assert!(fresh.id().is_none());
            assert_eq!(session.len(EntityState::New), 0);
            assert_eq!(session.len(EntityState::Deleted), 0);

            session.commit()?;
            assert_eq!(users.size()?, 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_rollback_of_deleted_dirty_entity_restores_values() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let session = db.session()?;

            let user = users.create(doc! { name: "a" })?;
            session.add(&user)?;
            session.commit()?;

            user.put("name", "b")?;
            session.delete(&user)?;
            session.rollback()?;

            assert_eq!(user.state(), Some(EntityState::Clean));
            assert_eq!(user.get("name"), Some(Value::from("a")));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_delete_then_add_resurrects_as_new() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let session = db.session()?;

            let user = users.create(doc! { name: "a" })?;
            session.add(&user)?;
            session.commit()?;

            session.delete(&user)?;
            session.add(&user)?;
            assert_eq!(user.state(), Some(EntityState::New));

            session.commit()?;
            assert_eq!(user.state(), Some(EntityState::Clean));
            assert_eq!(users.size()?, 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_delete_commit_removes_from_store() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let session = db.session()?;

            let user = users.create(doc! { name: "a" })?;
            session.add(&user)?;
            session.commit()?;

            session.delete(&user)?;
            session.commit()?;
            assert_eq!(users.size()?, 0);
            assert!(!session.contains(&user));
            assert_eq!(user.state(), None);
            assert!(user.session_id().is_none());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_delete_of_new_is_expunge() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let session = db.session()?;

            let user = users.create(doc! { name: "a" })?;
            session.add(&user)?;
            session.delete(&user)?;

            assert!(session.is_empty());
            assert_eq!(user.state(), None);
            session.commit()?;
            assert_eq!(users.size()?, 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_untracked_entity_errors() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let session = db.session()?;
            let stranger = users.create(doc! { name: "x" })?;

            let err = session.delete(&stranger).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::NotTracked);
            let err = session.expunge(&stranger).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::NotTracked);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_mutating_new_or_deleted_is_not_tracked() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let session = db.session()?;

            let fresh = users.create(doc! { name: "a" })?;
            session.add(&fresh)?;
            fresh.put("name", "b")?;
            assert_eq!(fresh.state(), Some(EntityState::New));
            assert!(session.backup_of(&fresh).is_none());

            let stored = users.create(doc! { name: "c" })?;
            stored.save()?;
            session.add(&stored)?;
            session.delete(&stored)?;
            stored.put("name", "d")?;
            assert_eq!(stored.state(), Some(EntityState::Deleted));
            assert!(session.backup_of(&stored).is_none());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_empty_commit_is_noop() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let session = db.session()?;

            session.commit()?;
            let user = users.create(doc! { name: "a" })?;
            session.add(&user)?;
            session.commit()?;
            session.commit()?;
            session.commit_durable()?;

            assert_eq!(users.size()?, 1);
            assert_eq!(user.state(), Some(EntityState::Clean));
            assert_eq!(db.collection("transaction")?.size()?, 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_cursor_entities_are_clean() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            for _ in 0..4 {
                users.create(random_person())?.save()?;
            }

            let session = db.session()?;
            let added = session.add_all(users.find(all())?)?;
            assert_eq!(added, 4);
            assert_eq!(session.len(EntityState::Clean), 4);
            session.commit()?;
            assert_eq!(users.size()?, 4);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_close_releases_entities() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let session = db.session()?;

            let user = users.create(doc! { name: "a" })?;
            session.add(&user)?;
            session.commit()?;
            user.put("name", "b")?;

            session.close()?;
            assert!(!session.is_active());
            assert_eq!(user.state(), None);
            assert!(user.session_id().is_none());

            let err = session.commit().unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
            assert!(session.add(&user).is_err());

            // a released entity can join another session
            let other = db.session()?;
            other.add(&user)?;
            assert_eq!(user.state(), Some(EntityState::Clean));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_entity_owned_by_another_session() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let users = db.collection("users")?;
            let first = db.session()?;
            let second = db.session()?;

            let user = users.create(doc! { name: "a" })?;
            first.add(&user)?;
            let err = second.add(&user).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::InvalidOperation);

            first.expunge(&user)?;
            second.add(&user)?;
            assert_eq!(user.session_id().as_deref(), Some(second.id()));
            Ok(())
        },
        cleanup,
    )
}

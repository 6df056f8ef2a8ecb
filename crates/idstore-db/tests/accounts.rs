mod common;

use chrono::Duration;
use common::{bootstrap, create_user, password, store};
use idstore_db::{ErrorKind, Role};
use idstore_types::api::{AdminUpdate, AuditSearchParameters, UserUpdate};
use idstore_types::models::{Ban, LoginMetadata};
use idstore_types::permissions::{AdminPermission, AdminPermissionSet};
use uuid::Uuid;

fn audit_kinds(tx: &idstore_db::DbTransaction<'_>) -> Vec<String> {
    tx.audit()
        .events_after(&AuditSearchParameters::default(), None, 1000)
        .unwrap()
        .into_iter()
        .map(|e| e.kind)
        .collect()
}

#[test]
fn initial_admin_gets_every_permission_and_owns_its_event() {
    let store = store();
    let mut conn = store.db.connect(Role::ReadWrite).unwrap();
    let mut tx = conn.open_transaction().unwrap();

    let admin = bootstrap(&mut tx);
    assert_eq!(admin.permissions, AdminPermission::all());
    assert_eq!(admin.emails, vec!["root@example.com".to_string()]);
    assert_eq!(admin.time_created, common::start_time());
    assert_eq!(tx.admins().get_require(admin.id).unwrap(), admin);
    assert_eq!(tx.admins().get_for_name("root").unwrap(), Some(admin.clone()));
    assert_eq!(tx.admins().get_for_email("ROOT@example.com").unwrap(), Some(admin.clone()));

    let events = tx
        .audit()
        .events_after(&AuditSearchParameters::default(), None, 10)
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, "ADMIN_CREATED");
    assert_eq!(events[0].owner, admin.id);
    tx.commit().unwrap();

    let err = tx
        .admins()
        .create_initial(Uuid::new_v4(), "second", "Second", "second@example.com", &password())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AdminNotInitial);
}

#[test]
fn created_records_equal_later_gets() {
    let store = store();
    let mut conn = store.db.connect(Role::ReadWrite).unwrap();
    let mut tx = conn.open_transaction().unwrap();
    let root = bootstrap(&mut tx);

    let mut permissions = AdminPermissionSet::new();
    permissions.insert(AdminPermission::UserRead);
    let admin = tx
        .admins()
        .create(Uuid::new_v4(), "ops", "Ops Person", "ops@example.com", &password(), permissions.clone())
        .unwrap();
    let user = create_user(&tx, "alice", "alice@example.com");
    tx.commit().unwrap();

    assert_eq!(tx.admins().get_require(admin.id).unwrap(), admin);
    assert_eq!(admin.permissions, permissions);
    assert_eq!(tx.users().get_require(user.id).unwrap(), user);
    assert_eq!(tx.users().get_for_name_require("alice").unwrap(), user);
    assert_eq!(tx.users().get_for_email_require("Alice@Example.com").unwrap(), user);

    let events = tx
        .audit()
        .events_after(&AuditSearchParameters::default(), None, 10)
        .unwrap();
    assert_eq!(events.len(), 3);
    assert!(events[1..].iter().all(|e| e.owner == root.id));
}

#[test]
fn missing_accounts_are_none_or_nonexistent() {
    let store = store();
    let mut conn = store.db.connect(Role::ReadWrite).unwrap();
    let tx = conn.open_transaction().unwrap();

    assert_eq!(tx.users().get(Uuid::new_v4()).unwrap(), None);
    assert_eq!(
        tx.users().get_require(Uuid::new_v4()).unwrap_err().kind(),
        ErrorKind::UserNonexistent
    );
    assert_eq!(
        tx.admins().get_for_name_require("nobody").unwrap_err().kind(),
        ErrorKind::AdminNonexistent
    );
    assert_eq!(
        tx.admins().get_for_email_require("nobody@example.com").unwrap_err().kind(),
        ErrorKind::AdminNonexistent
    );
}

#[test]
fn duplicates_fail_with_specific_kinds() {
    let store = store();
    let mut conn = store.db.connect(Role::ReadWrite).unwrap();
    let mut tx = conn.open_transaction().unwrap();
    let root = bootstrap(&mut tx);
    let alice = create_user(&tx, "alice", "alice@example.com");
    tx.commit().unwrap();

    let users = tx.users();
    let err = users
        .create(alice.id, "other", "Other", "other@example.com", &password())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UserDuplicateId);

    // Ids are shared across account kinds
    let err = users
        .create(root.id, "other", "Other", "other@example.com", &password())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UserDuplicateId);

    let err = users
        .create(Uuid::new_v4(), "alice", "Other", "other@example.com", &password())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UserDuplicateIdName);

    let err = users
        .create(Uuid::new_v4(), "other", "Other", "ALICE@example.com", &password())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmailDuplicate);

    let admins = tx.admins();
    let err = admins
        .create(Uuid::new_v4(), "root", "Other", "x@example.com", &password(), AdminPermissionSet::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AdminDuplicateIdName);

    let err = admins
        .create(Uuid::new_v4(), "root2", "Other", "alice@example.com", &password(), AdminPermissionSet::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmailDuplicate);

    let err = admins
        .create(alice.id, "root2", "Other", "x@example.com", &password(), AdminPermissionSet::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AdminDuplicateId);
}

#[test]
fn email_add_then_remove_down_to_one() {
    let store = store();
    let mut conn = store.db.connect(Role::ReadWrite).unwrap();
    let mut tx = conn.open_transaction().unwrap();
    bootstrap(&mut tx);
    let a = create_user(&tx, "a", "a@example.com");
    tx.commit().unwrap();

    tx.users().email_add(a.id, "b@example.com").unwrap();
    tx.commit().unwrap();

    tx.users().email_remove(a.id, "a@example.com").unwrap();
    tx.commit().unwrap();

    let err = tx.users().email_remove(a.id, "b@example.com").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmailOneRequired);
    assert!(err.remediation().is_some());

    let a = tx.users().get_require(a.id).unwrap();
    assert_eq!(a.emails, vec!["b@example.com".to_string()]);
}

#[test]
fn email_remove_of_unowned_address_is_nonexistent() {
    let store = store();
    let mut conn = store.db.connect(Role::ReadWrite).unwrap();
    let mut tx = conn.open_transaction().unwrap();
    let root = bootstrap(&mut tx);
    let a = create_user(&tx, "a", "a@example.com");
    tx.users().email_add(a.id, "a2@example.com").unwrap();
    tx.commit().unwrap();

    let err = tx.users().email_remove(a.id, "root@example.com").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmailNonexistent);

    let err = tx.admins().email_remove(root.id, "root@example.com").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmailOneRequired);

    let err = tx.admins().email_add(Uuid::new_v4(), "ghost@example.com").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AdminNonexistent);

    let err = tx.users().email_add(a.id, "ROOT@example.com").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmailDuplicate);
}

#[test]
fn updates_audit_each_changed_field() {
    let store = store();
    let mut conn = store.db.connect(Role::ReadWrite).unwrap();
    let mut tx = conn.open_transaction().unwrap();
    let root = bootstrap(&mut tx);
    let user = create_user(&tx, "alice", "alice@example.com");
    let bob = create_user(&tx, "bob", "bob@example.com");
    tx.commit().unwrap();
    store.clock.advance(Duration::seconds(5));

    let mut update = UserUpdate::new(user.id);
    update.id_name = Some("alice2".into());
    update.real_name = Some(user.real_name.clone());
    let updated = tx.users().update(&update).unwrap();
    assert_eq!(updated.id_name, "alice2");
    assert_eq!(updated.time_updated, common::start_time() + Duration::seconds(5));
    assert_eq!(updated.time_created, user.time_created);

    let mut update = AdminUpdate::new(root.id);
    update.real_name = Some("Renamed".into());
    update.permissions = Some(AdminPermissionSet::new());
    let updated = tx.admins().update(&update).unwrap();
    assert!(updated.permissions.is_empty());
    tx.commit().unwrap();

    let kinds = audit_kinds(&tx);
    assert_eq!(
        &kinds[3..],
        &[
            "USER_CHANGED_ID_NAME",
            "ADMIN_CHANGED_REAL_NAME",
            "ADMIN_CHANGED_PERMISSIONS"
        ]
    );

    let mut update = UserUpdate::new(user.id);
    update.id_name = Some("bob".into());
    let err = tx.users().update(&update).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UserDuplicateIdName);
    assert_eq!(tx.users().get_require(bob.id).unwrap().id_name, "bob");

    let err = tx.users().update(&UserUpdate::new(Uuid::new_v4())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UserNonexistent);
}

#[test]
fn delete_removes_everything_and_audits_each_email() {
    let store = store();
    let mut conn = store.db.connect(Role::ReadWrite).unwrap();
    let mut tx = conn.open_transaction().unwrap();
    let root = bootstrap(&mut tx);
    let user = create_user(&tx, "alice", "alice@example.com");
    tx.users().email_add(user.id, "alice2@example.com").unwrap();
    tx.users().email_add(user.id, "alice3@example.com").unwrap();
    let meta = LoginMetadata {
        host: "203.0.113.9".into(),
        user_agent: "test".into(),
    };
    tx.users().login(user.id, &meta, 10).unwrap();
    tx.users()
        .ban_create(&Ban {
            user: user.id,
            reason: "spam".into(),
            expires: None,
        })
        .unwrap();
    tx.commit().unwrap();

    let before = audit_kinds(&tx).len();
    tx.users().delete(user.id).unwrap();
    tx.commit().unwrap();

    let kinds = audit_kinds(&tx);
    assert_eq!(kinds.len() - before, 3 + 1);
    assert_eq!(kinds.last().map(String::as_str), Some("USER_DELETED"));

    assert_eq!(tx.users().get(user.id).unwrap(), None);
    assert_eq!(tx.emails().exists("alice2@example.com").unwrap(), None);
    assert_eq!(tx.users().ban_get(user.id).unwrap(), None);
    assert!(tx.users().login_history(user.id).unwrap().is_empty());

    // The id stays reserved
    let err = tx
        .users()
        .create(user.id, "alice", "Alice", "alice@example.com", &password())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UserDuplicateId);

    let events = tx
        .audit()
        .events_after(&AuditSearchParameters::default(), None, 1000)
        .unwrap();
    assert!(events[before..].iter().all(|e| e.owner == root.id));

    let err = tx.users().delete(user.id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UserNonexistent);
}

#[test]
fn login_history_is_bounded_and_newest_first() {
    let store = store();
    let mut conn = store.db.connect(Role::ReadWrite).unwrap();
    let mut tx = conn.open_transaction().unwrap();
    bootstrap(&mut tx);
    let user = create_user(&tx, "alice", "alice@example.com");

    for i in 0..5 {
        store.clock.advance(Duration::minutes(1));
        let meta = LoginMetadata {
            host: format!("198.51.100.{}", i),
            user_agent: "agent".into(),
        };
        tx.users().login(user.id, &meta, 3).unwrap();
    }
    tx.commit().unwrap();

    let history = tx.users().login_history(user.id).unwrap();
    let hosts: Vec<_> = history.iter().map(|h| h.host.as_str()).collect();
    assert_eq!(hosts, vec!["198.51.100.4", "198.51.100.3", "198.51.100.2"]);

    let logins = tx
        .audit()
        .events_after(
            &AuditSearchParameters {
                kind: Some("USER_LOGGED_IN".into()),
                ..AuditSearchParameters::default()
            },
            None,
            100,
        )
        .unwrap();
    assert_eq!(logins.len(), 5);
    assert!(logins.iter().all(|e| e.owner == user.id));
    assert_eq!(logins[4].message, "198.51.100.4");

    let meta = LoginMetadata {
        host: "h".into(),
        user_agent: "a".into(),
    };
    let err = tx.users().login(Uuid::new_v4(), &meta, 3).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UserNonexistent);
}

#[test]
fn admin_login_is_audited_only() {
    let store = store();
    let mut conn = store.db.connect(Role::ReadWrite).unwrap();
    let mut tx = conn.open_transaction().unwrap();
    let root = bootstrap(&mut tx);
    let meta = LoginMetadata {
        host: "192.0.2.1".into(),
        user_agent: "agent".into(),
    };
    tx.admins().login(root.id, &meta).unwrap();
    tx.commit().unwrap();

    let kinds = audit_kinds(&tx);
    assert_eq!(kinds.last().map(String::as_str), Some("ADMIN_LOGGED_IN"));

    let err = tx.admins().login(Uuid::new_v4(), &meta).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AdminNonexistent);
}

#[test]
fn bans_upsert_and_require_an_admin() {
    let store = store();
    let mut conn = store.db.connect(Role::ReadWrite).unwrap();
    let mut tx = conn.open_transaction().unwrap();
    bootstrap(&mut tx);
    let user = create_user(&tx, "alice", "alice@example.com");
    tx.commit().unwrap();

    let expires = common::start_time() + Duration::days(1);
    let ban = Ban {
        user: user.id,
        reason: "spam".into(),
        expires: Some(expires),
    };
    tx.users().ban_create(&ban).unwrap();
    let replaced = Ban {
        reason: "abuse".into(),
        expires: None,
        ..ban.clone()
    };
    tx.users().ban_create(&replaced).unwrap();
    tx.commit().unwrap();
    assert_eq!(tx.users().ban_get(user.id).unwrap(), Some(replaced));

    let err = tx
        .users()
        .ban_create(&Ban {
            user: Uuid::new_v4(),
            ..ban.clone()
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UserNonexistent);

    tx.users().ban_delete(user.id).unwrap();
    tx.commit().unwrap();
    let err = tx.users().ban_delete(user.id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BanNonexistent);

    tx.set_user_id(user.id).unwrap();
    let err = tx.users().ban_create(&ban).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AdminUnset);

    let kinds = audit_kinds(&tx);
    assert_eq!(kinds.iter().filter(|k| *k == "USER_BANNED").count(), 2);
    assert_eq!(kinds.iter().filter(|k| *k == "USER_BAN_REMOVED").count(), 1);
}

#[test]
fn storage_rejections_discard_uncommitted_work() {
    let store = store();
    let mut conn = store.db.connect(Role::ReadWrite).unwrap();
    let mut tx = conn.open_transaction().unwrap();
    bootstrap(&mut tx);
    tx.commit().unwrap();
    let before = audit_kinds(&tx).len();

    // Not committed before the failing call
    let a = create_user(&tx, "a", "a@example.com");
    let err = tx.users().email_add(a.id, "root@example.com").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmailDuplicate);
    assert!(err.rolled_back());
    assert!(err.rollback_failure().is_none());

    assert_eq!(tx.users().get(a.id).unwrap(), None);
    assert_eq!(audit_kinds(&tx).len(), before);
}

#[test]
fn up_front_checks_keep_uncommitted_work() {
    let store = store();
    let mut conn = store.db.connect(Role::ReadWrite).unwrap();
    let mut tx = conn.open_transaction().unwrap();
    bootstrap(&mut tx);
    tx.commit().unwrap();

    let b = create_user(&tx, "b", "b@example.com");
    let err = tx
        .users()
        .create(Uuid::new_v4(), "c", "C", "B@example.com", &password())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmailDuplicate);
    assert!(!err.rolled_back());
    tx.commit().unwrap();

    assert_eq!(tx.users().get_require(b.id).unwrap(), b);
}

#[test]
fn login_with_zero_cap_keeps_no_history() {
    let store = store();
    let mut conn = store.db.connect(Role::ReadWrite).unwrap();
    let mut tx = conn.open_transaction().unwrap();
    bootstrap(&mut tx);
    let user = create_user(&tx, "alice", "alice@example.com");
    let meta = LoginMetadata {
        host: "198.51.100.7".into(),
        user_agent: "agent".into(),
    };
    tx.users().login(user.id, &meta, 2).unwrap();
    tx.users().login(user.id, &meta, 0).unwrap();
    tx.commit().unwrap();

    assert!(tx.users().login_history(user.id).unwrap().is_empty());
    let kinds = audit_kinds(&tx);
    assert_eq!(kinds.iter().filter(|k| *k == "USER_LOGGED_IN").count(), 2);
}

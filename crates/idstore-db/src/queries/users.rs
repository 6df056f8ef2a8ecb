use idstore_types::api::{AccountSearchByEmailParameters, AccountSearchParameters, UserUpdate};
use idstore_types::events::AuditEventKind;
use idstore_types::models::{Ban, LoginMetadata, LoginRecord, User, UserEmail, UserSummary};
use idstore_types::password::Password;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::audit::record;
use super::{
    AccountTable, account_emails, account_exists, account_id_taken, account_search, email_delete,
    email_insert, email_owner, id_name_taken, touch,
};
use crate::error::{Attributes, DatabaseError, ErrorKind, Result, attributes};
use crate::models::{
    ACCOUNT_COLUMNS, BAN_COLUMNS, LOGIN_COLUMNS, USER_EMAIL_COLUMNS, ban, login_record, millis,
    user_email, user_row, user_summary,
};
use crate::pager::{self, Filter, KeysetPager, KeysetQuery, OrderTerm};
use crate::session::{DbTransaction, QueryFailure};

const TABLE: AccountTable = AccountTable::Users;

pub struct UserQueries<'a> {
    tx: &'a DbTransaction<'a>,
}

impl<'a> UserQueries<'a> {
    pub(crate) fn new(tx: &'a DbTransaction<'a>) -> Self {
        Self { tx }
    }

    /// Create a user on behalf of the acting admin or user.
    #[instrument(level = "debug", skip_all, fields(user = %id))]
    pub fn create(
        &self,
        id: Uuid,
        id_name: &str,
        real_name: &str,
        email: &str,
        password: &Password,
    ) -> Result<User> {
        let executor = self.tx.executor_id()?;
        let now = self.tx.now();
        let attrs = attributes([("user", id.to_string()), ("id_name", id_name.to_string())]);

        self.tx.run(&attrs, |conn| {
            if account_id_taken(conn, id)? {
                return Err(DatabaseError::new(
                    ErrorKind::UserDuplicateId,
                    "An account with this ID already exists.",
                )
                .with_attributes(attrs.clone())
                .into());
            }
            if id_name_taken(conn, TABLE, id_name)? {
                return Err(DatabaseError::new(
                    ErrorKind::UserDuplicateIdName,
                    "A user with this name already exists.",
                )
                .with_attributes(attrs.clone())
                .with_remediation("Choose a different name.")
                .into());
            }
            if email_owner(conn, email)?.is_some() {
                return Err(DatabaseError::new(ErrorKind::EmailDuplicate, "Email already exists.")
                    .with_attributes(attrs.clone())
                    .with_attribute("email", email)
                    .into());
            }

            let user = User {
                id,
                id_name: id_name.to_string(),
                real_name: real_name.to_string(),
                emails: vec![email.to_string()],
                time_created: now,
                time_updated: now,
                password: password.clone(),
            };
            insert(conn, &user)?;
            record(
                conn,
                now,
                executor,
                AuditEventKind::UserCreated,
                &format!("User {} created.", id_name),
                attributes([
                    ("user", id.to_string()),
                    ("id_name", id_name.to_string()),
                    ("email", email.to_string()),
                ]),
            )?;
            Ok(user)
        })
    }

    pub fn get(&self, id: Uuid) -> Result<Option<User>> {
        let attrs = attributes([("user", id.to_string())]);
        self.tx
            .run(&attrs, |conn| Ok(load(conn, "id = ?1", &id.to_string())?))
    }

    pub fn get_require(&self, id: Uuid) -> Result<User> {
        self.get(id)?
            .ok_or_else(|| nonexistent(attributes([("user", id.to_string())])))
    }

    pub fn get_for_name(&self, id_name: &str) -> Result<Option<User>> {
        let attrs = attributes([("id_name", id_name.to_string())]);
        self.tx
            .run(&attrs, |conn| Ok(load(conn, "id_name = ?1", id_name)?))
    }

    pub fn get_for_name_require(&self, id_name: &str) -> Result<User> {
        self.get_for_name(id_name)?
            .ok_or_else(|| nonexistent(attributes([("id_name", id_name.to_string())])))
    }

    /// Case-insensitive on the address.
    pub fn get_for_email(&self, email: &str) -> Result<Option<User>> {
        let attrs = attributes([("email", email.to_string())]);
        self.tx.run(&attrs, |conn| {
            Ok(load(
                conn,
                "id = (SELECT user_id FROM emails WHERE lower(email_address) = lower(?1))",
                email,
            )?)
        })
    }

    pub fn get_for_email_require(&self, email: &str) -> Result<User> {
        self.get_for_email(email)?
            .ok_or_else(|| nonexistent(attributes([("email", email.to_string())])))
    }

    pub fn search(&self, params: &AccountSearchParameters) -> Result<KeysetPager<UserSummary>> {
        let query = account_search(
            TABLE,
            params.time_created_range,
            params.time_updated_range,
            params.search.as_deref(),
            None,
            params.ordering,
        );
        KeysetPager::new(self.tx, query, params.page_size, user_summary)
    }

    pub fn search_by_email(
        &self,
        params: &AccountSearchByEmailParameters,
    ) -> Result<KeysetPager<UserSummary>> {
        let query = account_search(
            TABLE,
            params.time_created_range,
            params.time_updated_range,
            None,
            Some(&params.search),
            params.ordering,
        );
        KeysetPager::new(self.tx, query, params.page_size, user_summary)
    }

    /// User email addresses containing `pattern`, ordered by lower-cased
    /// address, starting strictly after the address `after`.
    pub fn email_search(
        &self,
        pattern: &str,
        after: Option<&str>,
        limit: u32,
    ) -> Result<Vec<UserEmail>> {
        let query = KeysetQuery {
            columns: USER_EMAIL_COLUMNS,
            from: "emails",
            filter: Filter::new().and(
                "user_id IS NOT NULL AND instr(lower(email_address), ?) > 0",
                [Value::Text(pattern.to_lowercase())],
            ),
            order: vec![OrderTerm::asc("lower(email_address)")],
        };
        let key = after.map(|a| vec![Value::Text(a.to_lowercase())]);
        let attrs = attributes([("pattern", pattern.to_string())]);

        self.tx.run(&attrs, |conn| {
            Ok(pager::seek(conn, &query, key.as_deref(), limit, user_email)?)
        })
    }

    /// Apply the fields present in `update`, auditing each one that changes.
    #[instrument(level = "debug", skip_all, fields(user = %update.id))]
    pub fn update(&self, update: &UserUpdate) -> Result<User> {
        let executor = self.tx.executor_id()?;
        let now = self.tx.now();
        let id = update.id;
        let attrs = attributes([("user", id.to_string())]);

        self.tx.run(&attrs, |conn| {
            let current = load(conn, "id = ?1", &id.to_string())?
                .ok_or_else(|| nonexistent(attrs.clone()))?;
            let mut changed = false;

            if let Some(id_name) = update.id_name.as_deref().filter(|n| *n != current.id_name) {
                conn.execute(
                    "UPDATE users SET id_name = ?1 WHERE id = ?2",
                    params![id_name, id.to_string()],
                )?;
                record(
                    conn,
                    now,
                    executor,
                    AuditEventKind::UserChangedIdName,
                    &format!("User ID name changed from {} to {}.", current.id_name, id_name),
                    attributes([
                        ("user", id.to_string()),
                        ("old", current.id_name.clone()),
                        ("new", id_name.to_string()),
                    ]),
                )?;
                changed = true;
            }

            if let Some(real_name) = update.real_name.as_deref().filter(|n| *n != current.real_name) {
                conn.execute(
                    "UPDATE users SET real_name = ?1 WHERE id = ?2",
                    params![real_name, id.to_string()],
                )?;
                record(
                    conn,
                    now,
                    executor,
                    AuditEventKind::UserChangedRealName,
                    "User real name changed.",
                    attributes([
                        ("user", id.to_string()),
                        ("old", current.real_name.clone()),
                        ("new", real_name.to_string()),
                    ]),
                )?;
                changed = true;
            }

            if let Some(password) = update.password.as_ref().filter(|p| **p != current.password) {
                conn.execute(
                    "UPDATE users SET password_algo = ?1, password_hash = ?2, password_salt = ?3 \
                     WHERE id = ?4",
                    params![
                        password.algorithm.identifier(),
                        password.hash,
                        password.salt,
                        id.to_string()
                    ],
                )?;
                record(
                    conn,
                    now,
                    executor,
                    AuditEventKind::UserChangedPassword,
                    "User password changed.",
                    attributes([("user", id.to_string())]),
                )?;
                changed = true;
            }

            if changed {
                touch(conn, TABLE, id, now)?;
            } else {
                debug!("user update changed nothing");
            }

            load(conn, "id = ?1", &id.to_string())?
                .ok_or_else(|| QueryFailure::from(nonexistent(attrs.clone())))
        })
    }

    #[instrument(level = "debug", skip_all, fields(user = %id))]
    pub fn email_add(&self, id: Uuid, email: &str) -> Result<()> {
        let executor = self.tx.executor_id()?;
        let now = self.tx.now();
        let attrs = attributes([("user", id.to_string()), ("email", email.to_string())]);

        self.tx
            .run(&attrs, |conn| Ok(add_email(conn, now, executor, id, email)?))
    }

    /// Fails `email-one-required` when `email` is the user's last address.
    #[instrument(level = "debug", skip_all, fields(user = %id))]
    pub fn email_remove(&self, id: Uuid, email: &str) -> Result<()> {
        let executor = self.tx.executor_id()?;
        let now = self.tx.now();
        let attrs = attributes([("user", id.to_string()), ("email", email.to_string())]);

        self.tx
            .run(&attrs, |conn| remove_email(conn, now, executor, id, email, &attrs))
    }

    /// Delete the user with everything it owns. The identity row stays behind
    /// so the id is never issued again.
    #[instrument(level = "debug", skip_all, fields(user = %id))]
    pub fn delete(&self, id: Uuid) -> Result<()> {
        let executor = self.tx.executor_id()?;
        let now = self.tx.now();
        let attrs = attributes([("user", id.to_string())]);
        let user_id = id.to_string();

        self.tx.run(&attrs, |conn| {
            if !account_exists(conn, TABLE, id)? {
                return Err(nonexistent(attrs.clone()).into());
            }

            // Lifts the last-email trigger for this user
            conn.execute("UPDATE users SET deleting = 1 WHERE id = ?1", [&user_id])?;

            for email in account_emails(conn, TABLE, id)? {
                email_delete(conn, TABLE, id, &email)?;
                record(
                    conn,
                    now,
                    executor,
                    AuditEventKind::UserEmailRemoved,
                    &format!("Email {} removed.", email),
                    attributes([("user", user_id.clone()), ("email", email.clone())]),
                )?;
            }

            conn.execute("DELETE FROM email_verifications WHERE user_id = ?1", [&user_id])?;
            conn.execute("DELETE FROM bans WHERE user_id = ?1", [&user_id])?;
            conn.execute("DELETE FROM user_logins WHERE user_id = ?1", [&user_id])?;
            conn.execute("DELETE FROM users WHERE id = ?1", [&user_id])?;

            record(
                conn,
                now,
                executor,
                AuditEventKind::UserDeleted,
                "User deleted.",
                attrs.clone(),
            )?;
            Ok(())
        })
    }

    /// Record a login, keeping only the newest `limit` history entries. A
    /// `limit` of 0 keeps no history; the login is still audited. The host is
    /// written to history and the audit message, never to logs.
    #[instrument(level = "debug", skip_all, fields(user = %id))]
    pub fn login(&self, id: Uuid, metadata: &LoginMetadata, limit: u32) -> Result<()> {
        let now = self.tx.now();
        let attrs = attributes([("user", id.to_string())]);
        let user_id = id.to_string();

        self.tx.run(&attrs, |conn| {
            conn.execute(
                "INSERT INTO user_logins (user_id, time, host, user_agent) VALUES (?1, ?2, ?3, ?4)",
                params![user_id, millis(now), metadata.host, metadata.user_agent],
            )?;
            let pruned = conn.execute(
                "DELETE FROM user_logins WHERE user_id = ?1 AND id NOT IN \
                 (SELECT id FROM user_logins WHERE user_id = ?1 ORDER BY time DESC, id DESC LIMIT ?2)",
                params![user_id, i64::from(limit)],
            )?;
            if pruned > 0 {
                debug!(pruned, "login history pruned");
            }
            record(
                conn,
                now,
                id,
                AuditEventKind::UserLoggedIn,
                &metadata.host,
                attributes([
                    ("user", user_id.clone()),
                    ("user_agent", metadata.user_agent.clone()),
                ]),
            )?;
            Ok(())
        })
    }

    /// Newest first.
    pub fn login_history(&self, id: Uuid) -> Result<Vec<LoginRecord>> {
        let attrs = attributes([("user", id.to_string())]);
        self.tx.run(&attrs, |conn| {
            let sql = format!(
                "SELECT {} FROM user_logins WHERE user_id = ?1 ORDER BY time DESC, id DESC",
                LOGIN_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let history = stmt
                .query_map([id.to_string()], login_record)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(history)
        })
    }

    /// Ban a user, replacing any existing ban. Requires an acting admin.
    #[instrument(level = "debug", skip_all, fields(user = %ban.user))]
    pub fn ban_create(&self, ban: &Ban) -> Result<()> {
        let executor = self.tx.admin_id()?;
        let now = self.tx.now();
        let attrs = attributes([("user", ban.user.to_string())]);

        self.tx.run(&attrs, |conn| {
            conn.execute(
                "INSERT INTO bans (user_id, reason, expires) VALUES (?1, ?2, ?3) \
                 ON CONFLICT (user_id) DO UPDATE SET reason = excluded.reason, expires = excluded.expires",
                params![ban.user.to_string(), ban.reason, ban.expires.map(millis)],
            )?;

            let mut event = attrs.clone();
            if let Some(expires) = ban.expires {
                event.insert("expires".to_string(), expires.to_rfc3339());
            }
            record(conn, now, executor, AuditEventKind::UserBanned, &ban.reason, event)?;
            Ok(())
        })
    }

    pub fn ban_get(&self, id: Uuid) -> Result<Option<Ban>> {
        let attrs = attributes([("user", id.to_string())]);
        self.tx.run(&attrs, |conn| {
            let sql = format!("SELECT {} FROM bans WHERE user_id = ?1", BAN_COLUMNS);
            Ok(conn.query_row(&sql, [id.to_string()], ban).optional()?)
        })
    }

    #[instrument(level = "debug", skip_all, fields(user = %id))]
    pub fn ban_delete(&self, id: Uuid) -> Result<()> {
        let executor = self.tx.admin_id()?;
        let now = self.tx.now();
        let attrs = attributes([("user", id.to_string())]);

        self.tx.run(&attrs, |conn| {
            let removed = conn.execute("DELETE FROM bans WHERE user_id = ?1", [id.to_string()])?;
            if removed == 0 {
                return Err(DatabaseError::new(ErrorKind::BanNonexistent, "No ban exists.")
                    .with_attributes(attrs.clone())
                    .into());
            }
            record(
                conn,
                now,
                executor,
                AuditEventKind::UserBanRemoved,
                "Ban removed.",
                attrs.clone(),
            )?;
            Ok(())
        })
    }
}

fn nonexistent(attrs: Attributes) -> DatabaseError {
    DatabaseError::new(ErrorKind::UserNonexistent, "User does not exist.").with_attributes(attrs)
}

fn insert(conn: &Connection, user: &User) -> rusqlite::Result<()> {
    let id = user.id.to_string();
    conn.execute("INSERT INTO accounts (id, kind) VALUES (?1, 'USER')", [&id])?;
    conn.execute(
        "INSERT INTO users (id, id_name, real_name, time_created, time_updated, \
         password_algo, password_hash, password_salt) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id,
            user.id_name,
            user.real_name,
            millis(user.time_created),
            millis(user.time_updated),
            user.password.algorithm.identifier(),
            user.password.hash,
            user.password.salt,
        ],
    )?;
    for email in &user.emails {
        email_insert(conn, TABLE, user.id, email)?;
    }
    Ok(())
}

fn load(conn: &Connection, predicate: &str, value: &str) -> rusqlite::Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE {}", ACCOUNT_COLUMNS, predicate);
    let user = conn.query_row(&sql, [value], user_row).optional()?;
    match user {
        Some(mut user) => {
            user.emails = account_emails(conn, TABLE, user.id)?;
            Ok(Some(user))
        }
        None => Ok(None),
    }
}

/// Shared with verification resolution, which adds on the user's behalf.
pub(crate) fn add_email(
    conn: &Connection,
    now: chrono::DateTime<chrono::Utc>,
    executor: Uuid,
    id: Uuid,
    email: &str,
) -> rusqlite::Result<()> {
    email_insert(conn, TABLE, id, email)?;
    touch(conn, TABLE, id, now)?;
    record(
        conn,
        now,
        executor,
        AuditEventKind::UserEmailAdded,
        &format!("Email {} added.", email),
        attributes([("user", id.to_string()), ("email", email.to_string())]),
    )?;
    Ok(())
}

pub(crate) fn remove_email(
    conn: &Connection,
    now: chrono::DateTime<chrono::Utc>,
    executor: Uuid,
    id: Uuid,
    email: &str,
    attrs: &Attributes,
) -> std::result::Result<(), QueryFailure> {
    if !account_exists(conn, TABLE, id)? {
        return Err(nonexistent(attrs.clone()).into());
    }
    if email_delete(conn, TABLE, id, email)? == 0 {
        return Err(DatabaseError::new(
            ErrorKind::EmailNonexistent,
            "The user does not own this email address.",
        )
        .with_attributes(attrs.clone())
        .into());
    }
    touch(conn, TABLE, id, now)?;
    record(
        conn,
        now,
        executor,
        AuditEventKind::UserEmailRemoved,
        &format!("Email {} removed.", email),
        attributes([("user", id.to_string()), ("email", email.to_string())]),
    )?;
    Ok(())
}

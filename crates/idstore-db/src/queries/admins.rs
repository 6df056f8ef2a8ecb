use idstore_types::api::{AccountSearchByEmailParameters, AccountSearchParameters, AdminUpdate};
use idstore_types::events::AuditEventKind;
use idstore_types::models::{Admin, AdminSummary, LoginMetadata};
use idstore_types::password::Password;
use idstore_types::permissions::{AdminPermission, AdminPermissionSet, encode_permissions};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::audit::record;
use super::{
    AccountTable, account_emails, account_exists, account_id_taken, account_search, email_delete,
    email_insert, email_owner, id_name_taken, touch,
};
use crate::error::{Attributes, DatabaseError, ErrorKind, Result, attributes};
use crate::models::{ACCOUNT_COLUMNS, admin_row, admin_summary, millis};
use crate::pager::KeysetPager;
use crate::session::{DbTransaction, QueryFailure};

const TABLE: AccountTable = AccountTable::Admins;

pub struct AdminQueries<'a> {
    tx: &'a DbTransaction<'a>,
}

impl<'a> AdminQueries<'a> {
    pub(crate) fn new(tx: &'a DbTransaction<'a>) -> Self {
        Self { tx }
    }

    /// Create the first admin of an empty store with every permission. The
    /// transaction needs no actor; the event is owned by the new admin.
    #[instrument(level = "debug", skip_all, fields(admin = %id))]
    pub fn create_initial(
        &self,
        id: Uuid,
        id_name: &str,
        real_name: &str,
        email: &str,
        password: &Password,
    ) -> Result<Admin> {
        let now = self.tx.now();
        let attrs = attributes([("admin", id.to_string()), ("id_name", id_name.to_string())]);

        self.tx.run(&attrs, |conn| {
            let existing: i64 = conn.query_row("SELECT COUNT(*) FROM admins", [], |r| r.get(0))?;
            if existing > 0 {
                return Err(DatabaseError::new(
                    ErrorKind::AdminNotInitial,
                    "An initial admin already exists.",
                )
                .with_attributes(attrs.clone())
                .into());
            }
            precheck_create(conn, id, id_name, email, &attrs)?;

            let admin = Admin {
                id,
                id_name: id_name.to_string(),
                real_name: real_name.to_string(),
                emails: vec![email.to_string()],
                time_created: now,
                time_updated: now,
                password: password.clone(),
                permissions: AdminPermission::all(),
            };
            insert(conn, &admin)?;
            record(
                conn,
                now,
                id,
                AuditEventKind::AdminCreated,
                &format!("Initial admin {} created.", id_name),
                created_attributes(&admin),
            )?;
            Ok(admin)
        })
    }

    /// Create an admin on behalf of the acting admin.
    #[instrument(level = "debug", skip_all, fields(admin = %id))]
    pub fn create(
        &self,
        id: Uuid,
        id_name: &str,
        real_name: &str,
        email: &str,
        password: &Password,
        permissions: AdminPermissionSet,
    ) -> Result<Admin> {
        let executor = self.tx.admin_id()?;
        let now = self.tx.now();
        let attrs = attributes([("admin", id.to_string()), ("id_name", id_name.to_string())]);

        self.tx.run(&attrs, |conn| {
            precheck_create(conn, id, id_name, email, &attrs)?;

            let admin = Admin {
                id,
                id_name: id_name.to_string(),
                real_name: real_name.to_string(),
                emails: vec![email.to_string()],
                time_created: now,
                time_updated: now,
                password: password.clone(),
                permissions,
            };
            insert(conn, &admin)?;
            record(
                conn,
                now,
                executor,
                AuditEventKind::AdminCreated,
                &format!("Admin {} created.", id_name),
                created_attributes(&admin),
            )?;
            Ok(admin)
        })
    }

    pub fn get(&self, id: Uuid) -> Result<Option<Admin>> {
        let attrs = attributes([("admin", id.to_string())]);
        self.tx
            .run(&attrs, |conn| Ok(load(conn, "id = ?1", &id.to_string())?))
    }

    pub fn get_require(&self, id: Uuid) -> Result<Admin> {
        self.get(id)?
            .ok_or_else(|| nonexistent(attributes([("admin", id.to_string())])))
    }

    pub fn get_for_name(&self, id_name: &str) -> Result<Option<Admin>> {
        let attrs = attributes([("id_name", id_name.to_string())]);
        self.tx
            .run(&attrs, |conn| Ok(load(conn, "id_name = ?1", id_name)?))
    }

    pub fn get_for_name_require(&self, id_name: &str) -> Result<Admin> {
        self.get_for_name(id_name)?
            .ok_or_else(|| nonexistent(attributes([("id_name", id_name.to_string())])))
    }

    /// Case-insensitive on the address.
    pub fn get_for_email(&self, email: &str) -> Result<Option<Admin>> {
        let attrs = attributes([("email", email.to_string())]);
        self.tx.run(&attrs, |conn| {
            Ok(load(
                conn,
                "id = (SELECT admin_id FROM emails WHERE lower(email_address) = lower(?1))",
                email,
            )?)
        })
    }

    pub fn get_for_email_require(&self, email: &str) -> Result<Admin> {
        self.get_for_email(email)?
            .ok_or_else(|| nonexistent(attributes([("email", email.to_string())])))
    }

    pub fn search(&self, params: &AccountSearchParameters) -> Result<KeysetPager<AdminSummary>> {
        let query = account_search(
            TABLE,
            params.time_created_range,
            params.time_updated_range,
            params.search.as_deref(),
            None,
            params.ordering,
        );
        KeysetPager::new(self.tx, query, params.page_size, admin_summary)
    }

    pub fn search_by_email(
        &self,
        params: &AccountSearchByEmailParameters,
    ) -> Result<KeysetPager<AdminSummary>> {
        let query = account_search(
            TABLE,
            params.time_created_range,
            params.time_updated_range,
            None,
            Some(&params.search),
            params.ordering,
        );
        KeysetPager::new(self.tx, query, params.page_size, admin_summary)
    }

    /// Apply the fields present in `update`, auditing each one that changes.
    #[instrument(level = "debug", skip_all, fields(admin = %update.id))]
    pub fn update(&self, update: &AdminUpdate) -> Result<Admin> {
        let executor = self.tx.admin_id()?;
        let now = self.tx.now();
        let id = update.id;
        let attrs = attributes([("admin", id.to_string())]);

        self.tx.run(&attrs, |conn| {
            let current = load(conn, "id = ?1", &id.to_string())?
                .ok_or_else(|| nonexistent(attrs.clone()))?;
            let mut changed = false;

            if let Some(id_name) = update.id_name.as_deref().filter(|n| *n != current.id_name) {
                conn.execute(
                    "UPDATE admins SET id_name = ?1 WHERE id = ?2",
                    params![id_name, id.to_string()],
                )?;
                record(
                    conn,
                    now,
                    executor,
                    AuditEventKind::AdminChangedIdName,
                    &format!("Admin ID name changed from {} to {}.", current.id_name, id_name),
                    attributes([
                        ("admin", id.to_string()),
                        ("old", current.id_name.clone()),
                        ("new", id_name.to_string()),
                    ]),
                )?;
                changed = true;
            }

            if let Some(real_name) = update.real_name.as_deref().filter(|n| *n != current.real_name) {
                conn.execute(
                    "UPDATE admins SET real_name = ?1 WHERE id = ?2",
                    params![real_name, id.to_string()],
                )?;
                record(
                    conn,
                    now,
                    executor,
                    AuditEventKind::AdminChangedRealName,
                    "Admin real name changed.",
                    attributes([
                        ("admin", id.to_string()),
                        ("old", current.real_name.clone()),
                        ("new", real_name.to_string()),
                    ]),
                )?;
                changed = true;
            }

            if let Some(password) = update.password.as_ref().filter(|p| **p != current.password) {
                conn.execute(
                    "UPDATE admins SET password_algo = ?1, password_hash = ?2, password_salt = ?3 \
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
                    AuditEventKind::AdminChangedPassword,
                    "Admin password changed.",
                    attributes([("admin", id.to_string())]),
                )?;
                changed = true;
            }

            if let Some(permissions) = update
                .permissions
                .as_ref()
                .filter(|p| **p != current.permissions)
            {
                let encoded = encode_permissions(permissions);
                conn.execute(
                    "UPDATE admins SET permissions = ?1 WHERE id = ?2",
                    params![encoded, id.to_string()],
                )?;
                record(
                    conn,
                    now,
                    executor,
                    AuditEventKind::AdminChangedPermissions,
                    "Admin permissions changed.",
                    attributes([
                        ("admin", id.to_string()),
                        ("old", encode_permissions(&current.permissions)),
                        ("new", encoded),
                    ]),
                )?;
                changed = true;
            }

            if changed {
                touch(conn, TABLE, id, now)?;
            } else {
                debug!("admin update changed nothing");
            }

            load(conn, "id = ?1", &id.to_string())?
                .ok_or_else(|| QueryFailure::from(nonexistent(attrs.clone())))
        })
    }

    #[instrument(level = "debug", skip_all, fields(admin = %id))]
    pub fn email_add(&self, id: Uuid, email: &str) -> Result<()> {
        let executor = self.tx.admin_id()?;
        let now = self.tx.now();
        let attrs = attributes([("admin", id.to_string()), ("email", email.to_string())]);

        self.tx.run(&attrs, |conn| {
            email_insert(conn, TABLE, id, email)?;
            touch(conn, TABLE, id, now)?;
            record(
                conn,
                now,
                executor,
                AuditEventKind::AdminEmailAdded,
                &format!("Email {} added.", email),
                attrs.clone(),
            )?;
            Ok(())
        })
    }

    /// Fails `email-one-required` when `email` is the admin's last address.
    #[instrument(level = "debug", skip_all, fields(admin = %id))]
    pub fn email_remove(&self, id: Uuid, email: &str) -> Result<()> {
        let executor = self.tx.admin_id()?;
        let now = self.tx.now();
        let attrs = attributes([("admin", id.to_string()), ("email", email.to_string())]);

        self.tx.run(&attrs, |conn| {
            if !account_exists(conn, TABLE, id)? {
                return Err(nonexistent(attrs.clone()).into());
            }
            if email_delete(conn, TABLE, id, email)? == 0 {
                return Err(DatabaseError::new(
                    ErrorKind::EmailNonexistent,
                    "The admin does not own this email address.",
                )
                .with_attributes(attrs.clone())
                .into());
            }
            touch(conn, TABLE, id, now)?;
            record(
                conn,
                now,
                executor,
                AuditEventKind::AdminEmailRemoved,
                &format!("Email {} removed.", email),
                attrs.clone(),
            )?;
            Ok(())
        })
    }

    /// Record a login. The host goes to the audit message only.
    #[instrument(level = "debug", skip_all, fields(admin = %id))]
    pub fn login(&self, id: Uuid, metadata: &LoginMetadata) -> Result<()> {
        let now = self.tx.now();
        let attrs = attributes([("admin", id.to_string())]);

        self.tx.run(&attrs, |conn| {
            if !account_exists(conn, TABLE, id)? {
                return Err(nonexistent(attrs.clone()).into());
            }
            record(
                conn,
                now,
                id,
                AuditEventKind::AdminLoggedIn,
                &metadata.host,
                attributes([
                    ("admin", id.to_string()),
                    ("user_agent", metadata.user_agent.clone()),
                ]),
            )?;
            Ok(())
        })
    }
}

fn nonexistent(attrs: Attributes) -> DatabaseError {
    DatabaseError::new(ErrorKind::AdminNonexistent, "Admin does not exist.").with_attributes(attrs)
}

fn precheck_create(
    conn: &Connection,
    id: Uuid,
    id_name: &str,
    email: &str,
    attrs: &Attributes,
) -> std::result::Result<(), QueryFailure> {
    if account_id_taken(conn, id)? {
        return Err(DatabaseError::new(
            ErrorKind::AdminDuplicateId,
            "An account with this ID already exists.",
        )
        .with_attributes(attrs.clone())
        .into());
    }
    if id_name_taken(conn, TABLE, id_name)? {
        return Err(DatabaseError::new(
            ErrorKind::AdminDuplicateIdName,
            "An admin with this name already exists.",
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
    Ok(())
}

fn insert(conn: &Connection, admin: &Admin) -> rusqlite::Result<()> {
    let id = admin.id.to_string();
    conn.execute("INSERT INTO accounts (id, kind) VALUES (?1, 'ADMIN')", [&id])?;
    conn.execute(
        "INSERT INTO admins (id, id_name, real_name, time_created, time_updated, \
         password_algo, password_hash, password_salt, permissions) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            id,
            admin.id_name,
            admin.real_name,
            millis(admin.time_created),
            millis(admin.time_updated),
            admin.password.algorithm.identifier(),
            admin.password.hash,
            admin.password.salt,
            encode_permissions(&admin.permissions),
        ],
    )?;
    for email in &admin.emails {
        email_insert(conn, TABLE, admin.id, email)?;
    }
    Ok(())
}

fn load(conn: &Connection, predicate: &str, value: &str) -> rusqlite::Result<Option<Admin>> {
    let sql = format!(
        "SELECT {}, permissions FROM admins WHERE {}",
        ACCOUNT_COLUMNS, predicate
    );
    let admin = conn.query_row(&sql, [value], admin_row).optional()?;
    match admin {
        Some(mut admin) => {
            admin.emails = account_emails(conn, TABLE, admin.id)?;
            Ok(Some(admin))
        }
        None => Ok(None),
    }
}

fn created_attributes(admin: &Admin) -> Attributes {
    attributes([
        ("admin", admin.id.to_string()),
        ("id_name", admin.id_name.clone()),
        ("email", admin.emails.join(",")),
        ("permissions", encode_permissions(&admin.permissions)),
    ])
}

//! Role-scoped connections and the transactions opened on them.
//!
//! A [`DbConnection`] owns one physical SQLite connection whose privileges are
//! fixed by its [`Role`] before any query runs. A [`DbTransaction`] borrows the
//! connection exclusively, tracks the acting [`Actor`] for audit attribution,
//! and rolls back whatever it has not committed when dropped.

use std::cell::Cell;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rusqlite::hooks::{AuthAction, AuthContext, Authorization};
use tracing::{Span, debug, debug_span, warn};
use uuid::Uuid;

use crate::clock::{Clock, truncate_to_millis};
use crate::error::{Attributes, DatabaseError, ErrorKind, Result, attributes};
use crate::metrics;
use crate::translate;

/// Storage privileges applied to a connection at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Full read/write access.
    ReadWrite,
    /// Queries only; any write fails with `OperationNotPermitted`.
    ReadOnly,
    /// No privileges at all. Only transaction control statements run.
    None,
}

impl Role {
    pub(crate) fn apply(self, conn: &Connection) -> rusqlite::Result<()> {
        match self {
            Self::ReadWrite => Ok(()),
            Self::ReadOnly => conn.pragma_update(None, "query_only", true),
            Self::None => {
                conn.pragma_update(None, "query_only", true)?;
                conn.authorizer(Some(transaction_control_only));
                Ok(())
            }
        }
    }

    fn begin_statement(self) -> &'static str {
        match self {
            // Take the write lock up front so read-then-write never deadlocks
            Self::ReadWrite => "BEGIN IMMEDIATE",
            Self::ReadOnly | Self::None => "BEGIN DEFERRED",
        }
    }
}

fn transaction_control_only(context: AuthContext<'_>) -> Authorization {
    match context.action {
        AuthAction::Transaction { .. } => Authorization::Allow,
        _ => Authorization::Deny,
    }
}

/// The identity mutations are attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Actor {
    #[default]
    System,
    Admin(Uuid),
    User(Uuid),
}

pub struct DbConnection {
    conn: Connection,
    role: Role,
    clock: Arc<dyn Clock>,
}

impl DbConnection {
    pub(crate) fn new(conn: Connection, role: Role, clock: Arc<dyn Clock>) -> Self {
        metrics::connection_opened();
        Self { conn, role, clock }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Begin a storage transaction on this connection.
    pub fn open_transaction(&mut self) -> Result<DbTransaction<'_>> {
        DbTransaction::begin(&self.conn, self.role, self.clock.as_ref())
    }
}

impl Drop for DbConnection {
    fn drop(&mut self) {
        metrics::connection_closed();
    }
}

pub struct DbTransaction<'c> {
    conn: &'c Connection,
    role: Role,
    clock: &'c dyn Clock,
    actor: Actor,
    /// Whether a storage transaction is currently open. After commit or
    /// rollback the next statement lazily begins a new one.
    open: Cell<bool>,
    span: Span,
}

impl<'c> DbTransaction<'c> {
    fn begin(conn: &'c Connection, role: Role, clock: &'c dyn Clock) -> Result<Self> {
        conn.execute_batch(role.begin_statement())
            .map_err(translate::storage_error)?;

        Ok(Self {
            conn,
            role,
            clock,
            actor: Actor::System,
            open: Cell::new(true),
            span: debug_span!("db.transaction", role = ?role),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn commit(&mut self) -> Result<()> {
        let _guard = self.span.enter();
        if self.open.get() {
            if let Err(e) = self.conn.execute_batch("COMMIT") {
                return Err(translate::translate(self, e, &Attributes::new()));
            }
            self.open.set(false);
            metrics::record_commit();
            debug!("transaction committed");
        }
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        let _guard = self.span.enter();
        self.rollback_open()
            .map_err(translate::storage_error)?;
        debug!("transaction rolled back");
        Ok(())
    }

    /// Roll back anything uncommitted and release the connection.
    pub fn close(mut self) -> Result<()> {
        self.rollback()
    }

    // -- Actor --

    pub fn actor(&self) -> Actor {
        self.actor
    }

    /// Act as the given admin. Fails if no such admin exists.
    pub fn set_admin_id(&mut self, id: Uuid) -> Result<()> {
        let attrs = attributes([("admin", id.to_string())]);
        let exists = self.run(&attrs, |conn| {
            Ok(conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM admins WHERE id = ?1)",
                [id.to_string()],
                |r| r.get::<_, bool>(0),
            )?)
        })?;
        if !exists {
            return Err(DatabaseError::new(ErrorKind::AdminNonexistent, "Admin does not exist.")
                .with_attributes(attrs));
        }
        self.actor = Actor::Admin(id);
        Ok(())
    }

    /// Act as the given user. Fails if no such user exists.
    pub fn set_user_id(&mut self, id: Uuid) -> Result<()> {
        let attrs = attributes([("user", id.to_string())]);
        let exists = self.run(&attrs, |conn| {
            Ok(conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM users WHERE id = ?1)",
                [id.to_string()],
                |r| r.get::<_, bool>(0),
            )?)
        })?;
        if !exists {
            return Err(DatabaseError::new(ErrorKind::UserNonexistent, "User does not exist.")
                .with_attributes(attrs));
        }
        self.actor = Actor::User(id);
        Ok(())
    }

    pub fn set_system(&mut self) {
        self.actor = Actor::System;
    }

    pub fn admin_id(&self) -> Result<Uuid> {
        match self.actor {
            Actor::Admin(id) => Ok(id),
            _ => Err(DatabaseError::new(
                ErrorKind::AdminUnset,
                "An admin must be set as the transaction actor.",
            )),
        }
    }

    pub fn user_id(&self) -> Result<Uuid> {
        match self.actor {
            Actor::User(id) => Ok(id),
            _ => Err(DatabaseError::new(
                ErrorKind::UserUnset,
                "A user must be set as the transaction actor.",
            )),
        }
    }

    /// The admin or user performing mutations in this transaction.
    pub fn executor_id(&self) -> Result<Uuid> {
        match self.actor {
            Actor::Admin(id) | Actor::User(id) => Ok(id),
            Actor::System => Err(DatabaseError::new(
                ErrorKind::AdminOrUserUnset,
                "An admin or user must be set as the transaction actor.",
            )),
        }
    }

    // -- Crate internals --

    pub(crate) fn now(&self) -> DateTime<Utc> {
        truncate_to_millis(self.clock.now())
    }

    /// Run `op` inside the open storage transaction. Storage failures are
    /// translated and roll the transaction back; domain failures raised by
    /// `op` itself pass through untouched.
    pub(crate) fn run<T, F>(&self, attributes: &Attributes, op: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> std::result::Result<T, QueryFailure>,
    {
        let _guard = self.span.enter();
        if !self.open.get() {
            // A failed rollback leaves the previous storage transaction running
            if self.conn.is_autocommit() {
                if let Err(e) = self.conn.execute_batch(self.role.begin_statement()) {
                    return Err(translate::storage_error_with(e, attributes));
                }
            }
            self.open.set(true);
        }

        match op(self.conn) {
            Ok(value) => Ok(value),
            Err(QueryFailure::Storage(e)) => Err(translate::translate(self, e, attributes)),
            Err(QueryFailure::Domain(e)) => Err(e),
        }
    }

    /// Roll back the open storage transaction, if any. The transaction stays
    /// marked open when `ROLLBACK` itself fails.
    pub(crate) fn rollback_open(&self) -> rusqlite::Result<()> {
        if !self.open.get() {
            return Ok(());
        }
        // Some errors (SQLITE_FULL, SQLITE_NOMEM, ...) already rolled back
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
            metrics::record_rollback();
        }
        self.open.set(false);
        Ok(())
    }
}

impl Drop for DbTransaction<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.rollback_open() {
            warn!("rollback on transaction drop failed: {}", e);
        }
    }
}

/// Failure raised inside a [`DbTransaction::run`] closure.
pub(crate) enum QueryFailure {
    Storage(rusqlite::Error),
    Domain(DatabaseError),
}

impl From<rusqlite::Error> for QueryFailure {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e)
    }
}

impl From<DatabaseError> for QueryFailure {
    fn from(e: DatabaseError) -> Self {
        Self::Domain(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    #[test]
    fn actor_defaults_to_system() {
        assert_eq!(Actor::default(), Actor::System);
    }

    #[test]
    fn lazy_begin_reuses_a_storage_transaction_that_is_still_running() {
        let conn = Connection::open_in_memory().unwrap();
        let clock = SystemClock;
        let tx = DbTransaction::begin(&conn, Role::ReadWrite, &clock).unwrap();

        // As left behind by a ROLLBACK that failed
        tx.open.set(false);
        assert!(!conn.is_autocommit());

        tx.run(&Attributes::new(), |conn| {
            Ok(conn.execute_batch("CREATE TABLE scratch (x INTEGER)")?)
        })
        .unwrap();
        assert!(tx.open.get());

        tx.rollback_open().unwrap();
        assert!(!tx.open.get());
        assert!(conn.is_autocommit());
        let tables: i64 = conn
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE name = 'scratch'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(tables, 0);
    }

    #[test]
    fn only_read_write_takes_the_write_lock_up_front() {
        assert_eq!(Role::ReadWrite.begin_statement(), "BEGIN IMMEDIATE");
        assert_eq!(Role::ReadOnly.begin_statement(), "BEGIN DEFERRED");
        assert_eq!(Role::None.begin_statement(), "BEGIN DEFERRED");
    }
}

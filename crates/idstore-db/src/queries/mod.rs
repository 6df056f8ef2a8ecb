//! Typed query services bound to an open [`DbTransaction`].

mod admins;
mod audit;
mod emails;
mod maintenance;
mod users;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use idstore_types::api::{AccountColumn, AccountColumnOrdering, TimeRange};
use idstore_types::models::EmailOwner;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

pub use admins::AdminQueries;
pub use audit::AuditQueries;
pub use emails::EmailQueries;
pub use maintenance::{MaintenanceQueries, MaintenanceReport};
pub use users::UserQueries;

use crate::error::{DatabaseError, ErrorKind};
use crate::models::{SUMMARY_COLUMNS, millis, uuid_at};
use crate::pager::{Filter, KeysetQuery, OrderTerm};
use crate::session::DbTransaction;

/// The query capabilities a transaction can hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryClass {
    Admins,
    Users,
    Emails,
    Audit,
    Maintenance,
}

impl QueryClass {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Admins => "admins",
            Self::Users => "users",
            Self::Emails => "emails",
            Self::Audit => "audit",
            Self::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for QueryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolves capability names used by dynamically wired callers.
impl FromStr for QueryClass {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admins" => Ok(Self::Admins),
            "users" => Ok(Self::Users),
            "emails" => Ok(Self::Emails),
            "audit" => Ok(Self::Audit),
            "maintenance" => Ok(Self::Maintenance),
            other => Err(DatabaseError::new(
                ErrorKind::SqlErrorUnsupportedQueryClass,
                format!("Unsupported query class: {}", other),
            )
            .with_attribute("query_class", other)),
        }
    }
}

pub enum QueryService<'a> {
    Admins(AdminQueries<'a>),
    Users(UserQueries<'a>),
    Emails(EmailQueries<'a>),
    Audit(AuditQueries<'a>),
    Maintenance(MaintenanceQueries<'a>),
}

impl<'c> DbTransaction<'c> {
    pub fn admins(&self) -> AdminQueries<'_> {
        AdminQueries::new(self)
    }

    pub fn users(&self) -> UserQueries<'_> {
        UserQueries::new(self)
    }

    pub fn emails(&self) -> EmailQueries<'_> {
        EmailQueries::new(self)
    }

    pub fn audit(&self) -> AuditQueries<'_> {
        AuditQueries::new(self)
    }

    pub fn maintenance(&self) -> MaintenanceQueries<'_> {
        MaintenanceQueries::new(self)
    }

    pub fn queries(&self, class: QueryClass) -> QueryService<'_> {
        match class {
            QueryClass::Admins => QueryService::Admins(self.admins()),
            QueryClass::Users => QueryService::Users(self.users()),
            QueryClass::Emails => QueryService::Emails(self.emails()),
            QueryClass::Audit => QueryService::Audit(self.audit()),
            QueryClass::Maintenance => QueryService::Maintenance(self.maintenance()),
        }
    }
}

// -- Shared helpers --

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AccountTable {
    Admins,
    Users,
}

impl AccountTable {
    fn table(self) -> &'static str {
        match self {
            Self::Admins => "admins",
            Self::Users => "users",
        }
    }

    fn email_owner_column(self) -> &'static str {
        match self {
            Self::Admins => "admin_id",
            Self::Users => "user_id",
        }
    }
}

/// Whether `id` was ever issued to an admin or a user.
pub(crate) fn account_id_taken(conn: &Connection, id: Uuid) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM accounts WHERE id = ?1)",
        [id.to_string()],
        |r| r.get(0),
    )
}

pub(crate) fn id_name_taken(conn: &Connection, table: AccountTable, id_name: &str) -> rusqlite::Result<bool> {
    let sql = format!("SELECT EXISTS (SELECT 1 FROM {} WHERE id_name = ?1)", table.table());
    conn.query_row(&sql, [id_name], |r| r.get(0))
}

pub(crate) fn account_exists(conn: &Connection, table: AccountTable, id: Uuid) -> rusqlite::Result<bool> {
    let sql = format!("SELECT EXISTS (SELECT 1 FROM {} WHERE id = ?1)", table.table());
    conn.query_row(&sql, [id.to_string()], |r| r.get(0))
}

/// Owner of `email`, compared case-insensitively.
pub(crate) fn email_owner(conn: &Connection, email: &str) -> rusqlite::Result<Option<EmailOwner>> {
    conn.query_row(
        "SELECT admin_id, user_id FROM emails WHERE lower(email_address) = lower(?1)",
        [email],
        |row| {
            if row.get::<_, Option<String>>(0)?.is_some() {
                Ok(EmailOwner::Admin(uuid_at(row, 0)?))
            } else {
                Ok(EmailOwner::User(uuid_at(row, 1)?))
            }
        },
    )
    .optional()
}

pub(crate) fn account_emails(conn: &Connection, table: AccountTable, id: Uuid) -> rusqlite::Result<Vec<String>> {
    let sql = format!(
        "SELECT email_address FROM emails WHERE {} = ?1 ORDER BY email_address",
        table.email_owner_column()
    );
    let mut stmt = conn.prepare(&sql)?;
    let emails = stmt
        .query_map([id.to_string()], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(emails)
}

pub(crate) fn email_insert(conn: &Connection, table: AccountTable, id: Uuid, email: &str) -> rusqlite::Result<()> {
    let sql = format!(
        "INSERT INTO emails (email_address, {}) VALUES (?1, ?2)",
        table.email_owner_column()
    );
    conn.execute(&sql, [email.to_string(), id.to_string()])?;
    Ok(())
}

/// Returns the number of rows removed; zero when `id` does not own `email`.
pub(crate) fn email_delete(conn: &Connection, table: AccountTable, id: Uuid, email: &str) -> rusqlite::Result<usize> {
    let sql = format!(
        "DELETE FROM emails WHERE {} = ?1 AND lower(email_address) = lower(?2)",
        table.email_owner_column()
    );
    conn.execute(&sql, [id.to_string(), email.to_string()])
}

pub(crate) fn touch(conn: &Connection, table: AccountTable, id: Uuid, now: DateTime<Utc>) -> rusqlite::Result<()> {
    let sql = format!("UPDATE {} SET time_updated = ?1 WHERE id = ?2", table.table());
    conn.execute(&sql, rusqlite::params![millis(now), id.to_string()])?;
    Ok(())
}

fn ordering_term(ordering: AccountColumnOrdering) -> OrderTerm {
    let expr = match ordering.column {
        AccountColumn::ById => "id",
        AccountColumn::ByIdName => "id_name",
        AccountColumn::ByRealName => "real_name",
        AccountColumn::ByTimeCreated => "time_created",
        AccountColumn::ByTimeUpdated => "time_updated",
    };
    OrderTerm::new(expr, ordering.ascending)
}

/// The row set behind admin and user searches.
pub(crate) fn account_search(
    table: AccountTable,
    time_created: TimeRange,
    time_updated: TimeRange,
    search: Option<&str>,
    email: Option<&str>,
    ordering: AccountColumnOrdering,
) -> KeysetQuery {
    let mut filter = Filter::new()
        .and(
            "time_created >= ? AND time_created <= ?",
            [
                Value::Integer(millis(time_created.lower)),
                Value::Integer(millis(time_created.upper)),
            ],
        )
        .and(
            "time_updated >= ? AND time_updated <= ?",
            [
                Value::Integer(millis(time_updated.lower)),
                Value::Integer(millis(time_updated.upper)),
            ],
        );

    if let Some(search) = search.filter(|s| !s.is_empty()) {
        let needle = Value::Text(search.to_lowercase());
        filter = filter.and(
            "instr(lower(id_name), ?) > 0 OR instr(lower(real_name), ?) > 0 OR instr(lower(id), ?) > 0",
            [needle.clone(), needle.clone(), needle],
        );
    }

    if let Some(email) = email {
        filter = filter.and(
            format!(
                "id IN (SELECT {} FROM emails WHERE instr(lower(email_address), ?) > 0)",
                table.email_owner_column()
            ),
            [Value::Text(email.to_lowercase())],
        );
    }

    let mut order = vec![ordering_term(ordering)];
    if ordering.column != AccountColumn::ById {
        order.push(OrderTerm::asc("id"));
    }

    KeysetQuery {
        columns: SUMMARY_COLUMNS,
        from: table.table(),
        filter,
        order,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_query_class_is_unsupported() {
        let e = "widgets".parse::<QueryClass>().unwrap_err();
        assert_eq!(e.kind(), ErrorKind::SqlErrorUnsupportedQueryClass);
        assert_eq!("audit".parse::<QueryClass>().unwrap(), QueryClass::Audit);
    }

    #[test]
    fn names_round_trip() {
        for class in [
            QueryClass::Admins,
            QueryClass::Users,
            QueryClass::Emails,
            QueryClass::Audit,
            QueryClass::Maintenance,
        ] {
            assert_eq!(class.name().parse::<QueryClass>().unwrap(), class);
        }
    }

    #[test]
    fn account_search_appends_id_tie_breaker() {
        let q = account_search(
            AccountTable::Users,
            TimeRange::largest(),
            TimeRange::largest(),
            None,
            None,
            AccountColumnOrdering {
                column: AccountColumn::ByTimeCreated,
                ascending: false,
            },
        );
        assert_eq!(q.order, vec![OrderTerm::new("time_created", false), OrderTerm::asc("id")]);

        let q = account_search(
            AccountTable::Admins,
            TimeRange::largest(),
            TimeRange::largest(),
            None,
            None,
            AccountColumnOrdering {
                column: AccountColumn::ById,
                ascending: true,
            },
        );
        assert_eq!(q.order, vec![OrderTerm::asc("id")]);
    }
}

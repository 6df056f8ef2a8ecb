//! Column codecs and row mappers. Timestamps are stored as UTC milliseconds,
//! ids as hyphenated UUID text.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use idstore_types::models::{
    Admin, AdminSummary, AuditEvent, Ban, EmailVerification, EmailVerificationOperation,
    LoginRecord, User, UserEmail, UserSummary,
};
use idstore_types::password::{Password, PasswordAlgorithm};
use idstore_types::permissions::decode_permissions;
use idstore_types::token::Token;
use rusqlite::Row;
use rusqlite::types::{FromSqlError, Type};
use uuid::Uuid;

fn conversion_error(
    idx: usize,
    ty: Type,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(e))
}

pub(crate) fn millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

pub(crate) fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text).map_err(|e| conversion_error(idx, Type::Text, e))
}

pub(crate) fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

pub(crate) fn optional_time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(ms) => DateTime::from_timestamp_millis(ms)
            .map(Some)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms)),
        None => Ok(None),
    }
}

/// Reads `algo, hash, salt` starting at `idx`.
pub(crate) fn password_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Password> {
    let algo: String = row.get(idx)?;
    let algorithm =
        PasswordAlgorithm::parse(&algo).map_err(|e| conversion_error(idx, Type::Text, e))?;
    Ok(Password {
        algorithm,
        hash: row.get(idx + 1)?,
        salt: row.get(idx + 2)?,
    })
}

fn token_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Token> {
    let text: String = row.get(idx)?;
    Token::parse(&text).map_err(|e| conversion_error(idx, Type::Text, e))
}

/// Columns shared by full admin and user loads. Emails are loaded separately.
pub(crate) const ACCOUNT_COLUMNS: &str =
    "id, id_name, real_name, time_created, time_updated, password_algo, password_hash, password_salt";

/// Expects [`ACCOUNT_COLUMNS`] followed by `permissions`.
pub(crate) fn admin_row(row: &Row<'_>) -> rusqlite::Result<Admin> {
    let permissions: String = row.get(8)?;
    Ok(Admin {
        id: uuid_at(row, 0)?,
        id_name: row.get(1)?,
        real_name: row.get(2)?,
        emails: Vec::new(),
        time_created: time_at(row, 3)?,
        time_updated: time_at(row, 4)?,
        password: password_at(row, 5)?,
        permissions: decode_permissions(&permissions)
            .map_err(|e| conversion_error(8, Type::Text, e))?,
    })
}

pub(crate) fn user_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_at(row, 0)?,
        id_name: row.get(1)?,
        real_name: row.get(2)?,
        emails: Vec::new(),
        time_created: time_at(row, 3)?,
        time_updated: time_at(row, 4)?,
        password: password_at(row, 5)?,
    })
}

/// Columns shared by the admin and user search mappers.
pub(crate) const SUMMARY_COLUMNS: &str = "id, id_name, real_name, time_created, time_updated";

pub(crate) fn admin_summary(row: &Row<'_>) -> rusqlite::Result<AdminSummary> {
    Ok(AdminSummary {
        id: uuid_at(row, 0)?,
        id_name: row.get(1)?,
        real_name: row.get(2)?,
        time_created: time_at(row, 3)?,
        time_updated: time_at(row, 4)?,
    })
}

pub(crate) fn user_summary(row: &Row<'_>) -> rusqlite::Result<UserSummary> {
    Ok(UserSummary {
        id: uuid_at(row, 0)?,
        id_name: row.get(1)?,
        real_name: row.get(2)?,
        time_created: time_at(row, 3)?,
        time_updated: time_at(row, 4)?,
    })
}

pub(crate) const AUDIT_COLUMNS: &str = "id, time, owner, type, message, attributes";

pub(crate) fn audit_event(row: &Row<'_>) -> rusqlite::Result<AuditEvent> {
    let attributes: String = row.get(5)?;
    let attributes: BTreeMap<String, String> =
        serde_json::from_str(&attributes).map_err(|e| conversion_error(5, Type::Text, e))?;
    Ok(AuditEvent {
        id: row.get(0)?,
        time: time_at(row, 1)?,
        owner: uuid_at(row, 2)?,
        kind: row.get(3)?,
        message: row.get(4)?,
        attributes,
    })
}

pub(crate) const USER_EMAIL_COLUMNS: &str = "email_address, user_id";

pub(crate) fn user_email(row: &Row<'_>) -> rusqlite::Result<UserEmail> {
    Ok(UserEmail {
        email: row.get(0)?,
        user: uuid_at(row, 1)?,
    })
}

pub(crate) const BAN_COLUMNS: &str = "user_id, reason, expires";

pub(crate) fn ban(row: &Row<'_>) -> rusqlite::Result<Ban> {
    Ok(Ban {
        user: uuid_at(row, 0)?,
        reason: row.get(1)?,
        expires: optional_time_at(row, 2)?,
    })
}

pub(crate) const LOGIN_COLUMNS: &str = "user_id, time, host, user_agent";

pub(crate) fn login_record(row: &Row<'_>) -> rusqlite::Result<LoginRecord> {
    Ok(LoginRecord {
        user: uuid_at(row, 0)?,
        time: time_at(row, 1)?,
        host: row.get(2)?,
        user_agent: row.get(3)?,
    })
}

pub(crate) const VERIFICATION_COLUMNS: &str =
    "user_id, email_address, token_permit, token_deny, operation, expires";

pub(crate) fn email_verification(row: &Row<'_>) -> rusqlite::Result<EmailVerification> {
    let operation: String = row.get(4)?;
    Ok(EmailVerification {
        user: uuid_at(row, 0)?,
        email: row.get(1)?,
        token_permit: token_at(row, 2)?,
        token_deny: token_at(row, 3)?,
        operation: EmailVerificationOperation::parse(&operation)
            .ok_or_else(|| conversion_error(4, Type::Text, FromSqlError::InvalidType))?,
        expires: time_at(row, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn optional_times_read_null_as_none() {
        let conn = Connection::open_in_memory().unwrap();
        let (none, some) = conn
            .query_row("SELECT NULL, 1700000000123", [], |r| {
                Ok((optional_time_at(r, 0)?, optional_time_at(r, 1)?))
            })
            .unwrap();
        assert_eq!(none, None);
        assert_eq!(some.map(millis), Some(1_700_000_000_123));
    }

    #[test]
    fn unknown_operations_fail_conversion() {
        let conn = Connection::open_in_memory().unwrap();
        let token = Token::generate();
        let result = conn.query_row(
            "SELECT ?1, 'a@example.com', ?2, ?2, 'RENAME', 0",
            [uuid::Uuid::nil().to_string(), token.as_str().to_string()],
            email_verification,
        );
        assert!(matches!(result, Err(rusqlite::Error::FromSqlConversionFailure(4, _, _))));
    }
}

//! Storage failure → [`ErrorKind`] translation.
//!
//! Classification is a pure function of the SQLite result code and the name of
//! the violated constraint. The schema names its constraints so that the table
//! below can tell relationships apart (see `migrations.rs`).

use idstore_types::password::PasswordError;
use rusqlite::{ErrorCode, ffi};
use tracing::warn;

use crate::error::{Attributes, DatabaseError, ErrorKind};
use crate::session::DbTransaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureClass {
    UniqueViolation,
    ForeignKeyViolation,
    CheckViolation,
    /// `RAISE(ABORT, '<constraint>')` from one of the schema's triggers.
    TriggerRaised,
    InsufficientPrivilege,
    /// A stored password record could not be decoded.
    Password,
    Other,
}

const UNIQUE_PREFIX: &str = "UNIQUE constraint failed: ";
const CHECK_PREFIX: &str = "CHECK constraint failed: ";

pub(crate) fn classify(error: &rusqlite::Error) -> (FailureClass, Option<String>) {
    match error {
        rusqlite::Error::SqliteFailure(e, message) => match e.code {
            ErrorCode::ConstraintViolation => match e.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => (
                    FailureClass::UniqueViolation,
                    message
                        .as_deref()
                        .and_then(|m| m.strip_prefix(UNIQUE_PREFIX))
                        .map(str::to_string),
                ),
                ffi::SQLITE_CONSTRAINT_TRIGGER => (FailureClass::TriggerRaised, message.clone()),
                ffi::SQLITE_CONSTRAINT_FOREIGNKEY => (FailureClass::ForeignKeyViolation, None),
                ffi::SQLITE_CONSTRAINT_CHECK => (
                    FailureClass::CheckViolation,
                    message
                        .as_deref()
                        .and_then(|m| m.strip_prefix(CHECK_PREFIX))
                        .map(str::to_string),
                ),
                _ => (FailureClass::Other, None),
            },
            ErrorCode::ReadOnly
            | ErrorCode::AuthorizationForStatementDenied
            | ErrorCode::PermissionDenied => (FailureClass::InsufficientPrivilege, None),
            _ => (FailureClass::Other, None),
        },
        rusqlite::Error::FromSqlConversionFailure(_, _, source)
            if source.downcast_ref::<PasswordError>().is_some() =>
        {
            (FailureClass::Password, None)
        }
        _ => (FailureClass::Other, None),
    }
}

/// The fixed translation table.
pub(crate) fn kind_for(class: FailureClass, constraint: Option<&str>) -> Option<ErrorKind> {
    match (class, constraint) {
        (FailureClass::TriggerRaised, Some("emails_admin_exists")) => {
            Some(ErrorKind::AdminNonexistent)
        }
        (
            FailureClass::TriggerRaised,
            Some(
                "emails_user_exists"
                | "email_verifications_user_exists"
                | "bans_user_exists"
                | "user_logins_user_exists",
            ),
        ) => Some(ErrorKind::UserNonexistent),
        (FailureClass::TriggerRaised, Some("emails_one_required")) => {
            Some(ErrorKind::EmailOneRequired)
        }

        (FailureClass::UniqueViolation, Some("admins.id")) => Some(ErrorKind::AdminDuplicateId),
        (FailureClass::UniqueViolation, Some("users.id")) => Some(ErrorKind::UserDuplicateId),
        (FailureClass::UniqueViolation, Some("accounts.id")) => {
            Some(ErrorKind::AccountDuplicateId)
        }
        (FailureClass::UniqueViolation, Some("admins.id_name")) => {
            Some(ErrorKind::AdminDuplicateIdName)
        }
        (FailureClass::UniqueViolation, Some("users.id_name")) => {
            Some(ErrorKind::UserDuplicateIdName)
        }
        (FailureClass::UniqueViolation, Some("index 'emails_address_unique'")) => {
            Some(ErrorKind::EmailDuplicate)
        }
        (
            FailureClass::UniqueViolation,
            Some("email_verifications.token_permit" | "email_verifications.token_deny"),
        ) => Some(ErrorKind::EmailVerificationDuplicate),

        (FailureClass::InsufficientPrivilege, _) => Some(ErrorKind::OperationNotPermitted),
        (FailureClass::Password, _) => Some(ErrorKind::PasswordError),
        _ => None,
    }
}

fn message_for(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::AccountDuplicateId => "An account with this ID already exists.",
        ErrorKind::AdminDuplicateId => "An admin with this ID already exists.",
        ErrorKind::AdminDuplicateIdName => "An admin with this name already exists.",
        ErrorKind::AdminNonexistent => "Admin does not exist.",
        ErrorKind::EmailDuplicate => "Email already exists.",
        ErrorKind::EmailOneRequired => "At least one email address is required.",
        ErrorKind::EmailVerificationDuplicate => "Email verification token is already in use.",
        ErrorKind::OperationNotPermitted => "Operation not permitted.",
        ErrorKind::PasswordError => "Stored password record is unusable.",
        ErrorKind::UserDuplicateId => "A user with this ID already exists.",
        ErrorKind::UserDuplicateIdName => "A user with this name already exists.",
        ErrorKind::UserNonexistent => "User does not exist.",
        _ => "Database error.",
    }
}

fn remediation_for(kind: ErrorKind) -> Option<&'static str> {
    match kind {
        ErrorKind::EmailOneRequired => {
            Some("Add another email address to the account before removing this one.")
        }
        ErrorKind::EmailDuplicate => Some("Use a different email address."),
        ErrorKind::AdminDuplicateIdName | ErrorKind::UserDuplicateIdName => {
            Some("Choose a different name.")
        }
        ErrorKind::OperationNotPermitted => {
            Some("Use a connection opened with a role that allows this operation.")
        }
        _ => None,
    }
}

/// Classify a storage failure without touching any transaction.
pub(crate) fn storage_error(error: rusqlite::Error) -> DatabaseError {
    storage_error_with(error, &Attributes::new())
}

pub(crate) fn storage_error_with(error: rusqlite::Error, attributes: &Attributes) -> DatabaseError {
    let (class, constraint) = classify(&error);
    let result = match kind_for(class, constraint.as_deref()) {
        Some(kind) => {
            let e = DatabaseError::new(kind, message_for(kind));
            match remediation_for(kind) {
                Some(hint) => e.with_remediation(hint),
                None => e,
            }
        }
        None => DatabaseError::new(ErrorKind::SqlError, error.to_string()),
    };
    result.with_attributes(attributes.clone()).with_source(error)
}

/// Classify a failure raised inside `tx`, then roll `tx` back. A failing
/// rollback is attached to the primary error, which is then not marked
/// rolled back.
pub(crate) fn translate(
    tx: &DbTransaction<'_>,
    error: rusqlite::Error,
    attributes: &Attributes,
) -> DatabaseError {
    let primary = storage_error_with(error, attributes);
    match tx.rollback_open() {
        Ok(()) => primary.with_rolled_back(),
        Err(rollback) => {
            warn!("rollback after {} failed: {}", primary.kind(), rollback);
            primary.with_rollback_failure(rollback)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(extended_code: i32, message: &str) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(ffi::Error::new(extended_code), Some(message.to_string()))
    }

    #[test]
    fn unique_violations_map_by_constraint() {
        let cases = [
            ("UNIQUE constraint failed: users.id_name", ErrorKind::UserDuplicateIdName),
            ("UNIQUE constraint failed: admins.id_name", ErrorKind::AdminDuplicateIdName),
            ("UNIQUE constraint failed: index 'emails_address_unique'", ErrorKind::EmailDuplicate),
            (
                "UNIQUE constraint failed: email_verifications.token_deny",
                ErrorKind::EmailVerificationDuplicate,
            ),
        ];
        for (message, kind) in cases {
            let e = storage_error(failure(ffi::SQLITE_CONSTRAINT_UNIQUE, message));
            assert_eq!(e.kind(), kind, "{}", message);
        }
    }

    #[test]
    fn primary_key_violations_map_by_table() {
        let e = storage_error(failure(
            ffi::SQLITE_CONSTRAINT_PRIMARYKEY,
            "UNIQUE constraint failed: users.id",
        ));
        assert_eq!(e.kind(), ErrorKind::UserDuplicateId);

        let e = storage_error(failure(
            ffi::SQLITE_CONSTRAINT_PRIMARYKEY,
            "UNIQUE constraint failed: admins.id",
        ));
        assert_eq!(e.kind(), ErrorKind::AdminDuplicateId);
    }

    #[test]
    fn trigger_names_map_to_kinds() {
        let e = storage_error(failure(ffi::SQLITE_CONSTRAINT_TRIGGER, "emails_admin_exists"));
        assert_eq!(e.kind(), ErrorKind::AdminNonexistent);

        let e = storage_error(failure(ffi::SQLITE_CONSTRAINT_TRIGGER, "bans_user_exists"));
        assert_eq!(e.kind(), ErrorKind::UserNonexistent);

        let e = storage_error(failure(ffi::SQLITE_CONSTRAINT_TRIGGER, "emails_one_required"));
        assert_eq!(e.kind(), ErrorKind::EmailOneRequired);
        assert!(e.remediation().is_some());
    }

    #[test]
    fn privilege_failures_are_not_permitted() {
        let readonly = storage_error(failure(ffi::SQLITE_READONLY, "attempt to write a readonly database"));
        assert_eq!(readonly.kind(), ErrorKind::OperationNotPermitted);

        let denied = storage_error(failure(ffi::SQLITE_AUTH, "not authorized"));
        assert_eq!(denied.kind(), ErrorKind::OperationNotPermitted);
    }

    #[test]
    fn unknown_failures_keep_the_original_message() {
        let e = storage_error(failure(ffi::SQLITE_CONSTRAINT_UNIQUE, "UNIQUE constraint failed: widgets.x"));
        assert_eq!(e.kind(), ErrorKind::SqlError);
        assert!(e.message().contains("widgets.x"));

        let e = storage_error(rusqlite::Error::QueryReturnedNoRows);
        assert_eq!(e.kind(), ErrorKind::SqlError);
    }

    #[test]
    fn unnamed_foreign_keys_degrade_to_sql_error() {
        let e = storage_error(failure(ffi::SQLITE_CONSTRAINT_FOREIGNKEY, "FOREIGN KEY constraint failed"));
        assert_eq!(e.kind(), ErrorKind::SqlError);
    }

    #[test]
    fn attributes_are_carried() {
        let mut attrs = Attributes::new();
        attrs.insert("user".into(), "u1".into());
        let e = storage_error_with(failure(ffi::SQLITE_CONSTRAINT_TRIGGER, "emails_user_exists"), &attrs);
        assert_eq!(e.attributes().get("user").map(String::as_str), Some("u1"));
    }
}

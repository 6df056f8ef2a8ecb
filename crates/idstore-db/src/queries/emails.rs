use chrono::{DateTime, Utc};
use idstore_types::events::AuditEventKind;
use idstore_types::models::{
    EmailOwner, EmailVerification, EmailVerificationOperation, EmailVerificationResolution,
};
use idstore_types::token::Token;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::instrument;

use super::audit::record;
use super::users::{add_email, remove_email};
use super::{AccountTable, account_exists, email_owner};
use crate::error::{Attributes, DatabaseError, ErrorKind, Result, attributes};
use crate::models::{VERIFICATION_COLUMNS, email_verification, millis};
use crate::session::{DbTransaction, QueryFailure};

/// Which token column a lookup matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenColumn {
    Permit,
    Deny,
    Either,
}

impl TokenColumn {
    fn predicate(self) -> &'static str {
        match self {
            Self::Permit => "token_permit = ?1",
            Self::Deny => "token_deny = ?1",
            Self::Either => "(token_permit = ?1 OR token_deny = ?1)",
        }
    }

    fn for_resolution(resolution: EmailVerificationResolution) -> Self {
        match resolution {
            EmailVerificationResolution::Permitted => Self::Permit,
            EmailVerificationResolution::Denied => Self::Deny,
            EmailVerificationResolution::Expired => Self::Either,
        }
    }
}

fn resolution_kind(resolution: EmailVerificationResolution) -> AuditEventKind {
    match resolution {
        EmailVerificationResolution::Permitted => AuditEventKind::EmailVerificationPermitted,
        EmailVerificationResolution::Denied => AuditEventKind::EmailVerificationDenied,
        EmailVerificationResolution::Expired => AuditEventKind::EmailVerificationExpired,
    }
}

/// Email ownership lookups and the add/remove verification challenge.
pub struct EmailQueries<'a> {
    tx: &'a DbTransaction<'a>,
}

impl<'a> EmailQueries<'a> {
    pub(crate) fn new(tx: &'a DbTransaction<'a>) -> Self {
        Self { tx }
    }

    /// Who owns `email`, if anyone. Case-insensitive.
    pub fn exists(&self, email: &str) -> Result<Option<EmailOwner>> {
        let attrs = attributes([("email", email.to_string())]);
        self.tx.run(&attrs, |conn| Ok(email_owner(conn, email)?))
    }

    /// Record a pending verification. Tokens must be distinct from each other
    /// and from every token already stored, in either column.
    #[instrument(level = "debug", skip_all, fields(user = %verification.user))]
    pub fn verification_create(&self, verification: &EmailVerification) -> Result<()> {
        let executor = self.tx.executor_id()?;
        let now = self.tx.now();
        let attrs = attributes([
            ("user", verification.user.to_string()),
            ("email", verification.email.clone()),
        ]);

        self.tx.run(&attrs, |conn| {
            let permit = verification.token_permit.as_str();
            let deny = verification.token_deny.as_str();

            if !account_exists(conn, AccountTable::Users, verification.user)? {
                return Err(DatabaseError::new(ErrorKind::UserNonexistent, "User does not exist.")
                    .with_attributes(attrs.clone())
                    .into());
            }

            let in_use: bool = conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM email_verifications \
                 WHERE token_permit IN (?1, ?2) OR token_deny IN (?1, ?2))",
                [permit, deny],
                |r| r.get(0),
            )?;
            if permit == deny || in_use {
                return Err(duplicate(&attrs).into());
            }

            conn.execute(
                "INSERT INTO email_verifications \
                 (user_id, email_address, token_permit, token_deny, operation, expires) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    verification.user.to_string(),
                    verification.email,
                    permit,
                    deny,
                    verification.operation.as_str(),
                    millis(verification.expires),
                ],
            )?;

            let mut event = verification_attributes(verification);
            event.insert("token_permit".to_string(), permit.to_string());
            event.insert("token_deny".to_string(), deny.to_string());
            record(
                conn,
                now,
                executor,
                AuditEventKind::EmailVerificationCreated,
                &format!(
                    "Email verification ({}) created for {}.",
                    verification.operation.as_str(),
                    verification.email
                ),
                event,
            )?;
            Ok(())
        })
    }

    pub fn verification_get_permit(&self, token: &Token) -> Result<Option<EmailVerification>> {
        self.tx
            .run(&Attributes::new(), |conn| Ok(load(conn, TokenColumn::Permit, token)?))
    }

    pub fn verification_get_deny(&self, token: &Token) -> Result<Option<EmailVerification>> {
        self.tx
            .run(&Attributes::new(), |conn| Ok(load(conn, TokenColumn::Deny, token)?))
    }

    /// Delete the verification holding `token` and audit how it was closed.
    /// `Expired` matches either token column.
    #[instrument(level = "debug", skip_all, fields(resolution = ?resolution))]
    pub fn verification_delete(
        &self,
        token: &Token,
        resolution: EmailVerificationResolution,
    ) -> Result<()> {
        let now = self.tx.now();

        self.tx.run(&Attributes::new(), |conn| {
            let verification = load(conn, TokenColumn::for_resolution(resolution), token)?
                .ok_or_else(missing)?;
            close(conn, now, &verification, resolution)?;
            Ok(())
        })
    }

    /// Pending verifications of the acting admin or user.
    pub fn verification_count(&self) -> Result<u64> {
        let executor = self.tx.executor_id()?;
        let attrs = attributes([("user", executor.to_string())]);
        self.tx.run(&attrs, |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM email_verifications WHERE user_id = ?1",
                [executor.to_string()],
                |r| r.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
    }

    /// Carry out the pending operation named by a permit token.
    #[instrument(level = "debug", skip_all, fields(operation = operation.as_str()))]
    pub fn verification_permit(
        &self,
        token: &Token,
        operation: EmailVerificationOperation,
    ) -> Result<EmailVerification> {
        let now = self.tx.now();

        self.tx.run(&Attributes::new(), |conn| {
            let verification = resolvable(conn, TokenColumn::Permit, token, operation, now)?;
            let attrs = verification_attributes(&verification);

            match verification.operation {
                EmailVerificationOperation::Add => {
                    add_email(conn, now, verification.user, verification.user, &verification.email)?
                }
                EmailVerificationOperation::Remove => remove_email(
                    conn,
                    now,
                    verification.user,
                    verification.user,
                    &verification.email,
                    &attrs,
                )?,
            }

            close(conn, now, &verification, EmailVerificationResolution::Permitted)?;
            Ok(verification)
        })
    }

    /// Reject the pending operation named by a deny token.
    #[instrument(level = "debug", skip_all, fields(operation = operation.as_str()))]
    pub fn verification_deny(
        &self,
        token: &Token,
        operation: EmailVerificationOperation,
    ) -> Result<EmailVerification> {
        let now = self.tx.now();

        self.tx.run(&Attributes::new(), |conn| {
            let verification = resolvable(conn, TokenColumn::Deny, token, operation, now)?;
            close(conn, now, &verification, EmailVerificationResolution::Denied)?;
            Ok(verification)
        })
    }
}

fn duplicate(attrs: &Attributes) -> DatabaseError {
    DatabaseError::new(
        ErrorKind::EmailVerificationDuplicate,
        "Email verification token is already in use.",
    )
    .with_attributes(attrs.clone())
}

fn missing() -> DatabaseError {
    DatabaseError::new(
        ErrorKind::EmailVerificationNonexistent,
        "No email verification exists for this token.",
    )
}

fn verification_attributes(verification: &EmailVerification) -> Attributes {
    attributes([
        ("user", verification.user.to_string()),
        ("email", verification.email.clone()),
        ("operation", verification.operation.as_str().to_string()),
        ("expires", verification.expires.to_rfc3339()),
    ])
}

fn load(
    conn: &Connection,
    column: TokenColumn,
    token: &Token,
) -> rusqlite::Result<Option<EmailVerification>> {
    let sql = format!(
        "SELECT {} FROM email_verifications WHERE {}",
        VERIFICATION_COLUMNS,
        column.predicate()
    );
    conn.query_row(&sql, [token.as_str()], email_verification)
        .optional()
}

/// Look up a verification that may still be acted upon.
fn resolvable(
    conn: &Connection,
    column: TokenColumn,
    token: &Token,
    operation: EmailVerificationOperation,
    now: DateTime<Utc>,
) -> std::result::Result<EmailVerification, QueryFailure> {
    let verification = load(conn, column, token)?.ok_or_else(missing)?;
    let attrs = verification_attributes(&verification);

    if verification.operation != operation {
        return Err(DatabaseError::new(
            ErrorKind::EmailVerificationOperationMismatch,
            format!(
                "The verification is for {}, not {}.",
                verification.operation.as_str(),
                operation.as_str()
            ),
        )
        .with_attributes(attrs)
        .into());
    }
    if verification.expires < now {
        return Err(DatabaseError::new(
            ErrorKind::EmailVerificationExpired,
            "The email verification has expired.",
        )
        .with_attributes(attrs)
        .with_remediation("Request a new verification.")
        .into());
    }
    Ok(verification)
}

/// Delete `verification` and append the resolution event, owned by the
/// verification's user.
fn close(
    conn: &Connection,
    now: DateTime<Utc>,
    verification: &EmailVerification,
    resolution: EmailVerificationResolution,
) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM email_verifications WHERE token_permit = ?1",
        [verification.token_permit.as_str()],
    )?;
    let kind = resolution_kind(resolution);
    record(
        conn,
        now,
        verification.user,
        kind,
        &format!("Email verification for {} closed.", verification.email),
        verification_attributes(verification),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_resolution_matches_either_column() {
        assert_eq!(
            TokenColumn::for_resolution(EmailVerificationResolution::Expired).predicate(),
            "(token_permit = ?1 OR token_deny = ?1)"
        );
        assert_eq!(
            TokenColumn::for_resolution(EmailVerificationResolution::Permitted),
            TokenColumn::Permit
        );
        assert_eq!(
            TokenColumn::for_resolution(EmailVerificationResolution::Denied),
            TokenColumn::Deny
        );
    }

    #[test]
    fn resolutions_have_distinct_events() {
        assert_eq!(
            resolution_kind(EmailVerificationResolution::Expired),
            AuditEventKind::EmailVerificationExpired
        );
        assert_ne!(
            resolution_kind(EmailVerificationResolution::Permitted),
            resolution_kind(EmailVerificationResolution::Denied)
        );
    }
}

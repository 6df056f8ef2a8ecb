use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

pub type Attributes = BTreeMap<String, String>;

pub type Result<T, E = DatabaseError> = std::result::Result<T, E>;

/// Build an attribute map from literal keys.
pub fn attributes<const N: usize>(pairs: [(&str, String); N]) -> Attributes {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Closed set of failures the query layer reports.
///
/// Each kind has a stable [`code`](ErrorKind::code) for machine consumers and
/// an HTTP-like [`status`](ErrorKind::status) for the surrounding API layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Identity row collision not attributable to either account table.
    AccountDuplicateId,
    AdminDuplicateId,
    AdminDuplicateIdName,
    AdminNonexistent,
    /// `create_initial` ran against a store that already has admins.
    AdminNotInitial,
    AdminUnset,
    AdminOrUserUnset,
    BanNonexistent,
    EmailDuplicate,
    EmailNonexistent,
    /// The trigger guarding an account's last email fired.
    EmailOneRequired,
    EmailVerificationDuplicate,
    EmailVerificationExpired,
    EmailVerificationNonexistent,
    EmailVerificationOperationMismatch,
    OperationNotPermitted,
    PasswordError,
    SqlError,
    SqlErrorUnsupportedQueryClass,
    UserDuplicateId,
    UserDuplicateIdName,
    UserNonexistent,
    UserUnset,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::AccountDuplicateId => "error-account-duplicate-id",
            Self::AdminDuplicateId => "error-admin-duplicate-id",
            Self::AdminDuplicateIdName => "error-admin-duplicate-id-name",
            Self::AdminNonexistent => "error-admin-nonexistent",
            Self::AdminNotInitial => "error-admin-not-initial",
            Self::AdminUnset => "error-admin-unset",
            Self::AdminOrUserUnset => "error-admin-or-user-unset",
            Self::BanNonexistent => "error-ban-nonexistent",
            Self::EmailDuplicate => "error-email-duplicate",
            Self::EmailNonexistent => "error-email-nonexistent",
            Self::EmailOneRequired => "error-email-one-required",
            Self::EmailVerificationDuplicate => "error-email-verification-duplicate",
            Self::EmailVerificationExpired => "error-email-verification-expired",
            Self::EmailVerificationNonexistent => "error-email-verification-nonexistent",
            Self::EmailVerificationOperationMismatch => {
                "error-email-verification-operation-mismatch"
            }
            Self::OperationNotPermitted => "error-operation-not-permitted",
            Self::PasswordError => "error-password",
            Self::SqlError => "error-sql",
            Self::SqlErrorUnsupportedQueryClass => "error-sql-unsupported-query-class",
            Self::UserDuplicateId => "error-user-duplicate-id",
            Self::UserDuplicateIdName => "error-user-duplicate-id-name",
            Self::UserNonexistent => "error-user-nonexistent",
            Self::UserUnset => "error-user-unset",
        }
    }

    /// HTTP-like severity for thin clients.
    pub fn status(&self) -> u16 {
        match self {
            Self::AdminNonexistent
            | Self::BanNonexistent
            | Self::EmailNonexistent
            | Self::EmailVerificationNonexistent
            | Self::UserNonexistent => 404,

            Self::AccountDuplicateId
            | Self::AdminDuplicateId
            | Self::AdminDuplicateIdName
            | Self::AdminNotInitial
            | Self::EmailDuplicate
            | Self::EmailVerificationDuplicate
            | Self::UserDuplicateId
            | Self::UserDuplicateIdName => 409,

            Self::EmailOneRequired
            | Self::EmailVerificationExpired
            | Self::EmailVerificationOperationMismatch => 400,

            Self::OperationNotPermitted => 403,

            Self::AdminUnset
            | Self::AdminOrUserUnset
            | Self::PasswordError
            | Self::SqlError
            | Self::SqlErrorUnsupportedQueryClass
            | Self::UserUnset => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The single error type surfaced by the query layer.
///
/// Failures caught by a query's own checks (duplicates found up front,
/// missing rows, unset actor, expired or mismatched verifications) leave the
/// transaction as it was, uncommitted work included. Failures rejected by
/// storage roll back everything since the last commit. [`rolled_back`]
/// tells the two apart.
///
/// [`rolled_back`]: DatabaseError::rolled_back
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct DatabaseError {
    kind: ErrorKind,
    message: String,
    attributes: Attributes,
    remediation: Option<String>,
    #[source]
    source: Option<rusqlite::Error>,
    rolled_back: bool,
    rollback_failure: Option<rusqlite::Error>,
}

impl DatabaseError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            attributes: Attributes::new(),
            remediation: None,
            source: None,
            rolled_back: false,
            rollback_failure: None,
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes.extend(attributes);
        self
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    pub(crate) fn with_source(mut self, source: rusqlite::Error) -> Self {
        self.source = Some(source);
        self
    }

    pub(crate) fn with_rolled_back(mut self) -> Self {
        self.rolled_back = true;
        self
    }

    pub(crate) fn with_rollback_failure(mut self, failure: rusqlite::Error) -> Self {
        self.rollback_failure = Some(failure);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn remediation(&self) -> Option<&str> {
        self.remediation.as_deref()
    }

    /// Whether uncommitted work in the transaction was discarded.
    pub fn rolled_back(&self) -> bool {
        self.rolled_back
    }

    /// Set when rolling back after this error failed too.
    pub fn rollback_failure(&self) -> Option<&rusqlite::Error> {
        self.rollback_failure.as_ref()
    }
}

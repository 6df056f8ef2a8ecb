use std::fmt;

use serde::{Deserialize, Serialize};

/// Audit event type tags written by the query services.
///
/// The audit table stores the tag as text, so events appended by other
/// components may carry tags outside this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventKind {
    /// An administrator account was created (including the initial one)
    AdminCreated,
    AdminChangedIdName,
    AdminChangedRealName,
    AdminChangedPassword,
    AdminChangedPermissions,
    AdminEmailAdded,
    AdminEmailRemoved,
    /// The message carries the remote host
    AdminLoggedIn,

    UserCreated,
    UserChangedIdName,
    UserChangedRealName,
    UserChangedPassword,
    UserEmailAdded,
    UserEmailRemoved,
    /// The message carries the remote host
    UserLoggedIn,
    UserDeleted,
    UserBanned,
    UserBanRemoved,

    /// Tokens are recorded in the attributes, never the message
    EmailVerificationCreated,
    EmailVerificationPermitted,
    EmailVerificationDenied,
    EmailVerificationExpired,
}

impl AuditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdminCreated => "ADMIN_CREATED",
            Self::AdminChangedIdName => "ADMIN_CHANGED_ID_NAME",
            Self::AdminChangedRealName => "ADMIN_CHANGED_REAL_NAME",
            Self::AdminChangedPassword => "ADMIN_CHANGED_PASSWORD",
            Self::AdminChangedPermissions => "ADMIN_CHANGED_PERMISSIONS",
            Self::AdminEmailAdded => "ADMIN_EMAIL_ADDED",
            Self::AdminEmailRemoved => "ADMIN_EMAIL_REMOVED",
            Self::AdminLoggedIn => "ADMIN_LOGGED_IN",
            Self::UserCreated => "USER_CREATED",
            Self::UserChangedIdName => "USER_CHANGED_ID_NAME",
            Self::UserChangedRealName => "USER_CHANGED_REAL_NAME",
            Self::UserChangedPassword => "USER_CHANGED_PASSWORD",
            Self::UserEmailAdded => "USER_EMAIL_ADDED",
            Self::UserEmailRemoved => "USER_EMAIL_REMOVED",
            Self::UserLoggedIn => "USER_LOGGED_IN",
            Self::UserDeleted => "USER_DELETED",
            Self::UserBanned => "USER_BANNED",
            Self::UserBanRemoved => "USER_BAN_REMOVED",
            Self::EmailVerificationCreated => "EMAIL_VERIFICATION_CREATED",
            Self::EmailVerificationPermitted => "EMAIL_VERIFICATION_PERMITTED",
            Self::EmailVerificationDenied => "EMAIL_VERIFICATION_DENIED",
            Self::EmailVerificationExpired => "EMAIL_VERIFICATION_EXPIRED",
        }
    }
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unrecognized admin permission: {0}")]
pub struct PermissionError(pub String);

/// Things an administrator may be allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdminPermission {
    AdminCreate,
    AdminRead,
    AdminWriteCredentials,
    AdminWriteCredentialsSelf,
    AdminWriteEmail,
    AdminWriteEmailSelf,
    AdminWritePermissions,
    AdminWritePermissionsSelf,
    AuditRead,
    UserBan,
    UserCreate,
    UserDelete,
    UserRead,
    UserWriteCredentials,
    UserWriteEmail,
}

pub type AdminPermissionSet = BTreeSet<AdminPermission>;

impl AdminPermission {
    pub const ALL: [AdminPermission; 15] = [
        Self::AdminCreate,
        Self::AdminRead,
        Self::AdminWriteCredentials,
        Self::AdminWriteCredentialsSelf,
        Self::AdminWriteEmail,
        Self::AdminWriteEmailSelf,
        Self::AdminWritePermissions,
        Self::AdminWritePermissionsSelf,
        Self::AuditRead,
        Self::UserBan,
        Self::UserCreate,
        Self::UserDelete,
        Self::UserRead,
        Self::UserWriteCredentials,
        Self::UserWriteEmail,
    ];

    pub fn all() -> AdminPermissionSet {
        Self::ALL.into_iter().collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdminCreate => "ADMIN_CREATE",
            Self::AdminRead => "ADMIN_READ",
            Self::AdminWriteCredentials => "ADMIN_WRITE_CREDENTIALS",
            Self::AdminWriteCredentialsSelf => "ADMIN_WRITE_CREDENTIALS_SELF",
            Self::AdminWriteEmail => "ADMIN_WRITE_EMAIL",
            Self::AdminWriteEmailSelf => "ADMIN_WRITE_EMAIL_SELF",
            Self::AdminWritePermissions => "ADMIN_WRITE_PERMISSIONS",
            Self::AdminWritePermissionsSelf => "ADMIN_WRITE_PERMISSIONS_SELF",
            Self::AuditRead => "AUDIT_READ",
            Self::UserBan => "USER_BAN",
            Self::UserCreate => "USER_CREATE",
            Self::UserDelete => "USER_DELETE",
            Self::UserRead => "USER_READ",
            Self::UserWriteCredentials => "USER_WRITE_CREDENTIALS",
            Self::UserWriteEmail => "USER_WRITE_EMAIL",
        }
    }
}

impl fmt::Display for AdminPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdminPermission {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| PermissionError(s.to_string()))
    }
}

/// Encode a permission set as comma-separated names.
pub fn encode_permissions(set: &AdminPermissionSet) -> String {
    set.iter().map(AdminPermission::as_str).collect::<Vec<_>>().join(",")
}

/// Inverse of [`encode_permissions`]. Empty input decodes to the empty set.
pub fn decode_permissions(text: &str) -> Result<AdminPermissionSet, PermissionError> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(AdminPermission::from_str)
        .collect()
}

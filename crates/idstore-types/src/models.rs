use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::password::Password;
use crate::permissions::AdminPermissionSet;
use crate::token::Token;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admin {
    pub id: Uuid,
    pub id_name: String,
    pub real_name: String,
    /// Never empty. Sorted by address.
    pub emails: Vec<String>,
    pub time_created: DateTime<Utc>,
    pub time_updated: DateTime<Utc>,
    pub password: Password,
    pub permissions: AdminPermissionSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub id_name: String,
    pub real_name: String,
    /// Never empty. Sorted by address.
    pub emails: Vec<String>,
    pub time_created: DateTime<Utc>,
    pub time_updated: DateTime<Utc>,
    pub password: Password,
}

/// Row shape returned by admin searches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminSummary {
    pub id: Uuid,
    pub id_name: String,
    pub real_name: String,
    pub time_created: DateTime<Utc>,
    pub time_updated: DateTime<Utc>,
}

/// Row shape returned by user searches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub id_name: String,
    pub real_name: String,
    pub time_created: DateTime<Utc>,
    pub time_updated: DateTime<Utc>,
}

impl From<&Admin> for AdminSummary {
    fn from(admin: &Admin) -> Self {
        Self {
            id: admin.id,
            id_name: admin.id_name.clone(),
            real_name: admin.real_name.clone(),
            time_created: admin.time_created,
            time_updated: admin.time_updated,
        }
    }
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            id_name: user.id_name.clone(),
            real_name: user.real_name.clone(),
            time_created: user.time_created,
            time_updated: user.time_updated,
        }
    }
}

/// Which table owns an email address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id")]
pub enum EmailOwner {
    Admin(Uuid),
    User(Uuid),
}

impl EmailOwner {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Admin(id) | Self::User(id) => *id,
        }
    }
}

/// A user's email address as returned by the email seek search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEmail {
    pub email: String,
    pub user: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ban {
    pub user: Uuid,
    pub reason: String,
    /// `None` means the ban never expires.
    pub expires: Option<DateTime<Utc>>,
}

/// Connection details recorded on login. The host is confidential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginMetadata {
    pub host: String,
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRecord {
    pub user: Uuid,
    pub time: DateTime<Utc>,
    pub host: String,
    pub user_agent: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailVerificationOperation {
    Add,
    Remove,
}

impl EmailVerificationOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Remove => "REMOVE",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "ADD" => Some(Self::Add),
            "REMOVE" => Some(Self::Remove),
            _ => None,
        }
    }
}

/// How a pending verification was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailVerificationResolution {
    Permitted,
    Denied,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailVerification {
    pub user: Uuid,
    pub email: String,
    pub token_permit: Token,
    pub token_deny: Token,
    pub operation: EmailVerificationOperation,
    pub expires: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: i64,
    pub time: DateTime<Utc>,
    pub owner: Uuid,
    pub kind: String,
    pub message: String,
    pub attributes: BTreeMap<String, String>,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::password::Password;
use crate::permissions::AdminPermissionSet;

// -- Time ranges --

/// An inclusive range of instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub lower: DateTime<Utc>,
    pub upper: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(lower: DateTime<Utc>, upper: DateTime<Utc>) -> Self {
        Self { lower, upper }
    }

    /// Covers every instant the store can represent.
    pub fn largest() -> Self {
        Self {
            lower: DateTime::<Utc>::MIN_UTC,
            upper: DateTime::<Utc>::MAX_UTC,
        }
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::largest()
    }
}

// -- Ordering --

/// Columns account searches may be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountColumn {
    ById,
    ByIdName,
    ByRealName,
    ByTimeCreated,
    ByTimeUpdated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountColumnOrdering {
    pub column: AccountColumn,
    pub ascending: bool,
}

impl Default for AccountColumnOrdering {
    fn default() -> Self {
        Self {
            column: AccountColumn::ByIdName,
            ascending: true,
        }
    }
}

// -- Search parameters --

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Parameters shared by admin and user searches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSearchParameters {
    #[serde(default)]
    pub time_created_range: TimeRange,
    #[serde(default)]
    pub time_updated_range: TimeRange,
    /// Case-insensitive substring matched against id-name, real name and id.
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub ordering: AccountColumnOrdering,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for AccountSearchParameters {
    fn default() -> Self {
        Self {
            time_created_range: TimeRange::largest(),
            time_updated_range: TimeRange::largest(),
            search: None,
            ordering: AccountColumnOrdering::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Parameters for searching accounts by one of their email addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSearchByEmailParameters {
    #[serde(default)]
    pub time_created_range: TimeRange,
    #[serde(default)]
    pub time_updated_range: TimeRange,
    /// Case-insensitive substring matched against owned addresses.
    pub search: String,
    #[serde(default)]
    pub ordering: AccountColumnOrdering,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl AccountSearchByEmailParameters {
    pub fn new(search: impl Into<String>) -> Self {
        Self {
            time_created_range: TimeRange::largest(),
            time_updated_range: TimeRange::largest(),
            search: search.into(),
            ordering: AccountColumnOrdering::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSearchParameters {
    #[serde(default)]
    pub time_range: TimeRange,
    /// Substring of the owning account id.
    #[serde(default)]
    pub owner: Option<String>,
    /// Substring of the event type tag.
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for AuditSearchParameters {
    fn default() -> Self {
        Self {
            time_range: TimeRange::largest(),
            owner: None,
            kind: None,
            message: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

// -- Pages --

/// One materialized page of a keyset search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 0-based.
    pub page_index: u32,
    pub page_count: u32,
    /// Offset of the first item in the complete result set.
    pub page_first_offset: u64,
}

// -- Updates --

/// Fields left as `None` are not touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUpdate {
    pub id: Uuid,
    #[serde(default)]
    pub id_name: Option<String>,
    #[serde(default)]
    pub real_name: Option<String>,
    #[serde(default)]
    pub password: Option<Password>,
}

impl UserUpdate {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            id_name: None,
            real_name: None,
            password: None,
        }
    }
}

/// Fields left as `None` are not touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminUpdate {
    pub id: Uuid,
    #[serde(default)]
    pub id_name: Option<String>,
    #[serde(default)]
    pub real_name: Option<String>,
    #[serde(default)]
    pub password: Option<Password>,
    #[serde(default)]
    pub permissions: Option<AdminPermissionSet>,
}

impl AdminUpdate {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            id_name: None,
            real_name: None,
            password: None,
            permissions: None,
        }
    }
}

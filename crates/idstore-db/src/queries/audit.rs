use chrono::{DateTime, Utc};
use idstore_types::api::AuditSearchParameters;
use idstore_types::events::AuditEventKind;
use idstore_types::models::AuditEvent;
use rusqlite::Connection;
use rusqlite::types::Value;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{Attributes, Result, attributes};
use crate::models::{AUDIT_COLUMNS, audit_event, millis};
use crate::pager::{self, Filter, KeysetPager, KeysetQuery, OrderTerm};
use crate::session::DbTransaction;

/// Append-only event log.
pub struct AuditQueries<'a> {
    tx: &'a DbTransaction<'a>,
}

impl<'a> AuditQueries<'a> {
    pub(crate) fn new(tx: &'a DbTransaction<'a>) -> Self {
        Self { tx }
    }

    /// Append one event stamped with the current time.
    #[instrument(level = "debug", skip_all, fields(owner = %owner, kind = kind))]
    pub fn put(
        &self,
        owner: Uuid,
        kind: &str,
        message: &str,
        event_attributes: &Attributes,
    ) -> Result<AuditEvent> {
        let time = self.tx.now();
        let attrs = attributes([("owner", owner.to_string()), ("kind", kind.to_string())]);

        let id = self.tx.run(&attrs, |conn| {
            Ok(insert_event(conn, time, owner, kind, message, event_attributes)?)
        })?;

        Ok(AuditEvent {
            id,
            time,
            owner,
            kind: kind.to_string(),
            message: message.to_string(),
            attributes: event_attributes.clone(),
        })
    }

    /// Events matching `params`, ordered by ascending id.
    pub fn search(&self, params: &AuditSearchParameters) -> Result<KeysetPager<AuditEvent>> {
        KeysetPager::new(self.tx, search_query(params), params.page_size, audit_event)
    }

    /// Up to `limit` events matching `params` with an id greater than `after`.
    pub fn events_after(
        &self,
        params: &AuditSearchParameters,
        after: Option<i64>,
        limit: u32,
    ) -> Result<Vec<AuditEvent>> {
        let query = search_query(params);
        let key = after.map(|id| vec![Value::Integer(id)]);
        let attrs = attributes([("after", after.unwrap_or_default().to_string())]);

        self.tx.run(&attrs, |conn| {
            Ok(pager::seek(conn, &query, key.as_deref(), limit, audit_event)?)
        })
    }
}

fn search_query(params: &AuditSearchParameters) -> KeysetQuery {
    let mut filter = Filter::new().and(
        "time >= ? AND time <= ?",
        [
            Value::Integer(millis(params.time_range.lower)),
            Value::Integer(millis(params.time_range.upper)),
        ],
    );

    let substrings = [
        ("owner", params.owner.as_deref()),
        ("type", params.kind.as_deref()),
        ("message", params.message.as_deref()),
    ];
    for (column, needle) in substrings {
        if let Some(needle) = needle.filter(|n| !n.is_empty()) {
            filter = filter.and(
                format!("instr(lower({}), ?) > 0", column),
                [Value::Text(needle.to_lowercase())],
            );
        }
    }

    KeysetQuery {
        columns: AUDIT_COLUMNS,
        from: "audit",
        filter,
        order: vec![OrderTerm::asc("id")],
    }
}

/// Shared by every service that audits its own mutations.
pub(crate) fn insert_event(
    conn: &Connection,
    time: DateTime<Utc>,
    owner: Uuid,
    kind: &str,
    message: &str,
    event_attributes: &Attributes,
) -> rusqlite::Result<i64> {
    let encoded = serde_json::to_string(event_attributes)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        "INSERT INTO audit (time, owner, type, message, attributes) VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![millis(time), owner.to_string(), kind, message, encoded],
    )?;
    Ok(conn.last_insert_rowid())
}

/// [`insert_event`] for the typed kinds the services emit.
pub(crate) fn record(
    conn: &Connection,
    time: DateTime<Utc>,
    owner: Uuid,
    kind: AuditEventKind,
    message: &str,
    event_attributes: Attributes,
) -> rusqlite::Result<i64> {
    insert_event(conn, time, owner, kind.as_str(), message, &event_attributes)
}

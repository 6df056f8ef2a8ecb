pub mod clock;
pub mod config;
pub mod error;
mod metrics;
pub mod migrations;
mod models;
pub mod pager;
pub mod queries;
pub mod session;
mod translate;

use std::sync::Arc;

use rusqlite::{Connection, OpenFlags};
use tracing::info;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::DatabaseConfig;
pub use error::{Attributes, DatabaseError, ErrorKind, Result, attributes};
pub use pager::KeysetPager;
pub use queries::{
    AdminQueries, AuditQueries, EmailQueries, MaintenanceQueries, MaintenanceReport, QueryClass,
    QueryService, UserQueries,
};
pub use session::{Actor, DbConnection, DbTransaction, Role};

/// Handle to an identity store. Cheap to clone; every [`connect`](Self::connect)
/// opens a new physical connection.
#[derive(Clone)]
pub struct Database {
    config: DatabaseConfig,
    clock: Arc<dyn Clock>,
}

impl Database {
    /// Open (creating if needed) the store at `config.path` and bring its
    /// schema up to date.
    pub fn open(config: DatabaseConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = Connection::open(&config.path).map_err(translate::storage_error)?;

        // WAL mode for concurrent readers alongside the writer
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(translate::storage_error)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(translate::storage_error)?;

        migrations::run(&conn).map_err(translate::storage_error)?;

        info!("Identity DB opened at {}", config.path.display());
        Ok(Self { config, clock })
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Open a connection whose privileges are fixed to `role`.
    pub fn connect(&self, role: Role) -> Result<DbConnection> {
        let conn = Connection::open_with_flags(
            &self.config.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(translate::storage_error)?;

        conn.busy_timeout(self.config.busy_timeout)
            .map_err(translate::storage_error)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(translate::storage_error)?;
        role.apply(&conn).map_err(translate::storage_error)?;

        Ok(DbConnection::new(conn, role, self.clock.clone()))
    }
}

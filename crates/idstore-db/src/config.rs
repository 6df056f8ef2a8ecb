use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "idstore.db";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file. Created on first open.
    pub path: PathBuf,
    /// How long a statement waits on a locked database before failing.
    pub busy_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }

    /// Read `IDSTORE_DB_PATH` and `IDSTORE_DB_BUSY_TIMEOUT_MS`.
    pub fn from_env() -> anyhow::Result<Self> {
        let path: PathBuf = std::env::var("IDSTORE_DB_PATH")
            .unwrap_or_else(|_| DEFAULT_DB_PATH.into())
            .into();
        let busy_timeout_ms: u64 = match std::env::var("IDSTORE_DB_BUSY_TIMEOUT_MS") {
            Ok(v) => v.parse()?,
            Err(_) => DEFAULT_BUSY_TIMEOUT_MS,
        };

        Ok(Self {
            path,
            busy_timeout: Duration::from_millis(busy_timeout_ms),
        })
    }
}

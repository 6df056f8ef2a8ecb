#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use idstore_db::{Database, DatabaseConfig, DbTransaction, FixedClock};
use idstore_types::models::{Admin, User};
use idstore_types::password::{Password, PasswordAlgorithm};
use tempfile::TempDir;
use uuid::Uuid;

pub struct TestStore {
    // Keeps the database directory alive for the duration of the test
    _dir: TempDir,
    pub db: Database,
    pub clock: Arc<FixedClock>,
}

pub fn start_time() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
}

pub fn store() -> TestStore {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(FixedClock::new(start_time()));
    let db = Database::open(DatabaseConfig::new(dir.path().join("idstore.db")), clock.clone())
        .unwrap();
    TestStore {
        _dir: dir,
        db,
        clock,
    }
}

/// A well-formed record that skips the cost of real hashing.
pub fn password() -> Password {
    Password {
        algorithm: PasswordAlgorithm::Argon2id,
        hash: "aGFzaA".to_string(),
        salt: "c2FsdHNhbHQ".to_string(),
    }
}

/// Create the initial admin and act as it.
pub fn bootstrap(tx: &mut DbTransaction<'_>) -> Admin {
    let admin = tx
        .admins()
        .create_initial(Uuid::new_v4(), "root", "Root Admin", "root@example.com", &password())
        .unwrap();
    tx.set_admin_id(admin.id).unwrap();
    admin
}

pub fn create_user(tx: &DbTransaction<'_>, id_name: &str, email: &str) -> User {
    tx.users()
        .create(Uuid::new_v4(), id_name, &format!("{} Real", id_name), email, &password())
        .unwrap()
}

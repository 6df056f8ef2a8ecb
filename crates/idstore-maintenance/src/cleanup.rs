use std::time::Duration;

use idstore_db::{Database, MaintenanceReport, Role};
use tracing::{debug, info, warn};

/// Background loop that sweeps expired verifications and bans.
///
/// Each tick opens a fresh read/write connection on a blocking thread, runs
/// the sweep in one transaction and commits it.
pub async fn run_maintenance_loop(db: Database, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        let sweep_db = db.clone();
        match tokio::task::spawn_blocking(move || sweep(&sweep_db)).await {
            Ok(Ok(report)) if report.is_empty() => debug!("Maintenance: nothing expired"),
            Ok(Ok(report)) => info!(
                "Maintenance: removed {} expired verifications and {} expired bans",
                report.verifications_expired, report.bans_expired
            ),
            Ok(Err(e)) => warn!("Maintenance error: {}", e),
            Err(e) => warn!("Maintenance task failed: {}", e),
        }
    }
}

fn sweep(db: &Database) -> idstore_db::Result<MaintenanceReport> {
    let mut conn = db.connect(Role::ReadWrite)?;
    let mut tx = conn.open_transaction()?;
    let report = tx.maintenance().run()?;
    tx.commit()?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration as ChronoDuration};
    use idstore_db::{DatabaseConfig, FixedClock};
    use idstore_types::models::Ban;
    use idstore_types::password::Password;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn sweep_commits_its_deletions() {
        let dir = tempfile::tempdir().unwrap();
        let start = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let clock = Arc::new(FixedClock::new(start));
        let db = Database::open(DatabaseConfig::new(dir.path().join("m.db")), clock.clone()).unwrap();

        let password = Password::hash("correct horse").unwrap();
        let mut conn = db.connect(Role::ReadWrite).unwrap();
        let mut tx = conn.open_transaction().unwrap();
        let admin = tx
            .admins()
            .create_initial(Uuid::new_v4(), "root", "Root", "root@example.com", &password)
            .unwrap();
        tx.set_admin_id(admin.id).unwrap();
        let user = tx
            .users()
            .create(Uuid::new_v4(), "alice", "Alice", "alice@example.com", &password)
            .unwrap();
        tx.users()
            .ban_create(&Ban {
                user: user.id,
                reason: "cooldown".into(),
                expires: Some(start + ChronoDuration::minutes(5)),
            })
            .unwrap();
        tx.commit().unwrap();
        drop(tx);

        clock.advance(ChronoDuration::minutes(10));
        let report = sweep(&db).unwrap();
        assert_eq!(report.bans_expired, 1);

        let tx = conn.open_transaction().unwrap();
        assert_eq!(tx.users().ban_get(user.id).unwrap(), None);
    }
}

use tracing::{debug, instrument};

use crate::error::{Result, attributes};
use crate::models::millis;
use crate::session::DbTransaction;

/// Rows removed by one [`MaintenanceQueries::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub verifications_expired: u64,
    pub bans_expired: u64,
}

impl MaintenanceReport {
    pub fn is_empty(&self) -> bool {
        self.verifications_expired == 0 && self.bans_expired == 0
    }
}

pub struct MaintenanceQueries<'a> {
    tx: &'a DbTransaction<'a>,
}

impl<'a> MaintenanceQueries<'a> {
    pub(crate) fn new(tx: &'a DbTransaction<'a>) -> Self {
        Self { tx }
    }

    /// Delete verifications and bans whose expiry lies strictly before now.
    /// Permanent bans are never touched.
    #[instrument(level = "debug", skip_all)]
    pub fn run(&self) -> Result<MaintenanceReport> {
        let now = millis(self.tx.now());
        let attrs = attributes([("now", now.to_string())]);

        let report = self.tx.run(&attrs, |conn| {
            let verifications =
                conn.execute("DELETE FROM email_verifications WHERE expires < ?1", [now])?;
            let bans = conn.execute(
                "DELETE FROM bans WHERE expires IS NOT NULL AND expires < ?1",
                [now],
            )?;
            Ok(MaintenanceReport {
                verifications_expired: verifications as u64,
                bans_expired: bans as u64,
            })
        })?;

        debug!(
            verifications = report.verifications_expired,
            bans = report.bans_expired,
            "maintenance sweep finished"
        );
        Ok(report)
    }
}

mod cleanup;

use std::sync::Arc;

use idstore_db::{Database, DatabaseConfig, SystemClock};
use tracing::{info, warn};

const DEFAULT_INTERVAL_SECS: u64 = 300;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "idstore=debug".into()),
        )
        .init();

    // Config
    let config = DatabaseConfig::from_env()?;
    let interval_secs: u64 = match std::env::var("IDSTORE_MAINTENANCE_INTERVAL_SECS") {
        Ok(v) => v.parse()?,
        Err(_) => DEFAULT_INTERVAL_SECS,
    };
    if interval_secs == 0 {
        anyhow::bail!("IDSTORE_MAINTENANCE_INTERVAL_SECS must be at least 1");
    }

    let db = Database::open(config, Arc::new(SystemClock))?;
    info!(
        "Identity store maintenance running every {}s against {}",
        interval_secs,
        db.config().path.display()
    );

    tokio::select! {
        _ = cleanup::run_maintenance_loop(db, interval_secs) => {}
        _ = shutdown_signal() => {}
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}

//! Daemon entrypoint: load configuration, initialize logging, open the
//! database, and run the scheduler's trigger loop until a signal arrives.

use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use taskforge::http::HttpClient;
use taskforge::infrastructure::{init_logging, RuntimeConfig};
use taskforge::scheduler::{ScheduleStore, SqliteScheduleStore, TriggerLoop};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RuntimeConfig::load()?;
    let _logging_guard = init_logging(&config.logging);

    info!(database = %config.database.path, "starting taskforge");

    let connect_options = SqliteConnectOptions::new().filename(&config.database.path).create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let store: Arc<dyn ScheduleStore> = Arc::new(SqliteScheduleStore::new(pool.clone()));
    let client = Arc::new(HttpClient::new());
    let trigger_loop = Arc::new(TriggerLoop::new(store, client));

    let handle = tokio::spawn(trigger_loop.clone().run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
        _ = terminate_signal() => {
            info!("received terminate signal");
        }
    }

    trigger_loop.shutdown();
    handle.await?;
    pool.close().await;

    info!("shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn terminate_signal() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    sigterm.recv().await;
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}

use std::sync::Arc;

use chrono::{Datelike, Local};
use tracing::info;
use tracing_subscriber::EnvFilter;

use devbook::compactor;
use devbook::config::Config;
use devbook::engine::Engine;
use devbook::store::WalStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    devbook::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(WalStore::open(&config.wal_path())?);
    let engine = Engine::open(store.clone()).await?;

    let today = Local::now().date_naive();
    let calendar = engine.calendar(today.year(), today.month()).await?;
    let booked_days = calendar.days.iter().filter(|c| !c.occupancy.is_empty()).count();

    info!("devbook started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  devices: {}", engine.list_devices().await?.len());
    info!(
        "  {}-{:02}: {booked_days} of {} day(s) booked",
        calendar.year,
        calendar.month,
        calendar.days.len()
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let compactor = tokio::spawn(compactor::run_compactor(
        store.clone(),
        config.compact_threshold,
        config.compact_interval,
    ));

    shutdown_signal().await?;
    info!("shutdown signal received");
    compactor.abort();

    // Leave a compact log behind so the next start replays quickly.
    if let Err(e) = store.compact().await {
        tracing::error!("final compaction failed: {e}");
    }

    info!("devbook stopped");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::store::WalStore;

/// Compact the WAL whenever more than `threshold` appends have accumulated.
/// A zero `every` is raised to one second.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every.max(Duration::from_secs(1)));
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}

/// One compactor pass. Returns whether a compaction ran.
pub async fn compact_if_due(store: &WalStore, threshold: u64) -> bool {
    let appends = store.appends_since_compact().await;
    if appends <= threshold {
        debug!("compactor: {appends} appends since last compaction, threshold {threshold}");
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            info!("compactor: compacted after {appends} appends");
            true
        }
        Err(e) => {
            tracing::error!("compactor: compaction failed: {e}");
            false
        }
    }
}

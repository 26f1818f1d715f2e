use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::store::{MemoryStore, StoreError};

const CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Background task that rewrites the journal once it has grown past
/// `threshold` appends since the last compaction.
pub async fn run_compactor(store: Arc<MemoryStore>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_due(&store, threshold).await {
            error!("journal compaction failed: {e}");
        }
    }
}

/// Compact when due. Returns the number of events written, if it ran.
pub async fn compact_if_due(
    store: &MemoryStore,
    threshold: u64,
) -> Result<Option<usize>, StoreError> {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        return Ok(None);
    }
    let written = store.compact().await?;
    info!(appends, written, "journal compacted");
    Ok(Some(written))
}

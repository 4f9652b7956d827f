use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::observability;

/// Periodically cancels pending bookings whose payment window closed.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let now = chrono::Utc::now().timestamp_millis();
        let expired = engine.expire_stale_pending_bookings(now).await;
        if !expired.is_empty() {
            info!("reaper expired {} pending bookings", expired.len());
        }
    }
}

/// Rewrites the journal once `threshold` events were appended since the
/// last rewrite.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if engine.journal_appends_since_compact().await < threshold {
            continue;
        }
        match engine.compact_journal().await {
            Ok(()) => {
                metrics::counter!(observability::JOURNAL_COMPACTIONS_TOTAL).increment(1);
                info!("journal compacted");
            }
            Err(e) => tracing::error!("journal compaction failed: {e}"),
        }
    }
}

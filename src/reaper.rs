use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{now_ms, Engine};
use crate::model::Ms;

/// Background task that periodically marks CONFIRMED bookings that ended without a check-in as NO_SHOW.
pub async fn run_no_show_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep_no_shows(&engine, now_ms()).await;
    }
}

/// One sweeper pass. Returns how many bookings were marked.
pub async fn sweep_no_shows(engine: &Engine, now: Ms) -> usize {
    let mut marked = 0;
    for booking_id in engine.collect_no_shows(now) {
        match engine.mark_no_show(booking_id, now).await {
            Ok(_) => {
                marked += 1;
                info!("marked booking {booking_id} as no-show");
            }
            Err(e) => {
                // May have been checked in or cancelled since collection
                tracing::debug!("no-show sweep skip {booking_id}: {e}");
            }
        }
    }
    if marked > 0 {
        metrics::counter!(crate::observability::NO_SHOWS_TOTAL).increment(marked as u64);
    }
    marked
}

/// Background task that compacts the tenant WAL once enough appends have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!(appends, "compacted WAL"),
            Err(e) => tracing::error!("WAL compaction failed: {e}"),
        }
    }
}

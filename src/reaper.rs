use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::engine::Engine;

/// Background task deleting modifiers whose span is entirely in the past.
/// Callers only ever ask for modifiers at or after "now", and past days
/// resolve empty, so reaped records are unobservable either way.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        let stale = engine.collect_stale_modifiers(now);
        for (modifier_id, _provider_id) in stale {
            match engine.remove_modifier(modifier_id).await {
                Ok(_) => info!("reaped stale modifier {modifier_id}"),
                Err(e) => {
                    // May already have been toggled away — that's fine.
                    debug!("reaper skip {modifier_id}: {e}");
                }
            }
        }
    }
}

/// Background task compacting the WAL once enough appends have piled up
/// since the last rewrite.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::engine::Engine;

/// Background task that hard-deletes reservations whose history has
/// outlived the retention window.
pub async fn run_retention(engine: Arc<Engine>, retention_ms: i64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        let stale = engine.collect_stale(now, retention_ms);
        for id in stale {
            match engine.hard_delete(id).await {
                Ok(_) => info!("reaped stale reservation {id}"),
                Err(e) => {
                    // May already have been deleted — that's fine
                    debug!("retention skip {id}: {e}");
                }
            }
        }
    }
}

/// Background task that compacts the WAL once enough appends have
/// accumulated since the last compaction.
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use crate::slot::SlotCode;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotd_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn retention_collects_old_cancelled_rows() {
        let path = test_wal_path("retention_collect.wal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(path, notify).unwrap());

        let rid = Ulid::new();
        engine
            .register_resource(rid, "room".into(), ResourceKind::MeetingRoom, 4)
            .await
            .unwrap();

        let r = engine
            .create("alice", rid, "2020-01-06", SlotCode::Morning)
            .await
            .unwrap();
        engine.cancel("alice", false, r.id).await.unwrap();

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;

        // Far in the future everything is stale; with a huge window nothing is.
        let stale = engine.collect_stale(now + 365 * 24 * 3_600_000, 24 * 3_600_000);
        assert_eq!(stale, vec![r.id]);
        let fresh = engine.collect_stale(now, i64::MAX / 2);
        assert!(fresh.is_empty());

        engine.hard_delete(r.id).await.unwrap();
        let after = engine.collect_stale(now + 365 * 24 * 3_600_000, 0);
        assert!(after.is_empty());
    }
}

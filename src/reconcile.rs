//! Client-side view maintenance. A reconciler keeps a local map of
//! reservations converged with the server: snapshot fetches are the
//! authoritative source of truth, push events only signal that a fetch
//! is due, and a slow poll guarantees convergence even when push is
//! down. Missing or reordered push events therefore never corrupt the
//! view.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::stream::BoxStream;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::model::{ChangeEvent, Reservation};

/// Fallback poll cadence when no push events arrive.
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);
/// First reconnect delay; doubles per attempt.
pub const RECONNECT_BASE_MS: u64 = 1_000;
/// Reconnect delay ceiling.
pub const RECONNECT_CAP_MS: u64 = 30_000;
/// Reconnect attempts per outage before falling back to poll-only.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;

pub type EventStream = BoxStream<'static, ChangeEvent>;

#[derive(Debug, Error)]
#[error("snapshot fetch failed: {0}")]
pub struct FetchError(pub String);

#[derive(Debug, Error)]
#[error("push connect failed: {0}")]
pub struct ConnectError(pub String);

/// Authoritative full-state fetch (typically GET /reservations).
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Reservation>, FetchError>;
}

/// Live change feed (typically the /events WebSocket).
#[async_trait]
pub trait PushSource: Send + Sync {
    async fn connect(&self) -> Result<EventStream, ConnectError>;
}

/// Local replica of the server's reservations.
#[derive(Debug, Default)]
pub struct LocalView {
    pub reservations: HashMap<Ulid, Reservation>,
    /// Bumped on every completed fetch; lets callers detect staleness.
    pub last_fetch_seq: u64,
    pub push_connected: bool,
}

/// Owns the background driver task. Dropping the reconciler stops it.
pub struct Reconciler {
    view: Arc<RwLock<LocalView>>,
    driver: JoinHandle<()>,
}

impl Reconciler {
    pub fn spawn(snapshot: Arc<dyn SnapshotSource>, push: Arc<dyn PushSource>) -> Self {
        let view = Arc::new(RwLock::new(LocalView::default()));
        let driver = tokio::spawn(drive(view.clone(), snapshot, push));
        Reconciler { view, driver }
    }

    pub fn view(&self) -> Arc<RwLock<LocalView>> {
        self.view.clone()
    }

    pub async fn shutdown(mut self) {
        self.driver.abort();
        let _ = (&mut self.driver).await;
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

fn reconnect_backoff(attempt: u32) -> Duration {
    let ms = RECONNECT_BASE_MS
        .saturating_mul(1u64 << attempt.saturating_sub(1).min(16))
        .min(RECONNECT_CAP_MS);
    Duration::from_millis(ms)
}

/// Replace the whole view with a fresh snapshot. On fetch failure the
/// last-known-good state stays.
async fn refetch(view: &RwLock<LocalView>, snapshot: &dyn SnapshotSource) {
    match snapshot.fetch().await {
        Ok(rows) => {
            let mut v = view.write().await;
            v.reservations = rows.into_iter().map(|r| (r.id, r)).collect();
            v.last_fetch_seq += 1;
        }
        Err(e) => debug!("keeping stale view: {e}"),
    }
}

async fn next_event(events: &mut Option<EventStream>) -> Option<ChangeEvent> {
    match events {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn drive(
    view: Arc<RwLock<LocalView>>,
    snapshot: Arc<dyn SnapshotSource>,
    push: Arc<dyn PushSource>,
) {
    refetch(&view, &*snapshot).await;

    let mut poll = tokio::time::interval(POLL_INTERVAL);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    poll.tick().await; // first tick completes immediately

    let mut events: Option<EventStream> = None;
    let mut attempts = 0u32;

    loop {
        if events.is_none() && attempts < MAX_RECONNECT_ATTEMPTS {
            match push.connect().await {
                Ok(stream) => {
                    events = Some(stream);
                    attempts = 0;
                    view.write().await.push_connected = true;
                    // Events missed during the outage: resync now.
                    refetch(&view, &*snapshot).await;
                }
                Err(e) => {
                    attempts += 1;
                    if attempts < MAX_RECONNECT_ATTEMPTS {
                        let delay = reconnect_backoff(attempts);
                        debug!("push connect failed ({e}), retrying in {delay:?}");
                        tokio::time::sleep(delay).await;
                    } else {
                        warn!("push unavailable after {attempts} attempts, polling only");
                    }
                    continue;
                }
            }
        }

        tokio::select! {
            _ = poll.tick() => {
                refetch(&view, &*snapshot).await;
            }
            event = next_event(&mut events), if events.is_some() => {
                match event {
                    Some(_) => {
                        // Coalesce the burst: drain whatever is already
                        // buffered, then fetch once.
                        let mut ended = false;
                        if let Some(stream) = events.as_mut() {
                            while let Some(more) = stream.next().now_or_never() {
                                if more.is_none() {
                                    ended = true;
                                    break;
                                }
                            }
                        }
                        refetch(&view, &*snapshot).await;
                        if ended {
                            events = None;
                            attempts = 0;
                            view.write().await.push_connected = false;
                        }
                    }
                    None => {
                        events = None;
                        attempts = 0;
                        view.write().await.push_connected = false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChangeKind;
    use crate::slot::{self, SlotCode};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    fn row(owner: &str, date: &str, slot: SlotCode) -> Reservation {
        let span = slot::to_span(date, slot).unwrap();
        Reservation {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            owner_id: owner.into(),
            span,
            slot,
            date: date.into(),
            is_active: true,
            created_at: 0,
            cancelled_at: None,
        }
    }

    struct FakeSnapshot {
        rows: Mutex<Vec<Reservation>>,
        fetches: AtomicUsize,
    }

    impl FakeSnapshot {
        fn new(rows: Vec<Reservation>) -> Arc<Self> {
            Arc::new(FakeSnapshot {
                rows: Mutex::new(rows),
                fetches: AtomicUsize::new(0),
            })
        }

        fn set_rows(&self, rows: Vec<Reservation>) {
            *self.rows.lock().unwrap() = rows;
        }
    }

    #[async_trait]
    impl SnapshotSource for FakeSnapshot {
        async fn fetch(&self) -> Result<Vec<Reservation>, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.rows.lock().unwrap().clone())
        }
    }

    /// Hands out one pre-built stream, then fails every connect.
    struct FakePush {
        stream: Mutex<Option<EventStream>>,
        connects: AtomicU32,
    }

    impl FakePush {
        fn with_stream(stream: EventStream) -> Arc<Self> {
            Arc::new(FakePush {
                stream: Mutex::new(Some(stream)),
                connects: AtomicU32::new(0),
            })
        }

        fn unavailable() -> Arc<Self> {
            Arc::new(FakePush {
                stream: Mutex::new(None),
                connects: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl PushSource for FakePush {
        async fn connect(&self) -> Result<EventStream, ConnectError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.stream
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| ConnectError("refused".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_is_authoritative() {
        let a = row("alice", "2025-03-10", SlotCode::Morning);
        let snapshot = FakeSnapshot::new(vec![a.clone()]);
        let push = FakePush::with_stream(futures::stream::pending().boxed());

        let rec = Reconciler::spawn(snapshot.clone(), push);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let view = rec.view();
        {
            let v = view.read().await;
            assert!(v.reservations.contains_key(&a.id));
            assert!(v.push_connected);
        }

        // Server state changes with no push event; the poll converges.
        let b = row("bob", "2025-03-11", SlotCode::Afternoon);
        snapshot.set_rows(vec![b.clone()]);
        tokio::time::sleep(POLL_INTERVAL + Duration::from_secs(1)).await;

        let v = view.read().await;
        assert!(v.reservations.contains_key(&b.id));
        assert!(!v.reservations.contains_key(&a.id));
    }

    #[tokio::test(start_paused = true)]
    async fn push_event_triggers_refetch_and_coalesces() {
        let a = row("alice", "2025-03-10", SlotCode::Morning);
        let snapshot = FakeSnapshot::new(vec![a.clone()]);

        let (tx, rx) = futures::channel::mpsc::unbounded();
        let push = FakePush::with_stream(rx.boxed());
        let rec = Reconciler::spawn(snapshot.clone(), push);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let before = snapshot.fetches.load(Ordering::SeqCst);

        let b = row("bob", "2025-03-10", SlotCode::Afternoon);
        snapshot.set_rows(vec![a.clone(), b.clone()]);
        // A burst of events should cost one fetch, not three.
        for _ in 0..3 {
            tx.unbounded_send(ChangeEvent {
                kind: ChangeKind::Created,
                reservation: b.clone(),
            })
            .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(snapshot.fetches.load(Ordering::SeqCst), before + 1);
        let view = rec.view();
        let v = view.read().await;
        assert!(v.reservations.contains_key(&b.id));
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_to_polling_after_reconnect_budget() {
        let a = row("alice", "2025-03-10", SlotCode::Morning);
        let snapshot = FakeSnapshot::new(vec![]);
        let push = FakePush::unavailable();

        let rec = Reconciler::spawn(snapshot.clone(), push.clone());
        // 1s + 2s of backoff, then poll-only.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(push.connects.load(Ordering::SeqCst), MAX_RECONNECT_ATTEMPTS);

        let view = rec.view();
        assert!(!view.read().await.push_connected);

        snapshot.set_rows(vec![a.clone()]);
        tokio::time::sleep(POLL_INTERVAL + Duration::from_secs(1)).await;
        assert_eq!(push.connects.load(Ordering::SeqCst), MAX_RECONNECT_ATTEMPTS);
        assert!(view.read().await.reservations.contains_key(&a.id));
    }

    #[tokio::test(start_paused = true)]
    async fn stream_end_resyncs_and_reconnects() {
        let snapshot = FakeSnapshot::new(vec![]);
        let (tx, rx) = futures::channel::mpsc::unbounded::<ChangeEvent>();
        let push = FakePush::with_stream(rx.boxed());

        let rec = Reconciler::spawn(snapshot.clone(), push.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(rec.view().read().await.push_connected);

        drop(tx); // server closes the stream
        tokio::time::sleep(Duration::from_secs(10)).await;

        // A fresh outage gets a fresh reconnect budget.
        assert_eq!(
            push.connects.load(Ordering::SeqCst),
            1 + MAX_RECONNECT_ATTEMPTS
        );
        assert!(!rec.view().read().await.push_connected);
    }
}

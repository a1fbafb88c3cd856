use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: reservations committed.
pub const RESERVATIONS_CREATED_TOTAL: &str = "slotd_reservations_created_total";

/// Counter: reservations logically cancelled.
pub const RESERVATIONS_CANCELLED_TOTAL: &str = "slotd_reservations_cancelled_total";

/// Counter: reservations physically deleted.
pub const RESERVATIONS_DELETED_TOTAL: &str = "slotd_reservations_deleted_total";

/// Histogram: end-to-end create latency in seconds, retries included.
pub const CREATE_DURATION_SECONDS: &str = "slotd_create_duration_seconds";

// ── Contention metrics ──────────────────────────────────────────

/// Counter: create attempts that found the slot occupied.
pub const CREATE_CONFLICTS_TOTAL: &str = "slotd_create_conflicts_total";

/// Counter: create retries (backoff sleeps taken).
pub const CREATE_RETRIES_TOTAL: &str = "slotd_create_retries_total";

/// Counter: creates that exhausted the retry budget.
pub const SLOT_TAKEN_TOTAL: &str = "slotd_slot_taken_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: connected WebSocket push clients.
pub const WS_CLIENTS_ACTIVE: &str = "slotd_ws_clients_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotd_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

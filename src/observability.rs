use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Admission ───────────────────────────────────────────────────

/// Counter: reservations admitted and stored.
pub const BOOKINGS_ADMITTED_TOTAL: &str = "devbook_bookings_admitted_total";

/// Counter: reservations rejected. Labels: reason.
pub const BOOKINGS_REJECTED_TOTAL: &str = "devbook_bookings_rejected_total";

/// Histogram: time from request to decision (including refresh and append), seconds.
pub const ADMISSION_DURATION_SECONDS: &str = "devbook_admission_duration_seconds";

/// Counter: storage failures surfaced to callers.
pub const STORAGE_ERRORS_TOTAL: &str = "devbook_storage_errors_total";

// ── Calendar ────────────────────────────────────────────────────

pub const CALENDAR_PROJECTIONS_TOTAL: &str = "devbook_calendar_projections_total";

/// Counter: same-device overlaps seen in storage or in a projection.
pub const CONSISTENCY_WARNINGS_TOTAL: &str = "devbook_consistency_warnings_total";

// ── WAL ─────────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "devbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "devbook_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Booking flow ────────────────────────────────────────────────

/// Counter: bookings admitted as pending.
pub const BOOKINGS_CREATED_TOTAL: &str = "spabook_bookings_created_total";

/// Counter: bookings refused because the technician was taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "spabook_booking_conflicts_total";

/// Counter: booking status changes. Labels: to.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "spabook_booking_transitions_total";

/// Counter: payment verifier answers. Labels: outcome.
pub const PAYMENT_VERIFICATIONS_TOTAL: &str = "spabook_payment_verifications_total";

/// Counter: pending bookings cancelled by the expiry hook.
pub const PENDING_EXPIRED_TOTAL: &str = "spabook_pending_expired_total";

/// Counter: rejected admissions. Labels: kind.
pub const OPERATION_ERRORS_TOTAL: &str = "spabook_operation_errors_total";

/// Counter: block edits. Labels: op.
pub const BLOCK_CHANGES_TOTAL: &str = "spabook_block_changes_total";

// ── Reads ───────────────────────────────────────────────────────

/// Counter: availability queries. Labels: scope.
pub const AVAILABILITY_QUERIES_TOTAL: &str = "spabook_availability_queries_total";

/// Histogram: whole-salon availability latency in seconds.
pub const AVAILABILITY_QUERY_DURATION_SECONDS: &str = "spabook_availability_query_duration_seconds";

// ── Journal ─────────────────────────────────────────────────────

/// Histogram: group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "spabook_journal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "spabook_journal_flush_batch_size";

/// Counter: journal compactions.
pub const JOURNAL_COMPACTIONS_TOTAL: &str = "spabook_journal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

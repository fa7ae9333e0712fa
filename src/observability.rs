use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "gymtime_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "gymtime_query_duration_seconds";

// ── Domain counters ─────────────────────────────────────────────

/// Counter: ledger operations that committed. Labels: op.
pub const BOOKINGS_CONFIRMED_TOTAL: &str = "gymtime_bookings_confirmed_total";

/// Counter: ledger operations refused. Labels: op, reason.
pub const BOOKINGS_REJECTED_TOTAL: &str = "gymtime_bookings_rejected_total";

/// Counter: bookings moved to cancelled.
pub const BOOKINGS_CANCELLED_TOTAL: &str = "gymtime_bookings_cancelled_total";

/// Counter: health metrics recorded.
pub const METRICS_RECORDED_TOTAL: &str = "gymtime_health_metrics_recorded_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "gymtime_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "gymtime_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "gymtime_connections_rejected_total";

/// Gauge: number of open clubs (loaded engines).
pub const TENANTS_ACTIVE: &str = "gymtime_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "gymtime_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "gymtime_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None;
/// a failed install is logged and the server keeps running without it.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::warn!("metrics exporter not installed: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertEntity { .. } => "insert_entity",
        Command::InsertAvailability { .. } => "insert_availability",
        Command::DeleteAvailability { .. } => "delete_availability",
        Command::SelectAvailability { .. } => "select_availability",
        Command::InsertSession { .. } => "insert_session",
        Command::InsertClass { .. } => "insert_class",
        Command::InsertRegistration { .. } => "insert_registration",
        Command::DeleteRegistration { .. } => "delete_registration",
        Command::SelectRegistrations { .. } => "select_registrations",
        Command::InsertReschedule { .. } => "insert_reschedule",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectConflicts { .. } => "select_conflicts",
        Command::SelectSlots { .. } => "select_slots",
        Command::InsertMetric { .. } => "insert_metric",
        Command::SelectMetrics { .. } => "select_metrics",
        Command::SelectLatestMetric { .. } => "select_latest_metric",
    }
}

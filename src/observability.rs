use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total HTTP requests. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "spacegate_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "spacegate_http_request_duration_seconds";

/// Counter: requests rejected because the concurrency limit was reached.
pub const HTTP_REQUESTS_REJECTED_TOTAL: &str = "spacegate_http_requests_rejected_total";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: bookings created. Labels: status (PENDING / CONFIRMED).
pub const BOOKINGS_CREATED_TOTAL: &str = "spacegate_bookings_created_total";

/// Counter: booking attempts refused because the slot was taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "spacegate_booking_conflicts_total";

/// Counter: lifecycle transitions. Labels: to.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "spacegate_booking_transitions_total";

/// Counter: bookings marked NO_SHOW by the sweeper.
pub const NO_SHOWS_TOTAL: &str = "spacegate_no_shows_total";

/// Counter: credentials issued.
pub const CREDENTIALS_ISSUED_TOTAL: &str = "spacegate_credentials_issued_total";

/// Counter: credential scans. Labels: outcome (granted / denied).
pub const SCANS_TOTAL: &str = "spacegate_scans_total";

/// Counter: EXIT events clamped at zero.
pub const OCCUPANCY_UNDERFLOW_TOTAL: &str = "spacegate_occupancy_underflow_total";

/// Counter: access violations raised. Labels: kind.
pub const VIOLATIONS_RAISED_TOTAL: &str = "spacegate_violations_raised_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "spacegate_tenants_active";

/// Counter: rejected credentials or tenant headers.
pub const AUTH_FAILURES_TOTAL: &str = "spacegate_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "spacegate_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "spacegate_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "turnero_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "turnero_request_duration_seconds";

// ── Scheduling ──────────────────────────────────────────────────

/// Counter: appointments committed in `pending`.
pub const APPOINTMENTS_CREATED_TOTAL: &str = "turnero_appointments_created_total";

/// Counter: proposed slots refused. Labels: reason.
pub const SLOT_REJECTIONS_TOTAL: &str = "turnero_slot_rejections_total";

/// Counter: committed status transitions. Labels: from, to.
pub const TRANSITIONS_TOTAL: &str = "turnero_transitions_total";

/// Counter: transitions refused by the active policy. Labels: from, to.
pub const TRANSITIONS_REJECTED_TOTAL: &str = "turnero_transitions_rejected_total";

/// Counter: audit records that could not be written after a committed transition.
pub const AUDIT_WRITE_FAILURES_TOTAL: &str = "turnero_audit_write_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "turnero_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "turnero_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "turnero_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "turnero_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "turnero_wal_flush_batch_size";

/// Counter: WAL compactions performed.
pub const WAL_COMPACTIONS_TOTAL: &str = "turnero_wal_compactions_total";

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

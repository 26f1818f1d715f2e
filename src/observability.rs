use std::net::{IpAddr, SocketAddr};

use metrics_exporter_prometheus::BuildError;

// ── Admission ───────────────────────────────────────────────────

/// Counter: admission attempts by final outcome. Labels: outcome.
pub const ADMISSIONS_TOTAL: &str = "regdesk_admissions_total";

/// Histogram: end-to-end admission latency in seconds, guard wait included.
pub const ADMISSION_DURATION_SECONDS: &str = "regdesk_admission_duration_seconds";

/// Counter: admission decisions re-run after a store conflict.
pub const ADMISSION_RETRIES_TOTAL: &str = "regdesk_admission_retries_total";

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: protocol requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "regdesk_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "regdesk_request_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "regdesk_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "regdesk_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "regdesk_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "regdesk_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "regdesk_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(bind: IpAddr, port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr = SocketAddr::new(bind, port);
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://{addr}/metrics");
    Ok(())
}

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Writes ──────────────────────────────────────────────────────

/// Counter: booking writes. Labels: op (upsert, save_local, resync, remove), status.
pub const BOOKINGS_WRITTEN_TOTAL: &str = "roomsync_bookings_written_total";

/// Counter: candidates rejected by the conflict check. Labels: reason (room, calendar).
pub const CONFLICTS_REJECTED_TOTAL: &str = "roomsync_conflicts_rejected_total";

/// Counter: provider deletes that failed and were kept local-only.
pub const REMOTE_DELETE_FAILURES_TOTAL: &str = "roomsync_remote_delete_failures_total";

// ── Refresh ─────────────────────────────────────────────────────

/// Counter: refresh attempts. Labels: status (ok, error, stale, joined, cancelled).
pub const REFRESH_TOTAL: &str = "roomsync_refresh_total";

/// Histogram: provider fetch + normalization time in seconds.
pub const REFRESH_DURATION_SECONDS: &str = "roomsync_refresh_duration_seconds";

/// Counter: refresh results dropped because newer state was already published.
pub const STALE_REFRESH_DISCARDED_TOTAL: &str = "roomsync_stale_refresh_discarded_total";

/// Gauge: bookings in the published snapshot.
pub const SNAPSHOT_BOOKINGS: &str = "roomsync_snapshot_bookings";

// ── Normalization ───────────────────────────────────────────────

/// Counter: provider events whose room could not be matched.
pub const ROOMS_UNRESOLVED_TOTAL: &str = "roomsync_rooms_unresolved_total";

/// Counter: provider events dropped for unusable times.
pub const EVENTS_SKIPPED_TOTAL: &str = "roomsync_events_skipped_total";

/// Gauge: same-room booking pairs found by the last integrity scan.
pub const COLLISIONS_DETECTED: &str = "roomsync_collisions_detected";

// ── Room log ────────────────────────────────────────────────────

/// Counter: damaged room log tails cut off on open. Labels: reason
/// (truncated, oversized, checksum, undecodable).
pub const ROOM_LOG_REPAIRS_TOTAL: &str = "roomsync_room_log_repairs_total";

/// Counter: room log rewrites that failed; the uncompacted log stays in use.
pub const ROOM_LOG_COMPACTION_FAILURES_TOTAL: &str = "roomsync_room_log_compaction_failures_total";

// ── Provider ────────────────────────────────────────────────────

/// Histogram: calendar API request latency in seconds. Labels: op.
pub const PROVIDER_REQUEST_DURATION_SECONDS: &str = "roomsync_provider_request_duration_seconds";

/// Counter: failed calendar API requests. Labels: op.
pub const PROVIDER_ERRORS_TOTAL: &str = "roomsync_provider_errors_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

pub fn status_label<T, E>(result: &Result<T, E>) -> &'static str {
    if result.is_ok() { "ok" } else { "error" }
}

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::alerts::Severity;
use crate::engine::Verdict;

/// Counter: conflict classifications. Labels: verdict.
pub const VERDICTS_TOTAL: &str = "fleetres_verdicts_total";

/// Counter: commit attempts. Labels: op, status.
pub const COMMITS_TOTAL: &str = "fleetres_commits_total";

/// Counter: commits rejected because the caller's view was stale.
pub const STALE_STATE_TOTAL: &str = "fleetres_stale_state_total";

/// Counter: alerts newly raised. Labels: severity.
pub const ALERTS_RAISED_TOTAL: &str = "fleetres_alerts_raised_total";

/// Gauge: trips currently active.
pub const TRIPS_ACTIVE: &str = "fleetres_trips_active";

/// Histogram: audit log group-commit flush duration in seconds.
pub const AUDIT_FLUSH_DURATION_SECONDS: &str = "fleetres_audit_flush_duration_seconds";

/// Histogram: audit log group-commit batch size (entries per flush).
pub const AUDIT_FLUSH_BATCH_SIZE: &str = "fleetres_audit_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

pub fn verdict_label(verdict: &Verdict) -> &'static str {
    match verdict {
        Verdict::MaintenanceBlock => "maintenance_block",
        Verdict::VehicleOverlap(_) => "vehicle_overlap",
        Verdict::DriverOverlap(_) => "driver_overlap",
        Verdict::ActiveConflict(_) => "active_conflict",
        Verdict::RegionalRestriction(_) => "regional_restriction",
        Verdict::Admissible => "admissible",
    }
}

pub fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Warning => "warning",
        Severity::Critical => "critical",
    }
}

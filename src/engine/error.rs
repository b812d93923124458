use chrono::{NaiveDateTime, Weekday};
use ulid::Ulid;

use crate::audit::AuditError;

use super::Verdict;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid date range: {start} is after {end}")]
    InvalidDateKind { start: NaiveDateTime, end: NaiveDateTime },
    #[error("vehicle is under maintenance")]
    MaintenanceBlock,
    #[error("vehicle already reserved by {0}")]
    VehicleOverlap(Ulid),
    #[error("driver already reserved by {0}")]
    DriverOverlap(Ulid),
    #[error("conflicts with active trip {0}")]
    ActiveConflict(Ulid),
    #[error("plate rotation restricts this vehicle on {0}; a justification is required")]
    RegionalRestrictionUnjustified(Weekday),
    #[error("odometer regression: {end} km is below {start} km")]
    OdometerRegression { start: u32, end: u32 },
    #[error("a non-empty reason is required")]
    ReasonRequired,
    #[error("reservation {0} was already promoted to a trip")]
    AlreadyPromoted(Ulid),
    #[error("stale state, re-fetch and retry (current verdict: {current:?})")]
    StaleState { current: Option<Verdict> },
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("{0} is already closed")]
    AlreadyClosed(Ulid),
    #[error("invalid field: {0}")]
    InvalidField(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("audit sink: {0}")]
    Audit(#[from] AuditError),
}

impl EngineError {
    /// Only stale-state failures are worth retrying with the same intent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::StaleState { .. })
    }

    pub fn is_hard_block(&self) -> bool {
        matches!(
            self,
            EngineError::MaintenanceBlock
                | EngineError::VehicleOverlap(_)
                | EngineError::DriverOverlap(_)
                | EngineError::ActiveConflict(_)
        )
    }

    pub(crate) fn stale(current: Verdict) -> Self {
        metrics::counter!(crate::observability::STALE_STATE_TOTAL).increment(1);
        EngineError::StaleState { current: Some(current) }
    }

    pub(crate) fn stale_version() -> Self {
        metrics::counter!(crate::observability::STALE_STATE_TOTAL).increment(1);
        EngineError::StaleState { current: None }
    }
}

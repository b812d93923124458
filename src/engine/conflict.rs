use chrono::Weekday;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::calendar::{self, LocationMatcher};
use crate::interval::DateRange;
use crate::model::*;

use super::EngineError;

/// Outcome of classifying a candidate reservation. Variants are listed in
/// priority order: the first that applies wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    MaintenanceBlock,
    VehicleOverlap(Ulid),
    DriverOverlap(Ulid),
    ActiveConflict(Ulid),
    RegionalRestriction(Weekday),
    Admissible,
}

impl Verdict {
    pub fn is_hard_block(&self) -> bool {
        matches!(
            self,
            Verdict::MaintenanceBlock
                | Verdict::VehicleOverlap(_)
                | Verdict::DriverOverlap(_)
                | Verdict::ActiveConflict(_)
        )
    }

    /// May be persisted only with an administrative justification.
    pub fn is_soft_block(&self) -> bool {
        matches!(self, Verdict::RegionalRestriction(_))
    }

    pub fn is_admissible(&self) -> bool {
        matches!(self, Verdict::Admissible)
    }

    /// `Ok` only for `Admissible`; a regional restriction maps to its
    /// unjustified error since no justification travels with a bare verdict.
    pub fn into_result(self) -> Result<(), EngineError> {
        match self {
            Verdict::Admissible => Ok(()),
            Verdict::MaintenanceBlock => Err(EngineError::MaintenanceBlock),
            Verdict::VehicleOverlap(id) => Err(EngineError::VehicleOverlap(id)),
            Verdict::DriverOverlap(id) => Err(EngineError::DriverOverlap(id)),
            Verdict::ActiveConflict(id) => Err(EngineError::ActiveConflict(id)),
            Verdict::RegionalRestriction(day) => Err(EngineError::RegionalRestrictionUnjustified(day)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    /// Scheduling a future reservation: active trips only conflict when their window overlaps.
    Booking,
    /// Turning a reservation into a running trip: any active trip of the vehicle or driver conflicts.
    Promotion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub vehicle_id: Ulid,
    pub driver_id: Ulid,
    pub window: DateRange,
    pub route: Route,
    /// Reservation being edited or promoted; never conflicts with itself.
    pub exclude_reservation: Option<Ulid>,
    pub mode: CheckMode,
}

impl Candidate {
    pub fn booking(vehicle_id: Ulid, driver_id: Ulid, window: DateRange, route: Route) -> Self {
        Self {
            vehicle_id,
            driver_id,
            window,
            route,
            exclude_reservation: None,
            mode: CheckMode::Booking,
        }
    }

    pub fn excluding(mut self, reservation_id: Ulid) -> Self {
        self.exclude_reservation = Some(reservation_id);
        self
    }

    pub fn for_promotion(mut self) -> Self {
        self.mode = CheckMode::Promotion;
        self
    }

    /// The candidate an existing reservation would be re-checked as.
    pub fn from_reservation(r: &Reservation) -> Self {
        Self::booking(r.vehicle_id, r.driver_id, r.window, r.route.clone()).excluding(r.id)
    }
}

/// Read view the resolver works against. Non-live reservations and closed
/// trips may be present; they are ignored.
#[derive(Debug, Clone, Copy)]
pub struct World<'a> {
    pub vehicle: &'a Vehicle,
    pub reservations: &'a [Reservation],
    pub active_trips: &'a [Trip],
}

pub struct ConflictResolver<'a> {
    matcher: &'a dyn LocationMatcher,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(matcher: &'a dyn LocationMatcher) -> Self {
        Self { matcher }
    }

    pub fn classify(&self, candidate: &Candidate, world: &World<'_>) -> Verdict {
        debug_assert_eq!(candidate.vehicle_id, world.vehicle.id);

        if world.vehicle.status == VehicleStatus::Maintenance {
            return Verdict::MaintenanceBlock;
        }

        let exclude = candidate.exclude_reservation;
        let reservations = world.reservations;
        let others = move || {
            reservations
                .iter()
                .filter(move |r| r.is_live() && Some(r.id) != exclude)
        };

        if let Some(r) = others()
            .find(|r| r.vehicle_id == candidate.vehicle_id && r.window.overlaps(&candidate.window))
        {
            return Verdict::VehicleOverlap(r.id);
        }
        if let Some(r) = others()
            .find(|r| r.driver_id == candidate.driver_id && r.window.overlaps(&candidate.window))
        {
            return Verdict::DriverOverlap(r.id);
        }

        let clash = world.active_trips.iter().filter(|t| t.is_active()).find(|t| {
            let same_party = t.vehicle_id == candidate.vehicle_id || t.driver_id == candidate.driver_id;
            same_party
                && match candidate.mode {
                    CheckMode::Promotion => true,
                    CheckMode::Booking => t.effective_window().overlaps(&candidate.window),
                }
        });
        if let Some(t) = clash {
            return Verdict::ActiveConflict(t.id);
        }

        let start = candidate.window.start;
        if calendar::plate_restricted(&world.vehicle.plate, start) == Some(true) {
            let route = &candidate.route;
            if self.matcher.applies(&route.city, &route.state, &route.destination) {
                return Verdict::RegionalRestriction(start.weekday());
            }
        }

        Verdict::Admissible
    }
}

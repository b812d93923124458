use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::interval::{DateRange, Day};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleStatus {
    Available,
    InUse,
    Maintenance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Ulid,
    pub plate: String,
    pub model: String,
    pub brand: String,
    /// Kilometres; never decreases.
    pub current_odometer: u32,
    /// Percent, 0..=100.
    pub fuel_level: u8,
    pub status: VehicleStatus,
}

impl Vehicle {
    pub fn new(id: Ulid, plate: impl Into<String>, model: impl Into<String>, brand: impl Into<String>) -> Self {
        Self {
            id,
            plate: plate.into(),
            model: model.into(),
            brand: brand.into(),
            current_odometer: 0,
            fuel_level: 100,
            status: VehicleStatus::Available,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == VehicleStatus::Available
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Driver {
    pub id: Ulid,
    pub name: String,
    /// CNH category as printed on the licence ("B", "AB", "D", ...).
    pub license_category: String,
}

/// Where a trip goes. Free text, as entered on the booking form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub origin: String,
    pub destination: String,
    pub city: String,
    pub state: String,
}

impl Route {
    pub fn to(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationKind {
    Single,
    RecurringRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    RegionalOverride,
    ReservationEdited,
    ReservationDeleted,
    TripCancelled,
}

/// Who did what, when, and why. Attached to the record it concerns and
/// written to the audit sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Ulid,
    /// Reservation or trip the entry belongs to.
    pub subject_id: Ulid,
    pub action: AuditAction,
    pub reason: String,
    pub actor_id: Ulid,
    pub timestamp: DateTime<Utc>,
}

/// A future booking of a vehicle + driver pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub driver_id: Ulid,
    pub vehicle_id: Ulid,
    pub kind: ReservationKind,
    pub window: DateRange,
    pub route: Route,
    pub notes: Option<String>,
    /// Bumped on every committed edit; used for optimistic concurrency.
    pub version: u64,
    /// Present when the reservation was admitted over a plate-rotation restriction.
    pub regional_override: Option<AuditEntry>,
    pub audit: Vec<AuditEntry>,
    /// Trip this reservation was promoted into. Promoted reservations are history.
    pub promoted_to: Option<Ulid>,
}

impl Reservation {
    pub fn is_live(&self) -> bool {
        self.promoted_to.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expenses {
    pub fuel_cents: u64,
    pub tolls_cents: u64,
    pub other_cents: u64,
}

impl Expenses {
    pub fn total_cents(&self) -> u64 {
        self.fuel_cents
            .saturating_add(self.tolls_cents)
            .saturating_add(self.other_cents)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    Scheduled,
    Active,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trip {
    pub id: Ulid,
    pub reservation_id: Option<Ulid>,
    pub driver_id: Ulid,
    pub vehicle_id: Ulid,
    pub route: Route,
    pub start_time: NaiveDateTime,
    pub start_odometer: u32,
    /// Last day the trip was booked for; equals the departure day for ad-hoc trips.
    pub planned_end: Day,
    pub fuel_level_out: u8,
    pub end_time: Option<NaiveDateTime>,
    pub end_odometer: Option<u32>,
    pub distance: Option<u32>,
    pub fuel_level_in: Option<u8>,
    pub expenses: Option<Expenses>,
    pub is_cancelled: bool,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<Ulid>,
    pub audit: Vec<AuditEntry>,
}

impl Trip {
    pub fn state(&self) -> LifecycleState {
        if self.is_cancelled {
            LifecycleState::Cancelled
        } else if self.end_time.is_some() {
            LifecycleState::Completed
        } else {
            LifecycleState::Active
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == LifecycleState::Active
    }

    /// Days the trip occupies for conflict purposes: departure day through the
    /// planned end, or just the departure day when the plan ends earlier.
    pub fn effective_window(&self) -> DateRange {
        let start = Day::from_naive(&self.start_time);
        DateRange {
            start,
            end: self.planned_end.max(start),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceRecord {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub open_date: Day,
    pub close_date: Option<Day>,
    pub categories: Vec<String>,
}

impl MaintenanceRecord {
    pub fn is_open(&self) -> bool {
        self.close_date.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TireRecord {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    /// Wheel position label ("FL", "RR", "spare", ...).
    pub position: String,
    pub installed_at_km: u32,
    pub next_change_at_km: u32,
}

impl TireRecord {
    /// Kilometres left before the change is due; negative once overdue.
    pub fn remaining_km(&self, current_odometer: u32) -> i64 {
        i64::from(self.next_change_at_km) - i64::from(current_odometer)
    }
}

/// Committed state changes, as broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    VehicleRegistered {
        vehicle: Vehicle,
    },
    DriverRegistered {
        driver: Driver,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationUpdated {
        /// Vehicle the reservation was on before the edit.
        previous_vehicle_id: Ulid,
        reservation: Reservation,
    },
    ReservationDeleted {
        id: Ulid,
        vehicle_id: Ulid,
        entry: AuditEntry,
    },
    TripStarted {
        trip: Trip,
    },
    TripCompleted {
        id: Ulid,
        vehicle_id: Ulid,
        end_time: NaiveDateTime,
        end_odometer: u32,
        fuel_level: u8,
        expenses: Expenses,
    },
    TripCancelled {
        id: Ulid,
        vehicle_id: Ulid,
        entry: AuditEntry,
    },
    MaintenanceOpened {
        record: MaintenanceRecord,
    },
    MaintenanceClosed {
        id: Ulid,
        vehicle_id: Ulid,
        close_date: Day,
    },
    TireRecorded {
        tire: TireRecord,
    },
}

impl Event {
    /// Vehicle channel the event is published on.
    pub fn vehicle_id(&self) -> Option<Ulid> {
        match self {
            Event::VehicleRegistered { vehicle } => Some(vehicle.id),
            Event::DriverRegistered { .. } => None,
            Event::ReservationCreated { reservation } | Event::ReservationUpdated { reservation, .. } => {
                Some(reservation.vehicle_id)
            }
            Event::TripStarted { trip } => Some(trip.vehicle_id),
            Event::MaintenanceOpened { record } => Some(record.vehicle_id),
            Event::TireRecorded { tire } => Some(tire.vehicle_id),
            Event::ReservationDeleted { vehicle_id, .. }
            | Event::TripCompleted { vehicle_id, .. }
            | Event::TripCancelled { vehicle_id, .. }
            | Event::MaintenanceClosed { vehicle_id, .. } => Some(*vehicle_id),
        }
    }
}

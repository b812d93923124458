mod conflict;
mod error;
mod fleet;
mod lifecycle;
mod queries;
mod reservations;

pub use conflict::{Candidate, CheckMode, ConflictResolver, Verdict, World};
pub use error::EngineError;
pub use fleet::NewMaintenance;
pub use lifecycle::{Arrival, Departure, NewTrip};
pub use reservations::{NewReservation, ReservationChanges};

use std::io;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::alerts::{AlertGenerator, AlertLedger};
use crate::audit::{AuditLog, AuditSink, MemoryAuditSink};
use crate::calendar::{LocationMatcher, SaoPauloMatcher};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::limits::MAX_REASON_LEN;
use crate::model::*;
use crate::notify::NotifyHub;

/// Who is asking for a gated operation, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Justification {
    pub actor_id: Ulid,
    pub reason: String,
}

impl Justification {
    pub fn new(actor_id: Ulid, reason: impl Into<String>) -> Self {
        Self {
            actor_id,
            reason: reason.into(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), EngineError> {
        if self.reason.trim().is_empty() {
            return Err(EngineError::ReasonRequired);
        }
        if self.reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        Ok(())
    }
}

/// Owned copy of everything the resolver needs for one vehicle/driver pair.
struct Snapshot {
    vehicle: Vehicle,
    reservations: Vec<Reservation>,
    active_trips: Vec<Trip>,
}

impl Snapshot {
    fn world(&self) -> World<'_> {
        World {
            vehicle: &self.vehicle,
            reservations: &self.reservations,
            active_trips: &self.active_trips,
        }
    }
}

/// The fleet's authoritative state plus the commit path that guards it.
///
/// Every mutation takes the lanes (one async mutex per vehicle and per driver
/// id) of the parties involved, in sorted order, re-validates against current
/// state, writes any audit entry, then applies and broadcasts the event.
pub struct Engine {
    vehicles: DashMap<Ulid, Vehicle>,
    drivers: DashMap<Ulid, Driver>,
    reservations: DashMap<Ulid, Reservation>,
    trips: DashMap<Ulid, Trip>,
    maintenance: DashMap<Ulid, MaintenanceRecord>,
    tires: DashMap<Ulid, TireRecord>,
    lanes: DashMap<Ulid, Arc<Mutex<()>>>,
    /// Committed audit entries by subject, kept after a reservation is deleted.
    trail: DashMap<Ulid, Vec<AuditEntry>>,
    audit: Arc<dyn AuditSink>,
    pub notify: Arc<NotifyHub>,
    matcher: Arc<dyn LocationMatcher>,
    clock: Arc<dyn Clock>,
    alerts: AlertGenerator,
    ledger: Mutex<AlertLedger>,
    max_reservation_days: i64,
}

impl Engine {
    pub fn new(audit: Arc<dyn AuditSink>, notify: Arc<NotifyHub>) -> Self {
        Self::with_config(&EngineConfig::default(), audit, notify)
    }

    pub fn with_config(config: &EngineConfig, audit: Arc<dyn AuditSink>, notify: Arc<NotifyHub>) -> Self {
        Self {
            vehicles: DashMap::new(),
            drivers: DashMap::new(),
            reservations: DashMap::new(),
            trips: DashMap::new(),
            maintenance: DashMap::new(),
            tires: DashMap::new(),
            lanes: DashMap::new(),
            trail: DashMap::new(),
            audit,
            notify,
            matcher: Arc::new(SaoPauloMatcher),
            clock: Arc::new(SystemClock),
            alerts: AlertGenerator::new(config.tire_warning_km, config.low_fuel_percent),
            ledger: Mutex::new(AlertLedger::new()),
            max_reservation_days: config.max_reservation_days,
        }
    }

    /// Build from configuration: a file audit log when `audit_log` is set,
    /// an in-memory sink otherwise. Must run inside a tokio runtime.
    pub fn from_config(config: &EngineConfig) -> io::Result<Self> {
        let audit: Arc<dyn AuditSink> = match &config.audit_log {
            Some(path) => Arc::new(AuditLog::open(path)?),
            None => Arc::new(MemoryAuditSink::new()),
        };
        Ok(Self::with_config(config, audit, Arc::new(NotifyHub::new())))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_location_matcher(mut self, matcher: Arc<dyn LocationMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Preview classification for a form. Takes no locks; the commit path
    /// re-runs it authoritatively.
    pub fn classify(&self, candidate: &Candidate) -> Result<Verdict, EngineError> {
        self.require_driver(candidate.driver_id)?;
        self.evaluate(candidate)
    }

    fn evaluate(&self, candidate: &Candidate) -> Result<Verdict, EngineError> {
        let snapshot = self.snapshot(candidate.vehicle_id, candidate.driver_id)?;
        let verdict = ConflictResolver::new(self.matcher.as_ref()).classify(candidate, &snapshot.world());
        metrics::counter!(
            crate::observability::VERDICTS_TOTAL,
            "verdict" => crate::observability::verdict_label(&verdict)
        )
        .increment(1);
        Ok(verdict)
    }

    fn snapshot(&self, vehicle_id: Ulid, driver_id: Ulid) -> Result<Snapshot, EngineError> {
        let vehicle = self
            .vehicles
            .get(&vehicle_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let reservations = self
            .reservations
            .iter()
            .filter(|e| e.is_live() && (e.vehicle_id == vehicle_id || e.driver_id == driver_id))
            .map(|e| e.value().clone())
            .collect();
        let active_trips = self
            .trips
            .iter()
            .filter(|e| e.is_active() && (e.vehicle_id == vehicle_id || e.driver_id == driver_id))
            .map(|e| e.value().clone())
            .collect();
        Ok(Snapshot {
            vehicle,
            reservations,
            active_trips,
        })
    }

    fn require_driver(&self, driver_id: Ulid) -> Result<(), EngineError> {
        if self.drivers.contains_key(&driver_id) {
            Ok(())
        } else {
            Err(EngineError::NotFound(driver_id))
        }
    }

    /// Acquire the serialization lanes for the given ids, sorted to prevent deadlocks.
    async fn lock_lanes(&self, ids: &[Ulid]) -> Vec<OwnedMutexGuard<()>> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let lane = self.lanes.entry(id).or_default().value().clone();
            guards.push(lane.lock_owned().await);
        }
        guards
    }

    fn audit_entry(&self, subject_id: Ulid, action: AuditAction, justification: &Justification) -> AuditEntry {
        AuditEntry {
            id: Ulid::new(),
            subject_id,
            action,
            reason: justification.reason.trim().to_string(),
            actor_id: justification.actor_id,
            timestamp: self.clock.now(),
        }
    }

    /// Audit-write + apply + notify in one call. The entries go to the sink as
    /// one group; nothing is applied if the sink refuses it.
    async fn commit(&self, op: &'static str, entries: &[AuditEntry], event: Event) -> Result<(), EngineError> {
        if !entries.is_empty()
            && let Err(e) = self.audit.record_all(entries).await
        {
            tracing::warn!("audit write failed for {op} on {}: {e}", entries[0].subject_id);
            metrics::counter!(crate::observability::COMMITS_TOTAL, "op" => op, "status" => "error").increment(1);
            return Err(e.into());
        }

        self.apply(&event);
        for entry in entries {
            self.trail.entry(entry.subject_id).or_default().push(entry.clone());
        }
        for vehicle_id in notify_channels(&event) {
            self.notify.send(vehicle_id, &event);
        }
        metrics::counter!(crate::observability::COMMITS_TOTAL, "op" => op, "status" => "ok").increment(1);
        tracing::debug!(op, "committed");

        if let Some(vehicle_id) = event.vehicle_id() {
            self.raise_alerts(&[vehicle_id]).await;
        }
        Ok(())
    }

    /// Apply a committed event to the in-memory state. Callers hold the lanes
    /// of every vehicle and driver the event touches.
    fn apply(&self, event: &Event) {
        match event {
            Event::VehicleRegistered { vehicle } => {
                self.vehicles.insert(vehicle.id, vehicle.clone());
            }
            Event::DriverRegistered { driver } => {
                self.drivers.insert(driver.id, driver.clone());
            }
            Event::ReservationCreated { reservation } | Event::ReservationUpdated { reservation, .. } => {
                self.reservations.insert(reservation.id, reservation.clone());
            }
            Event::ReservationDeleted { id, .. } => {
                self.reservations.remove(id);
            }
            Event::TripStarted { trip } => {
                if let Some(rid) = trip.reservation_id
                    && let Some(mut r) = self.reservations.get_mut(&rid)
                {
                    r.promoted_to = Some(trip.id);
                }
                if let Some(mut v) = self.vehicles.get_mut(&trip.vehicle_id) {
                    v.status = VehicleStatus::InUse;
                    v.fuel_level = trip.fuel_level_out;
                }
                self.trips.insert(trip.id, trip.clone());
            }
            Event::TripCompleted {
                id,
                vehicle_id,
                end_time,
                end_odometer,
                fuel_level,
                expenses,
            } => {
                if let Some(mut t) = self.trips.get_mut(id) {
                    debug_assert!(*end_odometer >= t.start_odometer, "trip {id} closed below its start odometer");
                    t.end_time = Some(*end_time);
                    t.end_odometer = Some(*end_odometer);
                    t.distance = Some(end_odometer - t.start_odometer);
                    t.fuel_level_in = Some(*fuel_level);
                    t.expenses = Some(*expenses);
                }
                if let Some(mut v) = self.vehicles.get_mut(vehicle_id) {
                    v.status = VehicleStatus::Available;
                    debug_assert!(*end_odometer >= v.current_odometer, "vehicle {vehicle_id} odometer rolled back");
                    v.current_odometer = *end_odometer;
                    v.fuel_level = *fuel_level;
                }
            }
            Event::TripCancelled { id, vehicle_id, entry } => {
                if let Some(mut t) = self.trips.get_mut(id) {
                    t.is_cancelled = true;
                    t.cancellation_reason = Some(entry.reason.clone());
                    t.cancelled_by = Some(entry.actor_id);
                    t.audit.push(entry.clone());
                }
                if let Some(mut v) = self.vehicles.get_mut(vehicle_id) {
                    v.status = VehicleStatus::Available;
                }
            }
            Event::MaintenanceOpened { record } => {
                if let Some(mut v) = self.vehicles.get_mut(&record.vehicle_id) {
                    v.status = VehicleStatus::Maintenance;
                }
                self.maintenance.insert(record.id, record.clone());
            }
            Event::MaintenanceClosed { id, vehicle_id, close_date } => {
                if let Some(mut m) = self.maintenance.get_mut(id) {
                    m.close_date = Some(*close_date);
                }
                if let Some(mut v) = self.vehicles.get_mut(vehicle_id) {
                    v.status = VehicleStatus::Available;
                }
            }
            Event::TireRecorded { tire } => {
                self.tires.insert(tire.id, tire.clone());
            }
        }
    }
}

/// Vehicle channels an event is published on. An edit that moves a
/// reservation to another vehicle is announced on both.
fn notify_channels(event: &Event) -> Vec<Ulid> {
    let mut ids: Vec<Ulid> = event.vehicle_id().into_iter().collect();
    if let Event::ReservationUpdated { previous_vehicle_id, .. } = event
        && !ids.contains(previous_vehicle_id)
    {
        ids.push(*previous_vehicle_id);
    }
    ids
}

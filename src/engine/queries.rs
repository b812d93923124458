use ulid::Ulid;

use crate::interval::DateRange;
use crate::model::*;

use super::{Candidate, Engine, EngineError, Verdict};

impl Engine {
    pub fn get_vehicle(&self, id: Ulid) -> Option<Vehicle> {
        self.vehicles.get(&id).map(|v| v.value().clone())
    }

    pub fn get_driver(&self, id: Ulid) -> Option<Driver> {
        self.drivers.get(&id).map(|d| d.value().clone())
    }

    pub fn get_reservation(&self, id: Ulid) -> Option<Reservation> {
        self.reservations.get(&id).map(|r| r.value().clone())
    }

    pub fn get_trip(&self, id: Ulid) -> Option<Trip> {
        self.trips.get(&id).map(|t| t.value().clone())
    }

    pub fn get_maintenance(&self, id: Ulid) -> Option<MaintenanceRecord> {
        self.maintenance.get(&id).map(|m| m.value().clone())
    }

    /// All vehicles, ordered by plate.
    pub fn list_vehicles(&self) -> Vec<Vehicle> {
        let mut out: Vec<Vehicle> = self.vehicles.iter().map(|v| v.value().clone()).collect();
        out.sort_by(|a, b| a.plate.cmp(&b.plate));
        out
    }

    /// Reservations of a vehicle, promoted ones included, ordered by start day.
    pub fn reservations_for_vehicle(&self, vehicle_id: Ulid) -> Vec<Reservation> {
        self.reservations_where(|r| r.vehicle_id == vehicle_id)
    }

    pub fn reservations_for_driver(&self, driver_id: Ulid) -> Vec<Reservation> {
        self.reservations_where(|r| r.driver_id == driver_id)
    }

    fn reservations_where(&self, keep: impl Fn(&Reservation) -> bool) -> Vec<Reservation> {
        let mut out: Vec<Reservation> = self
            .reservations
            .iter()
            .filter(|r| keep(r.value()))
            .map(|r| r.value().clone())
            .collect();
        out.sort_by_key(|r| (r.window.start, r.id));
        out
    }

    pub fn active_trips(&self) -> Vec<Trip> {
        let mut out: Vec<Trip> = self
            .trips
            .iter()
            .filter(|t| t.is_active())
            .map(|t| t.value().clone())
            .collect();
        out.sort_by_key(|t| (t.start_time, t.id));
        out
    }

    pub fn active_trip_for_vehicle(&self, vehicle_id: Ulid) -> Option<Trip> {
        self.trips
            .iter()
            .find(|t| t.vehicle_id == vehicle_id && t.is_active())
            .map(|t| t.value().clone())
    }

    pub fn trips_for_vehicle(&self, vehicle_id: Ulid) -> Vec<Trip> {
        let mut out: Vec<Trip> = self
            .trips
            .iter()
            .filter(|t| t.vehicle_id == vehicle_id)
            .map(|t| t.value().clone())
            .collect();
        out.sort_by_key(|t| (t.start_time, t.id));
        out
    }

    pub fn open_maintenance_for(&self, vehicle_id: Ulid) -> Option<MaintenanceRecord> {
        self.maintenance
            .iter()
            .find(|m| m.vehicle_id == vehicle_id && m.is_open())
            .map(|m| m.value().clone())
    }

    pub fn maintenance_history(&self, vehicle_id: Ulid) -> Vec<MaintenanceRecord> {
        let mut out: Vec<MaintenanceRecord> = self
            .maintenance
            .iter()
            .filter(|m| m.vehicle_id == vehicle_id)
            .map(|m| m.value().clone())
            .collect();
        out.sort_by_key(|m| (m.open_date, m.id));
        out
    }

    pub fn tires_for(&self, vehicle_id: Ulid) -> Vec<TireRecord> {
        let mut out: Vec<TireRecord> = self
            .tires
            .iter()
            .filter(|t| t.vehicle_id == vehicle_id)
            .map(|t| t.value().clone())
            .collect();
        out.sort_by(|a, b| a.position.cmp(&b.position).then(a.id.cmp(&b.id)));
        out
    }

    /// Audit entries committed for a reservation or trip, oldest first.
    /// Survives deletion of the reservation.
    pub fn audit_trail(&self, subject_id: Ulid) -> Vec<AuditEntry> {
        self.trail
            .get(&subject_id)
            .map(|entries| entries.value().clone())
            .unwrap_or_default()
    }

    /// Vehicles the driver could book for `window` and `route`, with the verdict
    /// each one gets. Hard-blocked vehicles are left out; a regional
    /// restriction is kept since it can be overridden.
    pub fn available_vehicles(
        &self,
        driver_id: Ulid,
        window: DateRange,
        route: &Route,
    ) -> Result<Vec<(Vehicle, Verdict)>, EngineError> {
        self.require_driver(driver_id)?;
        let mut out = Vec::new();
        for vehicle in self.list_vehicles() {
            let candidate = Candidate::booking(vehicle.id, driver_id, window, route.clone());
            let verdict = self.evaluate(&candidate)?;
            if !verdict.is_hard_block() {
                out.push((vehicle, verdict));
            }
        }
        Ok(out)
    }
}

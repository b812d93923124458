use ulid::Ulid;

use crate::alerts::{Alert, AlertKey};
use crate::interval::Day;
use crate::limits::*;
use crate::model::*;
use crate::observability::{severity_label, ALERTS_RAISED_TOTAL};

use super::{Engine, EngineError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMaintenance {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub open_date: Day,
    pub categories: Vec<String>,
}

fn check_len(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn check_required(value: &str, field: &'static str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidField(field));
    }
    Ok(())
}

impl Engine {
    /// Add a vehicle to the fleet. It always starts out Available.
    pub async fn register_vehicle(&self, mut vehicle: Vehicle) -> Result<Vehicle, EngineError> {
        check_required(&vehicle.plate, "plate")?;
        check_len(&vehicle.plate, MAX_PLATE_LEN, "plate too long")?;
        check_len(&vehicle.model, MAX_NAME_LEN, "model too long")?;
        check_len(&vehicle.brand, MAX_NAME_LEN, "brand too long")?;
        if vehicle.fuel_level > MAX_FUEL_LEVEL {
            return Err(EngineError::InvalidField("fuel_level"));
        }
        vehicle.status = VehicleStatus::Available;

        let _lanes = self.lock_lanes(&[vehicle.id]).await;
        if self.vehicles.contains_key(&vehicle.id) {
            return Err(EngineError::AlreadyExists(vehicle.id));
        }
        self.commit(
            "register_vehicle",
            &[],
            Event::VehicleRegistered {
                vehicle: vehicle.clone(),
            },
        )
        .await?;
        Ok(vehicle)
    }

    pub async fn register_driver(&self, driver: Driver) -> Result<Driver, EngineError> {
        check_required(&driver.name, "name")?;
        check_len(&driver.name, MAX_NAME_LEN, "name too long")?;
        check_len(&driver.license_category, MAX_NAME_LEN, "license category too long")?;

        let _lanes = self.lock_lanes(&[driver.id]).await;
        if self.drivers.contains_key(&driver.id) {
            return Err(EngineError::AlreadyExists(driver.id));
        }
        self.commit(
            "register_driver",
            &[],
            Event::DriverRegistered {
                driver: driver.clone(),
            },
        )
        .await?;
        Ok(driver)
    }

    /// Take a vehicle off the road. Refused while it is out on a trip, already
    /// in the shop, or booked for the open date or later.
    pub async fn open_maintenance(&self, new: NewMaintenance) -> Result<MaintenanceRecord, EngineError> {
        if new.categories.len() > MAX_MAINTENANCE_CATEGORIES {
            return Err(EngineError::LimitExceeded("too many maintenance categories"));
        }
        for category in &new.categories {
            check_len(category, MAX_NAME_LEN, "maintenance category too long")?;
        }

        let _lanes = self.lock_lanes(&[new.vehicle_id]).await;
        if !self.vehicles.contains_key(&new.vehicle_id) {
            return Err(EngineError::NotFound(new.vehicle_id));
        }
        if self.maintenance.contains_key(&new.id) {
            return Err(EngineError::AlreadyExists(new.id));
        }
        if let Some(trip) = self.active_trip_for_vehicle(new.vehicle_id) {
            return Err(EngineError::ActiveConflict(trip.id));
        }
        if self.open_maintenance_for(new.vehicle_id).is_some() {
            return Err(EngineError::MaintenanceBlock);
        }
        let booked = self
            .reservations
            .iter()
            .find(|r| r.is_live() && r.vehicle_id == new.vehicle_id && r.window.end >= new.open_date)
            .map(|r| r.id);
        if let Some(reservation_id) = booked {
            return Err(EngineError::VehicleOverlap(reservation_id));
        }

        let record = MaintenanceRecord {
            id: new.id,
            vehicle_id: new.vehicle_id,
            open_date: new.open_date,
            close_date: None,
            categories: new.categories,
        };
        self.commit(
            "open_maintenance",
            &[],
            Event::MaintenanceOpened {
                record: record.clone(),
            },
        )
        .await?;
        tracing::info!("vehicle {} entered maintenance", record.vehicle_id);
        Ok(record)
    }

    pub async fn close_maintenance(&self, id: Ulid, close_date: Day) -> Result<MaintenanceRecord, EngineError> {
        let vehicle_id = self
            .maintenance
            .get(&id)
            .map(|m| m.vehicle_id)
            .ok_or(EngineError::NotFound(id))?;
        let _lanes = self.lock_lanes(&[vehicle_id]).await;

        let record = self.get_maintenance(id).ok_or(EngineError::NotFound(id))?;
        if !record.is_open() {
            return Err(EngineError::AlreadyClosed(id));
        }
        if close_date < record.open_date {
            return Err(EngineError::InvalidDateKind {
                start: record.open_date.as_datetime(),
                end: close_date.as_datetime(),
            });
        }

        self.commit(
            "close_maintenance",
            &[],
            Event::MaintenanceClosed {
                id,
                vehicle_id,
                close_date,
            },
        )
        .await?;
        tracing::info!("vehicle {vehicle_id} back from maintenance");
        self.get_maintenance(id).ok_or(EngineError::NotFound(id))
    }

    pub async fn record_tire(&self, tire: TireRecord) -> Result<TireRecord, EngineError> {
        check_required(&tire.position, "position")?;
        check_len(&tire.position, MAX_NAME_LEN, "tire position too long")?;
        if tire.next_change_at_km < tire.installed_at_km {
            return Err(EngineError::InvalidField("next_change_at_km"));
        }

        let _lanes = self.lock_lanes(&[tire.vehicle_id]).await;
        if !self.vehicles.contains_key(&tire.vehicle_id) {
            return Err(EngineError::NotFound(tire.vehicle_id));
        }
        if self.tires.contains_key(&tire.id) {
            return Err(EngineError::AlreadyExists(tire.id));
        }
        self.commit("record_tire", &[], Event::TireRecorded { tire: tire.clone() }).await?;
        Ok(tire)
    }

    /// Scan the given vehicles and publish alerts that were not already raised.
    pub(crate) async fn raise_alerts(&self, vehicle_ids: &[Ulid]) -> Vec<Alert> {
        let vehicles: Vec<Vehicle> = vehicle_ids
            .iter()
            .filter_map(|id| self.vehicles.get(id).map(|v| v.value().clone()))
            .collect();
        let tires: Vec<TireRecord> = self
            .tires
            .iter()
            .filter(|t| vehicle_ids.contains(&t.vehicle_id))
            .map(|t| t.value().clone())
            .collect();
        let scanned = self.alerts.scan(&vehicles, &tires);

        let raised = self.ledger.lock().await.reconcile(vehicle_ids, scanned);
        for alert in &raised {
            metrics::counter!(ALERTS_RAISED_TOTAL, "severity" => severity_label(alert.severity)).increment(1);
            tracing::info!("alert {} raised for {}", alert.key, alert.plate);
            self.notify.send_alert(alert);
        }
        raised
    }

    /// Rescan the whole fleet. Returns only newly raised alerts.
    pub async fn scan_alerts(&self) -> Vec<Alert> {
        let ids: Vec<Ulid> = self.vehicles.iter().map(|v| *v.key()).collect();
        self.raise_alerts(&ids).await
    }

    /// Conditions currently present on a vehicle that nobody has acknowledged.
    pub async fn current_alerts(&self, vehicle_id: Ulid) -> Vec<Alert> {
        let Some(vehicle) = self.get_vehicle(vehicle_id) else {
            return Vec::new();
        };
        let scanned = self.alerts.scan(&[vehicle], &self.tires_for(vehicle_id));
        let ledger = self.ledger.lock().await;
        scanned.into_iter().filter(|a| ledger.is_raised(&a.key)).collect()
    }

    /// Clear a raised alert. If its condition still holds, the next scan raises it again.
    pub async fn acknowledge_alert(&self, key: &AlertKey) -> bool {
        self.ledger.lock().await.acknowledge(key)
    }
}

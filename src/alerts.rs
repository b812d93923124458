//! Threshold alerts derived from vehicle and tire state.
//!
//! Scanning is a pure function of its inputs. Delivery, read/unread state and
//! storage of notifications belong to whoever subscribes to the alerts.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::config::{DEFAULT_LOW_FUEL_PERCENT, DEFAULT_TIRE_WARNING_KM};
use crate::model::{TireRecord, Vehicle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Critical,
}

/// Idempotency key: one live alert per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertKey {
    Tire {
        vehicle_id: Ulid,
        tire_id: Ulid,
        severity: Severity,
    },
    LowFuel {
        vehicle_id: Ulid,
    },
}

impl AlertKey {
    pub fn vehicle_id(&self) -> Ulid {
        match self {
            AlertKey::Tire { vehicle_id, .. } | AlertKey::LowFuel { vehicle_id } => *vehicle_id,
        }
    }
}

impl std::fmt::Display for AlertKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKey::Tire { vehicle_id, tire_id, severity } => {
                write!(f, "{vehicle_id}:{tire_id}:{severity:?}")
            }
            AlertKey::LowFuel { vehicle_id } => write!(f, "{vehicle_id}:fuel"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertKind {
    TireChange { position: String, remaining_km: i64 },
    LowFuel { fuel_level: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub key: AlertKey,
    pub vehicle_id: Ulid,
    pub plate: String,
    pub severity: Severity,
    pub kind: AlertKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertGenerator {
    pub tire_warning_km: i64,
    pub low_fuel_percent: u8,
}

impl Default for AlertGenerator {
    fn default() -> Self {
        Self {
            tire_warning_km: DEFAULT_TIRE_WARNING_KM,
            low_fuel_percent: DEFAULT_LOW_FUEL_PERCENT,
        }
    }
}

impl AlertGenerator {
    pub fn new(tire_warning_km: i64, low_fuel_percent: u8) -> Self {
        Self { tire_warning_km, low_fuel_percent }
    }

    /// Every alert condition present in the given state, ordered and unique by key.
    /// Tires whose vehicle is not in `vehicles` are skipped.
    pub fn scan(&self, vehicles: &[Vehicle], tires: &[TireRecord]) -> Vec<Alert> {
        let mut out: BTreeMap<AlertKey, Alert> = BTreeMap::new();

        for vehicle in vehicles {
            if vehicle.fuel_level < self.low_fuel_percent {
                let key = AlertKey::LowFuel { vehicle_id: vehicle.id };
                out.insert(
                    key,
                    Alert {
                        key,
                        vehicle_id: vehicle.id,
                        plate: vehicle.plate.clone(),
                        severity: Severity::Warning,
                        kind: AlertKind::LowFuel { fuel_level: vehicle.fuel_level },
                    },
                );
            }
        }

        for tire in tires {
            let Some(vehicle) = vehicles.iter().find(|v| v.id == tire.vehicle_id) else {
                continue;
            };
            let remaining_km = tire.remaining_km(vehicle.current_odometer);
            let severity = if remaining_km <= 0 {
                Severity::Critical
            } else if remaining_km <= self.tire_warning_km {
                Severity::Warning
            } else {
                continue;
            };
            let key = AlertKey::Tire {
                vehicle_id: vehicle.id,
                tire_id: tire.id,
                severity,
            };
            out.insert(
                key,
                Alert {
                    key,
                    vehicle_id: vehicle.id,
                    plate: vehicle.plate.clone(),
                    severity,
                    kind: AlertKind::TireChange {
                        position: tire.position.clone(),
                        remaining_km,
                    },
                },
            );
        }

        out.into_values().collect()
    }
}

/// Keys raised and not yet acknowledged.
#[derive(Debug, Default)]
pub struct AlertLedger {
    raised: HashSet<AlertKey>,
}

impl AlertLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile a fresh scan of `vehicle_ids` against the ledger. Returns only
    /// alerts whose key is new. Keys of those vehicles that no longer appear in
    /// the scan are dropped so the condition can raise again if it comes back.
    pub fn reconcile(&mut self, vehicle_ids: &[Ulid], scanned: Vec<Alert>) -> Vec<Alert> {
        let present: HashSet<AlertKey> = scanned.iter().map(|a| a.key).collect();
        self.raised
            .retain(|key| !vehicle_ids.contains(&key.vehicle_id()) || present.contains(key));

        scanned
            .into_iter()
            .filter(|alert| self.raised.insert(alert.key))
            .collect()
    }

    /// Forget a key so the next scan may raise it again.
    pub fn acknowledge(&mut self, key: &AlertKey) -> bool {
        self.raised.remove(key)
    }

    pub fn is_raised(&self, key: &AlertKey) -> bool {
        self.raised.contains(key)
    }

    pub fn len(&self) -> usize {
        self.raised.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raised.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vehicle(odometer: u32, fuel: u8) -> Vehicle {
        let mut v = Vehicle::new(Ulid::new(), "ABC-1234", "Strada", "Fiat");
        v.current_odometer = odometer;
        v.fuel_level = fuel;
        v
    }

    fn tire(vehicle_id: Ulid, next_change_at_km: u32) -> TireRecord {
        TireRecord {
            id: Ulid::new(),
            vehicle_id,
            position: "FL".into(),
            installed_at_km: 0,
            next_change_at_km,
        }
    }

    #[test]
    fn tire_thresholds() {
        let v = vehicle(50_000, 80);
        let far = tire(v.id, 60_000);
        let near = tire(v.id, 52_000);
        let due = tire(v.id, 50_000);
        let overdue = tire(v.id, 45_000);

        let alerts = AlertGenerator::default().scan(&[v.clone()], &[far, near.clone(), due.clone(), overdue.clone()]);
        assert_eq!(alerts.len(), 3);

        let severity_of = |id: Ulid| {
            alerts
                .iter()
                .find(|a| matches!(a.key, AlertKey::Tire { tire_id, .. } if tire_id == id))
                .map(|a| a.severity)
        };
        assert_eq!(severity_of(near.id), Some(Severity::Warning));
        assert_eq!(severity_of(due.id), Some(Severity::Critical));
        assert_eq!(severity_of(overdue.id), Some(Severity::Critical));
    }

    #[test]
    fn warning_boundary_is_inclusive() {
        let v = vehicle(10_000, 80);
        let at_limit = tire(v.id, 12_000);
        let past_limit = tire(v.id, 12_001);
        let alerts = AlertGenerator::default().scan(&[v], &[at_limit, past_limit]);
        assert_eq!(alerts.len(), 1);
        assert!(matches!(alerts[0].kind, AlertKind::TireChange { remaining_km: 2000, .. }));
    }

    #[test]
    fn low_fuel_keyed_by_vehicle() {
        let low = vehicle(0, 9);
        let edge = vehicle(0, 10);
        let alerts = AlertGenerator::default().scan(&[low.clone(), edge], &[]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].key, AlertKey::LowFuel { vehicle_id: low.id });
        assert_eq!(alerts[0].key.to_string(), format!("{}:fuel", low.id));
    }

    #[test]
    fn scan_is_deterministic() {
        let v = vehicle(50_000, 5);
        let tires = vec![tire(v.id, 49_000), tire(v.id, 51_000)];
        let vehicles = vec![v];
        let first = AlertGenerator::default().scan(&vehicles, &tires);
        let second = AlertGenerator::default().scan(&vehicles, &tires);
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn orphan_tires_are_skipped() {
        let alerts = AlertGenerator::default().scan(&[], &[tire(Ulid::new(), 0)]);
        assert!(alerts.is_empty());
    }

    #[test]
    fn ledger_suppresses_repeats() {
        let v = vehicle(50_000, 5);
        let tires = vec![tire(v.id, 49_000)];
        let vehicles = vec![v.clone()];
        let generator = AlertGenerator::default();
        let mut ledger = AlertLedger::new();

        let first = ledger.reconcile(&[v.id], generator.scan(&vehicles, &tires));
        assert_eq!(first.len(), 2);
        let second = ledger.reconcile(&[v.id], generator.scan(&vehicles, &tires));
        assert!(second.is_empty());
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn ledger_rearms_after_condition_clears() {
        let mut v = vehicle(0, 5);
        let generator = AlertGenerator::default();
        let mut ledger = AlertLedger::new();

        assert_eq!(ledger.reconcile(&[v.id], generator.scan(&[v.clone()], &[])).len(), 1);
        v.fuel_level = 90;
        assert!(ledger.reconcile(&[v.id], generator.scan(&[v.clone()], &[])).is_empty());
        assert!(ledger.is_empty());
        v.fuel_level = 3;
        assert_eq!(ledger.reconcile(&[v.id], generator.scan(&[v.clone()], &[])).len(), 1);
    }

    #[test]
    fn acknowledge_allows_reraise() {
        let v = vehicle(0, 5);
        let generator = AlertGenerator::default();
        let mut ledger = AlertLedger::new();
        let raised = ledger.reconcile(&[v.id], generator.scan(&[v.clone()], &[]));
        assert!(ledger.acknowledge(&raised[0].key));
        assert!(!ledger.is_raised(&raised[0].key));
        assert_eq!(ledger.reconcile(&[v.id], generator.scan(&[v.clone()], &[])).len(), 1);
    }

    #[test]
    fn ledger_leaves_other_vehicles_alone() {
        let a = vehicle(0, 5);
        let mut b = vehicle(0, 5);
        let generator = AlertGenerator::default();
        let mut ledger = AlertLedger::new();
        ledger.reconcile(&[a.id, b.id], generator.scan(&[a.clone(), b.clone()], &[]));
        assert_eq!(ledger.len(), 2);

        // rescanning only b after it refuels must not forget a's alert
        b.fuel_level = 50;
        ledger.reconcile(&[b.id], generator.scan(&[b], &[]));
        assert_eq!(ledger.len(), 1);
        assert!(ledger.is_raised(&AlertKey::LowFuel { vehicle_id: a.id }));
    }
}

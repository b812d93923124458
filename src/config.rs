use std::path::PathBuf;

use crate::limits::MAX_RESERVATION_DAYS;

pub const DEFAULT_TIRE_WARNING_KM: i64 = 2_000;
pub const DEFAULT_LOW_FUEL_PERCENT: u8 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Tires with this many km or fewer left raise a warning.
    pub tire_warning_km: i64,
    /// Fuel strictly below this percentage raises a low-fuel alert.
    pub low_fuel_percent: u8,
    /// Widest reservation window accepted, in days. Capped by `limits::MAX_RESERVATION_DAYS`.
    pub max_reservation_days: i64,
    pub audit_log: Option<PathBuf>,
    pub metrics_port: Option<u16>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tire_warning_km: DEFAULT_TIRE_WARNING_KM,
            low_fuel_percent: DEFAULT_LOW_FUEL_PERCENT,
            max_reservation_days: MAX_RESERVATION_DAYS,
            audit_log: None,
            metrics_port: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let tire_warning_km = get("FLEETRES_TIRE_WARNING_KM")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.tire_warning_km);
        let low_fuel_percent = get("FLEETRES_LOW_FUEL_PERCENT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.low_fuel_percent);
        let max_reservation_days = get("FLEETRES_MAX_RESERVATION_DAYS")
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|days| *days > 0)
            .map(|days| days.min(MAX_RESERVATION_DAYS))
            .unwrap_or(defaults.max_reservation_days);
        let audit_log = get("FLEETRES_AUDIT_LOG").map(PathBuf::from);
        let metrics_port = get("FLEETRES_METRICS_PORT").and_then(|s| s.parse().ok());

        Self {
            tire_warning_km,
            low_fuel_percent,
            max_reservation_days,
            audit_log,
            metrics_port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_env_gives_defaults() {
        assert_eq!(EngineConfig::from_lookup(lookup(&[])), EngineConfig::default());
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = EngineConfig::from_lookup(lookup(&[
            ("FLEETRES_TIRE_WARNING_KM", "5000"),
            ("FLEETRES_LOW_FUEL_PERCENT", "15"),
            ("FLEETRES_AUDIT_LOG", "/var/lib/fleet/audit.log"),
            ("FLEETRES_METRICS_PORT", "9100"),
        ]));
        assert_eq!(cfg.tire_warning_km, 5000);
        assert_eq!(cfg.low_fuel_percent, 15);
        assert_eq!(cfg.audit_log, Some(PathBuf::from("/var/lib/fleet/audit.log")));
        assert_eq!(cfg.metrics_port, Some(9100));
    }

    #[test]
    fn garbage_and_out_of_range_fall_back() {
        let cfg = EngineConfig::from_lookup(lookup(&[
            ("FLEETRES_TIRE_WARNING_KM", "lots"),
            ("FLEETRES_MAX_RESERVATION_DAYS", "100000"),
            ("FLEETRES_METRICS_PORT", "99999"),
        ]));
        assert_eq!(cfg.tire_warning_km, DEFAULT_TIRE_WARNING_KM);
        assert_eq!(cfg.max_reservation_days, MAX_RESERVATION_DAYS);
        assert_eq!(cfg.metrics_port, None);

        let cfg = EngineConfig::from_lookup(lookup(&[("FLEETRES_MAX_RESERVATION_DAYS", "0")]));
        assert_eq!(cfg.max_reservation_days, MAX_RESERVATION_DAYS);
    }
}

use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::interval::{DateRange, Day};
use crate::limits::MAX_FUEL_LEVEL;
use crate::model::*;
use crate::observability::TRIPS_ACTIVE;

use super::{Candidate, Engine, EngineError, Justification, Verdict};

/// Readings taken when the vehicle leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Departure {
    pub trip_id: Ulid,
    pub start_odometer: u32,
    pub start_time: NaiveDateTime,
    pub fuel_level: u8,
}

/// Readings taken when the vehicle comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arrival {
    pub end_odometer: u32,
    pub end_time: NaiveDateTime,
    pub fuel_level: u8,
    pub expenses: Expenses,
}

/// A trip started without a prior reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTrip {
    pub driver_id: Ulid,
    pub vehicle_id: Ulid,
    pub route: Route,
    pub departure: Departure,
}

fn check_fuel(level: u8) -> Result<(), EngineError> {
    if level > MAX_FUEL_LEVEL {
        return Err(EngineError::InvalidField("fuel_level"));
    }
    Ok(())
}

/// A promoted trip must leave on a day its reservation holds.
fn check_departure_day(window: &DateRange, departure: &Departure) -> Result<(), EngineError> {
    let day = Day::from_naive(&departure.start_time);
    if day < window.start {
        return Err(EngineError::InvalidDateKind {
            start: window.start.as_datetime(),
            end: departure.start_time,
        });
    }
    if day > window.end {
        return Err(EngineError::InvalidDateKind {
            start: departure.start_time,
            end: window.end.as_datetime(),
        });
    }
    Ok(())
}

fn open_trip(
    reservation_id: Option<Ulid>,
    driver_id: Ulid,
    vehicle_id: Ulid,
    route: Route,
    planned_end: Day,
    departure: &Departure,
    audit: Vec<AuditEntry>,
) -> Trip {
    Trip {
        id: departure.trip_id,
        reservation_id,
        driver_id,
        vehicle_id,
        route,
        start_time: departure.start_time,
        start_odometer: departure.start_odometer,
        planned_end,
        fuel_level_out: departure.fuel_level,
        end_time: None,
        end_odometer: None,
        distance: None,
        fuel_level_in: None,
        expenses: None,
        is_cancelled: false,
        cancellation_reason: None,
        cancelled_by: None,
        audit,
    }
}

impl Engine {
    /// Departure readings must not roll the vehicle's odometer back.
    fn check_departure(&self, vehicle_id: Ulid, departure: &Departure) -> Result<(), EngineError> {
        check_fuel(departure.fuel_level)?;
        if self.trips.contains_key(&departure.trip_id) {
            return Err(EngineError::AlreadyExists(departure.trip_id));
        }
        let odometer = self
            .vehicles
            .get(&vehicle_id)
            .map(|v| v.current_odometer)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        if departure.start_odometer < odometer {
            return Err(EngineError::OdometerRegression {
                start: odometer,
                end: departure.start_odometer,
            });
        }
        Ok(())
    }

    /// Turn a live reservation into an active trip.
    pub async fn promote(&self, reservation_id: Ulid, departure: Departure) -> Result<Trip, EngineError> {
        let before = self
            .get_reservation(reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        let _lanes = self.lock_lanes(&[before.vehicle_id, before.driver_id]).await;

        let reservation = self
            .get_reservation(reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        if !reservation.is_live() {
            return Err(EngineError::AlreadyPromoted(reservation_id));
        }
        if reservation.vehicle_id != before.vehicle_id || reservation.driver_id != before.driver_id {
            return Err(EngineError::stale_version());
        }

        let verdict = self.evaluate(&Candidate::from_reservation(&reservation).for_promotion())?;
        match verdict {
            Verdict::RegionalRestriction(_) if reservation.regional_override.is_some() => {}
            other => other.into_result()?,
        }
        check_departure_day(&reservation.window, &departure)?;
        self.check_departure(reservation.vehicle_id, &departure)?;

        let trip = open_trip(
            Some(reservation.id),
            reservation.driver_id,
            reservation.vehicle_id,
            reservation.route.clone(),
            reservation.window.end,
            &departure,
            Vec::new(),
        );
        self.commit("promote", &[], Event::TripStarted { trip: trip.clone() }).await?;
        metrics::gauge!(TRIPS_ACTIVE).increment(1.0);
        tracing::info!("reservation {reservation_id} promoted to trip {}", trip.id);
        Ok(trip)
    }

    /// Open a trip with no reservation behind it. The trip occupies its
    /// departure day; a plate-rotation restriction needs a justification.
    pub async fn start_trip(&self, new: NewTrip, justification: Option<Justification>) -> Result<Trip, EngineError> {
        self.require_driver(new.driver_id)?;
        let _lanes = self.lock_lanes(&[new.vehicle_id, new.driver_id]).await;

        let day = Day::from_naive(&new.departure.start_time);
        let candidate =
            Candidate::booking(new.vehicle_id, new.driver_id, DateRange::single(day), new.route.clone()).for_promotion();
        let mut entries = Vec::new();
        match self.evaluate(&candidate)? {
            Verdict::RegionalRestriction(weekday) => {
                let justification = justification
                    .as_ref()
                    .filter(|j| !j.reason.trim().is_empty())
                    .ok_or(EngineError::RegionalRestrictionUnjustified(weekday))?;
                justification.validate()?;
                entries.push(self.audit_entry(
                    new.departure.trip_id,
                    AuditAction::RegionalOverride,
                    justification,
                ));
            }
            other => other.into_result()?,
        }
        self.check_departure(new.vehicle_id, &new.departure)?;

        let trip = open_trip(
            None,
            new.driver_id,
            new.vehicle_id,
            new.route,
            day,
            &new.departure,
            entries.clone(),
        );
        self.commit("start_trip", &entries, Event::TripStarted { trip: trip.clone() }).await?;
        metrics::gauge!(TRIPS_ACTIVE).increment(1.0);
        tracing::info!("ad-hoc trip {} started on vehicle {}", trip.id, trip.vehicle_id);
        Ok(trip)
    }

    /// Close an active trip with its arrival readings.
    pub async fn complete_trip(&self, trip_id: Ulid, arrival: Arrival) -> Result<Trip, EngineError> {
        check_fuel(arrival.fuel_level)?;
        let before = self.get_trip(trip_id).ok_or(EngineError::NotFound(trip_id))?;
        let _lanes = self.lock_lanes(&[before.vehicle_id, before.driver_id]).await;

        let trip = self.get_trip(trip_id).ok_or(EngineError::NotFound(trip_id))?;
        if !trip.is_active() {
            return Err(EngineError::AlreadyClosed(trip_id));
        }
        if arrival.end_odometer < trip.start_odometer {
            return Err(EngineError::OdometerRegression {
                start: trip.start_odometer,
                end: arrival.end_odometer,
            });
        }
        if arrival.end_time < trip.start_time {
            return Err(EngineError::InvalidDateKind {
                start: trip.start_time,
                end: arrival.end_time,
            });
        }
        if arrival.end_odometer == trip.start_odometer {
            tracing::info!("trip {trip_id} closed with zero distance");
        }
        tracing::info!(
            "trip {trip_id} completed, {} km, expenses {} cents",
            arrival.end_odometer - trip.start_odometer,
            arrival.expenses.total_cents()
        );

        self.commit(
            "complete_trip",
            &[],
            Event::TripCompleted {
                id: trip_id,
                vehicle_id: trip.vehicle_id,
                end_time: arrival.end_time,
                end_odometer: arrival.end_odometer,
                fuel_level: arrival.fuel_level,
                expenses: arrival.expenses,
            },
        )
        .await?;
        metrics::gauge!(TRIPS_ACTIVE).decrement(1.0);
        self.get_trip(trip_id).ok_or(EngineError::NotFound(trip_id))
    }

    /// Cancel an active trip. The vehicle goes back to Available with its
    /// odometer and fuel as they were.
    pub async fn cancel_trip(&self, trip_id: Ulid, justification: Justification) -> Result<Trip, EngineError> {
        justification.validate()?;
        let before = self.get_trip(trip_id).ok_or(EngineError::NotFound(trip_id))?;
        let _lanes = self.lock_lanes(&[before.vehicle_id, before.driver_id]).await;

        let trip = self.get_trip(trip_id).ok_or(EngineError::NotFound(trip_id))?;
        if !trip.is_active() {
            return Err(EngineError::AlreadyClosed(trip_id));
        }

        let entry = self.audit_entry(trip_id, AuditAction::TripCancelled, &justification);
        let entries = [entry.clone()];
        self.commit(
            "cancel_trip",
            &entries,
            Event::TripCancelled {
                id: trip_id,
                vehicle_id: trip.vehicle_id,
                entry,
            },
        )
        .await?;
        metrics::gauge!(TRIPS_ACTIVE).decrement(1.0);
        tracing::info!("trip {trip_id} cancelled by {}", justification.actor_id);
        self.get_trip(trip_id).ok_or(EngineError::NotFound(trip_id))
    }

    /// Where a reservation or trip stands. A promoted reservation reports
    /// the state of its trip.
    pub fn lifecycle_state(&self, id: Ulid) -> Result<LifecycleState, EngineError> {
        if let Some(trip) = self.trips.get(&id) {
            return Ok(trip.state());
        }
        let promoted_to = self
            .reservations
            .get(&id)
            .map(|r| r.promoted_to)
            .ok_or(EngineError::NotFound(id))?;
        match promoted_to {
            None => Ok(LifecycleState::Scheduled),
            Some(trip_id) => self
                .trips
                .get(&trip_id)
                .map(|t| t.state())
                .ok_or(EngineError::NotFound(trip_id)),
        }
    }
}

use ulid::Ulid;

use crate::interval::{DateRange, Day};
use crate::limits::*;
use crate::model::*;

use super::{Candidate, Engine, EngineError, Justification, Verdict};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub id: Ulid,
    pub driver_id: Ulid,
    pub vehicle_id: Ulid,
    pub kind: ReservationKind,
    pub start: Day,
    /// Ignored for `Single` reservations, which always end on `start`.
    pub end: Day,
    pub route: Route,
    pub notes: Option<String>,
}

impl NewReservation {
    pub fn single(id: Ulid, vehicle_id: Ulid, driver_id: Ulid, day: Day, route: Route) -> Self {
        Self {
            id,
            driver_id,
            vehicle_id,
            kind: ReservationKind::Single,
            start: day,
            end: day,
            route,
            notes: None,
        }
    }

    pub fn range(id: Ulid, vehicle_id: Ulid, driver_id: Ulid, start: Day, end: Day, route: Route) -> Self {
        Self {
            id,
            driver_id,
            vehicle_id,
            kind: ReservationKind::RecurringRange,
            start,
            end,
            route,
            notes: None,
        }
    }

    /// The candidate this request would be classified as.
    pub fn candidate(&self) -> Result<Candidate, EngineError> {
        let window = window_for(self.kind, self.start, self.end)?;
        Ok(Candidate::booking(self.vehicle_id, self.driver_id, window, self.route.clone()))
    }
}

/// Partial edit of a reservation. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationChanges {
    pub vehicle_id: Option<Ulid>,
    pub driver_id: Option<Ulid>,
    pub kind: Option<ReservationKind>,
    pub start: Option<Day>,
    pub end: Option<Day>,
    pub route: Option<Route>,
    pub notes: Option<Option<String>>,
}

impl ReservationChanges {
    /// Apply to a copy of `current`. The window is rebuilt and validated.
    pub fn apply_to(&self, current: &Reservation) -> Result<Reservation, EngineError> {
        let mut next = current.clone();
        if let Some(v) = self.vehicle_id {
            next.vehicle_id = v;
        }
        if let Some(d) = self.driver_id {
            next.driver_id = d;
        }
        if let Some(k) = self.kind {
            next.kind = k;
        }
        let start = self.start.unwrap_or(current.window.start);
        let end = self.end.unwrap_or(current.window.end);
        next.window = window_for(next.kind, start, end)?;
        if let Some(route) = &self.route {
            next.route = route.clone();
        }
        if let Some(notes) = &self.notes {
            next.notes = notes.clone();
        }
        Ok(next)
    }
}

fn window_for(kind: ReservationKind, start: Day, end: Day) -> Result<DateRange, EngineError> {
    match kind {
        ReservationKind::Single => Ok(DateRange::single(start)),
        ReservationKind::RecurringRange => DateRange::new(start, end),
    }
}

/// Vehicle, driver, or either date changed.
fn is_material(current: &Reservation, next: &Reservation) -> bool {
    current.vehicle_id != next.vehicle_id || current.driver_id != next.driver_id || current.window != next.window
}

fn validate_text(route: &Route, notes: Option<&String>) -> Result<(), EngineError> {
    for field in [&route.origin, &route.destination, &route.city, &route.state] {
        if field.len() > MAX_ROUTE_FIELD_LEN {
            return Err(EngineError::LimitExceeded("route field too long"));
        }
    }
    if notes.is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(())
}

impl Engine {
    fn check_window_width(&self, window: &DateRange) -> Result<(), EngineError> {
        if window.days() > self.max_reservation_days {
            return Err(EngineError::LimitExceeded("reservation window too wide"));
        }
        Ok(())
    }

    /// Turn a fresh verdict into a commit decision.
    ///
    /// Hard blocks fail outright. Otherwise the verdict must match what the
    /// caller saw, and a regional restriction needs a justification, which
    /// becomes the override entry returned here.
    fn admit(
        &self,
        subject_id: Ulid,
        fresh: Verdict,
        seen: Verdict,
        justification: Option<&Justification>,
    ) -> Result<Option<AuditEntry>, EngineError> {
        if fresh.is_hard_block() {
            fresh.into_result()?;
        }
        if fresh != seen {
            return Err(EngineError::stale(fresh));
        }
        match fresh {
            Verdict::RegionalRestriction(weekday) => {
                let justification = justification
                    .filter(|j| !j.reason.trim().is_empty())
                    .ok_or(EngineError::RegionalRestrictionUnjustified(weekday))?;
                justification.validate()?;
                Ok(Some(self.audit_entry(subject_id, AuditAction::RegionalOverride, justification)))
            }
            _ => Ok(None),
        }
    }

    /// Persist a new reservation. `seen` is the verdict the caller obtained
    /// from `classify`; the store re-validates and refuses if it has moved.
    pub async fn create_reservation(
        &self,
        new: NewReservation,
        seen: Verdict,
        justification: Option<Justification>,
    ) -> Result<Reservation, EngineError> {
        let candidate = new.candidate()?;
        self.check_window_width(&candidate.window)?;
        validate_text(&new.route, new.notes.as_ref())?;
        self.require_driver(new.driver_id)?;

        let _lanes = self.lock_lanes(&[new.vehicle_id, new.driver_id]).await;
        if self.reservations.contains_key(&new.id) {
            return Err(EngineError::AlreadyExists(new.id));
        }

        let fresh = self.evaluate(&candidate)?;
        let regional_override = self.admit(new.id, fresh, seen, justification.as_ref())?;

        let reservation = Reservation {
            id: new.id,
            driver_id: new.driver_id,
            vehicle_id: new.vehicle_id,
            kind: new.kind,
            window: candidate.window,
            route: new.route,
            notes: new.notes,
            version: 1,
            regional_override: regional_override.clone(),
            audit: regional_override.iter().cloned().collect(),
            promoted_to: None,
        };
        let entries: Vec<AuditEntry> = regional_override.into_iter().collect();
        self.commit(
            "create_reservation",
            &entries,
            Event::ReservationCreated {
                reservation: reservation.clone(),
            },
        )
        .await?;
        Ok(reservation)
    }

    /// Edit a reservation. `expected_version` is the version the caller read;
    /// material edits (vehicle, driver, dates) need a justification.
    pub async fn update_reservation(
        &self,
        id: Ulid,
        expected_version: u64,
        changes: ReservationChanges,
        seen: Verdict,
        justification: Option<Justification>,
    ) -> Result<Reservation, EngineError> {
        let before = self.get_reservation(id).ok_or(EngineError::NotFound(id))?;
        if !before.is_live() {
            return Err(EngineError::AlreadyPromoted(id));
        }
        let preview = changes.apply_to(&before)?;

        let _lanes = self
            .lock_lanes(&[before.vehicle_id, before.driver_id, preview.vehicle_id, preview.driver_id])
            .await;

        let current = self.get_reservation(id).ok_or(EngineError::NotFound(id))?;
        if !current.is_live() {
            return Err(EngineError::AlreadyPromoted(id));
        }
        if current.version != expected_version {
            return Err(EngineError::stale_version());
        }

        let mut next = changes.apply_to(&current)?;
        self.check_window_width(&next.window)?;
        validate_text(&next.route, next.notes.as_ref())?;
        if next.driver_id != current.driver_id {
            self.require_driver(next.driver_id)?;
        }

        let material = is_material(&current, &next);
        let mut entries = Vec::new();
        if material {
            let justification = justification.as_ref().ok_or(EngineError::ReasonRequired)?;
            justification.validate()?;
            entries.push(self.audit_entry(id, AuditAction::ReservationEdited, justification));
        }

        let fresh = self.evaluate(&Candidate::from_reservation(&next))?;
        let keeps_override = !material && next.route == current.route && current.regional_override.is_some();
        next.regional_override = match fresh {
            Verdict::RegionalRestriction(_) if keeps_override && fresh == seen => current.regional_override.clone(),
            _ => {
                let granted = self.admit(id, fresh, seen, justification.as_ref())?;
                if let Some(entry) = &granted {
                    entries.push(entry.clone());
                }
                granted
            }
        };

        next.version = current.version + 1;
        next.audit.extend(entries.iter().cloned());
        self.commit(
            "update_reservation",
            &entries,
            Event::ReservationUpdated {
                previous_vehicle_id: current.vehicle_id,
                reservation: next.clone(),
            },
        )
        .await?;
        Ok(next)
    }

    /// Remove a reservation that has not been promoted. Always audited.
    pub async fn delete_reservation(
        &self,
        id: Ulid,
        expected_version: u64,
        justification: Justification,
    ) -> Result<(), EngineError> {
        justification.validate()?;
        let before = self.get_reservation(id).ok_or(EngineError::NotFound(id))?;
        let _lanes = self.lock_lanes(&[before.vehicle_id, before.driver_id]).await;

        let current = self.get_reservation(id).ok_or(EngineError::NotFound(id))?;
        if !current.is_live() {
            return Err(EngineError::AlreadyPromoted(id));
        }
        if current.version != expected_version {
            return Err(EngineError::stale_version());
        }

        let entry = self.audit_entry(id, AuditAction::ReservationDeleted, &justification);
        let entries = [entry.clone()];
        self.commit(
            "delete_reservation",
            &entries,
            Event::ReservationDeleted {
                id,
                vehicle_id: current.vehicle_id,
                entry,
            },
        )
        .await
    }
}

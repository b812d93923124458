use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Weekday};
use serde::{Deserialize, Serialize};

use crate::engine::EngineError;

fn midday() -> NaiveTime {
    NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default()
}

/// A calendar day pinned to 12:00 wall-clock time.
///
/// Every date that takes part in an overlap comparison goes through this type,
/// so a timestamp recorded near midnight or across a DST change still lands on
/// the day it was entered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Day(NaiveDateTime);

impl Day {
    pub fn new(date: NaiveDate) -> Self {
        Self(date.and_time(midday()))
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self::new)
    }

    /// The local calendar day of a timestamp, in the timestamp's own offset.
    pub fn from_timestamp<Tz: TimeZone>(ts: &DateTime<Tz>) -> Self {
        Self::new(ts.date_naive())
    }

    pub fn from_naive(ts: &NaiveDateTime) -> Self {
        Self::new(ts.date())
    }

    pub fn date(&self) -> NaiveDate {
        self.0.date()
    }

    pub fn weekday(&self) -> Weekday {
        self.0.weekday()
    }

    pub fn as_datetime(&self) -> NaiveDateTime {
        self.0
    }
}

impl From<NaiveDate> for Day {
    fn from(date: NaiveDate) -> Self {
        Self::new(date)
    }
}

impl std::fmt::Display for Day {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.date())
    }
}

/// Closed interval `[start, end]` of calendar days. A single-day range has `start == end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Day,
    pub end: Day,
}

impl DateRange {
    pub fn new(start: Day, end: Day) -> Result<Self, EngineError> {
        if start > end {
            return Err(EngineError::InvalidDateKind {
                start: start.as_datetime(),
                end: end.as_datetime(),
            });
        }
        Ok(Self { start, end })
    }

    pub fn single(day: Day) -> Self {
        Self { start: day, end: day }
    }

    /// Number of calendar days covered, both ends included.
    pub fn days(&self) -> i64 {
        (self.end.date() - self.start.date()).num_days() + 1
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains(&self, day: Day) -> bool {
        self.start <= day && day <= self.end
    }
}

/// Closed-interval overlap test over calendar days.
pub fn overlaps(a_start: Day, a_end: Day, b_start: Day, b_end: Day) -> Result<bool, EngineError> {
    let a = DateRange::new(a_start, a_end)?;
    let b = DateRange::new(b_start, b_end)?;
    Ok(a.overlaps(&b))
}

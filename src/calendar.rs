//! Plate-rotation ("rodízio") calendar rules.
//!
//! A vehicle whose plate ends in a given digit may not circulate inside the
//! restricted area on one weekday. Weekends are free for every plate.

use chrono::Weekday;

use crate::interval::Day;

/// Weekday on which plates ending in `digit` are barred, if any.
pub fn restriction_weekday(digit: u8) -> Option<Weekday> {
    match digit {
        1 | 2 => Some(Weekday::Mon),
        3 | 4 => Some(Weekday::Tue),
        5 | 6 => Some(Weekday::Wed),
        7 | 8 => Some(Weekday::Thu),
        9 | 0 => Some(Weekday::Fri),
        _ => None,
    }
}

pub fn is_restricted(digit: u8, day: Day) -> bool {
    restriction_weekday(digit) == Some(day.weekday())
}

pub fn restriction_label(digit: u8) -> &'static str {
    match restriction_weekday(digit) {
        Some(weekday) => weekday_name(weekday),
        None => "none",
    }
}

pub fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Last digit of a plate. Plates ending in a letter are exempt and yield `None`.
pub fn plate_digit(plate: &str) -> Option<u8> {
    let last = plate.trim_end().chars().last()?;
    last.to_digit(10).map(|d| d as u8)
}

/// `Some(restricted)` for plates the rule applies to, `None` when the plate is exempt.
pub fn plate_restricted(plate: &str, day: Day) -> Option<bool> {
    plate_digit(plate).map(|digit| is_restricted(digit, day))
}

/// Decides whether a trip's destination falls inside the restricted area.
///
/// The built-in matcher is a text heuristic. Hosts with a geocoder can swap
/// in their own implementation.
pub trait LocationMatcher: Send + Sync {
    fn applies(&self, city: &str, state: &str, destination: &str) -> bool;
}

/// Approximate São Paulo matcher over free-text route fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaoPauloMatcher;

impl LocationMatcher for SaoPauloMatcher {
    fn applies(&self, city: &str, state: &str, destination: &str) -> bool {
        applies_to_location(city, state, destination)
    }
}

const CITY: &str = "sao paulo";
const STATE: &str = "sp";

pub fn applies_to_location(city: &str, state: &str, destination: &str) -> bool {
    let city = fold(city);
    let state = fold(state);
    let destination = fold(destination);

    if city.contains(CITY) || destination.contains(CITY) {
        return true;
    }
    if state.trim() == STATE {
        return true;
    }
    // "Campinas - SP", "Santos, SP", "Osasco/SP"
    let tail: String = destination
        .chars()
        .map(|c| if matches!(c, ',' | '-' | '/') { ' ' } else { c })
        .collect();
    tail.trim_end().ends_with(" sp")
}

/// Lowercase and strip the Portuguese diacritics.
fn fold(text: &str) -> String {
    text.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

/// Longest window a single reservation may cover, in days.
pub const MAX_RESERVATION_DAYS: i64 = 366;

pub const MAX_PLATE_LEN: usize = 16;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_ROUTE_FIELD_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 2048;
pub const MAX_REASON_LEN: usize = 1024;
pub const MAX_MAINTENANCE_CATEGORIES: usize = 32;

pub const MAX_FUEL_LEVEL: u8 = 100;

pub mod alerts;
pub mod audit;
pub mod calendar;
pub mod clock;
pub mod config;
pub mod engine;
pub mod interval;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;

pub mod calendar;
pub mod config;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod occurrence;
pub mod ports;
pub mod reservation;
pub mod state_machine;
pub mod store;
pub mod sweep;
pub mod validation;

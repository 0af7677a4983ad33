//! Marketplace store: schema, models and queries

pub mod bookings;
pub mod conversions;
pub mod init;
pub mod matches;
pub mod models;
pub mod people;
pub mod slot_cache;
pub mod therapists;

pub use init::{create_schema, init_database, init_in_memory};
pub use models::*;
pub use bookings::NewBooking;
pub use people::NewPerson;
pub use therapists::NewTherapist;

//! # Therapist Matching Common Library
//!
//! Shared code for the marketplace service and scripts including:
//! - Store schema, models and queries
//! - Match status transition table
//! - Calendar slot generation
//! - Enhanced-conversion identifier hashing
//! - Configuration loading
//! - The event log helper used for operational logging

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod hashing;
pub mod matching;
pub mod slots;
pub mod time;

pub use error::{Error, Result};
pub use matching::{MatchStatus, TherapistAction, Transition};

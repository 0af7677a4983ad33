//! Match status transitions
//!
//! A match pairs one patient with one therapist. Its status only moves along
//! the edges of [`MatchStatus::allowed_next`]; asking for the state a match is
//! already in is an idempotent no-op so that retried links and double clicks
//! do not produce errors or duplicate notifications.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Suggested to the patient by an admin
    Proposed,
    /// Patient picked this therapist
    PatientSelected,
    /// Therapist agreed to take the patient
    Accepted,
    Declined,
    /// Therapist reached out to the patient directly
    TherapistContacted,
    SessionBooked,
    Completed,
    Failed,
}

impl MatchStatus {
    pub const ALL: [MatchStatus; 8] = [
        MatchStatus::Proposed,
        MatchStatus::PatientSelected,
        MatchStatus::Accepted,
        MatchStatus::Declined,
        MatchStatus::TherapistContacted,
        MatchStatus::SessionBooked,
        MatchStatus::Completed,
        MatchStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Proposed => "proposed",
            MatchStatus::PatientSelected => "patient_selected",
            MatchStatus::Accepted => "accepted",
            MatchStatus::Declined => "declined",
            MatchStatus::TherapistContacted => "therapist_contacted",
            MatchStatus::SessionBooked => "session_booked",
            MatchStatus::Completed => "completed",
            MatchStatus::Failed => "failed",
        }
    }

    /// States reachable in one step
    pub fn allowed_next(&self) -> &'static [MatchStatus] {
        use MatchStatus::*;
        match self {
            Proposed => &[PatientSelected, Declined, Failed],
            PatientSelected => &[Accepted, Declined, TherapistContacted, SessionBooked, Failed],
            Accepted => &[TherapistContacted, SessionBooked, Failed],
            TherapistContacted => &[SessionBooked, Failed],
            SessionBooked => &[Completed, Failed],
            Declined | Completed | Failed => &[],
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_next().is_empty()
    }

    /// Still counts against the patient's proposal limit
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    /// Column stamped with the transition time when a match enters this state
    pub fn timestamp_column(&self) -> Option<&'static str> {
        match self {
            MatchStatus::Proposed => None,
            MatchStatus::PatientSelected => Some("patient_selected_at"),
            MatchStatus::Accepted | MatchStatus::Declined => Some("therapist_responded_at"),
            MatchStatus::TherapistContacted => Some("therapist_contacted_at"),
            MatchStatus::SessionBooked => Some("session_booked_at"),
            MatchStatus::Completed => Some("completed_at"),
            MatchStatus::Failed => Some("failed_at"),
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        MatchStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown match status: {}", s)))
    }
}

/// Outcome of checking a requested status change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Write the new status
    Apply { from: MatchStatus, to: MatchStatus },
    /// Nothing to write
    AlreadyInState(MatchStatus),
}

impl Transition {
    pub fn is_change(&self) -> bool {
        matches!(self, Transition::Apply { .. })
    }
}

/// Decide whether `from -> to` is allowed
pub fn plan_transition(from: MatchStatus, to: MatchStatus) -> Result<Transition> {
    if from == to {
        return Ok(Transition::AlreadyInState(from));
    }
    if from.allowed_next().contains(&to) {
        Ok(Transition::Apply { from, to })
    } else {
        Err(Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Therapist response to a selected match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TherapistAction {
    Accept,
    Decline,
}

impl TherapistAction {
    pub fn target_status(&self) -> MatchStatus {
        match self {
            TherapistAction::Accept => MatchStatus::Accepted,
            TherapistAction::Decline => MatchStatus::Declined,
        }
    }
}

//! Database models

use crate::matching::MatchStatus;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Patient lead
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Person {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub city: Option<String>,
    pub session_preference: String,
    pub issue: Option<String>,
    pub status: String,
    #[serde(skip_serializing)]
    pub confirm_token: String,
    pub gclid: Option<String>,
    pub campaign_source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Person {
    pub fn status(&self) -> Result<PersonStatus> {
        self.status.parse()
    }

    /// First name for email salutations
    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Therapist {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub city: Option<String>,
    /// JSON array of modality names
    pub modalities: String,
    pub accepts_online: bool,
    pub status: String,
    pub cal_username: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Therapist {
    pub fn status(&self) -> Result<TherapistStatus> {
        self.status.parse()
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn modality_list(&self) -> Vec<String> {
        serde_json::from_str(&self.modalities).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Match {
    pub id: String,
    pub secure_uuid: String,
    pub patient_id: String,
    pub therapist_id: String,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub patient_selected_at: Option<DateTime<Utc>>,
    pub therapist_responded_at: Option<DateTime<Utc>>,
    pub therapist_contacted_at: Option<DateTime<Utc>>,
    pub session_booked_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub patient_reminder_sent_at: Option<DateTime<Utc>>,
    pub therapist_reminder_sent_at: Option<DateTime<Utc>>,
}

impl Match {
    pub fn status(&self) -> Result<MatchStatus> {
        self.status.parse()
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Booking {
    pub id: String,
    pub match_id: Option<String>,
    pub patient_id: String,
    pub therapist_id: String,
    pub cal_booking_uid: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EventRecord {
    pub id: String,
    pub level: String,
    pub event_type: String,
    pub source: String,
    pub properties: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ConversionRecord {
    pub id: String,
    pub person_id: String,
    pub conversion_action: String,
    pub order_id: String,
    pub value: f64,
    pub status: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub uploaded_at: Option<DateTime<Utc>>,
}

/// Implements `as_str`, `Display` and `FromStr` for a string-backed status enum
macro_rules! string_enum {
    ($name:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::InvalidInput(format!(concat!("Unknown ", $label, ": {}"), other))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonStatus {
    New,
    EmailConfirmed,
    Matched,
    Rejected,
}

string_enum!(PersonStatus, "person status", {
    New => "new",
    EmailConfirmed => "email_confirmed",
    Matched => "matched",
    Rejected => "rejected",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TherapistStatus {
    PendingVerification,
    Verified,
    Rejected,
}

string_enum!(TherapistStatus, "therapist status", {
    PendingVerification => "pending_verification",
    Verified => "verified",
    Rejected => "rejected",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionPreference {
    Online,
    InPerson,
    #[default]
    Either,
}

string_enum!(SessionPreference, "session preference", {
    Online => "online",
    InPerson => "in_person",
    Either => "either",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

string_enum!(EventLevel, "event level", {
    Info => "info",
    Warn => "warn",
    Error => "error",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionStatus {
    Pending,
    Uploaded,
    Failed,
}

string_enum!(ConversionStatus, "conversion status", {
    Pending => "pending",
    Uploaded => "uploaded",
    Failed => "failed",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_enums_parse() {
        assert_eq!("email_confirmed".parse::<PersonStatus>().unwrap(), PersonStatus::EmailConfirmed);
        assert_eq!("in_person".parse::<SessionPreference>().unwrap(), SessionPreference::InPerson);
        assert_eq!(TherapistStatus::PendingVerification.to_string(), "pending_verification");
        let err = "maybe".parse::<EventLevel>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid input: Unknown event level: maybe");
    }

    #[test]
    fn test_serde_matches_db_text() {
        let json = serde_json::to_string(&SessionPreference::InPerson).unwrap();
        assert_eq!(json, format!("\"{}\"", SessionPreference::InPerson.as_str()));
    }
}

//! Bookable slot generation
//!
//! Turns a therapist's recurring weekly availability (plus per-date overrides)
//! into concrete appointment slots, minus anything already booked.
//!
//! Windows are interpreted in the schedule's own timezone; slots are returned
//! in UTC together with the local date and time the patient will see.

use crate::{Error, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Longest slot a schedule may ask for
pub const MAX_SLOT_MINUTES: i64 = 24 * 60;

/// Recurring availability on a set of weekdays (0 = Sunday)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyWindow {
    pub weekdays: Vec<u32>,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Availability replacing the weekly windows on one date.
///
/// An override whose start equals its end marks the date as unavailable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateOverride {
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// IANA timezone name, e.g. `Europe/Berlin`
    pub timezone: String,
    pub slot_minutes: i64,
    pub minimum_notice_minutes: i64,
    pub weekly: Vec<WeeklyWindow>,
    pub overrides: Vec<DateOverride>,
}

/// An existing booking, in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Slot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Local date in the schedule timezone
    pub date: NaiveDate,
    /// Local start time, `HH:MM`
    pub time: String,
}

impl Schedule {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| Error::InvalidInput(format!("Unknown timezone '{}': {}", self.timezone, e)))
    }

    /// Local windows that apply on `date`
    fn windows_for(&self, date: NaiveDate) -> Vec<(NaiveDateTime, NaiveDateTime)> {
        let overrides: Vec<&DateOverride> =
            self.overrides.iter().filter(|o| o.date == date).collect();

        let raw: Vec<(NaiveTime, NaiveTime)> = if overrides.is_empty() {
            let weekday = date.weekday().num_days_from_sunday();
            self.weekly
                .iter()
                .filter(|w| w.weekdays.contains(&weekday))
                .map(|w| (w.start, w.end))
                .collect()
        } else {
            overrides
                .iter()
                .filter(|o| o.start != o.end)
                .map(|o| (o.start, o.end))
                .collect()
        };

        raw.into_iter()
            .filter_map(|(start, end)| {
                let start_dt = date.and_time(start);
                let end_dt = if end > start {
                    date.and_time(end)
                } else if end == NaiveTime::MIN {
                    // 00:00 as an end time means end of day
                    date.succ_opt()?.and_time(NaiveTime::MIN)
                } else {
                    return None;
                };
                Some((start_dt, end_dt))
            })
            .collect()
    }
}

/// Enumerate free slots for `days_ahead` local days starting at today.
pub fn generate_slots(
    schedule: &Schedule,
    busy: &[BusyInterval],
    now: DateTime<Utc>,
    days_ahead: u32,
) -> Result<Vec<Slot>> {
    if !(1..=MAX_SLOT_MINUTES).contains(&schedule.slot_minutes) {
        return Err(Error::InvalidInput(format!(
            "Slot length must be between 1 and {} minutes, got {}",
            MAX_SLOT_MINUTES, schedule.slot_minutes
        )));
    }

    let tz = schedule.tz()?;
    let step = Duration::minutes(schedule.slot_minutes);
    // A notice beyond the representable range leaves nothing bookable
    let Some(earliest_start) = Duration::try_minutes(schedule.minimum_notice_minutes.max(0))
        .and_then(|notice| now.checked_add_signed(notice))
    else {
        return Ok(Vec::new());
    };
    let today = now.with_timezone(&tz).date_naive();

    let mut slots = Vec::new();
    for offset in 0..days_ahead {
        let Some(date) = today.checked_add_signed(Duration::days(i64::from(offset))) else {
            break;
        };

        for (window_start, window_end) in schedule.windows_for(date) {
            let mut local_start = window_start;
            while let Some(local_end) = local_start
                .checked_add_signed(step)
                .filter(|end| *end <= window_end)
            {

                let start = tz.from_local_datetime(&local_start).earliest();
                let end = tz.from_local_datetime(&local_end).earliest();

                // Local times skipped by a DST jump have no instant
                if let (Some(start), Some(end)) = (start, end) {
                    let start = start.with_timezone(&Utc);
                    let end = end.with_timezone(&Utc);
                    if start >= earliest_start && !overlaps_any(start, end, busy) {
                        slots.push(Slot {
                            start,
                            end,
                            date: local_start.date(),
                            time: local_start.format("%H:%M").to_string(),
                        });
                    }
                }

                local_start = local_end;
            }
        }
    }

    slots.sort();
    slots.dedup_by(|a, b| a.start == b.start);
    Ok(slots)
}

/// Half-open overlap check against every busy interval
fn overlaps_any(start: DateTime<Utc>, end: DateTime<Utc>, busy: &[BusyInterval]) -> bool {
    busy.iter().any(|b| start < b.end && b.start < end)
}

/// A cache entry older than `ttl` must be recomputed
pub fn is_stale(cached_at: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> bool {
    now - cached_at >= ttl
}

/// Group slots by local date for the API response
pub fn group_by_date(slots: &[Slot]) -> BTreeMap<NaiveDate, Vec<Slot>> {
    let mut grouped: BTreeMap<NaiveDate, Vec<Slot>> = BTreeMap::new();
    for slot in slots {
        grouped.entry(slot.date).or_default().push(slot.clone());
    }
    grouped
}

//! Therapist availability from Cal.com
//!
//! The Cal.com database is read directly (read-only) rather than through its
//! HTTP API: one query each for the user, schedule, availability rows, event
//! type and bookings. [`compute_slots`] feeds the result into the shared
//! slot generator.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::str::FromStr;
use tm_common::slots::{generate_slots, BusyInterval, DateOverride, Schedule, Slot, WeeklyWindow};
use tm_common::{Error, Result};
use tracing::debug;

/// Timezone assumed when neither the schedule nor the user has one
pub const DEFAULT_TIMEZONE: &str = "Europe/Berlin";

/// Session length when the user has no visible event type
pub const DEFAULT_SLOT_MINUTES: i64 = 50;

#[async_trait]
pub trait CalendarSource: Send + Sync {
    /// Availability for a Cal.com user; `None` if the user does not exist
    async fn load_schedule(&self, cal_username: &str) -> Result<Option<Schedule>>;

    /// Accepted and pending bookings overlapping `from..to`
    async fn load_busy(
        &self,
        cal_username: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>>;
}

/// Free slots for the next `days_ahead` days; `None` if the user is unknown
pub async fn compute_slots(
    source: &dyn CalendarSource,
    cal_username: &str,
    now: DateTime<Utc>,
    days_ahead: u32,
) -> Result<Option<Vec<Slot>>> {
    let Some(schedule) = source.load_schedule(cal_username).await? else {
        return Ok(None);
    };

    // One extra day covers the timezone offset between UTC and local dates
    let horizon = now + Duration::days(days_ahead as i64 + 1);
    let busy = source.load_busy(cal_username, now, horizon).await?;
    let slots = generate_slots(&schedule, &busy, now, days_ahead)?;

    debug!(cal_username, slots = slots.len(), busy = busy.len(), "Computed slots");
    Ok(Some(slots))
}

/// Cal.com Postgres database
pub struct PgCalendarSource {
    pool: PgPool,
}

type AvailabilityRow = (Vec<i32>, NaiveTime, NaiveTime, Option<NaiveDate>);

impl PgCalendarSource {
    /// Connect with every transaction forced read-only
    pub async fn connect_readonly(database_url: &str) -> Result<Self> {
        let options = PgConnectOptions::from_str(database_url)
            .map_err(|e| Error::Config(format!("Invalid CAL_DATABASE_URL: {}", e)))?
            .options([("default_transaction_read_only", "on")]);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect_lazy_with(options);

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_user(&self, cal_username: &str) -> Result<Option<(i32, Option<String>, Option<i32>)>> {
        let user = sqlx::query_as::<_, (i32, Option<String>, Option<i32>)>(
            r#"SELECT id, "timeZone", "defaultScheduleId" FROM users WHERE username = $1"#,
        )
        .bind(cal_username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }
}

#[async_trait]
impl CalendarSource for PgCalendarSource {
    async fn load_schedule(&self, cal_username: &str) -> Result<Option<Schedule>> {
        let Some((user_id, user_tz, default_schedule)) = self.find_user(cal_username).await? else {
            return Ok(None);
        };

        let schedule = sqlx::query_as::<_, (i32, Option<String>)>(
            r#"
            SELECT id, "timeZone" FROM "Schedule"
            WHERE "userId" = $1
            ORDER BY COALESCE(id = $2, false) DESC, id
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(default_schedule)
        .fetch_optional(&self.pool)
        .await?;

        let (schedule_id, schedule_tz) = match schedule {
            Some((id, tz)) => (Some(id), tz),
            None => (None, None),
        };

        // Users without a Schedule row keep availability on the user itself
        let rows = sqlx::query_as::<_, AvailabilityRow>(
            r#"
            SELECT days, "startTime", "endTime", date FROM "Availability"
            WHERE ("scheduleId" = $1) OR ($1 IS NULL AND "userId" = $2)
            "#,
        )
        .bind(schedule_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let event_type = sqlx::query_as::<_, (i32, i32)>(
            r#"
            SELECT length, "minimumBookingNotice" FROM "EventType"
            WHERE "userId" = $1 AND hidden = false
            ORDER BY position DESC, id
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let (slot_minutes, minimum_notice_minutes) = event_type
            .map(|(length, notice)| (length as i64, notice as i64))
            .unwrap_or((DEFAULT_SLOT_MINUTES, 0));

        let timezone = schedule_tz
            .or(user_tz)
            .filter(|tz| !tz.is_empty())
            .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());

        Ok(Some(schedule_from_rows(
            timezone,
            slot_minutes,
            minimum_notice_minutes,
            rows,
        )))
    }

    async fn load_busy(
        &self,
        cal_username: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>> {
        // Booking times are stored as UTC without a zone
        let rows = sqlx::query_as::<_, (NaiveDateTime, NaiveDateTime)>(
            r#"
            SELECT b."startTime", b."endTime"
            FROM "Booking" b
            JOIN users u ON u.id = b."userId"
            WHERE u.username = $1
              AND b.status::text IN ('accepted', 'pending')
              AND b."endTime" > $2
              AND b."startTime" < $3
            ORDER BY b."startTime"
            "#,
        )
        .bind(cal_username)
        .bind(from.naive_utc())
        .bind(to.naive_utc())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(start, end)| BusyInterval {
                start: start.and_utc(),
                end: end.and_utc(),
            })
            .collect())
    }
}

/// Split availability rows into weekly windows and dated overrides
fn schedule_from_rows(
    timezone: String,
    slot_minutes: i64,
    minimum_notice_minutes: i64,
    rows: Vec<AvailabilityRow>,
) -> Schedule {
    let mut weekly = Vec::new();
    let mut overrides = Vec::new();

    for (days, start, end, date) in rows {
        match date {
            Some(date) => overrides.push(DateOverride { date, start, end }),
            None => weekly.push(WeeklyWindow {
                weekdays: days
                    .into_iter()
                    .filter_map(|d| u32::try_from(d).ok())
                    .filter(|d| *d < 7)
                    .collect(),
                start,
                end,
            }),
        }
    }

    Schedule {
        timezone,
        slot_minutes,
        minimum_notice_minutes,
        weekly,
        overrides,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_rows_split_into_weekly_and_overrides() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let schedule = schedule_from_rows(
            "Europe/Berlin".into(),
            50,
            120,
            vec![
                (vec![1, 2, 3, 9, -1], t(9, 0), t(17, 0), None),
                (vec![], t(10, 0), t(12, 0), Some(date)),
            ],
        );
        assert_eq!(schedule.weekly.len(), 1);
        assert_eq!(schedule.weekly[0].weekdays, vec![1, 2, 3]);
        assert_eq!(schedule.overrides, vec![DateOverride { date, start: t(10, 0), end: t(12, 0) }]);
        assert_eq!(schedule.minimum_notice_minutes, 120);
    }

    struct Fixed {
        schedule: Option<Schedule>,
        busy: Vec<BusyInterval>,
    }

    #[async_trait]
    impl CalendarSource for Fixed {
        async fn load_schedule(&self, _: &str) -> Result<Option<Schedule>> {
            Ok(self.schedule.clone())
        }

        async fn load_busy(&self, _: &str, _: DateTime<Utc>, _: DateTime<Utc>) -> Result<Vec<BusyInterval>> {
            Ok(self.busy.clone())
        }
    }

    #[tokio::test]
    async fn test_compute_slots_subtracts_busy() {
        // Monday 2024-06-03, 06:00 UTC = 08:00 Berlin
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 6, 0, 0).unwrap();
        let source = Fixed {
            schedule: Some(Schedule {
                timezone: "Europe/Berlin".into(),
                slot_minutes: 60,
                minimum_notice_minutes: 0,
                weekly: vec![WeeklyWindow { weekdays: vec![1], start: t(9, 0), end: t(12, 0) }],
                overrides: vec![],
            }),
            busy: vec![BusyInterval {
                start: Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap(),
                end: Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap(),
            }],
        };

        let slots = compute_slots(&source, "anna", now, 1).await.unwrap().unwrap();
        let times: Vec<&str> = slots.iter().map(|s| s.time.as_str()).collect();
        assert_eq!(times, vec!["09:00", "11:00"]);
    }

    #[tokio::test]
    async fn test_compute_slots_unknown_user() {
        let source = Fixed { schedule: None, busy: vec![] };
        assert!(compute_slots(&source, "ghost", Utc::now(), 7).await.unwrap().is_none());
    }
}

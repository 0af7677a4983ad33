//! Booking queries

use super::matches;
use super::models::Booking;
use crate::matching::Transition;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub match_id: Option<String>,
    pub patient_id: String,
    pub therapist_id: String,
    pub cal_booking_uid: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Record a booking and, when given, move its match in the same transaction.
///
/// Cal.com may deliver the same booking more than once, so an existing row
/// with the same uid is returned with `created = false` and the match is not
/// touched. If the match has left the status `transition` expects, nothing is
/// written and the call fails with `Conflict`.
pub async fn record_booking(
    pool: &SqlitePool,
    new: &NewBooking,
    transition: Option<Transition>,
    now: DateTime<Utc>,
) -> Result<(Booking, bool)> {
    if new.end_time <= new.start_time {
        return Err(Error::InvalidInput("Booking must end after it starts".to_string()));
    }

    let id = Uuid::new_v4().to_string();
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        INSERT INTO bookings (id, match_id, patient_id, therapist_id, cal_booking_uid,
                              start_time, end_time, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'confirmed', ?)
        ON CONFLICT (cal_booking_uid) DO NOTHING
        "#,
    )
    .bind(&id)
    .bind(&new.match_id)
    .bind(&new.patient_id)
    .bind(&new.therapist_id)
    .bind(&new.cal_booking_uid)
    .bind(new.start_time)
    .bind(new.end_time)
    .bind(now)
    .execute(&mut *tx)
    .await?;
    let created = result.rows_affected() == 1;

    if created {
        if let (Some(match_id), Some(Transition::Apply { from, to })) = (&new.match_id, transition) {
            if !matches::write_status(&mut *tx, match_id, from, to, now).await? {
                return Err(Error::Conflict(format!(
                    "Match {} is no longer {}, booking not recorded",
                    match_id, from
                )));
            }
        }
    }

    let booking = sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE cal_booking_uid = ?")
        .bind(&new.cal_booking_uid)
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok((booking, created))
}

pub async fn find_booking_by_uid(pool: &SqlitePool, cal_booking_uid: &str) -> Result<Option<Booking>> {
    let found = sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE cal_booking_uid = ?")
        .bind(cal_booking_uid)
        .fetch_optional(pool)
        .await?;
    Ok(found)
}

pub async fn get_booking_by_uid(pool: &SqlitePool, cal_booking_uid: &str) -> Result<Booking> {
    find_booking_by_uid(pool, cal_booking_uid)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Booking {}", cal_booking_uid)))
}

pub async fn count_bookings_since(pool: &SqlitePool, since: DateTime<Utc>) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bookings WHERE created_at >= ?")
        .bind(since)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

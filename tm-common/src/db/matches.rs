//! Match queries and status writes
//!
//! Status changes go through [`apply_transition`], which checks the
//! transition table and then writes with a compare-and-set on the previous
//! status. A concurrent writer that got there first turns into a `Conflict`
//! instead of a silent overwrite.

use super::models::Match;
use crate::matching::{plan_transition, MatchStatus, Transition};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

const OPEN_STATUS_FILTER: &str = "status NOT IN ('declined', 'completed', 'failed')";

pub async fn insert_match(
    pool: &SqlitePool,
    patient_id: &str,
    therapist_id: &str,
    now: DateTime<Utc>,
) -> Result<Match> {
    let id = Uuid::new_v4().to_string();
    let secure_uuid = Uuid::new_v4().to_string();

    let result = sqlx::query(
        r#"
        INSERT INTO matches (id, secure_uuid, patient_id, therapist_id, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, 'proposed', ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&secure_uuid)
    .bind(patient_id)
    .bind(therapist_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(Error::from);

    match result {
        Ok(_) => get_match(pool, &id).await,
        Err(e) if e.is_unique_violation() => Err(Error::Conflict(format!(
            "Match between patient {} and therapist {} already exists",
            patient_id, therapist_id
        ))),
        Err(e) => Err(e),
    }
}

pub async fn get_match(pool: &SqlitePool, id: &str) -> Result<Match> {
    sqlx::query_as::<_, Match>("SELECT * FROM matches WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Match {}", id)))
}

pub async fn get_match_by_secure_uuid(pool: &SqlitePool, secure_uuid: &str) -> Result<Match> {
    sqlx::query_as::<_, Match>("SELECT * FROM matches WHERE secure_uuid = ?")
        .bind(secure_uuid)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound("Match link is invalid or expired".to_string()))
}

/// The most recent match between a patient and a therapist, if any
pub async fn find_match_for_pair(
    pool: &SqlitePool,
    patient_id: &str,
    therapist_id: &str,
) -> Result<Option<Match>> {
    let found = sqlx::query_as::<_, Match>(
        "SELECT * FROM matches WHERE patient_id = ? AND therapist_id = ? ORDER BY created_at DESC LIMIT 1",
    )
    .bind(patient_id)
    .bind(therapist_id)
    .fetch_optional(pool)
    .await?;
    Ok(found)
}

/// Matches that have not reached a terminal status
pub async fn count_open_matches_for_patient(pool: &SqlitePool, patient_id: &str) -> Result<i64> {
    let sql = format!(
        "SELECT COUNT(*) FROM matches WHERE patient_id = ? AND {}",
        OPEN_STATUS_FILTER
    );
    let count: i64 = sqlx::query_scalar(&sql).bind(patient_id).fetch_one(pool).await?;
    Ok(count)
}

/// Newest first, optionally filtered by status
pub async fn list_matches(
    pool: &SqlitePool,
    status: Option<MatchStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Match>> {
    let rows = match status {
        Some(status) => {
            sqlx::query_as::<_, Match>(
                "SELECT * FROM matches WHERE status = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
            )
            .bind(status.as_str())
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, Match>(
                "SELECT * FROM matches ORDER BY created_at DESC LIMIT ? OFFSET ?",
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows)
}

pub async fn count_matches(pool: &SqlitePool, status: Option<MatchStatus>) -> Result<i64> {
    let count: i64 = match status {
        Some(status) => {
            sqlx::query_scalar("SELECT COUNT(*) FROM matches WHERE status = ?")
                .bind(status.as_str())
                .fetch_one(pool)
                .await?
        }
        None => {
            sqlx::query_scalar("SELECT COUNT(*) FROM matches")
                .fetch_one(pool)
                .await?
        }
    };
    Ok(count)
}

pub async fn count_matches_by_status(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT status, COUNT(*) FROM matches GROUP BY status ORDER BY status",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Compare-and-set status write that also stamps the status timestamp column.
///
/// Fails with `Conflict` if the row is no longer in `expected_from`.
pub async fn update_match_status(
    pool: &SqlitePool,
    id: &str,
    expected_from: MatchStatus,
    to: MatchStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    let written = {
        let mut conn = pool.acquire().await?;
        write_status(&mut *conn, id, expected_from, to, now).await?
    };

    if !written {
        // Distinguish a missing row from a lost race
        let current = get_match(pool, id).await?;
        return Err(Error::Conflict(format!(
            "Match {} changed concurrently: expected {}, found {}",
            id, expected_from, current.status
        )));
    }
    Ok(())
}

/// The bare compare-and-set. Returns false when the row was not in
/// `expected_from`, which leaves it untouched.
pub(crate) async fn write_status(
    conn: &mut SqliteConnection,
    id: &str,
    expected_from: MatchStatus,
    to: MatchStatus,
    now: DateTime<Utc>,
) -> Result<bool> {
    let stamp = to
        .timestamp_column()
        .map(|column| format!(", {} = ?", column))
        .unwrap_or_default();
    let sql = format!(
        "UPDATE matches SET status = ?, updated_at = ?{} WHERE id = ? AND status = ?",
        stamp
    );

    let mut query = sqlx::query(&sql).bind(to.as_str()).bind(now);
    if to.timestamp_column().is_some() {
        query = query.bind(now);
    }
    let result = query
        .bind(id)
        .bind(expected_from.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Check the transition table, write if needed, and return the fresh row
pub async fn apply_transition(
    pool: &SqlitePool,
    current: &Match,
    to: MatchStatus,
    now: DateTime<Utc>,
) -> Result<(Match, Transition)> {
    let from = current.status()?;
    let transition = plan_transition(from, to)?;

    if let Transition::Apply { from, to } = transition {
        update_match_status(pool, &current.id, from, to, now).await?;
    }

    let updated = get_match(pool, &current.id).await?;
    Ok((updated, transition))
}

pub async fn set_match_notes(
    pool: &SqlitePool,
    id: &str,
    notes: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE matches SET notes = ?, updated_at = ? WHERE id = ?")
        .bind(notes)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Selected matches the therapist has not answered since `selected_before`
pub async fn matches_awaiting_therapist(
    pool: &SqlitePool,
    selected_before: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Match>> {
    let rows = sqlx::query_as::<_, Match>(
        r#"
        SELECT * FROM matches
        WHERE status = 'patient_selected'
          AND patient_selected_at <= ?
          AND therapist_reminder_sent_at IS NULL
        ORDER BY patient_selected_at
        LIMIT ?
        "#,
    )
    .bind(selected_before)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Proposals the patient has not acted on since `proposed_before`
pub async fn proposals_awaiting_patient(
    pool: &SqlitePool,
    proposed_before: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Match>> {
    let rows = sqlx::query_as::<_, Match>(
        r#"
        SELECT * FROM matches
        WHERE status = 'proposed'
          AND created_at <= ?
          AND patient_reminder_sent_at IS NULL
        ORDER BY patient_id, created_at
        LIMIT ?
        "#,
    )
    .bind(proposed_before)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Who a reminder went to. Each side is reminded at most once per match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reminder {
    Patient,
    Therapist,
}

impl Reminder {
    fn column(self) -> &'static str {
        match self {
            Reminder::Patient => "patient_reminder_sent_at",
            Reminder::Therapist => "therapist_reminder_sent_at",
        }
    }
}

pub async fn mark_reminder_sent(
    pool: &SqlitePool,
    id: &str,
    reminder: Reminder,
    now: DateTime<Utc>,
) -> Result<()> {
    let sql = format!("UPDATE matches SET {} = ? WHERE id = ?", reminder.column());
    sqlx::query(&sql).bind(now).bind(id).execute(pool).await?;
    Ok(())
}

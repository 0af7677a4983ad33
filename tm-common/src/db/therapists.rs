//! Therapist queries

use super::models::{Therapist, TherapistStatus};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewTherapist {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub city: Option<String>,
    pub modalities: Vec<String>,
    pub accepts_online: bool,
    pub cal_username: Option<String>,
}

/// Insert a therapist lead; a second signup with the same email is a `Conflict`
pub async fn insert_therapist(
    pool: &SqlitePool,
    new: &NewTherapist,
    now: DateTime<Utc>,
) -> Result<Therapist> {
    let id = Uuid::new_v4().to_string();
    let modalities = serde_json::to_string(&new.modalities)?;

    let result = sqlx::query(
        r#"
        INSERT INTO therapists (id, first_name, last_name, email, phone, city, modalities,
                                accepts_online, status, cal_username, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending_verification', ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&new.first_name)
    .bind(&new.last_name)
    .bind(&new.email)
    .bind(&new.phone)
    .bind(&new.city)
    .bind(&modalities)
    .bind(new.accepts_online)
    .bind(&new.cal_username)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(Error::from);

    match result {
        Ok(_) => get_therapist(pool, &id).await,
        Err(e) if e.is_unique_violation() => Err(Error::Conflict(format!(
            "Therapist with email {} already registered",
            new.email
        ))),
        Err(e) => Err(e),
    }
}

pub async fn get_therapist(pool: &SqlitePool, id: &str) -> Result<Therapist> {
    sqlx::query_as::<_, Therapist>("SELECT * FROM therapists WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Therapist {}", id)))
}

pub async fn set_therapist_status(
    pool: &SqlitePool,
    id: &str,
    status: TherapistStatus,
    now: DateTime<Utc>,
) -> Result<Therapist> {
    let result = sqlx::query("UPDATE therapists SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Therapist {}", id)));
    }
    get_therapist(pool, id).await
}

/// Verified therapists that have a Cal.com account, oldest first
pub async fn list_verified_with_calendar(pool: &SqlitePool) -> Result<Vec<Therapist>> {
    let rows = sqlx::query_as::<_, Therapist>(
        r#"
        SELECT * FROM therapists
        WHERE status = 'verified' AND cal_username IS NOT NULL AND cal_username != ''
        ORDER BY created_at
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn count_therapists_by_status(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT status, COUNT(*) FROM therapists GROUP BY status ORDER BY status",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

//! Patient lead queries

use super::models::{Person, PersonStatus, SessionPreference};
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::SqlitePool;
use uuid::Uuid;

const CONFIRM_TOKEN_LEN: usize = 32;

/// Fields collected by the intake form
#[derive(Debug, Clone)]
pub struct NewPerson {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub city: Option<String>,
    pub session_preference: SessionPreference,
    pub issue: Option<String>,
    pub gclid: Option<String>,
    pub campaign_source: Option<String>,
}

pub async fn insert_person(pool: &SqlitePool, new: &NewPerson, now: DateTime<Utc>) -> Result<Person> {
    let id = Uuid::new_v4().to_string();
    let confirm_token = new_confirm_token();

    sqlx::query(
        r#"
        INSERT INTO people (id, name, email, phone, city, session_preference, issue, status,
                            confirm_token, gclid, campaign_source, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'new', ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&new.name)
    .bind(&new.email)
    .bind(&new.phone)
    .bind(&new.city)
    .bind(new.session_preference.as_str())
    .bind(&new.issue)
    .bind(&confirm_token)
    .bind(&new.gclid)
    .bind(&new.campaign_source)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    get_person(pool, &id).await
}

/// Random token for the emailed confirmation link
fn new_confirm_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CONFIRM_TOKEN_LEN)
        .map(char::from)
        .collect()
}

pub async fn get_person(pool: &SqlitePool, id: &str) -> Result<Person> {
    sqlx::query_as::<_, Person>("SELECT * FROM people WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Person {}", id)))
}

/// Most recent lead with this email (emails are stored lowercased)
pub async fn find_person_by_email(pool: &SqlitePool, email: &str) -> Result<Option<Person>> {
    let person = sqlx::query_as::<_, Person>(
        "SELECT * FROM people WHERE email = ? ORDER BY created_at DESC LIMIT 1",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(person)
}

/// Mark the email as confirmed.
///
/// Returns `(person, newly_confirmed)`. Confirming twice is not an error; a
/// lead that already moved past confirmation keeps its status.
pub async fn confirm_person(
    pool: &SqlitePool,
    id: &str,
    token: &str,
    now: DateTime<Utc>,
) -> Result<(Person, bool)> {
    let person = get_person(pool, id).await?;
    if person.confirm_token != token {
        return Err(Error::InvalidInput("Confirmation token does not match".to_string()));
    }

    if person.confirmed_at.is_some() {
        return Ok((person, false));
    }

    let result = sqlx::query(
        r#"
        UPDATE people
        SET status = CASE WHEN status = 'new' THEN 'email_confirmed' ELSE status END,
            confirmed_at = ?, updated_at = ?
        WHERE id = ? AND confirmed_at IS NULL
        "#,
    )
    .bind(now)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    let person = get_person(pool, id).await?;
    Ok((person, result.rows_affected() == 1))
}

pub async fn set_person_status(
    pool: &SqlitePool,
    id: &str,
    status: PersonStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    let result = sqlx::query("UPDATE people SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Person {}", id)));
    }
    Ok(())
}

pub async fn count_people_by_status(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT status, COUNT(*) FROM people GROUP BY status ORDER BY status",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Lead counts per UTC day between `from` and `to` inclusive; days with no
/// leads are absent
pub async fn count_leads_per_day(
    pool: &SqlitePool,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        r#"
        SELECT substr(created_at, 1, 10) AS day, COUNT(*)
        FROM people
        WHERE substr(created_at, 1, 10) BETWEEN ? AND ?
        GROUP BY day
        ORDER BY day
        "#,
    )
    .bind(from.format("%Y-%m-%d").to_string())
    .bind(to.format("%Y-%m-%d").to_string())
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

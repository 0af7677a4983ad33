//! Enhanced-conversion bookkeeping
//!
//! One row per (person, conversion action), keyed by a deterministic order id
//! so a conversion is never reported to Google Ads twice.

use super::models::ConversionRecord;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

/// Order id used for deduplication on both sides
pub fn conversion_order_id(person_id: &str, event: &str) -> String {
    format!("{}-{}", event, person_id)
}

/// Insert a pending conversion. Returns `None` if this order id was already
/// recorded.
pub async fn insert_conversion(
    pool: &SqlitePool,
    person_id: &str,
    conversion_action: &str,
    order_id: &str,
    value: f64,
    now: DateTime<Utc>,
) -> Result<Option<ConversionRecord>> {
    let id = Uuid::new_v4().to_string();
    let result = sqlx::query(
        r#"
        INSERT INTO ads_conversions (id, person_id, conversion_action, order_id, value, status, created_at)
        VALUES (?, ?, ?, ?, ?, 'pending', ?)
        ON CONFLICT (order_id) DO NOTHING
        "#,
    )
    .bind(&id)
    .bind(person_id)
    .bind(conversion_action)
    .bind(order_id)
    .bind(value)
    .bind(now)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    get_conversion(pool, &id).await.map(Some)
}

pub async fn get_conversion(pool: &SqlitePool, id: &str) -> Result<ConversionRecord> {
    sqlx::query_as::<_, ConversionRecord>("SELECT * FROM ads_conversions WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Conversion {}", id)))
}

pub async fn mark_conversion_uploaded(pool: &SqlitePool, id: &str, now: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE ads_conversions SET status = 'uploaded', uploaded_at = ?, error = NULL WHERE id = ?")
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_conversion_failed(pool: &SqlitePool, id: &str, error: &str) -> Result<()> {
    sqlx::query("UPDATE ads_conversions SET status = 'failed', error = ? WHERE id = ?")
        .bind(error)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn count_conversions_by_status(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT status, COUNT(*) FROM ads_conversions GROUP BY status ORDER BY status",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

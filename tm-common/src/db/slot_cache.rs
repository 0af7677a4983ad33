//! Cached slot lists per therapist

use crate::slots::Slot;
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

#[derive(Debug, Clone)]
pub struct CachedSlots {
    pub slots: Vec<Slot>,
    pub cached_at: DateTime<Utc>,
}

pub async fn load_slot_cache(pool: &SqlitePool, therapist_id: &str) -> Result<Option<CachedSlots>> {
    let row = sqlx::query_as::<_, (String, DateTime<Utc>)>(
        "SELECT slots, cached_at FROM cal_slots_cache WHERE therapist_id = ?",
    )
    .bind(therapist_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some((json, cached_at)) => Ok(Some(CachedSlots {
            slots: serde_json::from_str(&json)?,
            cached_at,
        })),
        None => Ok(None),
    }
}

pub async fn store_slot_cache(
    pool: &SqlitePool,
    therapist_id: &str,
    slots: &[Slot],
    now: DateTime<Utc>,
) -> Result<()> {
    let json = serde_json::to_string(slots)?;
    sqlx::query(
        r#"
        INSERT INTO cal_slots_cache (therapist_id, slots, cached_at)
        VALUES (?, ?, ?)
        ON CONFLICT (therapist_id) DO UPDATE SET slots = excluded.slots, cached_at = excluded.cached_at
        "#,
    )
    .bind(therapist_id)
    .bind(&json)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn invalidate_slot_cache(pool: &SqlitePool, therapist_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM cal_slots_cache WHERE therapist_id = ?")
        .bind(therapist_id)
        .execute(pool)
        .await?;
    Ok(())
}

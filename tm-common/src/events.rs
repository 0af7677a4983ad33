//! Operational event log
//!
//! Every handler reports notable business events and failures through
//! [`EventLog`]. Each call emits a `tracing` event and persists a row in the
//! `events` table so the admin dashboard can show recent activity without
//! access to the log stream.
//!
//! Writing the row is best effort: a failed insert is logged and swallowed so
//! that logging can never turn a successful request into a failed one.

use crate::db::models::{EventLevel, EventRecord};
use crate::Result;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct EventLog {
    pool: SqlitePool,
    source: String,
}

impl EventLog {
    /// `source` names the component writing events, e.g. `api` or `cron`
    pub fn new(pool: SqlitePool, source: impl Into<String>) -> Self {
        Self {
            pool,
            source: source.into(),
        }
    }

    pub async fn info(&self, event_type: &str, properties: Value) {
        info!(source = %self.source, event_type, %properties, "event");
        self.persist(EventLevel::Info, event_type, &properties).await;
    }

    pub async fn warn(&self, event_type: &str, properties: Value) {
        warn!(source = %self.source, event_type, %properties, "event");
        self.persist(EventLevel::Warn, event_type, &properties).await;
    }

    pub async fn error(&self, event_type: &str, properties: Value) {
        error!(source = %self.source, event_type, %properties, "event");
        self.persist(EventLevel::Error, event_type, &properties).await;
    }

    async fn persist(&self, level: EventLevel, event_type: &str, properties: &Value) {
        if let Err(e) = insert_event(&self.pool, level, event_type, &self.source, properties).await {
            error!(event_type, "Failed to persist event: {}", e);
        }
    }
}

pub async fn insert_event(
    pool: &SqlitePool,
    level: EventLevel,
    event_type: &str,
    source: &str,
    properties: &Value,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO events (id, level, event_type, source, properties, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(level.as_str())
    .bind(event_type)
    .bind(source)
    .bind(properties.to_string())
    .bind(crate::time::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// Newest first
pub async fn list_recent_events(
    pool: &SqlitePool,
    level: Option<EventLevel>,
    limit: i64,
) -> Result<Vec<EventRecord>> {
    let rows = match level {
        Some(level) => {
            sqlx::query_as::<_, EventRecord>(
                "SELECT * FROM events WHERE level = ? ORDER BY created_at DESC LIMIT ?",
            )
            .bind(level.as_str())
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, EventRecord>("SELECT * FROM events ORDER BY created_at DESC LIMIT ?")
                .bind(limit)
                .fetch_all(pool)
                .await?
        }
    };
    Ok(rows)
}

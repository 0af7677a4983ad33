//! Database initialization
//!
//! Creates the marketplace store on first run and brings an existing one up
//! to the current schema. Every statement is idempotent, so this runs on each
//! service start.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Current schema version recorded in `schema_version`
pub const SCHEMA_VERSION: i64 = 1;

/// Open (creating if needed) the file-backed store and apply the schema
pub async fn init_database(db_path: &Path, max_connections: u32) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL lets dashboard reads proceed while a handler writes
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// In-memory store for tests and local experiments.
///
/// Limited to one connection: every SQLite in-memory connection is its own
/// database.
pub async fn init_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Create all tables and indexes
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    create_schema_version_table(pool).await?;
    create_people_table(pool).await?;
    create_therapists_table(pool).await?;
    create_matches_table(pool).await?;
    create_bookings_table(pool).await?;
    create_events_table(pool).await?;
    create_cal_slots_cache_table(pool).await?;
    create_ads_conversions_table(pool).await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?, ?)")
        .bind(SCHEMA_VERSION)
        .bind(crate::time::now())
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_people_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS people (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            phone TEXT,
            city TEXT,
            session_preference TEXT NOT NULL DEFAULT 'either'
                CHECK (session_preference IN ('online', 'in_person', 'either')),
            issue TEXT,
            status TEXT NOT NULL DEFAULT 'new'
                CHECK (status IN ('new', 'email_confirmed', 'matched', 'rejected')),
            confirm_token TEXT NOT NULL,
            gclid TEXT,
            campaign_source TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            confirmed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_people_email ON people(email)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_people_created_at ON people(created_at)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_therapists_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS therapists (
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            phone TEXT,
            city TEXT,
            modalities TEXT NOT NULL DEFAULT '[]',
            accepts_online INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'pending_verification'
                CHECK (status IN ('pending_verification', 'verified', 'rejected')),
            cal_username TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_matches_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS matches (
            id TEXT PRIMARY KEY,
            secure_uuid TEXT NOT NULL UNIQUE,
            patient_id TEXT NOT NULL REFERENCES people(id) ON DELETE CASCADE,
            therapist_id TEXT NOT NULL REFERENCES therapists(id) ON DELETE CASCADE,
            status TEXT NOT NULL DEFAULT 'proposed'
                CHECK (status IN ('proposed', 'patient_selected', 'accepted', 'declined',
                                  'therapist_contacted', 'session_booked', 'completed', 'failed')),
            notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            patient_selected_at TEXT,
            therapist_responded_at TEXT,
            therapist_contacted_at TEXT,
            session_booked_at TEXT,
            completed_at TEXT,
            failed_at TEXT,
            patient_reminder_sent_at TEXT,
            therapist_reminder_sent_at TEXT,
            UNIQUE (patient_id, therapist_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_matches_status ON matches(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_matches_patient ON matches(patient_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_bookings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bookings (
            id TEXT PRIMARY KEY,
            match_id TEXT REFERENCES matches(id) ON DELETE SET NULL,
            patient_id TEXT NOT NULL REFERENCES people(id) ON DELETE CASCADE,
            therapist_id TEXT NOT NULL REFERENCES therapists(id) ON DELETE CASCADE,
            cal_booking_uid TEXT NOT NULL UNIQUE,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'confirmed',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            level TEXT NOT NULL CHECK (level IN ('info', 'warn', 'error')),
            event_type TEXT NOT NULL,
            source TEXT NOT NULL,
            properties TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_cal_slots_cache_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cal_slots_cache (
            therapist_id TEXT PRIMARY KEY REFERENCES therapists(id) ON DELETE CASCADE,
            slots TEXT NOT NULL,
            cached_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_ads_conversions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ads_conversions (
            id TEXT PRIMARY KEY,
            person_id TEXT NOT NULL REFERENCES people(id) ON DELETE CASCADE,
            conversion_action TEXT NOT NULL,
            order_id TEXT NOT NULL UNIQUE,
            value REAL NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'uploaded', 'failed')),
            error TEXT,
            created_at TEXT NOT NULL,
            uploaded_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

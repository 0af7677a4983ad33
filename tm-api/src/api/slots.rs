//! Bookable slots per therapist
//!
//! Slots come from the cache table while it is fresh and are recomputed from
//! the Cal.com source otherwise. The booking widget treats `"slots": null` as
//! "show the plain Cal.com link instead", so every failure to produce slots
//! ends there rather than in an error status.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tm_common::db::{self, Therapist};
use tm_common::slots::{group_by_date, is_stale, Slot};
use tm_common::time;
use tracing::warn;

use super::ApiQuery;
use crate::calendar::compute_slots;
use crate::error::ApiResult;
use crate::AppState;

/// Why no slot list could be produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unavailable {
    NoCalendarSource,
    NoCalUsername,
    UnknownCalUser,
    SourceFailed(String),
}

impl Unavailable {
    pub fn reason(&self) -> &str {
        match self {
            Unavailable::NoCalendarSource => "no_calendar_source",
            Unavailable::NoCalUsername => "no_cal_username",
            Unavailable::UnknownCalUser => "unknown_cal_user",
            Unavailable::SourceFailed(_) => "source_failed",
        }
    }
}

/// Recompute a therapist's slots and replace the cache entry.
///
/// A failed cache write is logged; the computed slots are still returned.
pub async fn refresh_slots(
    state: &AppState,
    therapist: &Therapist,
    now: DateTime<Utc>,
) -> Result<Vec<Slot>, Unavailable> {
    let Some(source) = state.calendar.as_deref() else {
        return Err(Unavailable::NoCalendarSource);
    };
    let Some(username) = therapist.cal_username.as_deref() else {
        return Err(Unavailable::NoCalUsername);
    };

    let slots = match compute_slots(source, username, now, state.config.cal.days_ahead).await {
        Ok(Some(slots)) => slots,
        Ok(None) => return Err(Unavailable::UnknownCalUser),
        Err(e) => return Err(Unavailable::SourceFailed(e.to_string())),
    };

    if let Err(e) = db::slot_cache::store_slot_cache(&state.db, &therapist.id, &slots, now).await {
        warn!(therapist_id = %therapist.id, "Failed to store slot cache: {}", e);
    }
    Ok(slots)
}

#[derive(Debug, Default, Deserialize)]
pub struct SlotsQuery {
    /// Skip the cache
    #[serde(default)]
    pub refresh: bool,
}

fn slots_body(therapist_id: &str, slots: &[Slot], cached_at: DateTime<Utc>, source: &str) -> Value {
    json!({
        "therapist_id": therapist_id,
        "slots": slots,
        "by_date": group_by_date(slots),
        "cached_at": cached_at,
        "source": source,
    })
}

/// GET /api/therapists/:id/slots?refresh=
pub async fn get_slots(
    State(state): State<AppState>,
    Path(therapist_id): Path<String>,
    ApiQuery(query): ApiQuery<SlotsQuery>,
) -> ApiResult<Json<Value>> {
    let therapist = db::therapists::get_therapist(&state.db, &therapist_id).await?;
    let now = time::now();

    if !query.refresh {
        let ttl = Duration::minutes(state.config.cal.cache_ttl_minutes);
        match db::slot_cache::load_slot_cache(&state.db, &therapist.id).await {
            Ok(Some(cached)) if !is_stale(cached.cached_at, now, ttl) => {
                return Ok(Json(slots_body(&therapist.id, &cached.slots, cached.cached_at, "cache")));
            }
            Ok(_) => {}
            Err(e) => warn!(therapist_id = %therapist.id, "Ignoring unreadable slot cache: {}", e),
        }
    }

    match refresh_slots(&state, &therapist, now).await {
        Ok(slots) => Ok(Json(slots_body(&therapist.id, &slots, now, "calendar"))),
        Err(unavailable) => {
            let mut properties = json!({
                "therapist_id": therapist.id,
                "reason": unavailable.reason(),
            });
            if let Unavailable::SourceFailed(error) = &unavailable {
                properties["error"] = json!(error);
            }
            state.events.warn("slots_unavailable", properties).await;
            Ok(Json(json!({"therapist_id": therapist.id, "slots": null})))
        }
    }
}

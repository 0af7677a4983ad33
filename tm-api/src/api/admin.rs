//! Admin dashboard API

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use tm_common::db::{self, EventLevel, EventRecord, Match, PersonStatus, Therapist, TherapistStatus};
use tm_common::{time, MatchStatus};
use tracing::info;

use super::matches::send_or_log;
use super::{ApiJson, ApiQuery};
use crate::error::{ApiError, ApiResult};
use crate::links;
use crate::notify::templates;
use crate::pagination::{calculate_pagination, Pagination, PAGE_SIZE};
use crate::AppState;

const DEFAULT_STATS_DAYS: u32 = 30;
const MAX_STATS_DAYS: u32 = 365;
const DEFAULT_EVENT_LIMIT: i64 = 100;
const MAX_EVENT_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct ProposeRequest {
    pub patient_id: String,
    pub therapist_ids: Vec<String>,
}

/// Why a requested therapist was not proposed
#[derive(Debug, Serialize)]
pub struct SkippedTherapist {
    pub therapist_id: String,
    pub reason: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ProposeResponse {
    pub created: Vec<Match>,
    pub skipped: Vec<SkippedTherapist>,
    pub email_sent: bool,
}

/// POST /api/admin/matches
///
/// Creates `proposed` matches up to the per-patient limit of open
/// proposals. Therapists already paired with the patient, unverified ones
/// and those over the limit are reported in `skipped`.
pub async fn propose_matches(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ProposeRequest>,
) -> ApiResult<(StatusCode, Json<ProposeResponse>)> {
    if req.therapist_ids.is_empty() {
        return Err(ApiError::BadRequest("therapist_ids must not be empty".to_string()));
    }

    let patient = db::people::get_person(&state.db, &req.patient_id).await?;
    if patient.status()? == PersonStatus::Rejected {
        return Err(ApiError::BadRequest(format!("Patient {} is rejected", patient.id)));
    }

    let limit = state.config.matching.max_proposals_per_patient;
    let mut open = db::matches::count_open_matches_for_patient(&state.db, &patient.id).await?;
    let now = time::now();

    let mut seen = HashSet::new();
    let mut created: Vec<(Match, Therapist)> = Vec::new();
    let mut skipped = Vec::new();

    for therapist_id in req.therapist_ids {
        if !seen.insert(therapist_id.clone()) {
            continue;
        }

        let therapist = match db::therapists::get_therapist(&state.db, &therapist_id).await {
            Ok(t) => t,
            Err(tm_common::Error::NotFound(_)) => {
                skipped.push(SkippedTherapist { therapist_id, reason: "not_found" });
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if therapist.status()? != TherapistStatus::Verified {
            skipped.push(SkippedTherapist { therapist_id, reason: "not_verified" });
            continue;
        }
        if db::matches::find_match_for_pair(&state.db, &patient.id, &therapist.id)
            .await?
            .is_some()
        {
            skipped.push(SkippedTherapist { therapist_id, reason: "already_matched" });
            continue;
        }
        if open >= limit {
            skipped.push(SkippedTherapist { therapist_id, reason: "proposal_limit" });
            continue;
        }

        let m = db::matches::insert_match(&state.db, &patient.id, &therapist.id, now).await?;
        open += 1;
        created.push((m, therapist));
    }

    let mut email_sent = false;
    if !created.is_empty() {
        db::people::set_person_status(&state.db, &patient.id, PersonStatus::Matched, now).await?;

        state
            .events
            .info(
                "matches_proposed",
                json!({
                    "patient_id": patient.id,
                    "match_ids": created.iter().map(|(m, _)| m.id.as_str()).collect::<Vec<_>>(),
                }),
            )
            .await;

        let proposals: Vec<(Therapist, String)> = created
            .iter()
            .map(|(m, t)| (t.clone(), links::selection_url(&state.config, &m.secure_uuid)))
            .collect();
        let email = templates::proposals_ready(&patient, &proposals);
        email_sent = send_or_log(&state, email, "proposal_email_failed", json!({"patient_id": patient.id})).await;
    }

    info!(
        patient_id = %patient.id,
        created = created.len(),
        skipped = skipped.len(),
        "Proposed matches"
    );

    let status = if created.is_empty() { StatusCode::OK } else { StatusCode::CREATED };
    Ok((
        status,
        Json(ProposeResponse {
            created: created.into_iter().map(|(m, _)| m).collect(),
            skipped,
            email_sent,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListMatchesQuery {
    pub status: Option<MatchStatus>,
    #[serde(default = "default_page")]
    pub page: i64,
}

fn default_page() -> i64 {
    1
}

#[derive(Debug, Serialize)]
pub struct MatchList {
    pub matches: Vec<Match>,
    pub pagination: Pagination,
}

/// GET /api/admin/matches?status=&page=
pub async fn list_matches(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ListMatchesQuery>,
) -> ApiResult<Json<MatchList>> {
    let total = db::matches::count_matches(&state.db, query.status).await?;
    let pagination = calculate_pagination(total, query.page);
    let matches = db::matches::list_matches(&state.db, query.status, PAGE_SIZE, pagination.offset).await?;
    Ok(Json(MatchList { matches, pagination }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateMatchRequest {
    pub status: Option<MatchStatus>,
    pub notes: Option<String>,
}

/// PATCH /api/admin/matches/:id
///
/// Status overrides go through the same transition table as the magic
/// links; an illegal jump is a 422.
pub async fn update_match(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateMatchRequest>,
) -> ApiResult<Json<Match>> {
    if req.status.is_none() && req.notes.is_none() {
        return Err(ApiError::BadRequest("Nothing to update".to_string()));
    }

    let current = db::matches::get_match(&state.db, &id).await?;
    let now = time::now();

    if let Some(to) = req.status {
        let (_, transition) = db::matches::apply_transition(&state.db, &current, to, now).await?;
        if transition.is_change() {
            state
                .events
                .info(
                    "match_status_overridden",
                    json!({"match_id": current.id, "from": current.status, "to": to}),
                )
                .await;
        }
    }

    if let Some(notes) = req.notes {
        db::matches::set_match_notes(&state.db, &id, notes.trim(), now).await?;
    }

    Ok(Json(db::matches::get_match(&state.db, &id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateTherapistRequest {
    pub status: TherapistStatus,
}

/// PATCH /api/admin/therapists/:id
pub async fn update_therapist(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateTherapistRequest>,
) -> ApiResult<Json<Therapist>> {
    let therapist = db::therapists::set_therapist_status(&state.db, &id, req.status, time::now()).await?;

    state
        .events
        .info(
            "therapist_status_changed",
            json!({"therapist_id": therapist.id, "status": therapist.status}),
        )
        .await;

    if req.status != TherapistStatus::Verified {
        if let Err(e) = db::slot_cache::invalidate_slot_cache(&state.db, &therapist.id).await {
            tracing::warn!(therapist_id = %therapist.id, "Failed to invalidate slot cache: {}", e);
        }
    }

    Ok(Json(therapist))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub days: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct DayCount {
    pub date: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub days: u32,
    pub people: BTreeMap<String, i64>,
    pub therapists: BTreeMap<String, i64>,
    pub matches: BTreeMap<String, i64>,
    pub conversions: BTreeMap<String, i64>,
    pub bookings: i64,
    pub leads_per_day: Vec<DayCount>,
}

/// Every known status appears, with zero when absent from the counts
fn with_zeros<'a>(labels: impl IntoIterator<Item = &'a str>, counts: Vec<(String, i64)>) -> BTreeMap<String, i64> {
    let mut out: BTreeMap<String, i64> = labels.into_iter().map(|l| (l.to_string(), 0)).collect();
    for (status, count) in counts {
        out.insert(status, count);
    }
    out
}

/// Zero-fill lead counts over `dates`
fn fill_days(dates: &[chrono::NaiveDate], counts: Vec<(String, i64)>) -> Vec<DayCount> {
    let counts: BTreeMap<String, i64> = counts.into_iter().collect();
    dates
        .iter()
        .map(|d| {
            let date = d.format("%Y-%m-%d").to_string();
            let count = counts.get(&date).copied().unwrap_or(0);
            DayCount { date, count }
        })
        .collect()
}

/// GET /api/admin/stats?days=
pub async fn stats(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<StatsQuery>,
) -> ApiResult<Json<StatsResponse>> {
    let days = query.days.unwrap_or(DEFAULT_STATS_DAYS);
    if days == 0 || days > MAX_STATS_DAYS {
        return Err(ApiError::BadRequest(format!("days must be between 1 and {}", MAX_STATS_DAYS)));
    }

    let now = time::now();
    let dates = time::trailing_days(now.date_naive(), days);
    let (from, to) = match (dates.first(), dates.last()) {
        (Some(from), Some(to)) => (*from, *to),
        _ => return Err(ApiError::Internal("Empty date range".to_string())),
    };

    let people = db::people::count_people_by_status(&state.db).await?;
    let therapists = db::therapists::count_therapists_by_status(&state.db).await?;
    let matches = db::matches::count_matches_by_status(&state.db).await?;
    let conversions = db::conversions::count_conversions_by_status(&state.db).await?;
    let bookings = db::bookings::count_bookings_since(&state.db, now - Duration::days(days as i64)).await?;
    let leads = db::people::count_leads_per_day(&state.db, from, to).await?;

    Ok(Json(StatsResponse {
        days,
        people: with_zeros(["new", "email_confirmed", "matched", "rejected"], people),
        therapists: with_zeros(["pending_verification", "verified", "rejected"], therapists),
        matches: with_zeros(MatchStatus::ALL.iter().map(|s| s.as_str()), matches),
        conversions: with_zeros(["pending", "uploaded", "failed"], conversions),
        bookings,
        leads_per_day: fill_days(&dates, leads),
    }))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub level: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct EventView {
    pub id: String,
    pub level: String,
    pub event_type: String,
    pub source: String,
    pub properties: Value,
    pub created_at: String,
}

impl From<EventRecord> for EventView {
    fn from(record: EventRecord) -> Self {
        let properties = serde_json::from_str(&record.properties).unwrap_or(Value::String(record.properties));
        Self {
            id: record.id,
            level: record.level,
            event_type: record.event_type,
            source: record.source,
            properties,
            created_at: record.created_at.to_rfc3339(),
        }
    }
}

/// GET /api/admin/events?level=&limit=
pub async fn recent_events(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<EventsQuery>,
) -> ApiResult<Json<Value>> {
    let level = match query.level.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
        Some(level) => Some(level.parse::<EventLevel>()?),
        None => None,
    };
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT).clamp(1, MAX_EVENT_LIMIT);

    let events: Vec<EventView> = tm_common::events::list_recent_events(&state.db, level, limit)
        .await?
        .into_iter()
        .map(EventView::from)
        .collect();

    Ok(Json(json!({"events": events, "count": events.len()})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_with_zeros_keeps_unknown_labels() {
        let counts = with_zeros(
            ["new", "matched"],
            vec![("matched".to_string(), 4), ("legacy".to_string(), 1)],
        );
        assert_eq!(counts["new"], 0);
        assert_eq!(counts["matched"], 4);
        assert_eq!(counts["legacy"], 1);
    }

    #[test]
    fn test_fill_days() {
        let dates = time::trailing_days(NaiveDate::from_ymd_opt(2024, 3, 3).unwrap(), 3);
        let filled = fill_days(&dates, vec![("2024-03-02".to_string(), 5)]);
        let counts: Vec<(&str, i64)> = filled.iter().map(|d| (d.date.as_str(), d.count)).collect();
        assert_eq!(counts, vec![("2024-03-01", 0), ("2024-03-02", 5), ("2024-03-03", 0)]);
    }

    #[test]
    fn test_event_view_parses_properties() {
        let record = EventRecord {
            id: "e1".to_string(),
            level: "info".to_string(),
            event_type: "lead_created".to_string(),
            source: "api".to_string(),
            properties: r#"{"person_id":"p1"}"#.to_string(),
            created_at: time::now(),
        };
        let view = EventView::from(record);
        assert_eq!(view.properties["person_id"], "p1");
    }
}

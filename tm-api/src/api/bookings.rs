//! Booking intake from Cal.com

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tm_common::db::{self, Booking, Match, NewBooking};
use tm_common::matching::plan_transition;
use tm_common::{time, MatchStatus};

use super::matches::send_or_log;
use super::{clean, ApiJson};
use crate::conversions::{track_conversion, ConversionEvent};
use crate::error::{ApiError, ApiResult};
use crate::notify::templates;
use crate::AppState;

/// Either `secure_uuid` of the match, or the patient and therapist ids
#[derive(Debug, Deserialize)]
pub struct BookingRequest {
    pub cal_booking_uid: String,
    pub secure_uuid: Option<String>,
    pub patient_id: Option<String>,
    pub therapist_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub booking: Booking,
    pub created: bool,
    pub match_status: Option<MatchStatus>,
}

async fn resolve_match(state: &AppState, req: &BookingRequest) -> ApiResult<(String, String, Option<Match>)> {
    if let Some(secure_uuid) = clean(req.secure_uuid.clone()) {
        let m = db::matches::get_match_by_secure_uuid(&state.db, &secure_uuid).await?;
        return Ok((m.patient_id.clone(), m.therapist_id.clone(), Some(m)));
    }

    match (clean(req.patient_id.clone()), clean(req.therapist_id.clone())) {
        (Some(patient_id), Some(therapist_id)) => {
            // Both must exist even when there is no match between them
            db::people::get_person(&state.db, &patient_id).await?;
            db::therapists::get_therapist(&state.db, &therapist_id).await?;
            let m = db::matches::find_match_for_pair(&state.db, &patient_id, &therapist_id).await?;
            Ok((patient_id, therapist_id, m))
        }
        _ => Err(ApiError::BadRequest(
            "secure_uuid or both patient_id and therapist_id are required".to_string(),
        )),
    }
}

async fn stored_response(state: &AppState, booking: Booking, created: bool) -> ApiResult<BookingResponse> {
    let match_status = match &booking.match_id {
        Some(id) => Some(db::matches::get_match(&state.db, id).await?.status()?),
        None => None,
    };
    Ok(BookingResponse {
        booking,
        created,
        match_status,
    })
}

/// POST /api/bookings
///
/// Cal.com may deliver a booking more than once; a known `cal_booking_uid`
/// returns the stored booking with 200 and repeats none of the side effects,
/// whatever the match has moved on to since.
pub async fn record_booking(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<BookingRequest>,
) -> ApiResult<(StatusCode, Json<BookingResponse>)> {
    let uid = req.cal_booking_uid.trim().to_string();
    if uid.is_empty() {
        return Err(ApiError::BadRequest("cal_booking_uid is required".to_string()));
    }
    if req.end_time <= req.start_time {
        return Err(ApiError::BadRequest("end_time must be after start_time".to_string()));
    }

    if let Some(existing) = db::bookings::find_booking_by_uid(&state.db, &uid).await? {
        return Ok((StatusCode::OK, Json(stored_response(&state, existing, false).await?)));
    }

    let (patient_id, therapist_id, current_match) = resolve_match(&state, &req).await?;

    // Reject before writing anything if the match cannot become booked
    let transition = match &current_match {
        Some(m) => Some(plan_transition(m.status()?, MatchStatus::SessionBooked)?),
        None => None,
    };

    let new = NewBooking {
        match_id: current_match.as_ref().map(|m| m.id.clone()),
        patient_id,
        therapist_id,
        cal_booking_uid: uid,
        start_time: req.start_time,
        end_time: req.end_time,
    };
    let (booking, created) = db::bookings::record_booking(&state.db, &new, transition, time::now()).await?;

    // Lost a race with a concurrent delivery of the same uid
    if !created {
        return Ok((StatusCode::OK, Json(stored_response(&state, booking, false).await?)));
    }

    if let Err(e) = db::slot_cache::invalidate_slot_cache(&state.db, &booking.therapist_id).await {
        tracing::warn!(therapist_id = %booking.therapist_id, "Failed to invalidate slot cache: {}", e);
    }

    state
        .events
        .info(
            "session_booked",
            json!({
                "booking_id": booking.id,
                "match_id": booking.match_id,
                "therapist_id": booking.therapist_id,
                "start_time": booking.start_time,
            }),
        )
        .await;

    let patient = db::people::get_person(&state.db, &booking.patient_id).await?;
    let therapist = db::therapists::get_therapist(&state.db, &booking.therapist_id).await?;
    let email = templates::booking_confirmation(&patient, &therapist, &booking);
    send_or_log(&state, email, "booking_confirmation_failed", json!({"booking_id": booking.id})).await;

    track_conversion(&state, &patient, ConversionEvent::SessionBooked).await;

    Ok((StatusCode::CREATED, Json(stored_response(&state, booking, true).await?)))
}

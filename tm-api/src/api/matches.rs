//! Magic-link match flow
//!
//! Each match has a `secure_uuid` that is only ever sent by email. The patient
//! uses it to select a proposed therapist, the therapist uses it to accept or
//! decline. Repeating a request that already took effect returns the current
//! state with `changed: false` and sends nothing.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tm_common::db::{self, Match, Person, Therapist};
use tm_common::{hashing, time, MatchStatus, TherapistAction};

use super::ApiJson;
use crate::error::ApiResult;
use crate::links;
use crate::notify::{templates, EmailMessage, NotifyError};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct MatchView {
    pub secure_uuid: String,
    pub status: String,
    pub created_at: String,
    pub patient_selected_at: Option<String>,
    pub therapist_responded_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PatientView {
    pub first_name: String,
    pub city: Option<String>,
    pub session_preference: String,
}

/// What a patient may see of a therapist
#[derive(Debug, Serialize)]
pub struct TherapistProfile {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub city: Option<String>,
    pub modalities: Vec<String>,
    pub accepts_online: bool,
    /// Only once the therapist has accepted
    pub booking_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MatchDetail {
    #[serde(rename = "match")]
    pub match_: MatchView,
    pub patient: PatientView,
    pub therapist: TherapistProfile,
}

#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub status: MatchStatus,
    pub changed: bool,
}

fn booking_url(state: &AppState, m: &Match, therapist: &Therapist) -> Option<String> {
    let status = m.status().ok()?;
    let accepted = matches!(
        status,
        MatchStatus::Accepted | MatchStatus::TherapistContacted | MatchStatus::SessionBooked
    );
    if !accepted {
        return None;
    }
    therapist
        .cal_username
        .as_deref()
        .map(|username| state.config.booking_url(username))
}

async fn load_parties(state: &AppState, m: &Match) -> ApiResult<(Person, Therapist)> {
    let patient = db::people::get_person(&state.db, &m.patient_id).await?;
    let therapist = db::therapists::get_therapist(&state.db, &m.therapist_id).await?;
    Ok((patient, therapist))
}

/// Send a rendered email; a rendering or delivery failure is recorded under
/// `event_type` with `context` and the request carries on
pub(crate) async fn send_or_log(
    state: &AppState,
    message: Result<EmailMessage, NotifyError>,
    event_type: &str,
    mut context: serde_json::Value,
) -> bool {
    let sent = match message {
        Ok(message) => {
            context["to"] = json!(message.to);
            state.notifier.send_email(&message).await
        }
        Err(e) => Err(e),
    };
    match sent {
        Ok(()) => true,
        Err(e) => {
            context["error"] = json!(e.to_string());
            state.events.error(event_type, context).await;
            false
        }
    }
}

/// GET /api/match/:secure_uuid
pub async fn get_match_detail(
    State(state): State<AppState>,
    Path(secure_uuid): Path<String>,
) -> ApiResult<Json<MatchDetail>> {
    let m = db::matches::get_match_by_secure_uuid(&state.db, &secure_uuid).await?;
    let (patient, therapist) = load_parties(&state, &m).await?;

    Ok(Json(MatchDetail {
        match_: MatchView {
            secure_uuid: m.secure_uuid.clone(),
            status: m.status.clone(),
            created_at: m.created_at.to_rfc3339(),
            patient_selected_at: m.patient_selected_at.map(|t| t.to_rfc3339()),
            therapist_responded_at: m.therapist_responded_at.map(|t| t.to_rfc3339()),
        },
        patient: PatientView {
            first_name: patient.first_name().to_string(),
            city: patient.city.clone(),
            session_preference: patient.session_preference.clone(),
        },
        therapist: TherapistProfile {
            id: therapist.id.clone(),
            first_name: therapist.first_name.clone(),
            last_name: therapist.last_name.clone(),
            city: therapist.city.clone(),
            modalities: therapist.modality_list(),
            accepts_online: therapist.accepts_online,
            booking_url: booking_url(&state, &m, &therapist),
        },
    }))
}

/// POST /api/match/:secure_uuid/select
///
/// `proposed -> patient_selected`. Other proposals of the same patient stay
/// open.
pub async fn select_therapist(
    State(state): State<AppState>,
    Path(secure_uuid): Path<String>,
) -> ApiResult<Json<TransitionResponse>> {
    let current = db::matches::get_match_by_secure_uuid(&state.db, &secure_uuid).await?;
    let (updated, transition) =
        db::matches::apply_transition(&state.db, &current, MatchStatus::PatientSelected, time::now()).await?;

    if transition.is_change() {
        let (patient, therapist) = load_parties(&state, &updated).await?;
        let respond_url = links::respond_url(&state.config, &updated.secure_uuid);

        state
            .events
            .info(
                "patient_selected",
                json!({"match_id": updated.id, "patient_id": patient.id, "therapist_id": therapist.id}),
            )
            .await;

        let email = templates::therapist_selected(&therapist, &patient, &respond_url);
        send_or_log(&state, email, "therapist_notification_failed", json!({"match_id": updated.id})).await;

        let country_code = &state.config.google_ads.default_phone_country_code;
        if let Some(phone) = therapist
            .phone
            .as_deref()
            .and_then(|p| hashing::normalize_phone(p, country_code))
        {
            let sms = templates::therapist_selected_sms(&patient, &respond_url, phone);
            if let Err(e) = state.notifier.send_sms(&sms).await {
                state
                    .events
                    .warn("therapist_sms_failed", json!({"match_id": updated.id, "error": e.to_string()}))
                    .await;
            }
        }
    }

    Ok(Json(TransitionResponse {
        status: updated.status()?,
        changed: transition.is_change(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub action: TherapistAction,
}

/// POST /api/match/:secure_uuid/respond
pub async fn therapist_respond(
    State(state): State<AppState>,
    Path(secure_uuid): Path<String>,
    ApiJson(req): ApiJson<RespondRequest>,
) -> ApiResult<Json<TransitionResponse>> {
    let current = db::matches::get_match_by_secure_uuid(&state.db, &secure_uuid).await?;
    let (updated, transition) =
        db::matches::apply_transition(&state.db, &current, req.action.target_status(), time::now()).await?;

    if transition.is_change() {
        let (patient, therapist) = load_parties(&state, &updated).await?;

        let (event_type, email) = match req.action {
            TherapistAction::Accept => {
                let booking = booking_url(&state, &updated, &therapist);
                (
                    "therapist_accepted",
                    templates::patient_accepted(&patient, &therapist, booking.as_deref()),
                )
            }
            TherapistAction::Decline => (
                "therapist_declined",
                templates::patient_declined(&patient, &therapist),
            ),
        };

        state
            .events
            .info(
                event_type,
                json!({"match_id": updated.id, "patient_id": patient.id, "therapist_id": therapist.id}),
            )
            .await;
        send_or_log(&state, email, "patient_notification_failed", json!({"match_id": updated.id})).await;
    }

    Ok(Json(TransitionResponse {
        status: updated.status()?,
        changed: transition.is_change(),
    }))
}

//! Lead intake: patient and therapist signups, email confirmation

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tm_common::db::{self, NewPerson, NewTherapist, SessionPreference};
use tm_common::time;
use tracing::info;

use super::matches::send_or_log;
use super::{clean, ApiJson, ApiQuery};
use crate::conversions::{track_conversion, ConversionEvent};
use crate::error::{ApiError, ApiResult};
use crate::links;
use crate::notify::templates;
use crate::AppState;

const MAX_NAME_LEN: usize = 200;
const MAX_ISSUE_LEN: usize = 5000;

#[derive(Debug, Deserialize)]
pub struct PatientLeadRequest {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub city: Option<String>,
    #[serde(default)]
    pub session_preference: SessionPreference,
    pub issue: Option<String>,
    pub gclid: Option<String>,
    pub campaign_source: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LeadResponse {
    pub id: String,
    pub created: bool,
}

/// Loose syntax check; deliverability is proven by the confirmation link
pub fn is_valid_email(email: &str) -> bool {
    if email.len() > 254 || email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

fn required_name(value: &str, field: &str) -> ApiResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::BadRequest(format!("{} is required", field)));
    }
    if value.chars().count() > MAX_NAME_LEN {
        return Err(ApiError::BadRequest(format!("{} is too long", field)));
    }
    Ok(value.to_string())
}

fn normalized_email(raw: &str) -> ApiResult<String> {
    let email = raw.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(ApiError::BadRequest("A valid email address is required".to_string()));
    }
    Ok(email)
}

/// POST /api/leads/patients
///
/// Returns 201 for a new lead, 200 with `created: false` when the email is
/// already known.
pub async fn create_patient_lead(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<PatientLeadRequest>,
) -> ApiResult<(StatusCode, Json<LeadResponse>)> {
    let name = required_name(&req.name, "name")?;
    let email = normalized_email(&req.email)?;
    let issue = clean(req.issue);
    if issue.as_ref().is_some_and(|i| i.chars().count() > MAX_ISSUE_LEN) {
        return Err(ApiError::BadRequest("issue is too long".to_string()));
    }

    if let Some(existing) = db::people::find_person_by_email(&state.db, &email).await? {
        info!(person_id = %existing.id, "Lead already exists for email");
        return Ok((
            StatusCode::OK,
            Json(LeadResponse {
                id: existing.id,
                created: false,
            }),
        ));
    }

    let new = NewPerson {
        name,
        email,
        phone: clean(req.phone),
        city: clean(req.city),
        session_preference: req.session_preference,
        issue,
        gclid: clean(req.gclid),
        campaign_source: clean(req.campaign_source),
    };
    let person = db::people::insert_person(&state.db, &new, time::now()).await?;

    state
        .events
        .info(
            "lead_created",
            json!({
                "person_id": person.id,
                "session_preference": person.session_preference,
                "campaign_source": person.campaign_source,
                "has_gclid": person.gclid.is_some(),
            }),
        )
        .await;

    let confirm_url = links::confirm_url(&state.config, &person);
    let message = templates::lead_confirmation(&person, &confirm_url);
    send_or_log(&state, message, "confirmation_email_failed", json!({"person_id": person.id})).await;

    Ok((
        StatusCode::CREATED,
        Json(LeadResponse {
            id: person.id,
            created: true,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmQuery {
    pub id: String,
    pub token: String,
}

/// GET /api/leads/confirm?id=&token=
pub async fn confirm_email(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ConfirmQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let (person, newly_confirmed) =
        db::people::confirm_person(&state.db, &query.id, &query.token, time::now()).await?;

    if newly_confirmed {
        state
            .events
            .info("lead_verified", json!({"person_id": person.id}))
            .await;
        track_conversion(&state, &person, ConversionEvent::LeadVerified).await;
    }

    Ok(Json(json!({
        "id": person.id,
        "status": person.status,
        "confirmed": true,
        "newly_confirmed": newly_confirmed,
    })))
}

#[derive(Debug, Deserialize)]
pub struct TherapistLeadRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub city: Option<String>,
    #[serde(default)]
    pub modalities: Vec<String>,
    #[serde(default)]
    pub accepts_online: bool,
    pub cal_username: Option<String>,
}

/// POST /api/leads/therapists
pub async fn create_therapist_lead(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<TherapistLeadRequest>,
) -> ApiResult<(StatusCode, Json<LeadResponse>)> {
    let first_name = required_name(&req.first_name, "first_name")?;
    let last_name = required_name(&req.last_name, "last_name")?;
    let email = normalized_email(&req.email)?;

    let modalities: Vec<String> = req
        .modalities
        .into_iter()
        .map(|m| m.trim().to_lowercase())
        .filter(|m| !m.is_empty())
        .collect();

    let new = NewTherapist {
        first_name,
        last_name,
        email,
        phone: clean(req.phone),
        city: clean(req.city),
        modalities,
        accepts_online: req.accepts_online,
        cal_username: clean(req.cal_username),
    };
    let therapist = db::therapists::insert_therapist(&state.db, &new, time::now()).await?;

    state
        .events
        .info(
            "therapist_lead_created",
            json!({"therapist_id": therapist.id, "city": therapist.city}),
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(LeadResponse {
            id: therapist.id,
            created: true,
        }),
    ))
}

//! Client-side event tracking

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tm_common::events::EventLog;

use super::ApiJson;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

const MAX_EVENT_TYPE_LEN: usize = 64;
const MAX_PROPERTIES_BYTES: usize = 8 * 1024;

#[derive(Debug, Deserialize)]
pub struct TrackEventRequest {
    pub event_type: String,
    #[serde(default)]
    pub properties: Option<Value>,
}

/// `[a-z0-9_]{1,64}`
pub fn is_valid_event_type(event_type: &str) -> bool {
    !event_type.is_empty()
        && event_type.len() <= MAX_EVENT_TYPE_LEN
        && event_type
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

/// POST /api/events
///
/// Stored with source `client` so browser events are told apart from
/// server ones on the dashboard.
pub async fn track_event(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<TrackEventRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if !is_valid_event_type(&req.event_type) {
        return Err(ApiError::BadRequest(format!(
            "event_type must match [a-z0-9_]{{1,{}}}",
            MAX_EVENT_TYPE_LEN
        )));
    }

    let properties = match req.properties {
        None | Some(Value::Null) => json!({}),
        Some(Value::Object(map)) => Value::Object(map),
        Some(_) => return Err(ApiError::BadRequest("properties must be an object".to_string())),
    };
    if properties.to_string().len() > MAX_PROPERTIES_BYTES {
        return Err(ApiError::BadRequest("properties are too large".to_string()));
    }

    EventLog::new(state.db.clone(), "client")
        .info(&req.event_type, properties)
        .await;

    Ok((StatusCode::ACCEPTED, Json(json!({"ok": true}))))
}

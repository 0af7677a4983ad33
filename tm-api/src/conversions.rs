//! Enhanced conversion tracking
//!
//! Two funnel steps are reported to Google Ads: a verified lead (email
//! confirmed) and a booked first session. Each is recorded in
//! `ads_conversions` under an order id derived from the person and the step,
//! so a repeated confirmation or booking webhook never double counts.
//!
//! Tracking never fails the request that triggered it; problems end up in the
//! event log and on the conversion row.

use crate::AppState;
use async_trait::async_trait;
use serde_json::json;
use tm_ads::{AdsError, ClickConversion, ConversionUploader, UploadOutcome};
use tm_common::db::{self, Person};
use tm_common::time;

#[async_trait]
pub trait ConversionSink: Send + Sync {
    /// Resource name for a conversion action id
    fn action_resource(&self, action_id: &str) -> String;

    async fn upload(&self, batch: &[ClickConversion]) -> Result<UploadOutcome, AdsError>;
}

#[async_trait]
impl ConversionSink for ConversionUploader {
    fn action_resource(&self, action_id: &str) -> String {
        ConversionUploader::action_resource(self, action_id)
    }

    async fn upload(&self, batch: &[ClickConversion]) -> Result<UploadOutcome, AdsError> {
        ConversionUploader::upload(self, batch).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionEvent {
    LeadVerified,
    SessionBooked,
}

impl ConversionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionEvent::LeadVerified => "lead_verified",
            ConversionEvent::SessionBooked => "session_booked",
        }
    }
}

/// What happened to a tracking attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    /// Ads not configured, or no action id for this step
    Disabled,
    /// Already recorded under the same order id
    Duplicate,
    Uploaded,
    Failed,
}

/// Record and upload one conversion for `person`
pub async fn track_conversion(state: &AppState, person: &Person, event: ConversionEvent) -> TrackOutcome {
    let Some(sink) = &state.conversions else {
        return TrackOutcome::Disabled;
    };

    let ads = &state.config.google_ads;
    let (action_id, value) = match event {
        ConversionEvent::LeadVerified => (ads.lead_conversion_action.as_deref(), ads.lead_value),
        ConversionEvent::SessionBooked => (ads.booking_conversion_action.as_deref(), ads.booking_value),
    };
    let Some(action_id) = action_id.filter(|a| !a.is_empty()) else {
        return TrackOutcome::Disabled;
    };

    let now = time::now();
    let order_id = db::conversions::conversion_order_id(&person.id, event.as_str());
    let action = sink.action_resource(action_id);

    let record = match db::conversions::insert_conversion(&state.db, &person.id, &action, &order_id, value, now).await {
        Ok(Some(record)) => record,
        Ok(None) => return TrackOutcome::Duplicate,
        Err(e) => {
            state
                .events
                .error("conversion_record_failed", json!({"order_id": order_id, "error": e.to_string()}))
                .await;
            return TrackOutcome::Failed;
        }
    };

    let conversion = ClickConversion::new(action, now, value, &ads.currency)
        .with_gclid(person.gclid.as_deref())
        .with_order_id(&order_id)
        .with_email(&person.email)
        .with_phone(person.phone.as_deref(), &ads.default_phone_country_code);

    if !conversion.is_attributable() {
        if let Err(e) =
            db::conversions::mark_conversion_failed(&state.db, &record.id, "No click id or usable identifiers").await
        {
            tracing::warn!(order_id, "Failed to mark conversion failed: {}", e);
        }
        state
            .events
            .warn("conversion_unattributable", json!({"order_id": order_id}))
            .await;
        return TrackOutcome::Failed;
    }

    let error = match sink.upload(std::slice::from_ref(&conversion)).await {
        Ok(outcome) => outcome.failures.into_iter().next().map(|f| f.message),
        Err(e) => Some(e.to_string()),
    };

    match error {
        None => {
            if let Err(e) = db::conversions::mark_conversion_uploaded(&state.db, &record.id, time::now()).await {
                tracing::warn!(order_id, "Failed to mark conversion uploaded: {}", e);
            }
            state
                .events
                .info("conversion_uploaded", json!({"order_id": order_id, "event": event.as_str()}))
                .await;
            TrackOutcome::Uploaded
        }
        Some(message) => {
            if let Err(e) = db::conversions::mark_conversion_failed(&state.db, &record.id, &message).await {
                tracing::warn!(order_id, "Failed to mark conversion failed: {}", e);
            }
            state
                .events
                .error("conversion_upload_failed", json!({"order_id": order_id, "error": message}))
                .await;
            TrackOutcome::Failed
        }
    }
}

//! Enhanced conversions upload
//!
//! Conversions are sent in one batch per call with `partialFailure` enabled,
//! so a bad row does not sink the rest. Google answers 200 in that case and
//! describes the rejected rows in `partialFailureError`; [`UploadOutcome`]
//! turns that into per-row failures keyed by their index in the batch.

use crate::client::{build_http_client, AdsClientConfig, AdsCredentials};
use crate::error::{AdsError, Result};
use crate::oauth::TokenProvider;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use tm_common::config::GoogleAdsConfig;
use tm_common::hashing;
use tracing::{debug, info, warn};

/// Google expects `yyyy-mm-dd hh:mm:ss+|-hh:mm`
const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S+00:00";

/// One hashed identifier. Google wants each in its own object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UserIdentifier {
    HashedEmail(String),
    HashedPhoneNumber(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickConversion {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gclid: Option<String>,
    /// Resource name, `customers/{id}/conversionActions/{action}`
    pub conversion_action: String,
    pub conversion_date_time: String,
    pub conversion_value: f64,
    pub currency_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub user_identifiers: Vec<UserIdentifier>,
}

impl ClickConversion {
    pub fn new(conversion_action: String, at: DateTime<Utc>, value: f64, currency: &str) -> Self {
        Self {
            gclid: None,
            conversion_action,
            conversion_date_time: at.format(DATE_TIME_FORMAT).to_string(),
            conversion_value: value,
            currency_code: currency.to_string(),
            order_id: None,
            user_identifiers: Vec::new(),
        }
    }

    pub fn with_gclid(mut self, gclid: Option<&str>) -> Self {
        self.gclid = gclid.map(str::trim).filter(|g| !g.is_empty()).map(String::from);
        self
    }

    pub fn with_order_id(mut self, order_id: &str) -> Self {
        self.order_id = Some(order_id.to_string());
        self
    }

    /// Adds the hashed email; unusable addresses are skipped
    pub fn with_email(mut self, email: &str) -> Self {
        if let Some(hash) = hashing::hash_email(email) {
            self.user_identifiers.push(UserIdentifier::HashedEmail(hash));
        }
        self
    }

    /// Adds the hashed E.164 phone; unparseable numbers are skipped
    pub fn with_phone(mut self, phone: Option<&str>, default_country_code: &str) -> Self {
        if let Some(hash) = phone.and_then(|p| hashing::hash_phone(p, default_country_code)) {
            self.user_identifiers.push(UserIdentifier::HashedPhoneNumber(hash));
        }
        self
    }

    /// Google can match this conversion to a click
    pub fn is_attributable(&self) -> bool {
        self.gclid.is_some() || !self.user_identifiers.is_empty()
    }
}

/// `customers/{customer_id}/conversionActions/{action_id}`
pub fn conversion_action_resource(customer_id: &str, action_id: &str) -> String {
    format!("customers/{}/conversionActions/{}", customer_id, action_id)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionFailure {
    /// Position in the uploaded batch, when Google reported one
    pub index: Option<usize>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadOutcome {
    pub accepted: usize,
    pub failures: Vec<ConversionFailure>,
}

impl UploadOutcome {
    pub fn is_complete_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failure message for a batch position, if that row was rejected
    pub fn failure_for(&self, index: usize) -> Option<&ConversionFailure> {
        self.failures.iter().find(|f| f.index == Some(index))
    }

    /// Build the outcome from an `uploadClickConversions` response body
    pub fn from_response(batch_len: usize, body: &Value) -> Self {
        let failures = parse_partial_failures(body);
        if failures.is_empty() {
            return Self {
                accepted: batch_len,
                failures,
            };
        }

        let failed: BTreeSet<usize> = failures.iter().filter_map(|f| f.index).collect();
        // A failure without a location cannot be pinned to a row
        let accepted = if failed.is_empty() {
            0
        } else {
            batch_len.saturating_sub(failed.len())
        };
        Self { accepted, failures }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartialFailureError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Vec<FailureDetail>,
}

#[derive(Debug, Deserialize)]
struct FailureDetail {
    #[serde(default)]
    errors: Vec<AdsErrorEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdsErrorEntry {
    #[serde(default)]
    message: String,
    #[serde(default)]
    location: Option<ErrorLocation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorLocation {
    #[serde(default)]
    field_path_elements: Vec<FieldPathElement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldPathElement {
    field_name: String,
    #[serde(default)]
    index: Option<usize>,
}

fn parse_partial_failures(body: &Value) -> Vec<ConversionFailure> {
    let Some(raw) = body.get("partialFailureError").filter(|v| !v.is_null()) else {
        return Vec::new();
    };
    let error: PartialFailureError = match serde_json::from_value(raw.clone()) {
        Ok(error) => error,
        Err(e) => {
            return vec![ConversionFailure {
                index: None,
                message: format!("Unreadable partial failure: {}", e),
            }]
        }
    };

    let mut failures: Vec<ConversionFailure> = error
        .details
        .into_iter()
        .flat_map(|d| d.errors)
        .map(|entry| {
            let index = entry.location.and_then(|loc| {
                loc.field_path_elements
                    .into_iter()
                    .find(|e| e.field_name == "conversions")
                    .and_then(|e| e.index)
            });
            ConversionFailure {
                index,
                message: entry.message,
            }
        })
        .collect();

    if failures.is_empty() && !error.message.is_empty() {
        failures.push(ConversionFailure {
            index: None,
            message: error.message,
        });
    }
    failures
}

pub struct ConversionUploader {
    http: Client,
    endpoints: AdsClientConfig,
    credentials: AdsCredentials,
    tokens: TokenProvider,
}

impl ConversionUploader {
    pub fn new(http: Client, endpoints: AdsClientConfig, credentials: AdsCredentials) -> Self {
        let tokens = TokenProvider::new(
            http.clone(),
            &endpoints,
            &credentials.client_id,
            &credentials.client_secret,
            &credentials.refresh_token,
        );
        Self {
            http,
            endpoints,
            credentials,
            tokens,
        }
    }

    /// Production uploader against Google's endpoints
    pub fn from_config(config: &GoogleAdsConfig) -> Result<Self> {
        let credentials = AdsCredentials::from_config(config)?;
        let endpoints = AdsClientConfig::default().with_api_version(&config.api_version);
        Ok(Self::new(build_http_client()?, endpoints, credentials))
    }

    /// Resource name for an action id under this uploader's customer
    pub fn action_resource(&self, action_id: &str) -> String {
        conversion_action_resource(&self.credentials.customer_id, action_id)
    }

    /// Upload a batch. Only the token fetch is retried; the upload itself is
    /// a single request.
    pub async fn upload(&self, batch: &[ClickConversion]) -> Result<UploadOutcome> {
        if batch.is_empty() {
            return Ok(UploadOutcome::default());
        }

        let token = self.tokens.access_token().await?;
        let url = self
            .endpoints
            .customer_method_url(&self.credentials.customer_id, ":uploadClickConversions");

        let body = serde_json::json!({
            "conversions": batch,
            "partialFailure": true,
        });

        let mut request = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .header("developer-token", &self.credentials.developer_token)
            .json(&body);
        if let Some(login) = &self.credentials.login_customer_id {
            request = request.header("login-customer-id", login);
        }

        debug!(count = batch.len(), "Uploading click conversions");
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.as_u16() == 401 {
            self.tokens.invalidate().await;
        }
        if !status.is_success() {
            warn!(status = status.as_u16(), "Conversion upload rejected");
            return Err(AdsError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|e| AdsError::Parse(format!("Upload response: {}", e)))?;
        let outcome = UploadOutcome::from_response(batch.len(), &json);

        for failure in &outcome.failures {
            warn!(index = ?failure.index, "Conversion rejected: {}", failure.message);
        }
        info!(
            accepted = outcome.accepted,
            failed = outcome.failures.len(),
            "Click conversion upload finished"
        );
        Ok(outcome)
    }
}

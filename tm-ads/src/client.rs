//! Shared client settings: credentials, endpoints, HTTP client

use crate::error::{AdsError, Result};
use reqwest::{header, Client};
use std::time::Duration;
use tm_common::config::GoogleAdsConfig;

/// Google OAuth 2.0 endpoints
pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Google Ads REST endpoint
pub const GOOGLE_ADS_API_URL: &str = "https://googleads.googleapis.com";

/// Default timeout for Google API requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("tm-ads/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct AdsCredentials {
    pub developer_token: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    /// Account the conversions and reports belong to (digits only)
    pub customer_id: String,
    /// Manager account, when access goes through one
    pub login_customer_id: Option<String>,
}

impl AdsCredentials {
    pub fn from_config(config: &GoogleAdsConfig) -> Result<Self> {
        fn required(value: &Option<String>, name: &str) -> Result<String> {
            value
                .clone()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| AdsError::Config(format!("{} is not set", name)))
        }

        Ok(Self {
            developer_token: required(&config.developer_token, "GOOGLE_ADS_DEVELOPER_TOKEN")?,
            client_id: required(&config.client_id, "GOOGLE_ADS_CLIENT_ID")?,
            client_secret: required(&config.client_secret, "GOOGLE_ADS_CLIENT_SECRET")?,
            refresh_token: required(&config.refresh_token, "GOOGLE_ADS_REFRESH_TOKEN")?,
            customer_id: required(&config.customer_id, "GOOGLE_ADS_CUSTOMER_ID")?,
            login_customer_id: config.login_customer_id.clone().filter(|v| !v.is_empty()),
        })
    }
}

/// Endpoint locations; overridden in tests to point at a mock server
#[derive(Debug, Clone)]
pub struct AdsClientConfig {
    pub auth_url: String,
    pub token_url: String,
    pub api_base_url: String,
    pub api_version: String,
}

impl Default for AdsClientConfig {
    fn default() -> Self {
        Self {
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            api_base_url: GOOGLE_ADS_API_URL.to_string(),
            api_version: "v17".to_string(),
        }
    }
}

impl AdsClientConfig {
    pub fn with_api_version(mut self, version: &str) -> Self {
        self.api_version = version.to_string();
        self
    }

    /// `{base}/{version}/customers/{customer_id}:{method}`
    pub fn customer_method_url(&self, customer_id: &str, method: &str) -> String {
        format!(
            "{}/{}/customers/{}{}",
            self.api_base_url.trim_end_matches('/'),
            self.api_version,
            customer_id,
            method
        )
    }
}

pub fn build_http_client() -> Result<Client> {
    let mut headers = header::HeaderMap::new();
    headers.insert(header::USER_AGENT, header::HeaderValue::from_static(USER_AGENT));

    Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .default_headers(headers)
        .build()
        .map_err(AdsError::from)
}

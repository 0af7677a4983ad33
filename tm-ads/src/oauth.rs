//! Google OAuth 2.0 for the Ads API
//!
//! Access tokens are short-lived and minted from a long-lived refresh token.
//! The refresh call is the one place in the system that retries: transient
//! failures (transport errors, 429, 5xx) are retried with exponential backoff,
//! a rejected grant is returned immediately.
//!
//! Getting a refresh token in the first place is a one-time manual flow:
//! open [`authorization_url`] in a browser, approve, and pass the returned
//! `code` to [`exchange_code`].

use crate::client::AdsClientConfig;
use crate::error::{AdsError, Result};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Scope granting access to the Google Ads API
pub const ADWORDS_SCOPE: &str = "https://www.googleapis.com/auth/adwords";

/// Redirect used when the client secret file lists none
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080/callback";

/// Tokens are refreshed this long before Google's stated expiry
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based): base, 2×base, 4×base…
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Hands out access tokens, refreshing when the cached one is about to expire
pub struct TokenProvider {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    retry: RetryPolicy,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(
        http: Client,
        endpoints: &AdsClientConfig,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> Self {
        Self {
            http,
            token_url: endpoints.token_url.clone(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            refresh_token: refresh_token.to_string(),
            retry: RetryPolicy::default(),
            cached: Mutex::new(None),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// A valid access token, from cache when possible
    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + EXPIRY_MARGIN {
                return Ok(token.token.clone());
            }
        }

        let fresh = self.refresh_with_retry().await?;
        let token = fresh.access_token.clone();
        *cached = Some(CachedToken {
            token: fresh.access_token,
            expires_at: Instant::now() + Duration::from_secs(fresh.expires_in),
        });
        Ok(token)
    }

    /// Drop the cached token, e.g. after the API answered 401
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn refresh_with_retry(&self) -> Result<TokenResponse> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.refresh_once().await {
                Ok(token) => {
                    debug!(attempt, "Refreshed Google access token");
                    return Ok(token);
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Token refresh failed, retrying: {}",
                        e
                    );
                    sleep(delay).await;
                }
                Err(e) => {
                    warn!(attempt, "Token refresh failed: {}", e);
                    return Err(e);
                }
            }
        }
    }

    async fn refresh_once(&self) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
            ])
            .send()
            .await?;

        parse_token_response(response).await
    }
}

async fn parse_token_response(response: reqwest::Response) -> Result<TokenResponse> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(AdsError::Auth {
            status: status.as_u16(),
            body,
        });
    }
    serde_json::from_str(&body)
        .map_err(|e| AdsError::Parse(format!("Token response: {}", e)))
}

/// Consent screen URL. `access_type=offline` plus `prompt=consent` makes
/// Google return a refresh token on every approval.
pub fn authorization_url(auth_url: &str, client_id: &str, redirect_uri: &str) -> Result<String> {
    let url = Url::parse_with_params(
        auth_url,
        &[
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", ADWORDS_SCOPE),
            ("access_type", "offline"),
            ("include_granted_scopes", "true"),
            ("prompt", "consent"),
        ],
    )
    .map_err(|e| AdsError::Config(format!("Invalid auth URL '{}': {}", auth_url, e)))?;
    Ok(url.to_string())
}

/// Pull the `code` parameter out of the URL the browser was redirected to.
/// A bare code is passed through unchanged.
pub fn extract_code(pasted: &str) -> Result<String> {
    let pasted = pasted.trim();
    if !pasted.contains("://") {
        return Ok(pasted.to_string());
    }

    let url = Url::parse(pasted).map_err(|e| AdsError::Parse(format!("Redirect URL: {}", e)))?;
    if let Some((_, error)) = url.query_pairs().find(|(k, _)| k == "error") {
        return Err(AdsError::Auth {
            status: 400,
            body: error.into_owned(),
        });
    }
    url.query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .ok_or_else(|| AdsError::Parse("Redirect URL has no 'code' parameter".to_string()))
}

/// Trade an authorization code for tokens. No retry: codes are single use.
pub async fn exchange_code(
    http: &Client,
    endpoints: &AdsClientConfig,
    client_id: &str,
    client_secret: &str,
    code: &str,
    redirect_uri: &str,
) -> Result<TokenResponse> {
    let response = http
        .post(&endpoints.token_url)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("redirect_uri", redirect_uri),
        ])
        .send()
        .await?;

    let token = parse_token_response(response).await?;
    if token.refresh_token.is_none() {
        warn!("Token response has no refresh token; revoke the app's access and approve again");
    } else {
        info!("Received refresh token");
    }
    Ok(token)
}

/// OAuth client downloaded from Google Cloud Console (`client_secret.json`)
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthClientInfo {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ClientSecretFile {
    /// `web` or `installed`
    pub app_type: String,
    pub client: OAuthClientInfo,
}

impl ClientSecretFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct Raw {
            web: Option<OAuthClientInfo>,
            installed: Option<OAuthClientInfo>,
        }

        let raw: Raw = serde_json::from_str(content)
            .map_err(|e| AdsError::Parse(format!("Client secret file: {}", e)))?;
        match (raw.web, raw.installed) {
            (Some(client), _) => Ok(Self { app_type: "web".to_string(), client }),
            (None, Some(client)) => Ok(Self { app_type: "installed".to_string(), client }),
            (None, None) => Err(AdsError::Parse(
                "Client secret file has neither 'web' nor 'installed' section".to_string(),
            )),
        }
    }

    /// First configured redirect URI, or the localhost default
    pub fn redirect_uri(&self) -> &str {
        self.client
            .redirect_uris
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_REDIRECT_URI)
    }
}

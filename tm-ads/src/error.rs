//! Error types for tm-ads

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdsError {
    /// Transport failure (connect, timeout, body read)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// OAuth endpoint rejected the request
    #[error("OAuth error {status}: {body}")]
    Auth { status: u16, body: String },

    /// Google Ads API returned a non-success status
    #[error("Google Ads API error {status}: {body}")]
    Api { status: u16, body: String },

    /// Response did not have the expected shape
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Missing or invalid credentials/settings
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdsError {
    /// Worth retrying: network trouble, throttling, or a server-side failure
    pub fn is_transient(&self) -> bool {
        match self {
            AdsError::Http(_) => true,
            AdsError::Auth { status, .. } | AdsError::Api { status, .. } => {
                *status == 429 || *status >= 500
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AdsError>;

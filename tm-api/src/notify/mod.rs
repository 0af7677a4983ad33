//! Outbound email and SMS
//!
//! Handlers talk to a [`Notifier`]; production wires in [`ResendNotifier`],
//! tests use an in-process recorder.

pub mod resend;
pub mod templates;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use resend::ResendNotifier;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    /// Plain-text alternative
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmsMessage {
    /// E.164 number
    pub to: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Template rendering failed: {0}")]
    Template(#[from] askama::Error),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_email(&self, message: &EmailMessage) -> Result<(), NotifyError>;

    async fn send_sms(&self, message: &SmsMessage) -> Result<(), NotifyError>;
}

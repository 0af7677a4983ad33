//! Resend (email) and Twilio (SMS) delivery over their REST APIs

use super::{EmailMessage, Notifier, NotifyError, SmsMessage};
use async_trait::async_trait;
use reqwest::{header, Client};
use serde_json::json;
use std::time::Duration;
use tm_common::config::AppConfig;
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

const USER_AGENT: &str = concat!("tm-api/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
struct EmailSettings {
    api_key: String,
    from: String,
    reply_to: Option<String>,
    base_url: String,
}

#[derive(Debug, Clone)]
struct SmsSettings {
    account_sid: String,
    auth_token: String,
    from_number: String,
    base_url: String,
}

/// Sends email through Resend and, when Twilio credentials exist, SMS.
///
/// A channel without credentials logs the message and reports success, so a
/// development setup runs without provider accounts.
pub struct ResendNotifier {
    http: Client,
    email: Option<EmailSettings>,
    sms: Option<SmsSettings>,
}

impl ResendNotifier {
    pub fn from_config(config: &AppConfig) -> Result<Self, NotifyError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::USER_AGENT, header::HeaderValue::from_static(USER_AGENT));
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()?;

        let email = config.email.api_key.clone().map(|api_key| EmailSettings {
            api_key,
            from: config.email.from.clone(),
            reply_to: config.email.reply_to.clone(),
            base_url: config.email.api_base_url.trim_end_matches('/').to_string(),
        });

        let sms = match (
            &config.sms.account_sid,
            &config.sms.auth_token,
            &config.sms.from_number,
        ) {
            (Some(sid), Some(token), Some(from)) => Some(SmsSettings {
                account_sid: sid.clone(),
                auth_token: token.clone(),
                from_number: from.clone(),
                base_url: config.sms.api_base_url.trim_end_matches('/').to_string(),
            }),
            _ => None,
        };

        if email.is_none() {
            warn!("RESEND_API_KEY not set, emails will only be logged");
        }
        if sms.is_none() {
            info!("Twilio not configured, SMS disabled");
        }

        Ok(Self { http, email, sms })
    }
}

#[async_trait]
impl Notifier for ResendNotifier {
    async fn send_email(&self, message: &EmailMessage) -> Result<(), NotifyError> {
        if !message.to.contains('@') {
            return Err(NotifyError::InvalidRecipient(message.to.clone()));
        }

        let Some(settings) = &self.email else {
            info!(to = %message.to, subject = %message.subject, "Email not sent (no provider configured)");
            return Ok(());
        };

        let mut body = json!({
            "from": settings.from,
            "to": [message.to],
            "subject": message.subject,
            "html": message.html,
            "text": message.text,
        });
        if let Some(reply_to) = &settings.reply_to {
            body["reply_to"] = json!(reply_to);
        }

        let response = self
            .http
            .post(format!("{}/emails", settings.base_url))
            .bearer_auth(&settings.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(to = %message.to, subject = %message.subject, "Email sent");
        Ok(())
    }

    async fn send_sms(&self, message: &SmsMessage) -> Result<(), NotifyError> {
        let Some(settings) = &self.sms else {
            debug!(to = %message.to, "SMS skipped (Twilio not configured)");
            return Ok(());
        };

        if !message.to.starts_with('+') {
            return Err(NotifyError::InvalidRecipient(message.to.clone()));
        }

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            settings.base_url, settings.account_sid
        );
        let response = self
            .http
            .post(url)
            .basic_auth(&settings.account_sid, Some(&settings.auth_token))
            .form(&[
                ("To", message.to.as_str()),
                ("From", settings.from_number.as_str()),
                ("Body", message.body.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(to = %message.to, "SMS sent");
        Ok(())
    }
}

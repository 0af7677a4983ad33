//! Configuration loading
//!
//! Config file resolution follows a fixed priority order:
//! 1. Command-line argument (highest priority)
//! 2. `TM_CONFIG` environment variable
//! 3. `./tm.toml` in the working directory
//! 4. Compiled defaults (fallback)
//!
//! Credentials are never expected in the file. They are overlaid from the
//! environment after the file is parsed, so the same TOML can be shared
//! between environments.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "TM_CONFIG";

/// Config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "tm.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub email: EmailConfig,
    pub sms: SmsConfig,
    pub google_ads: GoogleAdsConfig,
    pub cal: CalConfig,
    pub cron: CronConfig,
    pub auth: AuthConfig,
    pub matching: MatchingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Public site URL used to build links in emails
    pub public_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub api_key: Option<String>,
    pub from: String,
    pub api_base_url: String,
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SmsConfig {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub from_number: Option<String>,
    pub api_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GoogleAdsConfig {
    pub developer_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub customer_id: Option<String>,
    pub login_customer_id: Option<String>,
    /// Conversion action resource id for verified leads
    pub lead_conversion_action: Option<String>,
    /// Conversion action resource id for booked sessions
    pub booking_conversion_action: Option<String>,
    pub lead_value: f64,
    pub booking_value: f64,
    pub currency: String,
    pub default_phone_country_code: String,
    pub api_version: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CalConfig {
    pub database_url: Option<String>,
    pub cache_ttl_minutes: i64,
    pub days_ahead: u32,
    /// Public booking page, `{username}` is substituted
    pub booking_url_template: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CronConfig {
    /// Pause between downstream calls in batch endpoints
    pub delay_ms: u64,
    pub therapist_reminder_hours: i64,
    pub patient_reminder_hours: i64,
    pub batch_limit: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Bearer token for admin routes; empty disables the check
    pub admin_token: String,
    /// Bearer token for cron routes; empty disables the check
    pub cron_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub max_proposals_per_patient: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            email: EmailConfig::default(),
            sms: SmsConfig::default(),
            google_ads: GoogleAdsConfig::default(),
            cal: CalConfig::default(),
            cron: CronConfig::default(),
            auth: AuthConfig::default(),
            matching: MatchingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            public_base_url: "http://localhost:8080".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/marketplace.db"),
            max_connections: 10,
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            from: "Therapist Matching <noreply@example.com>".to_string(),
            api_base_url: "https://api.resend.com".to_string(),
            reply_to: None,
        }
    }
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            account_sid: None,
            auth_token: None,
            from_number: None,
            api_base_url: "https://api.twilio.com".to_string(),
        }
    }
}

impl Default for GoogleAdsConfig {
    fn default() -> Self {
        Self {
            developer_token: None,
            client_id: None,
            client_secret: None,
            refresh_token: None,
            customer_id: None,
            login_customer_id: None,
            lead_conversion_action: None,
            booking_conversion_action: None,
            lead_value: 10.0,
            booking_value: 60.0,
            currency: "EUR".to_string(),
            default_phone_country_code: "49".to_string(),
            api_version: "v17".to_string(),
        }
    }
}

impl Default for CalConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            cache_ttl_minutes: 30,
            days_ahead: 14,
            booking_url_template: "https://cal.com/{username}".to_string(),
        }
    }
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            delay_ms: 250,
            therapist_reminder_hours: 24,
            patient_reminder_hours: 48,
            batch_limit: 100,
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            max_proposals_per_patient: 3,
        }
    }
}

impl AppConfig {
    /// Load configuration using the priority order described in the module docs,
    /// then overlay credentials from the environment.
    ///
    /// A missing config file is not an error: defaults are used and a warning is logged.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let mut config = match resolve_config_path(cli_path) {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            None => {
                warn!("No config file found, using compiled defaults");
                Self::default()
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Overlay credentials and deployment values from an environment lookup.
    ///
    /// Takes the lookup as a closure so tests do not have to mutate the
    /// process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DATABASE_PATH") {
            self.database.path = PathBuf::from(v);
        }
        if let Some(v) = get("PUBLIC_BASE_URL") {
            self.server.public_base_url = v;
        }
        if let Some(v) = get("RESEND_API_KEY") {
            self.email.api_key = Some(v);
        }
        if let Some(v) = get("EMAIL_FROM") {
            self.email.from = v;
        }
        if let Some(v) = get("TWILIO_ACCOUNT_SID") {
            self.sms.account_sid = Some(v);
        }
        if let Some(v) = get("TWILIO_AUTH_TOKEN") {
            self.sms.auth_token = Some(v);
        }
        if let Some(v) = get("TWILIO_FROM_NUMBER") {
            self.sms.from_number = Some(v);
        }
        if let Some(v) = get("GOOGLE_ADS_DEVELOPER_TOKEN") {
            self.google_ads.developer_token = Some(v);
        }
        if let Some(v) = get("GOOGLE_ADS_CLIENT_ID") {
            self.google_ads.client_id = Some(v);
        }
        if let Some(v) = get("GOOGLE_ADS_CLIENT_SECRET") {
            self.google_ads.client_secret = Some(v);
        }
        if let Some(v) = get("GOOGLE_ADS_REFRESH_TOKEN") {
            self.google_ads.refresh_token = Some(v);
        }
        if let Some(v) = get("GOOGLE_ADS_CUSTOMER_ID") {
            self.google_ads.customer_id = Some(normalize_customer_id(&v));
        }
        if let Some(v) = get("GOOGLE_ADS_LOGIN_CUSTOMER_ID") {
            self.google_ads.login_customer_id = Some(normalize_customer_id(&v));
        }
        if let Some(v) = get("CAL_DATABASE_URL") {
            self.cal.database_url = Some(v);
        }
        if let Some(v) = get("ADMIN_API_TOKEN") {
            self.auth.admin_token = v;
        }
        if let Some(v) = get("CRON_SECRET") {
            self.auth.cron_secret = v;
        }
    }

    /// Reject configurations that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::Config("server.port must be non-zero".to_string()));
        }
        if self.cal.cache_ttl_minutes <= 0 {
            return Err(Error::Config("cal.cache_ttl_minutes must be positive".to_string()));
        }
        if self.cal.days_ahead == 0 || self.cal.days_ahead > 90 {
            return Err(Error::Config("cal.days_ahead must be between 1 and 90".to_string()));
        }
        if self.matching.max_proposals_per_patient < 1 {
            return Err(Error::Config(
                "matching.max_proposals_per_patient must be at least 1".to_string(),
            ));
        }
        if self.email.api_key.is_some() && self.email.from.trim().is_empty() {
            return Err(Error::Config("email.from is required when an email key is set".to_string()));
        }
        Ok(())
    }

    /// Email delivery is possible
    pub fn email_enabled(&self) -> bool {
        self.email.api_key.is_some()
    }

    /// SMS delivery is possible
    pub fn sms_enabled(&self) -> bool {
        self.sms.account_sid.is_some() && self.sms.auth_token.is_some() && self.sms.from_number.is_some()
    }

    /// All credentials needed for conversion uploads are present
    pub fn google_ads_enabled(&self) -> bool {
        let ads = &self.google_ads;
        ads.developer_token.is_some()
            && ads.client_id.is_some()
            && ads.client_secret.is_some()
            && ads.refresh_token.is_some()
            && ads.customer_id.is_some()
    }

    /// Booking page link for a Cal.com username
    pub fn booking_url(&self, cal_username: &str) -> String {
        self.cal.booking_url_template.replace("{username}", cal_username)
    }
}

/// Google Ads customer ids are shown with dashes in the UI but sent without
pub fn normalize_customer_id(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Resolve which config file to read, if any
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument (used even if it does not exist, so the
    // read error surfaces instead of silently falling back)
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Working directory
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.email_enabled());
        assert!(!config.google_ads_enabled());
        assert_eq!(config.matching.max_proposals_per_patient, 3);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [server]
            port = 9000

            [cron]
            delay_ms = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.cron.delay_ms, 10);
        assert_eq!(config.cron.therapist_reminder_hours, 24);
        assert_eq!(config.cal.cache_ttl_minutes, 30);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = AppConfig::from_toml_str("[server\nport = ").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_env_overrides_credentials() {
        let env: HashMap<&str, &str> = [
            ("RESEND_API_KEY", "re_123"),
            ("GOOGLE_ADS_DEVELOPER_TOKEN", "dev"),
            ("GOOGLE_ADS_CLIENT_ID", "cid"),
            ("GOOGLE_ADS_CLIENT_SECRET", "secret"),
            ("GOOGLE_ADS_REFRESH_TOKEN", "refresh"),
            ("GOOGLE_ADS_CUSTOMER_ID", "123-456-7890"),
            ("ADMIN_API_TOKEN", "   "),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert!(config.email_enabled());
        assert!(config.google_ads_enabled());
        assert_eq!(config.google_ads.customer_id.as_deref(), Some("1234567890"));
        // Blank values are ignored
        assert!(config.auth.admin_token.is_empty());
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let mut config = AppConfig::default();
        config.cal.cache_ttl_minutes = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_booking_url_substitutes_username() {
        let config = AppConfig::default();
        assert_eq!(config.booking_url("dr-weber"), "https://cal.com/dr-weber");
    }

    #[test]
    fn test_cli_path_wins() {
        let path = PathBuf::from("/definitely/not/here.toml");
        assert_eq!(resolve_config_path(Some(&path)), Some(path.clone()));
        assert!(AppConfig::load(Some(&path)).is_err());
    }
}

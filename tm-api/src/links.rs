//! Links placed in outgoing emails

use tm_common::config::AppConfig;
use tm_common::db::Person;

fn base(config: &AppConfig) -> &str {
    config.server.public_base_url.trim_end_matches('/')
}

/// Email confirmation link for a new lead
pub fn confirm_url(config: &AppConfig, person: &Person) -> String {
    format!(
        "{}/api/leads/confirm?id={}&token={}",
        base(config),
        person.id,
        person.confirm_token
    )
}

/// Page where the patient views and chooses a proposed therapist
pub fn selection_url(config: &AppConfig, secure_uuid: &str) -> String {
    format!("{}/match/{}", base(config), secure_uuid)
}

/// Page where the therapist accepts or declines
pub fn respond_url(config: &AppConfig, secure_uuid: &str) -> String {
    format!("{}/match/{}/respond", base(config), secure_uuid)
}

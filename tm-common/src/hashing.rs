//! Normalisation and hashing of user identifiers for enhanced conversions
//!
//! Google Ads matches conversions on SHA-256 hashes of normalised email
//! addresses and E.164 phone numbers. Hashing happens here, before anything
//! leaves the service.

use sha2::{Digest, Sha256};

const GMAIL_DOMAINS: [&str; 2] = ["gmail.com", "googlemail.com"];

/// Lowercase hex SHA-256 of `value`
pub fn sha256_hex(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// Trim and lowercase; dots in Gmail local parts are not significant
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }

    if GMAIL_DOMAINS.contains(&domain) {
        let local: String = local.chars().filter(|c| *c != '.').collect();
        Some(format!("{}@{}", local, domain))
    } else {
        Some(email)
    }
}

/// Normalise a phone number to E.164.
///
/// `00` international prefixes become `+`; a single leading `0` is a national
/// trunk prefix and is replaced with `default_country_code`.
pub fn normalize_phone(raw: &str, default_country_code: &str) -> Option<String> {
    let trimmed = raw.trim();
    let has_plus = trimmed.starts_with('+');
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();

    let international = if has_plus {
        digits
    } else if let Some(rest) = digits.strip_prefix("00") {
        rest.to_string()
    } else if let Some(rest) = digits.strip_prefix('0') {
        format!("{}{}", default_country_code.trim_start_matches('+'), rest)
    } else {
        return None;
    };

    if (8..=15).contains(&international.len()) && !international.starts_with('0') {
        Some(format!("+{}", international))
    } else {
        None
    }
}

pub fn hash_email(raw: &str) -> Option<String> {
    normalize_email(raw).map(|e| sha256_hex(&e))
}

pub fn hash_phone(raw: &str, default_country_code: &str) -> Option<String> {
    normalize_phone(raw, default_country_code).map(|p| sha256_hex(&p))
}

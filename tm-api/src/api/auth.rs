//! Bearer token middleware for admin and cron routes
//!
//! An empty configured token disables the check for that route group.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::error::ApiError;
use crate::AppState;

/// Admin dashboard routes (`ADMIN_API_TOKEN`)
pub async fn admin_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    check_bearer(&request, &state.config.auth.admin_token, "admin")?;
    Ok(next.run(request).await)
}

/// Scheduler-triggered routes (`CRON_SECRET`)
pub async fn cron_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    check_bearer(&request, &state.config.auth.cron_secret, "cron")?;
    Ok(next.run(request).await)
}

fn check_bearer(request: &Request, expected: &str, scope: &str) -> Result<(), ApiError> {
    if expected.is_empty() {
        return Ok(());
    }

    let provided = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    match provided {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => Ok(()),
        _ => {
            warn!(scope, path = %request.uri().path(), "Rejected request with missing or wrong token");
            Err(ApiError::Unauthorized)
        }
    }
}

/// Comparison time depends only on the lengths
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(auth: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/api/admin/stats");
        if let Some(auth) = auth {
            builder = builder.header(AUTHORIZATION, auth);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_bearer_check() {
        assert!(check_bearer(&request(Some("Bearer s3cret")), "s3cret", "admin").is_ok());
        assert!(check_bearer(&request(Some("Bearer wrong")), "s3cret", "admin").is_err());
        assert!(check_bearer(&request(Some("s3cret")), "s3cret", "admin").is_err());
        assert!(check_bearer(&request(None), "s3cret", "admin").is_err());
        assert!(check_bearer(&request(None), "", "admin").is_ok());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}

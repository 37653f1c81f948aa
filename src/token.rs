//! Bearer token inspection.
//!
//! Tokens issued by `/auth/create-user` are JWTs. Only the payload's `exp`
//! claim is read; the signature is never checked locally.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Deserialize)]
struct Claims {
    exp: Option<i64>,
}

/// Extracts the `exp` claim (seconds since the Unix epoch) from a JWT.
///
/// Returns `None` when the token is not a three-part JWT, the payload is not
/// base64url JSON, or the claim is missing.
pub fn expiry(token: &str) -> Option<i64> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return None,
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| log::debug!("Token payload is not base64url: {}", e))
        .ok()?;
    let claims: Claims = serde_json::from_slice(&bytes)
        .map_err(|e| log::debug!("Token payload is not JSON: {}", e))
        .ok()?;
    claims.exp
}

/// Returns `true` when `token` must not be used anymore at `now`.
///
/// A token is expired iff its expiry is at or before `now`. Tokens without a
/// readable expiry are always expired.
pub fn is_expired(token: &str, now: DateTime<Utc>) -> bool {
    match expiry(token) {
        Some(exp) => exp <= now.timestamp(),
        None => true,
    }
}

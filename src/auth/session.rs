//! Session expiry bookkeeping

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::Deserialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::types::Session;

#[derive(Deserialize)]
struct TokenClaims {
    exp: Option<i64>,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs() as i64
}

/// Read the `exp` claim out of a JWT access token.
///
/// The token is not verified; the expiry is a hint for refresh scheduling,
/// the server enforces the real deadline.
pub(crate) fn token_expiry(access_token: &str) -> Option<i64> {
    let payload = access_token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: TokenClaims = serde_json::from_slice(&decoded).ok()?;
    claims.exp
}

impl Session {
    /// Fill `expires_at` when the response did not include it, preferring
    /// the token's own claim over arithmetic on `expires_in`.
    pub(crate) fn backfill_expiry(&mut self) {
        if self.expires_at.is_none() {
            self.expires_at =
                token_expiry(&self.access_token).or_else(|| Some(unix_now() + self.expires_in));
        }
    }

    /// Check if the session has expired
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => unix_now() >= expires_at,
            None => false,
        }
    }
}

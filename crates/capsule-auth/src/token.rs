//! Session token decoding
//!
//! The backend issues a signed token in the usual three-segment form
//! (header.payload.signature). Decoding here is advisory: the payload is
//! read for subject, email, and expiry so the client can gate screens and
//! schedule refreshes, but no signature verification happens on this side;
//! the backend rejects tampered tokens on every call.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use capsule_types::UserId;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{Map, Value};

/// Subject claim names, checked in order; the first present wins.
const SUBJECT_CLAIMS: [&str; 3] = ["user_id", "sub", "id"];

/// An interpreted session token.
///
/// Derived entirely from decoding the token string; never constructed from
/// anything else.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// The raw token, exactly as issued.
    pub token: String,
    pub subject: UserId,
    pub email: Option<String>,
    /// Expiry from the token's `exp` claim. A token without a usable `exp`
    /// gets the Unix epoch here, i.e. it is already expired.
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// A token expiring exactly now counts as expired; one second of
    /// remaining lifetime counts as valid.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Remaining lifetime, clamped at zero.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}

/// Decode a session token's payload into a [`Session`].
///
/// Returns `None` when the token has fewer than two dot-separated segments,
/// when the payload segment is not base64url, when it does not parse as a
/// JSON object, or when no subject claim is present. A missing or
/// non-numeric `exp` does not fail the decode; it yields an already-past
/// expiry instead.
pub fn decode(token: &str) -> Option<Session> {
    let mut segments = token.split('.');
    let payload_b64 = match (segments.next(), segments.next()) {
        (Some(h), Some(p)) if !h.is_empty() && !p.is_empty() => p,
        _ => return None,
    };

    let payload = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
    let claims: Value = serde_json::from_slice(&payload).ok()?;
    let claims = claims.as_object()?;

    let subject = subject_claim(claims)?;
    let email = claims
        .get("email")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let expires_at = claims
        .get("exp")
        .and_then(numeric_seconds)
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    Some(Session {
        token: token.to_string(),
        subject: UserId::new(subject),
        email,
        expires_at,
    })
}

fn subject_claim(claims: &Map<String, Value>) -> Option<String> {
    for name in SUBJECT_CLAIMS {
        match claims.get(name) {
            Some(Value::String(s)) => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => continue,
        }
    }
    None
}

fn numeric_seconds(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
}

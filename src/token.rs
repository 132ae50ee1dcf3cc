use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use time::OffsetDateTime;

use crate::error::Error;

/// Claims read from an identity token.
///
/// The token is treated as an opaque credential: its signature is checked by
/// the relay/proving service, not here. Only the claims the wallet needs for
/// binding checks and address derivation are decoded.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct IdTokenClaims {
    #[serde(default)]
    pub iss: Option<String>,
    pub sub: String,
    #[serde(deserialize_with = "audience")]
    pub aud: String,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default, with = "time::serde::timestamp::option")]
    pub exp: Option<OffsetDateTime>,
}

impl IdTokenClaims {
    /// Whether the token expired before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.exp.is_some_and(|exp| exp <= now)
    }
}

/// `aud` may be a string or an array; the first entry is the client id.
fn audience<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Audience {
        One(String),
        Many(Vec<String>),
    }

    match Audience::deserialize(deserializer)? {
        Audience::One(aud) => Ok(aud),
        Audience::Many(auds) => auds
            .into_iter()
            .next()
            .ok_or_else(|| serde::de::Error::custom("empty aud array")),
    }
}

/// Decodes the payload of a compact JWS without verifying its signature.
///
/// # Errors
///
/// Returns [`Error::InvalidToken`] if the token is not three dot-separated
/// segments, the payload is not base64url JSON, or `sub`/`aud` are missing.
pub fn decode_unverified_claims(token: &str) -> Result<IdTokenClaims, Error> {
    let payload_b64 = payload_segment(token)?;
    let payload = URL_SAFE_NO_PAD
        .decode(payload_b64.trim_end_matches('='))
        .map_err(|_| Error::InvalidToken("payload is not base64url".into()))?;
    serde_json::from_slice(&payload).map_err(|e| Error::InvalidToken(format!("claims: {e}")))
}

fn payload_segment(token: &str) -> Result<&str, Error> {
    let parts: Vec<&str> = token.split('.').collect();
    match parts.as_slice() {
        [header, payload, _signature] if !header.is_empty() && !payload.is_empty() => Ok(payload),
        _ => Err(Error::InvalidToken("expected a compact JWS".into())),
    }
}

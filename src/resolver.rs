//! Identity-token → wallet-address resolution.

use std::future::Future;

use serde::Deserialize;
use url::Url;

use crate::binding::derive_address;
use crate::error::Error;
use crate::token::IdTokenClaims;
use crate::types::WalletAddress;

/// A wallet address together with the identity token that produced it.
///
/// Persisted as a pair; signing assumes both are present.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ResolvedIdentity {
    pub wallet_address: WalletAddress,
    pub raw_token: String,
}

impl ResolvedIdentity {
    #[must_use]
    pub fn new(wallet_address: WalletAddress, raw_token: impl Into<String>) -> Self {
        Self {
            wallet_address,
            raw_token: raw_token.into(),
        }
    }
}

/// Turns an identity token into the wallet address it controls.
///
/// Resolving the same token twice must be safe, though not necessarily cheap.
pub trait AddressResolver: Send + Sync + 'static {
    fn resolve(
        &self,
        raw_token: &str,
        claims: &IdTokenClaims,
        user_salt: &str,
    ) -> impl Future<Output = Result<WalletAddress, Error>> + Send;
}

/// Derives the address locally from `sub`, `aud` and the session salt.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalResolver;

impl AddressResolver for LocalResolver {
    async fn resolve(
        &self,
        _raw_token: &str,
        claims: &IdTokenClaims,
        user_salt: &str,
    ) -> Result<WalletAddress, Error> {
        Ok(derive_address(&claims.sub, &claims.aud, user_salt))
    }
}

/// Delegates address resolution (and salt management) to a zkLogin relay.
///
/// The relay receives the raw token in the `zklogin-jwt` header and the API
/// key as a bearer credential, and answers `{"data": {"address": "0x…"}}`.
#[derive(Debug, Clone)]
pub struct RelayResolver {
    url: Url,
    api_key: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RelayResponse {
    data: Option<RelayData>,
}

#[derive(Debug, Deserialize)]
struct RelayData {
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RelayErrorBody {
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

impl RelayResolver {
    pub const DEFAULT_URL: &'static str = "https://api.enoki.mystenlabs.com/v1/zklogin";

    #[must_use]
    pub fn new(url: Url, api_key: impl Into<String>) -> Self {
        Self {
            url,
            api_key: api_key.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<RelayErrorBody>(&body)
            .ok()
            .and_then(|b| {
                b.error
                    .map(|e| match e {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .or(b.message)
            })
            .or_else(|| status.canonical_reason().map(str::to_owned))
            .unwrap_or(body);
        Err(Error::Resolution {
            status: Some(status.as_u16()),
            detail,
        })
    }
}

impl AddressResolver for RelayResolver {
    async fn resolve(
        &self,
        raw_token: &str,
        _claims: &IdTokenClaims,
        _user_salt: &str,
    ) -> Result<WalletAddress, Error> {
        let response = self
            .http
            .get(self.url.clone())
            .header("zklogin-jwt", raw_token)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| Error::resolution(e.to_string()))?;

        let response = Self::ensure_success(response).await?;
        let body: RelayResponse = response
            .json()
            .await
            .map_err(|e| Error::resolution(format!("malformed relay response: {e}")))?;

        let address = body
            .data
            .and_then(|d| d.address)
            .ok_or_else(|| Error::resolution("relay response has no address"))?;
        address
            .parse()
            .map_err(|e| Error::resolution(format!("relay returned {e}")))
    }
}

/// Resolver picked at startup from configuration.
#[derive(Debug, Clone)]
pub enum ConfiguredResolver {
    Local(LocalResolver),
    Relay(RelayResolver),
}

impl AddressResolver for ConfiguredResolver {
    async fn resolve(
        &self,
        raw_token: &str,
        claims: &IdTokenClaims,
        user_salt: &str,
    ) -> Result<WalletAddress, Error> {
        match self {
            Self::Local(r) => r.resolve(raw_token, claims, user_salt).await,
            Self::Relay(r) => r.resolve(raw_token, claims, user_salt).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::token::decode_unverified_claims;
    use crate::token::tests::make_token;

    const ADDR: &str = "0x5b1d4b6c1a5b1d4b6c1a5b1d4b6c1a5b1d4b6c1a5b1d4b6c1a5b1d4b6c1a5b1d";

    fn token() -> (String, IdTokenClaims) {
        let raw = make_token(&serde_json::json!({"sub": "user-1", "aud": "client-1"}));
        let claims = decode_unverified_claims(&raw).unwrap();
        (raw, claims)
    }

    async fn relay(server: &MockServer) -> RelayResolver {
        RelayResolver::new(format!("{}/v1/zklogin", server.uri()).parse().unwrap(), "key-123")
    }

    #[tokio::test]
    async fn test_local_resolver_is_deterministic() {
        let (raw, claims) = token();
        let a = LocalResolver.resolve(&raw, &claims, "77").await.unwrap();
        let b = LocalResolver.resolve(&raw, &claims, "77").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a, derive_address("user-1", "client-1", "77"));
    }

    #[tokio::test]
    async fn test_relay_sends_token_and_credential() {
        let server = MockServer::start().await;
        let (raw, claims) = token();
        Mock::given(method("GET"))
            .and(path("/v1/zklogin"))
            .and(header("zklogin-jwt", raw.as_str()))
            .and(header("authorization", "Bearer key-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"address": ADDR, "salt": "123"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let address = relay(&server).await.resolve(&raw, &claims, "ignored").await.unwrap();
        assert_eq!(address.as_str(), ADDR);
    }

    #[tokio::test]
    async fn test_relay_missing_address_is_resolution_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": {"salt": "1"}})),
            )
            .mount(&server)
            .await;

        let (raw, claims) = token();
        let err = relay(&server).await.resolve(&raw, &claims, "s").await.unwrap_err();
        assert!(matches!(err, Error::Resolution { status: None, .. }));
    }

    #[tokio::test]
    async fn test_relay_malformed_json_is_resolution_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let (raw, claims) = token();
        let err = relay(&server).await.resolve(&raw, &claims, "s").await.unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
    }

    #[tokio::test]
    async fn test_relay_rejection_carries_status_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({"error": "Invalid JWT"})),
            )
            .mount(&server)
            .await;

        let (raw, claims) = token();
        match relay(&server).await.resolve(&raw, &claims, "s").await.unwrap_err() {
            Error::Resolution { status, detail } => {
                assert_eq!(status, Some(401));
                assert_eq!(detail, "Invalid JWT");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_relay_invalid_address_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"data": {"address": "0x12"}})),
            )
            .mount(&server)
            .await;

        let (raw, claims) = token();
        assert!(relay(&server).await.resolve(&raw, &claims, "s").await.is_err());
    }
}

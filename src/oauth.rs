use serde::Deserialize;
use url::Url;

use crate::error::Error;
use crate::keys::LoginSession;

/// Where the identity provider sends the user back to.
///
/// Web builds return to an origin + path; native builds use a custom URL
/// scheme registered with the platform. The choice is injected through
/// configuration, never made inside the protocol logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectTarget {
    Web { origin: Url, path: String },
    Native { uri: Url },
}

impl RedirectTarget {
    /// Web redirect, e.g. `RedirectTarget::web(origin, "/callback")`.
    #[must_use]
    pub fn web(origin: Url, path: impl Into<String>) -> Self {
        Self::Web {
            origin,
            path: path.into(),
        }
    }

    /// Native custom-scheme redirect, e.g. `com.example.app:/oauth2redirect`.
    #[must_use]
    pub fn native(uri: Url) -> Self {
        Self::Native { uri }
    }

    /// The `redirect_uri` sent to the provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the web path cannot be joined onto the origin.
    pub fn to_url(&self) -> Result<Url, Error> {
        match self {
            Self::Web { origin, path } => origin
                .join(path)
                .map_err(|e| Error::Config(format!("redirect path {path:?}: {e}"))),
            Self::Native { uri } => Ok(uri.clone()),
        }
    }
}

/// How the provider hands back the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// Authorization code in the query, exchanged at the token endpoint (PKCE).
    #[default]
    Code,
    /// Identity token directly in the URL fragment.
    IdToken,
}

impl ResponseType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::IdToken => "id_token",
        }
    }
}

impl std::str::FromStr for ResponseType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(Self::Code),
            "id_token" => Ok(Self::IdToken),
            other => Err(Error::Config(format!("unsupported response_type {other:?}"))),
        }
    }
}

/// OpenID Connect provider configuration.
///
/// Required fields are constructor parameters; endpoints default to Google.
///
/// ```rust,ignore
/// use zklogin_wallet::{OAuthConfig, RedirectTarget};
///
/// let config = OAuthConfig::new(
///     "my-client-id",
///     RedirectTarget::web("https://wallet.example.com".parse()?, "/callback"),
/// )
/// .with_auth_url("https://custom.example.com/authorize".parse()?);
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct OAuthConfig {
    pub(crate) client_id: String,
    pub(crate) client_secret: Option<String>,
    pub(crate) auth_url: Url,
    pub(crate) token_url: Url,
    pub(crate) redirect: RedirectTarget,
    pub(crate) scopes: Vec<String>,
    pub(crate) response_type: ResponseType,
}

impl OAuthConfig {
    #[must_use]
    pub fn new(client_id: impl Into<String>, redirect: RedirectTarget) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            redirect,
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth"
                .parse()
                .expect("valid default URL"),
            token_url: "https://oauth2.googleapis.com/token"
                .parse()
                .expect("valid default URL"),
            scopes: vec!["openid".into(), "email".into(), "profile".into()],
            response_type: ResponseType::Code,
        }
    }

    /// Override the authorization endpoint.
    #[must_use]
    pub fn with_auth_url(mut self, url: Url) -> Self {
        self.auth_url = url;
        self
    }

    /// Override the token endpoint.
    #[must_use]
    pub fn with_token_url(mut self, url: Url) -> Self {
        self.token_url = url;
        self
    }

    /// Client secret for providers that require one on code exchange.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Override the scopes (default: `["openid", "email", "profile"]`).
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub fn with_response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn auth_url(&self) -> &Url {
        &self.auth_url
    }

    #[must_use]
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    #[must_use]
    pub fn redirect(&self) -> &RedirectTarget {
        &self.redirect
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    #[must_use]
    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }
}

/// Authorization URL to navigate to; its session is already persisted.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct AuthorizationRequest {
    pub url: Url,
    pub state: String,
    pub nonce: String,
}

/// Token endpoint response; only the identity token matters here.
#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    id_token: Option<String>,
}

/// Client for the identity provider's authorize and token endpoints.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    config: OAuthConfig,
    http: reqwest::Client,
}

impl ProviderClient {
    #[must_use]
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Builds the authorization URL for a persisted login session.
    ///
    /// `code_challenge` must be present for the code flow.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the redirect target is invalid.
    pub fn authorization_url(
        &self,
        session: &LoginSession,
        code_challenge: Option<&str>,
    ) -> Result<AuthorizationRequest, Error> {
        let redirect_uri = self.config.redirect.to_url()?;
        let scope = self.config.scopes.join(" ");

        let mut url = self.config.auth_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.config.client_id)
                .append_pair("response_type", self.config.response_type.as_str())
                .append_pair("redirect_uri", redirect_uri.as_str())
                .append_pair("scope", &scope)
                .append_pair("nonce", session.nonce.as_str())
                .append_pair("state", &session.state);
            if let Some(challenge) = code_challenge {
                query
                    .append_pair("code_challenge", challenge)
                    .append_pair("code_challenge_method", "S256");
            }
        }

        Ok(AuthorizationRequest {
            url,
            state: session.state.clone(),
            nonce: session.nonce.to_string(),
        })
    }

    /// Exchanges an authorization code for the identity token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenExchange`] on network failure, a non-success
    /// status, or a response without `id_token`.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<String, Error> {
        let redirect_uri = self.config.redirect.to_url()?;
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(verifier) = code_verifier {
            params.push(("code_verifier", verifier));
        }
        if let Some(secret) = &self.config.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        let response = self
            .http
            .post(self.config.token_url.clone())
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::token_exchange(e.to_string()))?;

        let response = Self::ensure_success(response).await?;
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::token_exchange(format!("malformed token response: {e}")))?;

        body.id_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::token_exchange("token response has no id_token"))
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(Error::TokenExchange {
            status: Some(status),
            detail: body,
        })
    }
}

use url::Url;

use crate::error::Error;

/// What the identity provider sent back on re-entry.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CallbackPayload {
    /// Identity token delivered directly (URL fragment, implicit flow).
    IdToken { id_token: String, state: Option<String> },
    /// Authorization code to exchange at the token endpoint.
    Code { code: String, state: Option<String> },
    /// The provider reported an error (user cancelled, consent denied, ...).
    ProviderError {
        error: String,
        description: Option<String>,
    },
}

impl CallbackPayload {
    /// Parses a full callback URL.
    ///
    /// The fragment is checked first (`#id_token=…`), then the query
    /// (`?code=…`). Both may carry `state` and `error`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidToken`] if neither an identity token, a code,
    /// nor a provider error is present.
    pub fn from_url(url: &Url) -> Result<Self, Error> {
        if let Some(fragment) = url.fragment().filter(|f| !f.is_empty()) {
            let pairs: Vec<(String, String)> = url::form_urlencoded::parse(fragment.as_bytes())
                .into_owned()
                .collect();
            if let Ok(payload) = Self::from_pairs(&pairs) {
                return Ok(payload);
            }
        }
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        Self::from_pairs(&pairs)
    }

    /// Builds a payload from decoded key/value parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidToken`] if no usable parameter is present.
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self, Error> {
        let get = |name: &str| {
            pairs
                .iter()
                .find(|(k, v)| k == name && !v.is_empty())
                .map(|(_, v)| v.clone())
        };

        if let Some(error) = get("error") {
            return Ok(Self::ProviderError {
                error,
                description: get("error_description"),
            });
        }
        let state = get("state");
        if let Some(id_token) = get("id_token") {
            return Ok(Self::IdToken { id_token, state });
        }
        if let Some(code) = get("code") {
            return Ok(Self::Code { code, state });
        }
        Err(Error::InvalidToken(
            "callback carries neither id_token nor code".into(),
        ))
    }

    /// The `state` parameter echoed by the provider, if any.
    #[must_use]
    pub fn state(&self) -> Option<&str> {
        match self {
            Self::IdToken { state, .. } | Self::Code { state, .. } => state.as_deref(),
            Self::ProviderError { .. } => None,
        }
    }
}

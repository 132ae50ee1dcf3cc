use std::sync::Arc;

use url::Url;

use crate::error::Error;
use crate::flow::LoginFlow;
use crate::keys::{DEFAULT_EPOCH_WINDOW, KeyManager};
use crate::ledger::SuiRpcClient;
use crate::oauth::{OAuthConfig, ProviderClient, RedirectTarget, ResponseType};
use crate::resolver::{ConfiguredResolver, LocalResolver, RelayResolver};
use crate::store::StorageBackend;

/// Login flow wired from configuration.
pub type ConfiguredFlow = LoginFlow<SuiRpcClient, ConfiguredResolver>;

/// Wallet configuration.
///
/// The provider settings are a constructor parameter; everything else has a
/// default and a `with_*` override. Use [`from_env()`](ZkLoginConfig::from_env)
/// for convention-based setup.
#[derive(Debug, Clone)]
pub struct ZkLoginConfig {
    oauth: OAuthConfig,
    epoch_window: u64,
    pinned_salt: Option<String>,
    salt_seed: Option<String>,
    relay: Option<(Url, String)>,
    rpc_url: Url,
    gas_budget: u64,
    storage: StorageBackend,
}

impl ZkLoginConfig {
    /// Create config with the required provider settings; everything else defaults.
    #[must_use]
    pub fn new(oauth: OAuthConfig) -> Self {
        Self {
            oauth,
            epoch_window: DEFAULT_EPOCH_WINDOW,
            pinned_salt: None,
            salt_seed: None,
            relay: None,
            rpc_url: SuiRpcClient::DEFAULT_URL.parse().expect("valid default URL"),
            gas_budget: SuiRpcClient::DEFAULT_GAS_BUDGET,
            storage: StorageBackend::Memory,
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `ZKLOGIN_CLIENT_ID`: OAuth client ID
    /// - `ZKLOGIN_REDIRECT_URI`: callback URI, web (`https://…/callback`) or a native custom scheme
    ///
    /// # Optional env vars
    /// - `ZKLOGIN_CLIENT_SECRET`: sent on code exchange
    /// - `ZKLOGIN_AUTH_URL`, `ZKLOGIN_TOKEN_URL`: override the provider endpoints
    /// - `ZKLOGIN_SCOPES`: comma-separated scopes
    /// - `ZKLOGIN_RESPONSE_TYPE`: `code` (default) or `id_token`
    /// - `ZKLOGIN_EPOCH_WINDOW`: epochs the ephemeral key stays valid
    /// - `ZKLOGIN_USER_SALT`: one salt for every identity instead of a derived one
    /// - `ZKLOGIN_SALT_SEED`: seed for per-identity salts; by default one is
    ///   generated on first login and kept in storage
    /// - `ZKLOGIN_RELAY_URL`, `ZKLOGIN_RELAY_API_KEY`: resolve addresses through a relay
    ///   (the API key alone selects the default relay)
    /// - `ZKLOGIN_RPC_URL`: Sui full node
    /// - `ZKLOGIN_GAS_BUDGET`: gas budget for transfers, in MIST
    /// - `ZKLOGIN_STORAGE`: `memory` or `file:<path>`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if required env vars are missing or any value is invalid.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let client_id = var("ZKLOGIN_CLIENT_ID")
            .ok_or_else(|| Error::Config("ZKLOGIN_CLIENT_ID is required".into()))?;
        let redirect_uri: Url = var("ZKLOGIN_REDIRECT_URI")
            .ok_or_else(|| Error::Config("ZKLOGIN_REDIRECT_URI is required".into()))?
            .parse()
            .map_err(|e| Error::Config(format!("ZKLOGIN_REDIRECT_URI: {e}")))?;

        let parse_url = |name: &str| -> Result<Option<Url>, Error> {
            var(name)
                .map(|s| s.parse::<Url>().map_err(|e| Error::Config(format!("{name}: {e}"))))
                .transpose()
        };
        let parse_u64 = |name: &str| -> Result<Option<u64>, Error> {
            var(name)
                .map(|s| {
                    s.trim()
                        .parse::<u64>()
                        .map_err(|e| Error::Config(format!("{name}: {e}")))
                })
                .transpose()
        };

        let mut oauth = OAuthConfig::new(client_id, redirect_target(redirect_uri));
        if let Some(url) = parse_url("ZKLOGIN_AUTH_URL")? {
            oauth = oauth.with_auth_url(url);
        }
        if let Some(url) = parse_url("ZKLOGIN_TOKEN_URL")? {
            oauth = oauth.with_token_url(url);
        }
        if let Some(secret) = var("ZKLOGIN_CLIENT_SECRET") {
            oauth = oauth.with_client_secret(secret);
        }
        if let Some(scopes) = var("ZKLOGIN_SCOPES") {
            oauth = oauth.with_scopes(scopes.split(',').map(|s| s.trim().to_string()).collect());
        }
        if let Some(response_type) = var("ZKLOGIN_RESPONSE_TYPE") {
            oauth = oauth.with_response_type(response_type.trim().parse::<ResponseType>()?);
        }

        let mut config = Self::new(oauth);
        if let Some(window) = parse_u64("ZKLOGIN_EPOCH_WINDOW")? {
            config = config.with_epoch_window(window);
        }
        if let Some(salt) = var("ZKLOGIN_USER_SALT") {
            config = config.with_pinned_salt(salt);
        }
        if let Some(seed) = var("ZKLOGIN_SALT_SEED") {
            if seed.trim().is_empty() {
                return Err(Error::Config("ZKLOGIN_SALT_SEED must not be empty".into()));
            }
            config = config.with_salt_seed(seed);
        }
        match (parse_url("ZKLOGIN_RELAY_URL")?, var("ZKLOGIN_RELAY_API_KEY")) {
            (Some(url), Some(key)) => config = config.with_relay(url, key),
            (None, Some(key)) => {
                let url = RelayResolver::DEFAULT_URL.parse().expect("valid default URL");
                config = config.with_relay(url, key);
            }
            (Some(_), None) => {
                return Err(Error::Config(
                    "ZKLOGIN_RELAY_URL is set but ZKLOGIN_RELAY_API_KEY is missing".into(),
                ));
            }
            (None, None) => {}
        }
        if let Some(url) = parse_url("ZKLOGIN_RPC_URL")? {
            config = config.with_rpc_url(url);
        }
        if let Some(budget) = parse_u64("ZKLOGIN_GAS_BUDGET")? {
            config = config.with_gas_budget(budget);
        }
        if let Some(storage) = var("ZKLOGIN_STORAGE") {
            config = config.with_storage(storage.parse()?);
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_epoch_window(mut self, epochs: u64) -> Self {
        self.epoch_window = epochs;
        self
    }

    #[must_use]
    pub fn with_pinned_salt(mut self, salt: impl Into<String>) -> Self {
        self.pinned_salt = Some(salt.into());
        self
    }

    #[must_use]
    pub fn with_salt_seed(mut self, seed: impl Into<String>) -> Self {
        self.salt_seed = Some(seed.into());
        self
    }

    /// Resolve addresses through a relay instead of deriving them locally.
    #[must_use]
    pub fn with_relay(mut self, url: Url, api_key: impl Into<String>) -> Self {
        self.relay = Some((url, api_key.into()));
        self
    }

    #[must_use]
    pub fn with_rpc_url(mut self, url: Url) -> Self {
        self.rpc_url = url;
        self
    }

    #[must_use]
    pub fn with_gas_budget(mut self, gas_budget: u64) -> Self {
        self.gas_budget = gas_budget;
        self
    }

    #[must_use]
    pub fn with_storage(mut self, storage: StorageBackend) -> Self {
        self.storage = storage;
        self
    }

    #[must_use]
    pub fn oauth(&self) -> &OAuthConfig {
        &self.oauth
    }

    #[must_use]
    pub fn storage(&self) -> &StorageBackend {
        &self.storage
    }

    /// Builds the login flow: provider client, key manager, storage backend,
    /// Sui RPC client and resolver.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the epoch window is zero.
    pub fn build(self) -> Result<ConfiguredFlow, Error> {
        if self.epoch_window == 0 {
            return Err(Error::Config("epoch window must be at least 1".into()));
        }

        let mut keys = KeyManager::new(self.epoch_window);
        if let Some(salt) = self.pinned_salt {
            keys = keys.with_pinned_salt(salt);
        }
        if let Some(seed) = self.salt_seed {
            keys = keys.with_salt_seed(seed);
        }
        let resolver = match self.relay {
            Some((url, api_key)) => ConfiguredResolver::Relay(RelayResolver::new(url, api_key)),
            None => ConfiguredResolver::Local(LocalResolver),
        };
        let ledger = SuiRpcClient::new(self.rpc_url).with_gas_budget(self.gas_budget);

        tracing::debug!(
            epoch_window = keys.epoch_window(),
            storage = ?self.storage,
            relay = matches!(resolver, ConfiguredResolver::Relay(_)),
            "zkLogin flow configured"
        );

        Ok(LoginFlow::new(
            ProviderClient::new(self.oauth),
            keys,
            self.storage.open(),
            Arc::new(ledger),
            Arc::new(resolver),
        ))
    }
}

/// `http(s)` URIs are split into origin and path; anything else is a native
/// custom-scheme redirect.
fn redirect_target(uri: Url) -> RedirectTarget {
    match uri.scheme() {
        "http" | "https" => {
            let origin = uri.origin().ascii_serialization();
            match origin.parse() {
                Ok(origin) => RedirectTarget::web(origin, uri.path()),
                Err(_) => RedirectTarget::native(uri),
            }
        }
        _ => RedirectTarget::native(uri),
    }
}

//! The login state machine.
//!
//! ```text
//! Idle -> AwaitingRedirect -> AwaitingCallback -> Resolved | Failed
//! ```
//!
//! The redirect may end the current process. Everything the callback needs is
//! therefore written to the [`SessionStore`] before the authorization URL is
//! handed out, and [`LoginFlow::handle_callback`] works from a freshly
//! constructed flow in `Idle`.

use std::sync::{Arc, Mutex, PoisonError};

use time::OffsetDateTime;

use crate::binding::derive_user_salt;
use crate::callback::CallbackPayload;
use crate::error::Error;
use crate::keys::{KeyManager, LoginSession};
use crate::ledger::LedgerClient;
use crate::oauth::{AuthorizationRequest, ProviderClient, ResponseType};
use crate::pkce::{self, PkcePair};
use crate::resolver::{AddressResolver, ResolvedIdentity};
use crate::signer::TransferSigner;
use crate::store::SessionStore;
use crate::token::{IdTokenClaims, decode_unverified_claims};

/// Where the login currently stands in this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    AwaitingRedirect,
    AwaitingCallback,
    Resolved(ResolvedIdentity),
    /// Terminal until the user starts over; carries a human-readable message.
    Failed(String),
}

enum Credential {
    Token(String),
    Code(String),
}

/// Drives one login attempt at a time.
pub struct LoginFlow<L, R> {
    provider: ProviderClient,
    keys: KeyManager,
    store: SessionStore,
    ledger: Arc<L>,
    resolver: Arc<R>,
    state: Mutex<FlowState>,
}

impl<L: LedgerClient, R: AddressResolver> LoginFlow<L, R> {
    #[must_use]
    pub fn new(
        provider: ProviderClient,
        keys: KeyManager,
        store: SessionStore,
        ledger: Arc<L>,
        resolver: Arc<R>,
    ) -> Self {
        Self {
            provider,
            keys,
            store,
            ledger,
            resolver,
            state: Mutex::new(FlowState::Idle),
        }
    }

    #[must_use]
    pub fn state(&self) -> FlowState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_state(&self, next: FlowState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    fn fail(&self, error: Error) -> Error {
        tracing::warn!(error = %error, "zkLogin attempt failed");
        self.set_state(FlowState::Failed(error.to_string()));
        error
    }

    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Signer sharing this flow's store and ledger.
    #[must_use]
    pub fn signer(&self) -> TransferSigner<L> {
        TransferSigner::new(self.store.clone(), self.ledger.clone())
    }

    /// Starts a new login attempt (`Idle → AwaitingRedirect`).
    ///
    /// Any previous attempt, finished or not, is discarded. The returned URL
    /// may be navigated to immediately: the session is already persisted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyGeneration`] if the epoch or entropy is unavailable,
    /// [`Error::Storage`] if persisting fails, or [`Error::Config`] for an
    /// invalid redirect target.
    pub async fn start(&self) -> Result<AuthorizationRequest, Error> {
        self.begin().await.map_err(|e| self.fail(e))
    }

    async fn begin(&self) -> Result<AuthorizationRequest, Error> {
        let current_epoch = self
            .ledger
            .current_epoch()
            .await
            .map_err(|e| Error::KeyGeneration(format!("current epoch unavailable: {e}")))?;

        let pkce = match self.provider.config().response_type() {
            ResponseType::Code => Some(PkcePair::generate()),
            ResponseType::IdToken => None,
        };
        let session = self.keys.create_session(
            current_epoch,
            pkce::generate_state(),
            pkce.as_ref().map(|p| p.verifier.clone()),
        )?;

        let request = self
            .provider
            .authorization_url(&session, pkce.as_ref().map(|p| p.challenge.as_str()))?;

        self.store.save_login(&session).await?;
        self.set_state(FlowState::AwaitingRedirect);

        tracing::info!(
            current_epoch,
            epoch_window = self.keys.epoch_window(),
            max_epoch = session.max_epoch,
            "zkLogin session created; awaiting redirect"
        );
        Ok(request)
    }

    /// Records that the user was sent to the provider (`AwaitingRedirect → AwaitingCallback`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless a redirect is pending.
    pub fn redirect_issued(&self) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            FlowState::AwaitingRedirect => {
                *state = FlowState::AwaitingCallback;
                Ok(())
            }
            ref other => Err(Error::InvalidState(format!(
                "no redirect pending (state: {other:?})"
            ))),
        }
    }

    /// Completes the login from the provider's callback.
    ///
    /// On success the resolved address and its token are persisted together
    /// and the flow is `Resolved`. On any error nothing is persisted, the
    /// pending attempt is discarded from storage and the flow is `Failed`; the
    /// user has to call [`start`](Self::start) again, in this process or any
    /// other.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if this flow already failed.
    /// - [`Error::MissingSessionData`] if no complete login session is stored.
    /// - [`Error::TokenExchange`] if the provider reported an error or rejected the code.
    /// - [`Error::InvalidToken`] on state/nonce mismatch, malformed or expired token.
    /// - [`Error::Resolution`] if address resolution fails.
    pub async fn handle_callback(
        &self,
        payload: CallbackPayload,
    ) -> Result<ResolvedIdentity, Error> {
        if let FlowState::Failed(reason) = self.state() {
            return Err(Error::InvalidState(format!(
                "previous attempt failed ({reason}); start a new login"
            )));
        }
        match self.complete(payload).await {
            Ok(identity) => Ok(identity),
            Err(e) => {
                if let Err(discard) = self.store.discard_pending_login().await {
                    tracing::warn!(error = %discard, "Failed login attempt left in storage");
                }
                Err(self.fail(e))
            }
        }
    }

    async fn complete(&self, payload: CallbackPayload) -> Result<ResolvedIdentity, Error> {
        let (state, credential) = match payload {
            CallbackPayload::ProviderError { error, description } => {
                return Err(Error::TokenExchange {
                    status: None,
                    detail: match description {
                        Some(desc) => format!("provider returned {error}: {desc}"),
                        None => format!("provider returned {error}"),
                    },
                });
            }
            CallbackPayload::IdToken { id_token, state } => (state, Credential::Token(id_token)),
            CallbackPayload::Code { code, state } => (state, Credential::Code(code)),
        };

        let session = self.store.load_login().await?;

        match state.as_deref() {
            Some(received) if received != session.state => {
                return Err(Error::InvalidToken("state mismatch".into()));
            }
            None if matches!(credential, Credential::Code(_)) => {
                return Err(Error::InvalidToken("code callback without state".into()));
            }
            _ => {}
        }

        let raw_token = match credential {
            Credential::Token(token) => token,
            Credential::Code(code) => {
                self.provider
                    .exchange_code(&code, session.code_verifier.as_deref())
                    .await?
            }
        };

        self.resolve_identity(&raw_token, &session).await
    }

    /// Checks the token against the stored session, resolves its address and
    /// persists both atomically.
    async fn resolve_identity(
        &self,
        raw_token: &str,
        session: &LoginSession,
    ) -> Result<ResolvedIdentity, Error> {
        let claims = decode_unverified_claims(raw_token)?;

        match claims.nonce.as_deref() {
            Some(nonce) if nonce == session.nonce.as_str() => {}
            Some(_) => {
                return Err(Error::InvalidToken(
                    "nonce does not match the current login session".into(),
                ));
            }
            None => return Err(Error::InvalidToken("token carries no nonce".into())),
        }
        if claims.is_expired_at(OffsetDateTime::now_utc()) {
            return Err(Error::InvalidToken("token expired".into()));
        }

        let user_salt = self.user_salt(&claims).await?;
        let address = self
            .resolver
            .resolve(raw_token, &claims, &user_salt)
            .await?;
        let identity = ResolvedIdentity::new(address, raw_token);

        self.store.save_resolved(&identity, &user_salt).await?;
        self.set_state(FlowState::Resolved(identity.clone()));

        tracing::info!(address = %identity.wallet_address, "zkLogin address resolved");
        Ok(identity)
    }

    /// The salt for this identity: the pinned one, else derived from the salt
    /// seed so the same `sub`/`aud` always maps to the same address.
    async fn user_salt(&self, claims: &IdTokenClaims) -> Result<String, Error> {
        if let Some(salt) = self.keys.pinned_salt() {
            return Ok(salt.to_owned());
        }
        let seed = match self.keys.salt_seed() {
            Some(seed) => seed.to_owned(),
            None => self.store.salt_seed().await?,
        };
        Ok(derive_user_salt(&seed, &claims.sub, &claims.aud))
    }

    /// The identity persisted by a previous successful login, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backend fails.
    pub async fn current_identity(&self) -> Result<Option<ResolvedIdentity>, Error> {
        self.store.load_resolved().await
    }

    /// Purges every session field in one batch and returns to `Idle`.
    ///
    /// The salt seed is kept: signing in again as the same identity yields the
    /// same address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the purge fails; the state is unchanged then.
    pub async fn sign_out(&self) -> Result<(), Error> {
        self.store.purge().await?;
        self.set_state(FlowState::Idle);
        tracing::info!("Signed out; zkLogin session purged");
        Ok(())
    }
}

use std::sync::Arc;

use super::traits::{Mutation, Storage, StorageDyn, StorageError};
use crate::error::Error;
use crate::keys::{EphemeralKeyPair, LoginSession, StoredKeyPair, generate_salt_seed};
use crate::resolver::ResolvedIdentity;
use crate::types::{Nonce, WalletAddress};

pub const KEYPAIR_KEY: &str = "zklogin_ephemeral_keypair";
pub const MAX_EPOCH_KEY: &str = "zklogin_max_epoch";
pub const RANDOMNESS_KEY: &str = "zklogin_randomness";
pub const USER_SALT_KEY: &str = "zklogin_user_salt";
pub const NONCE_KEY: &str = "zklogin_nonce";
pub const OAUTH_STATE_KEY: &str = "zklogin_oauth_state";
pub const CODE_VERIFIER_KEY: &str = "zklogin_code_verifier";
pub const ID_TOKEN_KEY: &str = "zklogin_id_token";
pub const ADDRESS_KEY: &str = "zklogin_address";
/// Wallet-wide seed for per-identity salts. Not a session key: sign-out keeps it.
pub const SALT_SEED_KEY: &str = "zklogin_salt_seed";

/// Every key the session owns; sign-out removes all of them.
pub const ALL_KEYS: [&str; 9] = [
    KEYPAIR_KEY,
    MAX_EPOCH_KEY,
    RANDOMNESS_KEY,
    USER_SALT_KEY,
    NONCE_KEY,
    OAUTH_STATE_KEY,
    CODE_VERIFIER_KEY,
    ID_TOKEN_KEY,
    ADDRESS_KEY,
];

/// Keys written by [`SessionStore::save_login`] for one login attempt.
pub const LOGIN_KEYS: [&str; 6] = [
    KEYPAIR_KEY,
    MAX_EPOCH_KEY,
    RANDOMNESS_KEY,
    NONCE_KEY,
    OAUTH_STATE_KEY,
    CODE_VERIFIER_KEY,
];

/// What the transaction signer needs from storage.
#[derive(Debug, Clone)]
pub struct SigningState {
    pub keypair: EphemeralKeyPair,
    pub address: WalletAddress,
    pub max_epoch: u64,
}

/// Typed view of the login session over a [`Storage`] backend.
///
/// Injected into every component instead of ambient global state. All
/// multi-key writes go through one atomic batch.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<dyn StorageDyn>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}

impl SessionStore {
    #[must_use]
    pub fn new<S: Storage>(storage: S) -> Self {
        Self {
            inner: Arc::new(storage),
        }
    }

    #[must_use]
    pub fn from_shared(storage: Arc<dyn StorageDyn>) -> Self {
        Self { inner: storage }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        self.inner.get_dyn(key).await.map_err(storage_error)
    }

    async fn apply(&self, batch: Vec<Mutation>) -> Result<(), Error> {
        self.inner.apply_dyn(batch).await.map_err(storage_error)
    }

    /// Salt behind the currently resolved address, if signed in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backend fails.
    pub async fn stored_salt(&self) -> Result<Option<String>, Error> {
        self.get(USER_SALT_KEY).await
    }

    /// The wallet's salt seed, generated and persisted on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backend fails, or
    /// [`Error::KeyGeneration`] if a new seed cannot be generated.
    pub async fn salt_seed(&self) -> Result<String, Error> {
        if let Some(seed) = self.get(SALT_SEED_KEY).await? {
            return Ok(seed);
        }
        let seed = generate_salt_seed()?;
        self.apply(vec![Mutation::set(SALT_SEED_KEY, seed.as_str())])
            .await?;
        tracing::debug!("Generated wallet salt seed");
        Ok(seed)
    }

    /// Persists a new login attempt, replacing any previous one.
    ///
    /// Any resolved identity or code verifier from an earlier attempt is
    /// removed in the same batch: a stale keypair/nonce pairing must never be
    /// completed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backend fails, or
    /// [`Error::Config`] if the keypair cannot be serialized.
    pub async fn save_login(&self, session: &LoginSession) -> Result<(), Error> {
        let keypair = serde_json::to_string(&session.keypair.to_stored())
            .map_err(|e| Error::Config(format!("keypair serialization: {e}")))?;

        let mut batch: Vec<Mutation> = ALL_KEYS.iter().map(|k| Mutation::delete(k)).collect();
        batch.extend([
            Mutation::set(KEYPAIR_KEY, keypair),
            Mutation::set(MAX_EPOCH_KEY, session.max_epoch.to_string()),
            Mutation::set(RANDOMNESS_KEY, session.randomness.as_str()),
            Mutation::set(NONCE_KEY, session.nonce.as_str()),
            Mutation::set(OAUTH_STATE_KEY, session.state.as_str()),
        ]);
        if let Some(verifier) = &session.code_verifier {
            batch.push(Mutation::set(CODE_VERIFIER_KEY, verifier.as_str()));
        }

        self.apply(batch).await
    }

    /// Loads the in-flight login attempt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingSessionData`] naming the first absent or
    /// unusable field, or [`Error::Storage`] if the backend fails.
    pub async fn load_login(&self) -> Result<LoginSession, Error> {
        let keypair_json = self
            .get(KEYPAIR_KEY)
            .await?
            .ok_or(Error::MissingSessionData("ephemeral keypair"))?;
        let randomness = self
            .get(RANDOMNESS_KEY)
            .await?
            .ok_or(Error::MissingSessionData("randomness"))?;
        let max_epoch = self
            .get(MAX_EPOCH_KEY)
            .await?
            .ok_or(Error::MissingSessionData("max epoch"))?;
        let nonce = self
            .get(NONCE_KEY)
            .await?
            .ok_or(Error::MissingSessionData("nonce"))?;
        let state = self
            .get(OAUTH_STATE_KEY)
            .await?
            .ok_or(Error::MissingSessionData("oauth state"))?;
        let code_verifier = self.get(CODE_VERIFIER_KEY).await?;

        let max_epoch: u64 = max_epoch
            .parse()
            .map_err(|_| Error::MissingSessionData("max epoch"))?;
        let keypair = serde_json::from_str::<StoredKeyPair>(&keypair_json)
            .ok()
            .and_then(|stored| EphemeralKeyPair::from_stored(&stored).ok())
            .ok_or(Error::MissingSessionData("ephemeral keypair"))?;

        let session = LoginSession {
            max_epoch,
            randomness,
            nonce: Nonce(nonce),
            keypair,
            state,
            code_verifier,
        };
        if !session.is_consistent() {
            tracing::warn!("Stored nonce does not match stored keypair and epoch");
            return Err(Error::MissingSessionData("nonce"));
        }
        Ok(session)
    }

    /// Persists the resolved address together with the token and salt that
    /// produced it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backend fails.
    pub async fn save_resolved(
        &self,
        identity: &ResolvedIdentity,
        user_salt: &str,
    ) -> Result<(), Error> {
        self.apply(vec![
            Mutation::set(ID_TOKEN_KEY, identity.raw_token.as_str()),
            Mutation::set(ADDRESS_KEY, identity.wallet_address.as_str()),
            Mutation::set(USER_SALT_KEY, user_salt),
        ])
        .await
    }

    /// Drops an unfinished login attempt so no later callback can complete it.
    ///
    /// A resolved session is left alone: its keypair is still needed to sign.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backend fails.
    pub async fn discard_pending_login(&self) -> Result<(), Error> {
        if self.get(ADDRESS_KEY).await?.is_some() {
            return Ok(());
        }
        self.apply(LOGIN_KEYS.iter().map(|k| Mutation::delete(k)).collect())
            .await
    }

    /// Loads the resolved identity; `None` unless both halves are present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backend fails or the stored address is malformed.
    pub async fn load_resolved(&self) -> Result<Option<ResolvedIdentity>, Error> {
        let token = self.get(ID_TOKEN_KEY).await?;
        let address = self.wallet_address().await?;
        Ok(match (token, address) {
            (Some(raw_token), Some(wallet_address)) => Some(ResolvedIdentity {
                wallet_address,
                raw_token,
            }),
            _ => None,
        })
    }

    /// The resolved wallet address, if signed in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backend fails or the stored address is malformed.
    pub async fn wallet_address(&self) -> Result<Option<WalletAddress>, Error> {
        self.get(ADDRESS_KEY)
            .await?
            .map(|a| {
                a.parse()
                    .map_err(|e| Error::Storage(format!("stored address: {e}")))
            })
            .transpose()
    }

    /// Loads the keypair, address and epoch bound needed to sign.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionExpired`] if any of them is absent or unusable,
    /// or [`Error::Storage`] if the backend fails.
    pub async fn load_signing_state(&self) -> Result<SigningState, Error> {
        let missing = |what: &str| Error::SessionExpired(format!("no {what} in session; sign in again"));

        let keypair_json = self.get(KEYPAIR_KEY).await?.ok_or_else(|| missing("ephemeral keypair"))?;
        let address = self.get(ADDRESS_KEY).await?.ok_or_else(|| missing("wallet address"))?;
        let max_epoch = self.get(MAX_EPOCH_KEY).await?.ok_or_else(|| missing("max epoch"))?;
        if self.get(ID_TOKEN_KEY).await?.is_none() {
            return Err(missing("identity token"));
        }

        let stored: StoredKeyPair = serde_json::from_str(&keypair_json)
            .map_err(|e| Error::SessionExpired(format!("unreadable ephemeral keypair: {e}")))?;
        let keypair = EphemeralKeyPair::from_stored(&stored)?;
        let address = address
            .parse()
            .map_err(|e| Error::SessionExpired(format!("stored address: {e}")))?;
        let max_epoch = max_epoch
            .parse()
            .map_err(|_| Error::SessionExpired(format!("unreadable max epoch {max_epoch:?}")))?;

        Ok(SigningState {
            keypair,
            address,
            max_epoch,
        })
    }

    /// Removes every session key in one atomic batch (sign-out).
    ///
    /// The salt seed stays, so the next login of the same identity resolves
    /// to the same address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backend fails; nothing is removed then.
    pub async fn purge(&self) -> Result<(), Error> {
        self.apply(ALL_KEYS.iter().map(|k| Mutation::delete(k)).collect())
            .await
    }
}

fn storage_error(e: StorageError) -> Error {
    Error::Storage(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyManager;
    use crate::store::MemoryStore;

    fn login_session() -> LoginSession {
        KeyManager::default()
            .create_session(100, "state-1".into(), Some("verifier".into()))
            .unwrap()
    }

    fn resolved() -> ResolvedIdentity {
        ResolvedIdentity {
            wallet_address: WalletAddress::from_bytes([3; 32]),
            raw_token: "header.payload.sig".into(),
        }
    }

    #[tokio::test]
    async fn test_login_roundtrip() {
        let store = SessionStore::new(MemoryStore::new());
        let session = login_session();
        store.save_login(&session).await.unwrap();

        let loaded = store.load_login().await.unwrap();
        assert_eq!(loaded.max_epoch, 102);
        assert_eq!(loaded.nonce, session.nonce);
        assert_eq!(loaded.state, "state-1");
        assert_eq!(loaded.code_verifier.as_deref(), Some("verifier"));
        assert_eq!(loaded.keypair.public_key(), session.keypair.public_key());
    }

    #[tokio::test]
    async fn test_empty_store_reports_missing_data() {
        let store = SessionStore::new(MemoryStore::new());
        let err = store.load_login().await.unwrap_err();
        assert!(matches!(err, Error::MissingSessionData("ephemeral keypair")));
    }

    #[tokio::test]
    async fn test_partial_login_reports_first_missing_field() {
        let memory = Arc::new(MemoryStore::new());
        let store = SessionStore::from_shared(memory.clone());
        store.save_login(&login_session()).await.unwrap();
        memory.delete(RANDOMNESS_KEY).await.unwrap();

        let err = store.load_login().await.unwrap_err();
        assert!(matches!(err, Error::MissingSessionData("randomness")));
    }

    #[tokio::test]
    async fn test_tampered_nonce_is_rejected() {
        let memory = Arc::new(MemoryStore::new());
        let store = SessionStore::from_shared(memory.clone());
        store.save_login(&login_session()).await.unwrap();
        memory.set(MAX_EPOCH_KEY, "500").await.unwrap();

        let err = store.load_login().await.unwrap_err();
        assert!(matches!(err, Error::MissingSessionData("nonce")));
    }

    #[tokio::test]
    async fn test_new_login_overwrites_previous_attempt() {
        let store = SessionStore::new(MemoryStore::new());
        store.save_login(&login_session()).await.unwrap();
        store.save_resolved(&resolved(), "77").await.unwrap();

        let second = KeyManager::default()
            .create_session(200, "state-2".into(), None)
            .unwrap();
        store.save_login(&second).await.unwrap();

        let loaded = store.load_login().await.unwrap();
        assert_eq!(loaded.nonce, second.nonce);
        assert_eq!(loaded.code_verifier, None);
        assert!(store.load_resolved().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolved_roundtrip_and_signing_state() {
        let store = SessionStore::new(MemoryStore::new());
        let session = login_session();
        store.save_login(&session).await.unwrap();
        store.save_resolved(&resolved(), "77").await.unwrap();

        assert_eq!(store.load_resolved().await.unwrap(), Some(resolved()));
        assert_eq!(store.stored_salt().await.unwrap().as_deref(), Some("77"));

        let signing = store.load_signing_state().await.unwrap();
        assert_eq!(signing.max_epoch, 102);
        assert_eq!(signing.address, resolved().wallet_address);
        assert_eq!(signing.keypair.public_key(), session.keypair.public_key());
    }

    #[tokio::test]
    async fn test_signing_state_requires_address() {
        let store = SessionStore::new(MemoryStore::new());
        store.save_login(&login_session()).await.unwrap();
        let err = store.load_signing_state().await.unwrap_err();
        assert!(matches!(err, Error::SessionExpired(_)));
    }

    #[tokio::test]
    async fn test_purge_clears_every_key() {
        let memory = Arc::new(MemoryStore::new());
        let store = SessionStore::from_shared(memory.clone());
        store.save_login(&login_session()).await.unwrap();
        store.save_resolved(&resolved(), "77").await.unwrap();

        store.purge().await.unwrap();

        for key in ALL_KEYS {
            assert_eq!(memory.get(key).await.unwrap(), None, "{key} survived purge");
        }
        assert!(memory.is_empty().await);
        assert!(store.load_signing_state().await.is_err());
    }

    #[tokio::test]
    async fn test_salt_seed_is_created_once_and_survives_purge() {
        let memory = Arc::new(MemoryStore::new());
        let store = SessionStore::from_shared(memory.clone());

        let seed = store.salt_seed().await.unwrap();
        assert_eq!(store.salt_seed().await.unwrap(), seed);

        store.purge().await.unwrap();
        assert_eq!(store.salt_seed().await.unwrap(), seed);
        assert_eq!(memory.len().await, 1);
    }

    #[tokio::test]
    async fn test_discard_pending_login_removes_attempt() {
        let memory = Arc::new(MemoryStore::new());
        let store = SessionStore::from_shared(memory.clone());
        store.salt_seed().await.unwrap();
        store.save_login(&login_session()).await.unwrap();

        store.discard_pending_login().await.unwrap();

        for key in LOGIN_KEYS {
            assert_eq!(memory.get(key).await.unwrap(), None, "{key} survived discard");
        }
        assert!(memory.get(SALT_SEED_KEY).await.unwrap().is_some());
        assert!(matches!(
            store.load_login().await,
            Err(Error::MissingSessionData(_))
        ));
    }

    #[tokio::test]
    async fn test_discard_pending_login_keeps_resolved_session() {
        let store = SessionStore::new(MemoryStore::new());
        store.save_login(&login_session()).await.unwrap();
        store.save_resolved(&resolved(), "77").await.unwrap();

        store.discard_pending_login().await.unwrap();

        assert!(store.load_signing_state().await.is_ok());
    }
}

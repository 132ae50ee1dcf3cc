//! Ephemeral key management.
//!
//! A fresh Ed25519 keypair is generated for every login attempt and bound to an
//! epoch window. The keypair is the only signing material the wallet ever
//! holds; it is persisted between the redirect and the callback and rebuilt on
//! demand for signing.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use blake2::Blake2b;
use blake2::digest::consts::U32;
use ed25519_dalek::{Signer, SigningKey};
use rand::TryRngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Digest;

use crate::binding::derive_nonce;
use crate::error::Error;
use crate::types::Nonce;

/// Default number of epochs the ephemeral key stays valid after the current one.
pub const DEFAULT_EPOCH_WINDOW: u64 = 2;

/// Signature scheme flag for plain Ed25519 signatures.
const ED25519_FLAG: u8 = 0x00;

/// Intent prefix for transaction data: (scope, version, app id).
const TRANSACTION_INTENT: [u8; 3] = [0, 0, 0];

/// Ed25519 keypair generated per login attempt.
#[derive(Clone)]
pub struct EphemeralKeyPair {
    signing_key: SigningKey,
}

impl EphemeralKeyPair {
    /// Generates a keypair from the OS entropy source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyGeneration`] if the entropy source is unavailable.
    pub fn generate() -> Result<Self, Error> {
        let seed: [u8; 32] = random_bytes()?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    /// Rebuilds a keypair from its raw parts, checking they belong together.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionExpired`] if the public key does not match the secret key.
    pub fn from_bytes(public_key: &[u8; 32], secret_key: &[u8; 32]) -> Result<Self, Error> {
        let signing_key = SigningKey::from_bytes(secret_key);
        if signing_key.verifying_key().as_bytes() != public_key {
            return Err(Error::SessionExpired(
                "stored ephemeral public key does not match secret key".into(),
            ));
        }
        Ok(Self { signing_key })
    }

    #[must_use]
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    #[must_use]
    pub fn secret_key(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Signs transaction bytes and returns the serialized signature
    /// `base64(flag || signature || public key)` the ledger expects.
    #[must_use]
    pub fn sign_transaction(&self, tx_bytes: &[u8]) -> String {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(TRANSACTION_INTENT);
        hasher.update(tx_bytes);
        let digest = hasher.finalize();

        let signature = self.signing_key.sign(&digest);

        let mut serialized = Vec::with_capacity(1 + 64 + 32);
        serialized.push(ED25519_FLAG);
        serialized.extend_from_slice(&signature.to_bytes());
        serialized.extend_from_slice(&self.public_key());
        STANDARD.encode(serialized)
    }

    pub(crate) fn to_stored(&self) -> StoredKeyPair {
        StoredKeyPair {
            public_key: STANDARD.encode(self.public_key()),
            secret_key: STANDARD.encode(self.secret_key()),
        }
    }

    pub(crate) fn from_stored(stored: &StoredKeyPair) -> Result<Self, Error> {
        let public_key = decode_key(&stored.public_key, "public")?;
        let secret_key = decode_key(&stored.secret_key, "secret")?;
        Self::from_bytes(&public_key, &secret_key)
    }
}

impl std::fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public_key", &hex::encode(self.public_key()))
            .finish_non_exhaustive()
    }
}

/// Persisted form of [`EphemeralKeyPair`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredKeyPair {
    pub(crate) public_key: String,
    pub(crate) secret_key: String,
}

fn decode_key(encoded: &str, which: &str) -> Result<[u8; 32], Error> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| Error::SessionExpired(format!("invalid stored {which} key: {e}")))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        Error::SessionExpired(format!(
            "invalid stored {which} key length: expected 32, got {}",
            b.len()
        ))
    })
}

/// State generated at login start that must survive the OAuth redirect.
///
/// The user salt is not part of it: it depends on the identity, which is only
/// known once the provider's token arrives.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct LoginSession {
    pub max_epoch: u64,
    pub randomness: String,
    pub nonce: Nonce,
    pub keypair: EphemeralKeyPair,
    /// OAuth `state` echoed back by the provider.
    pub state: String,
    /// PKCE verifier, present only for the authorization code flow.
    pub code_verifier: Option<String>,
}

impl LoginSession {
    /// Whether the nonce still matches the keypair, epoch and randomness.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        derive_nonce(&self.keypair.public_key(), self.max_epoch, &self.randomness) == self.nonce
    }
}

/// Creates login sessions bound to an epoch window and picks user salts.
#[derive(Debug, Clone)]
pub struct KeyManager {
    epoch_window: u64,
    pinned_salt: Option<String>,
    salt_seed: Option<String>,
}

impl Default for KeyManager {
    fn default() -> Self {
        Self::new(DEFAULT_EPOCH_WINDOW)
    }
}

impl KeyManager {
    #[must_use]
    pub fn new(epoch_window: u64) -> Self {
        Self {
            epoch_window,
            pinned_salt: None,
            salt_seed: None,
        }
    }

    /// Use this salt for every identity instead of deriving one.
    #[must_use]
    pub fn with_pinned_salt(mut self, salt: impl Into<String>) -> Self {
        self.pinned_salt = Some(salt.into());
        self
    }

    /// Derive user salts from this seed instead of the one kept in storage.
    #[must_use]
    pub fn with_salt_seed(mut self, seed: impl Into<String>) -> Self {
        self.salt_seed = Some(seed.into());
        self
    }

    #[must_use]
    pub fn epoch_window(&self) -> u64 {
        self.epoch_window
    }

    #[must_use]
    pub fn pinned_salt(&self) -> Option<&str> {
        self.pinned_salt.as_deref()
    }

    #[must_use]
    pub fn salt_seed(&self) -> Option<&str> {
        self.salt_seed.as_deref()
    }

    /// Creates a new login session valid until `current_epoch + window`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyGeneration`] if the entropy source fails or the epoch overflows.
    pub fn create_session(
        &self,
        current_epoch: u64,
        state: String,
        code_verifier: Option<String>,
    ) -> Result<LoginSession, Error> {
        let max_epoch = current_epoch
            .checked_add(self.epoch_window)
            .ok_or_else(|| Error::KeyGeneration(format!("epoch overflow at {current_epoch}")))?;
        let keypair = EphemeralKeyPair::generate()?;
        let randomness = generate_randomness()?;
        let nonce = derive_nonce(&keypair.public_key(), max_epoch, &randomness);

        Ok(LoginSession {
            max_epoch,
            randomness,
            nonce,
            keypair,
            state,
            code_verifier,
        })
    }
}

/// Generates 128 bits of randomness as a decimal string.
///
/// # Errors
///
/// Returns [`Error::KeyGeneration`] if the entropy source is unavailable.
pub fn generate_randomness() -> Result<String, Error> {
    let bytes: [u8; 16] = random_bytes()?;
    Ok(u128::from_be_bytes(bytes).to_string())
}

/// Generates a 256-bit salt seed as lowercase hex.
///
/// # Errors
///
/// Returns [`Error::KeyGeneration`] if the entropy source is unavailable.
pub fn generate_salt_seed() -> Result<String, Error> {
    let bytes: [u8; 32] = random_bytes()?;
    Ok(hex::encode(bytes))
}

fn random_bytes<const N: usize>() -> Result<[u8; N], Error> {
    let mut bytes = [0u8; N];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| Error::KeyGeneration(e.to_string()))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    use super::*;

    fn session(manager: &KeyManager, epoch: u64) -> LoginSession {
        manager
            .create_session(epoch, "state".into(), None)
            .unwrap()
    }

    #[test]
    fn test_max_epoch_is_current_plus_window() {
        let s = session(&KeyManager::default(), 100);
        assert_eq!(s.max_epoch, 102);

        let s = session(&KeyManager::new(5), 100);
        assert_eq!(s.max_epoch, 105);
    }

    #[test]
    fn test_epoch_overflow_is_rejected() {
        let err = KeyManager::default()
            .create_session(u64::MAX, "s".into(), None)
            .unwrap_err();
        assert!(matches!(err, Error::KeyGeneration(_)));
    }

    #[test]
    fn test_session_is_consistent() {
        let s = session(&KeyManager::default(), 7);
        assert!(s.is_consistent());
        assert_eq!(
            s.nonce,
            derive_nonce(&s.keypair.public_key(), s.max_epoch, &s.randomness)
        );
    }

    #[test]
    fn test_fresh_key_and_randomness_per_session() {
        let manager = KeyManager::default();
        let a = session(&manager, 1);
        let b = session(&manager, 1);
        assert_ne!(a.keypair.public_key(), b.keypair.public_key());
        assert_ne!(a.randomness, b.randomness);
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_randomness_is_decimal() {
        let r = generate_randomness().unwrap();
        assert!(r.parse::<u128>().is_ok());
    }

    #[test]
    fn test_salt_settings() {
        let keys = KeyManager::new(3)
            .with_pinned_salt("111")
            .with_salt_seed("seed");
        assert_eq!(keys.epoch_window(), 3);
        assert_eq!(keys.pinned_salt(), Some("111"));
        assert_eq!(keys.salt_seed(), Some("seed"));

        let keys = KeyManager::default();
        assert_eq!(keys.pinned_salt(), None);
        assert_eq!(keys.salt_seed(), None);
    }

    #[test]
    fn test_salt_seed_is_fresh_hex() {
        let a = generate_salt_seed().unwrap();
        let b = generate_salt_seed().unwrap();
        assert_eq!(a.len(), 64);
        assert!(hex::decode(&a).is_ok());
        assert_ne!(a, b);
    }

    #[test]
    fn test_stored_roundtrip_keeps_signer() {
        let kp = EphemeralKeyPair::generate().unwrap();
        let rebuilt = EphemeralKeyPair::from_stored(&kp.to_stored()).unwrap();
        assert_eq!(kp.public_key(), rebuilt.public_key());
        assert_eq!(kp.sign_transaction(b"tx"), rebuilt.sign_transaction(b"tx"));
    }

    #[test]
    fn test_mismatched_public_key_is_rejected() {
        let a = EphemeralKeyPair::generate().unwrap();
        let b = EphemeralKeyPair::generate().unwrap();
        let err = EphemeralKeyPair::from_bytes(&b.public_key(), &a.secret_key()).unwrap_err();
        assert!(matches!(err, Error::SessionExpired(_)));
    }

    #[test]
    fn test_truncated_stored_key_is_rejected() {
        let stored = StoredKeyPair {
            public_key: STANDARD.encode([1u8; 16]),
            secret_key: STANDARD.encode([1u8; 32]),
        };
        assert!(EphemeralKeyPair::from_stored(&stored).is_err());
    }

    #[test]
    fn test_transaction_signature_layout_verifies() {
        let kp = EphemeralKeyPair::generate().unwrap();
        let tx = b"transaction bytes";
        let serialized = STANDARD.decode(kp.sign_transaction(tx)).unwrap();

        assert_eq!(serialized.len(), 97);
        assert_eq!(serialized[0], ED25519_FLAG);
        assert_eq!(&serialized[65..], &kp.public_key());

        let mut hasher = Blake2b::<U32>::new();
        hasher.update(TRANSACTION_INTENT);
        hasher.update(tx);
        let digest = hasher.finalize();

        let sig = Signature::from_slice(&serialized[1..65]).unwrap();
        let vk = VerifyingKey::from_bytes(&kp.public_key()).unwrap();
        assert!(vk.verify(&digest, &sig).is_ok());
    }

    #[test]
    fn test_debug_hides_secret() {
        let kp = EphemeralKeyPair::generate().unwrap();
        let debug = format!("{kp:?}");
        assert!(!debug.contains(&hex::encode(kp.secret_key())));
    }
}

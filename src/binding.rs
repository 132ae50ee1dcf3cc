//! Nonce and address binding.
//!
//! All derivations are pure functions. The nonce ties an authorization request
//! to one ephemeral key and epoch window. The address ties an OAuth identity
//! plus salt to a stable on-chain account without any registration step, and
//! the user salt for an identity is itself derived from a wallet-wide seed.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use blake2::Blake2b;
use blake2::digest::consts::U32;
use sha2::{Digest, Sha256};

use crate::types::{Nonce, WalletAddress};

type Blake2b256 = Blake2b<U32>;

const NONCE_DOMAIN: &[u8] = b"zklogin-nonce-v1";
const ADDRESS_SEED_DOMAIN: &[u8] = b"zklogin-address-seed-v1";
const USER_SALT_DOMAIN: &[u8] = b"zklogin-user-salt-v1";

/// Signature scheme flag for zkLogin authenticators.
pub const ZKLOGIN_SCHEME_FLAG: u8 = 0x05;

/// Number of digest bytes kept in the nonce (27 base64url characters).
const NONCE_LEN: usize = 20;

/// Derives the authorization nonce from the ephemeral public key, the last
/// valid epoch and the per-attempt randomness.
#[must_use]
pub fn derive_nonce(public_key: &[u8; 32], max_epoch: u64, randomness: &str) -> Nonce {
    let mut hasher = Sha256::new();
    hasher.update(NONCE_DOMAIN);
    hasher.update(public_key);
    hasher.update(max_epoch.to_be_bytes());
    hasher.update(randomness.as_bytes());
    let digest = hasher.finalize();
    Nonce(URL_SAFE_NO_PAD.encode(&digest[..NONCE_LEN]))
}

/// Derives the wallet address for an identity (`sub`, `aud`) and user salt.
#[must_use]
pub fn derive_address(subject: &str, audience: &str, salt: &str) -> WalletAddress {
    let seed = address_seed(subject, audience, salt);

    let mut hasher = Blake2b256::new();
    hasher.update([ZKLOGIN_SCHEME_FLAG]);
    hasher.update(seed);
    WalletAddress::from_bytes(hasher.finalize().into())
}

/// Derives the user salt for an identity from the wallet's salt seed.
///
/// The result is a 128-bit decimal string, the same shape as a generated
/// salt. The same seed and identity always give the same salt, so the address
/// survives sign-out; different identities never share one.
#[must_use]
pub fn derive_user_salt(seed: &str, subject: &str, audience: &str) -> String {
    let digest = tagged_hash(USER_SALT_DOMAIN, [seed, subject, audience]);
    let mut salt = [0u8; 16];
    salt.copy_from_slice(&digest[..16]);
    u128::from_be_bytes(salt).to_string()
}

fn address_seed(subject: &str, audience: &str, salt: &str) -> [u8; 32] {
    tagged_hash(ADDRESS_SEED_DOMAIN, [subject, audience, salt])
}

fn tagged_hash(domain: &[u8], parts: [&str; 3]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    // Length prefixes keep ("ab", "c") and ("a", "bc") apart.
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    hasher.finalize().into()
}

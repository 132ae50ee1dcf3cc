#![doc = include_str!("../README.md")]

pub mod binding;
pub mod callback;
pub mod config;
pub mod error;
pub mod flow;
pub mod keys;
pub mod ledger;
pub mod oauth;
pub mod pkce;
pub mod resolver;
#[cfg(feature = "server")]
pub mod server;
pub mod signer;
pub mod store;
pub mod token;
pub mod types;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use binding::{derive_address, derive_nonce, derive_user_salt};
pub use callback::CallbackPayload;
pub use config::{ConfiguredFlow, ZkLoginConfig};
pub use error::Error;
pub use flow::{FlowState, LoginFlow};
pub use keys::{EphemeralKeyPair, KeyManager, LoginSession};
pub use ledger::{CoinBalance, IncomingTransfer, LedgerClient, SuiRpcClient, UnsignedTransaction};
pub use oauth::{AuthorizationRequest, OAuthConfig, ProviderClient, RedirectTarget, ResponseType};
pub use resolver::{
    AddressResolver, ConfiguredResolver, LocalResolver, RelayResolver, ResolvedIdentity,
};
#[cfg(feature = "server")]
pub use server::{ServerSettings, auth_routes};
pub use signer::TransferSigner;
pub use store::{FileStore, MemoryStore, SessionStore, Storage, StorageBackend};
pub use token::{IdTokenClaims, decode_unverified_claims};
pub use types::{
    Nonce, TransactionDigest, TransactionReceipt, TransferIntent, WalletAddress, format_amount,
    parse_amount,
};

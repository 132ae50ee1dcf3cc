use std::sync::Arc;

use crate::error::Error;
use crate::ledger::LedgerClient;
use crate::store::SessionStore;
use crate::types::{TransactionReceipt, TransferIntent};

/// Signs transfers with the persisted ephemeral key.
///
/// Never mutates the session: the same key signs any number of transfers
/// until its epoch window closes.
pub struct TransferSigner<L> {
    store: SessionStore,
    ledger: Arc<L>,
}

// Manual Clone: avoid derive adding an `L: Clone` bound.
impl<L> Clone for TransferSigner<L> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            ledger: self.ledger.clone(),
        }
    }
}

impl<L: LedgerClient> TransferSigner<L> {
    #[must_use]
    pub fn new(store: SessionStore, ledger: Arc<L>) -> Self {
        Self { store, ledger }
    }

    /// Builds, signs and submits a transfer from the resolved wallet address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionExpired`] if the keypair, address or epoch bound
    /// is missing or the network epoch is past the key's window, and
    /// [`Error::Transfer`] if the ledger fails to build or accept the transaction.
    pub async fn sign_and_submit_transfer(
        &self,
        intent: &TransferIntent,
    ) -> Result<TransactionReceipt, Error> {
        let signing = self.store.load_signing_state().await?;

        let epoch = self.ledger.current_epoch().await?;
        if epoch > signing.max_epoch {
            tracing::info!(epoch, max_epoch = signing.max_epoch, "Ephemeral key expired");
            return Err(Error::SessionExpired(format!(
                "network epoch {epoch} is past the key's last valid epoch {}",
                signing.max_epoch
            )));
        }

        let tx = self
            .ledger
            .build_transfer(&signing.address, intent)
            .await?;
        let signature = signing.keypair.sign_transaction(&tx.bytes);

        let receipt = self.ledger.submit(&tx, &signature).await.map_err(|e| {
            tracing::error!(error = %e, "Transfer submission failed");
            e
        })?;

        tracing::info!(
            digest = %receipt.digest,
            amount = intent.amount_minor_units,
            recipient = %intent.recipient,
            "Transfer submitted"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyManager;
    use crate::resolver::ResolvedIdentity;
    use crate::store::{ALL_KEYS, MemoryStore, Storage};
    use crate::testing::FakeLedger;
    use crate::types::WalletAddress;

    async fn signed_in_store(epoch: u64) -> (SessionStore, WalletAddress) {
        let store = SessionStore::new(MemoryStore::new());
        let session = KeyManager::default()
            .create_session(epoch, "s".into(), None)
            .unwrap();
        store.save_login(&session).await.unwrap();
        let address = WalletAddress::from_bytes([9; 32]);
        store
            .save_resolved(&ResolvedIdentity::new(address.clone(), "h.p.s"), "1")
            .await
            .unwrap();
        (store, address)
    }

    fn intent() -> TransferIntent {
        TransferIntent::from_decimal("10.00", 9, WalletAddress::from_bytes([4; 32])).unwrap()
    }

    #[tokio::test]
    async fn test_transfer_returns_receipt_with_digest() {
        let (store, address) = signed_in_store(100).await;
        let ledger = Arc::new(FakeLedger::at_epoch(100));
        let signer = TransferSigner::new(store, ledger.clone());

        let receipt = signer.sign_and_submit_transfer(&intent()).await.unwrap();
        assert!(!receipt.digest.to_string().is_empty());

        let submitted = ledger.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].sender, address);
        assert_eq!(submitted[0].amount, 10_000_000_000);
    }

    #[tokio::test]
    async fn test_epoch_window_boundary() {
        let (store, _) = signed_in_store(100).await;
        let ledger = Arc::new(FakeLedger::at_epoch(102));
        let signer = TransferSigner::new(store, ledger.clone());
        assert!(signer.sign_and_submit_transfer(&intent()).await.is_ok());

        ledger.set_epoch(103);
        let err = signer.sign_and_submit_transfer(&intent()).await.unwrap_err();
        assert!(matches!(err, Error::SessionExpired(_)));
        assert_eq!(ledger.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_key_is_reused_across_transfers() {
        let (store, _) = signed_in_store(5).await;
        let ledger = Arc::new(FakeLedger::at_epoch(5));
        let signer = TransferSigner::new(store.clone(), ledger.clone());

        let before = store.load_signing_state().await.unwrap();
        signer.sign_and_submit_transfer(&intent()).await.unwrap();
        signer.sign_and_submit_transfer(&intent()).await.unwrap();
        let after = store.load_signing_state().await.unwrap();

        assert_eq!(before.keypair.public_key(), after.keypair.public_key());
        let submitted = ledger.submitted();
        assert_eq!(submitted[0].public_key, submitted[1].public_key);
    }

    #[tokio::test]
    async fn test_signed_out_session_cannot_sign() {
        let (store, _) = signed_in_store(5).await;
        store.purge().await.unwrap();
        let signer = TransferSigner::new(store, Arc::new(FakeLedger::at_epoch(5)));

        let err = signer.sign_and_submit_transfer(&intent()).await.unwrap_err();
        assert!(matches!(err, Error::SessionExpired(_)));
    }

    #[tokio::test]
    async fn test_any_missing_field_blocks_signing() {
        for key in ALL_KEYS {
            let memory = Arc::new(MemoryStore::new());
            let store = SessionStore::from_shared(memory.clone());
            let session = KeyManager::default()
                .create_session(5, "s".into(), None)
                .unwrap();
            store.save_login(&session).await.unwrap();
            store
                .save_resolved(
                    &ResolvedIdentity::new(WalletAddress::from_bytes([9; 32]), "t"),
                    "1",
                )
                .await
                .unwrap();
            memory.delete(key).await.unwrap();

            let signer = TransferSigner::new(store, Arc::new(FakeLedger::at_epoch(5)));
            let result = signer.sign_and_submit_transfer(&intent()).await;
            let required = matches!(
                key,
                "zklogin_ephemeral_keypair" | "zklogin_max_epoch" | "zklogin_address" | "zklogin_id_token"
            );
            assert_eq!(result.is_err(), required, "removing {key}");
        }
    }

    #[tokio::test]
    async fn test_ledger_rejection_is_transfer_error() {
        let (store, _) = signed_in_store(5).await;
        let ledger = Arc::new(FakeLedger::at_epoch(5).rejecting("InsufficientCoinBalance"));
        let signer = TransferSigner::new(store.clone(), ledger);

        let err = signer.sign_and_submit_transfer(&intent()).await.unwrap_err();
        assert!(matches!(err, Error::Transfer(_)));
        assert!(store.load_signing_state().await.is_ok());
    }
}

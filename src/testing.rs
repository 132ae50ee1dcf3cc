//! In-memory ledger for tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use blake2::Blake2b;
use blake2::digest::consts::U32;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::Digest;

use crate::error::Error;
use crate::ledger::{LedgerClient, UnsignedTransaction};
use crate::types::{TransactionDigest, TransactionReceipt, TransferIntent, WalletAddress};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Submitted {
    pub(crate) sender: WalletAddress,
    pub(crate) recipient: WalletAddress,
    pub(crate) amount: u64,
    #[serde(default)]
    pub(crate) public_key: Vec<u8>,
}

/// Ledger that builds JSON "transactions", verifies signatures on submit and
/// records what it accepted.
#[derive(Debug, Default)]
pub(crate) struct FakeLedger {
    epoch: AtomicU64,
    reject_with: Option<String>,
    submitted: Mutex<Vec<Submitted>>,
}

impl FakeLedger {
    pub(crate) fn at_epoch(epoch: u64) -> Self {
        Self {
            epoch: AtomicU64::new(epoch),
            ..Self::default()
        }
    }

    pub(crate) fn rejecting(mut self, reason: &str) -> Self {
        self.reject_with = Some(reason.to_owned());
        self
    }

    pub(crate) fn set_epoch(&self, epoch: u64) {
        self.epoch.store(epoch, Ordering::SeqCst);
    }

    pub(crate) fn submitted(&self) -> Vec<Submitted> {
        self.submitted.lock().unwrap().clone()
    }
}

impl LedgerClient for FakeLedger {
    async fn current_epoch(&self) -> Result<u64, Error> {
        Ok(self.epoch.load(Ordering::SeqCst))
    }

    async fn build_transfer(
        &self,
        sender: &WalletAddress,
        intent: &TransferIntent,
    ) -> Result<UnsignedTransaction, Error> {
        let tx = Submitted {
            sender: sender.clone(),
            recipient: intent.recipient.clone(),
            amount: intent.amount_minor_units,
            public_key: Vec::new(),
        };
        Ok(UnsignedTransaction {
            bytes: serde_json::to_vec(&tx).unwrap(),
        })
    }

    async fn submit(
        &self,
        tx: &UnsignedTransaction,
        signature: &str,
    ) -> Result<TransactionReceipt, Error> {
        if let Some(reason) = &self.reject_with {
            return Err(Error::Transfer(reason.clone()));
        }

        let raw = STANDARD
            .decode(signature)
            .map_err(|e| Error::Transfer(e.to_string()))?;
        if raw.len() != 97 || raw[0] != 0 {
            return Err(Error::Transfer("bad signature layout".into()));
        }
        let sig = Signature::from_slice(&raw[1..65]).map_err(|e| Error::Transfer(e.to_string()))?;
        let public_key: [u8; 32] = raw[65..].try_into().unwrap();
        let vk = VerifyingKey::from_bytes(&public_key).map_err(|e| Error::Transfer(e.to_string()))?;

        let mut hasher = Blake2b::<U32>::new();
        hasher.update([0u8, 0, 0]);
        hasher.update(&tx.bytes);
        let digest = hasher.finalize();
        vk.verify(&digest, &sig)
            .map_err(|_| Error::Transfer("signature does not verify".into()))?;

        let mut record: Submitted =
            serde_json::from_slice(&tx.bytes).map_err(|e| Error::Transfer(e.to_string()))?;
        record.public_key = public_key.to_vec();

        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(record);
        let digest = hex::encode(&digest[..16]);
        Ok(TransactionReceipt::new(
            TransactionDigest(format!("{digest}{}", submitted.len())),
            "success",
        ))
    }
}

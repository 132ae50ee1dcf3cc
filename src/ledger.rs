//! Ledger capability and a Sui JSON-RPC implementation of it.
//!
//! [`LedgerClient`] is what signing needs. [`SuiRpcClient`] also answers the
//! wallet's read queries: coin balances and recently received transfers.

use std::future::Future;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::{Value, json};
use time::OffsetDateTime;
use url::Url;

use crate::error::Error;
use crate::types::{
    TransactionDigest, TransactionReceipt, TransferIntent, WalletAddress, format_amount,
};

pub const GET_SYSTEM_STATE_METHOD: &str = "suix_getLatestSuiSystemState";
pub const GET_COINS_METHOD: &str = "suix_getCoins";
pub const PAY_SUI_METHOD: &str = "unsafe_paySui";
pub const EXECUTE_TRANSACTION_METHOD: &str = "sui_executeTransactionBlock";
pub const GET_BALANCE_METHOD: &str = "suix_getBalance";
pub const GET_COIN_METADATA_METHOD: &str = "suix_getCoinMetadata";
pub const QUERY_TRANSACTIONS_METHOD: &str = "suix_queryTransactionBlocks";

/// Page size for [`SuiRpcClient::recent_incoming`].
pub const RECENT_TRANSACTIONS_LIMIT: u32 = 100;

/// Native coin type; amounts are in MIST (10^-9 SUI).
pub const SUI_COIN_TYPE: &str = "0x2::sui::SUI";
pub const SUI_DECIMALS: u32 = 9;

/// Circle USDC on Sui testnet.
pub const TESTNET_USDC_COIN_TYPE: &str =
    "0xa1ec7fc00a6f40db9693ad1415d0c193ad3906494428cf252621037bd7117e29::usdc::USDC";

/// Built but unsigned transaction bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub bytes: Vec<u8>,
}

/// Total balance of one coin type held by an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinBalance {
    pub coin_type: String,
    pub total_minor_units: u128,
    pub decimals: u8,
}

impl CoinBalance {
    /// The balance in whole coins, e.g. `"12.5"`.
    #[must_use]
    pub fn to_decimal(&self) -> String {
        format_amount(self.total_minor_units, self.decimals.into())
    }
}

/// A transaction that credited an address with some amount of a coin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingTransfer {
    pub digest: TransactionDigest,
    pub timestamp: Option<OffsetDateTime>,
    /// `None` when the node did not report a parseable sender.
    pub sender: Option<WalletAddress>,
    pub recipient: WalletAddress,
    pub amount_minor_units: u128,
}

/// The external ledger, treated as opaque.
pub trait LedgerClient: Send + Sync + 'static {
    /// Current network epoch.
    fn current_epoch(&self) -> impl Future<Output = Result<u64, Error>> + Send;

    /// Builds a transfer of `intent` from `sender`.
    fn build_transfer(
        &self,
        sender: &WalletAddress,
        intent: &TransferIntent,
    ) -> impl Future<Output = Result<UnsignedTransaction, Error>> + Send;

    /// Submits a signed transaction and waits for its effects.
    fn submit(
        &self,
        tx: &UnsignedTransaction,
        signature: &str,
    ) -> impl Future<Output = Result<TransactionReceipt, Error>> + Send;
}

/// Sui full node JSON-RPC client.
#[derive(Debug, Clone)]
pub struct SuiRpcClient {
    rpc_url: Url,
    gas_budget: u64,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SystemState {
    epoch: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoinPage {
    data: Vec<Coin>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Coin {
    coin_object_id: String,
    balance: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionBytes {
    tx_bytes: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Balance {
    total_balance: String,
}

#[derive(Debug, Deserialize)]
struct CoinMetadata {
    decimals: u8,
}

#[derive(Debug, Deserialize)]
struct TransactionPage {
    data: Vec<TransactionBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionBlock {
    digest: String,
    #[serde(default)]
    timestamp_ms: Option<String>,
    #[serde(default)]
    transaction: Option<Value>,
    #[serde(default)]
    balance_changes: Option<Vec<BalanceChange>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceChange {
    owner: Value,
    coin_type: String,
    amount: String,
}

#[derive(Debug, Deserialize)]
struct ExecutionResponse {
    digest: String,
    #[serde(default)]
    effects: Option<Value>,
}

impl SuiRpcClient {
    /// Sui testnet full node.
    pub const DEFAULT_URL: &'static str = "https://fullnode.testnet.sui.io:443";
    pub const DEFAULT_GAS_BUDGET: u64 = 10_000_000;

    #[must_use]
    pub fn new(rpc_url: Url) -> Self {
        Self {
            rpc_url,
            gas_budget: Self::DEFAULT_GAS_BUDGET,
            http: reqwest::Client::new(),
        }
    }

    #[must_use]
    pub fn with_gas_budget(mut self, gas_budget: u64) -> Self {
        self.gas_budget = gas_budget;
        self
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Executes one JSON-RPC call and returns its `result`.
    ///
    /// Transport, status and JSON-RPC errors are all reported as plain strings
    /// so each caller can map them into its own error variant.
    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &'static str,
        params: Value,
    ) -> Result<T, String> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        tracing::debug!(method, url = %self.rpc_url, "Sui RPC call");
        let response = self
            .http
            .post(self.rpc_url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("{method}: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(format!("{method}: HTTP {}: {text}", status.as_u16()));
        }

        let mut envelope: Value = response
            .json()
            .await
            .map_err(|e| format!("{method}: malformed response: {e}"))?;

        if let Some(error) = envelope.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| error.to_string(), str::to_owned);
            return Err(format!("{method}: {message}"));
        }

        let result = envelope
            .get_mut("result")
            .map(Value::take)
            .ok_or_else(|| format!("{method}: response has no result"))?;
        serde_json::from_value(result).map_err(|e| format!("{method}: unexpected result: {e}"))
    }

    /// Total balance of `coin_type` owned by `owner`, with the coin's decimals.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Ledger`] if the node fails, the coin type has no
    /// metadata, or the balance is not a number.
    pub async fn balance(
        &self,
        owner: &WalletAddress,
        coin_type: &str,
    ) -> Result<CoinBalance, Error> {
        let metadata: Option<CoinMetadata> = self
            .call(GET_COIN_METADATA_METHOD, json!([coin_type]))
            .await
            .map_err(Error::Ledger)?;
        let decimals = metadata
            .map(|m| m.decimals)
            .ok_or_else(|| Error::Ledger(format!("no metadata for coin type {coin_type}")))?;

        let balance: Balance = self
            .call(GET_BALANCE_METHOD, json!([owner.as_str(), coin_type]))
            .await
            .map_err(Error::Ledger)?;
        let total_minor_units = balance.total_balance.parse().map_err(|_| {
            Error::Ledger(format!("unparseable balance {:?}", balance.total_balance))
        })?;

        Ok(CoinBalance {
            coin_type: coin_type.to_owned(),
            total_minor_units,
            decimals,
        })
    }

    /// Recent transactions that credited `owner` with `coin_type`, newest first.
    ///
    /// Looks at the last [`RECENT_TRANSACTIONS_LIMIT`] transactions sent to
    /// `owner` and keeps those with a positive balance change of `coin_type`
    /// for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Ledger`] if the node fails or the page is malformed.
    pub async fn recent_incoming(
        &self,
        owner: &WalletAddress,
        coin_type: &str,
    ) -> Result<Vec<IncomingTransfer>, Error> {
        let page: TransactionPage = self
            .call(
                QUERY_TRANSACTIONS_METHOD,
                json!([
                    {
                        "filter": {"ToAddress": owner.as_str()},
                        "options": {"showBalanceChanges": true, "showInput": true},
                    },
                    null,
                    RECENT_TRANSACTIONS_LIMIT,
                    true,
                ]),
            )
            .await
            .map_err(Error::Ledger)?;

        let scanned = page.data.len();
        let transfers: Vec<IncomingTransfer> = page
            .data
            .into_iter()
            .filter_map(|tx| incoming_transfer(tx, owner, coin_type))
            .collect();
        tracing::debug!(
            scanned,
            matched = transfers.len(),
            coin_type,
            "Incoming transfers loaded"
        );
        Ok(transfers)
    }

    /// Picks coins, largest first, until they cover `amount` plus gas.
    async fn select_coins(&self, owner: &WalletAddress, amount: u64) -> Result<Vec<String>, Error> {
        let page: CoinPage = self
            .call(GET_COINS_METHOD, json!([owner.as_str(), SUI_COIN_TYPE, null, 50]))
            .await
            .map_err(Error::Transfer)?;

        let mut coins: Vec<(u64, String)> = page
            .data
            .into_iter()
            .filter_map(|c| c.balance.parse::<u64>().ok().map(|b| (b, c.coin_object_id)))
            .collect();
        coins.sort_by(|a, b| b.0.cmp(&a.0));

        let needed = amount.saturating_add(self.gas_budget);
        let mut total: u64 = 0;
        let mut selected = Vec::new();
        for (balance, id) in coins {
            if total >= needed {
                break;
            }
            total = total.saturating_add(balance);
            selected.push(id);
        }

        if total < needed {
            return Err(Error::Transfer(format!(
                "insufficient balance: have {total}, need {needed} (amount + gas budget)"
            )));
        }
        Ok(selected)
    }
}

fn incoming_transfer(
    tx: TransactionBlock,
    owner: &WalletAddress,
    coin_type: &str,
) -> Option<IncomingTransfer> {
    let amount_minor_units = tx
        .balance_changes
        .unwrap_or_default()
        .into_iter()
        .filter(|change| change.coin_type == coin_type)
        .filter(|change| {
            change
                .owner
                .get("AddressOwner")
                .and_then(Value::as_str)
                .and_then(|a| a.parse::<WalletAddress>().ok())
                .is_some_and(|a| &a == owner)
        })
        .find_map(|change| {
            change
                .amount
                .parse::<i128>()
                .ok()
                .filter(|amount| *amount > 0)
                .and_then(|amount| u128::try_from(amount).ok())
        })?;

    let sender = tx
        .transaction
        .as_ref()
        .and_then(|t| t.pointer("/data/sender"))
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok());
    let timestamp = tx
        .timestamp_ms
        .and_then(|ms| ms.parse::<i128>().ok())
        .and_then(|ms| ms.checked_mul(1_000_000))
        .and_then(|nanos| OffsetDateTime::from_unix_timestamp_nanos(nanos).ok());

    Some(IncomingTransfer {
        digest: TransactionDigest(tx.digest),
        timestamp,
        sender,
        recipient: owner.clone(),
        amount_minor_units,
    })
}

impl LedgerClient for SuiRpcClient {
    async fn current_epoch(&self) -> Result<u64, Error> {
        let state: SystemState = self
            .call(GET_SYSTEM_STATE_METHOD, json!([]))
            .await
            .map_err(Error::Transfer)?;
        state
            .epoch
            .parse()
            .map_err(|_| Error::Transfer(format!("unparseable epoch {:?}", state.epoch)))
    }

    async fn build_transfer(
        &self,
        sender: &WalletAddress,
        intent: &TransferIntent,
    ) -> Result<UnsignedTransaction, Error> {
        let coins = self.select_coins(sender, intent.amount_minor_units).await?;
        let built: TransactionBytes = self
            .call(
                PAY_SUI_METHOD,
                json!([
                    sender.as_str(),
                    coins,
                    [intent.recipient.as_str()],
                    [intent.amount_minor_units.to_string()],
                    self.gas_budget.to_string(),
                ]),
            )
            .await
            .map_err(Error::Transfer)?;

        let bytes = STANDARD
            .decode(&built.tx_bytes)
            .map_err(|e| Error::Transfer(format!("txBytes is not base64: {e}")))?;
        Ok(UnsignedTransaction { bytes })
    }

    async fn submit(
        &self,
        tx: &UnsignedTransaction,
        signature: &str,
    ) -> Result<TransactionReceipt, Error> {
        let executed: ExecutionResponse = self
            .call(
                EXECUTE_TRANSACTION_METHOD,
                json!([
                    STANDARD.encode(&tx.bytes),
                    [signature],
                    {"showEffects": true},
                    "WaitForLocalExecution",
                ]),
            )
            .await
            .map_err(Error::Transfer)?;

        let status = executed
            .effects
            .as_ref()
            .and_then(|e| e.pointer("/status/status"))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_owned();

        if status != "success" {
            let reason = executed
                .effects
                .as_ref()
                .and_then(|e| e.pointer("/status/error"))
                .and_then(Value::as_str)
                .unwrap_or("no effects reported");
            return Err(Error::Transfer(format!(
                "transaction {} failed: {reason}",
                executed.digest
            )));
        }
        if executed.digest.is_empty() {
            return Err(Error::Transfer("ledger returned an empty digest".into()));
        }

        Ok(TransactionReceipt::new(
            TransactionDigest(executed.digest),
            status,
        ))
    }
}

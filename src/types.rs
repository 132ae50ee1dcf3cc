use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

/// Error returned when parsing a [`WalletAddress`] or a decimal amount.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ParseError {
    #[error("invalid wallet address: {0}")]
    Address(String),
    #[error("invalid amount: {0}")]
    Amount(String),
}

/// On-chain account address (`0x` + 64 lower-case hex digits).
///
/// Guaranteed valid by construction. Use `"0x…".parse::<WalletAddress>()` or
/// [`WalletAddress::from_bytes`] to create.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
    pub const BYTE_LEN: usize = 32;

    #[must_use]
    pub fn from_bytes(bytes: [u8; Self::BYTE_LEN]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for WalletAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| ParseError::Address(s.clone()))?;
        if digits.len() == Self::BYTE_LEN * 2 && digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(format!("0x{}", digits.to_ascii_lowercase())))
        } else {
            Err(ParseError::Address(s))
        }
    }
}

impl From<WalletAddress> for String {
    fn from(a: WalletAddress) -> Self {
        a.0
    }
}

/// Nonce embedded in the authorization request, bound to one ephemeral key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct Nonce(pub String);

impl Nonce {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Ledger transaction identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct TransactionDigest(pub String);

/// A single transfer request. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct TransferIntent {
    pub amount_minor_units: u64,
    pub recipient: WalletAddress,
}

impl TransferIntent {
    #[must_use]
    pub fn new(amount_minor_units: u64, recipient: WalletAddress) -> Self {
        Self {
            amount_minor_units,
            recipient,
        }
    }

    /// Build an intent from a human amount such as `"10.00"`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Amount`] if the amount is malformed, has more
    /// fractional digits than `decimals`, or overflows `u64`.
    pub fn from_decimal(
        amount: &str,
        decimals: u32,
        recipient: WalletAddress,
    ) -> Result<Self, ParseError> {
        Ok(Self::new(parse_amount(amount, decimals)?, recipient))
    }
}

/// Result of a submitted transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TransactionReceipt {
    pub digest: TransactionDigest,
    pub status: String,
}

impl TransactionReceipt {
    #[must_use]
    pub fn new(digest: TransactionDigest, status: impl Into<String>) -> Self {
        Self {
            digest,
            status: status.into(),
        }
    }
}

/// Converts a decimal amount into minor units (`"10.5"` with 9 decimals → `10_500_000_000`).
///
/// # Errors
///
/// Returns [`ParseError::Amount`] on malformed input, excess precision or overflow.
pub fn parse_amount(amount: &str, decimals: u32) -> Result<u64, ParseError> {
    let invalid = || ParseError::Amount(amount.to_owned());
    let trimmed = amount.trim();
    let (whole, frac) = trimmed.split_once('.').unwrap_or((trimmed, ""));

    if whole.is_empty() && frac.is_empty() {
        return Err(invalid());
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    if frac.len() > decimals as usize {
        return Err(invalid());
    }

    let scale = 10u64.checked_pow(decimals).ok_or_else(invalid)?;
    let whole: u64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };
    let frac_units: u64 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{frac:0<width$}", width = decimals as usize);
        padded.parse().map_err(|_| invalid())?
    };

    whole
        .checked_mul(scale)
        .and_then(|w| w.checked_add(frac_units))
        .ok_or_else(invalid)
}

/// Renders minor units as a decimal amount, trimming trailing zeros
/// (`10_500_000` with 6 decimals → `"10.5"`).
#[must_use]
pub fn format_amount(minor_units: u128, decimals: u32) -> String {
    let Some(scale) = 10u128.checked_pow(decimals) else {
        return minor_units.to_string();
    };
    let whole = minor_units / scale;
    let frac = minor_units % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{frac:0>width$}", width = decimals as usize);
    format!("{whole}.{}", frac.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "0x0000000000000000000000000000000000000000000000000000000000000abc";

    #[test]
    fn test_valid_address() {
        let addr: WalletAddress = ADDR.parse().unwrap();
        assert_eq!(addr.as_str(), ADDR);
    }

    #[test]
    fn test_address_is_normalized_to_lowercase() {
        let upper = ADDR.replace("abc", "ABC");
        let addr: WalletAddress = upper.parse().unwrap();
        assert_eq!(addr.as_str(), ADDR);
    }

    #[test]
    fn test_invalid_address() {
        assert!("".parse::<WalletAddress>().is_err());
        assert!("0x1234".parse::<WalletAddress>().is_err());
        assert!(ADDR.trim_start_matches("0x").parse::<WalletAddress>().is_err());
        assert!(ADDR.replace('a', "g").parse::<WalletAddress>().is_err());
    }

    #[test]
    fn test_address_serde_rejects_invalid() {
        let json = serde_json::to_string(&ADDR.parse::<WalletAddress>().unwrap()).unwrap();
        assert_eq!(json, format!("\"{ADDR}\""));
        assert!(serde_json::from_str::<WalletAddress>("\"0xnope\"").is_err());
    }

    #[test]
    fn test_address_from_bytes() {
        let addr = WalletAddress::from_bytes([0xff; 32]);
        assert_eq!(addr.as_str().len(), 66);
        assert!(addr.as_str().starts_with("0xffff"));
    }

    #[test]
    fn test_amount_with_decimals() {
        assert_eq!(parse_amount("10.00", 9).unwrap(), 10_000_000_000);
        assert_eq!(parse_amount("10.5", 6).unwrap(), 10_500_000);
        assert_eq!(parse_amount("0.000001", 6).unwrap(), 1);
        assert_eq!(parse_amount(".25", 2).unwrap(), 25);
        assert_eq!(parse_amount("7", 0).unwrap(), 7);
    }

    #[test]
    fn test_amount_rejects_bad_input() {
        assert!(parse_amount("", 9).is_err());
        assert!(parse_amount(".", 9).is_err());
        assert!(parse_amount("-1", 9).is_err());
        assert!(parse_amount("1.2.3", 9).is_err());
        assert!(parse_amount("1.0000001", 6).is_err());
        assert!(parse_amount("99999999999999999999", 9).is_err());
    }

    #[test]
    fn test_format_amount_trims_fraction() {
        assert_eq!(format_amount(10_500_000, 6), "10.5");
        assert_eq!(format_amount(1, 6), "0.000001");
        assert_eq!(format_amount(10_000_000_000, 9), "10");
        assert_eq!(format_amount(7, 0), "7");
        assert_eq!(
            parse_amount(&format_amount(1_234_567, 6), 6).unwrap(),
            1_234_567
        );
    }

    #[test]
    fn test_transfer_intent_from_decimal() {
        let intent = TransferIntent::from_decimal("10.00", 9, ADDR.parse().unwrap()).unwrap();
        assert_eq!(intent.amount_minor_units, 10_000_000_000);
        assert_eq!(intent.recipient.as_str(), ADDR);
    }
}

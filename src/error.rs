/// Errors produced by the zkLogin session, resolution and signing flow.
///
/// Each variant belongs to the component that raises it. Transport failures are
/// mapped into the owning component's variant rather than surfaced raw.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The entropy source failed while generating keys, randomness or salt.
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Callback re-entry found incomplete persisted login state.
    #[error("Missing login session data: {0}")]
    MissingSessionData(&'static str),

    /// The identity provider rejected the code or client credentials.
    #[error("Token exchange failed ({}): {detail}", status_text(*.status))]
    TokenExchange { status: Option<u16>, detail: String },

    /// The identity token is absent, malformed, expired, or bound to another session.
    #[error("Invalid identity token: {0}")]
    InvalidToken(String),

    /// The relay/proving service failed or returned a malformed response.
    #[error("Address resolution failed ({}): {detail}", status_text(*.status))]
    Resolution { status: Option<u16>, detail: String },

    /// Signing state is absent or the ephemeral key's epoch window has elapsed.
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// The ledger rejected or failed to submit the transaction.
    #[error("Transfer failed: {0}")]
    Transfer(String),

    /// A ledger read (balance, transaction history) failed.
    #[error("Ledger query failed: {0}")]
    Ledger(String),

    /// The persistence capability failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An operation was invoked from a flow state that does not allow it.
    #[error("Invalid login state: {0}")]
    InvalidState(String),
}

impl Error {
    pub(crate) fn resolution(detail: impl Into<String>) -> Self {
        Self::Resolution {
            status: None,
            detail: detail.into(),
        }
    }

    pub(crate) fn token_exchange(detail: impl Into<String>) -> Self {
        Self::TokenExchange {
            status: None,
            detail: detail.into(),
        }
    }

    /// Whether the user has to start a new login to recover.
    #[must_use]
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            Self::MissingSessionData(_)
                | Self::TokenExchange { .. }
                | Self::InvalidToken(_)
                | Self::Resolution { .. }
                | Self::SessionExpired(_)
                | Self::InvalidState(_)
        )
    }
}

fn status_text(status: Option<u16>) -> String {
    status.map_or_else(|| "no status".to_owned(), |s| format!("HTTP {s}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_status() {
        let err = Error::Resolution {
            status: Some(401),
            detail: "invalid api key".into(),
        };
        assert_eq!(
            err.to_string(),
            "Address resolution failed (HTTP 401): invalid api key"
        );
    }

    #[test]
    fn test_display_without_status() {
        let err = Error::token_exchange("connection refused");
        assert_eq!(
            err.to_string(),
            "Token exchange failed (no status): connection refused"
        );
    }

    #[test]
    fn test_transfer_and_storage_do_not_require_login() {
        assert!(!Error::Transfer("rejected".into()).requires_login());
        assert!(!Error::Storage("disk full".into()).requires_login());
        assert!(!Error::Ledger("node down".into()).requires_login());
        assert!(Error::SessionExpired("epoch 103 > 102".into()).requires_login());
        assert!(Error::MissingSessionData("nonce").requires_login());
    }
}

//! Error types for chain synchronization.

use ledgerlink_core::ChainId;
use thiserror::Error;

/// Errors are `Clone` so one coalesced result can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Network failure: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Retries exhausted for {0}")]
    RetryExhausted(String),

    #[error("Inconsistent transfer {id}: {reason}")]
    InconsistentTransfer { id: String, reason: String },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Transfer intent message rejected: {0}")]
    IntentRejected(String),

    #[error("{0} module is not started")]
    NotStarted(ChainId),

    #[error("Request queue stopped")]
    QueueStopped,

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl SyncError {
    /// Whether the condition is expected to clear on its own and should
    /// drive another poll rather than surface to the user.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::NotFound(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::InvalidData(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SyncError::Network("timeout".into()).is_transient());
        assert!(SyncError::NotFound("0x1".into()).is_transient());
        assert!(!SyncError::RetryExhausted("0x1".into()).is_transient());
        assert!(!SyncError::InvalidAddress("x".into()).is_transient());
        assert!(!SyncError::QueueStopped.is_transient());
    }

    #[test]
    fn test_display() {
        let err = SyncError::InconsistentTransfer {
            id: "h1".into(),
            reason: "wrong_amount".into(),
        };
        assert_eq!(err.to_string(), "Inconsistent transfer h1: wrong_amount");
        assert_eq!(
            SyncError::NotStarted(ChainId::Btc).to_string(),
            "BTC module is not started"
        );
    }
}

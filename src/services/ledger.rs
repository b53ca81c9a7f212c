//! Reward ledger client
//!
//! The ledger is an external, slow and fallible chain gateway. Its errors
//! are kept in their own type so they can never leak into a lifecycle
//! operation's result.
//!
//! Errors come in two kinds. Definite ones mean no funds moved and the
//! transfer may be attempted again. Indeterminate ones (timeout, lost
//! response, unreadable receipt) mean the transfer may have landed.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("Ledger not configured")]
    NotConfigured,

    #[error("Ledger unreachable: {0}")]
    Unreachable(String),

    #[error("Ledger rejected transfer: {0}")]
    Rejected(String),

    #[error("Ledger call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Ledger outcome unknown: {0}")]
    Indeterminate(String),
}

impl LedgerError {
    /// True when the transfer certainly did not happen
    pub fn is_definite(&self) -> bool {
        matches!(
            self,
            LedgerError::NotConfigured | LedgerError::Unreachable(_) | LedgerError::Rejected(_)
        )
    }
}

/// Handle returned by a successful transfer (e.g. a chain tx hash)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub tx_handle: String,
}

/// External value-transfer ledger
#[async_trait::async_trait]
pub trait RewardLedger: Send + Sync {
    async fn transfer(
        &self,
        destination: &str,
        amount: i64,
        currency: &str,
    ) -> Result<TransferReceipt, LedgerError>;
}

// ============================================================================
// HTTP gateway
// ============================================================================

#[derive(Debug, Serialize)]
struct TransferRequest<'a> {
    to: &'a str,
    amount: i64,
    currency: &'a str,
}

/// Ledger gateway client: `POST {base}/transfers`
pub struct HttpRewardLedger {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRewardLedger {
    pub fn new(base_url: impl Into<String>) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| LedgerError::Unreachable(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait::async_trait]
impl RewardLedger for HttpRewardLedger {
    async fn transfer(
        &self,
        destination: &str,
        amount: i64,
        currency: &str,
    ) -> Result<TransferReceipt, LedgerError> {
        let url = format!("{}/transfers", self.base_url);
        debug!(url = %url, to = %destination, amount, "Submitting ledger transfer");

        let response = self
            .client
            .post(&url)
            .json(&TransferRequest { to: destination, amount, currency })
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_builder() {
                    LedgerError::Unreachable(e.to_string())
                } else {
                    // The request may have reached the gateway
                    LedgerError::Indeterminate(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Rejected(format!("{}: {}", status, body)));
        }

        response
            .json::<TransferReceipt>()
            .await
            .map_err(|e| LedgerError::Indeterminate(format!("Malformed receipt: {}", e)))
    }
}

/// Used when no ledger URL is configured; every transfer fails
pub struct DisabledLedger;

#[async_trait::async_trait]
impl RewardLedger for DisabledLedger {
    async fn transfer(&self, _: &str, _: i64, _: &str) -> Result<TransferReceipt, LedgerError> {
        Err(LedgerError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_ledger_fails() {
        let err = DisabledLedger.transfer("0x1", 10, "ETH").await.unwrap_err();
        assert!(matches!(err, LedgerError::NotConfigured));
    }

    #[tokio::test]
    async fn test_unreachable_gateway() {
        let ledger = HttpRewardLedger::new("http://127.0.0.1:1/").unwrap();
        let err = ledger.transfer("0x1", 10, "ETH").await.unwrap_err();
        assert!(matches!(err, LedgerError::Unreachable(_)));
        assert!(err.is_definite());
    }

    #[test]
    fn test_ambiguous_errors_are_not_definite() {
        assert!(!LedgerError::Timeout(Duration::from_secs(1)).is_definite());
        assert!(!LedgerError::Indeterminate("connection reset".into()).is_definite());
        assert!(LedgerError::Rejected("400".into()).is_definite());
        assert!(LedgerError::NotConfigured.is_definite());
    }
}

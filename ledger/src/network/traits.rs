//! Core traits for ledger networks.
//!
//! This module defines the `LedgerNetwork` trait - the primary abstraction
//! over the distributed ledger, covering consensus messages, token
//! operations, and contract calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Error types for ledger operations.
///
/// Every caller in the workspace classifies failures through
/// [`LedgerError::is_transient`]; nothing inspects error messages.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    /// Invalid or missing configuration - fatal at startup
    #[error("Ledger configuration error: {0}")]
    Config(String),

    /// Operation timed out
    #[error("Ledger operation timed out: {0}")]
    Timeout(String),

    /// Network unreachable or node unavailable
    #[error("Ledger network unavailable: {0}")]
    Unavailable(String),

    /// Transaction rejected at precheck
    #[error("Precheck failed with status {status}")]
    Precheck { status: String },

    /// Transaction executed but the receipt carries a failure status
    #[error("Receipt returned status {status}")]
    ReceiptStatus { status: String },

    /// Invalid parameters (bad account, oversized metadata, ...)
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Operator account cannot cover the transaction fee
    #[error("Insufficient operator balance: {0}")]
    InsufficientBalance(String),

    /// Response from the network could not be interpreted
    #[error("Invalid ledger response: {0}")]
    InvalidResponse(String),
}

impl LedgerError {
    /// Whether the failure is worth retrying or queuing.
    ///
    /// Timeouts, unreachable networks, and precheck/receipt statuses are
    /// transient; everything else is permanent and must surface immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::Timeout(_)
                | LedgerError::Unavailable(_)
                | LedgerError::Precheck { .. }
                | LedgerError::ReceiptStatus { .. }
        )
    }
}

/// Receipt for an executed ledger transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionReceipt {
    /// Network-assigned transaction ID (the opaque reference callers keep)
    pub transaction_id: String,
    /// Final consensus status
    pub status: String,
    /// Sequence number within the topic, for consensus messages
    pub topic_sequence_number: Option<u64>,
    /// Serial numbers minted, for token mints
    pub serial_numbers: Vec<u64>,
}

impl TransactionReceipt {
    /// First minted serial number, if any.
    pub fn first_serial(&self) -> Option<u64> {
        self.serial_numbers.first().copied()
    }
}

/// Core trait for ledger networks.
///
/// Implementations hold the operator identity; callers never pass
/// credentials per operation.
#[async_trait]
pub trait LedgerNetwork: Send + Sync {
    /// Identifier of this network connection (e.g., gateway URL or "mock").
    fn id(&self) -> &str;

    /// Lightweight health probe: the operator account balance in tinybars.
    async fn operator_balance(&self) -> Result<u64, LedgerError>;

    /// Submit a consensus message to a topic.
    async fn submit_message(
        &self,
        topic_id: &str,
        message: &str,
    ) -> Result<TransactionReceipt, LedgerError>;

    /// Create a consensus topic; returns the new topic ID.
    async fn create_topic(&self, memo: &str) -> Result<String, LedgerError>;

    /// Create a non-fungible token collection; returns the new token ID.
    async fn create_nft_collection(
        &self,
        name: &str,
        symbol: &str,
    ) -> Result<String, LedgerError>;

    /// Mint one NFT with the given metadata bytes.
    async fn mint_nft(
        &self,
        token_id: &str,
        metadata: &[u8],
    ) -> Result<TransactionReceipt, LedgerError>;

    /// Transfer an NFT serial between accounts.
    async fn transfer_nft(
        &self,
        token_id: &str,
        serial: u64,
        from_account: &str,
        to_account: &str,
    ) -> Result<TransactionReceipt, LedgerError>;

    /// Associate an account with a token.
    ///
    /// Implementations treat "already associated" as success.
    async fn associate_token(&self, token_id: &str, account: &str) -> Result<(), LedgerError>;

    /// Freeze an account for a token.
    async fn freeze_account(
        &self,
        token_id: &str,
        account: &str,
    ) -> Result<TransactionReceipt, LedgerError>;

    /// Unfreeze an account for a token.
    async fn unfreeze_account(
        &self,
        token_id: &str,
        account: &str,
    ) -> Result<TransactionReceipt, LedgerError>;

    /// NFT balance of an account for a token.
    async fn nft_balance(&self, token_id: &str, account: &str) -> Result<u64, LedgerError>;

    /// Execute a smart-contract call.
    async fn call_contract(
        &self,
        contract_id: &str,
        function: &str,
        params: serde_json::Value,
    ) -> Result<TransactionReceipt, LedgerError>;

    /// Whether a transaction ID resolves on the network.
    async fn transaction_exists(&self, transaction_id: &str) -> Result<bool, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(LedgerError::Timeout("t".into()).is_transient());
        assert!(LedgerError::Unavailable("u".into()).is_transient());
        assert!(LedgerError::Precheck { status: "BUSY".into() }.is_transient());
        assert!(LedgerError::ReceiptStatus { status: "UNKNOWN".into() }.is_transient());

        assert!(!LedgerError::Config("c".into()).is_transient());
        assert!(!LedgerError::InvalidParameter("p".into()).is_transient());
        assert!(!LedgerError::InsufficientBalance("b".into()).is_transient());
        assert!(!LedgerError::InvalidResponse("r".into()).is_transient());
    }
}

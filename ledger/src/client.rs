//! LedgerClient - single point of contact with the ledger network.
//!
//! Owns the operator identity and the retry policy. Every network call goes
//! through one bounded exponential-backoff retry loop that consults
//! `LedgerError::is_transient`; permanent errors surface immediately.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::network::traits::{LedgerError, LedgerNetwork, TransactionReceipt};

/// Token metadata ceiling imposed by the network.
pub const MAX_METADATA_BYTES: usize = 100;

/// Configuration for the ledger client.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Operator account paying for every transaction
    pub operator_account: String,
    /// Operator signing key (opaque to this crate)
    pub operator_key: String,
    /// Maximum attempts per operation, first try included
    pub max_attempts: u32,
    /// Base backoff, doubled per attempt
    pub base_backoff_ms: u64,
    /// Backoff ceiling
    pub max_backoff_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            operator_account: String::new(),
            operator_key: String::new(),
            max_attempts: 4,
            base_backoff_ms: 250,
            max_backoff_ms: 4_000,
        }
    }
}

impl LedgerConfig {
    /// Create a config with operator credentials and default retry policy.
    pub fn new(operator_account: impl Into<String>, operator_key: impl Into<String>) -> Self {
        Self {
            operator_account: operator_account.into(),
            operator_key: operator_key.into(),
            ..Default::default()
        }
    }

    /// Validate the configuration. Errors here are fatal at startup.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.operator_account.is_empty() {
            return Err(LedgerError::Config("operator account is not set".to_string()));
        }
        if self.operator_key.is_empty() {
            return Err(LedgerError::Config("operator key is not set".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(LedgerError::Config("max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Client for all ledger operations.
pub struct LedgerClient {
    network: Arc<dyn LedgerNetwork>,
    config: LedgerConfig,
}

impl LedgerClient {
    /// Create a new client. Fails fast on invalid configuration.
    pub fn new(
        network: Arc<dyn LedgerNetwork>,
        config: LedgerConfig,
    ) -> Result<Self, LedgerError> {
        config.validate()?;
        Ok(Self { network, config })
    }

    /// The operator account all writes are attributed to.
    pub fn operator_account(&self) -> &str {
        &self.config.operator_account
    }

    /// Backoff for a given zero-based attempt: base * 2^attempt, capped.
    fn backoff(&self, attempt: u32) -> Duration {
        let ms = self
            .config
            .base_backoff_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.config.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Run an operation with bounded retry on transient failures.
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(operation, attempt, "Ledger operation recovered after retry");
                    }
                    return Ok(value);
                }
                Err(error) if error.is_transient() && attempt + 1 < self.config.max_attempts => {
                    let backoff = self.backoff(attempt);
                    warn!(
                        operation,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "Transient ledger failure, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Submit a consensus message and wait for its receipt.
    pub async fn submit_consensus_message(
        &self,
        topic_id: &str,
        message: &str,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.with_retry("submit_consensus_message", || {
            self.network.submit_message(topic_id, message)
        })
        .await
    }

    /// Create a consensus topic.
    pub async fn create_topic(&self, memo: &str) -> Result<String, LedgerError> {
        self.with_retry("create_topic", || self.network.create_topic(memo))
            .await
    }

    /// Create a non-fungible collection.
    pub async fn create_nft_collection(
        &self,
        name: &str,
        symbol: &str,
    ) -> Result<String, LedgerError> {
        self.with_retry("create_nft_collection", || {
            self.network.create_nft_collection(name, symbol)
        })
        .await
    }

    /// Mint exactly one unit; returns the receipt and the new serial.
    pub async fn mint_one(
        &self,
        token_id: &str,
        metadata: &[u8],
    ) -> Result<(TransactionReceipt, u64), LedgerError> {
        if metadata.len() > MAX_METADATA_BYTES {
            return Err(LedgerError::InvalidParameter(format!(
                "metadata is {} bytes, ceiling is {}",
                metadata.len(),
                MAX_METADATA_BYTES
            )));
        }

        let receipt = self
            .with_retry("mint_one", || self.network.mint_nft(token_id, metadata))
            .await?;
        let serial = receipt
            .first_serial()
            .ok_or_else(|| LedgerError::InvalidResponse("mint returned no serial".to_string()))?;
        Ok((receipt, serial))
    }

    /// Transfer an NFT serial between accounts.
    pub async fn transfer_nft(
        &self,
        token_id: &str,
        serial: u64,
        from_account: &str,
        to_account: &str,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.with_retry("transfer_nft", || {
            self.network.transfer_nft(token_id, serial, from_account, to_account)
        })
        .await
    }

    /// Associate an account with a token ("already associated" is success).
    pub async fn associate_token(
        &self,
        token_id: &str,
        account: &str,
    ) -> Result<(), LedgerError> {
        self.with_retry("associate_token", || {
            self.network.associate_token(token_id, account)
        })
        .await
    }

    /// Freeze an account for a token.
    pub async fn freeze_account(
        &self,
        token_id: &str,
        account: &str,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.with_retry("freeze_account", || {
            self.network.freeze_account(token_id, account)
        })
        .await
    }

    /// Unfreeze an account for a token.
    pub async fn unfreeze_account(
        &self,
        token_id: &str,
        account: &str,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.with_retry("unfreeze_account", || {
            self.network.unfreeze_account(token_id, account)
        })
        .await
    }

    /// NFT balance of an account.
    pub async fn nft_balance(&self, token_id: &str, account: &str) -> Result<u64, LedgerError> {
        self.with_retry("nft_balance", || self.network.nft_balance(token_id, account))
            .await
    }

    /// Whether an account holds at least one unit of a token.
    pub async fn has_nft(&self, token_id: &str, account: &str) -> Result<bool, LedgerError> {
        Ok(self.nft_balance(token_id, account).await? > 0)
    }

    /// Execute a smart-contract call.
    pub async fn call_contract(
        &self,
        contract_id: &str,
        function: &str,
        params: serde_json::Value,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.with_retry("call_contract", || {
            self.network.call_contract(contract_id, function, params.clone())
        })
        .await
    }

    /// Whether a transaction ID resolves on the network.
    pub async fn transaction_exists(&self, transaction_id: &str) -> Result<bool, LedgerError> {
        // Single shot; integrity checks are best-effort.
        self.network.transaction_exists(transaction_id).await
    }

    /// Lightweight health probe: one balance query, no retry.
    pub async fn is_network_available(&self) -> bool {
        self.network.operator_balance().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::mock::MockLedgerNetwork;

    fn fast_config() -> LedgerConfig {
        LedgerConfig {
            base_backoff_ms: 1,
            max_backoff_ms: 2,
            ..LedgerConfig::new("0.0.1001", "test-key")
        }
    }

    fn client_with(network: Arc<MockLedgerNetwork>) -> LedgerClient {
        LedgerClient::new(network, fast_config()).unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(matches!(
            LedgerClient::new(
                Arc::new(MockLedgerNetwork::new()),
                LedgerConfig::new("", "key")
            ),
            Err(LedgerError::Config(_))
        ));
        assert!(matches!(
            LedgerConfig::new("0.0.1001", "").validate(),
            Err(LedgerError::Config(_))
        ));
        assert!(LedgerConfig::new("0.0.1001", "key").validate().is_ok());
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let network = Arc::new(MockLedgerNetwork::new());
        network.push_failures(LedgerError::Timeout("t".to_string()), 2);

        let client = client_with(Arc::clone(&network));
        let receipt = client.submit_consensus_message("0.0.7", "m").await.unwrap();

        assert_eq!(receipt.status, "SUCCESS");
        assert_eq!(network.call_count(), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let network = Arc::new(MockLedgerNetwork::new());
        network.push_failures(LedgerError::Timeout("t".to_string()), 10);

        let client = client_with(Arc::clone(&network));
        let error = client
            .submit_consensus_message("0.0.7", "m")
            .await
            .unwrap_err();

        assert!(matches!(error, LedgerError::Timeout(_)));
        assert_eq!(network.call_count(), 4); // max_attempts
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let network = Arc::new(MockLedgerNetwork::new());
        network.push_failure(LedgerError::InvalidParameter("bad".to_string()));

        let client = client_with(Arc::clone(&network));
        let error = client
            .submit_consensus_message("0.0.7", "m")
            .await
            .unwrap_err();

        assert!(matches!(error, LedgerError::InvalidParameter(_)));
        assert_eq!(network.call_count(), 1);
    }

    #[tokio::test]
    async fn test_metadata_ceiling_checked_before_network() {
        let network = Arc::new(MockLedgerNetwork::new());
        let client = client_with(Arc::clone(&network));

        let error = client.mint_one("0.0.88", &[0u8; 101]).await.unwrap_err();
        assert!(matches!(error, LedgerError::InvalidParameter(_)));
        assert_eq!(network.call_count(), 0);
    }

    #[tokio::test]
    async fn test_health_probe() {
        let network = Arc::new(MockLedgerNetwork::new());
        let client = client_with(Arc::clone(&network));

        assert!(client.is_network_available().await);
        network.set_available(false);
        assert!(!client.is_network_available().await);
    }
}

//! Mock ledger network for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::traits::{LedgerError, LedgerNetwork, TransactionReceipt};

#[derive(Debug, Default)]
struct TokenState {
    next_serial: u64,
    /// serial -> owning account
    owners: HashMap<u64, String>,
    frozen: HashSet<String>,
    associated: HashSet<String>,
}

/// Mock network for testing.
///
/// Configurable availability, scripted failures, artificial latency, and
/// full in-memory token/topic state for unit tests.
pub struct MockLedgerNetwork {
    available: AtomicBool,
    /// Failures consumed by upcoming operations, oldest first
    scripted_failures: Mutex<VecDeque<LedgerError>>,
    /// Artificial latency applied to every operation
    delay: Mutex<Option<Duration>>,
    operator_balance: AtomicU64,
    next_entity: AtomicU32,
    next_transaction: AtomicU32,
    /// Messages submitted, as (topic, message) pairs
    messages: Mutex<Vec<(String, String)>>,
    tokens: Mutex<HashMap<String, TokenState>>,
    executed: Mutex<HashSet<String>>,
    call_count: AtomicU32,
}

impl MockLedgerNetwork {
    /// Create a new mock network.
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            scripted_failures: Mutex::new(VecDeque::new()),
            delay: Mutex::new(None),
            operator_balance: AtomicU64::new(1_000_000_000),
            next_entity: AtomicU32::new(1000),
            next_transaction: AtomicU32::new(1),
            messages: Mutex::new(Vec::new()),
            tokens: Mutex::new(HashMap::new()),
            executed: Mutex::new(HashSet::new()),
            call_count: AtomicU32::new(0),
        }
    }

    /// Toggle network availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Queue an error for the next operation.
    pub fn push_failure(&self, error: LedgerError) {
        self.scripted_failures
            .lock()
            .expect("failure queue poisoned")
            .push_back(error);
    }

    /// Queue the same error `n` times.
    pub fn push_failures(&self, error: LedgerError, n: usize) {
        for _ in 0..n {
            self.push_failure(error.clone());
        }
    }

    /// Apply artificial latency to every operation.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("delay poisoned") = Some(delay);
    }

    /// Set the operator balance returned by the health probe.
    pub fn set_operator_balance(&self, balance: u64) {
        self.operator_balance.store(balance, Ordering::SeqCst);
    }

    /// Number of operations attempted.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Messages submitted so far, as (topic, message) pairs.
    pub fn submitted_messages(&self) -> Vec<(String, String)> {
        self.messages.lock().expect("messages poisoned").clone()
    }

    /// Common entry for every operation: count, delay, scripted failure,
    /// availability.
    async fn gate(&self) -> Result<(), LedgerError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().expect("delay poisoned");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self
            .scripted_failures
            .lock()
            .expect("failure queue poisoned")
            .pop_front()
        {
            return Err(error);
        }

        if !self.available.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("mock network offline".to_string()));
        }

        Ok(())
    }

    fn next_entity_id(&self) -> String {
        format!("0.0.{}", self.next_entity.fetch_add(1, Ordering::SeqCst))
    }

    fn receipt(&self, serials: Vec<u64>, sequence: Option<u64>) -> TransactionReceipt {
        let n = self.next_transaction.fetch_add(1, Ordering::SeqCst);
        let transaction_id = format!("0.0.2@{}.{:09}", 1_736_600_000 + n as u64, n);
        self.executed
            .lock()
            .expect("executed poisoned")
            .insert(transaction_id.clone());
        TransactionReceipt {
            transaction_id,
            status: "SUCCESS".to_string(),
            topic_sequence_number: sequence,
            serial_numbers: serials,
        }
    }
}

impl Default for MockLedgerNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerNetwork for MockLedgerNetwork {
    fn id(&self) -> &str {
        "mock"
    }

    async fn operator_balance(&self) -> Result<u64, LedgerError> {
        self.gate().await?;
        Ok(self.operator_balance.load(Ordering::SeqCst))
    }

    async fn submit_message(
        &self,
        topic_id: &str,
        message: &str,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.gate().await?;

        let mut messages = self.messages.lock().expect("messages poisoned");
        messages.push((topic_id.to_string(), message.to_string()));
        let sequence = messages.len() as u64;
        drop(messages);

        Ok(self.receipt(vec![], Some(sequence)))
    }

    async fn create_topic(&self, _memo: &str) -> Result<String, LedgerError> {
        self.gate().await?;
        Ok(self.next_entity_id())
    }

    async fn create_nft_collection(
        &self,
        _name: &str,
        _symbol: &str,
    ) -> Result<String, LedgerError> {
        self.gate().await?;
        let token_id = self.next_entity_id();
        self.tokens
            .lock()
            .expect("tokens poisoned")
            .insert(token_id.clone(), TokenState { next_serial: 1, ..Default::default() });
        Ok(token_id)
    }

    async fn mint_nft(
        &self,
        token_id: &str,
        metadata: &[u8],
    ) -> Result<TransactionReceipt, LedgerError> {
        self.gate().await?;

        if metadata.len() > 100 {
            return Err(LedgerError::InvalidParameter(
                "metadata exceeds 100 bytes".to_string(),
            ));
        }

        let mut tokens = self.tokens.lock().expect("tokens poisoned");
        let token = tokens
            .get_mut(token_id)
            .ok_or_else(|| LedgerError::InvalidParameter(format!("unknown token {}", token_id)))?;
        let serial = token.next_serial;
        token.next_serial += 1;
        // Freshly minted serials sit in the treasury until transferred.
        token.owners.insert(serial, "treasury".to_string());
        drop(tokens);

        Ok(self.receipt(vec![serial], None))
    }

    async fn transfer_nft(
        &self,
        token_id: &str,
        serial: u64,
        from_account: &str,
        to_account: &str,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.gate().await?;

        let mut tokens = self.tokens.lock().expect("tokens poisoned");
        let token = tokens
            .get_mut(token_id)
            .ok_or_else(|| LedgerError::InvalidParameter(format!("unknown token {}", token_id)))?;

        if token.frozen.contains(from_account) || token.frozen.contains(to_account) {
            return Err(LedgerError::ReceiptStatus {
                status: "ACCOUNT_FROZEN_FOR_TOKEN".to_string(),
            });
        }
        match token.owners.get(&serial) {
            Some(owner) if owner == from_account || owner == "treasury" => {
                token.owners.insert(serial, to_account.to_string());
            }
            _ => {
                return Err(LedgerError::InvalidParameter(format!(
                    "serial {} not held by {}",
                    serial, from_account
                )));
            }
        }
        drop(tokens);

        Ok(self.receipt(vec![], None))
    }

    async fn associate_token(&self, token_id: &str, account: &str) -> Result<(), LedgerError> {
        self.gate().await?;
        let mut tokens = self.tokens.lock().expect("tokens poisoned");
        let token = tokens
            .get_mut(token_id)
            .ok_or_else(|| LedgerError::InvalidParameter(format!("unknown token {}", token_id)))?;
        // Re-association is a no-op, as on the real network.
        token.associated.insert(account.to_string());
        Ok(())
    }

    async fn freeze_account(
        &self,
        token_id: &str,
        account: &str,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.gate().await?;
        let mut tokens = self.tokens.lock().expect("tokens poisoned");
        let token = tokens
            .get_mut(token_id)
            .ok_or_else(|| LedgerError::InvalidParameter(format!("unknown token {}", token_id)))?;
        token.frozen.insert(account.to_string());
        drop(tokens);
        Ok(self.receipt(vec![], None))
    }

    async fn unfreeze_account(
        &self,
        token_id: &str,
        account: &str,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.gate().await?;
        let mut tokens = self.tokens.lock().expect("tokens poisoned");
        let token = tokens
            .get_mut(token_id)
            .ok_or_else(|| LedgerError::InvalidParameter(format!("unknown token {}", token_id)))?;
        token.frozen.remove(account);
        drop(tokens);
        Ok(self.receipt(vec![], None))
    }

    async fn nft_balance(&self, token_id: &str, account: &str) -> Result<u64, LedgerError> {
        self.gate().await?;
        let tokens = self.tokens.lock().expect("tokens poisoned");
        let token = tokens
            .get(token_id)
            .ok_or_else(|| LedgerError::InvalidParameter(format!("unknown token {}", token_id)))?;
        Ok(token.owners.values().filter(|o| o.as_str() == account).count() as u64)
    }

    async fn call_contract(
        &self,
        _contract_id: &str,
        _function: &str,
        _params: serde_json::Value,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.gate().await?;
        Ok(self.receipt(vec![], None))
    }

    async fn transaction_exists(&self, transaction_id: &str) -> Result<bool, LedgerError> {
        self.gate().await?;
        Ok(self
            .executed
            .lock()
            .expect("executed poisoned")
            .contains(transaction_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mint_and_transfer() {
        let network = MockLedgerNetwork::new();
        let token = network.create_nft_collection("Canopy", "CNPY").await.unwrap();

        let receipt = network.mint_nft(&token, b"wf-1").await.unwrap();
        let serial = receipt.first_serial().unwrap();
        assert_eq!(serial, 1);

        network
            .transfer_nft(&token, serial, "treasury", "0.0.2002")
            .await
            .unwrap();

        assert_eq!(network.nft_balance(&token, "0.0.2002").await.unwrap(), 1);
        assert_eq!(network.nft_balance(&token, "0.0.3003").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_oversized_metadata_rejected() {
        let network = MockLedgerNetwork::new();
        let token = network.create_nft_collection("Canopy", "CNPY").await.unwrap();

        let error = network.mint_nft(&token, &[0u8; 101]).await.unwrap_err();
        assert!(matches!(error, LedgerError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn test_scripted_failures_consumed_in_order() {
        let network = MockLedgerNetwork::new();
        network.push_failure(LedgerError::Timeout("first".to_string()));

        let error = network.submit_message("0.0.1", "m").await.unwrap_err();
        assert!(matches!(error, LedgerError::Timeout(_)));

        network.submit_message("0.0.1", "m").await.unwrap();
        assert_eq!(network.submitted_messages().len(), 1);
    }

    #[tokio::test]
    async fn test_offline_network() {
        let network = MockLedgerNetwork::new();
        network.set_available(false);

        let error = network.operator_balance().await.unwrap_err();
        assert!(matches!(error, LedgerError::Unavailable(_)));

        network.set_available(true);
        network.operator_balance().await.unwrap();
    }

    #[tokio::test]
    async fn test_frozen_account_blocks_transfer() {
        let network = MockLedgerNetwork::new();
        let token = network.create_nft_collection("Canopy", "CNPY").await.unwrap();
        let serial = network
            .mint_nft(&token, b"wf-1")
            .await
            .unwrap()
            .first_serial()
            .unwrap();
        network
            .transfer_nft(&token, serial, "treasury", "0.0.2002")
            .await
            .unwrap();

        network.freeze_account(&token, "0.0.2002").await.unwrap();
        let error = network
            .transfer_nft(&token, serial, "0.0.2002", "0.0.3003")
            .await
            .unwrap_err();
        assert!(matches!(error, LedgerError::ReceiptStatus { .. }));

        network.unfreeze_account(&token, "0.0.2002").await.unwrap();
        network
            .transfer_nft(&token, serial, "0.0.2002", "0.0.3003")
            .await
            .unwrap();
    }
}

//! CertificateIssuer - one compliance certificate per compliant workflow.
//!
//! The certificate is a serial-numbered non-fungible token: proof of
//! compliance, not a reward. On-chain metadata carries only the workflow
//! identifier because of the 100-byte ceiling; the full compliance dossier
//! goes through the [`ConsensusRecorder`] keyed by the same workflow.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::client::LedgerClient;
use crate::network::traits::{LedgerError, TransactionReceipt};
use crate::recorder::ConsensusRecorder;

/// Retry policy for minting and transfers.
///
/// Linear backoff (delay × attempt), applied only to timeout-classified
/// failures. Everything else propagates immediately; the consensus round
/// trip is slow enough that a timeout often means "still in flight".
#[derive(Debug, Clone)]
pub struct CertificatePolicy {
    /// Attempts per mint/transfer, first try included
    pub max_attempts: u32,
    /// Base delay, multiplied by the attempt number
    pub retry_delay_ms: u64,
}

impl Default for CertificatePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 2_000,
        }
    }
}

/// Result of a certificate issuance.
#[derive(Debug, Clone)]
pub struct CertificateIssuance {
    /// Mint transaction reference
    pub transaction_ref: String,
    /// Serial number of the minted certificate
    pub serial: u64,
    /// NFT collection the certificate belongs to
    pub collection_id: String,
}

/// Issues, transfers, and freezes compliance certificates.
pub struct CertificateIssuer {
    client: Arc<LedgerClient>,
    recorder: Arc<ConsensusRecorder>,
    policy: CertificatePolicy,
    collection_name: String,
    collection_symbol: String,
    /// Lazily created on first issuance
    collection: RwLock<Option<String>>,
}

impl CertificateIssuer {
    /// Create an issuer with the default retry policy.
    pub fn new(
        client: Arc<LedgerClient>,
        recorder: Arc<ConsensusRecorder>,
        collection_name: impl Into<String>,
        collection_symbol: impl Into<String>,
    ) -> Self {
        Self {
            client,
            recorder,
            policy: CertificatePolicy::default(),
            collection_name: collection_name.into(),
            collection_symbol: collection_symbol.into(),
            collection: RwLock::new(None),
        }
    }

    /// Override the retry policy.
    pub fn with_policy(mut self, policy: CertificatePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The certificate collection ID, creating the collection on first use.
    pub async fn collection_id(&self) -> Result<String, LedgerError> {
        if let Some(id) = self.collection.read().await.as_ref() {
            return Ok(id.clone());
        }

        let mut slot = self.collection.write().await;
        // Another task may have created it while we waited for the lock.
        if let Some(id) = slot.as_ref() {
            return Ok(id.clone());
        }

        let id = self
            .client
            .create_nft_collection(&self.collection_name, &self.collection_symbol)
            .await?;
        info!(collection_id = %id, "Certificate collection created");
        *slot = Some(id.clone());
        Ok(id)
    }

    /// Retry an operation on timeouts only, with linear backoff.
    async fn with_timeout_retry<T, F, Fut>(
        &self,
        operation: &str,
        mut call: F,
    ) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, LedgerError>>,
    {
        let mut attempt = 1u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(LedgerError::Timeout(detail)) if attempt < self.policy.max_attempts => {
                    let delay = Duration::from_millis(self.policy.retry_delay_ms * attempt as u64);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        detail = %detail,
                        "Certificate operation timed out, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Mint one certificate for a workflow and hand it to the holder.
    ///
    /// The full `compliance_data` is recorded on the consensus topic; only
    /// the workflow ID goes into the token metadata.
    pub async fn issue_certificate(
        &self,
        workflow_id: &str,
        holder_account: &str,
        compliance_data: Value,
    ) -> Result<CertificateIssuance, LedgerError> {
        let collection_id = self.collection_id().await?;

        let (receipt, serial) = self
            .with_timeout_retry("mint", || {
                self.client.mint_one(&collection_id, workflow_id.as_bytes())
            })
            .await?;

        self.client
            .associate_token(&collection_id, holder_account)
            .await?;
        self.with_timeout_retry("transfer", || {
            self.client.transfer_nft(
                &collection_id,
                serial,
                self.client.operator_account(),
                holder_account,
            )
        })
        .await?;

        self.recorder
            .record_certificate_issued(workflow_id, serial, holder_account, compliance_data)
            .await?;

        info!(
            workflow_id,
            serial,
            holder = holder_account,
            collection_id = %collection_id,
            "Compliance certificate issued"
        );
        Ok(CertificateIssuance {
            transaction_ref: receipt.transaction_id,
            serial,
            collection_id,
        })
    }

    /// Move a certificate along the supply chain, associating the recipient
    /// with the collection first ("already associated" counts as success).
    pub async fn transfer_certificate(
        &self,
        collection_id: &str,
        serial: u64,
        from_account: &str,
        to_account: &str,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.client.associate_token(collection_id, to_account).await?;
        let receipt = self
            .with_timeout_retry("transfer", || {
                self.client
                    .transfer_nft(collection_id, serial, from_account, to_account)
            })
            .await?;

        self.recorder
            .record_certificate_transferred(collection_id, serial, from_account, to_account)
            .await?;
        Ok(receipt)
    }

    /// Revoke a holder's ability to hold or transfer certificates.
    /// The reason is recorded on the consensus topic for auditability.
    pub async fn freeze_certificate(
        &self,
        account: &str,
        reason: &str,
    ) -> Result<TransactionReceipt, LedgerError> {
        let collection_id = self.collection_id().await?;
        let receipt = self.client.freeze_account(&collection_id, account).await?;
        self.recorder
            .record_certificate_freeze(account, true, Some(reason))
            .await?;
        warn!(account, reason, "Certificate holder frozen");
        Ok(receipt)
    }

    /// Restore a frozen holder.
    pub async fn unfreeze_certificate(
        &self,
        account: &str,
    ) -> Result<TransactionReceipt, LedgerError> {
        let collection_id = self.collection_id().await?;
        let receipt = self.client.unfreeze_account(&collection_id, account).await?;
        self.recorder
            .record_certificate_freeze(account, false, None)
            .await?;
        info!(account, "Certificate holder unfrozen");
        Ok(receipt)
    }

    /// Whether an account currently holds at least one certificate.
    pub async fn has_valid_certificate(&self, account: &str) -> Result<bool, LedgerError> {
        let collection_id = self.collection_id().await?;
        self.client.has_nft(&collection_id, account).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::LedgerConfig;
    use crate::network::mock::MockLedgerNetwork;
    use crate::network::traits::LedgerNetwork;
    use crate::queue::TransactionQueue;
    use provenance::store::InMemoryEventStore;
    use serde_json::json;

    fn issuer_with(network: Arc<MockLedgerNetwork>) -> CertificateIssuer {
        let config = LedgerConfig {
            max_attempts: 1,
            base_backoff_ms: 1,
            max_backoff_ms: 1,
            ..LedgerConfig::new("treasury", "test-key")
        };
        let client = Arc::new(LedgerClient::new(Arc::clone(&network) as _, config).unwrap());
        let events = Arc::new(InMemoryEventStore::new());
        let queue = Arc::new(TransactionQueue::new(Arc::clone(&client), events));
        let recorder = Arc::new(ConsensusRecorder::new(
            Arc::clone(&client),
            queue,
            "0.0.7777",
        ));
        CertificateIssuer::new(client, recorder, "Canopy Compliance", "CNPY").with_policy(
            CertificatePolicy {
                max_attempts: 3,
                retry_delay_ms: 1,
            },
        )
    }

    #[tokio::test]
    async fn test_issue_mints_one_serial_for_holder() {
        let network = Arc::new(MockLedgerNetwork::new());
        let issuer = issuer_with(Arc::clone(&network));

        let issued = issuer
            .issue_certificate("wf-1", "0.0.2002", json!({"risk": "LOW"}))
            .await
            .unwrap();

        assert_eq!(issued.serial, 1);
        assert_eq!(
            network
                .nft_balance(&issued.collection_id, "0.0.2002")
                .await
                .unwrap(),
            1
        );

        // Full compliance data rides the consensus topic, not the metadata.
        let (_, message) = network.submitted_messages().pop().unwrap();
        let parsed: Value = serde_json::from_str(&message).unwrap();
        assert_eq!(parsed["event_type"], "certificate_issued");
        assert_eq!(parsed["data"]["compliance_data"]["risk"], "LOW");
    }

    #[tokio::test]
    async fn test_collection_created_lazily_and_once() {
        let network = Arc::new(MockLedgerNetwork::new());
        let issuer = issuer_with(Arc::clone(&network));

        let first = issuer.collection_id().await.unwrap();
        let second = issuer.collection_id().await.unwrap();
        assert_eq!(first, second);

        let a = issuer
            .issue_certificate("wf-1", "0.0.2002", json!({}))
            .await
            .unwrap();
        let b = issuer
            .issue_certificate("wf-2", "0.0.2003", json!({}))
            .await
            .unwrap();
        assert_eq!(a.collection_id, b.collection_id);
        assert_eq!(b.serial, 2);
    }

    #[tokio::test]
    async fn test_mint_retries_on_timeout_only() {
        let network = Arc::new(MockLedgerNetwork::new());
        let issuer = issuer_with(Arc::clone(&network));
        issuer.collection_id().await.unwrap();

        // Two timeouts hit the mint; third attempt succeeds.
        network.push_failures(LedgerError::Timeout("consensus".to_string()), 2);
        let issued = issuer
            .issue_certificate("wf-1", "0.0.2002", json!({}))
            .await
            .unwrap();
        assert_eq!(issued.serial, 1);
    }

    #[tokio::test]
    async fn test_non_timeout_error_not_retried() {
        let network = Arc::new(MockLedgerNetwork::new());
        let issuer = issuer_with(Arc::clone(&network));
        issuer.collection_id().await.unwrap();

        let before = network.call_count();
        network.push_failure(LedgerError::InsufficientBalance("fee".to_string()));
        let error = issuer
            .issue_certificate("wf-1", "0.0.2002", json!({}))
            .await
            .unwrap_err();

        assert!(matches!(error, LedgerError::InsufficientBalance(_)));
        assert_eq!(network.call_count() - before, 1);
    }

    #[tokio::test]
    async fn test_freeze_blocks_transfer_and_records_reason() {
        let network = Arc::new(MockLedgerNetwork::new());
        let issuer = issuer_with(Arc::clone(&network));

        let issued = issuer
            .issue_certificate("wf-1", "0.0.2002", json!({}))
            .await
            .unwrap();
        issuer
            .freeze_certificate("0.0.2002", "deforestation alert confirmed")
            .await
            .unwrap();

        let error = issuer
            .transfer_certificate(&issued.collection_id, issued.serial, "0.0.2002", "0.0.3003")
            .await
            .unwrap_err();
        assert!(matches!(error, LedgerError::ReceiptStatus { .. }));

        let messages = network.submitted_messages();
        let freeze = messages
            .iter()
            .map(|(_, m)| serde_json::from_str::<Value>(m).unwrap())
            .find(|v| v["event_type"] == "certificate_freeze")
            .unwrap();
        assert_eq!(freeze["data"]["reason"], "deforestation alert confirmed");

        issuer.unfreeze_certificate("0.0.2002").await.unwrap();
        issuer
            .transfer_certificate(&issued.collection_id, issued.serial, "0.0.2002", "0.0.3003")
            .await
            .unwrap();
        assert!(issuer.has_valid_certificate("0.0.3003").await.unwrap());
    }
}

//! Transaction queue - absorbs transient ledger failures.
//!
//! Submissions that fail for transient reasons land here and are replayed
//! FIFO by a drain pass. Draining runs on demand (right after an enqueue)
//! and on a fixed interval, guarded by a single-flight flag so passes never
//! overlap. A pass halts at the first transient failure to preserve order
//! and to stop hammering a network that is already down.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use provenance::store::EventStore;

use crate::client::LedgerClient;
use crate::network::traits::LedgerError;

/// Default retry cap per queued item.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Payload of a queued ledger write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum QueuedPayload {
    /// Consensus message submission
    ConsensusMessage { topic_id: String, message: String },
    /// NFT transfer
    TokenTransfer {
        token_id: String,
        serial: u64,
        from_account: String,
        to_account: String,
    },
    /// Smart-contract call
    ContractCall {
        contract_id: String,
        function: String,
        params: serde_json::Value,
    },
}

/// A ledger write accepted locally but not yet confirmed on-chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTransaction {
    /// Unique queue entry ID
    pub id: String,
    /// The write to replay
    pub payload: QueuedPayload,
    /// Domain entity that owns the write
    pub entity_id: String,
    /// Kind of the owning entity
    pub entity_type: String,
    /// When the entry was queued
    pub created_at: DateTime<Utc>,
    /// Drain attempts so far
    pub retries: u32,
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Queue fully processed
    Completed { submitted: usize, dropped: usize },
    /// Pass halted at a transient failure; remaining items kept
    Halted { submitted: usize, remaining: usize },
    /// Another pass was already running
    AlreadyRunning,
}

/// Counters over the queue's lifetime.
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    /// Entries currently waiting
    pub pending: usize,
    /// Entries replayed successfully
    pub succeeded: u64,
    /// Entries dropped after exhausting retries or a permanent error
    pub failed_permanently: u64,
}

/// Durable retry queue for ledger submissions.
///
/// An owned component: hold it in an `Arc`, inject the drain interval, and
/// inspect contents directly in tests. No global state.
pub struct TransactionQueue {
    client: Arc<LedgerClient>,
    events: Arc<dyn EventStore>,
    items: Mutex<VecDeque<QueuedTransaction>>,
    draining: AtomicBool,
    max_retries: u32,
    succeeded: AtomicU64,
    failed_permanently: AtomicU64,
}

impl TransactionQueue {
    /// Create a new queue with the default retry cap.
    pub fn new(client: Arc<LedgerClient>, events: Arc<dyn EventStore>) -> Self {
        Self::with_max_retries(client, events, DEFAULT_MAX_RETRIES)
    }

    /// Create with a custom retry cap.
    pub fn with_max_retries(
        client: Arc<LedgerClient>,
        events: Arc<dyn EventStore>,
        max_retries: u32,
    ) -> Self {
        Self {
            client,
            events,
            items: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            max_retries,
            succeeded: AtomicU64::new(0),
            failed_permanently: AtomicU64::new(0),
        }
    }

    /// Queue a write and kick off an async drain pass.
    pub async fn enqueue(
        self: &Arc<Self>,
        payload: QueuedPayload,
        entity_id: impl Into<String>,
        entity_type: impl Into<String>,
    ) -> String {
        let entry = QueuedTransaction {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            created_at: Utc::now(),
            retries: 0,
        };
        let queue_id = entry.id.clone();

        {
            let mut items = self.items.lock().await;
            items.push_back(entry);
            debug!(queue_id = %queue_id, pending = items.len(), "Transaction queued");
        }

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            queue.drain().await;
        });

        queue_id
    }

    /// Number of entries waiting.
    pub async fn pending(&self) -> usize {
        self.items.lock().await.len()
    }

    /// Snapshot of the waiting entries, oldest first.
    pub async fn snapshot(&self) -> Vec<QueuedTransaction> {
        self.items.lock().await.iter().cloned().collect()
    }

    /// Lifetime counters.
    pub async fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.pending().await,
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed_permanently: self.failed_permanently.load(Ordering::SeqCst),
        }
    }

    /// Run one drain pass. Single-flight: concurrent calls return
    /// `AlreadyRunning` without touching the queue.
    pub async fn drain(&self) -> DrainOutcome {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return DrainOutcome::AlreadyRunning;
        }

        let outcome = self.drain_locked().await;
        self.draining.store(false, Ordering::SeqCst);
        outcome
    }

    async fn drain_locked(&self) -> DrainOutcome {
        let mut submitted = 0usize;
        let mut dropped = 0usize;

        loop {
            let mut entry = {
                let mut items = self.items.lock().await;
                match items.pop_front() {
                    Some(entry) => entry,
                    None => return DrainOutcome::Completed { submitted, dropped },
                }
            };

            match self.submit(&entry).await {
                Ok(transaction_id) => {
                    self.succeeded.fetch_add(1, Ordering::SeqCst);
                    submitted += 1;
                    self.backfill(&entry, &transaction_id).await;
                    info!(
                        queue_id = %entry.id,
                        transaction_id = %transaction_id,
                        "Queued transaction confirmed"
                    );
                }
                Err(error) if error.is_transient() => {
                    entry.retries += 1;
                    if entry.retries >= self.max_retries {
                        self.failed_permanently.fetch_add(1, Ordering::SeqCst);
                        dropped += 1;
                        error!(
                            queue_id = %entry.id,
                            entity_id = %entry.entity_id,
                            retries = entry.retries,
                            "Queued transaction permanently failed: retry cap reached"
                        );
                        continue;
                    }

                    // Halt the pass: keep order, let the network recover.
                    let remaining = {
                        let mut items = self.items.lock().await;
                        items.push_front(entry);
                        items.len()
                    };
                    warn!(
                        remaining,
                        error = %error,
                        "Drain halted on transient failure"
                    );
                    return DrainOutcome::Halted { submitted, remaining };
                }
                Err(error) => {
                    self.failed_permanently.fetch_add(1, Ordering::SeqCst);
                    dropped += 1;
                    error!(
                        queue_id = %entry.id,
                        entity_id = %entry.entity_id,
                        error = %error,
                        "Queued transaction permanently failed: non-transient error"
                    );
                }
            }
        }
    }

    async fn submit(&self, entry: &QueuedTransaction) -> Result<String, LedgerError> {
        let receipt = match &entry.payload {
            QueuedPayload::ConsensusMessage { topic_id, message } => {
                self.client.submit_consensus_message(topic_id, message).await?
            }
            QueuedPayload::TokenTransfer {
                token_id,
                serial,
                from_account,
                to_account,
            } => {
                self.client
                    .transfer_nft(token_id, *serial, from_account, to_account)
                    .await?
            }
            QueuedPayload::ContractCall {
                contract_id,
                function,
                params,
            } => {
                self.client
                    .call_contract(contract_id, function, params.clone())
                    .await?
            }
        };
        Ok(receipt.transaction_id)
    }

    /// Replace the owning record's `queued_*` placeholder with the real
    /// reference. Failures here are logged, never propagated: the ledger
    /// write already succeeded.
    async fn backfill(&self, entry: &QueuedTransaction, transaction_id: &str) {
        if entry.entity_type != "stage_event" {
            return;
        }
        if let Err(error) = self
            .events
            .attach_ledger_ref(&entry.entity_id, transaction_id)
            .await
        {
            warn!(
                entity_id = %entry.entity_id,
                error = %error,
                "Could not back-fill ledger reference"
            );
        }
    }

    /// Spawn a fixed-interval drain loop; drop or abort the handle to stop.
    pub fn spawn_drain_loop(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                queue.drain().await;
            }
        })
    }
}

//! AsyncRecorder - ledger recording off the caller's critical path.
//!
//! Domain operations persist their event first, then hand it here. The
//! fire-and-forget methods return immediately; the `_and_wait` variants are
//! for callers that genuinely need the reference before responding. Either
//! way, a ledger failure never invalidates the domain event: it stays
//! recorded locally without a reference.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use provenance::events::StageEvent;
use provenance::store::EventStore;

use crate::recorder::ConsensusRecorder;

/// Non-blocking recording façade over the [`ConsensusRecorder`].
pub struct AsyncRecorder {
    recorder: Arc<ConsensusRecorder>,
    events: Arc<dyn EventStore>,
}

impl AsyncRecorder {
    /// Create a façade over a recorder and the event store it back-fills.
    pub fn new(recorder: Arc<ConsensusRecorder>, events: Arc<dyn EventStore>) -> Self {
        Self { recorder, events }
    }

    /// Record one event and attach the resulting reference to the stored
    /// record. Permanent failures resolve to `None`; the event stays valid
    /// and unattributed.
    async fn record_one(
        recorder: Arc<ConsensusRecorder>,
        events: Arc<dyn EventStore>,
        event: StageEvent,
    ) -> Option<String> {
        match recorder.record_supply_chain_event(&event).await {
            Ok(reference) => {
                if let Err(error) = events.attach_ledger_ref(&event.id, &reference).await {
                    warn!(
                        event_id = %event.id,
                        error = %error,
                        "Recorded on ledger but could not attach reference"
                    );
                }
                debug!(
                    event_id = %event.id,
                    kind = event.kind.as_str(),
                    reference = %reference,
                    "Stage event recorded"
                );
                Some(reference)
            }
            Err(error) => {
                warn!(
                    event_id = %event.id,
                    kind = event.kind.as_str(),
                    error = %error,
                    "Ledger recording failed, event remains local-only"
                );
                None
            }
        }
    }

    /// Fire-and-forget: spawn the recording and return immediately.
    pub fn record_event(&self, event: StageEvent) {
        let recorder = Arc::clone(&self.recorder);
        let events = Arc::clone(&self.events);
        tokio::spawn(async move {
            Self::record_one(recorder, events, event).await;
        });
    }

    /// Record and wait for the reference (real or `queued_*`).
    pub async fn record_event_and_wait(&self, event: StageEvent) -> Option<String> {
        Self::record_one(Arc::clone(&self.recorder), Arc::clone(&self.events), event).await
    }

    /// Record a mixed batch concurrently. Returns `"{kind}_{id}"` keys
    /// mapped to references; individual failures yield `None` without
    /// affecting the rest of the batch.
    pub async fn record_batch(
        &self,
        batch: Vec<StageEvent>,
    ) -> HashMap<String, Option<String>> {
        let tasks = batch.into_iter().map(|event| {
            let recorder = Arc::clone(&self.recorder);
            let events = Arc::clone(&self.events);
            let key = format!("{}_{}", event.kind.as_str(), event.id);
            async move { (key, Self::record_one(recorder, events, event).await) }
        });
        join_all(tasks).await.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{LedgerClient, LedgerConfig};
    use crate::network::mock::MockLedgerNetwork;
    use crate::network::traits::LedgerError;
    use crate::queue::TransactionQueue;
    use crate::recorder::QUEUED_PREFIX;
    use chrono::NaiveDate;
    use provenance::events::EventKind;
    use provenance::store::InMemoryEventStore;
    use std::time::{Duration, Instant};

    struct Harness {
        network: Arc<MockLedgerNetwork>,
        events: Arc<InMemoryEventStore>,
        queue: Arc<TransactionQueue>,
        facade: AsyncRecorder,
    }

    fn harness() -> Harness {
        let network = Arc::new(MockLedgerNetwork::new());
        let config = LedgerConfig {
            max_attempts: 1,
            base_backoff_ms: 1,
            max_backoff_ms: 1,
            ..LedgerConfig::new("0.0.1001", "test-key")
        };
        let client = Arc::new(LedgerClient::new(Arc::clone(&network) as _, config).unwrap());
        let events = Arc::new(InMemoryEventStore::new());
        let queue = Arc::new(TransactionQueue::new(
            Arc::clone(&client),
            Arc::clone(&events) as _,
        ));
        let recorder = Arc::new(ConsensusRecorder::new(
            client,
            Arc::clone(&queue),
            "0.0.7777",
        ));
        let facade = AsyncRecorder::new(recorder, Arc::clone(&events) as _);
        Harness { network, events, queue, facade }
    }

    async fn saved_event(h: &Harness, kind: EventKind) -> StageEvent {
        let event = StageEvent::new(
            "wf-1",
            kind,
            "actor-a",
            "actor-b",
            100.0,
            NaiveDate::from_ymd_opt(2025, 5, 20).unwrap(),
        );
        h.events.save(event.clone()).await.unwrap();
        event
    }

    #[tokio::test]
    async fn test_wait_variant_attaches_reference() {
        let h = harness();
        let event = saved_event(&h, EventKind::Collection).await;

        let reference = h.facade.record_event_and_wait(event.clone()).await.unwrap();
        assert!(!reference.starts_with(QUEUED_PREFIX));

        let stored = h.events.find_by_id(&event.id).await.unwrap();
        assert_eq!(stored.ledger_ref.as_deref(), Some(reference.as_str()));
        assert!(stored.is_anchored());
    }

    #[tokio::test]
    async fn test_fire_and_forget_does_not_block() {
        let h = harness();
        h.network.set_delay(Duration::from_millis(100));
        let event = saved_event(&h, EventKind::Collection).await;
        let event_id = event.id.clone();

        let started = Instant::now();
        h.facade.record_event(event);
        assert!(started.elapsed() < Duration::from_millis(50));

        // The spawned task completes after the artificial delay.
        for _ in 0..100 {
            if h.events.find_by_id(&event_id).await.unwrap().is_anchored() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("reference never attached");
    }

    #[tokio::test]
    async fn test_batch_isolates_individual_failures() {
        let h = harness();
        let a = saved_event(&h, EventKind::Collection).await;
        let b = saved_event(&h, EventKind::Consolidation).await;
        let key_a = format!("collection_{}", a.id);
        let key_b = format!("consolidation_{}", b.id);

        // Exactly one permanent failure; the other submission succeeds.
        h.network
            .push_failure(LedgerError::InvalidParameter("bad".to_string()));
        let results = h.facade.record_batch(vec![a, b]).await;

        assert_eq!(results.len(), 2);
        let failures = results.values().filter(|r| r.is_none()).count();
        assert_eq!(failures, 1);
        assert!(results.contains_key(&key_a));
        assert!(results.contains_key(&key_b));
    }

    // Outage end to end: queued placeholder while the network is down,
    // real reference back-filled once it recovers and the queue drains.
    #[tokio::test]
    async fn test_outage_degrades_then_recovers() {
        let h = harness();
        h.network.set_available(false);
        let event = saved_event(&h, EventKind::Collection).await;

        let reference = h.facade.record_event_and_wait(event.clone()).await.unwrap();
        assert!(reference.starts_with(QUEUED_PREFIX));

        let stored = h.events.find_by_id(&event.id).await.unwrap();
        assert!(stored.is_pending());

        // One queued entry; the enqueue-triggered drain halted on the outage.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.queue.pending().await, 1);

        h.network.set_available(true);
        h.queue.drain().await;

        assert_eq!(h.queue.pending().await, 0);
        let stored = h.events.find_by_id(&event.id).await.unwrap();
        assert!(stored.is_anchored());
        assert!(!stored.ledger_ref.unwrap().starts_with(QUEUED_PREFIX));
    }
}

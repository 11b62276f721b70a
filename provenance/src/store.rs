//! Event persistence.
//!
//! Domain events are written synchronously before any ledger attempt; the
//! async recording layer comes back later to attach transaction references.
//! The trait keeps the engine testable and leaves room for a database-backed
//! implementation.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use tracing::debug;

use crate::events::{EventKind, StageEvent};

/// Error types for event storage.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Event not found
    #[error("Event not found: {0}")]
    NotFound(String),

    /// Duplicate event ID
    #[error("Event already exists: {0}")]
    Duplicate(String),
}

/// Accumulated quantities and event counts for one workflow.
#[derive(Debug, Clone, Default)]
pub struct WorkflowTotals {
    /// Total kilograms per event kind
    pub quantities: HashMap<EventKind, f64>,
    /// Number of events per kind
    pub counts: HashMap<EventKind, usize>,
}

impl WorkflowTotals {
    /// Quantity accumulated for a kind (0.0 if none).
    pub fn quantity(&self, kind: EventKind) -> f64 {
        self.quantities.get(&kind).copied().unwrap_or(0.0)
    }

    /// Event count for a kind (0 if none).
    pub fn count(&self, kind: EventKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    /// Quantity still available to be consumed by the next stage.
    pub fn available(&self, kind: EventKind) -> f64 {
        let consumed = match kind {
            EventKind::Collection => self.quantity(EventKind::Consolidation),
            EventKind::Consolidation => self.quantity(EventKind::Processing),
            EventKind::Processing => self.quantity(EventKind::Shipment),
            EventKind::Shipment => 0.0,
        };
        self.quantity(kind) - consumed
    }
}

/// Persistence seam for stage events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist a new event.
    async fn save(&self, event: StageEvent) -> Result<(), StoreError>;

    /// Fetch an event by ID.
    async fn find_by_id(&self, event_id: &str) -> Option<StageEvent>;

    /// Attach (or replace) the ledger transaction reference of an event.
    ///
    /// Replacing is deliberate: a `queued_*` placeholder is overwritten by
    /// the real reference once the retry queue drains.
    async fn attach_ledger_ref(&self, event_id: &str, ledger_ref: &str) -> Result<(), StoreError>;

    /// All events of a workflow, oldest first.
    async fn by_workflow(&self, workflow_id: &str) -> Vec<StageEvent>;

    /// Quantity and count totals for a workflow.
    async fn totals(&self, workflow_id: &str) -> WorkflowTotals;
}

/// In-memory event store.
pub struct InMemoryEventStore {
    /// Events indexed by ID
    events: DashMap<String, StageEvent>,
}

impl InMemoryEventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            events: DashMap::new(),
        }
    }

    /// Number of stored events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn save(&self, event: StageEvent) -> Result<(), StoreError> {
        if self.events.contains_key(&event.id) {
            return Err(StoreError::Duplicate(event.id));
        }
        debug!(
            event_id = %event.id,
            workflow_id = %event.workflow_id,
            kind = event.kind.as_str(),
            "Stage event saved"
        );
        self.events.insert(event.id.clone(), event);
        Ok(())
    }

    async fn find_by_id(&self, event_id: &str) -> Option<StageEvent> {
        self.events.get(event_id).map(|e| e.clone())
    }

    async fn attach_ledger_ref(&self, event_id: &str, ledger_ref: &str) -> Result<(), StoreError> {
        match self.events.get_mut(event_id) {
            Some(mut event) => {
                event.ledger_ref = Some(ledger_ref.to_string());
                debug!(event_id, ledger_ref, "Ledger reference attached");
                Ok(())
            }
            None => Err(StoreError::NotFound(event_id.to_string())),
        }
    }

    async fn by_workflow(&self, workflow_id: &str) -> Vec<StageEvent> {
        let mut events: Vec<StageEvent> = self
            .events
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .map(|e| e.clone())
            .collect();
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        events
    }

    async fn totals(&self, workflow_id: &str) -> WorkflowTotals {
        let mut totals = WorkflowTotals::default();
        for event in self.events.iter().filter(|e| e.workflow_id == workflow_id) {
            *totals.quantities.entry(event.kind).or_insert(0.0) += event.quantity_kg;
            *totals.counts.entry(event.kind).or_insert(0) += 1;
        }
        totals
    }
}

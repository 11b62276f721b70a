//! Stage events - the immutable facts of a batch's journey.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ActorRole;

/// Kind of stage event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Production unit delivers to an aggregator
    Collection,
    /// Aggregator consolidates toward a processor
    Consolidation,
    /// Processor transforms and hands over to the exporter
    Processing,
    /// Exporter ships to an importer
    Shipment,
}

impl EventKind {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Collection => "collection",
            EventKind::Consolidation => "consolidation",
            EventKind::Processing => "processing",
            EventKind::Shipment => "shipment",
        }
    }

    /// The role expected on the giving side of this event.
    pub fn from_role(&self) -> ActorRole {
        match self {
            EventKind::Collection => ActorRole::ProductionUnit,
            EventKind::Consolidation => ActorRole::Aggregator,
            EventKind::Processing => ActorRole::Processor,
            EventKind::Shipment => ActorRole::Exporter,
        }
    }

    /// The role expected on the receiving side of this event.
    pub fn to_role(&self) -> ActorRole {
        match self {
            EventKind::Collection => ActorRole::Aggregator,
            EventKind::Consolidation => ActorRole::Processor,
            EventKind::Processing => ActorRole::Exporter,
            EventKind::Shipment => ActorRole::Importer,
        }
    }

    /// The kind whose accumulated quantity this event draws from, if any.
    pub fn consumes(&self) -> Option<EventKind> {
        match self {
            EventKind::Collection => None,
            EventKind::Consolidation => Some(EventKind::Collection),
            EventKind::Processing => Some(EventKind::Consolidation),
            EventKind::Shipment => Some(EventKind::Processing),
        }
    }
}

/// One supply-chain fact: a quantity moving between two actors on a date.
///
/// Created by domain operations and never mutated afterwards, except that a
/// ledger transaction reference is attached once asynchronous recording
/// completes. A reference starting with `queued_` means the write was
/// accepted locally but is still pending on the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEvent {
    /// Unique event ID
    pub id: String,
    /// Workflow this event belongs to
    pub workflow_id: String,
    /// Kind of movement
    pub kind: EventKind,
    /// Giving actor ID
    pub from_actor: String,
    /// Receiving actor ID
    pub to_actor: String,
    /// Quantity moved, in kilograms
    pub quantity_kg: f64,
    /// Date the movement happened
    pub event_date: NaiveDate,
    /// Ledger transaction reference, attached after recording
    pub ledger_ref: Option<String>,
    /// When the record was created
    pub created_at: DateTime<Utc>,
}

impl StageEvent {
    /// Create a new stage event.
    pub fn new(
        workflow_id: impl Into<String>,
        kind: EventKind,
        from_actor: impl Into<String>,
        to_actor: impl Into<String>,
        quantity_kg: f64,
        event_date: NaiveDate,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            kind,
            from_actor: from_actor.into(),
            to_actor: to_actor.into(),
            quantity_kg,
            event_date,
            ledger_ref: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the event has a confirmed (non-pending) ledger reference.
    pub fn is_anchored(&self) -> bool {
        match &self.ledger_ref {
            Some(r) => !r.starts_with("queued_"),
            None => false,
        }
    }

    /// Whether the ledger write is still pending in the retry queue.
    pub fn is_pending(&self) -> bool {
        matches!(&self.ledger_ref, Some(r) if r.starts_with("queued_"))
    }
}

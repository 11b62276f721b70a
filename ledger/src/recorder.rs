//! ConsensusRecorder - domain facts as consensus messages.
//!
//! Translates each domain fact into a versioned envelope and submits it as a
//! consensus message. Serialization is canonical (sorted keys) so the same
//! fact always produces the same bytes and the same hash.
//!
//! Transient submission failures degrade instead of propagating: the fact is
//! parked on the [`TransactionQueue`] and the caller receives a `queued_*`
//! placeholder reference. Callers persist the placeholder and treat it as
//! "pending, not final"; the queue back-fills the real reference later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use provenance::digest;
use provenance::events::StageEvent;

use crate::client::LedgerClient;
use crate::network::traits::LedgerError;
use crate::queue::{QueuedPayload, TransactionQueue};

/// Envelope format version, bumped on breaking layout changes.
pub const ENVELOPE_VERSION: u32 = 1;

/// Prefix of references that are queued locally, not yet on-chain.
pub const QUEUED_PREFIX: &str = "queued_";

/// Versioned wrapper around one domain fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Fact type, snake_case (e.g. "supply_chain_event")
    pub event_type: String,
    /// Domain entity the fact belongs to
    pub entity_id: String,
    /// Kind of the owning entity
    pub entity_type: String,
    /// Envelope format version
    pub version: u32,
    /// When the fact was recorded
    pub timestamp: DateTime<Utc>,
    /// Fact payload
    pub data: Value,
}

impl EventEnvelope {
    /// Build an envelope stamped with the current time.
    pub fn new(
        event_type: impl Into<String>,
        entity_id: impl Into<String>,
        entity_type: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            version: ENVELOPE_VERSION,
            timestamp: Utc::now(),
            data,
        }
    }

    /// Canonical serialization: identical envelopes yield identical bytes.
    pub fn to_canonical_json(&self) -> Result<String, LedgerError> {
        let value = serde_json::to_value(self)
            .map_err(|e| LedgerError::InvalidParameter(format!("unserializable envelope: {}", e)))?;
        Ok(digest::canonical_json(&value))
    }

    /// SHA-256 over the canonical serialization.
    pub fn content_hash(&self) -> Result<String, LedgerError> {
        Ok(digest::compute_hash(self.to_canonical_json()?.as_bytes()))
    }
}

/// Records domain facts on the consensus topic.
pub struct ConsensusRecorder {
    client: Arc<LedgerClient>,
    queue: Arc<TransactionQueue>,
    topic_id: String,
}

impl ConsensusRecorder {
    /// Create a recorder bound to one consensus topic.
    pub fn new(
        client: Arc<LedgerClient>,
        queue: Arc<TransactionQueue>,
        topic_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            queue,
            topic_id: topic_id.into(),
        }
    }

    /// The topic all facts are submitted to.
    pub fn topic_id(&self) -> &str {
        &self.topic_id
    }

    /// Submit an envelope; on transient failure, queue it and return a
    /// `queued_*` placeholder. Permanent failures surface as errors.
    pub async fn record(&self, envelope: EventEnvelope) -> Result<String, LedgerError> {
        let message = envelope.to_canonical_json()?;

        match self.client.submit_consensus_message(&self.topic_id, &message).await {
            Ok(receipt) => {
                debug!(
                    event_type = %envelope.event_type,
                    entity_id = %envelope.entity_id,
                    transaction_id = %receipt.transaction_id,
                    "Fact recorded on consensus topic"
                );
                Ok(receipt.transaction_id)
            }
            Err(error) if error.is_transient() => {
                let queue_id = self
                    .queue
                    .enqueue(
                        QueuedPayload::ConsensusMessage {
                            topic_id: self.topic_id.clone(),
                            message,
                        },
                        envelope.entity_id.clone(),
                        envelope.entity_type.clone(),
                    )
                    .await;
                warn!(
                    event_type = %envelope.event_type,
                    entity_id = %envelope.entity_id,
                    error = %error,
                    "Ledger unavailable, fact queued for retry"
                );
                Ok(format!("{}{}", QUEUED_PREFIX, queue_id))
            }
            Err(error) => Err(error),
        }
    }

    /// Best-effort check that a reference is well-formed and resolvable.
    ///
    /// Queued placeholders are pending by definition and never verify.
    pub async fn verify_record_integrity(&self, reference: &str) -> bool {
        if reference.is_empty() || reference.starts_with(QUEUED_PREFIX) {
            return false;
        }
        self.client
            .transaction_exists(reference)
            .await
            .unwrap_or(false)
    }

    // --- one method per domain fact type ---

    /// A batch entered the system.
    pub async fn record_batch_creation(
        &self,
        batch_id: &str,
        produce_type: &str,
        quantity_kg: f64,
        origin_country: &str,
    ) -> Result<String, LedgerError> {
        self.record(EventEnvelope::new(
            "batch_creation",
            batch_id,
            "batch",
            json!({
                "produce_type": produce_type,
                "quantity_kg": quantity_kg,
                "origin_country": origin_country,
            }),
        ))
        .await
    }

    /// A compliance document was uploaded; only its hash goes on-chain.
    pub async fn record_document_upload(
        &self,
        document_id: &str,
        batch_id: &str,
        document_type: &str,
        content_hash: &str,
    ) -> Result<String, LedgerError> {
        self.record(EventEnvelope::new(
            "document_upload",
            document_id,
            "document",
            json!({
                "batch_id": batch_id,
                "document_type": document_type,
                "content_hash": content_hash,
            }),
        ))
        .await
    }

    /// A risk assessment was computed for a workflow.
    pub async fn record_risk_assessment(
        &self,
        workflow_id: &str,
        overall_score: f64,
        classification: &str,
        factors: Value,
    ) -> Result<String, LedgerError> {
        self.record(EventEnvelope::new(
            "risk_assessment",
            workflow_id,
            "workflow",
            json!({
                "overall_score": overall_score,
                "classification": classification,
                "factors": factors,
            }),
        ))
        .await
    }

    /// A supply-chain stage event (collection, consolidation, processing,
    /// shipment). Entity type `stage_event` lets the queue back-fill the
    /// owning record's ledger reference after a delayed replay.
    pub async fn record_supply_chain_event(
        &self,
        event: &StageEvent,
    ) -> Result<String, LedgerError> {
        self.record(EventEnvelope::new(
            "supply_chain_event",
            event.id.clone(),
            "stage_event",
            json!({
                "workflow_id": event.workflow_id,
                "kind": event.kind.as_str(),
                "from_actor": event.from_actor,
                "to_actor": event.to_actor,
                "quantity_kg": event.quantity_kg,
                "event_date": event.event_date,
            }),
        ))
        .await
    }

    /// A production unit passed (or failed) geolocation verification.
    pub async fn record_unit_verification(
        &self,
        unit_id: &str,
        workflow_id: &str,
        verified: bool,
        method: &str,
    ) -> Result<String, LedgerError> {
        self.record(EventEnvelope::new(
            "unit_verification",
            unit_id,
            "production_unit",
            json!({
                "workflow_id": workflow_id,
                "verified": verified,
                "method": method,
            }),
        ))
        .await
    }

    /// A deforestation alert was raised against a production unit.
    pub async fn record_deforestation_alert(
        &self,
        alert_id: &str,
        unit_id: &str,
        workflow_id: &str,
        severity: &str,
    ) -> Result<String, LedgerError> {
        self.record(EventEnvelope::new(
            "deforestation_alert",
            alert_id,
            "alert",
            json!({
                "unit_id": unit_id,
                "workflow_id": workflow_id,
                "severity": severity,
            }),
        ))
        .await
    }

    /// A batch moved between statuses (stage advance, revert, completion).
    pub async fn record_batch_status_change(
        &self,
        batch_id: &str,
        old_status: &str,
        new_status: &str,
        changed_by: &str,
    ) -> Result<String, LedgerError> {
        self.record(EventEnvelope::new(
            "batch_status_change",
            batch_id,
            "batch",
            json!({
                "old_status": old_status,
                "new_status": new_status,
                "changed_by": changed_by,
            }),
        ))
        .await
    }

    /// Custody of a batch moved between actors.
    pub async fn record_batch_transfer(
        &self,
        batch_id: &str,
        from_actor: &str,
        to_actor: &str,
        quantity_kg: f64,
    ) -> Result<String, LedgerError> {
        self.record(EventEnvelope::new(
            "batch_transfer",
            batch_id,
            "batch",
            json!({
                "from_actor": from_actor,
                "to_actor": to_actor,
                "quantity_kg": quantity_kg,
            }),
        ))
        .await
    }

    /// A free-form audit event.
    pub async fn record_audit_event(
        &self,
        entity_id: &str,
        entity_type: &str,
        action: &str,
        details: Value,
    ) -> Result<String, LedgerError> {
        self.record(EventEnvelope::new(
            "audit_event",
            entity_id,
            entity_type,
            json!({
                "action": action,
                "details": details,
            }),
        ))
        .await
    }

    /// A supply-chain actor was registered, updated, or deactivated.
    pub async fn record_actor_lifecycle(
        &self,
        actor_id: &str,
        role: &str,
        action: &str,
    ) -> Result<String, LedgerError> {
        self.record(EventEnvelope::new(
            "actor_lifecycle",
            actor_id,
            "actor",
            json!({
                "role": role,
                "action": action,
            }),
        ))
        .await
    }

    /// A mitigation workflow was created or completed.
    pub async fn record_mitigation_workflow(
        &self,
        workflow_id: &str,
        batch_id: &str,
        action: &str,
        risk_level: &str,
    ) -> Result<String, LedgerError> {
        self.record(EventEnvelope::new(
            "mitigation_workflow",
            workflow_id,
            "mitigation_workflow",
            json!({
                "batch_id": batch_id,
                "action": action,
                "risk_level": risk_level,
            }),
        ))
        .await
    }

    /// A mitigation action changed status; old and new are both recorded.
    pub async fn record_mitigation_action(
        &self,
        action_id: &str,
        workflow_id: &str,
        old_status: &str,
        new_status: &str,
        updated_by: &str,
    ) -> Result<String, LedgerError> {
        self.record(EventEnvelope::new(
            "mitigation_action",
            action_id,
            "mitigation_action",
            json!({
                "workflow_id": workflow_id,
                "old_status": old_status,
                "new_status": new_status,
                "updated_by": updated_by,
            }),
        ))
        .await
    }

    /// A compliance certificate was minted; full compliance data rides here
    /// because on-chain metadata is capped at 100 bytes.
    pub async fn record_certificate_issued(
        &self,
        workflow_id: &str,
        serial: u64,
        holder_account: &str,
        compliance_data: Value,
    ) -> Result<String, LedgerError> {
        self.record(EventEnvelope::new(
            "certificate_issued",
            workflow_id,
            "certificate",
            json!({
                "serial": serial,
                "holder_account": holder_account,
                "compliance_data": compliance_data,
            }),
        ))
        .await
    }

    /// A certificate moved along the supply chain.
    pub async fn record_certificate_transferred(
        &self,
        collection_id: &str,
        serial: u64,
        from_account: &str,
        to_account: &str,
    ) -> Result<String, LedgerError> {
        self.record(EventEnvelope::new(
            "certificate_transferred",
            collection_id,
            "certificate",
            json!({
                "serial": serial,
                "from_account": from_account,
                "to_account": to_account,
            }),
        ))
        .await
    }

    /// A certificate holder was frozen or unfrozen; freezes carry a reason.
    pub async fn record_certificate_freeze(
        &self,
        account: &str,
        frozen: bool,
        reason: Option<&str>,
    ) -> Result<String, LedgerError> {
        self.record(EventEnvelope::new(
            "certificate_freeze",
            account,
            "certificate_holder",
            json!({
                "frozen": frozen,
                "reason": reason,
            }),
        ))
        .await
    }
}

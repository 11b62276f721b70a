//! ComplianceEngine - the ten-stage workflow orchestrator.
//!
//! Holds the workflows, evaluates stage requirements against domain state,
//! and runs the automated actions on stage entry. Domain facts are always
//! persisted before any ledger attempt; ledger recording is either
//! fire-and-forget (stage events) or best-effort (stage transitions,
//! assessments). The one deliberate synchronous ledger dependency is
//! certificate issuance when entering the terminal stage.

use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use ledger::certificate::CertificateIssuer;
use ledger::facade::AsyncRecorder;
use ledger::recorder::ConsensusRecorder;
use provenance::digest;
use provenance::events::{EventKind, StageEvent};
use provenance::store::EventStore;
use provenance::types::ProduceType;

use crate::config::ComplianceConfig;
use crate::mitigation::MitigationService;
use crate::risk::RiskAssessor;
use crate::stages::{self, AutomatedAction, Requirement, Stage, FINAL_STAGE, STAGE_COUNT};
use crate::types::{
    AdvancementResult, CertificateRecord, ComplianceError, ComplianceWorkflow,
    DeforestationAlert, DdsDocument, Result, RiskAssessmentResult, RiskLevel, ValidationItem,
    ValidationResult, WorkflowProgress, WorkflowStatus,
};

/// Orchestrates compliance workflows through the stage table.
pub struct ComplianceEngine {
    events: Arc<dyn EventStore>,
    recorder: Arc<ConsensusRecorder>,
    async_recorder: Arc<AsyncRecorder>,
    issuer: Arc<CertificateIssuer>,
    mitigation: Arc<MitigationService>,
    assessor: RiskAssessor,
    workflows: DashMap<String, ComplianceWorkflow>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ComplianceEngine {
    /// Wire up an engine.
    pub fn new(
        events: Arc<dyn EventStore>,
        recorder: Arc<ConsensusRecorder>,
        async_recorder: Arc<AsyncRecorder>,
        issuer: Arc<CertificateIssuer>,
        mitigation: Arc<MitigationService>,
        config: ComplianceConfig,
    ) -> Self {
        Self {
            events,
            recorder,
            async_recorder,
            issuer,
            mitigation,
            assessor: RiskAssessor::new(config.risk),
            workflows: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    fn workflow(&self, workflow_id: &str) -> Result<ComplianceWorkflow> {
        self.workflows
            .get(workflow_id)
            .map(|w| w.clone())
            .ok_or_else(|| ComplianceError::WorkflowNotFound(workflow_id.to_string()))
    }

    fn with_workflow_mut<R>(
        &self,
        workflow_id: &str,
        apply: impl FnOnce(&mut ComplianceWorkflow) -> R,
    ) -> Result<R> {
        let mut workflow = self
            .workflows
            .get_mut(workflow_id)
            .ok_or_else(|| ComplianceError::WorkflowNotFound(workflow_id.to_string()))?;
        Ok(apply(&mut workflow))
    }

    // Writes to one workflow are serialized so a gate check and its commit
    // observe the same state.
    fn workflow_lock(&self, workflow_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(workflow_id.to_string())
            .or_default()
            .clone()
    }

    /// Create a workflow at stage 1 and record the batch on the ledger.
    pub async fn create_workflow(
        &self,
        batch_id: &str,
        produce_type: ProduceType,
        origin_country: &str,
        declared_quantity_kg: f64,
    ) -> Result<ComplianceWorkflow> {
        let workflow = ComplianceWorkflow::new(batch_id, produce_type, origin_country);
        self.workflows.insert(workflow.id.clone(), workflow.clone());
        info!(
            workflow_id = %workflow.id,
            batch_id,
            produce = produce_type.as_str(),
            origin_country,
            "Compliance workflow created"
        );

        if let Err(error) = self
            .recorder
            .record_batch_creation(batch_id, produce_type.as_str(), declared_quantity_kg, origin_country)
            .await
        {
            warn!(batch_id, error = %error, "Could not record batch creation");
        }
        Ok(workflow)
    }

    /// A workflow by ID.
    pub fn get_workflow(&self, workflow_id: &str) -> Result<ComplianceWorkflow> {
        self.workflow(workflow_id)
    }

    // --- domain operations feeding the stage gates ---

    async fn record_stage_event(
        &self,
        workflow_id: &str,
        kind: EventKind,
        from_actor: &str,
        to_actor: &str,
        quantity_kg: f64,
        event_date: NaiveDate,
    ) -> Result<StageEvent> {
        let lock = self.workflow_lock(workflow_id);
        let _guard = lock.lock().await;

        let workflow = self.workflow(workflow_id)?;
        if workflow.status != WorkflowStatus::Active {
            return Err(ComplianceError::InvalidTransition(format!(
                "workflow {} is {}",
                workflow_id,
                workflow.status.as_str()
            )));
        }
        if quantity_kg <= 0.0 {
            return Err(ComplianceError::InvalidQuantity(format!(
                "{} quantity must be positive, got {}",
                kind.as_str(),
                quantity_kg
            )));
        }

        // A stage never hands on more than the previous stage produced.
        if let Some(feeds_from) = kind.consumes() {
            let available = self.events.totals(workflow_id).await.available(feeds_from);
            if quantity_kg > available {
                return Err(ComplianceError::InvalidQuantity(format!(
                    "{} of {} kg exceeds the {} kg available from {}",
                    kind.as_str(),
                    quantity_kg,
                    available,
                    feeds_from.as_str()
                )));
            }
        }

        let event = StageEvent::new(workflow_id, kind, from_actor, to_actor, quantity_kg, event_date);
        self.events.save(event.clone()).await?;
        // Ledger recording happens off the critical path.
        self.async_recorder.record_event(event.clone());
        Ok(event)
    }

    /// A production unit delivered to an aggregator.
    pub async fn record_collection(
        &self,
        workflow_id: &str,
        unit_id: &str,
        aggregator_id: &str,
        quantity_kg: f64,
        event_date: NaiveDate,
    ) -> Result<StageEvent> {
        self.record_stage_event(workflow_id, EventKind::Collection, unit_id, aggregator_id, quantity_kg, event_date)
            .await
    }

    /// An aggregator consolidated toward a processor.
    pub async fn record_consolidation(
        &self,
        workflow_id: &str,
        aggregator_id: &str,
        processor_id: &str,
        quantity_kg: f64,
        event_date: NaiveDate,
    ) -> Result<StageEvent> {
        self.record_stage_event(workflow_id, EventKind::Consolidation, aggregator_id, processor_id, quantity_kg, event_date)
            .await
    }

    /// A processor handed over to the exporter.
    pub async fn record_processing(
        &self,
        workflow_id: &str,
        processor_id: &str,
        exporter_id: &str,
        quantity_kg: f64,
        event_date: NaiveDate,
    ) -> Result<StageEvent> {
        self.record_stage_event(workflow_id, EventKind::Processing, processor_id, exporter_id, quantity_kg, event_date)
            .await
    }

    /// The exporter shipped to an importer.
    pub async fn record_shipment(
        &self,
        workflow_id: &str,
        exporter_id: &str,
        importer_id: &str,
        quantity_kg: f64,
        event_date: NaiveDate,
    ) -> Result<StageEvent> {
        self.record_stage_event(workflow_id, EventKind::Shipment, exporter_id, importer_id, quantity_kg, event_date)
            .await
    }

    /// Mark every production unit of the workflow as verified.
    pub async fn mark_units_verified(
        &self,
        workflow_id: &str,
        unit_ids: &[&str],
        method: &str,
    ) -> Result<()> {
        self.with_workflow_mut(workflow_id, |workflow| {
            workflow.units_verified = true;
            workflow.audit_entry("units_verified", format!("{} unit(s), {}", unit_ids.len(), method));
        })?;

        for unit_id in unit_ids {
            if let Err(error) = self
                .recorder
                .record_unit_verification(unit_id, workflow_id, true, method)
                .await
            {
                warn!(unit_id = %unit_id, error = %error, "Could not record unit verification");
            }
        }
        Ok(())
    }

    /// Mark the required documentation as complete.
    pub fn mark_documents_complete(&self, workflow_id: &str) -> Result<()> {
        self.with_workflow_mut(workflow_id, |workflow| {
            workflow.documents_complete = true;
            workflow.audit_entry("documents_complete", "required documentation complete");
        })
    }

    /// Raise a deforestation alert against a production unit.
    pub async fn record_deforestation_alert(
        &self,
        workflow_id: &str,
        unit_id: &str,
        severity: &str,
    ) -> Result<DeforestationAlert> {
        let alert = DeforestationAlert {
            id: uuid::Uuid::new_v4().to_string(),
            unit_id: unit_id.to_string(),
            severity: severity.to_string(),
            raised_at: Utc::now(),
        };
        self.with_workflow_mut(workflow_id, |workflow| {
            workflow.alerts.push(alert.clone());
            workflow.audit_entry("deforestation_alert", format!("unit {}, severity {}", unit_id, severity));
        })?;

        if let Err(error) = self
            .recorder
            .record_deforestation_alert(&alert.id, unit_id, workflow_id, severity)
            .await
        {
            warn!(alert_id = %alert.id, error = %error, "Could not record deforestation alert");
        }
        Ok(alert)
    }

    /// The importer confirmed receipt of the batch.
    pub fn confirm_import(&self, workflow_id: &str, importer_account: &str) -> Result<()> {
        self.with_workflow_mut(workflow_id, |workflow| {
            workflow.import_confirmed = true;
            workflow.importer_account = Some(importer_account.to_string());
            workflow.audit_entry("import_confirmed", format!("importer account {}", importer_account));
        })
    }

    /// Run a risk assessment; MEDIUM and HIGH trigger a mitigation workflow
    /// seeded with the recommended actions.
    pub async fn trigger_risk_assessment(&self, workflow_id: &str) -> Result<RiskAssessmentResult> {
        let workflow = self.workflow(workflow_id)?;
        let totals = self.events.totals(workflow_id).await;
        let result = self.assessor.assess(&workflow, &totals);

        self.with_workflow_mut(workflow_id, |workflow| {
            workflow.risk = Some(result.clone());
            workflow.audit_entry(
                "risk_assessed",
                format!("score {:.2}, {}", result.overall_score, result.classification.as_str()),
            );
        })?;

        if let Err(error) = self
            .recorder
            .record_risk_assessment(
                workflow_id,
                result.overall_score,
                result.classification.as_str(),
                json!(result.factors),
            )
            .await
        {
            warn!(workflow_id, error = %error, "Could not record risk assessment");
        }

        if result.classification >= RiskLevel::Medium {
            // One open mitigation workflow per batch is enough.
            if self.mitigation.all_completed_for_batch(&workflow.batch_id) {
                self.mitigation
                    .create_workflow(
                        &workflow.batch_id,
                        result.classification,
                        result.recommended_actions.clone(),
                        "risk-assessor",
                    )
                    .await?;
            }
            self.with_workflow_mut(workflow_id, |workflow| {
                if workflow.status == WorkflowStatus::Active {
                    workflow.status = WorkflowStatus::Blocked;
                    workflow.audit_entry(
                        "workflow_blocked",
                        format!("{} risk, open mitigations", result.classification.as_str()),
                    );
                }
            })?;
        }
        Ok(result)
    }

    // --- stage machine ---

    /// Evaluate the requirements for entering a stage.
    pub async fn validate_stage_requirements(
        &self,
        workflow_id: &str,
        stage_order: u8,
    ) -> Result<ValidationResult> {
        let workflow = self.workflow(workflow_id)?;
        let stage = stages::by_order(stage_order)
            .ok_or_else(|| ComplianceError::UnknownStage(stage_order.to_string()))?;
        let totals = self.events.totals(workflow_id).await;

        let items = stage
            .requirements
            .iter()
            .map(|requirement| {
                let (passed, details) = match requirement {
                    Requirement::EventsRecorded(kind) => {
                        let count = totals.count(*kind);
                        let quantity = totals.quantity(*kind);
                        (
                            count > 0 && quantity > 0.0,
                            format!("{} event(s), {} kg recorded", count, quantity),
                        )
                    }
                    Requirement::QuantityWithinPredecessor(kind) => match kind.consumes() {
                        Some(feeds_from) => {
                            let used = totals.quantity(*kind);
                            let produced = totals.quantity(feeds_from);
                            (
                                used <= produced,
                                format!("{} kg used of {} kg produced", used, produced),
                            )
                        }
                        None => (true, "no predecessor stage".to_string()),
                    },
                    Requirement::DocumentsComplete => (
                        workflow.documents_complete,
                        format!("documents complete: {}", workflow.documents_complete),
                    ),
                    Requirement::UnitsVerified => (
                        workflow.units_verified,
                        format!("units verified: {}", workflow.units_verified),
                    ),
                    Requirement::RiskAssessed => (
                        workflow.risk.is_some(),
                        match workflow.risk_level() {
                            Some(level) => format!("assessed as {}", level.as_str()),
                            None => "no assessment on record".to_string(),
                        },
                    ),
                    Requirement::RiskAcceptable => match workflow.risk_level() {
                        Some(RiskLevel::Low) => (true, "risk classified LOW".to_string()),
                        Some(level) => {
                            let done = self.mitigation.all_completed_for_batch(&workflow.batch_id);
                            (
                                done,
                                format!(
                                    "risk {}, mitigations complete: {}",
                                    level.as_str(),
                                    done
                                ),
                            )
                        }
                        None => (false, "no assessment on record".to_string()),
                    },
                    Requirement::ImportConfirmed => (
                        workflow.import_confirmed,
                        format!("import confirmed: {}", workflow.import_confirmed),
                    ),
                };
                ValidationItem {
                    requirement: requirement.describe(),
                    passed,
                    details,
                }
            })
            .collect();

        Ok(ValidationResult::from_items(items))
    }

    /// Run the automated actions of a stage being entered. Recording is
    /// best-effort; certificate issuance is not.
    async fn run_automated_actions(
        &self,
        workflow: &ComplianceWorkflow,
        entering: &Stage,
        advanced_by: &str,
    ) -> Result<Option<CertificateRecord>> {
        let mut certificate = None;

        for action in entering.automated {
            match action {
                AutomatedAction::RecordStageTransition => {
                    let from = stages::by_order(workflow.current_stage)
                        .map(|s| s.name)
                        .unwrap_or("unknown");
                    if let Err(error) = self
                        .recorder
                        .record_batch_status_change(&workflow.batch_id, from, entering.name, advanced_by)
                        .await
                    {
                        warn!(
                            workflow_id = %workflow.id,
                            error = %error,
                            "Could not record stage transition"
                        );
                    }
                }
                AutomatedAction::RecordRiskAssessment => {
                    if let Some(risk) = &workflow.risk {
                        if let Err(error) = self
                            .recorder
                            .record_risk_assessment(
                                &workflow.id,
                                risk.overall_score,
                                risk.classification.as_str(),
                                json!(risk.factors),
                            )
                            .await
                        {
                            warn!(
                                workflow_id = %workflow.id,
                                error = %error,
                                "Could not record risk assessment at stage entry"
                            );
                        }
                    }
                }
                AutomatedAction::IssueCertificate => {
                    // Deliberate synchronous ledger dependency: entering the
                    // terminal stage without a certificate is not allowed.
                    let holder = workflow.importer_account.as_deref().ok_or_else(|| {
                        ComplianceError::InvalidTransition(
                            "no importer account on record for certificate issuance".to_string(),
                        )
                    })?;
                    let totals = self.events.totals(&workflow.id).await;
                    let issued = self
                        .issuer
                        .issue_certificate(
                            &workflow.id,
                            holder,
                            json!({
                                "batch_id": workflow.batch_id,
                                "produce_type": workflow.produce_type.as_str(),
                                "origin_country": workflow.origin_country,
                                "risk_classification": workflow.risk_level().map(|l| l.as_str()),
                                "total_shipped_kg": totals.quantity(EventKind::Shipment),
                            }),
                        )
                        .await?;
                    certificate = Some(CertificateRecord {
                        serial: issued.serial,
                        collection_id: issued.collection_id,
                        transaction_ref: issued.transaction_ref,
                        holder_account: holder.to_string(),
                    });
                }
            }
        }
        Ok(certificate)
    }

    /// Advance to the successor stage if its requirements are met.
    ///
    /// At the terminal stage this is a no-op success. Unmet requirements
    /// come back as blockers, not errors.
    pub async fn advance_to_next_stage(
        &self,
        workflow_id: &str,
        advanced_by: &str,
    ) -> Result<AdvancementResult> {
        // One advance at a time per workflow, so the automated actions of a
        // stage entry run exactly once.
        let lock = self.workflow_lock(workflow_id);
        let _guard = lock.lock().await;

        let workflow = self.workflow(workflow_id)?;

        let Some(next) = stages::successor(workflow.current_stage) else {
            return Ok(AdvancementResult {
                success: true,
                previous_stage: workflow.current_stage,
                current_stage: workflow.current_stage,
                message: "workflow is at the terminal stage".to_string(),
                blockers: vec![],
            });
        };

        let validation = self.validate_stage_requirements(workflow_id, next.order).await?;
        if !validation.all_met {
            return Ok(AdvancementResult {
                success: false,
                previous_stage: workflow.current_stage,
                current_stage: workflow.current_stage,
                message: format!(
                    "{} requirement(s) unmet for stage {}",
                    validation.failed_count, next.name
                ),
                blockers: validation.blockers(),
            });
        }

        // Automated actions run before the state change commits.
        let certificate = self.run_automated_actions(&workflow, next, advanced_by).await?;

        let previous = workflow.current_stage;
        let mitigations_clear = self.mitigation.all_completed_for_batch(&workflow.batch_id);
        self.with_workflow_mut(workflow_id, |workflow| {
            workflow.current_stage = next.order;
            if let Some(certificate) = certificate {
                workflow.certificate = Some(certificate);
            }
            if workflow.status == WorkflowStatus::Blocked && mitigations_clear {
                workflow.status = WorkflowStatus::Active;
                workflow.audit_entry("workflow_unblocked", "mitigations completed");
            }
            workflow.audit_entry(
                "stage_advanced",
                format!("{} -> {} by {}", previous, next.order, advanced_by),
            );
        })?;

        info!(
            workflow_id,
            from = previous,
            to = next.order,
            stage = next.name,
            "Workflow advanced"
        );
        Ok(AdvancementResult {
            success: true,
            previous_stage: previous,
            current_stage: next.order,
            message: format!("advanced to {}", next.name),
            blockers: vec![],
        })
    }

    /// Move back to the predecessor stage unconditionally. The reason goes
    /// to the local audit trail only.
    pub fn revert_to_previous_stage(
        &self,
        workflow_id: &str,
        reason: &str,
    ) -> Result<AdvancementResult> {
        let workflow = self.workflow(workflow_id)?;

        let Some(previous) = stages::predecessor(workflow.current_stage) else {
            return Ok(AdvancementResult {
                success: false,
                previous_stage: workflow.current_stage,
                current_stage: workflow.current_stage,
                message: "already at the first stage".to_string(),
                blockers: vec![],
            });
        };

        let from = workflow.current_stage;
        self.with_workflow_mut(workflow_id, |workflow| {
            workflow.current_stage = previous.order;
            workflow.audit_entry("stage_reverted", format!("{} -> {}: {}", from, previous.order, reason));
        })?;

        info!(workflow_id, from, to = previous.order, reason, "Workflow reverted");
        Ok(AdvancementResult {
            success: true,
            previous_stage: from,
            current_stage: previous.order,
            message: format!("reverted to {}", previous.name),
            blockers: vec![],
        })
    }

    /// Generate the due-diligence statement and complete the workflow.
    /// Only available at the terminal stage.
    pub async fn generate_dds(&self, workflow_id: &str) -> Result<DdsDocument> {
        let workflow = self.workflow(workflow_id)?;
        if workflow.current_stage != FINAL_STAGE {
            return Err(ComplianceError::InvalidTransition(format!(
                "due-diligence statement requires stage {}, workflow is at {}",
                FINAL_STAGE, workflow.current_stage
            )));
        }

        let totals = self.events.totals(workflow_id).await;
        let chain = self.events.by_workflow(workflow_id).await;
        let generated_at = Utc::now();

        let content = json!({
            "workflow_id": workflow.id,
            "batch_id": workflow.batch_id,
            "produce_type": workflow.produce_type.as_str(),
            "origin_country": workflow.origin_country,
            "total_collected_kg": totals.quantity(EventKind::Collection),
            "total_shipped_kg": totals.quantity(EventKind::Shipment),
            "event_count": chain.len(),
            "risk_classification": workflow.risk_level().map(|l| l.as_str()),
            "certificate_ref": workflow.certificate.as_ref().map(|c| c.transaction_ref.clone()),
            "generated_at": generated_at,
        });

        let dds = DdsDocument {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow.id.clone(),
            batch_id: workflow.batch_id.clone(),
            produce_type: workflow.produce_type,
            origin_country: workflow.origin_country.clone(),
            total_collected_kg: totals.quantity(EventKind::Collection),
            total_shipped_kg: totals.quantity(EventKind::Shipment),
            event_count: chain.len(),
            risk_classification: workflow.risk_level(),
            certificate_ref: workflow.certificate.as_ref().map(|c| c.transaction_ref.clone()),
            generated_at,
            content_hash: digest::hash_value(&content),
        };

        self.with_workflow_mut(workflow_id, |workflow| {
            workflow.dds = Some(dds.clone());
            workflow.status = WorkflowStatus::Completed;
            workflow.audit_entry("dds_generated", dds.content_hash.clone());
        })?;

        if let Err(error) = self
            .recorder
            .record_batch_status_change(&workflow.batch_id, "ACTIVE", "COMPLETED", "system")
            .await
        {
            warn!(workflow_id, error = %error, "Could not record workflow completion");
        }

        info!(workflow_id, hash = %dds.content_hash, "Due-diligence statement generated");
        Ok(dds)
    }

    /// The stage a workflow currently sits in.
    pub fn get_current_stage(&self, workflow_id: &str) -> Result<&'static Stage> {
        let workflow = self.workflow(workflow_id)?;
        stages::by_order(workflow.current_stage)
            .ok_or_else(|| ComplianceError::UnknownStage(workflow.current_stage.to_string()))
    }

    /// Progress snapshot for a workflow.
    pub async fn get_progress(&self, workflow_id: &str) -> Result<WorkflowProgress> {
        let workflow = self.workflow(workflow_id)?;
        let stage = stages::by_order(workflow.current_stage)
            .ok_or_else(|| ComplianceError::UnknownStage(workflow.current_stage.to_string()))?;
        let totals = self.events.totals(workflow_id).await;

        let completed_stages = if workflow.status == WorkflowStatus::Completed {
            STAGE_COUNT
        } else {
            workflow.current_stage - 1
        };

        let kinds = [
            EventKind::Collection,
            EventKind::Consolidation,
            EventKind::Processing,
            EventKind::Shipment,
        ];
        let quantities_kg = json!(kinds
            .iter()
            .map(|k| (k.as_str(), totals.quantity(*k)))
            .collect::<std::collections::HashMap<_, _>>());
        let event_counts = json!(kinds
            .iter()
            .map(|k| (k.as_str(), totals.count(*k)))
            .collect::<std::collections::HashMap<_, _>>());

        Ok(WorkflowProgress {
            workflow_id: workflow.id,
            current_stage: workflow.current_stage,
            current_stage_name: stage.name.to_string(),
            total_stages: STAGE_COUNT,
            completed_stages,
            percent_complete: completed_stages as f64 / STAGE_COUNT as f64 * 100.0,
            quantities_kg,
            event_counts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MitigationConfig;
    use crate::mitigation::MitigationStatus;
    use ledger::client::{LedgerClient, LedgerConfig};
    use ledger::network::mock::MockLedgerNetwork;
    use ledger::network::traits::LedgerNetwork;
    use ledger::queue::TransactionQueue;
    use provenance::store::InMemoryEventStore;

    struct Harness {
        network: Arc<MockLedgerNetwork>,
        mitigation: Arc<MitigationService>,
        engine: ComplianceEngine,
    }

    fn harness() -> Harness {
        let network = Arc::new(MockLedgerNetwork::new());
        let ledger_config = LedgerConfig {
            max_attempts: 1,
            base_backoff_ms: 1,
            max_backoff_ms: 1,
            ..LedgerConfig::new("treasury", "test-key")
        };
        let client = Arc::new(LedgerClient::new(Arc::clone(&network) as _, ledger_config).unwrap());
        let events: Arc<InMemoryEventStore> = Arc::new(InMemoryEventStore::new());
        let queue = Arc::new(TransactionQueue::new(
            Arc::clone(&client),
            Arc::clone(&events) as _,
        ));
        let recorder = Arc::new(ConsensusRecorder::new(
            Arc::clone(&client),
            queue,
            "0.0.7777",
        ));
        let async_recorder = Arc::new(AsyncRecorder::new(
            Arc::clone(&recorder),
            Arc::clone(&events) as _,
        ));
        let issuer = Arc::new(CertificateIssuer::new(
            client,
            Arc::clone(&recorder),
            "Canopy Compliance",
            "CNPY",
        ));
        let mitigation = Arc::new(MitigationService::new(
            Arc::clone(&recorder),
            MitigationConfig::default(),
        ));
        let engine = ComplianceEngine::new(
            events,
            recorder,
            async_recorder,
            issuer,
            Arc::clone(&mitigation),
            ComplianceConfig::default(),
        );
        Harness { network, mitigation, engine }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 10).unwrap()
    }

    async fn workflow(h: &Harness, country: &str) -> ComplianceWorkflow {
        h.engine
            .create_workflow("batch-1", ProduceType::Coffee, country, 1000.0)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_validation_blocks_without_collection_events() {
        let h = harness();
        let wf = workflow(&h, "ET").await;

        // Nothing recorded yet: stage 2 entry must fail on the collection
        // requirement.
        let validation = h.engine.validate_stage_requirements(&wf.id, 2).await.unwrap();
        assert!(!validation.all_met);
        assert_eq!(validation.failed_count, 1);
        assert!(validation.blockers()[0].contains("collection"));

        let result = h.engine.advance_to_next_stage(&wf.id, "officer-1").await.unwrap();
        assert!(!result.success);
        assert_eq!(result.current_stage, 1);
        assert!(!result.blockers.is_empty());
    }

    #[tokio::test]
    async fn test_advance_succeeds_after_collection_event() {
        let h = harness();
        let wf = workflow(&h, "ET").await;

        h.engine
            .record_collection(&wf.id, "unit-1", "agg-1", 100.0, date())
            .await
            .unwrap();

        let result = h.engine.advance_to_next_stage(&wf.id, "officer-1").await.unwrap();
        assert!(result.success);
        assert_eq!(result.previous_stage, 1);
        assert_eq!(result.current_stage, 2);
        assert!(result.blockers.is_empty());
    }

    #[tokio::test]
    async fn test_quantities_cannot_exceed_previous_stage() {
        let h = harness();
        let wf = workflow(&h, "ET").await;
        h.engine
            .record_collection(&wf.id, "unit-1", "agg-1", 100.0, date())
            .await
            .unwrap();

        let error = h.engine
            .record_consolidation(&wf.id, "agg-1", "proc-1", 150.0, date())
            .await
            .unwrap_err();
        assert!(matches!(error, ComplianceError::InvalidQuantity(_)));

        let error = h.engine
            .record_collection(&wf.id, "unit-1", "agg-1", -5.0, date())
            .await
            .unwrap_err();
        assert!(matches!(error, ComplianceError::InvalidQuantity(_)));
    }

    #[tokio::test]
    async fn test_high_risk_triggers_mitigation_and_gates_shipment() {
        let h = harness();
        let wf = workflow(&h, "ID").await;
        h.engine
            .record_deforestation_alert(&wf.id, "unit-1", "high")
            .await
            .unwrap();
        h.engine
            .record_deforestation_alert(&wf.id, "unit-2", "high")
            .await
            .unwrap();

        let result = h.engine.trigger_risk_assessment(&wf.id).await.unwrap();
        assert_eq!(result.classification, RiskLevel::High);

        // Elevated risk with open mitigations blocks the workflow.
        let stored = h.engine.get_workflow(&wf.id).unwrap();
        assert_eq!(stored.status, WorkflowStatus::Blocked);

        // Assessment seeded a PENDING mitigation workflow with actions.
        let created = h.mitigation.by_batch("batch-1");
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].status, MitigationStatus::Pending);
        let actions = h.mitigation.actions_for(&created[0].id);
        assert!(!actions.is_empty());

        // Shipment entry is blocked until the mitigation completes.
        let validation = h.engine.validate_stage_requirements(&wf.id, 8).await.unwrap();
        assert!(!validation.all_met);

        for action in &actions {
            h.mitigation
                .update_action_status(&action.id, MitigationStatus::Completed, None, "field-1")
                .await
                .unwrap();
        }
        h.mitigation
            .complete_workflow(&created[0].id, "remediated", "officer-1")
            .await
            .unwrap();

        let validation = h.engine.validate_stage_requirements(&wf.id, 8).await.unwrap();
        assert!(validation.all_met);
    }

    #[tokio::test]
    async fn test_blocked_workflow_clears_once_mitigation_completes() {
        let h = harness();
        let wf = workflow(&h, "ID").await;
        let id = wf.id.clone();

        h.engine.record_collection(&id, "unit-1", "agg-1", 100.0, date()).await.unwrap();
        h.engine.advance_to_next_stage(&id, "op").await.unwrap(); // -> 2
        h.engine.record_consolidation(&id, "agg-1", "proc-1", 80.0, date()).await.unwrap();
        h.engine.advance_to_next_stage(&id, "op").await.unwrap(); // -> 3
        h.engine.record_processing(&id, "proc-1", "exp-1", 70.0, date()).await.unwrap();
        h.engine.advance_to_next_stage(&id, "op").await.unwrap(); // -> 4
        h.engine.mark_documents_complete(&id).unwrap();
        h.engine.advance_to_next_stage(&id, "op").await.unwrap(); // -> 5
        h.engine.mark_units_verified(&id, &["unit-1"], "satellite").await.unwrap();
        h.engine.advance_to_next_stage(&id, "op").await.unwrap(); // -> 6

        // Origin risk plus one high alert over a complete chain: MEDIUM.
        h.engine.record_deforestation_alert(&id, "unit-1", "high").await.unwrap();
        let risk = h.engine.trigger_risk_assessment(&id).await.unwrap();
        assert_eq!(risk.classification, RiskLevel::Medium);
        assert_eq!(h.engine.get_workflow(&id).unwrap().status, WorkflowStatus::Blocked);

        // Blocked workflows accept no new stage events.
        let error = h.engine
            .record_shipment(&id, "exp-1", "imp-1", 50.0, date())
            .await
            .unwrap_err();
        assert!(matches!(error, ComplianceError::InvalidTransition(_)));

        // Entering risk_mitigation only needs an assessment on record; the
        // workflow stays blocked while mitigations are open.
        assert!(h.engine.advance_to_next_stage(&id, "op").await.unwrap().success); // -> 7
        assert_eq!(h.engine.get_workflow(&id).unwrap().status, WorkflowStatus::Blocked);
        assert!(!h.engine.advance_to_next_stage(&id, "op").await.unwrap().success);

        let created = h.mitigation.by_batch("batch-1");
        for action in h.mitigation.actions_for(&created[0].id) {
            h.mitigation
                .update_action_status(&action.id, MitigationStatus::Completed, None, "field-1")
                .await
                .unwrap();
        }
        h.mitigation
            .complete_workflow(&created[0].id, "remediated", "officer-1")
            .await
            .unwrap();

        assert!(h.engine.advance_to_next_stage(&id, "op").await.unwrap().success); // -> 8
        let stored = h.engine.get_workflow(&id).unwrap();
        assert_eq!(stored.status, WorkflowStatus::Active);
        assert!(stored.audit.iter().any(|e| e.action == "workflow_unblocked"));

        // Active again: shipment recording works.
        h.engine.record_shipment(&id, "exp-1", "imp-1", 50.0, date()).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_terminal_advances_issue_one_certificate() {
        let h = harness();
        let wf = workflow(&h, "ET").await;
        let id = wf.id.clone();

        h.engine.record_collection(&id, "unit-1", "agg-1", 100.0, date()).await.unwrap();
        h.engine.advance_to_next_stage(&id, "op").await.unwrap(); // -> 2
        h.engine.record_consolidation(&id, "agg-1", "proc-1", 80.0, date()).await.unwrap();
        h.engine.advance_to_next_stage(&id, "op").await.unwrap(); // -> 3
        h.engine.record_processing(&id, "proc-1", "exp-1", 70.0, date()).await.unwrap();
        h.engine.advance_to_next_stage(&id, "op").await.unwrap(); // -> 4
        h.engine.mark_documents_complete(&id).unwrap();
        h.engine.advance_to_next_stage(&id, "op").await.unwrap(); // -> 5
        h.engine.mark_units_verified(&id, &["unit-1"], "satellite").await.unwrap();
        h.engine.advance_to_next_stage(&id, "op").await.unwrap(); // -> 6
        h.engine.trigger_risk_assessment(&id).await.unwrap();
        h.engine.advance_to_next_stage(&id, "op").await.unwrap(); // -> 7
        h.engine.advance_to_next_stage(&id, "op").await.unwrap(); // -> 8
        h.engine.record_shipment(&id, "exp-1", "imp-1", 60.0, date()).await.unwrap();
        h.engine.advance_to_next_stage(&id, "op").await.unwrap(); // -> 9
        h.engine.confirm_import(&id, "0.0.2002").unwrap();

        // Slow network widens the window; both advances race the terminal
        // entry and its certificate issuance.
        h.network.set_delay(std::time::Duration::from_millis(10));
        let (a, b) = tokio::join!(
            h.engine.advance_to_next_stage(&id, "op-a"),
            h.engine.advance_to_next_stage(&id, "op-b")
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        // One advance moved 9 -> 10; the other saw the terminal stage.
        assert!(a.success && b.success);
        let crossed = [&a, &b]
            .iter()
            .filter(|r| r.previous_stage == 9 && r.current_stage == FINAL_STAGE)
            .count();
        assert_eq!(crossed, 1);

        let stored = h.engine.get_workflow(&id).unwrap();
        let certificate = stored.certificate.unwrap();
        assert_eq!(certificate.serial, 1);
        assert_eq!(
            h.network
                .nft_balance(&certificate.collection_id, "0.0.2002")
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_concurrent_consolidations_cannot_overdraw() {
        let h = harness();
        let wf = workflow(&h, "ET").await;
        let id = wf.id.clone();
        h.engine.record_collection(&id, "unit-1", "agg-1", 100.0, date()).await.unwrap();

        // 80 + 80 against 100 collected: exactly one may pass.
        let (a, b) = tokio::join!(
            h.engine.record_consolidation(&id, "agg-1", "proc-1", 80.0, date()),
            h.engine.record_consolidation(&id, "agg-2", "proc-1", 80.0, date())
        );
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);

        let progress = h.engine.get_progress(&id).await.unwrap();
        assert_eq!(progress.quantities_kg["consolidation"], 80.0);
    }

    #[tokio::test]
    async fn test_full_journey_to_due_diligence() {
        let h = harness();
        let wf = workflow(&h, "ET").await;
        let id = wf.id.clone();

        h.engine.record_collection(&id, "unit-1", "agg-1", 100.0, date()).await.unwrap();
        assert!(h.engine.advance_to_next_stage(&id, "op").await.unwrap().success); // -> 2

        h.engine.record_consolidation(&id, "agg-1", "proc-1", 80.0, date()).await.unwrap();
        assert!(h.engine.advance_to_next_stage(&id, "op").await.unwrap().success); // -> 3

        h.engine.record_processing(&id, "proc-1", "exp-1", 70.0, date()).await.unwrap();
        assert!(h.engine.advance_to_next_stage(&id, "op").await.unwrap().success); // -> 4

        h.engine.mark_documents_complete(&id).unwrap();
        assert!(h.engine.advance_to_next_stage(&id, "op").await.unwrap().success); // -> 5

        h.engine.mark_units_verified(&id, &["unit-1"], "satellite").await.unwrap();
        assert!(h.engine.advance_to_next_stage(&id, "op").await.unwrap().success); // -> 6

        let risk = h.engine.trigger_risk_assessment(&id).await.unwrap();
        assert_eq!(risk.classification, RiskLevel::Low);
        assert!(h.engine.advance_to_next_stage(&id, "op").await.unwrap().success); // -> 7
        assert!(h.engine.advance_to_next_stage(&id, "op").await.unwrap().success); // -> 8

        h.engine.record_shipment(&id, "exp-1", "imp-1", 60.0, date()).await.unwrap();
        assert!(h.engine.advance_to_next_stage(&id, "op").await.unwrap().success); // -> 9

        h.engine.confirm_import(&id, "0.0.2002").unwrap();
        let result = h.engine.advance_to_next_stage(&id, "op").await.unwrap(); // -> 10
        assert!(result.success);
        assert_eq!(result.current_stage, FINAL_STAGE);

        // Entering the terminal stage issued the certificate.
        let stored = h.engine.get_workflow(&id).unwrap();
        let certificate = stored.certificate.unwrap();
        assert_eq!(certificate.serial, 1);
        assert_eq!(
            h.network
                .nft_balance(&certificate.collection_id, "0.0.2002")
                .await
                .unwrap(),
            1
        );

        let dds = h.engine.generate_dds(&id).await.unwrap();
        assert_eq!(dds.total_collected_kg, 100.0);
        assert_eq!(dds.total_shipped_kg, 60.0);
        assert_eq!(dds.risk_classification, Some(RiskLevel::Low));
        assert!(dds.certificate_ref.is_some());
        assert_eq!(dds.content_hash.len(), 64);

        let stored = h.engine.get_workflow(&id).unwrap();
        assert_eq!(stored.status, WorkflowStatus::Completed);

        // Terminal advance is a no-op success.
        let result = h.engine.advance_to_next_stage(&id, "op").await.unwrap();
        assert!(result.success);
        assert_eq!(result.previous_stage, FINAL_STAGE);
        assert_eq!(result.current_stage, FINAL_STAGE);
    }

    #[tokio::test]
    async fn test_dds_requires_terminal_stage() {
        let h = harness();
        let wf = workflow(&h, "ET").await;
        let error = h.engine.generate_dds(&wf.id).await.unwrap_err();
        assert!(matches!(error, ComplianceError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_revert_is_unconditional_and_audited() {
        let h = harness();
        let wf = workflow(&h, "ET").await;
        h.engine.record_collection(&wf.id, "unit-1", "agg-1", 100.0, date()).await.unwrap();
        h.engine.advance_to_next_stage(&wf.id, "op").await.unwrap();

        let result = h.engine
            .revert_to_previous_stage(&wf.id, "mislabeled batch")
            .unwrap();
        assert!(result.success);
        assert_eq!(result.previous_stage, 2);
        assert_eq!(result.current_stage, 1);

        let stored = h.engine.get_workflow(&wf.id).unwrap();
        assert!(stored
            .audit
            .iter()
            .any(|e| e.action == "stage_reverted" && e.detail.contains("mislabeled batch")));

        // First stage cannot revert further.
        let result = h.engine.revert_to_previous_stage(&wf.id, "again").unwrap();
        assert!(!result.success);
        assert_eq!(result.current_stage, 1);
    }

    #[tokio::test]
    async fn test_progress_reporting() {
        let h = harness();
        let wf = workflow(&h, "ET").await;
        h.engine.record_collection(&wf.id, "unit-1", "agg-1", 100.0, date()).await.unwrap();
        h.engine.advance_to_next_stage(&wf.id, "op").await.unwrap();

        let progress = h.engine.get_progress(&wf.id).await.unwrap();
        assert_eq!(progress.current_stage, 2);
        assert_eq!(progress.current_stage_name, "consolidation");
        assert_eq!(progress.completed_stages, 1);
        assert_eq!(progress.percent_complete, 10.0);
        assert_eq!(progress.quantities_kg["collection"], 100.0);
        assert_eq!(progress.event_counts["collection"], 1);
    }

    #[tokio::test]
    async fn test_unknown_workflow_is_an_error() {
        let h = harness();
        assert!(matches!(
            h.engine.get_workflow("missing"),
            Err(ComplianceError::WorkflowNotFound(_))
        ));
        assert!(matches!(
            h.engine.advance_to_next_stage("missing", "op").await,
            Err(ComplianceError::WorkflowNotFound(_))
        ));
    }
}

//! Risk-mitigation workflows.
//!
//! A secondary, per-batch state machine triggered when a risk assessment
//! classifies MEDIUM or HIGH. Actions move strictly forward through
//! PENDING, IN_PROGRESS, COMPLETED; the workflow itself cannot complete
//! while any action is open. Every lifecycle change is recorded on the
//! consensus topic; a ledger outage degrades to a queued record, never to
//! a failed domain operation.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use ledger::recorder::ConsensusRecorder;

use crate::config::MitigationConfig;
use crate::types::{ComplianceError, Result, RiskLevel};

/// Status of a mitigation workflow or action.
///
/// Overdue is not a status: it is derived from the due date by
/// [`MitigationAction::is_overdue`] so it can never go stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MitigationStatus {
    Pending,
    InProgress,
    Completed,
}

impl MitigationStatus {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MitigationStatus::Pending => "PENDING",
            MitigationStatus::InProgress => "IN_PROGRESS",
            MitigationStatus::Completed => "COMPLETED",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            MitigationStatus::Pending => 0,
            MitigationStatus::InProgress => 1,
            MitigationStatus::Completed => 2,
        }
    }

    /// Transitions are forward-only, no skipping backwards and no no-ops.
    pub fn can_transition_to(&self, next: MitigationStatus) -> bool {
        next.rank() > self.rank()
    }
}

/// A discrete remediation task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MitigationAction {
    /// Action ID
    pub id: String,
    /// Owning mitigation workflow
    pub workflow_id: String,
    /// What needs to be done
    pub description: String,
    /// Current status
    pub status: MitigationStatus,
    /// Who added the action
    pub added_by: String,
    /// Who is responsible for it
    pub assigned_to: Option<String>,
    /// Evidence attached at completion
    pub evidence: Option<String>,
    /// Deadline
    pub due_date: Option<DateTime<Utc>>,
    /// When the action was created
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl MitigationAction {
    /// Whether the deadline has passed without completion.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status != MitigationStatus::Completed
            && self.due_date.is_some_and(|due| due < now)
    }
}

/// A per-batch remediation workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MitigationWorkflow {
    /// Workflow ID
    pub id: String,
    /// The batch whose risk is being remediated
    pub batch_id: String,
    /// Risk level that triggered the workflow
    pub risk_level: RiskLevel,
    /// Current status
    pub status: MitigationStatus,
    /// Completion notes
    pub notes: Option<String>,
    /// Who created the workflow
    pub created_by: String,
    /// Who completed it
    pub completed_by: Option<String>,
    /// When it completed
    pub completed_at: Option<DateTime<Utc>>,
    /// When it was created
    pub created_at: DateTime<Utc>,
    /// Last modification
    pub updated_at: DateTime<Utc>,
}

/// Manages mitigation workflows and their actions.
pub struct MitigationService {
    recorder: Arc<ConsensusRecorder>,
    config: MitigationConfig,
    workflows: DashMap<String, MitigationWorkflow>,
    actions: DashMap<String, MitigationAction>,
}

impl MitigationService {
    /// Create an empty service.
    pub fn new(recorder: Arc<ConsensusRecorder>, config: MitigationConfig) -> Self {
        Self {
            recorder,
            config,
            workflows: DashMap::new(),
            actions: DashMap::new(),
        }
    }

    /// Lifecycle facts are recorded best-effort: a permanent ledger failure
    /// is logged, never propagated into the domain operation.
    async fn record_workflow_fact(&self, workflow: &MitigationWorkflow, action: &str) {
        if let Err(error) = self
            .recorder
            .record_mitigation_workflow(
                &workflow.id,
                &workflow.batch_id,
                action,
                workflow.risk_level.as_str(),
            )
            .await
        {
            warn!(
                workflow_id = %workflow.id,
                error = %error,
                "Could not record mitigation workflow fact"
            );
        }
    }

    /// Create a workflow with zero or more seeded actions.
    pub async fn create_workflow(
        &self,
        batch_id: &str,
        risk_level: RiskLevel,
        initial_actions: Vec<String>,
        created_by: &str,
    ) -> Result<MitigationWorkflow> {
        let now = Utc::now();
        let workflow = MitigationWorkflow {
            id: uuid::Uuid::new_v4().to_string(),
            batch_id: batch_id.to_string(),
            risk_level,
            status: MitigationStatus::Pending,
            notes: None,
            created_by: created_by.to_string(),
            completed_by: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        for description in initial_actions {
            self.insert_action(&workflow.id, description, created_by);
        }
        self.workflows.insert(workflow.id.clone(), workflow.clone());

        info!(
            workflow_id = %workflow.id,
            batch_id,
            risk_level = risk_level.as_str(),
            "Mitigation workflow created"
        );
        self.record_workflow_fact(&workflow, "created").await;
        Ok(workflow)
    }

    fn insert_action(&self, workflow_id: &str, description: String, added_by: &str) -> MitigationAction {
        let now = Utc::now();
        let action = MitigationAction {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            description,
            status: MitigationStatus::Pending,
            added_by: added_by.to_string(),
            assigned_to: None,
            evidence: None,
            due_date: Some(now + Duration::days(self.config.default_due_days)),
            created_at: now,
            updated_at: now,
        };
        self.actions.insert(action.id.clone(), action.clone());
        action
    }

    /// Add an action to a workflow that is not yet completed.
    pub async fn add_action(
        &self,
        workflow_id: &str,
        description: &str,
        added_by: &str,
    ) -> Result<MitigationAction> {
        let workflow = self
            .by_id(workflow_id)
            .ok_or_else(|| ComplianceError::MitigationNotFound(workflow_id.to_string()))?;
        if workflow.status == MitigationStatus::Completed {
            return Err(ComplianceError::InvalidTransition(format!(
                "workflow {} is completed, cannot add actions",
                workflow_id
            )));
        }
        Ok(self.insert_action(workflow_id, description.to_string(), added_by))
    }

    /// Assign an action to someone.
    pub fn assign_action(&self, action_id: &str, assignee: &str) -> Result<MitigationAction> {
        let mut action = self
            .actions
            .get_mut(action_id)
            .ok_or_else(|| ComplianceError::ActionNotFound(action_id.to_string()))?;
        action.assigned_to = Some(assignee.to_string());
        action.updated_at = Utc::now();
        Ok(action.clone())
    }

    /// Move an action's deadline.
    pub fn set_action_due_date(
        &self,
        action_id: &str,
        due_date: DateTime<Utc>,
    ) -> Result<MitigationAction> {
        let mut action = self
            .actions
            .get_mut(action_id)
            .ok_or_else(|| ComplianceError::ActionNotFound(action_id.to_string()))?;
        action.due_date = Some(due_date);
        action.updated_at = Utc::now();
        Ok(action.clone())
    }

    /// Advance an action's status. Transitions are forward-only; the old
    /// and new status both go on the audit trail.
    pub async fn update_action_status(
        &self,
        action_id: &str,
        new_status: MitigationStatus,
        evidence: Option<&str>,
        updated_by: &str,
    ) -> Result<MitigationAction> {
        let (updated, workflow_id, old_status) = {
            let mut action = self
                .actions
                .get_mut(action_id)
                .ok_or_else(|| ComplianceError::ActionNotFound(action_id.to_string()))?;
            let old_status = action.status;
            if !old_status.can_transition_to(new_status) {
                return Err(ComplianceError::InvalidTransition(format!(
                    "action {} cannot move {} -> {}",
                    action_id,
                    old_status.as_str(),
                    new_status.as_str()
                )));
            }
            action.status = new_status;
            if let Some(evidence) = evidence {
                action.evidence = Some(evidence.to_string());
            }
            action.updated_at = Utc::now();
            (action.clone(), action.workflow_id.clone(), old_status)
        };

        // First action moving pulls the workflow out of PENDING.
        if let Some(mut workflow) = self.workflows.get_mut(&workflow_id) {
            if workflow.status == MitigationStatus::Pending {
                workflow.status = MitigationStatus::InProgress;
                workflow.updated_at = Utc::now();
            }
        }

        if let Err(error) = self
            .recorder
            .record_mitigation_action(
                action_id,
                &workflow_id,
                old_status.as_str(),
                new_status.as_str(),
                updated_by,
            )
            .await
        {
            warn!(action_id, error = %error, "Could not record action status change");
        }
        Ok(updated)
    }

    /// Complete a workflow. Fails while any action is still open.
    pub async fn complete_workflow(
        &self,
        workflow_id: &str,
        notes: &str,
        completed_by: &str,
    ) -> Result<MitigationWorkflow> {
        let open = self
            .actions_for(workflow_id)
            .into_iter()
            .filter(|a| a.status != MitigationStatus::Completed)
            .count();
        if open > 0 {
            return Err(ComplianceError::InvalidTransition(format!(
                "workflow {} has {} incomplete action(s)",
                workflow_id, open
            )));
        }

        let workflow = {
            let mut workflow = self
                .workflows
                .get_mut(workflow_id)
                .ok_or_else(|| ComplianceError::MitigationNotFound(workflow_id.to_string()))?;
            let now = Utc::now();
            workflow.status = MitigationStatus::Completed;
            workflow.notes = Some(notes.to_string());
            workflow.completed_by = Some(completed_by.to_string());
            workflow.completed_at = Some(now);
            workflow.updated_at = now;
            workflow.clone()
        };

        info!(workflow_id, completed_by, "Mitigation workflow completed");
        self.record_workflow_fact(&workflow, "completed").await;
        Ok(workflow)
    }

    // --- query surface ---

    /// Workflow by ID.
    pub fn by_id(&self, workflow_id: &str) -> Option<MitigationWorkflow> {
        self.workflows.get(workflow_id).map(|w| w.clone())
    }

    /// All workflows for a batch.
    pub fn by_batch(&self, batch_id: &str) -> Vec<MitigationWorkflow> {
        self.workflows
            .iter()
            .filter(|w| w.batch_id == batch_id)
            .map(|w| w.clone())
            .collect()
    }

    /// Workflows not yet completed.
    pub fn active(&self) -> Vec<MitigationWorkflow> {
        self.workflows
            .iter()
            .filter(|w| w.status != MitigationStatus::Completed)
            .map(|w| w.clone())
            .collect()
    }

    /// Workflows created by someone.
    pub fn by_creator(&self, created_by: &str) -> Vec<MitigationWorkflow> {
        self.workflows
            .iter()
            .filter(|w| w.created_by == created_by)
            .map(|w| w.clone())
            .collect()
    }

    /// Actions of one workflow, oldest first.
    pub fn actions_for(&self, workflow_id: &str) -> Vec<MitigationAction> {
        let mut actions: Vec<MitigationAction> = self
            .actions
            .iter()
            .filter(|a| a.workflow_id == workflow_id)
            .map(|a| a.clone())
            .collect();
        actions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        actions
    }

    /// Actions assigned to someone.
    pub fn by_assignee(&self, assignee: &str) -> Vec<MitigationAction> {
        self.actions
            .iter()
            .filter(|a| a.assigned_to.as_deref() == Some(assignee))
            .map(|a| a.clone())
            .collect()
    }

    /// Actions past their deadline and not completed.
    pub fn overdue(&self) -> Vec<MitigationAction> {
        let now = Utc::now();
        self.actions
            .iter()
            .filter(|a| a.is_overdue(now))
            .map(|a| a.clone())
            .collect()
    }

    /// Open workflows triggered by a HIGH classification.
    pub fn high_risk_pending(&self) -> Vec<MitigationWorkflow> {
        self.workflows
            .iter()
            .filter(|w| w.risk_level == RiskLevel::High && w.status != MitigationStatus::Completed)
            .map(|w| w.clone())
            .collect()
    }

    /// Whether every workflow for a batch is completed (true when none
    /// exist). This is the stage machine's mitigation gate.
    pub fn all_completed_for_batch(&self, batch_id: &str) -> bool {
        self.by_batch(batch_id)
            .iter()
            .all(|w| w.status == MitigationStatus::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger::client::{LedgerClient, LedgerConfig};
    use ledger::network::mock::MockLedgerNetwork;
    use ledger::queue::TransactionQueue;
    use provenance::store::InMemoryEventStore;

    fn service() -> MitigationService {
        let network = Arc::new(MockLedgerNetwork::new());
        let config = LedgerConfig {
            max_attempts: 1,
            base_backoff_ms: 1,
            max_backoff_ms: 1,
            ..LedgerConfig::new("0.0.1001", "test-key")
        };
        let client = Arc::new(LedgerClient::new(network as _, config).unwrap());
        let events = Arc::new(InMemoryEventStore::new());
        let queue = Arc::new(TransactionQueue::new(Arc::clone(&client), events));
        let recorder = Arc::new(ConsensusRecorder::new(client, queue, "0.0.7777"));
        MitigationService::new(recorder, MitigationConfig::default())
    }

    #[tokio::test]
    async fn test_created_workflow_is_pending_with_seeded_actions() {
        let service = service();
        let workflow = service
            .create_workflow(
                "batch-1",
                RiskLevel::High,
                vec!["audit unit".to_string(), "collect records".to_string()],
                "officer-1",
            )
            .await
            .unwrap();

        assert_eq!(workflow.status, MitigationStatus::Pending);
        assert_eq!(service.actions_for(&workflow.id).len(), 2);
        assert_eq!(service.high_risk_pending().len(), 1);
    }

    #[tokio::test]
    async fn test_action_transitions_are_forward_only() {
        let service = service();
        let workflow = service
            .create_workflow("batch-1", RiskLevel::Medium, vec!["a".to_string()], "officer-1")
            .await
            .unwrap();
        let action = &service.actions_for(&workflow.id)[0];

        service
            .update_action_status(&action.id, MitigationStatus::Completed, Some("report"), "field-1")
            .await
            .unwrap();

        let error = service
            .update_action_status(&action.id, MitigationStatus::Pending, None, "field-1")
            .await
            .unwrap_err();
        assert!(matches!(error, ComplianceError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_completion_gated_on_all_actions() {
        let service = service();
        let workflow = service
            .create_workflow(
                "batch-1",
                RiskLevel::High,
                vec!["a".to_string(), "b".to_string()],
                "officer-1",
            )
            .await
            .unwrap();
        let actions = service.actions_for(&workflow.id);

        service
            .update_action_status(&actions[0].id, MitigationStatus::Completed, None, "field-1")
            .await
            .unwrap();

        let error = service
            .complete_workflow(&workflow.id, "done", "officer-1")
            .await
            .unwrap_err();
        assert!(matches!(error, ComplianceError::InvalidTransition(_)));
        assert!(!service.all_completed_for_batch("batch-1"));

        service
            .update_action_status(&actions[1].id, MitigationStatus::Completed, None, "field-1")
            .await
            .unwrap();
        let completed = service
            .complete_workflow(&workflow.id, "done", "officer-1")
            .await
            .unwrap();

        assert_eq!(completed.status, MitigationStatus::Completed);
        assert!(completed.completed_at.is_some());
        assert!(service.all_completed_for_batch("batch-1"));
        assert!(service.active().is_empty());
    }

    #[tokio::test]
    async fn test_no_actions_added_after_completion() {
        let service = service();
        let workflow = service
            .create_workflow("batch-1", RiskLevel::Medium, vec![], "officer-1")
            .await
            .unwrap();
        service
            .complete_workflow(&workflow.id, "nothing to do", "officer-1")
            .await
            .unwrap();

        let error = service
            .add_action(&workflow.id, "late", "officer-1")
            .await
            .unwrap_err();
        assert!(matches!(error, ComplianceError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_queries() {
        let service = service();
        let workflow = service
            .create_workflow("batch-1", RiskLevel::High, vec!["a".to_string()], "officer-1")
            .await
            .unwrap();
        let action = &service.actions_for(&workflow.id)[0];

        service.assign_action(&action.id, "field-1").unwrap();
        assert_eq!(service.by_assignee("field-1").len(), 1);
        assert_eq!(service.by_creator("officer-1").len(), 1);
        assert_eq!(service.by_batch("batch-1").len(), 1);

        assert!(service.overdue().is_empty());
        service
            .set_action_due_date(&action.id, Utc::now() - Duration::days(1))
            .unwrap();
        assert_eq!(service.overdue().len(), 1);

        // Completed actions stop counting as overdue.
        service
            .update_action_status(&action.id, MitigationStatus::Completed, None, "field-1")
            .await
            .unwrap();
        assert!(service.overdue().is_empty());
    }
}

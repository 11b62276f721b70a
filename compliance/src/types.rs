//! Core types for the compliance workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use provenance::store::StoreError;
use provenance::types::ProduceType;

/// Error types for compliance operations.
///
/// Unmet stage requirements are NOT errors: they come back as structured
/// results with blocker lists so a caller can present next steps. Errors
/// here mean misuse (unknown IDs, illegal transitions) or an upstream
/// failure.
#[derive(Debug, thiserror::Error)]
pub enum ComplianceError {
    /// Unknown compliance workflow ID
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Unknown mitigation workflow ID
    #[error("Mitigation workflow not found: {0}")]
    MitigationNotFound(String),

    /// Unknown mitigation action ID
    #[error("Mitigation action not found: {0}")]
    ActionNotFound(String),

    /// Unknown stage name or order
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    /// Illegal state transition (status regression, completing with open actions)
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Bad domain input (non-positive quantity, overdrawn stage quantity)
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    /// Event persistence failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A required ledger operation failed permanently
    #[error(transparent)]
    Ledger(#[from] ledger::LedgerError),
}

/// Result type for compliance operations.
pub type Result<T> = std::result::Result<T, ComplianceError>;

/// Lifecycle status of a compliance workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    /// Progressing through the stages
    Active,
    /// Elevated risk with open mitigations; no new stage events until cleared
    Blocked,
    /// Due-diligence statement generated, journey finished
    Completed,
}

impl WorkflowStatus {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Active => "ACTIVE",
            WorkflowStatus::Blocked => "BLOCKED",
            WorkflowStatus::Completed => "COMPLETED",
        }
    }
}

/// Risk classification levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }
}

/// One weighted input to a risk assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactor {
    /// Factor name
    pub name: String,
    /// Raw score (0.0 - 1.0)
    pub score: f64,
    /// Weight in the overall score
    pub weight: f64,
    /// Human-readable detail
    pub details: String,
}

/// Outcome of a risk assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessmentResult {
    /// Weighted overall score (0.0 - 1.0)
    pub overall_score: f64,
    /// Classification derived from the configured thresholds
    pub classification: RiskLevel,
    /// The factors that produced the score
    pub factors: Vec<RiskFactor>,
    /// When the assessment ran
    pub assessed_at: DateTime<Utc>,
    /// Suggested remediation steps for elevated factors
    pub recommended_actions: Vec<String>,
}

/// A deforestation alert raised against a production unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeforestationAlert {
    /// Alert ID
    pub id: String,
    /// Production unit the alert concerns
    pub unit_id: String,
    /// Severity label (e.g. "low", "high")
    pub severity: String,
    /// When the alert was raised
    pub raised_at: DateTime<Utc>,
}

/// Reference to an issued compliance certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// Serial number within the collection
    pub serial: u64,
    /// NFT collection ID
    pub collection_id: String,
    /// Mint transaction reference
    pub transaction_ref: String,
    /// Current holder account
    pub holder_account: String,
}

/// One entry in a workflow's local audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When it happened
    pub at: DateTime<Utc>,
    /// What happened (e.g. "stage_advanced", "stage_reverted")
    pub action: String,
    /// Free-form detail
    pub detail: String,
}

/// A batch's journey through the ten compliance stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceWorkflow {
    /// Workflow ID
    pub id: String,
    /// The batch under compliance
    pub batch_id: String,
    /// Commodity of the batch
    pub produce_type: ProduceType,
    /// ISO country code of origin
    pub origin_country: String,
    /// Current stage order (1..=10)
    pub current_stage: u8,
    /// Lifecycle status
    pub status: WorkflowStatus,
    /// All production units passed geolocation verification
    pub units_verified: bool,
    /// Required documentation is complete
    pub documents_complete: bool,
    /// Importer confirmed receipt
    pub import_confirmed: bool,
    /// Importer ledger account, set at import confirmation
    pub importer_account: Option<String>,
    /// Deforestation alerts raised so far
    pub alerts: Vec<DeforestationAlert>,
    /// Latest risk assessment, if any
    pub risk: Option<RiskAssessmentResult>,
    /// Issued compliance certificate, if any
    pub certificate: Option<CertificateRecord>,
    /// Generated due-diligence statement, if any
    pub dds: Option<DdsDocument>,
    /// Local audit trail (stage moves, reverts with reasons)
    pub audit: Vec<AuditEntry>,
    /// When the workflow was created
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl ComplianceWorkflow {
    /// Create a workflow at stage 1.
    pub fn new(
        batch_id: impl Into<String>,
        produce_type: ProduceType,
        origin_country: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            batch_id: batch_id.into(),
            produce_type,
            origin_country: origin_country.into(),
            current_stage: 1,
            status: WorkflowStatus::Active,
            units_verified: false,
            documents_complete: false,
            import_confirmed: false,
            importer_account: None,
            alerts: Vec::new(),
            risk: None,
            certificate: None,
            dds: None,
            audit: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Risk classification of the latest assessment, if any.
    pub fn risk_level(&self) -> Option<RiskLevel> {
        self.risk.as_ref().map(|r| r.classification)
    }

    /// Append an audit entry and bump `updated_at`.
    pub fn audit_entry(&mut self, action: impl Into<String>, detail: impl Into<String>) {
        self.updated_at = Utc::now();
        self.audit.push(AuditEntry {
            at: self.updated_at,
            action: action.into(),
            detail: detail.into(),
        });
    }
}

/// One evaluated requirement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationItem {
    /// The requirement being checked
    pub requirement: String,
    /// Whether it holds
    pub passed: bool,
    /// What was observed
    pub details: String,
}

/// Outcome of validating a stage's requirements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    /// All requirements hold
    pub all_met: bool,
    /// Each requirement with its verdict
    pub items: Vec<ValidationItem>,
    /// Number of failed requirements
    pub failed_count: usize,
}

impl ValidationResult {
    /// Build a result from evaluated items.
    pub fn from_items(items: Vec<ValidationItem>) -> Self {
        let failed_count = items.iter().filter(|i| !i.passed).count();
        Self {
            all_met: failed_count == 0,
            items,
            failed_count,
        }
    }

    /// Requirement texts of every failed item.
    pub fn blockers(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|i| !i.passed)
            .map(|i| i.requirement.clone())
            .collect()
    }
}

/// Outcome of an advance or revert attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancementResult {
    /// Whether the stage changed (or was already terminal on advance)
    pub success: bool,
    /// Stage order before the attempt
    pub previous_stage: u8,
    /// Stage order after the attempt
    pub current_stage: u8,
    /// Human-readable summary
    pub message: String,
    /// Unmet requirements that blocked the move, empty on success
    pub blockers: Vec<String>,
}

/// Per-workflow progress snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowProgress {
    /// Workflow ID
    pub workflow_id: String,
    /// Current stage order
    pub current_stage: u8,
    /// Current stage name
    pub current_stage_name: String,
    /// Total number of stages
    pub total_stages: u8,
    /// Stages already passed
    pub completed_stages: u8,
    /// Completion percentage (0 - 100)
    pub percent_complete: f64,
    /// Kilograms recorded per event kind
    pub quantities_kg: Value,
    /// Event counts per kind
    pub event_counts: Value,
}

/// Due-diligence statement, the terminal-stage artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdsDocument {
    /// Document ID
    pub id: String,
    /// Workflow the statement covers
    pub workflow_id: String,
    /// Batch the statement covers
    pub batch_id: String,
    /// Commodity
    pub produce_type: ProduceType,
    /// Country of origin
    pub origin_country: String,
    /// Total kilograms collected at origin
    pub total_collected_kg: f64,
    /// Total kilograms shipped
    pub total_shipped_kg: f64,
    /// Number of supply-chain events backing the statement
    pub event_count: usize,
    /// Risk classification at generation time
    pub risk_classification: Option<RiskLevel>,
    /// Certificate transaction reference, when one was issued
    pub certificate_ref: Option<String>,
    /// When the statement was generated
    pub generated_at: DateTime<Utc>,
    /// Canonical SHA-256 over the statement content
    pub content_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_result_counts_failures() {
        let result = ValidationResult::from_items(vec![
            ValidationItem {
                requirement: "a".to_string(),
                passed: true,
                details: String::new(),
            },
            ValidationItem {
                requirement: "b".to_string(),
                passed: false,
                details: String::new(),
            },
        ]);

        assert!(!result.all_met);
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.blockers(), vec!["b".to_string()]);
    }

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
    }

    #[test]
    fn test_new_workflow_starts_at_stage_one() {
        let wf = ComplianceWorkflow::new("batch-1", ProduceType::Coffee, "BR");
        assert_eq!(wf.current_stage, 1);
        assert_eq!(wf.status, WorkflowStatus::Active);
        assert!(wf.risk.is_none());
    }
}

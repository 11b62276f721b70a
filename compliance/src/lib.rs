//! Compliance - the EUDR workflow engine
//!
//! A batch moves through ten fixed stages from collection to the
//! due-diligence statement. This crate owns:
//!
//! - The data-driven stage table with entry requirements and automated actions
//! - `ComplianceEngine`: validate, advance, revert, progress, DDS generation
//! - `RiskAssessor`: weighted composite risk with configurable thresholds
//! - `MitigationService`: per-batch remediation workflows gating shipment
//!
//! Everything ledger-facing is delegated to the `ledger` crate; domain
//! writes always land before any ledger attempt.

pub mod config;
pub mod engine;
pub mod mitigation;
pub mod risk;
pub mod stages;
pub mod types;

// Re-export main types for convenience
pub use config::{ComplianceConfig, MitigationConfig, RiskConfig};
pub use engine::ComplianceEngine;
pub use mitigation::{MitigationAction, MitigationService, MitigationStatus, MitigationWorkflow};
pub use risk::RiskAssessor;
pub use stages::{AutomatedAction, Requirement, Stage, FINAL_STAGE, STAGES, STAGE_COUNT};
pub use types::{
    AdvancementResult, AuditEntry, CertificateRecord, ComplianceError, ComplianceWorkflow,
    DdsDocument, DeforestationAlert, Result, RiskAssessmentResult, RiskFactor, RiskLevel,
    ValidationItem, ValidationResult, WorkflowProgress, WorkflowStatus,
};

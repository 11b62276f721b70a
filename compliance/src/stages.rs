//! The ten ordered compliance stages.
//!
//! Stages are a fixed, data-driven table, not an enum with embedded
//! behavior: each row carries the requirements a workflow must satisfy to
//! ENTER that stage plus the automated actions executed on entry. The
//! validation predicates themselves live in the engine, keyed by the
//! [`Requirement`] tags here, so metadata and logic stay independently
//! testable.

use provenance::events::EventKind;

/// A human-gated requirement for entering a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// At least one event of this kind is recorded with positive quantity
    EventsRecorded(EventKind),
    /// Quantity of this kind does not exceed what the previous kind produced
    QuantityWithinPredecessor(EventKind),
    /// Required documentation is complete
    DocumentsComplete,
    /// All production units passed geolocation verification
    UnitsVerified,
    /// A risk assessment has been run
    RiskAssessed,
    /// Risk is LOW, or every mitigation workflow for the batch is completed
    RiskAcceptable,
    /// The importer confirmed receipt
    ImportConfirmed,
}

impl Requirement {
    /// Blocker text shown to callers when the requirement is unmet.
    pub fn describe(&self) -> String {
        match self {
            Requirement::EventsRecorded(kind) => {
                format!("at least one {} event recorded", kind.as_str())
            }
            Requirement::QuantityWithinPredecessor(kind) => {
                format!("{} quantity within what the previous stage produced", kind.as_str())
            }
            Requirement::DocumentsComplete => "required documentation complete".to_string(),
            Requirement::UnitsVerified => "all production units verified".to_string(),
            Requirement::RiskAssessed => "risk assessment completed".to_string(),
            Requirement::RiskAcceptable => {
                "risk classified LOW or all mitigation workflows completed".to_string()
            }
            Requirement::ImportConfirmed => "import confirmed by importer".to_string(),
        }
    }
}

/// A system-executed action run when a workflow enters a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutomatedAction {
    /// Record the stage transition on the consensus topic
    RecordStageTransition,
    /// Record the latest risk assessment on the consensus topic
    RecordRiskAssessment,
    /// Mint and transfer the compliance certificate
    IssueCertificate,
}

/// One row of the stage table.
#[derive(Debug)]
pub struct Stage {
    /// Position in the journey (1..=10)
    pub order: u8,
    /// Machine name
    pub name: &'static str,
    /// Human-readable name
    pub display_name: &'static str,
    /// What happens during this stage
    pub description: &'static str,
    /// Requirements for entering this stage
    pub requirements: &'static [Requirement],
    /// Actions executed on entry
    pub automated: &'static [AutomatedAction],
}

/// Number of stages in the journey.
pub const STAGE_COUNT: u8 = 10;

/// Order of the terminal stage.
pub const FINAL_STAGE: u8 = 10;

/// The fixed stage table, in order.
pub static STAGES: [Stage; 10] = [
    Stage {
        order: 1,
        name: "collection",
        display_name: "Collection",
        description: "Production units deliver the commodity to aggregators",
        requirements: &[],
        automated: &[],
    },
    Stage {
        order: 2,
        name: "consolidation",
        display_name: "Consolidation",
        description: "Aggregators consolidate farm-gate volumes toward processors",
        requirements: &[Requirement::EventsRecorded(EventKind::Collection)],
        automated: &[AutomatedAction::RecordStageTransition],
    },
    Stage {
        order: 3,
        name: "processing",
        display_name: "Processing",
        description: "Processors transform the consolidated commodity",
        requirements: &[
            Requirement::EventsRecorded(EventKind::Consolidation),
            Requirement::QuantityWithinPredecessor(EventKind::Consolidation),
        ],
        automated: &[AutomatedAction::RecordStageTransition],
    },
    Stage {
        order: 4,
        name: "documentation",
        display_name: "Documentation",
        description: "Compliance documentation is gathered for the batch",
        requirements: &[
            Requirement::EventsRecorded(EventKind::Processing),
            Requirement::QuantityWithinPredecessor(EventKind::Processing),
        ],
        automated: &[AutomatedAction::RecordStageTransition],
    },
    Stage {
        order: 5,
        name: "unit_verification",
        display_name: "Unit Verification",
        description: "Production-unit geolocations are verified against land records",
        requirements: &[Requirement::DocumentsComplete],
        automated: &[AutomatedAction::RecordStageTransition],
    },
    Stage {
        order: 6,
        name: "risk_assessment",
        display_name: "Risk Assessment",
        description: "Composite deforestation risk is computed for the batch",
        requirements: &[Requirement::UnitsVerified],
        automated: &[AutomatedAction::RecordStageTransition],
    },
    Stage {
        order: 7,
        name: "risk_mitigation",
        display_name: "Risk Mitigation",
        description: "Flagged risks are remediated through mitigation workflows",
        requirements: &[Requirement::RiskAssessed],
        automated: &[
            AutomatedAction::RecordRiskAssessment,
            AutomatedAction::RecordStageTransition,
        ],
    },
    Stage {
        order: 8,
        name: "shipment",
        display_name: "Shipment",
        description: "The exporter ships the batch to the destination market",
        requirements: &[Requirement::RiskAcceptable],
        automated: &[AutomatedAction::RecordStageTransition],
    },
    Stage {
        order: 9,
        name: "import_control",
        display_name: "Import Control",
        description: "The importer receives and inspects the batch",
        requirements: &[
            Requirement::EventsRecorded(EventKind::Shipment),
            Requirement::QuantityWithinPredecessor(EventKind::Shipment),
        ],
        automated: &[AutomatedAction::RecordStageTransition],
    },
    Stage {
        order: 10,
        name: "due_diligence",
        display_name: "Due Diligence",
        description: "The due-diligence statement is generated; terminal stage",
        requirements: &[Requirement::ImportConfirmed],
        automated: &[
            AutomatedAction::IssueCertificate,
            AutomatedAction::RecordStageTransition,
        ],
    },
];

/// Look up a stage by order (1..=10).
pub fn by_order(order: u8) -> Option<&'static Stage> {
    STAGES.get(order.checked_sub(1)? as usize)
}

/// Look up a stage by machine name.
pub fn by_name(name: &str) -> Option<&'static Stage> {
    STAGES.iter().find(|s| s.name == name)
}

/// The stage after this one, if any.
pub fn successor(order: u8) -> Option<&'static Stage> {
    by_order(order + 1)
}

/// The stage before this one, if any.
pub fn predecessor(order: u8) -> Option<&'static Stage> {
    order.checked_sub(1).and_then(by_order)
}

//! Composite deforestation-risk assessment.
//!
//! Three weighted factors: baseline risk of the origin country, presence of
//! deforestation alerts, and completeness of the recorded supply chain.
//! Thresholds and weights come from [`RiskConfig`].

use chrono::Utc;
use tracing::debug;

use provenance::events::EventKind;
use provenance::store::WorkflowTotals;

use crate::config::RiskConfig;
use crate::types::{ComplianceWorkflow, RiskAssessmentResult, RiskFactor, RiskLevel};

/// Computes risk assessments for compliance workflows.
pub struct RiskAssessor {
    config: RiskConfig,
}

impl RiskAssessor {
    /// Create an assessor with the given policy.
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    /// Classify a score against the configured thresholds.
    pub fn classify(&self, score: f64) -> RiskLevel {
        if score >= self.config.high_threshold {
            RiskLevel::High
        } else if score >= self.config.medium_threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    fn country_factor(&self, workflow: &ComplianceWorkflow) -> RiskFactor {
        let score = self
            .config
            .country_risk
            .get(&workflow.origin_country)
            .copied()
            .unwrap_or(self.config.default_country_risk);
        RiskFactor {
            name: "country_risk".to_string(),
            score,
            weight: self.config.country_weight,
            details: format!("baseline risk for origin country {}", workflow.origin_country),
        }
    }

    fn deforestation_factor(&self, workflow: &ComplianceWorkflow) -> RiskFactor {
        // High-severity alerts weigh more than the rest.
        let score: f64 = workflow
            .alerts
            .iter()
            .map(|a| if a.severity == "high" { 0.5 } else { 0.3 })
            .sum::<f64>()
            .min(1.0);
        RiskFactor {
            name: "deforestation_alerts".to_string(),
            score,
            weight: self.config.deforestation_weight,
            details: format!("{} alert(s) raised against production units", workflow.alerts.len()),
        }
    }

    fn completeness_factor(
        &self,
        workflow: &ComplianceWorkflow,
        totals: &WorkflowTotals,
    ) -> RiskFactor {
        let checks = [
            ("collection events", totals.count(EventKind::Collection) > 0),
            ("consolidation events", totals.count(EventKind::Consolidation) > 0),
            ("processing events", totals.count(EventKind::Processing) > 0),
            ("documentation", workflow.documents_complete),
            ("unit verification", workflow.units_verified),
        ];
        let missing: Vec<&str> = checks
            .iter()
            .filter(|(_, present)| !present)
            .map(|(name, _)| *name)
            .collect();
        let score = missing.len() as f64 / checks.len() as f64;
        let details = if missing.is_empty() {
            "supply-chain record complete".to_string()
        } else {
            format!("missing: {}", missing.join(", "))
        };
        RiskFactor {
            name: "chain_completeness".to_string(),
            score,
            weight: self.config.completeness_weight,
            details,
        }
    }

    /// Run a full assessment over the workflow's current state.
    pub fn assess(
        &self,
        workflow: &ComplianceWorkflow,
        totals: &WorkflowTotals,
    ) -> RiskAssessmentResult {
        let factors = vec![
            self.country_factor(workflow),
            self.deforestation_factor(workflow),
            self.completeness_factor(workflow, totals),
        ];

        let overall_score: f64 = factors.iter().map(|f| f.score * f.weight).sum();
        let classification = self.classify(overall_score);
        let recommended_actions = self.recommend(&factors, classification);

        debug!(
            workflow_id = %workflow.id,
            score = overall_score,
            classification = classification.as_str(),
            "Risk assessment computed"
        );

        RiskAssessmentResult {
            overall_score,
            classification,
            factors,
            assessed_at: Utc::now(),
            recommended_actions,
        }
    }

    fn recommend(&self, factors: &[RiskFactor], classification: RiskLevel) -> Vec<String> {
        let mut actions = Vec::new();
        for factor in factors.iter().filter(|f| f.score >= 0.5) {
            match factor.name.as_str() {
                "country_risk" => actions.push(
                    "Obtain enhanced origin documentation and land-tenure records".to_string(),
                ),
                "deforestation_alerts" => actions.push(
                    "Commission a field audit of the flagged production units".to_string(),
                ),
                "chain_completeness" => actions.push(
                    "Complete the missing supply-chain records before shipment".to_string(),
                ),
                _ => {}
            }
        }
        if actions.is_empty() && classification != RiskLevel::Low {
            actions.push("Review all risk factors with the compliance officer".to_string());
        }
        actions
    }
}

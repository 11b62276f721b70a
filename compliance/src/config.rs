//! Configuration for the compliance engine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Configuration for the compliance workflow engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceConfig {
    /// Risk assessment policy
    pub risk: RiskConfig,
    /// Mitigation workflow policy
    pub mitigation: MitigationConfig,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            risk: RiskConfig::default(),
            mitigation: MitigationConfig::default(),
        }
    }
}

impl ComplianceConfig {
    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Risk classification policy.
///
/// The score boundaries are policy, not physics: they are deliberately
/// configurable rather than baked into the assessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Scores at or above this classify as MEDIUM
    pub medium_threshold: f64,
    /// Scores at or above this classify as HIGH
    pub high_threshold: f64,
    /// Weight of the origin-country factor
    pub country_weight: f64,
    /// Weight of the deforestation-alert factor
    pub deforestation_weight: f64,
    /// Weight of the supply-chain completeness factor
    pub completeness_weight: f64,
    /// Baseline risk per origin country (ISO code -> 0.0..1.0)
    pub country_risk: HashMap<String, f64>,
    /// Baseline used for countries not in the table
    pub default_country_risk: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        let mut country_risk = HashMap::new();
        country_risk.insert("BR".to_string(), 0.65);
        country_risk.insert("ID".to_string(), 0.70);
        country_risk.insert("MY".to_string(), 0.60);
        country_risk.insert("CI".to_string(), 0.55);
        country_risk.insert("GH".to_string(), 0.50);
        country_risk.insert("CO".to_string(), 0.45);
        country_risk.insert("VN".to_string(), 0.40);
        country_risk.insert("ET".to_string(), 0.35);

        Self {
            medium_threshold: 0.40,
            high_threshold: 0.70,
            country_weight: 0.40,
            deforestation_weight: 0.35,
            completeness_weight: 0.25,
            country_risk,
            default_country_risk: 0.50,
        }
    }
}

/// Mitigation workflow policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MitigationConfig {
    /// Days until a newly created action is considered overdue
    pub default_due_days: i64,
}

impl Default for MitigationConfig {
    fn default() -> Self {
        Self { default_due_days: 30 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let config = ComplianceConfig::default();
        assert_eq!(config.risk.medium_threshold, 0.40);
        assert_eq!(config.risk.high_threshold, 0.70);
        assert!(config.risk.medium_threshold < config.risk.high_threshold);
    }

    #[test]
    fn test_weights_sum_to_one() {
        let risk = RiskConfig::default();
        let sum = risk.country_weight + risk.deforestation_weight + risk.completeness_weight;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = ComplianceConfig::default();
        config.risk.high_threshold = 0.8;
        let yaml = config.to_yaml().unwrap();
        let parsed = ComplianceConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.risk.high_threshold, 0.8);
        assert_eq!(parsed.mitigation.default_due_days, 30);
    }
}

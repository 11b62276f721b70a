//! Core supply-chain vocabulary.

use serde::{Deserialize, Serialize};

/// Commodity categories covered by the deforestation regulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProduceType {
    Cattle,
    Cocoa,
    Coffee,
    OilPalm,
    Rubber,
    Soya,
    Wood,
}

impl ProduceType {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProduceType::Cattle => "cattle",
            ProduceType::Cocoa => "cocoa",
            ProduceType::Coffee => "coffee",
            ProduceType::OilPalm => "oil_palm",
            ProduceType::Rubber => "rubber",
            ProduceType::Soya => "soya",
            ProduceType::Wood => "wood",
        }
    }
}

/// Role of an actor in the supply chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    /// Farm or plot where the commodity is produced
    ProductionUnit,
    /// Collects and consolidates farm-gate volumes
    Aggregator,
    /// Transforms the raw commodity
    Processor,
    /// Ships the batch out of the producing country
    Exporter,
    /// Receives the batch in the destination market
    Importer,
}

impl ActorRole {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::ProductionUnit => "production_unit",
            ActorRole::Aggregator => "aggregator",
            ActorRole::Processor => "processor",
            ActorRole::Exporter => "exporter",
            ActorRole::Importer => "importer",
        }
    }
}

//! Ledger - Distributed-Ledger Anchoring
//!
//! Everything that talks to the ledger network lives here:
//!
//! - Trait-based ledger networks (REST gateway, mock)
//! - `LedgerClient` with operator identity and bounded retry
//! - `ConsensusRecorder` building deterministic event envelopes
//! - `CertificateIssuer` minting one compliance certificate per workflow
//! - `TransactionQueue` absorbing transient failures
//! - `AsyncRecorder` keeping ledger I/O off the caller's critical path
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │   AsyncRecorder / CertificateIssuer          │
//! │            │                 │               │
//! │    ┌───────▼──────┐   ┌──────▼─────────┐    │
//! │    │ Consensus    │   │ Transaction    │    │
//! │    │ Recorder     │──▶│ Queue          │    │
//! │    └───────┬──────┘   └──────┬─────────┘    │
//! │            └───────┬─────────┘               │
//! │            ┌───────▼──────┐                  │
//! │            │ LedgerClient │                  │
//! │            └───────┬──────┘                  │
//! │            ┌───────▼──────┐                  │
//! │            │ LedgerNetwork│ (REST / mock)    │
//! │            └──────────────┘                  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The domain record is always written before any ledger attempt; a ledger
//! failure degrades to "recorded locally, ledger pending", never to a failed
//! domain operation.

pub mod certificate;
pub mod client;
pub mod facade;
pub mod network;
pub mod queue;
pub mod recorder;

// Re-export main types for convenience
pub use certificate::{CertificateIssuance, CertificateIssuer, CertificatePolicy};
pub use client::{LedgerClient, LedgerConfig};
pub use facade::AsyncRecorder;
pub use network::mock::MockLedgerNetwork;
pub use network::rest::RestLedgerNetwork;
pub use network::traits::{LedgerError, LedgerNetwork, TransactionReceipt};
pub use queue::{QueuedPayload, QueuedTransaction, TransactionQueue};
pub use recorder::{ConsensusRecorder, EventEnvelope};

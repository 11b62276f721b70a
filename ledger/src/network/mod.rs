//! Ledger network implementations.
//!
//! The `LedgerNetwork` trait is the single seam between Canopy and the
//! ledger. Two implementations ship here: a REST gateway client for real
//! networks and a configurable mock for tests.

pub mod mock;
pub mod rest;
pub mod traits;

pub use mock::MockLedgerNetwork;
pub use rest::RestLedgerNetwork;
pub use traits::{LedgerError, LedgerNetwork, TransactionReceipt};

//! Provenance - Supply-Chain Domain Facts
//!
//! The leaf crate of the Canopy workspace. Holds the immutable facts a
//! compliance workflow accumulates as a batch moves along the supply chain:
//!
//! - **Stage events**: collection, consolidation, processing, shipment -
//!   each linking two actors with a quantity and a date
//! - **Event store**: trait-based persistence with an in-memory default
//! - **Digests**: canonical JSON hashing for envelopes and dossiers
//!
//! Stage events are created once and never mutated, with one exception: a
//! ledger transaction reference is attached after asynchronous recording
//! completes.

pub mod digest;
pub mod events;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use events::{EventKind, StageEvent};
pub use store::{EventStore, InMemoryEventStore, StoreError, WorkflowTotals};
pub use types::{ActorRole, ProduceType};

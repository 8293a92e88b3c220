//! Persistence contracts for strata
//!
//! The indexer and matcher never talk to a database directly; they drive the
//! traits defined here. [`MemStore`] is the reference implementation; it
//! backs the test suites and pins down the visibility and atomicity rules a
//! production store must honor.

mod indexer;
mod mem;
mod vuln;

pub use indexer::IndexerStore;
pub use mem::MemStore;
pub use vuln::{
    GetOpts, MatchConstraint, UpdateOperation, VulnerabilityStore, VulnerabilityUpdateStore,
};

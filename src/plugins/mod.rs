//! External collaborator interfaces (spec §6): database, substrate,
//! property-graph, each fixed as a trait the kernel depends on, with an
//! in-memory default implementation sufficient to drive the test suite
//! without a real backing store, handler subprocess, or graph library —
//! all three are explicitly out of scope per spec §1.

pub mod database;
pub mod graph;
pub mod substrate;

pub use database::{DatabasePlugin, InMemoryDatabase};
pub use graph::{GraphPlugin, StubGraphPlugin};
pub use substrate::{NullSubstrate, SubstratePlugin};

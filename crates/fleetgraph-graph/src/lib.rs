//! fleetgraph-graph: Neo4j access for the fleet knowledge graph.
//!
//! Every graph read and write is a [`Statement`] built by this crate: labels,
//! relationship types and property keys are validated identifiers, values are
//! always bound parameters. Statements run through a [`GraphStore`].

pub mod client;
pub mod memory;
pub mod mutations;
pub mod queries;
pub mod store;

pub use client::{GraphClient, GraphConfig, GraphError};
pub use memory::MemoryStore;
pub use mutations::{Deletable, GraphEntity};
pub use queries::{Statement, StatementKind};
pub use store::GraphStore;

//! fleetgraph-discover: Fleet discovery for the fleet knowledge graph.
//!
//! Runs discovery plugins on every server of an inventory over SSH, projects
//! their output onto nodes and relationships, and reconciles those against
//! Neo4j so repeated runs converge instead of duplicating.

pub mod config;
pub mod error;
pub mod executor;
pub mod inventory;
pub mod locks;
pub mod plugins;
pub mod reconcile;
pub mod runner;

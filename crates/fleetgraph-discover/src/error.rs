//! Error types for the fleetgraph-discover crate.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoverError {
    #[error("Cannot reach server {host}: {reason}")]
    Connection { host: String, reason: String },

    #[error("Script {script} failed on {host}: {reason}")]
    RemoteExecution {
        host: String,
        script: String,
        reason: String,
    },

    #[error("{operation} on {host} timed out after {timeout:?}")]
    Timeout {
        host: String,
        operation: String,
        timeout: Duration,
    },

    #[error("Inventory line {line}: {reason}")]
    Inventory { line: usize, reason: String },

    #[error("Plugin error: {0}")]
    Plugin(#[from] fleetgraph_core::FleetError),

    #[error("Graph error: {0}")]
    Graph(#[from] fleetgraph_graph::GraphError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Worker pool closed: {0}")]
    WorkerPool(#[from] tokio::sync::AcquireError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DiscoverError>;

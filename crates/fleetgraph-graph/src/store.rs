//! The storage seam the reconciliation engine talks to.

use async_trait::async_trait;

use fleetgraph_core::PropertyMap;

use crate::client::GraphError;
use crate::queries::Statement;

/// Parameterized execution against a property graph.
///
/// Implementations: [`GraphClient`](crate::GraphClient) for Neo4j and
/// [`MemoryStore`](crate::MemoryStore) for dry runs and tests.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Run a read statement; each row maps the statement's columns to values.
    async fn read(&self, statement: &Statement) -> Result<Vec<PropertyMap>, GraphError>;

    /// Run a write statement.
    async fn write(&self, statement: &Statement) -> Result<(), GraphError>;
}

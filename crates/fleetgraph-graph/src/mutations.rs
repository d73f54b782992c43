//! Entity operations: exists, add, update and delete.
//!
//! None of these check preconditions. Callers pair `exists` with the
//! mutation they want and hold the entity's identity lock across both.

use async_trait::async_trait;

use fleetgraph_core::{Node, PropertyMap, Relationship};

use crate::client::GraphError;
use crate::queries::Statement;
use crate::store::GraphStore;

#[async_trait]
pub trait GraphEntity: Send + Sync {
    fn exists_statement(&self) -> Result<Statement, GraphError>;
    fn add_statement(&self) -> Result<Statement, GraphError>;
    fn update_statement(&self) -> Result<Statement, GraphError>;

    /// True iff at least one stored element matches the entity's identity.
    async fn exists(&self, store: &dyn GraphStore) -> Result<bool, GraphError> {
        let statement = self.exists_statement()?;
        tracing::debug!(kind = %statement.kind, identity = %statement.target, "Checking existence");
        let rows = store
            .read(&statement)
            .await
            .map_err(|e| GraphError::in_statement(&statement, e))?;
        Ok(count(&rows) > 0)
    }

    async fn add(&self, store: &dyn GraphStore) -> Result<(), GraphError> {
        execute(store, self.add_statement()?).await
    }

    async fn update(&self, store: &dyn GraphStore) -> Result<(), GraphError> {
        execute(store, self.update_statement()?).await
    }
}

/// Entities that can be removed. Only relationships are ever deleted.
#[async_trait]
pub trait Deletable: GraphEntity {
    fn delete_statement(&self) -> Result<Statement, GraphError>;

    async fn delete(&self, store: &dyn GraphStore) -> Result<(), GraphError> {
        execute(store, self.delete_statement()?).await
    }
}

impl GraphEntity for Node {
    fn exists_statement(&self) -> Result<Statement, GraphError> {
        Statement::node_exists(self)
    }

    fn add_statement(&self) -> Result<Statement, GraphError> {
        Statement::node_create(self)
    }

    fn update_statement(&self) -> Result<Statement, GraphError> {
        Statement::node_update(self)
    }
}

impl GraphEntity for Relationship {
    fn exists_statement(&self) -> Result<Statement, GraphError> {
        Statement::relationship_exists(self)
    }

    fn add_statement(&self) -> Result<Statement, GraphError> {
        Statement::relationship_create(self)
    }

    fn update_statement(&self) -> Result<Statement, GraphError> {
        Statement::relationship_update(self)
    }
}

impl Deletable for Relationship {
    fn delete_statement(&self) -> Result<Statement, GraphError> {
        Statement::relationship_delete(self)
    }
}

async fn execute(store: &dyn GraphStore, statement: Statement) -> Result<(), GraphError> {
    tracing::debug!(kind = %statement.kind, identity = %statement.target, "Executing statement");
    store
        .write(&statement)
        .await
        .map_err(|e| GraphError::in_statement(&statement, e))
}

fn count(rows: &[PropertyMap]) -> i64 {
    rows.first()
        .and_then(|row| row.get("count"))
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::queries::StatementKind;

    #[tokio::test]
    async fn test_add_then_exists() {
        let store = MemoryStore::new();
        let node = Node::new("Server", "web1");

        assert!(!node.exists(&store).await.unwrap());
        node.add(&store).await.unwrap();
        assert!(node.exists(&store).await.unwrap());
    }

    #[tokio::test]
    async fn test_relationship_lifecycle() {
        let store = MemoryStore::new();
        let rel = Relationship::new(Node::new("Server", "a"), "RUNS", Node::new("App", "b"));
        rel.left.add(&store).await.unwrap();
        rel.right.add(&store).await.unwrap();

        rel.add(&store).await.unwrap();
        assert!(rel.exists(&store).await.unwrap());
        rel.delete(&store).await.unwrap();
        assert!(!rel.exists(&store).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_failure_carries_context() {
        let store = MemoryStore::new().failing_writes();
        let node = Node::new("Server", "web1");

        let err = node.add(&store).await.unwrap_err();
        match err {
            GraphError::Write { kind, target, .. } => {
                assert_eq!(kind, StatementKind::NodeCreate);
                assert_eq!(target, r#"Server{name: "web1"}"#);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_identifier_never_reaches_store() {
        let store = MemoryStore::new();
        let node = Node::new("Bad Label", "x");
        assert!(matches!(
            node.exists(&store).await,
            Err(GraphError::InvalidIdentifier { .. })
        ));
        assert!(store.statements().is_empty());
    }
}

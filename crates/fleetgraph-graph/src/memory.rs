//! In-memory graph store used for `--dry-run` and tests.
//!
//! Tracks which entity identities exist and logs every statement it is
//! given. It does not interpret Cypher: each statement's kind, target
//! identity and required endpoints are enough to answer existence checks.
//! Like a `MATCH ... CREATE`, a relationship create with a missing endpoint
//! creates nothing. Duplicate creates are not modeled: identities are a set.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use fleetgraph_core::{PropertyMap, PropertyValue};

use crate::client::GraphError;
use crate::queries::{Statement, StatementKind};
use crate::store::GraphStore;

#[derive(Default)]
struct MemoryState {
    entities: BTreeSet<String>,
    log: Vec<Statement>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entity by identity key.
    pub fn with_entity(self, identity_key: impl Into<String>) -> Self {
        self.lock().entities.insert(identity_key.into());
        self
    }

    /// Reject every write, as a store with a broken connection would.
    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn contains(&self, identity_key: &str) -> bool {
        self.lock().entities.contains(identity_key)
    }

    /// Every statement received, in order.
    pub fn statements(&self) -> Vec<Statement> {
        self.lock().log.clone()
    }

    /// Received statements of one kind.
    pub fn statements_of(&self, kind: StatementKind) -> Vec<Statement> {
        self.lock()
            .log
            .iter()
            .filter(|s| s.kind == kind)
            .cloned()
            .collect()
    }

    /// Number of received statements that change the graph.
    pub fn mutation_count(&self) -> usize {
        self.lock().log.iter().filter(|s| !s.kind.is_read()).count()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn read(&self, statement: &Statement) -> Result<Vec<PropertyMap>, GraphError> {
        if !statement.kind.is_read() {
            return Err(GraphError::Serialization(format!(
                "{} is not a read statement",
                statement.kind
            )));
        }

        let mut state = self.lock();
        state.log.push(statement.clone());
        let count = i64::from(state.entities.contains(&statement.target));

        let mut row = PropertyMap::new();
        row.insert("count".to_string(), PropertyValue::Integer(count));
        Ok(vec![row])
    }

    async fn write(&self, statement: &Statement) -> Result<(), GraphError> {
        if statement.kind.is_read() {
            return Err(GraphError::Serialization(format!(
                "{} is not a write statement",
                statement.kind
            )));
        }

        tracing::info!(
            kind = %statement.kind,
            identity = %statement.target,
            cypher = %statement.cypher,
            params = %serde_json::to_string(&statement.params).unwrap_or_default(),
            "Planned write"
        );

        let mut state = self.lock();
        state.log.push(statement.clone());
        if self.fail_writes {
            return Err(GraphError::Connection("store rejected write".to_string()));
        }

        match statement.kind {
            StatementKind::NodeCreate => {
                state.entities.insert(statement.target.clone());
            }
            StatementKind::RelationshipCreate => {
                if statement.requires.iter().all(|key| state.entities.contains(key)) {
                    state.entities.insert(statement.target.clone());
                } else {
                    tracing::info!(identity = %statement.target, "Endpoint missing, nothing created");
                }
            }
            StatementKind::RelationshipDelete => {
                state.entities.remove(&statement.target);
            }
            _ => {}
        }
        Ok(())
    }
}

//! Neo4j connection management and the neo4rs-backed graph store.

use std::time::Duration;

use async_trait::async_trait;
use neo4rs::{ConfigBuilder, Graph, Query};

use fleetgraph_core::{PropertyMap, PropertyValue};

use crate::queries::{Statement, StatementKind};
use crate::store::GraphStore;

/// Errors from graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Neo4j connection error: {0}")]
    Connection(String),

    #[error("Neo4j query error: {0}")]
    Query(#[from] neo4rs::Error),

    #[error("Store read failed ({kind} of {target}): {source}")]
    Read {
        kind: StatementKind,
        target: String,
        #[source]
        source: Box<GraphError>,
    },

    #[error("Store write failed ({kind} of {target}): {source}")]
    Write {
        kind: StatementKind,
        target: String,
        #[source]
        source: Box<GraphError>,
    },

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid {kind} identifier: {value:?}")]
    InvalidIdentifier { kind: &'static str, value: String },

    #[error("Nothing to set on {target}")]
    NothingToSet { target: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl GraphError {
    /// Attach the statement kind and target identity to a store failure.
    pub fn in_statement(statement: &Statement, source: GraphError) -> Self {
        let (kind, target, source) = (statement.kind, statement.target.clone(), Box::new(source));
        if statement.kind.is_read() {
            Self::Read {
                kind,
                target,
                source,
            }
        } else {
            Self::Write {
                kind,
                target,
                source,
            }
        }
    }
}

/// Configuration for connecting to Neo4j.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub fetch_size: usize,
    /// Deadline for every individual statement.
    pub query_timeout: Duration,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "fleetgraph-dev".to_string(),
            max_connections: 16,
            fetch_size: 256,
            query_timeout: Duration::from_secs(30),
        }
    }
}

/// Thread-safe Neo4j graph client with connection pooling.
///
/// Clone is cheap (inner Arc). One client is shared by every discovery task
/// for the whole run.
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
    query_timeout: Duration,
}

impl GraphClient {
    /// Connect to Neo4j with the given configuration.
    pub async fn connect(config: &GraphConfig) -> Result<Self, GraphError> {
        let neo_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections as usize)
            .fetch_size(config.fetch_size)
            .build()
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        let graph = Graph::connect(neo_config)
            .await
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        tracing::info!(uri = %config.uri, "Connected to Neo4j");
        Ok(Self {
            graph,
            query_timeout: config.query_timeout,
        })
    }

    /// Execute a write-only query (CREATE, SET, DELETE).
    pub async fn run(&self, query: Query) -> Result<(), GraphError> {
        tokio::time::timeout(self.query_timeout, self.graph.run(query))
            .await
            .map_err(|_| GraphError::Timeout(self.query_timeout))??;
        Ok(())
    }

    /// Execute a read query and collect all rows.
    pub async fn query_rows(&self, query: Query) -> Result<Vec<neo4rs::Row>, GraphError> {
        let collect = async {
            let mut stream = self.graph.execute(query).await?;
            let mut rows = Vec::new();
            while let Some(row) = stream.next().await? {
                rows.push(row);
            }
            Ok::<_, GraphError>(rows)
        };
        tokio::time::timeout(self.query_timeout, collect)
            .await
            .map_err(|_| GraphError::Timeout(self.query_timeout))?
    }
}

#[async_trait]
impl GraphStore for GraphClient {
    async fn read(&self, statement: &Statement) -> Result<Vec<PropertyMap>, GraphError> {
        let rows = self.query_rows(to_query(statement)).await?;
        Ok(rows
            .iter()
            .map(|row| {
                statement
                    .columns
                    .iter()
                    .filter_map(|column| Some((column.clone(), column_value(row, column)?)))
                    .collect()
            })
            .collect())
    }

    async fn write(&self, statement: &Statement) -> Result<(), GraphError> {
        self.run(to_query(statement)).await
    }
}

/// Convert a built statement into a neo4rs query with bound parameters.
pub fn to_query(statement: &Statement) -> Query {
    statement
        .params
        .iter()
        .fold(neo4rs::query(&statement.cypher), |q, (key, value)| match value {
            PropertyValue::Boolean(b) => q.param(key, *b),
            PropertyValue::Integer(i) => q.param(key, *i),
            PropertyValue::Float(f) => q.param(key, *f),
            PropertyValue::String(s) => q.param(key, s.clone()),
        })
}

fn column_value(row: &neo4rs::Row, column: &str) -> Option<PropertyValue> {
    if let Ok(i) = row.get::<i64>(column) {
        return Some(PropertyValue::Integer(i));
    }
    if let Ok(f) = row.get::<f64>(column) {
        return Some(PropertyValue::Float(f));
    }
    if let Ok(b) = row.get::<bool>(column) {
        return Some(PropertyValue::Boolean(b));
    }
    row.get::<String>(column).ok().map(PropertyValue::String)
}

//! Cypher statement builder for entity operations.
//!
//! Structural fragments (labels, relationship types, property keys) are
//! validated identifiers spliced into the text. Every value is a bound
//! parameter. Parameter names carry a per-endpoint prefix: `a_` left or
//! matched node identity, `b_` right node identity, `r_` relationship
//! properties, `p_` node properties.

use std::fmt;

use fleetgraph_core::types::is_identifier;
use fleetgraph_core::{Node, PropertyMap, PropertyValue, Relationship};

use crate::client::GraphError;

/// What a statement does, for logging and error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    NodeExists,
    NodeCreate,
    NodeUpdate,
    RelationshipExists,
    RelationshipCreate,
    RelationshipUpdate,
    RelationshipDelete,
}

impl StatementKind {
    pub fn is_read(self) -> bool {
        matches!(self, Self::NodeExists | Self::RelationshipExists)
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NodeExists => "node exists",
            Self::NodeCreate => "node create",
            Self::NodeUpdate => "node update",
            Self::RelationshipExists => "relationship exists",
            Self::RelationshipCreate => "relationship create",
            Self::RelationshipUpdate => "relationship update",
            Self::RelationshipDelete => "relationship delete",
        };
        f.write_str(s)
    }
}

/// A parameterized statement ready for a [`GraphStore`](crate::GraphStore).
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub cypher: String,
    pub params: PropertyMap,
    /// Columns returned by read statements.
    pub columns: Vec<String>,
    /// Identity key of the entity the statement targets.
    pub target: String,
    /// Identity keys that must already exist for the statement to match
    /// anything. Only set on relationship creates.
    pub requires: Vec<String>,
}

impl Statement {
    // ── Nodes ────────────────────────────────────────────────────

    pub fn node_exists(node: &Node) -> Result<Self, GraphError> {
        let mut b = Builder::default();
        let pattern = b.node_pattern("a", node)?;
        Ok(b.finish(
            StatementKind::NodeExists,
            format!("MATCH {pattern} RETURN count(a) AS count"),
            vec!["count".to_string()],
            node.identity_key(),
        ))
    }

    /// `CREATE` with `name`, every property and every condition term.
    /// Condition values win over same-named properties.
    pub fn node_create(node: &Node) -> Result<Self, GraphError> {
        let label = identifier("label", &node.class)?;
        let mut b = Builder::default();
        let map = b.literal_map("p", &node.stored_properties())?;
        Ok(b.finish(
            StatementKind::NodeCreate,
            format!("CREATE (a:{label} {map})"),
            Vec::new(),
            node.identity_key(),
        ))
    }

    pub fn node_update(node: &Node) -> Result<Self, GraphError> {
        let mut b = Builder::default();
        let pattern = b.node_pattern("a", node)?;
        let sets = b.assignments("a", "p", &node.stored_properties())?;
        Ok(b.finish(
            StatementKind::NodeUpdate,
            format!("MATCH {pattern} SET {}", sets.join(", ")),
            Vec::new(),
            node.identity_key(),
        ))
    }

    // ── Relationships ────────────────────────────────────────────

    pub fn relationship_exists(rel: &Relationship) -> Result<Self, GraphError> {
        let mut b = Builder::default();
        let path = b.path(rel)?;
        Ok(b.finish(
            StatementKind::RelationshipExists,
            format!("MATCH {path} RETURN count(r) AS count"),
            vec!["count".to_string()],
            rel.identity_key(),
        ))
    }

    pub fn relationship_create(rel: &Relationship) -> Result<Self, GraphError> {
        let mut b = Builder::default();
        let left = b.node_pattern("a", &rel.left)?;
        let right = b.node_pattern("b", &rel.right)?;
        let rel_type = identifier("relationship type", &rel.class)?;
        let props = if rel.properties.is_empty() {
            String::new()
        } else {
            format!(" {}", b.literal_map("r", &rel.properties)?)
        };
        let mut stmt = b.finish(
            StatementKind::RelationshipCreate,
            format!("MATCH {left}, {right} CREATE (a)-[r:{rel_type}{props}]->(b)"),
            Vec::new(),
            rel.identity_key(),
        );
        stmt.requires = vec![rel.left.identity_key(), rel.right.identity_key()];
        Ok(stmt)
    }

    pub fn relationship_update(rel: &Relationship) -> Result<Self, GraphError> {
        if rel.properties.is_empty() {
            return Err(GraphError::NothingToSet {
                target: rel.identity_key(),
            });
        }
        let mut b = Builder::default();
        let path = b.path(rel)?;
        let sets = b.assignments("r", "r", &rel.properties)?;
        Ok(b.finish(
            StatementKind::RelationshipUpdate,
            format!("MATCH {path} SET {}", sets.join(", ")),
            Vec::new(),
            rel.identity_key(),
        ))
    }

    /// Matches with the same identity predicates as `relationship_exists`.
    pub fn relationship_delete(rel: &Relationship) -> Result<Self, GraphError> {
        let mut b = Builder::default();
        let path = b.path(rel)?;
        Ok(b.finish(
            StatementKind::RelationshipDelete,
            format!("MATCH {path} DELETE r"),
            Vec::new(),
            rel.identity_key(),
        ))
    }
}

fn identifier<'a>(kind: &'static str, value: &'a str) -> Result<&'a str, GraphError> {
    if is_identifier(value) {
        Ok(value)
    } else {
        Err(GraphError::InvalidIdentifier {
            kind,
            value: value.to_string(),
        })
    }
}

#[derive(Default)]
struct Builder {
    params: PropertyMap,
}

impl Builder {
    fn bind(&mut self, name: String, value: PropertyValue) -> String {
        let placeholder = format!("${name}");
        self.params.insert(name, value);
        placeholder
    }

    /// `(var:Label {key: $var_key, ...})` over the node's effective identity.
    fn node_pattern(&mut self, var: &str, node: &Node) -> Result<String, GraphError> {
        let label = identifier("label", &node.class)?;
        let mut terms = Vec::new();
        for (key, value) in node.identity().terms() {
            let key = identifier("property key", key)?;
            let placeholder = self.bind(format!("{var}_{key}"), value.clone());
            terms.push(format!("{key}: {placeholder}"));
        }
        Ok(format!("({var}:{label} {{{}}})", terms.join(", ")))
    }

    fn path(&mut self, rel: &Relationship) -> Result<String, GraphError> {
        let left = self.node_pattern("a", &rel.left)?;
        let right = self.node_pattern("b", &rel.right)?;
        let rel_type = identifier("relationship type", &rel.class)?;
        Ok(format!("{left}-[r:{rel_type}]->{right}"))
    }

    /// `{key: $prefix_key, ...}`
    fn literal_map(&mut self, prefix: &str, props: &PropertyMap) -> Result<String, GraphError> {
        let mut terms = Vec::with_capacity(props.len());
        for (key, value) in props {
            let key = identifier("property key", key)?;
            let placeholder = self.bind(format!("{prefix}_{key}"), value.clone());
            terms.push(format!("{key}: {placeholder}"));
        }
        Ok(format!("{{{}}}", terms.join(", ")))
    }

    /// `var.key = $prefix_key` for every property.
    fn assignments(
        &mut self,
        var: &str,
        prefix: &str,
        props: &PropertyMap,
    ) -> Result<Vec<String>, GraphError> {
        let mut sets = Vec::with_capacity(props.len());
        for (key, value) in props {
            let key = identifier("property key", key)?;
            let placeholder = self.bind(format!("{prefix}_{key}"), value.clone());
            sets.push(format!("{var}.{key} = {placeholder}"));
        }
        Ok(sets)
    }

    fn finish(
        self,
        kind: StatementKind,
        cypher: String,
        columns: Vec<String>,
        target: String,
    ) -> Statement {
        Statement {
            kind,
            cypher,
            params: self.params,
            columns,
            target,
            requires: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgraph_core::IdentityCondition;

    fn server() -> Node {
        Node::new("Server", "web1")
            .with_condition(IdentityCondition::single("ip", "10.0.0.5"))
            .with_property("ip", "10.0.0.5")
    }

    fn app() -> Node {
        Node::new("Application", "nginx").with_property("port", 443i64)
    }

    #[test]
    fn test_node_exists_by_name() {
        let stmt = Statement::node_exists(&app()).unwrap();
        assert_eq!(
            stmt.cypher,
            "MATCH (a:Application {name: $a_name}) RETURN count(a) AS count"
        );
        assert_eq!(stmt.params.len(), 1);
        assert_eq!(stmt.params["a_name"], PropertyValue::from("nginx"));
        assert_eq!(stmt.columns, vec!["count"]);
        assert_eq!(stmt.kind, StatementKind::NodeExists);
    }

    #[test]
    fn test_node_exists_by_condition_does_not_bind_name() {
        let stmt = Statement::node_exists(&server()).unwrap();
        assert_eq!(
            stmt.cypher,
            "MATCH (a:Server {ip: $a_ip}) RETURN count(a) AS count"
        );
        assert!(!stmt.params.contains_key("a_name"));
        assert_eq!(stmt.target, r#"Server{ip: "10.0.0.5"}"#);
    }

    #[test]
    fn test_node_create_binds_all_properties() {
        let stmt = Statement::node_create(&app()).unwrap();
        assert_eq!(
            stmt.cypher,
            "CREATE (a:Application {name: $p_name, port: $p_port})"
        );
        assert_eq!(stmt.params["p_port"], PropertyValue::Integer(443));
    }

    #[test]
    fn test_node_create_includes_condition_terms() {
        let node = Node::new("Disk", "sda")
            .with_condition(IdentityCondition::single("serial", "XYZ"));
        let stmt = Statement::node_create(&node).unwrap();
        assert_eq!(
            stmt.cypher,
            "CREATE (a:Disk {name: $p_name, serial: $p_serial})"
        );
    }

    #[test]
    fn test_condition_terms_override_properties() {
        let node = Node::new("Application", "nginx")
            .with_condition(
                IdentityCondition::single("name", "nginx").with("port", PropertyValue::Integer(443)),
            )
            .with_property("port", "443")
            .with_property("kind", "listener");

        let exists = Statement::node_exists(&node).unwrap();
        let create = Statement::node_create(&node).unwrap();
        let update = Statement::node_update(&node).unwrap();

        for key in ["name", "port"] {
            let matched = &exists.params[&format!("a_{key}")];
            assert_eq!(&create.params[&format!("p_{key}")], matched);
            assert_eq!(&update.params[&format!("p_{key}")], matched);
        }
        assert_eq!(create.params["p_port"], PropertyValue::Integer(443));
        assert_eq!(create.params["p_kind"], PropertyValue::from("listener"));
    }

    #[test]
    fn test_node_update_sets_name_idempotently() {
        let stmt = Statement::node_update(&Node::new("Server", "web1")).unwrap();
        assert_eq!(
            stmt.cypher,
            "MATCH (a:Server {name: $a_name}) SET a.name = $p_name"
        );

        let stmt = Statement::node_update(&server()).unwrap();
        assert_eq!(
            stmt.cypher,
            "MATCH (a:Server {ip: $a_ip}) SET a.ip = $p_ip, a.name = $p_name"
        );
    }

    #[test]
    fn test_relationship_statements() {
        let rel = Relationship::new(server(), "RUNS", app()).with_property("since", "2024");

        let exists = Statement::relationship_exists(&rel).unwrap();
        assert_eq!(
            exists.cypher,
            "MATCH (a:Server {ip: $a_ip})-[r:RUNS]->(b:Application {name: $b_name}) \
             RETURN count(r) AS count"
        );

        let create = Statement::relationship_create(&rel).unwrap();
        assert_eq!(
            create.cypher,
            "MATCH (a:Server {ip: $a_ip}), (b:Application {name: $b_name}) \
             CREATE (a)-[r:RUNS {since: $r_since}]->(b)"
        );
        assert_eq!(create.params.len(), 3);
        assert_eq!(
            create.requires,
            vec![r#"Server{ip: "10.0.0.5"}"#, r#"Application{name: "nginx"}"#]
        );
        assert!(exists.requires.is_empty());

        let update = Statement::relationship_update(&rel).unwrap();
        assert!(update.cypher.ends_with("SET r.since = $r_since"));

        let delete = Statement::relationship_delete(&rel).unwrap();
        assert_eq!(
            delete.cypher,
            "MATCH (a:Server {ip: $a_ip})-[r:RUNS]->(b:Application {name: $b_name}) DELETE r"
        );
    }

    #[test]
    fn test_relationship_without_properties() {
        let rel = Relationship::new(server(), "RUNS", app());
        let create = Statement::relationship_create(&rel).unwrap();
        assert!(create.cypher.ends_with("CREATE (a)-[r:RUNS]->(b)"));
        assert!(matches!(
            Statement::relationship_update(&rel),
            Err(GraphError::NothingToSet { .. })
        ));
    }

    #[test]
    fn test_values_never_reach_statement_text() {
        let node = Node::new("Server", "x'}) DETACH DELETE (n) //")
            .with_property("note", "'; DROP");
        for stmt in [
            Statement::node_exists(&node).unwrap(),
            Statement::node_create(&node).unwrap(),
            Statement::node_update(&node).unwrap(),
        ] {
            assert!(!stmt.cypher.contains("DETACH"));
            assert!(!stmt.cypher.contains("DROP"));
        }
    }

    #[test]
    fn test_structural_fragments_are_validated() {
        let bad_label = Node::new("Server) DETACH DELETE (n", "x");
        assert!(matches!(
            Statement::node_exists(&bad_label),
            Err(GraphError::InvalidIdentifier { kind: "label", .. })
        ));

        let bad_key = Node::new("Server", "x").with_property("a.b", "v");
        assert!(Statement::node_create(&bad_key).is_err());

        let bad_type = Relationship::new(app(), "R]->() DELETE r //", app());
        assert!(Statement::relationship_exists(&bad_type).is_err());
    }
}

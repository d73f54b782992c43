//! Core entity types for the fleet knowledge graph.
//!
//! Nodes and relationships are plain values: they are built fresh for every
//! row of plugin output, reconciled against the store, and dropped.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FleetError;

// ── Property Values ───────────────────────────────────────────────

/// A scalar property value as stored on nodes and relationships.
///
/// Deserializes untagged, so descriptor JSON such as `"port": 22` or
/// `"enabled": true` keeps its type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PropertyValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl PropertyValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Parse an unquoted literal: `true`/`false`, an integer, or a finite float.
    pub fn parse_literal(raw: &str) -> Option<Self> {
        match raw {
            "true" => return Some(Self::Boolean(true)),
            "false" => return Some(Self::Boolean(false)),
            _ => {}
        }
        if let Ok(i) = raw.parse::<i64>() {
            return Some(Self::Integer(i));
        }
        match raw.parse::<f64>() {
            Ok(f) if f.is_finite() => Some(Self::Float(f)),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for PropertyValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

/// Property key -> value. Ordered so generated statements are deterministic.
pub type PropertyMap = BTreeMap<String, PropertyValue>;

// ── Identifiers ───────────────────────────────────────────────────

/// Whether `value` may be spliced into a statement as a label, relationship
/// type or property key: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Reject structural fragments that are not plain identifiers.
pub fn validate_identifier(kind: &'static str, value: &str) -> Result<(), FleetError> {
    if is_identifier(value) {
        Ok(())
    } else {
        Err(FleetError::InvalidIdentifier {
            kind,
            value: value.to_string(),
        })
    }
}

// ── Identity ──────────────────────────────────────────────────────

/// An identity predicate: every listed property must equal its value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentityCondition {
    terms: Vec<(String, PropertyValue)>,
}

impl IdentityCondition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self::new().with(key, value)
    }

    /// Add a term. A repeated key replaces the earlier value.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.push(key.into(), value.into());
        self
    }

    pub fn push(&mut self, key: String, value: PropertyValue) {
        match self.terms.iter_mut().find(|(k, _)| *k == key) {
            Some(term) => term.1 = value,
            None => self.terms.push((key, value)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> &[(String, PropertyValue)] {
        &self.terms
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.terms.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

impl fmt::Display for IdentityCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.terms.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}: {value}")?;
        }
        f.write_str("}")
    }
}

// ── Node ──────────────────────────────────────────────────────────

/// A typed, named vertex.
///
/// Identity is `(class, condition)` when a non-empty condition is set,
/// otherwise `(class, name)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub class: String,
    pub name: String,
    pub condition: Option<IdentityCondition>,
    pub properties: PropertyMap,
}

impl Node {
    pub fn new(class: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            name: name.into(),
            condition: None,
            properties: PropertyMap::new(),
        }
    }

    pub fn with_condition(mut self, condition: IdentityCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// The condition override, if one is set and non-empty.
    pub fn explicit_condition(&self) -> Option<&IdentityCondition> {
        self.condition.as_ref().filter(|c| !c.is_empty())
    }

    /// The effective identity predicate.
    pub fn identity(&self) -> IdentityCondition {
        match self.explicit_condition() {
            Some(condition) => condition.clone(),
            None => IdentityCondition::single("name", self.name.as_str()),
        }
    }

    /// Properties with `name` synchronized to the `name` field.
    pub fn synced_properties(&self) -> PropertyMap {
        let mut props = self.properties.clone();
        props.insert("name".to_string(), PropertyValue::from(self.name.as_str()));
        props
    }

    /// What create and update write: the synced properties with every
    /// condition term on top, so the stored node matches its own identity.
    pub fn stored_properties(&self) -> PropertyMap {
        let mut props = self.synced_properties();
        if let Some(condition) = self.explicit_condition() {
            for (key, value) in condition.terms() {
                props.insert(key.clone(), value.clone());
            }
        }
        props
    }

    /// Canonical identity string, e.g. `Server{ip: "10.0.0.5"}`.
    pub fn identity_key(&self) -> String {
        format!("{}{}", self.class, self.identity())
    }
}

// ── Relationship ──────────────────────────────────────────────────

/// A typed, directed edge `(left)-[class]->(right)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub left: Node,
    pub class: String,
    pub right: Node,
    pub properties: PropertyMap,
}

impl Relationship {
    pub fn new(left: Node, class: impl Into<String>, right: Node) -> Self {
        Self {
            left,
            class: class.into(),
            right,
            properties: PropertyMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Canonical identity string of the ordered triple.
    pub fn identity_key(&self) -> String {
        format!(
            "({})-[:{}]->({})",
            self.left.identity_key(),
            self.class,
            self.right.identity_key()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_defaults_to_name() {
        let node = Node::new("Server", "web1");
        assert_eq!(node.identity(), IdentityCondition::single("name", "web1"));
        assert_eq!(node.identity_key(), r#"Server{name: "web1"}"#);
    }

    #[test]
    fn test_condition_overrides_name_identity() {
        let node = Node::new("Server", "web1")
            .with_condition(IdentityCondition::single("ip", "10.0.0.5"));
        assert_eq!(node.identity_key(), r#"Server{ip: "10.0.0.5"}"#);

        // An empty condition is the same as none.
        let node = Node::new("Server", "web1").with_condition(IdentityCondition::new());
        assert_eq!(node.identity_key(), r#"Server{name: "web1"}"#);
    }

    #[test]
    fn test_synced_properties_carry_name() {
        let mut node = Node::new("Server", "web1").with_property("name", "stale");
        node.name = "web2".to_string();
        let props = node.synced_properties();
        assert_eq!(props.get("name"), Some(&PropertyValue::from("web2")));
    }

    #[test]
    fn test_relationship_identity_is_directional() {
        let a = Node::new("Server", "a");
        let b = Node::new("Server", "b");
        let ab = Relationship::new(a.clone(), "TALKS_TO", b.clone());
        let ba = Relationship::new(b, "TALKS_TO", a);
        assert_ne!(ab.identity_key(), ba.identity_key());
        assert_eq!(
            ab.identity_key(),
            r#"(Server{name: "a"})-[:TALKS_TO]->(Server{name: "b"})"#
        );
    }

    #[test]
    fn test_condition_push_replaces_key() {
        let cond = IdentityCondition::single("ip", "1.1.1.1").with("ip", "2.2.2.2");
        assert_eq!(cond.terms().len(), 1);
        assert_eq!(cond.get("ip"), Some(&PropertyValue::from("2.2.2.2")));
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("Server"));
        assert!(is_identifier("_private"));
        assert!(is_identifier("HAS_PORT2"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("2fast"));
        assert!(!is_identifier("Server {name: 'x'}) DETACH DELETE (n"));
        assert!(!is_identifier("a-b"));
        assert!(validate_identifier("label", "bad label").is_err());
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(PropertyValue::parse_literal("42"), Some(PropertyValue::Integer(42)));
        assert_eq!(PropertyValue::parse_literal("1.5"), Some(PropertyValue::Float(1.5)));
        assert_eq!(PropertyValue::parse_literal("true"), Some(PropertyValue::Boolean(true)));
        assert_eq!(PropertyValue::parse_literal("NaN"), None);
        assert_eq!(PropertyValue::parse_literal("web1"), None);
    }

    #[test]
    fn test_property_value_untagged_json() {
        let props: PropertyMap =
            serde_json::from_str(r#"{"port": 22, "ratio": 0.5, "up": true, "os": "$1"}"#).unwrap();
        assert_eq!(props["port"], PropertyValue::Integer(22));
        assert_eq!(props["ratio"], PropertyValue::Float(0.5));
        assert_eq!(props["up"], PropertyValue::Boolean(true));
        assert_eq!(props["os"], PropertyValue::from("$1"));
    }
}

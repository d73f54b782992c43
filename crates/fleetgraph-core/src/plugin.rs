//! Typed plugin descriptors.
//!
//! A descriptor is a flat JSON document describing one discovery check: the
//! script to run remotely and how its output maps onto graph entities. The
//! `type` field selects the mode:
//!
//! - `"properties"`: enrich the subject server node with row values
//! - `"relation"`: build a left node, a right node and an edge per row
//! - anything else: a presence check; `type` is the class of the target node

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};

use crate::error::FleetError;
use crate::template::{self, ConditionTemplate, TemplateError};
use crate::types::{validate_identifier, Node, PropertyMap};

/// One loaded plugin.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginDescriptor {
    /// Plugin name, usually the descriptor file stem.
    pub name: String,
    pub kind: PluginKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PluginKind {
    Properties(PropertiesPlugin),
    Relation(RelationPlugin),
    Presence(PresencePlugin),
}

/// Assigns resolved `node_params` onto the subject node.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertiesPlugin {
    pub script: PathBuf,
    pub node_params: PropertyMap,
}

/// Node template whose name, condition and properties may hold `$N` tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeTemplate {
    pub class: String,
    pub name: String,
    pub condition: Option<ConditionTemplate>,
    pub params: PropertyMap,
}

impl NodeTemplate {
    /// Build a concrete node from one row of plugin output.
    pub fn resolve(&self, fields: &[&str]) -> Result<Node, TemplateError> {
        let condition = match &self.condition {
            Some(cond) => Some(cond.resolve(fields)?),
            None => None,
        };
        Ok(Node {
            class: self.class.clone(),
            name: template::resolve(&self.name, fields)?,
            condition,
            properties: template::resolve_properties(&self.params, fields)?,
        })
    }
}

/// Builds `(left)-[rel_name]->(right)` per row.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationPlugin {
    pub script: PathBuf,
    /// `None` means the subject server node is the left endpoint.
    pub left: Option<NodeTemplate>,
    pub right: NodeTemplate,
    pub rel_name: String,
    pub rel_params: PropertyMap,
    pub enable_node_creation: bool,
    pub enable_node_update: bool,
    pub enable_relation_delete: bool,
    pub enable_relation_update: bool,
}

/// Links the subject to a fixed node depending on a check script's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct PresencePlugin {
    pub class: String,
    pub name: String,
    pub details: PropertyMap,
    pub check: CheckScript,
}

impl PresencePlugin {
    /// The target node. Presence descriptors are not templated.
    pub fn node(&self) -> Node {
        Node {
            class: self.class.clone(),
            name: self.name.clone(),
            condition: None,
            properties: self.details.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CheckScript {
    pub script: PathBuf,
    pub relation: String,
    pub truevalue: String,
    pub falsevalue: String,
}

/// A `type` that describes no graph work. Descriptors carrying it are skipped.
pub const INERT_TYPE: &str = "Relation";

impl PluginDescriptor {
    /// Whether a raw descriptor has the [`INERT_TYPE`].
    pub fn is_inert(value: &serde_json::Value) -> bool {
        value.get("type").and_then(|t| t.as_str()) == Some(INERT_TYPE)
    }

    pub fn from_json(name: &str, json: &str) -> Result<Self, FleetError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(name, value)
    }

    pub fn from_value(name: &str, value: serde_json::Value) -> Result<Self, FleetError> {
        let invalid = |reason: String| FleetError::Descriptor {
            plugin: name.to_string(),
            reason,
        };

        let plugin_type = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| invalid("missing string field `type`".to_string()))?
            .to_string();

        let kind = match plugin_type.as_str() {
            INERT_TYPE => return Err(invalid(format!("type `{INERT_TYPE}` maps to no graph work"))),
            "properties" => {
                let raw: RawProperties =
                    serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
                validate_keys("property key", &raw.node_params)?;
                PluginKind::Properties(PropertiesPlugin {
                    script: raw.script,
                    node_params: raw.node_params,
                })
            }
            "relation" => {
                let raw: RawRelation =
                    serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
                PluginKind::Relation(raw.into_plugin()?)
            }
            _ => {
                let raw: RawPresence =
                    serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
                validate_identifier("label", &raw.class)?;
                validate_identifier("relationship type", &raw.script.relation)?;
                validate_keys("property key", &raw.details)?;
                PluginKind::Presence(PresencePlugin {
                    class: raw.class,
                    name: raw.name,
                    details: raw.details,
                    check: raw.script,
                })
            }
        };

        Ok(Self {
            name: name.to_string(),
            kind,
        })
    }

    /// The script the driver runs for this plugin.
    pub fn script(&self) -> &Path {
        match &self.kind {
            PluginKind::Properties(p) => &p.script,
            PluginKind::Relation(p) => &p.script,
            PluginKind::Presence(p) => &p.check.script,
        }
    }

    pub fn mode(&self) -> &'static str {
        match self.kind {
            PluginKind::Properties(_) => "properties",
            PluginKind::Relation(_) => "relation",
            PluginKind::Presence(_) => "presence",
        }
    }
}

// ── Raw JSON shapes ───────────────────────────────────────────────

#[derive(Deserialize)]
struct RawProperties {
    script: PathBuf,
    #[serde(default)]
    node_params: PropertyMap,
}

#[derive(Deserialize)]
struct RawRelation {
    script: PathBuf,
    #[serde(default)]
    left_node: String,
    #[serde(default)]
    left_name: String,
    #[serde(default)]
    left_cond: String,
    #[serde(default)]
    left_params: PropertyMap,
    right_node: String,
    #[serde(default)]
    right_name: String,
    #[serde(default)]
    right_cond: String,
    #[serde(default)]
    right_params: PropertyMap,
    rel_name: String,
    #[serde(default)]
    rel_params: PropertyMap,
    #[serde(default, deserialize_with = "flag")]
    enable_node_creation: bool,
    #[serde(default, deserialize_with = "flag")]
    enable_node_update: bool,
    #[serde(default, deserialize_with = "flag")]
    enable_relation_delete: bool,
    #[serde(default, deserialize_with = "flag")]
    enable_relation_update: bool,
}

impl RawRelation {
    fn into_plugin(self) -> Result<RelationPlugin, FleetError> {
        let left = if self.left_node.is_empty() {
            None
        } else {
            Some(node_template(
                self.left_node,
                self.left_name,
                &self.left_cond,
                self.left_params,
            )?)
        };
        let right = node_template(
            self.right_node,
            self.right_name,
            &self.right_cond,
            self.right_params,
        )?;
        validate_identifier("relationship type", &self.rel_name)?;
        validate_keys("property key", &self.rel_params)?;

        Ok(RelationPlugin {
            script: self.script,
            left,
            right,
            rel_name: self.rel_name,
            rel_params: self.rel_params,
            enable_node_creation: self.enable_node_creation,
            enable_node_update: self.enable_node_update,
            enable_relation_delete: self.enable_relation_delete,
            enable_relation_update: self.enable_relation_update,
        })
    }
}

#[derive(Deserialize)]
struct RawPresence {
    #[serde(rename = "type")]
    class: String,
    name: String,
    #[serde(default)]
    details: PropertyMap,
    script: CheckScript,
}

fn node_template(
    class: String,
    name: String,
    cond: &str,
    params: PropertyMap,
) -> Result<NodeTemplate, FleetError> {
    validate_identifier("label", &class)?;
    validate_keys("property key", &params)?;
    Ok(NodeTemplate {
        class,
        name,
        condition: ConditionTemplate::parse(cond)?,
        params,
    })
}

fn validate_keys(kind: &'static str, map: &PropertyMap) -> Result<(), FleetError> {
    map.keys().try_for_each(|key| validate_identifier(kind, key))
}

/// Descriptor flags are `"true"` strings; JSON booleans are accepted too.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Text(s) => s == "true",
    })
}

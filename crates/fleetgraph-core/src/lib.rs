//! fleetgraph-core: Entity model, plugin descriptors and template resolution.
//!
//! This crate provides the foundational pieces shared by the graph adapter and
//! the discovery daemon:
//! - Node and Relationship values with their identity predicates
//! - A closed scalar type for property values
//! - `$N` placeholder resolution against rows of plugin output
//! - Typed plugin descriptors, validated once at load time

pub mod error;
pub mod plugin;
pub mod template;
pub mod types;

pub use error::FleetError;
pub use plugin::{PluginDescriptor, PluginKind};
pub use template::TemplateError;
pub use types::{IdentityCondition, Node, PropertyMap, PropertyValue, Relationship};

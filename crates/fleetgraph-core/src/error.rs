use thiserror::Error;

use crate::template::TemplateError;

/// Top-level error type for entity construction and descriptor loading.
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Invalid {kind} identifier: {value:?}")]
    InvalidIdentifier { kind: &'static str, value: String },

    #[error("Invalid identity condition {condition:?}: {reason}")]
    Condition { condition: String, reason: String },

    #[error("Invalid plugin descriptor {plugin}: {reason}")]
    Descriptor { plugin: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

//! Error types for the resource graph.

use thiserror::Error;

use crate::resource::ResourceId;

/// Result type alias for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// Errors raised while registering or querying resources.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(ResourceId),

    #[error("Unknown parent {parent} for resource '{name}'")]
    UnknownParent { name: String, parent: ResourceId },

    #[error("Resource '{name}' references unknown resource {reference}")]
    UnknownReference { name: String, reference: ResourceId },

    #[error("Duplicate resource: {kind} '{name}'")]
    DuplicateResource { kind: String, name: String },

    #[error("Invalid resource name: {0:?}")]
    InvalidName(String),

    #[error("Engine rejected resource '{name}': {message}")]
    Rejected { name: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

//! Error types for component builders.

use ostack_graph::GraphError;
use thiserror::Error;

/// Result type alias for component operations.
pub type ComponentResult<T> = Result<T, ComponentError>;

/// Errors that can occur while building components.
///
/// Everything except `Engine` is a configuration error raised before the
/// first resource of the failing component is registered.
#[derive(Error, Debug)]
pub enum ComponentError {
    #[error("Missing required field '{field}' on {resource}")]
    MissingField { resource: String, field: String },

    #[error("Invalid value for '{field}' on {resource}: {message}")]
    InvalidField {
        resource: String,
        field: String,
        message: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown {kind} reference '{name}'")]
    UnknownReference { kind: String, name: String },

    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error("Engine error: {0}")]
    Engine(#[from] GraphError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ComponentError {
    pub fn missing(resource: impl Into<String>, field: impl Into<String>) -> Self {
        ComponentError::MissingField {
            resource: resource.into(),
            field: field.into(),
        }
    }

    pub fn invalid(
        resource: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ComponentError::InvalidField {
            resource: resource.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether the error comes from the configuration rather than the engine.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ComponentError::MissingField { .. }
                | ComponentError::InvalidField { .. }
                | ComponentError::InvalidConfig(_)
                | ComponentError::UnknownReference { .. }
        )
    }
}

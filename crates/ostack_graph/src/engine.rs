//! The seam between component builders and an infrastructure engine.

use serde_json::{Map, Value};

use crate::error::GraphResult;
use crate::resource::{Resource, ResourceRequest};

/// An infrastructure-as-code engine that accepts resource registrations.
///
/// Registration only declares a resource: the engine decides when and in
/// which order the cloud calls happen, using the parent and output
/// edges carried by each request. Errors returned here come from the
/// engine or the provider and are passed through untouched by callers.
pub trait ResourceEngine {
    /// Register one resource and get back its handle.
    fn register(&mut self, request: ResourceRequest) -> GraphResult<Resource>;

    /// Attach named outputs to a previously registered resource.
    fn register_outputs(&mut self, resource: &Resource, outputs: Map<String, Value>)
        -> GraphResult<()>;
}

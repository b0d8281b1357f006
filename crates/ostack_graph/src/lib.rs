//! # ostack_graph
//!
//! Resource graph for ostack component resources.
//!
//! Builders never talk to a cloud directly. They hand
//! [`ResourceRequest`]s to a [`ResourceEngine`] and get back
//! [`Resource`] handles whose attributes are only known as deferred
//! [`Output`]s. Passing an output into another request is what declares
//! a dependency edge; the engine derives execution order from those
//! edges and from explicit parent/child ownership.
//!
//! [`ResourceGraph`] is the in-memory engine: an arena that records
//! every registration, rejects dangling references and duplicate names,
//! and can produce creation/destruction orders and a serializable
//! [`Plan`].
//!
//! ## Example
//!
//! ```rust
//! use ostack_graph::{ResourceEngine, ResourceGraph, ResourceKind, ResourceRequest};
//! use serde_json::json;
//!
//! let mut graph = ResourceGraph::new();
//! let instance = graph
//!     .register(ResourceRequest::new(ResourceKind::Instance, "web-00"))
//!     .unwrap();
//! let volume = graph
//!     .register(ResourceRequest::new(ResourceKind::Volume, "web-00-data-volume-00").parent(&instance))
//!     .unwrap();
//! let attach = graph
//!     .register(
//!         ResourceRequest::new(ResourceKind::VolumeAttach, "web-00-data-volume-00-attach")
//!             .parent(&volume)
//!             .args(&json!({
//!                 "instance_id": instance.id_output(),
//!                 "volume_id": volume.id_output(),
//!             }))
//!             .unwrap(),
//!     )
//!     .unwrap();
//!
//! assert_eq!(graph.destruction_order(), vec![attach.id, volume.id, instance.id]);
//! ```

pub mod engine;
pub mod error;
pub mod graph;
pub mod plan;
pub mod resource;

pub use engine::ResourceEngine;
pub use error::{GraphError, GraphResult};
pub use graph::{ResourceGraph, ResourceNode};
pub use plan::{Plan, PlannedResource};
pub use resource::{
    Input, Output, OutputRef, Resource, ResourceId, ResourceKind, ResourceRequest, OUTPUT_MARKER,
};

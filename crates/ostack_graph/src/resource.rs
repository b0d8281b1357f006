//! Resource handles, kinds, and deferred outputs.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GraphResult;

/// Key under which a serialized [`Output`] carries its reference.
pub const OUTPUT_MARKER: &str = "$ref";

/// Position of a resource inside a [`crate::ResourceGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub usize);

impl ResourceId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of a registered resource.
///
/// Provider kinds map onto the OpenStack provider schema; `Component`
/// carries the type token of a grouping resource that owns provider
/// resources but has no cloud counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Component(String),
    SecurityGroup,
    SecurityGroupRule,
    Port,
    Instance,
    Volume,
    VolumeAttach,
    InterfaceAttach,
    LoadBalancer,
    Listener,
    Pool,
    Members,
}

impl ResourceKind {
    pub fn component(type_token: impl Into<String>) -> Self {
        ResourceKind::Component(type_token.into())
    }

    /// Get the provider type token.
    pub fn type_token(&self) -> &str {
        match self {
            ResourceKind::Component(token) => token.as_str(),
            ResourceKind::SecurityGroup => "openstack:networking/secGroup:SecGroup",
            ResourceKind::SecurityGroupRule => "openstack:networking/secGroupRule:SecGroupRule",
            ResourceKind::Port => "openstack:networking/port:Port",
            ResourceKind::Instance => "openstack:compute/instance:Instance",
            ResourceKind::Volume => "openstack:blockstorage/volume:Volume",
            ResourceKind::VolumeAttach => "openstack:compute/volumeAttach:VolumeAttach",
            ResourceKind::InterfaceAttach => "openstack:compute/interfaceAttach:InterfaceAttach",
            ResourceKind::LoadBalancer => "openstack:loadbalancer/loadBalancer:LoadBalancer",
            ResourceKind::Listener => "openstack:loadbalancer/listener:Listener",
            ResourceKind::Pool => "openstack:loadbalancer/pool:Pool",
            ResourceKind::Members => "openstack:loadbalancer/members:Members",
        }
    }

    pub fn is_component(&self) -> bool {
        matches!(self, ResourceKind::Component(_))
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_token())
    }
}

/// Handle returned by an engine for a registered resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub name: String,
}

impl Resource {
    /// Deferred attribute of this resource.
    pub fn output(&self, attribute: impl Into<String>) -> Output {
        Output::new(self.id, attribute)
    }

    /// Deferred provider identifier of this resource.
    pub fn id_output(&self) -> Output {
        self.output("id")
    }
}

/// Target of an [`Output`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    pub resource: ResourceId,
    pub attribute: String,
}

/// Attribute of a resource that only the engine can resolve.
///
/// Outputs are plain values: passing one as a child's input is what
/// declares the dependency edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Output {
    #[serde(rename = "$ref")]
    pub reference: OutputRef,
}

impl Output {
    pub fn new(resource: ResourceId, attribute: impl Into<String>) -> Self {
        Self {
            reference: OutputRef {
                resource,
                attribute: attribute.into(),
            },
        }
    }

    pub fn resource(&self) -> ResourceId {
        self.reference.resource
    }

    pub fn attribute(&self) -> &str {
        &self.reference.attribute
    }
}

/// A known value or the output of another resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Input<T> {
    Output(Output),
    Value(T),
}

impl<T> Input<T> {
    pub fn as_value(&self) -> Option<&T> {
        match self {
            Input::Value(value) => Some(value),
            Input::Output(_) => None,
        }
    }

    pub fn as_output(&self) -> Option<&Output> {
        match self {
            Input::Output(output) => Some(output),
            Input::Value(_) => None,
        }
    }
}

impl<T> From<Output> for Input<T> {
    fn from(output: Output) -> Self {
        Input::Output(output)
    }
}

impl From<String> for Input<String> {
    fn from(value: String) -> Self {
        Input::Value(value)
    }
}

impl From<&str> for Input<String> {
    fn from(value: &str) -> Self {
        Input::Value(value.to_string())
    }
}

/// A request to register one resource with an engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceRequest {
    pub kind: ResourceKind,
    pub name: String,
    pub args: Value,
    pub parent: Option<ResourceId>,
    pub provider: Option<String>,
}

impl ResourceRequest {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            args: Value::Object(Map::new()),
            parent: None,
            provider: None,
        }
    }

    /// Serialize typed provider arguments into the request.
    pub fn args<A: Serialize>(mut self, args: &A) -> GraphResult<Self> {
        self.args = serde_json::to_value(args)?;
        Ok(self)
    }

    pub fn parent(mut self, parent: &Resource) -> Self {
        self.parent = Some(parent.id);
        self
    }

    pub fn provider(mut self, provider: Option<&str>) -> Self {
        self.provider = provider.map(str::to_string);
        self
    }

    /// Resources whose outputs appear anywhere in the arguments, in
    /// first-seen order.
    pub fn references(&self) -> Vec<ResourceId> {
        let mut found = Vec::new();
        collect_references(&self.args, &mut found);
        found
    }
}

fn collect_references(value: &Value, found: &mut Vec<ResourceId>) {
    match value {
        Value::Object(map) => {
            if let Some(reference) = map.get(OUTPUT_MARKER) {
                if let Ok(reference) = serde_json::from_value::<OutputRef>(reference.clone()) {
                    if !found.contains(&reference.resource) {
                        found.push(reference.resource);
                    }
                    return;
                }
            }
            for nested in map.values() {
                collect_references(nested, found);
            }
        }
        Value::Array(items) => {
            for nested in items {
                collect_references(nested, found);
            }
        }
        _ => {}
    }
}

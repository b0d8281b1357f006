//! In-memory resource graph.
//!
//! Resources live in an arena indexed by [`ResourceId`]. Every node
//! points at its parent and at the resources whose outputs it consumes;
//! since both must already exist when a node is registered, edges always
//! point backwards and the graph cannot contain a cycle.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::engine::ResourceEngine;
use crate::error::{GraphError, GraphResult};
use crate::plan::Plan;
use crate::resource::{Resource, ResourceId, ResourceKind, ResourceRequest};

/// A registered resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub name: String,
    pub parent: Option<ResourceId>,
    pub provider: Option<String>,
    pub args: Value,
    /// Resources whose outputs appear in `args`.
    pub inputs: Vec<ResourceId>,
    pub outputs: Map<String, Value>,
}

impl ResourceNode {
    pub fn handle(&self) -> Resource {
        Resource {
            id: self.id,
            kind: self.kind.clone(),
            name: self.name.clone(),
        }
    }

    /// Look up a top-level argument.
    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.args.get(key)
    }
}

/// Arena of registered resources that doubles as a recording engine.
#[derive(Debug, Default)]
pub struct ResourceGraph {
    nodes: Vec<ResourceNode>,
    names: HashMap<(ResourceKind, String), ResourceId>,
}

impl ResourceGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        id.index() < self.nodes.len()
    }

    pub fn get(&self, id: ResourceId) -> Option<&ResourceNode> {
        self.nodes.get(id.index())
    }

    /// Get a node, returning an error if it does not exist.
    pub fn get_required(&self, id: ResourceId) -> GraphResult<&ResourceNode> {
        self.get(id).ok_or(GraphError::ResourceNotFound(id))
    }

    /// All nodes in registration order.
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    pub fn find(&self, kind: &ResourceKind, name: &str) -> Option<&ResourceNode> {
        self.names
            .get(&(kind.clone(), name.to_string()))
            .and_then(|id| self.get(*id))
    }

    /// Direct children of a resource, in registration order.
    pub fn children(&self, id: ResourceId) -> Vec<&ResourceNode> {
        self.nodes.iter().filter(|n| n.parent == Some(id)).collect()
    }

    /// Resources without a parent.
    pub fn roots(&self) -> Vec<&ResourceNode> {
        self.nodes.iter().filter(|n| n.parent.is_none()).collect()
    }

    pub fn of_kind(&self, kind: &ResourceKind) -> Vec<&ResourceNode> {
        self.nodes.iter().filter(|n| &n.kind == kind).collect()
    }

    pub fn count_of(&self, kind: &ResourceKind) -> usize {
        self.nodes.iter().filter(|n| &n.kind == kind).count()
    }

    /// Everything a resource must wait for: its parent, then its inputs.
    pub fn dependencies(&self, id: ResourceId) -> Vec<ResourceId> {
        let Some(node) = self.get(id) else {
            return Vec::new();
        };
        let mut deps: Vec<ResourceId> = node.parent.into_iter().collect();
        for input in &node.inputs {
            if !deps.contains(input) {
                deps.push(*input);
            }
        }
        deps
    }

    /// A valid creation order, preferring lower ids among ready nodes.
    pub fn creation_order(&self) -> Vec<ResourceId> {
        let mut pending: Vec<usize> = vec![0; self.nodes.len()];
        let mut dependents: Vec<Vec<ResourceId>> = vec![Vec::new(); self.nodes.len()];

        for node in &self.nodes {
            for dep in self.dependencies(node.id) {
                pending[node.id.index()] += 1;
                dependents[dep.index()].push(node.id);
            }
        }

        let mut ready: BinaryHeap<Reverse<ResourceId>> = self
            .nodes
            .iter()
            .filter(|n| pending[n.id.index()] == 0)
            .map(|n| Reverse(n.id))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);
            for dependent in &dependents[id.index()] {
                pending[dependent.index()] -= 1;
                if pending[dependent.index()] == 0 {
                    ready.push(Reverse(*dependent));
                }
            }
        }
        order
    }

    /// Reverse of [`Self::creation_order`]: children before parents.
    pub fn destruction_order(&self) -> Vec<ResourceId> {
        let mut order = self.creation_order();
        order.reverse();
        order
    }

    /// Snapshot the graph in creation order.
    pub fn to_plan(&self) -> Plan {
        Plan::from_graph(self, &self.creation_order())
    }
}

impl ResourceEngine for ResourceGraph {
    fn register(&mut self, request: ResourceRequest) -> GraphResult<Resource> {
        if request.name.trim().is_empty() {
            return Err(GraphError::InvalidName(request.name));
        }

        if let Some(parent) = request.parent {
            if !self.contains(parent) {
                return Err(GraphError::UnknownParent {
                    name: request.name,
                    parent,
                });
            }
        }

        let inputs = request.references();
        if let Some(missing) = inputs.iter().find(|id| !self.contains(**id)) {
            return Err(GraphError::UnknownReference {
                name: request.name,
                reference: *missing,
            });
        }

        let key = (request.kind.clone(), request.name.clone());
        if self.names.contains_key(&key) {
            return Err(GraphError::DuplicateResource {
                kind: request.kind.to_string(),
                name: request.name,
            });
        }

        let id = ResourceId(self.nodes.len());
        debug!("Registering {} '{}' as {}", request.kind, request.name, id);

        let node = ResourceNode {
            id,
            kind: request.kind,
            name: request.name,
            parent: request.parent,
            provider: request.provider,
            args: request.args,
            inputs,
            outputs: Map::new(),
        };
        let handle = node.handle();
        self.names.insert(key, id);
        self.nodes.push(node);
        Ok(handle)
    }

    fn register_outputs(
        &mut self,
        resource: &Resource,
        outputs: Map<String, Value>,
    ) -> GraphResult<()> {
        let node = self
            .nodes
            .get_mut(resource.id.index())
            .ok_or(GraphError::ResourceNotFound(resource.id))?;
        node.outputs.extend(outputs);
        Ok(())
    }
}

//! Serializable snapshot of a resource graph.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::GraphResult;
use crate::graph::ResourceGraph;
use crate::resource::ResourceId;

/// One resource as it appears in a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedResource {
    pub id: ResourceId,
    /// Provider or component type token.
    #[serde(rename = "type")]
    pub type_token: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ResourceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub depends_on: Vec<ResourceId>,
    pub args: Value,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty", default)]
    pub outputs: serde_json::Map<String, Value>,
}

/// Ordered list of resources to hand to an engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub resources: Vec<PlannedResource>,
}

impl Plan {
    /// Build a plan listing the graph's nodes in the given order.
    pub fn from_graph(graph: &ResourceGraph, order: &[ResourceId]) -> Self {
        let resources = order
            .iter()
            .filter_map(|id| graph.get(*id))
            .map(|node| PlannedResource {
                id: node.id,
                type_token: node.kind.type_token().to_string(),
                name: node.name.clone(),
                parent: node.parent,
                provider: node.provider.clone(),
                depends_on: graph.dependencies(node.id),
                args: node.args.clone(),
                outputs: node.outputs.clone(),
            })
            .collect();

        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            resources,
        }
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Count of resources per type token.
    pub fn summary(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for resource in &self.resources {
            *counts.entry(resource.type_token.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn to_json_pretty(&self) -> GraphResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

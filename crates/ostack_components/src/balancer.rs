//! Load balancers and their listener, pool and member tree.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use tracing::{debug, info};

use ostack_graph::{Input, Output, Resource, ResourceEngine, ResourceKind, ResourceRequest};

use crate::context::ComponentContext;
use crate::error::{ComponentError, ComponentResult};
use crate::naming::join_name;

/// Component type token for load balancers.
pub const LOAD_BALANCER_TYPE: &str = "ostack:openstack:LoadBalancer";

/// Session persistence of a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persistence {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie_name: Option<String>,
}

/// One backend of a pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub address: Input<String>,
    pub protocol_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_state_up: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_port: Option<u16>,
}

impl MemberSpec {
    pub fn new(address: impl Into<Input<String>>, protocol_port: u16) -> Self {
        Self {
            name: None,
            address: address.into(),
            protocol_port,
            subnet_id: None,
            weight: None,
            backup: None,
            admin_state_up: None,
            monitor_address: None,
            monitor_port: None,
        }
    }
}

/// Every instance of a group as pool members, resolved by a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberGroupRef {
    /// Name of the instance group component.
    pub instances: String,
    pub protocol_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSpec {
    pub name: String,
    pub protocol: Option<String>,
    pub lb_method: Option<String>,
    pub persistence: Option<Persistence>,
    pub description: Option<String>,
    pub admin_state_up: Option<bool>,
    pub members: Vec<MemberSpec>,
    pub members_from: Vec<MemberGroupRef>,
}

impl PoolSpec {
    pub fn new(name: impl Into<String>, protocol: &str, lb_method: &str) -> Self {
        Self {
            name: name.into(),
            protocol: Some(protocol.to_string()),
            lb_method: Some(lb_method.to_string()),
            ..Default::default()
        }
    }

    pub fn member(mut self, member: MemberSpec) -> Self {
        self.members.push(member);
        self
    }

    fn validate(&self, resource: &str) -> ComponentResult<()> {
        if self.protocol.is_none() {
            return Err(ComponentError::missing(resource, "protocol"));
        }
        if self.lb_method.is_none() {
            return Err(ComponentError::missing(resource, "lb_method"));
        }
        if let Some(group) = self.members_from.first() {
            return Err(ComponentError::invalid(
                resource,
                "members_from",
                format!("instance group '{}' was not resolved", group.instances),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerSpec {
    pub name: String,
    pub protocol: Option<String>,
    pub protocol_port: Option<u16>,
    pub connection_limit: Option<i32>,
    pub timeout_client_data: Option<u32>,
    pub timeout_member_connect: Option<u32>,
    pub timeout_member_data: Option<u32>,
    pub timeout_tcp_inspect: Option<u32>,
    pub default_tls_container_ref: Option<String>,
    pub allowed_cidrs: Vec<String>,
    pub insert_headers: BTreeMap<String, String>,
    pub admin_state_up: Option<bool>,
    pub description: Option<String>,
    pub pools: Vec<PoolSpec>,
}

impl ListenerSpec {
    pub fn new(name: impl Into<String>, protocol: &str, protocol_port: u16) -> Self {
        Self {
            name: name.into(),
            protocol: Some(protocol.to_string()),
            protocol_port: Some(protocol_port),
            ..Default::default()
        }
    }

    pub fn pool(mut self, pool: PoolSpec) -> Self {
        self.pools.push(pool);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancerSpec {
    pub name: String,
    pub vip_subnet_id: Option<String>,
    pub vip_network_id: Option<String>,
    pub vip_port_id: Option<String>,
    pub vip_address: Option<String>,
    pub flavor_id: Option<String>,
    pub availability_zone: Option<String>,
    pub loadbalancer_provider: Option<String>,
    pub admin_state_up: Option<bool>,
    pub security_group_ids: Vec<String>,
    pub description: Option<String>,
    pub region: Option<String>,
    pub tenant_id: Option<String>,
    pub tags: Vec<String>,
    pub listeners: Vec<ListenerSpec>,
}

impl LoadBalancerSpec {
    pub fn new(name: impl Into<String>, vip_subnet_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vip_subnet_id: Some(vip_subnet_id.into()),
            ..Default::default()
        }
    }

    pub fn listener(mut self, listener: ListenerSpec) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Every pool of the load balancer, in declaration order.
    pub fn pools(&self) -> impl Iterator<Item = &PoolSpec> {
        self.listeners.iter().flat_map(|listener| listener.pools.iter())
    }

    pub fn pools_mut(&mut self) -> impl Iterator<Item = &mut PoolSpec> {
        self.listeners
            .iter_mut()
            .flat_map(|listener| listener.pools.iter_mut())
    }

    pub fn validate(&self) -> ComponentResult<()> {
        if self.name.trim().is_empty() {
            return Err(ComponentError::missing("load balancer", "name"));
        }
        let resource = format!("load balancer '{}'", self.name);
        if self.vip_subnet_id.is_none() && self.vip_network_id.is_none() && self.vip_port_id.is_none()
        {
            return Err(ComponentError::missing(resource, "vip_subnet_id"));
        }

        let mut listeners = HashSet::new();
        for listener in &self.listeners {
            if listener.name.trim().is_empty() {
                return Err(ComponentError::missing(
                    format!("listener of {}", resource),
                    "name",
                ));
            }
            if !listeners.insert(listener.name.as_str()) {
                return Err(ComponentError::invalid(
                    &resource,
                    "listeners",
                    format!("listener name '{}' is used twice", listener.name),
                ));
            }

            let listener_resource = format!("listener '{}' of {}", listener.name, resource);
            if listener.protocol.is_none() {
                return Err(ComponentError::missing(&listener_resource, "protocol"));
            }
            if listener.protocol_port.is_none() {
                return Err(ComponentError::missing(&listener_resource, "protocol_port"));
            }

            let mut pools = HashSet::new();
            for pool in &listener.pools {
                if pool.name.trim().is_empty() {
                    return Err(ComponentError::missing(
                        format!("pool of {}", listener_resource),
                        "name",
                    ));
                }
                if !pools.insert(pool.name.as_str()) {
                    return Err(ComponentError::invalid(
                        &listener_resource,
                        "pools",
                        format!("pool name '{}' is used twice", pool.name),
                    ));
                }
                pool.validate(&format!("pool '{}' of {}", pool.name, listener_resource))?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct LoadBalancerArgs<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    vip_subnet_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vip_network_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vip_port_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vip_address: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flavor_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    availability_zone: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    loadbalancer_provider: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    admin_state_up: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    security_group_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tenant_id: Option<&'a str>,
    tags: &'a [String],
}

#[derive(Debug, Serialize)]
struct ListenerArgs<'a> {
    name: &'a str,
    loadbalancer_id: Output,
    protocol: Option<&'a str>,
    protocol_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    connection_limit: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_client_data: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_member_connect: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_member_data: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_tcp_inspect: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    default_tls_container_ref: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    allowed_cidrs: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    insert_headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    admin_state_up: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct PoolArgs<'a> {
    name: &'a str,
    listener_id: Output,
    protocol: Option<&'a str>,
    lb_method: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    persistence: Option<Persistence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    admin_state_up: Option<bool>,
}

#[derive(Debug, Serialize)]
struct MembersArgs<'a> {
    pool_id: Output,
    members: &'a [MemberSpec],
}

/// A registered listener and its pools.
#[derive(Debug, Clone)]
pub struct CreatedListener {
    pub listener: Resource,
    pub pools: Vec<CreatedPool>,
}

/// A registered pool and its member set.
#[derive(Debug, Clone)]
pub struct CreatedPool {
    pub pool: Resource,
    pub members: Resource,
}

/// A registered load balancer tree.
#[derive(Debug, Clone)]
pub struct LoadBalancer {
    pub component: Resource,
    pub load_balancer: Resource,
    pub listeners: Vec<CreatedListener>,
}

impl LoadBalancer {
    pub fn new(
        engine: &mut dyn ResourceEngine,
        ctx: &ComponentContext,
        spec: &LoadBalancerSpec,
    ) -> ComponentResult<Self> {
        spec.validate()?;
        let tags = ctx.base.tags_for(&spec.name, &spec.tags);

        info!(
            "Creating load balancer {} with {} listeners",
            spec.name,
            spec.listeners.len()
        );

        let component = engine.register(
            ResourceRequest::new(ResourceKind::component(LOAD_BALANCER_TYPE), &spec.name)
                .provider(ctx.provider()),
        )?;

        let load_balancer = engine.register(
            ResourceRequest::new(ResourceKind::LoadBalancer, &spec.name)
                .parent(&component)
                .provider(ctx.provider())
                .args(&LoadBalancerArgs {
                    name: &spec.name,
                    vip_subnet_id: spec.vip_subnet_id.as_deref(),
                    vip_network_id: spec.vip_network_id.as_deref(),
                    vip_port_id: spec.vip_port_id.as_deref(),
                    vip_address: spec.vip_address.as_deref(),
                    flavor_id: spec.flavor_id.as_deref(),
                    availability_zone: spec.availability_zone.as_deref(),
                    loadbalancer_provider: spec.loadbalancer_provider.as_deref(),
                    admin_state_up: spec.admin_state_up,
                    security_group_ids: spec.security_group_ids.clone(),
                    description: spec.description.as_deref(),
                    region: spec.region.as_deref(),
                    tenant_id: spec.tenant_id.as_deref(),
                    tags: &tags,
                })?,
        )?;

        let mut listeners = Vec::with_capacity(spec.listeners.len());
        for listener_spec in &spec.listeners {
            listeners.push(create_listener(
                engine,
                ctx,
                &load_balancer,
                listener_spec,
            )?);
        }

        let created = Self {
            component,
            load_balancer,
            listeners,
        };

        let mut outputs = Map::new();
        outputs.insert(
            "load_balancer_id".to_string(),
            json!(created.load_balancer.id_output()),
        );
        outputs.insert("vip_address".to_string(), json!(created.vip_address()));
        engine.register_outputs(&created.component, outputs)?;

        Ok(created)
    }

    pub fn id(&self) -> Output {
        self.load_balancer.id_output()
    }

    pub fn vip_address(&self) -> Output {
        self.load_balancer.output("vip_address")
    }

    pub fn pools(&self) -> impl Iterator<Item = &CreatedPool> {
        self.listeners.iter().flat_map(|l| l.pools.iter())
    }
}

fn create_listener(
    engine: &mut dyn ResourceEngine,
    ctx: &ComponentContext,
    load_balancer: &Resource,
    spec: &ListenerSpec,
) -> ComponentResult<CreatedListener> {
    let name = join_name(&[load_balancer.name.as_str(), spec.name.as_str()]);
    debug!("Creating listener {}", name);

    let listener = engine.register(
        ResourceRequest::new(ResourceKind::Listener, &name)
            .parent(load_balancer)
            .provider(ctx.provider())
            .args(&ListenerArgs {
                name: &name,
                loadbalancer_id: load_balancer.id_output(),
                protocol: spec.protocol.as_deref(),
                protocol_port: spec.protocol_port,
                connection_limit: spec.connection_limit,
                timeout_client_data: spec.timeout_client_data,
                timeout_member_connect: spec.timeout_member_connect,
                timeout_member_data: spec.timeout_member_data,
                timeout_tcp_inspect: spec.timeout_tcp_inspect,
                default_tls_container_ref: spec.default_tls_container_ref.as_deref(),
                allowed_cidrs: spec.allowed_cidrs.clone(),
                insert_headers: spec.insert_headers.clone(),
                admin_state_up: spec.admin_state_up,
                description: spec.description.as_deref(),
            })?,
    )?;

    let mut pools = Vec::with_capacity(spec.pools.len());
    for pool_spec in &spec.pools {
        let name = join_name(&[listener.name.as_str(), pool_spec.name.as_str()]);
        debug!("Creating pool {}", name);

        let pool = engine.register(
            ResourceRequest::new(ResourceKind::Pool, &name)
                .parent(&listener)
                .provider(ctx.provider())
                .args(&PoolArgs {
                    name: &name,
                    listener_id: listener.id_output(),
                    protocol: pool_spec.protocol.as_deref(),
                    lb_method: pool_spec.lb_method.as_deref(),
                    persistence: pool_spec.persistence.clone(),
                    description: pool_spec.description.as_deref(),
                    admin_state_up: pool_spec.admin_state_up,
                })?,
        )?;

        let members = engine.register(
            ResourceRequest::new(ResourceKind::Members, &name)
                .parent(&pool)
                .provider(ctx.provider())
                .args(&MembersArgs {
                    pool_id: pool.id_output(),
                    members: &pool_spec.members,
                })?,
        )?;

        pools.push(CreatedPool { pool, members });
    }

    Ok(CreatedListener { listener, pools })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::BaseContext;
    use ostack_graph::ResourceGraph;

    fn ctx() -> ComponentContext {
        ComponentContext::new(BaseContext::new("dev", "shop"))
    }

    fn web_balancer() -> LoadBalancerSpec {
        LoadBalancerSpec::new("web-lb", "subnet-1").listener(
            ListenerSpec::new("https", "HTTPS", 443)
                .pool(
                    PoolSpec::new("blue", "HTTP", "ROUND_ROBIN")
                        .member(MemberSpec::new("10.0.0.10", 8080))
                        .member(MemberSpec::new("10.0.0.11", 8080)),
                )
                .pool(
                    PoolSpec::new("green", "HTTP", "LEAST_CONNECTIONS")
                        .member(MemberSpec::new("10.0.1.10", 8080))
                        .member(MemberSpec::new("10.0.1.11", 8080)),
                ),
        )
    }

    #[test]
    fn test_validate_requires_vip() {
        let spec = LoadBalancerSpec {
            name: "lb".to_string(),
            ..Default::default()
        };
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("vip_subnet_id"));

        let spec = LoadBalancerSpec {
            vip_port_id: Some("port-1".to_string()),
            ..spec
        };
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let spec = web_balancer().listener(ListenerSpec::new("https", "HTTPS", 8443));
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("listener name 'https' is used twice"));

        let spec = LoadBalancerSpec::new("lb", "subnet-1").listener(
            ListenerSpec::new("http", "HTTP", 80)
                .pool(PoolSpec::new("app", "HTTP", "ROUND_ROBIN"))
                .pool(PoolSpec::new("app", "HTTP", "ROUND_ROBIN")),
        );
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("pool name 'app' is used twice"));
    }

    #[test]
    fn test_validate_requires_pool_method() {
        let mut pool = PoolSpec::new("app", "HTTP", "ROUND_ROBIN");
        pool.lb_method = None;
        let spec = LoadBalancerSpec::new("lb", "subnet-1")
            .listener(ListenerSpec::new("http", "HTTP", 80).pool(pool));

        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("lb_method"));
    }

    #[test]
    fn test_tree_names_and_parents() {
        let mut graph = ResourceGraph::new();
        let lb = LoadBalancer::new(&mut graph, &ctx(), &web_balancer()).unwrap();

        let listener = &lb.listeners[0];
        assert_eq!(listener.listener.name, "web-lb-https");
        assert_eq!(
            graph.get(listener.listener.id).unwrap().parent,
            Some(lb.load_balancer.id)
        );

        let names: Vec<_> = lb.pools().map(|p| p.pool.name.as_str()).collect();
        assert_eq!(names, vec!["web-lb-https-blue", "web-lb-https-green"]);

        for pool in lb.pools() {
            let node = graph.get(pool.pool.id).unwrap();
            assert_eq!(node.arg("listener_id"), Some(&json!(listener.listener.id_output())));

            let members = graph.get(pool.members.id).unwrap();
            assert_eq!(members.name, pool.pool.name);
            assert_eq!(members.parent, Some(pool.pool.id));
            assert_eq!(members.arg("members").unwrap().as_array().unwrap().len(), 2);
        }
    }

    #[test]
    fn test_invalid_spec_registers_nothing() {
        let mut graph = ResourceGraph::new();
        let spec = LoadBalancerSpec::new("", "subnet-1");
        assert!(LoadBalancer::new(&mut graph, &ctx(), &spec).is_err());
        assert!(graph.is_empty());
    }
}

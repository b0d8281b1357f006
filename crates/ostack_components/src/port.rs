//! Network ports for instances.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use ostack_graph::{Input, Output, Resource, ResourceEngine, ResourceKind, ResourceRequest};

use crate::context::ComponentContext;
use crate::error::{ComponentError, ComponentResult};
use crate::naming::{join_name, Ordinal};

/// Fixed address on a port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedIp {
    pub subnet_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

/// Extra address allowed to leave through a port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressPair {
    pub ip_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
}

/// Declarative network port.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSpec {
    pub network_id: Option<String>,
    pub admin_state_up: Option<bool>,
    pub description: Option<String>,
    pub fixed_ips: Vec<FixedIp>,
    pub no_fixed_ip: Option<bool>,
    pub mac_address: Option<String>,
    pub security_group_ids: Vec<Input<String>>,
    /// Names of security group components, resolved by a deployment.
    pub security_groups_from: Vec<String>,
    pub no_security_groups: Option<bool>,
    pub port_security_enabled: Option<bool>,
    pub allowed_address_pairs: Vec<AddressPair>,
    pub dns_name: Option<String>,
    pub qos_policy_id: Option<String>,
    pub region: Option<String>,
    pub tenant_id: Option<String>,
    pub value_specs: BTreeMap<String, String>,
}

impl PortSpec {
    pub fn on_network(network_id: impl Into<String>) -> Self {
        Self {
            network_id: Some(network_id.into()),
            ..Default::default()
        }
    }

    pub fn fixed_ip(mut self, subnet_id: impl Into<String>, ip_address: Option<&str>) -> Self {
        self.fixed_ips.push(FixedIp {
            subnet_id: subnet_id.into(),
            ip_address: ip_address.map(str::to_string),
        });
        self
    }

    pub fn security_group(mut self, id: impl Into<Input<String>>) -> Self {
        self.security_group_ids.push(id.into());
        self
    }

    pub fn validate(&self, resource: &str) -> ComponentResult<()> {
        if self
            .network_id
            .as_deref()
            .map_or(true, |id| id.trim().is_empty())
        {
            return Err(ComponentError::missing(resource, "network_id"));
        }
        if let Some(name) = self.security_groups_from.first() {
            return Err(ComponentError::invalid(
                resource,
                "security_groups_from",
                format!("security group '{}' was not resolved", name),
            ));
        }
        if self.no_fixed_ip == Some(true) && !self.fixed_ips.is_empty() {
            return Err(ComponentError::invalid(
                resource,
                "no_fixed_ip",
                "cannot be combined with fixed_ips",
            ));
        }
        if self.no_security_groups == Some(true) && !self.security_group_ids.is_empty() {
            return Err(ComponentError::invalid(
                resource,
                "no_security_groups",
                "cannot be combined with security_group_ids",
            ));
        }
        Ok(())
    }
}

/// Whether a port is bound at boot or attached to a running instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRole {
    Primary,
    Secondary,
}

impl PortRole {
    pub fn label(&self) -> &'static str {
        match self {
            PortRole::Primary => "port",
            PortRole::Secondary => "secondary-port",
        }
    }
}

/// Name of the port at `ordinal` owned by `owner`.
pub fn port_name(owner: &str, role: PortRole, ordinal: Ordinal) -> String {
    join_name(&[owner, role.label(), ordinal.suffix().as_str()])
}

#[derive(Debug, Serialize)]
struct PortArgs<'a> {
    name: &'a str,
    network_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    admin_state_up: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fixed_ips: Vec<FixedIp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    no_fixed_ip: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mac_address: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    security_group_ids: Vec<Input<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    no_security_groups: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port_security_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    allowed_address_pairs: Vec<AddressPair>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dns_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    qos_policy_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tenant_id: Option<&'a str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    value_specs: BTreeMap<String, String>,
    tags: &'a [String],
}

/// Register one port per spec, in input order, under `parent`.
///
/// Specs must already be validated.
pub fn create_ports(
    engine: &mut dyn ResourceEngine,
    ctx: &ComponentContext,
    parent: &Resource,
    owner: &str,
    role: PortRole,
    specs: &[PortSpec],
    tags: &[String],
) -> ComponentResult<Vec<Resource>> {
    let mut ports = Vec::with_capacity(specs.len());
    for (spec, ordinal) in specs.iter().zip(Ordinal::all(specs.len())) {
        let name = port_name(owner, role, ordinal);
        debug!("Creating port {}", name);

        let port = engine.register(
            ResourceRequest::new(ResourceKind::Port, &name)
                .parent(parent)
                .provider(ctx.provider())
                .args(&PortArgs {
                    name: &name,
                    network_id: spec.network_id.as_deref(),
                    admin_state_up: spec.admin_state_up,
                    description: spec.description.as_deref(),
                    fixed_ips: spec.fixed_ips.clone(),
                    no_fixed_ip: spec.no_fixed_ip,
                    mac_address: spec.mac_address.as_deref(),
                    security_group_ids: spec.security_group_ids.clone(),
                    no_security_groups: spec.no_security_groups,
                    port_security_enabled: spec.port_security_enabled,
                    allowed_address_pairs: spec.allowed_address_pairs.clone(),
                    dns_name: spec.dns_name.as_deref(),
                    qos_policy_id: spec.qos_policy_id.as_deref(),
                    region: spec.region.as_deref(),
                    tenant_id: spec.tenant_id.as_deref(),
                    value_specs: spec.value_specs.clone(),
                    tags,
                })?,
        )?;
        ports.push(port);
    }
    Ok(ports)
}

/// Deferred ids of the given ports, in order.
pub fn port_ids(ports: &[Resource]) -> Vec<Output> {
    ports.iter().map(Resource::id_output).collect()
}

#[derive(Debug, Serialize)]
struct InterfaceAttachArgs {
    instance_id: Output,
    port_id: Output,
}

/// Attach an already created port to a running instance.
pub fn attach_interface(
    engine: &mut dyn ResourceEngine,
    ctx: &ComponentContext,
    port: &Resource,
    instance: &Resource,
) -> ComponentResult<Resource> {
    let name = format!("{}-attach", port.name);
    let attachment = engine.register(
        ResourceRequest::new(ResourceKind::InterfaceAttach, name)
            .parent(port)
            .provider(ctx.provider())
            .args(&InterfaceAttachArgs {
                instance_id: instance.id_output(),
                port_id: port.id_output(),
            })?,
    )?;
    Ok(attachment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::BaseContext;
    use ostack_graph::ResourceGraph;
    use serde_json::json;

    #[test]
    fn test_port_names_use_role_and_ordinal() {
        assert_eq!(
            port_name("web-00", PortRole::Primary, Ordinal::new(1)),
            "web-00-port-01"
        );
        assert_eq!(
            port_name("web-00", PortRole::Secondary, Ordinal::new(0)),
            "web-00-secondary-port-00"
        );
    }

    #[test]
    fn test_validate_requires_network() {
        let err = PortSpec::default().validate("port of web-00").unwrap_err();
        assert!(err.to_string().contains("network_id"));
        assert!(PortSpec::on_network("net-1").validate("port").is_ok());
    }

    #[test]
    fn test_validate_rejects_unresolved_security_group() {
        let spec = PortSpec {
            security_groups_from: vec!["web".to_string()],
            ..PortSpec::on_network("net-1")
        };
        let err = spec.validate("port").unwrap_err();
        assert!(err.to_string().contains("'web' was not resolved"));
    }

    #[test]
    fn test_create_ports_preserves_order() {
        let mut graph = ResourceGraph::new();
        let ctx = ComponentContext::new(BaseContext::new("dev", "shop"));
        let owner = graph
            .register(ResourceRequest::new(
                ResourceKind::component("ostack:openstack:Instance"),
                "web",
            ))
            .unwrap();
        let specs = vec![
            PortSpec::on_network("net-c"),
            PortSpec::on_network("net-a"),
            PortSpec::on_network("net-b").security_group("sg-1"),
        ];

        let ports = create_ports(
            &mut graph,
            &ctx,
            &owner,
            "web-00",
            PortRole::Primary,
            &specs,
            &["env:dev".to_string()],
        )
        .unwrap();

        let networks: Vec<_> = ports
            .iter()
            .map(|p| graph.get(p.id).unwrap().arg("network_id").cloned().unwrap())
            .collect();
        assert_eq!(networks, vec![json!("net-c"), json!("net-a"), json!("net-b")]);
        assert_eq!(ports[2].name, "web-00-port-02");
        assert_eq!(
            graph.get(ports[2].id).unwrap().arg("security_group_ids"),
            Some(&json!(["sg-1"]))
        );
        assert_eq!(port_ids(&ports)[1], ports[1].id_output());
    }
}

//! Security group component.
//!
//! Expands a declarative ingress/egress rule set into one security group
//! and one rule resource per (direction, rule, remote) combination.
//! Provider-level rules accept a single remote prefix, so a rule naming
//! several prefixes fans out into several rule resources.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use tracing::{debug, info};

use ostack_graph::{Input, Output, Resource, ResourceEngine, ResourceKind, ResourceRequest};

use crate::context::ComponentContext;
use crate::error::{ComponentError, ComponentResult};
use crate::naming::{join_name, sanitize};

/// Component type token for security groups.
pub const SECURITY_GROUP_TYPE: &str = "ostack:openstack:SecGroup";

/// Sentinel meaning "no restriction" for ports and protocols.
const ANY: &str = "any";
const ANY_PORT: i32 = -1;

/// Traffic direction of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ingress,
    Egress,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Ingress => "ingress",
            Direction::Egress => "egress",
        }
    }
}

/// IP version a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Ethertype {
    #[default]
    #[serde(rename = "IPv4")]
    Ipv4,
    #[serde(rename = "IPv6")]
    Ipv6,
}

impl Ethertype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Ethertype::Ipv4 => "IPv4",
            Ethertype::Ipv6 => "IPv6",
        }
    }

    /// Prefix matching every address of this IP version.
    pub fn universal_prefix(&self) -> &'static str {
        match self {
            Ethertype::Ipv4 => "0.0.0.0/0",
            Ethertype::Ipv6 => "::/0",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Ethertype::Ipv4 => "ipv4",
            Ethertype::Ipv6 => "ipv6",
        }
    }
}

/// Security group a rule's traffic may come from or go to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteGroup {
    /// The group the rule belongs to.
    #[serde(rename = "self")]
    Own,
    /// Any existing group, by id.
    Id(String),
}

impl RemoteGroup {
    fn label(&self) -> String {
        match self {
            RemoteGroup::Own => "self".to_string(),
            RemoteGroup::Id(id) => sanitize(id),
        }
    }
}

/// One declarative rule. Its direction comes from the list it sits in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSpec {
    pub ethertype: Ethertype,
    pub protocol: Option<String>,
    /// Single port; takes precedence over the range.
    pub port: Option<i32>,
    pub port_range_min: Option<i32>,
    pub port_range_max: Option<i32>,
    pub description: Option<String>,
    pub remote_ip_prefix: Vec<String>,
    pub remote_group: Option<RemoteGroup>,
    pub region: Option<String>,
    pub tenant_id: Option<String>,
}

impl RuleSpec {
    pub fn new(ethertype: Ethertype) -> Self {
        Self {
            ethertype,
            ..Default::default()
        }
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn port(mut self, port: i32) -> Self {
        self.port = Some(port);
        self
    }

    pub fn port_range(mut self, min: i32, max: i32) -> Self {
        self.port_range_min = Some(min);
        self.port_range_max = Some(max);
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.remote_ip_prefix.push(prefix.into());
        self
    }

    pub fn remote_group(mut self, group: RemoteGroup) -> Self {
        self.remote_group = Some(group);
        self
    }

    /// Protocol to send to the provider; `any` and blank mean unset.
    pub fn effective_protocol(&self) -> Option<&str> {
        self.protocol
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty() && !p.eq_ignore_ascii_case(ANY))
    }

    /// Port bounds to send to the provider. `port` sets both bounds.
    pub fn port_bounds(&self) -> (Option<u16>, Option<u16>) {
        match port_value(self.port) {
            Some(port) => (Some(port), Some(port)),
            None => (
                port_value(self.port_range_min),
                port_value(self.port_range_max),
            ),
        }
    }

    /// Sorted, de-duplicated remote prefixes.
    pub fn sorted_prefixes(&self) -> Vec<String> {
        let mut prefixes: Vec<String> = self
            .remote_ip_prefix
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        prefixes.sort();
        prefixes.dedup();
        prefixes
    }

    fn port_label(&self) -> String {
        if let Some(port) = port_value(self.port) {
            return port.to_string();
        }
        let (min, max) = self.port_bounds();
        format!(
            "{}-{}",
            min.map(|p| p.to_string()).unwrap_or_else(|| ANY.to_string()),
            max.map(|p| p.to_string()).unwrap_or_else(|| ANY.to_string())
        )
    }

    fn validate(&self, resource: &str) -> ComponentResult<()> {
        for (field, value) in [
            ("port", self.port),
            ("port_range_min", self.port_range_min),
            ("port_range_max", self.port_range_max),
        ] {
            if let Some(value) = value {
                if value != ANY_PORT && !(0..=i32::from(u16::MAX)).contains(&value) {
                    return Err(ComponentError::invalid(
                        resource,
                        field,
                        format!("{} is not a port number or -1", value),
                    ));
                }
            }
        }

        if port_value(self.port).is_none() {
            if let (Some(min), Some(max)) = self.port_bounds() {
                if min > max {
                    return Err(ComponentError::invalid(
                        resource,
                        "port_range_min",
                        format!("{} is greater than port_range_max {}", min, max),
                    ));
                }
            }
        }

        let prefixes = self.sorted_prefixes();
        match (&self.remote_group, prefixes.is_empty()) {
            (None, true) => Err(ComponentError::missing(
                resource,
                "remote_ip_prefix or remote_group",
            )),
            (Some(_), false) => Err(ComponentError::invalid(
                resource,
                "remote_group",
                "cannot be combined with remote_ip_prefix",
            )),
            _ => Ok(()),
        }
    }
}

fn port_value(value: Option<i32>) -> Option<u16> {
    value
        .filter(|v| *v != ANY_PORT)
        .and_then(|v| u16::try_from(v).ok())
}

/// Rules grouped by direction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    pub ingress: Vec<RuleSpec>,
    pub egress: Vec<RuleSpec>,
}

impl RuleSet {
    fn by_direction(&self) -> [(Direction, &[RuleSpec]); 2] {
        [
            (Direction::Ingress, self.ingress.as_slice()),
            (Direction::Egress, self.egress.as_slice()),
        ]
    }
}

/// Declarative security group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityGroupSpec {
    pub name: String,
    pub description: Option<String>,
    pub region: Option<String>,
    pub tenant_id: Option<String>,
    pub tags: Vec<String>,
    pub rules: RuleSet,
    pub allow_self_ipv4: bool,
    pub allow_self_ipv6: bool,
    pub allow_ingress_all_ipv4: bool,
    pub allow_ingress_all_ipv6: bool,
    pub allow_egress_all_ipv4: bool,
    pub allow_egress_all_ipv6: bool,
}

impl SecurityGroupSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn ingress(mut self, rule: RuleSpec) -> Self {
        self.rules.ingress.push(rule);
        self
    }

    pub fn egress(mut self, rule: RuleSpec) -> Self {
        self.rules.egress.push(rule);
        self
    }
}

/// A rule resolved to exactly one remote, ready for registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRule {
    pub name: String,
    pub direction: Direction,
    pub ethertype: Ethertype,
    pub protocol: Option<String>,
    pub port_range_min: Option<u16>,
    pub port_range_max: Option<u16>,
    pub description: Option<String>,
    pub remote_ip_prefix: Option<String>,
    pub remote_group: Option<RemoteGroup>,
    pub region: Option<String>,
    pub tenant_id: Option<String>,
}

impl PlannedRule {
    fn convenience(
        name: String,
        direction: Direction,
        ethertype: Ethertype,
        description: String,
    ) -> Self {
        Self {
            name,
            direction,
            ethertype,
            protocol: None,
            port_range_min: None,
            port_range_max: None,
            description: Some(description),
            remote_ip_prefix: Some(ethertype.universal_prefix().to_string()),
            remote_group: None,
            region: None,
            tenant_id: None,
        }
    }
}

/// Expand a spec into its rules without registering anything.
///
/// Convenience rules come first, then ingress rules, then egress rules;
/// within a rule, prefixes are sorted so names do not depend on the
/// order they were written in.
pub fn plan_rules(spec: &SecurityGroupSpec) -> ComponentResult<Vec<PlannedRule>> {
    if spec.name.trim().is_empty() {
        return Err(ComponentError::missing("security group", "name"));
    }

    let mut planned = Vec::new();

    for (enabled, ethertype) in [
        (spec.allow_self_ipv4, Ethertype::Ipv4),
        (spec.allow_self_ipv6, Ethertype::Ipv6),
    ] {
        if enabled {
            let mut rule = PlannedRule::convenience(
                format!("{}-self-{}-allow", spec.name, ethertype.label()),
                Direction::Ingress,
                ethertype,
                format!("Allow all self {} traffic", ethertype.as_str()),
            );
            rule.remote_ip_prefix = None;
            rule.remote_group = Some(RemoteGroup::Own);
            planned.push(rule);
        }
    }

    for (enabled, direction, ethertype) in [
        (spec.allow_ingress_all_ipv4, Direction::Ingress, Ethertype::Ipv4),
        (spec.allow_ingress_all_ipv6, Direction::Ingress, Ethertype::Ipv6),
        (spec.allow_egress_all_ipv4, Direction::Egress, Ethertype::Ipv4),
        (spec.allow_egress_all_ipv6, Direction::Egress, Ethertype::Ipv6),
    ] {
        if enabled {
            let label = match direction {
                Direction::Ingress => "Ingress",
                Direction::Egress => "Egress",
            };
            planned.push(PlannedRule::convenience(
                format!(
                    "{}-all-{}-{}-allow",
                    spec.name,
                    direction.as_str(),
                    ethertype.label()
                ),
                direction,
                ethertype,
                format!("Allow all {} {} traffic", label, ethertype.as_str()),
            ));
        }
    }

    for (direction, rules) in spec.rules.by_direction() {
        for (position, rule) in rules.iter().enumerate() {
            let resource = format!(
                "{} rule of security group '{}' (#{})",
                direction.as_str(),
                spec.name,
                position
            );
            rule.validate(&resource)?;

            let (port_range_min, port_range_max) = rule.port_bounds();
            let protocol = rule.effective_protocol().map(str::to_string);
            let stem = join_name(&[
                spec.name.as_str(),
                direction.as_str(),
                protocol.as_deref().unwrap_or(ANY),
                rule.port_label().as_str(),
            ]);

            let base = PlannedRule {
                name: String::new(),
                direction,
                ethertype: rule.ethertype,
                protocol,
                port_range_min,
                port_range_max,
                description: rule.description.clone(),
                remote_ip_prefix: None,
                remote_group: None,
                region: rule.region.clone(),
                tenant_id: rule.tenant_id.clone(),
            };

            match &rule.remote_group {
                Some(group) => planned.push(PlannedRule {
                    name: format!("{}-{}-group-{}", stem, rule.ethertype.label(), group.label()),
                    remote_group: Some(group.clone()),
                    ..base
                }),
                None => {
                    for prefix in rule.sorted_prefixes() {
                        planned.push(PlannedRule {
                            name: format!("{}-{}", stem, sanitize(&prefix)),
                            remote_ip_prefix: Some(prefix),
                            ..base.clone()
                        });
                    }
                }
            }
        }
    }

    if let Some(duplicate) = first_duplicate(planned.iter().map(|r| r.name.as_str())) {
        return Err(ComponentError::invalid(
            format!("security group '{}'", spec.name),
            "rules",
            format!("two rules expand to the same name '{}'", duplicate),
        ));
    }

    Ok(planned)
}

fn first_duplicate<'a>(names: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut seen = std::collections::HashSet::new();
    names.into_iter().find(|name| !seen.insert(*name))
}

#[derive(Debug, Serialize)]
struct SecGroupArgs<'a> {
    name: &'a str,
    delete_default_rules: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tenant_id: Option<&'a str>,
    tags: &'a [String],
}

#[derive(Debug, Serialize)]
struct SecGroupRuleArgs<'a> {
    direction: Direction,
    ethertype: Ethertype,
    security_group_id: Output,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    protocol: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port_range_min: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port_range_max: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_ip_prefix: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_group_id: Option<Input<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tenant_id: Option<&'a str>,
}

/// A registered security group and its rules.
#[derive(Debug, Clone)]
pub struct SecurityGroup {
    pub component: Resource,
    pub group: Resource,
    pub rules: Vec<Resource>,
}

impl SecurityGroup {
    /// Plan every rule first, then register the group and its rules.
    pub fn new(
        engine: &mut dyn ResourceEngine,
        ctx: &ComponentContext,
        spec: &SecurityGroupSpec,
    ) -> ComponentResult<Self> {
        let planned = plan_rules(spec)?;
        let tags = ctx.base.tags_for(&spec.name, &spec.tags);

        info!(
            "Creating security group {} with {} rules",
            spec.name,
            planned.len()
        );

        let component = engine.register(
            ResourceRequest::new(ResourceKind::component(SECURITY_GROUP_TYPE), &spec.name)
                .provider(ctx.provider()),
        )?;

        let group = engine.register(
            ResourceRequest::new(ResourceKind::SecurityGroup, &spec.name)
                .parent(&component)
                .provider(ctx.provider())
                .args(&SecGroupArgs {
                    name: &spec.name,
                    delete_default_rules: true,
                    description: spec.description.as_deref(),
                    region: spec.region.as_deref(),
                    tenant_id: spec.tenant_id.as_deref(),
                    tags: &tags,
                })?,
        )?;

        let mut rules = Vec::with_capacity(planned.len());
        for rule in &planned {
            debug!("Creating security group rule {}", rule.name);
            let remote_group_id = rule.remote_group.as_ref().map(|remote| match remote {
                RemoteGroup::Own => Input::from(group.id_output()),
                RemoteGroup::Id(id) => Input::Value(id.clone()),
            });

            let resource = engine.register(
                ResourceRequest::new(ResourceKind::SecurityGroupRule, &rule.name)
                    .parent(&group)
                    .provider(ctx.provider())
                    .args(&SecGroupRuleArgs {
                        direction: rule.direction,
                        ethertype: rule.ethertype,
                        security_group_id: group.id_output(),
                        description: rule.description.as_deref(),
                        protocol: rule.protocol.as_deref(),
                        port_range_min: rule.port_range_min,
                        port_range_max: rule.port_range_max,
                        remote_ip_prefix: rule.remote_ip_prefix.as_deref(),
                        remote_group_id,
                        region: rule.region.as_deref(),
                        tenant_id: rule.tenant_id.as_deref(),
                    })?,
            )?;
            rules.push(resource);
        }

        let mut outputs = Map::new();
        outputs.insert("security_group_id".to_string(), json!(group.id_output()));
        outputs.insert("rule_count".to_string(), json!(rules.len()));
        engine.register_outputs(&component, outputs)?;

        Ok(Self {
            component,
            group,
            rules,
        })
    }

    /// Deferred id of the security group.
    pub fn id(&self) -> Output {
        self.group.id_output()
    }

    pub fn name(&self) -> &str {
        &self.group.name
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name.as_str()).collect()
    }
}

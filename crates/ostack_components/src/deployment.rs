//! Deployment documents.
//!
//! A deployment lists every component of one environment in a single
//! YAML, TOML or JSON file. Components refer to each other by name:
//! ports pick up security groups through `security_groups_from` and pools
//! pick up instance groups through `members_from`.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use ostack_graph::{Input, ResourceEngine, ResourceGraph};

use crate::balancer::{LoadBalancer, LoadBalancerSpec, MemberGroupRef, MemberSpec};
use crate::context::ComponentContext;
use crate::error::{ComponentError, ComponentResult};
use crate::instance::{plan_instances, InstanceGroup, InstanceGroupSpec, PlannedInstance};
use crate::naming::BaseContext;
use crate::secgroup::{plan_rules, SecurityGroup, SecurityGroupSpec};

/// Serialization format of a deployment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
    Json,
}

impl ConfigFormat {
    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> ComponentResult<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            "yaml" | "yml" => Ok(ConfigFormat::Yaml),
            "toml" => Ok(ConfigFormat::Toml),
            "json" => Ok(ConfigFormat::Json),
            _ => Err(ComponentError::UnsupportedFormat(path.display().to_string())),
        }
    }

    pub fn is_supported(path: &Path) -> bool {
        Self::from_path(path).is_ok()
    }
}

/// A named instance group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceComponentSpec {
    pub name: String,
    #[serde(flatten)]
    pub group: InstanceGroupSpec,
}

/// Every component of one environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub base: BaseContext,
    /// Provider every resource is bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub security_groups: Vec<SecurityGroupSpec>,
    #[serde(default)]
    pub instances: Vec<InstanceComponentSpec>,
    #[serde(default)]
    pub load_balancers: Vec<LoadBalancerSpec>,
}

/// Components registered by [`Deployment::apply`].
#[derive(Debug, Clone, Default)]
pub struct DeploymentOutputs {
    pub security_groups: Vec<SecurityGroup>,
    pub instance_groups: Vec<(String, InstanceGroup)>,
    pub load_balancers: Vec<LoadBalancer>,
}

impl DeploymentOutputs {
    pub fn security_group(&self, name: &str) -> Option<&SecurityGroup> {
        self.security_groups.iter().find(|sg| sg.name() == name)
    }

    pub fn instance_group(&self, name: &str) -> Option<&InstanceGroup> {
        self.instance_groups
            .iter()
            .find(|(group, _)| group == name)
            .map(|(_, group)| group)
    }

    pub fn load_balancer(&self, name: &str) -> Option<&LoadBalancer> {
        self.load_balancers
            .iter()
            .find(|lb| lb.load_balancer.name == name)
    }
}

impl Deployment {
    pub fn new(base: BaseContext) -> Self {
        Self {
            base,
            provider: None,
            security_groups: Vec::new(),
            instances: Vec::new(),
            load_balancers: Vec::new(),
        }
    }

    /// Load a deployment, picking the format from the file extension.
    pub fn from_file(path: impl AsRef<Path>) -> ComponentResult<Self> {
        let path = path.as_ref();
        debug!("Reading deployment from {:?}", path);

        let format = ConfigFormat::from_path(path)?;
        let content = fs::read_to_string(path)?;
        Self::parse(&content, format)
    }

    pub fn parse(content: &str, format: ConfigFormat) -> ComponentResult<Self> {
        let deployment = match format {
            ConfigFormat::Yaml => serde_yaml::from_str(content)?,
            ConfigFormat::Toml => toml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
        };
        Ok(deployment)
    }

    pub fn from_yaml_str(content: &str) -> ComponentResult<Self> {
        Self::parse(content, ConfigFormat::Yaml)
    }

    /// Replace the environment or project, e.g. from command line flags.
    pub fn with_base_overrides(mut self, env: Option<&str>, project: Option<&str>) -> Self {
        if let Some(env) = env {
            self.base.env = env.to_string();
        }
        if let Some(project) = project {
            self.base.project = project.to_string();
        }
        self
    }

    pub fn context(&self) -> ComponentContext {
        let ctx = ComponentContext::new(self.base.clone());
        match &self.provider {
            Some(provider) => ctx.with_provider(provider),
            None => ctx,
        }
    }

    pub fn component_count(&self) -> usize {
        self.security_groups.len() + self.instances.len() + self.load_balancers.len()
    }

    /// Check the whole document without touching any real engine.
    ///
    /// The deployment is applied to a scratch graph, so every error that
    /// `apply` could raise before reaching the engine is reported here.
    pub fn validate(&self) -> ComponentResult<()> {
        self.apply(&mut ResourceGraph::new()).map(|_| ())
    }

    /// Register every component: security groups, then instance groups,
    /// then load balancers.
    ///
    /// The whole document is planned before the first registration, so a
    /// configuration error in any component leaves the engine untouched.
    pub fn apply(&self, engine: &mut dyn ResourceEngine) -> ComponentResult<DeploymentOutputs> {
        self.base.validate()?;
        self.check_references()?;
        let ctx = self.context();
        self.plan(&ctx)?;

        info!(
            "Applying deployment {} with {} components",
            self.base.name_prefix(),
            self.component_count()
        );

        let mut outputs = DeploymentOutputs::default();

        for spec in &self.security_groups {
            outputs
                .security_groups
                .push(SecurityGroup::new(engine, &ctx, spec)?);
        }

        for component in &self.instances {
            let group = resolve_security_groups(&component.group, |name| {
                outputs
                    .security_group(name)
                    .map(|sg| Input::from(sg.id()))
            })?;
            let created = InstanceGroup::new(engine, &ctx, &component.name, &group)?;
            outputs
                .instance_groups
                .push((component.name.clone(), created));
        }

        for spec in &self.load_balancers {
            let spec = resolve_members(spec, |group_ref| {
                outputs.instance_group(&group_ref.instances).map(|group| {
                    group
                        .instances
                        .iter()
                        .map(|instance| {
                            group_member(group_ref, instance.name(), instance.access_ip_v4())
                        })
                        .collect()
                })
            })?;
            outputs
                .load_balancers
                .push(LoadBalancer::new(engine, &ctx, &spec)?);
        }

        Ok(outputs)
    }

    /// Plan every component without registering anything.
    ///
    /// References to other components resolve to placeholder values here;
    /// only the shape of the configuration is checked.
    fn plan(&self, ctx: &ComponentContext) -> ComponentResult<()> {
        for spec in &self.security_groups {
            plan_rules(spec)?;
        }

        let mut planned: HashMap<&str, Vec<PlannedInstance>> = HashMap::new();
        for component in &self.instances {
            let group = resolve_security_groups(&component.group, |name| {
                Some(Input::Value(name.to_string()))
            })?;
            planned.insert(
                component.name.as_str(),
                plan_instances(ctx, &component.name, &group)?,
            );
        }

        for spec in &self.load_balancers {
            let spec = resolve_members(spec, |group_ref| {
                planned.get(group_ref.instances.as_str()).map(|instances| {
                    instances
                        .iter()
                        .map(|p| group_member(group_ref, &p.name, String::new()))
                        .collect()
                })
            })?;
            spec.validate()?;
        }

        debug!(
            "Planned {} security groups, {} instance groups, {} load balancers",
            self.security_groups.len(),
            planned.len(),
            self.load_balancers.len()
        );
        Ok(())
    }

    /// Component names are unique per kind and every reference names a
    /// declared component.
    fn check_references(&self) -> ComponentResult<()> {
        let security_groups =
            unique_names("security group", self.security_groups.iter().map(|s| s.name.as_str()))?;
        let instance_groups =
            unique_names("instance group", self.instances.iter().map(|i| i.name.as_str()))?;
        unique_names(
            "load balancer",
            self.load_balancers.iter().map(|l| l.name.as_str()),
        )?;

        for component in &self.instances {
            for port in component.group.port_specs() {
                if let Some(name) = port
                    .security_groups_from
                    .iter()
                    .find(|name| !security_groups.contains(name.as_str()))
                {
                    return Err(unknown("security group", name));
                }
            }
        }

        for spec in &self.load_balancers {
            for pool in spec.pools() {
                if let Some(group_ref) = pool
                    .members_from
                    .iter()
                    .find(|r| !instance_groups.contains(r.instances.as_str()))
                {
                    return Err(unknown("instance group", &group_ref.instances));
                }
            }
        }
        Ok(())
    }
}

/// Copy of `group` with every `security_groups_from` name replaced by
/// the id `id_of` returns for it.
fn resolve_security_groups(
    group: &InstanceGroupSpec,
    id_of: impl Fn(&str) -> Option<Input<String>>,
) -> ComponentResult<InstanceGroupSpec> {
    let mut group = group.clone();
    for port in group.port_specs_mut() {
        for name in std::mem::take(&mut port.security_groups_from) {
            let id = id_of(&name).ok_or_else(|| unknown("security group", &name))?;
            port.security_group_ids.push(id);
        }
    }
    Ok(group)
}

/// Copy of `spec` with every `members_from` entry replaced by the members
/// `members_of` returns for it.
fn resolve_members(
    spec: &LoadBalancerSpec,
    members_of: impl Fn(&MemberGroupRef) -> Option<Vec<MemberSpec>>,
) -> ComponentResult<LoadBalancerSpec> {
    let mut spec = spec.clone();
    for pool in spec.pools_mut() {
        for group_ref in std::mem::take(&mut pool.members_from) {
            let members = members_of(&group_ref)
                .ok_or_else(|| unknown("instance group", &group_ref.instances))?;
            pool.members.extend(members);
        }
    }
    Ok(spec)
}

fn group_member(
    group_ref: &MemberGroupRef,
    name: &str,
    address: impl Into<Input<String>>,
) -> MemberSpec {
    MemberSpec {
        name: Some(name.to_string()),
        subnet_id: group_ref.subnet_id.clone(),
        weight: group_ref.weight,
        ..MemberSpec::new(address, group_ref.protocol_port)
    }
}

fn unknown(kind: &str, name: &str) -> ComponentError {
    ComponentError::UnknownReference {
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

fn unique_names<'a>(
    kind: &str,
    names: impl Iterator<Item = &'a str>,
) -> ComponentResult<HashSet<&'a str>> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ComponentError::InvalidConfig(format!(
                "{} '{}' is declared twice",
                kind, name
            )));
        }
    }
    Ok(seen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ostack_graph::{ResourceGraph, ResourceKind};

    const WEB: &str = r#"
base:
  env: dev
  project: shop
provider: dc1
security_groups:
  - name: web
    rules:
      ingress:
        - protocol: tcp
          port: 443
          remote_ip_prefix: ["10.0.0.0/8", "192.168.0.0/16"]
instances:
  - name: web
    shared:
      count: 2
      flavor_name: m1.small
      image_name: ubuntu-22.04
      port_config:
        - network_id: net-1
          security_groups_from: [web]
load_balancers:
  - name: web-lb
    vip_subnet_id: subnet-1
    listeners:
      - name: https
        protocol: HTTPS
        protocol_port: 443
        pools:
          - name: app
            protocol: HTTP
            lb_method: ROUND_ROBIN
            members_from:
              - instances: web
                protocol_port: 8080
"#;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ConfigFormat::from_path(Path::new("a/deploy.yml")).unwrap(),
            ConfigFormat::Yaml
        );
        assert_eq!(
            ConfigFormat::from_path(Path::new("deploy.toml")).unwrap(),
            ConfigFormat::Toml
        );
        assert!(!ConfigFormat::is_supported(Path::new("deploy.ini")));
    }

    #[test]
    fn test_parse_yaml() {
        let deployment = Deployment::from_yaml_str(WEB).unwrap();
        assert_eq!(deployment.base.project, "shop");
        assert_eq!(deployment.component_count(), 3);
        assert_eq!(deployment.instances[0].group.shared.count, Some(2));
        assert_eq!(
            deployment.instances[0].group.shared.settings.flavor_name.as_deref(),
            Some("m1.small")
        );
    }

    #[test]
    fn test_apply_resolves_references() {
        let deployment = Deployment::from_yaml_str(WEB).unwrap();
        let mut graph = ResourceGraph::new();
        let outputs = deployment.apply(&mut graph).unwrap();

        let sg = outputs.security_group("web").unwrap();
        let group = outputs.instance_group("web").unwrap();
        assert_eq!(group.len(), 2);

        let port = graph.get(group.instances[0].ports[0].id).unwrap();
        assert_eq!(
            port.arg("security_group_ids"),
            Some(&serde_json::json!([sg.id()]))
        );

        let lb = outputs.load_balancer("web-lb").unwrap();
        let pool = lb.pools().next().unwrap();
        let members = graph.get(pool.members.id).unwrap();
        let members = members.arg("members").unwrap().as_array().unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0]["name"], "shop-dev-web-00");
        assert_eq!(
            members[1]["address"],
            serde_json::json!(group.instances[1].access_ip_v4())
        );

        assert_eq!(graph.count_of(&ResourceKind::Members), 1);
        assert_eq!(graph.len(), 14);
        assert!(graph.nodes().iter().all(|n| n.provider.as_deref() == Some("dc1")));
    }

    #[test]
    fn test_unknown_reference_registers_nothing() {
        let content = WEB.replace("security_groups_from: [web]", "security_groups_from: [db]");
        let deployment = Deployment::from_yaml_str(&content).unwrap();

        let mut graph = ResourceGraph::new();
        let err = deployment.apply(&mut graph).unwrap_err();
        assert!(matches!(
            err,
            ComponentError::UnknownReference { ref name, .. } if name == "db"
        ));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_invalid_instance_group_leaves_graph_empty() {
        let content = WEB.replace("        - network_id: net-1\n", "        - network_id: \"\"\n");
        let deployment = Deployment::from_yaml_str(&content).unwrap();

        let mut graph = ResourceGraph::new();
        let err = deployment.apply(&mut graph).unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("network_id"));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_duplicate_component_names() {
        let mut deployment = Deployment::from_yaml_str(WEB).unwrap();
        deployment
            .security_groups
            .push(SecurityGroupSpec::new("web"));

        let err = deployment.validate().unwrap_err();
        assert!(err.to_string().contains("security group 'web' is declared twice"));
    }

    #[test]
    fn test_base_overrides() {
        let deployment = Deployment::from_yaml_str(WEB)
            .unwrap()
            .with_base_overrides(Some("prod"), None);
        assert_eq!(deployment.base.name_prefix(), "shop-prod");
        assert!(deployment.validate().is_ok());
    }
}

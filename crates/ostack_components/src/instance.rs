//! Groups of compute instances with their ports and data volumes.
//!
//! A group is described by shared defaults plus an optional list of
//! per-instance overrides. Each instance is created in a fixed order:
//! primary ports, the instance itself, data volumes with their attachments,
//! then secondary ports attached to the running instance.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use tracing::{debug, info, warn};

use ostack_graph::{Input, Output, Resource, ResourceEngine, ResourceKind, ResourceRequest};

use crate::context::ComponentContext;
use crate::error::{ComponentError, ComponentResult};
use crate::naming::{join_name, Ordinal};
use crate::port::{attach_interface, create_ports, port_ids, PortRole, PortSpec};
use crate::volume::{create_data_volume, volume_name, AttachedVolume, VolumeSpec};

/// Component type token for instance groups.
pub const INSTANCE_TYPE: &str = "ostack:openstack:Instance";

/// Power state requested for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Active,
    Shutoff,
    Shelved,
}

/// Explicit network attachment, used when no primary ports are declared.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<Input<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_ip_v4: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_network: Option<bool>,
}

impl NetworkSpec {
    pub fn port(port: impl Into<Input<String>>) -> Self {
        Self {
            port: Some(port.into()),
            ..Default::default()
        }
    }
}

/// Instance attributes that can be shared across a group or overridden
/// per instance. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceSettings {
    pub flavor_id: Option<String>,
    pub flavor_name: Option<String>,
    pub image_id: Option<String>,
    pub image_name: Option<String>,
    pub key_pair: Option<String>,
    pub availability_zone: Option<String>,
    pub region: Option<String>,
    pub security_groups: Option<Vec<String>>,
    pub metadata: Option<BTreeMap<String, String>>,
    pub user_data: Option<String>,
    pub config_drive: Option<bool>,
    pub power_state: Option<PowerState>,
    pub stop_before_destroy: Option<bool>,
    pub force_delete: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub networks: Option<Vec<NetworkSpec>>,
    pub port_config: Option<Vec<PortSpec>>,
    pub data_volumes_config: Option<Vec<VolumeSpec>>,
    pub secondary_port_config: Option<Vec<PortSpec>>,
}

fn pick<T: Clone>(item: &Option<T>, shared: &Option<T>) -> Option<T> {
    item.as_ref().or(shared.as_ref()).cloned()
}

impl InstanceSettings {
    /// Field-wise merge where every field set on `item` wins.
    ///
    /// Lists and maps are taken whole from one side, never concatenated.
    pub fn merge(shared: &InstanceSettings, item: &InstanceSettings) -> InstanceSettings {
        InstanceSettings {
            flavor_id: pick(&item.flavor_id, &shared.flavor_id),
            flavor_name: pick(&item.flavor_name, &shared.flavor_name),
            image_id: pick(&item.image_id, &shared.image_id),
            image_name: pick(&item.image_name, &shared.image_name),
            key_pair: pick(&item.key_pair, &shared.key_pair),
            availability_zone: pick(&item.availability_zone, &shared.availability_zone),
            region: pick(&item.region, &shared.region),
            security_groups: pick(&item.security_groups, &shared.security_groups),
            metadata: pick(&item.metadata, &shared.metadata),
            user_data: pick(&item.user_data, &shared.user_data),
            config_drive: pick(&item.config_drive, &shared.config_drive),
            power_state: pick(&item.power_state, &shared.power_state),
            stop_before_destroy: pick(&item.stop_before_destroy, &shared.stop_before_destroy),
            force_delete: pick(&item.force_delete, &shared.force_delete),
            tags: pick(&item.tags, &shared.tags),
            networks: pick(&item.networks, &shared.networks),
            port_config: pick(&item.port_config, &shared.port_config),
            data_volumes_config: pick(&item.data_volumes_config, &shared.data_volumes_config),
            secondary_port_config: pick(&item.secondary_port_config, &shared.secondary_port_config),
        }
    }

    pub fn ports(&self) -> &[PortSpec] {
        self.port_config.as_deref().unwrap_or_default()
    }

    pub fn volumes(&self) -> &[VolumeSpec] {
        self.data_volumes_config.as_deref().unwrap_or_default()
    }

    pub fn secondary_ports(&self) -> &[PortSpec] {
        self.secondary_port_config.as_deref().unwrap_or_default()
    }

    /// Every port spec, primary then secondary.
    pub fn port_specs(&self) -> impl Iterator<Item = &PortSpec> {
        self.ports().iter().chain(self.secondary_ports())
    }

    pub fn port_specs_mut(&mut self) -> impl Iterator<Item = &mut PortSpec> {
        self.port_config
            .iter_mut()
            .chain(self.secondary_port_config.iter_mut())
            .flatten()
    }

    fn validate(&self, instance: &str) -> ComponentResult<()> {
        if self.flavor_id.is_some() && self.flavor_name.is_some() {
            return Err(ComponentError::invalid(
                format!("instance '{}'", instance),
                "flavor_id",
                "cannot be combined with flavor_name",
            ));
        }
        for (spec, ordinal) in self.ports().iter().zip(Ordinal::all(self.ports().len())) {
            spec.validate(&format!("port {} of instance '{}'", ordinal, instance))?;
        }
        for (spec, ordinal) in self.volumes().iter().zip(Ordinal::all(self.volumes().len())) {
            spec.validate(&format!("data volume {} of instance '{}'", ordinal, instance))?;
        }
        let secondary = self.secondary_ports();
        for (spec, ordinal) in secondary.iter().zip(Ordinal::all(secondary.len())) {
            spec.validate(&format!(
                "secondary port {} of instance '{}'",
                ordinal, instance
            ))?;
        }
        Ok(())
    }
}

/// Per-instance override.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// Replaces the generated name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub settings: InstanceSettings,
}

/// Defaults for every instance of a group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharedInstanceSpec {
    /// Group name used in generated instance names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(flatten)]
    pub settings: InstanceSettings,
}

/// Shared defaults plus per-instance overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceGroupSpec {
    #[serde(default)]
    pub shared: SharedInstanceSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<InstanceSpec>>,
}

impl InstanceGroupSpec {
    pub fn with_count(count: usize, settings: InstanceSettings) -> Self {
        Self {
            shared: SharedInstanceSpec {
                name: None,
                count: Some(count),
                settings,
            },
            items: None,
        }
    }

    pub fn with_items(mut self, items: Vec<InstanceSpec>) -> Self {
        self.items = Some(items);
        self
    }

    /// Every port spec of the group, shared ones first.
    pub fn port_specs(&self) -> impl Iterator<Item = &PortSpec> {
        let items = self.items.iter().flatten();
        self.shared
            .settings
            .port_specs()
            .chain(items.flat_map(|item| item.settings.port_specs()))
    }

    pub fn port_specs_mut(&mut self) -> impl Iterator<Item = &mut PortSpec> {
        let items = self.items.iter_mut().flatten();
        self.shared
            .settings
            .port_specs_mut()
            .chain(items.flat_map(|item| item.settings.port_specs_mut()))
    }
}

/// Number of instances a group produces.
///
/// The larger of the shared count and the override list length; a group
/// with neither, or with an effective count of zero, is rejected.
pub fn resolve_count(group: &str, spec: &InstanceGroupSpec) -> ComponentResult<usize> {
    let count = match (spec.shared.count, spec.items.as_ref().map(Vec::len)) {
        (None, None) => {
            return Err(ComponentError::InvalidConfig(format!(
                "instance group '{}' needs shared.count or items",
                group
            )))
        }
        (Some(count), None) => count,
        (None, Some(len)) => len,
        (Some(count), Some(len)) => count.max(len),
    };
    if count == 0 {
        return Err(ComponentError::invalid(
            format!("instance group '{}'", group),
            "count",
            "must produce at least one instance",
        ));
    }
    Ok(count)
}

/// Fully resolved configuration of one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedInstance {
    pub name: String,
    pub ordinal: Ordinal,
    pub tags: Vec<String>,
    pub settings: InstanceSettings,
}

/// Merge, name and validate every instance of a group.
pub fn plan_instances(
    ctx: &ComponentContext,
    component: &str,
    spec: &InstanceGroupSpec,
) -> ComponentResult<Vec<PlannedInstance>> {
    ctx.base.validate()?;
    let count = resolve_count(component, spec)?;
    let group = spec.shared.name.as_deref().unwrap_or(component);
    let prefix = ctx.base.name_prefix();
    let no_override = InstanceSpec::default();

    let mut planned: Vec<PlannedInstance> = Vec::with_capacity(count);
    for ordinal in Ordinal::all(count) {
        let item = spec
            .items
            .as_ref()
            .and_then(|items| items.get(ordinal.index()))
            .unwrap_or(&no_override);

        let name = match item.name.as_deref() {
            Some(name) if name.trim().is_empty() => {
                return Err(ComponentError::invalid(
                    format!("instance {} of group '{}'", ordinal, group),
                    "name",
                    "must not be blank",
                ))
            }
            Some(name) => name.to_string(),
            None => join_name(&[prefix.as_str(), group, ordinal.suffix().as_str()]),
        };

        if planned.iter().any(|p| p.name == name) {
            return Err(ComponentError::invalid(
                format!("instance group '{}'", group),
                "name",
                format!("instance name '{}' is used twice", name),
            ));
        }

        let settings = InstanceSettings::merge(&spec.shared.settings, &item.settings);
        settings.validate(&name)?;
        let tags = ctx
            .base
            .tags_for(&name, settings.tags.as_deref().unwrap_or_default());

        planned.push(PlannedInstance {
            name,
            ordinal,
            tags,
            settings,
        });
    }
    Ok(planned)
}

#[derive(Debug, Serialize)]
struct InstanceArgs<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    flavor_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flavor_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key_pair: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    availability_zone: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    security_groups: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_data: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    config_drive: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    power_state: Option<PowerState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_before_destroy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    force_delete: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    networks: Vec<NetworkSpec>,
    tags: &'a [String],
}

/// Everything registered for one instance.
#[derive(Debug, Clone)]
pub struct CreatedInstance {
    pub instance: Resource,
    pub tags: Vec<String>,
    pub ports: Vec<Resource>,
    pub volumes: Vec<AttachedVolume>,
    pub secondary_ports: Vec<Resource>,
    pub interface_attachments: Vec<Resource>,
}

impl CreatedInstance {
    pub fn name(&self) -> &str {
        &self.instance.name
    }

    /// Deferred IPv4 address the instance is reachable on.
    pub fn access_ip_v4(&self) -> Output {
        self.instance.output("access_ip_v4")
    }
}

/// A registered group of instances.
#[derive(Debug, Clone)]
pub struct InstanceGroup {
    pub component: Resource,
    pub instances: Vec<CreatedInstance>,
}

impl InstanceGroup {
    /// Validate every instance, then register them in order.
    pub fn new(
        engine: &mut dyn ResourceEngine,
        ctx: &ComponentContext,
        name: &str,
        spec: &InstanceGroupSpec,
    ) -> ComponentResult<Self> {
        let planned = plan_instances(ctx, name, spec)?;
        info!("Creating instance group {} with {} instances", name, planned.len());

        let component = engine.register(
            ResourceRequest::new(ResourceKind::component(INSTANCE_TYPE), name)
                .provider(ctx.provider()),
        )?;

        let mut instances = Vec::with_capacity(planned.len());
        for plan in &planned {
            instances.push(create_instance(engine, ctx, &component, plan)?);
        }

        let group = Self {
            component,
            instances,
        };

        let mut outputs = Map::new();
        outputs.insert("instance_ids".to_string(), json!(group.instance_ids()));
        outputs.insert("all_tags".to_string(), json!(group.instance_tags()));
        outputs.insert("all_metadata".to_string(), json!(group.instance_metadata()));
        outputs.insert("access_ip_v4".to_string(), json!(group.access_ip_v4()));
        engine.register_outputs(&group.component, outputs)?;

        Ok(group)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn instance_ids(&self) -> Vec<Output> {
        self.instances.iter().map(|i| i.instance.id_output()).collect()
    }

    /// Tag sets as reported by the provider.
    pub fn instance_tags(&self) -> Vec<Output> {
        self.instances
            .iter()
            .map(|i| i.instance.output("all_tags"))
            .collect()
    }

    /// Metadata maps as reported by the provider.
    pub fn instance_metadata(&self) -> Vec<Output> {
        self.instances
            .iter()
            .map(|i| i.instance.output("all_metadata"))
            .collect()
    }

    pub fn access_ip_v4(&self) -> Vec<Output> {
        self.instances.iter().map(CreatedInstance::access_ip_v4).collect()
    }

    /// Every port of the group, in creation order.
    pub fn ports(&self) -> Vec<&Resource> {
        self.instances
            .iter()
            .flat_map(|i| i.ports.iter().chain(i.secondary_ports.iter()))
            .collect()
    }
}

fn create_instance(
    engine: &mut dyn ResourceEngine,
    ctx: &ComponentContext,
    component: &Resource,
    plan: &PlannedInstance,
) -> ComponentResult<CreatedInstance> {
    let settings = &plan.settings;
    debug!("Creating instance {}", plan.name);

    let ports = create_ports(
        engine,
        ctx,
        component,
        &plan.name,
        PortRole::Primary,
        settings.ports(),
        &plan.tags,
    )?;

    let networks = if ports.is_empty() {
        settings.networks.clone().unwrap_or_default()
    } else {
        if settings.networks.is_some() {
            warn!(
                "Instance {} declares both networks and port_config, using ports",
                plan.name
            );
        }
        port_ids(&ports).into_iter().map(NetworkSpec::port).collect()
    };

    let instance = engine.register(
        ResourceRequest::new(ResourceKind::Instance, &plan.name)
            .parent(component)
            .provider(ctx.provider())
            .args(&InstanceArgs {
                name: &plan.name,
                flavor_id: settings.flavor_id.as_deref(),
                flavor_name: settings.flavor_name.as_deref(),
                image_id: settings.image_id.as_deref(),
                image_name: settings.image_name.as_deref(),
                key_pair: settings.key_pair.as_deref(),
                availability_zone: settings.availability_zone.as_deref(),
                region: settings.region.as_deref(),
                security_groups: settings.security_groups.clone(),
                metadata: settings.metadata.clone(),
                user_data: settings.user_data.as_deref(),
                config_drive: settings.config_drive,
                power_state: settings.power_state,
                stop_before_destroy: settings.stop_before_destroy,
                force_delete: settings.force_delete,
                networks,
                tags: &plan.tags,
            })?,
    )?;

    let volume_specs = settings.volumes();
    let mut volumes = Vec::with_capacity(volume_specs.len());
    for (spec, ordinal) in volume_specs.iter().zip(Ordinal::all(volume_specs.len())) {
        let name = volume_name(&plan.name, ordinal);
        volumes.push(create_data_volume(engine, ctx, &instance, &name, spec)?);
    }

    let secondary_ports = create_ports(
        engine,
        ctx,
        &instance,
        &plan.name,
        PortRole::Secondary,
        settings.secondary_ports(),
        &plan.tags,
    )?;
    let mut interface_attachments = Vec::with_capacity(secondary_ports.len());
    for port in &secondary_ports {
        interface_attachments.push(attach_interface(engine, ctx, port, &instance)?);
    }

    Ok(CreatedInstance {
        instance,
        tags: plan.tags.clone(),
        ports,
        volumes,
        secondary_ports,
        interface_attachments,
    })
}

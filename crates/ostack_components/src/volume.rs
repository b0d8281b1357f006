//! Data volumes attached to instances.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use ostack_graph::{Output, Resource, ResourceEngine, ResourceKind, ResourceRequest};

use crate::context::ComponentContext;
use crate::error::{ComponentError, ComponentResult};
use crate::naming::{join_name, Ordinal};

/// Declarative block storage volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeSpec {
    /// Size in GB.
    pub size: Option<u32>,
    pub availability_zone: Option<String>,
    pub description: Option<String>,
    pub image_id: Option<String>,
    pub snapshot_id: Option<String>,
    pub source_vol_id: Option<String>,
    pub volume_type: Option<String>,
    pub consistency_group_id: Option<String>,
    pub enable_online_resize: Option<bool>,
    pub region: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl VolumeSpec {
    pub fn with_size(size: u32) -> Self {
        Self {
            size: Some(size),
            ..Default::default()
        }
    }

    pub fn validate(&self, resource: &str) -> ComponentResult<()> {
        match self.size {
            None => return Err(ComponentError::missing(resource, "size")),
            Some(0) => {
                return Err(ComponentError::invalid(
                    resource,
                    "size",
                    "must be greater than zero",
                ))
            }
            Some(_) => {}
        }

        let sources = [&self.image_id, &self.snapshot_id, &self.source_vol_id]
            .iter()
            .filter(|s| s.is_some())
            .count();
        if sources > 1 {
            return Err(ComponentError::invalid(
                resource,
                "image_id",
                "only one of image_id, snapshot_id and source_vol_id may be set",
            ));
        }
        Ok(())
    }
}

/// Name of the data volume at `ordinal` of `instance_name`.
pub fn volume_name(instance_name: &str, ordinal: Ordinal) -> String {
    join_name(&[instance_name, "data-volume", ordinal.suffix().as_str()])
}

#[derive(Debug, Serialize)]
struct VolumeArgs<'a> {
    name: &'a str,
    size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    availability_zone: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_vol_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    volume_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    consistency_group_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enable_online_resize: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<&'a str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct VolumeAttachArgs<'a> {
    instance_id: Output,
    volume_id: Output,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<&'a str>,
}

/// A volume and the resource binding it to its instance.
#[derive(Debug, Clone)]
pub struct AttachedVolume {
    pub volume: Resource,
    pub attachment: Resource,
}

/// Register a volume owned by `instance` and attach it.
///
/// The attachment is its own resource so that detaching does not
/// destroy the volume.
pub fn create_data_volume(
    engine: &mut dyn ResourceEngine,
    ctx: &ComponentContext,
    instance: &Resource,
    name: &str,
    spec: &VolumeSpec,
) -> ComponentResult<AttachedVolume> {
    debug!("Creating data volume {}", name);

    let volume = engine.register(
        ResourceRequest::new(ResourceKind::Volume, name)
            .parent(instance)
            .provider(ctx.provider())
            .args(&VolumeArgs {
                name,
                size: spec.size,
                availability_zone: spec.availability_zone.as_deref(),
                description: spec.description.as_deref(),
                image_id: spec.image_id.as_deref(),
                snapshot_id: spec.snapshot_id.as_deref(),
                source_vol_id: spec.source_vol_id.as_deref(),
                volume_type: spec.volume_type.as_deref(),
                consistency_group_id: spec.consistency_group_id.as_deref(),
                enable_online_resize: spec.enable_online_resize,
                region: spec.region.as_deref(),
                metadata: spec.metadata.clone(),
            })?,
    )?;

    let attachment = engine.register(
        ResourceRequest::new(ResourceKind::VolumeAttach, format!("{}-attach", name))
            .parent(&volume)
            .provider(ctx.provider())
            .args(&VolumeAttachArgs {
                instance_id: instance.id_output(),
                volume_id: volume.id_output(),
                region: spec.region.as_deref(),
            })?,
    )?;

    Ok(AttachedVolume { volume, attachment })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::BaseContext;
    use ostack_graph::ResourceGraph;
    use serde_json::json;

    #[test]
    fn test_validate_size() {
        let err = VolumeSpec::default().validate("volume").unwrap_err();
        assert!(err.to_string().contains("'size'"));

        let err = VolumeSpec::with_size(0).validate("volume").unwrap_err();
        assert!(err.to_string().contains("greater than zero"));

        assert!(VolumeSpec::with_size(20).validate("volume").is_ok());
    }

    #[test]
    fn test_single_source() {
        let spec = VolumeSpec {
            image_id: Some("img".to_string()),
            snapshot_id: Some("snap".to_string()),
            ..VolumeSpec::with_size(10)
        };
        assert!(spec.validate("volume").is_err());

        let spec = VolumeSpec {
            snapshot_id: Some("snap".to_string()),
            ..VolumeSpec::with_size(10)
        };
        assert!(spec.validate("volume").is_ok());
    }

    #[test]
    fn test_volume_attached_to_instance() {
        let mut graph = ResourceGraph::new();
        let ctx = ComponentContext::new(BaseContext::new("dev", "shop")).with_provider("dc1");
        let instance = graph
            .register(ResourceRequest::new(ResourceKind::Instance, "db-00"))
            .unwrap();

        let name = volume_name(&instance.name, Ordinal::new(0));
        let attached =
            create_data_volume(&mut graph, &ctx, &instance, &name, &VolumeSpec::with_size(50))
                .unwrap();

        assert_eq!(attached.volume.name, "db-00-data-volume-00");
        assert_eq!(attached.attachment.name, "db-00-data-volume-00-attach");

        let volume = graph.get(attached.volume.id).unwrap();
        assert_eq!(volume.parent, Some(instance.id));
        assert_eq!(volume.provider.as_deref(), Some("dc1"));

        let attach = graph.get(attached.attachment.id).unwrap();
        assert_eq!(attach.parent, Some(attached.volume.id));
        assert_eq!(attach.arg("instance_id"), Some(&json!(instance.id_output())));
        assert_eq!(
            attach.arg("volume_id"),
            Some(&json!(attached.volume.id_output()))
        );
    }
}

//! # ostack_components
//!
//! Reusable OpenStack component resources.
//!
//! Each builder validates its configuration up front, then registers a
//! tree of provider resources with a [`ResourceEngine`] in a fixed
//! dependency order, wiring parents' deferred ids into their children.
//!
//! ## Features
//!
//! - Deterministic names and tags from an environment/project context
//! - Security groups with prefix fan-out and convenience rules
//! - Instance groups from shared defaults plus per-instance overrides,
//!   with primary ports, data volumes and secondary interfaces
//! - Load balancers with listener, pool and member-set trees
//! - Deployment documents in YAML, TOML or JSON
//!
//! ## Example
//!
//! ```rust
//! use ostack_components::{
//!     BaseContext, ComponentContext, Ethertype, RuleSpec, SecurityGroup, SecurityGroupSpec,
//! };
//! use ostack_graph::ResourceGraph;
//!
//! let ctx = ComponentContext::new(BaseContext::new("dev", "shop"));
//! let spec = SecurityGroupSpec::new("web").ingress(
//!     RuleSpec::new(Ethertype::Ipv4)
//!         .protocol("tcp")
//!         .port(443)
//!         .prefix("10.0.0.0/8")
//!         .prefix("192.168.0.0/16"),
//! );
//!
//! let mut graph = ResourceGraph::new();
//! let sg = SecurityGroup::new(&mut graph, &ctx, &spec).unwrap();
//! assert_eq!(sg.rules.len(), 2);
//! ```
//!
//! [`ResourceEngine`]: ostack_graph::ResourceEngine

pub mod balancer;
pub mod context;
pub mod deployment;
pub mod error;
pub mod instance;
pub mod naming;
pub mod port;
pub mod secgroup;
pub mod volume;

pub use balancer::{
    CreatedListener, CreatedPool, ListenerSpec, LoadBalancer, LoadBalancerSpec, MemberGroupRef,
    MemberSpec, Persistence, PoolSpec,
};
pub use context::ComponentContext;
pub use deployment::{ConfigFormat, Deployment, DeploymentOutputs, InstanceComponentSpec};
pub use error::{ComponentError, ComponentResult};
pub use instance::{
    plan_instances, resolve_count, CreatedInstance, InstanceGroup, InstanceGroupSpec,
    InstanceSettings, InstanceSpec, NetworkSpec, PlannedInstance, PowerState, SharedInstanceSpec,
};
pub use naming::{join_name, merge_tags, ordinal_suffix, sanitize, BaseContext, Ordinal};
pub use port::{port_name, AddressPair, FixedIp, PortRole, PortSpec};
pub use secgroup::{
    plan_rules, Direction, Ethertype, PlannedRule, RemoteGroup, RuleSet, RuleSpec, SecurityGroup,
    SecurityGroupSpec,
};
pub use volume::{volume_name, AttachedVolume, VolumeSpec};

//! Integration tests for component builders.

use std::fs;

use mockall::{mock, Sequence};
use serde_json::{json, Map, Value};
use tempfile::tempdir;

use ostack_components::{
    BaseContext, ComponentContext, ComponentError, Deployment, Ethertype, InstanceGroup,
    InstanceGroupSpec, InstanceSettings, InstanceSpec, ListenerSpec, LoadBalancer,
    LoadBalancerSpec, MemberSpec, PoolSpec, PortSpec, RuleSpec, SecurityGroup, SecurityGroupSpec,
    VolumeSpec,
};
use ostack_graph::{
    GraphError, GraphResult, Resource, ResourceEngine, ResourceGraph, ResourceId, ResourceKind,
    ResourceRequest,
};

mock! {
    pub Engine {}

    impl ResourceEngine for Engine {
        fn register(&mut self, request: ResourceRequest) -> GraphResult<Resource>;
        fn register_outputs(
            &mut self,
            resource: &Resource,
            outputs: Map<String, Value>,
        ) -> GraphResult<()>;
    }
}

fn ctx() -> ComponentContext {
    ComponentContext::new(BaseContext::new("dev", "shop")).with_provider("dc1")
}

fn small() -> InstanceSettings {
    InstanceSettings {
        flavor_name: Some("m1.small".to_string()),
        image_name: Some("ubuntu-22.04".to_string()),
        ..Default::default()
    }
}

#[test]
fn test_web_security_group_fans_out_sorted_prefixes() {
    let spec = SecurityGroupSpec::new("web").ingress(
        RuleSpec::new(Ethertype::Ipv4)
            .protocol("tcp")
            .port(443)
            .prefix("192.168.0.0/16")
            .prefix("10.0.0.0/8"),
    );

    let mut graph = ResourceGraph::new();
    let sg = SecurityGroup::new(&mut graph, &ctx(), &spec).unwrap();

    assert_eq!(graph.count_of(&ResourceKind::SecurityGroup), 1);
    assert_eq!(graph.count_of(&ResourceKind::SecurityGroupRule), 2);
    assert_eq!(
        sg.rule_names(),
        vec![
            "web-ingress-tcp-443-10-0-0-0-8",
            "web-ingress-tcp-443-192-168-0-0-16"
        ]
    );

    for rule in &sg.rules {
        let node = graph.get(rule.id).unwrap();
        assert_eq!(node.arg("port_range_min"), Some(&json!(443)));
        assert_eq!(node.arg("port_range_max"), Some(&json!(443)));
        assert_eq!(node.arg("security_group_id"), Some(&json!(sg.id())));
    }
}

#[test]
fn test_rule_names_ignore_prefix_order() {
    let forward = SecurityGroupSpec::new("db").ingress(
        RuleSpec::new(Ethertype::Ipv4)
            .protocol("tcp")
            .port(5432)
            .prefix("10.1.0.0/16")
            .prefix("10.2.0.0/16"),
    );
    let reverse = SecurityGroupSpec::new("db").ingress(
        RuleSpec::new(Ethertype::Ipv4)
            .protocol("tcp")
            .port(5432)
            .prefix("10.2.0.0/16")
            .prefix("10.1.0.0/16"),
    );

    let mut first = ResourceGraph::new();
    let mut second = ResourceGraph::new();
    let a = SecurityGroup::new(&mut first, &ctx(), &forward).unwrap();
    let b = SecurityGroup::new(&mut second, &ctx(), &reverse).unwrap();
    assert_eq!(a.rule_names(), b.rule_names());
}

#[test]
fn test_instance_count_uses_larger_of_count_and_items() {
    let spec = InstanceGroupSpec::with_count(5, small()).with_items(vec![
        InstanceSpec::default(),
        InstanceSpec {
            name: Some("web-special".to_string()),
            settings: InstanceSettings {
                flavor_name: Some("m1.large".to_string()),
                ..Default::default()
            },
        },
        InstanceSpec::default(),
    ]);

    let mut graph = ResourceGraph::new();
    let group = InstanceGroup::new(&mut graph, &ctx(), "web", &spec).unwrap();
    assert_eq!(group.len(), 5);

    let names: Vec<_> = group.instances.iter().map(|i| i.name()).collect();
    assert_eq!(
        names,
        vec![
            "shop-dev-web-00",
            "web-special",
            "shop-dev-web-02",
            "shop-dev-web-03",
            "shop-dev-web-04"
        ]
    );

    let flavor = |i: usize| {
        graph
            .get(group.instances[i].instance.id)
            .unwrap()
            .arg("flavor_name")
            .cloned()
    };
    assert_eq!(flavor(1), Some(json!("m1.large")));
    assert_eq!(flavor(4), Some(json!("m1.small")));

    let spec = InstanceGroupSpec::with_count(2, small())
        .with_items(vec![InstanceSpec::default(); 5]);
    let mut graph = ResourceGraph::new();
    let group = InstanceGroup::new(&mut graph, &ctx(), "api", &spec).unwrap();
    assert_eq!(group.len(), 5);
    assert_eq!(group.instance_ids().len(), 5);
}

#[test]
fn test_networks_list_matches_created_ports() {
    let settings = InstanceSettings {
        port_config: Some(vec![
            PortSpec::on_network("net-front"),
            PortSpec::on_network("net-back"),
            PortSpec::on_network("net-mgmt"),
        ]),
        ..small()
    };
    let spec = InstanceGroupSpec::with_count(1, settings);

    let mut graph = ResourceGraph::new();
    let group = InstanceGroup::new(&mut graph, &ctx(), "web", &spec).unwrap();
    let created = &group.instances[0];

    let networks = graph
        .get(created.instance.id)
        .unwrap()
        .arg("networks")
        .unwrap()
        .as_array()
        .unwrap()
        .clone();
    assert_eq!(networks.len(), 3);
    for (i, network) in networks.iter().enumerate() {
        assert_eq!(network["port"], json!(created.ports[i].id_output()));
    }

    let order = graph.creation_order();
    let position = |id: ResourceId| order.iter().position(|x| *x == id).unwrap();
    for port in &created.ports {
        assert!(position(port.id) < position(created.instance.id));
    }
}

#[test]
fn test_volume_attach_references_instance_and_volume() {
    let settings = InstanceSettings {
        data_volumes_config: Some(vec![VolumeSpec::with_size(20), VolumeSpec::with_size(100)]),
        ..small()
    };
    let spec = InstanceGroupSpec::with_count(2, settings);

    let mut graph = ResourceGraph::new();
    let group = InstanceGroup::new(&mut graph, &ctx(), "db", &spec).unwrap();

    assert_eq!(graph.count_of(&ResourceKind::Volume), 4);
    assert_eq!(graph.count_of(&ResourceKind::VolumeAttach), 4);

    for created in &group.instances {
        for attached in &created.volumes {
            let attach = graph.get(attached.attachment.id).unwrap();
            assert_eq!(attach.arg("instance_id"), Some(&json!(created.instance.id_output())));
            assert_eq!(attach.arg("volume_id"), Some(&json!(attached.volume.id_output())));
        }
    }
    assert_eq!(
        group.instances[1].volumes[1].volume.name,
        "shop-dev-db-01-data-volume-01"
    );

    let destruction = graph.destruction_order();
    let position = |id: ResourceId| destruction.iter().position(|x| *x == id).unwrap();
    let first = &group.instances[0];
    assert!(position(first.volumes[0].attachment.id) < position(first.volumes[0].volume.id));
    assert!(position(first.volumes[0].volume.id) < position(first.instance.id));
}

#[test]
fn test_load_balancer_tree() {
    let member = |address: &str| MemberSpec::new(address, 8080);
    let spec = LoadBalancerSpec::new("web-lb", "subnet-1").listener(
        ListenerSpec::new("http", "HTTP", 80)
            .pool(
                PoolSpec::new("blue", "HTTP", "ROUND_ROBIN")
                    .member(member("10.0.0.1"))
                    .member(member("10.0.0.2")),
            )
            .pool(
                PoolSpec::new("green", "HTTP", "ROUND_ROBIN")
                    .member(member("10.0.0.3"))
                    .member(member("10.0.0.4")),
            ),
    );

    let mut graph = ResourceGraph::new();
    let lb = LoadBalancer::new(&mut graph, &ctx(), &spec).unwrap();

    assert_eq!(graph.count_of(&ResourceKind::LoadBalancer), 1);
    assert_eq!(graph.count_of(&ResourceKind::Listener), 1);
    assert_eq!(graph.count_of(&ResourceKind::Pool), 2);
    assert_eq!(graph.count_of(&ResourceKind::Members), 2);

    let listener_id = json!(lb.listeners[0].listener.id_output());
    for pool in lb.pools() {
        assert_eq!(graph.get(pool.pool.id).unwrap().arg("listener_id"), Some(&listener_id));
    }
}

#[test]
fn test_config_error_issues_no_registration() {
    let mut engine = MockEngine::new();
    engine.expect_register().never();
    engine.expect_register_outputs().never();

    let spec = InstanceGroupSpec::default();
    let err = InstanceGroup::new(&mut engine, &ctx(), "web", &spec).unwrap_err();
    assert!(err.is_config_error());
}

#[test]
fn test_deployment_config_error_in_later_component_issues_no_registration() {
    let yaml = r#"
base:
  env: dev
  project: shop
security_groups:
  - name: web
    allow_self_ipv4: true
instances:
  - name: app
    shared:
      count: 1
      port_config:
        - security_groups_from: [web]
"#;
    let mut engine = MockEngine::new();
    engine.expect_register().never();
    engine.expect_register_outputs().never();

    let deployment = Deployment::from_yaml_str(yaml).unwrap();
    let err = deployment.apply(&mut engine).unwrap_err();
    assert!(err.is_config_error());
    assert!(err.to_string().contains("network_id"));
}

#[test]
fn test_deployment_invalid_load_balancer_issues_no_registration() {
    let yaml = r#"
base:
  env: dev
  project: shop
instances:
  - name: web
    shared:
      count: 2
      flavor_name: m1.small
load_balancers:
  - name: lb
    vip_subnet_id: subnet-1
    listeners:
      - name: http
        protocol: HTTP
        protocol_port: 80
        pools:
          - name: app
            protocol: HTTP
            members_from:
              - instances: web
                protocol_port: 8080
"#;
    let mut engine = MockEngine::new();
    engine.expect_register().never();
    engine.expect_register_outputs().never();

    let deployment = Deployment::from_yaml_str(yaml).unwrap();
    let err = deployment.apply(&mut engine).unwrap_err();
    assert!(err.is_config_error());
    assert!(err.to_string().contains("lb_method"));
}

#[test]
fn test_engine_errors_propagate_unchanged() {
    let mut engine = MockEngine::new();
    let mut seq = Sequence::new();

    engine
        .expect_register()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|request| {
            Ok(Resource {
                id: ResourceId(0),
                kind: request.kind,
                name: request.name,
            })
        });
    engine
        .expect_register()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|request| {
            Err(GraphError::Rejected {
                name: request.name,
                message: "quota exceeded".to_string(),
            })
        });
    engine.expect_register_outputs().never();

    let spec = SecurityGroupSpec::new("web")
        .ingress(RuleSpec::new(Ethertype::Ipv4).protocol("tcp").port(22).prefix("10.0.0.0/8"));
    let err = SecurityGroup::new(&mut engine, &ctx(), &spec).unwrap_err();

    assert!(!err.is_config_error());
    match err {
        ComponentError::Engine(GraphError::Rejected { name, message }) => {
            assert_eq!(name, "web");
            assert_eq!(message, "quota exceeded");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_deployment_from_toml_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("deploy.toml");
    fs::write(
        &path,
        r#"
provider = "dc1"

[base]
env = "staging"
project = "shop"
tags = ["team:platform"]

[[security_groups]]
name = "ssh"

[[security_groups.rules.ingress]]
protocol = "tcp"
port = 22
remote_ip_prefix = ["10.0.0.0/8"]

[[instances]]
name = "bastion"

[instances.shared]
count = 1
flavor_name = "m1.tiny"

[[instances.shared.port_config]]
network_id = "net-1"
security_groups_from = ["ssh"]
"#,
    )
    .unwrap();

    let deployment = Deployment::from_file(&path).unwrap();
    assert_eq!(deployment.base.env, "staging");

    let mut graph = ResourceGraph::new();
    let outputs = deployment.apply(&mut graph).unwrap();
    let group = outputs.instance_group("bastion").unwrap();
    let instance = graph.get(group.instances[0].instance.id).unwrap();

    assert_eq!(instance.name, "shop-staging-bastion-00");
    let tags = instance.arg("tags").unwrap().as_array().unwrap();
    assert!(tags.contains(&json!("team:platform")));
    assert!(tags.contains(&json!("shop-staging-bastion-00")));

    let port = graph.get(group.instances[0].ports[0].id).unwrap();
    let sg = outputs.security_group("ssh").unwrap();
    assert_eq!(port.arg("security_group_ids"), Some(&json!([sg.id()])));
}

#[test]
fn test_deployment_rejects_unknown_extension() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("deploy.ini");
    fs::write(&path, "base = {}").unwrap();

    let err = Deployment::from_file(&path).unwrap_err();
    assert!(matches!(err, ComponentError::UnsupportedFormat(_)));
}

#[test]
fn test_deployment_validate_reports_member_reference() {
    let yaml = r#"
base:
  env: dev
  project: shop
load_balancers:
  - name: lb
    vip_subnet_id: subnet-1
    listeners:
      - name: http
        protocol: HTTP
        protocol_port: 80
        pools:
          - name: app
            protocol: HTTP
            lb_method: ROUND_ROBIN
            members_from:
              - instances: missing
                protocol_port: 8080
"#;
    let deployment = Deployment::from_yaml_str(yaml).unwrap();
    let err = deployment.validate().unwrap_err();
    assert_eq!(err.to_string(), "Unknown instance group reference 'missing'");
}

//! Plan command - Expand a deployment into its resource graph.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use tracing::info;

use ostack_components::Deployment;
use ostack_graph::{Plan, ResourceGraph, ResourceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Args)]
pub struct PlanArgs {
    /// Deployment file (.yaml, .yml, .toml or .json)
    #[arg(short, long)]
    file: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// List resources in destruction order
    #[arg(long)]
    destroy: bool,

    /// Override the deployment environment
    #[arg(long, env = "OSTACK_ENV")]
    env: Option<String>,

    /// Override the deployment project
    #[arg(long, env = "OSTACK_PROJECT")]
    project: Option<String>,
}

pub fn execute(args: PlanArgs) -> Result<()> {
    info!("Planning deployment: {:?}", args.file);

    let deployment = Deployment::from_file(&args.file)
        .with_context(|| format!("Failed to load {}", args.file.display()))?
        .with_base_overrides(args.env.as_deref(), args.project.as_deref());

    let mut graph = ResourceGraph::new();
    deployment
        .apply(&mut graph)
        .with_context(|| format!("Failed to plan {}", args.file.display()))?;

    let order = if args.destroy {
        graph.destruction_order()
    } else {
        graph.creation_order()
    };
    let plan = Plan::from_graph(&graph, &order);

    match args.format {
        OutputFormat::Json => println!("{}", plan.to_json_pretty()?),
        OutputFormat::Text => print_text(&graph, &plan, &order, args.destroy)?,
    }

    Ok(())
}

fn print_text(
    graph: &ResourceGraph,
    plan: &Plan,
    order: &[ResourceId],
    destroy: bool,
) -> Result<()> {
    let (title, marker) = if destroy {
        ("🗑️  Destruction order", "-")
    } else {
        ("🏗️  Creation order", "+")
    };

    println!("{} ({} resources)", title, plan.len());
    for id in order {
        let node = graph.get_required(*id)?;
        println!(
            "  {}{} {} {}",
            "  ".repeat(depth(graph, *id)),
            marker,
            node.kind.type_token(),
            node.name
        );
    }

    println!();
    println!("📊 Summary:");
    for (type_token, count) in plan.summary() {
        println!("   {:>3} × {}", count, type_token);
    }
    Ok(())
}

/// Number of ancestors of a resource.
fn depth(graph: &ResourceGraph, id: ResourceId) -> usize {
    let mut depth = 0;
    let mut current = graph.get(id).and_then(|n| n.parent);
    while let Some(parent) = current {
        depth += 1;
        current = graph.get(parent).and_then(|n| n.parent);
    }
    depth
}

#[cfg(test)]
mod tests {
    use super::*;
    use ostack_graph::{ResourceEngine, ResourceKind, ResourceRequest};

    #[test]
    fn test_depth_follows_parents() {
        let mut graph = ResourceGraph::new();
        let instance = graph
            .register(ResourceRequest::new(ResourceKind::Instance, "web-00"))
            .unwrap();
        let volume = graph
            .register(ResourceRequest::new(ResourceKind::Volume, "web-00-data-volume-00").parent(&instance))
            .unwrap();
        let attach = graph
            .register(
                ResourceRequest::new(ResourceKind::VolumeAttach, "web-00-data-volume-00-attach")
                    .parent(&volume),
            )
            .unwrap();

        assert_eq!(depth(&graph, instance.id), 0);
        assert_eq!(depth(&graph, attach.id), 2);
    }
}

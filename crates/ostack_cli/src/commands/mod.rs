//! CLI command definitions.

use clap::{Parser, Subcommand};

pub mod plan;
pub mod validate;

/// ostack - OpenStack component resources
#[derive(Parser)]
#[command(name = "ostack")]
#[command(version, about = "ostack - OpenStack component resources")]
#[command(long_about = r#"
ostack expands deployment documents (security groups, instance groups and
load balancers) into a graph of OpenStack resources with deterministic
names, tags and creation order.

COMMANDS:
  plan      → Show the resources a deployment registers, in order
  validate  → Check deployment documents without registering anything

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments
  3 - Validation failure
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Expand a deployment and print its resource plan
    Plan(plan::PlanArgs),

    /// Validate one deployment file or a directory of them
    Validate(validate::ValidateArgs),
}

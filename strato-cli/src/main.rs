use std::collections::HashSet;
use std::io::{self, BufRead, Write};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use colored::Colorize;

use strato_aws::stack::{DeploymentSpec, ScalingBounds};
use strato_aws::CloudControlEngine;
use strato_core::engine::ProvisioningEngine;
use strato_core::graph::{Graph, NodeId};

#[derive(Parser)]
#[command(name = "strato")]
#[command(about = "Declare an Aurora Serverless v2 deployment as a dependency graph", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the deployment graph without submitting anything
    Plan {
        /// Leave out the load-test fleet and its access grant
        #[arg(long)]
        no_load_test_fleet: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },
    /// Submit the deployment graph to the provisioning engine
    Apply {
        /// Leave out the load-test fleet and its access grant
        #[arg(long)]
        no_load_test_fleet: bool,

        /// AWS region to submit to
        #[arg(long, default_value = "ap-northeast-1")]
        region: String,

        /// Minimum serverless capacity, in Aurora capacity units
        #[arg(long, default_value_t = 0.5)]
        min_capacity: f64,

        /// Maximum serverless capacity, in Aurora capacity units
        #[arg(long, default_value_t = 16.0)]
        max_capacity: f64,
    },
    /// Submit teardown of the whole deployment, in reverse order
    Destroy {
        /// Leave out the load-test fleet and its access grant
        #[arg(long)]
        no_load_test_fleet: bool,

        /// AWS region to submit to
        #[arg(long, default_value = "ap-northeast-1")]
        region: String,

        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Plan {
            no_load_test_fleet,
            no_color,
        } => run_plan(no_load_test_fleet, no_color),
        Commands::Apply {
            no_load_test_fleet,
            region,
            min_capacity,
            max_capacity,
        } => run_apply(no_load_test_fleet, &region, min_capacity, max_capacity).await,
        Commands::Destroy {
            no_load_test_fleet,
            region,
            auto_approve,
        } => run_destroy(no_load_test_fleet, &region, auto_approve).await,
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn spec(no_load_test_fleet: bool) -> DeploymentSpec {
    let spec = DeploymentSpec::new();
    if no_load_test_fleet {
        spec.without_load_test_fleet()
    } else {
        spec
    }
}

fn run_plan(no_load_test_fleet: bool, no_color: bool) -> anyhow::Result<()> {
    if no_color {
        colored::control::set_override(false);
    }

    let graph = spec(no_load_test_fleet)
        .build()
        .context("failed to build deployment graph")?;

    println!(
        "{} {} nodes, {} edges\n",
        "Deployment graph:".bold(),
        graph.len(),
        graph.edge_count()
    );
    print!("{}", render_tree(&graph));

    println!("\n{}", "Provisioning order:".bold());
    for (i, node) in graph.topological_order().into_iter().enumerate() {
        if let Some(resource) = graph.resource(node) {
            println!("  {}. {}", i + 1, resource.id);
        }
    }

    if !graph.outputs().is_empty() {
        println!("\n{}", "Outputs:".bold());
        for output in graph.outputs() {
            let source = graph
                .resource(output.node)
                .map(|r| r.id.to_string())
                .unwrap_or_default();
            println!(
                "  {} {} {}#{}",
                output.name.cyan(),
                "<-".dimmed(),
                source,
                output.attribute
            );
        }
    }

    Ok(())
}

async fn run_apply(
    no_load_test_fleet: bool,
    region: &str,
    min_capacity: f64,
    max_capacity: f64,
) -> anyhow::Result<()> {
    let graph = spec(no_load_test_fleet)
        .with_scaling(ScalingBounds {
            min_capacity,
            max_capacity,
        })
        .build()
        .context("failed to build deployment graph")?;

    let engine = CloudControlEngine::new(region).await;
    println!(
        "Submitting {} resources to {} ({})...",
        graph.len(),
        engine.name(),
        engine.region()
    );

    let submission = engine.submit(&graph).await?;

    println!(
        "\n{} submission {}",
        "Accepted:".green().bold(),
        submission.id
    );
    for (id, token) in &submission.requests {
        println!("  {} {} {}", "+".green(), id, format!("({token})").dimmed());
    }
    for (name, handle) in &submission.outputs {
        println!("  {} = {}", name.cyan(), handle);
    }

    Ok(())
}

async fn run_destroy(
    no_load_test_fleet: bool,
    region: &str,
    auto_approve: bool,
) -> anyhow::Result<()> {
    let graph = spec(no_load_test_fleet)
        .build()
        .context("failed to build deployment graph")?;

    if !auto_approve {
        println!(
            "{} This will submit teardown of {} resources in {}.",
            "Warning:".yellow().bold(),
            graph.len(),
            region
        );
        print!("Type 'yes' to continue: ");
        io::stdout().flush()?;

        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        if answer.trim() != "yes" {
            bail!("destroy cancelled");
        }
    }

    let engine = CloudControlEngine::new(region).await;
    let submission = engine.teardown(&graph).await?;

    println!(
        "{} teardown submission {}",
        "Accepted:".green().bold(),
        submission.id
    );
    for (id, token) in &submission.requests {
        println!("  {} {} {}", "-".red(), id, format!("({token})").dimmed());
    }

    Ok(())
}

/// Render the graph as a dependency tree, roots first
fn render_tree(graph: &Graph) -> String {
    let mut output = String::new();
    let mut visited = HashSet::new();

    let roots: Vec<NodeId> = graph
        .node_ids()
        .filter(|&id| graph.dependencies_of(id).is_empty())
        .collect();

    for root in roots {
        render_node(graph, root, "  ", true, true, &mut visited, &mut output);
    }
    output
}

fn render_node(
    graph: &Graph,
    node: NodeId,
    prefix: &str,
    is_last: bool,
    is_root: bool,
    visited: &mut HashSet<NodeId>,
    output: &mut String,
) {
    if !visited.insert(node) {
        return;
    }
    let Some(resource) = graph.resource(node) else {
        return;
    };

    let connector = if is_root {
        String::new()
    } else if is_last {
        format!("{}", "└── ".dimmed())
    } else {
        format!("{}", "├── ".dimmed())
    };

    output.push_str(&format!(
        "{}{}{}: {}\n",
        prefix,
        connector,
        resource.id.name,
        resource.id.kind.yellow()
    ));

    // Show a dependent under its deepest dependency: skip it here when one of
    // its other dependencies is also a dependent of this node.
    let dependents = graph.dependents_of(node);
    let children: Vec<NodeId> = dependents
        .iter()
        .filter(|&&child| {
            !graph
                .dependencies_of(child)
                .iter()
                .any(|dep| *dep != node && dependents.contains(dep))
        })
        .copied()
        .collect();

    let dim_pipe = format!("{}", "│".dimmed());
    let new_prefix = if is_root {
        format!("{prefix}  ")
    } else {
        format!("{}{}  ", prefix, if is_last { " " } else { &dim_pipe })
    };

    for (i, &child) in children.iter().enumerate() {
        let child_is_last = i == children.len() - 1;
        render_node(
            graph,
            child,
            &new_prefix,
            child_is_last,
            false,
            visited,
            output,
        );
    }
}

pub mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::engine::types::{NodeContext, Record, RunSummary};
use crate::fetch::HttpTransport;
use crate::nodes::NodeRegistry;

pub use config::IronLinkConfig;

#[derive(Parser)]
#[command(name = "ironlink", version, about = "GLPI, Dolibarr and LLM connector nodes")]
pub struct Cli {
    /// Path to a .env file to load (default: auto-detect .env in cwd)
    #[arg(long, global = true)]
    dotenv: Option<PathBuf>,

    /// Path to the YAML config (default: ironlink.yaml in cwd, if present)
    #[arg(long, global = true, env = "IRONLINK_CONFIG")]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute one node
    Run {
        /// Node type (see `ironlink nodes`)
        node: String,

        /// Node parameters as a JSON object
        #[arg(short, long, default_value = "{}")]
        params: String,

        /// Input items as a JSON array of objects
        #[arg(short, long)]
        input: Option<String>,

        /// Record per-item failures instead of aborting
        #[arg(long)]
        continue_on_fail: bool,

        /// Print only the records, without the run summary
        #[arg(short, long)]
        quiet: bool,
    },

    /// List available nodes
    Nodes,
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    load_dotenv(cli.dotenv.as_deref());

    match cli.command {
        Commands::Run {
            node,
            params,
            input,
            continue_on_fail,
            quiet,
        } => {
            let config = IronLinkConfig::load(cli.config_file.as_deref())?;
            cmd_run(&config, &node, &params, input.as_deref(), continue_on_fail, quiet).await
        }
        Commands::Nodes => cmd_nodes(),
    }
}

/// Load environment variables from a .env file.
/// If an explicit path is given, load from that path (warn if missing).
/// Otherwise, auto-detect .env in the current working directory (silently skip if absent).
fn load_dotenv(explicit_path: Option<&std::path::Path>) {
    match explicit_path {
        Some(path) => match dotenvy::from_path(path) {
            Ok(()) => info!("Loaded env from {}", path.display()),
            Err(e) => {
                eprintln!(
                    "Warning: Failed to load dotenv file '{}': {}",
                    path.display(),
                    e
                );
            }
        },
        None => match dotenvy::dotenv() {
            Ok(path) => info!("Loaded env from {}", path.display()),
            Err(dotenvy::Error::Io(_)) => {}
            Err(e) => {
                eprintln!("Warning: Failed to parse .env file: {}", e);
            }
        },
    }
}

/// Parse `--input`: a JSON array of objects, or a single object.
pub fn parse_input(input: Option<&str>) -> Result<Vec<Record>> {
    let Some(raw) = input else {
        return Ok(Vec::new());
    };
    let value: serde_json::Value =
        serde_json::from_str(raw).context("Failed to parse --input JSON")?;
    match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                serde_json::Value::Object(map) => Ok(map),
                _ => Err(anyhow::anyhow!("--input item {} is not a JSON object", i)),
            })
            .collect(),
        serde_json::Value::Object(map) => Ok(vec![map]),
        _ => anyhow::bail!("--input must be a JSON object or array of objects"),
    }
}

/// Build the execution context from configuration and the environment.
pub fn build_context(config: &IronLinkConfig, continue_on_fail: bool) -> Result<NodeContext> {
    let settings = config.fetch_settings();
    let transport =
        HttpTransport::new(settings.http_timeout).context("Failed to build HTTP client")?;
    let mut ctx = NodeContext::new(Arc::new(transport))
        .with_settings(settings)
        .continue_on_fail(continue_on_fail || config.continue_on_fail.unwrap_or(false));
    ctx.credentials = config.resolved_credentials(|var| std::env::var(var).ok());
    Ok(ctx)
}

async fn cmd_run(
    config: &IronLinkConfig,
    node_type: &str,
    params: &str,
    input: Option<&str>,
    continue_on_fail: bool,
    quiet: bool,
) -> Result<()> {
    let registry = NodeRegistry::with_builtins();
    let node = registry
        .get(node_type)
        .ok_or_else(|| anyhow::anyhow!("Unknown node type '{}'", node_type))?;

    let params: serde_json::Value =
        serde_json::from_str(params).context("Failed to parse --params JSON")?;
    let items = parse_input(input)?;
    let ctx = build_context(config, continue_on_fail)?;

    let run_id = uuid::Uuid::new_v4().to_string();
    let input_items = items.len();
    let started = Utc::now();
    info!(run_id = %run_id, node = node_type, items = input_items, "Executing node");

    let records = node.execute(&params, items, &ctx).await?;

    let summary = RunSummary {
        id: run_id,
        node_type: node_type.to_string(),
        started,
        finished: Utc::now(),
        input_items,
        output_records: records.len(),
    };

    if !quiet {
        let duration = summary.finished - summary.started;
        println!("Run ID: {}", summary.id);
        println!("Node: {}", summary.node_type);
        println!(
            "Records: {} (from {} input item(s)) in {}ms\n",
            summary.output_records,
            summary.input_items,
            duration.num_milliseconds()
        );
    }
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

fn cmd_nodes() -> Result<()> {
    let registry = NodeRegistry::with_builtins();
    let nodes = registry.list();

    println!("{:<20} DESCRIPTION", "NODE TYPE");
    println!("{}", "-".repeat(60));

    for (name, desc) in &nodes {
        println!("{:<20} {}", name, desc);
    }

    println!("\nTotal: {} node(s)", nodes.len());
    Ok(())
}

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};
use serde_json::Value;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use agentflow_core::config::AppConfig;
use agentflow_engine::expression::{ExpressionEvaluator, Scope, SimpleEvaluator};
use agentflow_engine::{Engine, GraphBuilder, GraphDocument};

#[derive(Parser)]
#[command(name = "agentflow", version, about = "Declarative dataflow graph runner")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "agentflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and execute a graph document, printing every node's outputs
    Run {
        /// Graph document (JSON)
        graph: PathBuf,
        /// Seed a context value, e.g. --set threshold=10
        #[arg(long = "set", value_name = "KEY=JSON")]
        set: Vec<String>,
        /// Print engine events to stderr
        #[arg(long)]
        events: bool,
    },
    /// Show nodes, entry nodes and adjacency of a graph document
    Inspect {
        /// Graph document (JSON)
        graph: PathBuf,
    },
    /// List registered node kinds and their ports
    Kinds,
    /// Evaluate an expression with the built-in evaluator
    Eval {
        expression: String,
        /// Bind a variable, e.g. --var input=5
        #[arg(long = "var", value_name = "KEY=JSON")]
        vars: Vec<String>,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "agentflow", &mut std::io::stdout());
        return Ok(());
    }

    // Missing config file means defaults
    let config = if cli.config.exists() {
        AppConfig::load(&cli.config)?
    } else {
        AppConfig::default()
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if cli.config.exists() {
        info!(path = %cli.config.display(), "Loaded config");
    }

    match cli.command {
        Commands::Run { graph, set, events } => run_graph(&config, &graph, &set, events).await,
        Commands::Inspect { graph } => inspect_graph(&config, &graph),
        Commands::Kinds => {
            let engine = Engine::from_config(&config);
            for kind in engine.registry().kinds() {
                let ports = engine.registry().get_node_ports(kind)?;
                println!(
                    "{:<12} in: [{}]  out: [{}]",
                    kind,
                    ports.inputs.join(", "),
                    ports.outputs.join(", ")
                );
            }
            Ok(())
        }
        Commands::Eval { expression, vars } => {
            let scope: Scope = parse_assignments(&vars)?;
            let value = SimpleEvaluator::new(&config.expression).evaluate(&expression, &scope)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Commands::Completions { .. } => Ok(()),
    }
}

fn load_graph(engine: &Engine, path: &Path) -> anyhow::Result<GraphBuilder> {
    let doc = GraphDocument::load(path)
        .map_err(|e| anyhow::anyhow!("Failed to load graph {}: {}", path.display(), e))?;
    Ok(GraphBuilder::from_document(&doc, engine.registry())?)
}

async fn run_graph(
    config: &AppConfig,
    path: &Path,
    set: &[String],
    print_events: bool,
) -> anyhow::Result<()> {
    let mut engine = Engine::from_config(config);
    let graph = load_graph(&engine, path)?.compile();
    let seed = parse_assignments(set)?;

    let mut rx = engine.event_bus().subscribe();
    let outcome = engine.execute_with_context(&graph, seed).await;

    if print_events {
        loop {
            match rx.try_recv() {
                Ok(event) => eprintln!("{}", serde_json::to_string(&event)?),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event output lagged, some events were dropped");
                }
                Err(_) => break,
            }
        }
    }

    let results = outcome?;
    let ordered: BTreeMap<_, BTreeMap<_, _>> = results
        .into_iter()
        .map(|(node, outputs)| (node, outputs.into_iter().collect()))
        .collect();
    println!("{}", serde_json::to_string_pretty(&ordered)?);
    Ok(())
}

fn inspect_graph(config: &AppConfig, path: &Path) -> anyhow::Result<()> {
    let engine = Engine::from_config(config);
    let graph = load_graph(&engine, path)?.compile();

    println!("Nodes ({}):", graph.len());
    for node in graph.nodes() {
        println!("  {} [{}]", node.id, node.kind);
    }

    println!("Entry nodes: {}", graph.get_entry_nodes().join(", "));

    println!("Adjacency:");
    for id in graph.get_all_node_ids() {
        let next = graph.get_next_nodes(id);
        if !next.is_empty() {
            println!("  {} -> {}", id, next.join(", "));
        }
        if let Some(node) = graph.get_node(id) {
            for branch in node.branches() {
                println!("  {} ?({}) -> {}", id, branch.condition, branch.target);
            }
        }
    }

    if let Err(e) = graph.validate_acyclic() {
        warn!(error = %e, "Graph contains a cycle; affected nodes will never run");
    }
    Ok(())
}

/// Parse `key=json` pairs. A value that is not valid JSON is taken as a string.
fn parse_assignments(pairs: &[String]) -> anyhow::Result<HashMap<String, Value>> {
    pairs
        .iter()
        .map(|pair| {
            let (key, raw) = pair
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("Expected KEY=VALUE, got '{}'", pair))?;
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            Ok((key.to_string(), value))
        })
        .collect()
}

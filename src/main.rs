use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nodeflow::config::Config;
use nodeflow::engine::Executor;
use nodeflow::expression::{infer_type, Evaluator};
use nodeflow::nodes::NodeRegistry;
use nodeflow::shutdown::ShutdownCoordinator;
use nodeflow::storage::{ExecutionStatus, MemoryStore, Variable, VariableStore};
use nodeflow::workflow::{parse_workflow_file, Graph};

#[derive(Parser)]
#[command(name = "nodeflow")]
#[command(about = "Graph workflow execution engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.config/nodeflow/config.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow file
    Run {
        /// Path to workflow YAML or JSON file
        file: String,
        /// JSON input data
        #[arg(short, long)]
        input: Option<String>,
        /// Global variable (key=value)
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,
        /// Override the step budget
        #[arg(long)]
        max_visits: Option<usize>,
        /// Print the full execution record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate a workflow file
    Validate {
        /// Path to workflow YAML or JSON file
        file: String,
    },
    /// List available node types
    Nodes,
    /// Evaluate an expression
    Eval {
        expression: String,
        /// Variable (key=value)
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,
    },
}

fn parse_var(s: &str) -> std::result::Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid variable format '{}'. Expected key=value", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(Path::new(path))?,
        None => Config::load(),
    };

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Run {
            file,
            input,
            vars,
            max_visits,
            json,
        } => cmd_run(config, &file, input.as_deref(), &vars, max_visits, json).await?,
        Commands::Validate { file } => cmd_validate(&file).await?,
        Commands::Nodes => cmd_nodes(&config),
        Commands::Eval { expression, vars } => cmd_eval(&config, &expression, &vars)?,
    }

    Ok(())
}

async fn cmd_run(
    mut config: Config,
    file: &str,
    input: Option<&str>,
    vars: &[(String, String)],
    max_visits: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let workflow = parse_workflow_file(Path::new(file)).await?;

    let input: Value = match input {
        Some(raw) => serde_json::from_str(raw)?,
        None => serde_json::json!({}),
    };

    let storage = Arc::new(MemoryStore::new());
    for (name, value) in vars {
        storage
            .save_variable(&Variable::global(name, infer_type(value)))
            .await?;
    }

    if let Some(max) = max_visits {
        config.engine.max_node_visits = max;
    }
    let executor = Executor::new(NodeRegistry::with_config(&config.engine), storage)
        .with_config(config.engine);

    let shutdown = ShutdownCoordinator::new();
    shutdown.start_signal_listener();
    {
        let executor = executor.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown.wait_for_shutdown().await;
            executor.shutdown();
        });
    }

    if !json {
        println!("Running workflow '{}'...", workflow.display_name());
    }
    let execution = executor.spawn(workflow, input).wait().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&execution)?);
    } else {
        println!();
        println!("Execution ID: {}", execution.id);
        println!("Status: {}", execution.status);
        println!("Node visits: {}", execution.node_executions.len());

        if let Some(error) = &execution.error_message {
            println!("Error: {}", error);
        }
        if let Some(duration) = execution.duration_ms() {
            println!("Duration: {}ms", duration);
        }
        if let Some(output) = &execution.output {
            println!("Output: {}", serde_json::to_string_pretty(output)?);
        }
    }

    if execution.status != ExecutionStatus::Success {
        anyhow::bail!("Execution {} ended with status {}", execution.id, execution.status);
    }
    Ok(())
}

async fn cmd_validate(file: &str) -> anyhow::Result<()> {
    let path = Path::new(file);
    if !path.exists() {
        anyhow::bail!("File not found: {}", file);
    }

    let workflow = parse_workflow_file(path).await?;
    let graph = Graph::build(&workflow)?;

    println!("✓ Workflow '{}' is valid", workflow.display_name());
    println!();
    println!("  Nodes: {}", graph.nodes().len());
    println!("  Connections: {}", graph.connections().len());
    let triggers: Vec<&str> = graph
        .trigger_nodes()
        .into_iter()
        .map(|n| n.id.as_str())
        .collect();
    println!("  Triggers: {}", triggers.join(", "));

    let registry = NodeRegistry::new();
    let unknown: Vec<&str> = workflow
        .nodes
        .iter()
        .filter(|n| !registry.has(&n.node_type))
        .map(|n| n.node_type.as_str())
        .collect();
    if !unknown.is_empty() {
        println!("  Unknown node types: {}", unknown.join(", "));
    }

    Ok(())
}

fn cmd_nodes(config: &Config) {
    let registry = NodeRegistry::with_config(&config.engine);
    for (name, description) in registry.descriptions() {
        println!("{:<12} {}", name, description);
    }
}

fn cmd_eval(config: &Config, expression: &str, vars: &[(String, String)]) -> anyhow::Result<()> {
    let scope: HashMap<String, Value> = vars
        .iter()
        .map(|(name, value)| (name.clone(), infer_type(value)))
        .collect();
    let evaluator = Evaluator::with_max_passes(config.engine.max_expression_passes);
    println!("{}", evaluator.evaluate(expression, &scope)?);
    Ok(())
}

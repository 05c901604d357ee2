use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use loomcore::{ExecutionEvent, Node, NodeEvent, NodeKind, NodeSpec, StepJournal, WorkflowGraph};
use loomruntime::{
    topological_order, FileJournal, JournalConfig, LoomRuntime, NodeRegistry, RuntimeConfig, TriggerEvent,
    WorkflowStore,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "loom")]
#[command(about = "Loom workflow engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Seed context as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Resume this run instead of starting a new one
        #[arg(long)]
        run_id: Option<String>,

        /// Keep committed steps in this directory
        #[arg(short, long)]
        journal: Option<PathBuf>,

        /// Runtime config (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// Print the order nodes would execute in
    Order {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// Show committed steps of a run
    Steps {
        /// Journal directory
        #[arg(short, long)]
        journal: PathBuf,

        /// Run to inspect
        #[arg(long)]
        run_id: String,
    },

    /// List available node types
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Commands::Run { verbose: true, .. });
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    match cli.command {
        Commands::Run {
            file,
            input,
            run_id,
            journal,
            config,
            ..
        } => {
            run_workflow(file, input, run_id, journal, config).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(&file)?;
        }

        Commands::Order { file } => {
            print_order(&file)?;
        }

        Commands::Steps { journal, run_id } => {
            list_steps(journal, &run_id).await?;
        }

        Commands::Nodes => {
            list_nodes()?;
        }

        Commands::Init { output } => {
            create_example_workflow(output)?;
        }
    }

    Ok(())
}

fn load_workflow(file: &Path) -> Result<WorkflowGraph> {
    let text = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let workflow: WorkflowGraph =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", file.display()))?;
    Ok(workflow)
}

fn parse_seed(input: Option<String>) -> Result<serde_json::Map<String, serde_json::Value>> {
    let Some(input) = input else {
        return Ok(serde_json::Map::new());
    };
    match serde_json::from_str(&input)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => bail!("Input must be a JSON object"),
    }
}

async fn run_workflow(
    file: PathBuf,
    input: Option<String>,
    run_id: Option<String>,
    journal_dir: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let workflow = load_workflow(&file)?;
    let seed = parse_seed(input)?;

    println!("📋 Workflow: {}", workflow.name.as_deref().unwrap_or(&workflow.id));
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Connections: {}", workflow.connections.len());
    println!();

    let mut config = match config_path {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };
    if let Some(dir) = journal_dir {
        config.journal = JournalConfig::File { dir };
    }

    let mut registry = NodeRegistry::new();
    loomnodes::register_all_with(&mut registry, &config.http)?;

    let store = Arc::new(WorkflowStore::new());
    let journal = config.open_journal().await?;
    let runtime = LoomRuntime::new(Arc::new(registry), store.clone(), journal, &config);

    let mut event = TriggerEvent::new(workflow.id.clone()).with_seed(seed);
    if let Some(run_id) = run_id {
        event = event.with_run_id(run_id);
    }
    store.register_workflow(workflow).await;

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(event);
        }
    });

    let outcome = runtime.trigger(event).await;

    // Closing the bus ends the printer once it has drained
    drop(runtime);
    let _ = event_task.await;

    println!();
    match outcome {
        Ok(result) => {
            println!("📊 Execution Summary:");
            println!("   Run ID: {}", result.run_id);
            println!("   Completed: {}/{} nodes", result.completed_nodes, result.total_nodes);
            println!();
            println!("📤 Context:");
            println!("{}", serde_json::to_string_pretty(&result.context)?);
            Ok(())
        }
        Err(failure) => {
            println!("💥 Run {} aborted: {}", failure.run_id, failure.error);
            println!("   Completed: {} nodes", failure.completed_nodes);
            println!("   Resume with: loom run --file {} --run-id {}", file.display(), failure.run_id);
            Err(failure.into())
        }
    }
}

fn print_event(event: ExecutionEvent) {
    match event {
        ExecutionEvent::RunStarted { run_id, .. } => {
            println!("▶️  Run {} started", run_id);
        }
        ExecutionEvent::NodeStarted { node_id, node_type, .. } => {
            println!("  ⚡ Starting node: {} ({})", node_id, node_type);
        }
        ExecutionEvent::NodeCompleted {
            node_id,
            wrote,
            duration_ms,
            ..
        } => match wrote {
            Some(key) => println!("  ✅ Node {} wrote '{}' in {}ms", node_id, key, duration_ms),
            None => println!("  ✅ Node {} completed in {}ms", node_id, duration_ms),
        },
        ExecutionEvent::NodeFailed { node_id, error, .. } => {
            println!("  ❌ Node {} failed: {}", node_id, error);
        }
        ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
            NodeEvent::Info { message } => println!("     ℹ️  [{}] {}", node_id, message),
            NodeEvent::Warning { message } => println!("     ⚠️  [{}] {}", node_id, message),
            NodeEvent::StepReplayed { step } => println!("     ⏭️  [{}] reused committed step {}", node_id, step),
            NodeEvent::StepRetrying {
                step,
                attempt,
                delay_ms,
                error,
            } => println!(
                "     🔁 [{}] {} attempt {} failed ({}), retrying in {}ms",
                node_id, step, attempt, error, delay_ms
            ),
        },
        ExecutionEvent::RunCompleted {
            success, duration_ms, ..
        } => {
            if success {
                println!("✨ Workflow completed successfully in {}ms", duration_ms);
            } else {
                println!("💥 Workflow failed after {}ms", duration_ms);
            }
        }
    }
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = load_workflow(file)?;
    topological_order(&workflow)?;

    let mut registry = NodeRegistry::new();
    loomnodes::register_all(&mut registry)?;

    let mut problems = Vec::new();
    for node in &workflow.nodes {
        match registry.resolve(node) {
            Ok(executor) => {
                if let Err(e) = executor.validate(&node.data) {
                    problems.push(format!("{}: {}", node.id, e));
                }
            }
            Err(e) => problems.push(e.to_string()),
        }
    }

    if !problems.is_empty() {
        for problem in &problems {
            println!("  ❌ {}", problem);
        }
        bail!("{} node(s) failed validation", problems.len());
    }

    println!("✅ Workflow is valid:");
    println!("   ID: {}", workflow.id);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Connections: {}", workflow.connections.len());

    Ok(())
}

fn print_order(file: &Path) -> Result<()> {
    let workflow = load_workflow(file)?;
    for (i, node) in topological_order(&workflow)?.into_iter().enumerate() {
        println!("{:>3}. {} ({})", i + 1, node.id, node.node_type);
    }
    Ok(())
}

async fn list_steps(dir: PathBuf, run_id: &str) -> Result<()> {
    let journal = FileJournal::open(dir).await?;
    let records = journal.records(run_id).await?;

    if records.is_empty() {
        println!("No committed steps for run {}", run_id);
        return Ok(());
    }

    println!("🧾 Committed steps for run {}:", run_id);
    for record in records {
        println!("  • {} at {}", record.step_name, record.committed_at.to_rfc3339());
        println!("    {}", record.committed_result);
    }
    Ok(())
}

fn list_nodes() -> Result<()> {
    println!("📦 Available Node Types:");
    println!();

    let mut registry = NodeRegistry::new();
    loomnodes::register_all(&mut registry)?;

    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  • {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
            for field in &metadata.fields {
                let marker = if field.required { "*" } else { " " };
                println!("      {}{}: {}", marker, field.name, field.description);
            }
        } else {
            println!("  • {}", node_type);
        }
    }
    Ok(())
}

fn create_example_workflow(output: PathBuf) -> Result<()> {
    let mut workflow = WorkflowGraph::new("example").with_name("Fetch a user");

    workflow.add_node(
        NodeSpec::new("trigger", NodeKind::ManualTrigger)
            .with_name("Start")
            .with_position(100.0, 100.0),
    );
    workflow.add_node(
        NodeSpec::new("fetch", NodeKind::HttpRequest)
            .with_name("Fetch User")
            .with_data("endpoint", "https://jsonplaceholder.typicode.com/users/{{ trigger.userId }}")
            .with_data("method", "GET")
            .with_data("variableName", "user")
            .with_position(300.0, 100.0),
    );
    workflow.connect("trigger", "fetch");

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  loom run --file {} --input '{{\"trigger\": {{\"userId\": 1}}}}'",
        output.display()
    );

    Ok(())
}

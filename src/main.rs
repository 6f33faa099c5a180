//! taskloop CLI: run one task and print its progress
//!
//! Console mode prints `[AGENT]`-prefixed progress lines and the final answer;
//! `--json` prints every loop event as one JSON object per line instead. Logs
//! always go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use taskloop::agent::{events, AgentController, AgentEvent, LoopStatus, RunRecord, RunStore};
use taskloop::config::{AgentConfig, ProviderKind};
use taskloop::provider::{build_provider, ChatProvider, OllamaProvider};
use taskloop::tracing::{init_tracing, shutdown_tracing};
use taskloop::{CodeSandbox, ShellSessionManager, WorkspaceRoot};

#[derive(Debug, Parser)]
#[command(name = "taskloop", version, about = "Run a task through a tool-using chat model")]
struct Cli {
    /// The task to accomplish
    #[arg(required_unless_present = "list_runs")]
    task: Option<String>,

    /// Provider: anthropic or ollama (overrides TASKLOOP_PROVIDER)
    #[arg(long)]
    provider: Option<ProviderKind>,

    /// Model id (overrides MODEL_ID)
    #[arg(long)]
    model: Option<String>,

    /// Workspace root for shell and editor tools (overrides TASKLOOP_ROOT)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Iteration ceiling (overrides MAX_ITERATIONS)
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Keep going until the model calls final_answer
    #[arg(long)]
    require_final_answer: bool,

    /// Describe tools in the prompt and parse calls from text (Ollama only)
    #[arg(long)]
    text_tools: bool,

    /// Print loop events as JSON lines
    #[arg(long)]
    json: bool,

    /// Save the finished run to the run store
    #[arg(long)]
    save: bool,

    /// List saved runs and exit
    #[arg(long)]
    list_runs: bool,

    /// Print Prometheus metrics to stderr after the run
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AgentConfig::from_env().context("loading configuration")?;
    if let Some(provider) = cli.provider {
        config.provider = provider;
    }
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(root) = &cli.root {
        config.workspace_root = root.clone();
    }
    if let Some(max) = cli.max_iterations {
        config.max_iterations = max;
    }
    config.require_final_answer |= cli.require_final_answer;

    init_tracing("taskloop", config.otlp_endpoint.as_deref(), cli.json)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    if cli.list_runs {
        let store = RunStore::default_store().context("opening run store")?;
        for run in store.list()? {
            println!(
                "{}  {}  {:<16} {:>3}  {}",
                run.id,
                run.saved_at.format("%Y-%m-%d %H:%M:%S"),
                run.status.as_str(),
                run.iterations,
                run.task
            );
        }
        return Ok(());
    }

    let task = cli.task.clone().unwrap_or_default();
    config.validate()?;
    let config = Arc::new(config);

    let root = WorkspaceRoot::new(&config.workspace_root)
        .with_context(|| format!("invalid workspace root {}", config.workspace_root.display()))?;
    let sandbox = Arc::new(CodeSandbox::new(&config));
    let shell = Arc::new(ShellSessionManager::new(root.clone()));
    let registry = taskloop::tools::default_registry(sandbox, shell.clone(), root);

    let provider: Arc<dyn ChatProvider> = if cli.text_tools && config.provider == ProviderKind::Ollama {
        Arc::new(OllamaProvider::new(config.ollama_url.clone(), config.model.clone()).with_native_tools(false))
    } else {
        build_provider(&config)?
    };

    if !cli.json {
        println!("[AGENT] Provider: {} ({})", provider.name(), config.model);
        println!("[AGENT] Tools: {}", registry.names().join(", "));
    }

    let (tx, rx) = events::channel();
    let printer = tokio::spawn(print_events(rx, cli.json));

    let controller = AgentController::new(provider.clone(), registry, config.clone()).with_events(tx);
    let result = controller.run(&task).await;
    drop(controller);
    let _ = printer.await;

    shell.shutdown().await;
    let result = result?;

    if !cli.json {
        println!("─────────────────────────────────────────");
        match &result.final_answer {
            Some(answer) => println!("{}", taskloop::conversation::value_to_text(answer)),
            None => println!("{}", result.final_response),
        }
        println!(
            "[AGENT] Status: {} | iterations: {} | tool calls: {}",
            result.status.as_str(),
            result.iterations,
            result.tool_calls_made
        );
    }

    if cli.save {
        let store = RunStore::default_store().context("opening run store")?;
        let record = RunRecord::new(task, provider.name(), config.model.clone(), result.clone());
        let path = store.save(&record)?;
        if !cli.json {
            println!("[AGENT] Saved run to {}", path.display());
        }
    }

    if cli.metrics {
        eprint!("{}", taskloop::metrics::gather_text());
    }

    shutdown_tracing();

    if result.status == LoopStatus::ProviderFailure {
        anyhow::bail!(
            "provider failure: {}",
            result.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(())
}

async fn print_events(mut rx: events::EventReceiver, json: bool) {
    while let Some(event) = rx.recv().await {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "failed to serialize event"),
            }
            continue;
        }
        match event {
            AgentEvent::TaskStarted { trace_id, .. } => println!("[AGENT] Trace ID: {trace_id}"),
            AgentEvent::IterationStarted { iteration, summary } => {
                if summary {
                    println!("[AGENT] Requesting final summary...");
                } else {
                    println!("[AGENT] Iteration {iteration}");
                }
            }
            AgentEvent::AssistantText { text } => {
                for line in text.lines() {
                    println!("│ {line}");
                }
            }
            AgentEvent::ToolCall { name, arguments, .. } => {
                println!("[AGENT] Calling {name} {arguments}");
            }
            AgentEvent::ToolResult {
                name,
                content,
                is_error,
                ..
            } => {
                let marker = if is_error { "❌" } else { "✅" };
                println!("[AGENT] {marker} {name}: {}", taskloop::conversation::value_to_text(&content));
            }
            AgentEvent::Warning { message } => println!("[AGENT] ⚠️ {message}"),
            AgentEvent::TaskFinished { status, .. } => {
                println!("[AGENT] Finished: {}", status.as_str());
            }
        }
    }
}

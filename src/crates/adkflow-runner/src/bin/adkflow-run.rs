//! Command-line entry point: compile and run a workflow project.
//!
//! Without an external SDK wired in, runs use the bundled echo SDK, which
//! is enough for compile validation and dry-running graph, hook, and
//! custom-node behavior locally.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use adkflow_extensions::{default_global_path, get_registry, project_extensions_path, ExtensionScope};
use adkflow_runner::{register_runner_behaviors, RunConfig, RunStatus, StaticSdk, WorkflowRunner};

#[derive(Parser, Debug)]
#[command(name = "adkflow-run", about = "Run an adkflow workflow project")]
struct Args {
    /// Path to the project directory (contains manifest.json).
    project: PathBuf,

    /// Prompt passed as the user message.
    #[arg(short, long)]
    prompt: Option<String>,

    /// Compile and validate only; do not execute.
    #[arg(long)]
    compile_only: bool,

    /// Skip workflow validation.
    #[arg(long)]
    no_validate: bool,

    /// Disable the custom-node result cache.
    #[arg(long)]
    no_cache: bool,

    /// Run timeout in seconds.
    #[arg(long, default_value_t = 300.0)]
    timeout: f64,

    /// Watch extension packages for changes while running.
    #[arg(long)]
    watch_extensions: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let registry = get_registry();
    register_runner_behaviors(&registry);
    if let Some(global_path) = default_global_path() {
        let count = registry.discover_global(&global_path);
        tracing::info!(path = %global_path.display(), units = count, "Global extensions loaded");
    }
    let project_ext = project_extensions_path(&args.project);
    let count = registry.discover_project(&project_ext);
    tracing::info!(path = %project_ext.display(), units = count, "Project extensions loaded");
    if args.watch_extensions {
        registry.start_watching(ExtensionScope::Global, Duration::from_secs(1));
        registry.start_watching(ExtensionScope::Project, Duration::from_secs(1));
    }

    if args.compile_only {
        let ir = adkflow_compiler::Compiler::new()
            .with_registry(registry)
            .compile(&args.project)
            .context("compilation failed")?;
        println!(
            "OK: {} agents, {} custom nodes, {} output files",
            ir.all_agents.len(),
            ir.custom_nodes.len(),
            ir.output_files.len()
        );
        return Ok(());
    }

    let runner = WorkflowRunner::with_registry(Arc::new(StaticSdk::echo()), registry);
    let mut config = RunConfig::new(&args.project);
    config.validate = !args.no_validate;
    config.enable_cache = !args.no_cache;
    config.timeout_seconds = args.timeout;
    if let Some(prompt) = args.prompt {
        config = config.with_prompt(prompt);
    }

    let result = runner.run(config).await;
    match result.status {
        RunStatus::Completed => {
            println!("{}", result.output.unwrap_or_default());
            Ok(())
        }
        status => {
            eprintln!(
                "Run {:?} ({:.0} ms): {}",
                status,
                result.duration_ms,
                result.error.unwrap_or_default()
            );
            std::process::exit(1);
        }
    }
}

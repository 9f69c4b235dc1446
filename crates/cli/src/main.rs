//! Prospector CLI
//!
//! Thin front-end over `prospector-core`: argument parsing, logging
//! setup, Ctrl-C wiring into the shutdown coordinator, and exit codes.
//! Exit codes: 0 success, 1 runtime failure, 2 configuration error,
//! 130 interrupted (partial report produced).

use anyhow::Result;
use clap::Parser;
use prospector_core::config::Settings;
use prospector_core::error::PipelineError;
use prospector_core::pipeline::{Executor, RunContext};
use prospector_core::store::{generate_run_id, RunLayout};
use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;

const EXIT_OK: i32 = 0;
const EXIT_RUNTIME: i32 = 1;
const EXIT_CONFIG: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

/// Crash-resilient deep-research agent.
#[derive(Debug, Parser)]
#[command(name = "prospector", version, about)]
struct Args {
    /// The research query to investigate.
    query: Option<String>,

    /// Resume a previous run from its latest checkpoint.
    #[arg(long, value_name = "RUN_ID")]
    resume: Option<String>,

    /// Maximum cost budget in USD for this run.
    #[arg(long, value_name = "USD")]
    max_cost: Option<f64>,

    /// Output directory for the final report.
    #[arg(long, short, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Path to a TOML config file.
    #[arg(long, short, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the primary model id.
    #[arg(long, value_name = "ID")]
    model: Option<String>,

    /// Skip the interactive confirmation before starting.
    #[arg(long)]
    no_approve: bool,

    /// Enable verbose logging.
    #[arg(long, short)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "prospector_core=debug,prospector=debug"
    } else {
        "prospector_core=info,prospector=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_settings(args: &Args) -> Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };

    if let Some(max_cost) = args.max_cost {
        settings.costs.max_per_run = max_cost;
    }
    if let Some(output) = &args.output {
        settings.report.output_dir = output.clone();
    }
    if let Some(model) = &args.model {
        settings.llm.primary_model = model.clone();
    }
    settings.validate()?;
    Ok(settings)
}

/// Ask for confirmation on a terminal unless `--no-approve` was given.
fn confirm_start(query: &str, max_cost: f64, no_approve: bool) -> bool {
    if no_approve || !std::io::stdin().is_terminal() {
        return true;
    }

    print!("Research \"{query}\" with a ${max_cost:.2} budget? [Y/n] ");
    let _ = std::io::stdout().flush();

    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return true;
    }
    !matches!(answer.trim().to_lowercase().as_str(), "n" | "no")
}

fn print_resume_hint(run_id: &str) {
    eprintln!("Run id: {run_id}");
    eprintln!("Resume with: prospector --resume {run_id} \"<original query>\"");
}

async fn run(args: Args) -> i32 {
    let settings = match resolve_settings(&args) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("Configuration error: {err:#}");
            return EXIT_CONFIG;
        }
    };

    if args.query.is_none() && args.resume.is_none() {
        eprintln!("Provide a research query or --resume <run_id>.");
        return EXIT_CONFIG;
    }

    let resuming = args.resume.is_some();
    let run_id = args.resume.clone().unwrap_or_else(generate_run_id);
    let title = args.query.clone().unwrap_or_default();

    if let Some(query) = &args.query {
        if !resuming && !confirm_start(query, settings.costs.max_per_run, args.no_approve) {
            eprintln!("Aborted before starting.");
            return EXIT_OK;
        }
    }

    let layout = RunLayout::new(&settings.checkpoints.dir, &run_id);
    if resuming && !layout.exists() {
        eprintln!("No run directory found for run id {run_id}.");
        return EXIT_CONFIG;
    }

    let ctx = match RunContext::from_env(settings, layout, &title) {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("Configuration error: {err:#}");
            return EXIT_CONFIG;
        }
    };

    // First Ctrl-C drains to a checkpoint and synthesizes what exists;
    // a second within two seconds aborts immediately.
    let shutdown = ctx.shutdown.clone();
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            shutdown.signal();
        }
    });

    let executor = Executor::new(ctx);
    let outcome = if resuming {
        executor.resume(args.query.as_deref()).await
    } else {
        executor.run_fresh(args.query.as_deref().unwrap_or_default()).await
    };

    match outcome {
        Ok(state) => {
            let interrupted = executor.context().shutdown.should_stop();
            if let Some(metadata) = &state.report_metadata {
                println!(
                    "Report \"{}\" complete: {} words, {} sources, ${:.4} spent.",
                    metadata.title, metadata.word_count, metadata.source_count, state.total_cost
                );
                if !metadata.coverage_gaps.is_empty() {
                    println!(
                        "Coverage gaps: {} subtopic(s) not fully researched.",
                        metadata.coverage_gaps.len()
                    );
                }
            }
            if interrupted {
                eprintln!("Interrupted; a partial report was produced.");
                print_resume_hint(&run_id);
                EXIT_INTERRUPTED
            } else {
                EXIT_OK
            }
        }
        Err(PipelineError::Cancelled) => {
            eprintln!("Aborted; the latest checkpoint remains valid.");
            print_resume_hint(&run_id);
            EXIT_INTERRUPTED
        }
        Err(err @ PipelineError::ConfigInvalid(_)) => {
            eprintln!("Configuration error: {err}");
            EXIT_CONFIG
        }
        Err(err) => {
            eprintln!("Run failed: {err}");
            print_resume_hint(&run_id);
            EXIT_RUNTIME
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);
    let code = run(args).await;
    std::process::exit(code);
}

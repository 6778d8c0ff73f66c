//! ALEJO CLI - component initialization orchestrator.

mod manifest;

use alejo_core::ResourceLevel;
use alejo_execution::{InitOptions, InitializationReport, Orchestrator, OrchestratorError};
use alejo_progress::Timeline;
use anyhow::Result;
use clap::{Parser, Subcommand};
use manifest::Manifest;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "alejo")]
#[command(about = "Component initialization orchestrator", long_about = None)]
struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the components of a manifest
    Run {
        /// Manifest file
        #[arg(long)]
        manifest: PathBuf,
        /// Resource level instead of the manifest telemetry
        #[arg(long)]
        level: Option<ResourceLevel>,
        /// Stop early under resource pressure
        #[arg(long)]
        conserve: bool,
        /// Load deferred components after the run
        #[arg(long)]
        load_deferred: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show phases and waves without running anything
    Plan {
        /// Manifest file
        #[arg(long)]
        manifest: PathBuf,
        /// Resource level instead of the manifest telemetry
        #[arg(long)]
        level: Option<ResourceLevel>,
    },
    /// Run the built-in demo component set
    Demo {
        /// Resource level instead of the demo telemetry
        #[arg(long)]
        level: Option<ResourceLevel>,
        /// Load deferred components after the run
        #[arg(long)]
        load_deferred: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run {
            manifest,
            level,
            conserve,
            load_deferred,
            json,
        } => {
            let orchestrator = Manifest::load(&manifest)?.build()?;
            let options = InitOptions {
                resource_level: level,
                conserve_resources: conserve,
            };
            run(&orchestrator, options, load_deferred, json).await?;
        }
        Commands::Plan { manifest, level } => {
            let orchestrator = Manifest::load(&manifest)?.build()?;
            let preview = orchestrator.plan_initialization(level).await?;

            println!("Resource level: {}", preview.snapshot.level);
            println!("Phases");
            for (phase, members) in &preview.assignment.phases {
                let admitted = if members.is_empty()
                    || preview.assignment.is_admitted(members[0].as_str())
                {
                    "admitted"
                } else {
                    "deferred"
                };
                println!("  {:<9} {:<8} {}", phase.to_string(), admitted, join(members));
            }
            println!("Waves");
            for (index, wave) in preview.plan.waves.iter().enumerate() {
                println!("  {}: {}", index, join(wave));
            }
        }
        Commands::Demo {
            level,
            load_deferred,
        } => {
            let orchestrator = Manifest::demo()?.build()?;
            let options = InitOptions {
                resource_level: level,
                conserve_resources: false,
            };
            run(&orchestrator, options, load_deferred, false).await?;
        }
    }

    Ok(())
}

async fn run(
    orchestrator: &Orchestrator,
    options: InitOptions,
    load_deferred: bool,
    json: bool,
) -> Result<()> {
    let report = match orchestrator.run_initialization(options).await {
        Ok(report) => report,
        Err(OrchestratorError::EssentialAbort { failures, report }) => {
            print_report(&report, json)?;
            for failure in &failures {
                eprintln!("essential component {} failed: {}", failure.component, failure.cause);
            }
            anyhow::bail!("initialization aborted");
        }
        Err(e) => return Err(e.into()),
    };
    print_report(&report, json)?;

    if load_deferred && !report.deferred.is_empty() {
        let loaded = orchestrator.load_deferred(None).await?;
        info!("Loaded {} deferred component(s)", loaded.loaded);
        print_report(&loaded.report, json)?;
    }

    if !json {
        print_timeline(&orchestrator.timeline());
    }
    Ok(())
}

fn print_report(report: &InitializationReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    if let Some(level) = report.level {
        println!("Initialization at {} level ({}ms)", level, report.duration_ms);
    } else {
        println!("Deferred load ({}ms)", report.duration_ms);
    }
    for (index, wave) in report.waves.iter().enumerate() {
        println!("  wave {}: {}", index, join(wave));
    }
    println!("  initialized: {}", join(&report.initialized));
    println!("  fallback:    {}", join(&report.fallback));
    println!("  failed:      {}", join(&report.failed));
    println!("  deferred:    {}", join(&report.deferred));

    for outcome in &report.outcomes {
        if let Some(error) = &outcome.status.last_error {
            println!("  {} ({}): {}", outcome.component, outcome.status.state, error);
        }
    }
    Ok(())
}

fn print_timeline(timeline: &Timeline) {
    println!("Timeline");
    for entry in timeline.entries() {
        let duration = entry.duration_ms.map_or_else(|| "-".to_string(), |ms| format!("{}ms", ms));
        let fallback = if entry.used_fallback { " (fallback)" } else { "" };
        println!(
            "  {:<16} {:<12} {:>8}{}",
            entry.component_id.as_str(),
            entry.status.to_string(),
            duration,
            fallback
        );
    }

    let stats = timeline.stats();
    println!(
        "{} components: {} initialized, {} fallback, {} failed, {} deferred",
        stats.total, stats.initialized, stats.fallback, stats.failed, stats.deferred
    );
    if let Some(average) = stats.average_duration_ms {
        println!("  average: {:.1}ms", average);
    }
    if let Some((id, ms)) = &stats.slowest {
        println!("  slowest: {} ({}ms)", id, ms);
    }
}

fn join(ids: &[alejo_core::ComponentId]) -> String {
    if ids.is_empty() {
        return "-".to_string();
    }
    ids.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(", ")
}

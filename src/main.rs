//! Binary entry point for groundline.
//!
//! This binary answers questions against a session fixture from the command
//! line, with human approval of gated tiers on the terminal.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use groundline::cli::{
    AskCommand, Fixture, OutputFormat, build_stores, render_answer, render_config, render_trail,
    spawn_decider,
};
use groundline::models::{ProposalStatus, RetrievalMode, ToolProposal};
use groundline::observability::{self, LoggingConfig};
use groundline::services::QueueApprovalChannel;
use groundline::{AnsweringEngine, EngineConfig};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// Groundline - grounded answers from live sessions, with human-approved escalation.
#[derive(Parser)]
#[command(name = "groundline")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "GROUNDLINE_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Answer a question against a session fixture.
    Ask {
        /// The question.
        query: String,

        /// Session fixture (JSON or YAML).
        #[arg(short, long)]
        fixture: Option<PathBuf>,

        /// Session id (defaults to the fixture's).
        #[arg(short, long)]
        session: Option<String>,

        /// Batch mode: larger budgets, longer approval waits.
        #[arg(long)]
        batch: bool,

        /// Allow escalation to web search.
        #[arg(long)]
        web: bool,

        /// Allow escalation to deep research.
        #[arg(long)]
        deep_research: bool,

        /// Approve every escalation proposal without asking.
        #[arg(long, conflicts_with_all = ["reject", "no_decision"])]
        approve: bool,

        /// Reject every escalation proposal without asking.
        #[arg(long, conflicts_with = "no_decision")]
        reject: bool,

        /// Leave proposals undecided so they expire.
        #[arg(long)]
        no_decision: bool,

        /// Coverage threshold override.
        #[arg(long)]
        threshold: Option<f32>,

        /// Latency budget override in milliseconds.
        #[arg(long)]
        max_latency_ms: Option<u64>,

        /// Output format: text or json.
        #[arg(long, default_value = "text")]
        format: String,

        /// Print the audit trail after the answer.
        #[arg(long)]
        trail: bool,
    },

    /// Show the effective configuration.
    Config,
}

/// How proposals are decided on the command line.
#[derive(Clone, Copy, PartialEq, Eq)]
enum ApprovalMode {
    /// Ask on the terminal.
    Prompt,
    /// Approve everything.
    Approve,
    /// Reject everything.
    Reject,
    /// Never decide; proposals expire.
    Ignore,
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    // Best-effort load of .env; a missing file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = observability::init(LoggingConfig::from_settings(&config.logging, cli.verbose)) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli.command, config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Loads configuration: explicit path, else the default location, then env.
fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load_from_file(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => EngineConfig::load_default(),
    };
    let config = config.with_env_overrides();
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Runs the selected command.
async fn run_command(command: Commands, config: EngineConfig) -> Result<ExitCode> {
    match command {
        Commands::Ask {
            query,
            fixture,
            session,
            batch,
            web,
            deep_research,
            approve,
            reject,
            no_decision,
            threshold,
            max_latency_ms,
            format,
            trail,
        } => {
            let ask = AskCommand {
                query,
                session_id: session,
                mode: if batch {
                    RetrievalMode::Batch
                } else {
                    RetrievalMode::Realtime
                },
                allow_web: web,
                allow_deep_research: deep_research,
                threshold,
                max_latency_ms,
            };
            let approval = if approve {
                ApprovalMode::Approve
            } else if reject {
                ApprovalMode::Reject
            } else if no_decision {
                ApprovalMode::Ignore
            } else {
                ApprovalMode::Prompt
            };
            cmd_ask(config, ask, fixture, approval, OutputFormat::parse(&format), trail).await
        },
        Commands::Config => {
            print!("{}", render_config(&config));
            Ok(ExitCode::SUCCESS)
        },
    }
}

/// Ask command.
async fn cmd_ask(
    config: EngineConfig,
    ask: AskCommand,
    fixture_path: Option<PathBuf>,
    approval: ApprovalMode,
    format: OutputFormat,
    trail: bool,
) -> Result<ExitCode> {
    let fixture = match &fixture_path {
        Some(path) => Fixture::load(path).with_context(|| format!("loading fixture {}", path.display()))?,
        None => Fixture::default(),
    };
    let stores = build_stores(&config, &fixture).context("building evidence stores")?;
    let request = ask.to_request(&config, &fixture.session_id())?;

    let (channel, proposals) = QueueApprovalChannel::new(8);
    let mut builder = AnsweringEngine::builder(config).with_approval_channel(Arc::new(channel));
    for store in stores {
        builder = builder.with_store(store);
    }
    let engine = Arc::new(builder.build().context("building engine")?);

    let cancel = engine.cancel_handle();
    ctrlc::set_handler(move || {
        let cancelled = cancel.cancel_all();
        eprintln!("\nCancelling {cancelled} request(s)...");
    })
    .context("installing Ctrl-C handler")?;

    let decider = spawn_decider(Arc::clone(&engine), proposals, "cli", move |proposal| {
        match approval {
            ApprovalMode::Approve => Some(ProposalStatus::Approved),
            ApprovalMode::Reject => Some(ProposalStatus::Rejected),
            ApprovalMode::Ignore => None,
            ApprovalMode::Prompt => prompt_decision(proposal),
        }
    });

    let request_id = request.request_id.clone();
    let answer = engine.answer(request).await;
    decider.abort();

    println!("{}", render_answer(&answer, format)?);
    if trail {
        println!("Audit trail ({request_id}):");
        print!("{}", render_trail(&engine.get_trail(&request_id)));
    }

    Ok(if answer.refused {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}

/// Asks on the terminal whether to approve a proposal.
fn prompt_decision(proposal: &ToolProposal) -> Option<ProposalStatus> {
    eprintln!();
    eprintln!("Escalation proposed: {}", proposal.tool_name);
    eprintln!("  Reason: {}", proposal.rationale);
    if let Some(estimate) = proposal.cost_estimate {
        eprintln!(
            "  Estimated cost: {:.4} (about {} ms)",
            estimate.cost, estimate.expected_latency_ms
        );
    }
    eprint!("Approve? [y/N] ");
    let _ = std::io::stderr().flush();

    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line).is_err() {
        return None;
    }
    match ProposalStatus::parse(&line) {
        Some(ProposalStatus::Approved) => Some(ProposalStatus::Approved),
        _ => Some(ProposalStatus::Rejected),
    }
}

//! # faultbench
//!
//! Command-line entry point for the faultbench harness.
//!
//! Running without a subcommand opens the interactive REPL. `run` drives a
//! single problem non-interactively, either with an answer given up front
//! or by relaying stdin lines until a submission is graded.

mod display;
mod repl;
mod session;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use display::{ColorMode, print_error, print_panel, print_verdict};
use faultbench_adapters::{HttpSubmitTransport, check_dependencies};
use faultbench_core::{ArenaConfig, Reply, submit_answer};
use faultbench_proto::{Error, Verdict};
use futures::FutureExt;
use session::{Session, required_binaries};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// faultbench - fault-injection benchmark harness for SRE agents
#[derive(Parser, Debug)]
#[command(name = "faultbench", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long, default_value = "faultbench.yml", global = true)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Color output mode (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorMode::Auto, global = true)]
    color: ColorMode,

    /// Start even if required binaries are not on PATH
    #[arg(long, global = true)]
    skip_dependency_check: bool,

    /// File that persists agents registered from the REPL
    #[arg(long, default_value = ".faultbench/agents.yml", global = true)]
    agents_file: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive session (default)
    Repl,

    /// List the problem catalog
    Problems,

    /// Run one problem to a verdict
    Run(RunArgs),

    /// List registered agents
    Agents,

    /// Post an answer to a remote submit endpoint
    Submit(SubmitArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Problem to start
    problem_id: String,

    /// Answer to submit right after the fault converges, as a JSON object
    /// or a full `submit({...})` line. Without it, stdin lines are relayed
    /// until one is a submission.
    #[arg(short, long)]
    answer: Option<String>,
}

#[derive(Parser, Debug)]
struct SubmitArgs {
    /// The answer, sent verbatim
    answer: String,

    /// Submit endpoint URL (default: `submit_endpoint` from the config)
    #[arg(long)]
    endpoint: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let use_colors = cli.color.should_use_colors();
    let config = load_config(&cli.config)?;

    match cli.command {
        Some(Commands::Problems) => {
            problems_command(&config, use_colors);
            Ok(())
        }
        Some(Commands::Submit(args)) => submit_command(&config, args).await,
        Some(Commands::Agents) => {
            let session = Session::new(&config, cli.agents_file, use_colors)?;
            agents_command(&session);
            Ok(())
        }
        Some(Commands::Run(args)) => {
            preflight(&config, cli.skip_dependency_check)?;
            let session = Session::new(&config, cli.agents_file, use_colors)?;
            run_command(&session, args).await
        }
        Some(Commands::Repl) | None => {
            preflight(&config, cli.skip_dependency_check)?;
            let mut session = Session::new(&config, cli.agents_file, use_colors)?;
            repl_command(&mut session).await
        }
    }
}

/// Loads and validates the config; a missing file means defaults.
fn load_config(path: &Path) -> Result<ArenaConfig> {
    let config = if path.exists() {
        ArenaConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?
    } else {
        warn!("Config file {} not found, using defaults", path.display());
        ArenaConfig::default()
    };

    let warnings = config.validate().context("Configuration validation failed")?;
    for warning in &warnings {
        eprintln!("{warning}");
    }
    Ok(config)
}

fn preflight(config: &ArenaConfig, skip: bool) -> Result<()> {
    if skip {
        warn!("Skipping dependency check");
        return Ok(());
    }
    let binaries = required_binaries(config);
    let binaries: Vec<&str> = binaries.iter().map(String::as_str).collect();
    check_dependencies(&binaries)?;
    Ok(())
}

fn problems_command(config: &ArenaConfig, use_colors: bool) {
    if config.problems.is_empty() {
        println!("No problems configured.");
        return;
    }
    let lines: Vec<String> = config
        .problems
        .iter()
        .map(|p| {
            let oracles: Vec<&str> = p.oracles.keys().map(|name| name.as_str()).collect();
            format!(
                "{:<32} {:<20} {:<28} [{}]",
                p.id,
                p.application,
                p.fault.name,
                oracles.join(", ")
            )
        })
        .collect();
    print_panel("Problems", &lines, use_colors);
}

fn agents_command(session: &Session) {
    if session.agents.is_empty() {
        println!("No registered agents.");
        return;
    }
    for registration in session.agents.list() {
        println!("{}\t{}", registration.name, registration.command);
    }
}

async fn submit_command(config: &ArenaConfig, args: SubmitArgs) -> Result<()> {
    let Some(endpoint) = args.endpoint.or_else(|| config.submit_endpoint.clone()) else {
        bail!("No submit endpoint: pass --endpoint or set submit_endpoint in the config");
    };
    let transport = HttpSubmitTransport::new(endpoint, Duration::from_secs(args.timeout))?;
    let outcome = submit_answer(&transport, &args.answer).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !outcome.accepted {
        std::process::exit(1);
    }
    Ok(())
}

async fn repl_command(session: &mut Session) -> Result<()> {
    let outcome = AssertUnwindSafe(repl::run(session)).catch_unwind().await;
    session.shutdown().await;
    match outcome {
        Ok(result) => result,
        Err(_) => bail!("Interactive session panicked; active problem was recovered"),
    }
}

async fn run_command(session: &Session, args: RunArgs) -> Result<()> {
    let conductor = &session.conductor;
    if conductor.registry().get(&args.problem_id).is_none() {
        bail!("Unknown problem id: {}", args.problem_id);
    }

    let answer = args.answer.as_deref();
    let interaction = move || async move {
        match answer {
            Some(answer) => {
                let line = submission_line(conductor.submit_marker(), answer);
                conductor.submit(&line).await
            }
            None => relay_stdin(session).await,
        }
    };

    let result = tokio::select! {
        result = conductor.run_session(&args.problem_id, interaction) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupt received, recovering and cleaning up");
            session.shutdown().await;
            println!("Interrupted; active fault recovered.");
            return Ok(());
        }
    };
    session.launcher.shutdown().await;

    match result {
        Ok(verdict) => {
            let artifact = conductor.last_artifact();
            print_verdict(&verdict, artifact.as_deref(), session.use_colors);
            if !verdict.success {
                std::process::exit(1);
            }
            Ok(())
        }
        Err(e) => {
            error!(problem_id = %args.problem_id, class = e.class(), "Problem run failed");
            print_error(&e, session.use_colors);
            Err(e.into())
        }
    }
}

/// Accepts a bare JSON object or an already-marked line.
fn submission_line(marker: &str, answer: &str) -> String {
    if answer.trim_start().starts_with(marker) {
        answer.to_string()
    } else {
        format!("{marker}{answer})")
    }
}

/// Relays stdin lines to the cluster until one is graded.
async fn relay_stdin(session: &Session) -> faultbench_proto::Result<Verdict> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| Error::Transport(format!("failed to read stdin: {e}")))?
    {
        if line.trim().is_empty() {
            continue;
        }
        match session.conductor.handle_input(&line).await {
            Ok(Reply::Output(output)) => print!("{output}"),
            Ok(Reply::Graded(verdict)) => return Ok(verdict),
            // A malformed submission leaves the problem open for another try.
            Err(e @ Error::InvariantViolation(_)) => print_error(&e, session.use_colors),
            Err(e) => return Err(e),
        }
    }
    info!("Input closed before a submission");
    Err(Error::invariant("input closed before a submission was graded"))
}

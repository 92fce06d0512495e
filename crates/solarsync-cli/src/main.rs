#![forbid(unsafe_code)]

mod auth;
mod cmd;
mod http;
mod output;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use output::{CliError, OutputMode};
use solarsync_core::config::resolve_config;
use std::env;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "ssync: change feeds and status workflows for solar installation projects",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (pretty, text, json).
    #[arg(long, value_enum, global = true)]
    format: Option<OutputMode>,

    /// Shorthand for `--format json`.
    #[arg(long, global = true)]
    json: bool,

    /// Act as this user (`id` or `id=Display Name`).
    #[arg(long, global = true)]
    user: Option<String>,

    /// Suppress non-essential output.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn user_flag(&self) -> Option<&str> {
        self.user.as_deref()
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Sync",
        about = "Watch a change feed",
        long_about = "Poll a change feed and print notifications as they arrive.",
        after_help = "EXAMPLES:\n    # Watch every project\n    ssync watch\n\n    # Watch one daily report for three cycles\n    ssync watch --kind daily-reports --id r-118 --cycles 3\n\n    # Stream notifications as JSON lines\n    ssync watch --json"
    )]
    Watch(cmd::watch::WatchArgs),

    #[command(
        next_help_heading = "Workflow",
        about = "Show an entity's workflow",
        long_about = "Fetch an entity and show its status, allowed next statuses and approval requirements.",
        after_help = "EXAMPLES:\n    # Inspect a project\n    ssync workflow projects p-42\n\n    # Emit machine-readable output\n    ssync workflow daily-reports r-118 --json"
    )]
    Workflow(cmd::workflow::WorkflowArgs),

    #[command(
        next_help_heading = "Workflow",
        about = "Change an entity's status",
        long_about = "Validate a status change against the lifecycle and send it to the server.",
        after_help = "EXAMPLES:\n    # Start a project\n    ssync transition projects p-42 in_progress\n\n    # Put a project on hold and tell stakeholders\n    ssync transition projects p-42 on_hold --reason \"Permit delay\" --notify"
    )]
    Transition(cmd::transition::TransitionArgs),

    #[command(
        next_help_heading = "Workflow",
        about = "Apply one operation to many entities",
        long_about = "Run a status change, manager assignment, team update or delete across many ids and report per-id results.",
        after_help = "EXAMPLES:\n    # Put three projects on hold\n    ssync bulk projects update-status p-1 p-2 p-3 --status on_hold --reason \"Storm\"\n\n    # Assign a manager\n    ssync bulk projects assign-manager p-1 p-2 --manager u-9\n\n    # Replace a team\n    ssync bulk projects update-team p-1 --member u-3 --member u-4"
    )]
    Bulk(cmd::bulk::BulkArgs),

    #[command(
        next_help_heading = "Project Maintenance",
        about = "Print the effective configuration",
        after_help = "EXAMPLES:\n    # Show resolved config\n    ssync config\n\n    # Emit machine-readable output\n    ssync config --json"
    )]
    Config(cmd::config::ConfigArgs),

    #[command(
        next_help_heading = "Project Maintenance",
        about = "Generate shell completion scripts",
        long_about = "Generate shell completion scripts for supported shells.",
        after_help = "EXAMPLES:\n    # Generate bash completions\n    ssync completions bash\n\n    # Generate zsh completions\n    ssync completions zsh"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("SOLARSYNC_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "solarsync=debug,ssync=debug,info"
        } else {
            "solarsync=info,ssync=info,warn"
        })
    });

    let format = env::var("SOLARSYNC_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

async fn run(cli: &Cli, output: OutputMode) -> anyhow::Result<()> {
    let project_root = env::current_dir()?;
    let effective = resolve_config(&project_root, output.as_str())
        .context("Failed to load configuration")?;

    if let Commands::Config(args) = &cli.command {
        return cmd::config::run_config(args, &effective, output);
    }

    let sync = cmd::connect(&effective, cli.user_flag())?;
    debug!(base_url = %effective.sync.api.base_url, user = ?sync.current_user().map(|u| u.id), "connected");

    let result = match &cli.command {
        Commands::Watch(args) => cmd::watch::run_watch(args, &sync, output, cli.quiet).await,
        Commands::Workflow(args) => cmd::workflow::run_workflow(args, &sync, output).await,
        Commands::Transition(args) => cmd::transition::run_transition(args, &sync, output).await,
        Commands::Bulk(args) => cmd::bulk::run_bulk(args, &sync, output).await,
        Commands::Config(_) | Commands::Completions(_) => Ok(()),
    };
    sync.dispose();
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Commands::Completions(args) = &cli.command {
        let mut command = Cli::command();
        return match cmd::completions::run_completions(args.shell, &mut command) {
            Ok(()) => ExitCode::SUCCESS,
            Err(_) => ExitCode::FAILURE,
        };
    }

    let user_output = solarsync_core::config::load_user_config()
        .ok()
        .and_then(|user| user.output);
    let output = output::resolve_output_mode(cli.format, cli.json, user_output.as_deref());

    match run(&cli, output).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            debug!(error = ?err, "command failed");
            if output::render_error(output, &CliError::from_anyhow(&err)).is_err() {
                eprintln!("error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

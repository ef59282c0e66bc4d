//! # cloudcmd Main Entry Point
//!
//! File: cli/src/main.rs
//!
//! ## Overview
//!
//! This file serves as the main entry point for the cloudcmd CLI application.
//! It handles:
//! - Command-line argument parsing using Clap
//! - Setting up the logging system based on verbosity flags
//! - Loading the configuration and building the shared `AppContext`
//! - Routing execution to the command handlers
//! - Turning the outcome into the process exit code
//!
//! ## Architecture
//!
//! - Each top-level command is a variant of the `Commands` enum, handled by
//!   the matching `handle_*` function in `commands`.
//! - Handlers receive an `Arc<AppContext>` holding the configuration and the
//!   real collaborators (process spawner, process tree, console prompter,
//!   shell terminal, banner channel).
//! - `run` and `exec` return the child's exit code, which becomes cloudcmd's
//!   own exit code. Commands handed to the interactive terminal are waited
//!   for before exiting. Errors are printed here; a program that could not be
//!   launched exits with 127, a child killed by a signal with 128 + signal.
//!
//! ## Examples
//!
//! ```bash
//! # Get help
//! cloudcmd --help
//!
//! # Run a raw command with increased verbosity
//! cloudcmd -vv run -- cf apps
//!
//! # Run a registered command, auto-confirming plugin installation
//! cloudcmd --yes exec ks.clusters
//! ```
//!
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

mod commands; // Command handlers (run, exec, logs)
mod common; // Process execution engine, cloud CLI helpers, console UI
mod core; // Configuration, errors, application context

use crate::core::context::AppContext;
use crate::core::error::CliError;

/// Defines the top-level command-line arguments structure using Clap's derive macros.
#[derive(Parser, Debug)]
#[command(
    name = "cloudcmd",
    about = "Run, prompt for, and recover cloud CLI commands",
    long_about = "Wraps a cloud CLI (ibmcloud by default): runs its commands with captured,\n\
                  cleaned-up output, prompts for missing arguments, installs missing plugins\n\
                  on demand, and streams application logs.",
    propagate_version = true,
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Answer yes to every confirmation (plugin installation).
    #[arg(short, long, global = true)]
    yes: bool,
    /// Configuration file to use instead of the project's `.cloudcmd.toml`.
    #[arg(long, global = true, env = "CLOUDCMD_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,
}

/// Enum defining all available top-level commands.
#[derive(Parser, Debug)]
enum Commands {
    #[command(alias = "r")]
    Run(commands::run::RunArgs),
    #[command(alias = "x")]
    Exec(commands::exec::ExecArgs),
    #[command(alias = "ls")]
    List(commands::exec::ListArgs),
    #[command(alias = "l")]
    Logs(commands::logs::LogsArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    tracing::debug!("Parsed CLI arguments: {:?}", cli);

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!("Command execution failed: {:?}", e);
            eprintln!("Error: {:#}", e);
            std::process::exit(failure_exit_code(&e));
        }
    }
}

/// Loads the configuration, builds the context and dispatches the command.
async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = crate::core::config::load_config(cli.config.as_deref())?;
    let ctx = Arc::new(AppContext::from_config(config, cli.yes)?);

    let result = match cli.command {
        Commands::Run(args) => commands::run::handle_run(Arc::clone(&ctx), args).await,
        Commands::Exec(args) => commands::exec::handle_exec(Arc::clone(&ctx), args).await,
        Commands::List(args) => commands::exec::handle_list(Arc::clone(&ctx), args).map(|()| 0),
        Commands::Logs(args) => commands::logs::handle_logs(Arc::clone(&ctx), args).await.map(|()| 0),
    };

    // Terminal hand-offs only queue their line; exiting now would cut them off.
    ctx.terminal.wait_idle().await;
    result
}

/// Shell-style exit code for a failed command.
fn failure_exit_code(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<CliError>() {
        Some(CliError::CommandNotFound { .. }) => 127,
        Some(CliError::Terminated { signal, .. }) => 128 + signal,
        _ => 1,
    }
}

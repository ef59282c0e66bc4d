//! # cloudcmd Run Handler
//!
//! File: cli/src/commands/run.rs
//!
//! ## Overview
//!
//! Implements `cloudcmd run`, which runs one raw invocation of the wrapped CLI
//! (or any other program given with `--program`) through a `ProcessExecution`.
//! Output goes to the shared banner channel. The `cloudcmd` process then exits
//! with the child's exit code.
//!
//! ## Usage
//!
//! ```bash
//! # Run `ibmcloud cf apps`, installing the cf plugin first if it is missing
//! cloudcmd run -- cf apps
//!
//! # Clean spinner output of a long build
//! cloudcmd run --sanitize -- dev build
//!
//! # Type the command into the interactive terminal instead of capturing it
//! cloudcmd run --terminal -- login --sso
//!
//! # Run some other program, without plugin recovery
//! cloudcmd run --program echo --no-recover -- hello
//! ```
//!
use crate::common::cloud::plugin::PluginInstaller;
use crate::common::cloud::version;
use crate::common::process::execution::{CommandDescriptor, DispatchMode, ExecOptions, ProcessExecution};
use crate::core::context::AppContext;
use crate::core::error::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// # Run Arguments (`RunArgs`)
#[derive(Parser, Debug)]
#[command(about = "Run the cloud CLI with the given arguments")]
pub struct RunArgs {
    /// Program to run instead of the configured cloud CLI.
    #[arg(long, value_name = "PROGRAM")]
    program: Option<String>,

    /// Send the command to the interactive terminal instead of capturing output.
    #[arg(long)]
    terminal: bool,

    /// Buffer stdout and remove spinner rub-outs before showing it.
    #[arg(long)]
    sanitize: bool,

    /// Do not offer to install a missing CLI plugin.
    #[arg(long)]
    no_recover: bool,

    /// Working directory for the command (defaults to the configured one).
    #[arg(long, value_name = "DIR")]
    cwd: Option<PathBuf>,

    /// Arguments passed to the program.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "ARGS")]
    args: Vec<String>,
}

/// # Handle Run Command (`handle_run`)
///
/// ## Arguments
///
/// * `ctx` - The application context.
/// * `args` - The parsed `RunArgs`.
///
/// ## Returns
///
/// * `Result<i32>` - The child's exit code (`0` in terminal mode).
///
/// ## Errors
///
/// Propagates launch failures, signal terminations, a missing working
/// directory and terminal errors from `ProcessExecution::run`.
pub async fn handle_run(ctx: Arc<AppContext>, args: RunArgs) -> Result<i32> {
    let program = args
        .program
        .clone()
        .unwrap_or_else(|| ctx.config.cli.program.clone());
    info!("Handling run command: {} {:?}", program, args.args);

    // The version check only makes sense for the configured CLI.
    if args.program.is_none() && ctx.config.cli.check_version {
        if let Err(e) = version::check_cli_version(&ctx).await {
            warn!("CLI version check failed: {:#}", e);
        }
    }

    let options = options_for(&ctx, &args);
    let mut execution = ProcessExecution::new(
        Arc::clone(&ctx),
        CommandDescriptor::new(program, args.args),
        Arc::clone(&ctx.banner),
    )
    .with_options(options);
    if !args.no_recover {
        execution = execution.with_recovery(Arc::new(PluginInstaller::new(Arc::clone(&ctx))));
    }

    execution.execute().await
}

/// Applies the command-line overrides on top of the configured options.
fn options_for(ctx: &AppContext, args: &RunArgs) -> ExecOptions {
    let mut options = ExecOptions::from_config(&ctx.config);
    if args.terminal {
        options.mode = DispatchMode::Terminal;
    }
    if args.sanitize {
        options.sanitize = true;
    }
    if let Some(dir) = &args.cwd {
        options.working_dir = Some(dir.clone());
    }
    options
}

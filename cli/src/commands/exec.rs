//! # cloudcmd Exec and List Handlers
//!
//! File: cli/src/commands/exec.rs
//!
//! ## Overview
//!
//! Implements `cloudcmd exec KEY` and `cloudcmd list`. Both work on the
//! command registration table (`[[commands]]` in the configuration, or the
//! built-in table).
//!
//! ## Architecture
//!
//! `build_command` turns one `CommandEntry` into a runnable `Registered`
//! command:
//!
//! - An entry without prompts becomes a plain `ProcessExecution`.
//! - An entry with prompts becomes a `PromptedExecution`. Prompts with an
//!   `options_from` source get a prepare step that fills their pick-list from
//!   the CLI right before they are asked.
//!
//! Every registered command carries the plugin-installer recovery policy.
//!
//! ## Usage
//!
//! ```bash
//! cloudcmd list
//! cloudcmd exec cf.apps
//! cloudcmd exec ks.cluster-create   # asks for the cluster name
//! ```
//!
use crate::common::cloud::plugin::{self, PluginInstaller};
use crate::common::cloud::version;
use crate::common::process::execution::{
    command_line, CommandDescriptor, DispatchMode, ExecOptions, ProcessExecution,
};
use crate::common::process::prompted::{PrepareFn, Prepared, PromptSpec, PromptedExecution};
use crate::core::config::{CommandEntry, OptionSource, PromptEntry};
use crate::core::context::AppContext;
use crate::core::error::{CliError, Result};
use anyhow::anyhow;
use clap::Parser;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shown when an uninstall/update pick-list would be empty.
const NO_PLUGINS_INSTALLED: &str = "No plugins are installed. Please install a plugin before trying again.";

/// # Exec Arguments (`ExecArgs`)
#[derive(Parser, Debug)]
#[command(about = "Run a registered command by key")]
pub struct ExecArgs {
    /// Key of the registered command (see `cloudcmd list`).
    #[arg(required = true)]
    key: String,
}

/// # List Arguments (`ListArgs`)
#[derive(Parser, Debug)]
#[command(about = "List the registered commands")]
pub struct ListArgs {}

/// A registered command ready to run.
pub enum Registered {
    Plain(ProcessExecution),
    Prompted(PromptedExecution),
}

impl Registered {
    /// Runs the command. `None` when a prompt was cancelled.
    pub async fn execute(&self) -> Result<Option<i32>> {
        match self {
            Registered::Plain(execution) => execution.execute().await.map(Some),
            Registered::Prompted(prompted) => prompted.execute().await,
        }
    }
}

/// # Handle Exec Command (`handle_exec`)
///
/// ## Returns
///
/// * `Result<i32>` - The exit code of the command; `0` if the user cancelled
///   a prompt.
///
/// ## Errors
///
/// Returns `CliError::ArgumentParsing` for an unknown key, otherwise whatever
/// the execution fails with.
pub async fn handle_exec(ctx: Arc<AppContext>, args: ExecArgs) -> Result<i32> {
    let entry = ctx
        .config
        .command(&args.key)
        .cloned()
        .ok_or_else(|| {
            anyhow!(CliError::ArgumentParsing(format!(
                "Unknown command '{}'. Run 'cloudcmd list' to see the registered commands.",
                args.key
            )))
        })?;
    info!("Handling exec command '{}'", entry.key);

    if ctx.config.cli.check_version {
        if let Err(e) = version::check_cli_version(&ctx).await {
            warn!("CLI version check failed: {:#}", e);
        }
    }

    let command = build_command(&ctx, &entry);
    match command.execute().await? {
        Some(code) => Ok(code),
        None => {
            debug!("'{}' was cancelled", entry.key);
            Ok(0)
        }
    }
}

/// # Handle List Command (`handle_list`)
///
/// Prints one line per registered command: key, dispatch mode and the base
/// command line.
pub fn handle_list(ctx: Arc<AppContext>, _args: ListArgs) -> Result<()> {
    let width = ctx
        .config
        .commands
        .iter()
        .map(|entry| entry.key.len())
        .max()
        .unwrap_or(0);
    for entry in &ctx.config.commands {
        println!("{}", describe(entry, &ctx.config.cli.program, width));
    }
    Ok(())
}

fn describe(entry: &CommandEntry, program: &str, width: usize) -> String {
    let mut line = format!("{:<width$}  {}", entry.key, command_line(program, &entry.args), width = width);
    for prompt in &entry.prompts {
        if let Some(prefix) = &prompt.prefix {
            line.push(' ');
            line.push_str(prefix);
        }
        line.push_str(" <");
        line.push_str(&prompt.prompt);
        line.push('>');
    }
    for arg in &entry.additional_args {
        line.push(' ');
        line.push_str(arg);
    }
    if entry.terminal {
        line.push_str("  [terminal]");
    }
    line
}

/// Builds the runnable form of a registration entry.
pub fn build_command(ctx: &Arc<AppContext>, entry: &CommandEntry) -> Registered {
    let mut options = ExecOptions::from_config(&ctx.config);
    if entry.terminal {
        options.mode = DispatchMode::Terminal;
    }
    if let Some(sanitize) = entry.sanitize {
        options.sanitize = sanitize;
    }

    // Without prompts the trailing arguments go straight onto the base ones.
    let base_args: Vec<String> = if entry.prompts.is_empty() {
        entry.args.iter().chain(&entry.additional_args).cloned().collect()
    } else {
        entry.args.clone()
    };
    let execution = ProcessExecution::new(
        Arc::clone(ctx),
        CommandDescriptor::new(ctx.config.cli.program.as_str(), base_args),
        Arc::clone(&ctx.banner),
    )
    .with_options(options)
    .with_recovery(Arc::new(PluginInstaller::new(Arc::clone(ctx))));

    if entry.prompts.is_empty() {
        return Registered::Plain(execution);
    }

    let prompts: Vec<PromptSpec> = entry.prompts.iter().map(prompt_spec).collect();
    let prompted = PromptedExecution::new(execution, prompts, entry.additional_args.clone());
    match prepare_for(ctx, &entry.prompts) {
        Some(prepare) => Registered::Prompted(prompted.with_prepare(prepare)),
        None => Registered::Prompted(prompted),
    }
}

fn prompt_spec(entry: &PromptEntry) -> PromptSpec {
    let mut spec = PromptSpec::text(entry.prompt.as_str());
    if let Some(prefix) = &entry.prefix {
        spec = spec.with_prefix(prefix.as_str());
    }
    if !entry.options.is_empty() {
        spec = spec.with_options(entry.options.clone());
    }
    spec
}

/// A prepare step filling the pick-lists of prompts with an `options_from`
/// source, or `None` if no prompt has one.
fn prepare_for(ctx: &Arc<AppContext>, entries: &[PromptEntry]) -> Option<PrepareFn> {
    let sources: Vec<Option<OptionSource>> = entries.iter().map(|e| e.options_from).collect();
    if sources.iter().all(Option::is_none) {
        return None;
    }
    let ctx = Arc::clone(ctx);
    Some(Arc::new(move |prompts: Vec<PromptSpec>| -> BoxFuture<'static, Result<Prepared>> {
        let ctx = Arc::clone(&ctx);
        let sources = sources.clone();
        async move {
            let mut filled = Vec::with_capacity(prompts.len());
            for (spec, source) in prompts.into_iter().zip(sources) {
                let Some(source) = source else {
                    filled.push(spec);
                    continue;
                };
                let options = fetch_options(&ctx, source).await?;
                if options.is_empty() && source == OptionSource::InstalledPlugins {
                    return Ok(Prepared::Abort(NO_PLUGINS_INSTALLED.to_string()));
                }
                filled.push(spec.with_options(options));
            }
            Ok(Prepared::Ready(filled))
        }
        .boxed()
    }))
}

async fn fetch_options(ctx: &Arc<AppContext>, source: OptionSource) -> Result<Vec<String>> {
    match source {
        OptionSource::InstalledPlugins => plugin::installed_plugins(ctx).await,
        OptionSource::InstallablePlugins => plugin::installable_plugins(ctx).await,
        OptionSource::ServiceIds => plugin::service_ids(ctx).await,
    }
}

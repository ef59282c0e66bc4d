//! # cloudcmd Logs Command
//!
//! File: cli/src/commands/logs/mod.rs
//!
//! ## Overview
//!
//! `cloudcmd logs` streams application logs from several apps at once. Each app
//! is a `LogSessions` entry with its own labelled channel, so interleaved lines
//! on the console stay attributable (`[app1] ...`).
//!
//! After starting the apps named on the command line, a small console loop
//! reads commands from stdin:
//!
//! | Command         | Effect                                          |
//! |-----------------|-------------------------------------------------|
//! | `start [app]`   | Start streaming `app` (asks for it if omitted). |
//! | `stop [app]`    | Stop `app` (offers the running ones if omitted).|
//! | `list`          | Print the running sessions.                     |
//! | `quit`          | Stop everything and exit.                       |
//!
//! An empty line, end of input or Ctrl-C also ends the loop. Every session is
//! stopped before the command returns.
//!
//! ## Usage
//!
//! ```bash
//! cloudcmd logs web worker
//! ```
//!
pub mod sessions;

use crate::common::ui::sink::{ConsoleSink, OutputSink};
use crate::core::context::AppContext;
use crate::core::error::Result;
use clap::Parser;
use sessions::LogSessions;
use std::sync::Arc;
use tracing::{info, warn};

const CONSOLE_HELP: &str = "Commands: start [app], stop [app], list, quit\n";

/// # Logs Arguments (`LogsArgs`)
#[derive(Parser, Debug)]
#[command(about = "Stream application logs from one or more apps")]
pub struct LogsArgs {
    /// Apps to start streaming right away.
    #[arg(value_name = "APP")]
    apps: Vec<String>,
}

/// A line typed into the logs console.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConsoleCommand {
    Start(Option<String>),
    Stop(Option<String>),
    List,
    Quit,
    Unknown(String),
}

fn parse_console_command(line: &str) -> ConsoleCommand {
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default().to_lowercase();
    let target = words.next().map(str::to_string);
    match verb.as_str() {
        "start" => ConsoleCommand::Start(target),
        "stop" => ConsoleCommand::Stop(target),
        "list" | "ls" => ConsoleCommand::List,
        "quit" | "exit" | "q" => ConsoleCommand::Quit,
        _ => ConsoleCommand::Unknown(line.trim().to_string()),
    }
}

/// # Handle Logs Command (`handle_logs`)
///
/// ## Arguments
///
/// * `ctx` - The application context.
/// * `args` - The parsed `LogsArgs`.
///
/// ## Returns
///
/// * `Result<()>` - Always `Ok` once every session has been stopped; stream
///   failures are reported on their channels.
pub async fn handle_logs(ctx: Arc<AppContext>, args: LogsArgs) -> Result<()> {
    info!("Handling logs command: {:?}", args.apps);
    let sessions = LogSessions::new(Arc::clone(&ctx));
    for app in &args.apps {
        sessions.start(app);
    }

    let console = ConsoleSink;
    tokio::select! {
        _ = console_loop(&ctx, &sessions, &console) => {}
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => info!("Interrupted, stopping log sessions"),
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        },
    }

    sessions.stop_all().await;
    Ok(())
}

/// Reads console commands until `quit`, an empty line or end of input.
async fn console_loop(ctx: &AppContext, sessions: &LogSessions, out: &dyn OutputSink) {
    out.append(CONSOLE_HELP);
    while let Some(line) = ctx.prompter.ask_text("logs").await {
        match parse_console_command(&line) {
            ConsoleCommand::Start(Some(app)) => {
                if !sessions.start(&app) {
                    out.append(&format!("'{}' is already streaming.\n", app));
                }
            }
            ConsoleCommand::Start(None) => {
                sessions.start_prompted().await;
            }
            ConsoleCommand::Stop(Some(app)) => {
                if !sessions.stop_id(&app).await {
                    out.append(&format!("No log session for '{}'.\n", app));
                }
            }
            ConsoleCommand::Stop(None) => {
                sessions.stop().await;
            }
            ConsoleCommand::List => {
                let ids = sessions.active_ids();
                if ids.is_empty() {
                    out.append("No active log sessions.\n");
                } else {
                    for id in ids {
                        out.append(&format!("  {}\n", id));
                    }
                }
            }
            ConsoleCommand::Quit => break,
            ConsoleCommand::Unknown(input) => {
                out.append(&format!("Unknown command '{}'. {}", input, CONSOLE_HELP));
            }
        }
    }
}

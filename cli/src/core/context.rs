//! # cloudcmd Application Context
//!
//! File: cli/src/core/context.rs
//!
//! ## Overview
//!
//! `AppContext` is built once in `main` and shared as `Arc<AppContext>` by every
//! component that needs process-wide state: the loaded configuration, the
//! external collaborators (spawner, process tree, prompter), the shared
//! terminal, the banner channel that all top-level commands write to, and the
//! "has the CLI version been checked yet" flag.
//!
//! Tests build a context from fakes through `AppContext::new`.
//!
use crate::common::process::spawn::{Spawner, TokioSpawner};
use crate::common::process::tree::{ProcessTree, PsProcessTree};
use crate::common::ui::prompt::{ConsolePrompter, Prompter};
use crate::common::ui::sink::{ChannelSink, OutputSink};
use crate::common::ui::terminal::{ShellFactory, TerminalFactory, TerminalManager};
use crate::core::config::Config;
use crate::core::error::Result;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Name of the banner channel and of the shared terminal.
pub const APP_CHANNEL: &str = "cloudcmd";

/// The external collaborators a context is assembled from.
pub struct Collaborators {
    pub spawner: Arc<dyn Spawner>,
    pub process_tree: Arc<dyn ProcessTree>,
    pub prompter: Arc<dyn Prompter>,
    pub terminals: Arc<dyn TerminalFactory>,
    pub banner: Arc<dyn OutputSink>,
}

/// Process-wide state shared by all executions.
pub struct AppContext {
    pub config: Config,
    pub spawner: Arc<dyn Spawner>,
    pub process_tree: Arc<dyn ProcessTree>,
    pub prompter: Arc<dyn Prompter>,
    pub terminal: TerminalManager,
    /// Shared channel for command output and version warnings.
    pub banner: Arc<dyn OutputSink>,
    version_checked: AtomicBool,
}

impl AppContext {
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        Self {
            config,
            spawner: collaborators.spawner,
            process_tree: collaborators.process_tree,
            prompter: collaborators.prompter,
            terminal: TerminalManager::new(APP_CHANNEL, collaborators.terminals),
            banner: collaborators.banner,
            version_checked: AtomicBool::new(false),
        }
    }

    /// Builds the context with the real console, process and shell collaborators.
    ///
    /// # Arguments
    ///
    /// * `config` - The loaded configuration.
    /// * `assume_yes` - Auto-confirm every confirmation prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if the banner channel's log file cannot be opened.
    pub fn from_config(config: Config, assume_yes: bool) -> Result<Self> {
        let banner = Arc::new(open_channel(APP_CHANNEL, config.cli.log_dir.as_deref().map(Path::new))?);
        let terminals = Arc::new(ShellFactory::new(config.working_dir()));
        Ok(Self::new(
            config,
            Collaborators {
                spawner: Arc::new(TokioSpawner),
                process_tree: Arc::new(PsProcessTree),
                prompter: Arc::new(ConsolePrompter::new(assume_yes)),
                terminals,
                banner,
            },
        ))
    }

    /// Creates a labelled channel for `name`, mirrored to the configured log
    /// directory when there is one. Falls back to an in-memory channel if the
    /// log file cannot be opened.
    pub fn channel(&self, name: &str) -> Arc<ChannelSink> {
        let log_dir = self.config.cli.log_dir.as_deref().map(Path::new);
        match open_channel(name, log_dir) {
            Ok(sink) => Arc::new(sink.labelled()),
            Err(e) => {
                warn!("Channel '{}' will not be logged to disk: {:#}", name, e);
                Arc::new(ChannelSink::new(name).labelled())
            }
        }
    }

    /// Claims the one-time version check. Returns `true` only for the first caller.
    pub fn begin_version_check(&self) -> bool {
        !self.version_checked.swap(true, Ordering::SeqCst)
    }
}

fn open_channel(name: &str, log_dir: Option<&Path>) -> Result<ChannelSink> {
    match log_dir {
        Some(dir) => ChannelSink::with_log_dir(name, dir),
        None => Ok(ChannelSink::new(name)),
    }
}

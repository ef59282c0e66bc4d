//! # cloudcmd Shared Terminal (`common::ui::terminal`)
//!
//! File: cli/src/common/ui/terminal.rs
//!
//! ## Overview
//!
//! Commands configured for terminal hand-off are not captured; their command
//! line is typed into one interactive shell session that the user shares with
//! every other terminal-mode command. This module owns that session.
//!
//! ## Architecture
//!
//! - **`Terminal`**: `send_text`, `show`, `closed()` (a watch channel that
//!   flips to `true` when the session ends) and `wait_idle`.
//! - **`TerminalFactory`**: creates a new session on demand.
//! - **`TerminalManager`**: the process-wide resource. State is `Unset` or
//!   `Live`; `get()` returns the live session or lazily opens a new one, and a
//!   background subscription on `closed()` drops the cached handle as soon as
//!   the session exits, so the next `get()` starts a fresh one.
//! - **`ShellTerminal`** / **`ShellFactory`**: runs each line with `$SHELL -c`
//!   on the console's own stdin and stdout, in call order.
//!
//! Hand-offs return as soon as the line is queued. The CLI calls
//! `TerminalManager::wait_idle` before it exits so a queued login is not cut
//! off.
//!
use crate::core::error::{CliError, Result};
use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// An interactive terminal session.
#[async_trait]
pub trait Terminal: Send + Sync {
    /// Types `text` into the session. Include a trailing newline to run it.
    async fn send_text(&self, text: &str) -> Result<()>;

    fn show(&self, preserve_focus: bool);

    /// Close notification: the value becomes `true` once the session has ended.
    fn closed(&self) -> watch::Receiver<bool>;

    /// Resolves once every line sent so far has finished running.
    async fn wait_idle(&self);
}

/// Opens new terminal sessions.
pub trait TerminalFactory: Send + Sync {
    fn open(&self, name: &str) -> Result<Arc<dyn Terminal>>;
}

struct LiveTerminal {
    handle: Arc<dyn Terminal>,
    generation: u64,
}

enum TerminalState {
    Unset,
    Live(LiveTerminal),
}

struct ManagerInner {
    state: TerminalState,
    next_generation: u64,
}

/// Lazily created, self-healing singleton terminal.
pub struct TerminalManager {
    name: String,
    factory: Arc<dyn TerminalFactory>,
    inner: Arc<Mutex<ManagerInner>>,
}

impl TerminalManager {
    pub fn new(name: impl Into<String>, factory: Arc<dyn TerminalFactory>) -> Self {
        Self {
            name: name.into(),
            factory,
            inner: Arc::new(Mutex::new(ManagerInner {
                state: TerminalState::Unset,
                next_generation: 0,
            })),
        }
    }

    /// Returns the live terminal, opening a new one if none exists or the
    /// previous one was closed.
    ///
    /// Must be called from within a tokio runtime: the close subscription runs
    /// as a background task.
    ///
    /// # Errors
    ///
    /// Returns an error if the factory cannot open a session.
    pub fn get(&self) -> Result<Arc<dyn Terminal>> {
        let mut inner = self.inner.lock();
        if let TerminalState::Live(live) = &inner.state {
            if !*live.handle.closed().borrow() {
                return Ok(Arc::clone(&live.handle));
            }
            debug!("Terminal '{}' was closed, opening a new one", self.name);
        }

        let handle = self.factory.open(&self.name)?;
        let generation = inner.next_generation;
        inner.next_generation += 1;
        inner.state = TerminalState::Live(LiveTerminal {
            handle: Arc::clone(&handle),
            generation,
        });
        drop(inner);

        self.watch_close(handle.closed(), generation);
        info!("Opened terminal '{}'", self.name);
        Ok(handle)
    }

    /// True while a session is cached and has not reported its close.
    pub fn is_live(&self) -> bool {
        match &self.inner.lock().state {
            TerminalState::Live(live) => !*live.handle.closed().borrow(),
            TerminalState::Unset => false,
        }
    }

    /// Waits for the live session, if any, to finish the lines it was sent.
    pub async fn wait_idle(&self) {
        let live = match &self.inner.lock().state {
            TerminalState::Live(live) => Some(Arc::clone(&live.handle)),
            TerminalState::Unset => None,
        };
        if let Some(handle) = live {
            debug!("Waiting for terminal '{}' to finish", self.name);
            handle.wait_idle().await;
        }
    }

    fn watch_close(&self, mut closed: watch::Receiver<bool>, generation: u64) {
        let inner = Arc::clone(&self.inner);
        let name = self.name.clone();
        tokio::spawn(async move {
            while !*closed.borrow_and_update() {
                if closed.changed().await.is_err() {
                    break;
                }
            }
            let mut inner = inner.lock();
            let is_current = matches!(
                &inner.state,
                TerminalState::Live(live) if live.generation == generation
            );
            if is_current {
                debug!("Terminal '{}' closed, clearing cached handle", name);
                inner.state = TerminalState::Unset;
            }
        });
    }
}

/// Runs typed lines with `$SHELL -c`, one after another, on the console.
///
/// Every line gets the console's own stdin, stdout and stderr, so commands
/// that talk to the user (an SSO login, a password prompt) work as if typed
/// into a shell. Shell state such as `cd` does not carry over between lines.
/// The session closes when a line cannot be started.
pub struct ShellTerminal {
    name: String,
    lines: mpsc::UnboundedSender<String>,
    pending: Arc<watch::Sender<usize>>,
    closed: watch::Receiver<bool>,
    announced: AtomicBool,
}

impl ShellTerminal {
    /// Starts the worker that runs lines with `shell`. A shell that cannot be
    /// started closes the session on the first line.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(name: &str, shell: &str, cwd: Option<&PathBuf>) -> Self {
        let (lines_tx, mut lines_rx) = mpsc::unbounded_channel::<String>();
        let (closed_tx, closed_rx) = watch::channel(false);
        let pending = Arc::new(watch::channel(0usize).0);

        let worker_pending = Arc::clone(&pending);
        let terminal_name = name.to_string();
        let shell = shell.to_string();
        let cwd = cwd.cloned();
        tokio::spawn(async move {
            while let Some(line) = lines_rx.recv().await {
                let mut command = Command::new(&shell);
                command
                    .arg("-c")
                    .arg(&line)
                    .stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit());
                if let Some(dir) = &cwd {
                    command.current_dir(dir);
                }
                let started = match command.status().await {
                    Ok(status) => {
                        debug!("Terminal '{}' ran '{}': {}", terminal_name, line, status);
                        true
                    }
                    Err(e) => {
                        warn!("Terminal '{}' could not start '{}': {}", terminal_name, shell, e);
                        false
                    }
                };
                worker_pending.send_modify(|count| *count = count.saturating_sub(1));
                if !started {
                    break;
                }
            }
            closed_tx.send_replace(true);
            worker_pending.send_replace(0);
        });

        Self {
            name: name.to_string(),
            lines: lines_tx,
            pending,
            closed: closed_rx,
            announced: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Terminal for ShellTerminal {
    async fn send_text(&self, text: &str) -> Result<()> {
        if *self.closed.borrow() {
            return Err(anyhow!(CliError::Terminal(format!(
                "terminal '{}' is closed",
                self.name
            ))));
        }
        let line = text.trim_end_matches('\n');
        if line.trim().is_empty() {
            return Ok(());
        }
        self.pending.send_modify(|count| *count += 1);
        if self.lines.send(line.to_string()).is_err() {
            self.pending.send_modify(|count| *count = count.saturating_sub(1));
            return Err(anyhow!(CliError::Terminal(format!(
                "terminal '{}' is closed",
                self.name
            ))));
        }
        Ok(())
    }

    fn show(&self, preserve_focus: bool) {
        if !self.announced.swap(true, Ordering::SeqCst) {
            eprintln!("--- terminal: {} ---", self.name);
        }
        debug!(
            "Showing terminal '{}' (preserve focus: {})",
            self.name, preserve_focus
        );
    }

    fn closed(&self) -> watch::Receiver<bool> {
        self.closed.clone()
    }

    async fn wait_idle(&self) {
        let mut pending = self.pending.subscribe();
        while *pending.borrow_and_update() > 0 {
            if pending.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Opens `ShellTerminal`s using `$SHELL` (or `sh`).
pub struct ShellFactory {
    shell: String,
    cwd: Option<PathBuf>,
}

impl ShellFactory {
    pub fn new(cwd: Option<PathBuf>) -> Self {
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "sh".to_string());
        Self { shell, cwd }
    }
}

impl TerminalFactory for ShellFactory {
    fn open(&self, name: &str) -> Result<Arc<dyn Terminal>> {
        Ok(Arc::new(ShellTerminal::spawn(name, &self.shell, self.cwd.as_ref())))
    }
}

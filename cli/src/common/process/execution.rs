//! # cloudcmd Process Execution (`common::process::execution`)
//!
//! File: cli/src/common/process/execution.rs
//!
//! ## Overview
//!
//! `ProcessExecution` wraps one invocation of an external program. In capture
//! mode it spawns the program, streams stdout and stderr into an `OutputSink`,
//! resolves with the exit code and reacts to the two failure kinds it knows:
//!
//! - **Command not found**: the program could not be launched. An error line is
//!   written to the sink, the user is notified and the run fails with
//!   `CliError::CommandNotFound`.
//! - **Plugin not found**: the output says the subcommand is not registered. If
//!   a `RecoveryPolicy` is attached and the user agrees, the missing plugin is
//!   installed and the command re-runs with the same arguments. This happens at
//!   most once per run.
//!
//! In terminal mode the command line is handed to the shared interactive
//! terminal instead and the run resolves immediately with `TERMINAL_SENTINEL`.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle -> Spawning -> Running -> Closing -> Resolved
//!                                   |
//!                                   +-> Recovering -> Spawning (once)
//! ```
//!
//! Per-run state (buffers, partial UTF-8 sequences) lives inside `run` and is
//! dropped when it returns. What outlives a spawn is the kill scope: the pids
//! of the running child and of every helper started for its recovery. `kill`
//! stops all of them and cancels the run, so a killed execution never spawns
//! again.
//!
use crate::common::process::classify::{classify, FailureKind};
use crate::common::process::sanitize::sanitize_to_string;
use crate::common::process::spawn::{ExitInfo, ProcessEvent, SpawnRequest};
use crate::common::ui::prompt::Level;
use crate::common::ui::sink::{keep_tail, OutputSink};
use crate::core::config::Config;
use crate::core::context::AppContext;
use crate::core::error::{CliError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

/// Code a terminal-mode run resolves with; the real status is never observed.
pub const TERMINAL_SENTINEL: i32 = 0;

/// Written to the sink for every stdout chunk while output is being buffered
/// for sanitizing.
const PROGRESS_PLACEHOLDER: &str = ".";

/// Where users are sent when the wrapped program cannot be found.
const INSTALL_HELP_URL: &str = "https://cloud.ibm.com/docs/cli?topic=cli-install-ibmcloud-cli";

/// Bytes of stdout and stderr kept for classification when output is not retained.
const CLASSIFY_WINDOW: usize = 4 * 1024;

/// A program plus its base arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub command: String,
    pub args: Vec<String>,
}

impl CommandDescriptor {
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Formats `command args...` the way it is echoed to sinks and terminals.
pub fn command_line(command: &str, args: &[String]) -> String {
    if args.is_empty() {
        command.to_string()
    } else {
        format!("{} {}", command, args.join(" "))
    }
}

/// How a run is dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// Spawn and capture output into the sink.
    #[default]
    Capture,
    /// Type the command line into the shared interactive terminal.
    Terminal,
}

/// Per-execution settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOptions {
    pub mode: DispatchMode,
    /// Buffer stdout and clean it once the process closes.
    pub sanitize: bool,
    pub working_dir: Option<PathBuf>,
    /// Refuse to spawn when `working_dir` is missing or not a directory.
    pub require_working_dir: bool,
    /// Call `show` on the sink before the first write.
    pub reveal: bool,
    /// Keep the full stdout and stderr for the `Completion`. When false only
    /// the last few KiB are kept, enough to classify the failure.
    pub retain_output: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            mode: DispatchMode::Capture,
            sanitize: false,
            working_dir: None,
            require_working_dir: false,
            reveal: true,
            retain_output: true,
        }
    }
}

impl ExecOptions {
    /// Derives the options from the `[cli]` configuration section.
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: if config.cli.use_terminal {
                DispatchMode::Terminal
            } else {
                DispatchMode::Capture
            },
            sanitize: config.cli.sanitize_output,
            working_dir: config.working_dir(),
            require_working_dir: config.cli.require_working_dir,
            reveal: true,
            retain_output: true,
        }
    }

    /// Options for background queries: captured, unsanitized, not revealed and
    /// not tied to a project directory.
    pub fn quiet() -> Self {
        Self {
            reveal: false,
            ..Self::default()
        }
    }
}

/// Result of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub code: i32,
    /// Stdout, sanitized when sanitizing was enabled. Only the tail when
    /// `retain_output` is off.
    pub stdout: String,
    pub stderr: String,
}

/// Lifecycle phase of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Spawning,
    Running,
    Closing,
    Recovering,
    Resolved,
}

impl Phase {
    fn is_active(self) -> bool {
        matches!(
            self,
            Phase::Spawning | Phase::Running | Phase::Closing | Phase::Recovering
        )
    }
}

/// Installs whatever a failed command was missing so it can be re-run.
#[async_trait]
pub trait RecoveryPolicy: Send + Sync {
    /// Attempts the installation, writing progress to the failed execution's sink.
    ///
    /// # Arguments
    ///
    /// * `failed` - The execution that reported the missing plugin. Processes
    ///   the policy needs must be built with `failed.helper(..)` so killing
    ///   `failed` stops them too.
    /// * `args` - The arguments it was run with; `args[0]` names the plugin command.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing suitable could be installed.
    async fn recover(&self, failed: &ProcessExecution, args: &[String]) -> Result<()>;
}

/// Pids started on behalf of one execution, plus its sticky cancel flag.
#[derive(Debug)]
struct KillScope {
    cancelled: watch::Sender<bool>,
    pids: Mutex<Vec<u32>>,
}

impl KillScope {
    fn new() -> Self {
        let (cancelled, _) = watch::channel(false);
        Self {
            cancelled,
            pids: Mutex::new(Vec::new()),
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Records a freshly spawned pid. False if the scope was cancelled first;
    /// the caller then owns killing it.
    fn register(&self, pid: u32) -> bool {
        let mut pids = self.pids.lock();
        if self.is_cancelled() {
            return false;
        }
        pids.push(pid);
        true
    }

    fn release(&self, pid: u32) {
        self.pids.lock().retain(|&p| p != pid);
    }

    /// Cancels the scope and hands back every pid still running in it.
    fn cancel(&self) -> Vec<u32> {
        let mut pids = self.pids.lock();
        self.cancelled.send_replace(true);
        std::mem::take(&mut *pids)
    }

    /// Resolves once the scope is cancelled.
    async fn wait_cancelled(&self) {
        let mut cancelled = self.cancelled.subscribe();
        while !*cancelled.borrow_and_update() {
            if cancelled.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Buffers of a single spawn, discarded when the spawn is done.
#[derive(Default)]
struct ExecutionState {
    raw_stdout: Vec<u8>,
    stdout: String,
    stderr: String,
    stdout_tail: Vec<u8>,
    stderr_tail: Vec<u8>,
}

impl ExecutionState {
    fn keep(buffer: &mut String, text: &str, retain: bool) {
        buffer.push_str(text);
        if !retain {
            keep_tail(buffer, CLASSIFY_WINDOW);
        }
    }

    fn into_completion(self, code: i32) -> Completion {
        Completion {
            code,
            stdout: self.stdout,
            stderr: self.stderr,
        }
    }
}

/// One invocation of an external program.
pub struct ProcessExecution {
    ctx: Arc<AppContext>,
    descriptor: CommandDescriptor,
    sink: Arc<dyn OutputSink>,
    options: ExecOptions,
    recovery: Option<Arc<dyn RecoveryPolicy>>,
    phase: Mutex<Phase>,
    scope: Arc<KillScope>,
}

impl ProcessExecution {
    /// Creates an idle execution with options taken from the configuration.
    pub fn new(ctx: Arc<AppContext>, descriptor: CommandDescriptor, sink: Arc<dyn OutputSink>) -> Self {
        let options = ExecOptions::from_config(&ctx.config);
        Self {
            ctx,
            descriptor,
            sink,
            options,
            recovery: None,
            phase: Mutex::new(Phase::Idle),
            scope: Arc::new(KillScope::new()),
        }
    }

    /// Creates an execution that lives in this one's kill scope: `kill` on
    /// `self` stops it as well, and once `self` is killed it refuses to spawn.
    /// Options come from the configuration, as with `new`.
    pub fn helper(&self, descriptor: CommandDescriptor, sink: Arc<dyn OutputSink>) -> ProcessExecution {
        let mut helper = ProcessExecution::new(Arc::clone(&self.ctx), descriptor, sink);
        helper.scope = Arc::clone(&self.scope);
        helper
    }

    pub fn with_options(mut self, options: ExecOptions) -> Self {
        self.options = options;
        self
    }

    /// Enables plugin-not-found recovery through `policy`.
    pub fn with_recovery(mut self, policy: Arc<dyn RecoveryPolicy>) -> Self {
        self.recovery = Some(policy);
        self
    }

    pub fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    pub fn sink(&self) -> &Arc<dyn OutputSink> {
        &self.sink
    }

    pub fn options(&self) -> &ExecOptions {
        &self.options
    }

    pub(crate) fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    /// True from the moment a run starts until it resolves.
    pub fn is_active(&self) -> bool {
        self.phase().is_active()
    }

    /// Runs with the descriptor's arguments and returns only the exit code.
    ///
    /// # Errors
    ///
    /// See `run`.
    pub async fn execute(&self) -> Result<i32> {
        self.run().await.map(|completion| completion.code)
    }

    /// Runs with the descriptor's arguments.
    ///
    /// # Returns
    ///
    /// The exit code and captured output. Non-zero codes are not errors.
    ///
    /// # Errors
    ///
    /// - `CliError::MissingWorkingDirectory` when a working directory is
    ///   required and unavailable; nothing is spawned.
    /// - `CliError::CommandNotFound` when the program cannot be launched.
    /// - `CliError::Terminated` when the child is killed by a signal.
    /// - `CliError::Cancelled` when `kill` was called before the child (or a
    ///   re-run after recovery) could be spawned, or while recovering.
    /// - `CliError::StreamLost` when the child's event stream ends without an
    ///   exit status.
    /// - Terminal errors in terminal mode.
    pub async fn run(&self) -> Result<Completion> {
        let args = self.descriptor.args.clone();
        self.run_with_args(args).await
    }

    /// Starts `execute` on a background task. The phase leaves `Idle` before
    /// this returns, so `is_active` is true immediately.
    pub fn spawn_detached(self: &Arc<Self>) -> JoinHandle<Result<i32>> {
        self.set_phase(Phase::Spawning);
        let execution = Arc::clone(self);
        tokio::spawn(async move { execution.execute().await })
    }

    /// Runs with an explicit argument list instead of the descriptor's.
    #[instrument(skip(self, args), fields(command = %self.descriptor.command))]
    pub(crate) async fn run_with_args(&self, args: Vec<String>) -> Result<Completion> {
        let result = match self.options.mode {
            DispatchMode::Terminal => self.hand_off(&args).await,
            DispatchMode::Capture => self.capture(args).await,
        };
        self.set_phase(Phase::Resolved);
        result
    }

    /// Forcefully stops the running child, every helper started for its
    /// recovery, and all of their descendants. The execution is cancelled for
    /// good: a run that has not spawned yet, or is between recovery and its
    /// re-run, resolves with `CliError::Cancelled` instead of spawning.
    ///
    /// Each pid is announced on the sink as `killing <pid>`. A failed kill is
    /// logged and does not stop the remaining ones.
    ///
    /// # Returns
    ///
    /// The number of processes that were signalled successfully; 0 when nothing
    /// is running.
    pub async fn kill(&self) -> usize {
        let roots = self.scope.cancel();
        if roots.is_empty() {
            debug!("'{}' has no running process to kill", self.descriptor.command);
            return 0;
        }

        let mut killed = 0;
        for root in roots {
            killed += self.kill_tree(root).await;
        }
        info!("Killed {} process(es) of '{}'", killed, self.descriptor.command);
        killed
    }

    async fn kill_tree(&self, root: u32) -> usize {
        let descendants = match self.ctx.process_tree.descendants(root).await {
            Ok(pids) => pids,
            Err(e) => {
                warn!("Could not enumerate children of {}: {:#}", root, e);
                Vec::new()
            }
        };

        let mut killed = 0;
        for pid in std::iter::once(root).chain(descendants) {
            self.sink.append(&format!("killing {}\n", pid));
            match self.ctx.process_tree.kill(pid).await {
                Ok(()) => killed += 1,
                Err(e) => warn!("Failed to kill {}: {:#}", pid, e),
            }
        }
        killed
    }

    fn set_phase(&self, phase: Phase) {
        let mut current = self.phase.lock();
        if *current != phase {
            trace!("{} -> {:?}", self.descriptor.command, phase);
            *current = phase;
        }
    }

    fn cancelled_error(&self) -> anyhow::Error {
        CliError::Cancelled {
            command: self.descriptor.command.clone(),
        }
        .into()
    }

    async fn hand_off(&self, args: &[String]) -> Result<Completion> {
        let line = command_line(&self.descriptor.command, args);
        let terminal = self.ctx.terminal.get()?;
        terminal.send_text(&format!("{}\n", line)).await?;
        terminal.show(false);
        debug!("Sent '{}' to the terminal", line);
        Ok(Completion {
            code: TERMINAL_SENTINEL,
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    async fn capture(&self, args: Vec<String>) -> Result<Completion> {
        if self.options.reveal {
            self.sink.show(true);
        }
        let cwd = self.resolve_working_dir()?;
        let command = self.descriptor.command.clone();

        let mut recovery_spent = false;
        loop {
            let (exit, state) = self.spawn_and_capture(&args, cwd.as_ref()).await?;

            if let Some(signal) = exit.signal {
                debug!("'{}' was terminated by signal {}", command, signal);
                return Err(CliError::Terminated { command, signal }.into());
            }
            let code = exit.code.unwrap_or(-1);

            match classify(code, &state.stdout, &state.stderr) {
                FailureKind::CommandNotFound => {
                    self.report_failure(&format!(
                        "Unable to locate '{}'. Make sure it is installed and on your PATH: {}",
                        command, INSTALL_HELP_URL
                    ));
                    return Err(CliError::CommandNotFound { command, code }.into());
                }
                FailureKind::PluginNotFound if !recovery_spent => {
                    recovery_spent = true;
                    if self.recover(&args).await? {
                        continue;
                    }
                    return Ok(state.into_completion(code));
                }
                FailureKind::PluginNotFound => {
                    warn!("'{}' still reports a missing plugin after installation", command);
                    self.report_failure(&format!(
                        "'{}' still needs a plugin after installation.",
                        command_line(&command, &args)
                    ));
                    return Ok(state.into_completion(code));
                }
                FailureKind::None | FailureKind::Unknown => {
                    return Ok(state.into_completion(code));
                }
            }
        }
    }

    fn resolve_working_dir(&self) -> Result<Option<PathBuf>> {
        let usable = self
            .options
            .working_dir
            .as_ref()
            .filter(|dir| dir.is_dir())
            .cloned();
        if usable.is_none() && self.options.require_working_dir {
            self.report_failure("Please select your project's working directory.");
            return Err(CliError::MissingWorkingDirectory {
                command: self.descriptor.command.clone(),
            }
            .into());
        }
        Ok(usable)
    }

    async fn spawn_and_capture(
        &self,
        args: &[String],
        cwd: Option<&PathBuf>,
    ) -> Result<(ExitInfo, ExecutionState)> {
        self.set_phase(Phase::Spawning);
        if self.scope.is_cancelled() {
            debug!("'{}' was killed before it could start", self.descriptor.command);
            return Err(self.cancelled_error());
        }
        let mut state = ExecutionState::default();
        self.sink
            .append(&format!("\n> {}\n", command_line(&self.descriptor.command, args)));

        let request = SpawnRequest {
            program: self.descriptor.command.clone(),
            args: args.to_vec(),
            cwd: cwd.cloned(),
        };
        let mut process = match self.ctx.spawner.spawn(&request).await {
            Ok(process) => process,
            Err(e) => {
                warn!("Failed to launch '{}': {}", request.program, e);
                let code = match e.raw_os_error() {
                    Some(errno) if errno != 0 => -errno.abs(),
                    _ => -1,
                };
                state.stderr = e.to_string();
                self.sink.append("\n");
                return Ok((ExitInfo::code(code), state));
            }
        };

        self.set_phase(Phase::Running);
        if let Some(pid) = process.pid {
            if !self.scope.register(pid) {
                // Killed while the spawn was in flight.
                self.kill_tree(pid).await;
            }
        }

        let retain = self.options.retain_output;
        let exit = loop {
            match process.events.recv().await {
                Some(ProcessEvent::Stdout(bytes)) if self.options.sanitize => {
                    state.raw_stdout.extend_from_slice(&bytes);
                    self.sink.append(PROGRESS_PLACEHOLDER);
                }
                Some(ProcessEvent::Stdout(bytes)) => {
                    let text = decode_chunk(&mut state.stdout_tail, &bytes);
                    self.sink.append(&text);
                    ExecutionState::keep(&mut state.stdout, &text, retain);
                }
                Some(ProcessEvent::Stderr(bytes)) => {
                    let text = decode_chunk(&mut state.stderr_tail, &bytes);
                    self.sink.append(&text);
                    ExecutionState::keep(&mut state.stderr, &text, retain);
                }
                Some(ProcessEvent::Error(message)) => {
                    debug!("'{}' reported: {}", self.descriptor.command, message);
                }
                Some(ProcessEvent::Closed(exit)) => break Some(exit),
                None => break None,
            }
        };

        self.set_phase(Phase::Closing);
        if let Some(pid) = process.pid {
            self.scope.release(pid);
        }

        for (tail, out) in [
            (&mut state.stdout_tail, &mut state.stdout),
            (&mut state.stderr_tail, &mut state.stderr),
        ] {
            if !tail.is_empty() {
                let rest = String::from_utf8_lossy(tail).into_owned();
                self.sink.append(&rest);
                ExecutionState::keep(out, &rest, retain);
                tail.clear();
            }
        }
        if self.options.sanitize {
            let clean = sanitize_to_string(&std::mem::take(&mut state.raw_stdout));
            self.sink.append(&clean);
            state.stdout = clean;
        }
        self.sink.append("\n");

        let Some(exit) = exit else {
            warn!("Event stream of '{}' ended without an exit status", self.descriptor.command);
            self.report_failure(&format!(
                "Lost track of '{}' before it reported an exit status.",
                command_line(&self.descriptor.command, args)
            ));
            return Err(CliError::StreamLost {
                command: self.descriptor.command.clone(),
            }
            .into());
        };
        debug!("'{}' closed with {:?}", self.descriptor.command, exit);
        Ok((exit, state))
    }

    /// Asks the user, then runs the recovery policy. True when the command
    /// should be re-run.
    ///
    /// # Errors
    ///
    /// `CliError::Cancelled` if the execution is killed while recovering.
    async fn recover(&self, args: &[String]) -> Result<bool> {
        let Some(policy) = &self.recovery else {
            debug!("No recovery policy attached to '{}'", self.descriptor.command);
            return Ok(false);
        };
        self.set_phase(Phase::Recovering);

        tokio::select! {
            biased;
            () = self.scope.wait_cancelled() => {
                debug!("'{}' was killed while recovering", self.descriptor.command);
                Err(self.cancelled_error())
            }
            rerun = self.confirm_and_recover(policy.as_ref(), args) => Ok(rerun),
        }
    }

    async fn confirm_and_recover(&self, policy: &dyn RecoveryPolicy, args: &[String]) -> bool {
        let question = format!(
            "'{}' needs a CLI plugin that is not installed. Install it and run the command again?",
            command_line(&self.descriptor.command, args)
        );
        if !self.ctx.prompter.confirm(&question).await {
            info!("Plugin installation declined");
            self.sink.append("\nPlugin installation declined.\n");
            return false;
        }

        match policy.recover(self, args).await {
            Ok(()) => {
                info!("Plugin installed, re-running '{}'", self.descriptor.command);
                true
            }
            Err(e) => {
                self.report_failure(&format!("Unable to install the missing plugin: {:#}", e));
                false
            }
        }
    }

    fn report_failure(&self, message: &str) {
        self.sink.append(&format!("\n ERROR: {}\n", message));
        self.ctx.prompter.notify(Level::Error, message);
    }
}

/// Decodes a chunk, holding back an incomplete UTF-8 sequence at its end until
/// the next chunk arrives.
fn decode_chunk(tail: &mut Vec<u8>, bytes: &[u8]) -> String {
    tail.extend_from_slice(bytes);
    let keep_from = match std::str::from_utf8(&tail[..]) {
        Ok(_) => tail.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => tail.len(),
    };
    let pending = tail.split_off(keep_from);
    let text = String::from_utf8_lossy(&tail[..]).into_owned();
    *tail = pending;
    text
}

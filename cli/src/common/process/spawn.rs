//! # cloudcmd Process Spawning (`common::process::spawn`)
//!
//! File: cli/src/common/process/spawn.rs
//!
//! ## Overview
//!
//! The spawn interface turns a program, an argument list and an optional
//! working directory into a running child whose activity arrives as a stream
//! of `ProcessEvent`s: stdout chunks, stderr chunks, non-fatal errors, and
//! exactly one final `Closed` event carrying the exit code or the terminating
//! signal.
//!
//! ## Architecture
//!
//! - **`Spawner`**: the trait the execution engine depends on.
//! - **`TokioSpawner`**: the real implementation on `tokio::process`. One task
//!   per pipe forwards raw chunks; a supervising task waits for both readers to
//!   drain before waiting on the child, so `Closed` is always the last event.
//!   Dropping the event receiver kills the child, and so does dropping the
//!   supervising task (the child is spawned with `kill_on_drop`).
//!
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace, warn};

/// Size of each read from the child's pipes.
const READ_CHUNK: usize = 8 * 1024;
/// Bound of the per-process event queue.
const EVENT_BUFFER: usize = 64;

/// What to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

/// How a child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, absent when the child was terminated by a signal.
    pub code: Option<i32>,
    /// Terminating signal (unix only).
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }
}

/// Activity of a running child, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    /// A non-fatal problem (e.g. a failed pipe read). `Closed` still follows.
    Error(String),
    Closed(ExitInfo),
}

/// A launched child.
#[derive(Debug)]
pub struct SpawnedProcess {
    pub pid: Option<u32>,
    pub events: mpsc::Receiver<ProcessEvent>,
}

/// Process spawn collaborator.
#[async_trait]
pub trait Spawner: Send + Sync {
    /// Launches the request.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the program cannot be started at all (for
    /// example when it is not on `PATH`).
    async fn spawn(&self, request: &SpawnRequest) -> io::Result<SpawnedProcess>;
}

/// Spawns real children with `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSpawner;

#[async_trait]
impl Spawner for TokioSpawner {
    #[instrument(skip(self, request), fields(program = %request.program))]
    async fn spawn(&self, request: &SpawnRequest) -> io::Result<SpawnedProcess> {
        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &request.cwd {
            command.current_dir(dir);
        }

        let mut child = command.spawn()?;
        let pid = child.id();
        debug!("Spawned '{}' with pid {:?}", request.program, pid);

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let stdout_task = child
            .stdout
            .take()
            .map(|pipe| tokio::spawn(forward_pipe(pipe, tx.clone(), ProcessEvent::Stdout)));
        let stderr_task = child
            .stderr
            .take()
            .map(|pipe| tokio::spawn(forward_pipe(pipe, tx.clone(), ProcessEvent::Stderr)));

        tokio::spawn(async move {
            let pipes = [stdout_task, stderr_task];
            let exit = tokio::select! {
                exit = drain_and_wait(&mut child, pipes, &tx) => Some(exit),
                () = tx.closed() => None,
            };
            match exit {
                Some(exit) => {
                    trace!("Child {:?} closed: {:?}", pid, exit);
                    let _ = tx.send(ProcessEvent::Closed(exit)).await;
                }
                None => {
                    debug!("Nobody is listening to child {:?}, killing it", pid);
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill abandoned child {:?}: {}", pid, e);
                    }
                }
            }
        });

        Ok(SpawnedProcess { pid, events: rx })
    }
}

/// Waits for both pipe readers to finish, then for the child itself.
async fn drain_and_wait(
    child: &mut Child,
    pipes: [Option<JoinHandle<()>>; 2],
    tx: &mpsc::Sender<ProcessEvent>,
) -> ExitInfo {
    for task in pipes.into_iter().flatten() {
        if let Err(e) = task.await {
            warn!("Pipe reader task failed: {}", e);
        }
    }
    match child.wait().await {
        Ok(status) => exit_info(status),
        Err(e) => {
            let _ = tx
                .send(ProcessEvent::Error(format!("wait failed: {}", e)))
                .await;
            ExitInfo::code(-1)
        }
    }
}

/// Forwards raw chunks from one pipe until EOF.
async fn forward_pipe<R>(
    mut pipe: R,
    tx: mpsc::Sender<ProcessEvent>,
    wrap: fn(Vec<u8>) -> ProcessEvent,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(wrap(buf[..n].to_vec())).await.is_err() {
                    // Receiver gone; nobody is listening any more.
                    break;
                }
            }
            Err(e) => {
                let _ = tx
                    .send(ProcessEvent::Error(format!("read failed: {}", e)))
                    .await;
                break;
            }
        }
    }
}

fn exit_info(status: std::process::ExitStatus) -> ExitInfo {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitInfo::signal(signal);
        }
    }
    ExitInfo::code(status.code().unwrap_or(-1))
}

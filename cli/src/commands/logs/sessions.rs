//! # cloudcmd Log Sessions (`commands::logs::sessions`)
//!
//! File: cli/src/commands/logs/sessions.rs
//!
//! ## Overview
//!
//! `LogSessions` keeps one long-running `<cli> cf logs <app>` stream per app.
//!
//! - Every app gets its own labelled channel. The channel is created on the
//!   first `start` and reused by every later session of the same app, so its
//!   history survives restarts.
//! - Every `start` builds a fresh `ProcessExecution` against that channel and
//!   runs it on a background task. Streams keep no output of their own beyond
//!   a small tail; the channel holds the history.
//! - A stream that reports a missing plugin is only recovered when
//!   confirmations are automatic (`--yes`). The console reads stdin while
//!   sessions run, so a background confirmation prompt would fight it for input.
//! - Stopping a session kills its stream and any recovery helper it started,
//!   and the stream is never re-run afterwards.
//! - Sessions share nothing but the context. Stopping one app never touches
//!   another app's process or channel.
//!
use crate::common::cloud::plugin::PluginInstaller;
use crate::common::process::execution::{CommandDescriptor, DispatchMode, ExecOptions, ProcessExecution};
use crate::common::ui::prompt::Level;
use crate::common::ui::sink::{ChannelSink, OutputSink};
use crate::core::context::AppContext;
use crate::core::error::{CliError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long `stop_id` waits for a killed stream to wind down.
const STOP_GRACE: Duration = Duration::from_secs(5);

struct Session {
    execution: Arc<ProcessExecution>,
    task: JoinHandle<Result<i32>>,
}

/// Per-app log streams.
pub struct LogSessions {
    ctx: Arc<AppContext>,
    channels: Mutex<HashMap<String, Arc<ChannelSink>>>,
    sessions: Mutex<HashMap<String, Session>>,
}

impl LogSessions {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            ctx,
            channels: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// The channel for `id`, created on first use.
    pub fn channel(&self, id: &str) -> Arc<ChannelSink> {
        let mut channels = self.channels.lock();
        Arc::clone(
            channels
                .entry(id.to_string())
                .or_insert_with(|| self.ctx.channel(id)),
        )
    }

    /// Starts streaming the logs of `id`.
    ///
    /// # Returns
    ///
    /// `false` if a session for `id` is already active; nothing new is spawned.
    pub fn start(&self, id: &str) -> bool {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get(id) {
            if session.execution.is_active() {
                debug!("Log session '{}' is already running", id);
                return false;
            }
        }

        let config = &self.ctx.config;
        let mut args = config.logs.args.clone();
        args.push(id.to_string());
        let sink: Arc<dyn OutputSink> = self.channel(id);
        let options = ExecOptions {
            mode: DispatchMode::Capture,
            sanitize: false,
            working_dir: config.working_dir(),
            require_working_dir: false,
            reveal: true,
            retain_output: false,
        };
        let mut execution = ProcessExecution::new(
            Arc::clone(&self.ctx),
            CommandDescriptor::new(config.cli.program.as_str(), args),
            sink,
        )
        .with_options(options);
        if self.ctx.prompter.auto_confirms() {
            execution = execution.with_recovery(Arc::new(PluginInstaller::new(Arc::clone(&self.ctx))));
        } else {
            debug!("Log session '{}' runs without plugin recovery", id);
        }
        let execution = Arc::new(execution);
        let task = execution.spawn_detached();
        info!("Started log session '{}'", id);
        sessions.insert(id.to_string(), Session { execution, task });
        true
    }

    /// Asks for an app name and starts its stream.
    ///
    /// # Returns
    ///
    /// The started id, or `None` when the prompt was cancelled or the session
    /// was already running.
    pub async fn start_prompted(&self) -> Option<String> {
        let id = self
            .ctx
            .prompter
            .ask_text("Please specify an app name")
            .await?;
        self.start(&id).then_some(id)
    }

    /// Ids whose stream is still running, sorted.
    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .lock()
            .iter()
            .filter(|(_, session)| session.execution.is_active())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Offers the active ids as a pick-list and stops the selected one.
    ///
    /// # Returns
    ///
    /// The stopped id, or `None` if nothing was running or nothing was picked.
    pub async fn stop(&self) -> Option<String> {
        let ids = self.active_ids();
        if ids.is_empty() {
            self.ctx
                .prompter
                .notify(Level::Info, "There are no active log sessions.");
            return None;
        }
        let id = self
            .ctx
            .prompter
            .ask_choice("Select the log session to stop", &ids)
            .await?;
        self.stop_id(&id).await.then_some(id)
    }

    /// Kills the stream of `id` and forgets it.
    ///
    /// # Returns
    ///
    /// `false` if `id` had no session.
    pub async fn stop_id(&self, id: &str) -> bool {
        let removed = self.sessions.lock().remove(id);
        let Some(mut session) = removed else {
            debug!("No log session '{}' to stop", id);
            return false;
        };

        let killed = session.execution.kill().await;
        debug!("Stopping log session '{}' killed {} process(es)", id, killed);
        match tokio::time::timeout(STOP_GRACE, &mut session.task).await {
            Ok(Ok(result)) => log_outcome(id, result),
            Ok(Err(e)) => warn!("Log session '{}' task failed: {}", id, e),
            Err(_) => {
                warn!("Log session '{}' did not stop within {:?}", id, STOP_GRACE);
                session.task.abort();
            }
        }
        info!("Stopped log session '{}'", id);
        true
    }

    /// Stops every session; used on shutdown.
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.sessions.lock().keys().cloned().collect();
        for id in ids {
            self.stop_id(&id).await;
        }
    }
}

fn log_outcome(id: &str, result: Result<i32>) {
    match result {
        Ok(code) => debug!("Log session '{}' exited with {}", id, code),
        Err(e) => match e.downcast_ref::<CliError>() {
            Some(CliError::Terminated { signal, .. }) => {
                debug!("Log session '{}' terminated by signal {}", id, signal)
            }
            Some(CliError::Cancelled { .. }) => {
                debug!("Log session '{}' was stopped before its stream started", id)
            }
            _ => warn!("Log session '{}' failed: {:#}", id, e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::process::classify::PLUGIN_NOT_FOUND_MARKER;
    use crate::common::process::spawn::{ExitInfo, ProcessEvent};
    use crate::common::testing::{Script, TestHost};

    async fn wait_inactive(sessions: &LogSessions, id: &str) {
        for _ in 0..500 {
            if !sessions.active_ids().iter().any(|active| active == id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("session '{}' is still active", id);
    }

    #[tokio::test]
    async fn test_start_runs_logs_command_for_app() {
        let host = TestHost::new();
        host.spawner.push(Script::hang(11));
        let sessions = LogSessions::new(host.context());

        assert!(sessions.start("app1"));
        host.spawner.wait_for_spawns(1).await;

        let request = &host.spawner.requests()[0];
        assert_eq!(request.program, "ibmcloud");
        assert_eq!(request.args, vec!["cf", "logs", "app1"]);
        assert_eq!(sessions.active_ids(), vec!["app1"]);

        sessions.stop_all().await;
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let host = TestHost::new();
        host.spawner.push(Script::hang(11));
        host.spawner.push(Script::hang(22));
        let sessions = LogSessions::new(host.context());

        sessions.start("app1");
        host.spawner.wait_for_spawns(1).await;
        sessions.start("app2");
        host.spawner.wait_for_spawns(2).await;

        assert!(host
            .spawner
            .emit(22, ProcessEvent::Stdout(b"app2 line\n".to_vec())));
        assert_eq!(sessions.active_ids(), vec!["app1", "app2"]);

        assert!(sessions.stop_id("app1").await);

        assert_eq!(host.tree.killed(), vec![11]);
        assert_eq!(sessions.active_ids(), vec!["app2"]);
        assert!(host.spawner.is_hanging(22));
        assert!(sessions.channel("app1").contents().contains("killing 11"));
        let app2 = sessions.channel("app2").contents();
        assert!(!app2.contains("killing"));

        sessions.stop_all().await;
        assert!(sessions.active_ids().is_empty());
    }

    #[tokio::test]
    async fn test_start_while_active_does_not_duplicate() {
        let host = TestHost::new();
        host.spawner.push(Script::hang(11));
        let sessions = LogSessions::new(host.context());

        assert!(sessions.start("app1"));
        assert!(!sessions.start("app1"));
        host.spawner.wait_for_spawns(1).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(host.spawner.requests().len(), 1);
        sessions.stop_all().await;
    }

    #[tokio::test]
    async fn test_restart_reuses_channel_history() {
        let host = TestHost::new();
        host.spawner.push(Script::hang(11));
        host.spawner.push(Script::output("second run\n", "", 0));
        let sessions = LogSessions::new(host.context());

        sessions.start("app1");
        host.spawner.wait_for_spawns(1).await;
        assert!(host
            .spawner
            .emit(11, ProcessEvent::Stdout(b"first run\n".to_vec())));
        assert!(host.spawner.finish(11, ExitInfo::code(0)));
        wait_inactive(&sessions, "app1").await;

        assert!(sessions.start("app1"));
        host.spawner.wait_for_spawns(2).await;
        wait_inactive(&sessions, "app1").await;

        let history = sessions.channel("app1").contents();
        let first = history.find("first run").unwrap();
        let second = history.find("second run").unwrap();
        assert!(first < second);
    }

    #[tokio::test]
    async fn test_missing_plugin_is_not_recovered_without_auto_confirm() {
        let host = TestHost::new();
        let missing = format!("'cf' is {}.\n", PLUGIN_NOT_FOUND_MARKER);
        host.spawner.push(Script::exit_with(missing.as_bytes(), 1));
        let sessions = LogSessions::new(host.context());

        sessions.start("app1");
        host.spawner.wait_for_spawns(1).await;
        wait_inactive(&sessions, "app1").await;

        assert!(host.prompter.confirmations().is_empty());
        assert_eq!(host.spawner.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_during_recovery_kills_helper_promptly() {
        let host = TestHost::new();
        host.prompter.set_auto_confirm(true);
        let missing = format!("'cf' is {}.\n", PLUGIN_NOT_FOUND_MARKER);
        host.spawner.push(Script::exit_with(missing.as_bytes(), 1));
        host.spawner.push(Script::hang(50));
        let sessions = LogSessions::new(host.context());

        sessions.start("app1");
        host.spawner.wait_for_spawns(2).await;
        assert_eq!(
            host.spawner.requests()[1].args,
            vec!["plugin", "repo-plugins", "--output", "json"]
        );

        let started = tokio::time::Instant::now();
        assert!(sessions.stop_id("app1").await);

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(host.tree.killed(), vec![50]);
        assert!(!host.spawner.is_hanging(50));
        assert_eq!(host.spawner.requests().len(), 2);
        assert!(sessions.active_ids().is_empty());
    }

    #[tokio::test]
    async fn test_stream_does_not_retain_output() {
        let host = TestHost::new();
        host.spawner.push(Script::hang(11));
        let sessions = LogSessions::new(host.context());

        sessions.start("app1");
        host.spawner.wait_for_spawns(1).await;
        let session_options = sessions.sessions.lock()["app1"].execution.options().clone();

        assert!(!session_options.retain_output);
        sessions.stop_all().await;
    }

    #[tokio::test]
    async fn test_stop_offers_active_ids() {
        let host = TestHost::new();
        host.spawner.push(Script::hang(11));
        host.spawner.push(Script::hang(22));
        host.prompter.push_answer(Some("app2"));
        let sessions = LogSessions::new(host.context());
        sessions.start("app1");
        host.spawner.wait_for_spawns(1).await;
        sessions.start("app2");
        host.spawner.wait_for_spawns(2).await;

        let stopped = sessions.stop().await;

        assert_eq!(stopped.as_deref(), Some("app2"));
        let asked = host.prompter.asked();
        assert_eq!(
            asked[0].1,
            Some(vec!["app1".to_string(), "app2".to_string()])
        );
        assert_eq!(sessions.active_ids(), vec!["app1"]);
        sessions.stop_all().await;
    }

    #[tokio::test]
    async fn test_stop_without_sessions_notifies() {
        let host = TestHost::new();
        let sessions = LogSessions::new(host.context());

        assert_eq!(sessions.stop().await, None);
        assert!(!sessions.stop_id("ghost").await);

        let notifications = host.prompter.notifications();
        assert_eq!(notifications[0].0, Level::Info);
        assert!(host.prompter.asked().is_empty());
    }

    #[tokio::test]
    async fn test_start_prompted_uses_answer() {
        let host = TestHost::new();
        host.spawner.push(Script::hang(11));
        host.prompter.push_answer(Some("web"));
        host.prompter.push_answer(None);
        let sessions = LogSessions::new(host.context());

        assert_eq!(sessions.start_prompted().await.as_deref(), Some("web"));
        assert_eq!(sessions.start_prompted().await, None);

        host.spawner.wait_for_spawns(1).await;
        assert_eq!(host.spawner.requests().len(), 1);
        sessions.stop_all().await;
    }
}

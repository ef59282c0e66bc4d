//! In-memory fakes for the external collaborators, used by unit tests.
//!
//! `TestHost` bundles one of each and builds an `AppContext` around them with
//! a configuration that never touches the filesystem or the real CLI.
//!
use crate::common::process::spawn::{ExitInfo, ProcessEvent, SpawnRequest, SpawnedProcess, Spawner};
use crate::common::process::tree::ProcessTree;
use crate::common::ui::prompt::{Level, Prompter};
use crate::common::ui::sink::ChannelSink;
use crate::common::ui::terminal::{Terminal, TerminalFactory};
use crate::core::config::Config;
use crate::core::context::{AppContext, Collaborators};
use crate::core::error::Result;
use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// What the next call to `FakeSpawner::spawn` does.
pub enum Script {
    /// Emits the events, then ends the stream.
    Events { pid: u32, events: Vec<ProcessEvent> },
    /// Keeps the stream open until `FakeSpawner::finish` is called for `pid`.
    Hang { pid: u32 },
    /// Fails to launch.
    Fail(io::Error),
}

impl Script {
    pub fn events(events: Vec<ProcessEvent>) -> Self {
        Script::Events { pid: 1000, events }
    }

    /// Writes `stdout` and exits with `code`.
    pub fn exit_with(stdout: &[u8], code: i32) -> Self {
        let mut events = Vec::new();
        if !stdout.is_empty() {
            events.push(ProcessEvent::Stdout(stdout.to_vec()));
        }
        events.push(ProcessEvent::Closed(ExitInfo::code(code)));
        Self::events(events)
    }

    /// Writes `stdout` and `stderr`, then exits with `code`.
    pub fn output(stdout: &str, stderr: &str, code: i32) -> Self {
        let mut events = Vec::new();
        if !stdout.is_empty() {
            events.push(ProcessEvent::Stdout(stdout.as_bytes().to_vec()));
        }
        if !stderr.is_empty() {
            events.push(ProcessEvent::Stderr(stderr.as_bytes().to_vec()));
        }
        events.push(ProcessEvent::Closed(ExitInfo::code(code)));
        Self::events(events)
    }

    pub fn hang(pid: u32) -> Self {
        Script::Hang { pid }
    }

    pub fn fail(error: io::Error) -> Self {
        Script::Fail(error)
    }
}

/// Spawner that replays scripts in order and records every request.
/// With no script queued a spawn exits 0 silently.
#[derive(Default)]
pub struct FakeSpawner {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<SpawnRequest>>,
    hanging: Mutex<HashMap<u32, mpsc::Sender<ProcessEvent>>>,
}

impl FakeSpawner {
    pub fn push(&self, script: Script) {
        self.scripts.lock().push_back(script);
    }

    pub fn requests(&self) -> Vec<SpawnRequest> {
        self.requests.lock().clone()
    }

    /// Closes a hanging process with `exit`. Returns false if `pid` is not hanging.
    pub fn finish(&self, pid: u32, exit: ExitInfo) -> bool {
        match self.hanging.lock().remove(&pid) {
            Some(tx) => tx.try_send(ProcessEvent::Closed(exit)).is_ok(),
            None => false,
        }
    }

    /// Emits a chunk on a hanging process.
    pub fn emit(&self, pid: u32, event: ProcessEvent) -> bool {
        match self.hanging.lock().get(&pid) {
            Some(tx) => tx.try_send(event).is_ok(),
            None => false,
        }
    }

    pub fn is_hanging(&self, pid: u32) -> bool {
        self.hanging.lock().contains_key(&pid)
    }

    /// Waits until at least `count` spawns were requested.
    pub async fn wait_for_spawns(&self, count: usize) {
        for _ in 0..500 {
            if self.requests.lock().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("expected {} spawn(s), saw {}", count, self.requests.lock().len());
    }
}

#[async_trait]
impl Spawner for FakeSpawner {
    async fn spawn(&self, request: &SpawnRequest) -> io::Result<SpawnedProcess> {
        self.requests.lock().push(request.clone());
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| Script::exit_with(b"", 0));
        match script {
            Script::Events { pid, events } => {
                let (tx, rx) = mpsc::channel(events.len().max(1));
                for event in events {
                    let _ = tx.try_send(event);
                }
                Ok(SpawnedProcess {
                    pid: Some(pid),
                    events: rx,
                })
            }
            Script::Hang { pid } => {
                let (tx, rx) = mpsc::channel(64);
                self.hanging.lock().insert(pid, tx);
                Ok(SpawnedProcess {
                    pid: Some(pid),
                    events: rx,
                })
            }
            Script::Fail(error) => Err(error),
        }
    }
}

/// Process tree with a fixed descendant table. Killing a pid the spawner keeps
/// hanging closes it with `SIGKILL`.
pub struct FakeProcessTree {
    spawner: Arc<FakeSpawner>,
    descendants: Mutex<HashMap<u32, Vec<u32>>>,
    failing: Mutex<HashSet<u32>>,
    killed: Mutex<Vec<u32>>,
}

impl FakeProcessTree {
    pub fn new(spawner: Arc<FakeSpawner>) -> Self {
        Self {
            spawner,
            descendants: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            killed: Mutex::new(Vec::new()),
        }
    }

    pub fn set_descendants(&self, root: u32, pids: Vec<u32>) {
        self.descendants.lock().insert(root, pids);
    }

    pub fn fail_kill(&self, pid: u32) {
        self.failing.lock().insert(pid);
    }

    /// Every pid a kill was attempted on, in order.
    pub fn killed(&self) -> Vec<u32> {
        self.killed.lock().clone()
    }
}

#[async_trait]
impl ProcessTree for FakeProcessTree {
    async fn descendants(&self, root: u32) -> Result<Vec<u32>> {
        Ok(self.descendants.lock().get(&root).cloned().unwrap_or_default())
    }

    async fn kill(&self, pid: u32) -> Result<()> {
        self.killed.lock().push(pid);
        if self.failing.lock().contains(&pid) {
            return Err(anyhow!("operation not permitted"));
        }
        self.spawner.finish(pid, ExitInfo::signal(9));
        Ok(())
    }
}

/// Prompter answering from queues. An empty queue means the user cancelled
/// (text, choice) or declined (confirm), unless auto-confirm is on.
#[derive(Default)]
pub struct ScriptedPrompter {
    auto_confirm: AtomicBool,
    answers: Mutex<VecDeque<Option<String>>>,
    confirms: Mutex<VecDeque<bool>>,
    asked: Mutex<Vec<(String, Option<Vec<String>>)>>,
    confirmations: Mutex<Vec<String>>,
    notifications: Mutex<Vec<(Level, String)>>,
}

impl ScriptedPrompter {
    pub fn push_answer(&self, answer: Option<&str>) {
        self.answers.lock().push_back(answer.map(str::to_string));
    }

    /// Behaves like `--yes`: every confirmation is answered yes.
    pub fn set_auto_confirm(&self, yes: bool) {
        self.auto_confirm.store(yes, Ordering::SeqCst);
    }

    pub fn push_confirm(&self, yes: bool) {
        self.confirms.lock().push_back(yes);
    }

    /// Every text or choice prompt shown, with its options for choices.
    pub fn asked(&self) -> Vec<(String, Option<Vec<String>>)> {
        self.asked.lock().clone()
    }

    pub fn confirmations(&self) -> Vec<String> {
        self.confirmations.lock().clone()
    }

    pub fn notifications(&self) -> Vec<(Level, String)> {
        self.notifications.lock().clone()
    }

    fn next_answer(&self) -> Option<String> {
        self.answers.lock().pop_front().flatten()
    }
}

#[async_trait]
impl Prompter for ScriptedPrompter {
    async fn ask_text(&self, prompt: &str) -> Option<String> {
        self.asked.lock().push((prompt.to_string(), None));
        self.next_answer()
    }

    async fn ask_choice(&self, prompt: &str, options: &[String]) -> Option<String> {
        self.asked
            .lock()
            .push((prompt.to_string(), Some(options.to_vec())));
        self.next_answer()
    }

    async fn confirm(&self, question: &str) -> bool {
        self.confirmations.lock().push(question.to_string());
        if self.auto_confirms() {
            return true;
        }
        self.confirms.lock().pop_front().unwrap_or(false)
    }

    fn auto_confirms(&self) -> bool {
        self.auto_confirm.load(Ordering::SeqCst)
    }

    fn notify(&self, level: Level, message: &str) {
        self.notifications.lock().push((level, message.to_string()));
    }
}

/// Terminal recording the text typed into it.
pub struct FakeTerminal {
    sent: Mutex<Vec<String>>,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
}

impl Default for FakeTerminal {
    fn default() -> Self {
        let (closed_tx, closed_rx) = watch::channel(false);
        Self {
            sent: Mutex::new(Vec::new()),
            closed_tx,
            closed_rx,
        }
    }
}

impl FakeTerminal {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Simulates the user closing the terminal.
    pub fn close(&self) {
        let _ = self.closed_tx.send(true);
    }
}

#[async_trait]
impl Terminal for FakeTerminal {
    async fn send_text(&self, text: &str) -> Result<()> {
        if *self.closed_rx.borrow() {
            return Err(anyhow!("terminal is closed"));
        }
        self.sent.lock().push(text.to_string());
        Ok(())
    }

    fn show(&self, _preserve_focus: bool) {}

    fn closed(&self) -> watch::Receiver<bool> {
        self.closed_rx.clone()
    }

    async fn wait_idle(&self) {}
}

/// Factory handing out a fresh `FakeTerminal` per open.
#[derive(Default)]
pub struct FakeTerminalFactory {
    opened: Mutex<Vec<Arc<FakeTerminal>>>,
}

impl FakeTerminalFactory {
    pub fn opened(&self) -> usize {
        self.opened.lock().len()
    }

    pub fn terminal(&self, index: usize) -> Arc<FakeTerminal> {
        Arc::clone(&self.opened.lock()[index])
    }
}

impl TerminalFactory for FakeTerminalFactory {
    fn open(&self, _name: &str) -> Result<Arc<dyn Terminal>> {
        let terminal = Arc::new(FakeTerminal::default());
        self.opened.lock().push(Arc::clone(&terminal));
        Ok(terminal)
    }
}

/// One of each fake plus the context built on them.
pub struct TestHost {
    pub spawner: Arc<FakeSpawner>,
    pub tree: Arc<FakeProcessTree>,
    pub prompter: Arc<ScriptedPrompter>,
    pub terminals: Arc<FakeTerminalFactory>,
    pub banner: Arc<ChannelSink>,
    ctx: Arc<AppContext>,
}

impl TestHost {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let spawner = Arc::new(FakeSpawner::default());
        let tree = Arc::new(FakeProcessTree::new(Arc::clone(&spawner)));
        let prompter = Arc::new(ScriptedPrompter::default());
        let terminals = Arc::new(FakeTerminalFactory::default());
        let banner = Arc::new(ChannelSink::new("cloudcmd"));
        let ctx = Arc::new(AppContext::new(
            config,
            Collaborators {
                spawner: spawner.clone(),
                process_tree: tree.clone(),
                prompter: prompter.clone(),
                terminals: terminals.clone(),
                banner: banner.clone(),
            },
        ));
        Self {
            spawner,
            tree,
            prompter,
            terminals,
            banner,
            ctx,
        }
    }

    pub fn context(&self) -> Arc<AppContext> {
        Arc::clone(&self.ctx)
    }
}

/// Built-in tables, no version check, no working-directory requirement.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.cli.check_version = false;
    config.cli.require_working_dir = false;
    config.commands = crate::core::config::default_commands();
    config.plugins = vec![crate::core::config::PluginMapping {
        command: "ks".to_string(),
        name: "container-service".to_string(),
    }];
    config
}

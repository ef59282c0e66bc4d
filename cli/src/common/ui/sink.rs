//! # cloudcmd Output Sinks (`common::ui::sink`)
//!
//! File: cli/src/common/ui/sink.rs
//!
//! ## Overview
//!
//! An output sink is the append-only destination that receives everything a
//! process execution reports: the `> command args` header, the interleaved
//! stdout/stderr chunks, error lines and `killing <pid>` notices.
//!
//! ## Architecture
//!
//! - **`OutputSink`**: the trait every destination implements (`append`, `show`).
//! - **`ChannelSink`**: a named, persistent channel. It keeps the most recent
//!   history in memory (bounded, so a stream that runs for hours does not grow
//!   without limit), optionally mirrors every append into a log file, and echoes to
//!   stdout only once it has been shown (the first `show` replays the history).
//!   A labelled channel prefixes each echoed line with `[name]`, which keeps
//!   several concurrent log streams readable on one console.
//! - **`ConsoleSink`**: the interactive terminal sink; text goes straight to stdout.
//!
//! ## Usage
//!
//! ```rust
//! let channel = Arc::new(ChannelSink::new("cloudcmd"));
//! channel.append("\n> ibmcloud cf apps\n");
//! channel.show(true); // From here on output is echoed to the console.
//! assert!(channel.contents().contains("cf apps"));
//! ```
//!
use crate::core::error::Result;
use anyhow::Context;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use tracing::{debug, warn};

/// Bytes of history a channel keeps in memory. Older text is dropped from the
/// front; the log-file mirror, if any, still has all of it.
pub const HISTORY_LIMIT: usize = 1024 * 1024;

/// An append-only text destination visible to the user.
pub trait OutputSink: Send + Sync {
    /// Appends text verbatim (no newline is added).
    fn append(&self, text: &str);

    /// Reveals the sink to the user. `preserve_focus` keeps input focus where it is.
    fn show(&self, preserve_focus: bool);
}

/// Mutable part of a channel, guarded by one lock so history, mirror and echo
/// stay in the same order.
#[derive(Debug, Default)]
struct ChannelState {
    history: String,
    shown: bool,
    at_line_start: bool,
}

/// A named, persistent output channel.
#[derive(Debug)]
pub struct ChannelSink {
    name: String,
    labelled: bool,
    history_limit: usize,
    state: Mutex<ChannelState>,
    mirror: Option<Mutex<File>>,
}

impl ChannelSink {
    /// Creates an in-memory channel that is hidden until `show` is called.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labelled: false,
            history_limit: HISTORY_LIMIT,
            state: Mutex::new(ChannelState {
                at_line_start: true,
                ..Default::default()
            }),
            mirror: None,
        }
    }

    /// Creates a channel that also appends everything to `<log_dir>/<name>.log`.
    ///
    /// The file is opened in append mode and a session marker with the current
    /// local time is written first, so one file accumulates every session.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file cannot be opened.
    pub fn with_log_dir(name: impl Into<String>, log_dir: &Path) -> Result<Self> {
        let mut sink = Self::new(name);
        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
        let path = log_dir.join(format!("{}.log", file_stem(&sink.name)));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open channel log {}", path.display()))?;
        writeln!(
            file,
            "=== {} session started {} ===",
            sink.name,
            chrono::Local::now().to_rfc3339()
        )
        .with_context(|| format!("Failed to write channel log {}", path.display()))?;
        debug!("Channel '{}' mirrored to {}", sink.name, path.display());
        sink.mirror = Some(Mutex::new(file));
        Ok(sink)
    }

    /// Prefix echoed lines with `[name] `.
    pub fn labelled(mut self) -> Self {
        self.labelled = true;
        self
    }

    /// Keeps at most `limit` bytes of history in memory.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The retained history: everything appended so far, up to the history limit.
    pub fn contents(&self) -> String {
        self.state.lock().history.clone()
    }

    fn echo(&self, state: &mut ChannelState, text: &str) {
        let rendered = if self.labelled {
            label_lines(text, &self.name, &mut state.at_line_start)
        } else {
            text.to_string()
        };
        let mut stdout = io::stdout().lock();
        // Console write failures (closed pipe) are not worth failing a command for.
        let _ = stdout.write_all(rendered.as_bytes());
        let _ = stdout.flush();
    }
}

impl OutputSink for ChannelSink {
    fn append(&self, text: &str) {
        let mut state = self.state.lock();
        state.history.push_str(text);
        keep_tail(&mut state.history, self.history_limit);
        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.lock().write_all(text.as_bytes()) {
                warn!("Failed to mirror channel '{}' to its log file: {}", self.name, e);
            }
        }
        if state.shown {
            self.echo(&mut state, text);
        }
    }

    fn show(&self, preserve_focus: bool) {
        let mut state = self.state.lock();
        if state.shown {
            return;
        }
        debug!(
            "Showing channel '{}' (preserve focus: {})",
            self.name, preserve_focus
        );
        state.shown = true;
        let history = state.history.clone();
        if !history.is_empty() {
            self.echo(&mut state, &history);
        }
    }
}

/// Writes directly to the user's terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn append(&self, text: &str) {
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }

    fn show(&self, _preserve_focus: bool) {}
}

/// Drops text from the front of `text` until at most `limit` bytes remain,
/// cutting on a character boundary.
pub fn keep_tail(text: &mut String, limit: usize) {
    if text.len() <= limit {
        return;
    }
    let mut cut = text.len() - limit;
    while !text.is_char_boundary(cut) {
        cut += 1;
    }
    text.drain(..cut);
}

/// Inserts `[label] ` at the start of every line. `at_line_start` carries the
/// line state across chunks that split a line.
fn label_lines(text: &str, label: &str, at_line_start: &mut bool) -> String {
    let mut out = String::with_capacity(text.len() + label.len() + 3);
    for piece in text.split_inclusive('\n') {
        if *at_line_start {
            out.push('[');
            out.push_str(label);
            out.push_str("] ");
        }
        out.push_str(piece);
        *at_line_start = piece.ends_with('\n');
    }
    out
}

/// Keeps channel names usable as file names.
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

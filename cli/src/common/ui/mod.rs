//! # cloudcmd UI Collaborators (`common::ui`)
//!
//! File: cli/src/common/ui/mod.rs
//!
//! ## Overview
//!
//! The narrow user-facing interfaces the execution engine talks to, each a
//! trait with a console implementation:
//!
//! - **`sink`**: `OutputSink`, where command output goes (`ChannelSink`,
//!   `ConsoleSink`).
//! - **`prompt`**: `Prompter`, free text, pick-lists, confirmations and
//!   notifications (`ConsolePrompter`).
//! - **`terminal`**: `Terminal` and the self-healing `TerminalManager` that
//!   keeps one interactive shell alive for terminal-mode commands.
//!
pub mod prompt;
pub mod sink;
pub mod terminal;

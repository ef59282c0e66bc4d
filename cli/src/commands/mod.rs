//! # cloudcmd Command Modules
//!
//! File: cli/src/commands/mod.rs
//!
//! ## Overview
//!
//! Aggregates the top-level commands of the `cloudcmd` CLI. Each module
//! defines its clap arguments struct and an async `handle_*` function taking
//! the shared `Arc<AppContext>`.
//!
//! ## Command Groups
//!
//! - `run`: one raw invocation of the wrapped CLI
//! - `exec`: registered commands (`exec`, `list`), including prompting ones
//! - `logs`: concurrent application log streams
//!

/// Registered commands from the configuration table.
pub mod exec;
/// Multi-app log streaming with a small console.
pub mod logs;
/// Raw invocations of the wrapped CLI.
pub mod run;

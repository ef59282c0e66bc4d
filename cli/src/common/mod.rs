//! # cloudcmd Common Utilities (`common`)
//!
//! File: cli/src/common/mod.rs
//!
//! ## Overview
//!
//! Shared building blocks used by the command handlers in `commands::`. They
//! know how to run and supervise the wrapped CLI and how to talk to the user,
//! but nothing about individual commands.
//!
//! ## Architecture
//!
//! - **`process`**: spawning, output capture, failure classification, plugin
//!   recovery, process-tree termination, prompted executions.
//! - **`cloud`**: queries against the wrapped CLI (plugins, service ids,
//!   version) and the plugin installer.
//! - **`ui`**: output sinks, prompts and the shared interactive terminal.
//!
//! ## Usage
//!
//! ```rust
//! use crate::common::process::execution::{CommandDescriptor, ProcessExecution};
//! use crate::common::cloud::plugin::PluginInstaller;
//!
//! let execution = ProcessExecution::new(ctx.clone(), descriptor, ctx.banner.clone())
//!     .with_recovery(Arc::new(PluginInstaller::new(ctx.clone())));
//! let code = execution.execute().await?;
//! ```
//!

/// Queries and recovery against the wrapped cloud CLI.
pub mod cloud;
/// Running and supervising external processes.
pub mod process;
/// Output sinks, prompts and the interactive terminal.
pub mod ui;

/// Fakes for the external collaborators.
#[cfg(test)]
pub mod testing;

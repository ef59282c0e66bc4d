//! # cloudcmd Process Execution (`common::process`)
//!
//! File: cli/src/common/process/mod.rs
//!
//! ## Overview
//!
//! Everything involved in running the wrapped cloud CLI as a child process:
//! launching it, streaming its output to a sink, classifying failures,
//! recovering from a missing plugin, stopping a whole process tree, and
//! collecting arguments interactively beforehand.
//!
//! ## Architecture
//!
//! - **`spawn`**: the `Spawner` trait and its `tokio::process` implementation.
//! - **`tree`**: the `ProcessTree` trait (descendant enumeration, forceful kill).
//! - **`classify`**: maps an exit code plus output to a `FailureKind`.
//! - **`sanitize`**: collapses backspace-driven spinner output.
//! - **`execution`**: `ProcessExecution`, the state machine tying the above together.
//! - **`prompted`**: `PromptedExecution`, prompts first and then a `ProcessExecution`.
//!
//! ## Usage
//!
//! ```rust
//! let execution = ProcessExecution::new(ctx.clone(), CommandDescriptor::new("ibmcloud", ["cf", "apps"]), sink)
//!     .with_recovery(Arc::new(PluginInstaller::new(ctx.clone())));
//! let code = execution.execute().await?;
//! ```
//!
pub mod classify;
pub mod execution;
pub mod prompted;
pub mod sanitize;
pub mod spawn;
pub mod tree;

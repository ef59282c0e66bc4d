//! # cloudcmd Prompted Execution (`common::process::prompted`)
//!
//! File: cli/src/common/process/prompted.rs
//!
//! ## Overview
//!
//! A `PromptedExecution` collects arguments from the user before running a
//! `ProcessExecution`. Each `PromptSpec` yields one answer, optionally preceded
//! by a flag token (`--name my-cluster`). Prompts with options are shown as a
//! pick-list, the rest as free text. The final argument list is
//!
//! ```text
//! base args ++ [prefix?, answer] for each prompt ++ additional args
//! ```
//!
//! An optional prepare step runs first and may rewrite the prompts (usually to
//! fill a pick-list from a CLI query) or abort with a message. If any prompt is
//! cancelled nothing is spawned.
//!
use crate::common::process::execution::{command_line, Completion, ProcessExecution};
use crate::common::ui::prompt::Level;
use crate::core::error::Result;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One question asked before running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSpec {
    pub prompt: String,
    pub prefix: Option<String>,
    pub options: Option<Vec<String>>,
}

impl PromptSpec {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            prefix: None,
            options: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = Some(options);
        self
    }
}

/// Outcome of the prepare step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prepared {
    /// Ask these prompts.
    Ready(Vec<PromptSpec>),
    /// Do not run; show the message instead.
    Abort(String),
}

/// Rewrites the prompts right before they are asked.
pub type PrepareFn = Arc<dyn Fn(Vec<PromptSpec>) -> BoxFuture<'static, Result<Prepared>> + Send + Sync>;

/// A `ProcessExecution` whose arguments are collected interactively.
pub struct PromptedExecution {
    execution: ProcessExecution,
    prompts: Vec<PromptSpec>,
    additional_args: Vec<String>,
    prepare: Option<PrepareFn>,
}

impl PromptedExecution {
    pub fn new(execution: ProcessExecution, prompts: Vec<PromptSpec>, additional_args: Vec<String>) -> Self {
        Self {
            execution,
            prompts,
            additional_args,
            prepare: None,
        }
    }

    pub fn with_prepare(mut self, prepare: PrepareFn) -> Self {
        self.prepare = Some(prepare);
        self
    }

    pub fn execution(&self) -> &ProcessExecution {
        &self.execution
    }

    /// Prompts, then runs.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when the user cancelled a prompt or the prepare step aborted;
    /// otherwise the exit code of the underlying execution.
    ///
    /// # Errors
    ///
    /// Whatever the underlying `ProcessExecution::run` fails with.
    pub async fn execute(&self) -> Result<Option<i32>> {
        Ok(self.run().await?.map(|completion| completion.code))
    }

    /// Like `execute`, but returns the full completion.
    pub async fn run(&self) -> Result<Option<Completion>> {
        let prompts = match self.prepared_prompts().await {
            Some(prompts) => prompts,
            None => return Ok(None),
        };

        let Some(args) = self.collect_args(&prompts).await else {
            let descriptor = self.execution.descriptor();
            info!("Prompt cancelled, not running '{}'", descriptor.command);
            self.execution.sink().append(&format!(
                "\nCancelled '{}': no input given.\n",
                command_line(&descriptor.command, &descriptor.args)
            ));
            return Ok(None);
        };

        self.execution.run_with_args(args).await.map(Some)
    }

    /// Applies the prepare step. `None` means it aborted.
    async fn prepared_prompts(&self) -> Option<Vec<PromptSpec>> {
        let Some(prepare) = &self.prepare else {
            return Some(self.prompts.clone());
        };
        match prepare(self.prompts.clone()).await {
            Ok(Prepared::Ready(prompts)) => Some(prompts),
            Ok(Prepared::Abort(message)) => {
                debug!("Prepare step aborted: {}", message);
                self.execution.sink().append(&format!("\n{}\n", message));
                self.execution.context().prompter.notify(Level::Warning, &message);
                None
            }
            Err(e) => {
                warn!("Could not prepare prompt options, using defaults: {:#}", e);
                Some(self.prompts.clone())
            }
        }
    }

    /// Asks every prompt in order. `None` as soon as one is cancelled.
    async fn collect_args(&self, prompts: &[PromptSpec]) -> Option<Vec<String>> {
        let prompter = &self.execution.context().prompter;
        let mut args = self.execution.descriptor().args.clone();
        for spec in prompts {
            let answer = match spec.options.as_deref() {
                Some(options) if !options.is_empty() => prompter.ask_choice(&spec.prompt, options).await,
                _ => prompter.ask_text(&spec.prompt).await,
            };
            let answer = answer.filter(|a| !a.trim().is_empty())?;
            if let Some(prefix) = &spec.prefix {
                args.push(prefix.clone());
            }
            args.push(answer);
        }
        args.extend(self.additional_args.iter().cloned());
        Some(args)
    }
}

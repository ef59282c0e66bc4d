//! # cloudcmd Plugin Queries and Recovery (`common::cloud::plugin`)
//!
//! File: cli/src/common/cloud/plugin.rs
//!
//! ## Overview
//!
//! Reads plugin and IAM state from the wrapped CLI's JSON output and installs
//! missing plugins. `PluginInstaller` is the `RecoveryPolicy` attached to
//! executions that may hit a "not a registered command" failure.
//!
//! All queries run quietly (their output never reaches a visible channel) and
//! fail when the CLI writes anything to stderr, since it reports most problems
//! there while still exiting 0.
//!
use crate::common::process::execution::{CommandDescriptor, ExecOptions, ProcessExecution, RecoveryPolicy};
use crate::common::ui::sink::{ChannelSink, OutputSink};
use crate::core::context::AppContext;
use crate::core::error::{CliError, Result};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Repository plugins are installed from unless told otherwise.
pub const DEFAULT_REPO: &str = "IBM Cloud";

/// Entry of `plugin repo-plugins --output json`.
#[derive(Deserialize, Debug)]
struct RepoPlugin {
    name: String,
}

/// Entry of `plugin list --output json`.
#[derive(Deserialize, Debug)]
struct InstalledPlugin {
    #[serde(rename = "Name")]
    name: String,
}

/// Entry of `iam service-ids --output json`.
#[derive(Deserialize, Debug)]
struct ServiceId {
    name: String,
}

fn query_sink() -> Arc<dyn OutputSink> {
    Arc::new(ChannelSink::new("query"))
}

/// Runs `<cli> args...` quietly and returns stdout.
async fn query(ctx: &Arc<AppContext>, args: &[&str]) -> Result<String> {
    let descriptor = CommandDescriptor::new(ctx.config.cli.program.as_str(), args.iter().copied());
    run_query(ProcessExecution::new(Arc::clone(ctx), descriptor, query_sink())).await
}

/// Runs a query execution quietly and returns stdout.
///
/// # Errors
///
/// Returns an error if the program cannot be run or writes to stderr.
async fn run_query(execution: ProcessExecution) -> Result<String> {
    let execution = execution.with_options(ExecOptions::quiet());
    let completion = execution.run().await?;
    if !completion.stderr.trim().is_empty() {
        let descriptor = execution.descriptor();
        return Err(anyhow!("{}", completion.stderr.trim())).with_context(|| {
            format!("'{} {}' failed", descriptor.command, descriptor.args.join(" "))
        });
    }
    Ok(completion.stdout)
}

const REPO_PLUGINS_ARGS: [&str; 4] = ["plugin", "repo-plugins", "--output", "json"];

/// Plugin names offered by `repo`.
#[instrument(skip(ctx))]
pub async fn repo_plugins(ctx: &Arc<AppContext>, repo: &str) -> Result<Vec<String>> {
    let stdout = query(ctx, &REPO_PLUGINS_ARGS).await?;
    parse_repo_plugins(&stdout, repo)
}

/// Names of the plugins currently installed.
#[instrument(skip(ctx))]
pub async fn installed_plugins(ctx: &Arc<AppContext>) -> Result<Vec<String>> {
    let stdout = query(ctx, &["plugin", "list", "--output", "json"]).await?;
    let plugins: Vec<InstalledPlugin> = serde_json::from_str(&stdout).map_err(CliError::from)?;
    Ok(plugins.into_iter().map(|p| p.name).collect())
}

/// Repository plugins that are not installed yet.
pub async fn installable_plugins(ctx: &Arc<AppContext>) -> Result<Vec<String>> {
    let installed = installed_plugins(ctx).await?;
    let available = repo_plugins(ctx, DEFAULT_REPO).await?;
    Ok(available
        .into_iter()
        .filter(|name| !installed.contains(name))
        .collect())
}

/// Names of the IAM service ids in the targeted account.
#[instrument(skip(ctx))]
pub async fn service_ids(ctx: &Arc<AppContext>) -> Result<Vec<String>> {
    let stdout = query(ctx, &["iam", "service-ids", "--output", "json"]).await?;
    let ids: Vec<ServiceId> = serde_json::from_str(&stdout).map_err(CliError::from)?;
    Ok(ids.into_iter().map(|id| id.name).collect())
}

fn parse_repo_plugins(json: &str, repo: &str) -> Result<Vec<String>> {
    let mut repos: HashMap<String, Vec<RepoPlugin>> = serde_json::from_str(json).map_err(CliError::from)?;
    let plugins = repos
        .remove(repo)
        .ok_or_else(|| anyhow!("Plugin repository '{}' is not configured", repo))?;
    Ok(plugins.into_iter().map(|p| p.name).collect())
}

/// Installs the plugin a failed command needs.
pub struct PluginInstaller {
    ctx: Arc<AppContext>,
    repo: String,
}

impl PluginInstaller {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            ctx,
            repo: DEFAULT_REPO.to_string(),
        }
    }

    /// Installation names to try for a plugin command: the configured mapping
    /// first, then the command itself.
    fn candidates<'a>(&'a self, plugin_command: &'a str) -> Vec<&'a str> {
        let mut names = Vec::with_capacity(2);
        if let Some(name) = self.ctx.config.plugin_for_command(plugin_command) {
            names.push(name);
        }
        if !names.contains(&plugin_command) {
            names.push(plugin_command);
        }
        names
    }
}

#[async_trait]
impl RecoveryPolicy for PluginInstaller {
    async fn recover(&self, failed: &ProcessExecution, args: &[String]) -> Result<()> {
        let command = failed.descriptor().command.as_str();
        let plugin_command = args.first().ok_or_else(|| {
            CliError::PluginInstall(format!("'{}' was run without a plugin command", command))
        })?;

        let repo_query = failed.helper(CommandDescriptor::new(command, REPO_PLUGINS_ARGS), query_sink());
        let stdout = run_query(repo_query).await?;
        let available = parse_repo_plugins(&stdout, &self.repo)?;
        let candidates = self.candidates(plugin_command);
        debug!("Looking for {:?} in repository '{}'", candidates, self.repo);
        let name = candidates
            .into_iter()
            .find(|candidate| available.iter().any(|name| name == candidate))
            .ok_or_else(|| {
                CliError::PluginInstall(format!(
                    "Could not determine plugin to install from command {}",
                    plugin_command
                ))
            })?;

        info!("Installing plugin '{}' for '{}'", name, plugin_command);
        let install = failed
            .helper(
                CommandDescriptor::new(command, ["plugin", "install", name, "-f"]),
                Arc::clone(failed.sink()),
            )
            .with_options(ExecOptions::default());
        let completion = install.run().await?;
        if completion.code != 0 {
            return Err(CliError::PluginInstall(format!(
                "'plugin install {}' exited with {}",
                name, completion.code
            ))
            .into());
        }
        if !completion.stderr.trim().is_empty() {
            return Err(CliError::PluginInstall(completion.stderr.trim().to_string()).into());
        }
        Ok(())
    }
}

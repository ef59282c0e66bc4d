//! # cloudcmd CLI Version Check (`common::cloud::version`)
//!
//! File: cli/src/common/cloud/version.rs
//!
//! Runs `<cli> version` once per session and warns on the shared banner when
//! the installed CLI is older than `cli.min_version` or its version cannot be
//! read.
//!
use crate::common::process::execution::{CommandDescriptor, ExecOptions, ProcessExecution};
use crate::common::ui::prompt::Level;
use crate::common::ui::sink::{ChannelSink, OutputSink};
use crate::core::context::AppContext;
use crate::core::error::{CliError, Result};
use regex::Regex;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// A `MAJOR.MINOR.PATCH` version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CliVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl fmt::Display for CliVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Outcome of `check_cli_version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionStatus {
    /// The check already ran this session.
    Skipped,
    Current(CliVersion),
    Outdated { found: CliVersion, required: CliVersion },
    /// The output did not contain a version.
    Unknown,
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d+)\.(\d+)\.(\d+)").expect("version pattern is valid"))
}

/// Extracts the first `MAJOR.MINOR.PATCH` found in `text`.
///
/// Works on both a bare version (`1.2.3`) and the CLI's banner
/// (`ibmcloud version 2.20.0+f1b8e8b-2023-09-28T09:55:34+00:00`).
pub fn parse_version(text: &str) -> Option<CliVersion> {
    let captures = version_pattern().captures(text)?;
    let part = |i: usize| captures.get(i)?.as_str().parse::<u64>().ok();
    Some(CliVersion {
        major: part(1)?,
        minor: part(2)?,
        patch: part(3)?,
    })
}

/// Checks the installed CLI version once per context.
///
/// # Returns
///
/// `VersionStatus::Skipped` on every call after the first.
///
/// # Errors
///
/// Returns an error if `cli.min_version` is invalid or the CLI could not be
/// run (the execution has already reported that on its sink).
pub async fn check_cli_version(ctx: &Arc<AppContext>) -> Result<VersionStatus> {
    if !ctx.begin_version_check() {
        debug!("CLI version already checked");
        return Ok(VersionStatus::Skipped);
    }

    let required = parse_version(&ctx.config.cli.min_version).ok_or_else(|| {
        CliError::Config(format!(
            "Invalid 'cli.min_version' value: '{}'",
            ctx.config.cli.min_version
        ))
    })?;

    let program = &ctx.config.cli.program;
    let sink: Arc<dyn OutputSink> = Arc::new(ChannelSink::new("version"));
    let completion = ProcessExecution::new(Arc::clone(ctx), CommandDescriptor::new(program.as_str(), ["version"]), sink)
        .with_options(ExecOptions::quiet())
        .run()
        .await?;

    let status = match parse_version(&completion.stdout) {
        Some(found) if found < required => {
            warn_banner(
                ctx,
                &format!(
                    "Your {} version {} is older than the minimum supported version {}. Please update the CLI.",
                    program, found, required
                ),
            );
            VersionStatus::Outdated { found, required }
        }
        Some(found) => {
            info!("{} version {} satisfies minimum {}", program, found, required);
            VersionStatus::Current(found)
        }
        None => {
            warn_banner(
                ctx,
                &format!("Unable to determine the installed {} version.", program),
            );
            VersionStatus::Unknown
        }
    };
    Ok(status)
}

fn warn_banner(ctx: &AppContext, message: &str) {
    warn!("{}", message);
    ctx.banner.append(&format!("\n WARNING: {}\n", message));
    ctx.prompter.notify(Level::Warning, message);
}

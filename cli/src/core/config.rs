//! # cloudcmd Configuration System
//!
//! File: cli/src/core/config.rs
//!
//! ## Overview
//!
//! This module loads, merges and validates the cloudcmd configuration. The
//! configuration names the wrapped program, the execution policy (working
//! directory, terminal hand-off, output sanitizing), the plugin table used by
//! the missing-plugin recovery, and the registration table of commands that
//! `cloudcmd exec` can run.
//!
//! ## Architecture
//!
//! Configuration sources (in order of precedence):
//! 1. An explicit file passed with `--config`
//! 2. Project-specific `.cloudcmd.toml` in the current directory or ancestors
//! 3. User-specific `<config dir>/cloudcmd/config.toml`
//! 4. Default values defined in the code
//!
//! Paths are expanded (`~`), and the merged result is validated before use.
//! When no `[[commands]]` are configured anywhere, the built-in registration
//! table from `default_commands` is used.
//!
//! ## Examples
//!
//! ```toml
//! [cli]
//! program = "ibmcloud"
//! min_version = "2.0.0"
//! sanitize_output = true
//!
//! [[plugins]]
//! command = "ks"
//! name = "container-service"
//!
//! [[commands]]
//! key = "ks.worker-reboot"
//! args = ["ks", "worker-reboot"]
//! additional_args = ["-f"]
//!
//! [[commands.prompts]]
//! prompt = "Specify a cluster name or id"
//! prefix = "--cluster"
//! ```
//!
use crate::common::cloud::version;
use crate::core::error::{CliError, Result};
use anyhow::{anyhow, Context};
use directories::ProjectDirs;
use serde::Deserialize;
use std::collections::HashSet;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// Represents the main configuration structure, loaded from TOML files.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub cli: CliConfig,
    /// Maps plugin commands (e.g. `ks`) to installable plugin names.
    #[serde(default)]
    pub plugins: Vec<PluginMapping>,
    /// The registration table used by `cloudcmd exec`.
    #[serde(default)]
    pub commands: Vec<CommandEntry>,
    #[serde(default)]
    pub logs: LogsConfig,
}

/// Settings describing the wrapped program and how it is executed.
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct CliConfig {
    /// Name or path of the wrapped cloud CLI.
    #[serde(default = "default_program")]
    pub program: String,
    /// Oldest CLI version that does not trigger the banner warning.
    #[serde(default = "default_min_version")]
    pub min_version: String,
    /// Run the version check before the first command of a session.
    #[serde(default = "default_true")]
    pub check_version: bool,
    /// Working directory for spawned commands (can use ~). Defaults to the
    /// current directory.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Refuse to spawn when no usable working directory exists.
    #[serde(default = "default_true")]
    pub require_working_dir: bool,
    /// Send commands to the shared interactive terminal instead of capturing them.
    #[serde(default)]
    pub use_terminal: bool,
    /// Buffer and clean stdout of every captured command.
    #[serde(default)]
    pub sanitize_output: bool,
    /// Directory receiving one log file per output channel (can use ~).
    #[serde(default)]
    pub log_dir: Option<String>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            min_version: default_min_version(),
            check_version: true,
            working_dir: None,
            require_working_dir: true,
            use_terminal: false,
            sanitize_output: false,
            log_dir: None,
        }
    }
}

/// Associates a plugin command or alias with the name it is installed under.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PluginMapping {
    pub command: String,
    pub name: String,
}

/// One entry of the command registration table.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CommandEntry {
    /// Identifier passed to `cloudcmd exec`.
    pub key: String,
    /// Base arguments given to the wrapped program.
    #[serde(default)]
    pub args: Vec<String>,
    /// Arguments appended after all prompt answers (e.g. `-f`).
    #[serde(default)]
    pub additional_args: Vec<String>,
    /// Per-command override of `cli.sanitize_output`.
    #[serde(default)]
    pub sanitize: Option<bool>,
    /// Always hand this command to the interactive terminal.
    #[serde(default)]
    pub terminal: bool,
    #[serde(default)]
    pub prompts: Vec<PromptEntry>,
}

/// A prompt shown before a registered command runs.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PromptEntry {
    pub prompt: String,
    /// Flag token inserted before the answer (e.g. `--name`).
    #[serde(default)]
    pub prefix: Option<String>,
    /// Fixed pick-list options.
    #[serde(default)]
    pub options: Vec<String>,
    /// Pick-list options fetched from the CLI right before prompting.
    #[serde(default)]
    pub options_from: Option<OptionSource>,
}

/// Live sources for pick-list options.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OptionSource {
    InstalledPlugins,
    InstallablePlugins,
    ServiceIds,
}

/// Settings for `cloudcmd logs`.
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct LogsConfig {
    /// Arguments of the streaming command; the app name is appended.
    #[serde(default = "default_logs_args")]
    pub args: Vec<String>,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            args: default_logs_args(),
        }
    }
}

fn default_program() -> String {
    "ibmcloud".to_string()
}
fn default_min_version() -> String {
    "1.0.0".to_string()
}
fn default_true() -> bool {
    true
}
fn default_logs_args() -> Vec<String> {
    vec!["cf".to_string(), "logs".to_string()]
}

impl Config {
    /// Looks up a registered command by key.
    pub fn command(&self, key: &str) -> Option<&CommandEntry> {
        self.commands.iter().find(|entry| entry.key == key)
    }

    /// Returns the plugin name registered for a plugin command, if any.
    pub fn plugin_for_command(&self, command: &str) -> Option<&str> {
        self.plugins
            .iter()
            .find(|mapping| mapping.command == command)
            .map(|mapping| mapping.name.as_str())
    }

    /// Resolves the working directory for spawned commands.
    ///
    /// The configured `cli.working_dir` wins; otherwise the process's current
    /// directory is used. `None` means no directory could be determined at all.
    pub fn working_dir(&self) -> Option<PathBuf> {
        match &self.cli.working_dir {
            Some(dir) => Some(PathBuf::from(dir)),
            None => std::env::current_dir().ok(),
        }
    }
}

/// Built-in registration table used when no commands are configured.
pub fn default_commands() -> Vec<CommandEntry> {
    fn plain(key: &str, args: &[&str]) -> CommandEntry {
        CommandEntry {
            key: key.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            additional_args: Vec::new(),
            sanitize: None,
            terminal: false,
            prompts: Vec::new(),
        }
    }
    fn prompt(text: &str, prefix: Option<&str>, from: Option<OptionSource>) -> PromptEntry {
        PromptEntry {
            prompt: text.to_string(),
            prefix: prefix.map(str::to_string),
            options: Vec::new(),
            options_from: from,
        }
    }

    let app_prompt = || prompt("Specify an app name", None, None);

    vec![
        CommandEntry {
            terminal: true,
            ..plain("login", &["login"])
        },
        CommandEntry {
            terminal: true,
            ..plain("login.sso", &["login", "--sso"])
        },
        plain("logout", &["logout"]),
        plain("cf.apps", &["cf", "apps"]),
        CommandEntry {
            prompts: vec![app_prompt()],
            ..plain("cf.app", &["cf", "app"])
        },
        CommandEntry {
            prompts: vec![app_prompt()],
            ..plain("cf.push-appname", &["cf", "push"])
        },
        CommandEntry {
            prompts: vec![app_prompt()],
            ..plain("cf.restart", &["cf", "restart"])
        },
        plain("ks.clusters", &["ks", "clusters"]),
        CommandEntry {
            prompts: vec![prompt("Specify a cluster name", Some("--name"), None)],
            ..plain("ks.cluster-create", &["ks", "cluster-create"])
        },
        CommandEntry {
            prompts: vec![
                prompt("Specify a cluster name or id", Some("--cluster"), None),
                prompt("Specify a worker id", Some("--worker"), None),
            ],
            additional_args: vec!["-f".to_string()],
            ..plain("ks.worker-reboot", &["ks", "worker-reboot"])
        },
        CommandEntry {
            sanitize: Some(true),
            ..plain("dev.build", &["dev", "build"])
        },
        CommandEntry {
            prompts: vec![prompt(
                "Specify a plugin to install",
                None,
                Some(OptionSource::InstallablePlugins),
            )],
            ..plain("plugin.install", &["plugin", "install"])
        },
        CommandEntry {
            prompts: vec![prompt(
                "Specify a plugin to update",
                None,
                Some(OptionSource::InstalledPlugins),
            )],
            ..plain("plugin.update", &["plugin", "update"])
        },
        CommandEntry {
            prompts: vec![prompt(
                "Specify a plugin to uninstall",
                None,
                Some(OptionSource::InstalledPlugins),
            )],
            ..plain("plugin.uninstall", &["plugin", "uninstall"])
        },
        CommandEntry {
            prompts: vec![prompt(
                "Specify a service id",
                None,
                Some(OptionSource::ServiceIds),
            )],
            ..plain("iam.service-id", &["iam", "service-id"])
        },
    ]
}

/// Built-in plugin table used when no plugins are configured.
fn default_plugins() -> Vec<PluginMapping> {
    [
        ("ks", "container-service"),
        ("cr", "container-registry"),
        ("dev", "dev"),
        ("fn", "cloud-functions"),
    ]
    .iter()
    .map(|(command, name)| PluginMapping {
        command: command.to_string(),
        name: name.to_string(),
    })
    .collect()
}

const PROJECT_CONFIG_FILENAME: &str = ".cloudcmd.toml";

/// Loads, merges, expands and validates the configuration.
///
/// # Arguments
///
/// * `explicit` - A file given on the command line. When present it replaces
///   the project file in the precedence order.
///
/// # Errors
///
/// Returns an error if a config file cannot be read or parsed, or if the merged
/// configuration fails validation.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let user_config = load_user_config()?;
    let project_config = match explicit {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Some(load_config_from_path(path)?)
        }
        None => load_project_config()?,
    };
    let mut merged_config = merge_configs(user_config.unwrap_or_default(), project_config);
    apply_builtin_tables(&mut merged_config);
    expand_config_paths(&mut merged_config).context("Failed to expand paths in configuration")?;
    validate_config(&merged_config).context("Configuration validation failed")?;
    debug!("Final loaded configuration: {:?}", merged_config);
    Ok(merged_config)
}

fn load_user_config() -> Result<Option<Config>> {
    if let Some(proj_dirs) = ProjectDirs::from("com", "cloudcmd", "cloudcmd") {
        let config_path = proj_dirs.config_dir().join("config.toml");
        if config_path.exists() {
            info!("Loading user configuration from: {}", config_path.display());
            load_config_from_path(&config_path).map(Some)
        } else {
            debug!(
                "User configuration file not found at {}",
                config_path.display()
            );
            Ok(None)
        }
    } else {
        warn!("Could not determine user config directory.");
        Ok(None)
    }
}

fn load_project_config() -> Result<Option<Config>> {
    if let Some(project_config_path) = find_project_config_path()? {
        info!(
            "Loading project configuration from: {}",
            project_config_path.display()
        );
        load_config_from_path(&project_config_path).map(Some)
    } else {
        debug!("No project configuration file (.cloudcmd.toml) found.");
        Ok(None)
    }
}

fn find_project_config_path() -> Result<Option<PathBuf>> {
    let current_dir = std::env::current_dir().context("Failed to get current directory")?;
    let mut path: &Path = &current_dir;
    loop {
        let project_config = path.join(PROJECT_CONFIG_FILENAME);
        if project_config.is_file() {
            return Ok(Some(project_config));
        }
        if path.join(".git").is_dir() {
            debug!(
                "Found .git directory at {}, stopping project config search.",
                path.display()
            );
            return Ok(None);
        }
        match path.parent() {
            Some(parent) => path = parent,
            None => break,
        }
    }
    Ok(None)
}

fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse TOML from file: {}", path.display()))
}

fn merge_configs(user: Config, project: Option<Config>) -> Config {
    let project_cfg = match project {
        Some(p) => p,
        None => return user,
    };
    let defaults = CliConfig::default();
    let (p, u) = (project_cfg.cli, user.cli);
    let cli = CliConfig {
        program: if p.program != defaults.program {
            p.program
        } else {
            u.program
        },
        min_version: if p.min_version != defaults.min_version {
            p.min_version
        } else {
            u.min_version
        },
        check_version: p.check_version && u.check_version,
        working_dir: p.working_dir.or(u.working_dir),
        require_working_dir: p.require_working_dir && u.require_working_dir,
        use_terminal: p.use_terminal || u.use_terminal,
        sanitize_output: p.sanitize_output || u.sanitize_output,
        log_dir: p.log_dir.or(u.log_dir),
    };
    Config {
        cli,
        plugins: if !project_cfg.plugins.is_empty() {
            project_cfg.plugins
        } else {
            user.plugins
        },
        commands: if !project_cfg.commands.is_empty() {
            project_cfg.commands
        } else {
            user.commands
        },
        logs: if project_cfg.logs.args != default_logs_args() {
            project_cfg.logs
        } else {
            user.logs
        },
    }
}

fn apply_builtin_tables(config: &mut Config) {
    if config.commands.is_empty() {
        debug!("No commands configured, using the built-in registration table.");
        config.commands = default_commands();
    }
    if config.plugins.is_empty() {
        config.plugins = default_plugins();
    }
}

fn expand_config_paths(config: &mut Config) -> Result<()> {
    if let Some(dir) = config.cli.working_dir.as_mut() {
        *dir = shellexpand::tilde(dir.as_str()).into_owned();
        debug!("Expanded working directory: {}", dir);
    }
    if let Some(dir) = config.cli.log_dir.as_mut() {
        *dir = shellexpand::tilde(dir.as_str()).into_owned();
        debug!("Expanded log directory: {}", dir);
    }
    Ok(())
}

fn validate_config(config: &Config) -> Result<()> {
    info!("Validating final configuration...");
    if config.cli.program.trim().is_empty() {
        return Err(anyhow!(CliError::Config(
            "'cli.program' cannot be empty.".to_string()
        )));
    }
    if version::parse_version(&config.cli.min_version).is_none() {
        return Err(anyhow!(CliError::Config(format!(
            "Invalid 'cli.min_version' value: '{}'. Expected MAJOR.MINOR.PATCH.",
            config.cli.min_version
        ))));
    }
    let mut seen = HashSet::new();
    for entry in &config.commands {
        if !seen.insert(entry.key.as_str()) {
            return Err(anyhow!(CliError::Config(format!(
                "Command key '{}' is registered more than once.",
                entry.key
            ))));
        }
        if entry.prompts.iter().any(|p| p.prompt.trim().is_empty()) {
            return Err(anyhow!(CliError::Config(format!(
                "Command '{}' has a prompt with empty text.",
                entry.key
            ))));
        }
    }
    if let Some(dir) = &config.cli.working_dir {
        if !Path::new(dir).is_dir() {
            warn!("Configured working directory '{}' does not exist.", dir);
        }
    }
    info!("Configuration validation successful.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_deserialize_basic_toml() {
        let toml_content = r#"
            [cli]
            program = "bx"
            min_version = "2.1.0"
            sanitize_output = true

            [[plugins]]
            command = "ks"
            name = "container-service"

            [[commands]]
            key = "ks.worker-rm"
            args = ["ks", "worker-rm"]
            additional_args = ["-f"]

            [[commands.prompts]]
            prompt = "Specify a cluster name or id"

            [[commands.prompts]]
            prompt = "Specify a worker id"
            prefix = "--worker"

            [[commands]]
            key = "plugin.uninstall"
            args = ["plugin", "uninstall"]

            [[commands.prompts]]
            prompt = "Specify a plugin"
            options_from = "installed-plugins"
        "#;

        let config: Config = toml::from_str(toml_content).expect("Failed to parse TOML");

        assert_eq!(config.cli.program, "bx");
        assert_eq!(config.cli.min_version, "2.1.0");
        assert!(config.cli.sanitize_output);
        assert!(config.cli.require_working_dir); // Default
        assert!(config.cli.check_version); // Default
        assert_eq!(config.plugin_for_command("ks"), Some("container-service"));
        assert_eq!(config.commands.len(), 2);

        let worker_rm = config.command("ks.worker-rm").unwrap();
        assert_eq!(worker_rm.additional_args, vec!["-f"]);
        assert_eq!(worker_rm.prompts.len(), 2);
        assert_eq!(worker_rm.prompts[1].prefix.as_deref(), Some("--worker"));
        assert!(worker_rm.prompts[0].prefix.is_none());

        let uninstall = config.command("plugin.uninstall").unwrap();
        assert_eq!(
            uninstall.prompts[0].options_from,
            Some(OptionSource::InstalledPlugins)
        );
        assert_eq!(config.logs.args, vec!["cf", "logs"]); // Default
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result: std::result::Result<Config, _> = toml::from_str("[cli]\nprogramm = \"x\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_path_expansion() {
        let mut config = Config {
            cli: CliConfig {
                working_dir: Some("~/project".to_string()),
                log_dir: Some("/var/log/cloudcmd".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        expand_config_paths(&mut config).unwrap();

        let home_dir = dirs::home_dir().unwrap();
        assert_eq!(
            config.cli.working_dir.as_deref(),
            Some(home_dir.join("project").to_string_lossy().as_ref())
        );
        assert_eq!(config.cli.log_dir.as_deref(), Some("/var/log/cloudcmd"));
    }

    #[test]
    fn test_merge_prefers_project_values() {
        let user = Config {
            cli: CliConfig {
                program: "bx".to_string(),
                working_dir: Some("/user/dir".to_string()),
                ..Default::default()
            },
            plugins: vec![PluginMapping {
                command: "cs".into(),
                name: "container-service".into(),
            }],
            ..Default::default()
        };
        let project = Config {
            cli: CliConfig {
                min_version: "3.0.0".to_string(),
                sanitize_output: true,
                ..Default::default()
            },
            ..Default::default()
        };

        let merged = merge_configs(user, Some(project));
        assert_eq!(merged.cli.program, "bx"); // Project left the default
        assert_eq!(merged.cli.min_version, "3.0.0");
        assert!(merged.cli.sanitize_output);
        assert_eq!(merged.cli.working_dir.as_deref(), Some("/user/dir"));
        assert_eq!(merged.plugin_for_command("cs"), Some("container-service"));
    }

    #[test]
    fn test_builtin_tables_fill_empty_config() {
        let mut config = Config::default();
        apply_builtin_tables(&mut config);
        assert!(config.command("cf.apps").is_some());
        assert!(config.command("login").map(|c| c.terminal).unwrap_or(false));
        assert_eq!(config.plugin_for_command("ks"), Some("container-service"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_config_duplicate_keys() {
        let entry = default_commands().remove(0);
        let config = Config {
            commands: vec![entry.clone(), entry],
            ..Default::default()
        };
        let result = validate_config(&config);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("registered more than once"));
    }

    #[test]
    fn test_validate_config_bad_min_version() {
        let config = Config {
            cli: CliConfig {
                min_version: "latest".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_load_explicit_config_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("cloudcmd.toml");
        fs::write(&path, "[cli]\nprogram = \"echo\"\ncheck_version = false\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.cli.program, "echo");
        assert!(!config.cli.check_version);
        assert!(!config.commands.is_empty()); // Built-in table applied
    }
}

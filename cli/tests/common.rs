//! # cloudcmd CLI Integration Test Common Helpers
//!
//! File: cli/tests/common.rs
//!
//! ## Overview
//!
//! Shared helpers for the integration tests in `cli/tests/`. Each test file
//! declares `mod common;` and drives the compiled `cloudcmd` binary through
//! `assert_cmd`.
//!
//! Every command built here runs with an isolated configuration: the user
//! config directory points into a temporary directory and the explicit
//! `--config` file disables the CLI version check and the working-directory
//! requirement, so tests never depend on a real cloud CLI being installed.
//!

// Different test files use different helpers.
#![allow(dead_code)]

pub use assert_cmd::Command;
use std::fs;
use tempfile::TempDir;

const TEST_CONFIG: &str = r#"
[cli]
check_version = false
require_working_dir = false
"#;

/// # Get cloudcmd Command (`cloudcmd_cmd`)
///
/// ## Panics
///
/// Panics if the `cloudcmd` binary cannot be found via `Command::cargo_bin`.
pub fn cloudcmd_cmd() -> Command {
    Command::cargo_bin("cloudcmd").expect("Failed to find cloudcmd binary for testing")
}

/// A temporary home for one test: a config file plus an empty user config dir.
pub struct TestEnv {
    pub dir: TempDir,
}

impl TestEnv {
    /// Creates the environment with the default test configuration.
    pub fn new() -> Self {
        Self::with_config(TEST_CONFIG)
    }

    /// Creates the environment with `config` as the `--config` file.
    pub fn with_config(config: &str) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        fs::write(dir.path().join("cloudcmd.toml"), config).expect("Failed to write test config");
        fs::create_dir_all(dir.path().join("xdg")).expect("Failed to create config home");
        Self { dir }
    }

    /// A `cloudcmd` command that uses this environment's configuration.
    pub fn cmd(&self) -> Command {
        let mut cmd = cloudcmd_cmd();
        cmd.env("XDG_CONFIG_HOME", self.dir.path().join("xdg"))
            .env_remove("CLOUDCMD_CONFIG")
            .env_remove("RUST_LOG")
            .current_dir(self.dir.path())
            .arg("--config")
            .arg(self.dir.path().join("cloudcmd.toml"));
        cmd
    }
}

//! # cloudcmd Cloud CLI Helpers (`common::cloud`)
//!
//! File: cli/src/common/cloud/mod.rs
//!
//! ## Overview
//!
//! Knowledge about the wrapped cloud CLI itself, built on top of
//! `common::process`:
//!
//! - **`plugin`**: JSON queries for installed, repository and IAM data, and the
//!   `PluginInstaller` recovery policy.
//! - **`version`**: version parsing and the once-per-session version check.
//!
pub mod plugin;
pub mod version;

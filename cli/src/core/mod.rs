//! # cloudcmd Core Infrastructure
//!
//! File: cli/src/core/mod.rs
//!
//! ## Overview
//!
//! Foundational pieces shared by every command: configuration, error types and
//! the application context that carries process-wide state.
//!
//! ## Architecture
//!
//! - `config`: Configuration loading, merging, and validation
//! - `context`: `AppContext`, built once in `main` and passed as `Arc<AppContext>`
//! - `error`: Error types and error handling utilities
//!
//! ## Usage
//!
//! ```rust
//! use crate::core::config; // For loading configuration
//! use crate::core::context::AppContext; // Shared state and collaborators
//! use crate::core::error::{CliError, Result}; // For error handling
//! ```
//!
pub mod config;
pub mod context;
pub mod error;

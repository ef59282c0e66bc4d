//! # cloudcmd Error Types
//!
//! File: cli/src/core/error.rs
//!
//! ## Overview
//!
//! This module defines the error types used throughout cloudcmd. Most functions
//! return the crate-wide `Result<T>` (an `anyhow::Result`) so context can be added
//! freely with `anyhow::Context`. Failures that callers need to react to are raised
//! as a `CliError` variant and recovered with `downcast_ref`.
//!
//! ## Architecture
//!
//! - `CliError`: a `thiserror` enum covering configuration problems, launch
//!   failures of the wrapped program, abnormal termination, plugin installation
//!   and terminal failures.
//! - `Result<T>`: alias for `anyhow::Result<T>`.
//!
//! ## Examples
//!
//! ```rust
//! match execution.execute().await {
//!     Ok(code) => println!("exited with {}", code),
//!     Err(e) if matches!(e.downcast_ref::<CliError>(), Some(CliError::CommandNotFound { .. })) => {
//!         println!("Install the CLI first.");
//!     }
//!     Err(e) => return Err(e),
//! }
//! ```
//!
use thiserror::Error;

/// Custom error type for cloudcmd.
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No working directory is available for '{command}'. Please select your project's working directory.")]
    MissingWorkingDirectory { command: String },

    /// The program could not be launched at all. `code` is the negative status
    /// reported for the launch failure.
    #[error("Unable to locate '{command}' (status {code}).")]
    CommandNotFound { command: String, code: i32 },

    #[error("'{command}' was terminated by signal {signal}.")]
    Terminated { command: String, signal: i32 },

    /// The execution was killed before it could spawn (or re-spawn) its child.
    #[error("'{command}' was stopped before it could run.")]
    Cancelled { command: String },

    /// The child's event stream ended without an exit status.
    #[error("Lost track of '{command}' before it reported an exit status.")]
    StreamLost { command: String },

    #[error("Plugin installation failed: {0}")]
    PluginInstall(String),

    #[error("Terminal error: {0}")]
    Terminal(String),

    #[error("Could not parse CLI output as JSON: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("Argument parsing error: {0}")]
    ArgumentParsing(String),
}

impl CliError {
    /// Returns the numeric status carried by a failed execution, if any.
    ///
    /// Launch failures report their negative status; signal terminations report
    /// the negated signal number so callers see a negative code in both cases.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            CliError::CommandNotFound { code, .. } => Some(*code),
            CliError::Terminated { signal, .. } => Some(-signal),
            _ => None,
        }
    }
}

/// Type alias for Result using anyhow::Error for broad compatibility.
pub type Result<T> = anyhow::Result<T>;

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let config_err = CliError::Config("Missing setting 'program'".to_string());
        assert_eq!(
            config_err.to_string(),
            "Configuration error: Missing setting 'program'"
        );

        let not_found = CliError::CommandNotFound {
            command: "ibmcloud".into(),
            code: -2,
        };
        assert_eq!(
            not_found.to_string(),
            "Unable to locate 'ibmcloud' (status -2)."
        );
    }

    #[test]
    fn test_exit_code_is_negative_for_failed_runs() {
        let not_found = CliError::CommandNotFound {
            command: "foo".into(),
            code: -2,
        };
        assert_eq!(not_found.exit_code(), Some(-2));

        let killed = CliError::Terminated {
            command: "ibmcloud".into(),
            signal: 9,
        };
        assert_eq!(killed.exit_code(), Some(-9));

        assert_eq!(CliError::Config("x".into()).exit_code(), None);
    }

    #[test]
    fn test_downcast_from_anyhow() {
        let err: anyhow::Error = CliError::MissingWorkingDirectory {
            command: "ibmcloud".into(),
        }
        .into();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::MissingWorkingDirectory { .. })
        ));
    }
}

//! # cloudcmd Failure Classification (`common::process::classify`)
//!
//! File: cli/src/common/process/classify.rs
//!
//! Maps the outcome of a finished command to the few failure kinds the
//! execution engine reacts to. Ordinary CLI errors are not failures here: the
//! wrapped CLI reports them as text and the caller inspects that text.

/// Marker the wrapped CLI prints when a subcommand belongs to a plugin that is
/// not installed (`'ks' is not a registered command. See 'ibmcloud help'.`).
pub const PLUGIN_NOT_FOUND_MARKER: &str = "not a registered command";

/// Failure kinds recognised by the execution engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Clean exit.
    None,
    /// Non-zero exit without a recognised cause; left to the caller.
    Unknown,
    /// The program could not be launched (negative status).
    CommandNotFound,
    /// A plugin subcommand was used without the plugin installed.
    PluginNotFound,
}

/// Classifies a finished command.
///
/// A negative `code` always means the program never ran, whatever the text
/// says. Otherwise the plugin marker is searched in stdout first, then stderr.
pub fn classify(code: i32, stdout: &str, stderr: &str) -> FailureKind {
    if code < 0 {
        FailureKind::CommandNotFound
    } else if stdout.contains(PLUGIN_NOT_FOUND_MARKER) || stderr.contains(PLUGIN_NOT_FOUND_MARKER) {
        FailureKind::PluginNotFound
    } else if code == 0 {
        FailureKind::None
    } else {
        FailureKind::Unknown
    }
}

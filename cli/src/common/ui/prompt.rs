//! # cloudcmd Interactive Prompts (`common::ui::prompt`)
//!
//! File: cli/src/common/ui/prompt.rs
//!
//! ## Overview
//!
//! The `Prompter` trait is everything the execution engine needs from the user:
//! free-text input, single choice from a list, a yes/no confirmation, and
//! transient notifications. Cancelled or empty input is reported as `None`.
//!
//! `ConsolePrompter` implements it on the process's stdin/stderr so prompts never
//! mix with captured command output on stdout.
//!
use async_trait::async_trait;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Severity of a transient notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warning,
    Error,
}

impl Level {
    fn label(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
        }
    }
}

/// Interactive user input collaborator.
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Asks for free text. Returns `None` on cancel or empty input.
    async fn ask_text(&self, prompt: &str) -> Option<String>;

    /// Asks for one of `options`. Returns `None` on cancel or an invalid answer.
    async fn ask_choice(&self, prompt: &str, options: &[String]) -> Option<String>;

    /// Asks a yes/no question. Anything but an explicit yes is a no.
    async fn confirm(&self, question: &str) -> bool;

    /// True when `confirm` answers yes on its own without reading input.
    fn auto_confirms(&self) -> bool {
        false
    }

    /// Shows a transient message.
    fn notify(&self, level: Level, message: &str);
}

/// Console implementation reading answers line by line from stdin.
pub struct ConsolePrompter {
    lines: Mutex<Lines<BufReader<Stdin>>>,
    assume_yes: bool,
}

impl ConsolePrompter {
    /// # Arguments
    ///
    /// * `assume_yes` - Answer every confirmation with yes without reading stdin.
    pub fn new(assume_yes: bool) -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
            assume_yes,
        }
    }

    async fn read_answer(&self, prompt: &str) -> Option<String> {
        {
            let mut stderr = std::io::stderr().lock();
            let _ = write!(stderr, "{}", prompt);
            let _ = stderr.flush();
        }
        let mut lines = self.lines.lock().await;
        match lines.next_line().await {
            Ok(Some(line)) => {
                let answer = line.trim().to_string();
                if answer.is_empty() {
                    None
                } else {
                    Some(answer)
                }
            }
            Ok(None) => {
                debug!("stdin closed while waiting for an answer");
                None
            }
            Err(e) => {
                warn!("Failed to read answer from stdin: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl Prompter for ConsolePrompter {
    async fn ask_text(&self, prompt: &str) -> Option<String> {
        self.read_answer(&format!("{}: ", prompt)).await
    }

    async fn ask_choice(&self, prompt: &str, options: &[String]) -> Option<String> {
        if options.is_empty() {
            return None;
        }
        eprintln!("{}", prompt);
        for (index, option) in options.iter().enumerate() {
            eprintln!("  {}) {}", index + 1, option);
        }
        let answer = self
            .read_answer(&format!("Select [1-{}]: ", options.len()))
            .await?;
        let choice = resolve_choice(&answer, options);
        if choice.is_none() {
            warn!("'{}' is not one of the offered options", answer);
        }
        choice
    }

    async fn confirm(&self, question: &str) -> bool {
        if self.assume_yes {
            info!("Auto-confirming: {}", question);
            return true;
        }
        match self.read_answer(&format!("{} [y/N]: ", question)).await {
            Some(answer) => matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes"),
            None => false,
        }
    }

    fn auto_confirms(&self) -> bool {
        self.assume_yes
    }

    fn notify(&self, level: Level, message: &str) {
        match level {
            Level::Info => info!("{}", message),
            Level::Warning => warn!("{}", message),
            Level::Error => error!("{}", message),
        }
        eprintln!("{}: {}", level.label(), message);
    }
}

/// Maps an answer to an option, either by 1-based index or by exact text.
fn resolve_choice(answer: &str, options: &[String]) -> Option<String> {
    if let Ok(index) = answer.parse::<usize>() {
        return index
            .checked_sub(1)
            .and_then(|i| options.get(i))
            .cloned();
    }
    options.iter().find(|option| *option == answer).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Vec<String> {
        vec!["app1".to_string(), "app2".to_string()]
    }

    #[test]
    fn test_resolve_choice_by_index() {
        assert_eq!(resolve_choice("2", &options()), Some("app2".to_string()));
    }

    #[test]
    fn test_resolve_choice_by_text() {
        assert_eq!(resolve_choice("app1", &options()), Some("app1".to_string()));
    }

    #[test]
    fn test_resolve_choice_out_of_range() {
        assert_eq!(resolve_choice("0", &options()), None);
        assert_eq!(resolve_choice("3", &options()), None);
        assert_eq!(resolve_choice("app3", &options()), None);
    }

    #[test]
    fn test_assume_yes_auto_confirms() {
        assert!(ConsolePrompter::new(true).auto_confirms());
        assert!(!ConsolePrompter::new(false).auto_confirms());
    }

    #[tokio::test]
    async fn test_assume_yes_confirms_without_input() {
        assert!(ConsolePrompter::new(true).confirm("Install?").await);
    }

    #[test]
    fn test_level_labels() {
        assert_eq!(Level::Error.label(), "ERROR");
        assert_eq!(Level::Warning.label(), "WARNING");
    }
}
